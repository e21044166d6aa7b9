// Application configuration, loaded from environment variables.

/// Which image provider to call for room art.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageProvider {
    OpenAi,
    FluxSchnell,
}

impl ImageProvider {
    fn from_env(v: &str) -> Self {
        match v.to_ascii_lowercase().as_str() {
            "flux" | "flux_schnell" | "flux-schnell" => ImageProvider::FluxSchnell,
            _ => ImageProvider::OpenAi,
        }
    }

    /// Target dimensions for Flux Schnell requests (spec.md §6).
    pub fn flux_dimensions() -> (u32, u32) {
        (1024, 576)
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Durable store connection string (sqlite:// or postgres://).
    pub database_url: String,
    /// Transient store (redis) connection URL.
    pub redis_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// API key required via `X-API-Key` on all routes but `/health`.
    pub api_key: Option<String>,
    /// JWT secret shared with the identity provider (HS256, aud=authenticated).
    pub jwt_secret: Option<String>,
    /// Text LLM provider API key.
    pub llm_api_key: String,
    /// Which image generation provider to use.
    pub image_provider: ImageProvider,
    /// Whether image generation is enabled at all.
    pub image_generation_enabled: bool,
    /// 3D model provider API key and model id.
    pub model_provider_key: Option<String>,
    pub model_provider_model_id: Option<String>,
    /// S3-compatible object storage endpoint for the `room-images` /
    /// `room-models` buckets (spec.md §6); unset falls back to an
    /// in-memory fake for local/dev runs.
    pub object_store_endpoint: Option<String>,
    pub object_store_access_key: Option<String>,
    /// CORS allowed origins; empty means permissive (dev only).
    pub cors_allow_origins: Vec<String>,
    /// Default world seed used when none has been generated yet.
    pub default_world_seed: String,
    /// Maximum players allowed concurrently in one room.
    pub max_players_per_room: usize,
    /// Rate limiter defaults (spec.md §4.7.1).
    pub rate_limit_max_actions: u32,
    pub rate_limit_interval_minutes: i64,
    /// Bypass for combat move validation, for local testing only.
    pub allow_any_combat_move: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Recognized variables (spec.md §6): `DATABASE_URL`, `REDIS_URL`,
    /// `PORT`, `API_KEY`, `JWT_SECRET`, `LLM_API_KEY`, `IMAGE_PROVIDER`,
    /// `IMAGE_GENERATION_ENABLED`, `MODEL_PROVIDER_KEY`,
    /// `MODEL_PROVIDER_MODEL_ID`, `OBJECT_STORE_ENDPOINT`,
    /// `OBJECT_STORE_ACCESS_KEY`, `CORS_ALLOW_ORIGINS`, `DEFAULT_WORLD_SEED`,
    /// `MAX_PLAYERS_PER_ROOM`, `RATE_LIMIT_MAX_ACTIONS`,
    /// `RATE_LIMIT_INTERVAL_MINUTES`, `ALLOW_ANY_COMBAT_MOVE`.
    pub fn load() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:realmforge.db?mode=rwc".to_string());
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let api_key = std::env::var("API_KEY").ok().filter(|s| !s.is_empty());
        let jwt_secret = std::env::var("JWT_SECRET").ok().filter(|s| !s.is_empty());
        let llm_api_key = std::env::var("LLM_API_KEY").unwrap_or_default();
        let image_provider = std::env::var("IMAGE_PROVIDER")
            .map(|v| ImageProvider::from_env(&v))
            .unwrap_or(ImageProvider::OpenAi);
        let image_generation_enabled = std::env::var("IMAGE_GENERATION_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(true);
        let model_provider_key = std::env::var("MODEL_PROVIDER_KEY").ok();
        let model_provider_model_id = std::env::var("MODEL_PROVIDER_MODEL_ID").ok();
        let object_store_endpoint = std::env::var("OBJECT_STORE_ENDPOINT").ok().filter(|s| !s.is_empty());
        let object_store_access_key =
            std::env::var("OBJECT_STORE_ACCESS_KEY").ok().filter(|s| !s.is_empty());
        let cors_allow_origins = std::env::var("CORS_ALLOW_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        let default_world_seed =
            std::env::var("DEFAULT_WORLD_SEED").unwrap_or_else(|_| "genesis".to_string());
        let max_players_per_room = std::env::var("MAX_PLAYERS_PER_ROOM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(16);
        let rate_limit_max_actions = std::env::var("RATE_LIMIT_MAX_ACTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);
        let rate_limit_interval_minutes = std::env::var("RATE_LIMIT_INTERVAL_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);
        let allow_any_combat_move = std::env::var("ALLOW_ANY_COMBAT_MOVE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        Config {
            database_url,
            redis_url,
            port,
            api_key,
            jwt_secret,
            llm_api_key,
            image_provider,
            image_generation_enabled,
            model_provider_key,
            model_provider_model_id,
            object_store_endpoint,
            object_store_access_key,
            cors_allow_origins,
            default_world_seed,
            max_players_per_room,
            rate_limit_max_actions,
            rate_limit_interval_minutes,
            allow_any_combat_move,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_provider_from_env() {
        assert_eq!(ImageProvider::from_env("openai"), ImageProvider::OpenAi);
        assert_eq!(
            ImageProvider::from_env("flux-schnell"),
            ImageProvider::FluxSchnell
        );
        assert_eq!(ImageProvider::from_env("garbage"), ImageProvider::OpenAi);
    }
}
