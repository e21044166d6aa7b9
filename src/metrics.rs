// Prometheus metrics definitions for the realmforge backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Live WebSocket / session connections.
    pub static ref CONNECTED_SESSIONS: IntGauge =
        IntGauge::new("realmforge_connected_sessions", "Live client sessions").unwrap();

    /// Rooms currently mid-generation (status = generating).
    pub static ref ROOMS_GENERATING: IntGauge =
        IntGauge::new("realmforge_rooms_generating", "Rooms currently mid-generation").unwrap();

    /// Active duels (player-vs-player and player-vs-monster).
    pub static ref ACTIVE_DUELS: IntGauge =
        IntGauge::new("realmforge_active_duels", "Currently active duels").unwrap();

    /// Background preload/image/3D jobs in flight.
    pub static ref GENERATION_JOBS_IN_FLIGHT: IntGauge = IntGauge::new(
        "realmforge_generation_jobs_in_flight",
        "Background generation jobs currently running"
    )
    .unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total rooms created, by whether they were placeholders.
    pub static ref ROOMS_CREATED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("realmforge_rooms_created_total", "Total rooms created"),
        &["kind"],
    )
    .unwrap();

    /// Total atomic-create coordinate conflicts observed (not an error, just a race).
    pub static ref COORDINATE_CONFLICTS_TOTAL: IntCounter = IntCounter::new(
        "realmforge_coordinate_conflicts_total",
        "Atomic room creation conflicts resolved by loading the winner",
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("realmforge_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    /// Total actions processed, by outcome (applied, rate_limited, error).
    pub static ref ACTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("realmforge_actions_total", "Total player actions processed"),
        &["outcome"],
    )
    .unwrap();

    /// Total duels started, by kind (pvp, monster).
    pub static ref DUELS_STARTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("realmforge_duels_started_total", "Total duels started"),
        &["kind"],
    )
    .unwrap();

    /// Total duels ended, by outcome (win, draw, disconnect).
    pub static ref DUELS_ENDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("realmforge_duels_ended_total", "Total duels ended"),
        &["outcome"],
    )
    .unwrap();

    /// Total LLM gateway calls, by operation and outcome.
    pub static ref LLM_CALLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("realmforge_llm_calls_total", "Total LLM gateway calls"),
        &["operation", "outcome"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "realmforge_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();

    /// LLM call latency in seconds, by operation.
    pub static ref LLM_CALL_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "realmforge_llm_call_duration_seconds",
            "LLM gateway call latency in seconds",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CONNECTED_SESSIONS.clone()),
        Box::new(ROOMS_GENERATING.clone()),
        Box::new(ACTIVE_DUELS.clone()),
        Box::new(GENERATION_JOBS_IN_FLIGHT.clone()),
        Box::new(ROOMS_CREATED_TOTAL.clone()),
        Box::new(COORDINATE_CONFLICTS_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(ACTIONS_TOTAL.clone()),
        Box::new(DUELS_STARTED_TOTAL.clone()),
        Box::new(DUELS_ENDED_TOTAL.clone()),
        Box::new(LLM_CALLS_TOTAL.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
        Box::new(LLM_CALL_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        REGISTRY.register(c).expect("failed to register metric");
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Normalize a URL path for metric labels: replace id-like path segments with
/// `:id` to prevent cardinality explosion (room ids, player ids, duel ids).
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.parse::<i64>().is_ok() || uuid::Uuid::parse_str(segment).is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/world/structure"), "/api/world/structure");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_normalize_path_with_ids() {
        assert_eq!(normalize_path("/room/42"), "/room/:id");
        assert_eq!(
            normalize_path("/rate-limit/status/123"),
            "/rate-limit/status/:id"
        );
    }

    #[test]
    fn test_normalize_path_with_uuid() {
        let path = "/room/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/room/:id");
    }

    #[test]
    fn test_gather_metrics_returns_string() {
        register_metrics();
        let output = gather_metrics();
        assert!(output.is_empty() || output.contains("realmforge_"));
    }

    #[test]
    fn test_metric_increments() {
        CONNECTED_SESSIONS.set(1);
        assert_eq!(CONNECTED_SESSIONS.get(), 1);
        CONNECTED_SESSIONS.set(0);

        ROOMS_GENERATING.inc();
        ROOMS_GENERATING.dec();

        ROOMS_CREATED_TOTAL.with_label_values(&["generated"]).inc();
        COORDINATE_CONFLICTS_TOTAL.inc();
        ACTIONS_TOTAL.with_label_values(&["applied"]).inc();
        DUELS_STARTED_TOTAL.with_label_values(&["pvp"]).inc();
        DUELS_ENDED_TOTAL.with_label_values(&["win"]).inc();
        LLM_CALLS_TOTAL
            .with_label_values(&["stream_action", "ok"])
            .inc();

        API_REQUEST_DURATION_SECONDS
            .with_label_values(&["/api/action"])
            .observe(0.05);
        LLM_CALL_DURATION_SECONDS.observe(1.2);

        API_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .inc();
    }
}
