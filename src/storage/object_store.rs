// Object storage client (spec.md §6): the bucket the image/3D background
// jobs in `engine::world` upload finished assets to. The object storage
// service itself is an explicit out-of-scope external collaborator
// (spec.md §1) — this module implements only the narrow upload/URL
// contract spec.md §6 names, against an S3-compatible HTTP endpoint, the
// same way `llm::http_gateway` is a thin `reqwest` adapter around its own
// external collaborator rather than a vendored SDK.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

/// `room-images` / `room-models` (spec.md §6): the only two buckets this
/// domain needs.
pub const BUCKET_IMAGES: &str = "room-images";
pub const BUCKET_MODELS: &str = "room-models";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads `data` to `bucket/key` and returns a URL with a `?v={unix_ts}`
    /// cache-buster appended (spec.md §6).
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// S3-compatible implementation: a plain HTTP PUT to
/// `{endpoint}/{bucket}/{key}`, optionally bearer-authenticated. This is
/// deliberately not a full S3 SigV4 client (out of scope per spec.md §1);
/// it is the narrow contract the background jobs need.
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    access_key: Option<String>,
}

impl HttpObjectStore {
    pub fn new(endpoint: impl Into<String>, access_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        HttpObjectStore {
            client,
            endpoint: endpoint.into(),
            access_key,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let url = format!("{}/{bucket}/{key}", self.endpoint.trim_end_matches('/'));
        let mut req = self
            .client
            .put(&url)
            .header("content-type", content_type)
            .body(data);
        if let Some(key) = &self.access_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| StorageError::Unavailable(format!("object store upload failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(StorageError::Unavailable(format!(
                "object store returned {} for {bucket}/{key}",
                resp.status()
            )));
        }
        let ts = chrono::Utc::now().timestamp();
        Ok(format!("{url}?v={ts}"))
    }
}

/// In-memory test double: "uploads" are a no-op that just fabricates the
/// same cache-busted URL shape, so engine tests can assert on URL format
/// without a live object store.
pub struct FakeObjectStore;

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        _data: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let ts = chrono::Utc::now().timestamp();
        Ok(format!("https://fake-object-store.local/{bucket}/{key}?v={ts}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_object_store_cache_busts_url() {
        let store = FakeObjectStore;
        let url = store
            .put_object(BUCKET_IMAGES, "rooms/room_start.webp", vec![1, 2, 3], "image/webp")
            .await
            .unwrap();
        assert!(url.contains("rooms/room_start.webp"));
        assert!(url.contains("?v="));
    }
}
