//! In-memory [`CacheManager`] backed by [`moka::future::Cache`].

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use moka::future::Cache;

use crate::body::CacheWriter;
use crate::error::Result;
use crate::store::{CacheManager, CacheRequest, StoredEntry};

/// Implements [`CacheManager`] with an in-memory [`moka::future::Cache`] as
/// the backend. Entries never touch disk and vanish with the process.
#[derive(Clone)]
pub struct MokaManager {
    cache: Cache<String, StoredEntry>,
}

impl std::fmt::Debug for MokaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MokaManager").finish_non_exhaustive()
    }
}

impl Default for MokaManager {
    fn default() -> Self {
        Self::new(Cache::new(42))
    }
}

impl MokaManager {
    /// Creates a new manager from a pre-configured cache (capacity, TTL and
    /// eviction policy are the caller's concern; this manager only speaks
    /// the [`CacheManager`] contract over it).
    pub fn new(cache: Cache<String, StoredEntry>) -> Self {
        Self { cache }
    }

    /// Clears out the entire cache.
    pub async fn clear(&self) -> Result<()> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}

#[async_trait]
impl CacheManager for MokaManager {
    async fn get(&self, cache_key: &str) -> Option<StoredEntry> {
        self.cache.get(cache_key).await
    }

    async fn put(
        &self,
        cache_key: &str,
        status: u16,
        headers: &HeaderMap,
        has_tls_handshake: bool,
        sent_request_millis: i64,
        received_response_millis: i64,
    ) -> Option<CacheRequest> {
        let writer: Box<dyn CacheWriter> = Box::new(MokaWriter {
            cache: self.cache.clone(),
            cache_key: cache_key.to_owned(),
            status,
            headers: headers.clone(),
            has_tls_handshake,
            sent_request_millis,
            received_response_millis,
            buf: Vec::new(),
        });
        Some(writer)
    }

    async fn update(
        &self,
        cache_key: &str,
        headers: &HeaderMap,
        sent_request_millis: i64,
        received_response_millis: i64,
    ) -> Result<()> {
        let Some(mut existing) = self.cache.get(cache_key).await else {
            return Ok(());
        };
        existing.headers = headers.clone();
        existing.sent_request_millis = sent_request_millis;
        existing.received_response_millis = received_response_millis;
        self.cache.insert(cache_key.to_owned(), existing).await;
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn remove(&self, cache_key: &str) -> Result<()> {
        self.cache.invalidate(cache_key).await;
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}

/// Buffers the response body in memory and inserts it into the cache as one
/// entry on commit — moka itself has no notion of a partial/streaming
/// entry, so there is nothing to tee incrementally into.
struct MokaWriter {
    cache: Cache<String, StoredEntry>,
    cache_key: String,
    status: u16,
    headers: HeaderMap,
    has_tls_handshake: bool,
    sent_request_millis: i64,
    received_response_millis: i64,
    buf: Vec<u8>,
}

impl CacheWriter for MokaWriter {
    fn write(
        &mut self,
        chunk: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.buf.extend_from_slice(&chunk);
        Box::pin(async { Ok(()) })
    }

    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            let entry = StoredEntry {
                status: self.status,
                headers: self.headers,
                body: Bytes::from(self.buf),
                has_tls_handshake: self.has_tls_handshake,
                sent_request_millis: self.sent_request_millis,
                received_response_millis: self.received_response_millis,
            };
            self.cache.insert(self.cache_key, entry).await;
            self.cache.run_pending_tasks().await;
            Ok(())
        })
    }

    fn abort(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let manager = MokaManager::default();
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let mut writer =
            manager.put("key", 200, &headers, false, 1, 2).await.unwrap();
        writer.write(Bytes::from_static(b"hello")).await.unwrap();
        writer.commit().await.unwrap();

        let entry = manager.get("key").await.unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn update_replaces_headers_without_touching_body() {
        let manager = MokaManager::default();
        let headers = HeaderMap::new();
        let mut writer =
            manager.put("key", 200, &headers, false, 1, 2).await.unwrap();
        writer.write(Bytes::from_static(b"body")).await.unwrap();
        writer.commit().await.unwrap();

        let mut updated = HeaderMap::new();
        updated.insert("etag", HeaderValue::from_static("\"v2\""));
        manager.update("key", &updated, 10, 20).await.unwrap();

        let entry = manager.get("key").await.unwrap();
        assert_eq!(entry.body, Bytes::from_static(b"body"));
        assert_eq!(entry.headers.get("etag").unwrap(), "\"v2\"");
        assert_eq!(entry.sent_request_millis, 10);
    }

    #[tokio::test]
    async fn remove_makes_entry_unreadable() {
        let manager = MokaManager::default();
        let headers = HeaderMap::new();
        let mut writer =
            manager.put("key", 200, &headers, false, 1, 2).await.unwrap();
        writer.write(Bytes::from_static(b"x")).await.unwrap();
        writer.commit().await.unwrap();

        manager.remove("key").await.unwrap();
        assert!(manager.get("key").await.is_none());
    }
}
