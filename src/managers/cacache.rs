//! Disk-backed [`CacheManager`] using [`cacache`] for content-addressed
//! storage and [`postcard`] for metadata serialization.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::body::CacheWriter;
use crate::error::{CacheError, Result};
use crate::store::{CacheManager, CacheRequest, StoredEntry};

/// Implements [`CacheManager`] with [`cacache`] as the backend.
#[derive(Debug, Clone)]
pub struct CACacheManager {
    /// Directory where the cache will be stored.
    pub path: String,
}

impl Default for CACacheManager {
    fn default() -> Self {
        Self { path: "./http-cache-core-cacache".into() }
    }
}

impl CACacheManager {
    /// Clears out the entire cache.
    pub async fn clear(&self) -> Result<()> {
        cacache::clear(&self.path).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct Store {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    has_tls_handshake: bool,
    sent_request_millis: i64,
    received_response_millis: i64,
}

fn header_map_to_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect()
}

fn pairs_to_header_map(pairs: Vec<(String, String)>) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::from_bytes(name.as_bytes()),
            http::header::HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    headers
}

#[async_trait]
impl CacheManager for CACacheManager {
    async fn get(&self, cache_key: &str) -> Option<StoredEntry> {
        let bytes = cacache::read(&self.path, cache_key).await.ok()?;
        let store: Store = postcard::from_bytes(&bytes).ok()?;
        Some(StoredEntry {
            status: store.status,
            headers: pairs_to_header_map(store.headers),
            body: Bytes::from(store.body),
            has_tls_handshake: store.has_tls_handshake,
            sent_request_millis: store.sent_request_millis,
            received_response_millis: store.received_response_millis,
        })
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
        let writer: Box<dyn CacheWriter> = Box::new(CaCacheWriter {
            path: self.path.clone(),
            cache_key: cache_key.to_owned(),
            status,
            headers: header_map_to_pairs(headers),
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
        let Some(existing) = self.get(cache_key).await else { return Ok(()) };
        let store = Store {
            status: existing.status,
            headers: header_map_to_pairs(headers),
            body: existing.body.to_vec(),
            has_tls_handshake: existing.has_tls_handshake,
            sent_request_millis,
            received_response_millis,
        };
        let bytes = postcard::to_allocvec(&store)?;
        cacache::write(&self.path, cache_key, bytes).await?;
        Ok(())
    }

    async fn remove(&self, cache_key: &str) -> Result<()> {
        cacache::remove(&self.path, cache_key).await?;
        Ok(())
    }
}

/// Buffers the response body in memory and writes it to `cacache` as one
/// blob on commit. `cacache`'s own `Writer` is itself a buffered-then-fsync
/// abstraction, so there is no streaming write to tee into incrementally —
/// bytes accumulate here and hit disk only at `commit`.
struct CaCacheWriter {
    path: String,
    cache_key: String,
    status: u16,
    headers: Vec<(String, String)>,
    has_tls_handshake: bool,
    sent_request_millis: i64,
    received_response_millis: i64,
    buf: Vec<u8>,
}

impl CacheWriter for CaCacheWriter {
    fn write(
        &mut self,
        chunk: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.buf.extend_from_slice(&chunk);
        Box::pin(async { Ok(()) })
    }

    fn commit(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            let store = Store {
                status: self.status,
                headers: self.headers,
                body: self.buf,
                has_tls_handshake: self.has_tls_handshake,
                sent_request_millis: self.sent_request_millis,
                received_response_millis: self.received_response_millis,
            };
            let bytes = postcard::to_allocvec(&store)
                .map_err(CacheError::from)?;
            cacache::write(&self.path, &self.cache_key, bytes)
                .await
                .map_err(CacheError::from)?;
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
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let manager =
            CACacheManager { path: dir.path().to_string_lossy().into_owned() };

        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let mut writer =
            manager.put("key", 200, &headers, false, 1, 2).await.unwrap();
        writer.write(Bytes::from_static(b"hello")).await.unwrap();
        writer.commit().await.unwrap();

        let entry = manager.get("key").await.unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(entry.body, Bytes::from_static(b"hello"));
        assert_eq!(entry.headers.get("content-type").unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn remove_makes_entry_unreadable() {
        let dir = TempDir::new().unwrap();
        let manager =
            CACacheManager { path: dir.path().to_string_lossy().into_owned() };
        let headers = HeaderMap::new();
        let mut writer =
            manager.put("key", 200, &headers, false, 1, 2).await.unwrap();
        writer.write(Bytes::from_static(b"x")).await.unwrap();
        writer.commit().await.unwrap();

        manager.remove("key").await.unwrap();
        assert!(manager.get("key").await.is_none());
    }
}
