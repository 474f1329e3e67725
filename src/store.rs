//! The store contract: an external collaborator referenced by this crate
//! only through the [`CacheManager`] trait. Two concrete implementations
//! ship under [`crate::managers`]; callers may supply their own.

use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderMap;

use crate::body::CacheWriter;
use crate::error::Result;
use crate::policy::{Request, Strategy};

/// A stored response's bytes and metadata, as handed back by `get`.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// The stored response's status code.
    pub status: u16,
    /// The stored response's headers.
    pub headers: HeaderMap,
    /// The stored response's full body.
    pub body: Bytes,
    /// Whether the original exchange happened over HTTPS with a completed
    /// TLS handshake.
    pub has_tls_handshake: bool,
    /// The client's clock reading when the original request was sent.
    pub sent_request_millis: i64,
    /// The client's clock reading when the original response was received.
    pub received_response_millis: i64,
}

/// A handle returned by `put`: the caller writes bytes to it (via the
/// cache-writing body tee) and either commits by reaching EOF or aborts.
/// Modeled as a boxed [`CacheWriter`] plus the key it was opened under, so
/// a declined `put` (`None`) and a `passthrough` body share one code path
/// in the interceptor.
pub type CacheRequest = Box<dyn CacheWriter>;

/// Storing, reading, and removing cache entries, plus the telemetry hooks
/// the interceptor is required to call. Implementations are expected to
/// serialize their own `get`/`put`/`update`/`remove` operations per key;
/// this crate does not coordinate writers.
#[async_trait]
pub trait CacheManager: Send + Sync + 'static {
    /// Best-effort lookup by cache key. I/O errors are treated as a miss,
    /// not propagated — per the error handling model, a store read
    /// failure degrades to "behave as if nothing were cached."
    async fn get(&self, cache_key: &str) -> Option<StoredEntry>;

    /// Begins writing a new entry. Returns `None` if the store declines
    /// (e.g. an in-flight edit conflict on the same key), in which case
    /// the caller must pass the original body through unchanged.
    async fn put(
        &self,
        cache_key: &str,
        status: u16,
        headers: &HeaderMap,
        has_tls_handshake: bool,
        sent_request_millis: i64,
        received_response_millis: i64,
    ) -> Option<CacheRequest>;

    /// Replaces the headers of an existing entry after a 304 revalidation,
    /// without touching its stored body.
    async fn update(
        &self,
        cache_key: &str,
        headers: &HeaderMap,
        sent_request_millis: i64,
        received_response_millis: i64,
    ) -> Result<()>;

    /// Invalidates an entry. I/O errors are swallowed by the interceptor,
    /// not by this method — implementations should still return them so
    /// tests can observe failures directly.
    async fn remove(&self, cache_key: &str) -> Result<()>;

    /// Telemetry hook: called once per request with the computed
    /// strategy. Must not raise; implementations that want metrics should
    /// catch their own errors internally.
    async fn track_response(&self, _strategy: &Strategy) {}

    /// Telemetry hook: called exactly once, right before a validated 304
    /// is merged into the stored entry.
    async fn track_conditional_cache_hit(&self) {}
}

/// Computes the cache key for `request`. Kept outside [`CacheManager`]
/// itself (key derivation is the caller's concern, not the store's, per
/// the decision core's external-interfaces boundary) but colocated here
/// since every [`CacheManager`] impl needs one.
pub fn default_cache_key(request: &Request) -> String {
    format!("{}:{}", request.method, request.uri)
}

/// Computes the key an unsafe method should invalidate: the entry for a
/// `GET` on the same URI, not the literal `PUT`/`POST`/etc key (which, per
/// `default_cache_key`, would never collide with any stored entry at all).
/// Busts the cache for the resource, matching the invalidating request's
/// own URI rather than its method+body.
pub fn invalidation_cache_key(request: &Request) -> String {
    format!("{}:{}", http::Method::GET, request.uri)
}
