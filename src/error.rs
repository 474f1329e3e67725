//! Error types for the cache decision core.

use miette::Diagnostic;
use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can surface from the cache decision core.
///
/// Per the error handling model, most failures on the decision path itself
/// (parsing stored headers, store I/O on `get`/`remove`) are swallowed at
/// their call site and never reach the caller as a `CacheError` — this enum
/// covers the paths that legitimately propagate: network errors forwarded
/// from the caller's `proceed` closure, body read/write errors, and store
/// corruption surfaced by an explicit `put`.
#[derive(Error, Diagnostic, Debug)]
pub enum CacheError {
    /// Error building or parsing an `http` request/response.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::http))]
    Http(#[from] http::Error),
    /// Error converting a header value to a string.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::header_to_str))]
    HeaderToStr(#[from] http::header::ToStrError),
    /// Error parsing an HTTP header value.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::invalid_header_value))]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    /// Error parsing an HTTP header name.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::invalid_header_name))]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    /// Error from the disk-backed store.
    #[cfg(feature = "manager-cacache")]
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::cacache))]
    CaCache(#[from] cacache::Error),
    /// Error (de)serializing stored metadata.
    #[cfg(any(feature = "manager-cacache", feature = "manager-moka"))]
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::postcard))]
    Postcard(#[from] postcard::Error),
    /// The caller's network closure returned an error.
    #[error("network request failed: {0}")]
    #[diagnostic(code(http_cache_core::network))]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The response or cache-writing body could not be read to completion.
    #[error("body read failed: {0}")]
    #[diagnostic(code(http_cache_core::body))]
    Body(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A stored or parsed HTTP version could not be understood.
    #[error("unknown HTTP version")]
    #[diagnostic(code(http_cache_core::bad_version))]
    BadVersion,
    /// A header value did not parse as expected for the field it occupied.
    #[error("error parsing header value")]
    #[diagnostic(code(http_cache_core::bad_header))]
    BadHeader,
}
