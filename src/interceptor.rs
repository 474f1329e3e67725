//! `CacheInterceptor`: the control flow that consumes a computed
//! [`Strategy`], drives the network, merges conditional hits, writes new
//! responses to the store, and tees response bodies into the cache.

use std::convert::Infallible;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode, Version};
use http_body_util::{BodyExt, Empty, Full};

use crate::body::{CacheWriter, CacheWritingBody};
use crate::clock::{Clock, SystemClock};
use crate::error::CacheError;
use crate::headers;
use crate::policy::{self, Request, Strategy, StoredResponse};
use crate::store::{default_cache_key, invalidation_cache_key, CacheManager, StoredEntry};

/// Boxed body type used at the interceptor boundary, so a cache hit
/// (`Full<Bytes>`), a synthetic 504 (`Empty<Bytes>`), and a network
/// passthrough tee (`CacheWritingBody<B>`) can all be returned as the same
/// `http::Response<BoxBody>`.
pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, CacheError>;

fn full_body(bytes: Bytes) -> BoxBody {
    Full::new(bytes).map_err(|never: Infallible| match never {}).boxed()
}

fn empty_body() -> BoxBody {
    Empty::new().map_err(|never: Infallible| match never {}).boxed()
}

/// The exact reason phrase of the synthetic 504, carried as a response
/// extension since `http::Response` has no slot for a non-canonical reason
/// phrase — the HTTP/1.1 codec that eventually writes the status line can
/// read it from here.
#[derive(Debug, Clone, Copy)]
pub struct ReasonPhrase(
    /// The reason phrase text, e.g. `"Unsatisfiable Request (only-if-cached)"`.
    pub &'static str,
);

const UNSATISFIABLE_REASON: &str = "Unsatisfiable Request (only-if-cached)";

/// A body-stripped descriptor of one side of an exchange — the §4.2.3
/// `strip()` helper's output. Carries just enough (status, headers) for
/// cache-introspection code to inspect what the cache or network side of a
/// request actually returned, without holding a second live body.
#[derive(Debug, Clone)]
pub struct StrippedResponse {
    /// The stripped response's status code.
    pub status: StatusCode,
    /// The stripped response's headers.
    pub headers: http::HeaderMap,
}

/// `strip(response)`: a lightweight, bodyless copy of `status`/`headers`.
fn strip(status: StatusCode, headers: &http::HeaderMap) -> StrippedResponse {
    StrippedResponse { status, headers: headers.clone() }
}

/// The nested `cacheResponse`/`networkResponse` metadata steps 7, 9 and 10
/// of the base algorithm attach to every response this interceptor
/// returns: a stripped copy of whichever side(s) of the exchange produced
/// it. A pure cache hit carries only `cache_response`; a fresh network
/// response (first fetch or failed revalidation) carries `network_response`
/// and, if a prior stored entry existed, `cache_response` too; a validated
/// 304 carries both, stripped of the one actually returned to the caller.
#[derive(Debug, Clone, Default)]
pub struct ResponseOrigin {
    /// A stripped copy of the stored response this exchange consulted, if
    /// any.
    pub cache_response: Option<StrippedResponse>,
    /// A stripped copy of the network response this exchange received, if
    /// the network was contacted.
    pub network_response: Option<StrippedResponse>,
}

/// The result of the caller's network call: the response plus the two
/// clock readings the decision core needs for age/freshness accounting on
/// whatever gets written back to the store.
pub struct NetworkResponse {
    /// The response the network call produced.
    pub response: http::Response<BoxBody>,
    /// The caller's clock reading when the request was sent.
    pub sent_request_millis: i64,
    /// The caller's clock reading when the response was received.
    pub received_response_millis: i64,
}

/// The underlying request executor. Analogous to an interceptor chain:
/// the interceptor calls `proceed` at most once per request (twice only
/// in the sense that a conditional request IS the one network call).
#[async_trait]
pub trait Chain: Send + Sync {
    async fn proceed(
        &self,
        request: &Request,
    ) -> Result<NetworkResponse, Box<dyn std::error::Error + Send + Sync>>;
}

/// Returns whether a response with `status` to a request with `method`
/// carries a body per ordinary HTTP rules (HEAD and certain statuses never
/// do, regardless of what the cache-writing path would otherwise do).
fn response_has_body(status: StatusCode, method: &Method) -> bool {
    if method == Method::HEAD {
        return false;
    }
    !matches!(status.as_u16(), 100..=199 | 204 | 304)
}

const INVALIDATING_METHODS: &[Method] =
    &[Method::PUT, Method::PATCH, Method::POST, Method::DELETE];
const INVALIDATING_METHOD_NAME_MOVE: &str = "MOVE";

fn is_invalidating_method(method: &Method) -> bool {
    INVALIDATING_METHODS.contains(method)
        || method.as_str().eq_ignore_ascii_case(INVALIDATING_METHOD_NAME_MOVE)
}

/// Wraps a [`CacheManager`] and drives the 12-step algorithm against a
/// caller-supplied [`Chain`].
pub struct CacheInterceptor<M, C = SystemClock> {
    manager: M,
    clock: C,
}

impl<M: CacheManager> CacheInterceptor<M, SystemClock> {
    /// Wraps `manager`, using the real system clock for `nowMillis`.
    pub fn new(manager: M) -> Self {
        Self { manager, clock: SystemClock }
    }
}

impl<M: CacheManager, C: Clock> CacheInterceptor<M, C> {
    /// Wraps `manager`, injecting `clock` as the source of `nowMillis` —
    /// tests substitute a [`crate::clock::FixedClock`] here.
    pub fn with_clock(manager: M, clock: C) -> Self {
        Self { manager, clock }
    }

    fn stored_response_from_entry(
        entry: &StoredEntry,
        request: &Request,
    ) -> StoredResponse {
        StoredResponse {
            status: StatusCode::from_u16(entry.status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: entry.headers.clone(),
            has_tls_handshake: entry.has_tls_handshake,
            request: request.clone(),
            sent_request_millis: entry.sent_request_millis,
            received_response_millis: entry.received_response_millis,
        }
    }

    fn unsatisfiable_response(&self, now_millis: i64) -> http::Response<BoxBody> {
        let mut response = http::Response::builder()
            .status(StatusCode::GATEWAY_TIMEOUT)
            .version(Version::HTTP_11)
            .body(empty_body())
            .expect("synthetic 504 is always well-formed");
        response.extensions_mut().insert(ReasonPhrase(UNSATISFIABLE_REASON));
        response.extensions_mut().insert(SentReceived {
            sent_request_millis: -1,
            received_response_millis: now_millis,
        });
        response
    }

    /// Runs the 12-step algorithm for `request` against `chain`.
    pub async fn fetch(
        &self,
        request: Request,
        chain: &dyn Chain,
    ) -> Result<http::Response<BoxBody>, CacheError> {
        let cache_key = default_cache_key(&request);

        // Step 1: best-effort lookup.
        let candidate = self.manager.get(&cache_key).await;
        let stored = candidate
            .as_ref()
            .map(|entry| Self::stored_response_from_entry(entry, &request));

        // Step 2: wall-clock reading, injected everywhere else below.
        let now_millis = self.clock.now_millis();

        // Step 3.
        let strategy = policy::compute(now_millis, &request, stored.as_ref());

        // Step 4: telemetry hook, must not raise.
        self.manager.track_response(&strategy).await;

        // Step 5: a candidate was read but the strategy doesn't carry it
        // forward. Our `CacheManager::get` returns owned bytes rather than
        // a live stream handle, so there is no resource to release here —
        // this is purely a log point preserved for parity with the
        // algorithm's intent.
        if stored.is_some() && !matches!(strategy, Strategy::Cache(_) | Strategy::Conditional { .. })
        {
            log::trace!("discarding unused cached candidate for key {cache_key}");
        }

        match strategy {
            // Step 6: only-if-cached with nothing servable.
            Strategy::Fail => {
                log::debug!("only-if-cached miss for key {cache_key}, returning synthetic 504");
                Ok(self.unsatisfiable_response(now_millis))
            }

            // Step 7: pure cache hit, no network.
            Strategy::Cache(cache) => {
                log::debug!("serving fresh/stale-acceptable cached response for key {cache_key}");
                let origin = strip(cache.status, &cache.headers);
                let body = candidate.expect("Strategy::Cache implies a candidate").body;
                let mut response = http::Response::builder()
                    .status(cache.status)
                    .version(Version::HTTP_11)
                    .body(full_body(body))?;
                *response.headers_mut() = cache.headers;
                response.extensions_mut().insert(SentReceived {
                    sent_request_millis: cache.sent_request_millis,
                    received_response_millis: cache.received_response_millis,
                });
                response.extensions_mut().insert(ResponseOrigin {
                    cache_response: Some(origin),
                    network_response: None,
                });
                Ok(response)
            }

            // Step 8/9: network request, possibly conditional.
            Strategy::Network(network_request) => {
                let network = chain
                    .proceed(&network_request)
                    .await
                    .map_err(CacheError::Network)?;
                self.handle_fresh_network_response(
                    &cache_key,
                    &network_request,
                    network,
                    None,
                )
                .await
            }

            Strategy::Conditional { network, cache } => {
                match chain.proceed(&network).await {
                    Ok(result) if result.response.status() == StatusCode::NOT_MODIFIED => {
                        log::debug!("conditional request for key {cache_key} revalidated, merging headers");
                        self.manager.track_conditional_cache_hit().await;

                        let cache_origin = strip(cache.status, &cache.headers);
                        let network_origin =
                            strip(result.response.status(), result.response.headers());
                        let combined = headers::combine(&cache.headers, result.response.headers());
                        let body = candidate.expect("Strategy::Conditional implies a candidate").body;

                        if let Err(err) = self
                            .manager
                            .update(
                                &cache_key,
                                &combined,
                                result.sent_request_millis,
                                result.received_response_millis,
                            )
                            .await
                        {
                            log::warn!("store update after 304 failed for key {cache_key}: {err}");
                        }

                        let mut response = http::Response::builder()
                            .status(cache.status)
                            .version(Version::HTTP_11)
                            .body(full_body(body))?;
                        *response.headers_mut() = combined;
                        response.extensions_mut().insert(SentReceived {
                            sent_request_millis: result.sent_request_millis,
                            received_response_millis: result.received_response_millis,
                        });
                        response.extensions_mut().insert(ResponseOrigin {
                            cache_response: Some(cache_origin),
                            network_response: Some(network_origin),
                        });
                        Ok(response)
                    }
                    Ok(result) => {
                        log::debug!("revalidation did not confirm for key {cache_key}, replacing entry");
                        let prior_cache = strip(cache.status, &cache.headers);
                        self.handle_fresh_network_response(
                            &cache_key,
                            &network,
                            result,
                            Some(prior_cache),
                        )
                        .await
                    }
                    Err(err) => {
                        // Revalidation's own network call failed outright (not merely a
                        // non-304 status). `must-revalidate` on the stored response forbids
                        // serving it stale in this situation, so the error propagates;
                        // otherwise fall back to the stale cached response with a 111.
                        let response_cc = headers::CacheControl::parse(&cache.headers);
                        if response_cc.must_revalidate {
                            return Err(CacheError::Network(err));
                        }
                        log::warn!("revalidation network error for key {cache_key}, serving stale (swallowed): {err}");
                        let body = candidate.expect("Strategy::Conditional implies a candidate").body;
                        let mut served_headers = cache.headers.clone();
                        policy::add_warning(&mut served_headers, 111, "Revalidation failed");
                        let origin = strip(cache.status, &served_headers);
                        let mut response = http::Response::builder()
                            .status(cache.status)
                            .version(Version::HTTP_11)
                            .body(full_body(body))?;
                        *response.headers_mut() = served_headers;
                        response.extensions_mut().insert(ResponseOrigin {
                            cache_response: Some(origin),
                            network_response: None,
                        });
                        response.extensions_mut().insert(SentReceived {
                            sent_request_millis: cache.sent_request_millis,
                            received_response_millis: cache.received_response_millis,
                        });
                        Ok(response)
                    }
                }
            }
        }
    }

    /// Steps 10-13: a genuinely fresh (non-304) network response, either
    /// from an unconditional fetch or a failed revalidation. Stores it if
    /// cacheable, tees the body while doing so, and invalidates the entry
    /// on unsafe methods that weren't cacheable. `prior_cache` is the
    /// stripped prior stored response, if the strategy carried one (i.e.
    /// this is a failed revalidation, not a first fetch) — step 10's
    /// `cacheResponse` metadata.
    async fn handle_fresh_network_response(
        &self,
        cache_key: &str,
        network_request: &Request,
        network: NetworkResponse,
        prior_cache: Option<StrippedResponse>,
    ) -> Result<http::Response<BoxBody>, CacheError> {
        let (mut parts, body) = network.response.into_parts();
        let request_cc = network_request.cache_control();

        parts.extensions.insert(SentReceived {
            sent_request_millis: network.sent_request_millis,
            received_response_millis: network.received_response_millis,
        });
        parts.extensions.insert(ResponseOrigin {
            cache_response: prior_cache,
            network_response: Some(strip(parts.status, &parts.headers)),
        });

        if policy::is_cacheable(parts.status, &parts.headers, &request_cc)
            && response_has_body(parts.status, &network_request.method)
        {
            let writer = self
                .manager
                .put(
                    cache_key,
                    parts.status.as_u16(),
                    &parts.headers,
                    network_request.is_https,
                    network.sent_request_millis,
                    network.received_response_millis,
                )
                .await;

            let body: BoxBody = match writer {
                Some(writer) => {
                    CacheWritingBody::new(body, writer as Box<dyn CacheWriter>).boxed()
                }
                None => CacheWritingBody::passthrough(body).boxed(),
            };
            return Ok(http::Response::from_parts(parts, body));
        }

        if is_invalidating_method(&network_request.method) {
            let invalidated_key = invalidation_cache_key(network_request);
            if let Err(err) = self.manager.remove(&invalidated_key).await {
                log::warn!("invalidation remove failed for key {invalidated_key} (swallowed): {err}");
            }
        }

        Ok(http::Response::from_parts(parts, body))
    }
}

/// The two clock readings every returned response carries, mirroring the
/// base data model's `sentRequestAtMillis`/`receivedResponseAtMillis`
/// fields. Exposed as an extension for the same reason as [`ReasonPhrase`].
#[derive(Debug, Clone, Copy)]
pub struct SentReceived {
    /// The clock reading when the underlying request (network or original
    /// stored exchange) was sent. `-1` for the synthetic 504.
    pub sent_request_millis: i64,
    /// The clock reading when the underlying response was received.
    pub received_response_millis: i64,
}
