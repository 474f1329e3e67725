//! `StrategyFactory`: the pure (now, request, stored response) → `Strategy`
//! decision function, including age/freshness arithmetic and conditional
//! request synthesis.

use http::header::{
    HeaderMap, HeaderValue, ETAG, EXPIRES, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED, WARNING,
};
use http::{Method, StatusCode, Uri};

use crate::headers::CacheControl;

const MILLIS_PER_SECOND: i64 = 1000;
const ONE_DAY_MILLIS: i64 = 86_400_000;

/// A minimal, immutable snapshot of an outgoing request — the parts the
/// decision core actually consults. Built atop `http` crate primitives
/// rather than a bespoke request type.
#[derive(Debug, Clone)]
pub struct Request {
    /// The request method.
    pub method: Method,
    /// The request URI.
    pub uri: Uri,
    /// The request headers, including any `Cache-Control` directives.
    pub headers: HeaderMap,
    /// Whether this request is over HTTPS; governs the TLS-handshake check
    /// in step (b) of the decision cascade.
    pub is_https: bool,
}

impl Request {
    /// Parses this request's `Cache-Control` directives.
    pub fn cache_control(&self) -> CacheControl {
        CacheControl::parse(&self.headers)
    }

    fn has_conditional_headers(&self) -> bool {
        self.headers.contains_key(IF_MODIFIED_SINCE)
            || self.headers.contains_key(IF_NONE_MATCH)
    }

    fn has_query(&self) -> bool {
        self.uri.query().is_some()
    }
}

/// A previously-stored response, as read back from the store. Carries
/// enough of the original exchange (its request, and the client's own
/// clock readings at the time) to recompute age and freshness.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    /// The stored response's status code.
    pub status: StatusCode,
    /// The stored response's headers, including its `Cache-Control`
    /// directives and date/validator fields.
    pub headers: HeaderMap,
    /// Present iff the original exchange happened over HTTPS with a
    /// completed TLS handshake.
    pub has_tls_handshake: bool,
    /// The request the stored response originally answered.
    pub request: Request,
    /// The client's own clock reading when the original request was sent.
    pub sent_request_millis: i64,
    /// The client's own clock reading when the original response was
    /// received.
    pub received_response_millis: i64,
}

/// Date/validator fields parsed once from a stored response's headers at
/// factory construction. Unparseable or absent values are `None`, never an
/// error — a stored response with garbled headers is simply treated as
/// having no validators.
#[derive(Debug, Clone, Default)]
struct StoredResponseMetadata {
    served_date_millis: Option<i64>,
    served_date_string: Option<String>,
    last_modified_millis: Option<i64>,
    last_modified_string: Option<String>,
    expires_millis: Option<i64>,
    etag: Option<String>,
    age_seconds: Option<i64>,
}

impl StoredResponseMetadata {
    fn parse(headers: &HeaderMap) -> Self {
        Self {
            served_date_millis: parse_http_date_millis(headers, http::header::DATE),
            served_date_string: header_str(headers, http::header::DATE),
            last_modified_millis: parse_http_date_millis(headers, LAST_MODIFIED),
            last_modified_string: header_str(headers, LAST_MODIFIED),
            expires_millis: parse_http_date_millis(headers, EXPIRES),
            etag: header_str(headers, ETAG),
            age_seconds: header_str(headers, http::header::AGE)
                .and_then(|s| s.parse::<i64>().ok())
                .filter(|n| *n >= 0),
        }
    }
}

fn header_str(headers: &HeaderMap, name: http::header::HeaderName) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_owned)
}

fn parse_http_date_millis(
    headers: &HeaderMap,
    name: http::header::HeaderName,
) -> Option<i64> {
    let raw = headers.get(name)?.to_str().ok()?;
    let when = httpdate::parse_http_date(raw).ok()?;
    when.duration_since(std::time::UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_millis()).ok())
}

/// The outcome of `StrategyFactory::compute`, following the tagged-union
/// shape the base decision model recommends over a nullable pair.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Fetch from network; no usable cache entry.
    Network(Request),
    /// Serve the stored response directly; no network call.
    Cache(StoredResponse),
    /// Issue a conditional network request; a 304 result should be merged
    /// with the carried stored response, otherwise the network response
    /// replaces it.
    Conditional { network: Request, cache: StoredResponse },
    /// Caller forbade network use (`only-if-cached`) and no usable cache
    /// entry exists.
    Fail,
}

/// Returns true iff `response` (given the originating `request`) is
/// eligible to be written to, or served from, the cache. `s-maxage` is
/// never consulted — this is a private cache.
pub fn is_cacheable(
    status: StatusCode,
    response_headers: &HeaderMap,
    request_cache_control: &CacheControl,
) -> bool {
    let response_cc = CacheControl::parse(response_headers);
    if request_cache_control.no_store || response_cc.no_store {
        return false;
    }
    match status.as_u16() {
        200 | 203 | 204 | 300 | 301 | 404 | 405 | 410 | 414 | 501 | 308 => true,
        302 | 307 => {
            response_headers.contains_key(EXPIRES)
                || response_cc.max_age_seconds.is_some()
                || response_cc.is_public
                || response_cc.is_private
        }
        _ => false,
    }
}

/// Computes a `Strategy` for `now` given `request` and an optional
/// previously-stored response. Pure, no I/O.
pub fn compute(
    now_millis: i64,
    request: &Request,
    stored: Option<&StoredResponse>,
) -> Strategy {
    let request_cc = request.cache_control();
    let candidate = inner_candidate(now_millis, request, &request_cc, stored);

    if request_cc.only_if_cached {
        if let Strategy::Network(_) | Strategy::Conditional { .. } = candidate {
            return Strategy::Fail;
        }
    }
    candidate
}

fn inner_candidate(
    now_millis: i64,
    request: &Request,
    request_cc: &CacheControl,
    stored: Option<&StoredResponse>,
) -> Strategy {
    // a. No stored response.
    let Some(stored) = stored else {
        return Strategy::Network(request.clone());
    };

    // b. HTTPS request but stored response lacks a TLS handshake record.
    if request.is_https && !stored.has_tls_handshake {
        return Strategy::Network(request.clone());
    }

    // c. Stored response fails isCacheable.
    if !is_cacheable(stored.status, &stored.headers, request_cc) {
        return Strategy::Network(request.clone());
    }

    // d. Request has no-cache, or already carries a conditional header.
    if request_cc.no_cache || request.has_conditional_headers() {
        return Strategy::Network(request.clone());
    }

    let meta = StoredResponseMetadata::parse(&stored.headers);
    let response_cc = CacheControl::parse(&stored.headers);

    // e. Stored response is immutable: skip freshness math entirely.
    if response_cc.immutable {
        return Strategy::Cache(stored.clone());
    }

    // f. Freshness evaluation.
    let age_millis = age(now_millis, stored, &meta);
    let mut fresh_millis = freshness_lifetime(stored, &meta);
    if let Some(max_age) = request_cc.max_age_seconds {
        fresh_millis = fresh_millis.min(max_age.saturating_mul(MILLIS_PER_SECOND));
    }
    let min_fresh_millis = request_cc
        .min_fresh_seconds
        .unwrap_or(0)
        .saturating_mul(MILLIS_PER_SECOND);
    let max_stale_millis = if response_cc.must_revalidate {
        0
    } else {
        request_cc
            .max_stale_seconds
            .map(|s| s.saturating_mul(MILLIS_PER_SECOND))
            .unwrap_or(0)
    };

    if !response_cc.no_cache
        && age_millis.saturating_add(min_fresh_millis)
            < fresh_millis.saturating_add(max_stale_millis)
    {
        let mut served = stored.clone();
        if age_millis.saturating_add(min_fresh_millis) >= fresh_millis {
            add_warning(&mut served.headers, 110, "Response is stale");
        }
        if age_millis > ONE_DAY_MILLIS && is_heuristic(stored) {
            add_warning(&mut served.headers, 113, "Heuristic expiration");
        }
        return Strategy::Cache(served);
    }

    // g. Synthesize a conditional request.
    let mut network = request.clone();
    if let Some(etag) = &meta.etag {
        network
            .headers
            .insert(IF_NONE_MATCH, HeaderValue::from_str(etag).unwrap_or_else(|_| {
                HeaderValue::from_static("")
            }));
    } else if let Some(lm) = &meta.last_modified_string {
        insert_if_modified_since(&mut network.headers, lm);
    } else if let Some(sd) = &meta.served_date_string {
        insert_if_modified_since(&mut network.headers, sd);
    } else {
        return Strategy::Network(request.clone());
    }

    Strategy::Conditional { network, cache: stored.clone() }
}

fn insert_if_modified_since(headers: &mut HeaderMap, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(IF_MODIFIED_SINCE, v);
    }
}

pub(crate) fn add_warning(headers: &mut HeaderMap, code: u16, text: &str) {
    if let Ok(v) =
        HeaderValue::from_str(&format!("{code} HttpURLConnection \"{text}\""))
    {
        headers.append(WARNING, v);
    }
}

/// RFC 7234 §4.2.3 age calculation.
fn age(now_millis: i64, stored: &StoredResponse, meta: &StoredResponseMetadata) -> i64 {
    let apparent_received_age = match meta.served_date_millis {
        Some(served) => (stored.received_response_millis - served).max(0),
        None => 0,
    };
    let received_age = match meta.age_seconds {
        Some(age_seconds) => {
            apparent_received_age.max(age_seconds.saturating_mul(MILLIS_PER_SECOND))
        }
        None => apparent_received_age,
    };
    let response_duration =
        stored.received_response_millis - stored.sent_request_millis;
    let resident_duration = now_millis - stored.received_response_millis;
    received_age
        .saturating_add(response_duration)
        .saturating_add(resident_duration)
}

/// Freshness lifetime in milliseconds, per RFC 7234 §4.2.1.
fn freshness_lifetime(
    stored: &StoredResponse,
    meta: &StoredResponseMetadata,
) -> i64 {
    let response_cc = CacheControl::parse(&stored.headers);
    if let Some(max_age) = response_cc.max_age_seconds {
        return max_age.saturating_mul(MILLIS_PER_SECOND);
    }
    if let Some(expires) = meta.expires_millis {
        let served_millis =
            meta.served_date_millis.unwrap_or(stored.received_response_millis);
        return (expires - served_millis).max(0);
    }
    if let (Some(last_modified), false) =
        (meta.last_modified_millis, stored.request.has_query())
    {
        let served_millis =
            meta.served_date_millis.unwrap_or(stored.sent_request_millis);
        let delta = served_millis - last_modified;
        return (delta / 10).max(0);
    }
    0
}

/// Freshness is heuristic iff the response had neither `max-age` nor
/// `Expires`.
fn is_heuristic(stored: &StoredResponse) -> bool {
    let response_cc = CacheControl::parse(&stored.headers);
    response_cc.max_age_seconds.is_none() && !stored.headers.contains_key(EXPIRES)
}
