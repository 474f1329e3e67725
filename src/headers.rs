//! `Cache-Control` parsing and the RFC 7234 §4.3.4 header-combine algorithm.

use http::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, WARNING};

/// The eight headers RFC 2616 §13.5.1 designates as hop-by-hop. These never
/// flow end-to-end and are always preserved from the cached side.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Headers whose value is tied to the specific representation of the body
/// rather than to the resource, so they are always taken from the cached
/// side even when the network response redefines them.
const CONTENT_SPECIFIC: &[&str] =
    &["content-length", "content-encoding", "content-type"];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|h| name.as_str().eq_ignore_ascii_case(h))
}

fn is_content_specific(name: &HeaderName) -> bool {
    CONTENT_SPECIFIC.iter().any(|h| name.as_str().eq_ignore_ascii_case(h))
}

fn is_end_to_end(name: &HeaderName) -> bool {
    !is_hop_by_hop(name)
}

/// Parsed `Cache-Control` directives, from either a request or a response.
///
/// Absent numeric directives are `None`, not a sentinel value — this is an
/// internal representation choice, not a wire format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// `no-cache`: a stored response may not be served without revalidation.
    pub no_cache: bool,
    /// `no-store`: the message must not be stored by any cache.
    pub no_store: bool,
    /// `max-age=N`, in seconds.
    pub max_age_seconds: Option<i64>,
    /// `s-maxage=N`, in seconds. Parsed but never consulted — this is a
    /// private cache.
    pub s_maxage_seconds: Option<i64>,
    /// `private`.
    pub is_private: bool,
    /// `public`.
    pub is_public: bool,
    /// `must-revalidate`: suppresses `max-stale` and forbids serving a
    /// stale entry after a failed revalidation.
    pub must_revalidate: bool,
    /// `max-stale` or `max-stale=N`, in seconds. A bare `max-stale` is
    /// represented as `Some(i64::MAX)`.
    pub max_stale_seconds: Option<i64>,
    /// `min-fresh=N`, in seconds.
    pub min_fresh_seconds: Option<i64>,
    /// `only-if-cached`: never issue a network request for this exchange.
    pub only_if_cached: bool,
    /// `immutable`: skip freshness math entirely and serve the stored
    /// response directly.
    pub immutable: bool,
}

impl CacheControl {
    /// Parses every `Cache-Control` header value present (the field may
    /// repeat; RFC 7230 treats repeated headers as a single comma-joined
    /// list).
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut out = Self::default();
        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for directive in value.split(',') {
                out.apply_directive(directive.trim());
            }
        }
        out
    }

    fn apply_directive(&mut self, directive: &str) {
        let (name, arg) = match directive.split_once('=') {
            Some((n, v)) => (n.trim(), Some(v.trim().trim_matches('"'))),
            None => (directive.trim(), None),
        };
        match name.to_ascii_lowercase().as_str() {
            "no-cache" => self.no_cache = true,
            "no-store" => self.no_store = true,
            "private" => self.is_private = true,
            "public" => self.is_public = true,
            "must-revalidate" => self.must_revalidate = true,
            "only-if-cached" => self.only_if_cached = true,
            "immutable" => self.immutable = true,
            "max-age" => self.max_age_seconds = parse_seconds(arg),
            "s-maxage" => self.s_maxage_seconds = parse_seconds(arg),
            "max-stale" => {
                // A bare `max-stale` (no argument) means "any staleness is
                // acceptable"; we model that as an unbounded value rather
                // than absent so callers don't confuse it with "not set".
                self.max_stale_seconds =
                    Some(arg.and_then(|a| a.parse().ok()).unwrap_or(i64::MAX));
            }
            "min-fresh" => self.min_fresh_seconds = parse_seconds(arg),
            _ => {}
        }
    }
}

fn parse_seconds(arg: Option<&str>) -> Option<i64> {
    arg.and_then(|a| a.parse::<i64>().ok()).filter(|n| *n >= 0)
}

/// Combines cached and network header sets per RFC 7234 §4.3.4, for merging
/// a validated 304 response onto the stored response it revalidates.
///
/// Cached headers are kept when they are content-specific, hop-by-hop, or
/// not redefined by the network response; a cached `Warning` with a `1xx`
/// code is always dropped. Network headers are kept when they are
/// end-to-end and not content-specific. Result ordering is every kept
/// cached header first (original order), then new network end-to-end
/// headers.
pub fn combine(cached: &HeaderMap, network: &HeaderMap) -> HeaderMap {
    let mut combined = HeaderMap::with_capacity(cached.len() + network.len());

    for (name, value) in cached {
        if name == WARNING && starts_with_1xx(value) {
            continue;
        }
        if is_content_specific(name)
            || is_hop_by_hop(name)
            || !network.contains_key(name)
        {
            combined.append(name.clone(), value.clone());
        }
    }

    for (name, value) in network {
        if is_end_to_end(name) && !is_content_specific(name) {
            combined.append(name.clone(), value.clone());
        }
    }

    combined
}

fn starts_with_1xx(value: &HeaderValue) -> bool {
    value.to_str().ok().and_then(|s| s.trim().chars().next()) == Some('1')
}
