//! End-to-end coverage of the seven reference scenarios, driven through the
//! public crate API (`MokaManager` + a fixture `Chain`) rather than the
//! internal unit tests in `src/policy.rs`/`src/interceptor.rs`.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, ETAG, LAST_MODIFIED, WARNING};
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use http_body_util::{BodyExt, Empty, Full};
use http_cache_core::clock::FixedClock;
use http_cache_core::interceptor::{Chain, NetworkResponse};
use http_cache_core::managers::moka::MokaManager;
use http_cache_core::policy::Request;
use http_cache_core::{CacheInterceptor, CacheManager};

fn request(uri: &str) -> Request {
    Request {
        method: Method::GET,
        uri: uri.parse::<Uri>().unwrap(),
        headers: HeaderMap::new(),
        is_https: false,
    }
}

fn boxed_empty() -> http_body_util::combinators::BoxBody<Bytes, http_cache_core::CacheError> {
    Empty::new()
        .map_err(|never: std::convert::Infallible| match never {})
        .boxed()
}

fn boxed_full(
    bytes: Bytes,
) -> http_body_util::combinators::BoxBody<Bytes, http_cache_core::CacheError> {
    Full::new(bytes)
        .map_err(|never: std::convert::Infallible| match never {})
        .boxed()
}

fn http_date(now: std::time::SystemTime, offset_secs: i64) -> String {
    let when = if offset_secs >= 0 {
        now + std::time::Duration::from_secs(offset_secs as u64)
    } else {
        now - std::time::Duration::from_secs((-offset_secs) as u64)
    };
    httpdate::fmt_http_date(when)
}

/// Populates `manager` directly with a stored entry, bypassing `put`, so
/// each scenario starts from a known prior exchange.
async fn seed(manager: &MokaManager, uri: &str, status: u16, headers: HeaderMap, sent: i64, received: i64) {
    let mut writer = manager.put(&format!("GET:{uri}"), status, &headers, false, sent, received).await.unwrap();
    writer.write(Bytes::from_static(b"stored body")).await.unwrap();
    writer.commit().await.unwrap();
}

struct RecordingChain<F> {
    calls: AtomicUsize,
    respond: F,
}

#[async_trait]
impl<F> Chain for RecordingChain<F>
where
    F: Fn(&Request) -> NetworkResponse + Send + Sync,
{
    async fn proceed(
        &self,
        request: &Request,
    ) -> Result<NetworkResponse, Box<dyn std::error::Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.respond)(request))
    }
}

#[tokio::test]
async fn scenario_1_fresh_hit_serves_without_network() {
    let now = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
    let now_millis = now.duration_since(std::time::UNIX_EPOCH).unwrap().as_millis() as i64;

    let manager = MokaManager::default();
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=600"));
    headers.insert(http::header::DATE, HeaderValue::from_str(&http_date(now, -60)).unwrap());
    seed(&manager, "http://example.com/a", 200, headers, now_millis - 60_100, now_millis - 60_000).await;

    let interceptor = CacheInterceptor::with_clock(manager, FixedClock(now_millis));
    let chain = RecordingChain {
        calls: AtomicUsize::new(0),
        respond: |_req: &Request| panic!("network must not be contacted for a fresh hit"),
    };

    let response =
        interceptor.fetch(request("http://example.com/a"), &chain).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key(WARNING));
    assert_eq!(chain.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_2_conditional_revalidation_304_merges_and_updates() {
    let now = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
    let now_millis = now.duration_since(std::time::UNIX_EPOCH).unwrap().as_millis() as i64;

    let manager = MokaManager::default();
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
    headers.insert(ETAG, HeaderValue::from_static("\"abc\""));
    headers.insert(http::header::DATE, HeaderValue::from_str(&http_date(now, -3600)).unwrap());
    seed(
        &manager,
        "http://example.com/a",
        200,
        headers,
        now_millis - 3_600_100,
        now_millis - 3_600_000,
    )
    .await;

    let interceptor = CacheInterceptor::with_clock(manager, FixedClock(now_millis));
    let chain = RecordingChain {
        calls: AtomicUsize::new(0),
        respond: |req: &Request| {
            assert_eq!(req.headers.get(http::header::IF_NONE_MATCH).unwrap(), "\"abc\"");
            let mut response = http::Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .body(boxed_empty())
                .unwrap();
            response
                .headers_mut()
                .insert(http::header::DATE, HeaderValue::from_static("now"));
            NetworkResponse { response, sent_request_millis: 1, received_response_millis: 2 }
        },
    };

    let response =
        interceptor.fetch(request("http://example.com/a"), &chain).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(chain.calls.load(Ordering::SeqCst), 1);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from_static(b"stored body"));
}

#[tokio::test]
async fn scenario_3_conditional_revalidation_200_replaces_stored_body() {
    let now = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
    let now_millis = now.duration_since(std::time::UNIX_EPOCH).unwrap().as_millis() as i64;

    let manager = MokaManager::default();
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
    headers.insert(ETAG, HeaderValue::from_static("\"abc\""));
    headers.insert(http::header::DATE, HeaderValue::from_str(&http_date(now, -3600)).unwrap());
    seed(
        &manager,
        "http://example.com/a",
        200,
        headers,
        now_millis - 3_600_100,
        now_millis - 3_600_000,
    )
    .await;
    let manager_handle = manager.clone();

    let interceptor = CacheInterceptor::with_clock(manager, FixedClock(now_millis));
    let chain = RecordingChain {
        calls: AtomicUsize::new(0),
        respond: |_req: &Request| {
            let mut response = http::Response::builder()
                .status(StatusCode::OK)
                .body(boxed_full(Bytes::from_static(b"fresh body")))
                .unwrap();
            response
                .headers_mut()
                .insert(CACHE_CONTROL, HeaderValue::from_static("max-age=600"));
            NetworkResponse { response, sent_request_millis: 10, received_response_millis: 20 }
        },
    };

    let response =
        interceptor.fetch(request("http://example.com/a"), &chain).await.unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from_static(b"fresh body"));

    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let replaced = manager_handle.get("GET:http://example.com/a").await.unwrap();
    assert_eq!(replaced.body, Bytes::from_static(b"fresh body"));
}

#[tokio::test]
async fn scenario_4_heuristic_freshness_with_max_stale_adds_both_warnings() {
    let now = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
    let now_millis = now.duration_since(std::time::UNIX_EPOCH).unwrap().as_millis() as i64;

    let manager = MokaManager::default();
    let mut headers = HeaderMap::new();
    headers.insert(LAST_MODIFIED, HeaderValue::from_str(&http_date(now, -20 * 24 * 3600)).unwrap());
    headers.insert(http::header::DATE, HeaderValue::from_str(&http_date(now, -5 * 24 * 3600)).unwrap());
    seed(
        &manager,
        "http://example.com/a",
        200,
        headers,
        now_millis - 5 * 24 * 3_600 * 1000 - 100,
        now_millis - 5 * 24 * 3_600 * 1000,
    )
    .await;

    let interceptor = CacheInterceptor::with_clock(manager, FixedClock(now_millis));
    let chain = RecordingChain {
        calls: AtomicUsize::new(0),
        respond: |_req: &Request| panic!("a stale-acceptable hit must not contact the network"),
    };

    let mut req = request("http://example.com/a");
    req.headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-stale=86400000"));

    let response = interceptor.fetch(req, &chain).await.unwrap();
    let warnings: Vec<_> = response.headers().get_all(WARNING).iter().collect();
    assert_eq!(warnings.len(), 2);
    assert_eq!(chain.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_5_only_if_cached_miss_returns_synthetic_504() {
    let manager = MokaManager::default();
    let interceptor = CacheInterceptor::with_clock(manager, FixedClock(1_700_000_000_000));
    let chain = RecordingChain {
        calls: AtomicUsize::new(0),
        respond: |_req: &Request| panic!("only-if-cached must not contact the network"),
    };

    let mut req = request("http://example.com/a");
    req.headers.insert(CACHE_CONTROL, HeaderValue::from_static("only-if-cached"));

    let response = interceptor.fetch(req, &chain).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(chain.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_6_post_invalidates_prior_get_entry() {
    let now_millis = 1_700_000_000_000i64;
    let manager = MokaManager::default();
    let headers = HeaderMap::new();
    seed(&manager, "http://example.com/a", 200, headers, now_millis - 200, now_millis - 100).await;
    let manager_handle = manager.clone();

    let interceptor = CacheInterceptor::with_clock(manager, FixedClock(now_millis));
    let chain = RecordingChain {
        calls: AtomicUsize::new(0),
        respond: |_req: &Request| {
            let mut response = http::Response::builder()
                .status(StatusCode::OK)
                .body(boxed_empty())
                .unwrap();
            response
                .headers_mut()
                .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
            NetworkResponse { response, sent_request_millis: 1, received_response_millis: 2 }
        },
    };

    let mut post_request = request("http://example.com/a");
    post_request.method = Method::POST;

    let response = interceptor.fetch(post_request, &chain).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(manager_handle.get("GET:http://example.com/a").await.is_none());
}

#[tokio::test]
async fn scenario_7_https_without_handshake_discards_stored_and_refetches() {
    let now_millis = 1_700_000_000_000i64;
    let manager = MokaManager::default();
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=600"));
    seed(&manager, "https://example.com/a", 200, headers, now_millis - 200, now_millis - 100).await;

    let interceptor = CacheInterceptor::with_clock(manager, FixedClock(now_millis));
    let chain = RecordingChain {
        calls: AtomicUsize::new(0),
        respond: |_req: &Request| {
            let response = http::Response::builder()
                .status(StatusCode::OK)
                .body(boxed_full(Bytes::from_static(b"refetched")))
                .unwrap();
            NetworkResponse { response, sent_request_millis: 1, received_response_millis: 2 }
        },
    };

    let mut req = request("https://example.com/a");
    req.is_https = true;

    let response = interceptor.fetch(req, &chain).await.unwrap();
    assert_eq!(chain.calls.load(Ordering::SeqCst), 1);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from_static(b"refetched"));
}
