use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use hyper::{HeaderMap, Method, Uri};
use jwt::SignWithKey;
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use fleet_gateway::auth::Claims;
use fleet_gateway::config::{
    AuthConfig, BackendDefinition, BreakerConfig, GatewayConfig, RateLimitConfig, ServerConfig,
};
use fleet_gateway::core::gateway::{Dispatcher, Gateway};
use fleet_gateway::core::request::GatewayRequest;
use fleet_gateway::error::GatewayError;

const SECRET: &str = "integration-test-secret";

/// Mock backend server: counts every call and answers with a fixture body,
/// optionally following a script of status codes (default 200) and an
/// optional per-call delay before answering
struct TestBackend {
    base_url: String,
    hits: Arc<AtomicUsize>,
    script: Arc<Mutex<VecDeque<u16>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    handle: JoinHandle<()>,
}

impl TestBackend {
    async fn start(fixture: Value) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let script: Arc<Mutex<VecDeque<u16>>> = Arc::new(Mutex::new(VecDeque::new()));
        let delay: Arc<Mutex<Option<Duration>>> = Arc::new(Mutex::new(None));

        let hits_ref = hits.clone();
        let script_ref = script.clone();
        let delay_ref = delay.clone();

        let app = axum::Router::new().fallback(move || {
            let hits = hits_ref.clone();
            let script = script_ref.clone();
            let delay = delay_ref.clone();
            let fixture = fixture.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let pause = *delay.lock().unwrap();
                if let Some(pause) = pause {
                    sleep(pause).await;
                }
                let code = script.lock().unwrap().pop_front().unwrap_or(200);
                let status = StatusCode::from_u16(code).unwrap_or(StatusCode::OK);
                (status, Json(fixture)).into_response()
            }
        });

        let server =
            axum::Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(app.into_make_service());
        let addr = server.local_addr();

        let handle = tokio::spawn(async move {
            server.await.unwrap();
        });

        // Give the server time to start
        sleep(Duration::from_millis(50)).await;

        Self {
            base_url: format!("http://{}", addr),
            hits,
            script,
            delay,
            handle,
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Queue status codes for the next calls; unscripted calls answer 200
    fn push_statuses(&self, codes: &[u16]) {
        let mut script = self.script.lock().unwrap();
        script.extend(codes.iter().copied());
    }

    /// Delay every subsequent answer by `pause`; `None` answers at once
    fn set_delay(&self, pause: Option<Duration>) {
        *self.delay.lock().unwrap() = pause;
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn test_config(fleet_url: &str, identity_url: &str) -> GatewayConfig {
    let backends = [
        ("identity", identity_url),
        ("fleet", fleet_url),
        ("ledger", "http://127.0.0.1:1"),
        ("analytics", "http://127.0.0.1:1"),
        ("alerts", "http://127.0.0.1:1"),
    ]
    .iter()
    .map(|(name, url)| BackendDefinition {
        name: name.to_string(),
        base_url: url.to_string(),
    })
    .collect();

    GatewayConfig {
        server: ServerConfig::default(),
        auth: AuthConfig {
            secret: SECRET.to_string(),
            ..AuthConfig::default()
        },
        breaker: BreakerConfig {
            call_timeout_ms: 2_000,
            error_threshold_pct: 50,
            reset_timeout_ms: 60_000,
            volume_threshold: 10,
            window_ms: 60_000,
        },
        rate_limit: RateLimitConfig {
            window_ms: 60_000,
            ceiling: 10_000,
        },
        backends,
    }
}

fn bearer_token() -> String {
    let key: Hmac<Sha256> = Hmac::new_from_slice(SECRET.as_bytes()).unwrap();
    Claims::new("test-user")
        .with_expiration(3600)
        .sign_with_key(&key)
        .unwrap()
}

fn authed_request(method: Method, path_and_query: &str, client_ip: &str) -> GatewayRequest {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Authorization",
        format!("Bearer {}", bearer_token()).parse().unwrap(),
    );
    request_with_headers(method, path_and_query, client_ip, headers)
}

fn request_with_headers(
    method: Method,
    path_and_query: &str,
    client_ip: &str,
    headers: HeaderMap,
) -> GatewayRequest {
    let uri: Uri = path_and_query.parse().unwrap();
    let ip: IpAddr = client_ip.parse().unwrap();
    GatewayRequest::new(method, uri, headers, Bytes::new(), Some(ip))
}

#[tokio::test]
async fn breaker_trips_after_failure_volume_and_short_circuits() {
    let fleet = TestBackend::start(json!([{"_id": "1", "registrationNo": "AB1"}])).await;
    let identity = TestBackend::start(json!({"token": "t"})).await;

    // 6 of the first 10 calls fail: 60% >= the 50% threshold at volume 10
    fleet.push_statuses(&[500, 500, 500, 500, 500, 500]);

    let gateway =
        Dispatcher::with_routes(test_config(&fleet.base_url, &identity.base_url), fleet_gateway::fleet_routes())
            .unwrap();

    for i in 0..10 {
        let response = gateway
            .process_request(authed_request(Method::GET, "/api/trucks", "10.0.1.1"))
            .await
            .unwrap();

        // backend-reported errors pass through with the backend's status
        if i < 6 {
            assert_eq!(response.status.as_u16(), 500);
        } else {
            assert_eq!(response.status.as_u16(), 200);
        }
    }
    assert_eq!(fleet.hits(), 10);

    // the 11th request must short-circuit without a network call
    let err = gateway
        .process_request(authed_request(Method::GET, "/api/trucks", "10.0.1.1"))
        .await
        .unwrap_err();

    match err {
        GatewayError::BackendUnavailable { backend } => assert_eq!(backend, "fleet"),
        other => panic!("expected BackendUnavailable, got {:?}", other),
    }
    assert_eq!(fleet.hits(), 10);
}

#[tokio::test]
async fn open_breaker_recovers_through_probe_after_reset_timeout() {
    let fleet = TestBackend::start(json!([])).await;
    let identity = TestBackend::start(json!({})).await;

    fleet.push_statuses(&[500; 10]);

    let mut config = test_config(&fleet.base_url, &identity.base_url);
    config.breaker.reset_timeout_ms = 300;

    let gateway = Dispatcher::from_config(config).unwrap();

    for _ in 0..10 {
        gateway
            .process_request(authed_request(Method::GET, "/api/trucks", "10.0.2.1"))
            .await
            .unwrap();
    }
    assert_eq!(fleet.hits(), 10);

    // still within the reset timeout: blocked, no backend contact
    let err = gateway
        .process_request(authed_request(Method::GET, "/api/trucks", "10.0.2.1"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BackendUnavailable { .. }));
    assert_eq!(fleet.hits(), 10);

    sleep(Duration::from_millis(400)).await;

    // the probe goes through, succeeds, and the breaker closes again
    let response = gateway
        .process_request(authed_request(Method::GET, "/api/trucks", "10.0.2.1"))
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(fleet.hits(), 11);

    let report = gateway.health().report();
    assert!(report.is_healthy());
}

#[tokio::test]
async fn cancelled_probe_releases_the_permit_and_the_breaker_recovers() {
    let fleet = TestBackend::start(json!([])).await;
    let identity = TestBackend::start(json!({})).await;

    fleet.push_statuses(&[500; 10]);

    let mut config = test_config(&fleet.base_url, &identity.base_url);
    config.breaker.reset_timeout_ms = 200;

    let gateway = Dispatcher::from_config(config).unwrap();

    for _ in 0..10 {
        gateway
            .process_request(authed_request(Method::GET, "/api/trucks", "10.0.11.1"))
            .await
            .unwrap();
    }
    assert_eq!(fleet.hits(), 10);

    sleep(Duration::from_millis(250)).await;

    // the trial call runs against a slow backend and the client goes away
    // mid-flight, dropping the request future before any outcome lands
    fleet.set_delay(Some(Duration::from_secs(1)));
    let trial = gateway.process_request(authed_request(Method::GET, "/api/trucks", "10.0.11.1"));
    assert!(tokio::time::timeout(Duration::from_millis(100), trial)
        .await
        .is_err());
    assert_eq!(fleet.hits(), 11);

    // the permit was released: the breaker is open again rather than stuck
    // half-open with the permit held forever
    let err = gateway
        .process_request(authed_request(Method::GET, "/api/trucks", "10.0.11.1"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BackendUnavailable { .. }));
    assert_eq!(fleet.hits(), 11);

    // and after another reset timeout the next trial goes through
    fleet.set_delay(None);
    sleep(Duration::from_millis(250)).await;

    let response = gateway
        .process_request(authed_request(Method::GET, "/api/trucks", "10.0.11.1"))
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(fleet.hits(), 12);
    assert!(gateway.health().report().is_healthy());
}

/// Backend that answers its headers after `header_delay` and then drips the
/// body one byte every 100ms
async fn start_drip_backend(header_delay: Duration) -> (String, JoinHandle<()>) {
    let app = axum::Router::new().fallback(move || async move {
        sleep(header_delay).await;
        let chunks = futures::stream::unfold(0u32, |n| async move {
            if n >= 50 {
                return None;
            }
            sleep(Duration::from_millis(100)).await;
            Some((Ok::<_, std::io::Error>(Bytes::from_static(b"x")), n + 1))
        });
        axum::body::StreamBody::new(chunks)
    });

    let server =
        axum::Server::bind(&"127.0.0.1:0".parse().unwrap()).serve(app.into_make_service());
    let addr = server.local_addr();
    let handle = tokio::spawn(async move {
        server.await.unwrap();
    });
    sleep(Duration::from_millis(50)).await;

    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn slow_body_is_bounded_by_one_call_timeout() {
    let (drip_url, _drip) = start_drip_backend(Duration::from_millis(250)).await;
    let identity = TestBackend::start(json!({})).await;

    let mut config = test_config(&drip_url, &identity.base_url);
    config.breaker.call_timeout_ms = 400;

    let gateway = Dispatcher::from_config(config).unwrap();

    let started = Instant::now();
    let err = gateway
        .process_request(authed_request(Method::GET, "/api/trucks", "10.0.12.1"))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, GatewayError::BackendTimeout { backend } if backend == "fleet"));
    // headers at 250ms plus a dripped body must not buy a second budget:
    // the call ends at the 400ms deadline, not at 250ms + 400ms
    assert!(
        elapsed < Duration::from_millis(600),
        "call ran for {:?}, past the per-call deadline",
        elapsed
    );
}

#[tokio::test]
async fn legacy_and_current_routes_yield_identical_adapted_bodies() {
    let fleet = TestBackend::start(json!([{"_id": "1", "registrationNo": "AB1"}])).await;
    let identity = TestBackend::start(json!({})).await;

    let gateway =
        Dispatcher::from_config(test_config(&fleet.base_url, &identity.base_url)).unwrap();

    let legacy = gateway
        .process_request(authed_request(
            Method::GET,
            "/api/v1/app/truck/getAllTrucksByUser/123",
            "10.0.3.1",
        ))
        .await
        .unwrap();
    let current = gateway
        .process_request(authed_request(
            Method::GET,
            "/api/trucks/by-user/123",
            "10.0.3.1",
        ))
        .await
        .unwrap();

    assert_eq!(legacy.status, current.status);
    assert_eq!(legacy.body, current.body, "adapted bodies must be byte-identical");

    let parsed: Value = serde_json::from_slice(&legacy.body).unwrap();
    assert_eq!(
        parsed,
        json!({
            "message": "Trucks retrieved successfully",
            "trucks": [{"id": "1", "registrationNo": "AB1"}]
        })
    );
}

#[tokio::test]
async fn rate_limiter_rejects_over_ceiling_and_recovers_after_window() {
    let fleet = TestBackend::start(json!([])).await;
    let identity = TestBackend::start(json!({})).await;

    let mut config = test_config(&fleet.base_url, &identity.base_url);
    config.rate_limit = RateLimitConfig {
        window_ms: 300,
        ceiling: 3,
    };

    let gateway = Dispatcher::from_config(config).unwrap();

    for _ in 0..3 {
        gateway
            .process_request(authed_request(Method::GET, "/api/trucks", "10.0.4.1"))
            .await
            .unwrap();
    }

    // the 4th request within the window is rejected before any backend call
    let hits_before = fleet.hits();
    let err = gateway
        .process_request(authed_request(Method::GET, "/api/trucks", "10.0.4.1"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::RateLimited));
    assert_eq!(fleet.hits(), hits_before);

    // a different address is unaffected
    gateway
        .process_request(authed_request(Method::GET, "/api/trucks", "10.0.4.2"))
        .await
        .unwrap();

    // after the window boundary the original address is admitted again
    sleep(Duration::from_millis(350)).await;
    gateway
        .process_request(authed_request(Method::GET, "/api/trucks", "10.0.4.1"))
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_requests_never_exceed_the_ceiling() {
    let fleet = TestBackend::start(json!([])).await;
    let identity = TestBackend::start(json!({})).await;

    let mut config = test_config(&fleet.base_url, &identity.base_url);
    config.rate_limit = RateLimitConfig {
        window_ms: 60_000,
        ceiling: 10,
    };

    let gateway = Dispatcher::from_config(config).unwrap();

    let calls = (0..20).map(|_| {
        let gateway = gateway.clone();
        async move {
            gateway
                .process_request(authed_request(Method::GET, "/api/trucks", "10.0.10.1"))
                .await
        }
    });
    let results = futures::future::join_all(calls).await;

    let admitted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(admitted, 10);
    assert_eq!(fleet.hits(), 10);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(GatewayError::RateLimited))));
}

#[tokio::test]
async fn missing_token_is_rejected_before_any_backend_call() {
    let fleet = TestBackend::start(json!([])).await;
    let identity = TestBackend::start(json!({})).await;

    let gateway =
        Dispatcher::from_config(test_config(&fleet.base_url, &identity.base_url)).unwrap();

    let err = gateway
        .process_request(request_with_headers(
            Method::GET,
            "/api/trucks",
            "10.0.5.1",
            HeaderMap::new(),
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Unauthenticated));
    assert_eq!(fleet.hits(), 0);
}

#[tokio::test]
async fn garbage_token_is_rejected_as_invalid() {
    let fleet = TestBackend::start(json!([])).await;
    let identity = TestBackend::start(json!({})).await;

    let gateway =
        Dispatcher::from_config(test_config(&fleet.base_url, &identity.base_url)).unwrap();

    let mut headers = HeaderMap::new();
    headers.insert("Authorization", "Bearer not.a.token".parse().unwrap());

    let err = gateway
        .process_request(request_with_headers(
            Method::GET,
            "/api/trucks",
            "10.0.5.2",
            headers,
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::InvalidToken(_)));
    assert_eq!(fleet.hits(), 0);
}

#[tokio::test]
async fn login_routes_are_public_and_proxied_to_identity() {
    let fleet = TestBackend::start(json!([])).await;
    let identity = TestBackend::start(json!({"token": "issued-by-identity"})).await;

    let gateway =
        Dispatcher::from_config(test_config(&fleet.base_url, &identity.base_url)).unwrap();

    // no Authorization header on either path convention
    for path in ["/api/auth/login", "/api/v1/app/user/login"] {
        let response = gateway
            .process_request(request_with_headers(
                Method::POST,
                path,
                "10.0.6.1",
                HeaderMap::new(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status.as_u16(), 200);
        let parsed: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(parsed["token"], "issued-by-identity");
    }
    assert_eq!(identity.hits(), 2);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let fleet = TestBackend::start(json!([])).await;
    let identity = TestBackend::start(json!({})).await;

    let gateway =
        Dispatcher::from_config(test_config(&fleet.base_url, &identity.base_url)).unwrap();

    let err = gateway
        .process_request(authed_request(Method::GET, "/api/nonsense", "10.0.7.1"))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::RouteNotFound { .. }));
}

#[tokio::test]
async fn unreachable_backend_surfaces_as_unavailable_and_feeds_the_breaker() {
    // ledger points at a port nothing listens on
    let fleet = TestBackend::start(json!([])).await;
    let identity = TestBackend::start(json!({})).await;

    let gateway =
        Dispatcher::from_config(test_config(&fleet.base_url, &identity.base_url)).unwrap();

    let err = gateway
        .process_request(authed_request(Method::GET, "/api/expenses", "10.0.8.1"))
        .await
        .unwrap_err();

    match err {
        GatewayError::BackendUnavailable { backend } | GatewayError::BackendTimeout { backend } => {
            assert_eq!(backend, "ledger")
        }
        other => panic!("expected unavailability, got {:?}", other),
    }

    let report = gateway.health().report();
    let ledger = report.backends.iter().find(|b| b.name == "ledger").unwrap();
    assert_eq!(ledger.failures, 1);
}

#[tokio::test]
async fn health_endpoint_reports_per_backend_breaker_state() {
    let fleet = TestBackend::start(json!([])).await;
    let identity = TestBackend::start(json!({})).await;

    fleet.push_statuses(&[500; 10]);

    let gateway =
        Dispatcher::from_config(test_config(&fleet.base_url, &identity.base_url)).unwrap();

    // health is public and served locally
    let response = gateway
        .process_request(request_with_headers(
            Method::GET,
            "/health",
            "10.0.9.1",
            HeaderMap::new(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 200);

    let parsed: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(parsed["status"], "healthy");

    // trip the fleet breaker, health degrades to 503
    for _ in 0..10 {
        gateway
            .process_request(authed_request(Method::GET, "/api/trucks", "10.0.9.1"))
            .await
            .unwrap();
    }

    let response = gateway
        .process_request(request_with_headers(
            Method::GET,
            "/health",
            "10.0.9.1",
            HeaderMap::new(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status.as_u16(), 503);

    let parsed: Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(parsed["status"], "degraded");
    let backends = parsed["backends"].as_array().unwrap();
    let fleet_entry = backends.iter().find(|b| b["name"] == "fleet").unwrap();
    assert_eq!(fleet_entry["state"], "open");
}

#[tokio::test]
async fn gateway_serves_over_http_with_start_and_stop() {
    let fleet = TestBackend::start(json!([{"_id": "7", "registrationNo": "ZZ7"}])).await;
    let identity = TestBackend::start(json!({})).await;

    // reserve a free port for the gateway itself
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut config = test_config(&fleet.base_url, &identity.base_url);
    config.server = ServerConfig {
        host: "127.0.0.1".to_string(),
        port,
    };

    let gateway = Dispatcher::from_config(config).unwrap();
    gateway.start().await.unwrap();
    sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    // public health endpoint
    let response = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // protected route without a token: structured 401
    let response = client
        .get(format!("{}/api/trucks", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unauthenticated");

    // protected route with a token: adapted backend body
    let response = client
        .get(format!("{}/api/trucks", base))
        .bearer_auth(bearer_token())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Trucks retrieved successfully");
    assert_eq!(body["trucks"][0]["id"], "7");

    gateway.stop().await.unwrap();
}
