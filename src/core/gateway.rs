use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use bytes::Bytes;
use tracing::{info, warn};

use crate::adapt;
use crate::auth::TokenVerifier;
use crate::breaker::{BreakerRegistry, CallOutcome};
use crate::config::GatewayConfig;
use crate::core::request::GatewayRequest;
use crate::core::response::GatewayResponse;
use crate::core::routes::{fleet_routes, Route, RouteTable};
use crate::error::GatewayError;
use crate::health::HealthAggregator;
use crate::limit::RateLimiter;
use crate::proxy::BackendClient;

/// Core API Gateway trait that defines the main functionality
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Process an incoming request and return a response
    async fn process_request(
        &self,
        request: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError>;

    /// Start the gateway server
    async fn start(&self) -> Result<(), GatewayError>;

    /// Stop the gateway server
    async fn stop(&self) -> Result<(), GatewayError>;

    /// Check if the gateway is healthy
    async fn health_check(&self) -> bool;
}

/// Server state that can be mutated
struct ServerState {
    /// Server handle for graceful shutdown
    server_handle: Option<tokio::task::JoinHandle<()>>,
    /// Shutdown signal sender
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

/// The composition root: rate limiting, authentication, route resolution,
/// breaker-guarded backend calls and response adaptation, in that order.
/// No retries; a failed call is surfaced immediately.
#[derive(Clone)]
pub struct Dispatcher {
    config: GatewayConfig,
    table: Arc<RouteTable>,
    verifier: Arc<TokenVerifier>,
    limiter: Arc<RateLimiter>,
    registry: Arc<BreakerRegistry>,
    client: Arc<BackendClient>,
    health: Arc<HealthAggregator>,
    server_state: Arc<tokio::sync::Mutex<ServerState>>,
}

impl Dispatcher {
    /// Build a dispatcher serving the full fleet route set
    pub fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        Self::with_routes(config, fleet_routes())
    }

    /// Build a dispatcher with an explicit route set. Route targets are
    /// validated against the configured backends at load time.
    pub fn with_routes(config: GatewayConfig, routes: Vec<Route>) -> Result<Self, GatewayError> {
        let registry = Arc::new(BreakerRegistry::new(&config.backends, &config.breaker));
        let table = Arc::new(RouteTable::new(routes, &registry.names())?);
        let verifier = Arc::new(TokenVerifier::new(
            &config.auth.secret,
            config.auth.public_prefixes.clone(),
        )?);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let client = Arc::new(BackendClient::new(config.breaker.call_timeout())?);
        let health = Arc::new(HealthAggregator::new(registry.clone()));

        Ok(Self {
            config,
            table,
            verifier,
            limiter,
            registry,
            client,
            health,
            server_state: Arc::new(tokio::sync::Mutex::new(ServerState {
                server_handle: None,
                shutdown_tx: None,
            })),
        })
    }

    /// Health aggregator, exposed for readiness probing outside HTTP
    pub fn health(&self) -> &HealthAggregator {
        &self.health
    }

    fn health_response(&self) -> GatewayResponse {
        let report = self.health.report();
        let status = if report.is_healthy() {
            hyper::StatusCode::OK
        } else {
            hyper::StatusCode::SERVICE_UNAVAILABLE
        };
        let body = serde_json::to_vec(&report).unwrap_or_default();
        GatewayResponse::json(status, Bytes::from(body))
    }

    async fn dispatch(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        // Liveness/readiness is answered locally, no backend involved
        if request.path() == "/health" {
            return Ok(self.health_response());
        }

        // 1. Rate limit per client address, before any other work
        if let Some(ip) = request.client_ip {
            self.limiter.check(ip)?;
        }

        // 2. Authenticate unless the path is on the public allowlist
        if !self.verifier.is_public(request.path()) {
            let claims = self.verifier.verify(&request.headers)?;
            tracing::debug!(
                request_id = %request.request_id,
                subject = %claims.sub,
                "authenticated"
            );
        }

        // 3. Resolve the route
        let resolved = self
            .table
            .resolve(&request.method, request.path(), request.query())?;

        // 4. Breaker admission for the target backend. A probe admission
        // carries the permit; if this future is dropped mid-call the permit
        // is released on drop rather than held forever.
        let service = self.registry.get(&resolved.route.backend)?;
        let admission = service.breaker.try_acquire();
        if admission.is_short_circuit() {
            return Err(GatewayError::BackendUnavailable {
                backend: service.name.clone(),
            });
        }

        // 5. The live call, bounded by the breaker's per-call timeout
        let result = self
            .client
            .forward(
                &service,
                &resolved.target_path,
                request,
                service.breaker.call_timeout(),
            )
            .await;

        // 6. Record the outcome and shape the reply
        match result {
            Ok(backend_response) => {
                let outcome = if backend_response.status.is_server_error() {
                    CallOutcome::Failure
                } else {
                    CallOutcome::Success
                };
                service.breaker.record(admission, outcome);

                // A backend-reported error passes through with its own
                // status and (adapted) body; the gateway does not mask it.
                let body = match resolved.route.adapter {
                    Some(adapter) => {
                        adapt::adapt(adapter, &backend_response.body, request.query())
                    }
                    None => backend_response.body,
                };

                let mut response =
                    GatewayResponse::new(backend_response.status, backend_response.headers, body)
                        .with_backend_name(service.name.clone());
                // the adapted body's length differs from the backend's
                response.headers.remove(hyper::header::CONTENT_LENGTH);
                response.headers.remove(hyper::header::TRANSFER_ENCODING);
                Ok(response)
            }
            Err(err) => {
                let outcome = match err {
                    GatewayError::BackendTimeout { .. } => CallOutcome::Timeout,
                    _ => CallOutcome::Failure,
                };
                service.breaker.record(admission, outcome);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Gateway for Dispatcher {
    async fn process_request(
        &self,
        request: GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        let started = Instant::now();
        let result = self.dispatch(&request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => info!(
                request_id = %request.request_id,
                method = %request.method,
                path = %request.path(),
                backend = response.backend_name.as_deref().unwrap_or("-"),
                status = response.status.as_u16(),
                elapsed_ms,
                "request completed"
            ),
            Err(err) => warn!(
                request_id = %request.request_id,
                method = %request.method,
                path = %request.path(),
                backend = err.backend().unwrap_or("-"),
                outcome = err.kind(),
                status = err.status_code(),
                elapsed_ms,
                "request rejected"
            ),
        }

        result.map(|response| response.with_processing_time(elapsed_ms))
    }

    async fn start(&self) -> Result<(), GatewayError> {
        let mut server_state = self.server_state.lock().await;
        if server_state.server_handle.is_some() {
            return Err(GatewayError::InternalError(
                "server is already running".to_string(),
            ));
        }

        let gateway_ref = Arc::new(self.clone());

        let app = axum::Router::new()
            .fallback(
                move |ConnectInfo(peer): ConnectInfo<SocketAddr>,
                      req: axum::http::Request<axum::body::Body>| {
                    let gateway = gateway_ref.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body_bytes = match hyper::body::to_bytes(body).await {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                tracing::error!("failed to read request body: {}", e);
                                return GatewayResponse::from_error(&GatewayError::InvalidRequest(
                                    "failed to read request body".to_string(),
                                ))
                                .into_axum();
                            }
                        };

                        // Trust x-forwarded-for when present (the gateway may
                        // sit behind a TLS terminator), else the socket peer
                        let client_ip = parts
                            .headers
                            .get("x-forwarded-for")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.split(',').next())
                            .and_then(|s| s.trim().parse().ok())
                            .or(Some(peer.ip()));

                        let gateway_request = GatewayRequest::new(
                            parts.method,
                            parts.uri,
                            parts.headers,
                            body_bytes,
                            client_ip,
                        );

                        match gateway.process_request(gateway_request).await {
                            Ok(response) => response.into_axum(),
                            Err(e) => GatewayResponse::from_error(&e).into_axum(),
                        }
                    }
                },
            )
            .layer(tower_http::trace::TraceLayer::new_for_http());

        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| GatewayError::InternalError(format!("invalid address: {}", e)))?;

        info!("starting gateway server on {}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let server_handle = tokio::spawn(async move {
            let server = axum::Server::bind(&addr)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>());

            let graceful = server.with_graceful_shutdown(async {
                shutdown_rx.await.ok();
                info!("shutdown signal received, starting graceful shutdown");
            });

            if let Err(e) = graceful.await {
                tracing::error!("server error: {}", e);
            }
        });

        server_state.server_handle = Some(server_handle);
        server_state.shutdown_tx = Some(shutdown_tx);

        Ok(())
    }

    async fn stop(&self) -> Result<(), GatewayError> {
        let mut server_state = self.server_state.lock().await;

        if server_state.server_handle.is_none() {
            return Err(GatewayError::InternalError(
                "server is not running".to_string(),
            ));
        }

        if let Some(tx) = server_state.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = server_state.server_handle.take() {
            handle
                .await
                .map_err(|e| GatewayError::InternalError(format!("shutdown failed: {}", e)))?;
            info!("gateway server shut down");
        }

        Ok(())
    }

    async fn health_check(&self) -> bool {
        self.health.report().is_healthy()
    }
}

impl GatewayResponse {
    /// Convert to an axum response for the server layer
    pub fn into_axum(self) -> axum::http::Response<axum::body::Body> {
        let mut builder = axum::http::Response::builder().status(self.status);

        for (name, value) in self.headers.iter() {
            builder = builder.header(name, value);
        }

        builder
            .body(axum::body::Body::from(self.body))
            .unwrap_or_else(|_| {
                axum::http::Response::builder()
                    .status(500)
                    .body(axum::body::Body::empty())
                    .expect("empty response")
            })
    }
}
