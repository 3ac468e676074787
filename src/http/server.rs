//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router (proxy catch-all plus status endpoints)
//! - Wire up middleware (request ID, tracing)
//! - Run the health monitor alongside the server
//! - Apply backend additions from config reloads
//! - Dispatch requests to the least-loaded backend

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use hyper_util::client::legacy::connect::HttpConnector;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::config::ProxyConfig;
use crate::health::HealthMonitor;
use crate::http::forward::{forward, ForwardError, UpstreamClient};
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{dispatch, BackendPool, DispatchError};
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<BackendPool>,
    pub client: UpstreamClient,
    /// Bound on the wait for a backend's response head.
    pub request_timeout: Duration,
}

/// HTTP server for the load balancer.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    pool: Arc<BackendPool>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        let pool = Arc::new(BackendPool::from_config(&config.backends));

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let state = AppState {
            pool: pool.clone(),
            client,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        };

        tracing::info!(
            backends = pool.len(),
            members = pool.member_count(),
            "Backend pool ready"
        );

        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            pool,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let mut router = Router::new();
        if config.admin.enabled {
            router = router.merge(admin::router());
        }

        router
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer()),
            )
    }

    /// Run until `shutdown` fires.
    ///
    /// The health monitor and the config-reload task run for the same span.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let monitor = HealthMonitor::new(self.pool.clone(), self.config.health_check.clone());
        let monitor_task = tokio::spawn(monitor.run(shutdown.clone()));

        tokio::spawn(apply_config_updates(
            self.pool.clone(),
            config_updates,
            shutdown.clone(),
        ));

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        let _ = monitor_task.await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The shared backend pool.
    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Register backends added by config reloads until shutdown.
async fn apply_config_updates(
    pool: Arc<BackendPool>,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    shutdown: Shutdown,
) {
    let stopped = shutdown.wait();
    tokio::pin!(stopped);

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => {
                    let added = pool.reconcile_config(&config.backends);
                    if !added.is_empty() {
                        tracing::info!(added = added.len(), total = pool.len(), "Applied config reload");
                    }
                }
                None => break,
            },
            _ = &mut stopped => break,
        }
    }
}

/// Main proxy handler.
/// Picks the least-loaded backend and forwards the request to it.
async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let (parts, body) = request.into_parts();
    let client = state.client.clone();
    let timeout = state.request_timeout;

    let result = dispatch(&state.pool, |guard| async move {
        let backend = guard.backend().clone();
        let response = forward(&client, guard, parts, body, timeout).await?;
        Ok::<_, ForwardError>((backend, response))
    })
    .await;

    match result {
        Ok((backend, response)) => {
            tracing::debug!(
                request_id = %request_id,
                method = %method,
                path = %path,
                backend = %backend.name,
                status = %response.status(),
                "Request completed"
            );
            metrics::record_request(response.status().as_u16(), &backend.name, start_time);
            response
        }
        Err(DispatchError::NoEligibleBackend) => {
            tracing::warn!(request_id = %request_id, path = %path, "No healthy backends");
            metrics::record_request(503, "none", start_time);
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
        }
        Err(DispatchError::Forward { backend, source }) => {
            let status = source.status();
            tracing::error!(
                request_id = %request_id,
                backend = %backend,
                error = %source,
                "Upstream error"
            );
            metrics::record_request(status.as_u16(), &backend, start_time);
            (status, Body::from(status.canonical_reason().unwrap_or("Upstream error")))
                .into_response()
        }
    }
}
