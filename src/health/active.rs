//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every known backend, members or not
//! - Feed each outcome into the membership state machine
//!
//! Probes in one cycle run concurrently, each under its own timeout, so one
//! unreachable backend cannot delay the verdict on the others.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time::{self, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::state::{reconcile, Transition};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{Backend, BackendPool};
use crate::observability::metrics;

/// Why a probe counted as a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeFailure {
    #[error("non-success status {0}")]
    Status(StatusCode),

    #[error("connection error: {0}")]
    Connect(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("could not build probe request: {0}")]
    Request(String),
}

/// Outcome of one probe.
pub type ProbeResult = Result<(), ProbeFailure>;

pub struct HealthMonitor {
    pool: Arc<BackendPool>,
    config: HealthCheckConfig,
    method: Method,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(pool: Arc<BackendPool>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let method = config.method.parse().unwrap_or(Method::HEAD);

        Self {
            pool,
            config,
            method,
            client,
        }
    }

    pub async fn run(self, shutdown: Shutdown) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            timeout_secs = self.config.timeout_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stopped = shutdown.wait();
        tokio::pin!(stopped);

        loop {
            tokio::select! {
                biased;
                _ = &mut stopped => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_all().await;
                }
            }
        }
    }

    /// Probe every backend once and apply the results.
    ///
    /// Returns the membership changes made in this cycle.
    pub async fn check_all(&self) -> Vec<(Arc<Backend>, Transition)> {
        let backends = self.pool.all_backends();
        let results = join_all(backends.iter().map(|backend| self.probe(backend))).await;

        let mut changes = Vec::new();
        for (backend, result) in backends.into_iter().zip(results) {
            let alive = result.is_ok();
            metrics::record_backend_health(&backend.name, alive);

            match reconcile(&self.pool, &backend, alive) {
                Some(Transition::Recovered) => {
                    tracing::info!(backend = %backend, "Backend recovered, adding to pool");
                    metrics::record_transition(&backend.name, Transition::Recovered);
                    changes.push((backend, Transition::Recovered));
                }
                Some(Transition::Failed) => {
                    let reason = result.err().map(|e| e.to_string()).unwrap_or_default();
                    tracing::warn!(backend = %backend, reason = %reason, "Backend failed health check, removing from pool");
                    metrics::record_transition(&backend.name, Transition::Failed);
                    changes.push((backend, Transition::Failed));
                }
                None => {
                    if let Err(reason) = result {
                        tracing::trace!(backend = %backend.name, reason = %reason, "Backend still unhealthy");
                    }
                }
            }
        }

        tracing::debug!(
            members = self.pool.member_count(),
            total = self.pool.len(),
            "Health check cycle complete"
        );
        changes
    }

    /// Probe one backend, bounded by the configured timeout.
    pub async fn probe(&self, backend: &Backend) -> ProbeResult {
        let url = backend
            .url
            .join(&self.config.path)
            .map_err(|e| ProbeFailure::Request(e.to_string()))?;

        let request = Request::builder()
            .method(self.method.clone())
            .uri(url.as_str())
            .header("user-agent", "least-conn-proxy-health-check")
            .body(Body::empty())
            .map_err(|e| ProbeFailure::Request(e.to_string()))?;

        let timeout = self.config.timeout();
        match time::timeout(timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(ProbeFailure::Status(response.status())),
            Ok(Err(e)) => Err(ProbeFailure::Connect(e.to_string())),
            Err(_) => Err(ProbeFailure::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP backend answering every request with `status`.
    async fn backend_with_status(status: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        status
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        addr
    }

    /// Accepts connections but never answers.
    async fn silent_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        addr
    }

    async fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    fn monitor(backends: &[(&str, SocketAddr)]) -> HealthMonitor {
        let configs: Vec<_> = backends
            .iter()
            .map(|(name, addr)| BackendConfig::new(*name, format!("http://{}", addr)))
            .collect();
        let config = HealthCheckConfig {
            timeout_secs: 1,
            ..HealthCheckConfig::default()
        };
        HealthMonitor::new(Arc::new(BackendPool::from_config(&configs)), config)
    }

    #[tokio::test]
    async fn test_probe_outcomes() {
        let ok = backend_with_status("200 OK").await;
        let broken = backend_with_status("500 Internal Server Error").await;
        let dead = closed_port().await;

        let monitor = monitor(&[("ok", ok), ("broken", broken), ("dead", dead)]);
        let pool = monitor.pool.clone();

        assert_eq!(monitor.probe(&pool.get("ok").unwrap()).await, Ok(()));
        assert_eq!(
            monitor.probe(&pool.get("broken").unwrap()).await,
            Err(ProbeFailure::Status(StatusCode::INTERNAL_SERVER_ERROR))
        );
        assert!(matches!(
            monitor.probe(&pool.get("dead").unwrap()).await,
            Err(ProbeFailure::Connect(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_timeout_is_bounded() {
        let silent = silent_backend().await;
        let monitor = monitor(&[("silent", silent)]);
        let backend = monitor.pool.get("silent").unwrap();

        let started = std::time::Instant::now();
        let result = monitor.probe(&backend).await;
        assert_eq!(result, Err(ProbeFailure::Timeout(Duration::from_secs(1))));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_check_all_reconciles_membership() {
        let ok = backend_with_status("200 OK").await;
        let dead = closed_port().await;
        let silent = silent_backend().await;

        let monitor = monitor(&[("ok", ok), ("dead", dead), ("silent", silent)]);
        let pool = monitor.pool.clone();

        let started = std::time::Instant::now();
        let changes = monitor.check_all().await;
        // Probes run side by side: total time stays near one timeout.
        assert!(started.elapsed() < Duration::from_secs(2));

        let mut failed: Vec<_> = changes
            .iter()
            .filter(|(_, t)| *t == Transition::Failed)
            .map(|(b, _)| b.name.clone())
            .collect();
        failed.sort();
        assert_eq!(failed, vec!["dead".to_string(), "silent".to_string()]);
        assert_eq!(pool.member_count(), 1);
        assert_eq!(pool.peek_best().unwrap().name, "ok");

        // Second cycle: nothing changes.
        assert!(monitor.check_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let monitor = monitor(&[]);
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(monitor.run(shutdown.clone()));
        shutdown.trigger();
        time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_already_shut_down() {
        let monitor = monitor(&[]);
        let shutdown = Shutdown::new();
        shutdown.trigger();

        time::timeout(Duration::from_secs(1), monitor.run(shutdown))
            .await
            .unwrap();
    }
}
