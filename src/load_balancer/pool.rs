//! Backend pool management.
//!
//! # Responsibilities
//! - Own every known backend, members and non-members alike
//! - Maintain the weighted least-connections heap over healthy members
//! - Hand out load guards for dispatch
//! - Serve consistent snapshots for the status endpoints
//!
//! One mutex guards the backend list, the name index and the heap (load
//! counts and positions together). Callers never lock anything themselves.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::uri::Authority;
use parking_lot::Mutex;
use url::Url;

use crate::config::BackendConfig;
use crate::load_balancer::backend::{Backend, BackendId, BackendSnapshot, LoadGuard};
use crate::load_balancer::least_conn::LoadHeap;
use crate::observability::metrics;

/// Error type for backend registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("backend `{0}` is already registered")]
    Duplicate(String),

    #[error("backend `{name}` has an invalid url: {reason}")]
    InvalidUrl { name: String, reason: String },
}

#[derive(Debug, Default)]
struct PoolState {
    backends: Vec<Arc<Backend>>,
    by_name: HashMap<String, BackendId>,
    heap: LoadHeap,
}

impl PoolState {
    /// The id of `backend` if it was registered by this pool.
    fn id_of(&self, backend: &Backend) -> Option<BackendId> {
        self.backends
            .get(backend.id.0)
            .filter(|known| std::ptr::eq(known.as_ref(), backend))
            .map(|_| backend.id)
    }

    fn active_of(&self, id: BackendId) -> usize {
        self.heap.slot(id).map_or(0, |slot| slot.active_connections)
    }

    fn snapshot_of(&self, backend: &Backend) -> BackendSnapshot {
        let slot = self.heap.slot(backend.id);
        BackendSnapshot {
            name: backend.name.clone(),
            url: backend.url.to_string(),
            weight: backend.weight,
            health: backend.is_healthy(),
            active_connections: slot.map_or(0, |s| s.active_connections),
            member: slot.is_some_and(|s| s.position.is_some()),
        }
    }
}

/// The shared set of backends and the selector over the healthy ones.
#[derive(Debug, Default)]
pub struct BackendPool {
    inner: Mutex<PoolState>,
}

impl BackendPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool from configuration. Every backend starts healthy and
    /// eligible; entries that cannot be registered are logged and skipped.
    pub fn from_config(configs: &[BackendConfig]) -> Self {
        let pool = Self::new();
        for config in configs {
            match pool.register(config, true) {
                Ok(backend) => {
                    pool.insert(&backend);
                }
                Err(e) => tracing::warn!(error = %e, "Skipping backend"),
            }
        }
        pool
    }

    /// Register a backend without making it eligible for dispatch.
    pub fn register(
        &self,
        config: &BackendConfig,
        healthy: bool,
    ) -> Result<Arc<Backend>, PoolError> {
        let (url, authority) = parse_target(config)?;
        let weight = config.effective_weight();

        let mut state = self.inner.lock();
        if state.by_name.contains_key(&config.name) {
            return Err(PoolError::Duplicate(config.name.clone()));
        }

        let id = state.heap.track(weight);
        let backend = Arc::new(Backend::new(
            id,
            config.name.clone(),
            url,
            authority,
            weight,
            healthy,
        ));
        state.backends.push(backend.clone());
        state.by_name.insert(config.name.clone(), id);

        tracing::debug!(backend = %backend, weight, "Registered backend");
        Ok(backend)
    }

    /// Register backends that appeared in a reloaded configuration.
    ///
    /// New backends start unhealthy and join the heap after their first
    /// successful probe. Known backends are left untouched.
    pub fn reconcile_config(&self, configs: &[BackendConfig]) -> Vec<Arc<Backend>> {
        let mut added = Vec::new();
        for config in configs {
            if let Some(existing) = self.get(&config.name) {
                if parse_url(&config.url).as_ref() != Some(&existing.url) {
                    tracing::warn!(
                        backend = %existing.name,
                        url = %config.url,
                        "Backend url changed in config; restart to apply"
                    );
                }
                continue;
            }
            match self.register(config, false) {
                Ok(backend) => {
                    tracing::info!(backend = %backend, "New backend registered, awaiting health check");
                    added.push(backend);
                }
                Err(e) => tracing::warn!(error = %e, "Skipping backend from reloaded config"),
            }
        }

        for backend in self.all_backends() {
            if !configs.iter().any(|c| c.name == backend.name) {
                tracing::warn!(
                    backend = %backend.name,
                    "Backend missing from reloaded config; it stays registered"
                );
            }
        }
        added
    }

    /// Make a healthy backend eligible for dispatch.
    ///
    /// Returns `false` if it is already a member, unhealthy, or unknown.
    pub fn insert(&self, backend: &Backend) -> bool {
        let mut state = self.inner.lock();
        let Some(id) = state.id_of(backend) else {
            return false;
        };
        if !backend.is_healthy() {
            return false;
        }
        state.heap.insert(id)
    }

    /// Stop dispatching to a backend. Returns `false` if it was not a member.
    pub fn remove(&self, backend: &Backend) -> bool {
        let mut state = self.inner.lock();
        match state.id_of(backend) {
            Some(id) => state.heap.remove(id),
            None => false,
        }
    }

    /// The member with the lowest `active / weight`, if any.
    pub fn peek_best(&self) -> Option<Arc<Backend>> {
        let state = self.inner.lock();
        state
            .heap
            .peek()
            .map(|id| state.backends[id.0].clone())
    }

    /// Count one more connection on `backend`.
    ///
    /// Returns `true` if the heap was rebalanced. For a non-member the count
    /// still moves so it stays exact when the backend rejoins.
    pub fn increment_load(&self, backend: &Backend) -> bool {
        let mut state = self.inner.lock();
        let Some(id) = state.id_of(backend) else {
            return false;
        };
        let rebalanced = state.heap.increment(id);
        let active = state.active_of(id);
        drop(state);

        metrics::record_active_connections(&backend.name, active);
        rebalanced
    }

    /// Count one fewer connection on `backend`. Never goes below zero.
    pub fn decrement_load(&self, backend: &Backend) -> bool {
        let mut state = self.inner.lock();
        let Some(id) = state.id_of(backend) else {
            return false;
        };
        let rebalanced = state.heap.decrement(id);
        let active = state.active_of(id);
        drop(state);

        metrics::record_active_connections(&backend.name, active);
        rebalanced
    }

    /// Pick the best member and take a load slot on it in one step.
    pub fn acquire(self: &Arc<Self>) -> Option<LoadGuard> {
        let mut state = self.inner.lock();
        let id = state.heap.peek()?;
        state.heap.increment(id);
        let active = state.active_of(id);
        let backend = state.backends[id.0].clone();
        drop(state);

        metrics::record_active_connections(&backend.name, active);

        Some(LoadGuard {
            pool: self.clone(),
            backend,
        })
    }

    /// Whether `backend` is currently eligible for dispatch.
    pub fn is_member(&self, backend: &Backend) -> bool {
        let state = self.inner.lock();
        state
            .id_of(backend)
            .is_some_and(|id| state.heap.contains(id))
    }

    /// Current in-flight request count for `backend`.
    pub fn active_connections(&self, backend: &Backend) -> usize {
        let state = self.inner.lock();
        state
            .id_of(backend)
            .and_then(|id| state.heap.slot(id))
            .map_or(0, |slot| slot.active_connections)
    }

    /// Number of backends eligible for dispatch.
    pub fn member_count(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Number of known backends.
    pub fn len(&self) -> usize {
        self.inner.lock().backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every known backend, in registration order.
    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.inner.lock().backends.clone()
    }

    /// Look a backend up by name.
    pub fn get(&self, name: &str) -> Option<Arc<Backend>> {
        let state = self.inner.lock();
        state
            .by_name
            .get(name)
            .map(|id| state.backends[id.0].clone())
    }

    /// Consistent view of every known backend, taken under one lock.
    pub fn snapshot(&self) -> Vec<BackendSnapshot> {
        let state = self.inner.lock();
        state
            .backends
            .iter()
            .map(|backend| state.snapshot_of(backend))
            .collect()
    }
}

fn parse_url(raw: &str) -> Option<Url> {
    Url::parse(raw).ok()
}

fn parse_target(config: &BackendConfig) -> Result<(Url, Authority), PoolError> {
    let invalid = |reason: String| PoolError::InvalidUrl {
        name: config.name.clone(),
        reason,
    };

    let url = Url::parse(&config.url).map_err(|e| invalid(e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| invalid("missing host".to_string()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port".to_string()))?;
    let authority = format!("{}:{}", host, port)
        .parse::<Authority>()
        .map_err(|e| invalid(e.to_string()))?;

    Ok((url, authority))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pool_with(backends: &[(&str, i64)]) -> Arc<BackendPool> {
        let configs: Vec<_> = backends
            .iter()
            .enumerate()
            .map(|(i, (name, weight))| {
                BackendConfig::new(*name, format!("http://127.0.0.1:{}", 5001 + i))
                    .with_weight(*weight)
            })
            .collect();
        Arc::new(BackendPool::from_config(&configs))
    }

    #[test]
    fn test_weighted_scenario() {
        let pool = pool_with(&[("a", 10), ("b", 2)]);
        let a = pool.get("a").unwrap();
        let b = pool.get("b").unwrap();

        for _ in 0..20 {
            pool.increment_load(&a);
        }
        for _ in 0..10 {
            pool.increment_load(&b);
        }
        assert_eq!(pool.peek_best().unwrap().name, "a");

        for _ in 0..40 {
            pool.increment_load(&a);
        }
        assert_eq!(pool.peek_best().unwrap().name, "b");
    }

    #[test]
    fn test_empty_pool() {
        let pool = Arc::new(BackendPool::new());
        assert!(pool.peek_best().is_none());
        assert!(pool.acquire().is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_zero_weight_normalized() {
        let pool = pool_with(&[("a", 0), ("b", -4)]);
        assert_eq!(pool.get("a").unwrap().weight, 1);
        assert_eq!(pool.get("b").unwrap().weight, 1);
    }

    #[test]
    fn test_duplicate_registration() {
        let pool = pool_with(&[("a", 1)]);
        let err = pool
            .register(&BackendConfig::new("a", "http://127.0.0.1:9999"), true)
            .unwrap_err();
        assert_eq!(err, PoolError::Duplicate("a".into()));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_invalid_url_skipped() {
        let pool = BackendPool::from_config(&[
            BackendConfig::new("bad", "not a url"),
            BackendConfig::new("good", "http://localhost:5001"),
        ]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get("good").unwrap().authority.as_str(), "localhost:5001");
    }

    #[test]
    fn test_default_port() {
        let pool = BackendPool::from_config(&[BackendConfig::new("a", "http://example.com")]);
        assert_eq!(pool.get("a").unwrap().authority.as_str(), "example.com:80");
    }

    #[test]
    fn test_remove_and_reinsert() {
        let pool = pool_with(&[("a", 1), ("b", 1)]);
        let a = pool.get("a").unwrap();

        a.set_healthy(false);
        assert!(pool.remove(&a));
        assert!(!pool.remove(&a));
        for _ in 0..10 {
            assert_eq!(pool.peek_best().unwrap().name, "b");
        }

        a.set_healthy(true);
        assert!(pool.insert(&a));
        assert!(!pool.insert(&a));
        assert_eq!(pool.member_count(), 2);
        assert!(pool.is_member(&a));
    }

    #[test]
    fn test_unhealthy_backend_not_inserted() {
        let pool = Arc::new(BackendPool::new());
        let a = pool
            .register(&BackendConfig::new("a", "http://127.0.0.1:5001"), false)
            .unwrap();
        assert!(!pool.insert(&a));
        assert!(pool.peek_best().is_none());
    }

    #[test]
    fn test_foreign_backend_ignored() {
        let pool = pool_with(&[("a", 1)]);
        let other = pool_with(&[("x", 1)]);
        let foreign = other.get("x").unwrap();

        assert!(!pool.remove(&foreign));
        assert!(!pool.increment_load(&foreign));
        assert!(!pool.is_member(&foreign));
        assert_eq!(pool.active_connections(&foreign), 0);
        assert_eq!(other.active_connections(&foreign), 0);
    }

    #[test]
    fn test_guard_releases_load() {
        let pool = pool_with(&[("a", 1)]);
        let guard = pool.acquire().unwrap();
        assert_eq!(guard.name, "a");
        assert_eq!(pool.active_connections(guard.backend()), 1);

        let a = guard.backend().clone();
        drop(guard);
        assert_eq!(pool.active_connections(&a), 0);
    }

    #[test]
    fn test_guard_spreads_load() {
        let pool = pool_with(&[("a", 1), ("b", 1)]);
        let g1 = pool.acquire().unwrap();
        let g2 = pool.acquire().unwrap();
        assert_ne!(g1.name, g2.name);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let pool = pool_with(&[("a", 3), ("b", 1)]);
        let a = pool.get("a").unwrap();

        thread::scope(|s| {
            for _ in 0..100 {
                s.spawn(|| {
                    pool.increment_load(&a);
                });
            }
        });
        assert_eq!(pool.active_connections(&a), 100);

        thread::scope(|s| {
            for _ in 0..100 {
                s.spawn(|| {
                    pool.decrement_load(&a);
                });
            }
        });
        assert_eq!(pool.active_connections(&a), 0);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = pool_with(&[("a", 5), ("b", 1), ("c", 2)]);

        thread::scope(|s| {
            for _ in 0..100 {
                let pool = &pool;
                s.spawn(move || {
                    for _ in 0..50 {
                        let guard = pool.acquire().unwrap();
                        assert!(pool.active_connections(guard.backend()) >= 1);
                    }
                });
            }
        });

        for snapshot in pool.snapshot() {
            assert_eq!(snapshot.active_connections, 0, "{} leaked load", snapshot.name);
        }
    }

    #[test]
    fn test_removed_backend_stays_out_under_load() {
        let pool = pool_with(&[("a", 1), ("b", 1)]);
        let a = pool.get("a").unwrap();
        a.set_healthy(false);
        pool.remove(&a);

        thread::scope(|s| {
            for _ in 0..50 {
                let a = a.clone();
                let pool = &pool;
                s.spawn(move || {
                    pool.increment_load(&a);
                    assert_eq!(pool.peek_best().unwrap().name, "b");
                    pool.decrement_load(&a);
                });
            }
        });

        assert!(!pool.is_member(&a));
        assert_eq!(pool.active_connections(&a), 0);
    }

    #[test]
    fn test_snapshot_includes_non_members() {
        let pool = pool_with(&[("a", 2), ("b", 1)]);
        let b = pool.get("b").unwrap();
        b.set_healthy(false);
        pool.remove(&b);
        let _guard = pool.acquire().unwrap();

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "a");
        assert_eq!(snapshot[0].active_connections, 1);
        assert!(snapshot[0].member);
        assert_eq!(snapshot[1].name, "b");
        assert!(!snapshot[1].health);
        assert!(!snapshot[1].member);
        assert_eq!(snapshot[1].url, "http://127.0.0.1:5002/");
    }

    #[test]
    fn test_reconcile_config_adds_new_backends_absent() {
        let pool = pool_with(&[("a", 1)]);
        let added = pool.reconcile_config(&[
            BackendConfig::new("a", "http://127.0.0.1:5001"),
            BackendConfig::new("c", "http://127.0.0.1:6000").with_weight(4),
        ]);

        assert_eq!(added.len(), 1);
        assert_eq!(added[0].name, "c");
        assert_eq!(added[0].weight, 4);
        assert!(!added[0].is_healthy());
        assert!(!pool.is_member(&added[0]));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.member_count(), 1);
    }

    /// Records every value set on the active-connections gauge.
    #[derive(Default)]
    struct ActiveGauge(parking_lot::Mutex<Vec<f64>>);

    impl ::metrics::GaugeFn for ActiveGauge {
        fn increment(&self, _value: f64) {}
        fn decrement(&self, _value: f64) {}
        fn set(&self, value: f64) {
            self.0.lock().push(value);
        }
    }

    #[derive(Default)]
    struct GaugeRecorder {
        active: Arc<ActiveGauge>,
    }

    impl ::metrics::Recorder for GaugeRecorder {
        fn describe_counter(
            &self,
            _key: ::metrics::KeyName,
            _unit: Option<::metrics::Unit>,
            _description: ::metrics::SharedString,
        ) {
        }
        fn describe_gauge(
            &self,
            _key: ::metrics::KeyName,
            _unit: Option<::metrics::Unit>,
            _description: ::metrics::SharedString,
        ) {
        }
        fn describe_histogram(
            &self,
            _key: ::metrics::KeyName,
            _unit: Option<::metrics::Unit>,
            _description: ::metrics::SharedString,
        ) {
        }
        fn register_counter(
            &self,
            _key: &::metrics::Key,
            _metadata: &::metrics::Metadata<'_>,
        ) -> ::metrics::Counter {
            ::metrics::Counter::noop()
        }
        fn register_gauge(
            &self,
            key: &::metrics::Key,
            _metadata: &::metrics::Metadata<'_>,
        ) -> ::metrics::Gauge {
            if key.name() == "lb_backend_active_connections" {
                ::metrics::Gauge::from_arc(self.active.clone())
            } else {
                ::metrics::Gauge::noop()
            }
        }
        fn register_histogram(
            &self,
            _key: &::metrics::Key,
            _metadata: &::metrics::Metadata<'_>,
        ) -> ::metrics::Histogram {
            ::metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_active_gauge_follows_every_slot_change() {
        let pool = pool_with(&[("a", 1)]);
        let a = pool.get("a").unwrap();
        let recorder = GaugeRecorder::default();

        ::metrics::with_local_recorder(&recorder, || {
            let first = pool.acquire().unwrap();
            let second = pool.acquire().unwrap();
            drop(first);
            pool.increment_load(&a);
            pool.decrement_load(&a);
            drop(second);
        });

        assert_eq!(*recorder.active.0.lock(), vec![1.0, 2.0, 1.0, 2.0, 1.0, 0.0]);
    }
}
