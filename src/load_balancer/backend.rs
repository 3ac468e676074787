//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server (identity, weight)
//! - Track health as an independently guarded flag
//!
//! Load (active connections) and heap position are *not* stored here: they
//! live in the pool's heap so they can be mutated together under one lock.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::uri::Authority;
use serde::Serialize;
use url::Url;

use crate::load_balancer::pool::BackendPool;

/// Dense index of a backend inside the pool that registered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(pub(crate) usize);

impl BackendId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend-{}", self.0)
    }
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// Index assigned by the pool at registration.
    pub id: BackendId,
    /// Unique name from configuration.
    pub name: String,
    /// Base URL requests and probes are sent to.
    pub url: Url,
    /// `host:port` used when rewriting request URIs.
    pub authority: Authority,
    /// Normalized capacity hint, always >= 1.
    pub weight: u32,

    healthy: AtomicBool,
}

impl Backend {
    pub(crate) fn new(
        id: BackendId,
        name: String,
        url: Url,
        authority: Authority,
        weight: u32,
        healthy: bool,
    ) -> Self {
        Self {
            id,
            name,
            url,
            authority,
            weight: weight.max(1),
            healthy: AtomicBool::new(healthy),
        }
    }

    /// Last recorded probe outcome.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Record a probe outcome, returning the previous value.
    pub(crate) fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

/// Point-in-time view of one backend, for the status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendSnapshot {
    pub name: String,
    pub url: String,
    pub weight: u32,
    pub health: bool,
    pub active_connections: usize,
    /// Whether the backend is currently eligible for dispatch.
    pub member: bool,
}

/// A RAII guard holding one unit of load on a backend.
///
/// Dropping the guard releases the load slot, whatever path the request
/// took: success, error, cancellation or unwinding.
#[derive(Debug)]
pub struct LoadGuard {
    pub(crate) pool: Arc<BackendPool>,
    pub(crate) backend: Arc<Backend>,
}

impl LoadGuard {
    /// The backend this slot was taken on.
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for LoadGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.pool.decrement_load(&self.backend);
    }
}
