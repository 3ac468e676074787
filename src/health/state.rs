//! Backend membership state machine.
//!
//! # States
//! - Present: healthy, a heap member, receives traffic
//! - Absent: unhealthy, registered but never picked
//!
//! # State Transitions
//! ```text
//! Absent → Present: probe succeeds
//! Present → Absent: probe fails (error, timeout or non-2xx)
//! ```
//! Self-transitions do nothing, so a steady backend causes no heap churn and
//! no log lines.

use std::fmt;

use crate::load_balancer::{Backend, BackendPool};

/// A genuine membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Unhealthy → healthy, inserted into the heap.
    Recovered,
    /// Healthy → unhealthy, removed from the heap.
    Failed,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Recovered => "recovered",
            Transition::Failed => "failed",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply one probe outcome to `backend`.
///
/// The health flag is written first, then membership follows it. Returns the
/// transition if membership actually changed.
pub fn reconcile(pool: &BackendPool, backend: &Backend, alive: bool) -> Option<Transition> {
    backend.set_healthy(alive);

    if alive {
        pool.insert(backend).then_some(Transition::Recovered)
    } else {
        pool.remove(backend).then_some(Transition::Failed)
    }
}
