//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe every backend (concurrently, own timeout each)
//!     → state.rs reconcile
//!
//! State machine (state.rs):
//!     Present ←→ Absent, mirroring Healthy ←→ Unhealthy
//!     → pool insert / remove on genuine transitions only
//! ```
//!
//! # Design Decisions
//! - A failed probe is not retried within a cycle; the next tick is the retry
//! - Timeouts, connection errors and non-2xx are all "unhealthy"
//! - Health state is per-backend, not per-pool

pub mod active;
pub mod state;

pub use active::{HealthMonitor, ProbeFailure, ProbeResult};
pub use state::{reconcile, Transition};
