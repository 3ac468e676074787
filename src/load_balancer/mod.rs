//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request arrives
//!     → dispatch.rs (acquire a load slot, forward, release)
//!     → pool.rs (single lock over backends + heap)
//!     → least_conn.rs (min-heap keyed by active / weight)
//!     → backend.rs (identity, health flag, load guard)
//!
//! Health monitor
//!     → pool.rs insert / remove on state change
//! ```
//!
//! # Design Decisions
//! - Only healthy backends are heap members; unhealthy ones stay registered
//! - Best pick is O(1), load updates and membership changes O(log n)
//! - Load counts and heap positions change together under one lock

pub mod backend;
pub mod dispatch;
pub mod least_conn;
pub mod pool;

pub use backend::{Backend, BackendId, BackendSnapshot, LoadGuard};
pub use dispatch::{dispatch, DispatchError};
pub use least_conn::LoadHeap;
pub use pool::{BackendPool, PoolError};
