//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → /stats, /dashboard → admin
//!     → everything else → dispatch → forward.rs → backend
//!     → Send response to client
//! ```

pub mod forward;
pub mod request;
pub mod server;

pub use forward::ForwardError;
pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
