//! Read-only status surface: `/stats` as JSON and a `/dashboard` page.

pub mod handlers;

use axum::{routing::get, Router};

use crate::http::server::AppState;
use self::handlers::*;

/// Routes merged into the main router when `admin.enabled` is set.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(get_stats))
        .route("/dashboard", get(get_dashboard))
}
