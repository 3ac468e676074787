//! Request-time glue between the pool and a forwarding agent.

use std::future::Future;
use std::sync::Arc;

use crate::load_balancer::backend::LoadGuard;
use crate::load_balancer::pool::BackendPool;

/// Why a request could not be served.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError<E> {
    /// No healthy backend is currently a member of the pool.
    #[error("no eligible backend")]
    NoEligibleBackend,

    /// The chosen backend was reached but the exchange failed.
    #[error("forwarding to {backend} failed: {source}")]
    Forward {
        backend: String,
        #[source]
        source: E,
    },
}

/// Run one request against the least-loaded backend.
///
/// `forward` receives the load slot itself. The slot is released when the
/// guard is dropped: when `forward` finishes with it, fails, or is cancelled,
/// or later if `forward` hands it on to something that outlives the call,
/// such as a streaming response body.
pub async fn dispatch<F, Fut, T, E>(
    pool: &Arc<BackendPool>,
    forward: F,
) -> Result<T, DispatchError<E>>
where
    F: FnOnce(LoadGuard) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let guard = pool.acquire().ok_or(DispatchError::NoEligibleBackend)?;
    let backend = guard.backend().clone();

    tracing::debug!(
        backend = %backend.name,
        active = pool.active_connections(&backend),
        "Forwarding request"
    );

    forward(guard).await.map_err(|source| DispatchError::Forward {
        backend: backend.name.clone(),
        source,
    })
}
