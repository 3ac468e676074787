//! Forwarding a request to a chosen backend.
//!
//! The backend response body is streamed back to the client. The load slot
//! rides along with the body, so it stays taken until the last chunk is
//! relayed or the client goes away.

use std::time::Duration;

use axum::body::Body;
use axum::http::{request::Parts, HeaderValue, Request, Response, StatusCode, Uri};
use futures_util::StreamExt;
use hyper::header;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use tokio::time;

use crate::load_balancer::{Backend, LoadGuard};

pub type UpstreamClient = Client<HttpConnector, Body>;

/// Error type for one forwarded exchange.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid upstream uri: {0}")]
    Uri(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    /// Status returned to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Send `parts` + `body` to the backend `guard` holds a slot on.
///
/// `Host` is rewritten to the backend's authority. `timeout` bounds the wait
/// for the response head; the body then streams for as long as it takes.
pub async fn forward(
    client: &UpstreamClient,
    guard: LoadGuard,
    parts: Parts,
    body: Body,
    timeout: Duration,
) -> Result<Response<Body>, ForwardError> {
    let backend = guard.backend();
    let uri = upstream_uri(&parts.uri, backend)?;
    let mut request = Request::from_parts(parts, body);
    *request.uri_mut() = uri;
    if let Ok(host) = HeaderValue::from_str(backend.authority.as_str()) {
        request.headers_mut().insert(header::HOST, host);
    }

    let response = time::timeout(timeout, client.request(request))
        .await
        .map_err(|_| ForwardError::Timeout(timeout))??;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, hold_until_done(Body::new(body), guard)))
}

/// Wrap `body` so `guard` is dropped together with the body stream.
fn hold_until_done(body: Body, guard: LoadGuard) -> Body {
    let stream = body.into_data_stream().map(move |chunk| {
        let _slot = &guard;
        chunk
    });
    Body::from_stream(stream)
}

/// Rewrite `original` to target `backend`, keeping path and query and
/// prefixing the backend's own base path.
pub fn upstream_uri(original: &Uri, backend: &Backend) -> Result<Uri, axum::http::Error> {
    let base = backend.url.path().trim_end_matches('/');
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Uri::builder()
        .scheme(backend.url.scheme())
        .authority(backend.authority.clone())
        .path_and_query(format!("{}{}", base, path_and_query))
        .build()
}
