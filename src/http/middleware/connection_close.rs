//! Connection draining middleware.
//! Asks clients to drop keep-alive connections once shutdown has started.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::http::router::ExitState;

pub async fn close_connections_when_exiting(
    State(state): State<ExitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.is_exiting() {
        return next.run(request).await;
    }

    tracing::debug!(path = %request.uri().path(), "Exit in progress; closing connection after response");
    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}
