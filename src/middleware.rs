use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, error, warn};

pub async fn log_request_outcome(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status.is_server_error() {
        // 5xx error
        error!(%method, %uri, %status, elapsed_ms, "Server error");
    } else if status.is_client_error() {
        // 4xx error
        warn!(%method, %uri, %status, elapsed_ms, "Client error");
    } else {
        debug!(%method, %uri, %status, elapsed_ms, "Request handled");
    }

    response
}
