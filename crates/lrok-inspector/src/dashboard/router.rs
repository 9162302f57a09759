//! Route dispatch for the dashboard API.

use super::server::DashboardState;
use super::sse::{event_stream, SSE_CONTENT_TYPE};
use super::types::{
    build_response_with_headers, error_response, json_response, not_found, DashboardBody,
    ExchangeView, StatsView,
};
use crate::capture::ExchangeId;
use crate::metrics::collect_metrics;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;

/// Main request router
pub async fn route_request(
    req: Request<Incoming>,
    state: Arc<DashboardState>,
) -> Result<Response<DashboardBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("Dashboard API: {} {}", method, path);

    Ok(route_by_path(&method, &path, &state))
}

fn route_by_path(
    method: &Method,
    path: &str,
    state: &DashboardState,
) -> Response<DashboardBody> {
    match (method, path) {
        (&Method::GET, "/health") => {
            return json_response(StatusCode::OK, &serde_json::json!({"status": "ok"}))
        }
        (&Method::GET, "/metrics") => {
            return build_response_with_headers(
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4")],
                collect_metrics(),
            )
        }
        (&Method::GET, "/api/stats") => return handle_stats(state),
        (&Method::GET, "/api/requests") => return handle_list(state),
        (&Method::DELETE, "/api/requests") => return handle_clear(state),
        (&Method::GET, "/api/requests/stream") => return handle_stream(state),
        _ => {}
    }

    if let Some(id) = path.strip_prefix("/api/requests/") {
        if *method == Method::GET {
            return handle_get(state, id);
        }
    }

    not_found()
}

/// GET /api/requests - retained exchanges, oldest first
fn handle_list(state: &DashboardState) -> Response<DashboardBody> {
    let snapshot = state.query.snapshot();
    let views: Vec<ExchangeView<'_>> = snapshot
        .iter()
        .map(|exchange| ExchangeView::from(exchange.as_ref()))
        .collect();
    json_response(StatusCode::OK, &views)
}

/// GET /api/requests/{id}
fn handle_get(state: &DashboardState, id: &str) -> Response<DashboardBody> {
    let Ok(id) = id.parse::<ExchangeId>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid exchange id");
    };
    match state.query.get(id) {
        Some(exchange) => json_response(StatusCode::OK, &ExchangeView::from(exchange.as_ref())),
        None => error_response(StatusCode::NOT_FOUND, "Exchange not found"),
    }
}

/// DELETE /api/requests
fn handle_clear(state: &DashboardState) -> Response<DashboardBody> {
    let cleared = state.query.clear();
    json_response(StatusCode::OK, &serde_json::json!({ "cleared": cleared }))
}

/// GET /api/stats
fn handle_stats(state: &DashboardState) -> Response<DashboardBody> {
    let stats = state.query.stats();
    let view = StatsView {
        bytes_in: stats.bytes_in,
        bytes_out: stats.bytes_out,
        connections: stats.exchanges,
        retained: state.query.snapshot().len(),
        capacity: state.query.capacity(),
        subscribers: state.query.subscriber_count(),
        start_time: state.started_at,
        uptime_secs: state.started.elapsed().as_secs(),
        target: state.target.clone(),
        proxy_port: state.proxy_port,
        tunnel_name: state.tunnel_name.clone(),
        public_url: state.public_url.clone(),
    };
    json_response(StatusCode::OK, &view)
}

/// GET /api/requests/stream - snapshot then live exchanges as SSE
fn handle_stream(state: &DashboardState) -> Response<DashboardBody> {
    let body = StreamBody::new(event_stream(state.query.stream(), state.keep_alive));
    let mut response = Response::new(body.boxed_unsync());
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(SSE_CONTENT_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
