//! Forwarding engine: relays requests to the target and records each
//! completed round trip.
//!
//! Bodies are buffered in full in both directions so the same bytes can be
//! forwarded and captured. Memory use per request is therefore bounded by the
//! request and response sizes the caller and target exchange.

use super::client::{create_http_client, HttpClient};
use super::headers::{end_to_end_headers, generate_warmup_token, is_warmup, LIVENESS_PATH};
use crate::broadcaster::Broadcaster;
use crate::capture::{capture_headers, clip_body, CaptureStore, Exchange, ExchangeIdGenerator};
use crate::config::InspectorConfig;
use crate::error::ForwardError;
use crate::metrics;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// JSON error body returned to the caller when forwarding fails.
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn liveness_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"OK")));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Relays requests to the single configured target.
///
/// Owns the outbound client; the capture store and broadcaster are supplied
/// by the caller so several engines can run side by side in one process.
pub struct ForwardingEngine {
    client: HttpClient,
    base_uri: String,
    upstream_timeout: Duration,
    read_timeout: Duration,
    max_body_bytes: Option<usize>,
    store: Arc<CaptureStore>,
    broadcaster: Broadcaster,
    ids: ExchangeIdGenerator,
    warmup_token: String,
}

impl ForwardingEngine {
    pub fn new(
        config: &InspectorConfig,
        store: Arc<CaptureStore>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            client: create_http_client(&config.connection_pool),
            base_uri: config.target.base_uri(),
            upstream_timeout: config.target.timeout(),
            read_timeout: config.listen.read_timeout(),
            max_body_bytes: config.capture.max_body_bytes,
            store,
            broadcaster,
            ids: ExchangeIdGenerator::new(),
            warmup_token: generate_warmup_token(),
        }
    }

    /// Use `token` as the warm-up marker value instead of a fresh one.
    pub fn with_warmup_token(mut self, token: impl Into<String>) -> Self {
        self.warmup_token = token.into();
        self
    }

    /// Marker value that keeps a request out of the capture.
    pub fn warmup_token(&self) -> &str {
        &self.warmup_token
    }

    pub fn target_uri(&self) -> &str {
        &self.base_uri
    }

    pub fn store(&self) -> &Arc<CaptureStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Serve one inbound request. Never fails: forwarding errors become a
    /// gateway-style response for this caller only.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        if req.uri().path() == LIVENESS_PATH {
            return liveness_response();
        }

        let received_at = Utc::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let result = async {
            let (parts, body) = req.into_parts();
            let body = tokio::time::timeout(self.read_timeout, body.collect())
                .await
                .map_err(|_| ForwardError::RequestBodyTimeout(self.read_timeout))?
                .map_err(ForwardError::RequestBody)?
                .to_bytes();
            self.relay(Request::from_parts(parts, body), received_at).await
        }
        .await;

        match result {
            Ok(response) => response,
            Err(e) => {
                warn!("Forwarding {} {} failed: {}", method, path, e);
                metrics::record_forward_error(e.kind());
                error_response(e.status(), &e.to_string())
            }
        }
    }

    /// Relay a request whose body is already buffered.
    pub async fn forward(
        &self,
        req: Request<Bytes>,
    ) -> Result<Response<Full<Bytes>>, ForwardError> {
        self.relay(req, Utc::now()).await
    }

    async fn relay(
        &self,
        req: Request<Bytes>,
        received_at: DateTime<Utc>,
    ) -> Result<Response<Full<Bytes>>, ForwardError> {
        let (parts, request_body) = req.into_parts();
        let warmup = is_warmup(&parts.headers, &self.warmup_token);
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut upstream_req = Request::builder()
            .method(parts.method.clone())
            .uri(format!("{}{}", self.base_uri, path_and_query))
            .body(Full::new(request_body.clone()))?;
        *upstream_req.headers_mut() = end_to_end_headers(&parts.headers);

        debug!("Forwarding {} {}{}", parts.method, self.base_uri, path_and_query);

        let dispatched = Instant::now();
        let round_trip = async {
            let response = self.client.request(upstream_req).await?;
            let (response_parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(ForwardError::ResponseBody)?
                .to_bytes();
            Ok::<_, ForwardError>((response_parts, body))
        };
        let (response_parts, response_body) =
            tokio::time::timeout(self.upstream_timeout, round_trip)
                .await
                .map_err(|_| ForwardError::UpstreamTimeout(self.upstream_timeout))??;
        let duration = dispatched.elapsed();

        metrics::record_upstream_duration(
            parts.method.as_str(),
            duration.as_secs_f64() * 1000.0,
        );
        debug!(
            "{} {} -> {} in {:?}",
            parts.method,
            parts.uri.path(),
            response_parts.status,
            duration
        );

        if !warmup {
            let (stored_request_body, request_body_truncated) =
                clip_body(&request_body, self.max_body_bytes);
            let (stored_response_body, response_body_truncated) =
                clip_body(&response_body, self.max_body_bytes);

            let exchange = Arc::new(Exchange {
                id: self.ids.next_id(),
                timestamp: received_at,
                method: parts.method.to_string(),
                path: parts.uri.path().to_string(),
                query: parts.uri.query().map(str::to_string),
                status: response_parts.status.as_u16(),
                duration,
                request_headers: capture_headers(&parts.headers),
                response_headers: capture_headers(&response_parts.headers),
                request_body: stored_request_body,
                response_body: stored_response_body,
                bytes_in: request_body.len() as u64,
                bytes_out: response_body.len() as u64,
                request_body_truncated,
                response_body_truncated,
            });
            self.store.insert(Arc::clone(&exchange));
            self.broadcaster.publish(exchange);
            metrics::record_capture();
        }

        let mut response = Response::new(Full::new(response_body));
        *response.status_mut() = response_parts.status;
        *response.headers_mut() = end_to_end_headers(&response_parts.headers);
        Ok(response)
    }
}
