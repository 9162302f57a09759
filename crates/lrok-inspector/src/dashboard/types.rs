//! JSON views and response helpers for the dashboard API.

use crate::capture::{Exchange, ExchangeId};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;

/// Body type of every dashboard response, buffered or streamed.
pub type DashboardBody = UnsyncBoxBody<Bytes, Infallible>;

/// Wire representation of an exchange.
#[derive(Debug, Serialize)]
pub struct ExchangeView<'a> {
    pub id: ExchangeId,
    pub timestamp: DateTime<Utc>,
    pub method: &'a str,
    pub path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<&'a str>,
    pub status_code: u16,
    /// Nanoseconds
    pub duration: u64,
    pub request_headers: &'a BTreeMap<String, String>,
    pub response_headers: &'a BTreeMap<String, String>,
    pub request_body: String,
    pub request_body_encoding: BodyEncoding,
    pub request_body_truncated: bool,
    pub response_body: String,
    pub response_body_encoding: BodyEncoding,
    pub response_body_truncated: bool,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Utf8,
    Base64,
}

/// Text bodies are shown as-is; anything else is base64.
pub fn encode_body(body: &Bytes) -> (String, BodyEncoding) {
    match std::str::from_utf8(body) {
        Ok(text) => (text.to_string(), BodyEncoding::Utf8),
        Err(_) => (BASE64.encode(body), BodyEncoding::Base64),
    }
}

impl<'a> From<&'a Exchange> for ExchangeView<'a> {
    fn from(exchange: &'a Exchange) -> Self {
        let (request_body, request_body_encoding) = encode_body(&exchange.request_body);
        let (response_body, response_body_encoding) = encode_body(&exchange.response_body);
        Self {
            id: exchange.id,
            timestamp: exchange.timestamp,
            method: &exchange.method,
            path: &exchange.path,
            query: exchange.query.as_deref(),
            status_code: exchange.status,
            duration: u64::try_from(exchange.duration.as_nanos()).unwrap_or(u64::MAX),
            request_headers: &exchange.request_headers,
            response_headers: &exchange.response_headers,
            request_body,
            request_body_encoding,
            request_body_truncated: exchange.request_body_truncated,
            response_body,
            response_body_encoding,
            response_body_truncated: exchange.response_body_truncated,
            bytes_in: exchange.bytes_in,
            bytes_out: exchange.bytes_out,
        }
    }
}

/// `GET /api/stats` body.
#[derive(Debug, Serialize)]
pub struct StatsView {
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Cumulative number of captured exchanges
    pub connections: u64,
    pub retained: usize,
    pub capacity: usize,
    pub subscribers: usize,
    pub start_time: DateTime<Utc>,
    pub uptime_secs: u64,
    pub target: String,
    pub proxy_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Boxing for buffered responses.
pub trait ResponseExt {
    fn into_boxed(self) -> Response<DashboardBody>;
}

impl ResponseExt for Response<Full<Bytes>> {
    fn into_boxed(self) -> Response<DashboardBody> {
        self.map(|body| body.boxed_unsync())
    }
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<DashboardBody> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    build_response_with_headers(status, [("content-type", "application/json")], json)
}

pub fn build_response_with_headers(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<DashboardBody> {
    let mut builder = Response::builder().status(status);
    for (key, value) in headers {
        builder = builder.header(key.as_ref(), value.as_ref());
    }
    builder
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Full::new(Bytes::from("Internal Server Error")));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
        .into_boxed()
}

pub fn error_response(status: StatusCode, message: &str) -> Response<DashboardBody> {
    json_response(
        status,
        &ErrorResponse {
            error: message.to_string(),
        },
    )
}

pub fn not_found() -> Response<DashboardBody> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}
