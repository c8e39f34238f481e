//! HTTP client for the internal API.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use mcc_relay_core::config::ApiConfig;

use super::{ApiCall, Upstream, UpstreamError};

const CSRF_HEADER: &str = "x-csrf-token";
const CSRF_MISMATCH: &str = "CSRF mismatch";

#[derive(Deserialize)]
struct CsrfResponse {
    #[serde(rename = "_csrf")]
    csrf: String,
}

/// reqwest-based [`Upstream`] implementation.
///
/// A single cookie store is shared by all calls so the session established
/// when the token was fetched is presented with it.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, timeout: Duration) -> Result<Self, UpstreamError> {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

/// Whether the connection was torn down underneath the request.
fn is_connection_dropped(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        let message = cause.to_string();
        if message.contains("connection closed") || message.contains("IncompleteMessage") {
            return true;
        }
        source = cause.source();
    }
    false
}

fn classify(err: &reqwest::Error) -> UpstreamError {
    if is_connection_dropped(err) {
        UpstreamError::SocketHangUp(err.to_string())
    } else {
        UpstreamError::Request(err.to_string())
    }
}

/// Query-string pairs for a GET call. Strings go as-is; anything else is
/// sent as its JSON text.
pub(crate) fn query_pairs(data: &Map<String, Value>) -> Vec<(String, String)> {
    data.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), value)
        })
        .collect()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|n| n.abs() > 0.0),
        _ => true,
    }
}

/// `{status: "error", data: ...}` with non-empty data.
fn is_structured_error(body: &Value) -> bool {
    body.get("status").and_then(Value::as_str) == Some("error")
        && body.get("data").is_some_and(is_truthy)
}

/// Map a response to the relay's view of it.
///
/// Successful responses are returned untouched. A rejected call with a
/// structured error body is an application error even on 403; only a bare
/// 403 or a CSRF mismatch counts as an authentication rejection.
pub(crate) fn interpret_response(
    status: StatusCode,
    text: String,
) -> Result<Value, UpstreamError> {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return Err(UpstreamError::PayloadTooLarge);
    }
    if status.is_success() {
        return Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)));
    }

    let body = match serde_json::from_str::<Value>(&text) {
        Ok(body) if is_structured_error(&body) => return Err(UpstreamError::Application(body)),
        Ok(body) => body,
        Err(_) => Value::String(text.clone()),
    };
    if status == StatusCode::FORBIDDEN || text.contains(CSRF_MISMATCH) {
        return Err(UpstreamError::Forbidden(text));
    }
    Err(UpstreamError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Headers for a relayed call.
///
/// Device headers are copied first so the relay's authorization and session
/// token replace any device-supplied values. Headers that are not valid
/// HTTP are skipped.
pub(crate) fn request_headers(call: &ApiCall<'_>) -> Result<HeaderMap, UpstreamError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &call.request.headers {
        let Some(value) = value.as_str() else {
            continue;
        };
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => debug!(header = %name, "Skipping invalid device header"),
        }
    }

    let authorization = HeaderValue::from_str(call.authorization)
        .map_err(|e| UpstreamError::Request(format!("invalid authorization header: {e}")))?;
    headers.insert(AUTHORIZATION, authorization);

    let csrf = HeaderName::from_static(CSRF_HEADER);
    match call.csrf_token {
        Some(token) => {
            let token = HeaderValue::from_str(token)
                .map_err(|e| UpstreamError::Request(format!("invalid session token: {e}")))?;
            headers.insert(csrf, token);
        }
        None => {
            headers.remove(csrf);
        }
    }
    Ok(headers)
}

#[async_trait]
impl Upstream for ApiClient {
    async fn fetch_session_token(&self) -> Result<String, UpstreamError> {
        let resp = self
            .http
            .get(self.url("/csrfToken"))
            .send()
            .await
            .map_err(|e| UpstreamError::Token(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(UpstreamError::Token(format!("status {}", resp.status())));
        }
        let token: CsrfResponse = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Token(e.to_string()))?;
        Ok(token.csrf)
    }

    async fn call(&self, call: &ApiCall<'_>) -> Result<Value, UpstreamError> {
        let request = call.request;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| UpstreamError::Request(format!("invalid method {}", request.method)))?;
        debug!(method = %method, url = %request.url, "Calling internal API");

        let mut builder = self
            .http
            .request(method, self.url(&request.url))
            .headers(request_headers(call)?);

        match (&request.data, request.is_idempotent()) {
            (Some(Value::Object(params)), true) => builder = builder.query(&query_pairs(params)),
            (Some(data), false) => builder = builder.json(data),
            _ => {}
        }

        let resp = builder.send().await.map_err(|e| classify(&e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| classify(&e))?;
        interpret_response(status, text)
    }
}
