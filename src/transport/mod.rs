//! HTTP transport module for the keyword gateway.
//!
//! Provides the network seam every provider client sends through. The
//! transport returns any HTTP response as-is; status classification happens
//! in the client so that scripted transports exercise the same path.

mod http_transport;

pub use http_transport::{HttpTransport, ReqwestTransport};

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

pub use http::Method;

use crate::errors::GatewayResult;

/// Outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Creates a request without a body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Creates a JSON POST request.
    pub fn post_json<T: Serialize + ?Sized>(url: impl Into<String>, body: &T) -> GatewayResult<Self> {
        let body = serde_json::to_vec(body)?;
        Ok(Self::new(Method::POST, url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(body))
    }

    /// Creates a form-encoded POST request.
    pub fn post_form(url: impl Into<String>, encoded: String) -> Self {
        Self::new(Method::POST, url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(encoded)
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Body as UTF-8 text, for logging and tests.
    pub fn body_text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, lowercase names.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Looks up a header case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses `Retry-After` as delta-seconds or an HTTP date.
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.header("retry-after")?.trim();
        if let Ok(secs) = value.parse::<f64>() {
            return (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs));
        }
        let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
        let delta = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
        Some(delta.to_std().unwrap_or(Duration::ZERO))
    }

    /// Best-effort error message from an error body.
    pub fn error_message(&self) -> String {
        let parsed: Option<serde_json::Value> = serde_json::from_slice(&self.body).ok();
        let from_json = parsed.as_ref().and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .or_else(|| v.get("error"))
                .or_else(|| v.get("status_message"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        });
        from_json.unwrap_or_else(|| {
            let text = self.text();
            let trimmed = text.trim();
            if trimmed.is_empty() {
                format!("HTTP {} error", self.status)
            } else {
                trimmed.chars().take(300).collect()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_retry_after_seconds() {
        let r = response(429, &[("Retry-After", "12")], "");
        assert_eq!(r.retry_after(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_retry_after_past_date_is_zero() {
        let r = response(503, &[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")], "");
        assert_eq!(r.retry_after(), Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_after_garbage() {
        let r = response(503, &[("retry-after", "soon")], "");
        assert_eq!(r.retry_after(), None);
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            response(400, &[], r#"{"error":{"message":"bad model"}}"#).error_message(),
            "bad model"
        );
        assert_eq!(
            response(400, &[], r#"{"message":"nope"}"#).error_message(),
            "nope"
        );
        assert_eq!(
            response(500, &[], "upstream exploded").error_message(),
            "upstream exploded"
        );
        assert_eq!(response(502, &[], "").error_message(), "HTTP 502 error");
    }

    #[test]
    fn test_post_json_sets_headers() {
        let request = HttpRequest::post_json("https://x.test/v1", &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.headers["Content-Type"], "application/json");
        assert_eq!(request.body_text().as_deref(), Some(r#"{"a":1}"#));
    }
}
