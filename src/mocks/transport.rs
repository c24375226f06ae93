//! Mock transport for testing.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::errors::{GatewayError, GatewayResult};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};

/// A recorded request for verification.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: Method,
    /// Request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<Bytes>,
}

impl RecordedRequest {
    /// Header value, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        self.body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }

    /// Body as text.
    pub fn text(&self) -> String {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

/// A mock response to return.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Bytes,
    /// Delay before answering.
    pub delay: Option<Duration>,
    /// Fail with a connection error instead of answering.
    pub connection_error: Option<String>,
}

impl MockResponse {
    /// Creates a response with a raw body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
            delay: None,
            connection_error: None,
        }
    }

    /// Creates a successful JSON response.
    pub fn json(body: impl serde::Serialize) -> Self {
        let body = serde_json::to_vec(&body).unwrap_or_default();
        Self::new(200, body).with_header("content-type", "application/json")
    }

    /// Creates an error response.
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({"error": {"message": message, "type": "error"}});
        Self::new(status, body.to_string()).with_header("content-type", "application/json")
    }

    /// Creates a rate limit error response.
    pub fn rate_limited(retry_after: u64) -> Self {
        Self::error(429, "Rate limit exceeded").with_header("retry-after", retry_after.to_string())
    }

    /// Creates a transport-level failure.
    pub fn connection_failure(message: &str) -> Self {
        let mut response = Self::new(0, Bytes::new());
        response.connection_error = Some(message.to_string());
        response
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Delays the response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<MockResponse>,
    routes: Vec<(String, MockResponse)>,
    requests: Vec<RecordedRequest>,
}

/// Mock transport for testing.
///
/// Requests whose URL contains a registered route fragment get that route's
/// response every time. Anything else is answered from the FIFO queue, then
/// from the default response.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<State>,
    default_response: Option<MockResponse>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a response to the queue.
    pub fn enqueue_response(&self, response: MockResponse) {
        self.state.lock().queue.push_back(response);
    }

    /// Answers every request whose URL contains `fragment` with `response`.
    pub fn route(&self, fragment: &str, response: MockResponse) {
        self.state.lock().routes.push((fragment.to_string(), response));
    }

    /// Sets a default response for when the queue is empty.
    pub fn set_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = Some(response);
        self
    }

    /// Gets all recorded requests.
    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Gets the last recorded request.
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.state.lock().requests.last().cloned()
    }

    /// Returns the number of requests made.
    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Number of requests whose URL contains `fragment`.
    pub fn request_count_for(&self, fragment: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.url.contains(fragment))
            .count()
    }

    fn next_response(&self, request: HttpRequest) -> Option<MockResponse> {
        let mut state = self.state.lock();
        let routed = state
            .routes
            .iter()
            .find(|(fragment, _)| request.url.contains(fragment.as_str()))
            .map(|(_, response)| response.clone());
        state.requests.push(RecordedRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            body: request.body,
        });
        routed
            .or_else(|| state.queue.pop_front())
            .or_else(|| self.default_response.clone())
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> GatewayResult<HttpResponse> {
        let Some(response) = self.next_response(request) else {
            return Err(GatewayError::Connection {
                message: "no mock response queued".to_string(),
            });
        };

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = response.connection_error {
            return Err(GatewayError::Connection { message });
        }

        Ok(HttpResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_default() {
        let transport = MockTransport::new().set_default_response(MockResponse::error(500, "down"));
        transport.enqueue_response(MockResponse::json(serde_json::json!({"ok": true})));

        let first = transport
            .send(HttpRequest::new(Method::GET, "https://api.test/a"))
            .await
            .unwrap();
        let second = transport
            .send(HttpRequest::new(Method::GET, "https://api.test/b"))
            .await
            .unwrap();

        assert_eq!(first.status, 200);
        assert_eq!(second.status, 500);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_routes_take_precedence() {
        let transport = MockTransport::new();
        transport.route("/scrape", MockResponse::error(404, "gone"));
        transport.enqueue_response(MockResponse::json(serde_json::json!([])));

        let routed = transport
            .send(HttpRequest::new(Method::POST, "https://api.test/v1/scrape"))
            .await
            .unwrap();
        assert_eq!(routed.status, 404);
        assert_eq!(transport.request_count_for("/scrape"), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_and_empty_queue() {
        let transport = MockTransport::new();
        transport.enqueue_response(MockResponse::connection_failure("reset"));

        let err = transport
            .send(HttpRequest::new(Method::GET, "https://api.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Connection { .. }));

        let err = transport
            .send(HttpRequest::new(Method::GET, "https://api.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Connection { .. }));
    }
}
