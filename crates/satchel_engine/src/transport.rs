//! HTTP transport abstraction.
//!
//! The engine talks to the backend through the [`HttpTransport`] trait so
//! the actual client (reqwest, hyper, a platform bridge) is injected at
//! construction time and replaced with [`MockTransport`] in tests.
//! Implementations own bearer-token authentication and connection
//! management; the engine applies per-call timeouts on top.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

/// HTTP method for a transport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET.
    Get,
    /// HTTP POST.
    Post,
    /// HTTP PUT.
    Put,
    /// HTTP DELETE.
    Delete,
}

impl Method {
    /// Returns the method name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body; `Null` when the response had none.
    pub body: Value,
}

impl HttpResponse {
    /// Creates a 200 response with the given body.
    #[must_use]
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    /// Creates a response with an explicit status.
    #[must_use]
    pub fn with_status(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Authenticated JSON transport to the backend.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends one JSON request and returns the decoded response.
    ///
    /// Non-2xx statuses are returned as responses, not errors; `Err` is
    /// reserved for failures to complete the exchange at all.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> SyncResult<HttpResponse>;
}

/// One scripted reply for [`MockTransport`].
#[derive(Debug)]
enum Script {
    Respond(HttpResponse),
    Fail { message: String, retryable: bool },
}

/// A request observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// The method used.
    pub method: Method,
    /// The request path, including any query string.
    pub path: String,
    /// The request body, if one was sent.
    pub body: Option<Value>,
}

/// A scripted transport for tests.
///
/// Responses are queued per `(method, path)` and consumed in order; when a
/// route's queue is empty the default response is returned, if one is set.
#[derive(Debug, Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<(Method, String), VecDeque<Script>>>,
    default_response: Mutex<Option<HttpResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    /// Creates a new mock transport with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for a route.
    pub fn respond(&self, method: Method, path: impl Into<String>, response: HttpResponse) {
        self.scripts
            .lock()
            .entry((method, path.into()))
            .or_default()
            .push_back(Script::Respond(response));
    }

    /// Queues a transport failure for a route.
    pub fn fail(&self, method: Method, path: impl Into<String>, retryable: bool) {
        self.scripts
            .lock()
            .entry((method, path.into()))
            .or_default()
            .push_back(Script::Fail {
                message: "scripted transport failure".into(),
                retryable,
            });
    }

    /// Sets the response used when no script matches.
    pub fn set_default_response(&self, response: HttpResponse) {
        *self.default_response.lock() = Some(response);
    }

    /// Delays every request by the given duration.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Returns every request seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Returns the requests seen for a given path.
    #[must_use]
    pub fn requests_for(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> SyncResult<HttpResponse> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.requests.lock().push(RecordedRequest {
            method,
            path: path.to_string(),
            body,
        });

        let script = self
            .scripts
            .lock()
            .get_mut(&(method, path.to_string()))
            .and_then(VecDeque::pop_front);

        match script {
            Some(Script::Respond(response)) => Ok(response),
            Some(Script::Fail { message, retryable }) => Err(SyncError::Transport {
                message,
                retryable,
            }),
            None => self
                .default_response
                .lock()
                .clone()
                .ok_or_else(|| SyncError::transport_fatal(format!("no mock response for {method} {path}"))),
        }
    }
}
