//! Blocking HTTP seam shared by every network sink.
//!
//! Sinks build an [`HttpRequest`] and hand it to an [`HttpTransport`]. A
//! non-2xx status is an ordinary [`HttpResponse`]; only failures to talk to
//! the server at all surface as [`TransportError`].

use std::error::Error as _;
use std::fmt;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// `Authorization: Basic` for `user:password`. Keeps credentials out of
    /// the URL, which shows up in transport errors and request logs.
    pub fn basic_auth(self, user: &str, password: &str) -> Self {
        let encoded = BASE64_STANDARD.encode(format!("{user}:{password}"));
        self.header("Authorization", &format!("Basic {encoded}"))
    }

    /// Attach a JSON body and the matching content type.
    pub fn json(self, body: &serde_json::Value) -> Self {
        let mut req = self.header("Content-Type", "application/json");
        req.body = Some(body.to_string());
        req
    }

    /// Attach a plain-text body (used for line protocol).
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn host(&self) -> &str {
        host_of(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body pretty-printed if it is JSON, verbatim otherwise.
    pub fn body_for_log(&self) -> String {
        if self.body.is_empty() {
            return "Empty response".to_string();
        }
        serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| serde_json::to_string_pretty(&v).ok())
            .unwrap_or_else(|| self.body.clone())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },
    #[error("reading response body from {host} failed: {message}")]
    Body { host: String, message: String },
}

/// Something that can execute a request synchronously.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by a `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .redirects(0)
            .user_agent(concat!("enviropi/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }
}

impl HttpTransport for UreqTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let host = request.host().to_string();

        let mut req = self.agent.request(request.method.as_str(), &request.url);
        for (k, v) in &request.query {
            req = req.query(k, v);
        }
        for (k, v) in &request.headers {
            req = req.set(k, v);
        }

        let result = match &request.body {
            Some(body) => req.send_string(body),
            None => req.call(),
        };

        match result {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.into_string().map_err(|e| TransportError::Body {
                    host,
                    message: e.to_string(),
                })?;
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Status(status, resp)) => Ok(HttpResponse {
                status,
                body: resp.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(t)) => Err(TransportError::Connection {
                host,
                message: transport_message(&t),
            }),
        }
    }
}

/// Describe a ureq transport failure without its URL, whose query string
/// may carry secrets.
fn transport_message(t: &ureq::Transport) -> String {
    let mut message = t.kind().to_string();
    if let Some(detail) = t.message() {
        message.push_str(": ");
        message.push_str(detail);
    }
    if let Some(source) = t.source() {
        message.push_str(": ");
        message.push_str(&source.to_string());
    }
    message
}

/// Host (with port, if given) of an absolute URL; the input itself otherwise.
pub fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let end = rest.find(['/', '?']).unwrap_or(rest.len());
    &rest[..end]
}

/// Join a base URL and a relative path with exactly one `/` between them.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://iot.packets.global:443/api/1.0/"), "iot.packets.global:443");
        assert_eq!(host_of("http://babbage.local:8086/write?db=x"), "babbage.local:8086");
        assert_eq!(host_of("api.luftdaten.info"), "api.luftdaten.info");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://h/api/1.0/", "token/request"),
            "https://h/api/1.0/token/request"
        );
        assert_eq!(join_url("http://h", "/write"), "http://h/write");
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let req = HttpRequest::new(Method::Post, "http://h/x").json(&serde_json::json!({"a": 1}));
        assert_eq!(req.header_value("content-type"), Some("application/json"));
        assert_eq!(req.body.as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_basic_auth_header() {
        let req = HttpRequest::new(Method::Get, "http://h/query").basic_auth("enviropi", "pw");
        // base64("enviropi:pw")
        assert_eq!(req.header_value("authorization"), Some("Basic ZW52aXJvcGk6cHc="));
        assert!(req.query.is_empty());
    }

    #[test]
    fn test_connection_error_omits_query_string() {
        let transport = UreqTransport::new(Duration::from_secs(2));
        let req = HttpRequest::new(Method::Get, "http://127.0.0.1:1/query")
            .query("token", "TopSecretPw");
        let err = transport.execute(&req).unwrap_err();
        assert!(matches!(err, TransportError::Connection { .. }));
        let text = err.to_string();
        assert!(text.contains("127.0.0.1:1"), "{text}");
        assert!(!text.contains("TopSecretPw"), "{text}");
    }

    #[test]
    fn test_success_range() {
        let ok = HttpResponse { status: 204, body: String::new() };
        let unauthorized = HttpResponse { status: 401, body: String::new() };
        assert!(ok.is_success());
        assert!(!unauthorized.is_success());
        assert_eq!(ok.body_for_log(), "Empty response");
    }
}
