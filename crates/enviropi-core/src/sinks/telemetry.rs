//! Private telemetry collector (`{base}collector/environment`).

use std::sync::Arc;

use log::debug;
use serde_json::{Map, Value, json};

use super::{Sink, SinkError, SinkKind, Timestamp};
use crate::fields::split_telemetry;
use crate::http::{HttpRequest, HttpTransport, Method, host_of, join_url};
use crate::reading::{FieldValue, ReadingSet};
use crate::token::TokenManager;

pub struct TelemetrySink {
    transport: Arc<dyn HttpTransport>,
    tokens: TokenManager,
    url: String,
    host: String,
}

impl TelemetrySink {
    /// The sink shares the token manager's base URL and transport.
    pub fn new(transport: Arc<dyn HttpTransport>, tokens: TokenManager) -> Self {
        let url = join_url(tokens.base_url(), "collector/environment");
        let host = host_of(&url).to_string();
        Self {
            transport,
            tokens,
            url,
            host,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }
}

/// `environment_data` object for one reading set.
pub fn environment_data(readings: &ReadingSet) -> Value {
    let (mapped, dropped) = split_telemetry(readings);
    if !dropped.is_empty() {
        debug!("telemetry: not forwarding {}", dropped.join(", "));
    }
    let map: Map<String, Value> = mapped
        .into_iter()
        .map(|(field, value)| {
            let v = match value {
                FieldValue::Int(i) => json!(i),
                FieldValue::Float(f) => json!(f),
            };
            (field.api_name().to_string(), v)
        })
        .collect();
    Value::Object(map)
}

impl Sink for TelemetrySink {
    fn kind(&self) -> SinkKind {
        SinkKind::Telemetry
    }

    fn target(&self) -> &str {
        &self.host
    }

    fn send(&mut self, readings: &ReadingSet, at: &Timestamp) -> Result<(), SinkError> {
        self.tokens.ensure_valid(false, at.monotonic)?;
        let token = self
            .tokens
            .token()
            .map(|t| t.raw.clone())
            .ok_or_else(|| SinkError::InvalidResponse {
                host: self.host.clone(),
                detail: "token missing after validation".to_string(),
            })?;

        let body = json!({
            "token": token,
            "environment_data": environment_data(readings),
        });
        debug!("telemetry: sending to {} with {}", self.url, body["environment_data"]);

        let request = HttpRequest::new(Method::Post, &self.url).json(&body);
        let response = self.transport.execute(&request)?;

        if response.is_success() {
            debug!("telemetry: OK from {}: {}", self.url, response.body_for_log());
            return Ok(());
        }
        if response.status == 401 {
            // Re-acquire now so the next reading cycle has a fresh token.
            // This attempt is still reported as failed.
            let reacquire = match self.tokens.ensure_valid(true, at.monotonic) {
                Ok(_) => "a new token has been acquired".to_string(),
                Err(e) => format!("requesting a new token failed: {e}"),
            };
            return Err(SinkError::Unauthorized {
                host: self.host.clone(),
                reacquire,
            });
        }
        Err(SinkError::Status {
            host: self.host.clone(),
            status: response.status,
            body: response.body_for_log(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    use super::*;
    use crate::http::{HttpResponse, TransportError};
    use crate::token::Credentials;

    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn push(&self, status: u16, body: &str) {
            self.responses.lock().unwrap().push_back(HttpResponse {
                status,
                body: body.to_string(),
            });
        }

        fn urls(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.url.clone())
                .collect()
        }
    }

    impl HttpTransport for Scripted {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or(HttpResponse {
                status: 200,
                body: "{}".into(),
            }))
        }
    }

    fn sink(t: &Arc<Scripted>) -> TelemetrySink {
        let tokens = TokenManager::new(
            t.clone(),
            "https://iot.example:443/api/1.0/",
            Credentials {
                username: "u".into(),
                password: "p".into(),
            },
            "serial",
        );
        TelemetrySink::new(t.clone(), tokens)
    }

    fn readings() -> ReadingSet {
        [
            ("pm2", FieldValue::Int(7)),
            ("real_temp", FieldValue::Float(18.5)),
            ("sound_level", FieldValue::Float(3.2)),
        ]
        .into_iter()
        .collect()
    }

    fn at() -> Timestamp {
        Timestamp {
            monotonic: Instant::now(),
            unix_secs: 1_700_000_000,
        }
    }

    #[test]
    fn test_environment_data_maps_known_fields_only() {
        let data = environment_data(&readings());
        assert_eq!(data, json!({"pm2_5ug_m3": 7, "temperature": 18.5}));
    }

    #[test]
    fn test_send_acquires_then_posts() {
        let t = Arc::new(Scripted::default());
        t.push(200, r#"{"token":"tok"}"#);
        t.push(200, r#"{"status":"ok"}"#);
        let mut s = sink(&t);

        s.send(&readings(), &at()).unwrap();
        assert_eq!(
            t.urls(),
            vec![
                "https://iot.example:443/api/1.0/token/request",
                "https://iot.example:443/api/1.0/collector/environment",
            ]
        );
        let post = &t.requests.lock().unwrap()[1];
        let body: Value = serde_json::from_str(post.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["token"], json!({"token": "tok"}));
        assert_eq!(body["environment_data"]["temperature"], json!(18.5));
        assert_eq!(s.target(), "iot.example:443");
    }

    #[test]
    fn test_unauthorized_forces_reacquire_without_retry() {
        let t = Arc::new(Scripted::default());
        t.push(200, r#"{"token":"stale"}"#);
        t.push(401, r#"{"error":"expired"}"#);
        t.push(200, r#"{"token":"fresh"}"#);
        let mut s = sink(&t);

        let err = s.send(&readings(), &at()).unwrap_err();
        assert!(matches!(err, SinkError::Unauthorized { .. }));
        assert!(err.to_string().contains("a new token has been acquired"), "{err}");
        // request, collector (401), request again; no second collector POST.
        let urls = t.urls();
        assert_eq!(urls.len(), 3);
        assert!(urls[2].ends_with("token/request"));
        assert_eq!(s.tokens().token().unwrap().raw, json!({"token": "fresh"}));
    }

    #[test]
    fn test_unauthorized_reports_failed_reacquire() {
        let t = Arc::new(Scripted::default());
        t.push(200, r#"{"token":"stale"}"#);
        t.push(401, "");
        t.push(503, "maintenance");
        let mut s = sink(&t);

        let err = s.send(&readings(), &at()).unwrap_err();
        let SinkError::Unauthorized { reacquire, .. } = &err else {
            panic!("expected Unauthorized, got {err:?}");
        };
        assert!(reacquire.starts_with("requesting a new token failed"), "{reacquire}");
        assert!(s.tokens().token().is_none());
    }

    #[test]
    fn test_acquire_failure_skips_post() {
        let t = Arc::new(Scripted::default());
        t.push(500, "down");
        let mut s = sink(&t);
        assert!(matches!(
            s.send(&readings(), &at()),
            Err(SinkError::Auth(_))
        ));
        assert_eq!(t.urls().len(), 1);
    }

    #[test]
    fn test_other_status_is_plain_failure() {
        let t = Arc::new(Scripted::default());
        t.push(200, r#"{"token":"tok"}"#);
        t.push(503, "");
        let mut s = sink(&t);
        assert!(matches!(
            s.send(&readings(), &at()),
            Err(SinkError::Status { status: 503, .. })
        ));
        assert_eq!(t.urls().len(), 2);
    }
}
