//! InfluxDB 1.x over its HTTP API: line-protocol writes and InfluxQL reads.

use std::sync::Arc;

use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use super::{Sink, SinkError, SinkKind, Timestamp};
use crate::http::{HttpRequest, HttpTransport, Method};
use crate::reading::{FieldValue, ReadingSet};

/// Where and how readings are stored.
#[derive(Debug, Clone)]
pub struct InfluxTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub measurement: String,
    /// Fixed tags added to every point, e.g. `location` and `device`.
    pub tags: Vec<(String, String)>,
}

impl InfluxTarget {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A row returned by [`InfluxClient::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReading {
    /// The `time` column exactly as the server returned it.
    pub time: String,
    pub readings: ReadingSet,
}

// ---------------------------------------------------------------------------
// Line protocol
// ---------------------------------------------------------------------------

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// Render one point: `measurement,tag=v field=1i,other=2.5 1700000000`.
///
/// Non-finite floats cannot be represented and are left out. Returns `None`
/// when no field survives, since a point without fields is invalid.
pub fn to_line_protocol(
    measurement: &str,
    tags: &[(String, String)],
    readings: &ReadingSet,
    unix_secs: u64,
) -> Option<String> {
    let fields: Vec<String> = readings
        .iter()
        .filter_map(|(key, value)| match value {
            FieldValue::Int(v) => Some(format!("{}={v}i", escape_key(key))),
            FieldValue::Float(v) if v.is_finite() => Some(format!("{}={v}", escape_key(key))),
            FieldValue::Float(v) => {
                warn!("dropping non-finite field {key}={v}");
                None
            }
        })
        .collect();
    if fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(measurement);
    for (k, v) in tags {
        line.push(',');
        line.push_str(&escape_key(k));
        line.push('=');
        line.push_str(&escape_key(v));
    }
    line.push(' ');
    line.push_str(&fields.join(","));
    line.push(' ');
    line.push_str(&unix_secs.to_string());
    Some(line)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct Series {
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

pub struct InfluxClient {
    transport: Arc<dyn HttpTransport>,
    target: InfluxTarget,
}

impl InfluxClient {
    pub fn new(transport: Arc<dyn HttpTransport>, target: InfluxTarget) -> Self {
        Self { transport, target }
    }

    pub fn target(&self) -> &InfluxTarget {
        &self.target
    }

    fn authed(&self, request: HttpRequest) -> HttpRequest {
        request.basic_auth(&self.target.username, &self.target.password)
    }

    /// Write one point at second precision.
    pub fn write(&self, readings: &ReadingSet, unix_secs: u64) -> Result<(), SinkError> {
        let Some(line) = to_line_protocol(
            &self.target.measurement,
            &self.target.tags,
            readings,
            unix_secs,
        ) else {
            debug!("nothing to write for an empty reading set");
            return Ok(());
        };
        debug!("influx write: {line}");

        let request = self.authed(
            HttpRequest::new(Method::Post, format!("{}/write", self.target.base_url()))
                .query("db", &self.target.database)
                .query("precision", "s")
                .text(line),
        );

        let response = self.transport.execute(&request)?;
        match response.status {
            s if (200..300).contains(&s) => Ok(()),
            404 => Err(SinkError::DatabaseNotFound {
                database: self.target.database.clone(),
                host: self.target.endpoint(),
            }),
            status => Err(SinkError::Status {
                host: self.target.endpoint(),
                status,
                body: response.body,
            }),
        }
    }

    /// Run an InfluxQL query and flatten its first series into rows.
    ///
    /// Null columns are left out of each row's reading set; non-numeric
    /// columns other than `time` are ignored.
    pub fn query(&self, q: &str) -> Result<Vec<StoredReading>, SinkError> {
        let request = self.authed(
            HttpRequest::new(Method::Get, format!("{}/query", self.target.base_url()))
                .query("db", &self.target.database)
                .query("q", q),
        );

        let response = self.transport.execute(&request)?;
        let host = self.target.endpoint();

        let parsed: QueryResponse = match serde_json::from_str(&response.body) {
            Ok(p) => p,
            Err(_) if !response.is_success() => {
                return Err(SinkError::Status {
                    host,
                    status: response.status,
                    body: response.body,
                });
            }
            Err(e) => {
                return Err(SinkError::InvalidResponse {
                    host,
                    detail: e.to_string(),
                });
            }
        };

        if let Some(detail) = parsed
            .error
            .or_else(|| parsed.results.iter().find_map(|r| r.error.clone()))
        {
            return Err(SinkError::InvalidResponse { host, detail });
        }
        if !response.is_success() {
            return Err(SinkError::Status {
                host,
                status: response.status,
                body: response.body,
            });
        }

        let Some(series) = parsed.results.into_iter().flat_map(|r| r.series).next() else {
            return Ok(Vec::new());
        };
        let time_idx = series.columns.iter().position(|c| c == "time");

        let rows = series
            .values
            .into_iter()
            .map(|row| {
                let time = time_idx
                    .and_then(|i| row.get(i))
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                let readings = series
                    .columns
                    .iter()
                    .zip(row.iter())
                    .filter(|(col, _)| col.as_str() != "time")
                    .filter_map(|(col, v)| json_number(v).map(|n| (col.clone(), n)))
                    .collect();
                StoredReading { time, readings }
            })
            .collect();
        Ok(rows)
    }
}

fn json_number(v: &Value) -> Option<FieldValue> {
    let Value::Number(n) = v else {
        return None;
    };
    n.as_i64()
        .map(FieldValue::Int)
        .or_else(|| n.as_f64().map(FieldValue::Float))
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

pub struct InfluxSink {
    client: InfluxClient,
    endpoint: String,
}

impl InfluxSink {
    pub fn new(client: InfluxClient) -> Self {
        let endpoint = client.target().endpoint();
        Self { client, endpoint }
    }
}

impl Sink for InfluxSink {
    fn kind(&self) -> SinkKind {
        SinkKind::TimeSeries
    }

    fn target(&self) -> &str {
        &self.endpoint
    }

    fn send(&mut self, readings: &ReadingSet, at: &Timestamp) -> Result<(), SinkError> {
        self.client.write(readings, at.unix_secs)
    }
}
