//! Downstream destinations for finalized reading sets.
//!
//! Every sink implements [`Sink`]. The [`Dispatcher`](crate::dispatch::Dispatcher)
//! gates each one behind its own rate-limit window; a sink only has to know
//! how to deliver one reading set and how to describe its failures.

pub mod air_quality;
pub mod influx;
pub mod telemetry;

use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::http::TransportError;
use crate::reading::ReadingSet;
use crate::token::AuthError;

pub use air_quality::AirQualitySink;
pub use influx::{InfluxClient, InfluxSink, InfluxTarget};
pub use telemetry::TelemetrySink;

/// Which downstream a sink feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    /// InfluxDB time-series store.
    TimeSeries,
    /// Private token-gated telemetry collector.
    Telemetry,
    /// Public Sensor.Community air-quality API.
    AirQuality,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeSeries => write!(f, "influx"),
            Self::Telemetry => write!(f, "telemetry"),
            Self::AirQuality => write!(f, "air-quality"),
        }
    }
}

/// The moment a reading set was finalized, on both clocks a sink may need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// For rate limiting and token renewal.
    pub monotonic: Instant,
    /// Wall-clock seconds since the Unix epoch, for stored records.
    pub unix_secs: u64,
}

impl Timestamp {
    pub fn now() -> Self {
        Self {
            monotonic: Instant::now(),
            unix_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("no usable token: {0}")]
    Auth(#[from] AuthError),
    #[error("{host} rejected the token (HTTP 401); {reacquire}")]
    Unauthorized { host: String, reacquire: String },
    #[error("{host} responded with HTTP {status}: {body}")]
    Status {
        host: String,
        status: u16,
        body: String,
    },
    #[error("database '{database}' not found on {host}")]
    DatabaseNotFound { database: String, host: String },
    #[error("unexpected response from {host}: {detail}")]
    InvalidResponse { host: String, detail: String },
    #[error("{failed} of {attempted} submissions to {host} failed: {details}")]
    Partial {
        host: String,
        attempted: usize,
        failed: usize,
        details: String,
    },
}

/// One downstream destination.
pub trait Sink {
    fn kind(&self) -> SinkKind;

    /// Host the sink talks to, for diagnostics.
    fn target(&self) -> &str;

    /// Deliver one reading set. Called at most once per admitted window.
    fn send(&mut self, readings: &ReadingSet, at: &Timestamp) -> Result<(), SinkError>;
}
