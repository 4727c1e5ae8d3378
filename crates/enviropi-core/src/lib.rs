//! # enviropi-core
//!
//! Host-side half of an environmental sensor station. A microcontroller
//! prints readings over a serial link as `BEGIN` / `key=value` / `END`
//! blocks; this crate reassembles each block into a [`ReadingSet`], adds a
//! locally measured temperature, and forwards the result to up to three
//! sinks:
//!
//! - an InfluxDB 1.x time-series database,
//! - a private telemetry collector that requires a renewable token,
//! - the public Sensor.Community air-quality API.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use std::time::Duration;
//!
//! use enviropi_core::{
//!     Bridge, BridgeConfig, Dispatcher, InfluxClient, InfluxSink, LineParser, NoProbe,
//!     UreqTransport,
//! };
//!
//! let config = BridgeConfig::default();
//! let transport = Arc::new(UreqTransport::new(config.http_timeout()));
//!
//! let mut dispatcher = Dispatcher::new();
//! let influx = InfluxClient::new(transport, config.influx.target());
//! dispatcher.add_sink(Box::new(InfluxSink::new(influx)), Duration::ZERO);
//!
//! let mut bridge = Bridge::new(LineParser::new(Box::new(NoProbe)), dispatcher);
//! let input = std::io::Cursor::new("BEGIN\npm2=7\nEND\n");
//! let stats = bridge.run(input, &AtomicBool::new(true));
//! println!("{} reading set(s)", stats.reading_sets);
//! ```
//!
//! ## Architecture
//!
//! serial lines → [`LineParser`] → [`Dispatcher`] → per-sink
//! [`RateLimitWindow`] → [`Sink`]
//!
//! Everything runs on one thread and blocks. Network access goes through
//! the [`HttpTransport`] trait and the thermometer through
//! [`TemperatureProbe`], so the whole pipeline can be driven in tests with
//! scripted responses and explicit instants.

pub mod bridge;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod fields;
pub mod http;
pub mod probe;
pub mod protocol;
pub mod ratelimit;
pub mod reading;
pub mod replay;
pub mod sinks;
pub mod token;

pub use bridge::{Bridge, BridgeStats};
pub use config::{
    AirQualityConfig, BridgeConfig, ConfigError, InfluxConfig, ProbeConfig, SerialConfig,
    TelemetryConfig,
};
pub use device::{air_quality_sensor_id, cpu_serial, short_serial};
pub use dispatch::{DispatchOutcome, DispatchReport, Dispatcher};
pub use fields::{AirQualityCategory, AirQualityField, TelemetryField};
pub use http::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError, UreqTransport};
pub use probe::{NoProbe, ProbeError, TemperatureProbe, W1ThermProbe};
pub use protocol::{LineParser, ParserState, ParserStats, ProtocolError, parse_field};
pub use ratelimit::RateLimitWindow;
pub use reading::{FieldValue, ReadingSet};
pub use replay::{ReplayError, ReplaySummary, replay};
pub use sinks::{
    AirQualitySink, InfluxClient, InfluxSink, InfluxTarget, Sink, SinkError, SinkKind,
    TelemetrySink, Timestamp,
};
pub use token::{AuthError, Credentials, EnsureAction, Token, TokenManager, TokenStore};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
