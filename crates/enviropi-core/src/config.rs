//! Bridge configuration.
//!
//! Every field has a default, so a config file only needs the values that
//! differ from a stock installation. Missing sections and keys fall back to
//! [`BridgeConfig::default`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::W1_DEVICES_DIR;
use crate::sinks::air_quality::{DEFAULT_PUSH_URL, DEFAULT_SOFTWARE_VERSION};
use crate::sinks::InfluxTarget;
use crate::token::{Credentials, TokenStore};

const REDACTED: &str = "<redacted>";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    /// Read timeout; an idle port wakes the loop this often.
    pub read_timeout_ms: u64,
    /// Delay before reopening a port that failed or closed.
    pub reopen_delay_secs: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud: 9600,
            read_timeout_ms: 1000,
            reopen_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub min_interval_secs: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        let tags = [("location", "driveway"), ("device", "enviro+ arduino")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            enabled: true,
            host: "babbage.local".to_string(),
            port: 8086,
            username: "enviropi".to_string(),
            password: "enviropi".to_string(),
            database: "enviro_sensor_data".to_string(),
            measurement: "environmental".to_string(),
            tags,
            min_interval_secs: 0,
        }
    }
}

impl InfluxConfig {
    pub fn target(&self) -> InfluxTarget {
        InfluxTarget {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            measurement: self.measurement.clone(),
            tags: self
                .tags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Device serial sent with token requests; the CPU serial when unset.
    pub serial_number: Option<String>,
    pub token_file: PathBuf,
    pub renewal_period_secs: u64,
    pub min_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://iot.packets.global:443/api/1.0/".to_string(),
            username: None,
            password: None,
            serial_number: None,
            token_file: TokenStore::default_path(),
            renewal_period_secs: 25,
            min_interval_secs: 10,
        }
    }
}

impl TelemetryConfig {
    /// Both halves of the credentials, or `None` if either is missing.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) if !u.is_empty() => Some(Credentials {
                username: u.clone(),
                password: p.clone(),
            }),
            _ => None,
        }
    }

    pub fn renewal_period(&self) -> Duration {
        Duration::from_secs(self.renewal_period_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirQualityConfig {
    pub enabled: bool,
    pub url: String,
    /// `X-Sensor` header; `raspi-<last 8 of CPU serial>` when unset.
    pub sensor_id: Option<String>,
    pub software_version: String,
    pub min_interval_secs: u64,
}

impl Default for AirQualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_PUSH_URL.to_string(),
            sensor_id: None,
            software_version: DEFAULT_SOFTWARE_VERSION.to_string(),
            min_interval_secs: 60,
        }
    }
}

impl AirQualityConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub enabled: bool,
    /// A specific 1-Wire device directory. Discovered under
    /// `w1_devices_dir` when unset.
    pub device: Option<PathBuf>,
    pub w1_devices_dir: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: None,
            w1_devices_dir: PathBuf::from(W1_DEVICES_DIR),
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub serial: SerialConfig,
    pub influx: InfluxConfig,
    pub telemetry: TelemetryConfig,
    pub air_quality: AirQualityConfig,
    pub probe: ProbeConfig,
    pub http_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            influx: InfluxConfig::default(),
            telemetry: TelemetryConfig::default(),
            air_quality: AirQualityConfig::default(),
            probe: ProbeConfig::default(),
            http_timeout_secs: 30,
        }
    }
}

impl BridgeConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// A copy safe to print: every password replaced.
    pub fn redacted(&self) -> Self {
        let mut out = self.clone();
        out.influx.password = REDACTED.to_string();
        if out.telemetry.password.is_some() {
            out.telemetry.password = Some(REDACTED.to_string());
        }
        out
    }
}
