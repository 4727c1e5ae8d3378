//! Sensor.Community (formerly Luftdaten) push API.
//!
//! One reading set becomes two submissions, one per [`AirQualityCategory`],
//! told apart by the `X-PIN` header. Both are always attempted.

use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use super::{Sink, SinkError, SinkKind, Timestamp};
use crate::fields::{AirQualityCategory, air_quality_dropped, air_quality_values};
use crate::http::{HttpRequest, HttpTransport, Method, host_of};
use crate::reading::{FieldValue, ReadingSet};

pub const DEFAULT_PUSH_URL: &str = "https://api.luftdaten.info/v1/push-sensor-data/";
pub const DEFAULT_SOFTWARE_VERSION: &str = "nhorlock/enviropi";

#[derive(Debug, Serialize, PartialEq)]
struct SensorDataValue {
    value_type: &'static str,
    value: FieldValue,
}

#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<&'a str>,
    software_version: &'a str,
    sensordatavalues: Vec<SensorDataValue>,
}

pub struct AirQualitySink {
    transport: Arc<dyn HttpTransport>,
    url: String,
    host: String,
    sensor_id: String,
    software_version: String,
}

impl AirQualitySink {
    /// `sensor_id` is the `X-Sensor` header, e.g. `raspi-24b3c744`.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        url: impl Into<String>,
        sensor_id: impl Into<String>,
        software_version: impl Into<String>,
    ) -> Self {
        let url = url.into();
        let host = host_of(&url).to_string();
        Self {
            transport,
            url,
            host,
            sensor_id: sensor_id.into(),
            software_version: software_version.into(),
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    fn request_for(
        &self,
        readings: &ReadingSet,
        category: AirQualityCategory,
        timestamp: Option<&str>,
    ) -> HttpRequest {
        let payload = PushPayload {
            timestamp,
            software_version: &self.software_version,
            sensordatavalues: air_quality_values(readings, category)
                .into_iter()
                .map(|(field, value)| SensorDataValue {
                    value_type: field.value_type(),
                    value,
                })
                .collect(),
        };
        // Serializing a struct of strings and numbers cannot fail.
        let body = serde_json::to_value(&payload).unwrap_or_default();

        HttpRequest::new(Method::Post, &self.url)
            .header("X-PIN", category.x_pin())
            .header("X-Sensor", &self.sensor_id)
            .header("cache-control", "no-cache")
            .json(&body)
    }

    /// Submit both categories, optionally back-dated to `timestamp`.
    ///
    /// Succeeds only when both submissions succeed.
    pub fn submit(&self, readings: &ReadingSet, timestamp: Option<&str>) -> Result<(), SinkError> {
        let dropped = air_quality_dropped(readings);
        if !dropped.is_empty() {
            debug!("air-quality: not forwarding {}", dropped.join(", "));
        }

        let mut failures = Vec::new();
        for category in AirQualityCategory::ALL {
            let request = self.request_for(readings, category, timestamp);
            match self.transport.execute(&request) {
                Ok(resp) if resp.is_success() => {
                    debug!("air-quality {category}: HTTP {}", resp.status);
                }
                Ok(resp) => {
                    warn!("air-quality {category}: HTTP {} {}", resp.status, resp.body);
                    failures.push(format!("{category}: HTTP {}", resp.status));
                }
                Err(e) => {
                    warn!("air-quality {category}: {e}");
                    failures.push(format!("{category}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Partial {
                host: self.host.clone(),
                attempted: AirQualityCategory::ALL.len(),
                failed: failures.len(),
                details: failures.join("; "),
            })
        }
    }
}

impl Sink for AirQualitySink {
    fn kind(&self) -> SinkKind {
        SinkKind::AirQuality
    }

    fn target(&self) -> &str {
        &self.host
    }

    fn send(&mut self, readings: &ReadingSet, _at: &Timestamp) -> Result<(), SinkError> {
        self.submit(readings, None)
    }
}
