//! Field-name tables for the downstream APIs.
//!
//! Each external API names the same physical quantities differently. The
//! mappings are closed enums so an unmapped reading is an explicit decision:
//! the split helpers hand back the dropped keys for the caller to log.

use std::fmt;

use crate::reading::{FieldValue, ReadingSet};

// ---------------------------------------------------------------------------
// Private telemetry API
// ---------------------------------------------------------------------------

/// Fields accepted by the telemetry collector's `environment_data` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryField {
    Temperature,
    CpuTemperature,
    Humidity,
    Pressure,
    Oxidising,
    Reducing,
    Nh3,
    Pm1,
    Pm2_5,
    Pm10,
    Pm1Atmos,
    Pm2_5Atmos,
    Pm10Atmos,
    Lux,
}

impl TelemetryField {
    pub const ALL: [Self; 14] = [
        Self::Temperature,
        Self::CpuTemperature,
        Self::Humidity,
        Self::Pressure,
        Self::Oxidising,
        Self::Reducing,
        Self::Nh3,
        Self::Pm1,
        Self::Pm2_5,
        Self::Pm10,
        Self::Pm1Atmos,
        Self::Pm2_5Atmos,
        Self::Pm10Atmos,
        Self::Lux,
    ];

    /// Key used on the serial link (or injected by the bridge).
    pub fn reading_key(self) -> &'static str {
        match self {
            Self::Temperature => "real_temp",
            Self::CpuTemperature => "ucontroller_cpu_temp",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Oxidising => "OX_raw",
            Self::Reducing => "RED_raw",
            Self::Nh3 => "NH3_raw",
            Self::Pm1 => "pm1",
            Self::Pm2_5 => "pm2",
            Self::Pm10 => "pm10",
            Self::Pm1Atmos => "pm1_atmos",
            Self::Pm2_5Atmos => "pm2_atmos",
            Self::Pm10Atmos => "pm10_atmos",
            Self::Lux => "lux",
        }
    }

    /// Key expected by the collector API.
    pub fn api_name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::CpuTemperature => "cpu_temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Oxidising => "oxidising",
            Self::Reducing => "reducing",
            Self::Nh3 => "nh3",
            Self::Pm1 => "pm1_0ug_m3",
            Self::Pm2_5 => "pm2_5ug_m3",
            Self::Pm10 => "pm10_0ug_m3",
            Self::Pm1Atmos => "pm1_0ug_m3_atmos",
            Self::Pm2_5Atmos => "pm2_5ug_m3_atmos",
            Self::Pm10Atmos => "pm10_0ug_m3_atmos",
            Self::Lux => "lux",
        }
    }

    pub fn from_reading_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.reading_key() == key)
    }
}

impl fmt::Display for TelemetryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Map a reading set onto telemetry fields.
///
/// Returns the mapped `(field, value)` pairs and the keys with no mapping.
pub fn split_telemetry(readings: &ReadingSet) -> (Vec<(TelemetryField, FieldValue)>, Vec<String>) {
    let mut mapped = Vec::new();
    let mut dropped = Vec::new();
    for (key, value) in readings.iter() {
        match TelemetryField::from_reading_key(key) {
            Some(field) => mapped.push((field, value)),
            None => dropped.push(key.to_string()),
        }
    }
    (mapped, dropped)
}

// ---------------------------------------------------------------------------
// Public air-quality API (Sensor.Community)
// ---------------------------------------------------------------------------

/// Which of the two per-sensor submissions a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AirQualityCategory {
    /// Particulate matter, reported as an SDS011-compatible sensor.
    Particulate,
    /// Temperature/humidity/pressure, reported as a BME280-compatible sensor.
    Environmental,
}

impl AirQualityCategory {
    pub const ALL: [Self; 2] = [Self::Particulate, Self::Environmental];

    /// Value of the `X-PIN` header that discriminates the submission.
    pub fn x_pin(self) -> &'static str {
        match self {
            Self::Particulate => "1",
            Self::Environmental => "11",
        }
    }
}

impl fmt::Display for AirQualityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Particulate => write!(f, "particulate"),
            Self::Environmental => write!(f, "environmental"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AirQualityField {
    /// PM1.0
    P0,
    /// PM2.5
    P2,
    /// PM10
    P1,
    Temperature,
    Humidity,
    Pressure,
}

impl AirQualityField {
    pub const ALL: [Self; 6] = [
        Self::P0,
        Self::P2,
        Self::P1,
        Self::Temperature,
        Self::Humidity,
        Self::Pressure,
    ];

    pub fn reading_key(self) -> &'static str {
        match self {
            Self::P0 => "pm1",
            Self::P2 => "pm2",
            Self::P1 => "pm10",
            Self::Temperature => "real_temp",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
        }
    }

    /// `value_type` string in the `sensordatavalues` array.
    pub fn value_type(self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P2 => "P2",
            Self::P1 => "P1",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
        }
    }

    pub fn category(self) -> AirQualityCategory {
        match self {
            Self::P0 | Self::P2 | Self::P1 => AirQualityCategory::Particulate,
            Self::Temperature | Self::Humidity | Self::Pressure => {
                AirQualityCategory::Environmental
            }
        }
    }

    pub fn from_reading_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.reading_key() == key)
    }
}

/// Values of one category, in reading-set key order.
pub fn air_quality_values(
    readings: &ReadingSet,
    category: AirQualityCategory,
) -> Vec<(AirQualityField, FieldValue)> {
    readings
        .iter()
        .filter_map(|(key, value)| AirQualityField::from_reading_key(key).map(|f| (f, value)))
        .filter(|(f, _)| f.category() == category)
        .collect()
}

/// Keys of a reading set that no air-quality submission carries.
pub fn air_quality_dropped(readings: &ReadingSet) -> Vec<String> {
    readings
        .keys()
        .filter(|k| AirQualityField::from_reading_key(k).is_none())
        .map(str::to_string)
        .collect()
}
