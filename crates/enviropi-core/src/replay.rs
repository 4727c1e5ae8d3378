//! Back-fill the air-quality API from readings already stored in InfluxDB.
//!
//! Used after an outage of the public API: the time-series store kept every
//! reading, so the gap can be resubmitted with the original timestamps.

use log::{info, warn};
use thiserror::Error;

use crate::sinks::{AirQualitySink, InfluxClient, SinkError};

/// Stored fields the air-quality API accepts.
pub const REPLAY_FIELDS: &[&str] = &["real_temp", "humidity", "pressure", "pm1", "pm10", "pm2"];

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("invalid time bound {0:?}: expected an RFC 3339 timestamp")]
    InvalidBound(String),
    #[error("querying stored readings failed: {0}")]
    Query(#[source] SinkError),
}

/// Result of resubmitting one stored row.
#[derive(Debug)]
pub struct ReplayRow {
    pub time: String,
    pub result: Result<(), SinkError>,
}

#[derive(Debug, Default)]
pub struct ReplaySummary {
    pub rows: Vec<ReplayRow>,
}

impl ReplaySummary {
    pub fn submitted(&self) -> usize {
        self.rows.iter().filter(|r| r.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.rows.len() - self.submitted()
    }
}

fn check_bound(bound: &str) -> Result<&str, ReplayError> {
    let ok = bound.len() >= 10
        && bound.as_bytes()[0].is_ascii_digit()
        && bound
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | ':' | '.' | '+'));
    if ok {
        Ok(bound)
    } else {
        Err(ReplayError::InvalidBound(bound.to_string()))
    }
}

/// InfluxQL selecting the replayable fields strictly between `from` and
/// `to`, newest first.
pub fn replay_query(measurement: &str, from: &str, to: &str) -> Result<String, ReplayError> {
    let from = check_bound(from)?;
    let to = check_bound(to)?;
    Ok(format!(
        "select {} from \"{}\" where time < '{to}' and time > '{from}' order by time desc",
        REPLAY_FIELDS.join(", "),
        measurement.replace('"', "\\\""),
    ))
}

/// Resubmit every stored reading in `(from, to)` to the air-quality API.
///
/// Rows are submitted back to back without rate limiting; a failed row is
/// recorded and the replay moves on.
pub fn replay(
    influx: &InfluxClient,
    air_quality: &AirQualitySink,
    from: &str,
    to: &str,
) -> Result<ReplaySummary, ReplayError> {
    let q = replay_query(&influx.target().measurement, from, to)?;
    let stored = influx.query(&q).map_err(ReplayError::Query)?;
    info!("replaying {} stored reading(s) from {from} to {to}", stored.len());

    let mut summary = ReplaySummary::default();
    for row in stored {
        let result = air_quality.submit(&row.readings, Some(&row.time));
        if let Err(e) = &result {
            warn!("replay {}: {e}", row.time);
        }
        summary.rows.push(ReplayRow {
            time: row.time,
            result,
        });
    }
    Ok(summary)
}
