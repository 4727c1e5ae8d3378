//! The serial line protocol spoken by the sensor board.
//!
//! ```text
//! BEGIN
//! lux=112.4
//! pm1=12
//! END
//! ```
//!
//! One `key=value` per line between `BEGIN` and `END`. There is no checksum,
//! escaping or framing beyond the markers, so the parser is deliberately
//! forgiving: a bad line costs only that line, never the block.

use log::{debug, warn};
use thiserror::Error;

use crate::probe::TemperatureProbe;
use crate::reading::{FieldValue, ReadingSet};

/// Start-of-block marker.
pub const BEGIN_MARKER: &str = "BEGIN";
/// End-of-block marker.
pub const END_MARKER: &str = "END";
/// Key under which the bridge's own thermometer reading is merged.
pub const LOCAL_TEMPERATURE_FIELD: &str = "real_temp";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("expected exactly one '=' in line")]
    BadSeparator,
    #[error("empty field name")]
    EmptyKey,
    #[error("value '{0}' is not numeric")]
    InvalidValue(String),
}

/// Decode one `key=value` line.
///
/// The value is a float when it contains a decimal point and an integer
/// otherwise. Surrounding whitespace on key and value is ignored.
pub fn parse_field(line: &str) -> Result<(String, FieldValue), ProtocolError> {
    let mut parts = line.split('=');
    let (key, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(k), Some(v), None) => (k.trim(), v.trim()),
        _ => return Err(ProtocolError::BadSeparator),
    };

    if key.is_empty() {
        return Err(ProtocolError::EmptyKey);
    }

    let parsed = if value.contains('.') {
        value.parse::<f64>().map(FieldValue::Float).ok()
    } else {
        value.parse::<i64>().map(FieldValue::Int).ok()
    };

    parsed
        .map(|v| (key.to_string(), v))
        .ok_or_else(|| ProtocolError::InvalidValue(value.to_string()))
}

/// Render a reading set the way the peripheral prints it.
pub fn encode_block(readings: &ReadingSet) -> String {
    let mut out = String::with_capacity(16 + readings.len() * 16);
    out.push_str(BEGIN_MARKER);
    out.push('\n');
    for (key, value) in readings.iter() {
        out.push_str(key);
        out.push('=');
        out.push_str(&value.to_string());
        out.push('\n');
    }
    out.push_str(END_MARKER);
    out.push('\n');
    out
}

/// Parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Idle,
    Collecting,
}

/// Counters for what the parser has seen, for periodic status logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub blocks: u64,
    pub fields: u64,
    pub malformed: u64,
    pub noise: u64,
    pub restarts: u64,
}

/// `BEGIN`/`END` state machine that assembles [`ReadingSet`]s.
pub struct LineParser {
    state: ParserState,
    current: ReadingSet,
    probe: Box<dyn TemperatureProbe>,
    stats: ParserStats,
}

impl LineParser {
    pub fn new(probe: Box<dyn TemperatureProbe>) -> Self {
        Self {
            state: ParserState::Idle,
            current: ReadingSet::new(),
            probe,
            stats: ParserStats::default(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Feed one line. Returns the finalized reading set when `line` closes a block.
    pub fn feed(&mut self, line: &str) -> Option<ReadingSet> {
        let line = line.trim();

        match self.state {
            ParserState::Idle => {
                if line == BEGIN_MARKER {
                    self.start_block();
                } else {
                    self.stats.noise += 1;
                    debug!("data outside of BEGIN/END: {line}");
                }
                None
            }
            ParserState::Collecting => {
                if line == END_MARKER {
                    return Some(self.finish_block());
                }
                if line == BEGIN_MARKER {
                    // The END of the previous block was lost on the wire.
                    warn!(
                        "BEGIN while collecting; discarding {} partial field(s)",
                        self.current.len()
                    );
                    self.stats.restarts += 1;
                    self.start_block();
                    return None;
                }
                match parse_field(line) {
                    Ok((key, value)) => {
                        self.stats.fields += 1;
                        self.current.insert(key, value);
                    }
                    Err(e) => {
                        self.stats.malformed += 1;
                        warn!("decode failed: [{line}] {e}");
                    }
                }
                None
            }
        }
    }

    fn start_block(&mut self) {
        self.current.clear();
        self.state = ParserState::Collecting;
    }

    fn finish_block(&mut self) -> ReadingSet {
        self.state = ParserState::Idle;
        self.stats.blocks += 1;

        let mut readings = std::mem::take(&mut self.current);
        match self.probe.read_celsius() {
            Ok(celsius) => {
                readings.insert(LOCAL_TEMPERATURE_FIELD, celsius);
            }
            Err(e) => warn!("local temperature unavailable: {e}"),
        }
        readings
    }
}
