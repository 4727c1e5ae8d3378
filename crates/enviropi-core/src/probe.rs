//! Local temperature probe attached directly to the bridge host.
//!
//! The peripheral board's own temperature reading is skewed by its CPU and
//! enclosure, so the bridge merges in an independent 1-Wire thermometer
//! reading when a block is finalized.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default sysfs location of the Linux 1-Wire bus.
pub const W1_DEVICES_DIR: &str = "/sys/bus/w1/devices";

/// 1-Wire family codes of the DS18x20 / MAX31850 thermometer family.
const THERMOMETER_FAMILIES: &[&str] = &["10-", "22-", "28-", "3b-", "42-"];

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no local temperature probe configured")]
    Unavailable,
    #[error("no 1-Wire thermometer found under {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CRC check failed on {0}")]
    CrcMismatch(PathBuf),
    #[error("unrecognised sensor output from {path}: {detail}")]
    Malformed { path: PathBuf, detail: String },
}

/// Anything that can produce a temperature in degrees Celsius on demand.
pub trait TemperatureProbe: Send {
    fn read_celsius(&mut self) -> Result<f64, ProbeError>;
}

/// Placeholder used when no probe is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProbe;

impl TemperatureProbe for NoProbe {
    fn read_celsius(&mut self) -> Result<f64, ProbeError> {
        Err(ProbeError::Unavailable)
    }
}

/// DS18B20-style thermometer read through the kernel `w1_therm` driver.
#[derive(Debug, Clone)]
pub struct W1ThermProbe {
    slave_file: PathBuf,
}

impl W1ThermProbe {
    /// Use a specific device directory (e.g. `/sys/bus/w1/devices/28-0316a2799cff`).
    pub fn new(device_dir: impl Into<PathBuf>) -> Self {
        Self {
            slave_file: device_dir.into().join("w1_slave"),
        }
    }

    /// Pick the first thermometer-family device under `base`.
    pub fn discover(base: &Path) -> Result<Self, ProbeError> {
        let entries = fs::read_dir(base).map_err(|source| ProbeError::Io {
            path: base.to_path_buf(),
            source,
        })?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_lowercase();
                THERMOMETER_FAMILIES.iter().any(|f| name.starts_with(f))
            })
            .map(|e| e.path())
            .collect();
        candidates.sort();

        candidates
            .into_iter()
            .next()
            .map(Self::new)
            .ok_or_else(|| ProbeError::NotFound(base.to_path_buf()))
    }

    pub fn slave_file(&self) -> &Path {
        &self.slave_file
    }
}

impl TemperatureProbe for W1ThermProbe {
    fn read_celsius(&mut self) -> Result<f64, ProbeError> {
        let contents = fs::read_to_string(&self.slave_file).map_err(|source| ProbeError::Io {
            path: self.slave_file.clone(),
            source,
        })?;
        parse_w1_slave(&contents, &self.slave_file)
    }
}

/// Parse the two-line `w1_slave` format:
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
fn parse_w1_slave(contents: &str, path: &Path) -> Result<f64, ProbeError> {
    let mut lines = contents.lines();
    let crc_line = lines.next().unwrap_or("");
    if !crc_line.trim_end().ends_with("YES") {
        return Err(ProbeError::CrcMismatch(path.to_path_buf()));
    }

    let data_line = lines.next().unwrap_or("");
    let raw = data_line
        .rsplit_once("t=")
        .map(|(_, t)| t.trim())
        .ok_or_else(|| ProbeError::Malformed {
            path: path.to_path_buf(),
            detail: "missing t= field".to_string(),
        })?;

    let millis: i64 = raw.parse().map_err(|_| ProbeError::Malformed {
        path: path.to_path_buf(),
        detail: format!("bad temperature value '{raw}'"),
    })?;

    Ok(millis as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    #[test]
    fn test_parse_good_reading() {
        let t = parse_w1_slave(GOOD, Path::new("x")).unwrap();
        assert!((t - 23.125).abs() < 1e-9);
    }

    #[test]
    fn test_parse_negative_reading() {
        let s = "ff ff : crc=aa YES\nff ff t=-1250\n";
        let t = parse_w1_slave(s, Path::new("x")).unwrap();
        assert!((t + 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_crc_failure_rejected() {
        let s = "72 01 : crc=57 NO\n72 01 t=23125\n";
        assert!(matches!(
            parse_w1_slave(s, Path::new("x")),
            Err(ProbeError::CrcMismatch(_))
        ));
    }

    #[test]
    fn test_missing_temperature_rejected() {
        let s = "72 01 : crc=57 YES\n72 01\n";
        assert!(matches!(
            parse_w1_slave(s, Path::new("x")),
            Err(ProbeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_discover_picks_thermometer_family() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("w1_bus_master1")).unwrap();
        let dev = dir.path().join("28-0316a2799cff");
        fs::create_dir(&dev).unwrap();
        fs::write(dev.join("w1_slave"), GOOD).unwrap();

        let mut probe = W1ThermProbe::discover(dir.path()).unwrap();
        assert_eq!(probe.slave_file(), dev.join("w1_slave"));
        assert!((probe.read_celsius().unwrap() - 23.125).abs() < 1e-9);
    }

    #[test]
    fn test_discover_empty_bus() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("w1_bus_master1")).unwrap();
        assert!(matches!(
            W1ThermProbe::discover(dir.path()),
            Err(ProbeError::NotFound(_))
        ));
    }

    #[test]
    fn test_no_probe_is_unavailable() {
        assert!(matches!(NoProbe.read_celsius(), Err(ProbeError::Unavailable)));
    }
}
