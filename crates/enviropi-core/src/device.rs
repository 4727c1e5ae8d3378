//! Identity of the bridge host.
//!
//! The Raspberry Pi's CPU serial number identifies the installation to both
//! remote APIs: the full serial to the telemetry collector, the last eight
//! characters (prefixed `raspi-`) as the Sensor.Community sensor id.

use std::fs;
use std::path::Path;

pub const CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Extract the `Serial` value from `/proc/cpuinfo`-formatted text.
pub fn parse_cpu_serial(cpuinfo: &str) -> Option<String> {
    cpuinfo.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() != "Serial" {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// CPU serial of this host, if the platform reports one.
pub fn cpu_serial() -> Option<String> {
    cpu_serial_from(Path::new(CPUINFO_PATH))
}

pub fn cpu_serial_from(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    parse_cpu_serial(&text)
}

/// Last eight characters of `serial`, or all of it when shorter.
pub fn short_serial(serial: &str) -> &str {
    let skip = serial.chars().count().saturating_sub(8);
    match serial.char_indices().nth(skip) {
        Some((idx, _)) => &serial[idx..],
        None => serial,
    }
}

pub fn air_quality_sensor_id(short_serial: &str) -> String {
    format!("raspi-{short_serial}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PI_CPUINFO: &str = "\
processor\t: 0
model name\t: ARMv7 Processor rev 4 (v7l)
BogoMIPS\t: 38.40

Hardware\t: BCM2835
Revision\t: a02082
Serial\t\t: 0000000024b3c744
Model\t\t: Raspberry Pi 3 Model B Rev 1.2
";

    #[test]
    fn test_parse_cpu_serial() {
        assert_eq!(parse_cpu_serial(PI_CPUINFO).as_deref(), Some("0000000024b3c744"));
    }

    #[test]
    fn test_no_serial_line() {
        assert_eq!(parse_cpu_serial("processor\t: 0\nvendor_id\t: GenuineIntel\n"), None);
        assert_eq!(parse_cpu_serial("Serial\t: \n"), None);
    }

    #[test]
    fn test_short_serial_and_sensor_id() {
        let short = short_serial("0000000024b3c744");
        assert_eq!(short, "24b3c744");
        assert_eq!(air_quality_sensor_id(short), "raspi-24b3c744");
        assert_eq!(short_serial("abc"), "abc");
    }

    #[test]
    fn test_cpu_serial_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpuinfo");
        std::fs::write(&path, PI_CPUINFO).unwrap();
        assert_eq!(cpu_serial_from(&path).as_deref(), Some("0000000024b3c744"));
        assert_eq!(cpu_serial_from(&dir.path().join("missing")), None);
    }
}
