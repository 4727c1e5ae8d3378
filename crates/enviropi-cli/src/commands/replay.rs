//! `enviropi replay`: back-fill Sensor.Community from InfluxDB.

use enviropi_core::{BridgeConfig, replay};

use super::{make_air_quality, make_influx, make_transport};

pub fn run(config: &BridgeConfig, from: &str, to: &str) {
    let transport = make_transport(config);
    let influx = make_influx(config, transport.clone());
    let Some(air_quality) = make_air_quality(config, transport) else {
        eprintln!("Error: no air-quality sensor id; set air_quality.sensor_id in the config");
        std::process::exit(1);
    };

    println!(
        "Replaying {}/{} from {from} to {to} as {}",
        influx.target().endpoint(),
        config.influx.database,
        air_quality.sensor_id()
    );

    let summary = match replay(&influx, &air_quality, from, to) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    for row in &summary.rows {
        match &row.result {
            Ok(()) => println!("  {}  ok", row.time),
            Err(e) => println!("  {}  FAILED  {e}", row.time),
        }
    }
    println!(
        "{} row(s): {} submitted, {} failed",
        summary.rows.len(),
        summary.submitted(),
        summary.failed()
    );
    if summary.failed() > 0 {
        std::process::exit(2);
    }
}
