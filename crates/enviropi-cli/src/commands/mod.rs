pub mod config;
pub mod parse;
pub mod replay;
pub mod run;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use log::{error, info, warn};

use enviropi_core::sinks::air_quality::AirQualitySink;
use enviropi_core::{
    BridgeConfig, Dispatcher, EnsureAction, HttpTransport, InfluxClient, InfluxSink, NoProbe,
    TelemetrySink, TemperatureProbe, TokenManager, TokenStore, UreqTransport, W1ThermProbe,
    air_quality_sensor_id, cpu_serial, short_serial,
};

/// Command-line overrides applied on top of the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Serial device of the sensor board
    #[arg(long, global = true)]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(long, global = true)]
    pub baud: Option<u32>,

    /// InfluxDB host name or address
    #[arg(long, global = true)]
    pub dbhost: Option<String>,

    /// InfluxDB port
    #[arg(long, global = true)]
    pub dbport: Option<u16>,

    /// InfluxDB user name
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// InfluxDB password
    #[arg(long = "pass", global = true)]
    pub password: Option<String>,

    /// InfluxDB database
    #[arg(long, global = true)]
    pub dbname: Option<String>,

    /// Telemetry API user name
    #[arg(long, global = true)]
    pub iot_user: Option<String>,

    /// Telemetry API password
    #[arg(long = "iot-pass", global = true)]
    pub iot_password: Option<String>,

    /// Do not forward to the telemetry API
    #[arg(long, global = true)]
    pub no_telemetry: bool,

    /// Do not forward to Sensor.Community
    #[arg(long, global = true)]
    pub no_air_quality: bool,

    /// Do not read the local 1-Wire thermometer
    #[arg(long, global = true)]
    pub no_probe: bool,
}

impl Overrides {
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(port) = &self.port {
            config.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud = baud;
        }
        if let Some(host) = &self.dbhost {
            config.influx.host = host.clone();
        }
        if let Some(port) = self.dbport {
            config.influx.port = port;
        }
        if let Some(user) = &self.user {
            config.influx.username = user.clone();
        }
        if let Some(password) = &self.password {
            config.influx.password = password.clone();
        }
        if let Some(db) = &self.dbname {
            config.influx.database = db.clone();
        }
        if let Some(user) = &self.iot_user {
            config.telemetry.username = Some(user.clone());
        }
        if let Some(password) = &self.iot_password {
            config.telemetry.password = Some(password.clone());
        }
        if self.no_telemetry {
            config.telemetry.enabled = false;
        }
        if self.no_air_quality {
            config.air_quality.enabled = false;
        }
        if self.no_probe {
            config.probe.enabled = false;
        }
    }
}

/// Load the config file (if any) and apply overrides. Exits on a bad file.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> BridgeConfig {
    let mut config = match path {
        Some(p) => match BridgeConfig::load(p) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        None => BridgeConfig::default(),
    };
    overrides.apply(&mut config);
    config
}

pub fn make_transport(config: &BridgeConfig) -> Arc<dyn HttpTransport> {
    Arc::new(UreqTransport::new(config.http_timeout()))
}

pub fn make_influx(config: &BridgeConfig, transport: Arc<dyn HttpTransport>) -> InfluxClient {
    InfluxClient::new(transport, config.influx.target())
}

/// `X-Sensor` id: configured, or derived from the CPU serial.
fn sensor_id(config: &BridgeConfig, serial: Option<&str>) -> Option<String> {
    config
        .air_quality
        .sensor_id
        .clone()
        .or_else(|| serial.map(|s| air_quality_sensor_id(short_serial(s))))
}

pub fn make_air_quality(
    config: &BridgeConfig,
    transport: Arc<dyn HttpTransport>,
) -> Option<AirQualitySink> {
    let serial = cpu_serial();
    let Some(id) = sensor_id(config, serial.as_deref()) else {
        warn!("air-quality disabled: no sensor_id configured and no CPU serial available");
        return None;
    };
    info!("Sensor.Community logging as: {id}");
    Some(AirQualitySink::new(
        transport,
        &config.air_quality.url,
        id,
        &config.air_quality.software_version,
    ))
}

/// Telemetry sink with its token loaded from disk and checked once.
pub fn make_telemetry(
    config: &BridgeConfig,
    transport: Arc<dyn HttpTransport>,
    now: Instant,
) -> Option<TelemetrySink> {
    let Some(credentials) = config.telemetry.credentials() else {
        warn!("telemetry disabled: no --iot-user/--iot-pass configured");
        return None;
    };
    let Some(serial) = config.telemetry.serial_number.clone().or_else(cpu_serial) else {
        warn!("telemetry disabled: no serial_number configured and no CPU serial available");
        return None;
    };

    let mut tokens = TokenManager::new(
        transport.clone(),
        &config.telemetry.base_url,
        credentials,
        serial,
    )
    .with_store(TokenStore::new(&config.telemetry.token_file))
    .with_renewal_period(config.telemetry.renewal_period());

    tokens.load_persisted(now);
    match tokens.ensure_valid(false, now) {
        Ok(EnsureAction::Acquired) => info!("telemetry: new token acquired"),
        Ok(_) => info!("telemetry: using token from {}", config.telemetry.token_file.display()),
        // Not fatal; the first send tries again.
        Err(e) => error!("telemetry: no token at startup: {e}"),
    }
    Some(TelemetrySink::new(transport, tokens))
}

/// All enabled sinks, in the order they are tried.
pub fn build_dispatcher(
    config: &BridgeConfig,
    transport: &Arc<dyn HttpTransport>,
    now: Instant,
) -> Dispatcher {
    let mut dispatcher = Dispatcher::new();

    if config.influx.enabled {
        let client = make_influx(config, transport.clone());
        info!(
            "Influx as: {} db={} user={}",
            client.target().endpoint(),
            config.influx.database,
            config.influx.username
        );
        dispatcher.add_sink(Box::new(InfluxSink::new(client)), config.influx.min_interval());
    }
    if config.telemetry.enabled {
        if let Some(sink) = make_telemetry(config, transport.clone(), now) {
            dispatcher.add_sink(Box::new(sink), config.telemetry.min_interval());
        }
    }
    if config.air_quality.enabled {
        if let Some(sink) = make_air_quality(config, transport.clone()) {
            dispatcher.add_sink(Box::new(sink), config.air_quality.min_interval());
        }
    }
    dispatcher
}

/// The local thermometer, or [`NoProbe`] when disabled or absent.
pub fn make_probe(config: &BridgeConfig) -> Box<dyn TemperatureProbe> {
    if !config.probe.enabled {
        return Box::new(NoProbe);
    }
    if let Some(device) = &config.probe.device {
        return Box::new(W1ThermProbe::new(device));
    }
    match W1ThermProbe::discover(&config.probe.w1_devices_dir) {
        Ok(probe) => {
            info!("local thermometer: {}", probe.slave_file().display());
            Box::new(probe)
        }
        Err(e) => {
            warn!("no local thermometer, readings will lack real_temp: {e}");
            Box::new(NoProbe)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Overrides
    // -----------------------------------------------------------------------

    #[test]
    fn test_no_overrides_keeps_config() {
        let mut config = BridgeConfig::default();
        Overrides::default().apply(&mut config);
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_overrides_replace_values() {
        let mut config = BridgeConfig::default();
        let overrides = Overrides {
            port: Some("/dev/ttyUSB0".into()),
            dbhost: Some("db.lan".into()),
            dbport: Some(9999),
            password: Some("s3cret".into()),
            iot_user: Some("me@example.com".into()),
            iot_password: Some("pw".into()),
            no_air_quality: true,
            ..Overrides::default()
        };
        overrides.apply(&mut config);

        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud, 9600);
        assert_eq!(config.influx.target().endpoint(), "db.lan:9999");
        assert_eq!(config.influx.password, "s3cret");
        assert_eq!(config.telemetry.credentials().unwrap().username, "me@example.com");
        assert!(!config.air_quality.enabled);
        assert!(config.telemetry.enabled);
    }

    // -----------------------------------------------------------------------
    // Sensor id
    // -----------------------------------------------------------------------

    #[test]
    fn test_sensor_id_from_serial() {
        let config = BridgeConfig::default();
        assert_eq!(
            sensor_id(&config, Some("0000000024b3c744")).as_deref(),
            Some("raspi-24b3c744")
        );
        assert_eq!(sensor_id(&config, None), None);
    }

    #[test]
    fn test_configured_sensor_id_wins() {
        let mut config = BridgeConfig::default();
        config.air_quality.sensor_id = Some("raspi-custom".into());
        assert_eq!(
            sensor_id(&config, Some("0000000024b3c744")).as_deref(),
            Some("raspi-custom")
        );
    }

    // -----------------------------------------------------------------------
    // Sinks
    // -----------------------------------------------------------------------

    #[test]
    fn test_disabled_sinks_are_not_registered() {
        let mut config = BridgeConfig::default();
        config.telemetry.enabled = false;
        config.air_quality.enabled = false;
        let transport = make_transport(&config);
        let d = build_dispatcher(&config, &transport, Instant::now());
        assert_eq!(d.sink_count(), 1);
    }

    #[test]
    fn test_telemetry_without_credentials_is_skipped() {
        let mut config = BridgeConfig::default();
        config.influx.enabled = false;
        config.air_quality.enabled = false;
        let transport = make_transport(&config);
        assert!(make_telemetry(&config, transport.clone(), Instant::now()).is_none());
        assert_eq!(build_dispatcher(&config, &transport, Instant::now()).sink_count(), 0);
    }

    #[test]
    fn test_probe_disabled() {
        let mut config = BridgeConfig::default();
        config.probe.enabled = false;
        let mut probe = make_probe(&config);
        assert!(probe.read_celsius().is_err());
    }
}
