//! `enviropi config`: show the configuration a `run` would use.

use enviropi_core::BridgeConfig;

pub fn run(config: &BridgeConfig) {
    match serde_json::to_string_pretty(&config.redacted()) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error encoding config: {e}");
            std::process::exit(1);
        }
    }
}
