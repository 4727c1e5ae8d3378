//! `enviropi run`: the long-running serial bridge.

use std::io::BufReader;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{info, warn};

use enviropi_core::{Bridge, BridgeConfig, LineParser};

use super::{build_dispatcher, make_probe, make_transport};

/// Run the bridge until Ctrl+C. The serial port is reopened whenever it
/// cannot be opened, reaches EOF or keeps failing.
pub fn run(config: BridgeConfig) {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: cannot install Ctrl+C handler: {e}");
    }

    info!(
        "enviropi {} - reading {} @ {} baud",
        enviropi_core::VERSION,
        config.serial.port,
        config.serial.baud
    );

    let transport = make_transport(&config);
    let dispatcher = build_dispatcher(&config, &transport, Instant::now());
    if dispatcher.sink_count() == 0 {
        warn!("no sinks enabled; reading sets will be parsed and discarded");
    } else {
        let kinds: Vec<String> = dispatcher.kinds().iter().map(ToString::to_string).collect();
        info!("forwarding to: {}", kinds.join(", "));
    }

    let mut bridge = Bridge::new(LineParser::new(make_probe(&config)), dispatcher);
    let read_timeout = Duration::from_millis(config.serial.read_timeout_ms);
    let reopen_delay = Duration::from_secs(config.serial.reopen_delay_secs);

    while running.load(Ordering::SeqCst) {
        match serialport::new(config.serial.port.as_str(), config.serial.baud)
            .timeout(read_timeout)
            .open()
        {
            Ok(port) => {
                info!("opened {}", config.serial.port);
                let stats = bridge.run(BufReader::new(port), &running);
                info!(
                    "serial session ended: {} line(s), {} reading set(s), {} overlong, {} read error(s)",
                    stats.lines, stats.reading_sets, stats.overlong, stats.read_errors
                );
            }
            Err(e) => warn!("cannot open {}: {e}", config.serial.port),
        }

        if running.load(Ordering::SeqCst) {
            info!("reopening serial port in {}s", reopen_delay.as_secs());
            sleep_while_running(reopen_delay, &running);
        }
    }

    let totals = bridge.parser().stats();
    info!(
        "stopped: {} block(s), {} field(s), {} malformed, {} restarted",
        totals.blocks, totals.fields, totals.malformed, totals.restarts
    );
}

/// Sleep for `total`, waking early once `running` is cleared.
fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let step = Duration::from_millis(200);
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        std::thread::sleep(remaining.min(step));
    }
}
