//! `enviropi parse`: offline decoding of a captured serial log.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use enviropi_core::protocol::encode_block;
use enviropi_core::{LineParser, NoProbe, ProbeError, TemperatureProbe};

/// Stand-in thermometer that reports a fixed value.
struct FixedProbe(f64);

impl TemperatureProbe for FixedProbe {
    fn read_celsius(&mut self) -> Result<f64, ProbeError> {
        Ok(self.0)
    }
}

/// Print each reading set as one JSON object per line, or re-framed in the
/// serial format when `frames` is set.
pub fn run(input: Option<&Path>, temperature: Option<f64>, frames: bool) {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => match File::open(path) {
            Ok(f) => Box::new(BufReader::new(f)),
            Err(e) => {
                eprintln!("Error: cannot open {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Box::new(BufReader::new(io::stdin())),
    };

    let probe: Box<dyn TemperatureProbe> = match temperature {
        Some(t) => Box::new(FixedProbe(t)),
        None => Box::new(NoProbe),
    };
    let mut parser = LineParser::new(probe);

    for line in reader.split(b'\n') {
        let raw = match line {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };
        // Lossy so a corrupted byte only spoils its own line.
        let text = String::from_utf8_lossy(&raw);
        let Some(readings) = parser.feed(&text) else {
            continue;
        };
        if frames {
            print!("{}", encode_block(&readings));
        } else {
            match serde_json::to_string(&readings) {
                Ok(json) => println!("{json}"),
                Err(e) => eprintln!("Error encoding reading set: {e}"),
            }
        }
    }

    let stats = parser.stats();
    eprintln!(
        "{} reading set(s), {} field(s), {} malformed line(s), {} line(s) outside blocks",
        stats.blocks, stats.fields, stats.malformed, stats.noise
    );
}
