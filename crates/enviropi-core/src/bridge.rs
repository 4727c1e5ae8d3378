//! The single-threaded bridge loop: serial lines in, dispatched reading sets out.

use std::io::{BufRead, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};

use crate::dispatch::{DispatchReport, Dispatcher};
use crate::protocol::{LineParser, ParserStats};
use crate::sinks::Timestamp;

/// Consecutive hard read errors after which [`Bridge::run`] gives up so the
/// caller can reopen the port.
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 5;

/// Longest line accepted from the serial link, excluding the newline.
/// Anything longer is dropped up to its next newline.
pub const MAX_LINE_LEN: usize = 4096;

/// Counters accumulated over one [`Bridge::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub lines: u64,
    pub reading_sets: u64,
    pub invalid_utf8: u64,
    /// Lines dropped for exceeding [`MAX_LINE_LEN`].
    pub overlong: u64,
    pub read_errors: u64,
    pub parser: ParserStats,
}

/// Owns all mutable loop state: the in-progress reading set (inside the
/// parser), the token and the rate-limit windows (inside the dispatcher).
pub struct Bridge {
    parser: LineParser,
    dispatcher: Dispatcher,
}

impl Bridge {
    pub fn new(parser: LineParser, dispatcher: Dispatcher) -> Self {
        Self { parser, dispatcher }
    }

    pub fn parser(&self) -> &LineParser {
        &self.parser
    }

    /// Process one line. When it completes a block the reading set is
    /// dispatched immediately and the report returned.
    pub fn handle_line(&mut self, line: &str, at: &Timestamp) -> Option<DispatchReport> {
        let readings = self.parser.feed(line)?;
        debug!("reading set complete: {} field(s)", readings.len());
        Some(self.dispatcher.dispatch(&readings, at))
    }

    /// Read lines from `reader` until EOF, until `running` is cleared, or
    /// until [`MAX_CONSECUTIVE_READ_ERRORS`] reads in a row have failed.
    ///
    /// Read timeouts are expected on an idle serial port and are not
    /// counted. A line split by a timeout is kept and completed on the next
    /// read.
    pub fn run<R: BufRead>(&mut self, mut reader: R, running: &AtomicBool) -> BridgeStats {
        let mut stats = BridgeStats::default();
        let mut buf = Vec::with_capacity(256);
        let mut consecutive_errors = 0u32;
        // Set while skipping the rest of an overlong line.
        let mut discarding = false;

        while running.load(Ordering::SeqCst) {
            // At least one byte of room, so `Ok(0)` always means EOF.
            let room = (MAX_LINE_LEN + 1 - buf.len()) as u64;
            match (&mut reader).take(room).read_until(b'\n', &mut buf) {
                Ok(0) => {
                    if !buf.is_empty() && !discarding {
                        self.process_raw(&buf, &mut stats);
                    }
                    info!("serial stream closed");
                    break;
                }
                Ok(_) => {
                    consecutive_errors = 0;
                    if buf.last() == Some(&b'\n') {
                        if discarding {
                            discarding = false;
                        } else {
                            self.process_raw(&buf, &mut stats);
                        }
                        buf.clear();
                    } else if buf.len() > MAX_LINE_LEN {
                        if !discarding {
                            stats.overlong += 1;
                            warn!("dropping serial line longer than {MAX_LINE_LEN} bytes");
                            discarding = true;
                        }
                        buf.clear();
                    }
                    // Otherwise a partial line; the next read completes it.
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    stats.read_errors += 1;
                    consecutive_errors += 1;
                    warn!("serial read failed: {e}");
                    buf.clear();
                    discarding = false;
                    if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        warn!("giving up on serial stream after {consecutive_errors} failed reads");
                        break;
                    }
                }
            }
        }

        stats.parser = self.parser.stats();
        stats
    }

    fn process_raw(&mut self, raw: &[u8], stats: &mut BridgeStats) {
        stats.lines += 1;
        let line = match std::str::from_utf8(raw) {
            Ok(s) => s,
            Err(e) => {
                stats.invalid_utf8 += 1;
                warn!("skipping line that is not UTF-8: {e}");
                return;
            }
        };
        if let Some(report) = self.handle_line(line, &Timestamp::now()) {
            stats.reading_sets += 1;
            debug!(
                "dispatched: {} sent, {} skipped, {} failed",
                report.sent(),
                report.skipped(),
                report.failed()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::probe::{ProbeError, TemperatureProbe};
    use crate::reading::{FieldValue, ReadingSet};
    use crate::sinks::{Sink, SinkError, SinkKind};

    struct FixedProbe(f64);

    impl TemperatureProbe for FixedProbe {
        fn read_celsius(&mut self) -> Result<f64, ProbeError> {
            Ok(self.0)
        }
    }

    struct Recording(Arc<Mutex<Vec<ReadingSet>>>);

    impl Sink for Recording {
        fn kind(&self) -> SinkKind {
            SinkKind::TimeSeries
        }

        fn target(&self) -> &str {
            "memory"
        }

        fn send(&mut self, readings: &ReadingSet, _at: &Timestamp) -> Result<(), SinkError> {
            self.0.lock().unwrap().push(readings.clone());
            Ok(())
        }
    }

    fn bridge() -> (Bridge, Arc<Mutex<Vec<ReadingSet>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher.add_sink(Box::new(Recording(seen.clone())), Duration::ZERO);
        let parser = LineParser::new(Box::new(FixedProbe(21.0)));
        (Bridge::new(parser, dispatcher), seen)
    }

    /// Yields its chunks in order, with a timeout error between each.
    struct Stuttering {
        chunks: Vec<&'static [u8]>,
        next: usize,
        timed_out: bool,
    }

    impl Read for Stuttering {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.next >= self.chunks.len() {
                return Ok(0);
            }
            if !self.timed_out {
                self.timed_out = true;
                return Err(io::Error::new(ErrorKind::TimedOut, "idle"));
            }
            self.timed_out = false;
            let chunk = self.chunks[self.next];
            self.next += 1;
            out[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_handle_line_dispatches_on_end() {
        let (mut b, seen) = bridge();
        let at = Timestamp {
            monotonic: Instant::now(),
            unix_secs: 0,
        };
        assert!(b.handle_line("BEGIN", &at).is_none());
        assert!(b.handle_line("pm1=4", &at).is_none());
        let report = b.handle_line("END", &at).unwrap();
        assert_eq!(report.sent(), 1);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].get("pm1"), Some(FieldValue::Int(4)));
        assert_eq!(seen[0].get("real_temp"), Some(FieldValue::Float(21.0)));
    }

    #[test]
    fn test_run_until_eof() {
        let (mut b, seen) = bridge();
        let input = "boot noise\nBEGIN\npm2=7.5\nEND\nBEGIN\nhumidity=40.1\nEND";
        let running = AtomicBool::new(true);
        let stats = b.run(Cursor::new(input), &running);

        assert_eq!(stats.lines, 7);
        assert_eq!(stats.reading_sets, 2);
        assert_eq!(stats.parser.noise, 1);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_utf8_is_skipped() {
        let (mut b, seen) = bridge();
        let input: &[u8] = b"BEGIN\npm1=\xff\xfe\npm10=9\nEND\n";
        let running = AtomicBool::new(true);
        let stats = b.run(Cursor::new(input), &running);

        assert_eq!(stats.invalid_utf8, 1);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].contains("pm1"));
        assert_eq!(seen[0].get("pm10"), Some(FieldValue::Int(9)));
    }

    #[test]
    fn test_line_split_by_timeout_is_reassembled() {
        let (mut b, seen) = bridge();
        let reader = io::BufReader::new(Stuttering {
            chunks: vec![b"BEGIN\npm", b"1=12\nEN", b"D\n"],
            next: 0,
            timed_out: false,
        });
        let running = AtomicBool::new(true);
        let stats = b.run(reader, &running);

        assert_eq!(stats.read_errors, 0);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].get("pm1"), Some(FieldValue::Int(12)));
    }

    #[test]
    fn test_overlong_line_is_dropped() {
        let (mut b, seen) = bridge();
        let mut input = vec![b'x'; 3 * MAX_LINE_LEN];
        input.extend_from_slice(b"=1\nBEGIN\npm1=2\nEND\n");
        let running = AtomicBool::new(true);
        let stats = b.run(Cursor::new(input), &running);

        assert_eq!(stats.overlong, 1);
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.reading_sets, 1);
        assert_eq!(seen.lock().unwrap()[0].get("pm1"), Some(FieldValue::Int(2)));
    }

    #[test]
    fn test_line_at_limit_is_kept() {
        let (mut b, _) = bridge();
        let mut input = b"BEGIN\n".to_vec();
        let key = "k".repeat(MAX_LINE_LEN - 2);
        input.extend_from_slice(format!("{key}=1\nEND\n").as_bytes());
        let running = AtomicBool::new(true);
        let stats = b.run(Cursor::new(input), &running);

        assert_eq!(stats.overlong, 0);
        assert_eq!(stats.parser.fields, 1);
        assert_eq!(stats.parser.malformed, 0);
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _out: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "device unplugged"))
        }
    }

    #[test]
    fn test_persistent_read_errors_end_the_run() {
        let (mut b, _) = bridge();
        let running = AtomicBool::new(true);
        let stats = b.run(io::BufReader::new(Broken), &running);
        assert_eq!(stats.read_errors, u64::from(MAX_CONSECUTIVE_READ_ERRORS));
    }

    #[test]
    fn test_cleared_flag_stops_immediately() {
        let (mut b, seen) = bridge();
        let running = AtomicBool::new(false);
        let stats = b.run(Cursor::new("BEGIN\nEND\n"), &running);
        assert_eq!(stats.lines, 0);
        assert!(seen.lock().unwrap().is_empty());
    }
}
