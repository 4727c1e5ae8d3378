//! Fan-out of finalized reading sets to every registered sink.
//!
//! Each sink sits behind its own [`RateLimitWindow`]. Sinks are attempted in
//! registration order; one sink failing never stops the others, and nothing
//! is queued or retried.

use std::fmt;
use std::time::Duration;

use log::{debug, warn};

use crate::ratelimit::RateLimitWindow;
use crate::reading::ReadingSet;
use crate::sinks::{Sink, SinkError, SinkKind, Timestamp};

struct SinkSlot {
    sink: Box<dyn Sink>,
    window: RateLimitWindow,
}

/// What happened to one sink for one reading set.
#[derive(Debug)]
pub enum DispatchOutcome {
    Sent,
    /// Refused by the rate-limit window; the sink was not called.
    Skipped,
    Failed(SinkError),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Per-sink outcomes for one reading set, in registration order.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<(SinkKind, DispatchOutcome)>,
}

impl DispatchReport {
    pub fn sent(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_sent()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, DispatchOutcome::Skipped))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, DispatchOutcome::Failed(_)))
            .count()
    }

    pub fn outcome(&self, kind: SinkKind) -> Option<&DispatchOutcome> {
        self.outcomes.iter().find(|(k, _)| *k == kind).map(|(_, o)| o)
    }
}

#[derive(Default)]
pub struct Dispatcher {
    slots: Vec<SinkSlot>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink that may be called at most once per `min_interval`.
    pub fn add_sink(&mut self, sink: Box<dyn Sink>, min_interval: Duration) {
        debug!(
            "dispatch: registered {} ({}) with min interval {:?}",
            sink.kind(),
            sink.target(),
            min_interval
        );
        self.slots.push(SinkSlot {
            sink,
            window: RateLimitWindow::new(min_interval),
        });
    }

    pub fn sink_count(&self) -> usize {
        self.slots.len()
    }

    pub fn kinds(&self) -> Vec<SinkKind> {
        self.slots.iter().map(|s| s.sink.kind()).collect()
    }

    /// Offer `readings` to every sink whose window admits `at`.
    ///
    /// The window is consumed before the send, so a failed send still counts
    /// as the attempt for that window.
    pub fn dispatch(&mut self, readings: &ReadingSet, at: &Timestamp) -> DispatchReport {
        let mut report = DispatchReport::default();
        for slot in &mut self.slots {
            let kind = slot.sink.kind();
            if !slot.window.try_acquire(at.monotonic) {
                debug!("dispatch: {kind} inside its window, skipping");
                report.outcomes.push((kind, DispatchOutcome::Skipped));
                continue;
            }
            let outcome = match slot.sink.send(readings, at) {
                Ok(()) => {
                    debug!("dispatch: {kind} ok");
                    DispatchOutcome::Sent
                }
                Err(e) => {
                    warn!("{kind} ({}) failed: {e}", slot.sink.target());
                    DispatchOutcome::Failed(e)
                }
            };
            report.outcomes.push((kind, outcome));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use super::*;
    use crate::reading::FieldValue;

    struct Counting {
        kind: SinkKind,
        calls: Arc<Mutex<usize>>,
        fail: bool,
    }

    impl Sink for Counting {
        fn kind(&self) -> SinkKind {
            self.kind
        }

        fn target(&self) -> &str {
            "test"
        }

        fn send(&mut self, _r: &ReadingSet, _at: &Timestamp) -> Result<(), SinkError> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                return Err(SinkError::Status {
                    host: "test".into(),
                    status: 500,
                    body: String::new(),
                });
            }
            Ok(())
        }
    }

    fn counting(kind: SinkKind, fail: bool) -> (Box<dyn Sink>, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let sink = Counting {
            kind,
            calls: calls.clone(),
            fail,
        };
        (Box::new(sink), calls)
    }

    fn readings() -> ReadingSet {
        [("pm1", FieldValue::Int(1))].into_iter().collect()
    }

    fn at(t: Instant) -> Timestamp {
        Timestamp {
            monotonic: t,
            unix_secs: 0,
        }
    }

    #[test]
    fn test_second_attempt_inside_window_is_skipped() {
        let mut d = Dispatcher::new();
        let (sink, calls) = counting(SinkKind::AirQuality, false);
        d.add_sink(sink, Duration::from_secs(60));

        let t0 = Instant::now();
        assert_eq!(d.dispatch(&readings(), &at(t0)).sent(), 1);
        let second = d.dispatch(&readings(), &at(t0 + Duration::from_secs(30)));
        assert_eq!(second.skipped(), 1);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_attempts_outside_window_both_sent() {
        let mut d = Dispatcher::new();
        let (sink, calls) = counting(SinkKind::Telemetry, false);
        d.add_sink(sink, Duration::from_secs(10));

        let t0 = Instant::now();
        d.dispatch(&readings(), &at(t0));
        d.dispatch(&readings(), &at(t0 + Duration::from_secs(11)));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_failure_does_not_block_other_sinks() {
        let mut d = Dispatcher::new();
        let (bad, bad_calls) = counting(SinkKind::TimeSeries, true);
        let (good, good_calls) = counting(SinkKind::AirQuality, false);
        d.add_sink(bad, Duration::ZERO);
        d.add_sink(good, Duration::ZERO);

        let report = d.dispatch(&readings(), &at(Instant::now()));
        assert_eq!(report.failed(), 1);
        assert_eq!(report.sent(), 1);
        assert!(matches!(
            report.outcome(SinkKind::TimeSeries),
            Some(DispatchOutcome::Failed(_))
        ));
        assert_eq!(*bad_calls.lock().unwrap(), 1);
        assert_eq!(*good_calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_failed_send_still_consumes_window() {
        let mut d = Dispatcher::new();
        let (sink, calls) = counting(SinkKind::Telemetry, true);
        d.add_sink(sink, Duration::from_secs(10));

        let t0 = Instant::now();
        d.dispatch(&readings(), &at(t0));
        let report = d.dispatch(&readings(), &at(t0 + Duration::from_secs(5)));
        assert_eq!(report.skipped(), 1);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_independent_windows() {
        let mut d = Dispatcher::new();
        let (fast, fast_calls) = counting(SinkKind::TimeSeries, false);
        let (slow, slow_calls) = counting(SinkKind::AirQuality, false);
        d.add_sink(fast, Duration::ZERO);
        d.add_sink(slow, Duration::from_secs(60));

        let t0 = Instant::now();
        for i in 0..5 {
            d.dispatch(&readings(), &at(t0 + Duration::from_secs(i * 5)));
        }
        assert_eq!(*fast_calls.lock().unwrap(), 5);
        assert_eq!(*slow_calls.lock().unwrap(), 1);
        assert_eq!(d.kinds(), vec![SinkKind::TimeSeries, SinkKind::AirQuality]);
    }
}
