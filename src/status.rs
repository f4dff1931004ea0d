use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// One-way sink for human-readable progress. The client never reads state
/// back from it; a missing reporter degrades to [`NoopReporter`].
pub trait StatusReporter: Send + Sync {
    fn report(&self, message: &str, percent: Option<u8>);
}

pub struct NoopReporter;

impl StatusReporter for NoopReporter {
    fn report(&self, _message: &str, _percent: Option<u8>) {}
}

/// Wraps a reporter and enforces the progress contract: percentages are
/// monotonically non-decreasing within one submission and never exceed 100.
#[derive(Clone)]
pub struct ProgressSink {
    reporter: Arc<dyn StatusReporter>,
    floor: Arc<AtomicU8>,
}

impl ProgressSink {
    pub fn new(reporter: Arc<dyn StatusReporter>) -> Self {
        Self {
            reporter,
            floor: Arc::new(AtomicU8::new(0)),
        }
    }

    #[allow(dead_code)]
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopReporter))
    }

    pub fn message(&self, message: &str) {
        self.reporter.report(message, None);
    }

    pub fn update(&self, message: &str, percent: u8) {
        let clamped = percent.min(100);
        let prev = self.floor.fetch_max(clamped, Ordering::SeqCst);
        self.reporter.report(message, Some(prev.max(clamped)));
    }
}

/// Map `done` of `total` units onto the `[lo, hi]` percent sub-range.
pub fn map_range(done: u64, total: u64, lo: u8, hi: u8) -> u8 {
    debug_assert!(lo <= hi);
    if total == 0 || done >= total {
        return hi;
    }
    let span = (hi - lo) as u64;
    lo + ((done * span) / total) as u8
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingReporter {
        pub events: Mutex<Vec<(String, Option<u8>)>>,
    }

    impl StatusReporter for RecordingReporter {
        fn report(&self, message: &str, percent: Option<u8>) {
            self.events
                .lock()
                .unwrap()
                .push((message.to_string(), percent));
        }
    }

    impl RecordingReporter {
        pub(crate) fn percents(&self) -> Vec<u8> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(_, p)| *p)
                .collect()
        }

        pub(crate) fn messages(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(m, _)| m.clone())
                .collect()
        }
    }

    #[test]
    fn percent_never_decreases() {
        let reporter = Arc::new(RecordingReporter::default());
        let sink = ProgressSink::new(reporter.clone());
        sink.update("a", 10);
        sink.update("b", 40);
        sink.update("c", 25);
        sink.update("d", 90);
        assert_eq!(reporter.percents(), vec![10, 40, 40, 90]);
    }

    #[test]
    fn percent_caps_at_one_hundred() {
        let reporter = Arc::new(RecordingReporter::default());
        let sink = ProgressSink::new(reporter.clone());
        sink.update("a", 250);
        assert_eq!(reporter.percents(), vec![100]);
    }

    #[test]
    fn plain_messages_carry_no_percent() {
        let reporter = Arc::new(RecordingReporter::default());
        let sink = ProgressSink::new(reporter.clone());
        sink.message("switching tiers");
        assert_eq!(reporter.events.lock().unwrap()[0].1, None);
    }

    #[test]
    fn map_range_spans_endpoints() {
        assert_eq!(map_range(0, 100, 10, 50), 10);
        assert_eq!(map_range(50, 100, 10, 50), 30);
        assert_eq!(map_range(100, 100, 10, 50), 50);
        assert_eq!(map_range(7, 0, 10, 50), 50);
    }

    #[test]
    fn clones_share_the_floor() {
        let reporter = Arc::new(RecordingReporter::default());
        let sink = ProgressSink::new(reporter.clone());
        let clone = sink.clone();
        sink.update("a", 60);
        clone.update("b", 20);
        assert_eq!(reporter.percents(), vec![60, 60]);
    }
}
