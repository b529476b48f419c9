//! Progress reporting for long batch runs.

use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct ProgressState {
    current: usize,
    last_reported: usize,
    started_at: Option<Instant>,
}

/// Tracks progress through a known total and reports every
/// `report_interval` items to an injected writer (typically stderr).
pub struct ProgressTracker<W: Write + Send> {
    writer: Mutex<W>,
    total: usize,
    report_interval: usize,
    state: Mutex<ProgressState>,
}

impl<W: Write + Send> ProgressTracker<W> {
    pub fn new(writer: W, total: usize, report_interval: usize) -> Self {
        ProgressTracker {
            writer: Mutex::new(writer),
            total,
            report_interval: report_interval.max(1),
            state: Mutex::new(ProgressState {
                current: 0,
                last_reported: 0,
                started_at: None,
            }),
        }
    }

    /// Begin tracking. Resets any prior progress.
    pub fn start(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.started_at = Some(Instant::now());
        state.current = 0;
        state.last_reported = 0;
    }

    /// Set progress to an absolute value, capped at the total.
    pub fn update(&self, current: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.started_at.is_none() {
            return;
        }
        state.current = current.min(self.total);
        self.maybe_report(&mut state);
    }

    /// Advance progress by `delta`, capped at the total.
    pub fn increment(&self, delta: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.started_at.is_none() {
            return;
        }
        state.current = state.current.saturating_add(delta).min(self.total);
        self.maybe_report(&mut state);
    }

    /// Mark the run complete and print the final line.
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.started_at.is_none() {
            return;
        }
        state.current = self.total;
        self.report(&state);
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(writer);
    }

    /// Time since [`start`].
    ///
    /// [`start`]: ProgressTracker::start
    pub fn elapsed(&self) -> Duration {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    fn maybe_report(&self, state: &mut ProgressState) {
        if state.current - state.last_reported >= self.report_interval {
            self.report(state);
            state.last_reported = state.current;
        }
    }

    fn report(&self, state: &ProgressState) {
        let elapsed = state
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or(Duration::ZERO);
        let rate = if elapsed.as_secs_f64() > 0.0 {
            state.current as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let percentage = if self.total > 0 {
            state.current as f64 / self.total as f64 * 100.0
        } else {
            0.0
        };
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let _ = write!(
            writer,
            "\rProgress: {}/{} ({percentage:.1}%) - {rate:.1} records/s",
            state.current, self.total
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Writer capturing output for assertions.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    #[test]
    fn test_reports_at_interval() {
        let buffer = SharedBuffer::default();
        let tracker = ProgressTracker::new(buffer.clone(), 100, 10);
        tracker.start();

        tracker.update(5);
        assert!(buffer.contents().is_empty(), "below interval, no report yet");

        tracker.update(10);
        assert!(buffer.contents().contains("10/100"));
    }

    #[test]
    fn test_increment_caps_at_total() {
        let buffer = SharedBuffer::default();
        let tracker = ProgressTracker::new(buffer.clone(), 10, 1);
        tracker.start();
        tracker.increment(25);
        assert!(buffer.contents().contains("10/10"));
    }

    #[test]
    fn test_finish_prints_final_line() {
        let buffer = SharedBuffer::default();
        let tracker = ProgressTracker::new(buffer.clone(), 7, 100);
        tracker.start();
        tracker.update(3);
        tracker.finish();
        let contents = buffer.contents();
        assert!(contents.contains("7/7"));
        assert!(contents.contains("100.0%"));
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn test_updates_before_start_are_ignored() {
        let buffer = SharedBuffer::default();
        let tracker = ProgressTracker::new(buffer.clone(), 10, 1);
        tracker.update(5);
        tracker.finish();
        assert!(buffer.contents().is_empty());
        assert_eq!(tracker.elapsed(), Duration::ZERO);
    }
}
