use std::time::{Duration, Instant};

/// Periodic liveness line for long batch loops.
///
/// Reports when either `every_items` items have passed since the last report or `every`
/// has elapsed, whichever comes first.
pub struct ProgressReporter {
    label: &'static str,
    every_items: u64,
    every: Duration,
    started: Instant,
    last_report: Instant,
    last_items: u64,
}

impl ProgressReporter {
    pub fn new(label: &'static str, every_items: u64, every: Duration) -> Self {
        let now = Instant::now();
        Self {
            label,
            every_items: every_items.max(1),
            every,
            started: now,
            last_report: now,
            last_items: 0,
        }
    }

    /// Report if due. `detail` is only rendered when a line is actually emitted.
    pub fn tick(&mut self, items: u64, detail: impl FnOnce() -> String) {
        let due_by_count = items.saturating_sub(self.last_items) >= self.every_items;
        let due_by_time = self.last_report.elapsed() >= self.every;
        if !(due_by_count || due_by_time) {
            return;
        }
        tracing::info!(
            "{} progress: {} items ({:.0}/s) | {}",
            self.label,
            items,
            self.rate(items),
            detail()
        );
        self.last_report = Instant::now();
        self.last_items = items;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Items per second since the reporter was created.
    pub fn rate(&self, items: u64) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 { items as f64 / secs } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_detail_only_when_due() {
        let mut reporter = ProgressReporter::new("test", 10, Duration::from_secs(3600));
        let mut rendered = 0;
        reporter.tick(5, || {
            rendered += 1;
            String::new()
        });
        assert_eq!(rendered, 0);
        reporter.tick(10, || {
            rendered += 1;
            String::new()
        });
        assert_eq!(rendered, 1);
        reporter.tick(15, || {
            rendered += 1;
            String::new()
        });
        assert_eq!(rendered, 1);
    }
}
