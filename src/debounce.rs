// File: ./src/debounce.rs
// Restartable single-shot deadline used to coalesce cache writes.
//
// The debouncer holds no thread and no task. Whoever owns the cache asks for
// `deadline()` and calls back in once it has passed (see `service`), which keeps
// the flush on the same execution context as the mutations.
use std::time::{Duration, Instant};

/// Delay between the last mutation and the write, in seconds.
pub const DEFAULT_FLUSH_DELAY_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct FlushDebouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Default for FlushDebouncer {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_FLUSH_DELAY_SECS))
    }
}

impl FlushDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Arm (or re-arm) the deadline one delay from now.
    pub fn restart(&mut self) {
        self.restart_at(Instant::now());
    }

    pub fn restart_at(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}
