use std::time::{Duration, Instant};

use log::debug;

/// Single logical retransmission timer with a bounded expiry count.
///
/// The driving loop calls `tick` between byte reads. An expiry clears the
/// armed flag, so the loop retransmits and re-arms, and counts towards the
/// retry budget. Receiving any byte is progress and resets the count.
pub(crate) struct RetryTimer {
    period: Duration,
    limit: u32,
    deadline: Option<Instant>,
    expiries: u32,
}

impl RetryTimer {
    pub fn new(timeout_seconds: u64, max_retransmissions: u32) -> Self {
        RetryTimer {
            period: Duration::from_secs(timeout_seconds),
            limit: max_retransmissions,
            deadline: None,
            expiries: 0,
        }
    }

    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.period);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Poll the deadline; an expiry disarms the timer and counts.
    pub fn tick(&mut self) {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.deadline = None;
                self.expiries += 1;
                debug!(target: "timer", "timeout #{}", self.expiries);
            }
        }
    }

    /// Whether the retry budget is spent.
    pub fn exhausted(&self) -> bool {
        self.expiries >= self.limit
    }

    pub fn expiries(&self) -> u32 {
        self.expiries
    }

    /// A byte arrived; the peer is making observable progress.
    pub fn note_progress(&mut self) {
        self.expiries = 0;
    }

    /// Start a fresh operation: nothing armed, nothing counted.
    pub fn reset(&mut self) {
        self.deadline = None;
        self.expiries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn expiry_disarms_and_counts() {
        let mut timer = RetryTimer::new(0, 2);
        timer.arm();
        assert!(timer.armed());
        thread::sleep(Duration::from_millis(1));
        timer.tick();
        assert!(!timer.armed());
        assert_eq!(timer.expiries(), 1);
        assert!(!timer.exhausted());

        timer.arm();
        thread::sleep(Duration::from_millis(1));
        timer.tick();
        assert!(timer.exhausted());
    }

    #[test]
    fn progress_resets_the_budget() {
        let mut timer = RetryTimer::new(0, 1);
        timer.arm();
        thread::sleep(Duration::from_millis(1));
        timer.tick();
        assert!(timer.exhausted());
        timer.note_progress();
        assert!(!timer.exhausted());
    }
}
