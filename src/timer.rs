use std::time::{Duration, Instant};

use rand::Rng;

/// A randomized deadline timer, per §4.1.
///
/// Election timers carry a non-zero `splay` to desynchronise peers and avoid split-vote
/// livelock; the leader's heartbeat tick uses zero splay since desynchronising heartbeats
/// serves no purpose.
#[derive(Debug, Clone)]
pub struct Timer {
    interval: Duration,
    splay: Duration,
    deadline: Instant,
}

impl Timer {
    /// Creates a timer whose first deadline is `interval` plus uniform jitter in `[0, splay)`
    /// from now.
    pub fn new(interval: Duration, splay: Duration) -> Self {
        let mut timer = Self { interval, splay, deadline: Instant::now() };
        timer.reset();
        timer
    }

    /// Schedules the next deadline as `now + interval + uniform(0, splay)`.
    pub fn reset(&mut self) {
        let jitter = if self.splay.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..self.splay)
        };
        self.deadline = Instant::now() + self.interval + jitter;
    }

    /// True iff the deadline has passed.
    pub fn timed_out(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_zero_splay_times_out_immediately() {
        let timer = Timer::new(Duration::ZERO, Duration::ZERO);
        assert!(timer.timed_out());
    }

    #[test]
    fn long_interval_has_not_timed_out() {
        let timer = Timer::new(Duration::from_secs(3600), Duration::ZERO);
        assert!(!timer.timed_out());
    }

    #[test]
    fn reset_pushes_deadline_into_the_future() {
        let mut timer = Timer::new(Duration::ZERO, Duration::ZERO);
        assert!(timer.timed_out());
        timer.interval = Duration::from_secs(3600);
        timer.reset();
        assert!(!timer.timed_out());
    }
}
