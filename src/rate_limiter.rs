//! Pace probes at a fixed interval.
use std::cmp::max;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

use circular_queue::CircularQueue;

use crate::cancel::Cancellation;

/// A rate limiter spacing successive calls by a target delta.
///
/// The first call returns immediately. Waits longer than the sleep resolution
/// are cancellable sleeps; the remainder is spin-waited.
pub struct RateLimiter {
    sleep_resolution: Duration,
    target_delta: Duration,
    last_tp: Option<Instant>,
    statistics: Arc<Mutex<RateLimiterStatistics>>,
}

impl RateLimiter {
    pub fn new(target_delta: Duration) -> Self {
        RateLimiter {
            sleep_resolution: RateLimiter::sleep_resolution(),
            target_delta,
            last_tp: None,
            statistics: Arc::new(Mutex::new(RateLimiterStatistics::new(target_delta))),
        }
    }

    /// Wait until `target_delta` has elapsed since the previous call.
    /// Returns `false` if `cancel` was triggered while waiting.
    pub fn wait(&mut self, cancel: &Cancellation) -> bool {
        let last_tp = match self.last_tp {
            None => {
                self.last_tp = Some(Instant::now());
                return !cancel.is_cancelled();
            }
            Some(last_tp) => last_tp,
        };

        let mut current_delta = last_tp.elapsed();
        self.statistics
            .lock()
            .unwrap()
            .record_inter_call_delta(current_delta);

        if current_delta < self.target_delta {
            let remaining = self.target_delta - current_delta;
            if self.sleep_resolution < remaining
                && !cancel.sleep(remaining - self.sleep_resolution)
            {
                return false;
            }
            loop {
                current_delta = last_tp.elapsed();
                if current_delta >= self.target_delta {
                    break;
                }
            }
        }

        self.statistics
            .lock()
            .unwrap()
            .record_effective_delta(current_delta);
        self.last_tp = Some(Instant::now());
        !cancel.is_cancelled()
    }

    /// Return a reference to the rate limiter statistics.
    /// This reference can be cloned to read the statistics from another thread.
    pub fn statistics(&self) -> &Arc<Mutex<RateLimiterStatistics>> {
        &self.statistics
    }

    fn sleep_resolution() -> Duration {
        let mut worst_case = Duration::from_nanos(0);
        for _ in 0..5 {
            let start = Instant::now();
            sleep(Duration::from_nanos(1));
            worst_case = max(worst_case, start.elapsed());
        }
        worst_case
    }
}

#[derive(Debug)]
pub struct RateLimiterStatistics {
    target_delta: Duration,
    effective: CircularQueue<f64>,
    inter_call: CircularQueue<f64>,
}

impl RateLimiterStatistics {
    pub fn new(target_delta: Duration) -> Self {
        RateLimiterStatistics {
            target_delta,
            effective: CircularQueue::with_capacity(64),
            inter_call: CircularQueue::with_capacity(64),
        }
    }

    pub fn record_effective_delta(&mut self, delta: Duration) {
        self.effective.push(delta.as_nanos() as f64);
    }

    pub fn record_inter_call_delta(&mut self, delta: Duration) {
        self.inter_call.push(delta.as_nanos() as f64);
    }

    /// The fraction of the target delta spent outside of the rate limiter.
    pub fn average_utilization(&self) -> f64 {
        if self.inter_call.is_empty() || self.target_delta.is_zero() {
            return 0.;
        }
        let average = self.inter_call.iter().sum::<f64>() / self.inter_call.len() as f64;
        average / self.target_delta.as_nanos() as f64
    }

    /// The effective rate achieved, in calls per second.
    pub fn average_rate(&self) -> f64 {
        if self.effective.is_empty() {
            return 0.;
        }
        let average = self.effective.iter().sum::<f64>() / self.effective.len() as f64;
        if average > 0. {
            1_000_000_000. / average
        } else {
            0.
        }
    }
}

impl Display for RateLimiterStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "average_rate={:.2}", self.average_rate())?;
        write!(
            f,
            " average_utilization={:.0}",
            self.average_utilization() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use crate::cancel::Cancellation;
    use crate::rate_limiter::RateLimiter;

    fn measure_time(mut f: impl FnMut()) -> Duration {
        let start = Instant::now();
        f();
        start.elapsed()
    }

    #[test]
    fn test_first_call_is_immediate() {
        let mut rl = RateLimiter::new(Duration::from_secs(10));
        let cancel = Cancellation::new();
        let delta = measure_time(|| assert!(rl.wait(&cancel)));
        assert!(delta < Duration::from_secs(1));
    }

    #[test]
    fn test_spacing() {
        // 5 calls spaced by 20ms should take at-least 80ms.
        let mut rl = RateLimiter::new(Duration::from_millis(20));
        let cancel = Cancellation::new();
        let delta = measure_time(|| {
            for _ in 0..5 {
                rl.wait(&cancel);
            }
        });
        assert!(delta >= Duration::from_millis(80));
        assert!(rl.statistics().lock().unwrap().average_rate() > 0.);
    }

    #[test]
    fn test_cancelled_wait() {
        let mut rl = RateLimiter::new(Duration::from_secs(10));
        let cancel = Cancellation::new();
        rl.wait(&cancel);
        cancel.cancel();
        let delta = measure_time(|| assert!(!rl.wait(&cancel)));
        assert!(delta < Duration::from_secs(1));
    }
}
