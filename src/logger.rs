//! Utilities for logging probing statistics.
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::{sleep, JoinHandle};
use std::time::Duration;

use log::{info, LevelFilter};

/// Initialize `env_logger` at `level`, unless `RUST_LOG` says otherwise.
/// Subsequent calls are no-ops.
pub fn configure_logger(level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_micros()
        .try_init();
}

/// Statistics that can be logged from another thread.
pub type SharedStatistics = Arc<Mutex<dyn Display + Send>>;

/// Periodically log the statistics of a running engine at the `info` level.
pub struct StatisticsLogger {
    handle: JoinHandle<()>,
    stopped: Arc<Mutex<bool>>,
}

impl StatisticsLogger {
    pub fn new(interval: Duration, statistics: Vec<SharedStatistics>) -> Self {
        let stopped = Arc::new(Mutex::new(false));
        let stopped_thr = stopped.clone();
        let handle = thread::spawn(move || {
            let log = || {
                for item in &statistics {
                    info!("{}", item.lock().unwrap());
                }
            };
            let refresh = Duration::from_millis(100)
                .min(interval)
                .max(Duration::from_millis(1));
            let mut elapsed = Duration::from_millis(0);
            while !*stopped_thr.lock().unwrap() {
                sleep(refresh);
                elapsed += refresh;
                if elapsed >= interval {
                    log();
                    elapsed = Duration::from_millis(0);
                }
            }
            log();
        });
        Self { stopped, handle }
    }

    pub fn stop(self) {
        *self.stopped.lock().unwrap() = true;
        let _ = self.handle.join();
    }
}
