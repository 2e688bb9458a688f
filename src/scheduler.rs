use std::sync::Arc;

use log::info;
use tokio::time::{interval_at, Duration, Instant};

use crate::daemon::Daemon;

const SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Periodic cache age-out. Runs every 6 hours wall-clock regardless of the
/// `CleanUpInterval` config key, which is carried in `Config` for file/env
/// compatibility but does not drive this loop.
pub struct Scheduler {
    daemon: Arc<Daemon>,
}

impl Scheduler {
    pub fn new(daemon: Arc<Daemon>) -> Self {
        Scheduler { daemon }
    }

    pub async fn run(self) {
        // `interval()` fires its first tick immediately; `interval_at` with
        // a start instant one sweep period out matches the original's
        // `time.Sleep(time.Hour * 6)` before the first cleanup.
        let mut ticker = interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            info!("maintenance sweep started");
            self.daemon.cache.clean_up().await;
        }
    }
}
