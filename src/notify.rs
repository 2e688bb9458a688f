use std::sync::Mutex;

use log::debug;
use tokio::time::{sleep, Duration};

use crate::flap::Flap;

const QUEUE_INTERVAL: Duration = Duration::from_secs(30);

/// Mail/notification queue. Nothing currently enqueues into it — the
/// scaffolding is wired into `main` with a no-op `notify`, kept in place
/// for a future alerting feature.
pub struct MailQueue {
    events: Mutex<Vec<Flap>>,
}

impl MailQueue {
    pub fn new() -> Self {
        MailQueue {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue(&self, flap: Flap) {
        self.events.lock().unwrap().push(flap);
    }

    /// Returns everything queued so far and empties the queue.
    fn drain(&self) -> Vec<Flap> {
        let mut guard = self.events.lock().unwrap();
        std::mem::take(&mut *guard)
    }

    /// Periodically drains the queue and hands it to `notify`. Runs for
    /// the life of the process; started by the Driver.
    pub async fn run(&self) {
        loop {
            sleep(QUEUE_INTERVAL).await;
            let events = self.drain();
            if !events.is_empty() {
                notify(&events);
            }
        }
    }
}

impl Default for MailQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Sends notifications for queued link events. Unimplemented — email
/// delivery is out of scope for this daemon.
fn notify(events: &[Flap]) {
    debug!("notify: {} link event(s) queued (notification not implemented)", events.len());
}
