//! Call duration timer.
//!
//! Started on the transition to connected. Each tick reports the time elapsed
//! since the captured start instant, so late or skipped ticks never skew the
//! reported duration.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::events::CallEvent;

pub struct CallTimer {
    started: Instant,
    handle: JoinHandle<()>,
}

impl CallTimer {
    /// Start ticking every `period`, publishing [`CallEvent::Duration`].
    pub fn start(period: Duration, events: broadcast::Sender<CallEvent>) -> Self {
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(started + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let secs = started.elapsed().as_secs();
                // No subscribers is fine; keep time anyway.
                let _ = events.send(CallEvent::Duration(secs));
            }
        });
        Self { started, handle }
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Stop ticking. Dropping the timer does the same.
    pub fn stop(self) {}
}

impl Drop for CallTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Render seconds as `MM:SS`. Minutes keep counting past 59.
pub fn format_duration(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
