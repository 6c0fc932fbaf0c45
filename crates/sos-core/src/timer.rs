//! Timer tasks feeding the coordinator's message queue
//!
//! A timer is a spawned task that posts a message for every firing. Each
//! armed timer carries a fresh id; the coordinator drops firings whose id no
//! longer matches the slot, so a tick already queued when the timer was
//! stopped has no effect.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};

/// An armed timer
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    current: Option<(u64, JoinHandle<()>)>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is armed with `handle`
    pub fn arm(&mut self, id: u64, handle: JoinHandle<()>) {
        self.stop();
        self.current = Some((id, handle));
    }

    /// Stop the timer. Safe when nothing is armed.
    pub fn stop(&mut self) {
        if let Some((_, handle)) = self.current.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.current.is_some()
    }

    /// Whether a firing with `id` belongs to the armed timer
    pub fn is_current(&self, id: u64) -> bool {
        matches!(self.current, Some((armed, _)) if armed == id)
    }

    /// Forget a one-shot timer that has fired
    pub fn disarm(&mut self, id: u64) {
        if self.is_current(id) {
            self.current = None;
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Post `make()` every `period`, the first firing immediately
pub(crate) fn spawn_repeating<M, F>(
    period: Duration,
    tx: mpsc::UnboundedSender<M>,
    make: F,
) -> JoinHandle<()>
where
    M: Send + 'static,
    F: Fn() -> M + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tx.send(make()).is_err() {
                break;
            }
        }
    })
}

/// Post `message` once after `delay`
pub(crate) fn spawn_once<M>(delay: Duration, tx: mpsc::UnboundedSender<M>, message: M) -> JoinHandle<()>
where
    M: Send + 'static,
{
    tokio::spawn(async move {
        sleep(delay).await;
        let _ = tx.send(message);
    })
}
