//! Clock abstraction for the scheduler.
//!
//! [`SystemTimer`] follows the wall clock. [`ManualTimer`] only moves when a
//! test advances it, so trigger firing can be simulated without waiting.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::sync::watch;

/// Longest single sleep before the wall clock is consulted again.
const MAX_SLEEP_CHUNK: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Timer: Send + Sync + 'static {
    /// Current local time.
    fn now(&self) -> DateTime<Local>;

    /// Resolve once `now() >= deadline`.
    async fn sleep_until(&self, deadline: DateTime<Local>);
}

/// Wall-clock timer.
///
/// Sleeps in bounded chunks and re-reads the clock, so suspend/resume and
/// clock adjustments delay a trigger by at most one chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimer;

#[async_trait]
impl Timer for SystemTimer {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Local>) {
        loop {
            let remaining = match (deadline - Local::now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => return,
            };
            tokio::time::sleep(remaining.min(MAX_SLEEP_CHUNK)).await;
        }
    }
}

/// Test timer whose clock only moves through [`ManualTimer::advance_to`].
#[derive(Debug)]
pub struct ManualTimer {
    now: watch::Sender<DateTime<Local>>,
    sleepers: watch::Sender<Vec<DateTime<Local>>>,
}

impl ManualTimer {
    pub fn new(start: DateTime<Local>) -> Self {
        Self {
            now: watch::Sender::new(start),
            sleepers: watch::Sender::new(Vec::new()),
        }
    }

    /// Move the clock forward, waking every sleeper whose deadline passed.
    pub fn advance_to(&self, to: DateTime<Local>) {
        self.now.send_modify(|now| {
            if to > *now {
                *now = to;
            }
        });
    }

    /// Earliest deadline a sleeper is waiting for that is still in the future.
    ///
    /// Waits until some task sleeps on such a deadline.
    pub async fn next_deadline(&self) -> DateTime<Local> {
        let mut sleepers = self.sleepers.subscribe();
        loop {
            let now = *self.now.borrow();
            if let Some(next) = sleepers.borrow_and_update().iter().filter(|d| **d > now).min() {
                return *next;
            }
            // The sender lives in `self`, so the channel cannot close here.
            if sleepers.changed().await.is_err() {
                return now;
            }
        }
    }

    fn register(&self, deadline: DateTime<Local>) {
        self.sleepers.send_modify(|sleepers| sleepers.push(deadline));
    }

    fn unregister(&self, deadline: DateTime<Local>) {
        self.sleepers.send_modify(|sleepers| {
            if let Some(pos) = sleepers.iter().position(|d| *d == deadline) {
                sleepers.remove(pos);
            }
        });
    }
}

/// Drops a sleeper's registration even if its future is cancelled.
struct Registration<'a> {
    timer: &'a ManualTimer,
    deadline: DateTime<Local>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.timer.unregister(self.deadline);
    }
}

#[async_trait]
impl Timer for ManualTimer {
    fn now(&self) -> DateTime<Local> {
        *self.now.borrow()
    }

    async fn sleep_until(&self, deadline: DateTime<Local>) {
        let mut now = self.now.subscribe();
        if *now.borrow_and_update() >= deadline {
            return;
        }

        self.register(deadline);
        let _registration = Registration {
            timer: self,
            deadline,
        };

        while *now.borrow_and_update() < deadline {
            if now.changed().await.is_err() {
                return;
            }
        }
    }
}
