//! Spawned one-shot deadlines and periodic loops.
//!
//! Each is a tokio task that posts into the rotation actor's queue when it
//! fires. Dropping the handle aborts the task, so replacing or clearing a
//! slot is a cancellation.

use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

#[derive(Debug)]
pub struct Deadline {
    handle: JoinHandle<()>,
}

impl Deadline {
    pub fn arm<F>(after: Duration, fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let due = Instant::now() + after;
        let handle = tokio::spawn(async move {
            time::sleep_until(due).await;
            fire();
        });
        Self { handle }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The switch and refresh deadlines of the active destination.
#[derive(Debug, Default)]
pub struct Deadlines {
    switch: Option<Deadline>,
    refresh: Option<Deadline>,
}

impl Deadlines {
    pub fn arm_switch<F>(&mut self, after: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.switch = None;
        self.switch = Some(Deadline::arm(after, fire));
    }

    pub fn arm_refresh<F>(&mut self, after: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.refresh = None;
        self.refresh = Some(Deadline::arm(after, fire));
    }

    pub fn cancel_all(&mut self) {
        self.switch = None;
        self.refresh = None;
    }

    pub fn armed(&self) -> usize {
        usize::from(self.switch.is_some()) + usize::from(self.refresh.is_some())
    }

    /// Clears the refresh slot once its deadline has fired.
    pub fn refresh_fired(&mut self) {
        self.refresh = None;
    }
}

/// A loop calling `on_tick` every `period`, first one `period` after spawn.
/// Stops once `on_tick` returns false or the handle is dropped.
#[derive(Debug)]
pub struct Periodic {
    handle: JoinHandle<()>,
}

impl Periodic {
    pub fn every<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !on_tick() {
                    break;
                }
            }
        });
        Self { handle }
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
