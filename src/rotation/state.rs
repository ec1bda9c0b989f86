use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::models::Destination;
use crate::protocol::TimerView;
use crate::surface::SurfaceId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RotationPhase {
    Stopped,
    Running,
    Paused,
}

impl Default for RotationPhase {
    fn default() -> Self {
        RotationPhase::Stopped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerEntry {
    pub destination_id: String,
    pub total: u64,
    pub remaining: u64,
    pub paused: bool,
}

impl TimerEntry {
    pub fn for_destination(dest: &Destination) -> Self {
        Self {
            destination_id: dest.id.clone(),
            total: dest.interval_seconds,
            remaining: dest.interval_seconds,
            paused: false,
        }
    }

    pub fn reset(&mut self) {
        self.remaining = self.total;
    }

    pub fn tick(&mut self) {
        if !self.paused {
            self.remaining = self.remaining.saturating_sub(1);
        }
    }

    pub fn view(&self) -> TimerView {
        TimerView {
            total: self.total,
            remaining: self.remaining,
        }
    }
}

/// Answer to `getStatus`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationStatus {
    pub phase: RotationPhase,
    pub active_index: usize,
    pub elapsed_seconds: u64,
    pub timers: Vec<TimerEntry>,
    pub surface_count: usize,
    pub unlocked: bool,
    pub pending_deadlines: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RotationState {
    pub phase: RotationPhase,
    pub active_index: usize,
    pub cycle_started_at: Option<DateTime<Utc>>,
    /// When the active destination last became visible.
    pub activated_at: Option<DateTime<Utc>>,
    pub surfaces: Vec<SurfaceId>,
    pub timers: Vec<TimerEntry>,
    paused_at: Option<DateTime<Utc>>,
    /// Exact remaining time of the active destination as of `running_anchor`;
    /// combines with the anchor to give the live remaining time.
    remaining_baseline: Duration,
    running_anchor: Option<Instant>,
}

impl RotationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(
        &mut self,
        destinations: &[Destination],
        surfaces: Vec<SurfaceId>,
        started_at: DateTime<Utc>,
    ) {
        *self = Self {
            phase: RotationPhase::Running,
            active_index: 0,
            cycle_started_at: Some(started_at),
            activated_at: Some(started_at),
            surfaces,
            timers: destinations.iter().map(TimerEntry::for_destination).collect(),
            paused_at: None,
            remaining_baseline: destinations
                .first()
                .map(Destination::interval)
                .unwrap_or_default(),
            running_anchor: None,
        };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn next_index(&self) -> usize {
        if self.timers.is_empty() {
            0
        } else {
            (self.active_index + 1) % self.timers.len()
        }
    }

    pub fn active_surface(&self) -> Option<SurfaceId> {
        self.surfaces.get(self.active_index).copied()
    }

    pub fn active_timer(&self) -> Option<&TimerEntry> {
        self.timers.get(self.active_index)
    }

    pub fn active_timer_paused(&self) -> bool {
        self.active_timer().map(|t| t.paused).unwrap_or(false)
    }

    /// Makes `index` the visible destination and resets its countdown.
    pub fn activate_index(&mut self, index: usize, at: DateTime<Utc>) {
        self.active_index = index;
        self.activated_at = Some(at);
        if let Some(timer) = self.timers.get_mut(index) {
            timer.reset();
            self.remaining_baseline = Duration::from_secs(timer.total);
        }
        self.running_anchor = None;
    }

    /// Starts counting `remaining` down from `now`.
    pub fn run_from(&mut self, remaining: Duration, now: Instant) {
        self.remaining_baseline = remaining;
        self.running_anchor = Some(now);
    }

    /// Holds the active countdown at `remaining` without running it.
    pub fn hold(&mut self, remaining: Duration) {
        self.remaining_baseline = remaining;
        self.running_anchor = None;
    }

    pub fn active_remaining(&self, now: Instant) -> Duration {
        match self.running_anchor {
            Some(anchor) => self
                .remaining_baseline
                .saturating_sub(now.saturating_duration_since(anchor)),
            None => self.remaining_baseline,
        }
    }

    /// Snapshots the live remaining time and stops the countdown. Returns the
    /// snapshot.
    pub fn freeze(&mut self, now: Instant) -> Duration {
        let remaining = self.active_remaining(now);
        self.hold(remaining);
        if let Some(timer) = self.timers.get_mut(self.active_index) {
            timer.remaining = ceil_secs(remaining).min(timer.total);
        }
        remaining
    }

    pub fn set_all_paused(&mut self, paused: bool) {
        for timer in &mut self.timers {
            timer.paused = paused;
        }
    }

    pub fn tick(&mut self) {
        for timer in &mut self.timers {
            timer.tick();
        }
    }

    pub fn mark_paused(&mut self, at: DateTime<Utc>) {
        self.phase = RotationPhase::Paused;
        self.paused_at = Some(at);
    }

    /// Back to Running; the paused stretch is excluded from elapsed time.
    pub fn mark_resumed(&mut self, at: DateTime<Utc>) {
        if let (Some(paused_at), Some(started)) = (self.paused_at.take(), self.cycle_started_at) {
            self.cycle_started_at = Some(started + (at - paused_at));
        }
        self.phase = RotationPhase::Running;
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        let Some(started) = self.cycle_started_at else {
            return 0;
        };
        let until = self.paused_at.unwrap_or(now);
        (until - started).num_seconds().max(0) as u64
    }

    /// Rebuilds every countdown from a new destination list at full length.
    pub fn reset_timers(&mut self, destinations: &[Destination]) {
        let paused = self.phase == RotationPhase::Paused;
        self.timers = destinations
            .iter()
            .map(|dest| TimerEntry {
                paused,
                ..TimerEntry::for_destination(dest)
            })
            .collect();
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
