use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Countdown of the active destination, in whole seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimerView {
    pub total: u64,
    pub remaining: u64,
}

/// Full state pushed to every surface whenever the visible destination or
/// the rotation state changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActivationState {
    /// When the active destination became visible.
    pub start_time: DateTime<Utc>,
    pub block_after_ms: u64,
    pub current_timer: TimerView,
    /// Absent means "keep whatever the surface currently holds".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocked: Option<bool>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub allow_clicks: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_password: Option<String>,
    #[serde(default)]
    pub hover_only: bool,
}

/// Scheduler to surface messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum SurfaceMessage {
    Activated(ActivationState),
    #[serde(rename_all = "camelCase")]
    Tick {
        current_timer: TimerView,
    },
    PauseState {
        paused: bool,
    },
    UnlockState {
        unlocked: bool,
    },
    BecameActive,
    BecameInactive,
}

impl SurfaceMessage {
    pub fn name(&self) -> &'static str {
        match self {
            SurfaceMessage::Activated(_) => "activated",
            SurfaceMessage::Tick { .. } => "tick",
            SurfaceMessage::PauseState { .. } => "pauseState",
            SurfaceMessage::UnlockState { .. } => "unlockState",
            SurfaceMessage::BecameActive => "becameActive",
            SurfaceMessage::BecameInactive => "becameInactive",
        }
    }
}
