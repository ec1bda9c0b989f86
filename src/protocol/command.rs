use serde::{Deserialize, Serialize};

use crate::rotation::RotationStatus;
use crate::surface::SurfaceId;

/// Commands a surface or the settings UI sends to the scheduler.
///
/// The wire shape is `{"action": "...", "data": ...}`; the aliases accept
/// the action names the extension's content script and popup used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum Command {
    Start,
    Stop,
    Pause,
    #[serde(alias = "continue")]
    Resume,
    #[serde(alias = "forceNextTab")]
    SkipToNext,
    #[serde(alias = "setGlobalUnlock")]
    SetUnlock(bool),
    SetHoverOnly(bool),
    GetStatus,
    #[serde(alias = "userActivity")]
    RecordActivity,
    #[serde(alias = "pauseLink")]
    PauseDestination(String),
    #[serde(alias = "continueLink")]
    ResumeDestination(String),
    RequestState(SurfaceId),
    ExitKiosk,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::SkipToNext => "skipToNext",
            Command::SetUnlock(_) => "setUnlock",
            Command::SetHoverOnly(_) => "setHoverOnly",
            Command::GetStatus => "getStatus",
            Command::RecordActivity => "recordActivity",
            Command::PauseDestination(_) => "pauseDestination",
            Command::ResumeDestination(_) => "resumeDestination",
            Command::RequestState(_) => "requestState",
            Command::ExitKiosk => "exitKiosk",
        }
    }
}

/// Reply sent back for every [`Command`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CommandReply {
    Status(RotationStatus),
    Ack { status: String },
    Error { error: String },
}

impl CommandReply {
    pub fn ack(status: impl Into<String>) -> Self {
        CommandReply::Ack {
            status: status.into(),
        }
    }
}
