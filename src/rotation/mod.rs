pub mod commands;
pub mod controller;
pub mod schedule;
pub mod state;
pub mod timers;

pub use controller::{RotationController, RotationSettings, IDLE_AUTO_RESUME_AFTER};
pub use state::{RotationPhase, RotationState, RotationStatus, TimerEntry};
