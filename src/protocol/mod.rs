//! Broadcast protocol between the scheduler and its surfaces.
//!
//! The scheduler is the only sender of [`SurfaceMessage`]s; surfaces only
//! answer with [`Command`]s. Nothing here holds state.

pub mod command;
pub mod message;

pub use command::{Command, CommandReply};
pub use message::{ActivationState, SurfaceMessage, TimerView};
