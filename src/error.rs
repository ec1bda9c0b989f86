//! Error taxonomy for the rotation core.
//!
//! Every failure the scheduler or a guard can run into maps onto one
//! [`RotationError`] variant. Only [`RotationError::Config`] and
//! [`RotationError::ActorGone`] ever reach a caller directly; the others are
//! logged on the path that recovers from them (retry, recovery or stop).

use thiserror::Error;

use crate::surface::SurfaceId;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RotationError {
    /// The destination list is empty or fails validation.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// A surface disappeared underneath the rotation.
    #[error("surface {surface} is no longer available")]
    SurfaceUnavailable { surface: SurfaceId },

    /// Creating or activating surfaces failed.
    #[error("surface activation failed: {error}")]
    Activation { error: String },

    /// A surface did not receive a broadcast.
    #[error("message delivery to surface {surface} failed: {error}")]
    MessageDelivery { surface: SurfaceId, error: String },

    /// Wrong password or a cancelled unlock prompt.
    #[error("unlock challenge failed")]
    UnlockChallenge,

    /// The scheduler task has exited and can no longer take commands.
    #[error("rotation scheduler is not running")]
    ActorGone,
}

impl RotationError {
    pub fn config(reason: impl Into<String>) -> Self {
        RotationError::Config {
            reason: reason.into(),
        }
    }

    pub fn activation(error: impl std::fmt::Display) -> Self {
        RotationError::Activation {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RotationError::Config { .. } => "config_error",
            RotationError::SurfaceUnavailable { .. } => "surface_unavailable",
            RotationError::Activation { .. } => "activation_failure",
            RotationError::MessageDelivery { .. } => "message_delivery_failure",
            RotationError::UnlockChallenge => "unlock_challenge_failure",
            RotationError::ActorGone => "actor_gone",
        }
    }

    /// Whether the scheduler handles this error on its own (recovery or drop)
    /// instead of surfacing it to the caller.
    pub fn is_self_healing(&self) -> bool {
        matches!(
            self,
            RotationError::SurfaceUnavailable { .. } | RotationError::MessageDelivery { .. }
        )
    }
}

pub type RotationResult<T> = Result<T, RotationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(RotationError::config("empty").as_label(), "config_error");
        assert_eq!(
            RotationError::SurfaceUnavailable {
                surface: SurfaceId(3)
            }
            .as_label(),
            "surface_unavailable"
        );
        assert_eq!(RotationError::UnlockChallenge.as_label(), "unlock_challenge_failure");
    }

    #[test]
    fn only_surface_and_delivery_errors_self_heal() {
        assert!(RotationError::MessageDelivery {
            surface: SurfaceId(1),
            error: "closed".into()
        }
        .is_self_healing());
        assert!(!RotationError::activation("boom").is_self_healing());
        assert!(!RotationError::config("empty").is_self_healing());
    }

    #[test]
    fn config_error_message_carries_reason() {
        let err = RotationError::config("no destinations configured");
        assert_eq!(
            err.to_string(),
            "invalid configuration: no destinations configured"
        );
    }
}
