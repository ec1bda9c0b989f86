use std::time::Duration;

use crate::models::Destination;

/// Deadlines to arm for the active destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePlan {
    pub switch_after: Duration,
    /// Reload of the upcoming destination, when one fits before the switch.
    pub refresh_after: Option<Duration>,
}

/// The refresh of `next` is armed only when it lands strictly inside the
/// active remaining time: a lead of zero, or one at least as long as
/// `remaining`, skips it.
pub fn plan(remaining: Duration, next: &Destination) -> SchedulePlan {
    let refresh_after = if next.refresh_enabled {
        remaining
            .checked_sub(next.pre_refresh_lead())
            .filter(|offset| !offset.is_zero() && *offset < remaining)
    } else {
        None
    };

    SchedulePlan {
        switch_after: remaining,
        refresh_after,
    }
}
