use std::time::Duration;

use tokio::time::timeout;

use super::{SurfaceDriver, SurfaceId};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Outcome of checking a surface set for existence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LivenessReport {
    pub alive: Vec<SurfaceId>,
    pub missing: Vec<SurfaceId>,
}

impl LivenessReport {
    pub fn all_alive(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Existence check bounded by `limit`; a check that does not answer in time
/// counts as a missing surface.
pub async fn exists_within(driver: &dyn SurfaceDriver, surface: SurfaceId, limit: Duration) -> bool {
    match timeout(limit, driver.exists(surface)).await {
        Ok(exists) => exists,
        Err(_) => {
            log_warn!(
                "existence check for surface {} timed out (> {:?})",
                surface,
                limit
            );
            false
        }
    }
}

/// Checks every surface in order.
pub async fn probe(
    driver: &dyn SurfaceDriver,
    surfaces: &[SurfaceId],
    limit: Duration,
) -> LivenessReport {
    let mut report = LivenessReport::default();
    for &surface in surfaces {
        if exists_within(driver, surface, limit).await {
            report.alive.push(surface);
        } else {
            report.missing.push(surface);
        }
    }

    if !report.all_alive() {
        log_debug!(
            "liveness probe: {} alive, missing {:?}",
            report.alive.len(),
            report.missing
        );
    }
    report
}
