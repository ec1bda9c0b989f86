//! Surface driver seam.
//!
//! A surface is one visible unit (a browser tab, a webview) hosting one
//! destination. The scheduler never touches surfaces directly; it goes
//! through a [`SurfaceDriver`] supplied by the host environment.

pub mod liveness;
pub mod memory;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::protocol::SurfaceMessage;

pub use memory::MemoryDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DisplayMode {
    Fullscreen,
    #[default]
    Maximized,
}

impl DisplayMode {
    pub fn from_kiosk_flag(kiosk_mode: bool) -> Self {
        if kiosk_mode {
            DisplayMode::Fullscreen
        } else {
            DisplayMode::Maximized
        }
    }
}

/// Host primitives the scheduler drives.
///
/// Every call may suspend; the scheduler bounds each one with a timeout.
#[async_trait]
pub trait SurfaceDriver: Send + Sync {
    /// Opens one surface per address, in order.
    async fn create_surfaces(&self, urls: &[String], mode: DisplayMode) -> Result<Vec<SurfaceId>>;

    /// Brings a surface to the front.
    async fn activate(&self, surface: SurfaceId) -> Result<()>;

    async fn reload(&self, surface: SurfaceId) -> Result<()>;

    async fn exists(&self, surface: SurfaceId) -> bool;

    async fn close(&self, surface: SurfaceId) -> Result<()>;

    /// Delivers a message; fails when the surface is gone or not listening.
    async fn send_message(&self, surface: SurfaceId, message: &SurfaceMessage) -> Result<()>;
}
