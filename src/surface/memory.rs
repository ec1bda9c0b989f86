//! In-process surface host.
//!
//! Keeps surfaces as plain records: which one is in front, how often each was
//! reloaded, and every message delivered to it. A surface can have a listener
//! attached (a guard agent, a test) that receives its messages. Used by the
//! headless binary and by the tests, which also use it to destroy surfaces
//! behind the scheduler's back or to make activation fail.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;

use super::{DisplayMode, SurfaceDriver, SurfaceId};
use crate::protocol::SurfaceMessage;

#[derive(Debug)]
struct SurfaceRecord {
    url: String,
    reloads: u32,
    ready: bool,
    delivered: Vec<SurfaceMessage>,
    listener: Option<mpsc::UnboundedSender<SurfaceMessage>>,
}

#[derive(Debug, Default)]
struct HostState {
    next_id: u64,
    surfaces: BTreeMap<SurfaceId, SurfaceRecord>,
    active: Option<SurfaceId>,
    mode: Option<DisplayMode>,
    create_calls: u32,
    fail_creates: bool,
    fail_activations: bool,
    /// Activations still to refuse before the host behaves again.
    refused_activations: u32,
    delivery_latency: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: Mutex<HostState>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Routes every future message for `surface` to the returned receiver.
    pub fn attach(&self, surface: SurfaceId) -> Option<mpsc::UnboundedReceiver<SurfaceMessage>> {
        let mut state = self.lock();
        let record = state.surfaces.get_mut(&surface)?;
        let (tx, rx) = mpsc::unbounded_channel();
        record.listener = Some(tx);
        record.ready = true;
        Some(rx)
    }

    /// Marks a surface as loaded but not yet listening; deliveries fail.
    pub fn set_ready(&self, surface: SurfaceId, ready: bool) {
        if let Some(record) = self.lock().surfaces.get_mut(&surface) {
            record.ready = ready;
        }
    }

    /// Closes a surface the way a user or a crash would, without telling
    /// the scheduler.
    pub fn destroy(&self, surface: SurfaceId) -> bool {
        let mut state = self.lock();
        if state.active == Some(surface) {
            state.active = None;
        }
        state.surfaces.remove(&surface).is_some()
    }

    pub fn set_fail_activations(&self, fail: bool) {
        self.lock().fail_activations = fail;
    }

    /// Refuses only the next `count` activations.
    pub fn fail_next_activations(&self, count: u32) {
        self.lock().refused_activations = count;
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.lock().fail_creates = fail;
    }

    /// Delays every message delivery, as a slow or hung page would.
    pub fn set_delivery_latency(&self, latency: Option<Duration>) {
        self.lock().delivery_latency = latency;
    }

    pub fn live_surfaces(&self) -> Vec<SurfaceId> {
        self.lock().surfaces.keys().copied().collect()
    }

    pub fn active_surface(&self) -> Option<SurfaceId> {
        self.lock().active
    }

    pub fn url_of(&self, surface: SurfaceId) -> Option<String> {
        self.lock().surfaces.get(&surface).map(|r| r.url.clone())
    }

    pub fn active_url(&self) -> Option<String> {
        let state = self.lock();
        let active = state.active?;
        state.surfaces.get(&active).map(|r| r.url.clone())
    }

    pub fn reload_count(&self, surface: SurfaceId) -> u32 {
        self.lock()
            .surfaces
            .get(&surface)
            .map(|r| r.reloads)
            .unwrap_or(0)
    }

    pub fn delivered(&self, surface: SurfaceId) -> Vec<SurfaceMessage> {
        self.lock()
            .surfaces
            .get(&surface)
            .map(|r| r.delivered.clone())
            .unwrap_or_default()
    }

    pub fn display_mode(&self) -> Option<DisplayMode> {
        self.lock().mode
    }

    /// Number of times a full surface set has been created.
    pub fn create_calls(&self) -> u32 {
        self.lock().create_calls
    }
}

#[async_trait]
impl SurfaceDriver for MemoryDriver {
    async fn create_surfaces(&self, urls: &[String], mode: DisplayMode) -> Result<Vec<SurfaceId>> {
        let mut state = self.lock();
        if state.fail_creates {
            bail!("host refused to open {} surfaces", urls.len());
        }

        state.create_calls += 1;
        state.mode = Some(mode);
        let mut created = Vec::with_capacity(urls.len());
        for url in urls {
            state.next_id += 1;
            let id = SurfaceId(state.next_id);
            state.surfaces.insert(
                id,
                SurfaceRecord {
                    url: url.clone(),
                    reloads: 0,
                    ready: true,
                    delivered: Vec::new(),
                    listener: None,
                },
            );
            created.push(id);
        }
        debug!("opened surfaces {created:?} ({mode:?})");
        Ok(created)
    }

    async fn activate(&self, surface: SurfaceId) -> Result<()> {
        let mut state = self.lock();
        if state.fail_activations {
            bail!("host refused to activate surface {surface}");
        }
        if state.refused_activations > 0 {
            state.refused_activations -= 1;
            bail!("host refused to activate surface {surface}");
        }
        if !state.surfaces.contains_key(&surface) {
            bail!("surface {surface} does not exist");
        }
        state.active = Some(surface);
        Ok(())
    }

    async fn reload(&self, surface: SurfaceId) -> Result<()> {
        let mut state = self.lock();
        let record = state
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| anyhow!("surface {surface} does not exist"))?;
        record.reloads += 1;
        Ok(())
    }

    async fn exists(&self, surface: SurfaceId) -> bool {
        self.lock().surfaces.contains_key(&surface)
    }

    async fn close(&self, surface: SurfaceId) -> Result<()> {
        if self.destroy(surface) {
            Ok(())
        } else {
            bail!("surface {surface} was already closed")
        }
    }

    async fn send_message(&self, surface: SurfaceId, message: &SurfaceMessage) -> Result<()> {
        let latency = self.lock().delivery_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        let record = state
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| anyhow!("surface {surface} does not exist"))?;
        if !record.ready {
            bail!("surface {surface} is not listening yet");
        }

        let listener_gone = record
            .listener
            .as_ref()
            .map(|listener| listener.send(message.clone()).is_err())
            .unwrap_or(false);
        if listener_gone {
            record.listener = None;
            record.ready = false;
            bail!("listener for surface {surface} went away");
        }
        record.delivered.push(message.clone());
        Ok(())
    }
}
