use std::{future::Future, sync::Arc, time::Duration};

use anyhow::anyhow;
use chrono::Utc;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{RotationError, RotationResult},
    models::{validation::validate_config, KioskConfig},
    protocol::{ActivationState, Command, CommandReply, SurfaceMessage},
    surface::{liveness, DisplayMode, SurfaceDriver, SurfaceId},
};

use super::{
    schedule,
    timers::{Deadlines, Periodic},
    RotationPhase, RotationState, RotationStatus,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const IDLE_AUTO_RESUME_AFTER: Duration = Duration::from_secs(180);

/// Timing knobs of the scheduler.
#[derive(Debug, Clone)]
pub struct RotationSettings {
    pub tick_interval: Duration,
    pub sweep_interval: Duration,
    /// Wait after opening surfaces before the first activation.
    pub settle_delay: Duration,
    /// Upper bound for every driver call.
    pub driver_timeout: Duration,
    /// Resume a paused rotation after this long without activity.
    pub idle_auto_resume: Option<Duration>,
    pub idle_check_interval: Duration,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
            settle_delay: Duration::from_secs(2),
            driver_timeout: Duration::from_secs(10),
            idle_auto_resume: None,
            idle_check_interval: Duration::from_secs(30),
        }
    }
}

impl RotationSettings {
    pub fn with_idle_auto_resume(mut self) -> Self {
        self.idle_auto_resume = Some(IDLE_AUTO_RESUME_AFTER);
        self
    }
}

type Reply = oneshot::Sender<RotationResult<CommandReply>>;

enum Event {
    Request {
        command: Command,
        reply: Option<Reply>,
    },
    SwitchDue { generation: u64 },
    RefreshDue { generation: u64 },
    Tick { generation: u64 },
    Status {
        reply: oneshot::Sender<RotationStatus>,
    },
    Sweep,
    IdleCheck,
}

/// Handle to the rotation scheduler task. Cheap to clone; the task exits
/// when the last handle is dropped or on [`RotationController::shutdown`].
#[derive(Clone)]
pub struct RotationController {
    events: mpsc::UnboundedSender<Event>,
    cancel: CancellationToken,
}

impl RotationController {
    pub fn spawn(
        driver: Arc<dyn SurfaceDriver>,
        config: watch::Receiver<KioskConfig>,
        settings: RotationSettings,
    ) -> (Self, JoinHandle<()>) {
        let (events, queue) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let actor = RotationActor::new(driver, settings, config.borrow().clone(), events.downgrade());
        let task = tokio::spawn(actor.run(queue, config, cancel.clone()));

        (Self { events, cancel }, task)
    }

    /// Runs a command and waits for its reply.
    pub async fn execute(&self, command: Command) -> RotationResult<CommandReply> {
        let (reply, answer) = oneshot::channel();
        self.events
            .send(Event::Request {
                command,
                reply: Some(reply),
            })
            .map_err(|_| RotationError::ActorGone)?;
        answer.await.map_err(|_| RotationError::ActorGone)?
    }

    /// Queues a command without waiting for the outcome.
    pub fn notify(&self, command: Command) -> RotationResult<()> {
        self.events
            .send(Event::Request {
                command,
                reply: None,
            })
            .map_err(|_| RotationError::ActorGone)
    }

    pub async fn start(&self) -> RotationResult<()> {
        self.execute(Command::Start).await.map(|_| ())
    }

    pub async fn stop(&self) -> RotationResult<()> {
        self.execute(Command::Stop).await.map(|_| ())
    }

    pub async fn pause(&self) -> RotationResult<()> {
        self.execute(Command::Pause).await.map(|_| ())
    }

    pub async fn resume(&self) -> RotationResult<()> {
        self.execute(Command::Resume).await.map(|_| ())
    }

    pub async fn skip_to_next(&self) -> RotationResult<()> {
        self.execute(Command::SkipToNext).await.map(|_| ())
    }

    pub async fn set_unlock(&self, unlocked: bool) -> RotationResult<()> {
        self.execute(Command::SetUnlock(unlocked)).await.map(|_| ())
    }

    pub async fn set_hover_only(&self, hover_only: bool) -> RotationResult<()> {
        self.execute(Command::SetHoverOnly(hover_only)).await.map(|_| ())
    }

    pub async fn record_activity(&self) -> RotationResult<()> {
        self.execute(Command::RecordActivity).await.map(|_| ())
    }

    pub async fn pause_destination(&self, id: impl Into<String>) -> RotationResult<()> {
        self.execute(Command::PauseDestination(id.into()))
            .await
            .map(|_| ())
    }

    pub async fn resume_destination(&self, id: impl Into<String>) -> RotationResult<()> {
        self.execute(Command::ResumeDestination(id.into()))
            .await
            .map(|_| ())
    }

    pub async fn request_state(&self, surface: SurfaceId) -> RotationResult<()> {
        self.execute(Command::RequestState(surface)).await.map(|_| ())
    }

    pub async fn status(&self) -> RotationResult<RotationStatus> {
        let (reply, answer) = oneshot::channel();
        self.events
            .send(Event::Status { reply })
            .map_err(|_| RotationError::ActorGone)?;
        answer.await.map_err(|_| RotationError::ActorGone)
    }

    /// Stops the rotation and ends the scheduler task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

struct RotationActor {
    driver: Arc<dyn SurfaceDriver>,
    settings: RotationSettings,
    config: KioskConfig,
    state: RotationState,
    /// Bumped whenever deadlines or the ticker are replaced.
    generation: u64,
    deadlines: Deadlines,
    ticker: Option<Periodic>,
    sweeper: Option<Periodic>,
    idle_watch: Option<Periodic>,
    unlocked: bool,
    hover_only: bool,
    last_activity: Instant,
    events: mpsc::WeakUnboundedSender<Event>,
}

impl RotationActor {
    fn new(
        driver: Arc<dyn SurfaceDriver>,
        settings: RotationSettings,
        config: KioskConfig,
        events: mpsc::WeakUnboundedSender<Event>,
    ) -> Self {
        let hover_only = config.hover_only_mode;
        Self {
            driver,
            settings,
            config,
            state: RotationState::new(),
            generation: 0,
            deadlines: Deadlines::default(),
            ticker: None,
            sweeper: None,
            idle_watch: None,
            unlocked: false,
            hover_only,
            last_activity: Instant::now(),
            events,
        }
    }

    async fn run(
        mut self,
        mut queue: mpsc::UnboundedReceiver<Event>,
        mut config_rx: watch::Receiver<KioskConfig>,
        cancel: CancellationToken,
    ) {
        let mut watching_config = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = queue.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                changed = config_rx.changed(), if watching_config => {
                    if changed.is_err() {
                        log_debug!("configuration store dropped; keeping current configuration");
                        watching_config = false;
                        continue;
                    }
                    let config = config_rx.borrow_and_update().clone();
                    self.apply_config(config).await;
                }
            }
        }

        self.stop().await;
        log_info!("rotation scheduler exited");
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Request { command, reply } => {
                let name = command.name();
                let outcome = self.handle_command(command).await;
                match &outcome {
                    Err(err) if err.is_self_healing() => {
                        log_debug!("command {} skipped ({}): {}", name, err.as_label(), err);
                    }
                    Err(err) => log_warn!("command {} failed ({}): {}", name, err.as_label(), err),
                    Ok(_) => {}
                }
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            Event::SwitchDue { generation } if generation == self.generation => {
                self.switch().await;
            }
            Event::RefreshDue { generation } if generation == self.generation => {
                self.deadlines.refresh_fired();
                self.refresh_next().await;
            }
            Event::Tick { generation } if generation == self.generation => {
                self.tick().await;
            }
            Event::SwitchDue { .. } | Event::RefreshDue { .. } | Event::Tick { .. } => {
                log_debug!("dropping stale timer event");
            }
            Event::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Event::Sweep => self.sweep().await,
            Event::IdleCheck => self.idle_check().await,
        }
    }

    async fn handle_command(&mut self, command: Command) -> RotationResult<CommandReply> {
        match command {
            Command::Start => {
                self.start().await?;
                Ok(CommandReply::ack("started"))
            }
            Command::Stop => {
                self.stop().await;
                Ok(CommandReply::ack("stopped"))
            }
            Command::ExitKiosk => {
                log_info!("exit requested by a surface");
                self.stop().await;
                Ok(CommandReply::ack("stopped"))
            }
            Command::Pause => {
                self.pause().await;
                Ok(CommandReply::ack("paused"))
            }
            Command::Resume => {
                self.resume().await;
                Ok(CommandReply::ack("resumed"))
            }
            Command::SkipToNext => {
                if self.state.phase != RotationPhase::Running {
                    return Ok(CommandReply::ack("not running"));
                }
                self.switch().await;
                Ok(CommandReply::ack("skipped"))
            }
            Command::SetUnlock(unlocked) => {
                self.set_unlock(unlocked).await;
                Ok(CommandReply::ack(if unlocked { "unlocked" } else { "locked" }))
            }
            Command::SetHoverOnly(hover_only) => {
                self.hover_only = hover_only;
                self.broadcast_state().await;
                Ok(CommandReply::ack("hover-only updated"))
            }
            Command::GetStatus => Ok(CommandReply::Status(self.status())),
            Command::RecordActivity => {
                self.last_activity = Instant::now();
                Ok(CommandReply::ack("activity recorded"))
            }
            Command::PauseDestination(id) => {
                self.pause_destination(&id)?;
                Ok(CommandReply::ack("destination paused"))
            }
            Command::ResumeDestination(id) => {
                self.resume_destination(&id).await?;
                Ok(CommandReply::ack("destination resumed"))
            }
            Command::RequestState(surface) => {
                self.send_state_to(surface).await?;
                Ok(CommandReply::ack("state sent"))
            }
        }
    }

    async fn start(&mut self) -> RotationResult<()> {
        if self.state.phase != RotationPhase::Stopped {
            log_warn!("start ignored: rotation is already {:?}", self.state.phase);
            return Ok(());
        }
        validate_config(&self.config)?;

        log_info!(
            "starting rotation across {} destinations",
            self.config.destinations.len()
        );
        let surfaces = match self.open_surfaces().await {
            Ok(surfaces) => surfaces,
            Err(err) => {
                self.stop().await;
                return Err(err);
            }
        };

        self.state
            .begin(&self.config.destinations, surfaces, Utc::now());
        self.start_sweeper();

        if let Err(err) = self.activate_current().await {
            log_warn!("initial activation failed: {}; attempting recovery", err);
            if let Err(err) = self.recover().await {
                self.stop().await;
                return Err(err);
            }
            return Ok(());
        }

        self.broadcast_state().await;
        self.schedule_full();
        Ok(())
    }

    async fn stop(&mut self) {
        self.generation += 1;
        self.deadlines.cancel_all();
        self.ticker = None;
        self.sweeper = None;
        self.idle_watch = None;

        let was = self.state.phase;
        for surface in std::mem::take(&mut self.state.surfaces) {
            if let Err(err) = self.bounded("close", self.driver.close(surface)).await {
                log_debug!("closing surface {} failed: {:#}", surface, err);
            }
        }
        self.state.reset();
        self.unlocked = false;

        if was != RotationPhase::Stopped {
            log_info!("rotation stopped");
        }
    }

    async fn pause(&mut self) {
        if self.state.phase != RotationPhase::Running {
            log_debug!("pause ignored while {:?}", self.state.phase);
            return;
        }

        let remaining = self.state.freeze(Instant::now());
        self.cancel_schedule();
        self.state.set_all_paused(true);
        self.state.mark_paused(Utc::now());
        self.last_activity = Instant::now();
        log_info!("rotation paused with {:?} remaining", remaining);

        self.broadcast(&SurfaceMessage::PauseState { paused: true })
            .await;
        self.start_idle_watch();
    }

    async fn resume(&mut self) {
        if self.state.phase != RotationPhase::Paused {
            log_debug!("resume ignored while {:?}", self.state.phase);
            return;
        }

        self.idle_watch = None;
        self.state.mark_resumed(Utc::now());
        self.state.set_all_paused(false);
        self.broadcast(&SurfaceMessage::PauseState { paused: false })
            .await;

        let remaining = self.state.active_remaining(Instant::now());
        log_info!("rotation resumed with {:?} remaining", remaining);
        if remaining.is_zero() {
            self.switch().await;
        } else {
            self.schedule(remaining);
        }
    }

    async fn set_unlock(&mut self, unlocked: bool) {
        self.unlocked = unlocked;
        if self.config.mirror_unlock {
            self.broadcast(&SurfaceMessage::UnlockState { unlocked })
                .await;
        }
    }

    fn pause_destination(&mut self, id: &str) -> RotationResult<()> {
        let index = self.destination_index(id)?;
        if self.state.timers[index].paused {
            return Ok(());
        }

        if index == self.state.active_index && self.state.phase == RotationPhase::Running {
            self.state.freeze(Instant::now());
            self.cancel_schedule();
        }
        self.state.timers[index].paused = true;
        log_info!("destination {} paused", id);
        Ok(())
    }

    async fn resume_destination(&mut self, id: &str) -> RotationResult<()> {
        let index = self.destination_index(id)?;
        if !self.state.timers[index].paused {
            return Ok(());
        }

        self.state.timers[index].paused = false;
        log_info!("destination {} resumed", id);
        if index == self.state.active_index && self.state.phase == RotationPhase::Running {
            let remaining = self.state.active_remaining(Instant::now());
            if remaining.is_zero() {
                self.switch().await;
            } else {
                self.schedule(remaining);
            }
        }
        Ok(())
    }

    fn destination_index(&self, id: &str) -> RotationResult<usize> {
        let index = self
            .config
            .destinations
            .iter()
            .position(|dest| dest.id == id)
            .ok_or_else(|| RotationError::config(format!("unknown destination '{id}'")))?;
        if index >= self.state.timers.len() {
            return Err(RotationError::config("rotation is not running"));
        }
        Ok(index)
    }

    async fn send_state_to(&mut self, surface: SurfaceId) -> RotationResult<()> {
        if !self.state.surfaces.contains(&surface) {
            return Err(RotationError::SurfaceUnavailable { surface });
        }
        if let Some(state) = self.activation_state() {
            self.deliver(surface, &SurfaceMessage::Activated(state)).await;
        }
        if self.state.active_surface() == Some(surface) {
            self.deliver(surface, &SurfaceMessage::BecameActive).await;
        }
        Ok(())
    }

    /// Advances to the next destination.
    async fn switch(&mut self) {
        if self.state.phase != RotationPhase::Running {
            return;
        }
        self.cancel_schedule();

        let outgoing = self.state.active_surface();
        let next_index = self.state.next_index();
        let incoming = self.state.surfaces.get(next_index).copied();
        let exists = match incoming {
            Some(surface) => {
                liveness::exists_within(&*self.driver, surface, self.settings.driver_timeout).await
            }
            None => false,
        };

        self.state.activate_index(next_index, Utc::now());
        let Some(incoming) = incoming.filter(|_| exists) else {
            log_warn!(
                "destination {} has no live surface; recovering",
                next_index
            );
            self.recover_or_stop().await;
            return;
        };

        if let Some(outgoing) = outgoing {
            self.deliver(outgoing, &SurfaceMessage::BecameInactive).await;
        }
        if let Err(err) = self.activate_surface(incoming).await {
            log_warn!("{}; recovering", err);
            self.recover_or_stop().await;
            return;
        }

        log_debug!("switched to destination {}", next_index);
        self.broadcast_state().await;
        self.schedule_full();
    }

    async fn recover_or_stop(&mut self) {
        if let Err(err) = self.recover().await {
            log_error!(
                "recovery failed ({}): {}; stopping rotation",
                err.as_label(),
                err
            );
            self.stop().await;
        }
    }

    /// Brings the surface set back in line with the destination list and
    /// re-activates the current index.
    async fn recover(&mut self) -> RotationResult<()> {
        self.cancel_schedule();

        let expected = self.config.destinations.len();
        let report = liveness::probe(
            &*self.driver,
            &self.state.surfaces,
            self.settings.driver_timeout,
        )
        .await;

        if report.all_alive() && report.alive.len() == expected {
            log_info!("all {} surfaces still exist; adopting them", expected);
        } else {
            log_warn!(
                "{} of {} surfaces missing; rebuilding the surface set",
                expected.saturating_sub(report.alive.len()),
                expected
            );
            for surface in report.alive {
                if let Err(err) = self.bounded("close", self.driver.close(surface)).await {
                    log_debug!("closing surface {} failed: {:#}", surface, err);
                }
            }
            self.state.surfaces.clear();
            self.state.surfaces = self.open_surfaces().await?;
        }

        self.activate_current().await?;
        self.broadcast_state().await;

        let remaining = self.state.active_remaining(Instant::now());
        if self.state.phase == RotationPhase::Running {
            self.schedule(remaining);
        } else {
            self.state.hold(remaining);
        }
        Ok(())
    }

    async fn refresh_next(&mut self) {
        if self.state.phase != RotationPhase::Running {
            return;
        }
        let next_index = self.state.next_index();
        let Some(surface) = self.state.surfaces.get(next_index).copied() else {
            return;
        };
        if !liveness::exists_within(&*self.driver, surface, self.settings.driver_timeout).await {
            log_debug!("refresh skipped: surface {} is gone", surface);
            return;
        }
        match self.bounded("reload", self.driver.reload(surface)).await {
            Ok(()) => log_debug!("pre-refreshed destination {}", next_index),
            Err(err) => log_warn!("reloading surface {} failed: {:#}", surface, err),
        }
    }

    async fn tick(&mut self) {
        if self.state.phase != RotationPhase::Running {
            return;
        }
        self.state.tick();
        let (Some(surface), Some(timer)) = (self.state.active_surface(), self.state.active_timer())
        else {
            return;
        };
        let message = SurfaceMessage::Tick {
            current_timer: timer.view(),
        };
        self.deliver(surface, &message).await;
    }

    async fn sweep(&mut self) {
        if self.state.phase != RotationPhase::Running {
            return;
        }
        let report = liveness::probe(
            &*self.driver,
            &self.state.surfaces,
            self.settings.driver_timeout,
        )
        .await;
        if report.all_alive() && report.alive.len() == self.config.destinations.len() {
            if !self.schedule_stalled() {
                return;
            }
            log_warn!("rotation is running with nothing scheduled; recovering");
        } else {
            log_warn!(
                "liveness sweep found missing surfaces {:?}; recovering",
                report.missing
            );
        }
        if let Err(err) = self.recover().await {
            log_error!(
                "recovery after liveness sweep failed ({}): {}; retrying on next sweep",
                err.as_label(),
                err
            );
        }
    }

    async fn idle_check(&mut self) {
        let Some(window) = self.settings.idle_auto_resume else {
            return;
        };
        if self.state.phase != RotationPhase::Paused {
            return;
        }
        if self.last_activity.elapsed() >= window {
            log_info!("no activity for {:?}; resuming rotation", window);
            self.resume().await;
        }
    }

    async fn apply_config(&mut self, config: KioskConfig) {
        if config == self.config {
            return;
        }

        if self.state.phase == RotationPhase::Stopped {
            self.hover_only = config.hover_only_mode;
            self.config = config;
            log_debug!("configuration updated while stopped");
            return;
        }
        if let Err(err) = validate_config(&config) {
            log_warn!("ignoring configuration update: {}", err);
            return;
        }

        let previous = std::mem::replace(&mut self.config, config);
        self.hover_only = self.config.hover_only_mode;
        log_info!(
            "configuration changed while {:?}; re-deriving schedule",
            self.state.phase
        );
        self.cancel_schedule();

        let active_id = previous
            .destinations
            .get(self.state.active_index)
            .map(|dest| dest.id.clone());
        let new_index = active_id
            .and_then(|id| self.config.destinations.iter().position(|d| d.id == id))
            .unwrap_or(0);

        if previous.addresses() != self.config.addresses()
            || previous.kiosk_mode != self.config.kiosk_mode
        {
            for surface in std::mem::take(&mut self.state.surfaces) {
                if let Err(err) = self.bounded("close", self.driver.close(surface)).await {
                    log_debug!("closing surface {} failed: {:#}", surface, err);
                }
            }
            match self.open_surfaces().await {
                Ok(surfaces) => self.state.surfaces = surfaces,
                Err(err) => {
                    log_error!("rebuilding surfaces failed: {}; stopping rotation", err);
                    self.stop().await;
                    return;
                }
            }
        }

        self.state.reset_timers(&self.config.destinations);
        self.state.activate_index(new_index, Utc::now());
        if let Err(err) = self.activate_current().await {
            log_warn!("{}; recovering", err);
            self.recover_or_stop().await;
            return;
        }
        self.broadcast_state().await;

        if self.state.phase == RotationPhase::Running {
            self.schedule_full();
        }
    }

    fn status(&self) -> RotationStatus {
        RotationStatus {
            phase: self.state.phase,
            active_index: self.state.active_index,
            elapsed_seconds: self.state.elapsed_seconds(Utc::now()),
            timers: self.state.timers.clone(),
            surface_count: self.state.surfaces.len(),
            unlocked: self.unlocked,
            pending_deadlines: self.deadlines.armed(),
        }
    }

    /// Opens one surface per destination and waits for them to settle.
    async fn open_surfaces(&self) -> RotationResult<Vec<SurfaceId>> {
        let urls = self.config.addresses();
        let mode = DisplayMode::from_kiosk_flag(self.config.kiosk_mode);
        let surfaces = self
            .bounded("create_surfaces", self.driver.create_surfaces(&urls, mode))
            .await
            .map_err(|err| RotationError::activation(format!("{err:#}")))?;
        if surfaces.len() != urls.len() {
            return Err(RotationError::activation(format!(
                "host opened {} surfaces for {} destinations",
                surfaces.len(),
                urls.len()
            )));
        }

        if !self.settings.settle_delay.is_zero() {
            time::sleep(self.settings.settle_delay).await;
        }
        Ok(surfaces)
    }

    async fn activate_current(&mut self) -> RotationResult<()> {
        let surface = self.state.active_surface().ok_or_else(|| {
            RotationError::activation(format!(
                "no surface for destination {}",
                self.state.active_index
            ))
        })?;
        self.activate_surface(surface).await
    }

    async fn activate_surface(&mut self, surface: SurfaceId) -> RotationResult<()> {
        self.bounded("activate", self.driver.activate(surface))
            .await
            .map_err(|err| RotationError::activation(format!("{err:#}")))?;
        self.deliver(surface, &SurfaceMessage::BecameActive).await;
        Ok(())
    }

    fn activation_state(&self) -> Option<ActivationState> {
        let dest = self.config.destinations.get(self.state.active_index)?;
        let timer = self.state.active_timer()?;
        Some(ActivationState {
            start_time: self.state.activated_at?,
            block_after_ms: u64::try_from(dest.block_after().as_millis()).unwrap_or(u64::MAX),
            current_timer: timer.view(),
            unlocked: self.config.mirror_unlock.then_some(self.unlocked),
            paused: self.state.phase == RotationPhase::Paused,
            allow_clicks: dest.allow_clicks_override,
            unlock_password: self.config.password().map(str::to_owned),
            hover_only: self.hover_only,
        })
    }

    async fn broadcast_state(&self) {
        if let Some(state) = self.activation_state() {
            self.broadcast(&SurfaceMessage::Activated(state)).await;
        }
    }

    async fn broadcast(&self, message: &SurfaceMessage) {
        for &surface in &self.state.surfaces {
            self.deliver(surface, message).await;
        }
    }

    async fn deliver(&self, surface: SurfaceId, message: &SurfaceMessage) {
        if let Err(err) = self
            .bounded("send_message", self.driver.send_message(surface, message))
            .await
        {
            let err = RotationError::MessageDelivery {
                surface,
                error: format!("{err:#}"),
            };
            log_debug!("{} dropped: {}", message.name(), err);
        }
    }

    async fn bounded<T>(
        &self,
        call: &str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        match time::timeout(self.settings.driver_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "{call} timed out after {:?}",
                self.settings.driver_timeout
            )),
        }
    }

    /// Running with no switch armed, as a failed recovery leaves it.
    fn schedule_stalled(&self) -> bool {
        self.state.phase == RotationPhase::Running
            && self.deadlines.armed() == 0
            && !self.state.active_timer_paused()
    }

    fn cancel_schedule(&mut self) {
        self.generation += 1;
        self.deadlines.cancel_all();
        self.ticker = None;
    }

    fn schedule_full(&mut self) {
        let total = self
            .config
            .destinations
            .get(self.state.active_index)
            .map(|dest| dest.interval())
            .unwrap_or(self.settings.tick_interval);
        self.schedule(total);
    }

    /// Arms the switch, the optional refresh and a fresh ticker for the
    /// active destination. A paused destination holds instead.
    fn schedule(&mut self, remaining: Duration) {
        self.cancel_schedule();
        if self.state.active_timer_paused() {
            self.state.hold(remaining);
            log_debug!("destination {} is paused; holding", self.state.active_index);
            return;
        }

        let next_index = self.state.next_index();
        let Some(next) = self.config.destinations.get(next_index) else {
            return;
        };
        let plan = schedule::plan(remaining, next);
        let generation = self.generation;

        if let Some(after) = plan.refresh_after {
            let fire = self.poster(Event::RefreshDue { generation });
            self.deadlines.arm_refresh(after, fire);
        }
        let fire = self.poster(Event::SwitchDue { generation });
        self.deadlines.arm_switch(plan.switch_after, fire);
        self.ticker = Some(self.periodic(self.settings.tick_interval, move || Event::Tick {
            generation,
        }));
        self.state.run_from(remaining, Instant::now());

        log_debug!(
            "scheduled switch in {:?}, refresh {:?}",
            plan.switch_after,
            plan.refresh_after
        );
    }

    fn start_sweeper(&mut self) {
        self.sweeper = Some(self.periodic(self.settings.sweep_interval, || Event::Sweep));
    }

    fn start_idle_watch(&mut self) {
        if self.settings.idle_auto_resume.is_some() {
            self.idle_watch =
                Some(self.periodic(self.settings.idle_check_interval, || Event::IdleCheck));
        }
    }

    fn poster(&self, event: Event) -> impl FnOnce() + Send + 'static {
        let events = self.events.clone();
        move || {
            if let Some(events) = events.upgrade() {
                let _ = events.send(event);
            }
        }
    }

    fn periodic<F>(&self, period: Duration, make: F) -> Periodic
    where
        F: Fn() -> Event + Send + 'static,
    {
        let events = self.events.clone();
        Periodic::every(period, move || match events.upgrade() {
            Some(events) => events.send(make()).is_ok(),
            None => false,
        })
    }
}
