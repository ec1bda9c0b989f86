use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{RotationError, RotationResult},
    protocol::{Command, SurfaceMessage},
    rotation::RotationController,
    surface::SurfaceId,
};

use super::{
    input::{InputEvent, Verdict},
    state::{GuardEffect, GuardState, GuardView, Notice},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Minimum spacing between activity reports to the scheduler.
pub const ACTIVITY_REPORT_EVERY: Duration = Duration::from_secs(10);

/// What the guard wants shown to the visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardSignal {
    Notice(Notice),
    PromptPassword,
}

/// Entries of the guard's on-screen menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Pause,
    Resume,
    SkipToNext,
    Lock,
    ExitKiosk,
}

enum GuardRequest {
    Intercept {
        event: InputEvent,
        reply: oneshot::Sender<Verdict>,
    },
    Answer {
        answer: Option<String>,
        reply: oneshot::Sender<RotationResult<()>>,
    },
    Menu {
        action: MenuAction,
    },
    View {
        reply: oneshot::Sender<Option<GuardView>>,
    },
}

/// Runs the access guard of one surface as a tokio task.
pub struct GuardAgent {
    surface: SurfaceId,
    requests: mpsc::UnboundedSender<GuardRequest>,
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl GuardAgent {
    /// Starts guarding `surface`, fed by the scheduler messages in
    /// `messages`. The returned receiver carries notices and password
    /// prompts.
    pub fn start(
        surface: SurfaceId,
        messages: mpsc::UnboundedReceiver<SurfaceMessage>,
        controller: RotationController,
    ) -> (Self, mpsc::UnboundedReceiver<GuardSignal>) {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();

        let worker = GuardWorker {
            surface,
            controller,
            clock: GuardClock::start(),
            guard: None,
            signals,
            last_report: None,
        };
        let handle = tokio::spawn(guard_loop(
            worker,
            messages,
            request_rx,
            cancel_token.clone(),
        ));

        let agent = Self {
            surface,
            requests,
            handle: Some(handle),
            cancel_token,
        };
        (agent, signal_rx)
    }

    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    /// Verdict for one input event. With no guard running the event passes.
    pub async fn intercept(&self, event: InputEvent) -> Verdict {
        let (reply, verdict) = oneshot::channel();
        if self
            .requests
            .send(GuardRequest::Intercept { event, reply })
            .is_err()
        {
            return Verdict::Allow;
        }
        verdict.await.unwrap_or(Verdict::Allow)
    }

    /// Answers a password prompt; `None` cancels it.
    pub async fn answer_challenge(&self, answer: Option<String>) -> RotationResult<()> {
        let (reply, outcome) = oneshot::channel();
        self.requests
            .send(GuardRequest::Answer { answer, reply })
            .map_err(|_| RotationError::ActorGone)?;
        outcome.await.map_err(|_| RotationError::ActorGone)?
    }

    pub fn menu(&self, action: MenuAction) -> RotationResult<()> {
        self.requests
            .send(GuardRequest::Menu { action })
            .map_err(|_| RotationError::ActorGone)
    }

    pub async fn view(&self) -> Option<GuardView> {
        let (reply, view) = oneshot::channel();
        self.requests.send(GuardRequest::View { reply }).ok()?;
        view.await.ok().flatten()
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("guard task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

/// Wall clock that advances with the tokio clock.
struct GuardClock {
    wall: DateTime<Utc>,
    mono: Instant,
}

impl GuardClock {
    fn start() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.mono.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }

    fn instant_at(&self, at: DateTime<Utc>) -> Instant {
        self.mono + (at - self.wall).to_std().unwrap_or(Duration::ZERO)
    }
}

struct GuardWorker {
    surface: SurfaceId,
    controller: RotationController,
    clock: GuardClock,
    guard: Option<GuardState>,
    signals: mpsc::UnboundedSender<GuardSignal>,
    last_report: Option<Instant>,
}

async fn guard_loop(
    mut worker: GuardWorker,
    mut messages: mpsc::UnboundedReceiver<SurfaceMessage>,
    mut requests: mpsc::UnboundedReceiver<GuardRequest>,
    cancel_token: CancellationToken,
) {
    // Covers a listener attached after the scheduler's last broadcast.
    worker.send(Command::RequestState(worker.surface));

    loop {
        let wake = worker.next_wake();
        let wake_at = wake.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_debug!("guard for surface {} shutting down", worker.surface);
                break;
            }
            message = messages.recv() => match message {
                Some(message) => worker.on_message(message),
                None => {
                    log_info!("surface {} stopped listening; guard exiting", worker.surface);
                    break;
                }
            },
            request = requests.recv() => match request {
                Some(request) => worker.on_request(request),
                None => break,
            },
            _ = time::sleep_until(wake_at), if wake.is_some() => worker.poll(),
        }
    }
}

impl GuardWorker {
    fn on_message(&mut self, message: SurfaceMessage) {
        let now = self.clock.now();
        match message {
            SurfaceMessage::BecameInactive => {
                if self.guard.take().is_some() {
                    log_debug!("surface {} inactive; guard context discarded", self.surface);
                }
            }
            SurfaceMessage::Activated(_) | SurfaceMessage::BecameActive => {
                self.guard
                    .get_or_insert_with(|| GuardState::new(now))
                    .handle_message(&message, now);
            }
            other => {
                if let Some(guard) = self.guard.as_mut() {
                    guard.handle_message(&other, now);
                }
            }
        }
        self.flush();
    }

    fn on_request(&mut self, request: GuardRequest) {
        let now = self.clock.now();
        match request {
            GuardRequest::Intercept { event, reply } => {
                let verdict = match self.guard.as_mut() {
                    Some(guard) => guard.intercept(&event, now),
                    None => Verdict::Allow,
                };
                self.report_activity();
                self.flush();
                let _ = reply.send(verdict);
            }
            GuardRequest::Answer { answer, reply } => {
                let outcome = match self.guard.as_mut() {
                    Some(guard) => guard.resolve_challenge(answer.as_deref(), now),
                    None => Err(RotationError::UnlockChallenge),
                };
                if let Err(err) = &outcome {
                    log_debug!("surface {}: {}", self.surface, err);
                }
                self.flush();
                let _ = reply.send(outcome);
            }
            GuardRequest::Menu { action } => {
                match action {
                    MenuAction::Lock => {
                        if let Some(guard) = self.guard.as_mut() {
                            guard.lock();
                        }
                    }
                    MenuAction::Pause => self.send(Command::Pause),
                    MenuAction::Resume => self.send(Command::Resume),
                    MenuAction::SkipToNext => self.send(Command::SkipToNext),
                    MenuAction::ExitKiosk => self.send(Command::ExitKiosk),
                }
                self.flush();
            }
            GuardRequest::View { reply } => {
                let _ = reply.send(self.guard.as_ref().map(|guard| guard.view(now)));
            }
        }
    }

    fn poll(&mut self) {
        let now = self.clock.now();
        if let Some(guard) = self.guard.as_mut() {
            guard.poll(now);
        }
        self.flush();
    }

    fn next_wake(&self) -> Option<Instant> {
        self.guard
            .as_ref()
            .and_then(GuardState::next_wake)
            .map(|at| self.clock.instant_at(at))
    }

    fn report_activity(&mut self) {
        let now = Instant::now();
        if self
            .last_report
            .is_some_and(|at| now.duration_since(at) < ACTIVITY_REPORT_EVERY)
        {
            return;
        }
        self.last_report = Some(now);
        self.send(Command::RecordActivity);
    }

    fn flush(&mut self) {
        let effects = match self.guard.as_mut() {
            Some(guard) => guard.take_effects(),
            None => return,
        };
        for effect in effects {
            match effect {
                GuardEffect::Send(command) => self.send(command),
                GuardEffect::Notice(notice) => {
                    let _ = self.signals.send(GuardSignal::Notice(notice));
                }
                GuardEffect::PromptPassword => {
                    let _ = self.signals.send(GuardSignal::PromptPassword);
                }
            }
        }
    }

    fn send(&self, command: Command) {
        let name = command.name();
        if let Err(err) = self.controller.notify(command) {
            log_warn!("surface {}: could not send {}: {}", self.surface, name, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::watch;

    use crate::models::{Destination, KioskConfig};
    use crate::rotation::RotationSettings;
    use crate::surface::MemoryDriver;

    fn kiosk(password: &str) -> KioskConfig {
        let mut dests: Vec<Destination> = (0..2)
            .map(|i| Destination::with_id(format!("d{i}"), format!("https://site{i}.example")))
            .collect();
        for dest in &mut dests {
            dest.block_after_seconds = 0;
        }
        KioskConfig {
            unlock_password: password.to_string(),
            ..KioskConfig::with_destinations(dests)
        }
    }

    async fn running(
        config: KioskConfig,
    ) -> (Arc<MemoryDriver>, RotationController, watch::Sender<KioskConfig>) {
        let driver = Arc::new(MemoryDriver::new());
        let (tx, rx) = watch::channel(config);
        let settings = RotationSettings {
            settle_delay: Duration::ZERO,
            ..RotationSettings::default()
        };
        let (controller, _task) = RotationController::spawn(driver.clone(), rx, settings);
        controller.start().await.unwrap();
        (driver, controller, tx)
    }

    async fn settle() {
        time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_listener_gets_state_and_blocks() {
        let (driver, controller, _tx) = running(kiosk("")).await;
        let surface = driver.live_surfaces()[0];
        let messages = driver.attach(surface).unwrap();
        let (agent, _signals) = GuardAgent::start(surface, messages, controller);
        settle().await;

        let view = agent.view().await.unwrap();
        assert!(view.active);
        assert!(view.blocked);
        assert_eq!(agent.intercept(InputEvent::click()).await, Verdict::Suppress);
    }

    #[tokio::test(start_paused = true)]
    async fn five_taps_unlock_every_surface() {
        let (driver, controller, _tx) = running(kiosk("")).await;
        let surfaces = driver.live_surfaces();
        let (front, _front_signals) =
            GuardAgent::start(surfaces[0], driver.attach(surfaces[0]).unwrap(), controller.clone());
        let (back, _back_signals) =
            GuardAgent::start(surfaces[1], driver.attach(surfaces[1]).unwrap(), controller.clone());
        settle().await;

        for _ in 0..5 {
            assert_eq!(front.intercept(InputEvent::click()).await, Verdict::Suppress);
        }
        settle().await;

        assert!(front.view().await.unwrap().unlocked);
        assert!(back.view().await.unwrap().unlocked);
        assert!(controller.status().await.unwrap().unlocked);
        assert_eq!(front.intercept(InputEvent::click()).await, Verdict::Allow);
    }

    #[tokio::test(start_paused = true)]
    async fn password_prompt_round_trip() {
        let (driver, controller, _tx) = running(kiosk("4321")).await;
        let surface = driver.live_surfaces()[0];
        let (agent, mut signals) =
            GuardAgent::start(surface, driver.attach(surface).unwrap(), controller.clone());
        settle().await;

        for _ in 0..5 {
            agent.intercept(InputEvent::click()).await;
        }
        let mut prompted = false;
        while let Ok(signal) = signals.try_recv() {
            prompted |= signal == GuardSignal::PromptPassword;
        }
        assert!(prompted);

        assert_eq!(
            agent.answer_challenge(Some("0000".into())).await,
            Err(RotationError::UnlockChallenge)
        );
        assert!(!agent.view().await.unwrap().unlocked);

        for _ in 0..5 {
            agent.intercept(InputEvent::click()).await;
        }
        agent.answer_challenge(Some("4321".into())).await.unwrap();
        assert!(agent.view().await.unwrap().unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_relock_reaches_scheduler() {
        let (driver, controller, _tx) = running(kiosk("")).await;
        // Hold the first destination in front for the whole window.
        controller.pause_destination("d0").await.unwrap();
        let surface = driver.live_surfaces()[0];
        let (agent, _signals) =
            GuardAgent::start(surface, driver.attach(surface).unwrap(), controller.clone());
        settle().await;

        for _ in 0..5 {
            agent.intercept(InputEvent::click()).await;
        }
        settle().await;
        assert!(controller.status().await.unwrap().unlocked);

        time::sleep(Duration::from_secs(4 * 60)).await;
        assert!(agent.view().await.unwrap().unlocked);

        time::sleep(Duration::from_secs(61)).await;
        assert!(!agent.view().await.unwrap().unlocked);
        assert!(!controller.status().await.unwrap().unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_surface_drops_its_context() {
        let (driver, controller, _tx) = running(kiosk("")).await;
        let surface = driver.live_surfaces()[0];
        let (agent, _signals) =
            GuardAgent::start(surface, driver.attach(surface).unwrap(), controller.clone());
        settle().await;
        for _ in 0..3 {
            agent.intercept(InputEvent::click()).await;
        }
        assert_eq!(agent.view().await.unwrap().unlock_attempts, 3);

        controller.skip_to_next().await.unwrap();
        settle().await;
        let view = agent.view().await.unwrap();
        assert!(!view.active);
        assert_eq!(view.unlock_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn menu_commands_reach_scheduler() {
        let (driver, controller, _tx) = running(kiosk("")).await;
        let surface = driver.live_surfaces()[0];
        let (mut agent, _signals) =
            GuardAgent::start(surface, driver.attach(surface).unwrap(), controller.clone());
        settle().await;

        agent.menu(MenuAction::Pause).unwrap();
        settle().await;
        assert!(agent.view().await.unwrap().paused);
        assert_eq!(agent.intercept(InputEvent::click()).await, Verdict::Allow);

        agent.menu(MenuAction::ExitKiosk).unwrap();
        settle().await;
        assert!(driver.live_surfaces().is_empty());
        agent.stop().await.unwrap();
        assert_eq!(agent.intercept(InputEvent::click()).await, Verdict::Allow);
    }
}
