//! Per-surface access guard.
//!
//! A guard context lives from the surface's first activation message until
//! it becomes inactive. Time is passed in by the caller, which keeps the
//! state machine synchronous; side effects are queued and drained with
//! [`GuardState::take_effects`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{RotationError, RotationResult};
use crate::protocol::{ActivationState, Command, SurfaceMessage, TimerView};

use super::input::{InputClass, InputEvent, InputKind, Target, Verdict};

/// Suppressed clicks needed to start the unlock challenge.
pub const UNLOCK_TAPS: u8 = 5;
pub const RELOCK_AFTER: Duration = Duration::from_secs(5 * 60);

/// Cosmetic feedback for whatever presents the guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "camelCase")]
pub enum Notice {
    InteractionLocked,
    TapsRemaining { taps: u8 },
    Unlocked,
    WrongPassword,
    Locked,
    AutoRelocked,
    Paused,
    Resumed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEffect {
    Notice(Notice),
    /// Command for the scheduler.
    Send(Command),
    /// Ask the visitor for the unlock password.
    PromptPassword,
}

/// Read-only view of a guard, for status displays and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardView {
    pub blocked: bool,
    pub unlocked: bool,
    pub paused: bool,
    pub unlock_attempts: u8,
    pub challenge_pending: bool,
    pub active: bool,
    pub timer: Option<TimerView>,
}

#[derive(Debug, Clone)]
pub struct GuardState {
    activated_at: Option<DateTime<Utc>>,
    block_after: Duration,
    unlocked: bool,
    unlock_attempts: u8,
    challenge_pending: bool,
    paused: bool,
    hover_only: bool,
    allow_clicks: bool,
    password: Option<String>,
    /// Visible surface; only its guard runs the relock window.
    active: bool,
    last_interaction: DateTime<Utc>,
    block_announced: bool,
    timer: Option<TimerView>,
    effects: Vec<GuardEffect>,
}

impl GuardState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            activated_at: None,
            block_after: Duration::ZERO,
            unlocked: false,
            unlock_attempts: 0,
            challenge_pending: false,
            paused: false,
            hover_only: false,
            allow_clicks: false,
            password: None,
            active: false,
            last_interaction: now,
            block_announced: false,
            timer: None,
            effects: Vec::new(),
        }
    }

    pub fn view(&self, now: DateTime<Utc>) -> GuardView {
        GuardView {
            blocked: self.is_blocked(now),
            unlocked: self.unlocked,
            paused: self.paused,
            unlock_attempts: self.unlock_attempts,
            challenge_pending: self.challenge_pending,
            active: self.active,
            timer: self.timer,
        }
    }

    pub fn take_effects(&mut self) -> Vec<GuardEffect> {
        std::mem::take(&mut self.effects)
    }

    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        match self.activated_at {
            Some(activated_at) => elapsed(activated_at, now) >= self.block_after,
            None => false,
        }
    }

    /// Applies a scheduler message. `BecameInactive` is the owner's cue to
    /// drop the context and is ignored here.
    pub fn handle_message(&mut self, message: &SurfaceMessage, now: DateTime<Utc>) {
        match message {
            SurfaceMessage::Activated(state) => self.apply_activation(state, now),
            SurfaceMessage::Tick { current_timer } => self.timer = Some(*current_timer),
            SurfaceMessage::PauseState { paused } => {
                if self.paused != *paused {
                    self.paused = *paused;
                    self.notice(if *paused { Notice::Paused } else { Notice::Resumed });
                }
            }
            SurfaceMessage::UnlockState { unlocked } => {
                self.unlocked = *unlocked;
                self.challenge_pending = false;
                self.unlock_attempts = 0;
                if *unlocked {
                    self.last_interaction = now;
                }
            }
            SurfaceMessage::BecameActive => {
                self.active = true;
                self.last_interaction = now;
            }
            SurfaceMessage::BecameInactive => {}
        }
    }

    fn apply_activation(&mut self, state: &ActivationState, now: DateTime<Utc>) {
        self.activated_at = Some(state.start_time);
        self.block_after = Duration::from_millis(state.block_after_ms);
        self.block_announced = self.is_blocked(now);
        self.unlock_attempts = 0;
        self.paused = state.paused;
        self.hover_only = state.hover_only;
        self.allow_clicks = state.allow_clicks;
        self.password = state.unlock_password.clone().filter(|p| !p.is_empty());
        self.timer = Some(state.current_timer);

        if let Some(unlocked) = state.unlocked {
            if unlocked != self.unlocked {
                self.unlocked = unlocked;
                self.challenge_pending = false;
            }
        }
        if self.unlocked {
            self.last_interaction = now;
        }
    }

    /// Decides whether an input event may reach the page.
    pub fn intercept(&mut self, event: &InputEvent, now: DateTime<Utc>) -> Verdict {
        self.last_interaction = now;

        if event.target == Target::Control || self.unlocked || self.paused || self.allow_clicks {
            return Verdict::Allow;
        }

        match event.kind.class() {
            InputClass::Hover => Verdict::Allow,
            InputClass::Pointer => self.intercept_pointer(event.kind, now),
            InputClass::Key => self.intercept_key(event, now),
        }
    }

    fn intercept_pointer(&mut self, kind: InputKind, now: DateTime<Utc>) -> Verdict {
        if self.challenge_pending {
            return Verdict::Suppress;
        }
        if !(self.is_blocked(now) || self.hover_only) {
            return Verdict::Allow;
        }
        if kind == InputKind::Click {
            self.advance_unlock_sequence(now);
        }
        Verdict::Suppress
    }

    fn intercept_key(&mut self, event: &InputEvent, now: DateTime<Utc>) -> Verdict {
        let Some(key) = &event.key else {
            return Verdict::Allow;
        };
        let blocked = self.is_blocked(now);

        if (blocked || self.hover_only) && key.activates() && event.target == Target::Interactive {
            return Verdict::Suppress;
        }
        if blocked && key.navigates() {
            return Verdict::Suppress;
        }
        Verdict::Allow
    }

    fn advance_unlock_sequence(&mut self, now: DateTime<Utc>) {
        self.unlock_attempts += 1;
        if self.unlock_attempts == UNLOCK_TAPS {
            self.challenge_pending = true;
            if self.password.is_some() {
                self.effects.push(GuardEffect::PromptPassword);
            } else {
                self.unlock(now);
            }
            return;
        }
        if self.unlock_attempts > UNLOCK_TAPS {
            self.unlock_attempts = 1;
        }
        self.notice(Notice::TapsRemaining {
            taps: UNLOCK_TAPS - self.unlock_attempts,
        });
    }

    /// Settles a pending challenge; `None` means the prompt was dismissed.
    pub fn resolve_challenge(&mut self, answer: Option<&str>, now: DateTime<Utc>) -> RotationResult<()> {
        if !self.challenge_pending {
            return Err(RotationError::UnlockChallenge);
        }

        let accepted = match (self.password.as_deref(), answer) {
            (None, _) => true,
            (Some(expected), Some(given)) => expected == given,
            (Some(_), None) => false,
        };
        if accepted {
            self.unlock(now);
            Ok(())
        } else {
            self.challenge_pending = false;
            self.unlock_attempts = 0;
            self.notice(Notice::WrongPassword);
            Err(RotationError::UnlockChallenge)
        }
    }

    fn unlock(&mut self, now: DateTime<Utc>) {
        self.unlocked = true;
        self.unlock_attempts = 0;
        self.challenge_pending = false;
        self.last_interaction = now;
        self.effects.push(GuardEffect::Send(Command::SetUnlock(true)));
        self.notice(Notice::Unlocked);
    }

    /// Explicit lock from the guard menu.
    pub fn lock(&mut self) {
        self.relock();
        self.notice(Notice::Locked);
    }

    fn relock(&mut self) {
        self.unlocked = false;
        self.unlock_attempts = 0;
        self.challenge_pending = false;
        self.effects.push(GuardEffect::Send(Command::SetUnlock(false)));
    }

    /// Handles time passing: announces the block onset once and relocks an
    /// idle unlock.
    pub fn poll(&mut self, now: DateTime<Utc>) {
        if !self.block_announced && self.is_blocked(now) {
            self.block_announced = true;
            if !(self.unlocked || self.paused || self.allow_clicks) {
                self.notice(Notice::InteractionLocked);
            }
        }

        if self.relock_due(now) {
            self.relock();
            self.notice(Notice::AutoRelocked);
        }
    }

    fn relock_due(&self, now: DateTime<Utc>) -> bool {
        self.unlocked && self.active && elapsed(self.last_interaction, now) >= RELOCK_AFTER
    }

    /// Next instant at which [`GuardState::poll`] has something to do.
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        let block_onset = self
            .activated_at
            .filter(|_| !self.block_announced)
            .and_then(|at| after(at, self.block_after));
        let relock = (self.unlocked && self.active)
            .then(|| after(self.last_interaction, RELOCK_AFTER))
            .flatten();

        match (block_onset, relock) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn notice(&mut self, notice: Notice) {
        self.effects.push(GuardEffect::Notice(notice));
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

fn after(at: DateTime<Utc>, span: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(span).ok().map(|span| at + span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::input::Key;

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn activation(start: DateTime<Utc>, block_after_ms: u64) -> ActivationState {
        ActivationState {
            start_time: start,
            block_after_ms,
            current_timer: TimerView {
                total: 30,
                remaining: 30,
            },
            unlocked: None,
            paused: false,
            allow_clicks: false,
            unlock_password: None,
            hover_only: false,
        }
    }

    fn active_guard(state: ActivationState, now: DateTime<Utc>) -> GuardState {
        let mut guard = GuardState::new(now);
        guard.handle_message(&SurfaceMessage::BecameActive, now);
        guard.handle_message(&SurfaceMessage::Activated(state), now);
        guard
    }

    fn blocked_guard(now: DateTime<Utc>) -> GuardState {
        active_guard(activation(now, 0), now)
    }

    fn taps(guard: &mut GuardState, n: usize, now: DateTime<Utc>) {
        for _ in 0..n {
            assert_eq!(guard.intercept(&InputEvent::click(), now), Verdict::Suppress);
        }
    }

    #[test]
    fn blocks_only_after_block_after() {
        let t0 = Utc::now();
        let mut guard = active_guard(activation(t0, 120_000), t0);

        assert_eq!(guard.intercept(&InputEvent::click(), t0 + secs(119)), Verdict::Allow);
        assert_eq!(guard.intercept(&InputEvent::click(), t0 + secs(120)), Verdict::Suppress);
        assert_eq!(
            guard.intercept(
                &InputEvent::pointer(InputKind::MouseMove, Target::Content),
                t0 + secs(200)
            ),
            Verdict::Allow
        );
    }

    #[test]
    fn four_taps_do_not_unlock_fifth_does() {
        let now = Utc::now();
        let mut guard = blocked_guard(now);

        taps(&mut guard, 4, now);
        assert!(!guard.view(now).unlocked);
        assert_eq!(guard.view(now).unlock_attempts, 4);

        taps(&mut guard, 1, now);
        assert!(guard.view(now).unlocked);
        assert_eq!(guard.view(now).unlock_attempts, 0);
        let effects = guard.take_effects();
        assert!(effects.contains(&GuardEffect::Send(Command::SetUnlock(true))));
        assert!(effects.contains(&GuardEffect::Notice(Notice::Unlocked)));
        assert_eq!(guard.intercept(&InputEvent::click(), now), Verdict::Allow);
    }

    #[test]
    fn tap_after_failed_challenge_counts_from_one() {
        let now = Utc::now();
        let mut state = activation(now, 0);
        state.unlock_password = Some("1234".into());
        let mut guard = active_guard(state, now);

        taps(&mut guard, 5, now);
        assert!(guard.view(now).challenge_pending);
        assert!(guard.take_effects().contains(&GuardEffect::PromptPassword));
        // Clicks while the prompt is up are swallowed without counting.
        taps(&mut guard, 2, now);
        assert_eq!(guard.view(now).unlock_attempts, 5);

        assert_eq!(
            guard.resolve_challenge(Some("nope"), now),
            Err(RotationError::UnlockChallenge)
        );
        assert!(!guard.view(now).unlocked);
        assert_eq!(guard.view(now).unlock_attempts, 0);

        taps(&mut guard, 1, now);
        assert_eq!(guard.view(now).unlock_attempts, 1);
    }

    #[test]
    fn correct_password_unlocks_and_cancel_does_not() {
        let now = Utc::now();
        let mut state = activation(now, 0);
        state.unlock_password = Some("1234".into());
        let mut guard = active_guard(state, now);

        taps(&mut guard, 5, now);
        assert!(guard.resolve_challenge(None, now).is_err());
        taps(&mut guard, 5, now);
        guard.resolve_challenge(Some("1234"), now).unwrap();
        assert!(guard.view(now).unlocked);
        assert!(guard.resolve_challenge(Some("1234"), now).is_err());
    }

    #[test]
    fn auto_relocks_after_inactivity() {
        let t0 = Utc::now();
        let mut guard = blocked_guard(t0);
        taps(&mut guard, 5, t0);
        guard.take_effects();

        guard.poll(t0 + secs(299));
        assert!(guard.view(t0).unlocked);
        assert_eq!(guard.next_wake(), Some(t0 + secs(300)));

        guard.poll(t0 + secs(300));
        assert!(!guard.view(t0).unlocked);
        let effects = guard.take_effects();
        assert!(effects.contains(&GuardEffect::Send(Command::SetUnlock(false))));
        assert!(effects.contains(&GuardEffect::Notice(Notice::AutoRelocked)));
    }

    #[test]
    fn interaction_restarts_relock_window() {
        let t0 = Utc::now();
        let mut guard = blocked_guard(t0);
        taps(&mut guard, 5, t0);

        guard.intercept(
            &InputEvent::pointer(InputKind::MouseMove, Target::Content),
            t0 + secs(240),
        );
        guard.poll(t0 + secs(400));
        assert!(guard.view(t0).unlocked);
        guard.poll(t0 + secs(540));
        assert!(!guard.view(t0).unlocked);
    }

    #[test]
    fn inactive_guard_never_relocks() {
        let t0 = Utc::now();
        let mut guard = GuardState::new(t0);
        let mut state = activation(t0, 0);
        state.unlocked = Some(true);
        guard.handle_message(&SurfaceMessage::Activated(state), t0);

        guard.poll(t0 + secs(3_600));
        assert!(guard.view(t0).unlocked);
        assert_eq!(guard.next_wake(), None);
    }

    #[test]
    fn activation_overwrites_unlock_only_when_explicit() {
        let now = Utc::now();
        let mut guard = blocked_guard(now);
        taps(&mut guard, 5, now);

        guard.handle_message(&SurfaceMessage::Activated(activation(now, 0)), now);
        assert!(guard.view(now).unlocked);

        let mut state = activation(now, 0);
        state.unlocked = Some(false);
        guard.handle_message(&SurfaceMessage::Activated(state), now);
        assert!(!guard.view(now).unlocked);
    }

    #[test]
    fn activation_resets_tap_counter_and_adopts_pause() {
        let now = Utc::now();
        let mut guard = blocked_guard(now);
        taps(&mut guard, 3, now);

        let mut state = activation(now, 0);
        state.paused = true;
        guard.handle_message(&SurfaceMessage::Activated(state), now);
        assert_eq!(guard.view(now).unlock_attempts, 0);
        assert_eq!(guard.intercept(&InputEvent::click(), now), Verdict::Allow);
    }

    #[test]
    fn hover_only_blocks_clicks_but_not_hover() {
        let now = Utc::now();
        let mut state = activation(now, 600_000);
        state.hover_only = true;
        let mut guard = active_guard(state, now);

        assert_eq!(guard.intercept(&InputEvent::click(), now), Verdict::Suppress);
        assert_eq!(
            guard.intercept(
                &InputEvent::pointer(InputKind::MouseOver, Target::Interactive),
                now
            ),
            Verdict::Allow
        );
        assert_eq!(
            guard.intercept(&InputEvent::key_down(Key::named("Enter"), Target::Interactive), now),
            Verdict::Suppress
        );
        // Not blocked yet, so navigation keys still work.
        assert_eq!(
            guard.intercept(&InputEvent::key_down(Key::named("F5"), Target::Content), now),
            Verdict::Allow
        );
    }

    #[test]
    fn blocked_keys() {
        let now = Utc::now();
        let mut guard = blocked_guard(now);

        let verdict = |guard: &mut GuardState, key: Key, target: Target| {
            guard.intercept(&InputEvent::key_down(key, target), now)
        };
        assert_eq!(verdict(&mut guard, Key::named("Enter"), Target::Interactive), Verdict::Suppress);
        assert_eq!(verdict(&mut guard, Key::named("Enter"), Target::Content), Verdict::Allow);
        assert_eq!(verdict(&mut guard, Key::named("Escape"), Target::Content), Verdict::Suppress);
        assert_eq!(verdict(&mut guard, Key::named("w").with_ctrl(), Target::Content), Verdict::Suppress);
        assert_eq!(verdict(&mut guard, Key::named("F4").with_alt(), Target::Content), Verdict::Suppress);
        assert_eq!(verdict(&mut guard, Key::named("a"), Target::Content), Verdict::Allow);
    }

    #[test]
    fn controls_and_overrides_always_pass() {
        let now = Utc::now();
        let mut guard = blocked_guard(now);
        assert_eq!(
            guard.intercept(&InputEvent::pointer(InputKind::Click, Target::Control), now),
            Verdict::Allow
        );
        assert_eq!(guard.view(now).unlock_attempts, 0);

        let mut state = activation(now, 0);
        state.allow_clicks = true;
        let mut guard = active_guard(state, now);
        assert_eq!(guard.intercept(&InputEvent::click(), now), Verdict::Allow);
    }

    #[test]
    fn announces_block_onset_once() {
        let t0 = Utc::now();
        let mut guard = active_guard(activation(t0, 60_000), t0);
        assert_eq!(guard.next_wake(), Some(t0 + secs(60)));

        guard.poll(t0 + secs(60));
        guard.poll(t0 + secs(61));
        let notices: Vec<_> = guard
            .take_effects()
            .into_iter()
            .filter(|e| *e == GuardEffect::Notice(Notice::InteractionLocked))
            .collect();
        assert_eq!(notices.len(), 1);
        assert_eq!(guard.next_wake(), None);
    }

    #[test]
    fn explicit_lock_notifies_scheduler() {
        let now = Utc::now();
        let mut guard = blocked_guard(now);
        taps(&mut guard, 5, now);
        guard.take_effects();

        guard.lock();
        assert!(!guard.view(now).unlocked);
        assert_eq!(
            guard.take_effects(),
            vec![
                GuardEffect::Send(Command::SetUnlock(false)),
                GuardEffect::Notice(Notice::Locked)
            ]
        );
    }
}
