use serde::{Deserialize, Serialize};

use crate::bridge::{BridgeEvent, PlayerCommand, UnavailableCause};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Completed,
    Error,
}

impl PlaybackPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackPhase::Completed | PlaybackPhase::Error)
    }
}

/// Progress of the reward claim, separate from `reward_claimed` so that a
/// call in flight and a call answered are never confused.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SettlementStatus {
    #[default]
    NotStarted,
    InFlight,
    Settled,
    /// Processing failed; a manual skip resubmits.
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum FailureKind {
    Unplayable { code: Option<i64> },
    LoadTimeout,
    RetriesExhausted { code: Option<i64> },
}

impl From<UnavailableCause> for FailureKind {
    fn from(cause: UnavailableCause) -> Self {
        match cause {
            UnavailableCause::Reported => FailureKind::Unplayable { code: None },
            UnavailableCause::ErrorCode(code) => FailureKind::Unplayable { code: Some(code) },
            UnavailableCause::LoadTimeout => FailureKind::LoadTimeout,
        }
    }
}

/// Reward claim to submit for a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub session_id: String,
    pub clip_id: String,
    pub watched_secs: u32,
    pub fully_watched: bool,
}

/// Side effects a transition asks the controller to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Command(PlayerCommand),
    Settle(Claim),
    Failed { clip_id: String, kind: FailureKind },
}

/// What a manual skip resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipDecision {
    /// Watched long enough: settle exactly as a natural completion would.
    Settle(Vec<Effect>),
    /// Short of the target: move on without claiming.
    Forfeit { clip_id: String, elapsed_secs: u32 },
    /// The clip errored: drop it from the queue.
    Discard { clip_id: String, elapsed_secs: u32 },
    /// A claim is already in flight.
    Busy,
    NoSession,
}

/// Watch state for exactly one clip. Focus and foreground describe the
/// screen rather than the clip, so they survive session changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub phase: PlaybackPhase,
    pub session_id: Option<String>,
    pub clip_id: Option<String>,
    pub target_secs: u32,
    pub elapsed_secs: u32,
    /// Player reported ready/loaded for this session
    pub loaded: bool,
    pub paused: bool,
    pub reward_claimed: bool,
    pub settlement: SettlementStatus,
    pub failure: Option<FailureKind>,
    pub transient_errors: u32,
    pub focused: bool,
    pub foreground: bool,
    /// Bridge load this session listens to
    #[serde(skip)]
    pub generation: u64,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self {
            foreground: true,
            ..Self::default()
        }
    }

    pub fn is_visible(&self) -> bool {
        self.focused && self.foreground
    }

    pub fn is_active(&self) -> bool {
        self.phase != PlaybackPhase::Idle && !self.phase.is_terminal()
    }

    pub fn belongs_to(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    /// The clock only runs while every gate is open.
    pub fn clock_running(&self) -> bool {
        self.phase == PlaybackPhase::Playing
            && !self.paused
            && self.loaded
            && self.focused
            && self.foreground
    }

    pub fn begin_session(
        &mut self,
        session_id: String,
        clip_id: String,
        target_secs: u32,
        generation: u64,
    ) {
        *self = Self {
            phase: PlaybackPhase::Loading,
            session_id: Some(session_id),
            clip_id: Some(clip_id),
            target_secs,
            paused: true,
            focused: self.focused,
            foreground: self.foreground,
            generation,
            ..Self::default()
        };
    }

    pub fn end_session(&mut self) {
        *self = Self {
            focused: self.focused,
            foreground: self.foreground,
            ..Self::default()
        };
    }

    /// One clock period. Returns whatever completion requires.
    pub fn tick(&mut self) -> Vec<Effect> {
        if !self.clock_running() {
            return Vec::new();
        }
        self.elapsed_secs = self.elapsed_secs.saturating_add(1);
        if self.elapsed_secs >= self.target_secs {
            self.complete()
        } else {
            Vec::new()
        }
    }

    pub fn on_bridge(&mut self, event: BridgeEvent, max_transient_retries: u32) -> Vec<Effect> {
        if self.phase == PlaybackPhase::Idle || self.phase.is_terminal() {
            return Vec::new();
        }

        match event {
            BridgeEvent::Loaded => {
                if self.phase != PlaybackPhase::Loading {
                    return Vec::new();
                }
                self.loaded = true;
                self.phase = PlaybackPhase::Ready;
                if self.is_visible() {
                    self.resume()
                } else {
                    Vec::new()
                }
            }
            BridgeEvent::Playing => {
                // Playing implies the surface loaded, even if it never said so.
                self.loaded = true;
                if self.is_visible() {
                    self.phase = PlaybackPhase::Playing;
                    self.paused = false;
                    Vec::new()
                } else {
                    self.phase = PlaybackPhase::Paused;
                    self.paused = true;
                    vec![Effect::Command(PlayerCommand::Pause)]
                }
            }
            BridgeEvent::Paused => {
                if self.phase == PlaybackPhase::Playing {
                    self.phase = PlaybackPhase::Paused;
                }
                self.paused = true;
                Vec::new()
            }
            BridgeEvent::Ended => {
                if self.elapsed_secs >= self.target_secs {
                    self.complete()
                } else if self.phase == PlaybackPhase::Playing {
                    // Media shorter than the watch target: run it again.
                    vec![Effect::Command(PlayerCommand::Play)]
                } else {
                    Vec::new()
                }
            }
            BridgeEvent::Unavailable(cause) => self.fail(cause.into()),
            BridgeEvent::TransientError { code } => {
                self.transient_errors += 1;
                if self.transient_errors > max_transient_retries {
                    self.fail(FailureKind::RetriesExhausted { code })
                } else if self.loaded && self.is_visible() {
                    vec![Effect::Command(PlayerCommand::Play)]
                } else {
                    Vec::new()
                }
            }
        }
    }

    pub fn set_focused(&mut self, focused: bool) -> Vec<Effect> {
        let was_visible = self.is_visible();
        self.focused = focused;
        self.visibility_changed(was_visible)
    }

    pub fn set_foreground(&mut self, foreground: bool) -> Vec<Effect> {
        let was_visible = self.is_visible();
        self.foreground = foreground;
        self.visibility_changed(was_visible)
    }

    fn visibility_changed(&mut self, was_visible: bool) -> Vec<Effect> {
        if !self.is_active() {
            return Vec::new();
        }
        match (was_visible, self.is_visible()) {
            (true, false) => {
                if self.phase == PlaybackPhase::Playing {
                    self.phase = PlaybackPhase::Paused;
                }
                self.paused = true;
                vec![Effect::Command(PlayerCommand::Pause)]
            }
            (false, true) if self.loaded => self.resume(),
            _ => Vec::new(),
        }
    }

    /// Reissue `play` regardless of what the surface claims its state is.
    fn resume(&mut self) -> Vec<Effect> {
        self.phase = PlaybackPhase::Playing;
        self.paused = false;
        vec![Effect::Command(PlayerCommand::Play)]
    }

    /// Enter `Completed` and ask for the claim. `reward_claimed` flips here,
    /// before any settlement call exists, so a second trigger finds it set.
    fn complete(&mut self) -> Vec<Effect> {
        if self.reward_claimed || self.settlement == SettlementStatus::InFlight {
            return Vec::new();
        }
        let (Some(session_id), Some(clip_id)) = (self.session_id.clone(), self.clip_id.clone())
        else {
            return Vec::new();
        };

        self.phase = PlaybackPhase::Completed;
        self.paused = true;
        self.reward_claimed = true;
        self.settlement = SettlementStatus::InFlight;

        vec![
            Effect::Command(PlayerCommand::Lock),
            Effect::Settle(Claim {
                session_id,
                clip_id,
                watched_secs: self.elapsed_secs,
                fully_watched: true,
            }),
        ]
    }

    fn fail(&mut self, kind: FailureKind) -> Vec<Effect> {
        self.phase = PlaybackPhase::Error;
        self.paused = true;
        self.failure = Some(kind);
        match self.clip_id.clone() {
            Some(clip_id) => vec![Effect::Failed { clip_id, kind }],
            None => Vec::new(),
        }
    }

    pub fn skip(&mut self) -> SkipDecision {
        let Some(clip_id) = self.clip_id.clone() else {
            return SkipDecision::NoSession;
        };
        if self.settlement == SettlementStatus::InFlight {
            return SkipDecision::Busy;
        }
        if self.phase == PlaybackPhase::Error {
            return SkipDecision::Discard {
                clip_id,
                elapsed_secs: self.elapsed_secs,
            };
        }
        if !self.reward_claimed && self.elapsed_secs >= self.target_secs {
            return SkipDecision::Settle(self.complete());
        }

        // Stop the clock now; the controller replaces this session next.
        self.paused = true;
        SkipDecision::Forfeit {
            clip_id,
            elapsed_secs: self.elapsed_secs,
        }
    }

    /// Returns false when the answer belongs to a session that is gone.
    pub fn settlement_succeeded(&mut self, session_id: &str) -> bool {
        if !self.belongs_to(session_id) {
            return false;
        }
        self.settlement = SettlementStatus::Settled;
        true
    }

    /// Release the claim so a retry can go out. Returns false when the
    /// answer belongs to a session that is gone.
    pub fn settlement_failed(&mut self, session_id: &str) -> bool {
        if !self.belongs_to(session_id) {
            return false;
        }
        self.settlement = SettlementStatus::Failed;
        self.reward_claimed = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETRIES: u32 = 3;

    fn visible_session(target: u32) -> PlaybackState {
        let mut state = PlaybackState::new();
        state.set_focused(true);
        state.begin_session("s1".into(), "clip-x".into(), target, 1);
        state
    }

    fn playing(target: u32) -> PlaybackState {
        let mut state = visible_session(target);
        let effects = state.on_bridge(BridgeEvent::Loaded, RETRIES);
        assert_eq!(effects, vec![Effect::Command(PlayerCommand::Play)]);
        state
    }

    fn run_ticks(state: &mut PlaybackState, n: u32) -> Vec<Effect> {
        let mut effects = Vec::new();
        for _ in 0..n {
            effects.extend(state.tick());
        }
        effects
    }

    fn settle_count(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|effect| matches!(effect, Effect::Settle(_)))
            .count()
    }

    #[test]
    fn begin_session_resets_everything_but_visibility() {
        let mut state = playing(5);
        run_ticks(&mut state, 3);
        state.begin_session("s2".into(), "clip-y".into(), 10, 2);

        assert_eq!(state.phase, PlaybackPhase::Loading);
        assert_eq!(state.elapsed_secs, 0);
        assert!(!state.loaded);
        assert!(!state.reward_claimed);
        assert!(state.failure.is_none());
        assert!(state.is_visible());
        assert_eq!(state.generation, 2);
    }

    #[test]
    fn clock_does_not_run_before_load() {
        let mut state = visible_session(5);
        assert!(run_ticks(&mut state, 3).is_empty());
        assert_eq!(state.elapsed_secs, 0);
    }

    #[test]
    fn loaded_while_hidden_waits_in_ready() {
        let mut state = PlaybackState::new();
        state.begin_session("s1".into(), "clip-x".into(), 5, 1);
        assert!(state.on_bridge(BridgeEvent::Loaded, RETRIES).is_empty());
        assert_eq!(state.phase, PlaybackPhase::Ready);

        assert_eq!(
            state.set_focused(true),
            vec![Effect::Command(PlayerCommand::Play)]
        );
        assert_eq!(state.phase, PlaybackPhase::Playing);
    }

    #[test]
    fn reaching_target_completes_once() {
        let mut state = playing(3);
        let effects = run_ticks(&mut state, 3);

        assert_eq!(state.phase, PlaybackPhase::Completed);
        assert!(state.reward_claimed);
        assert_eq!(state.settlement, SettlementStatus::InFlight);
        assert_eq!(
            effects,
            vec![
                Effect::Command(PlayerCommand::Lock),
                Effect::Settle(Claim {
                    session_id: "s1".into(),
                    clip_id: "clip-x".into(),
                    watched_secs: 3,
                    fully_watched: true,
                }),
            ]
        );

        // Duplicate triggers while the claim is in flight do nothing.
        assert!(state.on_bridge(BridgeEvent::Ended, RETRIES).is_empty());
        assert!(run_ticks(&mut state, 5).is_empty());
        assert_eq!(state.elapsed_secs, 3);
    }

    #[test]
    fn ended_at_target_races_tick_without_double_claim() {
        let mut state = playing(2);
        run_ticks(&mut state, 1);
        state.elapsed_secs = 2;

        let mut effects = state.on_bridge(BridgeEvent::Ended, RETRIES);
        effects.extend(state.tick());
        assert_eq!(state.skip(), SkipDecision::Busy);
        assert_eq!(settle_count(&effects), 1);
    }

    #[test]
    fn ended_short_of_target_replays() {
        let mut state = playing(30);
        run_ticks(&mut state, 12);
        assert_eq!(
            state.on_bridge(BridgeEvent::Ended, RETRIES),
            vec![Effect::Command(PlayerCommand::Play)]
        );
        assert_eq!(state.phase, PlaybackPhase::Playing);
    }

    #[test]
    fn elapsed_holds_while_paused_unfocused_or_backgrounded() {
        let mut state = playing(30);
        run_ticks(&mut state, 4);

        state.on_bridge(BridgeEvent::Paused, RETRIES);
        run_ticks(&mut state, 5);
        assert_eq!(state.elapsed_secs, 4);

        assert_eq!(
            state.set_foreground(true),
            Vec::new(),
            "already foreground, nothing changes"
        );
        state.on_bridge(BridgeEvent::Playing, RETRIES);
        run_ticks(&mut state, 1);
        assert_eq!(state.elapsed_secs, 5);

        assert_eq!(
            state.set_focused(false),
            vec![Effect::Command(PlayerCommand::Pause)]
        );
        run_ticks(&mut state, 5);
        assert_eq!(state.elapsed_secs, 5);
        assert_eq!(state.phase, PlaybackPhase::Paused);

        state.set_focused(true);
        state.set_foreground(false);
        run_ticks(&mut state, 5);
        assert_eq!(state.elapsed_secs, 5);

        assert_eq!(
            state.set_foreground(true),
            vec![Effect::Command(PlayerCommand::Play)]
        );
        run_ticks(&mut state, 1);
        assert_eq!(state.elapsed_secs, 6);
    }

    #[test]
    fn playing_report_while_hidden_is_paused_back() {
        let mut state = playing(30);
        state.set_foreground(false);
        assert_eq!(
            state.on_bridge(BridgeEvent::Playing, RETRIES),
            vec![Effect::Command(PlayerCommand::Pause)]
        );
        assert!(!state.clock_running());
    }

    #[test]
    fn unavailable_fails_the_session() {
        let mut state = visible_session(30);
        let effects = state.on_bridge(
            BridgeEvent::Unavailable(UnavailableCause::LoadTimeout),
            RETRIES,
        );
        assert_eq!(state.phase, PlaybackPhase::Error);
        assert_eq!(
            effects,
            vec![Effect::Failed {
                clip_id: "clip-x".into(),
                kind: FailureKind::LoadTimeout,
            }]
        );
        assert!(state.on_bridge(BridgeEvent::Playing, RETRIES).is_empty());
    }

    #[test]
    fn transient_errors_retry_then_demote() {
        let mut state = playing(30);
        for _ in 0..RETRIES {
            assert_eq!(
                state.on_bridge(BridgeEvent::TransientError { code: Some(5) }, RETRIES),
                vec![Effect::Command(PlayerCommand::Play)]
            );
        }
        let effects = state.on_bridge(BridgeEvent::TransientError { code: Some(5) }, RETRIES);
        assert_eq!(state.phase, PlaybackPhase::Error);
        assert_eq!(
            state.failure,
            Some(FailureKind::RetriesExhausted { code: Some(5) })
        );
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn skip_before_target_forfeits() {
        let mut state = playing(30);
        run_ticks(&mut state, 10);
        assert_eq!(
            state.skip(),
            SkipDecision::Forfeit {
                clip_id: "clip-x".into(),
                elapsed_secs: 10,
            }
        );
        assert!(!state.reward_claimed);
        assert!(!state.clock_running());
    }

    #[test]
    fn skip_on_error_discards() {
        let mut state = visible_session(30);
        state.on_bridge(BridgeEvent::Unavailable(UnavailableCause::Reported), RETRIES);
        assert!(matches!(state.skip(), SkipDecision::Discard { .. }));
    }

    #[test]
    fn failed_settlement_releases_claim_for_retry() {
        let mut state = playing(2);
        run_ticks(&mut state, 2);
        assert_eq!(state.skip(), SkipDecision::Busy);

        assert!(state.settlement_failed("s1"));
        assert!(!state.reward_claimed);
        assert_eq!(state.settlement, SettlementStatus::Failed);
        assert_eq!(state.phase, PlaybackPhase::Completed);

        match state.skip() {
            SkipDecision::Settle(effects) => assert_eq!(settle_count(&effects), 1),
            other => panic!("expected a resubmission, got {other:?}"),
        }
        assert!(state.reward_claimed);
    }

    #[test]
    fn answers_for_a_replaced_session_are_ignored() {
        let mut state = playing(2);
        run_ticks(&mut state, 2);
        state.begin_session("s2".into(), "clip-y".into(), 10, 2);

        assert!(!state.settlement_succeeded("s1"));
        assert!(!state.settlement_failed("s1"));
        assert_eq!(state.settlement, SettlementStatus::NotStarted);
    }

    #[test]
    fn end_session_keeps_screen_flags() {
        let mut state = playing(10);
        state.end_session();
        assert_eq!(state.phase, PlaybackPhase::Idle);
        assert!(state.session_id.is_none());
        assert!(state.focused);
        assert_eq!(state.skip(), SkipDecision::NoSession);
    }
}
