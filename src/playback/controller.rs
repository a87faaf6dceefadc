use std::{
    collections::HashSet,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex, MutexGuard,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{
    sync::{mpsc::UnboundedReceiver, Mutex},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    backend::RemoteService,
    bridge::{BridgeSignal, PlayerBridge, PlayerCommand, SurfaceTransport},
    error::{EngineError, Result},
    events::{EngineEvent, EventSink},
    models::Clip,
    queue::QueueManager,
    settings::EngineSettings,
    settlement::RewardSettlement,
    utils::env_flag,
};

use super::state::{Claim, Effect, FailureKind, PlaybackPhase, PlaybackState, SkipDecision};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// How a manual skip was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipOutcome {
    /// Target reached; the claim is on its way.
    Settling,
    /// Left early, no claim.
    Forfeited,
    /// The clip was broken and has been dropped from the queue.
    Discarded,
}

/// Drives one viewer's watch loop: keeps a playback session in step with the
/// queue's current clip, runs the watch clock, reacts to the player, and
/// hands finished sessions to settlement.
///
/// Must be created inside a tokio runtime; it spawns its bridge pump.
#[derive(Clone)]
pub struct PlaybackController {
    state: Arc<Mutex<PlaybackState>>,
    queue: QueueManager,
    settlement: RewardSettlement,
    bridge: PlayerBridge,
    events: Arc<dyn EventSink>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Clips whose claim has not been answered yet
    claims: Arc<StdMutex<HashSet<String>>>,
    shutdown: CancellationToken,
    viewer_id: Arc<str>,
    auto_skip: Arc<AtomicBool>,
    max_transient_retries: u32,
    load_timeout: Duration,
    tick_interval: Duration,
    debug_ticks: bool,
}

impl PlaybackController {
    pub fn new(
        viewer_id: impl Into<String>,
        backend: Arc<dyn RemoteService>,
        transport: Arc<dyn SurfaceTransport>,
        events: Arc<dyn EventSink>,
        settings: &EngineSettings,
    ) -> Self {
        let viewer_id: String = viewer_id.into();
        let (bridge, signals) = PlayerBridge::new(transport, settings.load_timeout());
        let queue = QueueManager::new(viewer_id.clone(), Arc::clone(&backend), settings);
        let settlement = RewardSettlement::new(backend, queue.clone());

        let controller = Self {
            state: Arc::new(Mutex::new(PlaybackState::new())),
            queue,
            settlement,
            bridge,
            events,
            ticker: Arc::new(Mutex::new(None)),
            claims: Arc::new(StdMutex::new(HashSet::new())),
            shutdown: CancellationToken::new(),
            viewer_id: Arc::from(viewer_id),
            auto_skip: Arc::new(AtomicBool::new(settings.auto_skip)),
            max_transient_retries: settings.max_transient_retries,
            load_timeout: settings.load_timeout(),
            tick_interval: settings.tick_interval(),
            debug_ticks: env_flag("WATCHLOOP_DEBUG"),
        };
        controller.spawn_bridge_pump(signals);
        controller
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn bridge(&self) -> &PlayerBridge {
        &self.bridge
    }

    pub fn set_auto_skip(&self, enabled: bool) {
        self.auto_skip.store(enabled, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> PlaybackState {
        self.state.lock().await.clone()
    }

    /// Raw text posted by the playback surface.
    pub fn handle_player_message(&self, raw: &str) -> Result<()> {
        self.bridge.handle_inbound(raw)
    }

    /// The viewing screen came up: take focus and show the current clip.
    pub async fn open(&self) -> Result<Option<Clip>> {
        let effects = self.transition(|state| state.set_focused(true)).await;
        self.apply(effects).await;
        self.load_current().await
    }

    /// The viewing screen went away: pause the surface and destroy the
    /// session. A settlement already in flight still runs to completion.
    pub async fn leave(&self) {
        let was_active = self
            .transition(|state| {
                let was_active = state.is_active();
                state.set_focused(false);
                state.end_session();
                was_active
            })
            .await;
        if was_active {
            self.bridge.send(PlayerCommand::Pause);
        }
        self.cancel_ticker().await;
        self.bridge.detach();
        log_info!("viewer {} left the watch screen", self.viewer_id);
    }

    pub async fn set_focus(&self, focused: bool) {
        let effects = self.transition(|state| state.set_focused(focused)).await;
        self.apply(effects).await;
    }

    pub async fn set_foreground(&self, foreground: bool) {
        let effects = self.transition(|state| state.set_foreground(foreground)).await;
        self.apply(effects).await;
    }

    /// User-initiated skip. Settles if the target was reached (also the way
    /// to retry a failed claim), otherwise moves on without a reward.
    pub async fn skip(&self) -> Result<SkipOutcome> {
        match self.transition(|state| state.skip()).await {
            SkipDecision::Settle(effects) => {
                self.apply(effects).await;
                Ok(SkipOutcome::Settling)
            }
            SkipDecision::Forfeit {
                clip_id,
                elapsed_secs,
            } => {
                log_info!("clip {} skipped at {}s; reward forfeited", clip_id, elapsed_secs);
                self.cancel_ticker().await;
                self.events.emit(EngineEvent::ClipSkipped {
                    clip_id: clip_id.clone(),
                    elapsed_secs,
                    blacklisted: false,
                });
                self.queue.advance_past(&clip_id).await;
                self.load_current().await?;
                Ok(SkipOutcome::Forfeited)
            }
            SkipDecision::Discard {
                clip_id,
                elapsed_secs,
            } => {
                self.discard(&clip_id, elapsed_secs).await;
                Ok(SkipOutcome::Discarded)
            }
            SkipDecision::Busy => Err(EngineError::InvalidState(
                "reward claim already in flight".into(),
            )),
            SkipDecision::NoSession => {
                Err(EngineError::InvalidState("no clip is being watched".into()))
            }
        }
    }

    /// Make the session follow the queue's current clip, fetching if the
    /// queue has nothing cached.
    pub async fn load_current(&self) -> Result<Option<Clip>> {
        self.queue.fetch().await?;

        let Some(clip) = self.queue.get_current().await else {
            self.end_session().await;
            log_info!("no eligible clips for viewer {}", self.viewer_id);
            self.events.emit(EngineEvent::QueueEmpty);
            return Ok(None);
        };

        let already_showing = {
            let state = self.state.lock().await;
            state.is_active() && state.clip_id.as_deref() == Some(clip.id.as_str())
        };
        if already_showing {
            return Ok(Some(clip));
        }
        if self.claim_in_flight(&clip.id) {
            // The answer decides whether this clip is done; it loads the
            // next session when it lands.
            self.end_session().await;
            log_info!("clip {} is waiting on its reward claim", clip.id);
            return Ok(Some(clip));
        }
        self.begin_session(&clip).await;
        Ok(Some(clip))
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.cancel_ticker().await;
        self.bridge.detach();
    }

    async fn begin_session(&self, clip: &Clip) {
        self.cancel_ticker().await;

        let session_id = Uuid::new_v4().to_string();
        let bridge = self.bridge.clone();
        // The reset lands before the new ticker exists, and the bridge
        // generation is assigned under the same lock the pump checks.
        self.transition(|state| {
            let generation = bridge.begin_load();
            state.begin_session(
                session_id.clone(),
                clip.id.clone(),
                clip.target_duration_secs,
                generation,
            );
        })
        .await;

        log_info!(
            "session {} started for clip {} (target {}s, reward {})",
            session_id,
            clip.id,
            clip.target_duration_secs,
            clip.reward_amount
        );
        self.events.emit(EngineEvent::ClipChanged {
            session_id,
            clip: clip.clone(),
        });

        self.spawn_ticker().await;
    }

    async fn end_session(&self) {
        self.cancel_ticker().await;
        self.bridge.detach();
        self.transition(|state| state.end_session()).await;
    }

    /// Boxed because the call graph loops: load -> ticker -> tick -> discard -> load.
    fn load_next(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if let Err(err) = self.load_current().await {
                log_error!("could not load the next clip for {}: {err}", self.viewer_id);
                self.events.emit(EngineEvent::QueueUnavailable {
                    message: err.to_string(),
                });
            }
        })
    }

    /// Run `change` against the session under its lock and publish the new
    /// state if anything other than the elapsed counter moved.
    async fn transition<T>(&self, change: impl FnOnce(&mut PlaybackState) -> T) -> T {
        let (result, changed) = {
            let mut state = self.state.lock().await;
            let before = state.clone();
            let result = change(&mut state);

            let mut probe = state.clone();
            probe.elapsed_secs = before.elapsed_secs;
            let changed = (probe != before).then(|| state.clone());
            (result, changed)
        };

        if let Some(state) = changed {
            self.events.emit(EngineEvent::StateChanged { state });
        }
        result
    }

    async fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Command(command) => self.bridge.send(command),
                Effect::Settle(claim) => self.spawn_settlement(claim),
                Effect::Failed { clip_id, kind } => self.handle_failure(clip_id, kind).await,
            }
        }
    }

    async fn handle_failure(&self, clip_id: String, kind: FailureKind) {
        let auto_skip = self.auto_skip.load(Ordering::SeqCst);
        let error = failure_error(&clip_id, kind, self.load_timeout);
        log_warn!("playback failed for clip {}: {error}", clip_id);

        self.events.emit(EngineEvent::PlaybackFailed {
            clip_id: clip_id.clone(),
            failure: kind,
            message: error.to_string(),
            auto_skipped: auto_skip,
        });

        if auto_skip {
            let elapsed_secs = self.state.lock().await.elapsed_secs;
            self.discard(&clip_id, elapsed_secs).await;
        }
    }

    /// Blacklist the clip through the queue and move on. No reward.
    async fn discard(&self, clip_id: &str, elapsed_secs: u32) {
        self.cancel_ticker().await;
        match self.queue.get_current().await {
            Some(clip) if clip.id == clip_id => self.queue.remove(&clip).await,
            _ => log_warn!("clip {} is no longer current; nothing to remove", clip_id),
        }
        self.events.emit(EngineEvent::ClipSkipped {
            clip_id: clip_id.to_string(),
            elapsed_secs,
            blacklisted: true,
        });
        self.load_next().await;
    }

    fn claims(&self) -> MutexGuard<'_, HashSet<String>> {
        self.claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn claim_in_flight(&self, clip_id: &str) -> bool {
        self.claims().contains(clip_id)
    }

    /// The screen is open but shows nothing, e.g. it was reopened while the
    /// previous session's claim was still out.
    async fn screen_waiting(&self) -> bool {
        let state = self.state.lock().await;
        state.focused && state.phase == PlaybackPhase::Idle
    }

    fn spawn_settlement(&self, claim: Claim) {
        self.claims().insert(claim.clip_id.clone());
        // Not tied to the shutdown token; a claim in flight always finishes.
        let controller = self.clone();
        tokio::spawn(async move {
            controller.settle(claim).await;
        });
    }

    async fn settle(&self, claim: Claim) {
        let result = self
            .settlement
            .submit(
                &self.viewer_id,
                &claim.clip_id,
                claim.watched_secs,
                claim.fully_watched,
            )
            .await;
        self.claims().remove(&claim.clip_id);

        match result {
            Ok(receipt) => {
                let still_current = self
                    .transition(|state| state.settlement_succeeded(&claim.session_id))
                    .await;

                if receipt.accepted {
                    self.events.emit(EngineEvent::RewardGranted {
                        clip_id: claim.clip_id.clone(),
                        new_balance: receipt.new_balance,
                        clip_now_complete: receipt.clip_now_complete,
                    });
                } else {
                    log_warn!("ledger declined the claim for clip {}", claim.clip_id);
                    self.events.emit(EngineEvent::RewardRejected {
                        clip_id: claim.clip_id.clone(),
                        new_balance: receipt.new_balance,
                    });
                }

                // Only an answered claim lets the queue move past its clip.
                self.queue.advance_past(&claim.clip_id).await;
                if still_current || self.screen_waiting().await {
                    self.load_next().await;
                } else {
                    log_info!(
                        "session {} ended before its settlement returned",
                        claim.session_id
                    );
                }
            }
            Err(err) => {
                let retryable = self
                    .transition(|state| state.settlement_failed(&claim.session_id))
                    .await;
                self.events.emit(EngineEvent::SettlementFailed {
                    clip_id: claim.clip_id,
                    message: err.to_string(),
                    retryable,
                });
                // Nobody is left to retry this claim; the clip plays again.
                if !retryable && self.screen_waiting().await {
                    self.load_next().await;
                }
            }
        }
    }

    fn spawn_bridge_pump(&self, mut signals: UnboundedReceiver<BridgeSignal>) {
        let controller = self.clone();
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    signal = signals.recv() => match signal {
                        Some(signal) => controller.handle_bridge_signal(signal).await,
                        None => break,
                    },
                    _ = token.cancelled() => {
                        log_info!("bridge pump shutting down");
                        break;
                    }
                }
            }
        });
    }

    async fn handle_bridge_signal(&self, signal: BridgeSignal) {
        let max_retries = self.max_transient_retries;
        let effects = self
            .transition(|state| {
                (state.generation == signal.generation && state.phase != PlaybackPhase::Idle)
                    .then(|| state.on_bridge(signal.event, max_retries))
            })
            .await;

        match effects {
            Some(effects) => self.apply(effects).await,
            None => log_debug!(
                "dropping {:?} from stale player load {}",
                signal.event,
                signal.generation
            ),
        }
    }

    async fn spawn_ticker(&self) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let controller = self.clone();
        let token = self.shutdown.clone();
        let period = self.tick_interval;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if !controller.on_tick().await {
                            break;
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }

    /// One clock period. Returns false once there is nothing left to time.
    async fn on_tick(&self) -> bool {
        let (effects, progress, keep_running) = self
            .transition(|state| {
                if state.phase == PlaybackPhase::Idle || state.phase.is_terminal() {
                    return (Vec::new(), None, false);
                }
                let before = state.elapsed_secs;
                let effects = state.tick();
                let progress = (state.elapsed_secs != before).then(|| {
                    (
                        state.session_id.clone().unwrap_or_default(),
                        state.elapsed_secs,
                        state.target_secs,
                    )
                });
                (effects, progress, !state.phase.is_terminal())
            })
            .await;

        if let Some((session_id, elapsed_secs, target_secs)) = progress {
            if self.debug_ticks {
                log_debug!("session {} at {}/{}s", session_id, elapsed_secs, target_secs);
            }
            self.events.emit(EngineEvent::Progress {
                session_id,
                elapsed_secs,
                target_secs,
            });
        }

        self.apply(effects).await;
        keep_running
    }
}

fn failure_error(clip_id: &str, kind: FailureKind, load_timeout: Duration) -> EngineError {
    match kind {
        FailureKind::Unplayable { code } => EngineError::PlaybackUnavailable {
            clip_id: clip_id.to_string(),
            reason: match code {
                Some(code) => format!("player error {code}"),
                None => "reported unavailable".into(),
            },
        },
        FailureKind::LoadTimeout => EngineError::LoadTimeout(load_timeout),
        FailureKind::RetriesExhausted { code } => EngineError::PlaybackUnavailable {
            clip_id: clip_id.to_string(),
            reason: format!("gave up after repeated playback errors (last code {code:?})"),
        },
    }
}
