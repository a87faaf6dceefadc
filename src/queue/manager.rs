use std::sync::Arc;

use chrono::Utc;
use tokio::{
    sync::Mutex,
    time::{self, Duration, Instant},
};

use crate::{
    backend::RemoteService,
    error::Result,
    models::Clip,
    settings::EngineSettings,
};

use super::state::{Advance, Eligibility, QueueSnapshot, QueueState, RemoveOutcome};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Copy)]
struct QueueTimings {
    ttl: Duration,
    window: usize,
    empty_backoff: Duration,
    remove_settle: Duration,
}

/// Sole owner of one viewer's queue. Everything else goes through the
/// operations here; nothing outside mutates the list or the cursor.
#[derive(Clone)]
pub struct QueueManager {
    state: Arc<Mutex<QueueState>>,
    /// Serializes remote fetches so concurrent callers share one round trip.
    fetch_gate: Arc<Mutex<()>>,
    backend: Arc<dyn RemoteService>,
    viewer_id: Arc<str>,
    timings: QueueTimings,
}

impl QueueManager {
    pub fn new(
        viewer_id: impl Into<String>,
        backend: Arc<dyn RemoteService>,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::new())),
            fetch_gate: Arc::new(Mutex::new(())),
            backend,
            viewer_id: Arc::from(viewer_id.into()),
            timings: QueueTimings {
                ttl: settings.queue_ttl(),
                window: settings.queue_window.max(1),
                empty_backoff: settings.empty_backoff(),
                remove_settle: settings.remove_settle(),
            },
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    /// Eligible clips for the viewer. Served from cache while it is fresh and
    /// non-empty; otherwise fetched. An empty result waits out the backoff and
    /// then resets once, so an exhausted backend is never polled in a loop.
    pub async fn fetch(&self) -> Result<Vec<Clip>> {
        let _gate = self.fetch_gate.lock().await;

        {
            let state = self.state.lock().await;
            if state.is_fresh(Instant::now(), self.timings.ttl) {
                return Ok(state.clips().to_vec());
            }
        }

        self.wait_out_hold().await;

        let clips = self.fetch_remote().await?;
        if !clips.is_empty() {
            return Ok(clips);
        }

        log_info!(
            "no eligible clips for viewer {}; resetting in {}ms",
            self.viewer_id,
            self.timings.empty_backoff.as_millis()
        );
        time::sleep(self.timings.empty_backoff).await;
        self.reset_locked().await
    }

    pub async fn get_current(&self) -> Option<Clip> {
        self.state.lock().await.current().cloned()
    }

    pub async fn advance(&self) -> Option<Clip> {
        let mut state = self.state.lock().await;
        match state.advance() {
            Advance::Next(index) => {
                log_info!("queue cursor -> {}", index);
                state.current().cloned()
            }
            Advance::Exhausted => {
                log_info!("queue exhausted for viewer {}; refetch on next access", self.viewer_id);
                None
            }
        }
    }

    /// Advance only if `clip_id` is still the current clip. Lets a late
    /// completion move the cursor without ever skipping a clip twice.
    pub async fn advance_past(&self, clip_id: &str) -> bool {
        {
            let state = self.state.lock().await;
            if state.current().map(|clip| clip.id.as_str()) != Some(clip_id) {
                return false;
            }
        }
        self.advance().await;
        true
    }

    /// Drop an unplayable clip: tell the service (best effort), blacklist its
    /// media locally, and splice it out of the cache.
    pub async fn remove(&self, clip: &Clip) {
        let backend = Arc::clone(&self.backend);
        let clip_id = clip.id.clone();
        tokio::spawn(async move {
            if let Err(err) = backend.mark_unplayable(&clip_id).await {
                log_warn!("could not report clip {} as unplayable: {err}", clip_id);
            }
        });

        let mut state = self.state.lock().await;
        let outcome = state.remove(clip);
        log_info!(
            "removed clip {} ({}) from queue: {:?}",
            clip.id,
            clip.media_ref,
            outcome
        );
        if outcome == RemoveOutcome::Emptied {
            // Give the service time to see the status change before asking again.
            state.hold(Instant::now() + self.timings.remove_settle);
        }
    }

    /// Clear the blacklist and fetch from scratch.
    pub async fn reset(&self) -> Result<Vec<Clip>> {
        let _gate = self.fetch_gate.lock().await;
        self.reset_locked().await
    }

    pub async fn invalidate(&self) {
        self.state.lock().await.invalidate();
    }

    pub async fn mark_watched(&self, clip_id: &str) {
        self.state.lock().await.mark_watched(clip_id);
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Caller must hold `fetch_gate`.
    async fn reset_locked(&self) -> Result<Vec<Clip>> {
        {
            let mut state = self.state.lock().await;
            state.reset();
            log_info!(
                "queue reset #{} for viewer {}",
                state.resets(),
                self.viewer_id
            );
        }
        self.fetch_remote().await
    }

    async fn wait_out_hold(&self) {
        let hold_until = self.state.lock().await.hold_until();
        if let Some(until) = hold_until {
            if until > Instant::now() {
                time::sleep_until(until).await;
            }
            self.state.lock().await.release_hold();
        }
    }

    async fn fetch_remote(&self) -> Result<Vec<Clip>> {
        let records = self.backend.fetch_queue(&self.viewer_id).await?;

        let mut state = self.state.lock().await;
        let who = Eligibility {
            viewer_id: &self.viewer_id,
            now: Utc::now(),
            window: self.timings.window,
        };
        let report = state.accept(records, &who, Instant::now());
        log_info!(
            "fetched queue for viewer {}: {} received, {} kept ({} ineligible, {} invalid)",
            self.viewer_id,
            report.received,
            report.kept,
            report.ineligible,
            report.invalid
        );
        Ok(state.clips().to_vec())
    }
}
