use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::models::Clip;
use crate::playback::{FailureKind, PlaybackState};

/// Everything the surrounding UI may want to react to.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    StateChanged {
        state: PlaybackState,
    },
    Progress {
        session_id: String,
        elapsed_secs: u32,
        target_secs: u32,
    },
    ClipChanged {
        session_id: String,
        clip: Clip,
    },
    RewardGranted {
        clip_id: String,
        new_balance: i64,
        clip_now_complete: bool,
    },
    RewardRejected {
        clip_id: String,
        new_balance: i64,
    },
    /// The claim did not go through; skipping again resubmits it.
    SettlementFailed {
        clip_id: String,
        message: String,
        retryable: bool,
    },
    PlaybackFailed {
        clip_id: String,
        failure: FailureKind,
        message: String,
        auto_skipped: bool,
    },
    ClipSkipped {
        clip_id: String,
        elapsed_secs: u32,
        blacklisted: bool,
    },
    QueueEmpty,
    QueueUnavailable {
        message: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

impl EventSink for UnboundedSender<EngineEvent> {
    fn emit(&self, event: EngineEvent) {
        let _ = self.send(event);
    }
}

/// Drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: EngineEvent) {}
}
