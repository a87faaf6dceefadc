//! At-most-once reward claims. The once-only guarantee belongs to the
//! playback session; this module only talks to the ledger and folds the
//! answer back into the queue.

use std::sync::Arc;

use crate::{
    backend::RemoteService,
    error::Result,
    models::{SettlementReceipt, SettlementRequest},
    queue::QueueManager,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

#[derive(Clone)]
pub struct RewardSettlement {
    backend: Arc<dyn RemoteService>,
    queue: QueueManager,
}

impl RewardSettlement {
    pub fn new(backend: Arc<dyn RemoteService>, queue: QueueManager) -> Self {
        Self { backend, queue }
    }

    /// Submit one claim. Failures are returned as-is and never retried here.
    pub async fn submit(
        &self,
        viewer_id: &str,
        clip_id: &str,
        watched_seconds: u32,
        fully_watched: bool,
    ) -> Result<SettlementReceipt> {
        let request = SettlementRequest {
            viewer_id: viewer_id.to_string(),
            clip_id: clip_id.to_string(),
            watched_seconds,
            fully_watched,
        };

        log_info!(
            "settling clip {} for viewer {} ({}s, fully_watched={})",
            clip_id,
            viewer_id,
            watched_seconds,
            fully_watched
        );

        let receipt = match self.backend.settle_reward(&request).await {
            Ok(receipt) => receipt,
            Err(err) => {
                log_error!("settlement for clip {} failed: {err}", clip_id);
                return Err(err);
            }
        };

        if receipt.accepted {
            self.queue.mark_watched(clip_id).await;
        }
        if receipt.clip_now_complete {
            // Our cached copy may now list a clip nobody can earn from.
            self.queue.invalidate().await;
        }

        log_info!(
            "settlement for clip {}: accepted={} clip_now_complete={} balance={}",
            clip_id,
            receipt.accepted,
            receipt.clip_now_complete,
            receipt.new_balance
        );
        Ok(receipt)
    }
}
