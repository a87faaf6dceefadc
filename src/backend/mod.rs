//! Remote calls the engine depends on. Eligibility selection and ledger
//! mutation happen behind this trait, inside the external service.

pub mod http;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ClipRecord, SettlementReceipt, SettlementRequest};

pub use http::HttpBackend;

#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Ordered candidate clips for a viewer.
    async fn fetch_queue(&self, viewer_id: &str) -> Result<Vec<ClipRecord>>;

    /// Claim the reward for one watch session.
    async fn settle_reward(&self, request: &SettlementRequest) -> Result<SettlementReceipt>;

    /// Best-effort report that a clip cannot be played.
    async fn mark_unplayable(&self, clip_id: &str) -> Result<()>;
}
