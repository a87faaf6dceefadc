use serde::{Deserialize, Serialize};

/// Body of the reward settlement call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    pub viewer_id: String,
    pub clip_id: String,
    pub watched_seconds: u32,
    pub fully_watched: bool,
}

/// What the ledger service answered. The balance is authoritative and is
/// only ever forwarded, never adjusted locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub accepted: bool,
    #[serde(default)]
    pub clip_now_complete: bool,
    pub new_balance: i64,
}
