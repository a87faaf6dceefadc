pub mod clip;
pub mod reward;

pub use clip::{Clip, ClipRecord, ClipStatus};
pub use reward::{SettlementReceipt, SettlementRequest};
