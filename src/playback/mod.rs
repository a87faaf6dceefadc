#[cfg(feature = "shell")]
pub mod commands;
pub mod controller;
pub mod state;

pub use controller::{PlaybackController, SkipOutcome};
pub use state::{
    Claim, Effect, FailureKind, PlaybackPhase, PlaybackState, SettlementStatus, SkipDecision,
};
