//! Error taxonomy for the consumption engine.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can surface from the engine.
///
/// Running out of eligible clips is deliberately absent: an empty queue is a
/// normal state, reported through events rather than as an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Transport failure talking to the remote service (fetch or settlement)
    #[error("Network error: {0}")]
    Network(String),

    /// The clip cannot be played on this surface (removed, private, not embeddable)
    #[error("Clip {clip_id} is unplayable: {reason}")]
    PlaybackUnavailable { clip_id: String, reason: String },

    /// Recoverable playback hiccup reported by the surface
    #[error("Transient playback error (code {code})")]
    PlaybackTransient { code: i64 },

    /// No ready/loaded signal within the load bound
    #[error("Player did not load within {}ms", .0.as_millis())]
    LoadTimeout(Duration),

    /// A remote record that cannot become a queue entry
    #[error("Invalid clip record: {0}")]
    InvalidClip(String),

    /// Malformed message on the bridge or an undecodable response body
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation requested in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl EngineError {
    /// Whether a user- or timer-triggered retry can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Network(_) | EngineError::PlaybackTransient { .. }
        )
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Protocol(err.to_string())
    }
}
