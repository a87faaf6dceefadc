//! Wire vocabulary spoken with the embedded playback surface.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Outbound command, serialized as `{"type": "play"}` and friends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlayerCommand {
    Play,
    Pause,
    /// Freeze the surface once the watch is complete
    Lock,
}

/// Raw inbound message as posted by the surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Ready,
    Loaded,
    Playing,
    Paused,
    Ended,
    Unavailable,
    Error {
        #[serde(default)]
        code: Option<i64>,
    },
}

/// Surface error codes that mean the media can never play here:
/// removed or private (100), and embedding disallowed by the owner (101, 150).
const PERMANENT_ERROR_CODES: [i64; 3] = [100, 101, 150];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    PermanentUnplayable,
    Transient,
}

pub fn classify_error_code(code: Option<i64>) -> ErrorClass {
    match code {
        Some(code) if PERMANENT_ERROR_CODES.contains(&code) => ErrorClass::PermanentUnplayable,
        _ => ErrorClass::Transient,
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "cause", content = "code", rename_all = "camelCase")]
pub enum UnavailableCause {
    /// The surface said so itself
    Reported,
    /// A permanent error code
    ErrorCode(i64),
    /// Synthesized by the bridge when nothing loaded in time
    LoadTimeout,
}

/// Normalized event the session consumes. `ready` and `loaded` both collapse
/// into `Loaded`; error codes are already bucketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEvent {
    Loaded,
    Playing,
    Paused,
    Ended,
    Unavailable(UnavailableCause),
    TransientError { code: Option<i64> },
}

impl From<InboundMessage> for BridgeEvent {
    fn from(message: InboundMessage) -> Self {
        match message {
            InboundMessage::Ready | InboundMessage::Loaded => BridgeEvent::Loaded,
            InboundMessage::Playing => BridgeEvent::Playing,
            InboundMessage::Paused => BridgeEvent::Paused,
            InboundMessage::Ended => BridgeEvent::Ended,
            InboundMessage::Unavailable => BridgeEvent::Unavailable(UnavailableCause::Reported),
            InboundMessage::Error { code } => match classify_error_code(code) {
                ErrorClass::PermanentUnplayable => {
                    BridgeEvent::Unavailable(UnavailableCause::ErrorCode(code.unwrap_or_default()))
                }
                ErrorClass::Transient => BridgeEvent::TransientError { code },
            },
        }
    }
}

pub fn parse_inbound(raw: &str) -> Result<InboundMessage> {
    serde_json::from_str(raw)
        .map_err(|err| EngineError::Protocol(format!("bad player message {raw:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_serialize_to_type_tag() {
        assert_eq!(
            serde_json::to_string(&PlayerCommand::Play).unwrap(),
            r#"{"type":"play"}"#
        );
        assert_eq!(
            serde_json::to_string(&PlayerCommand::Lock).unwrap(),
            r#"{"type":"lock"}"#
        );
    }

    #[test]
    fn parses_inbound_vocabulary() {
        assert_eq!(parse_inbound(r#"{"type":"ready"}"#).unwrap(), InboundMessage::Ready);
        assert_eq!(parse_inbound(r#"{"type":"ended"}"#).unwrap(), InboundMessage::Ended);
        assert_eq!(
            parse_inbound(r#"{"type":"error","code":150}"#).unwrap(),
            InboundMessage::Error { code: Some(150) }
        );
        assert_eq!(
            parse_inbound(r#"{"type":"error"}"#).unwrap(),
            InboundMessage::Error { code: None }
        );
    }

    #[test]
    fn rejects_unknown_or_malformed_messages() {
        assert!(matches!(
            parse_inbound(r#"{"type":"seeked"}"#),
            Err(EngineError::Protocol(_))
        ));
        assert!(parse_inbound("{not json").is_err());
        assert!(parse_inbound(r#"{"code":5}"#).is_err());
    }

    #[test]
    fn error_codes_fall_into_two_buckets() {
        for code in [100, 101, 150] {
            assert_eq!(classify_error_code(Some(code)), ErrorClass::PermanentUnplayable);
        }
        for code in [2, 5, 0, 9999] {
            assert_eq!(classify_error_code(Some(code)), ErrorClass::Transient);
        }
        assert_eq!(classify_error_code(None), ErrorClass::Transient);
    }

    #[test]
    fn normalizes_into_session_events() {
        assert_eq!(BridgeEvent::from(InboundMessage::Ready), BridgeEvent::Loaded);
        assert_eq!(BridgeEvent::from(InboundMessage::Loaded), BridgeEvent::Loaded);
        assert_eq!(
            BridgeEvent::from(InboundMessage::Error { code: Some(101) }),
            BridgeEvent::Unavailable(UnavailableCause::ErrorCode(101))
        );
        assert_eq!(
            BridgeEvent::from(InboundMessage::Error { code: Some(5) }),
            BridgeEvent::TransientError { code: Some(5) }
        );
        assert_eq!(
            BridgeEvent::from(InboundMessage::Unavailable),
            BridgeEvent::Unavailable(UnavailableCause::Reported)
        );
    }
}
