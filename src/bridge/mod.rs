pub mod channel;
pub mod protocol;

pub use channel::{BridgeSignal, ChannelTransport, PlayerBridge, SurfaceTransport};
pub use protocol::{
    classify_error_code, BridgeEvent, ErrorClass, InboundMessage, PlayerCommand, UnavailableCause,
};
