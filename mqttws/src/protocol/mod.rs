//! MQTT 3.1.1 packet encoding and decoding.

pub mod codec;
pub mod v4;

pub use codec::*;

/// Protocol name carried in CONNECT.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;
