//! Common types for mqttws.

use std::fmt;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Quality of Service level.
///
/// The level is carried in SUBSCRIBE and PUBLISH frames as requested, but the
/// client never runs the QoS 1/2 acknowledgement flows: delivery is
/// effectively at-most-once whatever level is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// At most once delivery (fire and forget).
    #[default]
    AtMostOnce = 0,
    /// At least once delivery.
    AtLeastOnce = 1,
    /// Exactly once delivery.
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        QoS::from_u8(value).ok_or_else(|| format!("invalid qos {value}"))
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> u8 {
        qos as u8
    }
}

/// MQTT 3.1.1 control packet type (upper nibble of the fixed header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Packet types 0 and 15 are reserved.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            _ => return None,
        })
    }
}

/// Parsed fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: usize,
    /// Bytes taken by the type byte plus the remaining length field.
    pub header_length: usize,
}

/// CONNACK return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    /// 0: connection accepted.
    Accepted,
    /// 1: the server does not support MQTT 3.1.1.
    UnacceptableProtocolVersion,
    /// 2: the client identifier was rejected.
    IdentifierRejected,
    /// 3: the MQTT service is unavailable.
    ServerUnavailable,
    /// 4: malformed username or password.
    BadUsernameOrPassword,
    /// 5: the client is not authorized to connect.
    NotAuthorized,
    /// Any code outside 0..=5.
    Other(u8),
}

impl ConnectReturnCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => ConnectReturnCode::Accepted,
            1 => ConnectReturnCode::UnacceptableProtocolVersion,
            2 => ConnectReturnCode::IdentifierRejected,
            3 => ConnectReturnCode::ServerUnavailable,
            4 => ConnectReturnCode::BadUsernameOrPassword,
            5 => ConnectReturnCode::NotAuthorized,
            other => ConnectReturnCode::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ConnectReturnCode::Accepted => 0,
            ConnectReturnCode::UnacceptableProtocolVersion => 1,
            ConnectReturnCode::IdentifierRejected => 2,
            ConnectReturnCode::ServerUnavailable => 3,
            ConnectReturnCode::BadUsernameOrPassword => 4,
            ConnectReturnCode::NotAuthorized => 5,
            ConnectReturnCode::Other(code) => code,
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectReturnCode::Accepted => write!(f, "connection accepted"),
            ConnectReturnCode::UnacceptableProtocolVersion => {
                write!(f, "unacceptable protocol version (code 1)")
            }
            ConnectReturnCode::IdentifierRejected => write!(f, "identifier rejected (code 2)"),
            ConnectReturnCode::ServerUnavailable => write!(f, "server unavailable (code 3)"),
            ConnectReturnCode::BadUsernameOrPassword => {
                write!(f, "bad username or password (code 4)")
            }
            ConnectReturnCode::NotAuthorized => write!(f, "not authorized (code 5)"),
            ConnectReturnCode::Other(code) => write!(f, "unknown return code {code}"),
        }
    }
}

/// Connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and nothing scheduled.
    #[default]
    Idle,
    /// Waiting for the transport to open.
    Connecting,
    /// CONNECT sent, waiting for CONNACK.
    AwaitingAck,
    /// CONNACK accepted.
    Connected,
    /// Tearing the link down on request.
    Disconnecting,
    /// Waiting out the reconnect delay.
    ReconnectPending,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingAck => "awaiting-ack",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::ReconnectPending => "reconnect-pending",
        };
        f.write_str(name)
    }
}

/// Message received from the broker.
#[derive(Debug, Clone)]
pub struct Message {
    /// Topic name.
    pub topic: String,
    /// Message payload.
    pub payload: Bytes,
    /// QoS bits of the PUBLISH fixed header.
    pub qos: QoS,
    /// When the session decoded the frame.
    pub received_at: SystemTime,
}

impl Message {
    /// Returns the payload as UTF-8, if it is valid.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_code_roundtrip() {
        for code in 0u8..=7 {
            assert_eq!(ConnectReturnCode::from_u8(code).to_u8(), code);
        }
        assert_eq!(ConnectReturnCode::from_u8(4), ConnectReturnCode::BadUsernameOrPassword);
        assert_eq!(ConnectReturnCode::from_u8(9), ConnectReturnCode::Other(9));
    }

    #[test]
    fn test_qos_serde() {
        let qos: QoS = serde_json::from_str("1").unwrap();
        assert_eq!(qos, QoS::AtLeastOnce);
        assert_eq!(serde_json::to_string(&QoS::ExactlyOnce).unwrap(), "2");
        assert!(serde_json::from_str::<QoS>("3").is_err());
    }

    #[test]
    fn test_packet_type_reserved() {
        assert_eq!(PacketType::from_u8(0), None);
        assert_eq!(PacketType::from_u8(15), None);
        assert_eq!(PacketType::from_u8(13), Some(PacketType::PingResp));
    }
}
