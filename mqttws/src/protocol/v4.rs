//! MQTT 3.1.1 (v4) packets.
//!
//! Encoders are builder functions that return the complete frame as
//! immutable [`Bytes`]. Decoding happens in two steps: [`decode`] splits one
//! transport frame into its fixed header and body, then [`Packet::parse`]
//! interprets the body for the packet type.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::types::{ConnectReturnCode, PacketType, QoS};

use super::codec::{
    finish_packet, put_string, read_binary, read_fixed_header, read_string, read_u16,
};
use super::{PROTOCOL_LEVEL, PROTOCOL_NAME};

const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

/// SUBSCRIBE and UNSUBSCRIBE carry fixed flags of 0x02.
const FLAGS_REQUIRED: u8 = 0x02;

/// One frame split into fixed header fields and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub packet_type: PacketType,
    pub flags: u8,
    /// Variable header plus payload.
    pub body: Bytes,
}

/// MQTT 3.1.1 packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect,
}

/// CONNECT packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_name: String,
    pub protocol_level: u8,
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

/// CONNACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub code: ConnectReturnCode,
}

/// PUBLISH packet.
///
/// The body is the topic followed directly by the message; no packet
/// identifier is read or written, whatever the QoS bits say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
}

/// SUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub pkid: u16,
    pub filters: Vec<(String, QoS)>,
}

/// SUBACK packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub pkid: u16,
    pub return_codes: Vec<u8>,
}

/// UNSUBSCRIBE packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub pkid: u16,
    pub topics: Vec<String>,
}

/// UNSUBACK packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAck {
    pub pkid: u16,
}

// ============================================================================
// Frame decoding
// ============================================================================

/// Split one transport frame into fixed header fields and body.
///
/// Returns `Ok(None)` if the frame is shorter than the packet it announces.
/// One frame is expected to carry exactly one packet; extra bytes are
/// dropped with a warning.
pub fn decode(frame: &Bytes) -> Result<Option<RawPacket>> {
    let Some(header) = read_fixed_header(frame)? else {
        return Ok(None);
    };

    let end = header.header_length + header.remaining_length;
    if frame.len() < end {
        return Ok(None);
    }

    if frame.len() > end {
        warn!(
            "frame carries {} bytes past the {:?} packet, ignoring them",
            frame.len() - end,
            header.packet_type
        );
    }

    Ok(Some(RawPacket {
        packet_type: header.packet_type,
        flags: header.flags,
        body: frame.slice(header.header_length..end),
    }))
}

impl Packet {
    /// Interpret the body of a decoded frame.
    pub fn parse(raw: &RawPacket) -> Result<Packet> {
        let body = raw.body.as_ref();
        let packet = match raw.packet_type {
            PacketType::Connect => Packet::Connect(Connect::read(body)?),
            PacketType::ConnAck => Packet::ConnAck(ConnAck::read(body)?),
            PacketType::Publish => Packet::Publish(Publish::read(raw.flags, &raw.body)?),
            PacketType::Subscribe => Packet::Subscribe(Subscribe::read(body)?),
            PacketType::SubAck => Packet::SubAck(SubAck::read(body)?),
            PacketType::Unsubscribe => Packet::Unsubscribe(Unsubscribe::read(body)?),
            PacketType::UnsubAck => Packet::UnsubAck(UnsubAck::read(body)?),
            PacketType::PingReq => Packet::PingReq,
            PacketType::PingResp => Packet::PingResp,
            PacketType::Disconnect => Packet::Disconnect,
            other => {
                return Err(Error::MalformedPacket(format!(
                    "{other:?} is not supported by this client"
                )));
            }
        };
        Ok(packet)
    }
}

fn malformed(what: &str) -> Error {
    Error::MalformedPacket(what.to_string())
}

impl Connect {
    pub fn read(buf: &[u8]) -> Result<Self> {
        let mut pos = 0;

        let (protocol_name, len) = read_string(buf)?;
        pos += len;

        let protocol_level = *buf.get(pos).ok_or_else(|| malformed("missing protocol level"))?;
        pos += 1;

        let flags = *buf.get(pos).ok_or_else(|| malformed("missing connect flags"))?;
        pos += 1;

        let keep_alive = read_u16(&buf[pos..]).ok_or_else(|| malformed("missing keep alive"))?;
        pos += 2;

        let (client_id, len) = read_string(&buf[pos..])?;
        pos += len;

        let username = if flags & FLAG_USERNAME != 0 {
            let (username, len) = read_string(&buf[pos..])?;
            pos += len;
            Some(username)
        } else {
            None
        };

        let password = if flags & FLAG_PASSWORD != 0 {
            let (password, _) = read_binary(&buf[pos..])?;
            Some(password.to_vec())
        } else {
            None
        };

        Ok(Connect {
            protocol_name,
            protocol_level,
            client_id,
            keep_alive,
            clean_session: flags & FLAG_CLEAN_SESSION != 0,
            username,
            password,
        })
    }
}

impl ConnAck {
    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(malformed("CONNACK shorter than 2 bytes"));
        }

        Ok(ConnAck {
            session_present: buf[0] & 0x01 != 0,
            code: ConnectReturnCode::from_u8(buf[1]),
        })
    }
}

impl Publish {
    pub fn read(flags: u8, body: &Bytes) -> Result<Self> {
        let qos_bits = (flags >> 1) & 0x03;
        let qos = QoS::from_u8(qos_bits)
            .ok_or_else(|| Error::MalformedPacket(format!("invalid qos {qos_bits}")))?;

        let (topic, payload) = decode_publish(body)?;
        Ok(Publish {
            topic,
            payload,
            qos,
        })
    }
}

impl Subscribe {
    pub fn read(buf: &[u8]) -> Result<Self> {
        let pkid = read_u16(buf).ok_or_else(|| malformed("missing packet identifier"))?;
        let mut pos = 2;

        let mut filters = Vec::new();
        while pos < buf.len() {
            let (path, len) = read_string(&buf[pos..])?;
            pos += len;

            let requested = *buf.get(pos).ok_or_else(|| malformed("missing requested qos"))?;
            let qos = QoS::from_u8(requested & 0x03)
                .ok_or_else(|| Error::MalformedPacket(format!("invalid qos {requested}")))?;
            pos += 1;

            filters.push((path, qos));
        }

        Ok(Subscribe { pkid, filters })
    }
}

impl SubAck {
    pub fn read(buf: &[u8]) -> Result<Self> {
        let pkid = read_u16(buf).ok_or_else(|| malformed("missing packet identifier"))?;
        Ok(SubAck {
            pkid,
            return_codes: buf[2..].to_vec(),
        })
    }
}

impl Unsubscribe {
    pub fn read(buf: &[u8]) -> Result<Self> {
        let pkid = read_u16(buf).ok_or_else(|| malformed("missing packet identifier"))?;
        let mut pos = 2;

        let mut topics = Vec::new();
        while pos < buf.len() {
            let (topic, len) = read_string(&buf[pos..])?;
            topics.push(topic);
            pos += len;
        }

        Ok(Unsubscribe { pkid, topics })
    }
}

impl UnsubAck {
    pub fn read(buf: &[u8]) -> Result<Self> {
        let pkid = read_u16(buf).ok_or_else(|| malformed("missing packet identifier"))?;
        Ok(UnsubAck { pkid })
    }
}

/// Return code of a CONNACK body.
pub fn decode_connack(body: &[u8]) -> Result<ConnectReturnCode> {
    ConnAck::read(body).map(|ack| ack.code)
}

/// Topic and message of a PUBLISH body.
pub fn decode_publish(body: &Bytes) -> Result<(String, Bytes)> {
    let (topic, len) = read_string(body)?;
    Ok((topic, body.slice(len..)))
}

// ============================================================================
// Client packet builders
// ============================================================================

/// Build the CONNECT frame for `config`.
pub fn encode_connect(config: &ClientConfig) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(64);

    put_string(&mut body, PROTOCOL_NAME)?;
    body.put_u8(PROTOCOL_LEVEL);

    // An empty credential counts as absent.
    let username = config.username.as_deref().filter(|s| !s.is_empty());
    let password = config.password.as_deref().filter(|s| !s.is_empty());

    let mut flags = 0u8;
    if config.clean_session {
        flags |= FLAG_CLEAN_SESSION;
    }
    if username.is_some() {
        flags |= FLAG_USERNAME;
    }
    if password.is_some() {
        flags |= FLAG_PASSWORD;
    }
    body.put_u8(flags);
    body.put_u16(config.keep_alive);

    put_string(&mut body, &config.client_id)?;
    if let Some(username) = username {
        put_string(&mut body, username)?;
    }
    if let Some(password) = password {
        put_string(&mut body, password)?;
    }

    finish_packet(PacketType::Connect, 0, &body)
}

/// Build a SUBSCRIBE frame for a single topic filter.
pub fn encode_subscribe(pkid: u16, topic: &str, qos: QoS) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(5 + topic.len());
    body.put_u16(pkid);
    put_string(&mut body, topic)?;
    body.put_u8(qos as u8);
    finish_packet(PacketType::Subscribe, FLAGS_REQUIRED, &body)
}

/// Build an UNSUBSCRIBE frame for a single topic filter.
pub fn encode_unsubscribe(pkid: u16, topic: &str) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(4 + topic.len());
    body.put_u16(pkid);
    put_string(&mut body, topic)?;
    finish_packet(PacketType::Unsubscribe, FLAGS_REQUIRED, &body)
}

/// Build a PUBLISH frame.
///
/// The QoS bits are set to `qos << 1` but no packet identifier follows the
/// topic, matching the brokers this client has been deployed against.
pub fn encode_publish(topic: &str, payload: &[u8], qos: QoS) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(2 + topic.len() + payload.len());
    put_string(&mut body, topic)?;
    body.put_slice(payload);
    finish_packet(PacketType::Publish, (qos as u8) << 1, &body)
}

/// Build a PINGREQ frame (`C0 00`).
pub fn encode_pingreq() -> Bytes {
    Bytes::from_static(&[0xC0, 0x00])
}

/// Build a DISCONNECT frame (`E0 00`).
pub fn encode_disconnect() -> Bytes {
    Bytes::from_static(&[0xE0, 0x00])
}

// ============================================================================
// Broker packet builders
// ============================================================================

/// Build a CONNACK frame.
pub fn encode_connack(session_present: bool, code: ConnectReturnCode) -> Bytes {
    Bytes::from(vec![0x20, 0x02, session_present as u8, code.to_u8()])
}

/// Build a SUBACK frame.
pub fn encode_suback(pkid: u16, return_codes: &[u8]) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(2 + return_codes.len());
    body.put_u16(pkid);
    body.put_slice(return_codes);
    finish_packet(PacketType::SubAck, 0, &body)
}

/// Build an UNSUBACK frame.
pub fn encode_unsuback(pkid: u16) -> Bytes {
    let [hi, lo] = pkid.to_be_bytes();
    Bytes::from(vec![0xB0, 0x02, hi, lo])
}

/// Build a PINGRESP frame (`D0 00`).
pub fn encode_pingresp() -> Bytes {
    Bytes::from_static(&[0xD0, 0x00])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(frame: Bytes) -> Packet {
        let raw = decode(&frame).unwrap().expect("complete frame");
        Packet::parse(&raw).unwrap()
    }

    #[test]
    fn test_connect_bytes() {
        let config = ClientConfig::new("broker.local", "c1")
            .with_keep_alive(60)
            .with_clean_session(true);

        let frame = encode_connect(&config).unwrap();
        assert_eq!(
            frame.as_ref(),
            &[
                0x10, 0x0E, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3C, 0x00,
                0x02, b'c', b'1'
            ]
        );
    }

    #[test]
    fn test_connect_with_credentials() {
        let config = ClientConfig::new("broker.local", "sensor-7")
            .with_credentials("hhb", "123456")
            .with_clean_session(false)
            .with_keep_alive(30);

        match parse(encode_connect(&config).unwrap()) {
            Packet::Connect(connect) => {
                assert_eq!(connect.protocol_name, "MQTT");
                assert_eq!(connect.protocol_level, 4);
                assert_eq!(connect.client_id, "sensor-7");
                assert_eq!(connect.keep_alive, 30);
                assert!(!connect.clean_session);
                assert_eq!(connect.username.as_deref(), Some("hhb"));
                assert_eq!(connect.password.as_deref(), Some(&b"123456"[..]));
            }
            other => panic!("expected Connect, got {other:?}"),
        }

        // Flags byte: username (0x80) | password (0x40).
        let frame = encode_connect(&config).unwrap();
        assert_eq!(frame[9], 0xC0);
    }

    #[test]
    fn test_connect_empty_credentials() {
        let config = ClientConfig::new("broker.local", "c1")
            .with_keep_alive(60)
            .with_clean_session(true)
            .with_credentials("", "");

        let frame = encode_connect(&config).unwrap();
        assert_eq!(frame[9], 0x02);
        assert!(frame.ends_with(&[0x00, 0x02, b'c', b'1']));
        assert_eq!(frame.len(), 16);

        let mut config = config.with_credentials("hhb", "");
        let frame = encode_connect(&config).unwrap();
        assert_eq!(frame[9], 0x82);
        assert!(frame.ends_with(&[0x00, 0x03, b'h', b'h', b'b']));

        config.username = Some(String::new());
        config.password = Some("123456".to_string());
        match parse(encode_connect(&config).unwrap()) {
            Packet::Connect(connect) => {
                assert_eq!(connect.username, None);
                assert_eq!(connect.password.as_deref(), Some(&b"123456"[..]));
            }
            other => panic!("expected Connect, got {other:?}"),
        }
    }

    #[test]
    fn test_subscribe_frame() {
        let frame = encode_subscribe(7, "a/b", QoS::AtLeastOnce).unwrap();
        assert_eq!(
            frame.as_ref(),
            &[0x82, 0x08, 0x00, 0x07, 0x00, 0x03, b'a', b'/', b'b', 0x01]
        );

        match parse(frame) {
            Packet::Subscribe(sub) => {
                assert_eq!(sub.pkid, 7);
                assert_eq!(sub.filters, vec![("a/b".to_string(), QoS::AtLeastOnce)]);
            }
            other => panic!("expected Subscribe, got {other:?}"),
        }
    }

    #[test]
    fn test_unsubscribe_frame() {
        let frame = encode_unsubscribe(0x0102, "a/b").unwrap();
        assert_eq!(frame[0], 0xA2);

        match parse(frame) {
            Packet::Unsubscribe(unsub) => {
                assert_eq!(unsub.pkid, 0x0102);
                assert_eq!(unsub.topics, vec!["a/b".to_string()]);
            }
            other => panic!("expected Unsubscribe, got {other:?}"),
        }
    }

    #[test]
    fn test_publish_roundtrip() {
        let cases = [
            ("a/b", "hi", QoS::AtMostOnce),
            ("设备/温度", "23.5℃", QoS::AtLeastOnce),
            ("relay/🔌/state", "on 👍", QoS::ExactlyOnce),
            ("empty", "", QoS::AtMostOnce),
        ];

        for (topic, payload, qos) in cases {
            let frame = encode_publish(topic, payload.as_bytes(), qos).unwrap();
            assert_eq!(frame[0], 0x30 | ((qos as u8) << 1));

            match parse(frame) {
                Packet::Publish(publish) => {
                    assert_eq!(publish.topic, topic);
                    assert_eq!(publish.payload.as_ref(), payload.as_bytes());
                    assert_eq!(publish.qos, qos);
                }
                other => panic!("expected Publish, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_publish_large_payload_uses_multibyte_length() {
        let payload = vec![0x5A; 20_000];
        let frame = encode_publish("bulk", &payload, QoS::AtMostOnce).unwrap();
        // 2 + 4 + 20000 = 20006 needs a 3-byte remaining length.
        assert_eq!(&frame[1..4], &[0xA6, 0x9C, 0x01]);

        match parse(frame) {
            Packet::Publish(publish) => assert_eq!(publish.payload.len(), 20_000),
            other => panic!("expected Publish, got {other:?}"),
        }
    }

    #[test]
    fn test_fixed_frames() {
        assert_eq!(encode_pingreq().as_ref(), &[0xC0, 0x00]);
        assert_eq!(encode_pingresp().as_ref(), &[0xD0, 0x00]);
        assert_eq!(encode_disconnect().as_ref(), &[0xE0, 0x00]);
        assert_eq!(parse(encode_pingreq()), Packet::PingReq);
        assert_eq!(parse(encode_pingresp()), Packet::PingResp);
    }

    #[test]
    fn test_connack() {
        match parse(encode_connack(true, ConnectReturnCode::NotAuthorized)) {
            Packet::ConnAck(connack) => {
                assert!(connack.session_present);
                assert_eq!(connack.code, ConnectReturnCode::NotAuthorized);
            }
            other => panic!("expected ConnAck, got {other:?}"),
        }

        let short = RawPacket {
            packet_type: PacketType::ConnAck,
            flags: 0,
            body: Bytes::from_static(&[0x00]),
        };
        assert!(matches!(Packet::parse(&short), Err(Error::MalformedPacket(_))));
    }

    #[test]
    fn test_decode_bodies() {
        assert_eq!(
            decode_connack(&[0x00, 0x05]).unwrap(),
            ConnectReturnCode::NotAuthorized
        );
        assert!(decode_connack(&[]).is_err());

        let body = Bytes::from_static(&[0x00, 0x01, b't', 0xFF, 0x00]);
        let (topic, payload) = decode_publish(&body).unwrap();
        assert_eq!(topic, "t");
        assert_eq!(payload.as_ref(), &[0xFF, 0x00]);
        assert!(decode_publish(&Bytes::from_static(&[0x00, 0x09, b't'])).is_err());
    }

    #[test]
    fn test_acks() {
        match parse(encode_suback(3, &[0x00, 0x80]).unwrap()) {
            Packet::SubAck(ack) => {
                assert_eq!(ack.pkid, 3);
                assert_eq!(ack.return_codes, vec![0x00, 0x80]);
            }
            other => panic!("expected SubAck, got {other:?}"),
        }
        assert_eq!(parse(encode_unsuback(9)), Packet::UnsubAck(UnsubAck { pkid: 9 }));
    }

    #[test]
    fn test_decode_incomplete() {
        assert_eq!(decode(&Bytes::new()).unwrap(), None);
        assert_eq!(decode(&Bytes::from_static(&[0x30])).unwrap(), None);
        assert_eq!(decode(&Bytes::from_static(&[0x30, 0x05, 0x00, 0x01])).unwrap(), None);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(decode(&Bytes::from_static(&[0x00, 0x00])).is_err());
        assert!(decode(&Bytes::from_static(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01])).is_err());
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let frame = Bytes::from_static(&[0xD0, 0x00, 0xC0, 0x00]);
        let raw = decode(&frame).unwrap().unwrap();
        assert_eq!(raw.packet_type, PacketType::PingResp);
        assert!(raw.body.is_empty());
    }

    #[test]
    fn test_qos_ack_packets_are_not_parsed() {
        let raw = RawPacket {
            packet_type: PacketType::PubAck,
            flags: 0,
            body: Bytes::from_static(&[0x00, 0x01]),
        };
        assert!(Packet::parse(&raw).is_err());
    }
}
