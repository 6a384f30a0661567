//! MQTT packet encoding/decoding utilities.
//!
//! Low-level primitives shared by the packet builders: the remaining length
//! varint, big-endian integers, length-prefixed strings and the fixed header.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::types::{FixedHeader, PacketType};

/// Largest value a 4-byte remaining length can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Longest string a 2-byte length prefix can describe.
pub const MAX_STRING_LENGTH: usize = u16::MAX as usize;

/// Encode a remaining length as a base-128 variable-length integer.
pub fn encode_remaining_length(value: usize) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(4);
    put_remaining_length(&mut buf, value)?;
    Ok(buf.to_vec())
}

/// Append a remaining length to `buf`.
pub fn put_remaining_length(buf: &mut BytesMut, mut value: usize) -> Result<()> {
    if value > MAX_REMAINING_LENGTH {
        return Err(Error::Encoding(format!(
            "remaining length {value} exceeds {MAX_REMAINING_LENGTH}"
        )));
    }

    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;

        if value > 0 {
            byte |= 0x80;
        }

        buf.put_u8(byte);

        if value == 0 {
            return Ok(());
        }
    }
}

/// Number of bytes the remaining length field takes for `value`.
pub const fn remaining_length_len(value: usize) -> usize {
    if value < 128 {
        1
    } else if value < 128 * 128 {
        2
    } else if value < 128 * 128 * 128 {
        3
    } else {
        4
    }
}

/// Scan a remaining length at the start of `buf`.
///
/// Returns `Ok(None)` when the input ends before the continuation bit clears
/// and fewer than four bytes were seen, so more data could still complete it.
pub(crate) fn scan_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut multiplier = 1usize;
    let mut value = 0usize;

    for (i, &byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(Error::MalformedPacket(
                "remaining length longer than 4 bytes".to_string(),
            ));
        }

        value += (byte & 0x7F) as usize * multiplier;

        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }

        multiplier *= 128;
    }

    if buf.len() >= 4 {
        return Err(Error::MalformedPacket(
            "remaining length longer than 4 bytes".to_string(),
        ));
    }

    Ok(None)
}

/// Decode a remaining length starting at `offset`.
///
/// Returns `(value, bytes_consumed)`.
pub fn decode_remaining_length(buf: &[u8], offset: usize) -> Result<(usize, usize)> {
    let tail = buf.get(offset..).unwrap_or_default();
    scan_remaining_length(tail)?
        .ok_or_else(|| Error::MalformedPacket("truncated remaining length".to_string()))
}

/// Read a 2-byte big-endian u16.
pub fn read_u16(buf: &[u8]) -> Option<u16> {
    if buf.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Encode UTF-16 code units as UTF-8, one code unit at a time.
///
/// A surrogate unit is combined with the unit that follows it into one
/// 4-byte sequence; a missing partner counts as zero. Units at or above
/// 0x800 take three bytes, at or above 0x80 two, the rest one. For the code
/// units of any valid `str` the output equals `str::as_bytes`.
pub fn encode_utf16(units: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(units.len() * 3);
    let mut i = 0;

    while i < units.len() {
        let unit = units[i] as u32;

        if unit < 0x80 {
            out.push(unit as u8);
        } else if unit < 0x800 {
            out.push(0xC0 | (unit >> 6) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        } else if !(0xD800..0xE000).contains(&unit) {
            out.push(0xE0 | (unit >> 12) as u8);
            out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        } else {
            i += 1;
            let trail = units.get(i).copied().unwrap_or(0) as u32;
            let code_point = 0x10000 + (((unit & 0x3FF) << 10) | (trail & 0x3FF));
            out.push(0xF0 | (code_point >> 18) as u8);
            out.push(0x80 | ((code_point >> 12) & 0x3F) as u8);
            out.push(0x80 | ((code_point >> 6) & 0x3F) as u8);
            out.push(0x80 | (code_point & 0x3F) as u8);
        }

        i += 1;
    }

    out
}

/// Decode UTF-8 bytes into UTF-16 code units.
///
/// Four-byte sequences become a surrogate pair.
pub fn decode_utf16(bytes: &[u8]) -> Result<Vec<u16>> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let lead = bytes[i];
        let (extra, initial) = match lead {
            0x00..=0x7F => (0, lead as u32),
            _ if lead & 0xE0 == 0xC0 => (1, (lead & 0x1F) as u32),
            _ if lead & 0xF0 == 0xE0 => (2, (lead & 0x0F) as u32),
            _ if lead & 0xF8 == 0xF0 => (3, (lead & 0x07) as u32),
            _ => {
                return Err(Error::MalformedPacket(format!(
                    "invalid utf-8 lead byte 0x{lead:02x} at {i}"
                )));
            }
        };

        if i + extra >= bytes.len() && extra > 0 {
            return Err(Error::MalformedPacket(format!(
                "truncated utf-8 sequence at {i}"
            )));
        }

        let mut code_point = initial;
        for &byte in &bytes[i + 1..i + 1 + extra] {
            code_point = (code_point << 6) | (byte & 0x3F) as u32;
        }

        if code_point >= 0x10000 {
            let offset = code_point - 0x10000;
            units.push(0xD800 | ((offset >> 10) & 0x3FF) as u16);
            units.push(0xDC00 | (offset & 0x3FF) as u16);
        } else {
            units.push(code_point as u16);
        }

        i += 1 + extra;
    }

    Ok(units)
}

/// Decode UTF-8 bytes into a `String` via UTF-16 code units.
pub fn decode_string(bytes: &[u8]) -> Result<String> {
    let units = decode_utf16(bytes)?;
    String::from_utf16(&units).map_err(|e| Error::MalformedPacket(e.to_string()))
}

/// Encode a string with its 2-byte length prefix.
pub fn encode_string(s: &str) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(2 + s.len());
    put_string(&mut buf, s)?;
    Ok(buf.freeze())
}

/// Append a length-prefixed UTF-8 string to `buf`.
///
/// A `str` is already UTF-8, so its bytes are exactly what [`encode_utf16`]
/// produces from its code units and are written as-is.
pub fn put_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    put_binary(buf, s.as_bytes())
}

/// Append length-prefixed binary data to `buf`.
pub fn put_binary(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    if data.len() > MAX_STRING_LENGTH {
        return Err(Error::Encoding(format!(
            "string of {} bytes exceeds {MAX_STRING_LENGTH}",
            data.len()
        )));
    }
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

/// Read a length-prefixed string.
///
/// Returns `(string, bytes_consumed)`.
pub fn read_string(buf: &[u8]) -> Result<(String, usize)> {
    let (bytes, consumed) = read_binary(buf)?;
    Ok((decode_string(bytes)?, consumed))
}

/// Read length-prefixed binary data as a slice.
pub fn read_binary(buf: &[u8]) -> Result<(&[u8], usize)> {
    let len = read_u16(buf)
        .ok_or_else(|| Error::MalformedPacket("missing length prefix".to_string()))?
        as usize;

    if buf.len() < 2 + len {
        return Err(Error::MalformedPacket(format!(
            "string needs {len} bytes, {} available",
            buf.len() - 2
        )));
    }

    Ok((&buf[2..2 + len], 2 + len))
}

/// Parse a fixed header.
///
/// Returns `Ok(None)` if the remaining length field is incomplete.
pub fn read_fixed_header(buf: &[u8]) -> Result<Option<FixedHeader>> {
    let Some(&first_byte) = buf.first() else {
        return Ok(None);
    };

    let Some((remaining_length, var_len)) = scan_remaining_length(&buf[1..])? else {
        return Ok(None);
    };

    let packet_type_byte = first_byte >> 4;
    let packet_type = PacketType::from_u8(packet_type_byte).ok_or_else(|| {
        Error::MalformedPacket(format!("reserved packet type {packet_type_byte}"))
    })?;

    Ok(Some(FixedHeader {
        packet_type,
        flags: first_byte & 0x0F,
        remaining_length,
        header_length: 1 + var_len,
    }))
}

/// Assemble a packet from its fixed header fields and body.
pub fn finish_packet(packet_type: PacketType, flags: u8, body: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(1 + remaining_length_len(body.len()) + body.len());
    buf.put_u8(((packet_type as u8) << 4) | (flags & 0x0F));
    put_remaining_length(&mut buf, body.len())?;
    buf.put_slice(body);
    Ok(buf.freeze())
}
