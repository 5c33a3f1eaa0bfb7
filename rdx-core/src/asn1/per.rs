//! Aligned PER primitives (ITU X.691) for the MCS domain PDUs and the
//! T.124 conference wrappers.

use bytes::{BufMut, Bytes, BytesMut};

use crate::asn1::{take, take_u8};
use crate::error::RdxError;

// ── Writing ──────────────────────────────────────────────────────

pub fn write_choice(buf: &mut BytesMut, choice: u8) {
    buf.put_u8(choice);
}

pub fn write_selection(buf: &mut BytesMut, selection: u8) {
    buf.put_u8(selection);
}

pub fn write_number_of_set(buf: &mut BytesMut, n: u8) {
    buf.put_u8(n);
}

pub fn write_padding(buf: &mut BytesMut, n: usize) {
    buf.put_bytes(0, n);
}

/// PER length determinant: 7-bit short form or 15-bit `0x8000`-flagged
/// long form.
pub fn write_length(buf: &mut BytesMut, len: usize) {
    if len > 0x7f {
        buf.put_u16(len as u16 | 0x8000);
    } else {
        buf.put_u8(len as u8);
    }
}

pub fn write_integer(buf: &mut BytesMut, value: u32) {
    if value <= 0xff {
        write_length(buf, 1);
        buf.put_u8(value as u8);
    } else if value <= 0xffff {
        write_length(buf, 2);
        buf.put_u16(value as u16);
    } else {
        write_length(buf, 4);
        buf.put_u32(value);
    }
}

pub fn write_integer16(buf: &mut BytesMut, value: u16) {
    buf.put_u16(value);
}

/// Object identifier in the fixed six-arc form used by T.124.
pub fn write_object_identity(buf: &mut BytesMut, oid: &[u8; 6]) {
    buf.put_u8(5);
    buf.put_u8(((oid[0] << 4) & 0xf0) | (oid[1] & 0x0f));
    buf.put_slice(&oid[2..6]);
}

/// Numeric string, digits packed two per byte.
pub fn write_numeric_string(buf: &mut BytesMut, digits: &[u8], min_length: usize) {
    let len = digits.len().saturating_sub(min_length);
    write_length(buf, len);
    for pair in digits.chunks(2) {
        let hi = (pair[0] - 0x30) << 4;
        let lo = if pair.len() > 1 { pair[1] - 0x30 } else { 0 };
        buf.put_u8(hi | lo);
    }
}

pub fn write_octet_stream(buf: &mut BytesMut, data: &[u8], min_length: usize) {
    write_length(buf, data.len().saturating_sub(min_length));
    buf.put_slice(data);
}

// ── Reading ──────────────────────────────────────────────────────

pub fn read_choice(r: &mut Bytes) -> Result<u8, RdxError> {
    take_u8(r, "PER choice")
}

pub fn read_enumerates(r: &mut Bytes) -> Result<u8, RdxError> {
    take_u8(r, "PER enumerated")
}

pub fn read_number_of_set(r: &mut Bytes) -> Result<u8, RdxError> {
    take_u8(r, "PER number of set")
}

pub fn read_length(r: &mut Bytes) -> Result<usize, RdxError> {
    let b0 = take_u8(r, "PER length")?;
    if b0 & 0x80 != 0 {
        let b1 = take_u8(r, "PER length")?;
        Ok((((b0 & 0x7f) as usize) << 8) | b1 as usize)
    } else {
        Ok(b0 as usize)
    }
}

pub fn read_integer(r: &mut Bytes) -> Result<u32, RdxError> {
    let len = read_length(r)?;
    let bytes = take(r, len, "PER integer body")?;
    match len {
        1 => Ok(bytes[0] as u32),
        2 => Ok(u32::from(u16::from_be_bytes([bytes[0], bytes[1]]))),
        4 => Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        _ => Err(RdxError::Decode("PER integer width")),
    }
}

pub fn read_integer16(r: &mut Bytes) -> Result<u16, RdxError> {
    let bytes = take(r, 2, "PER integer16")?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn read_object_identity(r: &mut Bytes, expected: &[u8; 6]) -> Result<(), RdxError> {
    let len = take_u8(r, "PER object identity")?;
    if len != 5 {
        return Err(RdxError::Decode("PER object identity length"));
    }
    let body = take(r, 5, "PER object identity body")?;
    let first = ((expected[0] << 4) & 0xf0) | (expected[1] & 0x0f);
    if body[0] != first || body[1..5] != expected[2..6] {
        return Err(RdxError::Decode("PER object identity mismatch"));
    }
    Ok(())
}

pub fn read_octet_stream(
    r: &mut Bytes,
    expected: &[u8],
    min_length: usize,
) -> Result<(), RdxError> {
    let len = read_length(r)? + min_length;
    let body = take(r, len, "PER octet stream body")?;
    if &body[..] != expected {
        return Err(RdxError::Decode("PER octet stream mismatch"));
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_length_roundtrip() {
        let mut buf = BytesMut::new();
        write_length(&mut buf, 0x7f);
        assert_eq!(&buf[..], &[0x7f]);
        let mut r = buf.freeze();
        assert_eq!(read_length(&mut r).unwrap(), 0x7f);
    }

    #[test]
    fn long_length_sets_high_bit() {
        let mut buf = BytesMut::new();
        write_length(&mut buf, 0x1c8);
        assert_eq!(&buf[..], &[0x81, 0xc8]);
        let mut r = buf.freeze();
        assert_eq!(read_length(&mut r).unwrap(), 0x1c8);
    }

    #[test]
    fn integer16_is_big_endian() {
        let mut buf = BytesMut::new();
        write_integer16(&mut buf, 1003);
        assert_eq!(&buf[..], &[0x03, 0xeb]);
        let mut r = buf.freeze();
        assert_eq!(read_integer16(&mut r).unwrap(), 1003);
    }

    #[test]
    fn t124_object_identity_bytes() {
        let mut buf = BytesMut::new();
        write_object_identity(&mut buf, &[0, 0, 20, 124, 0, 1]);
        assert_eq!(&buf[..], &[0x05, 0x00, 0x14, 0x7c, 0x00, 0x01]);
        let mut r = buf.freeze();
        read_object_identity(&mut r, &[0, 0, 20, 124, 0, 1]).unwrap();
    }

    #[test]
    fn numeric_string_packs_nibbles() {
        let mut buf = BytesMut::new();
        write_numeric_string(&mut buf, b"1", 1);
        assert_eq!(&buf[..], &[0x00, 0x10]);
    }

    #[test]
    fn octet_stream_with_minimum() {
        let mut buf = BytesMut::new();
        write_octet_stream(&mut buf, b"Duca", 4);
        assert_eq!(&buf[..], &[0x00, b'D', b'u', b'c', b'a']);
        let mut r = buf.freeze();
        read_octet_stream(&mut r, b"Duca", 4).unwrap();
    }
}
