//! X.224 connection negotiation and data framing.
//!
//! The connection request/confirm TPDUs carry the RDP security protocol
//! negotiation; afterwards every connection-oriented payload is wrapped
//! in a 3-byte Data TPDU header (`02 F0 80`).

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RdxError;

const TPDU_CONNECTION_REQUEST: u8 = 0xE0;
const TPDU_CONNECTION_CONFIRM: u8 = 0xD0;
const TPDU_DATA: u8 = 0xF0;

const NEG_TYPE_REQUEST: u8 = 0x01;
const NEG_TYPE_RESPONSE: u8 = 0x02;
const NEG_TYPE_FAILURE: u8 = 0x03;

bitflags! {
    /// RDP security protocols advertised in the negotiation request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protocols: u32 {
        /// Enhanced security over TLS.
        const SSL = 0x0000_0001;
        /// CredSSP network-level authentication (implies TLS).
        const HYBRID = 0x0000_0002;
        /// CredSSP with early user authorization result.
        const HYBRID_EX = 0x0000_0008;
    }
}

/// Encode the client Connection Request TPDU with an RDP negotiation
/// request for `protocols`.
pub fn connection_request(protocols: Protocols) -> Bytes {
    let mut buf = BytesMut::with_capacity(15);
    buf.put_u8(14); // length indicator: 6 fixed + 8 negotiation
    buf.put_u8(TPDU_CONNECTION_REQUEST);
    buf.put_u16(0); // dst-ref
    buf.put_u16(0); // src-ref
    buf.put_u8(0); // class 0
    buf.put_u8(NEG_TYPE_REQUEST);
    buf.put_u8(0); // flags
    buf.put_u16_le(8); // length
    buf.put_u32_le(protocols.bits());
    buf.freeze()
}

/// Decode the server Connection Confirm TPDU, returning the selected
/// protocol. A negotiation failure PDU maps to [`RdxError::Negotiation`].
pub fn parse_connection_confirm(mut payload: Bytes) -> Result<Protocols, RdxError> {
    if payload.remaining() < 7 {
        return Err(RdxError::Decode("connection confirm too short"));
    }
    let li = payload.get_u8();
    let code = payload.get_u8();
    if code & 0xf0 != TPDU_CONNECTION_CONFIRM {
        return Err(RdxError::Decode("expected connection confirm TPDU"));
    }
    payload.advance(5); // dst-ref, src-ref, class

    if li <= 6 {
        // No negotiation response: legacy server, standard RDP security.
        return Ok(Protocols::empty());
    }
    if payload.remaining() < 8 {
        return Err(RdxError::Decode("negotiation response too short"));
    }
    let neg_type = payload.get_u8();
    let _flags = payload.get_u8();
    let _length = payload.get_u16_le();
    let data = payload.get_u32_le();

    match neg_type {
        NEG_TYPE_RESPONSE => Ok(Protocols::from_bits_truncate(data)),
        NEG_TYPE_FAILURE => Err(RdxError::Negotiation(data)),
        _ => Err(RdxError::Decode("unknown negotiation PDU type")),
    }
}

/// Prefix `payload` with the X.224 Data TPDU header.
pub fn wrap_data(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 3);
    buf.put_u8(2); // length indicator
    buf.put_u8(TPDU_DATA);
    buf.put_u8(0x80); // EOT
    buf.put_slice(payload);
    buf.freeze()
}

/// Strip the X.224 Data TPDU header from an inbound frame.
pub fn unwrap_data(mut frame: Bytes) -> Result<Bytes, RdxError> {
    if frame.remaining() < 3 {
        return Err(RdxError::Decode("X.224 data TPDU too short"));
    }
    let _li = frame.get_u8();
    let code = frame.get_u8();
    if code & 0xf0 != TPDU_DATA {
        return Err(RdxError::Decode("expected X.224 data TPDU"));
    }
    let _eot = frame.get_u8();
    Ok(frame)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_request_layout() {
        let req = connection_request(Protocols::SSL | Protocols::HYBRID);
        assert_eq!(req[0], 14);
        assert_eq!(req[1], 0xE0);
        assert_eq!(req[7], 0x01);
        assert_eq!(&req[9..11], &[0x08, 0x00]);
        assert_eq!(&req[11..15], &[0x03, 0x00, 0x00, 0x00]);
    }

    fn confirm_with(neg_type: u8, data: u32) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(14);
        buf.put_u8(0xD0);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u8(0);
        buf.put_u8(neg_type);
        buf.put_u8(0);
        buf.put_u16_le(8);
        buf.put_u32_le(data);
        buf.freeze()
    }

    #[test]
    fn confirm_selects_protocol() {
        let selected = parse_connection_confirm(confirm_with(NEG_TYPE_RESPONSE, 2)).unwrap();
        assert_eq!(selected, Protocols::HYBRID);
    }

    #[test]
    fn negotiation_failure_maps_to_error() {
        let err = parse_connection_confirm(confirm_with(NEG_TYPE_FAILURE, 5)).unwrap_err();
        assert!(matches!(err, RdxError::Negotiation(5)));
    }

    #[test]
    fn wrong_tpdu_code_is_decode_error() {
        let mut buf = BytesMut::new();
        buf.put_u8(6);
        buf.put_u8(0xE0);
        buf.put_slice(&[0; 5]);
        assert!(parse_connection_confirm(buf.freeze()).is_err());
    }

    #[test]
    fn data_header_roundtrip() {
        let wrapped = wrap_data(b"payload");
        assert_eq!(&wrapped[..3], &[0x02, 0xF0, 0x80]);
        let inner = unwrap_data(wrapped).unwrap();
        assert_eq!(&inner[..], b"payload");
    }
}
