//! Presentation layer — share control/data PDUs, capability exchange,
//! finalization, input and update codecs.
//!
//! ```text
//! Server ──[Demand Active]──────────────────────► Client
//! Client ──[Confirm Active]─────────────────────► Server
//! Client ──[Synchronize][Control coop][Control req][Font List]─► Server
//! Server ──[Synchronize][Control coop][Control granted][Font Map]─► Client
//!                                                   └── ready
//! ```

pub mod caps;
pub mod input;
pub mod update;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RdxError;

// Share control PDU types (low nibble; 0x0010 is the protocol version).
pub const PDUTYPE_DEMANDACTIVE: u16 = 0x1;
pub const PDUTYPE_CONFIRMACTIVE: u16 = 0x3;
pub const PDUTYPE_DEACTIVATEALL: u16 = 0x6;
pub const PDUTYPE_DATA: u16 = 0x7;

const PROTOCOL_VERSION: u16 = 0x0010;

// Share data PDU types (pduType2).
pub const PDUTYPE2_UPDATE: u8 = 0x02;
pub const PDUTYPE2_CONTROL: u8 = 0x14;
pub const PDUTYPE2_POINTER: u8 = 0x1B;
pub const PDUTYPE2_INPUT: u8 = 0x1C;
pub const PDUTYPE2_SYNCHRONIZE: u8 = 0x1F;
pub const PDUTYPE2_FONTLIST: u8 = 0x27;
pub const PDUTYPE2_FONTMAP: u8 = 0x28;
pub const PDUTYPE2_SET_ERROR_INFO: u8 = 0x2F;

const STREAM_LOW: u8 = 0x01;

// Control PDU actions.
const CTRLACTION_REQUEST_CONTROL: u16 = 0x0001;
const CTRLACTION_COOPERATE: u16 = 0x0004;

/// A parsed share control header plus its body.
#[derive(Debug)]
pub struct ControlPdu {
    pub pdu_type: u16,
    pub pdu_source: u16,
    pub body: Bytes,
}

/// Parse one share control PDU off an inbound channel payload.
pub fn parse_control(mut payload: Bytes) -> Result<ControlPdu, RdxError> {
    if payload.remaining() < 6 {
        return Err(RdxError::Decode("share control header too short"));
    }
    let total_length = payload.get_u16_le() as usize;
    let pdu_type = payload.get_u16_le() & 0x000f;
    let pdu_source = payload.get_u16_le();
    // Some servers pad the channel payload past totalLength.
    let body_len = total_length.saturating_sub(6).min(payload.remaining());
    let body = payload.split_to(body_len);
    Ok(ControlPdu {
        pdu_type,
        pdu_source,
        body,
    })
}

/// A parsed share data header plus its body.
#[derive(Debug)]
pub struct DataPdu {
    pub share_id: u32,
    pub pdu_type2: u8,
    pub body: Bytes,
}

/// Parse the share data header inside a `PDUTYPE_DATA` control body.
pub fn parse_data(mut body: Bytes) -> Result<DataPdu, RdxError> {
    if body.remaining() < 12 {
        return Err(RdxError::Decode("share data header too short"));
    }
    let share_id = body.get_u32_le();
    let _pad = body.get_u8();
    let _stream_id = body.get_u8();
    let _uncompressed_length = body.get_u16_le();
    let pdu_type2 = body.get_u8();
    let _compressed_type = body.get_u8();
    let _compressed_length = body.get_u16_le();
    Ok(DataPdu {
        share_id,
        pdu_type2,
        body,
    })
}

fn control_header(buf: &mut BytesMut, total_length: usize, pdu_type: u16, source: u16) {
    buf.put_u16_le(total_length as u16);
    buf.put_u16_le(pdu_type | PROTOCOL_VERSION);
    buf.put_u16_le(source);
}

/// Encode a share data PDU (control + data headers + payload).
pub fn encode_data_pdu(share_id: u32, user_id: u16, pdu_type2: u8, payload: &[u8]) -> Bytes {
    let total = 18 + payload.len();
    let mut buf = BytesMut::with_capacity(total);
    control_header(&mut buf, total, PDUTYPE_DATA, user_id);
    buf.put_u32_le(share_id);
    buf.put_u8(0); // pad
    buf.put_u8(STREAM_LOW);
    buf.put_u16_le((payload.len() + 4) as u16);
    buf.put_u8(pdu_type2);
    buf.put_u8(0); // compressed type
    buf.put_u16_le(0); // compressed length
    buf.put_slice(payload);
    buf.freeze()
}

// ── Demand / Confirm Active ──────────────────────────────────────

/// The server's Demand Active PDU, reduced to what the client consumes.
#[derive(Debug)]
pub struct DemandActive {
    pub share_id: u32,
    pub pdu_source: u16,
    pub capabilities: Vec<caps::Capability>,
}

/// Parse a Demand Active control body.
pub fn parse_demand_active(mut body: Bytes, pdu_source: u16) -> Result<DemandActive, RdxError> {
    if body.remaining() < 8 {
        return Err(RdxError::Decode("demand active too short"));
    }
    let share_id = body.get_u32_le();
    let source_len = body.get_u16_le() as usize;
    let _caps_len = body.get_u16_le() as usize;
    if body.remaining() < source_len {
        return Err(RdxError::Decode("demand active source descriptor"));
    }
    body.advance(source_len);
    let capabilities = caps::parse_capability_sets(&mut body)?;
    Ok(DemandActive {
        share_id,
        pdu_source,
        capabilities,
    })
}

/// Encode the client's Confirm Active PDU.
pub fn encode_confirm_active(
    share_id: u32,
    user_id: u16,
    client_caps: &[caps::Capability],
) -> Bytes {
    const SOURCE: &[u8] = b"rdx\0";
    const ORIGINATOR_ID: u16 = 0x03EA;

    let mut caps_buf = BytesMut::new();
    caps_buf.put_u16_le(client_caps.len() as u16);
    caps_buf.put_u16_le(0); // pad
    for cap in client_caps {
        cap.encode(&mut caps_buf);
    }

    let total = 6 + 4 + 2 + 2 + 2 + SOURCE.len() + caps_buf.len();
    let mut buf = BytesMut::with_capacity(total);
    control_header(&mut buf, total, PDUTYPE_CONFIRMACTIVE, user_id);
    buf.put_u32_le(share_id);
    buf.put_u16_le(ORIGINATOR_ID);
    buf.put_u16_le(SOURCE.len() as u16);
    buf.put_u16_le(caps_buf.len() as u16);
    buf.put_slice(SOURCE);
    buf.put_slice(&caps_buf);
    buf.freeze()
}

// ── Finalization ─────────────────────────────────────────────────

/// The four client-side finalization PDUs, in send order.
pub fn finalization_pdus(share_id: u32, user_id: u16, target_user: u16) -> Vec<Bytes> {
    let mut synchronize = BytesMut::new();
    synchronize.put_u16_le(1); // SYNCMSGTYPE_SYNC
    synchronize.put_u16_le(target_user);

    let mut cooperate = BytesMut::new();
    cooperate.put_u16_le(CTRLACTION_COOPERATE);
    cooperate.put_u16_le(0); // grant id
    cooperate.put_u32_le(0); // control id

    let mut request_control = BytesMut::new();
    request_control.put_u16_le(CTRLACTION_REQUEST_CONTROL);
    request_control.put_u16_le(0);
    request_control.put_u32_le(0);

    let mut font_list = BytesMut::new();
    font_list.put_u16_le(0); // number fonts
    font_list.put_u16_le(0); // total number fonts
    font_list.put_u16_le(0x0003); // FONTLIST_FIRST | FONTLIST_LAST
    font_list.put_u16_le(50); // entry size

    vec![
        encode_data_pdu(share_id, user_id, PDUTYPE2_SYNCHRONIZE, &synchronize),
        encode_data_pdu(share_id, user_id, PDUTYPE2_CONTROL, &cooperate),
        encode_data_pdu(share_id, user_id, PDUTYPE2_CONTROL, &request_control),
        encode_data_pdu(share_id, user_id, PDUTYPE2_FONTLIST, &font_list),
    ]
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_pdu_roundtrip() {
        let encoded = encode_data_pdu(0x0001_03EA, 1004, PDUTYPE2_INPUT, b"events");
        let control = parse_control(encoded).unwrap();
        assert_eq!(control.pdu_type, PDUTYPE_DATA);
        assert_eq!(control.pdu_source, 1004);

        let data = parse_data(control.body).unwrap();
        assert_eq!(data.share_id, 0x0001_03EA);
        assert_eq!(data.pdu_type2, PDUTYPE2_INPUT);
        assert_eq!(&data.body[..], b"events");
    }

    #[test]
    fn control_header_carries_version_bits() {
        let encoded = encode_data_pdu(1, 1004, PDUTYPE2_SYNCHRONIZE, &[]);
        assert_eq!(
            u16::from_le_bytes([encoded[2], encoded[3]]),
            PDUTYPE_DATA | PROTOCOL_VERSION
        );
    }

    #[test]
    fn finalization_sequence_types() {
        let pdus = finalization_pdus(7, 1004, 0x03EA);
        let types: Vec<u8> = pdus
            .into_iter()
            .map(|p| parse_data(parse_control(p).unwrap().body).unwrap().pdu_type2)
            .collect();
        assert_eq!(
            types,
            vec![
                PDUTYPE2_SYNCHRONIZE,
                PDUTYPE2_CONTROL,
                PDUTYPE2_CONTROL,
                PDUTYPE2_FONTLIST
            ]
        );
    }

    #[test]
    fn confirm_active_parses_back() {
        let client_caps = caps::client_capabilities(1280, 800, 0x409, 4, 0);
        let encoded = encode_confirm_active(0x66, 1004, &client_caps);
        let control = parse_control(encoded).unwrap();
        assert_eq!(control.pdu_type, PDUTYPE_CONFIRMACTIVE);

        let mut body = control.body;
        assert_eq!(body.get_u32_le(), 0x66); // share id
        assert_eq!(body.get_u16_le(), 0x03EA); // originator
        let source_len = body.get_u16_le() as usize;
        let _caps_len = body.get_u16_le() as usize;
        body.advance(source_len);
        let parsed = caps::parse_capability_sets(&mut body).unwrap();
        assert_eq!(parsed.len(), client_caps.len());
    }

    #[test]
    fn truncated_control_header_is_decode_error() {
        assert!(parse_control(Bytes::from_static(&[0x01, 0x02])).is_err());
    }
}
