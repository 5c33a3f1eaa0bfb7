//! GCC conference blocks (T.124 wrappers + client/server settings).
//!
//! The client advertises core/network/security settings inside a
//! ConferenceCreateRequest; the server answers with its own blocks in
//! the ConferenceCreateResponse. Block payloads are little-endian,
//! unlike the surrounding PER.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::asn1::per;
use crate::error::RdxError;

// Client-to-server block types.
const CS_CORE: u16 = 0xC001;
const CS_SECURITY: u16 = 0xC002;
const CS_NET: u16 = 0xC003;

// Server-to-client block types.
const SC_CORE: u16 = 0x0C01;
const SC_SECURITY: u16 = 0x0C02;
const SC_NET: u16 = 0x0C03;

const RDP_VERSION_5_PLUS: u32 = 0x0008_0004;
const COLOR_DEPTH_8BPP: u16 = 0xCA01;
const SAS_DEL: u16 = 0xAA03;
const HIGH_COLOR_16BPP: u16 = 0x0010;
// 24/16/15/32 bpp support bits.
const SUPPORTED_COLOR_DEPTHS: u16 = 0x000F;
const SUPPORT_ERRINFO_PDU: u16 = 0x0001;

const T124_02_98_OID: [u8; 6] = [0, 0, 20, 124, 0, 1];

fn block_header(buf: &mut BytesMut, block_type: u16, payload_len: usize) {
    buf.put_u16_le(block_type);
    buf.put_u16_le((payload_len + 4) as u16);
}

// ── Client blocks ────────────────────────────────────────────────

/// Client Core Data (TS_UD_CS_CORE).
#[derive(Debug, Clone)]
pub struct ClientCoreData {
    pub desktop_width: u16,
    pub desktop_height: u16,
    pub keyboard_layout: u32,
    pub keyboard_type: u32,
    pub keyboard_subtype: u32,
    pub client_name: String,
    pub server_selected_protocol: u32,
}

impl ClientCoreData {
    pub fn new(keyboard_layout: u32, keyboard_type: u32, keyboard_subtype: u32) -> Self {
        Self {
            desktop_width: 1280,
            desktop_height: 800,
            keyboard_layout,
            keyboard_type,
            keyboard_subtype,
            client_name: "rdx".to_owned(),
            server_selected_protocol: 0,
        }
    }

    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(216);
        block_header(&mut buf, CS_CORE, 212);
        buf.put_u32_le(RDP_VERSION_5_PLUS);
        buf.put_u16_le(self.desktop_width);
        buf.put_u16_le(self.desktop_height);
        buf.put_u16_le(COLOR_DEPTH_8BPP);
        buf.put_u16_le(SAS_DEL);
        buf.put_u32_le(self.keyboard_layout);
        buf.put_u32_le(3790); // client build
        put_fixed_utf16(&mut buf, &self.client_name, 32);
        buf.put_u32_le(self.keyboard_type);
        buf.put_u32_le(self.keyboard_subtype);
        buf.put_u32_le(12); // function keys
        buf.put_bytes(0, 64); // IME file name
        buf.put_u16_le(COLOR_DEPTH_8BPP); // post-beta-2 color depth
        buf.put_u16_le(1); // client product id
        buf.put_u32_le(0); // serial number
        buf.put_u16_le(HIGH_COLOR_16BPP);
        buf.put_u16_le(SUPPORTED_COLOR_DEPTHS);
        buf.put_u16_le(SUPPORT_ERRINFO_PDU);
        buf.put_bytes(0, 64); // dig product id
        buf.put_u8(0); // connection type
        buf.put_u8(0); // pad
        buf.put_u32_le(self.server_selected_protocol);
        buf.freeze()
    }
}

/// Client Security Data. Encryption methods are empty: the stream is
/// already protected by TLS.
#[derive(Debug, Clone, Default)]
pub struct ClientSecurityData;

impl ClientSecurityData {
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12);
        block_header(&mut buf, CS_SECURITY, 8);
        buf.put_u32_le(0); // encryption methods
        buf.put_u32_le(0); // ext encryption methods
        buf.freeze()
    }
}

/// A static virtual channel advertised by the client.
#[derive(Debug, Clone)]
pub struct ChannelDef {
    pub name: String,
    pub options: u32,
}

/// Client Network Data: the requested static virtual channels, in order.
#[derive(Debug, Clone, Default)]
pub struct ClientNetworkData {
    pub channels: Vec<ChannelDef>,
}

impl ClientNetworkData {
    pub fn add_channel(&mut self, name: &str, options: u32) {
        self.channels.push(ChannelDef {
            name: name.to_owned(),
            options,
        });
    }

    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8 + self.channels.len() * 12);
        block_header(&mut buf, CS_NET, 4 + self.channels.len() * 12);
        buf.put_u32_le(self.channels.len() as u32);
        for channel in &self.channels {
            let mut name = [0u8; 8];
            let bytes = channel.name.as_bytes();
            let len = bytes.len().min(7);
            name[..len].copy_from_slice(&bytes[..len]);
            buf.put_slice(&name);
            buf.put_u32_le(channel.options);
        }
        buf.freeze()
    }
}

fn put_fixed_utf16(buf: &mut BytesMut, s: &str, total_bytes: usize) {
    let mut written = 0;
    for unit in s.encode_utf16() {
        if written + 2 > total_bytes - 2 {
            break;
        }
        buf.put_u16_le(unit);
        written += 2;
    }
    buf.put_bytes(0, total_bytes - written);
}

// ── Conference wrappers ──────────────────────────────────────────

/// Wrap client user data in a T.124 ConferenceCreateRequest.
pub fn conference_create_request(user_data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(user_data.len() + 24);
    per::write_choice(&mut buf, 0);
    per::write_object_identity(&mut buf, &T124_02_98_OID);
    per::write_length(&mut buf, user_data.len() + 14);
    per::write_choice(&mut buf, 0);
    per::write_selection(&mut buf, 0x08);
    per::write_numeric_string(&mut buf, b"1", 1);
    per::write_padding(&mut buf, 1);
    per::write_number_of_set(&mut buf, 1);
    per::write_choice(&mut buf, 0xc0);
    per::write_octet_stream(&mut buf, b"Duca", 4);
    per::write_octet_stream(&mut buf, user_data, 0);
    buf.freeze()
}

// ── Server blocks ────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ServerCoreData {
    pub version: u32,
    pub client_requested_protocols: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSecurityData {
    pub encryption_method: u32,
    pub encryption_level: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ServerNetworkData {
    pub io_channel: u16,
    pub channel_ids: Vec<u16>,
}

/// The server's settings from the ConferenceCreateResponse.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
    pub core: ServerCoreData,
    pub security: ServerSecurityData,
    pub network: ServerNetworkData,
}

/// Parse the ConferenceCreateResponse user data into server settings.
///
/// Unknown block types are skipped with a warning so that forward
/// compatible servers sending optional blocks do not kill the session.
pub fn read_conference_create_response(user_data: Bytes) -> Result<ServerSettings, RdxError> {
    let mut r = user_data;
    per::read_choice(&mut r)?;
    per::read_object_identity(&mut r, &T124_02_98_OID)?;
    per::read_length(&mut r)?;
    per::read_choice(&mut r)?;
    per::read_integer16(&mut r)?; // node id
    per::read_integer(&mut r)?; // tag
    per::read_enumerates(&mut r)?; // result
    per::read_number_of_set(&mut r)?;
    per::read_choice(&mut r)?;
    per::read_octet_stream(&mut r, b"McDn", 4)?;
    per::read_length(&mut r)?;

    let mut settings = ServerSettings::default();
    while r.remaining() >= 4 {
        let block_type = r.get_u16_le();
        let block_len = r.get_u16_le() as usize;
        if block_len < 4 || r.remaining() < block_len - 4 {
            return Err(RdxError::Decode("server settings block length"));
        }
        let mut block = r.split_to(block_len - 4);
        match block_type {
            SC_CORE => {
                if block.remaining() < 4 {
                    return Err(RdxError::Decode("server core data too short"));
                }
                settings.core.version = block.get_u32_le();
                if block.remaining() >= 4 {
                    settings.core.client_requested_protocols = Some(block.get_u32_le());
                }
            }
            SC_SECURITY => {
                if block.remaining() < 8 {
                    return Err(RdxError::Decode("server security data too short"));
                }
                settings.security.encryption_method = block.get_u32_le();
                settings.security.encryption_level = block.get_u32_le();
                if settings.security.encryption_method != 0 {
                    warn!(
                        method = settings.security.encryption_method,
                        "server requests legacy RDP encryption; proceeding with TLS only"
                    );
                }
            }
            SC_NET => {
                if block.remaining() < 4 {
                    return Err(RdxError::Decode("server network data too short"));
                }
                settings.network.io_channel = block.get_u16_le();
                let count = block.get_u16_le() as usize;
                if block.remaining() < count * 2 {
                    return Err(RdxError::Decode("server channel id array truncated"));
                }
                for _ in 0..count {
                    settings.network.channel_ids.push(block.get_u16_le());
                }
            }
            other => {
                warn!(block_type = other, "skipping unknown server settings block");
            }
        }
    }
    Ok(settings)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_core_data_is_216_bytes() {
        let core = ClientCoreData::new(0x409, 4, 0);
        let packed = core.pack();
        assert_eq!(packed.len(), 216);
        assert_eq!(u16::from_le_bytes([packed[0], packed[1]]), CS_CORE);
        assert_eq!(u16::from_le_bytes([packed[2], packed[3]]), 216);
        assert_eq!(
            u32::from_le_bytes([packed[4], packed[5], packed[6], packed[7]]),
            RDP_VERSION_5_PLUS
        );
    }

    #[test]
    fn network_data_pads_channel_names() {
        let mut net = ClientNetworkData::default();
        net.add_channel("cliprdr", 0x8000_0000);
        let packed = net.pack();
        assert_eq!(packed.len(), 8 + 12);
        assert_eq!(&packed[8..15], b"cliprdr");
        assert_eq!(packed[15], 0);
    }

    #[test]
    fn conference_request_header_bytes() {
        let req = conference_create_request(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&req[..7], &[0x00, 0x05, 0x00, 0x14, 0x7c, 0x00, 0x01]);
        // One-byte length determinant (18), then the fixed conference body.
        assert_eq!(req[7], 18);
        assert_eq!(
            &req[8..20],
            &[0x00, 0x08, 0x00, 0x10, 0x00, 0x01, 0xc0, 0x00, b'D', b'u', b'c', b'a']
        );
        assert_eq!(req[20], 4); // userData length
        assert_eq!(&req[21..], &[0xde, 0xad, 0xbe, 0xef]);
    }

    fn response_with_blocks(blocks: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        per::write_choice(&mut buf, 0);
        per::write_object_identity(&mut buf, &T124_02_98_OID);
        per::write_length(&mut buf, blocks.len() + 14);
        per::write_choice(&mut buf, 0);
        per::write_integer16(&mut buf, 0x79f3);
        per::write_integer(&mut buf, 1);
        buf.put_u8(0); // result
        per::write_number_of_set(&mut buf, 1);
        per::write_choice(&mut buf, 0xc0);
        per::write_octet_stream(&mut buf, b"McDn", 4);
        per::write_length(&mut buf, blocks.len());
        buf.put_slice(blocks);
        buf.freeze()
    }

    #[test]
    fn parses_server_blocks() {
        let mut blocks = BytesMut::new();
        // SC_CORE
        blocks.put_u16_le(SC_CORE);
        blocks.put_u16_le(8);
        blocks.put_u32_le(RDP_VERSION_5_PLUS);
        // SC_NET with two static channels
        blocks.put_u16_le(SC_NET);
        blocks.put_u16_le(12);
        blocks.put_u16_le(1003);
        blocks.put_u16_le(2);
        blocks.put_u16_le(1004);
        blocks.put_u16_le(1005);
        // SC_SECURITY
        blocks.put_u16_le(SC_SECURITY);
        blocks.put_u16_le(12);
        blocks.put_u32_le(0);
        blocks.put_u32_le(0);

        let settings = read_conference_create_response(response_with_blocks(&blocks)).unwrap();
        assert_eq!(settings.core.version, RDP_VERSION_5_PLUS);
        assert_eq!(settings.network.io_channel, 1003);
        assert_eq!(settings.network.channel_ids, vec![1004, 1005]);
    }

    #[test]
    fn unknown_block_is_skipped() {
        let mut blocks = BytesMut::new();
        blocks.put_u16_le(0x0C08); // message channel data, unsupported
        blocks.put_u16_le(6);
        blocks.put_u16_le(0xffff);
        blocks.put_u16_le(SC_NET);
        blocks.put_u16_le(8);
        blocks.put_u16_le(1003);
        blocks.put_u16_le(0);

        let settings = read_conference_create_response(response_with_blocks(&blocks)).unwrap();
        assert_eq!(settings.network.io_channel, 1003);
        assert!(settings.network.channel_ids.is_empty());
    }

    #[test]
    fn truncated_block_is_decode_error() {
        let mut blocks = BytesMut::new();
        blocks.put_u16_le(SC_NET);
        blocks.put_u16_le(20); // claims more than present
        blocks.put_u16_le(1003);
        assert!(read_conference_create_response(response_with_blocks(&blocks)).is_err());
    }
}
