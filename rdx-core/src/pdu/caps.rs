//! Capability sets exchanged during Demand/Confirm Active.
//!
//! A capability set is a kind tag plus a variable-length attribute
//! record. The client advertises a fixed set; the server's general,
//! bitmap and input sets are decoded into [`ServerCapabilities`], the
//! rest are retained raw.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::RdxError;

pub const CAPSTYPE_GENERAL: u16 = 0x0001;
pub const CAPSTYPE_BITMAP: u16 = 0x0002;
pub const CAPSTYPE_ORDER: u16 = 0x0003;
pub const CAPSTYPE_BITMAPCACHE: u16 = 0x0004;
pub const CAPSTYPE_POINTER: u16 = 0x0008;
pub const CAPSTYPE_INPUT: u16 = 0x000D;
pub const CAPSTYPE_BRUSH: u16 = 0x000F;
pub const CAPSTYPE_GLYPHCACHE: u16 = 0x0010;
pub const CAPSTYPE_OFFSCREENCACHE: u16 = 0x0011;
pub const CAPSTYPE_VIRTUALCHANNEL: u16 = 0x0014;
pub const CAPSTYPE_SOUND: u16 = 0x000C;

// General capability extra flags.
const FASTPATH_OUTPUT_SUPPORTED: u16 = 0x0001;
const LONG_CREDENTIALS_SUPPORTED: u16 = 0x0004;
const NO_BITMAP_COMPRESSION_HDR: u16 = 0x0400;

// Input capability flags.
const INPUT_FLAG_SCANCODES: u16 = 0x0001;
const INPUT_FLAG_MOUSEX: u16 = 0x0004;
const INPUT_FLAG_UNICODE: u16 = 0x0010;

/// One capability set: kind plus raw attribute record.
#[derive(Debug, Clone)]
pub struct Capability {
    pub kind: u16,
    pub data: Bytes,
}

impl Capability {
    pub fn new(kind: u16, data: Bytes) -> Self {
        Self { kind, data }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.kind);
        buf.put_u16_le((self.data.len() + 4) as u16);
        buf.put_slice(&self.data);
    }
}

/// Parse `numberCapabilities` + capability sets from a PDU body.
pub fn parse_capability_sets(body: &mut Bytes) -> Result<Vec<Capability>, RdxError> {
    if body.remaining() < 4 {
        return Err(RdxError::Decode("capability count too short"));
    }
    let count = body.get_u16_le() as usize;
    let _pad = body.get_u16_le();

    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if body.remaining() < 4 {
            return Err(RdxError::Decode("capability header too short"));
        }
        let kind = body.get_u16_le();
        let length = body.get_u16_le() as usize;
        if length < 4 || body.remaining() < length - 4 {
            return Err(RdxError::Decode("capability length out of bounds"));
        }
        let data = body.split_to(length - 4);
        sets.push(Capability { kind, data });
    }
    Ok(sets)
}

/// The server capability attributes the client acts on.
#[derive(Debug, Clone, Default)]
pub struct ServerCapabilities {
    pub fastpath_output: bool,
    pub no_bitmap_compression_header: bool,
    pub preferred_bits_per_pixel: u16,
    pub desktop_width: u16,
    pub desktop_height: u16,
}

/// Extract the interesting attributes from the server's sets.
pub fn server_capabilities(sets: &[Capability]) -> ServerCapabilities {
    let mut server = ServerCapabilities::default();
    for set in sets {
        let mut data = set.data.clone();
        match set.kind {
            CAPSTYPE_GENERAL => {
                if data.remaining() >= 12 {
                    data.advance(10);
                    let extra = data.get_u16_le();
                    server.fastpath_output = extra & FASTPATH_OUTPUT_SUPPORTED != 0;
                    server.no_bitmap_compression_header = extra & NO_BITMAP_COMPRESSION_HDR != 0;
                }
            }
            CAPSTYPE_BITMAP => {
                if data.remaining() >= 12 {
                    server.preferred_bits_per_pixel = data.get_u16_le();
                    data.advance(6);
                    server.desktop_width = data.get_u16_le();
                    server.desktop_height = data.get_u16_le();
                }
            }
            other => {
                debug!(kind = other, len = set.data.len(), "server capability");
            }
        }
    }
    server
}

// ── Client capability construction ───────────────────────────────

fn general_capability() -> Capability {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_u16_le(1); // os major: windows
    buf.put_u16_le(3); // os minor: nt
    buf.put_u16_le(0x0200); // protocol version
    buf.put_u16_le(0); // pad
    buf.put_u16_le(0); // compression types
    buf.put_u16_le(
        FASTPATH_OUTPUT_SUPPORTED | LONG_CREDENTIALS_SUPPORTED | NO_BITMAP_COMPRESSION_HDR,
    );
    buf.put_u16_le(0); // update capability
    buf.put_u16_le(0); // remote unshare
    buf.put_u16_le(0); // compression level
    buf.put_u8(0); // refresh rect support
    buf.put_u8(0); // suppress output support
    Capability::new(CAPSTYPE_GENERAL, buf.freeze())
}

fn bitmap_capability(width: u16, height: u16) -> Capability {
    let mut buf = BytesMut::with_capacity(24);
    buf.put_u16_le(16); // preferred bits per pixel
    buf.put_u16_le(1); // receive 1 bpp
    buf.put_u16_le(1); // receive 4 bpp
    buf.put_u16_le(1); // receive 8 bpp
    buf.put_u16_le(width);
    buf.put_u16_le(height);
    buf.put_u16_le(0); // pad
    buf.put_u16_le(1); // desktop resize
    buf.put_u16_le(1); // bitmap compression
    buf.put_u8(0); // high color flags
    buf.put_u8(0); // drawing flags
    buf.put_u16_le(1); // multiple rectangles
    buf.put_u16_le(0); // pad
    Capability::new(CAPSTYPE_BITMAP, buf.freeze())
}

fn order_capability() -> Capability {
    let mut buf = BytesMut::with_capacity(84);
    buf.put_bytes(0, 16); // terminal descriptor
    buf.put_u32_le(0); // pad
    buf.put_u16_le(1); // desktop save x granularity
    buf.put_u16_le(20); // desktop save y granularity
    buf.put_u16_le(0); // pad
    buf.put_u16_le(1); // max order level
    buf.put_u16_le(0); // number fonts
    buf.put_u16_le(0x000A); // NEGOTIATEORDERSUPPORT | ZEROBOUNDSDELTASSUPPORT
    buf.put_bytes(0, 32); // order support: all drawing orders off
    buf.put_u16_le(0); // text flags
    buf.put_u16_le(0); // order support ex
    buf.put_u32_le(0); // pad
    buf.put_u32_le(480 * 480); // desktop save size
    buf.put_u16_le(0); // pad
    buf.put_u16_le(0); // pad
    buf.put_u16_le(0); // text ansi code page
    buf.put_u16_le(0); // pad
    Capability::new(CAPSTYPE_ORDER, buf.freeze())
}

fn input_capability(keyboard_layout: u32, keyboard_type: u32, keyboard_subtype: u32) -> Capability {
    let mut buf = BytesMut::with_capacity(84);
    buf.put_u16_le(INPUT_FLAG_SCANCODES | INPUT_FLAG_MOUSEX | INPUT_FLAG_UNICODE);
    buf.put_u16_le(0); // pad
    buf.put_u32_le(keyboard_layout);
    buf.put_u32_le(keyboard_type);
    buf.put_u32_le(keyboard_subtype);
    buf.put_u32_le(12); // function keys
    buf.put_bytes(0, 64); // IME file name
    Capability::new(CAPSTYPE_INPUT, buf.freeze())
}

fn zeroed_capability(kind: u16, len: usize) -> Capability {
    Capability::new(kind, Bytes::from(vec![0u8; len]))
}

fn pointer_capability() -> Capability {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u16_le(1); // color pointer flag
    buf.put_u16_le(20); // color pointer cache size
    buf.put_u16_le(20); // pointer cache size
    Capability::new(CAPSTYPE_POINTER, buf.freeze())
}

/// The full client capability set for Confirm Active.
pub fn client_capabilities(
    width: u16,
    height: u16,
    keyboard_layout: u32,
    keyboard_type: u32,
    keyboard_subtype: u32,
) -> Vec<Capability> {
    vec![
        general_capability(),
        bitmap_capability(width, height),
        order_capability(),
        zeroed_capability(CAPSTYPE_BITMAPCACHE, 36),
        pointer_capability(),
        input_capability(keyboard_layout, keyboard_type, keyboard_subtype),
        zeroed_capability(CAPSTYPE_BRUSH, 4),
        zeroed_capability(CAPSTYPE_GLYPHCACHE, 48),
        zeroed_capability(CAPSTYPE_OFFSCREENCACHE, 8),
        zeroed_capability(CAPSTYPE_VIRTUALCHANNEL, 8),
        zeroed_capability(CAPSTYPE_SOUND, 4),
    ]
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_sets_roundtrip() {
        let sets = client_capabilities(1920, 1080, 0x409, 4, 0);
        let mut buf = BytesMut::new();
        buf.put_u16_le(sets.len() as u16);
        buf.put_u16_le(0);
        for set in &sets {
            set.encode(&mut buf);
        }

        let mut body = buf.freeze();
        let parsed = parse_capability_sets(&mut body).unwrap();
        assert_eq!(parsed.len(), sets.len());
        for (a, b) in parsed.iter().zip(sets.iter()) {
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.data, b.data);
        }
    }

    #[test]
    fn server_capabilities_extraction() {
        let general = general_capability();
        let bitmap = bitmap_capability(1024, 768);
        let server = server_capabilities(&[general, bitmap]);
        assert!(server.fastpath_output);
        assert!(server.no_bitmap_compression_header);
        assert_eq!(server.preferred_bits_per_pixel, 16);
        assert_eq!(server.desktop_width, 1024);
        assert_eq!(server.desktop_height, 768);
    }

    #[test]
    fn oversized_capability_length_is_decode_error() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(1);
        buf.put_u16_le(0);
        buf.put_u16_le(CAPSTYPE_GENERAL);
        buf.put_u16_le(100); // claims 96 payload bytes
        buf.put_slice(&[0; 8]);
        let mut body = buf.freeze();
        assert!(parse_capability_sets(&mut body).is_err());
    }

    #[test]
    fn bitmap_capability_carries_desktop_size() {
        let cap = bitmap_capability(800, 600);
        assert_eq!(u16::from_le_bytes([cap.data[8], cap.data[9]]), 800);
        assert_eq!(u16::from_le_bytes([cap.data[10], cap.data[11]]), 600);
    }
}
