//! Inbound update decoding — bitmap rectangles and pointer state, from
//! both the fast-path and the slow-path update data PDUs.

use bytes::{Buf, Bytes};
use tracing::{debug, warn};

use crate::error::RdxError;

// Fast-path update codes.
const UPDATETYPE_ORDERS: u8 = 0x0;
const UPDATETYPE_BITMAP: u8 = 0x1;
const UPDATETYPE_PALETTE: u8 = 0x2;
const UPDATETYPE_SYNCHRONIZE: u8 = 0x3;
const UPDATETYPE_PTR_NULL: u8 = 0x5;
const UPDATETYPE_PTR_DEFAULT: u8 = 0x6;
const UPDATETYPE_PTR_POSITION: u8 = 0x8;
const UPDATETYPE_COLOR: u8 = 0x9;
const UPDATETYPE_CACHED: u8 = 0xA;
const UPDATETYPE_POINTER: u8 = 0xB;

// Bitmap data flags.
const BITMAP_COMPRESSION: u16 = 0x0001;
const NO_BITMAP_COMPRESSION_HDR: u16 = 0x0400;

// Slow-path update types.
const SLOWPATH_UPDATETYPE_BITMAP: u16 = 0x0001;

/// One rectangle of a bitmap update PDU.
#[derive(Debug, Clone)]
pub struct BitmapData {
    pub dest_left: u16,
    pub dest_top: u16,
    pub dest_right: u16,
    pub dest_bottom: u16,
    pub width: u16,
    pub height: u16,
    pub bits_per_pixel: u16,
    pub flags: u16,
    pub data: Bytes,
}

impl BitmapData {
    pub fn is_compressed(&self) -> bool {
        self.flags & BITMAP_COMPRESSION != 0
    }
}

/// A new pointer shape from a color/new pointer update.
#[derive(Debug, Clone)]
pub struct PointerShape {
    pub cache_index: u16,
    pub xor_bpp: u16,
    pub hotspot_x: u16,
    pub hotspot_y: u16,
    pub width: u16,
    pub height: u16,
    pub xor_data: Bytes,
    pub and_mask: Bytes,
}

/// Decoded inbound update.
#[derive(Debug)]
pub enum UpdateEvent {
    Bitmap(Vec<BitmapData>),
    PointerHide,
    PointerDefault,
    PointerPosition { x: u16, y: u16 },
    PointerCached(u16),
    PointerShape(PointerShape),
}

fn need(r: &Bytes, n: usize, what: &'static str) -> Result<(), RdxError> {
    if r.remaining() < n {
        return Err(RdxError::Decode(what));
    }
    Ok(())
}

/// Parse every update PDU contained in one fast-path payload.
pub fn parse_fastpath(mut payload: Bytes) -> Result<Vec<UpdateEvent>, RdxError> {
    let mut events = Vec::new();
    while payload.has_remaining() {
        need(&payload, 3, "fast-path update header")?;
        let header = payload.get_u8();
        let code = header & 0x0f;
        let fragmentation = (header >> 4) & 0x3;
        let compression = (header >> 6) & 0x3;
        if compression & 0x2 != 0 {
            let _compression_flags = payload.get_u8();
        }
        need(&payload, 2, "fast-path update size")?;
        let size = payload.get_u16_le() as usize;
        need(&payload, size, "fast-path update body")?;
        let body = payload.split_to(size);

        if fragmentation != 0 {
            warn!(code, "dropping fragmented fast-path update");
            continue;
        }
        if let Some(event) = parse_update(code, body)? {
            events.push(event);
        }
    }
    Ok(events)
}

fn parse_update(code: u8, mut body: Bytes) -> Result<Option<UpdateEvent>, RdxError> {
    match code {
        UPDATETYPE_BITMAP => {
            // Skip the leading updateType field of TS_UPDATE_BITMAP_DATA.
            need(&body, 2, "bitmap update header")?;
            let _update_type = body.get_u16_le();
            Ok(Some(UpdateEvent::Bitmap(parse_bitmap_update(&mut body)?)))
        }
        UPDATETYPE_PTR_NULL => Ok(Some(UpdateEvent::PointerHide)),
        UPDATETYPE_PTR_DEFAULT => Ok(Some(UpdateEvent::PointerDefault)),
        UPDATETYPE_PTR_POSITION => {
            need(&body, 4, "pointer position update")?;
            let x = body.get_u16_le();
            let y = body.get_u16_le();
            Ok(Some(UpdateEvent::PointerPosition { x, y }))
        }
        UPDATETYPE_CACHED => {
            need(&body, 2, "cached pointer update")?;
            Ok(Some(UpdateEvent::PointerCached(body.get_u16_le())))
        }
        UPDATETYPE_COLOR => Ok(Some(UpdateEvent::PointerShape(parse_color_pointer(
            &mut body, 24,
        )?))),
        UPDATETYPE_POINTER => {
            need(&body, 2, "new pointer update")?;
            let xor_bpp = body.get_u16_le();
            Ok(Some(UpdateEvent::PointerShape(parse_color_pointer(
                &mut body, xor_bpp,
            )?)))
        }
        UPDATETYPE_ORDERS | UPDATETYPE_PALETTE | UPDATETYPE_SYNCHRONIZE => {
            debug!(code, "ignoring unsupported fast-path update");
            Ok(None)
        }
        other => {
            debug!(code = other, "ignoring unknown fast-path update");
            Ok(None)
        }
    }
}

/// Parse the rectangle list of a bitmap update (shared by both paths).
fn parse_bitmap_update(body: &mut Bytes) -> Result<Vec<BitmapData>, RdxError> {
    need(body, 2, "bitmap rectangle count")?;
    let count = body.get_u16_le() as usize;
    let mut rectangles = Vec::with_capacity(count);
    for _ in 0..count {
        need(body, 18, "bitmap rectangle header")?;
        let dest_left = body.get_u16_le();
        let dest_top = body.get_u16_le();
        let dest_right = body.get_u16_le();
        let dest_bottom = body.get_u16_le();
        let width = body.get_u16_le();
        let height = body.get_u16_le();
        let bits_per_pixel = body.get_u16_le();
        let flags = body.get_u16_le();
        let length = body.get_u16_le() as usize;
        need(body, length, "bitmap rectangle payload")?;

        let mut data = body.split_to(length);
        if flags & BITMAP_COMPRESSION != 0 && flags & NO_BITMAP_COMPRESSION_HDR == 0 {
            // 8-byte TS_CD_HEADER precedes the compressed stream.
            if data.remaining() < 8 {
                return Err(RdxError::Decode("bitmap compression header"));
            }
            data.advance(8);
        }

        rectangles.push(BitmapData {
            dest_left,
            dest_top,
            dest_right,
            dest_bottom,
            width,
            height,
            bits_per_pixel,
            flags,
            data,
        });
    }
    Ok(rectangles)
}

fn parse_color_pointer(body: &mut Bytes, xor_bpp: u16) -> Result<PointerShape, RdxError> {
    need(body, 14, "color pointer header")?;
    let cache_index = body.get_u16_le();
    let hotspot_x = body.get_u16_le();
    let hotspot_y = body.get_u16_le();
    let width = body.get_u16_le();
    let height = body.get_u16_le();
    let and_mask_len = body.get_u16_le() as usize;
    let xor_mask_len = body.get_u16_le() as usize;
    need(body, xor_mask_len, "pointer xor mask")?;
    let xor_data = body.split_to(xor_mask_len);
    need(body, and_mask_len, "pointer and mask")?;
    let and_mask = body.split_to(and_mask_len);
    Ok(PointerShape {
        cache_index,
        xor_bpp,
        hotspot_x,
        hotspot_y,
        width,
        height,
        xor_data,
        and_mask,
    })
}

/// Parse the body of a slow-path `PDUTYPE2_UPDATE` data PDU.
pub fn parse_slowpath_update(mut body: Bytes) -> Result<Option<UpdateEvent>, RdxError> {
    need(&body, 2, "slow-path update type")?;
    let update_type = body.get_u16_le();
    match update_type {
        SLOWPATH_UPDATETYPE_BITMAP => {
            Ok(Some(UpdateEvent::Bitmap(parse_bitmap_update(&mut body)?)))
        }
        other => {
            debug!(update_type = other, "ignoring slow-path update");
            Ok(None)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
