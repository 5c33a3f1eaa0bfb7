//! TPKT framing layer — the outermost envelope on the RDP transport.
//!
//! Two frame families share the stream, distinguished by the first byte:
//!
//! **Connection-oriented** (version byte `0x03`):
//! ```text
//! version:   u8   (0x03)
//! reserved:  u8   (0x00)
//! length:    u16  big-endian, includes the 4 header bytes
//! payload:   [u8] (X.224 TPDU)
//! ```
//!
//! **Fast-path** (any other first byte):
//! ```text
//! header:    u8   action (low 2 bits) | secFlags (bits 6-7)
//! length:    u8   if total <= 0x7f
//!         or u16  with the high bit of the first byte set:
//!                 ((b1 & 0x7f) << 8) | b2
//! payload:   [u8]
//! ```
//!
//! The fast-path length covers the header bytes too.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::RdxError;

/// TPKT version byte marking a connection-oriented frame.
const ACTION_X224: u8 = 0x03;

/// Largest frame the codec will buffer (TPKT length field is u16).
pub const MAX_FRAME_SIZE: usize = 0xffff;

/// An inbound frame produced by [`TpktCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpktFrame {
    /// Connection-oriented payload (X.224 TPDU, header stripped).
    Data(Bytes),
    /// Fast-path payload with the security flags from the header byte.
    FastPath { flags: u8, payload: Bytes },
}

/// An outbound frame accepted by [`TpktCodec`].
#[derive(Debug, Clone)]
pub enum TpktMessage {
    /// Wrap the payload in a connection-oriented frame.
    Data(Bytes),
    /// Wrap the payload in a fast-path frame with the given security flags.
    FastPath { flags: u8, payload: Bytes },
}

/// Framed codec over the raw transport. Decoding suspends (returns
/// `Ok(None)`) until a complete frame is buffered, so exactly one read
/// is in flight per session at any time.
#[derive(Debug, Default)]
pub struct TpktCodec;

impl Decoder for TpktCodec {
    type Item = TpktFrame;
    type Error = RdxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        if src[0] == ACTION_X224 {
            if src.len() < 4 {
                return Ok(None);
            }
            let total = u16::from_be_bytes([src[2], src[3]]) as usize;
            if total < 4 {
                return Err(RdxError::Decode("TPKT length shorter than header"));
            }
            if src.len() < total {
                return Ok(None);
            }
            let mut frame = src.split_to(total);
            frame.advance(4);
            return Ok(Some(TpktFrame::Data(frame.freeze())));
        }

        // Fast-path: 7-bit short length or 15-bit extended length.
        let flags = (src[0] >> 6) & 0x3;
        let (total, header_len) = if src[1] & 0x80 != 0 {
            if src.len() < 3 {
                return Ok(None);
            }
            (((src[1] & 0x7f) as usize) << 8 | src[2] as usize, 3)
        } else {
            (src[1] as usize, 2)
        };
        if total < header_len {
            return Err(RdxError::Decode("fast-path length shorter than header"));
        }
        if src.len() < total {
            return Ok(None);
        }
        let mut frame = src.split_to(total);
        frame.advance(header_len);
        Ok(Some(TpktFrame::FastPath {
            flags,
            payload: frame.freeze(),
        }))
    }
}

impl Encoder<TpktMessage> for TpktCodec {
    type Error = RdxError;

    fn encode(&mut self, item: TpktMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            TpktMessage::Data(payload) => {
                let total = payload.len() + 4;
                if total > MAX_FRAME_SIZE {
                    return Err(RdxError::FrameTooLarge {
                        size: total,
                        max: MAX_FRAME_SIZE,
                    });
                }
                dst.reserve(total);
                dst.put_u8(ACTION_X224);
                dst.put_u8(0);
                dst.put_u16(total as u16);
                dst.put_slice(&payload);
            }
            TpktMessage::FastPath { flags, payload } => {
                let header = (flags & 0x3) << 6;
                if payload.len() + 2 <= 0x7f {
                    dst.reserve(payload.len() + 2);
                    dst.put_u8(header);
                    dst.put_u8((payload.len() + 2) as u8);
                } else {
                    let total = payload.len() + 3;
                    if total > 0x7fff {
                        return Err(RdxError::FrameTooLarge {
                            size: total,
                            max: 0x7fff,
                        });
                    }
                    dst.reserve(total);
                    dst.put_u8(header);
                    dst.put_u16(total as u16 | 0x8000);
                }
                dst.put_slice(&payload);
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
