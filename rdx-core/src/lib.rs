//! # rdx-core
//!
//! Client-side RDP protocol stack.
//!
//! This crate contains:
//! - **Framing**: `TpktCodec` for the TPKT/fast-path envelope via `tokio_util`
//! - **Negotiation**: X.224 connection request/confirm and data TPDUs
//! - **Authentication**: CredSSP/NTLMv2 network-level authentication
//! - **Multiplexing**: MCS (T.125) connect sequence and channel mux/demux
//! - **Security**: basic security headers, Client Info, licensing
//! - **Presentation**: capability exchange, input PDUs, update decoding
//! - **Codec**: interleaved RLE bitmap decompression and RGBA conversion
//! - **Channels**: the static virtual channel plugin registry
//! - **Session**: `RdpClient` — connect, events, input, close
//! - **Error**: `RdxError` — typed, `thiserror`-based error hierarchy

pub mod asn1;
pub mod channels;
pub mod client;
pub mod error;
pub mod gcc;
pub mod keymap;
pub mod mcs;
pub mod nla;
pub mod pdu;
pub mod rle;
pub mod sec;
pub mod tpkt;
pub mod transport;
pub mod x224;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channels::{ChannelPlugin, ChannelSender, Channels};
pub use client::{Bitmap, ConnectConfig, RdpClient, SessionEvent, SessionEvents};
pub use error::RdxError;
pub use keymap::Key;
pub use mcs::{ChannelInfo, GLOBAL_CHANNEL_ID, USER_CHANNEL_BASE};
pub use pdu::input::{InputEvent, KeyboardFlags, PointerFlags};
pub use pdu::update::PointerShape;
pub use tpkt::{MAX_FRAME_SIZE, TpktCodec, TpktFrame, TpktMessage};
pub use x224::Protocols;
