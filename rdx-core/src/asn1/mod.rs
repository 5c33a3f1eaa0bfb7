//! Minimal ASN.1 encoders/decoders for the connection handshake.
//!
//! Only the subset of BER (T.125 connect PDUs, CredSSP DER) and aligned
//! PER (domain PDUs, GCC conference wrappers) that the RDP connect
//! sequence actually exercises.

pub mod ber;
pub mod per;

use bytes::{Buf, Bytes};

use crate::error::RdxError;

/// Split off exactly `n` bytes, or fail with a decode error.
pub(crate) fn take(r: &mut Bytes, n: usize, what: &'static str) -> Result<Bytes, RdxError> {
    if r.remaining() < n {
        return Err(RdxError::Decode(what));
    }
    Ok(r.split_to(n))
}

/// Read a single byte, or fail with a decode error.
pub(crate) fn take_u8(r: &mut Bytes, what: &'static str) -> Result<u8, RdxError> {
    if !r.has_remaining() {
        return Err(RdxError::Decode(what));
    }
    Ok(r.get_u8())
}
