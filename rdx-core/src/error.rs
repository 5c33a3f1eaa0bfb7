//! Domain-specific error types for the RDX protocol stack.
//!
//! All fallible operations return `Result<T, RdxError>`.
//! No panics on input received from the peer — every error is typed.

use thiserror::Error;

/// The canonical error type for the RDP client stack.
#[derive(Debug, Error)]
pub enum RdxError {
    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error. Fatal for the session.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS upgrade or record-layer failure.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// An mpsc channel to a session task was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not decode as the expected structure.
    #[error("decode error: {0}")]
    Decode(&'static str),

    /// A numeric value did not map to any known variant.
    #[error("unknown {type_name} value: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A peer message violated protocol rules.
    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    /// The received frame exceeds the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The server terminated the domain with a disconnect-provider
    /// ultimatum. Terminal; the session cannot be resumed.
    #[error("server sent disconnect provider ultimatum")]
    DisconnectUltimatum,

    // ── Handshake Errors ─────────────────────────────────────────
    /// The server refused the requested security protocols.
    #[error("negotiation failure: code {0:#x}")]
    Negotiation(u32),

    /// Network-level authentication failed. No application data has
    /// been exchanged; the session must not proceed.
    #[error("authentication failed: {0}")]
    Authentication(&'static str),

    /// The server rejected the attach-user request.
    #[error("server rejected user attachment")]
    RejectedUser,

    /// A channel-join-confirm referenced a different user id than ours.
    #[error("invalid user id in channel join confirm")]
    InvalidUserId,

    /// The licensing exchange did not reach a valid terminal state.
    #[error("licensing failed: {0}")]
    Licensing(&'static str),

    /// The server reported a session error through a Set Error Info
    /// data PDU.
    #[error("server error info: {0:#x}")]
    ErrorInfo(u32),

    // ── Codec Errors ─────────────────────────────────────────────
    /// A compressed bitmap payload could not be decoded. Recoverable:
    /// only the single update is lost, the session survives.
    #[error("malformed bitmap payload: {0}")]
    BitmapDecode(&'static str),

    /// The bitmap color depth is not one we can decode.
    #[error("unsupported bits-per-pixel: {0}")]
    UnsupportedBpp(u16),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RdxError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RdxError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = RdxError::Decode("bad BER tag");
        assert!(e.to_string().contains("bad BER tag"));

        let e = RdxError::FrameTooLarge {
            size: 70000,
            max: 65535,
        };
        assert!(e.to_string().contains("70000"));
        assert!(e.to_string().contains("65535"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: RdxError = io_err.into();
        assert!(matches!(e, RdxError::Io(_)));
    }

    #[test]
    fn unknown_variant_formats_hex() {
        let e = RdxError::UnknownVariant {
            type_name: "DomainPdu",
            value: 0x2b,
        };
        assert!(e.to_string().contains("0x2b"));
    }
}
