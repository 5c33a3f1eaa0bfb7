//! Security layer — basic security headers, Client Info, licensing.
//!
//! With network-level authentication the stream is already protected by
//! TLS, so no RDP-level encryption is negotiated. Security headers
//! appear only on the Client Info PDU and on the licensing traffic that
//! answers it; steady-state data PDUs flow through unwrapped.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::RdxError;

bitflags! {
    /// Basic security header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityFlags: u16 {
        const EXCHANGE_PKT = 0x0001;
        const ENCRYPT = 0x0008;
        const RESET_SEQNO = 0x0010;
        const IGNORE_SEQNO = 0x0020;
        const INFO_PKT = 0x0040;
        const LICENSE_PKT = 0x0080;
        const LICENSE_ENCRYPT_CS = 0x0200;
        const REDIRECTION_PKT = 0x0400;
        const SECURE_CHECKSUM = 0x0800;
        const AUTODETECT_REQ = 0x1000;
        const AUTODETECT_RSP = 0x2000;
        const HEARTBEAT = 0x4000;
        const FLAGSHI_VALID = 0x8000;
    }
}

bitflags! {
    /// Client Info PDU flags (TS_INFO_PACKET).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InfoFlags: u32 {
        const MOUSE = 0x0000_0001;
        const DISABLE_CTRL_ALT_DEL = 0x0000_0002;
        const UNICODE = 0x0000_0010;
        const MAXIMIZE_SHELL = 0x0000_0020;
        const LOGON_NOTIFY = 0x0000_0040;
        const ENABLE_WINDOWS_KEY = 0x0000_0100;
        const LOGON_ERRORS = 0x0001_0000;
        const MOUSE_HAS_WHEEL = 0x0002_0000;
        const NO_AUDIO_PLAYBACK = 0x0008_0000;
    }
}

// Performance flags in the extended info block.
const PERF_DISABLE_WALLPAPER: u32 = 0x0000_0001;
const PERF_DISABLE_FULLWINDOWDRAG: u32 = 0x0000_0002;
const PERF_DISABLE_MENUANIMATIONS: u32 = 0x0000_0004;

// Licensing message types.
const LICENSE_NEW_LICENSE: u8 = 0x03;
const LICENSE_ERROR_ALERT: u8 = 0xFF;
const STATUS_VALID_CLIENT: u32 = 0x0000_0007;

/// Credentials and client environment carried by the Client Info PDU.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub domain: String,
    pub username: String,
    pub password: String,
    pub client_address: String,
    pub client_dir: String,
}

impl ClientInfo {
    /// Encode the Client Info PDU body, including the basic security
    /// header with `INFO_PKT` set.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16_le(SecurityFlags::INFO_PKT.bits());
        buf.put_u16_le(0); // flagsHi

        buf.put_u32_le(0); // code page
        let flags = InfoFlags::MOUSE
            | InfoFlags::DISABLE_CTRL_ALT_DEL
            | InfoFlags::UNICODE
            | InfoFlags::MAXIMIZE_SHELL
            | InfoFlags::LOGON_NOTIFY
            | InfoFlags::ENABLE_WINDOWS_KEY
            | InfoFlags::LOGON_ERRORS
            | InfoFlags::MOUSE_HAS_WHEEL
            | InfoFlags::NO_AUDIO_PLAYBACK;
        buf.put_u32_le(flags.bits());

        // Lengths exclude the mandatory null terminators.
        let domain = utf16_bytes(&self.domain);
        let username = utf16_bytes(&self.username);
        let password = utf16_bytes(&self.password);
        buf.put_u16_le(domain.len() as u16);
        buf.put_u16_le(username.len() as u16);
        buf.put_u16_le(password.len() as u16);
        buf.put_u16_le(0); // alternate shell
        buf.put_u16_le(0); // working dir
        for field in [&domain, &username, &password] {
            buf.put_slice(field);
            buf.put_u16_le(0);
        }
        buf.put_u16_le(0); // alternate shell terminator
        buf.put_u16_le(0); // working dir terminator

        // Extended info (TS_EXTENDED_INFO_PACKET).
        let address = utf16_bytes(&self.client_address);
        let dir = utf16_bytes(&self.client_dir);
        buf.put_u16_le(2); // AF_INET
        buf.put_u16_le((address.len() + 2) as u16);
        buf.put_slice(&address);
        buf.put_u16_le(0);
        buf.put_u16_le((dir.len() + 2) as u16);
        buf.put_slice(&dir);
        buf.put_u16_le(0);
        buf.put_bytes(0, 172); // time zone information
        buf.put_u32_le(0); // session id
        buf.put_u32_le(
            PERF_DISABLE_WALLPAPER | PERF_DISABLE_FULLWINDOWDRAG | PERF_DISABLE_MENUANIMATIONS,
        );

        buf.freeze()
    }
}

fn utf16_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

// ── Inbound classification ───────────────────────────────────────

/// What the security layer made of an inbound global-channel payload
/// during the post-join handshake.
#[derive(Debug)]
pub enum SecPayload {
    /// Licensing reached a valid terminal state.
    LicenseComplete,
    /// Not security traffic; hand the payload to the presentation layer.
    Data(Bytes),
}

/// Classify an inbound global-channel payload while licensing is still
/// pending. Licensing PDUs are consumed here; anything else passes
/// through untouched.
pub fn process_licensing(mut payload: Bytes) -> Result<SecPayload, RdxError> {
    if payload.remaining() < 4 {
        return Err(RdxError::Decode("security header too short"));
    }
    let flags = SecurityFlags::from_bits_truncate(u16::from_le_bytes([payload[0], payload[1]]));
    if !flags.contains(SecurityFlags::LICENSE_PKT) {
        // Encryption is off, so a non-license payload at this point is
        // already presentation data.
        return Ok(SecPayload::Data(payload));
    }
    payload.advance(4);

    if payload.remaining() < 4 {
        return Err(RdxError::Decode("license preamble too short"));
    }
    let msg_type = payload.get_u8();
    let _flags = payload.get_u8();
    let _size = payload.get_u16_le();

    match msg_type {
        LICENSE_NEW_LICENSE => {
            debug!("server issued a new license");
            Ok(SecPayload::LicenseComplete)
        }
        LICENSE_ERROR_ALERT => {
            if payload.remaining() < 8 {
                return Err(RdxError::Decode("license error alert too short"));
            }
            let error_code = payload.get_u32_le();
            let _state_transition = payload.get_u32_le();
            if error_code == STATUS_VALID_CLIENT {
                debug!("license error alert: valid client");
                Ok(SecPayload::LicenseComplete)
            } else {
                Err(RdxError::Licensing("server reported a licensing error"))
            }
        }
        _ => Err(RdxError::Licensing("unsupported licensing message")),
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_info_header_and_credentials() {
        let info = ClientInfo {
            domain: "corp".into(),
            username: "alice".into(),
            password: "secret".into(),
            client_address: "192.168.0.2".into(),
            client_dir: "C:\\rdx".into(),
        };
        let encoded = info.encode();

        // Security header with INFO_PKT.
        assert_eq!(u16::from_le_bytes([encoded[0], encoded[1]]), 0x0040);
        // Credential lengths at fixed offsets (bytes, sans terminator).
        assert_eq!(u16::from_le_bytes([encoded[12], encoded[13]]), 8); // "corp"
        assert_eq!(u16::from_le_bytes([encoded[14], encoded[15]]), 10); // "alice"
        assert_eq!(u16::from_le_bytes([encoded[16], encoded[17]]), 12); // "secret"
        // Domain payload starts right after the five length fields.
        assert_eq!(&encoded[22..30], utf16_bytes("corp").as_slice());
    }

    fn license_payload(msg_type: u8, error_code: Option<u32>) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u16_le(SecurityFlags::LICENSE_PKT.bits());
        buf.put_u16_le(0);
        buf.put_u8(msg_type);
        buf.put_u8(0x03);
        buf.put_u16_le(4);
        if let Some(code) = error_code {
            buf.put_u32_le(code);
            buf.put_u32_le(2);
        }
        buf.freeze()
    }

    #[test]
    fn valid_client_alert_completes_licensing() {
        let result =
            process_licensing(license_payload(LICENSE_ERROR_ALERT, Some(STATUS_VALID_CLIENT)));
        assert!(matches!(result, Ok(SecPayload::LicenseComplete)));
    }

    #[test]
    fn new_license_completes_licensing() {
        let result = process_licensing(license_payload(LICENSE_NEW_LICENSE, None));
        assert!(matches!(result, Ok(SecPayload::LicenseComplete)));
    }

    #[test]
    fn other_license_error_fails() {
        let result = process_licensing(license_payload(LICENSE_ERROR_ALERT, Some(0x06)));
        assert!(matches!(result, Err(RdxError::Licensing(_))));
    }

    #[test]
    fn non_license_payload_passes_through() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0);
        buf.put_u16_le(0);
        buf.put_slice(b"share control pdu");
        match process_licensing(buf.freeze()).unwrap() {
            SecPayload::Data(data) => assert!(data.len() >= 17),
            other => panic!("unexpected {other:?}"),
        }
    }
}
