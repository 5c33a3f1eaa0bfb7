//! CredSSP TSRequest / TSCredentials DER structures (MS-CSSP).

use bytes::{Bytes, BytesMut};

use crate::asn1::ber;
use crate::error::RdxError;

/// A decoded TSRequest. Only the fields the client consumes are kept.
#[derive(Debug, Default)]
pub struct TsRequest {
    pub nego_token: Option<Bytes>,
    pub auth_info: Option<Bytes>,
    pub pub_key_auth: Option<Bytes>,
    pub error_code: Option<u32>,
}

fn context_wrapped(tag: u8, inner: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(inner.len() + 4);
    ber::write_context_tag(&mut buf, tag, inner.len());
    buf.extend_from_slice(inner);
    buf
}

fn octet_string(data: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(data.len() + 4);
    ber::write_octet_string(&mut buf, data);
    buf
}

/// Encode a TSRequest with the given optional fields.
pub fn encode_ts_request(
    nego_token: Option<&[u8]>,
    auth_info: Option<&[u8]>,
    pub_key_auth: Option<&[u8]>,
) -> Bytes {
    let mut body = BytesMut::new();

    // [0] version
    let mut version = BytesMut::new();
    ber::write_integer(&mut version, 2);
    body.extend_from_slice(&context_wrapped(0, &version));

    // [1] negoTokens: SEQUENCE OF SEQUENCE { [0] negoToken OCTET STRING }
    if let Some(token) = nego_token {
        let inner = context_wrapped(0, &octet_string(token));
        let mut item = BytesMut::new();
        ber::write_sequence_header(&mut item, inner.len());
        item.extend_from_slice(&inner);
        let mut seq = BytesMut::new();
        ber::write_sequence_header(&mut seq, item.len());
        seq.extend_from_slice(&item);
        body.extend_from_slice(&context_wrapped(1, &seq));
    }

    // [2] authInfo
    if let Some(info) = auth_info {
        body.extend_from_slice(&context_wrapped(2, &octet_string(info)));
    }

    // [3] pubKeyAuth
    if let Some(key) = pub_key_auth {
        body.extend_from_slice(&context_wrapped(3, &octet_string(key)));
    }

    let mut out = BytesMut::with_capacity(body.len() + 4);
    ber::write_sequence_header(&mut out, body.len());
    out.extend_from_slice(&body);
    out.freeze()
}

/// Read a constructed context-specific tag `[n]`, returning the tag
/// number and content length.
fn read_context_header(r: &mut Bytes) -> Result<(u8, usize), RdxError> {
    let b0 = crate::asn1::take_u8(r, "TSRequest context tag")?;
    if b0 & 0xe0 != 0xa0 {
        return Err(RdxError::Decode("unexpected tag in TSRequest"));
    }
    let len = ber::read_length(r)?;
    Ok((b0 & 0x1f, len))
}

/// Decode a TSRequest, tolerating context fields we do not consume.
pub fn decode_ts_request(data: &[u8]) -> Result<TsRequest, RdxError> {
    let mut r = Bytes::copy_from_slice(data);
    ber::expect_universal_tag(&mut r, ber::TAG_SEQUENCE, true)?;

    let mut request = TsRequest::default();
    while !r.is_empty() {
        let (tag, len) = read_context_header(&mut r)?;
        let mut inner = crate::asn1::take(&mut r, len, "TSRequest field body")?;
        match tag {
            0 => {
                let _version = ber::read_integer(&mut inner)?;
            }
            1 => {
                ber::expect_universal_tag(&mut inner, ber::TAG_SEQUENCE, true)?;
                ber::expect_universal_tag(&mut inner, ber::TAG_SEQUENCE, true)?;
                let (token_tag, token_len) = read_context_header(&mut inner)?;
                if token_tag != 0 {
                    return Err(RdxError::Decode("negoToken tag"));
                }
                let mut token = crate::asn1::take(&mut inner, token_len, "negoToken body")?;
                request.nego_token = Some(ber::read_octet_string(&mut token)?);
            }
            2 => request.auth_info = Some(ber::read_octet_string(&mut inner)?),
            3 => request.pub_key_auth = Some(ber::read_octet_string(&mut inner)?),
            4 => request.error_code = Some(ber::read_integer(&mut inner)?),
            _ => {} // forward compatible: skip unknown context fields
        }
    }
    Ok(request)
}

/// Encode TSCredentials carrying TSPasswordCreds (credType 1).
pub fn encode_ts_credentials(domain: &[u8], user: &[u8], password: &[u8]) -> Bytes {
    // TSPasswordCreds ::= SEQUENCE { [0] domain, [1] user, [2] password }
    let mut creds_body = BytesMut::new();
    creds_body.extend_from_slice(&context_wrapped(0, &octet_string(domain)));
    creds_body.extend_from_slice(&context_wrapped(1, &octet_string(user)));
    creds_body.extend_from_slice(&context_wrapped(2, &octet_string(password)));
    let mut password_creds = BytesMut::new();
    ber::write_sequence_header(&mut password_creds, creds_body.len());
    password_creds.extend_from_slice(&creds_body);

    // TSCredentials ::= SEQUENCE { [0] credType INTEGER, [1] OCTET STRING }
    let mut body = BytesMut::new();
    let mut cred_type = BytesMut::new();
    ber::write_integer(&mut cred_type, 1);
    body.extend_from_slice(&context_wrapped(0, &cred_type));
    body.extend_from_slice(&context_wrapped(1, &octet_string(&password_creds)));

    let mut out = BytesMut::new();
    ber::write_sequence_header(&mut out, body.len());
    out.extend_from_slice(&body);
    out.freeze()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ts_request_negotiate_roundtrip() {
        let encoded = encode_ts_request(Some(b"NTLMSSP\0token"), None, None);
        let decoded = decode_ts_request(&encoded).unwrap();
        assert_eq!(decoded.nego_token.as_deref(), Some(&b"NTLMSSP\0token"[..]));
        assert!(decoded.pub_key_auth.is_none());
        assert!(decoded.auth_info.is_none());
    }

    #[test]
    fn ts_request_pub_key_auth_roundtrip() {
        let encoded = encode_ts_request(Some(b"auth"), None, Some(b"sealed key"));
        let decoded = decode_ts_request(&encoded).unwrap();
        assert_eq!(decoded.nego_token.as_deref(), Some(&b"auth"[..]));
        assert_eq!(decoded.pub_key_auth.as_deref(), Some(&b"sealed key"[..]));
    }

    #[test]
    fn ts_request_auth_info_roundtrip() {
        let encoded = encode_ts_request(None, Some(b"sealed creds"), None);
        let decoded = decode_ts_request(&encoded).unwrap();
        assert_eq!(decoded.auth_info.as_deref(), Some(&b"sealed creds"[..]));
    }

    #[test]
    fn garbage_is_decode_error() {
        assert!(decode_ts_request(b"\x04\x02hi").is_err());
    }

    #[test]
    fn ts_credentials_nests_password_creds() {
        let encoded = encode_ts_credentials(b"d\0", b"u\0", b"p\0");
        // Outer sequence with two context fields.
        assert_eq!(encoded[0], 0x30);
        assert!(encoded.windows(2).any(|w| w == [0xa0, 0x03] || w == [0xa0, 0x04]));
    }
}
