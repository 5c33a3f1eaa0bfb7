//! NTLMv2 message codec and session security (MS-NLMP).
//!
//! Produces the negotiate/authenticate messages of the CredSSP
//! exchange, derives the session keys from the server challenge, and
//! implements the GSS seal/unseal used to protect the public-key echo
//! and the final credentials.

use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use md4::Md4;
use md5::{Digest, Md5};
use rc4::consts::U16;
use rc4::{Key, KeyInit, Rc4, StreamCipher};

use crate::error::RdxError;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
const MSG_NEGOTIATE: u32 = 1;
const MSG_CHALLENGE: u32 = 2;
const MSG_AUTHENTICATE: u32 = 3;

const AV_EOL: u16 = 0x0000;
const AV_TIMESTAMP: u16 = 0x0007;

/// Seconds between the Windows epoch (1601) and the Unix epoch (1970).
const FILETIME_EPOCH_GAP: u64 = 11_644_473_600;

bitflags! {
    /// NTLM negotiate flags (MS-NLMP 2.2.2.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NegotiateFlags: u32 {
        const UNICODE = 0x0000_0001;
        const REQUEST_TARGET = 0x0000_0004;
        const SIGN = 0x0000_0010;
        const SEAL = 0x0000_0020;
        const NTLM = 0x0000_0200;
        const ALWAYS_SIGN = 0x0000_8000;
        const EXTENDED_SESSION_SECURITY = 0x0008_0000;
        const KEY_128 = 0x2000_0000;
        const KEY_EXCH = 0x4000_0000;
    }
}

fn client_flags() -> NegotiateFlags {
    NegotiateFlags::UNICODE
        | NegotiateFlags::REQUEST_TARGET
        | NegotiateFlags::SIGN
        | NegotiateFlags::SEAL
        | NegotiateFlags::NTLM
        | NegotiateFlags::ALWAYS_SIGN
        | NegotiateFlags::EXTENDED_SESSION_SECURITY
        | NegotiateFlags::KEY_128
        | NegotiateFlags::KEY_EXCH
}

// ── Crypto helpers ───────────────────────────────────────────────

fn unicode(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn md4_digest(data: &[u8]) -> [u8; 16] {
    Md4::digest(data).into()
}

fn md5_digest(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

fn hmac_md5(key: &[u8], data: &[u8]) -> [u8; 16] {
    // HMAC accepts keys of any length.
    let mut mac = <Hmac<Md5> as Mac>::new_from_slice(key).expect("hmac key");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn rc4_apply(key: &[u8; 16], data: &mut [u8]) {
    let mut cipher = Rc4::new(Key::<U16>::from_slice(key));
    cipher.apply_keystream(data);
}

/// NTOWFv2: HMAC-MD5 over the uppercased user + domain, keyed with the
/// MD4 of the UTF-16 password.
pub(crate) fn ntowf_v2(user: &str, domain: &str, password: &str) -> [u8; 16] {
    let key = md4_digest(&unicode(password));
    let identity = unicode(&format!("{}{}", user.to_uppercase(), domain));
    hmac_md5(&key, &identity)
}

/// NTLMv2 response computation (MS-NLMP 3.3.2). Returns the
/// NtChallengeResponse and the session base key.
pub(crate) fn ntlmv2_response(
    response_key: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
    timestamp: u64,
    target_info: &[u8],
) -> (Vec<u8>, [u8; 16]) {
    let mut temp = Vec::with_capacity(28 + target_info.len() + 4);
    temp.push(1); // Responserversion
    temp.push(1); // HiResponserversion
    temp.extend_from_slice(&[0; 6]);
    temp.extend_from_slice(&timestamp.to_le_bytes());
    temp.extend_from_slice(client_challenge);
    temp.extend_from_slice(&[0; 4]);
    temp.extend_from_slice(target_info);
    temp.extend_from_slice(&[0; 4]);

    let mut proof_input = Vec::with_capacity(8 + temp.len());
    proof_input.extend_from_slice(server_challenge);
    proof_input.extend_from_slice(&temp);
    let nt_proof = hmac_md5(response_key, &proof_input);
    let session_base_key = hmac_md5(response_key, &nt_proof);

    let mut nt_response = Vec::with_capacity(16 + temp.len());
    nt_response.extend_from_slice(&nt_proof);
    nt_response.extend_from_slice(&temp);
    (nt_response, session_base_key)
}

fn lmv2_response(
    response_key: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> [u8; 24] {
    let mut input = [0u8; 16];
    input[..8].copy_from_slice(server_challenge);
    input[8..].copy_from_slice(client_challenge);
    let mac = hmac_md5(response_key, &input);
    let mut out = [0u8; 24];
    out[..16].copy_from_slice(&mac);
    out[16..].copy_from_slice(client_challenge);
    out
}

fn derive_key(exported_session_key: &[u8; 16], magic: &[u8]) -> [u8; 16] {
    let mut input = Vec::with_capacity(16 + magic.len());
    input.extend_from_slice(exported_session_key);
    input.extend_from_slice(magic);
    md5_digest(&input)
}

fn filetime_now() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs() + FILETIME_EPOCH_GAP) * 10_000_000 + u64::from(now.subsec_nanos()) / 100
}

// ── Challenge parsing ────────────────────────────────────────────

struct Challenge {
    server_challenge: [u8; 8],
    target_info: Vec<u8>,
}

fn parse_challenge(data: &[u8]) -> Result<Challenge, RdxError> {
    if data.len() < 48 || &data[..8] != SIGNATURE {
        return Err(RdxError::Authentication("malformed challenge message"));
    }
    let msg_type = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    if msg_type != MSG_CHALLENGE {
        return Err(RdxError::Authentication("expected challenge message"));
    }

    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(&data[24..32]);

    let info_len = u16::from_le_bytes([data[40], data[41]]) as usize;
    let info_offset = u32::from_le_bytes([data[44], data[45], data[46], data[47]]) as usize;
    if info_offset + info_len > data.len() {
        return Err(RdxError::Authentication("challenge target info out of bounds"));
    }
    let target_info = data[info_offset..info_offset + info_len].to_vec();

    Ok(Challenge {
        server_challenge,
        target_info,
    })
}

/// The server's timestamp AV pair, when present.
fn target_info_timestamp(target_info: &[u8]) -> Option<u64> {
    let mut rest = target_info;
    while rest.len() >= 4 {
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if id == AV_EOL {
            break;
        }
        if rest.len() < len {
            break;
        }
        if id == AV_TIMESTAMP && len == 8 {
            let mut ts = [0u8; 8];
            ts.copy_from_slice(&rest[..8]);
            return Some(u64::from_le_bytes(ts));
        }
        rest = &rest[len..];
    }
    None
}

// ── Ntlm context ─────────────────────────────────────────────────

/// NTLMv2 client context: credentials plus handshake state.
pub struct Ntlm {
    domain: String,
    user: String,
    password: String,
}

impl Ntlm {
    pub fn new(domain: &str, user: &str, password: &str) -> Self {
        Self {
            domain: domain.to_owned(),
            user: user.to_owned(),
            password: password.to_owned(),
        }
    }

    /// Build the NEGOTIATE_MESSAGE.
    pub fn negotiate_message(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(40);
        buf.put_slice(SIGNATURE);
        buf.put_u32_le(MSG_NEGOTIATE);
        buf.put_u32_le(client_flags().bits());
        // Empty domain and workstation fields, pointing past the header.
        for _ in 0..2 {
            buf.put_u16_le(0);
            buf.put_u16_le(0);
            buf.put_u32_le(40);
        }
        buf.put_slice(&[0; 8]); // version
        buf.freeze()
    }

    /// Consume the CHALLENGE_MESSAGE and produce the
    /// AUTHENTICATE_MESSAGE plus the derived session security.
    pub fn authenticate_message(
        &self,
        challenge: &[u8],
    ) -> Result<(Bytes, NtlmSecurity), RdxError> {
        let challenge = parse_challenge(challenge)?;
        let client_challenge: [u8; 8] = rand::random();
        let timestamp =
            target_info_timestamp(&challenge.target_info).unwrap_or_else(filetime_now);

        let response_key = ntowf_v2(&self.user, &self.domain, &self.password);
        let (nt_response, session_base_key) = ntlmv2_response(
            &response_key,
            &challenge.server_challenge,
            &client_challenge,
            timestamp,
            &challenge.target_info,
        );
        let lm_response = lmv2_response(
            &response_key,
            &challenge.server_challenge,
            &client_challenge,
        );

        // KEY_EXCH: wrap a fresh exported session key under the base key.
        let exported_session_key: [u8; 16] = rand::random();
        let mut encrypted_session_key = exported_session_key;
        rc4_apply(&session_base_key, &mut encrypted_session_key);

        let message = self.encode_authenticate(
            &lm_response,
            &nt_response,
            &encrypted_session_key,
        );
        Ok((message, NtlmSecurity::new(&exported_session_key)))
    }

    fn encode_authenticate(
        &self,
        lm_response: &[u8],
        nt_response: &[u8],
        encrypted_session_key: &[u8],
    ) -> Bytes {
        const HEADER_LEN: usize = 88;

        let domain = unicode(&self.domain);
        let user = unicode(&self.user);
        let workstation: Vec<u8> = Vec::new();

        let payload: [&[u8]; 6] = [
            &domain,
            &user,
            &workstation,
            lm_response,
            nt_response,
            encrypted_session_key,
        ];

        let mut buf = BytesMut::with_capacity(
            HEADER_LEN + payload.iter().map(|p| p.len()).sum::<usize>(),
        );
        buf.put_slice(SIGNATURE);
        buf.put_u32_le(MSG_AUTHENTICATE);

        // Field descriptors in wire order: lm, nt, domain, user,
        // workstation, session key. Payload is laid out as above.
        let mut offsets = [0u32; 6];
        let mut cursor = HEADER_LEN as u32;
        for (i, part) in payload.iter().enumerate() {
            offsets[i] = cursor;
            cursor += part.len() as u32;
        }
        for idx in [3usize, 4, 0, 1, 2, 5] {
            buf.put_u16_le(payload[idx].len() as u16);
            buf.put_u16_le(payload[idx].len() as u16);
            buf.put_u32_le(offsets[idx]);
        }

        buf.put_u32_le(client_flags().bits());
        buf.put_slice(&[0; 8]); // version
        buf.put_slice(&[0; 16]); // MIC (not negotiated)
        for part in payload {
            buf.put_slice(part);
        }
        buf.freeze()
    }

    /// UTF-16LE credentials for the final TSCredentials message.
    pub fn encoded_credentials(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (
            unicode(&self.domain),
            unicode(&self.user),
            unicode(&self.password),
        )
    }
}

// ── Session security ─────────────────────────────────────────────

const CLIENT_SIGNING: &[u8] =
    b"session key to client-to-server signing key magic constant\0";
const SERVER_SIGNING: &[u8] =
    b"session key to server-to-client signing key magic constant\0";
const CLIENT_SEALING: &[u8] =
    b"session key to client-to-server sealing key magic constant\0";
const SERVER_SEALING: &[u8] =
    b"session key to server-to-client sealing key magic constant\0";

/// Sealing/signing state derived from the exported session key.
///
/// Each direction keeps its own RC4 handle; the keystream covers the
/// payload first and the truncated HMAC checksum second, in send order.
pub struct NtlmSecurity {
    seal_tx: Rc4<U16>,
    seal_rx: Rc4<U16>,
    sign_key_tx: [u8; 16],
    sign_key_rx: [u8; 16],
    seq_tx: u32,
    seq_rx: u32,
}

impl NtlmSecurity {
    fn new(exported_session_key: &[u8; 16]) -> Self {
        let seal_key_tx = derive_key(exported_session_key, CLIENT_SEALING);
        let seal_key_rx = derive_key(exported_session_key, SERVER_SEALING);
        Self {
            seal_tx: Rc4::new(Key::<U16>::from_slice(&seal_key_tx)),
            seal_rx: Rc4::new(Key::<U16>::from_slice(&seal_key_rx)),
            sign_key_tx: derive_key(exported_session_key, CLIENT_SIGNING),
            sign_key_rx: derive_key(exported_session_key, SERVER_SIGNING),
            seq_tx: 0,
            seq_rx: 0,
        }
    }

    #[cfg(test)]
    fn with_keys(
        seal_tx: &[u8; 16],
        seal_rx: &[u8; 16],
        sign_key_tx: [u8; 16],
        sign_key_rx: [u8; 16],
    ) -> Self {
        Self {
            seal_tx: Rc4::new(Key::<U16>::from_slice(seal_tx)),
            seal_rx: Rc4::new(Key::<U16>::from_slice(seal_rx)),
            sign_key_tx,
            sign_key_rx,
            seq_tx: 0,
            seq_rx: 0,
        }
    }

    /// GSS_WrapEx: `[version | sealed checksum | seqnum] ++ ciphertext`.
    pub fn seal(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let seq = self.seq_tx;
        self.seq_tx += 1;

        let mut data = plaintext.to_vec();
        self.seal_tx.apply_keystream(&mut data);

        let mut mac_input = Vec::with_capacity(4 + plaintext.len());
        mac_input.extend_from_slice(&seq.to_le_bytes());
        mac_input.extend_from_slice(plaintext);
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&hmac_md5(&self.sign_key_tx, &mac_input)[..8]);
        self.seal_tx.apply_keystream(&mut checksum);

        let mut out = Vec::with_capacity(16 + data.len());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&checksum);
        out.extend_from_slice(&seq.to_le_bytes());
        out.extend_from_slice(&data);
        out
    }

    /// Inverse of [`seal`](Self::seal) for server-to-client messages.
    /// Fails on checksum or sequence mismatch.
    pub fn unseal(&mut self, message: &[u8]) -> Result<Vec<u8>, RdxError> {
        if message.len() < 16 {
            return Err(RdxError::Authentication("sealed message too short"));
        }
        let seq = self.seq_rx;
        self.seq_rx += 1;

        let (signature, ciphertext) = message.split_at(16);
        let mut data = ciphertext.to_vec();
        self.seal_rx.apply_keystream(&mut data);

        let mut mac_input = Vec::with_capacity(4 + data.len());
        mac_input.extend_from_slice(&seq.to_le_bytes());
        mac_input.extend_from_slice(&data);
        let mut expected = [0u8; 8];
        expected.copy_from_slice(&hmac_md5(&self.sign_key_rx, &mac_input)[..8]);
        self.seal_rx.apply_keystream(&mut expected);

        if signature[0..4] != 1u32.to_le_bytes()
            || signature[4..12] != expected
            || signature[12..16] != seq.to_le_bytes()
        {
            return Err(RdxError::Authentication("sealed message checksum mismatch"));
        }
        Ok(data)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // MS-NLMP 4.2.4 NTLMv2 test vectors.
    const USER: &str = "User";
    const DOMAIN: &str = "Domain";
    const PASSWORD: &str = "Password";
    const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
    const CLIENT_CHALLENGE: [u8; 8] = [0xaa; 8];
    const TARGET_INFO: [u8; 36] = [
        0x02, 0x00, 0x0c, 0x00, 0x44, 0x00, 0x6f, 0x00, 0x6d, 0x00, 0x61, 0x00, 0x69, 0x00,
        0x6e, 0x00, 0x01, 0x00, 0x0c, 0x00, 0x53, 0x00, 0x65, 0x00, 0x72, 0x00, 0x76, 0x00,
        0x65, 0x00, 0x72, 0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn ntowf_v2_matches_reference_vector() {
        assert_eq!(
            ntowf_v2(USER, DOMAIN, PASSWORD),
            [
                0x0c, 0x86, 0x8a, 0x40, 0x3b, 0xfd, 0x7a, 0x93, 0xa3, 0x00, 0x1e, 0xf2, 0x2e,
                0xf0, 0x2e, 0x3f
            ]
        );
    }

    #[test]
    fn ntlmv2_response_matches_reference_vector() {
        let key = ntowf_v2(USER, DOMAIN, PASSWORD);
        let (nt_response, session_base_key) =
            ntlmv2_response(&key, &SERVER_CHALLENGE, &CLIENT_CHALLENGE, 0, &TARGET_INFO);

        assert_eq!(
            &nt_response[..16],
            &[
                0x68, 0xcd, 0x0a, 0xb8, 0x51, 0xe5, 0x1c, 0x96, 0xaa, 0xbc, 0x92, 0x7b, 0xeb,
                0xef, 0x6a, 0x1c
            ]
        );
        assert_eq!(
            session_base_key,
            [
                0x8d, 0xe4, 0x0c, 0xca, 0xdb, 0xc1, 0x4a, 0x82, 0xf1, 0x5c, 0xb0, 0xad, 0x0d,
                0xe9, 0x5c, 0xa3
            ]
        );
    }

    #[test]
    fn negotiate_message_layout() {
        let ntlm = Ntlm::new(DOMAIN, USER, PASSWORD);
        let msg = ntlm.negotiate_message();
        assert_eq!(&msg[..8], SIGNATURE);
        assert_eq!(msg.len(), 40);
        assert_eq!(u32::from_le_bytes([msg[8], msg[9], msg[10], msg[11]]), 1);
    }

    fn challenge_message() -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&MSG_CHALLENGE.to_le_bytes());
        msg.extend_from_slice(&[0; 8]); // target name fields
        msg.extend_from_slice(&client_flags().bits().to_le_bytes());
        msg.extend_from_slice(&SERVER_CHALLENGE);
        msg.extend_from_slice(&[0; 8]); // reserved
        msg.extend_from_slice(&(TARGET_INFO.len() as u16).to_le_bytes());
        msg.extend_from_slice(&(TARGET_INFO.len() as u16).to_le_bytes());
        msg.extend_from_slice(&56u32.to_le_bytes());
        msg.extend_from_slice(&[0; 8]); // version
        msg.extend_from_slice(&TARGET_INFO);
        msg
    }

    #[test]
    fn authenticate_message_references_payload_fields() {
        let ntlm = Ntlm::new(DOMAIN, USER, PASSWORD);
        let (msg, _sec) = ntlm.authenticate_message(&challenge_message()).unwrap();

        assert_eq!(&msg[..8], SIGNATURE);
        assert_eq!(u32::from_le_bytes([msg[8], msg[9], msg[10], msg[11]]), 3);

        // Domain field descriptor at offset 28.
        let len = u16::from_le_bytes([msg[28], msg[29]]) as usize;
        let offset = u32::from_le_bytes([msg[32], msg[33], msg[34], msg[35]]) as usize;
        assert_eq!(&msg[offset..offset + len], unicode(DOMAIN).as_slice());

        // NT response descriptor at offset 20: proof (16) + temp.
        let nt_len = u16::from_le_bytes([msg[20], msg[21]]) as usize;
        assert!(nt_len > 16 + 28);
    }

    #[test]
    fn truncated_challenge_is_authentication_error() {
        let ntlm = Ntlm::new(DOMAIN, USER, PASSWORD);
        assert!(matches!(
            ntlm.authenticate_message(&[0u8; 20]),
            Err(RdxError::Authentication(_))
        ));
    }

    #[test]
    fn seal_unseal_roundtrip_with_mirrored_keys() {
        let seal = [0x11u8; 16];
        let sign = [0x22u8; 16];
        let mut client = NtlmSecurity::with_keys(&seal, &[0x33; 16], sign, [0x44; 16]);
        // Server's rx keys mirror the client's tx keys.
        let mut server = NtlmSecurity::with_keys(&[0x33; 16], &seal, [0x44; 16], sign);

        let sealed = client.seal(b"public key bytes");
        assert_ne!(&sealed[16..], b"public key bytes");
        let opened = server.unseal(&sealed).unwrap();
        assert_eq!(opened, b"public key bytes");

        // Sequence numbers advance in lockstep.
        let sealed2 = client.seal(b"second message");
        assert_eq!(server.unseal(&sealed2).unwrap(), b"second message");
    }

    #[test]
    fn tampered_ciphertext_fails_checksum() {
        let seal = [0x55u8; 16];
        let sign = [0x66u8; 16];
        let mut client = NtlmSecurity::with_keys(&seal, &[0x77; 16], sign, [0x88; 16]);
        let mut server = NtlmSecurity::with_keys(&[0x77; 16], &seal, [0x88; 16], sign);

        let mut sealed = client.seal(b"binding");
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(
            server.unseal(&sealed),
            Err(RdxError::Authentication(_))
        ));
    }

    #[test]
    fn timestamp_av_pair_is_used_when_present() {
        let mut info = Vec::new();
        info.extend_from_slice(&AV_TIMESTAMP.to_le_bytes());
        info.extend_from_slice(&8u16.to_le_bytes());
        info.extend_from_slice(&0x1122_3344_5566_7788u64.to_le_bytes());
        info.extend_from_slice(&[0; 4]);
        assert_eq!(target_info_timestamp(&info), Some(0x1122_3344_5566_7788));
        assert_eq!(target_info_timestamp(&TARGET_INFO), None);
    }
}
