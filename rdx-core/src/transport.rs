//! TCP transport with optional TLS upgrade.
//!
//! The connection starts as a plain TCP stream for the X.224
//! negotiation, then upgrades to TLS before NLA and everything after.
//! Certificate validation is intentionally disabled: RDP servers
//! routinely present self-signed certificates, and the CredSSP
//! public-key echo binds the credentials to this exact TLS channel
//! instead.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::asn1::{take, take_u8};
use crate::error::RdxError;

// ── TransportStream ──────────────────────────────────────────────

/// The session's byte stream: plain TCP before the security upgrade,
/// TLS afterwards.
pub enum TransportStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl TransportStream {
    /// Upgrade a plain TCP stream to TLS against `host`.
    pub async fn upgrade_tls(tcp: TcpStream, host: &str) -> Result<Self, RdxError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert { provider }))
            .with_no_client_auth();

        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|_| RdxError::Decode("invalid server name"))?;
        let connector = TlsConnector::from(Arc::new(config));
        let tls = connector.connect(server_name, tcp).await?;
        debug!("TLS upgrade complete");
        Ok(TransportStream::Tls(Box::new(tls)))
    }

    /// The server certificate's public key (PKCS#1 body of the
    /// SubjectPublicKeyInfo), used as the CredSSP channel binding.
    ///
    /// Errors on a plain stream or before the TLS handshake finished.
    pub fn peer_public_key(&self) -> Result<Vec<u8>, RdxError> {
        let TransportStream::Tls(tls) = self else {
            return Err(RdxError::Protocol("no TLS session for public key"));
        };
        let (_, session) = tls.get_ref();
        let cert = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or(RdxError::Protocol("server presented no certificate"))?;
        subject_public_key(cert.as_ref())
    }
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            TransportStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            TransportStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            TransportStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Plain(s) => Pin::new(s).poll_flush(cx),
            TransportStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            TransportStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            TransportStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

// ── Certificate public key extraction ────────────────────────────

const DER_INTEGER: u8 = 0x02;
const DER_BIT_STRING: u8 = 0x03;
const DER_SEQUENCE: u8 = 0x30;
const DER_CONTEXT_0: u8 = 0xA0;

fn der_header(r: &mut Bytes) -> Result<(u8, usize), RdxError> {
    let tag = take_u8(r, "DER tag")?;
    let first = take_u8(r, "DER length")?;
    let len = if first & 0x80 == 0 {
        first as usize
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 4 {
            return Err(RdxError::Decode("DER length form"));
        }
        let mut len = 0usize;
        for _ in 0..n {
            len = (len << 8) | take_u8(r, "DER length")? as usize;
        }
        len
    };
    Ok((tag, len))
}

fn der_skip(r: &mut Bytes, expected: u8) -> Result<(), RdxError> {
    let (tag, len) = der_header(r)?;
    if tag != expected {
        return Err(RdxError::Decode("unexpected DER element in certificate"));
    }
    take(r, len, "DER element body")?;
    Ok(())
}

/// Walk an X.509 certificate down to the subjectPublicKey BIT STRING
/// and return its content (for RSA keys, the PKCS#1 RSAPublicKey DER).
fn subject_public_key(cert: &[u8]) -> Result<Vec<u8>, RdxError> {
    let mut r = Bytes::copy_from_slice(cert);

    let (tag, _) = der_header(&mut r)?; // Certificate
    if tag != DER_SEQUENCE {
        return Err(RdxError::Decode("certificate is not a sequence"));
    }
    let (tag, _) = der_header(&mut r)?; // TBSCertificate
    if tag != DER_SEQUENCE {
        return Err(RdxError::Decode("tbsCertificate is not a sequence"));
    }

    // Optional [0] version.
    if r.first() == Some(&DER_CONTEXT_0) {
        der_skip(&mut r, DER_CONTEXT_0)?;
    }
    der_skip(&mut r, DER_INTEGER)?; // serialNumber
    der_skip(&mut r, DER_SEQUENCE)?; // signature algorithm
    der_skip(&mut r, DER_SEQUENCE)?; // issuer
    der_skip(&mut r, DER_SEQUENCE)?; // validity
    der_skip(&mut r, DER_SEQUENCE)?; // subject

    let (tag, _) = der_header(&mut r)?; // subjectPublicKeyInfo
    if tag != DER_SEQUENCE {
        return Err(RdxError::Decode("subjectPublicKeyInfo is not a sequence"));
    }
    der_skip(&mut r, DER_SEQUENCE)?; // algorithm identifier

    let (tag, len) = der_header(&mut r)?;
    if tag != DER_BIT_STRING || len == 0 {
        return Err(RdxError::Decode("subjectPublicKey is not a bit string"));
    }
    let mut body = take(&mut r, len, "subjectPublicKey body")?;
    let _unused_bits = body.get_u8();
    Ok(body.to_vec())
}

// ── TLS certificate verifier ─────────────────────────────────────

/// Accepts every server certificate. See the module docs for why this
/// is the correct trust model for NLA-bound RDP connections.
#[derive(Debug)]
struct AcceptAnyCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-built minimal certificate skeleton: just enough structure
    /// for the SPKI walk.
    fn fake_cert(key: &[u8]) -> Vec<u8> {
        fn elem(tag: u8, body: &[u8]) -> Vec<u8> {
            let mut out = vec![tag];
            if body.len() > 0x7f {
                out.push(0x82);
                out.extend_from_slice(&(body.len() as u16).to_be_bytes());
            } else {
                out.push(body.len() as u8);
            }
            out.extend_from_slice(body);
            out
        }

        let mut bit_string = vec![0u8]; // unused bits
        bit_string.extend_from_slice(key);

        let mut spki = elem(DER_SEQUENCE, &[0x06, 0x01, 0x2a]); // algorithm
        spki.extend_from_slice(&elem(DER_BIT_STRING, &bit_string));

        let mut tbs = Vec::new();
        tbs.extend_from_slice(&elem(DER_CONTEXT_0, &elem(DER_INTEGER, &[2])));
        tbs.extend_from_slice(&elem(DER_INTEGER, &[1])); // serial
        tbs.extend_from_slice(&elem(DER_SEQUENCE, &[])); // sig alg
        tbs.extend_from_slice(&elem(DER_SEQUENCE, &[])); // issuer
        tbs.extend_from_slice(&elem(DER_SEQUENCE, &[])); // validity
        tbs.extend_from_slice(&elem(DER_SEQUENCE, &[])); // subject
        tbs.extend_from_slice(&elem(DER_SEQUENCE, &spki));

        elem(DER_SEQUENCE, &elem(DER_SEQUENCE, &tbs))
    }

    #[test]
    fn extracts_subject_public_key() {
        let key = [0x30, 0x0a, 0x02, 0x03, 0x01, 0x00, 0x01];
        let cert = fake_cert(&key);
        assert_eq!(subject_public_key(&cert).unwrap(), key);
    }

    #[test]
    fn garbage_certificate_is_decode_error() {
        assert!(subject_public_key(&[0x01, 0x02, 0x03]).is_err());
    }
}
