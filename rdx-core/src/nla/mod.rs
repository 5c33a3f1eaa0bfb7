//! Network-level authentication (CredSSP over the upgraded transport).
//!
//! Four-message exchange, run before any application PDU:
//!
//! ```text
//! Client ──[TSRequest{negoToken: NEGOTIATE}]─────────────► Server
//! Client ◄─[TSRequest{negoToken: CHALLENGE}]───────────── Server
//! Client ──[TSRequest{negoToken: AUTHENTICATE,
//!            pubKeyAuth: seal(server public key)}]───────► Server
//! Client ◄─[TSRequest{pubKeyAuth: seal(public key + 1)}]─ Server
//! Client ──[TSRequest{authInfo: seal(TSCredentials)}]────► Server
//! ```
//!
//! Any decode error or missing token aborts with an authentication
//! error; the session must not proceed to connection negotiation.

pub mod cssp;
pub mod ntlm;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::RdxError;
use crate::transport::TransportStream;

pub use ntlm::{Ntlm, NtlmSecurity};

/// Read one complete DER element (the next TSRequest) off the stream.
async fn read_ts_request(stream: &mut TransportStream) -> Result<Vec<u8>, RdxError> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;

    let mut prefix = vec![header[0], header[1]];
    let body_len = if header[1] & 0x80 == 0 {
        header[1] as usize
    } else {
        let n = (header[1] & 0x7f) as usize;
        if n == 0 || n > 2 {
            return Err(RdxError::Authentication("TSRequest length form"));
        }
        let mut ext = vec![0u8; n];
        stream.read_exact(&mut ext).await?;
        let mut len = 0usize;
        for b in &ext {
            len = (len << 8) | *b as usize;
        }
        prefix.extend_from_slice(&ext);
        len
    };

    let mut body = vec![0u8; body_len];
    stream.read_exact(&mut body).await?;
    prefix.extend_from_slice(&body);
    Ok(prefix)
}

/// Drive the full CredSSP handshake. `server_public_key` is the
/// transport's observed TLS certificate key, bound into the exchange to
/// defeat relay.
pub async fn authenticate(
    stream: &mut TransportStream,
    ntlm: &Ntlm,
    server_public_key: &[u8],
) -> Result<(), RdxError> {
    // 1. Negotiate.
    let negotiate = ntlm.negotiate_message();
    let request = cssp::encode_ts_request(Some(&negotiate), None, None);
    stream.write_all(&request).await?;
    debug!(len = request.len(), "sent CredSSP negotiate");

    // 2. Challenge.
    let raw = read_ts_request(stream).await?;
    let response = cssp::decode_ts_request(&raw)?;
    let challenge = response
        .nego_token
        .ok_or(RdxError::Authentication("server sent no challenge token"))?;

    // 3. Authenticate + sealed public key.
    let (auth_message, mut security) = ntlm.authenticate_message(&challenge)?;
    let sealed_key = security.seal(server_public_key);
    let request = cssp::encode_ts_request(Some(&auth_message), None, Some(&sealed_key));
    stream.write_all(&request).await?;
    debug!(len = request.len(), "sent CredSSP authenticate");

    // 4. Server's public-key echo.
    let raw = read_ts_request(stream).await?;
    let response = cssp::decode_ts_request(&raw)?;
    if let Some(code) = response.error_code {
        debug!(code, "server reported CredSSP error");
        return Err(RdxError::Authentication("server rejected authentication"));
    }
    let echoed = response
        .pub_key_auth
        .ok_or(RdxError::Authentication("server sent no public key echo"))?;
    let echoed = security.unseal(&echoed)?;
    if echoed.len() != server_public_key.len() {
        return Err(RdxError::Authentication("public key echo length mismatch"));
    }

    // 5. Credentials.
    let (domain, user, password) = ntlm.encoded_credentials();
    let credentials = cssp::encode_ts_credentials(&domain, &user, &password);
    let sealed = security.seal(&credentials);
    let request = cssp::encode_ts_request(None, Some(&sealed), None);
    stream.write_all(&request).await?;
    debug!("CredSSP handshake complete");
    Ok(())
}
