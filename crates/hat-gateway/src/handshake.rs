use sha1::{Digest, Sha1};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
/// Enumerates supported `HandshakeError` values.
pub enum HandshakeError {
    #[error("webhook shared token is not configured")]
    MissingSharedToken,
    #[error("handshake field '{0}' is missing")]
    MissingField(&'static str),
    #[error("handshake signature mismatch")]
    SignatureMismatch,
}

/// SHA-1 hex digest of `timestamp`, `nonce` and the shared token, sorted
/// lexicographically and concatenated.
pub fn compute_handshake_signature(timestamp: &str, nonce: &str, shared_token: &str) -> String {
    let mut parts = [timestamp, nonce, shared_token];
    parts.sort_unstable();
    format!("{:x}", Sha1::digest(parts.concat().as_bytes()))
}

pub fn verify_handshake(
    shared_token: Option<&str>,
    timestamp: Option<&str>,
    nonce: Option<&str>,
    signature: Option<&str>,
) -> Result<(), HandshakeError> {
    let shared_token = shared_token
        .filter(|token| !token.is_empty())
        .ok_or(HandshakeError::MissingSharedToken)?;
    let timestamp = timestamp.ok_or(HandshakeError::MissingField("timestamp"))?;
    let nonce = nonce.ok_or(HandshakeError::MissingField("nonce"))?;
    let signature = signature.ok_or(HandshakeError::MissingField("signature"))?;

    let expected = compute_handshake_signature(timestamp, nonce, shared_token);
    if expected == signature {
        Ok(())
    } else {
        Err(HandshakeError::SignatureMismatch)
    }
}
