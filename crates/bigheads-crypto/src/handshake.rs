//! NN-style X25519 handshake used to bootstrap a private chat session.
//!
//! Both messages of the handshake travel `enc=none` (the mesh engine is
//! responsible for framing them as `system{kind:"noise_init"|"noise_resp"}`
//! envelopes); this module only produces and consumes the raw key material.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;
use crate::session::Session;

fn decode_pub(pub_b64: &str) -> Result<PublicKey, CryptoError> {
    let bytes = BASE64
        .decode(pub_b64)
        .map_err(|_| CryptoError::MalformedPayload)?;
    let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength)?;
    Ok(PublicKey::from(arr))
}

/// Ephemeral key generated by the initiator; kept in-memory until the
/// responder's reply arrives.
pub struct PendingHandshake {
    priv_key: StaticSecret,
}

/// Initiator step 1: generate an ephemeral keypair and the base64 public
/// key to transmit as `noise_init`.
pub fn initiate() -> (String, PendingHandshake) {
    let priv_key = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let pub_b64 = BASE64.encode(PublicKey::from(&priv_key).as_bytes());
    (pub_b64, PendingHandshake { priv_key })
}

/// Responder step: given the initiator's public key, generate our own
/// ephemeral keypair, store the session, and produce the base64 public key
/// to transmit as `noise_resp`.
pub fn respond(initiator_pub_b64: &str) -> Result<(String, Session), CryptoError> {
    let initiator_pub = decode_pub(initiator_pub_b64)?;
    let responder_priv = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let responder_pub_b64 = BASE64.encode(PublicKey::from(&responder_priv).as_bytes());
    let session = Session::new(&responder_priv, &initiator_pub);
    Ok((responder_pub_b64, session))
}

/// Initiator step 2: given our pending handshake and the responder's
/// public key, finalize the session.
pub fn finalize(pending: PendingHandshake, responder_pub_b64: &str) -> Result<Session, CryptoError> {
    let responder_pub = decode_pub(responder_pub_b64)?;
    Ok(Session::new(&pending.priv_key, &responder_pub))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_establishes_matching_sessions() {
        let (init_pub, pending) = initiate();
        let (resp_pub, responder_session) = respond(&init_pub).unwrap();
        let initiator_session = finalize(pending, &resp_pub).unwrap();

        // Each side's peer_pub is the other side's local public key.
        let responder_local_pub = PublicKey::from(&responder_session.local_priv().unwrap());
        assert_eq!(
            initiator_session.peer_pub().unwrap().as_bytes(),
            responder_local_pub.as_bytes()
        );

        let initiator_local_pub = decode_pub(&init_pub).unwrap();
        assert_eq!(
            responder_session.peer_pub().unwrap().as_bytes(),
            initiator_local_pub.as_bytes()
        );
    }
}
