//! Per-message AEAD for established private chat sessions.
//!
//! Each message draws a fresh ephemeral X25519 keypair, ECDHs it against
//! the session's stored peer public key, and derives a one-shot key with
//! HKDF-SHA256 salted by a random 16-byte salt and bound to
//! `bigheads-private:{chat_id}:{msg_id}`. The receiver recomputes the same
//! shared secret from its stored local private key and the transmitted
//! ephemeral public key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::CryptoError;
use crate::hkdf_sha256;
use crate::session::Session;

/// An encrypted private-chat payload as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateCiphertext {
    pub nonce: String,
    pub ct: String,
    pub salt: String,
    pub eph_pub: String,
}

fn info_for(chat_id: &str, msg_id: &str) -> Vec<u8> {
    format!("bigheads-private:{chat_id}:{msg_id}").into_bytes()
}

pub fn encrypt(
    plaintext: &[u8],
    chat_id: &str,
    msg_id: &str,
    session: &Session,
    aad: &[u8],
) -> Result<PrivateCiphertext, CryptoError> {
    let eph_priv = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let eph_pub = PublicKey::from(&eph_priv);
    let peer_pub = session.peer_pub()?;
    let shared = eph_priv.diffie_hellman(&peer_pub);

    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let key = hkdf_sha256(shared.as_bytes(), &salt, &info_for(chat_id, msg_id));

    let cipher =
        ChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeyLength)?;
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ct = cipher
        .encrypt(nonce, chacha20poly1305::aead::Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(PrivateCiphertext {
        nonce: BASE64.encode(nonce_bytes),
        ct: BASE64.encode(ct),
        salt: BASE64.encode(salt),
        eph_pub: BASE64.encode(eph_pub.as_bytes()),
    })
}

pub fn decrypt(
    payload: &PrivateCiphertext,
    chat_id: &str,
    msg_id: &str,
    session: &Session,
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let local_priv = session.local_priv()?;

    let eph_pub_bytes = BASE64
        .decode(&payload.eph_pub)
        .map_err(|_| CryptoError::MalformedPayload)?;
    let eph_pub_arr: [u8; 32] = eph_pub_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength)?;
    let eph_pub = PublicKey::from(eph_pub_arr);

    let shared = local_priv.diffie_hellman(&eph_pub);

    let salt = BASE64
        .decode(&payload.salt)
        .map_err(|_| CryptoError::MalformedPayload)?;
    let key = hkdf_sha256(shared.as_bytes(), &salt, &info_for(chat_id, msg_id));

    let nonce_bytes = BASE64
        .decode(&payload.nonce)
        .map_err(|_| CryptoError::MalformedPayload)?;
    if nonce_bytes.len() != 12 {
        return Err(CryptoError::InvalidNonceLength);
    }
    let ct = BASE64
        .decode(&payload.ct)
        .map_err(|_| CryptoError::MalformedPayload)?;

    let cipher =
        ChaCha20Poly1305::new_from_slice(&key).map_err(|_| CryptoError::InvalidKeyLength)?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    cipher
        .decrypt(nonce, chacha20poly1305::aead::Payload { msg: &ct, aad })
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake;

    fn paired_sessions() -> (Session, Session) {
        let (init_pub, pending) = handshake::initiate();
        let (resp_pub, responder_session) = handshake::respond(&init_pub).unwrap();
        let initiator_session = handshake::finalize(pending, &resp_pub).unwrap();
        (initiator_session, responder_session)
    }

    #[test]
    fn roundtrip_between_handshake_peers() {
        let (alice, bob) = paired_sessions();
        let msg_id = "m1";
        let chat_id = "bob-node";
        let aad = msg_id.as_bytes();

        let ct = encrypt(b"hi bob", chat_id, msg_id, &alice, aad).unwrap();
        let pt = decrypt(&ct, chat_id, msg_id, &bob, aad).unwrap();
        assert_eq!(pt, b"hi bob");
    }

    #[test]
    fn each_message_uses_a_fresh_ephemeral_key() {
        let (alice, bob) = paired_sessions();
        let ct1 = encrypt(b"one", "c", "m1", &alice, b"m1").unwrap();
        let ct2 = encrypt(b"two", "c", "m2", &alice, b"m2").unwrap();
        assert_ne!(ct1.eph_pub, ct2.eph_pub);
        assert_eq!(decrypt(&ct1, "c", "m1", &bob, b"m1").unwrap(), b"one");
        assert_eq!(decrypt(&ct2, "c", "m2", &bob, b"m2").unwrap(), b"two");
    }

    #[test]
    fn wrong_session_fails() {
        let (alice, _bob) = paired_sessions();
        let (_other_alice, other_bob) = paired_sessions();
        let ct = encrypt(b"secret", "c", "m1", &alice, b"m1").unwrap();
        assert!(decrypt(&ct, "c", "m1", &other_bob, b"m1").is_err());
    }
}
