//! Group-key encryption for broadcast payloads.
//!
//! The group key is derived once per passphrase via HKDF-SHA256 and used
//! with ChaCha20-Poly1305 AEAD. Rotating the passphrase replaces the key
//! immediately; no backward decryption of old ciphertext is attempted.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::hkdf_sha256;

const GROUP_SALT: &[u8] = b"bigheads-group";
const GROUP_INFO: &[u8] = b"group-key";

/// An encrypted group-broadcast payload as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCiphertext {
    pub nonce: String,
    pub ct: String,
}

/// Holds the current group key, derived from a shared passphrase.
pub struct GroupCrypto {
    passphrase: String,
}

impl GroupCrypto {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    /// Replace the passphrase. Takes effect on the next encrypt/decrypt call.
    pub fn update_passphrase(&mut self, passphrase: impl Into<String>) {
        self.passphrase = passphrase.into();
    }

    fn key(&self) -> [u8; 32] {
        let seed = Sha256::digest(self.passphrase.as_bytes());
        hkdf_sha256(&seed, GROUP_SALT, GROUP_INFO)
    }

    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<GroupCiphertext, CryptoError> {
        let key = self.key();
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ct = cipher
            .encrypt(nonce, chacha20poly1305::aead::Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionFailed)?;
        Ok(GroupCiphertext {
            nonce: BASE64.encode(nonce_bytes),
            ct: BASE64.encode(ct),
        })
    }

    pub fn decrypt(&self, payload: &GroupCiphertext, aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let key = self.key();
        let cipher = ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        let nonce_bytes = BASE64
            .decode(&payload.nonce)
            .map_err(|_| CryptoError::MalformedPayload)?;
        if nonce_bytes.len() != 12 {
            return Err(CryptoError::InvalidNonceLength);
        }
        let ct = BASE64
            .decode(&payload.ct)
            .map_err(|_| CryptoError::MalformedPayload)?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        cipher
            .decrypt(nonce, chacha20poly1305::aead::Payload { msg: &ct, aad })
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let crypto = GroupCrypto::new("correct horse battery staple");
        let aad = b"msg-id-123";
        let ct = crypto.encrypt(b"hello mesh", aad).unwrap();
        let pt = crypto.decrypt(&ct, aad).unwrap();
        assert_eq!(pt, b"hello mesh");
    }

    #[test]
    fn wrong_aad_fails() {
        let crypto = GroupCrypto::new("pw");
        let ct = crypto.encrypt(b"hello", b"aad-a").unwrap();
        assert!(crypto.decrypt(&ct, b"aad-b").is_err());
    }

    #[test]
    fn rotation_breaks_old_ciphertext() {
        let mut crypto = GroupCrypto::new("P1");
        let aad = b"m1";
        let ct = crypto.encrypt(b"secret", aad).unwrap();

        crypto.update_passphrase("P2");
        assert!(crypto.decrypt(&ct, aad).is_err());

        let ct2 = crypto.encrypt(b"secret", aad).unwrap();
        assert_eq!(crypto.decrypt(&ct2, aad).unwrap(), b"secret");
    }
}
