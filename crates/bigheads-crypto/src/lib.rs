//! Cryptographic envelopes for the BigHeads mesh.
//!
//! - Group broadcast: a passphrase-derived ChaCha20-Poly1305 key (`group`).
//! - Private chats: an NN-style X25519 handshake (`handshake`) establishing
//!   a [`session::Session`], then per-message ephemeral ECDH + HKDF AEAD
//!   (`private`).

mod error;
mod group;
mod handshake;
mod private;
mod session;

pub use error::CryptoError;
pub use group::{GroupCiphertext, GroupCrypto};
pub use handshake::{finalize, initiate, respond, PendingHandshake};
pub use private::PrivateCiphertext;
pub use session::Session;

use hkdf::Hkdf;
use sha2::Sha256;

/// HKDF-SHA256 with a fixed 32-byte output, used by both group and
/// private-chat key derivation.
pub(crate) fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut out = [0u8; 32];
    hk.expand(info, &mut out)
        .expect("32-byte output is always valid for HKDF-SHA256");
    out
}

/// Encrypt a plaintext for a private chat with an established session.
pub fn encrypt_private(
    plaintext: &[u8],
    chat_id: &str,
    msg_id: &str,
    session: &Session,
    aad: &[u8],
) -> Result<PrivateCiphertext, CryptoError> {
    private::encrypt(plaintext, chat_id, msg_id, session, aad)
}

/// Decrypt a private-chat payload with an established session.
pub fn decrypt_private(
    payload: &PrivateCiphertext,
    chat_id: &str,
    msg_id: &str,
    session: &Session,
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    private::decrypt(payload, chat_id, msg_id, session, aad)
}
