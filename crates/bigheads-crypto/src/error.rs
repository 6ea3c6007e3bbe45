//! Error types for BigHeads crypto

use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length")]
    InvalidKeyLength,

    #[error("invalid nonce length")]
    InvalidNonceLength,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("malformed encrypted payload")]
    MalformedPayload,

    #[error("no session established for this chat")]
    NoSession,
}
