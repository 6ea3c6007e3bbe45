//! Error types for the BigHeads mesh core.

use thiserror::Error;

/// Store (persistence) errors. Raised to the caller; never swallowed
/// (spec §4.1 "Failure semantics").
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("json (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store is closed")]
    Closed,
}

/// Transport (BLE) errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("BLE adapter not found")]
    AdapterNotFound,

    #[error("peer not found: {0}")]
    PeerNotFound(String),

    #[error("btleplug error: {0}")]
    Btleplug(#[from] btleplug::Error),
}

/// Mesh engine errors surfaced to the runtime bridge / CLI.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Crypto(#[from] bigheads_crypto::CryptoError),

    #[error("json (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("file too large: {0} bytes (limit {1})")]
    FileTooLarge(usize, usize),

    #[error("config error: {0}")]
    Config(String),
}
