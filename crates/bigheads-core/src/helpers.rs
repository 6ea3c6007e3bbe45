//! Shared utility helpers: timestamps, base64, compact JSON, chunking, IDs.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix timestamp as float seconds, matching the envelope's
/// `timestamp` field (sender-local UNIX seconds).
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_secs_f64()
}

/// Derive a stable 8-hex-character node id as the prefix of SHA-256 over a
/// local seed (random on first run, persisted thereafter in config.json).
pub fn node_id_from_seed(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    hex::encode(&digest[..4])
}

/// A fresh 128-bit random identifier, hex-encoded, used for `msg_id` and
/// fragmentation `frame_id`.
pub fn random_id_128() -> String {
    let mut bytes = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    hex::encode(bytes)
}

pub fn to_b64(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn from_b64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(data)
}

/// Compact (no insignificant whitespace) UTF-8 JSON encoding, matching the
/// wire format requirement in spec §6.
pub fn compact_json<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

/// Best-effort JSON parse of raw bytes; returns `None` on invalid UTF-8 or
/// invalid JSON rather than propagating an error, since malformed frames
/// are dropped silently (spec §4.4.2 step 1 / §7).
pub fn safe_json_parse(raw: &[u8]) -> Option<serde_json::Value> {
    serde_json::from_slice(raw).ok()
}

/// Split `data` into fixed-size chunks, the last possibly shorter.
pub fn chunk_bytes(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    data.chunks(chunk_size.max(1)).map(|c| c.to_vec()).collect()
}

/// Split a string into fixed-size chunks (by byte length, used for
/// chunking base64 text), the last possibly shorter.
pub fn chunk_str(data: &str, chunk_size: usize) -> Vec<String> {
    let bytes = data.as_bytes();
    chunk_bytes(bytes, chunk_size)
        .into_iter()
        .map(|c| String::from_utf8(c).expect("chunking ascii base64 text stays valid utf-8"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_eight_lowercase_hex_chars() {
        let id = node_id_from_seed("some-local-seed");
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn node_id_is_stable_for_same_seed() {
        assert_eq!(node_id_from_seed("a"), node_id_from_seed("a"));
        assert_ne!(node_id_from_seed("a"), node_id_from_seed("b"));
    }

    #[test]
    fn random_ids_are_128_bit_hex_and_unique() {
        let a = random_id_128();
        let b = random_id_128();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn base64_roundtrip() {
        let data = b"hello mesh";
        let encoded = to_b64(data);
        assert_eq!(from_b64(&encoded).unwrap(), data);
    }

    #[test]
    fn chunk_bytes_covers_all_and_respects_size() {
        let data = vec![0u8; 2050];
        let chunks = chunk_bytes(&data, 512);
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), data.len());
        assert!(chunks[..4].iter().all(|c| c.len() == 512));
    }

    #[test]
    fn safe_json_parse_rejects_garbage() {
        assert!(safe_json_parse(b"not json").is_none());
        assert!(safe_json_parse(b"{\"a\":1}").is_some());
    }
}
