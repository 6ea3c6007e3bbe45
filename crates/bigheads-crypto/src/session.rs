//! Per-peer session material for private chats.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Raw X25519 key material established by the NN handshake, addressed by
/// chat_id and persisted as a JSON blob in `chat_keys`. Zeroized on drop;
/// `local_priv_b64` is the secret half.
#[derive(Debug, Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Session {
    local_priv_b64: String,
    peer_pub_b64: String,
}

impl Session {
    pub fn new(local_priv: &StaticSecret, peer_pub: &PublicKey) -> Self {
        Self {
            local_priv_b64: BASE64.encode(local_priv.to_bytes()),
            peer_pub_b64: BASE64.encode(peer_pub.as_bytes()),
        }
    }

    pub fn local_priv(&self) -> Result<StaticSecret, CryptoError> {
        let mut bytes = BASE64
            .decode(&self.local_priv_b64)
            .map_err(|_| CryptoError::MalformedPayload)?;
        if bytes.len() != 32 {
            bytes.zeroize();
            return Err(CryptoError::InvalidKeyLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        bytes.zeroize();
        let secret = StaticSecret::from(arr);
        arr.zeroize();
        Ok(secret)
    }

    pub fn peer_pub(&self) -> Result<PublicKey, CryptoError> {
        let bytes = BASE64
            .decode(&self.peer_pub_b64)
            .map_err(|_| CryptoError::MalformedPayload)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(PublicKey::from(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_roundtrips_through_json() {
        let local = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let peer_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let peer_pub = PublicKey::from(&peer_secret);

        let session = Session::new(&local, &peer_pub);
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();

        assert_eq!(
            back.local_priv().unwrap().to_bytes(),
            local.to_bytes()
        );
        assert_eq!(back.peer_pub().unwrap().as_bytes(), peer_pub.as_bytes());
    }
}
