//! The logical message record carried over the mesh.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncMode {
    None,
    Group,
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub msg_id: String,
    pub from: String,
    pub to: String,
    pub ttl: u32,
    pub hop: u32,
    pub timestamp: f64,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub enc: EncMode,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Envelope {
    pub fn is_broadcast(&self) -> bool {
        self.to == "*"
    }

    pub fn is_addressed_to(&self, node_id: &str) -> bool {
        self.to == "*" || self.to == node_id
    }
}

/// User-visible message kinds eligible for persistence (spec §4.4.2 step 8).
pub const PERSISTABLE_TYPES: [&str; 4] = ["text", "image", "file", "system"];
