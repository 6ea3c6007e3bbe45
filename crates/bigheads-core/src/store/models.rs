//! Row types returned by the [`crate::store::Store`] queries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub msg_id: String,
    pub chat_id: String,
    pub sender: String,
    pub recipient: String,
    pub msg_type: String,
    pub payload: serde_json::Value,
    pub timestamp: f64,
    pub reply_to: Option<String>,
    pub outgoing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Contact {
    pub node_id: String,
    pub alias: Option<String>,
    pub last_seen: Option<f64>,
    pub blocked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub target_node: String,
    pub via_node: String,
    pub hops: u32,
    pub updated_at: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub reactor: String,
    pub reaction: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone)]
pub struct OutboxItem {
    pub id: i64,
    pub envelope: serde_json::Value,
}
