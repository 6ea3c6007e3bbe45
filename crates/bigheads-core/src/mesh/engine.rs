//! The mesh engine: envelope assembly, encryption policy, fragmentation,
//! duplicate suppression, flood/forward, and handshake orchestration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use bigheads_crypto::{self as crypto, GroupCrypto, PendingHandshake, PrivateCiphertext, Session};

use crate::error::MeshError;
use crate::helpers::{compact_json, now_secs, random_id_128, safe_json_parse, to_b64};
use crate::store::{Contact, OutboxItem, Store, StoredMessage};
use crate::transport::{MeshTransport, PeerState, TransportEvent};

use super::envelope::{EncMode, Envelope, PERSISTABLE_TYPES};
use super::frame::{Frame, FragmentAssembler};

const HELLO_INTERVAL: Duration = Duration::from_secs(15);
const OUTBOX_DRAIN_LIMIT: usize = 100;
const FRAGMENT_PREAMBLE_BYTES: usize = 140;
const MIN_FRAGMENT_CHARS: usize = 30;

/// Events the engine raises for the UI-facing side of the runtime bridge.
#[derive(Debug, Clone)]
pub enum Event {
    PeerHello { node_id: String, timestamp: f64 },
    Message { env: Envelope },
    Reaction { env: Envelope },
    Typing { env: Envelope },
    PeersChanged(Vec<PeerState>),
    SearchResults(Vec<StoredMessage>),
    History(Vec<StoredMessage>),
    Toast(String),
    Exported(PathBuf),
}

pub struct MeshEngineConfig {
    pub node_id: String,
    pub packet_size_limit: usize,
    pub default_ttl: u32,
    pub max_file_bytes: usize,
}

pub struct MeshEngine {
    config: MeshEngineConfig,
    default_ttl: AtomicU32,
    store: Arc<Store>,
    transport: Arc<dyn MeshTransport>,
    group: SyncMutex<GroupCrypto>,
    sessions: AsyncMutex<HashMap<String, Session>>,
    pending_handshakes: AsyncMutex<HashMap<String, PendingHandshake>>,
    addr_to_node: SyncMutex<HashMap<String, String>>,
    node_to_addr: SyncMutex<HashMap<String, String>>,
    fragments: AsyncMutex<FragmentAssembler>,
    event_tx: mpsc::Sender<Event>,
    hello_task: SyncMutex<Option<JoinHandle<()>>>,
}

impl MeshEngine {
    pub fn new(
        config: MeshEngineConfig,
        store: Arc<Store>,
        transport: Arc<dyn MeshTransport>,
        group_passphrase: &str,
        event_tx: mpsc::Sender<Event>,
    ) -> Arc<Self> {
        Arc::new(Self {
            default_ttl: AtomicU32::new(config.default_ttl),
            config,
            store,
            transport,
            group: SyncMutex::new(GroupCrypto::new(group_passphrase)),
            sessions: AsyncMutex::new(HashMap::new()),
            pending_handshakes: AsyncMutex::new(HashMap::new()),
            addr_to_node: SyncMutex::new(HashMap::new()),
            node_to_addr: SyncMutex::new(HashMap::new()),
            fragments: AsyncMutex::new(FragmentAssembler::new()),
            event_tx,
            hello_task: SyncMutex::new(None),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn update_group_passphrase(&self, passphrase: &str) {
        self.group.lock().update_passphrase(passphrase);
    }

    pub fn update_default_ttl(&self, default_ttl: u32) {
        self.default_ttl.store(default_ttl, Ordering::Relaxed);
    }

    pub(super) fn store_handle(&self) -> &Store {
        &self.store
    }

    pub(super) fn event_sender(&self) -> &mpsc::Sender<Event> {
        &self.event_tx
    }

    /// A clone of the engine's event sender, for callers outside the
    /// `mesh` module that need to post events of their own (e.g. the
    /// runtime bridge relaying action results).
    pub fn event_sender_handle(&self) -> mpsc::Sender<Event> {
        self.event_tx.clone()
    }

    /// Load persisted sessions for every known contact and start the hello
    /// beacon loop. Call once, holding the engine in an `Arc`.
    pub async fn start(self: &Arc<Self>) -> Result<(), MeshError> {
        self.load_sessions().await?;
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.hello_loop().await });
        *self.hello_task.lock() = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.hello_task.lock().take() {
            handle.abort();
        }
    }

    async fn load_sessions(&self) -> Result<(), MeshError> {
        let contacts: Vec<Contact> = self.store.list_contacts()?;
        let mut sessions = self.sessions.lock().await;
        for contact in contacts {
            if let Some(stored) = self.store.get_chat_key(&contact.node_id)? {
                if let Ok(session) = serde_json::from_value::<Session>(stored) {
                    sessions.insert(contact.node_id, session);
                }
            }
        }
        Ok(())
    }

    async fn hello_loop(self: Arc<Self>) {
        loop {
            let payload = serde_json::json!({
                "kind": "hello",
                "node_id": self.config.node_id,
                "ts": now_secs(),
            });
            if let Err(err) = self.send_system("*", payload, true).await {
                log::debug!("hello send failed: {err}");
            }
            tokio::time::sleep(HELLO_INTERVAL).await;
        }
    }

    /// Drive inbound transport events: packets and peer-set changes.
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PacketReceived { address, data } => {
                self.handle_packet(&address, &data).await;
            }
            TransportEvent::PeersChanged(peers) => {
                let _ = self.event_tx.send(Event::PeersChanged(peers)).await;
            }
        }
    }

    async fn handle_packet(&self, address: &str, raw: &[u8]) {
        let mut current = raw.to_vec();
        loop {
            let Some(value) = safe_json_parse(&current) else {
                return;
            };
            match value.get("kind").and_then(|v| v.as_str()) {
                Some("frag") => {
                    let (frame_id, idx, total, data) = (
                        value.get("frame_id").and_then(|v| v.as_str()),
                        value.get("idx").and_then(|v| v.as_u64()),
                        value.get("total").and_then(|v| v.as_u64()),
                        value.get("data").and_then(|v| v.as_str()),
                    );
                    let (Some(frame_id), Some(idx), Some(total), Some(data)) =
                        (frame_id, idx, total, data)
                    else {
                        return;
                    };
                    let assembled = self.fragments.lock().await.collect(
                        address,
                        frame_id,
                        idx as usize,
                        total as usize,
                        data,
                    );
                    match assembled {
                        Some(raw) => {
                            current = raw;
                            continue;
                        }
                        None => return,
                    }
                }
                Some("mesh") => {
                    let Some(env_value) = value.get("env").cloned() else {
                        return;
                    };
                    let Ok(env) = serde_json::from_value::<Envelope>(env_value) else {
                        return;
                    };
                    self.process_envelope(env, Some(address.to_string())).await;
                    return;
                }
                _ => return,
            }
        }
    }

    async fn process_envelope(&self, env: Envelope, incoming_addr: Option<String>) {
        if matches!(self.store.has_seen(&env.msg_id), Ok(true)) {
            return;
        }
        if let Err(err) = self.store.mark_seen(&env.msg_id, now_secs()) {
            log::warn!("mark_seen failed: {err}");
            return;
        }

        if let Some(addr) = &incoming_addr {
            self.addr_to_node.lock().insert(addr.clone(), env.from.clone());
            self.node_to_addr.lock().insert(env.from.clone(), addr.clone());
            let _ = self.store.update_route(&env.from, &env.from, env.hop + 1, now_secs());
            let _ = self.store.upsert_contact(&env.from, now_secs());
        }

        if matches!(self.store.is_blocked(&env.from), Ok(true)) {
            return;
        }

        let Some(payload) = self.decrypt_envelope(&env).await else {
            return;
        };

        let is_visible = env.is_addressed_to(&self.config.node_id);
        if is_visible && PERSISTABLE_TYPES.contains(&env.msg_type.as_str()) {
            let chat_id = if env.is_broadcast() {
                "broadcast".to_string()
            } else {
                env.from.clone()
            };
            let record = StoredMessage {
                msg_id: env.msg_id.clone(),
                chat_id,
                sender: env.from.clone(),
                recipient: env.to.clone(),
                msg_type: env.msg_type.clone(),
                payload: payload.clone(),
                timestamp: env.timestamp,
                reply_to: env.reply_to.clone(),
                outgoing: false,
            };
            if let Err(err) = self.store.save_message(&record) {
                log::warn!("save_message failed: {err}");
            }
        }

        if is_visible {
            self.dispatch_message(&env, payload).await;
        }
        self.forward_if_needed(&env, incoming_addr.as_deref()).await;
    }

    async fn decrypt_envelope(&self, env: &Envelope) -> Option<serde_json::Value> {
        match env.enc {
            EncMode::None => Some(env.payload.clone()),
            EncMode::Group => {
                let ct = serde_json::from_value(env.payload.clone()).ok()?;
                let plaintext = self
                    .group
                    .lock()
                    .decrypt(&ct, env.msg_id.as_bytes())
                    .ok()?;
                serde_json::from_slice(&plaintext).ok()
            }
            EncMode::Private => {
                let chat_id = if env.from == self.config.node_id {
                    env.to.clone()
                } else {
                    env.from.clone()
                };
                let session = self.sessions.lock().await.get(&chat_id).cloned()?;
                let ct: PrivateCiphertext = serde_json::from_value(env.payload.clone()).ok()?;
                let plaintext = crypto::decrypt_private(
                    &ct,
                    &chat_id,
                    &env.msg_id,
                    &session,
                    env.msg_id.as_bytes(),
                )
                .ok()?;
                serde_json::from_slice(&plaintext).ok()
            }
        }
    }

    async fn dispatch_message(&self, env: &Envelope, payload: serde_json::Value) {
        if env.msg_type == "system" {
            if let Some(kind) = payload.get("kind").and_then(|v| v.as_str()) {
                match kind {
                    "hello" => {
                        let _ = self
                            .event_tx
                            .send(Event::PeerHello {
                                node_id: env.from.clone(),
                                timestamp: env.timestamp,
                            })
                            .await;
                        self.flush_outbox_for(&env.from).await;
                    }
                    "noise_init" => self.on_noise_init(env, &payload).await,
                    "noise_resp" => self.on_noise_resp(env, &payload).await,
                    "reaction" => {
                        let reaction = payload.get("reaction").and_then(|v| v.as_str()).unwrap_or("");
                        let reply_to = env.reply_to.clone().unwrap_or_default();
                        let _ = self.store.add_reaction(&reply_to, &env.from, reaction, now_secs());
                        let _ = self.event_tx.send(Event::Reaction { env: env.clone() }).await;
                    }
                    "typing" => {
                        let chat_id = payload.get("chat_id").and_then(|v| v.as_str()).unwrap_or("");
                        let typing = payload.get("typing").and_then(|v| v.as_bool()).unwrap_or(false);
                        let _ = self.store.set_typing(chat_id, &env.from, typing, now_secs());
                        let _ = self.event_tx.send(Event::Typing { env: env.clone() }).await;
                    }
                    _ => {}
                }
            }
        }
        let mut visible_env = env.clone();
        visible_env.payload = payload;
        let _ = self.event_tx.send(Event::Message { env: visible_env }).await;
    }

    async fn forward_if_needed(&self, original: &Envelope, incoming_addr: Option<&str>) {
        if original.ttl == 0 || original.to == self.config.node_id {
            return;
        }
        let mut forwarded = original.clone();
        forwarded.ttl -= 1;
        forwarded.hop += 1;
        if forwarded.ttl == 0 {
            return;
        }
        self.send_envelope_raw(&forwarded, incoming_addr).await;
    }

    // ---- send path ----

    pub async fn send_text(
        &self,
        to: &str,
        text: &str,
        reply_to: Option<String>,
    ) -> Result<Envelope, MeshError> {
        self.send_payload(to, "text", serde_json::Value::String(text.to_string()), reply_to, None)
            .await
    }

    pub async fn send_typing(&self, chat_id: &str, to: &str, is_typing: bool) {
        let payload = serde_json::json!({"kind": "typing", "chat_id": chat_id, "typing": is_typing});
        let encrypted = to == "*";
        let _ = self.send_system(to, payload, encrypted).await;
    }

    pub async fn send_reaction(&self, to: &str, msg_id: &str, reaction: &str) -> Result<Envelope, MeshError> {
        let payload = serde_json::json!({"kind": "reaction", "reaction": reaction});
        self.send_payload(to, "system", payload, Some(msg_id.to_string()), None)
            .await
    }

    pub async fn send_system(
        &self,
        to: &str,
        payload: serde_json::Value,
        encrypted: bool,
    ) -> Result<Envelope, MeshError> {
        self.send_payload(to, "system", payload, None, Some(encrypted)).await
    }

    pub async fn send_file(
        &self,
        to: &str,
        file_name: &str,
        data: &[u8],
        as_image: bool,
    ) -> Result<Vec<Envelope>, MeshError> {
        if data.len() > self.config.max_file_bytes {
            return Err(MeshError::FileTooLarge(data.len(), self.config.max_file_bytes));
        }
        let chunk_payload_bytes = (self.config.packet_size_limit * 2).max(64);
        let parts = crate::helpers::chunk_bytes(data, chunk_payload_bytes);
        let total = parts.len();
        let mut envelopes = Vec::with_capacity(total);
        let msg_type = if as_image { "image" } else { "file" };
        for (i, part) in parts.into_iter().enumerate() {
            let payload = serde_json::json!({
                "name": file_name,
                "mime": msg_type,
                "chunk_index": i,
                "chunk_total": total,
                "data": to_b64(&part),
            });
            envelopes.push(self.send_payload(to, msg_type, payload, None, None).await?);
        }
        Ok(envelopes)
    }

    pub async fn start_private_chat(&self, peer_node_id: &str) {
        let (pub_b64, pending) = crypto::initiate();
        self.pending_handshakes
            .lock()
            .await
            .insert(peer_node_id.to_string(), pending);
        let payload = serde_json::json!({"kind": "noise_init", "pub": pub_b64});
        let _ = self.send_system(peer_node_id, payload, false).await;
    }

    async fn on_noise_init(&self, env: &Envelope, payload: &serde_json::Value) {
        let Some(init_pub) = payload.get("pub").and_then(|v| v.as_str()) else {
            return;
        };
        let Ok((resp_pub, session)) = crypto::respond(init_pub) else {
            return;
        };
        let chat_id = env.from.clone();
        self.sessions.lock().await.insert(chat_id.clone(), session.clone());
        if let Ok(value) = serde_json::to_value(&session) {
            let _ = self.store.set_chat_key(&chat_id, &value, now_secs());
        }
        let resp_payload = serde_json::json!({"kind": "noise_resp", "pub": resp_pub});
        let _ = self.send_system(&chat_id, resp_payload, false).await;
    }

    async fn on_noise_resp(&self, env: &Envelope, payload: &serde_json::Value) {
        let chat_id = env.from.clone();
        let Some(pending) = self.pending_handshakes.lock().await.remove(&chat_id) else {
            return;
        };
        let Some(resp_pub) = payload.get("pub").and_then(|v| v.as_str()) else {
            return;
        };
        let Ok(session) = crypto::finalize(pending, resp_pub) else {
            return;
        };
        self.sessions.lock().await.insert(chat_id.clone(), session.clone());
        if let Ok(value) = serde_json::to_value(&session) {
            let _ = self.store.set_chat_key(&chat_id, &value, now_secs());
        }
    }

    async fn send_payload(
        &self,
        to: &str,
        msg_type: &str,
        payload: serde_json::Value,
        reply_to: Option<String>,
        encrypted: Option<bool>,
    ) -> Result<Envelope, MeshError> {
        let mut envelope = Envelope {
            msg_id: random_id_128(),
            from: self.config.node_id.clone(),
            to: to.to_string(),
            ttl: self.default_ttl.load(Ordering::Relaxed),
            hop: 0,
            timestamp: now_secs(),
            msg_type: msg_type.to_string(),
            enc: EncMode::None,
            payload: payload.clone(),
            reply_to: reply_to.clone(),
        };

        let should_encrypt = encrypted.unwrap_or(true);
        if !should_encrypt {
            envelope.enc = EncMode::None;
        } else if to == "*" {
            envelope.enc = EncMode::Group;
            let normalized = normalize_payload(&payload);
            let plaintext = compact_json(&normalized)?;
            let ct = self
                .group
                .lock()
                .encrypt(&plaintext, envelope.msg_id.as_bytes())?;
            envelope.payload = serde_json::to_value(ct)?;
        } else {
            envelope.enc = EncMode::Private;
            let session = self.sessions.lock().await.get(to).cloned();
            match session {
                None => {
                    self.start_private_chat(to).await;
                    let env_value = serde_json::to_value(&envelope)?;
                    self.store.enqueue_outbox(to, &env_value, now_secs())?;
                    return Ok(envelope);
                }
                Some(session) => {
                    let normalized = normalize_payload(&payload);
                    let plaintext = compact_json(&normalized)?;
                    let ct = crypto::encrypt_private(
                        &plaintext,
                        to,
                        &envelope.msg_id,
                        &session,
                        envelope.msg_id.as_bytes(),
                    )?;
                    envelope.payload = serde_json::to_value(ct)?;
                }
            }
        }

        let chat_id = if to == "*" { "broadcast".to_string() } else { to.to_string() };
        let record = StoredMessage {
            msg_id: envelope.msg_id.clone(),
            chat_id,
            sender: envelope.from.clone(),
            recipient: envelope.to.clone(),
            msg_type: envelope.msg_type.clone(),
            payload,
            timestamp: envelope.timestamp,
            reply_to,
            outgoing: true,
        };
        self.store.save_message(&record)?;
        self.send_envelope_raw(&envelope, None).await;
        Ok(envelope)
    }

    async fn send_envelope_raw(&self, envelope: &Envelope, exclude_addr: Option<&str>) {
        let frame = Frame::Mesh { env: envelope.clone() };
        let Ok(raw) = compact_json(&frame) else { return };

        if raw.len() <= self.config.packet_size_limit {
            self.send_frame(&raw, envelope, exclude_addr).await;
            return;
        }

        let frame_id = random_id_128();
        let b64 = to_b64(&raw);
        let chunk_len = (self.config.packet_size_limit.saturating_sub(FRAGMENT_PREAMBLE_BYTES))
            .max(MIN_FRAGMENT_CHARS);
        let chunks = crate::helpers::chunk_str(&b64, chunk_len);
        let total = chunks.len();
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let frag = Frame::Frag {
                frame_id: frame_id.clone(),
                idx,
                total,
                data: chunk,
            };
            if let Ok(raw_frag) = compact_json(&frag) {
                self.send_frame(&raw_frag, envelope, exclude_addr).await;
            }
        }
    }

    async fn send_frame(&self, frame: &[u8], envelope: &Envelope, exclude_addr: Option<&str>) {
        let to = envelope.to.as_str();
        if to != "*" && to != self.config.node_id {
            let via_node = self.store.get_route(to).ok().flatten().map(|r| r.via_node);
            let addr = via_node
                .and_then(|via| self.node_to_addr.lock().get(&via).cloned())
                .or_else(|| self.node_to_addr.lock().get(to).cloned());

            if let Some(addr) = addr {
                if Some(addr.as_str()) != exclude_addr && self.transport.send_to(&addr, frame).await {
                    return;
                }
            }
            if let Ok(value) = serde_json::to_value(envelope) {
                let _ = self.store.enqueue_outbox(to, &value, now_secs());
            }
            return;
        }

        if let Some(exclude) = exclude_addr {
            for addr in self.transport.connected_addresses() {
                if addr == exclude {
                    continue;
                }
                self.transport.send_to(&addr, frame).await;
            }
        } else {
            self.transport.send_to_all(frame).await;
        }
    }

    async fn flush_outbox_for(&self, node_id: &str) {
        let pending: Vec<OutboxItem> = match self.store.dequeue_outbox_for(node_id, OUTBOX_DRAIN_LIMIT) {
            Ok(items) => items,
            Err(err) => {
                log::warn!("dequeue_outbox_for failed: {err}");
                return;
            }
        };
        if pending.is_empty() {
            return;
        }
        let mut delivered = Vec::with_capacity(pending.len());
        for item in pending {
            if let Ok(env) = serde_json::from_value::<Envelope>(item.envelope) {
                self.send_envelope_raw(&env, None).await;
            }
            delivered.push(item.id);
        }
        if let Err(err) = self.store.delete_outbox_ids(&delivered) {
            log::warn!("delete_outbox_ids failed: {err}");
        }
    }
}

fn normalize_payload(payload: &serde_json::Value) -> serde_json::Value {
    if payload.is_object() {
        payload.clone()
    } else {
        serde_json::json!({ "text": payload })
    }
}
