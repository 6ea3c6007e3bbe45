//! The coordinator: owns Store, Crypto, Transport, and the mesh engine,
//! runs them on the Tokio runtime, and exposes a non-blocking `dispatch`
//! safe to call from a UI thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::{Config, StorageRoot};
use crate::error::MeshError;
use crate::mesh::{Event, ExportFormat, MeshEngine, MeshEngineConfig};
use crate::store::Store;
use crate::transport::{BleTransport, MeshTransport, TransportConfig};

const MIN_AUTOSAVE_SECS: u64 = 5;
const ACTION_CHANNEL_CAPACITY: usize = 256;
const TRANSPORT_EVENT_CHANNEL_CAPACITY: usize = 256;
const UI_EVENT_CHANNEL_CAPACITY: usize = 256;

/// UI-originated operations, routed through [`Coordinator::dispatch`].
#[derive(Debug, Clone)]
pub enum Action {
    SendText { to: String, text: String },
    SendFile { to: String, path: PathBuf, as_image: bool },
    Typing { chat_id: String, to: String, is_typing: bool },
    Reaction { to: String, msg_id: String, reaction: String },
    Search { chat_id: String, term: String },
    LoadHistory { chat_id: String },
    Export { chat_id: String, fmt: ExportFormat },
    ReloadConfig,
    ClearHistory,
}

pub struct Coordinator {
    config: SyncMutex<Config>,
    config_path: PathBuf,
    export_dir: PathBuf,
    store: Arc<Store>,
    transport: Arc<BleTransport>,
    mesh: Arc<MeshEngine>,
    action_tx: mpsc::Sender<Action>,
    action_rx: AsyncMutex<Option<mpsc::Receiver<Action>>>,
    tasks: SyncMutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    pub async fn new(
        config: Config,
        storage_root: StorageRoot,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Event>), MeshError> {
        let store = Arc::new(Store::open(&storage_root.db_path(), config.seen_lru_limit)?);

        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_EVENT_CHANNEL_CAPACITY);
        let transport = BleTransport::new(
            TransportConfig {
                scan_interval_sec: config.scan_interval_sec,
                scan_window_sec: config.scan_window_sec,
                max_connections: config.max_connections,
            },
            transport_tx,
        )
        .await
        .map_err(MeshError::from)?;

        let (event_tx, event_rx) = mpsc::channel(UI_EVENT_CHANNEL_CAPACITY);
        let mesh = MeshEngine::new(
            MeshEngineConfig {
                node_id: config.node_id.clone(),
                packet_size_limit: config.packet_size_limit,
                default_ttl: config.ttl_default,
                max_file_bytes: config.max_inline_file_bytes,
            },
            Arc::clone(&store),
            Arc::clone(&transport) as Arc<dyn MeshTransport>,
            &config.group_passphrase,
            event_tx,
        );

        let (action_tx, action_rx) = mpsc::channel(ACTION_CHANNEL_CAPACITY);

        let coordinator = Arc::new(Self {
            config_path: storage_root.config_path(),
            export_dir: storage_root.exports_dir(),
            config: SyncMutex::new(config),
            store,
            transport,
            mesh,
            action_tx,
            action_rx: AsyncMutex::new(Some(action_rx)),
            tasks: SyncMutex::new(Vec::new()),
        });

        coordinator.spawn_transport_bridge(transport_rx);
        Ok((coordinator, event_rx))
    }

    fn spawn_transport_bridge(self: &Arc<Self>, mut transport_rx: mpsc::Receiver<crate::transport::TransportEvent>) {
        let mesh = Arc::clone(&self.mesh);
        let handle = tokio::spawn(async move {
            while let Some(event) = transport_rx.recv().await {
                mesh.handle_transport_event(event).await;
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Start the transport scan loop, the mesh engine (hello beacon,
    /// session restore), the action loop, and the autosave loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), MeshError> {
        self.transport.start();
        self.mesh.start().await?;

        let action_rx = self
            .action_rx
            .lock()
            .await
            .take()
            .expect("start called more than once");
        let this = Arc::clone(self);
        let action_handle = tokio::spawn(async move { this.run_action_loop(action_rx).await });

        let this = Arc::clone(self);
        let autosave_handle = tokio::spawn(async move { this.autosave_loop().await });

        self.tasks.lock().push(action_handle);
        self.tasks.lock().push(autosave_handle);
        Ok(())
    }

    /// Direct read/write access to the Store for administrative queries
    /// (contact list, blocking) that have no corresponding [`Action`].
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Non-blocking: enqueue an action for the engine to process. Safe to
    /// call from any thread.
    pub fn dispatch(&self, action: Action) {
        if self.action_tx.try_send(action).is_err() {
            log::warn!("action channel full or closed; dropping dispatch");
        }
    }

    async fn run_action_loop(self: Arc<Self>, mut action_rx: mpsc::Receiver<Action>) {
        while let Some(action) = action_rx.recv().await {
            if let Err(err) = self.handle_action(action).await {
                log::warn!("action failed: {err}");
            }
        }
    }

    async fn handle_action(&self, action: Action) -> Result<(), MeshError> {
        match action {
            Action::SendText { to, text } => {
                self.mesh.send_text(&to, &text, None).await?;
            }
            Action::SendFile { to, path, as_image } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "file".to_string());
                let data = std::fs::read(&path).map_err(|e| MeshError::Config(e.to_string()))?;
                self.mesh.send_file(&to, &name, &data, as_image).await?;
            }
            Action::Typing { chat_id, to, is_typing } => {
                self.mesh.send_typing(&chat_id, &to, is_typing).await;
            }
            Action::Reaction { to, msg_id, reaction } => {
                self.mesh.send_reaction(&to, &msg_id, &reaction).await?;
            }
            Action::Search { chat_id, term } => {
                let rows = self.mesh.search_chat(&chat_id, &term).await?;
                let _ = self
                    .mesh_event_sender()
                    .send(Event::SearchResults(rows))
                    .await;
            }
            Action::LoadHistory { chat_id } => {
                let rows = self.store.get_chat_messages(&chat_id, 200)?;
                let _ = self.mesh_event_sender().send(Event::History(rows)).await;
            }
            Action::Export { chat_id, fmt } => {
                let out = self.mesh.export_chat(&chat_id, fmt, &self.export_dir).await?;
                let _ = self
                    .mesh_event_sender()
                    .send(Event::Toast(format!("Exported: {}", out.display())))
                    .await;
            }
            Action::ReloadConfig => {
                let reloaded = Config::load(&self.config_path).map_err(|e| MeshError::Config(e.to_string()))?;
                self.mesh.update_group_passphrase(&reloaded.group_passphrase);
                self.mesh.update_default_ttl(reloaded.ttl_default);
                self.transport.update_tuning(
                    reloaded.scan_interval_sec,
                    reloaded.scan_window_sec,
                    reloaded.max_connections,
                );
                *self.config.lock() = reloaded;
            }
            Action::ClearHistory => {
                self.store.clear_history()?;
            }
        }
        Ok(())
    }

    fn mesh_event_sender(&self) -> mpsc::Sender<Event> {
        self.mesh.event_sender_handle()
    }

    async fn autosave_loop(self: Arc<Self>) {
        loop {
            let interval = self.config.lock().autosave_sec.max(MIN_AUTOSAVE_SECS);
            tokio::time::sleep(Duration::from_secs(interval)).await;
            let config = self.config.lock().clone();
            if let Err(err) = config.save(&self.config_path) {
                log::warn!("autosave config write failed: {err}");
            }
        }
    }

    pub async fn shutdown(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        self.mesh.stop().await;
        let config = self.config.lock().clone();
        if let Err(err) = config.save(&self.config_path) {
            log::warn!("shutdown config save failed: {err}");
        }
        self.transport.stop().await;
    }
}
