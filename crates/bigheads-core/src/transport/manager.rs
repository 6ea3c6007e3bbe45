//! BLE central transport: scans for peers advertising the service UUID,
//! connects to up to `max_connections` of them, and shuttles raw frame
//! bytes in and out over the write/notify characteristics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use super::uuids::{NOTIFY_CHAR_UUID, SERVICE_UUID, WRITE_CHAR_UUID};
use crate::error::TransportError;
use crate::helpers::now_secs;

#[derive(Debug, Clone, PartialEq)]
pub struct PeerState {
    pub address: String,
    pub name: String,
    pub connected: bool,
    pub last_seen: f64,
}

#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeersChanged(Vec<PeerState>),
    PacketReceived { address: String, data: Vec<u8> },
}

struct ConnectedPeer {
    peripheral: Peripheral,
    write_char: Characteristic,
}

/// Tuning knobs lifted straight from [`crate::config::Config`].
pub struct TransportConfig {
    pub scan_interval_sec: f64,
    pub scan_window_sec: f64,
    pub max_connections: usize,
}

pub struct BleTransport {
    adapter: Adapter,
    scan_interval_sec: AtomicU64,
    scan_window_sec: AtomicU64,
    max_connections: AtomicUsize,
    peers: SyncMutex<HashMap<String, PeerState>>,
    clients: AsyncMutex<HashMap<String, ConnectedPeer>>,
    connect_locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    write_lock: AsyncMutex<()>,
    running: AtomicBool,
    scan_task: SyncMutex<Option<JoinHandle<()>>>,
    event_tx: mpsc::Sender<TransportEvent>,
}

impl BleTransport {
    pub async fn new(
        config: TransportConfig,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<Self>, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::AdapterNotFound)?;

        Ok(Arc::new(Self {
            adapter,
            scan_interval_sec: AtomicU64::new(config.scan_interval_sec.to_bits()),
            scan_window_sec: AtomicU64::new(config.scan_window_sec.to_bits()),
            max_connections: AtomicUsize::new(config.max_connections),
            peers: SyncMutex::new(HashMap::new()),
            clients: AsyncMutex::new(HashMap::new()),
            connect_locks: SyncMutex::new(HashMap::new()),
            write_lock: AsyncMutex::new(()),
            running: AtomicBool::new(false),
            scan_task: SyncMutex::new(None),
            event_tx,
        }))
    }

    pub fn connected_addresses(&self) -> Vec<String> {
        self.clients
            .try_lock()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply newly reloaded tuning knobs. Takes effect on the scan loop's
    /// next iteration; no restart needed.
    pub fn update_tuning(&self, scan_interval_sec: f64, scan_window_sec: f64, max_connections: usize) {
        self.scan_interval_sec.store(scan_interval_sec.to_bits(), Ordering::Relaxed);
        self.scan_window_sec.store(scan_window_sec.to_bits(), Ordering::Relaxed);
        self.max_connections.store(max_connections, Ordering::Relaxed);
    }

    fn scan_interval_sec(&self) -> f64 {
        f64::from_bits(self.scan_interval_sec.load(Ordering::Relaxed))
    }

    fn scan_window_sec(&self) -> f64 {
        f64::from_bits(self.scan_window_sec.load(Ordering::Relaxed))
    }

    fn max_connections(&self) -> usize {
        self.max_connections.load(Ordering::Relaxed)
    }

    /// Spawn the background scan loop. `self` must be held in an `Arc` so
    /// the loop can outlive the caller.
    pub fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.scan_loop().await });
        *self.scan_task.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.scan_task.lock().take() {
            handle.abort();
        }
        let addresses: Vec<String> = self.clients.lock().await.keys().cloned().collect();
        for address in addresses {
            self.disconnect(&address).await;
        }
    }

    pub async fn send_to_all(&self, packet: &[u8]) {
        if packet.is_empty() {
            return;
        }
        let _guard = self.write_lock.lock().await;
        let addresses: Vec<String> = self.clients.lock().await.keys().cloned().collect();
        for address in addresses {
            let write_result = {
                let clients = self.clients.lock().await;
                match clients.get(&address) {
                    Some(peer) => {
                        peer.peripheral
                            .write(&peer.write_char, packet, WriteType::WithoutResponse)
                            .await
                    }
                    None => continue,
                }
            };
            if let Err(err) = write_result {
                log::warn!("write failed to {address}: {err}");
                self.disconnect(&address).await;
            }
        }
    }

    pub async fn send_to(&self, address: &str, packet: &[u8]) -> bool {
        let _guard = self.write_lock.lock().await;
        let write_result = {
            let clients = self.clients.lock().await;
            match clients.get(address) {
                Some(peer) => {
                    peer.peripheral
                        .write(&peer.write_char, packet, WriteType::WithoutResponse)
                        .await
                }
                None => return false,
            }
        };
        match write_result {
            Ok(()) => true,
            Err(err) => {
                log::warn!("write failed to {address}: {err}");
                self.disconnect(address).await;
                false
            }
        }
    }

    async fn scan_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let scan_filter = ScanFilter {
                services: vec![SERVICE_UUID],
            };
            if let Err(err) = self.adapter.start_scan(scan_filter).await {
                log::error!("BLE scan failed: {err}");
            } else {
                tokio::time::sleep(Duration::from_secs_f64(self.scan_window_sec())).await;
                let _ = self.adapter.stop_scan().await;
                if let Err(err) = self.handle_scan_results().await {
                    log::error!("handling scan results failed: {err}");
                }
            }

            let interval = self.scan_interval_sec().max(0.5);
            tokio::time::sleep(Duration::from_secs_f64(interval)).await;
        }
    }

    async fn handle_scan_results(&self) -> Result<(), TransportError> {
        let now = now_secs();
        let peripherals = self.adapter.peripherals().await?;
        let mut candidates = Vec::new();

        for peripheral in peripherals {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            if !props.services.iter().any(|uuid| *uuid == SERVICE_UUID) {
                continue;
            }
            let address = peripheral.address().to_string();
            let connected = self.clients.lock().await.contains_key(&address);
            self.peers.lock().insert(
                address.clone(),
                PeerState {
                    address: address.clone(),
                    name: props.local_name.unwrap_or_else(|| "BigHeads Node".to_string()),
                    connected,
                    last_seen: now,
                },
            );
            candidates.push(peripheral);
        }

        self.emit_peers_changed();

        let connected_count = self.clients.lock().await.len();
        let mut slots = self.max_connections().saturating_sub(connected_count);
        for peripheral in candidates {
            if slots == 0 {
                break;
            }
            let address = peripheral.address().to_string();
            if self.clients.lock().await.contains_key(&address) {
                continue;
            }
            if self.connect(peripheral).await {
                slots -= 1;
            }
        }
        Ok(())
    }

    async fn connect(&self, peripheral: Peripheral) -> bool {
        let address = peripheral.address().to_string();
        let lock = {
            let mut locks = self.connect_locks.lock();
            Arc::clone(
                locks
                    .entry(address.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let _guard = lock.lock().await;

        if self.clients.lock().await.contains_key(&address) {
            return true;
        }

        if let Err(err) = self.connect_inner(&peripheral).await {
            log::warn!("connect failed {address}: {err}");
            let _ = peripheral.disconnect().await;
            return false;
        }

        if let Some(peer) = self.peers.lock().get_mut(&address) {
            peer.connected = true;
        }
        self.emit_peers_changed();
        log::info!("connected BLE peer: {address}");
        true
    }

    async fn connect_inner(&self, peripheral: &Peripheral) -> Result<(), TransportError> {
        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let mut write_char = None;
        let mut notify_char = None;
        for service in peripheral.services() {
            if service.uuid != SERVICE_UUID {
                continue;
            }
            for characteristic in service.characteristics {
                if characteristic.uuid == WRITE_CHAR_UUID {
                    write_char = Some(characteristic.clone());
                } else if characteristic.uuid == NOTIFY_CHAR_UUID {
                    notify_char = Some(characteristic.clone());
                }
            }
        }
        let write_char = write_char.ok_or(TransportError::PeerNotFound(
            "write characteristic missing".to_string(),
        ))?;
        let notify_char = notify_char.ok_or(TransportError::PeerNotFound(
            "notify characteristic missing".to_string(),
        ))?;

        peripheral.subscribe(&notify_char).await?;
        let mut notifications = peripheral.notifications().await?;
        let event_tx = self.event_tx.clone();
        let address = peripheral.address().to_string();
        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let _ = event_tx
                    .send(TransportEvent::PacketReceived {
                        address: address.clone(),
                        data: notification.value,
                    })
                    .await;
            }
        });

        self.clients.lock().await.insert(
            peripheral.address().to_string(),
            ConnectedPeer {
                peripheral: peripheral.clone(),
                write_char,
            },
        );
        Ok(())
    }

    async fn disconnect(&self, address: &str) {
        if let Some(peer) = self.clients.lock().await.remove(address) {
            let _ = peer.peripheral.disconnect().await;
        }
        if let Some(peer) = self.peers.lock().get_mut(address) {
            peer.connected = false;
        }
        self.emit_peers_changed();
    }

    fn emit_peers_changed(&self) {
        let snapshot: Vec<PeerState> = self.peers.lock().values().cloned().collect();
        let _ = self.event_tx.try_send(TransportEvent::PeersChanged(snapshot));
    }
}
