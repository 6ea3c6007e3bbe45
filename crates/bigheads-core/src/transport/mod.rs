//! Bluetooth LE central transport.

mod manager;
mod mesh_transport;
mod uuids;

pub use manager::{BleTransport, PeerState, TransportConfig, TransportEvent};
pub use mesh_transport::MeshTransport;
pub use uuids::{NOTIFY_CHAR_UUID, SERVICE_UUID, WRITE_CHAR_UUID};
