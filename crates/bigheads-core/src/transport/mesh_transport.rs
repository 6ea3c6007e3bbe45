//! The narrow surface the mesh engine needs from a transport: push bytes to
//! one peer or all of them, and know who's currently reachable. [`BleTransport`]
//! is the only production implementation; tests substitute an in-memory one.

use async_trait::async_trait;

use super::BleTransport;

#[async_trait]
pub trait MeshTransport: Send + Sync {
    async fn send_to(&self, address: &str, packet: &[u8]) -> bool;
    async fn send_to_all(&self, packet: &[u8]);
    fn connected_addresses(&self) -> Vec<String>;
}

#[async_trait]
impl MeshTransport for BleTransport {
    async fn send_to(&self, address: &str, packet: &[u8]) -> bool {
        BleTransport::send_to(self, address, packet).await
    }

    async fn send_to_all(&self, packet: &[u8]) {
        BleTransport::send_to_all(self, packet).await
    }

    fn connected_addresses(&self) -> Vec<String> {
        BleTransport::connected_addresses(self)
    }
}
