//! Registry mapping connected drone ids to their outbound send handle, so
//! the matcher and heartbeat timer can reach a drone's connection without
//! owning it.

use super::connection::SessionHandle;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub struct ConnectionRegistry {
    handles: RwLock<HashMap<String, SessionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, drone_id: String, handle: SessionHandle) {
        self.handles.write().await.insert(drone_id, handle);
    }

    pub async fn unregister(&self, drone_id: &str) {
        self.handles.write().await.remove(drone_id);
    }

    pub async fn get(&self, drone_id: &str) -> Option<SessionHandle> {
        self.handles.read().await.get(drone_id).cloned()
    }

    pub async fn connected_ids(&self) -> Vec<String> {
        self.handles.read().await.keys().cloned().collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::{TcpListener, TcpStream};

    async fn test_handle() -> SessionHandle {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept, connect) = tokio::join!(listener.accept(), connect);
        let (stream, peer_addr) = accept.unwrap();
        let _ = connect.unwrap();
        let (_conn, handle) = super::super::connection::Connection::new(stream, peer_addr);
        let _: SocketAddr = handle.addr;
        handle
    }

    #[tokio::test]
    async fn register_then_get_roundtrips() {
        let registry = ConnectionRegistry::new();
        let handle = test_handle().await;
        registry.register("D1".into(), handle).await;
        assert!(registry.get("D1").await.is_some());
        registry.unregister("D1").await;
        assert!(registry.get("D1").await.is_none());
    }
}
