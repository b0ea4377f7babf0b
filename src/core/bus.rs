use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

/// Wire shape shared by outbound notifications and inbound client commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub id: Uuid,
}

/// Live-notification fan-out. Each subscriber gets its own channel, so
/// delivery order per subscriber matches publish order and one dead or slow
/// client never affects the rest. No backlog is kept: events published while
/// a client is disconnected are lost by design.
pub struct NotificationBus {
    connections: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Envelope>>>,
}

impl NotificationBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::new()),
        })
    }

    pub async fn subscribe(&self) -> (ConnectionHandle, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let mut connections = self.connections.lock().await;
        connections.insert(id, tx);
        info!("Bus subscriber connected ({} total)", connections.len());
        (ConnectionHandle { id }, rx)
    }

    pub async fn unsubscribe(&self, handle: ConnectionHandle) {
        let mut connections = self.connections.lock().await;
        if connections.remove(&handle.id).is_some() {
            info!("Bus subscriber disconnected ({} total)", connections.len());
        }
    }

    /// Best-effort delivery to every live handle. A failed send means the
    /// receiver is gone; that handle is unregistered and the rest continue.
    pub async fn publish(&self, envelope: Envelope) {
        let mut connections = self.connections.lock().await;
        let mut dead = Vec::new();
        for (id, tx) in connections.iter() {
            if tx.send(envelope.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            connections.remove(&id);
            debug!("Pruned dead bus subscriber {}", id);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }
}
