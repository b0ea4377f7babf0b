use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// An item the assistant can reason about: an email, a note, a task. The
/// engine treats items as opaque records supplied by whatever source is
/// plugged in behind `ItemSource`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub source: String,
    pub received_at: DateTime<Utc>,
}

/// Something a user (or an agent acting for them) can do to an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    Archive,
    MarkRead,
    Flag,
}

/// Seam between the engine and the user's actual data. Background jobs pull
/// items through this trait and never talk to a provider directly, so tests
/// and local setups can swap in a canned source.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Most recent items first, at most `limit`.
    async fn fetch_items(&self, limit: usize) -> Result<Vec<Item>>;

    async fn apply_action(&self, item_id: &str, action: ItemAction) -> Result<()>;
}

/// In-process source backed by a plain list. The default wiring until a real
/// connector is configured, and the fixture source in tests.
#[derive(Default)]
pub struct MemoryItemSource {
    items: Mutex<Vec<Item>>,
    actions: Mutex<Vec<(String, ItemAction)>>,
}

impl MemoryItemSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, item: Item) {
        self.items.lock().await.push(item);
    }

    pub async fn applied_actions(&self) -> Vec<(String, ItemAction)> {
        self.actions.lock().await.clone()
    }
}

#[async_trait]
impl ItemSource for MemoryItemSource {
    async fn fetch_items(&self, limit: usize) -> Result<Vec<Item>> {
        let items = self.items.lock().await;
        let mut out: Vec<Item> = items.iter().cloned().collect();
        out.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn apply_action(&self, item_id: &str, action: ItemAction) -> Result<()> {
        let known = self
            .items
            .lock()
            .await
            .iter()
            .any(|item| item.id == item_id);
        anyhow::ensure!(known, "unknown item: {}", item_id);
        self.actions.lock().await.push((item_id.to_string(), action));
        Ok(())
    }
}
