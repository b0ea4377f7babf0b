use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::provider::ChatMessage;

/// Deterministic cache key over the normalized generation input.
pub fn cache_key(model: &str, template_id: &str, messages: &[ChatMessage]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0]);
    hasher.update(template_id.as_bytes());
    for m in messages {
        hasher.update([0]);
        hasher.update(m.role.as_bytes());
        hasher.update([0]);
        hasher.update(m.content.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// TTL-bounded response cache. Entries are never mutated in place, only
/// replaced; a read past `expires_at` is a miss. Entry count is additionally
/// bounded with FIFO eviction on overflow.
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        match state.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                // Drop the key from the eviction order too, or a later
                // re-insert of the same key would queue a duplicate and the
                // overflow check could evict the live entry under capacity.
                state.entries.remove(key);
                state.order.retain(|k| k != key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, value: String) {
        let mut state = self.state.lock().unwrap();
        if !state.entries.contains_key(&key) {
            state.order.push_back(key.clone());
        }
        state.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
        while state.order.len() > self.max_entries {
            if let Some(oldest) = state.order.pop_front() {
                state.entries.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }
}
