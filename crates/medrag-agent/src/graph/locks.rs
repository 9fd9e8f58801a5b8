use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Per-conversation async locks.
///
/// Turns on the same conversation id run one at a time in arrival order;
/// different ids never contend. An entry is removed as soon as no turn holds
/// or waits on it.
#[derive(Default, Clone)]
pub struct ConversationLocks {
    entries: Registry,
}

/// Held for the duration of a turn. Dropping it releases the lock.
pub struct ConversationGuard {
    key: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    entries: Registry,
}

/// A queued `acquire`. Prunes the entry if the wait is cancelled.
struct Waiting {
    key: String,
    lock: Option<Arc<AsyncMutex<()>>>,
    entries: Registry,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, conversation_id: &str) -> ConversationGuard {
        let lock = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let mut waiting = Waiting {
            key: conversation_id.to_string(),
            lock: Some(lock.clone()),
            entries: self.entries.clone(),
        };
        let guard = lock.lock_owned().await;
        waiting.lock.take();
        let lock = OwnedMutexGuard::mutex(&guard).clone();

        ConversationGuard {
            key: waiting.key.clone(),
            lock,
            guard: Some(guard),
            entries: self.entries.clone(),
        }
    }

    /// Number of conversations with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remove `key` when the registry and `lock` are its only owners.
fn prune(entries: &Registry, key: &str, lock: &Arc<AsyncMutex<()>>) {
    let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
    if Arc::strong_count(lock) == 2 {
        if let Some(existing) = entries.get(key) {
            if Arc::ptr_eq(existing, lock) {
                entries.remove(key);
            }
        }
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        self.guard.take();
        prune(&self.entries, &self.key, &self.lock);
    }
}

impl Drop for Waiting {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            prune(&self.entries, &self.key, &lock);
        }
    }
}
