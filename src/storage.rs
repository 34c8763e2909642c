//! Shared key/value store used by the session monitor.
//!
//! This is the cross-tab contract: every console window (tab, process)
//! reads and writes the same keys, and a change made by any writer is
//! broadcast to every subscriber, the writer included. Consumers must
//! tolerate self-delivery and last-write-wins races; the session monitor
//! does (one-shot logout guard, forward-only activity updates).

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

/// Auth token written by the console's auth provider; the monitor only
/// reads it to decide whether to activate.
pub const AUTH_TOKEN_KEY: &str = "warden.auth_token";
/// Last user-activity timestamp, Unix millis as a decimal string.
pub const LAST_ACTIVITY_KEY: &str = "warden.session.last_activity";
/// Session-start timestamp, Unix millis as a decimal string.
pub const SESSION_START_KEY: &str = "warden.session.start";
/// Logout-event record, JSON `{"at": <ms>, "reason": "..."}`. A broadcast
/// signal, not a queue: only the latest write matters.
pub const LOGOUT_EVENT_KEY: &str = "warden.session.logout_event";

/// A single key change, delivered to all subscribers of a store.
#[derive(Debug, Clone)]
pub struct StoreChange {
    pub key: String,
    /// `None` when the key was removed.
    pub value: Option<String>,
}

/// Shared persistent key/value store with change notifications.
pub trait SharedStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    /// Subscribe to changes from any writer, this one included.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Parse a persisted timestamp. Absent, non-numeric, or non-positive
/// values are all "unset".
pub fn parse_timestamp(value: Option<&str>) -> Option<i64> {
    let parsed: i64 = value?.trim().parse().ok()?;
    (parsed > 0).then_some(parsed)
}

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// In-memory store. Clones share the same map and change channel, so two
/// monitors holding clones of one `MemoryStore` behave like two tabs of
/// the same origin.
#[derive(Clone)]
pub struct MemoryStore {
    map: Arc<RwLock<HashMap<String, String>>>,
    tx: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            map: Arc::new(RwLock::new(HashMap::new())),
            tx,
        }
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.map.write().insert(key.to_string(), value.to_string());
        // Send only fails when nobody is subscribed, which is fine.
        let _ = self.tx.send(StoreChange {
            key: key.to_string(),
            value: Some(value.to_string()),
        });
    }

    fn remove(&self, key: &str) {
        self.map.write().remove(key);
        let _ = self.tx.send(StoreChange {
            key: key.to_string(),
            value: None,
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.tx.subscribe()
    }
}

/// File-backed store: one JSON object per file, written atomically
/// (temp-then-rename). Tracking therefore survives restarts, and a
/// background poll task surfaces writes made by other processes as change
/// notifications. Must be constructed inside a tokio runtime.
pub struct FileStore {
    inner: Arc<FileInner>,
    poller: JoinHandle<()>,
}

struct FileInner {
    path: PathBuf,
    map: RwLock<HashMap<String, String>>,
    tx: broadcast::Sender<StoreChange>,
}

impl FileStore {
    /// Default foreign-write poll cadence.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_poll_interval(path, Self::DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(path: impl Into<PathBuf>, poll: Duration) -> Self {
        let path = path.into();
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let inner = Arc::new(FileInner {
            map: RwLock::new(load_map(&path)),
            path,
            tx,
        });

        let poll_inner = Arc::clone(&inner);
        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                poll_inner.sync_from_disk();
            }
        });

        Self { inner, poller }
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

impl SharedStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.map.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.inner.write_through(key, Some(value));
    }

    fn remove(&self, key: &str) {
        self.inner.write_through(key, None);
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.tx.subscribe()
    }
}

impl FileInner {
    /// Read-modify-write the whole file. Concurrent writers race with
    /// last-write-wins semantics, which the session contract tolerates.
    fn write_through(&self, key: &str, value: Option<&str>) {
        let mut map = load_map(&self.path);
        match value {
            Some(v) => {
                map.insert(key.to_string(), v.to_string());
            }
            None => {
                map.remove(key);
            }
        }
        persist_map(&self.path, &map);
        *self.map.write() = map;
        let _ = self.tx.send(StoreChange {
            key: key.to_string(),
            value: value.map(str::to_string),
        });
    }

    /// Diff the on-disk map against the cached one and broadcast every
    /// difference as a change.
    fn sync_from_disk(&self) {
        let disk = load_map(&self.path);
        let mut changes = Vec::new();
        {
            let mut cached = self.map.write();
            for (key, value) in &disk {
                if cached.get(key) != Some(value) {
                    changes.push(StoreChange {
                        key: key.clone(),
                        value: Some(value.clone()),
                    });
                }
            }
            for key in cached.keys() {
                if !disk.contains_key(key) {
                    changes.push(StoreChange {
                        key: key.clone(),
                        value: None,
                    });
                }
            }
            *cached = disk;
        }
        for change in changes {
            let _ = self.tx.send(change);
        }
    }
}

fn load_map(path: &Path) -> HashMap<String, String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&content) else {
        return HashMap::new();
    };
    obj.into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            _ => None,
        })
        .collect()
}

fn persist_map(path: &Path, map: &HashMap<String, String>) {
    let Ok(content) = serde_json::to_string(map) else {
        return;
    };
    let tmp = path.with_extension("tmp");
    if let Err(e) = std::fs::write(&tmp, content).and_then(|()| std::fs::rename(&tmp, path)) {
        warn!("could not persist session store to {}: {}", path.display(), e);
    }
}
