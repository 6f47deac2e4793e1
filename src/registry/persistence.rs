use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{ProctorError, Result};

pub const STATE_KEY: &str = "contest_camera_state";
pub const NAVIGATION_TIME_KEY: &str = "camera_navigation_time";

/// Durable string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Session-scoped storage; lives as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Longer-lived storage: one file per key under a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            ProctorError::storage(format!(
                "Failed to create state directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Snapshot of registry intent written on every persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryState {
    pub is_active: bool,
    pub contest_id: Option<String>,
    pub timestamp: i64,
    pub stream_active: bool,
}

impl RegistryState {
    pub fn is_fresh(&self, now_ms: i64, window: Duration) -> bool {
        let age = now_ms - self.timestamp;
        age >= 0 && (age as u128) < window.as_millis()
    }

    /// Only an active, fresh record may be adopted.
    pub fn is_adoptable(&self, now_ms: i64, window: Duration) -> bool {
        self.is_active && self.is_fresh(now_ms, window)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Writes registry state to a session-scoped and a longer-lived store.
#[derive(Clone)]
pub struct PersistenceChannel {
    session: Arc<dyn KeyValueStore>,
    local: Arc<dyn KeyValueStore>,
}

impl PersistenceChannel {
    pub fn new(session: Arc<dyn KeyValueStore>, local: Arc<dyn KeyValueStore>) -> Self {
        Self { session, local }
    }

    /// Both stores in memory; nothing survives the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub fn save(&self, state: &RegistryState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        self.local.set(STATE_KEY, &json)?;
        self.session.set(STATE_KEY, &json)?;
        Ok(())
    }

    /// Session store first, then the longer-lived one. Unreadable or
    /// malformed entries count as absent.
    pub fn load(&self) -> Option<RegistryState> {
        [&self.session, &self.local]
            .into_iter()
            .find_map(|store| Self::read_state(store.as_ref()))
    }

    fn read_state(store: &dyn KeyValueStore) -> Option<RegistryState> {
        let raw = match store.get(STATE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read camera state");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed camera state");
                None
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        let local = self.local.remove(STATE_KEY);
        let session = self.session.remove(STATE_KEY);
        let navigation = self.session.remove(NAVIGATION_TIME_KEY);
        local.and(session).and(navigation)
    }

    pub fn record_navigation(&self, now_ms: i64) -> Result<()> {
        self.session.set(NAVIGATION_TIME_KEY, &now_ms.to_string())
    }

    pub fn last_navigation(&self) -> Option<i64> {
        self.session
            .get(NAVIGATION_TIME_KEY)
            .ok()
            .flatten()
            .and_then(|raw| raw.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(300);

    fn state(is_active: bool, timestamp: i64) -> RegistryState {
        RegistryState {
            is_active,
            contest_id: Some("42".to_string()),
            timestamp,
            stream_active: true,
        }
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let json = serde_json::to_string(&state(true, 1_000)).unwrap();
        assert!(json.contains("\"isActive\":true"));
        assert!(json.contains("\"contestId\":\"42\""));
        assert!(json.contains("\"streamActive\":true"));
        assert!(json.contains("\"timestamp\":1000"));
    }

    #[test]
    fn test_freshness_window() {
        let now = 10_000_000;
        assert!(state(true, now - 1_000).is_adoptable(now, WINDOW));
        assert!(!state(true, now - 300_000).is_adoptable(now, WINDOW));
        assert!(!state(false, now).is_adoptable(now, WINDOW));
        assert!(!state(true, now + 60_000).is_fresh(now, WINDOW));
    }

    #[test]
    fn test_session_store_takes_precedence() {
        let session = Arc::new(MemoryStore::new());
        let local = Arc::new(MemoryStore::new());
        let channel = PersistenceChannel::new(session.clone(), local.clone());

        local
            .set(STATE_KEY, &serde_json::to_string(&state(true, 1)).unwrap())
            .unwrap();
        assert_eq!(channel.load().unwrap().timestamp, 1);

        session
            .set(STATE_KEY, &serde_json::to_string(&state(true, 2)).unwrap())
            .unwrap();
        assert_eq!(channel.load().unwrap().timestamp, 2);
    }

    #[test]
    fn test_malformed_entry_falls_back() {
        let session = Arc::new(MemoryStore::new());
        let local = Arc::new(MemoryStore::new());
        let channel = PersistenceChannel::new(session.clone(), local.clone());

        session.set(STATE_KEY, "{not json").unwrap();
        assert!(channel.load().is_none());

        local
            .set(STATE_KEY, &serde_json::to_string(&state(true, 5)).unwrap())
            .unwrap();
        assert_eq!(channel.load().unwrap().timestamp, 5);
    }

    #[test]
    fn test_clear_removes_everything() {
        let channel = PersistenceChannel::in_memory();
        channel.save(&state(true, 1)).unwrap();
        channel.record_navigation(99).unwrap();
        assert_eq!(channel.last_navigation(), Some(99));

        channel.clear().unwrap();
        assert!(channel.load().is_none());
        assert!(channel.last_navigation().is_none());

        channel.clear().unwrap();
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("proctor-state-{}", uuid::Uuid::new_v4()));
        let store = FileStore::new(&dir).unwrap();

        assert_eq!(store.get(STATE_KEY).unwrap(), None);
        store.set(STATE_KEY, "{\"isActive\":true}").unwrap();
        assert_eq!(
            store.get(STATE_KEY).unwrap().as_deref(),
            Some("{\"isActive\":true}")
        );
        assert!(dir.join("contest_camera_state.json").exists());

        store.remove(STATE_KEY).unwrap();
        store.remove(STATE_KEY).unwrap();
        assert_eq!(store.get(STATE_KEY).unwrap(), None);

        std::fs::remove_dir_all(dir).ok();
    }
}
