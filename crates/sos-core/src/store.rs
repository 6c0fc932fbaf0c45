//! Snapshot persistence
//!
//! A session snapshot is two entries in a scoped key-value store: the state
//! tag under [`STATE_KEY`] and the serialized record under [`SESSION_KEY`].
//! Both are written on every adoption and erased together on reset.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::types::{EmergencySession, SessionState};

/// Key holding the state tag
pub const STATE_KEY: &str = "emergencyState";
/// Key holding the serialized session record
pub const SESSION_KEY: &str = "activeEmergencyContext";

/// Scoped string key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> SessionResult<Option<String>>;
    async fn set(&self, key: &str, value: String) -> SessionResult<()>;
    /// Removing a missing key is not an error
    async fn remove(&self, key: &str) -> SessionResult<()>;
}

/// Process-local store, shared between clones
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> SessionResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> SessionResult<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> SessionResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// One file per key under a directory.
///
/// Writes go to a temporary sibling that is then renamed over the target, so
/// a crash never leaves a half-written entry.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> SessionResult<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> SessionResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> SessionResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Typed access to the persisted `{state, session}` pair
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<dyn KeyValueStore>,
}

impl SnapshotStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    pub async fn save(&self, state: SessionState, session: &EmergencySession) -> SessionResult<()> {
        let blob = serde_json::to_string(session)?;
        self.inner.set(SESSION_KEY, blob).await?;
        self.inner.set(STATE_KEY, state.as_str().to_string()).await?;
        debug!(state = %state, session_id = ?session.id, "Persisted session snapshot");
        Ok(())
    }

    /// Load the saved pair.
    ///
    /// A partial or undecodable snapshot is erased and reported as absent.
    pub async fn load(&self) -> SessionResult<Option<(SessionState, EmergencySession)>> {
        let state = self.inner.get(STATE_KEY).await?;
        let session = self.inner.get(SESSION_KEY).await?;

        let (state, session) = match (state, session) {
            (None, None) => return Ok(None),
            (Some(state), Some(session)) => (state, session),
            _ => {
                warn!("Discarding partial session snapshot");
                self.clear().await?;
                return Ok(None);
            }
        };

        match decode(&state, &session) {
            Ok(pair) => Ok(Some(pair)),
            Err(e) => {
                warn!(error = %e, "Discarding undecodable session snapshot");
                self.clear().await?;
                Ok(None)
            }
        }
    }

    pub async fn clear(&self) -> SessionResult<()> {
        self.inner.remove(STATE_KEY).await?;
        self.inner.remove(SESSION_KEY).await?;
        Ok(())
    }
}

fn decode(state: &str, session: &str) -> SessionResult<(SessionState, EmergencySession)> {
    let state: SessionState = state.trim().parse()?;
    let session: EmergencySession =
        serde_json::from_str(session).map_err(|e| SessionError::serialization(e.to_string()))?;
    Ok((state, session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceOrigin;
    use chrono::{TimeZone, Utc};

    fn sample_session() -> EmergencySession {
        let mut session =
            EmergencySession::provisional(7, "device-a", DeviceOrigin::Companion, "SAFETY", "BUTTON_HOLD");
        session.id = Some(31);
        session.state = SessionState::Recovering;
        session.initiation_time = Some(Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap());
        session.activation_time = Some(Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 2).unwrap());
        session.last_location_update = Some(Utc.with_ymd_and_hms(2026, 5, 4, 12, 1, 0).unwrap());
        session.latitude = Some(47.6062);
        session.longitude = Some(-122.3321);
        session.contacts_notified = true;
        session.recovery_attempts = 2;
        session
    }

    #[tokio::test]
    async fn test_persist_restore_round_trip() {
        let kv = MemoryStore::new();
        let store = SnapshotStore::new(Arc::new(kv.clone()));
        let session = sample_session();

        store.save(SessionState::Recovering, &session).await.unwrap();
        assert_eq!(kv.get(STATE_KEY).await.unwrap().as_deref(), Some("RECOVERING"));

        let (state, restored) = store.load().await.unwrap().unwrap();
        assert_eq!(state, SessionState::Recovering);
        assert_eq!(restored, session);

        store.clear().await.unwrap();
        assert!(kv.is_empty());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_erased() {
        let kv = MemoryStore::new();
        kv.set(STATE_KEY, "ACTIVE".to_string()).await.unwrap();
        kv.set(SESSION_KEY, "{not json".to_string()).await.unwrap();

        let store = SnapshotStore::new(Arc::new(kv.clone()));
        assert!(store.load().await.unwrap().is_none());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_partial_snapshot_is_erased() {
        let kv = MemoryStore::new();
        kv.set(STATE_KEY, "PENDING".to_string()).await.unwrap();

        let store = SnapshotStore::new(Arc::new(kv.clone()));
        assert!(store.load().await.unwrap().is_none());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let session = sample_session();

        let store = SnapshotStore::new(Arc::new(FileStore::new(dir.path().join("state"))));
        store.save(SessionState::Active, &session).await.unwrap();
        drop(store);

        let reopened = SnapshotStore::new(Arc::new(FileStore::new(dir.path().join("state"))));
        let (state, restored) = reopened.load().await.unwrap().unwrap();
        assert_eq!(state, SessionState::Active);
        assert_eq!(restored, session);

        reopened.clear().await.unwrap();
        reopened.clear().await.unwrap();
        assert!(!dir.path().join("state").join("emergencyState.json").exists());
    }
}
