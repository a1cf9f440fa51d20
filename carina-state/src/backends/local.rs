//! Local file backend for state storage
//!
//! State lives in a JSON file (default `carina.state.json`) next to a
//! `.lock` file. Writes go to a temporary sibling that is renamed over the
//! state file, so a crash never leaves a half-written state behind.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateFile;

pub struct LocalBackend {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalBackend {
    pub const DEFAULT_STATE_FILE: &'static str = "carina.state.json";

    pub fn new() -> Self {
        Self::with_path(PathBuf::from(Self::DEFAULT_STATE_FILE))
    }

    /// Lock file is the state path with a `.lock` extension
    pub fn with_path(state_path: PathBuf) -> Self {
        let lock_path = state_path.with_extension("lock");
        Self {
            state_path,
            lock_path,
        }
    }

    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let path = config
            .get_string("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_STATE_FILE));
        Ok(Self::with_path(path))
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        match std::fs::read_to_string(&self.lock_path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|source| BackendError::InvalidState {
                    path: self.lock_path.clone(),
                    source,
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::io(&self.lock_path, e)),
        }
    }

    /// Create the lock file, failing if it already exists
    fn create_lock(&self, lock: &LockInfo) -> BackendResult<bool> {
        let content = serde_json::to_string_pretty(lock)?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path);
        match file {
            Ok(mut file) => {
                file.write_all(content.as_bytes())
                    .map_err(|e| BackendError::io(&self.lock_path, e))?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(BackendError::io(&self.lock_path, e)),
        }
    }

    fn remove_lock(&self) -> BackendResult<()> {
        std::fs::remove_file(&self.lock_path).map_err(|e| BackendError::io(&self.lock_path, e))
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        let content = match std::fs::read_to_string(&self.state_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackendError::io(&self.state_path, e)),
        };
        let state = serde_json::from_str(&content).map_err(|source| BackendError::InvalidState {
            path: self.state_path.clone(),
            source,
        })?;
        Ok(Some(state))
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        if let Some(stored) = self.read_state().await? {
            if stored.lineage != state.lineage {
                return Err(BackendError::LineageMismatch {
                    expected: stored.lineage,
                    actual: state.lineage.clone(),
                });
            }
            if state.serial <= stored.serial {
                return Err(BackendError::StaleSerial {
                    stored: stored.serial,
                    attempted: state.serial,
                });
            }
        }

        let content = serde_json::to_string_pretty(state)?;
        let tmp_path = self.state_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(|e| BackendError::io(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &self.state_path)
            .map_err(|e| BackendError::io(&self.state_path, e))?;
        log::debug!(
            "Wrote state serial {} to {}",
            state.serial,
            self.state_path.display()
        );
        Ok(())
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        let lock = LockInfo::new(operation);
        if self.create_lock(&lock)? {
            return Ok(lock);
        }

        match self.read_lock()? {
            Some(existing) if !existing.is_expired() => Err(BackendError::locked(&existing)),
            existing => {
                if let Some(stale) = existing {
                    log::warn!(
                        "Taking over expired lock {} held by {} since {}",
                        stale.id,
                        stale.owner,
                        stale.created
                    );
                }
                self.remove_lock()?;
                if self.create_lock(&lock)? {
                    Ok(lock)
                } else {
                    match self.read_lock()? {
                        Some(winner) => Err(BackendError::locked(&winner)),
                        None => Err(BackendError::LockNotFound(lock.id)),
                    }
                }
            }
        }
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        let existing = self
            .read_lock()?
            .ok_or_else(|| BackendError::LockNotFound(lock.id.clone()))?;
        if existing.id != lock.id {
            return Err(BackendError::LockMismatch {
                expected: lock.id.clone(),
                actual: existing.id,
            });
        }
        self.remove_lock()
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        let existing = self
            .read_lock()?
            .ok_or_else(|| BackendError::LockNotFound(lock_id.to_string()))?;
        if existing.id != lock_id {
            return Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            });
        }
        self.remove_lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn backend_in(dir: &Path) -> LocalBackend {
        LocalBackend::with_path(dir.join("carina.state.json"))
    }

    #[tokio::test]
    async fn state_round_trips_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());
        assert!(backend.read_state().await.unwrap().is_none());

        let mut state = StateFile::new();
        state.increment_serial();
        backend.write_state(&state).await.unwrap();

        let read = backend.read_state().await.unwrap().unwrap();
        assert_eq!(read.serial, 1);
        assert_eq!(read.lineage, state.lineage);
        assert!(!dir.path().join("carina.state.json.tmp").exists());
    }

    #[tokio::test]
    async fn writes_must_advance_serial_and_keep_lineage() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());

        let mut state = StateFile::new();
        state.increment_serial();
        backend.write_state(&state).await.unwrap();

        let result = backend.write_state(&state).await;
        assert!(matches!(result, Err(BackendError::StaleSerial { stored: 1, attempted: 1 })));

        let mut foreign = StateFile::new();
        foreign.serial = 5;
        let result = backend.write_state(&foreign).await;
        assert!(matches!(result, Err(BackendError::LineageMismatch { .. })));
    }

    #[tokio::test]
    async fn second_lock_is_refused_until_released() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());
        assert_eq!(backend.lock_path(), dir.path().join("carina.state.lock"));

        let lock = backend.acquire_lock("apply").await.unwrap();
        let err = backend.acquire_lock("destroy").await.unwrap_err();
        assert!(matches!(err, BackendError::Locked { ref operation, .. } if operation == "apply"));

        backend.release_lock(&lock).await.unwrap();
        let again = backend.acquire_lock("destroy").await.unwrap();
        assert_eq!(again.operation, "destroy");
    }

    #[tokio::test]
    async fn expired_lock_is_taken_over() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());
        let stale = LockInfo::with_timeout("apply", -60);
        assert!(backend.create_lock(&stale).unwrap());

        let lock = backend.acquire_lock("plan").await.unwrap();
        assert_ne!(lock.id, stale.id);
    }

    #[tokio::test]
    async fn releasing_someone_elses_lock_fails() {
        let dir = tempdir().unwrap();
        let backend = backend_in(dir.path());
        let held = backend.acquire_lock("apply").await.unwrap();
        let other = LockInfo::new("apply");

        assert!(matches!(
            backend.release_lock(&other).await,
            Err(BackendError::LockMismatch { .. })
        ));
        assert!(matches!(
            backend.force_unlock("nope").await,
            Err(BackendError::LockMismatch { .. })
        ));
        backend.force_unlock(&held.id).await.unwrap();
        assert!(backend.read_lock().unwrap().is_none());
    }

    #[test]
    fn path_comes_from_backend_block() {
        let config: BackendConfig =
            serde_json::from_value(serde_json::json!({"type": "local", "path": "custom.state.json"}))
                .unwrap();
        let backend = LocalBackend::from_config(&config).unwrap();
        assert_eq!(backend.state_path(), Path::new("custom.state.json"));
        assert_eq!(
            LocalBackend::from_config(&BackendConfig::default()).unwrap().state_path(),
            Path::new("carina.state.json")
        );
    }
}
