//! Typed access to the local mirror.
//!
//! The mirror is a best-effort copy of durable state. Entries that fail to
//! parse are logged, deleted, and reported as absent so callers regenerate
//! them from defaults.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use learn_core::model::{
    Identity, MirrorSchemaError, ModuleId, ProgressMirrorEntry, QuizId, QuizMirrorEntry,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::kv::KeyValueStore;
use crate::repository::StorageError;

/// Process-wide typed view over a [`KeyValueStore`].
///
/// Read-modify-write cycles on one key are serialized so two writers never
/// interleave partial updates of the same record. Per-key locks live only
/// while some writer holds or waits on them.
#[derive(Clone)]
pub struct LocalMirror {
    store: Arc<dyn KeyValueStore>,
    scope: String,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LocalMirror {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, identity: Identity) -> Self {
        Self {
            store,
            scope: identity.mirror_scope(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn progress_key(&self, module: ModuleId) -> String {
        format!("{}.progress.{module}", self.scope)
    }

    #[must_use]
    pub fn quiz_key(&self, quiz: QuizId) -> String {
        format!("{}.quiz.{quiz}", self.scope)
    }

    /// Cached progress for `module`, `None` if missing or malformed.
    #[must_use]
    pub fn load_progress(&self, module: ModuleId) -> Option<ProgressMirrorEntry> {
        let key = self.progress_key(module);
        self.read_entry(&key, ProgressMirrorEntry::upgrade)
    }

    /// Cached quiz state for `quiz`, `None` if missing or malformed.
    #[must_use]
    pub fn load_quiz(&self, quiz: QuizId) -> Option<QuizMirrorEntry> {
        let key = self.quiz_key(quiz);
        self.read_entry(&key, |entry: QuizMirrorEntry| entry.upgrade(quiz))
    }

    /// Serialized read-modify-write of a module's entry.
    ///
    /// `f` sees the current entry (or `None`) and may replace or clear it.
    /// The store is only written when the entry actually changed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the key lock is poisoned or the write fails.
    pub fn update_progress<R>(
        &self,
        module: ModuleId,
        f: impl FnOnce(&mut Option<ProgressMirrorEntry>) -> R,
    ) -> Result<R, StorageError> {
        let key = self.progress_key(module);
        self.update_entry(&key, ProgressMirrorEntry::upgrade, f)
    }

    /// Serialized read-modify-write of a quiz's entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the key lock is poisoned or the write fails.
    pub fn update_quiz<R>(
        &self,
        quiz: QuizId,
        f: impl FnOnce(&mut Option<QuizMirrorEntry>) -> R,
    ) -> Result<R, StorageError> {
        let key = self.quiz_key(quiz);
        self.update_entry(&key, |entry: QuizMirrorEntry| entry.upgrade(quiz), f)
    }

    fn key_lock(&self, key: &str) -> Result<Arc<Mutex<()>>, StorageError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        // Entries nobody holds or waits on.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(Arc::clone(locks.entry(key.to_owned()).or_default()))
    }

    fn read_entry<T>(
        &self,
        key: &str,
        upgrade: impl FnOnce(T) -> Result<T, MirrorSchemaError>,
    ) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let raw = match self.store.get(key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key, error = %err, "local mirror read failed");
                return None;
            }
        };

        let parsed = serde_json::from_str::<T>(&raw)
            .map_err(|e| e.to_string())
            .and_then(|entry| upgrade(entry).map_err(|e| e.to_string()));

        match parsed {
            Ok(entry) => Some(entry),
            Err(reason) => {
                let err = StorageError::Malformed {
                    key: key.to_owned(),
                    reason,
                };
                warn!(error = %err, "discarding malformed local mirror entry");
                if let Err(remove_err) = self.store.remove(key) {
                    warn!(key, error = %remove_err, "failed to remove malformed entry");
                }
                None
            }
        }
    }

    fn update_entry<T, R>(
        &self,
        key: &str,
        upgrade: impl FnOnce(T) -> Result<T, MirrorSchemaError>,
        f: impl FnOnce(&mut Option<T>) -> R,
    ) -> Result<R, StorageError>
    where
        T: Serialize + DeserializeOwned + PartialEq + Clone,
    {
        let lock = self.key_lock(key)?;
        let _guard = lock
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let before = self.read_entry(key, upgrade);
        let mut current = before.clone();
        let out = f(&mut current);

        if current != before {
            match &current {
                Some(entry) => {
                    let raw = serde_json::to_string(entry)
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    self.store.set(key, &raw)?;
                    debug!(key, "local mirror entry written");
                }
                None => self.store.remove(key)?,
            }
        }

        Ok(out)
    }
}
