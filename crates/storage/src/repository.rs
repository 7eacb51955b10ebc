use async_trait::async_trait;
use learn_core::model::{ModuleId, ProgressDelta, ProgressRecord, QuizCompletion, QuizId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    /// The durable store could not be reached or answered with a failure.
    #[error("durable store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("malformed record at {key}: {reason}")]
    Malformed { key: String, reason: String },
}

impl StorageError {
    /// True for failures a client should absorb by falling back to its cache.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Connection(_))
    }
}

/// Outcome of writing a quiz completion.
///
/// A second write for the same (user, quiz) is not an error: the store hands
/// back the completion it already holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionWrite {
    Created(QuizCompletion),
    Existing(QuizCompletion),
}

impl CompletionWrite {
    #[must_use]
    pub fn completion(&self) -> &QuizCompletion {
        match self {
            CompletionWrite::Created(c) | CompletionWrite::Existing(c) => c,
        }
    }

    #[must_use]
    pub fn into_completion(self) -> QuizCompletion {
        match self {
            CompletionWrite::Created(c) | CompletionWrite::Existing(c) => c,
        }
    }

    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(self, CompletionWrite::Created(_))
    }
}

/// Authoritative per-user unlock progress.
///
/// Implementations must merge concurrent writes to one key (max threshold,
/// union of completed sections). Last-writer-wins loses progress.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Fetch the stored record, `None` if the user never touched the module.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn fetch_progress(
        &self,
        user: UserId,
        module: ModuleId,
    ) -> Result<Option<ProgressRecord>, StorageError>;

    /// Merge `delta` into the stored record and return the merged value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn merge_progress(
        &self,
        user: UserId,
        module: ModuleId,
        delta: &ProgressDelta,
    ) -> Result<ProgressRecord, StorageError>;

    /// Overwrite the record with the reset value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn reset_progress(
        &self,
        user: UserId,
        module: ModuleId,
    ) -> Result<ProgressRecord, StorageError>;
}

/// Authoritative quiz completions, at most one per (user, quiz).
#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn get_completion(
        &self,
        user: UserId,
        quiz: QuizId,
    ) -> Result<Option<QuizCompletion>, StorageError>;

    /// Insert unless a completion already exists, in which case the existing
    /// one is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn record_completion(
        &self,
        user: UserId,
        completion: &QuizCompletion,
    ) -> Result<CompletionWrite, StorageError>;
}

/// Simple in-memory durable store for testing and prototyping.
///
/// `set_available(false)` makes every call fail with `StorageError::Unavailable`,
/// which is how tests simulate a dropped network.
#[derive(Clone)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<HashMap<(UserId, ModuleId), ProgressRecord>>>,
    completions: Arc<Mutex<HashMap<(UserId, QuizId), QuizCompletion>>>,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            progress: Arc::new(Mutex::new(HashMap::new())),
            completions: Arc::new(Mutex::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of completions held, across all users.
    #[must_use]
    pub fn completion_count(&self) -> usize {
        self.completions.lock().map_or(0, |guard| guard.len())
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("in-memory store offline".into()))
        }
    }
}

#[async_trait]
impl ProgressStore for InMemoryRepository {
    async fn fetch_progress(
        &self,
        user: UserId,
        module: ModuleId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        self.ensure_available()?;
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(user, module)).cloned())
    }

    async fn merge_progress(
        &self,
        user: UserId,
        module: ModuleId,
        delta: &ProgressDelta,
    ) -> Result<ProgressRecord, StorageError> {
        self.ensure_available()?;
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let record = guard.entry((user, module)).or_default();
        record.apply(delta);
        Ok(record.clone())
    }

    async fn reset_progress(
        &self,
        user: UserId,
        module: ModuleId,
    ) -> Result<ProgressRecord, StorageError> {
        self.ensure_available()?;
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let record = ProgressRecord::reset();
        guard.insert((user, module), record.clone());
        Ok(record)
    }
}

#[async_trait]
impl CompletionStore for InMemoryRepository {
    async fn get_completion(
        &self,
        user: UserId,
        quiz: QuizId,
    ) -> Result<Option<QuizCompletion>, StorageError> {
        self.ensure_available()?;
        let guard = self
            .completions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(user, quiz)).cloned())
    }

    async fn record_completion(
        &self,
        user: UserId,
        completion: &QuizCompletion,
    ) -> Result<CompletionWrite, StorageError> {
        self.ensure_available()?;
        let mut guard = self
            .completions
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let key = (user, completion.quiz_id());
        if let Some(existing) = guard.get(&key) {
            return Ok(CompletionWrite::Existing(existing.clone()));
        }
        guard.insert(key, completion.clone());
        Ok(CompletionWrite::Created(completion.clone()))
    }
}

/// Aggregates the durable stores behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressStore>,
    pub completions: Arc<dyn CompletionStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: ProgressStore + CompletionStore + Clone + 'static,
    {
        let progress: Arc<dyn ProgressStore> = Arc::new(repo.clone());
        let completions: Arc<dyn CompletionStore> = Arc::new(repo);
        Self {
            progress,
            completions,
        }
    }
}
