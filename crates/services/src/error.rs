//! Shared error types for the services crate.

use thiserror::Error;

use learn_core::model::{CompletionSummary, QuizError};
use storage::repository::StorageError;

/// Why a durable write did not land. Never shown to the learner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("durable store unavailable: {0}")]
    NetworkUnavailable(#[source] StorageError),
    #[error("local mirror write failed: {0}")]
    Mirror(#[source] StorageError),
}

/// Errors emitted by `QuizCompletionTracker`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackerError {
    /// Expected outcome, not a fault: show the stored score instead of the quiz.
    #[error("quiz already completed ({0})")]
    AlreadyCompleted(CompletionSummary),
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while reading configuration from the environment.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got {raw:?}")]
    InvalidNumber { var: &'static str, raw: String },
    #[error("{var} is not a valid URL: {raw:?}")]
    InvalidUrl { var: &'static str, raw: String },
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
