#![forbid(unsafe_code)]

pub mod app_services;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod gate_service;
pub mod http_store;
pub mod lifetime;
pub mod quiz_tracker;
pub mod reconciler;
pub mod single_flight;

pub use learn_core::Clock;

pub use app_services::AppServices;
pub use collaborators::{Catalog, IdentityProvider, QuizPlacement, StaticCatalog, StaticIdentity};
pub use config::SyncConfig;
pub use error::{AppServicesError, ConfigError, SyncError, TrackerError};
pub use gate_service::GateService;
pub use http_store::HttpProgressStore;
pub use lifetime::{AttentionSignal, AttentionSubscription, ViewLifetime};
pub use quiz_tracker::{AttemptStart, QuizCompletionTracker};
pub use reconciler::{PushOutcome, RefreshHandle, SyncReconciler};
