#![forbid(unsafe_code)]

pub mod kv;
pub mod mirror;
pub mod repository;
pub mod sqlite;

pub use kv::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
pub use mirror::LocalMirror;
pub use repository::{
    CompletionStore, CompletionWrite, InMemoryRepository, ProgressStore, Storage, StorageError,
};
