//! Versioned response cache for offline support.
//!
//! This module owns the cache generations:
//! - Normalizes requests into storage keys
//! - Persists response snapshots per named generation (SQLite)
//! - Installs a generation atomically from the precache manifest
//! - Activates one generation and purges every other

mod key;
mod lifecycle;
mod manifest;
mod storage;

pub use key::RequestKey;
pub use lifecycle::{ActivationReport, Lifecycle};
pub use manifest::PrecacheManifest;
pub use storage::{CacheStorage, GenerationInfo, GenerationState, SqliteStorage};
