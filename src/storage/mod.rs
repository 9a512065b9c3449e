//! Storage layer for the module engine
//!
//! Persists the catalog (modules and variants), tenant assignments and
//! pre-archive backups. Supports multiple database backends via feature flags
//! (redb, sled) plus an in-memory backend.

pub mod assignments;
pub mod backups;
pub mod catalog;
pub mod database;

use anyhow::Result;
use database::{create_database, default_backend, fallback_backend, Database, DatabaseBackend};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Separator for composite keys; ids never contain NUL
pub(crate) const KEY_SEPARATOR: u8 = 0;

/// Upper bound on optimistic read-modify-write loops inside a store
pub(crate) const MAX_CAS_SPINS: usize = 16;

/// Build `a \0 b`
pub(crate) fn composite_key(a: &str, b: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(a.len() + b.len() + 1);
    key.extend_from_slice(a.as_bytes());
    key.push(KEY_SEPARATOR);
    key.extend_from_slice(b.as_bytes());
    key
}

/// Prefix matching every composite key whose first component is `a`
pub(crate) fn composite_prefix(a: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(a.len() + 1);
    key.extend_from_slice(a.as_bytes());
    key.push(KEY_SEPARATOR);
    key
}

/// Rows are JSON so that opaque config documents survive unchanged
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// A decoded row together with the exact bytes it was read from
///
/// The raw bytes are the `expected` value for a later compare-and-swap.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub raw: Vec<u8>,
}

impl<T: DeserializeOwned> Versioned<T> {
    pub(crate) fn decode(raw: Vec<u8>) -> Result<Self> {
        let value = decode(&raw)?;
        Ok(Self { value, raw })
    }
}

/// Storage manager that coordinates all stores
pub struct Storage {
    db: Arc<dyn Database>,
    catalog: Arc<catalog::CatalogStore>,
    assignments: Arc<assignments::AssignmentStore>,
    backups: Arc<backups::BackupStore>,
}

impl Storage {
    /// Create a new storage instance with default backend
    ///
    /// Attempts to use the default backend (redb), and gracefully falls back
    /// to sled if redb fails and sled is available.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let default = default_backend();

        match Self::with_backend(data_dir.as_ref(), default) {
            Ok(storage) => Ok(storage),
            Err(e) => {
                if let Some(fallback_backend) = fallback_backend(default) {
                    warn!(
                        "Failed to initialize {:?} backend: {}. Falling back to {:?}.",
                        default, e, fallback_backend
                    );
                    info!(
                        "Attempting to initialize storage with fallback backend: {:?}",
                        fallback_backend
                    );
                    Self::with_backend(data_dir, fallback_backend)
                } else {
                    Err(anyhow::anyhow!(
                        "Failed to initialize {:?} backend: {}. No fallback backend available.",
                        default,
                        e
                    ))
                }
            }
        }
    }

    /// Create a new storage instance with specified backend
    pub fn with_backend<P: AsRef<Path>>(data_dir: P, backend: DatabaseBackend) -> Result<Self> {
        let db: Arc<dyn Database> = Arc::from(create_database(data_dir, backend)?);
        Self::from_database(db)
    }

    /// Ephemeral storage, nothing touches disk
    pub fn in_memory() -> Result<Self> {
        Self::with_backend("", DatabaseBackend::Memory)
    }

    /// Build the stores over an existing database handle
    pub fn from_database(db: Arc<dyn Database>) -> Result<Self> {
        let catalog = Arc::new(catalog::CatalogStore::new(Arc::clone(&db))?);
        let assignments = Arc::new(assignments::AssignmentStore::new(Arc::clone(&db))?);
        let backups = Arc::new(backups::BackupStore::new(Arc::clone(&db))?);

        Ok(Self {
            db,
            catalog,
            assignments,
            backups,
        })
    }

    /// Get the catalog store
    pub fn catalog(&self) -> Arc<catalog::CatalogStore> {
        Arc::clone(&self.catalog)
    }

    /// Get the assignment store
    pub fn assignments(&self) -> Arc<assignments::AssignmentStore> {
        Arc::clone(&self.assignments)
    }

    /// Get the backup store
    pub fn backups(&self) -> Arc<backups::BackupStore> {
        Arc::clone(&self.backups)
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_keys_do_not_collide_on_prefix() {
        let key = composite_key("acme", "m1");
        assert!(key.starts_with(&composite_prefix("acme")));
        assert!(!composite_key("acmex", "m1").starts_with(&composite_prefix("acme")));
    }

    #[test]
    fn test_versioned_keeps_raw_bytes() {
        let raw = encode(&serde_json::json!({"a": 1})).unwrap();
        let versioned: Versioned<serde_json::Value> = Versioned::decode(raw.clone()).unwrap();
        assert_eq!(versioned.raw, raw);
        assert_eq!(versioned.value["a"], 1);
    }
}
