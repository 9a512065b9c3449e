//! Module backup storage
//!
//! Pre-archive restoration records. Rows are removed only through
//! `remove_if_unchanged`, so two sweeps racing on the same row delete it once.

use crate::module::types::ModuleBackup;
use crate::storage::database::{Database, Tree};
use crate::storage::{decode, encode, Versioned};
use anyhow::Result;
use std::sync::Arc;
use tracing::warn;

/// Backup storage manager
pub struct BackupStore {
    backups: Arc<dyn Tree>, // backup_id -> ModuleBackup
}

impl BackupStore {
    /// Create a new backup store
    pub fn new(db: Arc<dyn Database>) -> Result<Self> {
        let backups = Arc::from(db.open_tree("module_backups")?);
        Ok(Self { backups })
    }

    /// Store a backup
    pub fn insert(&self, backup: &ModuleBackup) -> Result<()> {
        self.backups.insert(backup.id.as_bytes(), &encode(backup)?)
    }

    /// Get a backup by id
    pub fn get(&self, id: &str) -> Result<Option<ModuleBackup>> {
        if let Some(data) = self.backups.get(id.as_bytes())? {
            Ok(Some(decode(&data)?))
        } else {
            Ok(None)
        }
    }

    /// Snapshot of every backup row with its bytes
    ///
    /// Rows that fail to decode are skipped with a warning.
    pub fn list(&self) -> Result<Vec<Versioned<ModuleBackup>>> {
        let mut rows = Vec::new();
        for item in self.backups.iter() {
            let (key, data) = item?;
            match Versioned::decode(data) {
                Ok(row) => rows.push(row),
                Err(e) => warn!(
                    "Skipping undecodable backup row {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        Ok(rows)
    }

    /// Backups taken of one implementation variant
    pub fn list_for_implementation(&self, implementation_id: &str) -> Result<Vec<ModuleBackup>> {
        Ok(self
            .list()?
            .into_iter()
            .map(|row| row.value)
            .filter(|backup| backup.implementation_id == implementation_id)
            .collect())
    }

    /// Delete a row only if it still holds the bytes that were read.
    /// Returns false when another writer got there first.
    pub fn remove_if_unchanged(&self, row: &Versioned<ModuleBackup>) -> Result<bool> {
        self.backups
            .compare_and_swap(row.value.id.as_bytes(), Some(&row.raw), None)
    }

    /// Get total number of backup rows
    pub fn backup_count(&self) -> Result<usize> {
        self.backups.len()
    }
}
