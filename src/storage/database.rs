//! Database abstraction layer
//!
//! Provides a unified interface for different database backends (redb, sled, memory).
//! Allows switching between storage engines via feature flags and configuration.

use anyhow::Result;
use std::path::Path;

/// Database abstraction trait
///
/// Provides a unified interface for key-value storage operations
/// that can be implemented by different backends.
pub trait Database: Send + Sync {
    /// Open a named tree/table
    fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>>;

    /// Flush all pending writes
    fn flush(&self) -> Result<()>;
}

/// Tree/Table abstraction trait
///
/// Represents a named collection of key-value pairs within a database.
/// Every single-key write is atomic; `compare_and_swap` is the primitive
/// used for read-modify-write of one row.
pub trait Tree: Send + Sync {
    /// Insert a key-value pair
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove a key-value pair
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Check if a key exists
    fn contains_key(&self, key: &[u8]) -> Result<bool>;

    /// Get number of entries
    fn len(&self) -> Result<usize>;

    /// Check if tree is empty
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Iterate over all key-value pairs in key order
    fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_>;

    /// Iterate over all key-value pairs whose key starts with `prefix`
    fn scan_prefix(
        &self,
        prefix: &[u8],
    ) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
        let prefix = prefix.to_vec();
        Box::new(self.iter().filter(move |item| match item {
            Ok((key, _)) => key.starts_with(&prefix),
            Err(_) => true,
        }))
    }

    /// Atomically replace the value at `key` if it currently equals `expected`
    ///
    /// `expected = None` means "key must be absent" (insert-if-absent),
    /// `new = None` means "remove the key". Returns `false` when the current
    /// value did not match and nothing was written.
    fn compare_and_swap(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool>;
}

/// Database backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Sled,
    Redb,
    Memory,
}

/// Create a database instance based on backend type
pub fn create_database<P: AsRef<Path>>(
    data_dir: P,
    backend: DatabaseBackend,
) -> Result<Box<dyn Database>> {
    match backend {
        #[cfg(feature = "sled")]
        DatabaseBackend::Sled => Ok(Box::new(sled_impl::SledDatabase::new(data_dir)?)),
        #[cfg(not(feature = "sled"))]
        DatabaseBackend::Sled => Err(anyhow::anyhow!(
            "Sled backend not available (feature not enabled)"
        )),
        #[cfg(feature = "redb")]
        DatabaseBackend::Redb => Ok(Box::new(redb_impl::RedbDatabase::new(data_dir)?)),
        #[cfg(not(feature = "redb"))]
        DatabaseBackend::Redb => Err(anyhow::anyhow!(
            "Redb backend not available (feature not enabled)"
        )),
        DatabaseBackend::Memory => {
            let _ = data_dir;
            Ok(Box::new(memory_impl::MemoryDatabase::new()))
        }
    }
}

/// Get default database backend
///
/// Returns the preferred durable backend (redb if available, otherwise sled),
/// and the in-memory backend when neither is compiled in.
pub fn default_backend() -> DatabaseBackend {
    #[cfg(feature = "redb")]
    {
        DatabaseBackend::Redb
    }
    #[cfg(all(not(feature = "redb"), feature = "sled"))]
    {
        DatabaseBackend::Sled
    }
    #[cfg(all(not(feature = "redb"), not(feature = "sled")))]
    {
        DatabaseBackend::Memory
    }
}

/// Get fallback database backend
///
/// Returns an alternative durable backend if the primary fails.
/// Returns None if no fallback is available. Memory is never used as a
/// silent fallback for a durable backend.
pub fn fallback_backend(primary: DatabaseBackend) -> Option<DatabaseBackend> {
    match primary {
        DatabaseBackend::Redb => {
            #[cfg(feature = "sled")]
            {
                Some(DatabaseBackend::Sled)
            }
            #[cfg(not(feature = "sled"))]
            {
                None
            }
        }
        DatabaseBackend::Sled => {
            #[cfg(feature = "redb")]
            {
                Some(DatabaseBackend::Redb)
            }
            #[cfg(not(feature = "redb"))]
            {
                None
            }
        }
        DatabaseBackend::Memory => None,
    }
}

// Sled implementation
#[cfg(feature = "sled")]
mod sled_impl {
    use super::{Database, Tree};
    use anyhow::Result;
    use sled::Db;
    use std::path::Path;
    use std::sync::Arc;

    pub struct SledDatabase {
        db: Arc<Db>,
    }

    impl SledDatabase {
        pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
            let db = sled::open(data_dir.as_ref().join("sled"))?;
            Ok(Self { db: Arc::new(db) })
        }
    }

    impl Database for SledDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let tree = self.db.open_tree(name)?;
            Ok(Box::new(SledTree {
                tree: Arc::new(tree),
            }))
        }

        fn flush(&self) -> Result<()> {
            self.db.flush()?;
            Ok(())
        }
    }

    struct SledTree {
        tree: Arc<sled::Tree>,
    }

    impl Tree for SledTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.tree.insert(key, value)?;
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.tree.get(key)?.map(|v| v.to_vec()))
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            self.tree.remove(key)?;
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            Ok(self.tree.contains_key(key)?)
        }

        fn len(&self) -> Result<usize> {
            Ok(self.tree.len())
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            Box::new(self.tree.iter().map(|item| {
                item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|e| anyhow::anyhow!("Sled iteration error: {}", e))
            }))
        }

        fn scan_prefix(
            &self,
            prefix: &[u8],
        ) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            Box::new(self.tree.scan_prefix(prefix).map(|item| {
                item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|e| anyhow::anyhow!("Sled prefix scan error: {}", e))
            }))
        }

        fn compare_and_swap(
            &self,
            key: &[u8],
            expected: Option<&[u8]>,
            new: Option<&[u8]>,
        ) -> Result<bool> {
            Ok(self.tree.compare_and_swap(key, expected, new)?.is_ok())
        }
    }
}

// Redb implementation
#[cfg(feature = "redb")]
mod redb_impl {
    use super::{Database, Tree};
    use anyhow::Result;
    use redb::{Database as RedbDb, ReadableTable, TableDefinition};
    use std::path::Path;
    use std::sync::Arc;

    // Redb requires static table definitions, so every tree the engine opens is listed here
    static MODULES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("modules");
    static MODULE_SLUGS_TABLE: TableDefinition<&[u8], &[u8]> =
        TableDefinition::new("module_slugs");
    static VARIANTS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("variants");
    static VARIANT_OWNERS_TABLE: TableDefinition<&[u8], &[u8]> =
        TableDefinition::new("variant_owners");
    static VARIANT_KEYS_TABLE: TableDefinition<&[u8], &[u8]> =
        TableDefinition::new("variant_keys");
    static ASSIGNMENTS_TABLE: TableDefinition<&[u8], &[u8]> =
        TableDefinition::new("assignments");
    static MODULE_BACKUPS_TABLE: TableDefinition<&[u8], &[u8]> =
        TableDefinition::new("module_backups");

    static ALL_TABLES: [&TableDefinition<&[u8], &[u8]>; 7] = [
        &MODULES_TABLE,
        &MODULE_SLUGS_TABLE,
        &VARIANTS_TABLE,
        &VARIANT_OWNERS_TABLE,
        &VARIANT_KEYS_TABLE,
        &ASSIGNMENTS_TABLE,
        &MODULE_BACKUPS_TABLE,
    ];

    pub struct RedbDatabase {
        db: Arc<RedbDb>,
    }

    impl RedbDatabase {
        pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
            std::fs::create_dir_all(data_dir.as_ref())?;
            let db_path = data_dir.as_ref().join("modules.redb");
            let db = if db_path.exists() {
                RedbDb::open(&db_path)?
            } else {
                RedbDb::create(&db_path)?
            };

            // Open all tables once so that read transactions never see a missing table
            let write_txn = db.begin_write()?;
            for table in ALL_TABLES.iter() {
                let _ = write_txn.open_table(**table)?;
            }
            write_txn.commit()?;

            Ok(Self { db: Arc::new(db) })
        }

        fn get_table_def(
            &self,
            name: &str,
        ) -> Option<&'static TableDefinition<'static, &'static [u8], &'static [u8]>> {
            match name {
                "modules" => Some(&MODULES_TABLE),
                "module_slugs" => Some(&MODULE_SLUGS_TABLE),
                "variants" => Some(&VARIANTS_TABLE),
                "variant_owners" => Some(&VARIANT_OWNERS_TABLE),
                "variant_keys" => Some(&VARIANT_KEYS_TABLE),
                "assignments" => Some(&ASSIGNMENTS_TABLE),
                "module_backups" => Some(&MODULE_BACKUPS_TABLE),
                _ => None,
            }
        }
    }

    impl Database for RedbDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let table_def = self.get_table_def(name).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown table name: {}. Redb requires pre-defined tables.",
                    name
                )
            })?;

            Ok(Box::new(RedbTree {
                db: Arc::clone(&self.db),
                table_def,
            }))
        }

        fn flush(&self) -> Result<()> {
            // Redb is durable on commit; an empty write transaction forces a sync point
            let write_txn = self.db.begin_write()?;
            write_txn.commit()?;
            Ok(())
        }
    }

    struct RedbTree {
        db: Arc<RedbDb>,
        table_def: &'static TableDefinition<'static, &'static [u8], &'static [u8]>,
    }

    impl Tree for RedbTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(*self.table_def)?;
                table.insert(key, value)?;
            }
            write_txn.commit()?;
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;
            let result = table.get(key)?.map(|v| v.value().to_vec());
            Ok(result)
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(*self.table_def)?;
                table.remove(key)?;
            }
            write_txn.commit()?;
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;
            let result = table.get(key)?.is_some();
            Ok(result)
        }

        fn len(&self) -> Result<usize> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;
            Ok(table.len()? as usize)
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            // The read transaction must outlive the range, so items are collected up front
            let read_txn = match self.db.begin_read() {
                Ok(txn) => txn,
                Err(e) => {
                    return Box::new(std::iter::once(Err(anyhow::anyhow!(
                        "Failed to begin read transaction: {}",
                        e
                    ))));
                }
            };

            let table = match read_txn.open_table(*self.table_def) {
                Ok(tbl) => tbl,
                Err(e) => {
                    return Box::new(std::iter::once(Err(anyhow::anyhow!(
                        "Failed to open table: {}",
                        e
                    ))));
                }
            };

            let mut items = Vec::new();
            match table.range::<&[u8]>(..) {
                Ok(range_iter) => {
                    for item_result in range_iter {
                        match item_result {
                            Ok((key, value)) => {
                                items.push(Ok((key.value().to_vec(), value.value().to_vec())));
                            }
                            Err(e) => {
                                items.push(Err(anyhow::anyhow!("Redb iteration error: {}", e)));
                            }
                        }
                    }
                }
                Err(e) => {
                    items.push(Err(anyhow::anyhow!("Failed to create range: {}", e)));
                }
            }

            Box::new(items.into_iter())
        }

        fn compare_and_swap(
            &self,
            key: &[u8],
            expected: Option<&[u8]>,
            new: Option<&[u8]>,
        ) -> Result<bool> {
            // Redb serializes write transactions, so read-compare-write inside one is atomic
            let write_txn = self.db.begin_write()?;
            let swapped = {
                let mut table = write_txn.open_table(*self.table_def)?;
                let current = table.get(key)?.map(|v| v.value().to_vec());
                if current.as_deref() != expected {
                    false
                } else {
                    match new {
                        Some(value) => {
                            table.insert(key, value)?;
                        }
                        None => {
                            table.remove(key)?;
                        }
                    }
                    true
                }
            };
            write_txn.commit()?;
            Ok(swapped)
        }
    }
}

// In-memory implementation (tests, ephemeral engines)
mod memory_impl {
    use super::{Database, Tree};
    use anyhow::Result;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex, RwLock};

    type Table = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

    pub struct MemoryDatabase {
        trees: Mutex<HashMap<String, Table>>,
    }

    impl MemoryDatabase {
        pub fn new() -> Self {
            Self {
                trees: Mutex::new(HashMap::new()),
            }
        }
    }

    impl Database for MemoryDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let mut trees = self
                .trees
                .lock()
                .map_err(|_| anyhow::anyhow!("Memory database lock poisoned"))?;
            let table = trees
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())));
            Ok(Box::new(MemoryTree {
                table: Arc::clone(table),
            }))
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    struct MemoryTree {
        table: Table,
    }

    impl MemoryTree {
        fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
            self.table
                .read()
                .map_err(|_| anyhow::anyhow!("Memory tree lock poisoned"))
        }

        fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
            self.table
                .write()
                .map_err(|_| anyhow::anyhow!("Memory tree lock poisoned"))
        }
    }

    impl Tree for MemoryTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.write()?.insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.read()?.get(key).cloned())
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            self.write()?.remove(key);
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            Ok(self.read()?.contains_key(key))
        }

        fn len(&self) -> Result<usize> {
            Ok(self.read()?.len())
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            match self.read() {
                Ok(table) => {
                    let items: Vec<Result<(Vec<u8>, Vec<u8>)>> = table
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), v.clone())))
                        .collect();
                    Box::new(items.into_iter())
                }
                Err(e) => Box::new(std::iter::once(Err(e))),
            }
        }

        fn compare_and_swap(
            &self,
            key: &[u8],
            expected: Option<&[u8]>,
            new: Option<&[u8]>,
        ) -> Result<bool> {
            let mut table = self.write()?;
            if table.get(key).map(|v| v.as_slice()) != expected {
                return Ok(false);
            }
            match new {
                Some(value) => {
                    table.insert(key.to_vec(), value.to_vec());
                }
                None => {
                    table.remove(key);
                }
            }
            Ok(true)
        }
    }
}
