//! Catalog storage
//!
//! Stores base modules by id with a unique slug index, and implementation
//! variants keyed by owning module so a module's variants are one prefix scan.

use crate::module::types::{BaseModule, ImplementationVariant};
use crate::storage::database::{Database, Tree};
use crate::storage::{composite_key, composite_prefix, decode, encode, Versioned, MAX_CAS_SPINS};
use anyhow::Result;
use std::sync::Arc;

/// Catalog storage manager
pub struct CatalogStore {
    modules: Arc<dyn Tree>,        // module_id -> BaseModule
    module_slugs: Arc<dyn Tree>,   // slug -> module_id
    variants: Arc<dyn Tree>,       // module_id \0 variant_id -> ImplementationVariant
    variant_owners: Arc<dyn Tree>, // variant_id -> module_id
    variant_keys: Arc<dyn Tree>,   // module_id \0 implementation_key -> variant_id
}

impl CatalogStore {
    /// Create a new catalog store
    pub fn new(db: Arc<dyn Database>) -> Result<Self> {
        let modules = Arc::from(db.open_tree("modules")?);
        let module_slugs = Arc::from(db.open_tree("module_slugs")?);
        let variants = Arc::from(db.open_tree("variants")?);
        let variant_owners = Arc::from(db.open_tree("variant_owners")?);
        let variant_keys = Arc::from(db.open_tree("variant_keys")?);

        Ok(Self {
            modules,
            module_slugs,
            variants,
            variant_owners,
            variant_keys,
        })
    }

    /// Insert a new module. Returns false if the slug is already taken.
    pub fn insert_module(&self, module: &BaseModule) -> Result<bool> {
        // Claiming the slug first makes uniqueness hold under concurrent inserts
        if !self.module_slugs.compare_and_swap(
            module.slug.as_bytes(),
            None,
            Some(module.id.as_bytes()),
        )? {
            return Ok(false);
        }
        self.modules.insert(module.id.as_bytes(), &encode(module)?)?;
        Ok(true)
    }

    /// Get a module by id, including deleted ones
    pub fn get_module(&self, id: &str) -> Result<Option<BaseModule>> {
        if let Some(data) = self.modules.get(id.as_bytes())? {
            Ok(Some(decode(&data)?))
        } else {
            Ok(None)
        }
    }

    /// Get a module by slug, including deleted ones
    pub fn get_module_by_slug(&self, slug: &str) -> Result<Option<BaseModule>> {
        match self.module_slugs.get(slug.as_bytes())? {
            Some(id) => self.get_module(&String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    /// All module rows, including deleted and archived ones
    pub fn list_modules(&self) -> Result<Vec<BaseModule>> {
        let mut modules = Vec::new();
        for item in self.modules.iter() {
            let (_, data) = item?;
            modules.push(decode(&data)?);
        }
        Ok(modules)
    }

    /// Optimistically update a module row
    ///
    /// `apply` returns false to leave the row untouched. Returns the row as it
    /// is after the call, or None if the module does not exist.
    pub fn update_module<F>(&self, id: &str, mut apply: F) -> Result<Option<(BaseModule, bool)>>
    where
        F: FnMut(&mut BaseModule) -> bool,
    {
        for _ in 0..MAX_CAS_SPINS {
            let current = match self.modules.get(id.as_bytes())? {
                Some(raw) => Versioned::<BaseModule>::decode(raw)?,
                None => return Ok(None),
            };
            let mut next = current.value.clone();
            if !apply(&mut next) {
                return Ok(Some((current.value, false)));
            }
            let encoded = encode(&next)?;
            if self
                .modules
                .compare_and_swap(id.as_bytes(), Some(&current.raw), Some(&encoded))?
            {
                return Ok(Some((next, true)));
            }
        }
        Err(anyhow::anyhow!(
            "Module {} kept changing during update",
            id
        ))
    }

    /// Insert a new variant. Returns false if the implementation key is taken
    /// within the module.
    pub fn insert_variant(&self, variant: &ImplementationVariant) -> Result<bool> {
        let key_index = composite_key(&variant.base_module_id, &variant.implementation_key);
        if !self
            .variant_keys
            .compare_and_swap(&key_index, None, Some(variant.id.as_bytes()))?
        {
            return Ok(false);
        }
        self.variant_owners
            .insert(variant.id.as_bytes(), variant.base_module_id.as_bytes())?;
        self.variants.insert(
            &composite_key(&variant.base_module_id, &variant.id),
            &encode(variant)?,
        )?;
        Ok(true)
    }

    fn variant_row_key(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .variant_owners
            .get(id.as_bytes())?
            .map(|owner| composite_key(&String::from_utf8_lossy(&owner), id)))
    }

    /// Get a variant by id
    pub fn get_variant(&self, id: &str) -> Result<Option<ImplementationVariant>> {
        let key = match self.variant_row_key(id)? {
            Some(key) => key,
            None => return Ok(None),
        };
        if let Some(data) = self.variants.get(&key)? {
            Ok(Some(decode(&data)?))
        } else {
            Ok(None)
        }
    }

    /// Whether a variant row exists
    pub fn variant_exists(&self, id: &str) -> Result<bool> {
        self.variant_owners.contains_key(id.as_bytes())
    }

    /// Variants owned by a module, ordered by implementation key
    pub fn list_variants(&self, base_module_id: &str) -> Result<Vec<ImplementationVariant>> {
        let mut variants: Vec<ImplementationVariant> = Vec::new();
        for item in self.variants.scan_prefix(&composite_prefix(base_module_id)) {
            let (_, data) = item?;
            variants.push(decode(&data)?);
        }
        variants.sort_by(|a, b| a.implementation_key.cmp(&b.implementation_key));
        Ok(variants)
    }

    /// Optimistically update a variant row; same contract as `update_module`
    pub fn update_variant<F>(
        &self,
        id: &str,
        mut apply: F,
    ) -> Result<Option<(ImplementationVariant, bool)>>
    where
        F: FnMut(&mut ImplementationVariant) -> bool,
    {
        let key = match self.variant_row_key(id)? {
            Some(key) => key,
            None => return Ok(None),
        };
        for _ in 0..MAX_CAS_SPINS {
            let current = match self.variants.get(&key)? {
                Some(raw) => Versioned::<ImplementationVariant>::decode(raw)?,
                None => return Ok(None),
            };
            let mut next = current.value.clone();
            if !apply(&mut next) {
                return Ok(Some((current.value, false)));
            }
            let encoded = encode(&next)?;
            if self
                .variants
                .compare_and_swap(&key, Some(&current.raw), Some(&encoded))?
            {
                return Ok(Some((next, true)));
            }
        }
        Err(anyhow::anyhow!("Variant {} kept changing during update", id))
    }

    /// Physically remove a variant and its index entries
    pub fn remove_variant(&self, id: &str) -> Result<Option<ImplementationVariant>> {
        let variant = match self.get_variant(id)? {
            Some(variant) => variant,
            None => return Ok(None),
        };
        self.variants
            .remove(&composite_key(&variant.base_module_id, &variant.id))?;
        self.variant_keys.remove(&composite_key(
            &variant.base_module_id,
            &variant.implementation_key,
        ))?;
        self.variant_owners.remove(id.as_bytes())?;
        Ok(Some(variant))
    }
}
