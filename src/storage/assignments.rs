//! Tenant assignment storage
//!
//! One row per (tenant_id, base_module_id). Every write is a compare-and-swap
//! against the previously read bytes; rows are never deleted.

use crate::module::types::TenantAssignment;
use crate::storage::database::{Database, Tree};
use crate::storage::{composite_key, composite_prefix, decode, encode, Versioned};
use anyhow::Result;
use std::sync::Arc;

/// Assignment storage manager
pub struct AssignmentStore {
    assignments: Arc<dyn Tree>, // tenant_id \0 base_module_id -> TenantAssignment
}

impl AssignmentStore {
    /// Create a new assignment store
    pub fn new(db: Arc<dyn Database>) -> Result<Self> {
        let assignments = Arc::from(db.open_tree("assignments")?);
        Ok(Self { assignments })
    }

    /// Read a row together with its current bytes
    pub fn get(
        &self,
        tenant_id: &str,
        base_module_id: &str,
    ) -> Result<Option<Versioned<TenantAssignment>>> {
        match self.assignments.get(&composite_key(tenant_id, base_module_id))? {
            Some(raw) => Ok(Some(Versioned::decode(raw)?)),
            None => Ok(None),
        }
    }

    /// Insert a row if none exists for its natural key
    pub fn insert_new(&self, assignment: &TenantAssignment) -> Result<bool> {
        self.assignments.compare_and_swap(
            &composite_key(&assignment.tenant_id, &assignment.base_module_id),
            None,
            Some(&encode(assignment)?),
        )
    }

    /// Replace `expected` with `next`. Returns false if the row changed since it was read.
    pub fn compare_and_swap(
        &self,
        expected: &Versioned<TenantAssignment>,
        next: &TenantAssignment,
    ) -> Result<bool> {
        if expected.value.tenant_id != next.tenant_id
            || expected.value.base_module_id != next.base_module_id
        {
            return Err(anyhow::anyhow!(
                "Assignment natural key is immutable ({}/{} -> {}/{})",
                expected.value.tenant_id,
                expected.value.base_module_id,
                next.tenant_id,
                next.base_module_id
            ));
        }
        self.assignments.compare_and_swap(
            &composite_key(&next.tenant_id, &next.base_module_id),
            Some(&expected.raw),
            Some(&encode(next)?),
        )
    }

    /// All rows for a tenant
    pub fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<TenantAssignment>> {
        let mut rows = Vec::new();
        for item in self.assignments.scan_prefix(&composite_prefix(tenant_id)) {
            let (_, data) = item?;
            rows.push(decode(&data)?);
        }
        Ok(rows)
    }
}
