//! Path concealment registry.
//!
//! Authoritative state is the path -> numeric id table under the shared
//! registry lock. A second index, numeric id -> paths, serves directory
//! enumeration that only has raw identifiers to go on. That index is read
//! without the registry lock: its shards carry their own locks, so a reader
//! racing an upsert sees the id either before or after the update, never a
//! broken structure.

use super::{validate_path, RegistryContext};
use crate::config::types::{PathRecord, Result};
use crate::kernel::object::TagKind;
use crate::observability::audit::{AuditEvent, RegistryKind};
use dashmap::DashMap;
use std::collections::HashSet;

pub struct PathRegistry {
    ctx: RegistryContext,
    by_id: DashMap<u64, HashSet<String>>,
}

impl PathRegistry {
    pub fn new(ctx: RegistryContext) -> Self {
        Self {
            ctx,
            by_id: DashMap::new(),
        }
    }

    /// Insert or replace the record for `record.path` and tag its object.
    ///
    /// Returns `true` when an existing record was replaced.
    pub fn upsert(&self, record: PathRecord) -> Result<bool> {
        validate_path(&record.path, false)
            .map_err(|e| self.ctx.reject(RegistryKind::Path, Some(&record.path), e))?;

        let object = self.ctx.bridge.resolve(&record.path, TagKind::Path);

        let mut tables = self.ctx.lock.lock();
        let previous = tables.paths.get(&record.path).copied();
        if previous.is_none() {
            self.ctx
                .ensure_capacity(tables.paths.len())
                .map_err(|e| self.ctx.reject(RegistryKind::Path, Some(&record.path), e))?;
        }

        if let Some(old_id) = previous.filter(|&id| id != record.numeric_id) {
            self.unindex(old_id, &record.path);
        }
        tables.paths.insert(record.path.clone(), record.numeric_id);
        self.by_id
            .entry(record.numeric_id)
            .or_default()
            .insert(record.path.clone());

        match object {
            Some(object) => self.ctx.bridge.tag(object, TagKind::Path),
            None => self.ctx.metrics.path.tag_failures.inc(),
        }
        drop(tables);

        let updated = previous.is_some();
        if updated {
            self.ctx.metrics.path.updated.inc();
        } else {
            self.ctx.metrics.path.inserted.inc();
        }
        self.ctx.audit.record(AuditEvent::stored(
            RegistryKind::Path,
            &record.path,
            updated,
            format!("numeric_id={}", record.numeric_id),
        ));
        Ok(updated)
    }

    /// Whether any concealed path carries `numeric_id`. Lock-free.
    pub fn lookup_by_id(&self, numeric_id: u64) -> bool {
        self.by_id.contains_key(&numeric_id)
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.ctx.lock.lock().paths.contains_key(path)
    }

    pub fn id_of(&self, path: &str) -> Option<u64> {
        self.ctx.lock.lock().paths.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.ctx.lock.lock().paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Caller holds the registry lock
    fn unindex(&self, numeric_id: u64, path: &str) {
        if let Some(mut paths) = self.by_id.get_mut(&numeric_id) {
            paths.remove(path);
        }
        self.by_id.remove_if(&numeric_id, |_, paths| paths.is_empty());
    }
}
