//! Stat spoofing registry.
//!
//! Two entry points with deliberately different write semantics:
//!
//! - [`StatSpoofRegistry::upsert`] establishes a complete profile. An
//!   existing record for the same path is overwritten field by field with
//!   the incoming one, never merged.
//! - [`StatSpoofRegistry::refresh`] corrects a profile that already exists.
//!   `observed_id` is always replaced; `spoofed_size` and
//!   `spoofed_block_count` are replaced only when the incoming value is
//!   strictly positive, so zero keeps what was stored.
//!
//! Records with an empty path are keyed by `observed_id` alone, so several
//! identifier-only records coexist. They are never tagged, and a refresh,
//! which always names a path, cannot reach them.

use super::{validate_path, RegistryContext};
use crate::config::types::{Result, ShroudError, StatRefresh, StatSpoofRecord};
use crate::kernel::device::DeviceEncoding;
use crate::kernel::object::{ObjectId, TagKind};
use crate::observability::audit::{AuditEvent, RegistryKind};

pub struct StatSpoofRegistry {
    ctx: RegistryContext,
    encoding: DeviceEncoding,
}

impl StatSpoofRegistry {
    pub fn new(ctx: RegistryContext, encoding: DeviceEncoding) -> Self {
        Self { ctx, encoding }
    }

    /// Store a full spoof profile and apply it to the live object.
    ///
    /// `record.spoofed_device` arrives in the legacy packed encoding. Returns
    /// `true` when an existing profile was overwritten.
    pub fn upsert(&self, mut record: StatSpoofRecord) -> Result<bool> {
        validate_path(&record.path, true)
            .map_err(|e| self.ctx.reject(RegistryKind::Kstat, Some(&record.path), e))?;
        record.spoofed_device = self.encoding.decode(record.spoofed_device);

        let object = self.resolve(&record.path);

        let mut tables = self.ctx.lock.lock();
        let slot = if record.path.is_empty() {
            let observed_id = record.observed_id;
            tables
                .kstats
                .find_mut(|r| r.path.is_empty() && r.observed_id == observed_id)
        } else {
            tables.kstats.get_mut(&record.path)
        };
        let updated = match slot {
            Some(existing) => {
                *existing = record.clone();
                true
            }
            None => {
                self.ctx
                    .ensure_capacity(tables.kstats.len())
                    .map_err(|e| self.ctx.reject(RegistryKind::Kstat, Some(&record.path), e))?;
                tables.kstats.push(record.clone());
                false
            }
        };
        self.apply(object, &record);
        drop(tables);

        if updated {
            self.ctx.metrics.kstat.updated.inc();
        } else {
            self.ctx.metrics.kstat.inserted.inc();
        }
        self.ctx.audit.record(AuditEvent::stored(
            RegistryKind::Kstat,
            &record.path,
            updated,
            format!(
                "observed_id={} spoofed_id={} static={}",
                record.observed_id, record.spoofed_id, record.static_flag
            ),
        ));
        Ok(updated)
    }

    /// Register a profile for an object that does not exist yet
    pub fn upsert_static(&self, mut record: StatSpoofRecord) -> Result<bool> {
        record.static_flag = true;
        self.upsert(record)
    }

    /// Merge a late correction into the profile stored for `refresh.path`.
    ///
    /// Returns the profile as stored after the merge.
    pub fn refresh(&self, refresh: StatRefresh) -> Result<StatSpoofRecord> {
        validate_path(&refresh.path, true)
            .map_err(|e| self.ctx.reject(RegistryKind::Kstat, Some(&refresh.path), e))?;

        let object = self.resolve(&refresh.path);

        let mut tables = self.ctx.lock.lock();
        let existing = match tables.kstats.get_mut(&refresh.path) {
            Some(existing) => existing,
            None => {
                return Err(self.ctx.reject(
                    RegistryKind::Kstat,
                    Some(&refresh.path),
                    ShroudError::NotFound {
                        path: refresh.path.clone(),
                    },
                ));
            }
        };

        existing.observed_id = refresh.observed_id;
        if refresh.spoofed_size > 0 {
            existing.spoofed_size = refresh.spoofed_size;
        }
        if refresh.spoofed_block_count > 0 {
            existing.spoofed_block_count = refresh.spoofed_block_count;
        }
        let merged = existing.clone();
        self.apply(object, &merged);
        drop(tables);

        self.ctx.metrics.kstat.updated.inc();
        self.ctx.audit.record(AuditEvent::stored(
            RegistryKind::Kstat,
            &merged.path,
            true,
            format!(
                "refreshed observed_id={} size={} blocks={}",
                merged.observed_id, merged.spoofed_size, merged.spoofed_block_count
            ),
        ));
        Ok(merged)
    }

    pub fn get(&self, path: &str) -> Option<StatSpoofRecord> {
        self.ctx.lock.lock().kstats.get(path).cloned()
    }

    /// First profile whose `observed_id` matches, in insertion order
    pub fn find_by_observed_id(&self, observed_id: u64) -> Option<StatSpoofRecord> {
        self.ctx
            .lock
            .lock()
            .kstats
            .iter()
            .find(|r| r.observed_id == observed_id)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<StatSpoofRecord> {
        self.ctx.lock.lock().kstats.snapshot()
    }

    pub fn len(&self) -> usize {
        self.ctx.lock.lock().kstats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve(&self, path: &str) -> Option<ObjectId> {
        if path.is_empty() {
            return None;
        }
        self.ctx.bridge.resolve(path, TagKind::Kstat)
    }

    /// Caller holds the registry lock
    fn apply(&self, object: Option<ObjectId>, record: &StatSpoofRecord) {
        match object {
            Some(object) => self.ctx.bridge.spoof(object, record),
            None if record.path.is_empty() => {}
            None => self.ctx.metrics.kstat.tag_failures.inc(),
        }
    }
}
