//! Concealment registries
//!
//! Five independent registries with one shared idiom: validate a record,
//! find an existing entry by its natural key, update or insert, then tag the
//! live object so query paths can test a flag instead of asking again.
//!
//! The path, mount, kstat and unmount registries share one mutation lock
//! ([`RegistryLock`]). Object resolution always happens before that lock is
//! taken; only container updates and flag writes run under it. The identity
//! store has a lock of its own.

pub mod identity;
pub mod kstat;
pub mod mount;
pub mod path;
pub mod unmount;

pub use identity::IdentitySpoofStore;
pub use kstat::StatSpoofRegistry;
pub use mount::MountRegistry;
pub use path::PathRegistry;
pub use unmount::{UnmountPassReport, UnmountRegistry};

use crate::config::types::{
    MountRecord, Result, ShroudError, StatSpoofRecord, UnmountRecord, MAX_PATH_LEN,
};
use crate::kernel::object::TaggingBridge;
use crate::observability::audit::{AuditEvent, AuditLog, RegistryKind};
use crate::observability::metrics::MetricsRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Records addressable by their path
pub(crate) trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for MountRecord {
    fn key(&self) -> &str {
        &self.path
    }
}

impl Keyed for StatSpoofRecord {
    fn key(&self) -> &str {
        &self.path
    }
}

impl Keyed for UnmountRecord {
    fn key(&self) -> &str {
        &self.path
    }
}

/// Insertion-ordered records with a path index.
///
/// Records are never removed, so positions stay valid for the index. A record
/// with an empty key is kept in order but not indexed; callers find it with
/// [`KeyedList::find_mut`].
#[derive(Debug)]
pub(crate) struct KeyedList<R> {
    records: Vec<R>,
    index: HashMap<String, usize>,
}

impl<R> Default for KeyedList<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<R: Keyed + Clone> KeyedList<R> {
    pub(crate) fn get(&self, key: &str) -> Option<&R> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut R> {
        match self.index.get(key) {
            Some(&i) => self.records.get_mut(i),
            None => None,
        }
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// First record, in insertion order, matching `pred`
    pub(crate) fn find_mut<F>(&mut self, pred: F) -> Option<&mut R>
    where
        F: Fn(&R) -> bool,
    {
        self.records.iter_mut().find(|r| pred(r))
    }

    /// Append a record whose key is known to be absent
    pub(crate) fn push(&mut self, record: R) {
        if !record.key().is_empty() {
            self.index.insert(record.key().to_string(), self.records.len());
        }
        self.records.push(record);
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.iter()
    }

    pub(crate) fn snapshot(&self) -> Vec<R> {
        self.records.clone()
    }
}

/// State guarded by the shared registry lock; each registry touches only
/// its own table.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    /// path -> numeric id of the path concealment registry
    pub(crate) paths: HashMap<String, u64>,
    pub(crate) mounts: KeyedList<MountRecord>,
    pub(crate) kstats: KeyedList<StatSpoofRecord>,
    pub(crate) unmounts: KeyedList<UnmountRecord>,
}

/// The one mutual-exclusion lock shared by the path-keyed registries
#[derive(Debug, Default)]
pub struct RegistryLock {
    tables: Mutex<Tables>,
}

impl RegistryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mutation completes before the guard drops, so a poisoned lock
    /// still guards consistent tables.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Collaborators every registry is constructed with
#[derive(Clone)]
pub struct RegistryContext {
    pub(crate) lock: Arc<RegistryLock>,
    pub(crate) bridge: TaggingBridge,
    pub(crate) audit: Arc<AuditLog>,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) max_records: usize,
}

impl RegistryContext {
    pub fn new(
        lock: Arc<RegistryLock>,
        bridge: TaggingBridge,
        audit: Arc<AuditLog>,
        metrics: Arc<MetricsRegistry>,
        max_records: usize,
    ) -> Self {
        Self {
            lock,
            bridge,
            audit,
            metrics,
            max_records,
        }
    }

    /// Log and count a rejected call, then hand the error back
    pub(crate) fn reject(
        &self,
        registry: RegistryKind,
        path: Option<&str>,
        err: ShroudError,
    ) -> ShroudError {
        self.metrics.counters(registry).rejected.inc();
        self.audit.record(AuditEvent::rejected(registry, path, &err));
        err
    }

    /// Refuse to grow a table past the configured capacity
    pub(crate) fn ensure_capacity(&self, current: usize) -> Result<()> {
        if current >= self.max_records {
            return Err(ShroudError::Allocation(format!(
                "registry is full ({} records)",
                self.max_records
            )));
        }
        Ok(())
    }
}

/// Check a path the way the control channel's fixed-size arrays bound it
pub(crate) fn validate_path(path: &str, allow_empty: bool) -> Result<()> {
    if path.is_empty() && !allow_empty {
        return Err(ShroudError::Transport("empty path".to_string()));
    }
    if path.len() >= MAX_PATH_LEN {
        return Err(ShroudError::Transport(format!(
            "path is {} bytes, limit is {}",
            path.len(),
            MAX_PATH_LEN - 1
        )));
    }
    if path.contains('\0') {
        return Err(ShroudError::Transport(
            "path contains an interior NUL".to_string(),
        ));
    }
    Ok(())
}
