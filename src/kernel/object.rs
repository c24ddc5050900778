//! Object tagging bridge.
//!
//! Registries never reach into a live object's representation. They resolve
//! a path through an [`ObjectStore`] and ask it to record concealment flags
//! or spoofed metadata, so query paths can test the object directly instead
//! of consulting a registry again. Flags are additive; nothing here clears
//! them.

use crate::config::types::{Result, ShroudError, StatSpoofRecord, Timespec};
use crate::observability::audit::{AuditEvent, AuditLog};
use bitflags::bitflags;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

bitflags! {
    /// Concealment state stored on a live object
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ConcealFlags: u32 {
        const PATH = 1 << 24;
        const MOUNT = 1 << 25;
        const KSTAT = 1 << 26;
    }
}

/// Which registry a tag originates from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagKind {
    Path,
    Mount,
    Kstat,
}

impl TagKind {
    pub fn flag(self) -> ConcealFlags {
        match self {
            TagKind::Path => ConcealFlags::PATH,
            TagKind::Mount => ConcealFlags::MOUNT,
            TagKind::Kstat => ConcealFlags::KSTAT,
        }
    }
}

/// Identity of a live filesystem object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub device: u64,
    pub inode: u64,
}

/// Metadata a query path reports instead of the object's real values
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoofedMetadata {
    pub id: u64,
    pub device: u64,
    pub link_count: u32,
    pub size: i64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
    pub block_size: u64,
    pub block_count: u64,
}

impl From<&StatSpoofRecord> for SpoofedMetadata {
    fn from(record: &StatSpoofRecord) -> Self {
        Self {
            id: record.spoofed_id,
            device: record.spoofed_device,
            link_count: record.spoofed_link_count,
            size: record.spoofed_size,
            atime: record.spoofed_atime,
            mtime: record.spoofed_mtime,
            ctime: record.spoofed_ctime,
            block_size: record.spoofed_block_size,
            block_count: record.spoofed_block_count,
        }
    }
}

/// Capability interface over the store of live objects
pub trait ObjectStore: Send + Sync {
    /// Map a path to the object it currently names, following symlinks
    fn resolve(&self, path: &str) -> Result<ObjectId>;

    fn set_flag(&self, object: ObjectId, kind: TagKind);

    fn set_spoofed_metadata(&self, object: ObjectId, metadata: SpoofedMetadata);

    fn flags(&self, object: ObjectId) -> ConcealFlags;

    fn spoofed(&self, object: ObjectId) -> Option<SpoofedMetadata>;
}

#[derive(Debug, Default, Clone)]
struct ObjectTags {
    flags: ConcealFlags,
    spoofed: Option<SpoofedMetadata>,
}

/// Out-of-band flag storage keyed by object identity
#[derive(Debug, Default)]
struct TagTable {
    tags: DashMap<ObjectId, ObjectTags>,
}

impl TagTable {
    fn set_flag(&self, object: ObjectId, kind: TagKind) {
        self.tags.entry(object).or_default().flags |= kind.flag();
    }

    fn set_spoofed(&self, object: ObjectId, metadata: SpoofedMetadata) {
        let mut entry = self.tags.entry(object).or_default();
        entry.spoofed = Some(metadata);
        entry.flags |= ConcealFlags::KSTAT;
    }

    fn flags(&self, object: ObjectId) -> ConcealFlags {
        self.tags
            .get(&object)
            .map(|t| t.flags)
            .unwrap_or_default()
    }

    fn spoofed(&self, object: ObjectId) -> Option<SpoofedMetadata> {
        self.tags.get(&object).and_then(|t| t.spoofed.clone())
    }
}

/// Object store backed by the host filesystem.
///
/// Paths resolve through `stat(2)`; tags live in a side table keyed by
/// `(st_dev, st_ino)`, so tags follow an object across renames and hard
/// links, and an object deleted after tagging simply stops resolving.
///
/// The table is never pruned. An in-kernel tag dies with its inode, but this
/// table cannot observe the release: once the filesystem reuses a tagged
/// inode number, the new, unrelated object reports the old object's flags
/// and spoofed metadata. Use one store per short-lived run (as `shroudctl`
/// does) rather than one store for the lifetime of a filesystem.
#[derive(Debug, Default)]
pub struct HostObjectStore {
    table: TagTable,
}

impl HostObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for HostObjectStore {
    #[allow(clippy::unnecessary_cast)]
    fn resolve(&self, path: &str) -> Result<ObjectId> {
        if path.is_empty() {
            return Err(ShroudError::Resolution {
                path: String::new(),
                reason: "empty path".to_string(),
            });
        }
        let st = nix::sys::stat::stat(Path::new(path)).map_err(|e| ShroudError::Resolution {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(ObjectId {
            device: st.st_dev as u64,
            inode: st.st_ino as u64,
        })
    }

    fn set_flag(&self, object: ObjectId, kind: TagKind) {
        self.table.set_flag(object, kind);
    }

    fn set_spoofed_metadata(&self, object: ObjectId, metadata: SpoofedMetadata) {
        self.table.set_spoofed(object, metadata);
    }

    fn flags(&self, object: ObjectId) -> ConcealFlags {
        self.table.flags(object)
    }

    fn spoofed(&self, object: ObjectId) -> Option<SpoofedMetadata> {
        self.table.spoofed(object)
    }
}

/// Object store over a virtual namespace, for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    names: RwLock<HashMap<String, ObjectId>>,
    next_inode: AtomicU64,
    resolutions: AtomicU64,
    table: TagTable,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            next_inode: AtomicU64::new(1),
            ..Self::default()
        }
    }

    /// Create (or return) the object named by `path`
    pub fn create(&self, path: &str) -> ObjectId {
        let mut names = self.names.write().unwrap_or_else(|e| e.into_inner());
        *names.entry(path.to_string()).or_insert_with(|| ObjectId {
            device: 1,
            inode: self.next_inode.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Bind another name to an existing object (a hard link)
    pub fn link(&self, existing: ObjectId, path: &str) {
        let mut names = self.names.write().unwrap_or_else(|e| e.into_inner());
        names.insert(path.to_string(), existing);
    }

    /// Drop a name; the object's tags stay behind
    pub fn remove(&self, path: &str) -> Option<ObjectId> {
        let mut names = self.names.write().unwrap_or_else(|e| e.into_inner());
        names.remove(path)
    }

    /// Number of resolve calls served so far
    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }
}

impl ObjectStore for MemoryObjectStore {
    fn resolve(&self, path: &str) -> Result<ObjectId> {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        let names = self.names.read().unwrap_or_else(|e| e.into_inner());
        names
            .get(path)
            .copied()
            .ok_or_else(|| ShroudError::Resolution {
                path: path.to_string(),
                reason: "no such object".to_string(),
            })
    }

    fn set_flag(&self, object: ObjectId, kind: TagKind) {
        self.table.set_flag(object, kind);
    }

    fn set_spoofed_metadata(&self, object: ObjectId, metadata: SpoofedMetadata) {
        self.table.set_spoofed(object, metadata);
    }

    fn flags(&self, object: ObjectId) -> ConcealFlags {
        self.table.flags(object)
    }

    fn spoofed(&self, object: ObjectId) -> Option<SpoofedMetadata> {
        self.table.spoofed(object)
    }
}

/// Applies registry state onto live objects.
///
/// Resolution happens before a registry takes its lock; `tag` and `spoof`
/// only write into the object store and are cheap enough to run under it.
#[derive(Clone)]
pub struct TaggingBridge {
    store: Arc<dyn ObjectStore>,
    audit: Arc<AuditLog>,
}

impl TaggingBridge {
    pub fn new(store: Arc<dyn ObjectStore>, audit: Arc<AuditLog>) -> Self {
        Self { store, audit }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Resolve `path` on behalf of the `kind` registry.
    ///
    /// A miss is logged as a warning and returned as `None`; the caller keeps
    /// its record either way.
    pub fn resolve(&self, path: &str, kind: TagKind) -> Option<ObjectId> {
        match self.store.resolve(path) {
            Ok(object) => Some(object),
            Err(e) => {
                self.audit
                    .record(AuditEvent::resolution_failed(kind, path, &e));
                None
            }
        }
    }

    pub fn tag(&self, object: ObjectId, kind: TagKind) {
        self.store.set_flag(object, kind);
    }

    /// Overwrite the reported metadata of `object` and set the kstat flag
    pub fn spoof(&self, object: ObjectId, record: &StatSpoofRecord) {
        self.store
            .set_spoofed_metadata(object, SpoofedMetadata::from(record));
        self.store.set_flag(object, TagKind::Kstat);
    }

    /// Flags currently set on the object `path` names
    pub fn flags_of(&self, path: &str) -> Option<ConcealFlags> {
        self.store.resolve(path).ok().map(|o| self.store.flags(o))
    }

    /// Spoofed metadata currently set on the object `path` names
    pub fn spoofed_of(&self, path: &str) -> Option<SpoofedMetadata> {
        self.store.resolve(path).ok().and_then(|o| self.store.spoofed(o))
    }
}
