//! Mount concealment registry.

use super::{validate_path, RegistryContext};
use crate::config::types::{MountRecord, Result};
use crate::kernel::device::DeviceEncoding;
use crate::kernel::object::TagKind;
use crate::observability::audit::{AuditEvent, RegistryKind};

/// Ordered mount records keyed by path; there is no removal
pub struct MountRegistry {
    ctx: RegistryContext,
    encoding: DeviceEncoding,
}

impl MountRegistry {
    pub fn new(ctx: RegistryContext, encoding: DeviceEncoding) -> Self {
        Self { ctx, encoding }
    }

    /// Store `record` (its `device_id` still in the legacy packed encoding),
    /// overwriting any record for the same path, and tag the mount's object.
    ///
    /// Returns `true` when an existing record was overwritten.
    pub fn upsert(&self, mut record: MountRecord) -> Result<bool> {
        validate_path(&record.path, false)
            .map_err(|e| self.ctx.reject(RegistryKind::Mount, Some(&record.path), e))?;
        record.device_id = self.encoding.decode(record.device_id);

        let object = self.ctx.bridge.resolve(&record.path, TagKind::Mount);

        let mut tables = self.ctx.lock.lock();
        let updated = match tables.mounts.get_mut(&record.path) {
            Some(existing) => {
                *existing = record.clone();
                true
            }
            None => {
                self.ctx
                    .ensure_capacity(tables.mounts.len())
                    .map_err(|e| self.ctx.reject(RegistryKind::Mount, Some(&record.path), e))?;
                tables.mounts.push(record.clone());
                false
            }
        };
        match object {
            Some(object) => self.ctx.bridge.tag(object, TagKind::Mount),
            None => self.ctx.metrics.mount.tag_failures.inc(),
        }
        drop(tables);

        if updated {
            self.ctx.metrics.mount.updated.inc();
        } else {
            self.ctx.metrics.mount.inserted.inc();
        }
        self.ctx.audit.record(AuditEvent::stored(
            RegistryKind::Mount,
            &record.path,
            updated,
            format!("device_id={}", record.device_id),
        ));
        Ok(updated)
    }

    pub fn get(&self, path: &str) -> Option<MountRecord> {
        self.ctx.lock.lock().mounts.get(path).cloned()
    }

    /// Records in insertion order
    pub fn snapshot(&self) -> Vec<MountRecord> {
        self.ctx.lock.lock().mounts.snapshot()
    }

    pub fn len(&self) -> usize {
        self.ctx.lock.lock().mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encoding(&self) -> DeviceEncoding {
        self.encoding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::device::{huge_encode, make_dev, new_encode, old_encode};
    use crate::kernel::object::{ConcealFlags, ObjectStore};
    use crate::registry::test_support::fixture;

    fn record(path: &str, device_id: u64) -> MountRecord {
        MountRecord {
            path: path.to_string(),
            device_id,
        }
    }

    #[test]
    fn upsert_decodes_and_tags() {
        let f = fixture();
        let object = f.store.create("/debug_ramdisk");
        let registry = MountRegistry::new(f.ctx.clone(), DeviceEncoding::Huge);

        let dev = make_dev(253, 5);
        assert!(!registry.upsert(record("/debug_ramdisk", huge_encode(dev))).unwrap());

        assert_eq!(registry.get("/debug_ramdisk").unwrap().device_id, dev);
        assert_eq!(f.store.flags(object), ConcealFlags::MOUNT);
    }

    #[test]
    fn every_encoding_stores_the_same_device() {
        let dev = make_dev(179, 32);
        let cases = [
            (DeviceEncoding::Old, u64::from(old_encode(dev))),
            (DeviceEncoding::New, u64::from(new_encode(dev))),
            (DeviceEncoding::Huge, huge_encode(dev)),
        ];
        for (encoding, packed) in cases {
            let f = fixture();
            let registry = MountRegistry::new(f.ctx.clone(), encoding);
            registry.upsert(record("/mnt/vendor", packed)).unwrap();
            assert_eq!(
                registry.get("/mnt/vendor").unwrap().device_id,
                dev,
                "encoding {}",
                encoding
            );
        }
    }

    #[test]
    fn same_path_overwrites_in_place() {
        let f = fixture();
        let registry = MountRegistry::new(f.ctx.clone(), DeviceEncoding::Huge);

        registry.upsert(record("/a", huge_encode(make_dev(1, 1)))).unwrap();
        registry.upsert(record("/b", huge_encode(make_dev(2, 2)))).unwrap();
        assert!(registry.upsert(record("/a", huge_encode(make_dev(3, 3)))).unwrap());

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].path, "/a");
        assert_eq!(snapshot[0].device_id, make_dev(3, 3));
        assert_eq!(snapshot[1].path, "/b");
    }

    #[test]
    fn unresolvable_mount_is_stored() {
        let f = fixture();
        let registry = MountRegistry::new(f.ctx.clone(), DeviceEncoding::New);
        assert!(registry.upsert(record("/gone", 0x0801)).is_ok());
        assert_eq!(registry.len(), 1);
        assert_eq!(f.ctx.metrics.mount.tag_failures.get(), 1);
    }
}
