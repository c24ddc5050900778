//! Identity spoof store.
//!
//! Single slot holding the `release` and `version` overrides for system
//! identification. The slot has its own lock, separate from the registry
//! lock. Readers never wait on it: a reader that finds a writer in flight
//! reports the spoof as inactive instead of blocking or seeing half a write.

use crate::config::types::{Result, ShroudError, IDENTITY_DEFAULT, UTS_FIELD_LEN};
use crate::kernel::uts::{IdentityRecord, IdentitySource};
use crate::observability::audit::{AuditEvent, AuditEventType, AuditLog, RegistryKind};
use crate::observability::metrics::MetricsRegistry;
use std::sync::{Arc, RwLock, TryLockError};

#[derive(Debug, Default)]
struct Slot {
    /// Empty means spoofing is inactive
    release: String,
    version: String,
}

pub struct IdentitySpoofStore {
    slot: RwLock<Slot>,
    source: Arc<dyn IdentitySource>,
    audit: Arc<AuditLog>,
    metrics: Arc<MetricsRegistry>,
}

impl IdentitySpoofStore {
    pub fn new(
        source: Arc<dyn IdentitySource>,
        audit: Arc<AuditLog>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            slot: RwLock::new(Slot::default()),
            source,
            audit,
            metrics,
        }
    }

    /// Replace both overrides.
    ///
    /// A field equal to `"default"` is replaced by the real value, read once
    /// now and never re-read.
    pub fn set(&self, release: &str, version: &str) -> Result<()> {
        for (name, value) in [("release", release), ("version", version)] {
            if value.len() >= UTS_FIELD_LEN || value.contains('\0') {
                return Err(self.reject(ShroudError::Transport(format!(
                    "{} must be a string of at most {} bytes",
                    name,
                    UTS_FIELD_LEN - 1
                ))));
            }
        }

        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        let real = if release == IDENTITY_DEFAULT || version == IDENTITY_DEFAULT {
            Some(self.source.current().map_err(|e| self.reject(e))?)
        } else {
            None
        };
        slot.release = pick(release, real.as_ref().map(|r| r.release.as_str()));
        slot.version = pick(version, real.as_ref().map(|r| r.version.as_str()));
        let details = format!("release='{}' version='{}'", slot.release, slot.version);
        drop(slot);

        self.metrics.identity.updated.inc();
        self.audit.record(AuditEvent::new(
            AuditEventType::IdentitySet,
            RegistryKind::Identity,
            details,
        ));
        Ok(())
    }

    /// The identity to report, or `None` while spoofing is inactive.
    ///
    /// Also `None` while a [`set`](Self::set) is in flight.
    pub fn get(&self) -> Option<IdentityRecord> {
        let slot = match self.slot.try_read() {
            Ok(slot) => slot,
            Err(TryLockError::WouldBlock) => return None,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };
        if slot.release.is_empty() {
            return None;
        }
        let (release, version) = (slot.release.clone(), slot.version.clone());
        drop(slot);

        let live = self.source.current().ok()?;
        Some(IdentityRecord {
            release,
            version,
            ..live
        })
    }

    pub fn is_active(&self) -> bool {
        self.get().is_some()
    }

    fn reject(&self, err: ShroudError) -> ShroudError {
        self.metrics.identity.rejected.inc();
        self.audit
            .record(AuditEvent::rejected(RegistryKind::Identity, None, &err));
        err
    }
}

fn pick(requested: &str, real: Option<&str>) -> String {
    match real {
        Some(real) if requested == IDENTITY_DEFAULT => real.to_string(),
        _ => requested.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::uts::StaticIdentity;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::thread;

    fn real_identity() -> IdentityRecord {
        IdentityRecord {
            sysname: "Linux".to_string(),
            nodename: "localhost".to_string(),
            release: "5.10.198-android12".to_string(),
            version: "#1 SMP PREEMPT".to_string(),
            machine: "aarch64".to_string(),
            domainname: "(none)".to_string(),
        }
    }

    fn store(source: Arc<dyn IdentitySource>) -> IdentitySpoofStore {
        IdentitySpoofStore::new(
            source,
            Arc::new(AuditLog::enabled()),
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[test]
    fn inactive_before_first_set() {
        let store = store(Arc::new(StaticIdentity(real_identity())));
        assert_eq!(store.get(), None);
        assert!(!store.is_active());
    }

    #[test]
    fn default_release_resolves_to_real_value() {
        let store = store(Arc::new(StaticIdentity(real_identity())));
        store.set("default", "1.0-custom").unwrap();

        let identity = store.get().unwrap();
        assert_eq!(identity.release, "5.10.198-android12");
        assert_eq!(identity.version, "1.0-custom");
        assert_eq!(identity.machine, "aarch64");
        assert_eq!(identity.nodename, "localhost");
    }

    #[test]
    fn literal_overrides_are_stored_as_given() {
        let store = store(Arc::new(StaticIdentity(real_identity())));
        store.set("4.14.190-perf", "default").unwrap();

        let identity = store.get().unwrap();
        assert_eq!(identity.release, "4.14.190-perf");
        assert_eq!(identity.version, "#1 SMP PREEMPT");
    }

    #[test]
    fn empty_release_stays_inactive() {
        let store = store(Arc::new(StaticIdentity(real_identity())));
        store.set("", "custom").unwrap();
        assert_eq!(store.get(), None);
    }

    #[test]
    fn oversized_field_is_rejected() {
        let store = store(Arc::new(StaticIdentity(real_identity())));
        let long = "x".repeat(UTS_FIELD_LEN);
        assert!(matches!(
            store.set(&long, "v"),
            Err(ShroudError::Transport(_))
        ));
        assert_eq!(store.get(), None);
        assert_eq!(store.metrics.identity.rejected.get(), 1);
    }

    /// Once armed, parks the next `current()` call until released
    struct GatedIdentity {
        armed: AtomicBool,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl IdentitySource for GatedIdentity {
        fn current(&self) -> Result<IdentityRecord> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            Ok(real_identity())
        }
    }

    #[test]
    fn reader_sees_inactive_during_write() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gate = Arc::new(GatedIdentity {
            armed: AtomicBool::new(false),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let store = Arc::new(store(gate.clone()));

        store.set("5.4.0-first", "v1").unwrap();
        assert_eq!(store.get().unwrap().release, "5.4.0-first");

        gate.armed.store(true, Ordering::SeqCst);
        let writer = {
            let store = store.clone();
            thread::spawn(move || store.set("default", "v2"))
        };

        // The writer now holds the slot lock inside current()
        entered_rx.recv().unwrap();
        assert_eq!(store.get(), None);
        assert!(!store.is_active());

        release_tx.send(()).unwrap();
        writer.join().unwrap().unwrap();

        let identity = store.get().unwrap();
        assert_eq!(identity.release, "5.10.198-android12");
        assert_eq!(identity.version, "v2");
    }
}
