use crate::config::config::{ManifestEntry, ShroudConfig};
use crate::config::types::Result;
use crate::control::command::AdminCommand;
use crate::kernel::mount::{Detacher, KernelDetacher};
/// Startup harness owning every registry
use crate::kernel::object::{
    ConcealFlags, HostObjectStore, ObjectStore, SpoofedMetadata, TaggingBridge,
};
use crate::kernel::uts::{HostIdentity, IdentityRecord, IdentitySource};
use crate::observability::audit::AuditLog;
use crate::observability::metrics::MetricsRegistry;
use crate::registry::{
    IdentitySpoofStore, MountRegistry, PathRegistry, RegistryContext, RegistryLock,
    StatSpoofRegistry, UnmountPassReport, UnmountRegistry,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of applying a manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestReport {
    pub applied: usize,
    pub failed: usize,
    /// One line per failed entry, `"<index>: <error>"`
    pub errors: Vec<String>,
}

impl ManifestReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// The registries of one process, built once at startup around injected
/// collaborators and shared by reference afterwards.
pub struct Shroud {
    config: ShroudConfig,
    audit: Arc<AuditLog>,
    metrics: Arc<MetricsRegistry>,
    bridge: TaggingBridge,
    paths: PathRegistry,
    mounts: MountRegistry,
    kstats: StatSpoofRegistry,
    unmounts: UnmountRegistry,
    identity: IdentitySpoofStore,
}

impl Shroud {
    pub fn new(
        config: ShroudConfig,
        store: Arc<dyn ObjectStore>,
        detacher: Arc<dyn Detacher>,
        identity: Arc<dyn IdentitySource>,
    ) -> Result<Self> {
        config.validate()?;

        let audit = Arc::new(AuditLog::new(config.logging, config.audit_log.as_deref())?);
        let metrics = Arc::new(MetricsRegistry::new());
        let bridge = TaggingBridge::new(store, audit.clone());
        let ctx = RegistryContext::new(
            Arc::new(RegistryLock::new()),
            bridge.clone(),
            audit.clone(),
            metrics.clone(),
            config.max_records_per_registry,
        );

        info!(
            "shroud: registries ready (device encoding {}, capacity {})",
            config.device_encoding, config.max_records_per_registry
        );

        Ok(Self {
            paths: PathRegistry::new(ctx.clone()),
            mounts: MountRegistry::new(ctx.clone(), config.device_encoding),
            kstats: StatSpoofRegistry::new(ctx.clone(), config.device_encoding),
            unmounts: UnmountRegistry::new(ctx, detacher),
            identity: IdentitySpoofStore::new(identity, audit.clone(), metrics.clone()),
            config,
            audit,
            metrics,
            bridge,
        })
    }

    /// Registries against the host filesystem, mount table and `uname(2)`
    pub fn host(config: ShroudConfig) -> Result<Self> {
        Self::new(
            config,
            Arc::new(HostObjectStore::new()),
            Arc::new(KernelDetacher),
            Arc::new(HostIdentity),
        )
    }

    pub fn config(&self) -> &ShroudConfig {
        &self.config
    }

    pub fn paths(&self) -> &PathRegistry {
        &self.paths
    }

    pub fn mounts(&self) -> &MountRegistry {
        &self.mounts
    }

    pub fn kstats(&self) -> &StatSpoofRegistry {
        &self.kstats
    }

    pub fn unmounts(&self) -> &UnmountRegistry {
        &self.unmounts
    }

    pub fn identity(&self) -> &IdentitySpoofStore {
        &self.identity
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn is_path_concealed(&self, numeric_id: u64) -> bool {
        self.paths.lookup_by_id(numeric_id)
    }

    /// Concealment flags on the object `path` currently names
    pub fn flags_of(&self, path: &str) -> Option<ConcealFlags> {
        self.bridge.flags_of(path)
    }

    pub fn spoofed_of(&self, path: &str) -> Option<SpoofedMetadata> {
        self.bridge.spoofed_of(path)
    }

    pub fn active_identity_spoof(&self) -> Option<IdentityRecord> {
        self.identity.get()
    }

    pub fn run_unmount_pass(&self, actor_id: u32) -> UnmountPassReport {
        self.unmounts.run_pass(actor_id)
    }

    pub fn set_logging(&self, enabled: bool) {
        self.audit.set_enabled(enabled);
        self.metrics.control.updated.inc();
    }

    /// Carry out one decoded administrative command
    pub fn execute(&self, command: AdminCommand) -> Result<()> {
        match command {
            AdminCommand::AddPath(record) => self.paths.upsert(record).map(|_| ()),
            AdminCommand::AddMount(record) => self.mounts.upsert(record).map(|_| ()),
            AdminCommand::AddKstat(record) => self.kstats.upsert(record).map(|_| ()),
            AdminCommand::AddKstatStatically(record) => {
                self.kstats.upsert_static(record).map(|_| ())
            }
            AdminCommand::RefreshKstat(refresh) => self.kstats.refresh(refresh).map(|_| ()),
            AdminCommand::AddUnmount(record) => self.unmounts.upsert(record),
            AdminCommand::SetUname { release, version } => self.identity.set(&release, &version),
            AdminCommand::SetLogging(enabled) => {
                self.set_logging(enabled);
                Ok(())
            }
        }
    }

    /// Apply one manifest entry
    pub fn apply_entry(&self, entry: &ManifestEntry) -> Result<()> {
        self.execute(AdminCommand::from(entry))
    }

    /// Apply entries in order. A failing entry is reported and skipped.
    pub fn apply_manifest(&self, entries: &[ManifestEntry]) -> ManifestReport {
        let mut report = ManifestReport::default();
        for (index, entry) in entries.iter().enumerate() {
            match self.apply_entry(entry) {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    warn!("shroud: manifest entry {} failed: {}", index, e);
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", index, e));
                }
            }
        }
        report
    }

    /// Apply the manifest carried by the configuration
    pub fn apply_configured_manifest(&self) -> ManifestReport {
        self.apply_manifest(&self.config.manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{DetachMode, StatRefresh, StatSpoofRecord};
    use crate::kernel::device::{huge_encode, make_dev};
    use crate::kernel::mount::DryRunDetacher;
    use crate::kernel::object::MemoryObjectStore;
    use crate::kernel::uts::StaticIdentity;

    fn shroud(config: ShroudConfig) -> (Shroud, Arc<MemoryObjectStore>, Arc<DryRunDetacher>) {
        let store = Arc::new(MemoryObjectStore::new());
        let detacher = Arc::new(DryRunDetacher::new());
        let identity = IdentityRecord {
            sysname: "Linux".to_string(),
            release: "6.1.0".to_string(),
            version: "#1".to_string(),
            ..Default::default()
        };
        let shroud = Shroud::new(
            config,
            store.clone(),
            detacher.clone(),
            Arc::new(StaticIdentity(identity)),
        )
        .unwrap();
        (shroud, store, detacher)
    }

    #[test]
    fn manifest_populates_every_registry() {
        let (shroud, store, detacher) = shroud(ShroudConfig::default());
        store.create("/data/adb");
        store.create("/system/bin/sh");

        let manifest = vec![
            ManifestEntry::Path {
                path: "/data/adb".to_string(),
                numeric_id: 42,
            },
            ManifestEntry::Mount {
                path: "/data/adb".to_string(),
                device_id: huge_encode(make_dev(7, 1)),
            },
            ManifestEntry::Kstat {
                record: StatSpoofRecord {
                    path: "/system/bin/sh".to_string(),
                    spoofed_size: 10,
                    ..Default::default()
                },
            },
            ManifestEntry::RefreshKstat {
                refresh: StatRefresh {
                    path: "/system/bin/sh".to_string(),
                    observed_id: 3,
                    spoofed_size: 20,
                    spoofed_block_count: 0,
                },
            },
            ManifestEntry::Unmount {
                path: "/system/etc/hosts".to_string(),
                detach_mode: DetachMode::Force,
            },
            ManifestEntry::Uname {
                release: "default".to_string(),
                version: "custom".to_string(),
            },
        ];

        let report = shroud.apply_manifest(&manifest);
        assert!(report.is_clean(), "{:?}", report.errors);
        assert_eq!(report.applied, 6);

        assert!(shroud.is_path_concealed(42));
        assert_eq!(
            shroud.flags_of("/data/adb"),
            Some(ConcealFlags::PATH | ConcealFlags::MOUNT)
        );
        assert_eq!(shroud.spoofed_of("/system/bin/sh").unwrap().size, 20);
        assert_eq!(shroud.active_identity_spoof().unwrap().release, "6.1.0");

        assert_eq!(shroud.run_unmount_pass(0).attempted, 1);
        assert_eq!(detacher.calls()[0].1, DetachMode::Force);
    }

    #[test]
    fn failing_entries_are_reported_and_skipped() {
        let (shroud, _store, _detacher) = shroud(ShroudConfig::default());
        let unmount = ManifestEntry::Unmount {
            path: "/x".to_string(),
            detach_mode: DetachMode::Normal,
        };
        let manifest = vec![
            unmount.clone(),
            unmount,
            ManifestEntry::RefreshKstat {
                refresh: StatRefresh {
                    path: "/nowhere".to_string(),
                    ..Default::default()
                },
            },
            ManifestEntry::Path {
                path: "/y".to_string(),
                numeric_id: 1,
            },
        ];

        let report = shroud.apply_manifest(&manifest);
        assert_eq!(report.applied, 2);
        assert_eq!(report.failed, 2);
        assert!(report.errors[0].starts_with("1:"));
        assert!(report.errors[1].starts_with("2:"));
    }

    #[test]
    fn static_kstat_entries_keep_their_flag() {
        let (shroud, _store, _detacher) = shroud(ShroudConfig::default());
        let entry = ManifestEntry::Kstat {
            record: StatSpoofRecord {
                static_flag: true,
                observed_id: 55,
                ..Default::default()
            },
        };
        shroud.apply_entry(&entry).unwrap();
        assert!(shroud.kstats().find_by_observed_id(55).unwrap().static_flag);
    }

    #[test]
    fn logging_toggle_reaches_audit_log() {
        let config = ShroudConfig {
            logging: false,
            ..Default::default()
        };
        let (shroud, _store, _detacher) = shroud(config);
        assert!(!shroud.audit().is_enabled());
        shroud.set_logging(true);
        assert!(shroud.audit().is_enabled());
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = ShroudConfig {
            max_records_per_registry: 0,
            ..Default::default()
        };
        let result = Shroud::new(
            config,
            Arc::new(MemoryObjectStore::new()),
            Arc::new(DryRunDetacher::new()),
            Arc::new(StaticIdentity(IdentityRecord::default())),
        );
        assert!(result.is_err());
    }
}
