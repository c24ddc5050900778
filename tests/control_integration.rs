//! Integration tests for the administrative control surface
//!
//! Every call goes through fixed-size payload encoding and the dispatcher,
//! the way a privileged caller would reach the registries.

use shroud::config::config::ShroudConfig;
use shroud::control::command::{
    CMD_ADD_KSTAT_STATICALLY, CMD_ADD_MOUNT, CMD_ADD_PATH, CMD_REFRESH_KSTAT, CMD_SET_LOGGING,
    PATH_PAYLOAD_LEN,
};
use shroud::kernel::device::{huge_encode, make_dev, new_encode, old_encode, DeviceEncoding};
use shroud::kernel::mount::DryRunDetacher;
use shroud::kernel::object::{ConcealFlags, MemoryObjectStore};
use shroud::kernel::uts::{IdentityRecord, StaticIdentity};
use shroud::{
    AdminCommand, DetachMode, Dispatcher, MountRecord, PathRecord, Shroud, Status, StatRefresh,
    StatSpoofRecord, Timespec, UnmountRecord,
};
use std::sync::Arc;

struct Harness {
    dispatcher: Dispatcher,
    store: Arc<MemoryObjectStore>,
    detacher: Arc<DryRunDetacher>,
}

impl Harness {
    fn new(config: ShroudConfig) -> Self {
        let store = Arc::new(MemoryObjectStore::new());
        let detacher = Arc::new(DryRunDetacher::new());
        let shroud = Shroud::new(
            config,
            store.clone(),
            detacher.clone(),
            Arc::new(StaticIdentity(IdentityRecord {
                sysname: "Linux".to_string(),
                nodename: "localhost".to_string(),
                release: "5.10.177-android12-9".to_string(),
                version: "#1 SMP PREEMPT Mon Jan 1".to_string(),
                machine: "aarch64".to_string(),
                domainname: "(none)".to_string(),
            })),
        )
        .unwrap();
        Self {
            dispatcher: Dispatcher::new(Arc::new(shroud)),
            store,
            detacher,
        }
    }

    fn shroud(&self) -> &Shroud {
        self.dispatcher.shroud()
    }

    fn send(&self, command: AdminCommand) -> Status {
        let payload = command.encode().unwrap();
        self.dispatcher.dispatch(command.code(), &payload)
    }
}

fn profile(path: &str, observed_id: u64) -> StatSpoofRecord {
    StatSpoofRecord {
        static_flag: false,
        observed_id,
        path: path.to_string(),
        spoofed_id: 1201,
        spoofed_device: huge_encode(make_dev(254, 4)),
        spoofed_link_count: 1,
        spoofed_size: 1_024_000,
        spoofed_atime: Timespec::new(1_230_768_000, 0),
        spoofed_mtime: Timespec::new(1_230_768_000, 0),
        spoofed_ctime: Timespec::new(1_230_768_000, 0),
        spoofed_block_size: 4096,
        spoofed_block_count: 2000,
    }
}

#[test]
fn administrative_session_populates_registries() {
    let h = Harness::new(ShroudConfig::default());
    h.store.create("/data/adb/modules");
    h.store.create("/debug_ramdisk");
    h.store.create("/system/lib64/libhook.so");

    let calls = vec![
        AdminCommand::AddPath(PathRecord {
            numeric_id: 4711,
            path: "/data/adb/modules".to_string(),
        }),
        AdminCommand::AddMount(MountRecord {
            path: "/debug_ramdisk".to_string(),
            device_id: huge_encode(make_dev(0, 45)),
        }),
        AdminCommand::AddKstat(profile("/system/lib64/libhook.so", 88)),
        AdminCommand::AddUnmount(UnmountRecord {
            path: "/system/etc/hosts".to_string(),
            detach_mode: DetachMode::Force,
        }),
        AdminCommand::SetUname {
            release: "default".to_string(),
            version: "#1 SMP PREEMPT Fri Jan 1".to_string(),
        },
    ];
    for command in calls {
        let name = command.name();
        assert_eq!(h.send(command), Status::Success, "{}", name);
    }

    let shroud = h.shroud();
    assert!(shroud.is_path_concealed(4711));
    assert_eq!(
        shroud.flags_of("/data/adb/modules"),
        Some(ConcealFlags::PATH)
    );
    assert_eq!(
        shroud.mounts().get("/debug_ramdisk").unwrap().device_id,
        make_dev(0, 45)
    );
    let spoofed = shroud.spoofed_of("/system/lib64/libhook.so").unwrap();
    assert_eq!(spoofed.device, make_dev(254, 4));
    assert_eq!(spoofed.block_count, 2000);

    let identity = shroud.active_identity_spoof().unwrap();
    assert_eq!(identity.release, "5.10.177-android12-9");
    assert_eq!(identity.version, "#1 SMP PREEMPT Fri Jan 1");

    let report = shroud.run_unmount_pass(2000);
    assert_eq!(report.attempted, 1);
    assert_eq!(
        h.detacher.calls(),
        vec![("/system/etc/hosts".to_string(), DetachMode::Force)]
    );
}

#[test]
fn every_device_encoding_decodes_to_one_value() {
    let devices = [(8, 1), (253, 0), (179, 32), (0, 255), (259, 65_535)];
    for (major, minor) in devices {
        let dev = make_dev(major, minor);
        let mut variants = vec![
            (DeviceEncoding::New, u64::from(new_encode(dev))),
            (DeviceEncoding::Huge, huge_encode(dev)),
        ];
        if major < 256 && minor < 256 {
            variants.push((DeviceEncoding::Old, u64::from(old_encode(dev))));
        }

        for (encoding, packed) in variants {
            let h = Harness::new(ShroudConfig {
                device_encoding: encoding,
                logging: false,
                ..Default::default()
            });
            let mut payload = AdminCommand::AddMount(MountRecord {
                path: "/mnt/overlay".to_string(),
                device_id: 0,
            })
            .encode()
            .unwrap();
            let len = payload.len();
            payload[len - 8..].copy_from_slice(&packed.to_ne_bytes());

            assert_eq!(h.dispatcher.dispatch(CMD_ADD_MOUNT, &payload), Status::Success);
            assert_eq!(
                h.shroud().mounts().get("/mnt/overlay").unwrap().device_id,
                dev,
                "{}:{} via {}",
                major,
                minor,
                encoding
            );
        }
    }
}

#[test]
fn failures_report_status_one_and_leave_state_alone() {
    let h = Harness::new(ShroudConfig::default());

    let unmount = AdminCommand::AddUnmount(UnmountRecord {
        path: "/vendor/bin/magisk".to_string(),
        detach_mode: DetachMode::Normal,
    });
    assert_eq!(h.send(unmount.clone()), Status::Success);
    assert_eq!(h.send(unmount), Status::Failure);
    assert_eq!(h.shroud().unmounts().len(), 1);

    let refresh = AdminCommand::RefreshKstat(StatRefresh {
        path: "/not/registered".to_string(),
        observed_id: 1,
        spoofed_size: 10,
        spoofed_block_count: 1,
    });
    assert_eq!(h.send(refresh), Status::Failure);
    assert!(h.shroud().kstats().is_empty());

    assert_eq!(
        h.dispatcher.dispatch(CMD_ADD_PATH, &[0u8; PATH_PAYLOAD_LEN - 1]),
        Status::Failure
    );
    assert_eq!(h.dispatcher.dispatch(0x55599, &[]), Status::Failure);
    assert_eq!(h.dispatcher.dispatch(0x60000, &[0u8; 260]), Status::Failure);
    assert!(h.shroud().paths().is_empty());

    let status = h.dispatcher.dispatch(CMD_ADD_PATH, &[b'x'; PATH_PAYLOAD_LEN]);
    assert_eq!(status.as_code(), 1);
}

#[test]
fn static_registration_then_refresh_by_path() {
    let h = Harness::new(ShroudConfig::default());

    let payload = AdminCommand::AddKstat(profile("/system/bin/late", 500))
        .encode()
        .unwrap();
    assert_eq!(
        h.dispatcher.dispatch(CMD_ADD_KSTAT_STATICALLY, &payload),
        Status::Success
    );
    let stored = h.shroud().kstats().find_by_observed_id(500).unwrap();
    assert!(stored.static_flag);
    assert_eq!(h.shroud().spoofed_of("/system/bin/late"), None);

    h.store.create("/system/bin/late");
    let refresh = AdminCommand::RefreshKstat(StatRefresh {
        path: "/system/bin/late".to_string(),
        observed_id: 501,
        spoofed_size: 0,
        spoofed_block_count: 0,
    });
    let payload = refresh.encode().unwrap();
    assert_eq!(
        h.dispatcher.dispatch(CMD_REFRESH_KSTAT, &payload),
        Status::Success
    );

    let stored = h.shroud().kstats().get("/system/bin/late").unwrap();
    assert_eq!(stored.observed_id, 501);
    assert_eq!(stored.spoofed_size, 1_024_000);
    assert_eq!(stored.spoofed_block_count, 2000);
    assert!(stored.static_flag);
    assert_eq!(
        h.shroud().spoofed_of("/system/bin/late").unwrap().size,
        1_024_000
    );
}

#[test]
fn disabled_logging_silences_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let h = Harness::new(ShroudConfig {
        audit_log: Some(audit_path.clone()),
        ..Default::default()
    });

    h.send(AdminCommand::AddPath(PathRecord {
        numeric_id: 1,
        path: "/a".to_string(),
    }));
    let before = h.shroud().audit().emitted();
    assert!(before > 0);

    assert_eq!(
        h.dispatcher.dispatch(CMD_SET_LOGGING, &0i32.to_ne_bytes()),
        Status::Success
    );
    h.send(AdminCommand::AddPath(PathRecord {
        numeric_id: 2,
        path: "/b".to_string(),
    }));
    assert_eq!(h.shroud().audit().emitted(), before);
    assert!(h.shroud().is_path_concealed(2));

    let lines: Vec<serde_json::Value> = std::fs::read_to_string(&audit_path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len() as u64, before);
    assert!(lines
        .iter()
        .any(|event| event["event_type"] == "added" && event["path"] == "/a"));
}

#[test]
fn manifest_file_matches_dispatched_calls() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("shroud.json");
    std::fs::write(
        &config_path,
        r#"{
            "logging": false,
            "device_encoding": "new",
            "manifest": [
                {"kind": "path", "path": "/data/adb/ksu", "numeric_id": 12},
                {"kind": "mount", "path": "/data/adb/ksu", "device_id": 2049},
                {"kind": "unmount", "path": "/data/adb/ksu"},
                {"kind": "uname", "release": "4.19.157", "version": "default"}
            ]
        }"#,
    )
    .unwrap();

    let config = ShroudConfig::load(&config_path).unwrap();
    let h = Harness::new(config);
    h.store.create("/data/adb/ksu");
    let report = h.shroud().apply_configured_manifest();

    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.applied, 4);
    assert_eq!(
        h.shroud().flags_of("/data/adb/ksu"),
        Some(ConcealFlags::PATH | ConcealFlags::MOUNT)
    );
    assert_eq!(
        h.shroud().mounts().get("/data/adb/ksu").unwrap().device_id,
        make_dev(8, 1)
    );
    assert_eq!(
        h.shroud().unmounts().snapshot()[0].detach_mode,
        DetachMode::Normal
    );
    let identity = h.shroud().active_identity_spoof().unwrap();
    assert_eq!(identity.release, "4.19.157");
    assert_eq!(identity.version, "#1 SMP PREEMPT Mon Jan 1");
}

#[test]
fn refresh_stores_full_width_block_count() {
    let h = Harness::new(ShroudConfig::default());
    assert_eq!(
        h.send(AdminCommand::AddKstat(profile("/a", 1))),
        Status::Success
    );

    let refresh = AdminCommand::RefreshKstat(StatRefresh {
        path: "/a".to_string(),
        observed_id: 2,
        spoofed_size: 0,
        spoofed_block_count: 0x8000_0000_0000_0001,
    });
    assert_eq!(h.send(refresh), Status::Success);

    let stored = h.shroud().kstats().get("/a").unwrap();
    assert_eq!(stored.spoofed_block_count, 0x8000_0000_0000_0001);
    assert_eq!(stored.spoofed_size, 1_024_000);
}

#[test]
fn static_identifier_only_profiles_are_kept_apart() {
    let h = Harness::new(ShroudConfig::default());
    for observed_id in [100, 200] {
        let payload = AdminCommand::AddKstat(profile("", observed_id))
            .encode()
            .unwrap();
        assert_eq!(
            h.dispatcher.dispatch(CMD_ADD_KSTAT_STATICALLY, &payload),
            Status::Success
        );
    }

    let kstats = h.shroud().kstats();
    assert_eq!(kstats.len(), 2);
    assert!(kstats.find_by_observed_id(100).unwrap().static_flag);
    assert!(kstats.find_by_observed_id(200).unwrap().static_flag);
    assert_eq!(h.shroud().metrics().kstat.inserted.get(), 2);
}
