/// Registry audit trail for shroud
/// Provides the toggleable log sink every registry reports to
///
/// - Attribution: effective uid and pid of the caller
/// - Event types: add, update, reject, resolution failure, detach, identity change
/// - Optional JSON-lines mirror for offline review
use crate::config::types::{Result, ShroudError};
use crate::kernel::object::TagKind;
use crate::kernel::uts::effective_uid;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Audit severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditSeverity {
    Error,
    Warning,
    Info,
}

/// Registry an event originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    Path,
    Mount,
    Kstat,
    Unmount,
    Identity,
    Control,
}

impl From<TagKind> for RegistryKind {
    fn from(kind: TagKind) -> Self {
        match kind {
            TagKind::Path => RegistryKind::Path,
            TagKind::Mount => RegistryKind::Mount,
            TagKind::Kstat => RegistryKind::Kstat,
        }
    }
}

/// Types of events the registries emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Added,
    Updated,
    Rejected,
    ResolutionFailed,
    Detaching,
    DetachFailed,
    IdentitySet,
}

impl AuditEventType {
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::Added => AuditSeverity::Info,
            AuditEventType::Updated => AuditSeverity::Info,
            AuditEventType::Detaching => AuditSeverity::Info,
            AuditEventType::IdentitySet => AuditSeverity::Info,
            AuditEventType::ResolutionFailed => AuditSeverity::Warning,
            AuditEventType::DetachFailed => AuditSeverity::Warning,
            AuditEventType::Rejected => AuditSeverity::Error,
        }
    }
}

/// Individual audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub registry: RegistryKind,
    pub path: Option<String>,
    pub details: String,
    pub uid: u32,
    pub pid: u32,
    pub timestamp: u64,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, registry: RegistryKind, details: String) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            registry,
            path: None,
            details,
            uid: effective_uid(),
            pid: std::process::id(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    /// A record was stored; `updated` tells an in-place update from an insert
    pub fn stored(registry: RegistryKind, path: &str, updated: bool, details: String) -> Self {
        let event_type = if updated {
            AuditEventType::Updated
        } else {
            AuditEventType::Added
        };
        Self::new(event_type, registry, details).with_path(path)
    }

    pub fn rejected(registry: RegistryKind, path: Option<&str>, err: &ShroudError) -> Self {
        let event = Self::new(AuditEventType::Rejected, registry, err.to_string());
        match path {
            Some(path) => event.with_path(path),
            None => event,
        }
    }

    pub fn resolution_failed(kind: TagKind, path: &str, err: &ShroudError) -> Self {
        Self::new(
            AuditEventType::ResolutionFailed,
            RegistryKind::from(kind),
            format!("tagging skipped: {}", err),
        )
        .with_path(path)
    }
}

/// Log sink shared by all registries.
///
/// When disabled, events are dropped before reaching the logger or the
/// audit file.
pub struct AuditLog {
    enabled: AtomicBool,
    emitted: AtomicU64,
    audit_file: Option<Mutex<File>>,
    audit_path: Option<PathBuf>,
}

impl AuditLog {
    /// Create a sink, optionally mirroring events to a JSON-lines file
    pub fn new(enabled: bool, audit_path: Option<&Path>) -> Result<Self> {
        let audit_file = match audit_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ShroudError::Config(format!("Failed to create audit log directory: {}", e))
                    })?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| ShroudError::Config(format!("Failed to open audit log: {}", e)))?;
                Some(Mutex::new(file))
            }
            None => None,
        };

        Ok(Self {
            enabled: AtomicBool::new(enabled),
            emitted: AtomicU64::new(0),
            audit_file,
            audit_path: audit_path.map(Path::to_path_buf),
        })
    }

    /// Logger-only sink, enabled
    pub fn enabled() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            emitted: AtomicU64::new(0),
            audit_file: None,
            audit_path: None,
        }
    }

    /// Logger-only sink, disabled
    pub fn disabled() -> Self {
        let log = Self::enabled();
        log.enabled.store(false, Ordering::Relaxed);
        log
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if enabled {
            info!("shroud: logging enabled");
        } else {
            info!("shroud: logging disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Events that passed the enabled gate so far
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn audit_path(&self) -> Option<&Path> {
        self.audit_path.as_deref()
    }

    pub fn record(&self, event: AuditEvent) {
        if !self.is_enabled() {
            return;
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);

        let path = event.path.as_deref().unwrap_or("-");
        match event.severity {
            AuditSeverity::Error => error!(
                "shroud:[{}][{}][{:?}/{:?}] '{}': {}",
                event.uid, event.pid, event.registry, event.event_type, path, event.details
            ),
            AuditSeverity::Warning => warn!(
                "shroud:[{}][{}][{:?}/{:?}] '{}': {}",
                event.uid, event.pid, event.registry, event.event_type, path, event.details
            ),
            AuditSeverity::Info => info!(
                "shroud:[{}][{}][{:?}/{:?}] '{}': {}",
                event.uid, event.pid, event.registry, event.event_type, path, event.details
            ),
        }

        if let Some(file) = &self.audit_file {
            let line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to serialize audit event: {}", e);
                    return;
                }
            };
            match file.lock() {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{}", line) {
                        error!("Failed to write to audit log: {}", e);
                    }
                }
                Err(_) => error!("Failed to acquire lock on audit file"),
            }
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::enabled()
    }
}
