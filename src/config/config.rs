use crate::config::types::{
    DetachMode, Result, ShroudError, StatRefresh, StatSpoofRecord, MAX_PATH_LEN, UTS_FIELD_LEN,
};
use crate::kernel::device::DeviceEncoding;
/// Configuration loading from a JSON file
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_logging() -> bool {
    true
}

fn default_max_records() -> usize {
    65536
}

/// Full configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShroudConfig {
    /// Initial state of the log sink
    #[serde(default = "default_logging")]
    pub logging: bool,
    /// Mirror audit events to this JSON-lines file
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
    /// Packed layout incoming device ids use
    #[serde(default)]
    pub device_encoding: DeviceEncoding,
    /// Upper bound on records a single registry will hold
    #[serde(default = "default_max_records")]
    pub max_records_per_registry: usize,
    /// Administrative records applied at startup
    #[serde(default)]
    pub manifest: Vec<ManifestEntry>,
}

impl Default for ShroudConfig {
    fn default() -> Self {
        Self {
            logging: default_logging(),
            audit_log: None,
            device_encoding: DeviceEncoding::default(),
            max_records_per_registry: default_max_records(),
            manifest: Vec::new(),
        }
    }
}

/// One administrative record in a manifest.
///
/// Device ids are given in the configured legacy encoding, exactly as the
/// control channel would carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestEntry {
    Path {
        path: String,
        numeric_id: u64,
    },
    Mount {
        path: String,
        device_id: u64,
    },
    Kstat {
        #[serde(flatten)]
        record: StatSpoofRecord,
    },
    RefreshKstat {
        #[serde(flatten)]
        refresh: StatRefresh,
    },
    Unmount {
        path: String,
        #[serde(default = "default_detach_mode")]
        detach_mode: DetachMode,
    },
    Uname {
        release: String,
        version: String,
    },
}

fn default_detach_mode() -> DetachMode {
    DetachMode::Normal
}

impl ManifestEntry {
    fn path(&self) -> Option<&str> {
        match self {
            ManifestEntry::Path { path, .. }
            | ManifestEntry::Mount { path, .. }
            | ManifestEntry::Unmount { path, .. } => Some(path),
            ManifestEntry::Kstat { record } => Some(&record.path),
            ManifestEntry::RefreshKstat { refresh } => Some(&refresh.path),
            ManifestEntry::Uname { .. } => None,
        }
    }
}

impl ShroudConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShroudError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: ShroudConfig = serde_json::from_str(content)
            .map_err(|e| ShroudError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_records_per_registry == 0 {
            return Err(ShroudError::Config(
                "max_records_per_registry must be positive".to_string(),
            ));
        }

        for (index, entry) in self.manifest.iter().enumerate() {
            if let Some(path) = entry.path() {
                if path.len() >= MAX_PATH_LEN {
                    return Err(ShroudError::Config(format!(
                        "manifest entry {}: path longer than {} bytes",
                        index,
                        MAX_PATH_LEN - 1
                    )));
                }
            }
            if let ManifestEntry::Uname { release, version } = entry {
                if release.len() >= UTS_FIELD_LEN || version.len() >= UTS_FIELD_LEN {
                    return Err(ShroudError::Config(format!(
                        "manifest entry {}: uname fields are limited to {} bytes",
                        index,
                        UTS_FIELD_LEN - 1
                    )));
                }
            }
        }
        Ok(())
    }
}
