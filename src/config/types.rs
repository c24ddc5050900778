/// Core types and structures for the shroud registries
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of the path arrays carried by administrative payloads (NUL included)
pub const MAX_PATH_LEN: usize = 256;

/// Size of each identity field carried by SetUname payloads (NUL included)
pub const UTS_FIELD_LEN: usize = 65;

/// Literal that selects the real system value for an identity field
pub const IDENTITY_DEFAULT: &str = "default";

/// Path concealment record: a path whose object is hidden from listings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRecord {
    /// Reverse-lookup key; not unique (hard links share it)
    pub numeric_id: u64,
    pub path: String,
}

/// Mount concealment record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    pub path: String,
    /// Canonical device id once stored; legacy-encoded on the wire
    pub device_id: u64,
}

/// A (seconds, nanoseconds) timestamp pair
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }
}

/// Fabricated stat metadata for one path
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatSpoofRecord {
    /// Registered before the object exists. With an empty `path` the record
    /// is keyed by `observed_id` alone
    #[serde(default)]
    pub static_flag: bool,
    /// Identifier the object shows after bind mounts or overlays
    pub observed_id: u64,
    /// Empty for identifier-only records
    #[serde(default)]
    pub path: String,
    pub spoofed_id: u64,
    pub spoofed_device: u64,
    pub spoofed_link_count: u32,
    pub spoofed_size: i64,
    pub spoofed_atime: Timespec,
    pub spoofed_mtime: Timespec,
    pub spoofed_ctime: Timespec,
    pub spoofed_block_size: u64,
    pub spoofed_block_count: u64,
}

/// Late correction for an existing stat spoof record.
///
/// A `spoofed_size` of zero or less and a `spoofed_block_count` of zero leave
/// the stored values untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRefresh {
    pub path: String,
    pub observed_id: u64,
    #[serde(default)]
    pub spoofed_size: i64,
    #[serde(default)]
    pub spoofed_block_count: u64,
}

/// How a mount is detached during an unmount pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetachMode {
    /// Plain unmount; fails while the mount is busy
    Normal,
    /// Lazy detach: unlinked now, released once no longer busy
    Force,
}

impl DetachMode {
    /// Decode the wire value (0 = normal, 1 = force)
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(DetachMode::Normal),
            1 => Some(DetachMode::Force),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            DetachMode::Normal => 0,
            DetachMode::Force => 1,
        }
    }
}

impl fmt::Display for DetachMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetachMode::Normal => write!(f, "normal"),
            DetachMode::Force => write!(f, "force"),
        }
    }
}

/// Unmount directive record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmountRecord {
    pub path: String,
    pub detach_mode: DetachMode,
}

/// Status code returned to administrative callers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    pub fn as_code(self) -> i32 {
        match self {
            Status::Success => 0,
            Status::Failure => 1,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Success,
            Err(_) => Status::Failure,
        }
    }
}

/// Custom error types for shroud
#[derive(Error, Debug)]
pub enum ShroudError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed administrative payload: {0}")]
    Transport(String),

    #[error("Cannot resolve '{path}': {reason}")]
    Resolution { path: String, reason: String },

    #[error("Cannot allocate record: {0}")]
    Allocation(String),

    #[error("'{path}' is not registered")]
    NotFound { path: String },

    #[error("'{path}' is already registered")]
    Duplicate { path: String },

    #[error("Failed to detach '{path}': {reason}")]
    Detach { path: String, reason: String },

    #[error("System identity unavailable: {0}")]
    Identity(String),
}

impl ShroudError {
    /// Short stable name used in audit events and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ShroudError::Io(_) => "io",
            ShroudError::Config(_) => "config",
            ShroudError::Transport(_) => "transport",
            ShroudError::Resolution { .. } => "resolution",
            ShroudError::Allocation(_) => "allocation",
            ShroudError::NotFound { .. } => "not_found",
            ShroudError::Duplicate { .. } => "duplicate",
            ShroudError::Detach { .. } => "detach",
            ShroudError::Identity(_) => "identity",
        }
    }
}

impl From<nix::errno::Errno> for ShroudError {
    fn from(err: nix::errno::Errno) -> Self {
        ShroudError::Io(std::io::Error::from_raw_os_error(err as i32))
    }
}

/// Result type alias for shroud operations
pub type Result<T> = std::result::Result<T, ShroudError>;
