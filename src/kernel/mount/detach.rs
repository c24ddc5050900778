/// Mount detach primitive used by unmount passes
use crate::config::types::{DetachMode, Result, ShroudError};
use std::sync::Mutex;

#[cfg(any(target_os = "linux", target_os = "android"))]
use nix::mount::{umount2, MntFlags};
#[cfg(any(target_os = "linux", target_os = "android"))]
use std::path::Path;

/// Detaches a mount from the caller's namespace
pub trait Detacher: Send + Sync {
    fn detach(&self, path: &str, mode: DetachMode) -> Result<()>;
}

/// Detacher backed by `umount2(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelDetacher;

impl KernelDetacher {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn flags(mode: DetachMode) -> MntFlags {
        match mode {
            DetachMode::Normal => MntFlags::empty(),
            DetachMode::Force => MntFlags::MNT_DETACH,
        }
    }
}

impl Detacher for KernelDetacher {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn detach(&self, path: &str, mode: DetachMode) -> Result<()> {
        umount2(Path::new(path), Self::flags(mode)).map_err(|e| ShroudError::Detach {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn detach(&self, path: &str, _mode: DetachMode) -> Result<()> {
        Err(ShroudError::Detach {
            path: path.to_string(),
            reason: "umount2 is not supported on this platform".to_string(),
        })
    }
}

/// Detacher that only records what it was asked to do
#[derive(Debug, Default)]
pub struct DryRunDetacher {
    calls: Mutex<Vec<(String, DetachMode)>>,
}

impl DryRunDetacher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, DetachMode)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Detacher for DryRunDetacher {
    fn detach(&self, path: &str, mode: DetachMode) -> Result<()> {
        log::debug!("dry run: would detach {} ({})", path, mode);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((path.to_string(), mode));
        }
        Ok(())
    }
}
