//! Real system identity (`uname(2)`) and the caller's effective uid.

use crate::config::types::{Result, ShroudError};
use serde::{Deserialize, Serialize};

/// The six identity fields reported by system identification
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub sysname: String,
    pub nodename: String,
    pub release: String,
    pub version: String,
    pub machine: String,
    pub domainname: String,
}

/// Source of the live system identity
pub trait IdentitySource: Send + Sync {
    fn current(&self) -> Result<IdentityRecord>;
}

/// Identity read from the running kernel
#[derive(Debug, Default, Clone, Copy)]
pub struct HostIdentity;

impl IdentitySource for HostIdentity {
    fn current(&self) -> Result<IdentityRecord> {
        let uts = nix::sys::utsname::uname()
            .map_err(|e| ShroudError::Identity(format!("uname failed: {}", e)))?;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        let domainname = uts.domainname().to_string_lossy().into_owned();
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let domainname = String::new();

        Ok(IdentityRecord {
            sysname: uts.sysname().to_string_lossy().into_owned(),
            nodename: uts.nodename().to_string_lossy().into_owned(),
            release: uts.release().to_string_lossy().into_owned(),
            version: uts.version().to_string_lossy().into_owned(),
            machine: uts.machine().to_string_lossy().into_owned(),
            domainname,
        })
    }
}

/// Effective uid of the calling process, used to attribute audit events and
/// unmount passes
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// Fixed identity, for tests and dry runs
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub IdentityRecord);

impl IdentitySource for StaticIdentity {
    fn current(&self) -> Result<IdentityRecord> {
        Ok(self.0.clone())
    }
}
