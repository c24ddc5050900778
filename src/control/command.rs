//! Administrative commands and their fixed-size payloads.
//!
//! Payloads are C structs in native byte order with LP64 alignment, one per
//! call. Every string field is a fixed array that must hold a NUL
//! terminator; bytes after the terminator are ignored.
//!
//! | command                 | code      | payload bytes |
//! |-------------------------|-----------|---------------|
//! | add path                | `0x55550` | 264           |
//! | add mount               | `0x55560` | 264           |
//! | add kstat               | `0x55570` | 368           |
//! | refresh kstat           | `0x55571` | 368           |
//! | add kstat statically    | `0x55572` | 368           |
//! | add unmount             | `0x55580` | 260           |
//! | set uname               | `0x55590` | 130           |
//! | set logging             | `0x555a0` | 4             |

use crate::config::config::ManifestEntry;
use crate::config::types::{
    DetachMode, MountRecord, PathRecord, Result, ShroudError, StatRefresh, StatSpoofRecord,
    Timespec, UnmountRecord, MAX_PATH_LEN, UTS_FIELD_LEN,
};
use std::str;

pub const CMD_ADD_PATH: u32 = 0x55550;
pub const CMD_ADD_MOUNT: u32 = 0x55560;
pub const CMD_ADD_KSTAT: u32 = 0x55570;
pub const CMD_REFRESH_KSTAT: u32 = 0x55571;
pub const CMD_ADD_KSTAT_STATICALLY: u32 = 0x55572;
pub const CMD_ADD_UNMOUNT: u32 = 0x55580;
pub const CMD_SET_UNAME: u32 = 0x55590;
pub const CMD_SET_LOGGING: u32 = 0x555a0;

pub const PATH_PAYLOAD_LEN: usize = 8 + MAX_PATH_LEN;
pub const MOUNT_PAYLOAD_LEN: usize = MAX_PATH_LEN + 8;
pub const KSTAT_PAYLOAD_LEN: usize = 368;
pub const UNMOUNT_PAYLOAD_LEN: usize = MAX_PATH_LEN + 4;
pub const UNAME_PAYLOAD_LEN: usize = 2 * UTS_FIELD_LEN;
pub const LOGGING_PAYLOAD_LEN: usize = 4;

/// One decoded administrative request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    AddPath(PathRecord),
    /// `device_id` still in the legacy packed encoding
    AddMount(MountRecord),
    /// `spoofed_device` still in the legacy packed encoding
    AddKstat(StatSpoofRecord),
    RefreshKstat(StatRefresh),
    AddKstatStatically(StatSpoofRecord),
    AddUnmount(UnmountRecord),
    SetUname { release: String, version: String },
    SetLogging(bool),
}

impl AdminCommand {
    pub fn code(&self) -> u32 {
        match self {
            AdminCommand::AddPath(_) => CMD_ADD_PATH,
            AdminCommand::AddMount(_) => CMD_ADD_MOUNT,
            AdminCommand::AddKstat(_) => CMD_ADD_KSTAT,
            AdminCommand::RefreshKstat(_) => CMD_REFRESH_KSTAT,
            AdminCommand::AddKstatStatically(_) => CMD_ADD_KSTAT_STATICALLY,
            AdminCommand::AddUnmount(_) => CMD_ADD_UNMOUNT,
            AdminCommand::SetUname { .. } => CMD_SET_UNAME,
            AdminCommand::SetLogging(_) => CMD_SET_LOGGING,
        }
    }

    pub fn name(&self) -> &'static str {
        command_name(self.code()).unwrap_or("unknown")
    }

    /// Decode the payload that arrived with `code`
    pub fn decode(code: u32, payload: &[u8]) -> Result<Self> {
        let name = command_name(code)
            .ok_or_else(|| ShroudError::Transport(format!("unknown command {:#x}", code)))?;
        let expected = payload_len(code);
        if payload.len() != expected {
            return Err(ShroudError::Transport(format!(
                "{} payload is {} bytes, expected {}",
                name,
                payload.len(),
                expected
            )));
        }

        let mut cursor = Cursor::new(payload);
        let command = match code {
            CMD_ADD_PATH => {
                let numeric_id = cursor.read_u64()?;
                let path = cursor.read_cstr(MAX_PATH_LEN, "path")?;
                AdminCommand::AddPath(PathRecord { numeric_id, path })
            }
            CMD_ADD_MOUNT => {
                let path = cursor.read_cstr(MAX_PATH_LEN, "path")?;
                let device_id = cursor.read_u64()?;
                AdminCommand::AddMount(MountRecord { path, device_id })
            }
            CMD_ADD_KSTAT => AdminCommand::AddKstat(read_kstat(&mut cursor)?),
            CMD_ADD_KSTAT_STATICALLY => {
                let mut record = read_kstat(&mut cursor)?;
                record.static_flag = true;
                AdminCommand::AddKstatStatically(record)
            }
            CMD_REFRESH_KSTAT => {
                let record = read_kstat(&mut cursor)?;
                AdminCommand::RefreshKstat(StatRefresh {
                    path: record.path,
                    observed_id: record.observed_id,
                    spoofed_size: record.spoofed_size,
                    spoofed_block_count: record.spoofed_block_count,
                })
            }
            CMD_ADD_UNMOUNT => {
                let path = cursor.read_cstr(MAX_PATH_LEN, "path")?;
                let raw = cursor.read_i32()?;
                let detach_mode = DetachMode::from_raw(raw).ok_or_else(|| {
                    ShroudError::Transport(format!("unknown detach mode {}", raw))
                })?;
                AdminCommand::AddUnmount(UnmountRecord { path, detach_mode })
            }
            CMD_SET_UNAME => {
                let release = cursor.read_cstr(UTS_FIELD_LEN, "release")?;
                let version = cursor.read_cstr(UTS_FIELD_LEN, "version")?;
                AdminCommand::SetUname { release, version }
            }
            CMD_SET_LOGGING => AdminCommand::SetLogging(cursor.read_i32()? != 0),
            _ => {
                return Err(ShroudError::Transport(format!(
                    "unknown command {:#x}",
                    code
                )))
            }
        };
        Ok(command)
    }

    /// Encode as the fixed-size payload `decode` accepts
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(payload_len(self.code()));
        match self {
            AdminCommand::AddPath(record) => {
                out.extend_from_slice(&record.numeric_id.to_ne_bytes());
                put_cstr(&mut out, &record.path, MAX_PATH_LEN, "path")?;
            }
            AdminCommand::AddMount(record) => {
                put_cstr(&mut out, &record.path, MAX_PATH_LEN, "path")?;
                out.extend_from_slice(&record.device_id.to_ne_bytes());
            }
            AdminCommand::AddKstat(record) | AdminCommand::AddKstatStatically(record) => {
                put_kstat(&mut out, record)?;
            }
            AdminCommand::RefreshKstat(refresh) => {
                let record = StatSpoofRecord {
                    path: refresh.path.clone(),
                    observed_id: refresh.observed_id,
                    spoofed_size: refresh.spoofed_size,
                    spoofed_block_count: refresh.spoofed_block_count,
                    ..Default::default()
                };
                put_kstat(&mut out, &record)?;
            }
            AdminCommand::AddUnmount(record) => {
                put_cstr(&mut out, &record.path, MAX_PATH_LEN, "path")?;
                out.extend_from_slice(&record.detach_mode.as_raw().to_ne_bytes());
            }
            AdminCommand::SetUname { release, version } => {
                put_cstr(&mut out, release, UTS_FIELD_LEN, "release")?;
                put_cstr(&mut out, version, UTS_FIELD_LEN, "version")?;
            }
            AdminCommand::SetLogging(enabled) => {
                out.extend_from_slice(&i32::from(*enabled).to_ne_bytes());
            }
        }
        debug_assert_eq!(out.len(), payload_len(self.code()));
        Ok(out)
    }
}

impl From<&ManifestEntry> for AdminCommand {
    fn from(entry: &ManifestEntry) -> Self {
        match entry {
            ManifestEntry::Path { path, numeric_id } => AdminCommand::AddPath(PathRecord {
                numeric_id: *numeric_id,
                path: path.clone(),
            }),
            ManifestEntry::Mount { path, device_id } => AdminCommand::AddMount(MountRecord {
                path: path.clone(),
                device_id: *device_id,
            }),
            ManifestEntry::Kstat { record } if record.static_flag => {
                AdminCommand::AddKstatStatically(record.clone())
            }
            ManifestEntry::Kstat { record } => AdminCommand::AddKstat(record.clone()),
            ManifestEntry::RefreshKstat { refresh } => AdminCommand::RefreshKstat(refresh.clone()),
            ManifestEntry::Unmount { path, detach_mode } => {
                AdminCommand::AddUnmount(UnmountRecord {
                    path: path.clone(),
                    detach_mode: *detach_mode,
                })
            }
            ManifestEntry::Uname { release, version } => AdminCommand::SetUname {
                release: release.clone(),
                version: version.clone(),
            },
        }
    }
}

pub fn command_name(code: u32) -> Option<&'static str> {
    let name = match code {
        CMD_ADD_PATH => "add_path",
        CMD_ADD_MOUNT => "add_mount",
        CMD_ADD_KSTAT => "add_kstat",
        CMD_REFRESH_KSTAT => "refresh_kstat",
        CMD_ADD_KSTAT_STATICALLY => "add_kstat_statically",
        CMD_ADD_UNMOUNT => "add_unmount",
        CMD_SET_UNAME => "set_uname",
        CMD_SET_LOGGING => "set_logging",
        _ => return None,
    };
    Some(name)
}

fn payload_len(code: u32) -> usize {
    match code {
        CMD_ADD_PATH => PATH_PAYLOAD_LEN,
        CMD_ADD_MOUNT => MOUNT_PAYLOAD_LEN,
        CMD_ADD_KSTAT | CMD_REFRESH_KSTAT | CMD_ADD_KSTAT_STATICALLY => KSTAT_PAYLOAD_LEN,
        CMD_ADD_UNMOUNT => UNMOUNT_PAYLOAD_LEN,
        CMD_SET_UNAME => UNAME_PAYLOAD_LEN,
        CMD_SET_LOGGING => LOGGING_PAYLOAD_LEN,
        _ => 0,
    }
}

fn read_kstat(cursor: &mut Cursor<'_>) -> Result<StatSpoofRecord> {
    let static_flag = cursor.read_i32()? != 0;
    cursor.skip(4)?;
    let observed_id = cursor.read_u64()?;
    let path = cursor.read_cstr(MAX_PATH_LEN, "path")?;
    let spoofed_id = cursor.read_u64()?;
    let spoofed_device = cursor.read_u64()?;
    let spoofed_link_count = cursor.read_u32()?;
    cursor.skip(4)?;
    let spoofed_size = cursor.read_i64()?;
    let (atime_sec, mtime_sec, ctime_sec) =
        (cursor.read_i64()?, cursor.read_i64()?, cursor.read_i64()?);
    let (atime_nsec, mtime_nsec, ctime_nsec) =
        (cursor.read_i64()?, cursor.read_i64()?, cursor.read_i64()?);
    let spoofed_block_size = cursor.read_u64()?;
    let spoofed_block_count = cursor.read_u64()?;

    Ok(StatSpoofRecord {
        static_flag,
        observed_id,
        path,
        spoofed_id,
        spoofed_device,
        spoofed_link_count,
        spoofed_size,
        spoofed_atime: Timespec::new(atime_sec, atime_nsec),
        spoofed_mtime: Timespec::new(mtime_sec, mtime_nsec),
        spoofed_ctime: Timespec::new(ctime_sec, ctime_nsec),
        spoofed_block_size,
        spoofed_block_count,
    })
}

fn put_kstat(out: &mut Vec<u8>, record: &StatSpoofRecord) -> Result<()> {
    out.extend_from_slice(&i32::from(record.static_flag).to_ne_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&record.observed_id.to_ne_bytes());
    put_cstr(out, &record.path, MAX_PATH_LEN, "path")?;
    out.extend_from_slice(&record.spoofed_id.to_ne_bytes());
    out.extend_from_slice(&record.spoofed_device.to_ne_bytes());
    out.extend_from_slice(&record.spoofed_link_count.to_ne_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&record.spoofed_size.to_ne_bytes());
    for sec in [
        record.spoofed_atime.sec,
        record.spoofed_mtime.sec,
        record.spoofed_ctime.sec,
    ] {
        out.extend_from_slice(&sec.to_ne_bytes());
    }
    for nsec in [
        record.spoofed_atime.nsec,
        record.spoofed_mtime.nsec,
        record.spoofed_ctime.nsec,
    ] {
        out.extend_from_slice(&nsec.to_ne_bytes());
    }
    out.extend_from_slice(&record.spoofed_block_size.to_ne_bytes());
    out.extend_from_slice(&record.spoofed_block_count.to_ne_bytes());
    Ok(())
}

fn put_cstr(out: &mut Vec<u8>, value: &str, width: usize, field: &str) -> Result<()> {
    if value.len() >= width || value.contains('\0') {
        return Err(ShroudError::Transport(format!(
            "{} does not fit a {}-byte field",
            field, width
        )));
    }
    out.extend_from_slice(value.as_bytes());
    out.resize(out.len() + width - value.len(), 0);
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.saturating_add(len);
        if end > self.buf.len() {
            return Err(ShroudError::Transport("payload truncated".to_string()));
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_ne_bytes(self.read_array()?))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_ne_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_ne_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_ne_bytes(self.read_array()?))
    }

    /// A NUL-terminated UTF-8 string in a `width`-byte array
    fn read_cstr(&mut self, width: usize, field: &str) -> Result<String> {
        let bytes = self.take(width)?;
        let end = bytes.iter().position(|&b| b == 0).ok_or_else(|| {
            ShroudError::Transport(format!("{} is not NUL-terminated", field))
        })?;
        let text = str::from_utf8(&bytes[..end])
            .map_err(|_| ShroudError::Transport(format!("{} is not valid UTF-8", field)))?;
        Ok(text.to_owned())
    }
}
