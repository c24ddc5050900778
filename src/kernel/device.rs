//! Legacy device-number codec.
//!
//! Device ids arrive from userspace in one of three historical packed
//! encodings. Every variant decodes to the same canonical id, which packs the
//! major number above a 20-bit minor field.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width of the minor field in a canonical device id
pub const MINOR_BITS: u32 = 20;
const MINOR_MASK: u64 = (1 << MINOR_BITS) - 1;

/// Packed device encoding used by the platform's stat interface
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceEncoding {
    /// 16 bits: 8-bit major, 8-bit minor
    Old,
    /// 32 bits: 12-bit major, 20-bit minor split around the major
    New,
    /// 64-bit container for the 32-bit layout (stat64 platforms)
    #[default]
    Huge,
}

impl DeviceEncoding {
    /// Decode a packed value into a canonical device id
    pub fn decode(self, raw: u64) -> u64 {
        match self {
            DeviceEncoding::Old => old_decode(raw as u16),
            DeviceEncoding::New => new_decode(raw as u32),
            DeviceEncoding::Huge => huge_decode(raw),
        }
    }

    /// Encode a canonical device id; the inverse of [`DeviceEncoding::decode`]
    /// for ids that fit the variant.
    pub fn encode(self, dev: u64) -> u64 {
        match self {
            DeviceEncoding::Old => u64::from(old_encode(dev)),
            DeviceEncoding::New => u64::from(new_encode(dev)),
            DeviceEncoding::Huge => huge_encode(dev),
        }
    }
}

impl fmt::Display for DeviceEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEncoding::Old => write!(f, "old"),
            DeviceEncoding::New => write!(f, "new"),
            DeviceEncoding::Huge => write!(f, "huge"),
        }
    }
}

impl FromStr for DeviceEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "old" => Ok(DeviceEncoding::Old),
            "new" => Ok(DeviceEncoding::New),
            "huge" => Ok(DeviceEncoding::Huge),
            other => Err(format!("unknown device encoding: {}", other)),
        }
    }
}

/// Build a canonical device id
pub fn make_dev(major: u32, minor: u32) -> u64 {
    (u64::from(major) << MINOR_BITS) | (u64::from(minor) & MINOR_MASK)
}

pub fn major(dev: u64) -> u32 {
    (dev >> MINOR_BITS) as u32
}

pub fn minor(dev: u64) -> u32 {
    (dev & MINOR_MASK) as u32
}

pub fn old_decode(val: u16) -> u64 {
    make_dev(u32::from((val >> 8) & 0xff), u32::from(val & 0xff))
}

pub fn old_encode(dev: u64) -> u16 {
    ((major(dev) << 8) | minor(dev)) as u16
}

pub fn new_decode(dev: u32) -> u64 {
    let major = (dev & 0xfff00) >> 8;
    let minor = (dev & 0xff) | ((dev >> 12) & 0xfff00);
    make_dev(major, minor)
}

pub fn new_encode(dev: u64) -> u32 {
    let major = major(dev);
    let minor = minor(dev);
    (minor & 0xff) | (major << 8) | ((minor & !0xff) << 12)
}

/// Only the low 32 bits carry information
pub fn huge_decode(dev: u64) -> u64 {
    new_decode((dev & 0xffff_ffff) as u32)
}

pub fn huge_encode(dev: u64) -> u64 {
    u64::from(new_encode(dev))
}
