//! On-disk layout. All integers are little-endian and records are packed.
//!
//! ```text
//! header     magic[5] created:u64 file_size:u64 device_count:u32 bus_count:u32
//! device     d_bdf:u64 config_size:u8 resource_count:u8 numa:u16 iommu_group:u16
//!            driver_len:u8 is_final:u8
//!            resources[resource_count] { start:u64 end:u64 flags:u64 }
//!            driver[driver_len] (NUL-terminated, absent when driver_len is 0)
//!            config[256 | 4096]
//! bus        domain:u16 bus:u16 is_root:u16
//! ```

use std::io::{Read, Write};

use crate::error::{Result, SnapshotError};
use crate::io::{ReadLeExt, WriteLeExt};

pub const SNAPSHOT_MAGIC: &[u8; 5] = b"xeicp";

pub const HEADER_SIZE: u64 = 29;
pub const DEVICE_STATIC_SIZE: u64 = 16;
pub const RESOURCE_RECORD_SIZE: u64 = 24;
pub const BUS_RECORD_SIZE: u64 = 6;

pub const CONFIG_SIZE_LEGACY: usize = 256;
pub const CONFIG_SIZE_EXTENDED: usize = 4096;

/// Stored in the NUMA and IOMMU-group fields when the value is unknown.
pub const NO_VALUE: u16 = u16::MAX;

/// Longest driver name that fits the one-byte length field with its terminator.
pub const MAX_DRIVER_NAME_LEN: usize = u8::MAX as usize - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Seconds since the Unix epoch.
    pub created: u64,
    /// Total file size, header included.
    pub file_size: u64,
    pub device_count: u32,
    pub bus_count: u32,
}

impl SnapshotHeader {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_bytes(SNAPSHOT_MAGIC)?;
        w.write_u64_le(self.created)?;
        w.write_u64_le(self.file_size)?;
        w.write_u32_le(self.device_count)?;
        w.write_u32_le(self.bus_count)?;
        Ok(())
    }

    /// Decodes a header, rejecting a wrong magic before anything else is read.
    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 5];
        r.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }
        Ok(Self {
            created: r.read_u64_le()?,
            file_size: r.read_u64_le()?,
            device_count: r.read_u32_le()?,
            bus_count: r.read_u32_le()?,
        })
    }
}

/// Fixed-size leading part of a device record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRecordHeader {
    pub d_bdf: u64,
    pub extended_config: bool,
    pub resource_count: u8,
    pub numa_node: u16,
    pub iommu_group: u16,
    /// Driver name length including its terminator; 0 when no driver is bound.
    pub driver_len: u8,
    pub is_final: bool,
}

impl DeviceRecordHeader {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64_le(self.d_bdf)?;
        w.write_u8(u8::from(self.extended_config))?;
        w.write_u8(self.resource_count)?;
        w.write_u16_le(self.numa_node)?;
        w.write_u16_le(self.iommu_group)?;
        w.write_u8(self.driver_len)?;
        w.write_u8(u8::from(self.is_final))?;
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self> {
        let d_bdf = r.read_u64_le()?;
        let extended_config = read_flag(r, "invalid config size flag")?;
        let resource_count = r.read_u8()?;
        let numa_node = r.read_u16_le()?;
        let iommu_group = r.read_u16_le()?;
        let driver_len = r.read_u8()?;
        let is_final = read_flag(r, "invalid final-device flag")?;
        Ok(Self {
            d_bdf,
            extended_config,
            resource_count,
            numa_node,
            iommu_group,
            driver_len,
            is_final,
        })
    }

    pub fn config_len(&self) -> usize {
        if self.extended_config {
            CONFIG_SIZE_EXTENDED
        } else {
            CONFIG_SIZE_LEGACY
        }
    }

    /// Size of the variable part that follows the static block.
    pub fn dynamic_len(&self) -> u64 {
        u64::from(self.resource_count) * RESOURCE_RECORD_SIZE
            + u64::from(self.driver_len)
            + self.config_len() as u64
    }
}

fn read_flag<R: Read>(r: &mut R, what: &'static str) -> Result<bool> {
    match r.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(SnapshotError::Corrupt(what)),
    }
}
