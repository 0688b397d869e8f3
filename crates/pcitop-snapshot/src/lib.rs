#![forbid(unsafe_code)]
//! Binary capture and replay of a PCI topology.

mod error;
mod format;
mod io;
mod source;

use std::io::{Read, Seek, SeekFrom, Write};

use pcitop_core::{BusAddress, BusDescriptor, DeviceRecord, RawDeviceDescriptor, ResourceTriple};

pub use crate::error::{Result, SnapshotError};
pub use crate::format::{
    DeviceRecordHeader, SnapshotHeader, BUS_RECORD_SIZE, CONFIG_SIZE_EXTENDED, CONFIG_SIZE_LEGACY,
    DEVICE_STATIC_SIZE, HEADER_SIZE, MAX_DRIVER_NAME_LEN, NO_VALUE, RESOURCE_RECORD_SIZE,
    SNAPSHOT_MAGIC,
};
pub use crate::source::{publish_snapshot, SnapshotSource};

use crate::io::{ReadLeExt, WriteLeExt};

/// A decoded snapshot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Capture time, seconds since the Unix epoch.
    pub created: u64,
    pub devices: Vec<RawDeviceDescriptor>,
    pub buses: Vec<BusDescriptor>,
}

/// Encodes a snapshot at the current position of `w` and returns the number of bytes written.
///
/// Records are written first; the header goes in last once the size and counts are known.
/// Empty device or bus tables are refused since the reader would reject the file.
pub fn write_snapshot<W: Write + Seek>(
    w: &mut W,
    devices: &[DeviceRecord<'_>],
    buses: &[BusDescriptor],
    created: u64,
) -> Result<u64> {
    if devices.is_empty() {
        return Err(SnapshotError::EmptyTable("device"));
    }
    if buses.is_empty() {
        return Err(SnapshotError::EmptyTable("bus"));
    }
    let device_count: u32 = devices
        .len()
        .try_into()
        .map_err(|_| SnapshotError::TooLarge("device table"))?;
    let bus_count: u32 = buses
        .len()
        .try_into()
        .map_err(|_| SnapshotError::TooLarge("bus table"))?;

    let start = w.stream_position()?;
    w.seek(SeekFrom::Start(start + HEADER_SIZE))?;

    for (index, device) in devices.iter().enumerate() {
        write_device(w, device, index + 1 == devices.len())?;
    }
    for bus in buses {
        w.write_u16_le(bus.domain)?;
        w.write_u16_le(u16::from(bus.bus))?;
        w.write_u16_le(u16::from(bus.is_root))?;
    }

    let end = w.stream_position()?;
    let file_size = end
        .checked_sub(start)
        .ok_or(SnapshotError::Corrupt("stream position underflow"))?;

    w.seek(SeekFrom::Start(start))?;
    SnapshotHeader {
        created,
        file_size,
        device_count,
        bus_count,
    }
    .encode(w)?;
    w.seek(SeekFrom::Start(end))?;
    Ok(file_size)
}

fn write_device<W: Write>(w: &mut W, device: &DeviceRecord<'_>, is_final: bool) -> Result<()> {
    let extended_config = match device.config.len() {
        CONFIG_SIZE_LEGACY => false,
        CONFIG_SIZE_EXTENDED => true,
        _ => return Err(SnapshotError::Corrupt("config space is neither 256 nor 4096 bytes")),
    };
    let resource_count: u8 = device
        .resources
        .len()
        .try_into()
        .map_err(|_| SnapshotError::TooLarge("resource list"))?;
    let driver_len = match device.driver {
        None => 0,
        Some(name) if name.len() > MAX_DRIVER_NAME_LEN => {
            return Err(SnapshotError::TooLarge("driver name"))
        }
        Some(name) if name.contains('\0') => {
            return Err(SnapshotError::Corrupt("driver name has an embedded NUL"))
        }
        Some(name) => (name.len() + 1) as u8,
    };

    DeviceRecordHeader {
        d_bdf: device.address.to_u64(),
        extended_config,
        resource_count,
        numa_node: device.numa_node.unwrap_or(NO_VALUE),
        iommu_group: device.iommu_group.unwrap_or(NO_VALUE),
        driver_len,
        is_final,
    }
    .encode(w)?;

    for res in device.resources {
        w.write_u64_le(res.start)?;
        w.write_u64_le(res.end)?;
        w.write_u64_le(res.flags)?;
    }
    if let Some(name) = device.driver {
        w.write_cstr(name)?;
    }
    w.write_bytes(device.config)?;
    Ok(())
}

/// Decodes and validates a whole snapshot starting at the current position of `r`.
///
/// Nothing is returned unless every record decodes and the header agrees with the data.
pub fn read_snapshot<R: Read + Seek>(r: &mut R) -> Result<Snapshot> {
    let start = r.stream_position()?;
    let end = r.seek(SeekFrom::End(0))?;
    r.seek(SeekFrom::Start(start))?;
    let actual = end.saturating_sub(start);

    let header = SnapshotHeader::decode(r)?;
    if header.file_size != actual {
        return Err(SnapshotError::SizeMismatch {
            declared: header.file_size,
            actual,
        });
    }
    if header.device_count == 0 {
        return Err(SnapshotError::EmptyTable("device"));
    }
    if header.bus_count == 0 {
        return Err(SnapshotError::EmptyTable("bus"));
    }

    let body = actual - HEADER_SIZE;
    let bus_table = u64::from(header.bus_count) * BUS_RECORD_SIZE;
    let fixed = u64::from(header.device_count) * DEVICE_STATIC_SIZE + bus_table;
    if fixed > body {
        return Err(SnapshotError::Corrupt("record counts exceed file size"));
    }

    // Bytes left for device records; each one must fit before its variable part is read.
    let mut remaining = body - bus_table;
    let mut devices = Vec::with_capacity(header.device_count as usize);
    for index in 0..header.device_count {
        let is_last = index + 1 == header.device_count;
        devices.push(read_device(r, is_last, &mut remaining)?);
    }

    let mut buses = Vec::with_capacity(header.bus_count as usize);
    for _ in 0..header.bus_count {
        buses.push(read_bus(r)?);
    }

    if r.stream_position()? != end {
        return Err(SnapshotError::Corrupt("trailing bytes after bus table"));
    }

    Ok(Snapshot {
        created: header.created,
        devices,
        buses,
    })
}

fn read_device<R: Read>(
    r: &mut R,
    is_last: bool,
    remaining: &mut u64,
) -> Result<RawDeviceDescriptor> {
    let record = DeviceRecordHeader::decode(r)?;
    *remaining = remaining
        .checked_sub(DEVICE_STATIC_SIZE + record.dynamic_len())
        .ok_or(SnapshotError::Corrupt("device record overruns the device table"))?;
    if record.is_final != is_last {
        return Err(SnapshotError::Corrupt("final-device flag out of place"));
    }
    let address = BusAddress::from_u64(record.d_bdf)
        .map_err(|_| SnapshotError::Corrupt("invalid device address"))?;

    let mut resources = Vec::with_capacity(usize::from(record.resource_count));
    for _ in 0..record.resource_count {
        let start = r.read_u64_le()?;
        let end = r.read_u64_le()?;
        let flags = r.read_u64_le()?;
        resources.push(ResourceTriple::new(start, end, flags));
    }

    let driver = match record.driver_len {
        0 => None,
        len => Some(r.read_cstr(usize::from(len))?),
    };
    let config = r.read_exact_vec(record.config_len())?;

    Ok(RawDeviceDescriptor {
        address,
        config,
        resources,
        driver,
        numa_node: (record.numa_node != NO_VALUE).then_some(record.numa_node),
        iommu_group: (record.iommu_group != NO_VALUE).then_some(record.iommu_group),
    })
}

fn read_bus<R: Read>(r: &mut R) -> Result<BusDescriptor> {
    let domain = r.read_u16_le()?;
    let bus = u8::try_from(r.read_u16_le()?)
        .map_err(|_| SnapshotError::Corrupt("bus number out of range"))?;
    let is_root = match r.read_u16_le()? {
        0 => false,
        1 => true,
        _ => return Err(SnapshotError::Corrupt("invalid root-bus flag")),
    };
    Ok(BusDescriptor {
        domain,
        bus,
        is_root,
    })
}
