//! Data source backed by the running kernel's sysfs PCI namespaces.
//!
//! Buses come from `class/pci_bus`, one symlink per bus. Devices come from
//! `bus/pci/devices`, one directory (or symlink to one) per function, holding:
//!
//! - `config`: raw configuration space (its size selects 256 or 4096 bytes)
//! - `resource`: one `0x<start> 0x<end> 0x<flags>` line per resource
//! - `driver`, `iommu_group`: optional symlinks
//! - `numa_node`: optional, `-1` when unknown

use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use crate::address::{parse_bus_id, BusAddress};
use crate::error::{Error, Result};
use crate::resources::ResourceTriple;
use crate::source::{BusDescriptor, DataSource, RawDeviceDescriptor};

pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

#[derive(Debug, Clone)]
pub struct LiveSource {
    root: PathBuf,
}

impl Default for LiveSource {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

impl LiveSource {
    /// Source rooted at `root`, normally `/sys`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bus_class_dir(&self) -> PathBuf {
        self.root.join("class").join("pci_bus")
    }

    fn devices_dir(&self) -> PathBuf {
        self.root.join("bus").join("pci").join("devices")
    }
}

impl DataSource for LiveSource {
    fn list_buses(&mut self) -> Result<Vec<BusDescriptor>> {
        let dir = self.bus_class_dir();
        let entries = fs::read_dir(&dir).map_err(|source| Error::SourceUnavailable {
            path: dir.clone(),
            source,
        })?;

        let mut buses = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();

            let meta = fs::symlink_metadata(&path).map_err(|source| Error::Io {
                path: path.clone(),
                source,
            })?;
            if !meta.file_type().is_symlink() {
                return Err(Error::malformed(
                    "bus namespace",
                    format!("{} is not a symlink", path.display()),
                ));
            }

            let name = entry.file_name();
            let name = name.to_string_lossy();
            let (domain, bus) = parse_bus_id(&name)?;

            let target = fs::read_link(&path).map_err(|source| Error::Io {
                path: path.clone(),
                source,
            })?;
            buses.push(BusDescriptor {
                domain,
                bus,
                is_root: is_root_bus_link(&target),
            });
        }

        buses.sort_by_key(|b| (b.domain, b.bus));
        tracing::debug!("found {} buses under {}", buses.len(), dir.display());
        Ok(buses)
    }

    fn list_devices(&mut self) -> Result<Vec<RawDeviceDescriptor>> {
        let dir = self.devices_dir();
        let entries = fs::read_dir(&dir).map_err(|source| Error::SourceUnavailable {
            path: dir.clone(),
            source,
        })?;

        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::Io {
                path: dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let address: BusAddress = name.to_string_lossy().parse()?;
            devices.push(read_device(address, &entry.path())?);
        }

        devices.sort_by_key(|d| d.address);
        tracing::debug!("found {} devices under {}", devices.len(), dir.display());
        Ok(devices)
    }
}

fn read_device(address: BusAddress, dir: &Path) -> Result<RawDeviceDescriptor> {
    let config = read_config(&dir.join("config"))?;
    let resources = read_resources(&dir.join("resource"))?;

    let driver = link_name(&dir.join("driver"));
    if driver.is_none() {
        tracing::debug!("{address}: no driver bound");
    }
    let numa_node = read_numa_node(&dir.join("numa_node"));
    let iommu_group = link_name(&dir.join("iommu_group")).and_then(|group| group.parse().ok());
    if iommu_group.is_none() {
        tracing::debug!("{address}: no IOMMU group");
    }

    Ok(RawDeviceDescriptor {
        address,
        config,
        resources,
        driver,
        numa_node,
        iommu_group,
    })
}

/// Reads the whole `config` file; the file size decides legacy vs. extended space.
fn read_config(path: &Path) -> Result<Vec<u8>> {
    let mut file = fs::File::open(path).map_err(|source| Error::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    let expected = file
        .metadata()
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    let mut bytes = Vec::with_capacity(expected as usize);
    file.read_to_end(&mut bytes).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if (bytes.len() as u64) < expected {
        return Err(Error::PartialIo {
            path: path.to_path_buf(),
            expected,
            found: bytes.len() as u64,
        });
    }
    Ok(bytes)
}

fn read_resources(path: &Path) -> Result<Vec<ResourceTriple>> {
    let text = fs::read_to_string(path).map_err(|source| Error::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            parse_resource_line(line).ok_or_else(|| {
                Error::malformed("resource line", format!("{}: {line:?}", path.display()))
            })
        })
        .collect()
}

pub(crate) fn parse_resource_line(line: &str) -> Option<ResourceTriple> {
    let mut fields = line.split_whitespace().map(parse_hex);
    let start = fields.next()??;
    let end = fields.next()??;
    let flags = fields.next()??;
    if fields.next().is_some() {
        return None;
    }
    Some(ResourceTriple { start, end, flags })
}

fn parse_hex(field: &str) -> Option<u64> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);
    u64::from_str_radix(digits, 16).ok()
}

/// Final path component of a symlink target, e.g. the driver name behind `driver`.
fn link_name(path: &Path) -> Option<String> {
    match fs::read_link(path) {
        Ok(target) => target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::debug!("{}: {err}", path.display());
            }
            None
        }
    }
}

fn read_numa_node(path: &Path) -> Option<u16> {
    let text = fs::read_to_string(path).ok()?;
    // `-1` (no affinity) fails the unsigned parse and reads as unknown.
    text.trim().parse::<u16>().ok()
}

/// Whether a `class/pci_bus` link points at a host-bridge bus.
///
/// A root bus hangs directly off its host bridge segment:
/// `../../devices/pci0000:00/pci_bus/0000:00`. A bus behind a bridge has the bridge's device
/// segment in between: `../../devices/pci0000:00/0000:00:1c.0/pci_bus/0000:01`.
fn is_root_bus_link(target: &Path) -> bool {
    let segments: Vec<&str> = target
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    let Some(pci_bus) = segments.iter().rposition(|s| *s == "pci_bus") else {
        return false;
    };
    pci_bus
        .checked_sub(1)
        .and_then(|parent| segments[parent].strip_prefix("pci"))
        .is_some_and(|host| parse_bus_id(host).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_lines() {
        assert_eq!(
            parse_resource_line("0x00000000fe000000 0x00000000fe7fffff 0x0000000000140204"),
            Some(ResourceTriple::new(0xfe00_0000, 0xfe7f_ffff, 0x0014_0204))
        );
        assert_eq!(
            parse_resource_line("0x0 0x0 0x0"),
            Some(ResourceTriple::default())
        );
        assert_eq!(parse_resource_line("0x0 0x0"), None);
        assert_eq!(parse_resource_line("0x0 0x0 0x0 0x0"), None);
        assert_eq!(parse_resource_line("0x0 0xzz 0x0"), None);
    }

    #[test]
    fn root_bus_detection() {
        assert!(is_root_bus_link(Path::new(
            "../../devices/pci0000:00/pci_bus/0000:00"
        )));
        assert!(is_root_bus_link(Path::new(
            "../../devices/platform/ACPI0016:00/pci0001:80/pci_bus/0001:80"
        )));
        assert!(!is_root_bus_link(Path::new(
            "../../devices/pci0000:00/0000:00:1c.0/pci_bus/0000:01"
        )));
        assert!(!is_root_bus_link(Path::new(
            "../../devices/pci0000:00/0000:00:01.0/0000:01:00.0/pci_bus/0000:02"
        )));
        assert!(!is_root_bus_link(Path::new("../../devices/pci0000:00")));
    }
}
