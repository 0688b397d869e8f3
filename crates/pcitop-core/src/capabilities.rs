//! Compatible and extended capability chain walking.

use crate::address::BusAddress;
use crate::config::{ConfigSpace, PCI_CONFIG_SPACE_SIZE, PCIE_CONFIG_SPACE_SIZE};
use crate::error::{Error, Result};

pub const PCI_CAP_ID_PM: u16 = 0x01;
pub const PCI_CAP_ID_MSI: u16 = 0x05;
pub const PCI_CAP_ID_SUBSYSTEM_VENDOR: u16 = 0x0d;
pub const PCI_CAP_ID_EXP: u16 = 0x10;
pub const PCI_CAP_ID_MSIX: u16 = 0x11;

/// Extended capabilities start here on PCIe devices.
pub const PCIE_EXT_CAP_BASE: u16 = 0x100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Compatible,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub kind: CapabilityKind,
    pub id: u16,
    /// Always 0 for compatible capabilities.
    pub version: u8,
    pub offset: u16,
}

impl CapabilityDescriptor {
    pub fn name(&self) -> Option<&'static str> {
        match self.kind {
            CapabilityKind::Compatible => compatible_name(self.id),
            CapabilityKind::Extended => extended_name(self.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    ScanCompat,
    ScanExtended,
    Done,
}

/// Walks the compatible chain and, for PCI Express devices, the extended chain.
///
/// Capabilities are returned in chain order, compatible first. A chain that revisits an
/// offset is reported as [`Error::CapabilityLoop`]; a pointer leaving the buffer is
/// [`Error::Malformed`].
pub fn walk_capabilities(
    address: BusAddress,
    config: &ConfigSpace,
) -> Result<Vec<CapabilityDescriptor>> {
    let mut caps = Vec::new();
    let mut is_pcie = false;
    let mut state = if config.has_capability_list() {
        WalkState::ScanCompat
    } else {
        WalkState::Done
    };

    while state != WalkState::Done {
        state = match state {
            WalkState::ScanCompat => {
                walk_compatible(address, config, &mut caps, &mut is_pcie)?;
                if is_pcie {
                    WalkState::ScanExtended
                } else {
                    WalkState::Done
                }
            }
            WalkState::ScanExtended => {
                walk_extended(address, config, &mut caps)?;
                WalkState::Done
            }
            WalkState::Done => WalkState::Done,
        };
    }

    Ok(caps)
}

fn walk_compatible(
    address: BusAddress,
    config: &ConfigSpace,
    caps: &mut Vec<CapabilityDescriptor>,
    is_pcie: &mut bool,
) -> Result<()> {
    let mut seen = [false; PCI_CONFIG_SPACE_SIZE];
    let mut offset = config.capabilities_pointer().unwrap_or(0);

    while offset != 0 {
        let off = usize::from(offset);
        if seen[off] {
            return Err(Error::CapabilityLoop {
                address,
                offset: u16::from(offset),
            });
        }
        seen[off] = true;

        let (Some(id), Some(next)) = (config.read_u8(off), config.read_u8(off + 1)) else {
            return Err(Error::malformed(
                "capability chain",
                format!("{address}: capability at {off:#04x} outside config space"),
            ));
        };

        if u16::from(id) == PCI_CAP_ID_EXP {
            *is_pcie = true;
        }
        caps.push(CapabilityDescriptor {
            kind: CapabilityKind::Compatible,
            id: u16::from(id),
            version: 0,
            offset: u16::from(offset),
        });

        offset = next & 0xfc;
    }
    Ok(())
}

fn walk_extended(
    address: BusAddress,
    config: &ConfigSpace,
    caps: &mut Vec<CapabilityDescriptor>,
) -> Result<()> {
    // A PCIe device captured with only the legacy 256 bytes has no extended region to walk.
    if !config.is_extended() {
        return Ok(());
    }

    let mut seen = vec![false; PCIE_CONFIG_SPACE_SIZE.max(config.len())];
    let mut offset = PCIE_EXT_CAP_BASE;

    loop {
        let off = usize::from(offset);
        if seen[off] {
            return Err(Error::CapabilityLoop { address, offset });
        }
        seen[off] = true;

        let Some(header) = config.read_u32(off) else {
            return Err(Error::malformed(
                "capability chain",
                format!("{address}: extended capability at {off:#05x} outside config space"),
            ));
        };
        let id = (header & 0xffff) as u16;
        // All-ones means the function did not respond to the extended-space read.
        if id == 0 || header == 0xffff_ffff {
            break;
        }

        caps.push(CapabilityDescriptor {
            kind: CapabilityKind::Extended,
            id,
            version: ((header >> 16) & 0xf) as u8,
            offset,
        });

        let next = ((header >> 20) & 0xffc) as u16;
        if next == 0 {
            break;
        }
        if next < PCIE_EXT_CAP_BASE {
            return Err(Error::malformed(
                "capability chain",
                format!("{address}: extended capability at {off:#05x} points back to {next:#04x}"),
            ));
        }
        offset = next;
    }
    Ok(())
}

pub fn compatible_name(id: u16) -> Option<&'static str> {
    Some(match id {
        0x01 => "Power Management",
        0x02 => "AGP",
        0x03 => "Vital Product Data",
        0x04 => "Slot Identification",
        0x05 => "MSI",
        0x06 => "CompactPCI Hot Swap",
        0x07 => "PCI-X",
        0x08 => "HyperTransport",
        0x09 => "Vendor Specific",
        0x0a => "Debug Port",
        0x0b => "CompactPCI Central Resource Control",
        0x0c => "PCI Hot-Plug",
        0x0d => "Subsystem Vendor ID",
        0x0e => "AGP 8x",
        0x0f => "Secure Device",
        0x10 => "PCI Express",
        0x11 => "MSI-X",
        0x12 => "SATA Data/Index Configuration",
        0x13 => "Advanced Features",
        0x14 => "Enhanced Allocation",
        0x15 => "Flattening Portal Bridge",
        _ => return None,
    })
}

pub fn extended_name(id: u16) -> Option<&'static str> {
    Some(match id {
        0x01 => "Advanced Error Reporting",
        0x02 => "Virtual Channel",
        0x03 => "Device Serial Number",
        0x04 => "Power Budgeting",
        0x05 => "Root Complex Link Declaration",
        0x06 => "Root Complex Internal Link Control",
        0x07 => "Root Complex Event Collector Endpoint Association",
        0x08 => "Multi-Function Virtual Channel",
        0x09 => "Virtual Channel (MFVC present)",
        0x0a => "Root Complex Register Block",
        0x0b => "Vendor Specific Extended",
        0x0c => "Configuration Access Correlation",
        0x0d => "Access Control Services",
        0x0e => "Alternative Routing-ID Interpretation",
        0x0f => "Address Translation Services",
        0x10 => "Single Root I/O Virtualization",
        0x11 => "Multi-Root I/O Virtualization",
        0x12 => "Multicast",
        0x13 => "Page Request Interface",
        0x15 => "Resizable BAR",
        0x16 => "Dynamic Power Allocation",
        0x17 => "TPH Requester",
        0x18 => "Latency Tolerance Reporting",
        0x19 => "Secondary PCI Express",
        0x1a => "Protocol Multiplexing",
        0x1b => "Process Address Space ID",
        0x1c => "LN Requester",
        0x1d => "Downstream Port Containment",
        0x1e => "L1 PM Substates",
        0x1f => "Precision Time Measurement",
        0x20 => "PCI Express over M-PHY",
        0x21 => "FRS Queueing",
        0x22 => "Readiness Time Reporting",
        0x23 => "Designated Vendor-Specific",
        0x24 => "VF Resizable BAR",
        0x25 => "Data Link Feature",
        0x26 => "Physical Layer 16.0 GT/s",
        0x27 => "Lane Margining at the Receiver",
        0x28 => "Hierarchy ID",
        0x29 => "Native PCIe Enclosure Management",
        0x2a => "Physical Layer 32.0 GT/s",
        0x2b => "Alternate Protocol",
        0x2c => "System Firmware Intermediary",
        _ => return None,
    })
}
