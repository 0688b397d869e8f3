use pcitop_ids::NameResolver;

use crate::address::BusAddress;
use crate::capabilities::{
    walk_capabilities, CapabilityDescriptor, CapabilityKind, PCI_CAP_ID_SUBSYSTEM_VENDOR,
};
use crate::config::{ConfigSpace, PciSubsystemIds, PCI_STANDARD_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::resources::{
    bridge_windows, classify_bars, expansion_rom, BarResource, BarSlot, ResourceTriple,
};
use crate::source::{DeviceRecord, RawDeviceDescriptor};

/// Configuration header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Endpoint (header type 0).
    Type0,
    /// PCI-to-PCI bridge (header type 1).
    Type1,
}

impl DeviceKind {
    pub fn from_header_layout(layout: u8) -> Option<Self> {
        match layout {
            0 => Some(Self::Type0),
            1 => Some(Self::Type1),
            _ => None,
        }
    }

    pub const fn bar_count(self) -> usize {
        match self {
            Self::Type0 => 6,
            Self::Type1 => 2,
        }
    }
}

/// Database names for a device. Unresolved names are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceNames {
    pub vendor: String,
    pub device: String,
    pub class: String,
    pub subclass: String,
    pub prog_if: String,
    pub subsystem: String,
    pub subsystem_vendor: String,
}

/// One PCI function, fully decoded. Read-only once built.
#[derive(Debug, Clone)]
pub struct DeviceModel {
    address: BusAddress,
    kind: DeviceKind,
    config: ConfigSpace,
    capabilities: Vec<CapabilityDescriptor>,
    bars: Vec<BarSlot>,
    expansion_rom: Option<BarResource>,
    bridge_windows: Vec<BarResource>,
    subsystem_ids: Option<PciSubsystemIds>,
    names: DeviceNames,
    resources: Vec<ResourceTriple>,
    driver: Option<String>,
    numa_node: Option<u16>,
    iommu_group: Option<u16>,
}

impl DeviceModel {
    /// Builds the model for one descriptor: capability walk, then resource classification,
    /// then name resolution.
    pub fn build(raw: RawDeviceDescriptor, names: &mut NameResolver) -> Result<Self> {
        let RawDeviceDescriptor {
            address,
            config,
            resources,
            driver,
            numa_node,
            iommu_group,
        } = raw;

        if config.len() < PCI_STANDARD_HEADER_SIZE {
            return Err(Error::malformed(
                "config space",
                format!("{address}: {} bytes is shorter than the standard header", config.len()),
            ));
        }
        let config = ConfigSpace::new(config);

        let layout = config.header_layout().unwrap_or_default();
        let kind = DeviceKind::from_header_layout(layout).ok_or_else(|| {
            Error::malformed(
                "config space",
                format!("{address}: unsupported header type {layout:#04x}"),
            )
        })?;

        let capabilities = walk_capabilities(address, &config)?;

        let bars = classify_bars(&resources, kind);
        let expansion_rom = expansion_rom(&resources, kind);
        let bridge_windows = bridge_windows(&resources, kind);

        let subsystem_ids = match kind {
            DeviceKind::Type0 => config.subsystem_ids(),
            DeviceKind::Type1 => bridge_subsystem_ids(&config, &capabilities),
        };
        let names = resolve_names(&config, subsystem_ids, names);

        Ok(Self {
            address,
            kind,
            config,
            capabilities,
            bars,
            expansion_rom,
            bridge_windows,
            subsystem_ids,
            names,
            resources,
            driver,
            numa_node,
            iommu_group,
        })
    }

    pub fn address(&self) -> BusAddress {
        self.address
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn config(&self) -> &ConfigSpace {
        &self.config
    }

    pub fn vendor_id(&self) -> u16 {
        self.config.vendor_id().unwrap_or(0xffff)
    }

    pub fn device_id(&self) -> u16 {
        self.config.device_id().unwrap_or(0xffff)
    }

    pub fn class_code(&self) -> u32 {
        self.config.class_code().unwrap_or(0)
    }

    pub fn capabilities(&self) -> &[CapabilityDescriptor] {
        &self.capabilities
    }

    pub fn find_capability(&self, kind: CapabilityKind, id: u16) -> Option<&CapabilityDescriptor> {
        self.capabilities
            .iter()
            .find(|cap| cap.kind == kind && cap.id == id)
    }

    pub fn bars(&self) -> &[BarSlot] {
        &self.bars
    }

    pub fn expansion_rom(&self) -> Option<&BarResource> {
        self.expansion_rom.as_ref()
    }

    pub fn bridge_windows(&self) -> &[BarResource] {
        &self.bridge_windows
    }

    pub fn subsystem_ids(&self) -> Option<PciSubsystemIds> {
        self.subsystem_ids
    }

    pub fn names(&self) -> &DeviceNames {
        &self.names
    }

    pub fn resources(&self) -> &[ResourceTriple] {
        &self.resources
    }

    pub fn driver(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    pub fn numa_node(&self) -> Option<u16> {
        self.numa_node
    }

    pub fn iommu_group(&self) -> Option<u16> {
        self.iommu_group
    }

    /// Secondary bus number of a bridge; `None` for endpoints.
    pub fn secondary_bus(&self) -> Option<u8> {
        match self.kind {
            DeviceKind::Type0 => None,
            DeviceKind::Type1 => self.config.secondary_bus(),
        }
    }

    pub fn record(&self) -> DeviceRecord<'_> {
        DeviceRecord {
            address: self.address,
            config: self.config.as_bytes(),
            resources: &self.resources,
            driver: self.driver.as_deref(),
            numa_node: self.numa_node,
            iommu_group: self.iommu_group,
        }
    }
}

/// Bridges carry their subsystem IDs in a dedicated capability rather than the header.
fn bridge_subsystem_ids(
    config: &ConfigSpace,
    capabilities: &[CapabilityDescriptor],
) -> Option<PciSubsystemIds> {
    let cap = capabilities.iter().find(|cap| {
        cap.kind == CapabilityKind::Compatible && cap.id == PCI_CAP_ID_SUBSYSTEM_VENDOR
    })?;
    let base = usize::from(cap.offset);
    Some(PciSubsystemIds {
        subsystem_vendor_id: config.read_u16(base + 4)?,
        subsystem_id: config.read_u16(base + 6)?,
    })
}

fn resolve_names(
    config: &ConfigSpace,
    subsystem_ids: Option<PciSubsystemIds>,
    names: &mut NameResolver,
) -> DeviceNames {
    let vendor_id = config.vendor_id().unwrap_or(0xffff);
    let device_id = config.device_id().unwrap_or(0xffff);

    let mut out = DeviceNames {
        vendor: names.vendor_name(vendor_id).to_owned(),
        device: names.device_name(vendor_id, device_id).to_owned(),
        ..DeviceNames::default()
    };

    if let Some(class_code) = config.class_code() {
        let class = names.class_info(class_code);
        out.class = class.class.to_owned();
        out.subclass = class.subclass.to_owned();
        out.prog_if = class.prog_if.to_owned();
    }

    if let Some(ids) = subsystem_ids {
        out.subsystem = names
            .subsystem_name(
                vendor_id,
                device_id,
                ids.subsystem_vendor_id,
                ids.subsystem_id,
            )
            .to_owned();
        out.subsystem_vendor = names.vendor_name(ids.subsystem_vendor_id).to_owned();
    }

    if out.vendor.is_empty() {
        tracing::debug!("no name for vendor {vendor_id:04x}");
    }

    out
}
