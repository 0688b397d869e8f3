use crate::address::BusAddress;
use crate::error::{Error, Result};
use crate::resources::ResourceTriple;
use crate::topology::Topology;

/// Everything a data source knows about one PCI function before it is modelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDeviceDescriptor {
    pub address: BusAddress,
    /// Configuration-space bytes: 256 for legacy devices, 4096 with extended space.
    pub config: Vec<u8>,
    pub resources: Vec<ResourceTriple>,
    pub driver: Option<String>,
    pub numa_node: Option<u16>,
    pub iommu_group: Option<u16>,
}

impl RawDeviceDescriptor {
    pub fn record(&self) -> DeviceRecord<'_> {
        DeviceRecord {
            address: self.address,
            config: &self.config,
            resources: &self.resources,
            driver: self.driver.as_deref(),
            numa_node: self.numa_node,
            iommu_group: self.iommu_group,
        }
    }
}

/// Borrowed view of the persisted parts of a device, shared by raw descriptors and built
/// models so both can be captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRecord<'a> {
    pub address: BusAddress,
    pub config: &'a [u8],
    pub resources: &'a [ResourceTriple],
    pub driver: Option<&'a str>,
    pub numa_node: Option<u16>,
    pub iommu_group: Option<u16>,
}

impl DeviceRecord<'_> {
    pub fn to_descriptor(&self) -> RawDeviceDescriptor {
        RawDeviceDescriptor {
            address: self.address,
            config: self.config.to_vec(),
            resources: self.resources.to_vec(),
            driver: self.driver.map(str::to_owned),
            numa_node: self.numa_node,
            iommu_group: self.iommu_group,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusDescriptor {
    pub domain: u16,
    pub bus: u8,
    pub is_root: bool,
}

/// Producer of raw bus and device descriptors.
///
/// Implemented by [`crate::LiveSource`] over the running system and by the snapshot crate's
/// replay source.
pub trait DataSource {
    fn list_buses(&mut self) -> Result<Vec<BusDescriptor>>;

    fn list_devices(&mut self) -> Result<Vec<RawDeviceDescriptor>>;

    /// Persists a topology. Sources that cannot store anything keep the default.
    fn save(&mut self, _topology: &Topology) -> Result<()> {
        Err(Error::Unsupported("this data source cannot save a topology"))
    }
}
