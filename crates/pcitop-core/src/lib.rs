#![forbid(unsafe_code)]
//! PCI topology model: addresses, configuration-space decoding, capability walking, BAR
//! classification, the data-source contract and the topology builder.

pub mod capabilities;
pub mod config;
pub mod resources;

mod address;
mod device;
mod error;
mod live;
mod source;
mod topology;

pub use address::{parse_bus_id, BusAddress};
pub use capabilities::{walk_capabilities, CapabilityDescriptor, CapabilityKind};
pub use config::{ConfigSpace, PciSubsystemIds, PciVendorDeviceId};
pub use device::{DeviceKind, DeviceModel, DeviceNames};
pub use error::{Error, Result};
pub use live::{LiveSource, DEFAULT_SYSFS_ROOT};
pub use resources::{BarKind, BarResource, BarSlot, ResourceFlags, ResourceTriple};
pub use source::{BusDescriptor, DataSource, DeviceRecord, RawDeviceDescriptor};
pub use topology::{Bus, BusKey, BusVisit, Topology};

pub use pcitop_ids::NameResolver;
