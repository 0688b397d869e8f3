use std::collections::{BTreeMap, BTreeSet};

use pcitop_ids::NameResolver;

use crate::address::BusAddress;
use crate::device::DeviceModel;
use crate::error::{Error, Result};
use crate::source::{BusDescriptor, DataSource, RawDeviceDescriptor};

/// Buses are keyed by `(domain, bus number)`.
pub type BusKey = (u16, u8);

#[derive(Debug, Clone)]
pub struct Bus {
    pub domain: u16,
    pub number: u8,
    pub is_root: bool,
    /// Indices into [`Topology::devices`], ascending by address.
    devices: Vec<usize>,
}

impl Bus {
    pub fn key(&self) -> BusKey {
        (self.domain, self.number)
    }

    pub fn device_indices(&self) -> &[usize] {
        &self.devices
    }

    pub fn descriptor(&self) -> BusDescriptor {
        BusDescriptor {
            domain: self.domain,
            bus: self.number,
            is_root: self.is_root,
        }
    }
}

/// A bus visited by [`Topology::walk`], with its depth below the root it was reached from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusVisit {
    pub key: BusKey,
    pub depth: usize,
    /// The bridge whose secondary bus this is; `None` for the bus a walk started from.
    pub bridge: Option<BusAddress>,
}

/// The sorted device list plus the bus map built from one scan.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    devices: Vec<DeviceModel>,
    buses: BTreeMap<BusKey, Bus>,
}

impl Topology {
    /// Runs one full scan of `source`.
    ///
    /// Devices are modelled and sorted before the bus namespace is read.
    pub fn build<S: DataSource + ?Sized>(source: &mut S, names: &mut NameResolver) -> Result<Self> {
        let models = build_models(source.list_devices()?, names)?;
        let buses = source.list_buses()?;
        Self::assemble(models, buses)
    }

    pub fn from_descriptors(
        devices: Vec<RawDeviceDescriptor>,
        buses: Vec<BusDescriptor>,
        names: &mut NameResolver,
    ) -> Result<Self> {
        let models = build_models(devices, names)?;
        Self::assemble(models, buses)
    }

    fn assemble(models: Vec<DeviceModel>, buses: Vec<BusDescriptor>) -> Result<Self> {
        let mut bus_map = BTreeMap::new();
        for desc in buses {
            let key = (desc.domain, desc.bus);
            let members = models
                .iter()
                .enumerate()
                .filter(|(_, dev)| {
                    let addr = dev.address();
                    (addr.domain, addr.bus) == key
                })
                .map(|(index, _)| index)
                .collect();
            let bus = Bus {
                domain: desc.domain,
                number: desc.bus,
                is_root: desc.is_root,
                devices: members,
            };
            if bus_map.insert(key, bus).is_some() {
                return Err(Error::DuplicateBus {
                    domain: desc.domain,
                    bus: desc.bus,
                });
            }
        }

        tracing::debug!(
            "built topology with {} devices on {} buses",
            models.len(),
            bus_map.len()
        );
        Ok(Self {
            devices: models,
            buses: bus_map,
        })
    }

    pub fn devices(&self) -> &[DeviceModel] {
        &self.devices
    }

    pub fn device(&self, address: BusAddress) -> Option<&DeviceModel> {
        self.devices
            .binary_search_by_key(&address, DeviceModel::address)
            .ok()
            .map(|index| &self.devices[index])
    }

    pub fn buses(&self) -> impl Iterator<Item = &Bus> + '_ {
        self.buses.values()
    }

    pub fn bus(&self, domain: u16, number: u8) -> Option<&Bus> {
        self.buses.get(&(domain, number))
    }

    pub fn bus_descriptors(&self) -> Vec<BusDescriptor> {
        self.buses.values().map(Bus::descriptor).collect()
    }

    pub fn bus_devices<'a>(&'a self, bus: &'a Bus) -> impl Iterator<Item = &'a DeviceModel> + 'a {
        bus.devices.iter().filter_map(|&index| self.devices.get(index))
    }

    pub fn roots(&self) -> impl Iterator<Item = &Bus> + '_ {
        self.buses.values().filter(|bus| bus.is_root)
    }

    /// Child buses reached through the bridges on `bus`, as `(bridge, child)` pairs.
    pub fn children<'a>(&'a self, bus: &'a Bus) -> impl Iterator<Item = (&'a DeviceModel, &'a Bus)> + 'a {
        self.bus_devices(bus).filter_map(move |dev| {
            let secondary = dev.secondary_bus()?;
            let child = self.bus(bus.domain, secondary)?;
            Some((dev, child))
        })
    }

    /// Depth-first walk of the bus forest from every root bus, then from any bus not reached
    /// that way.
    ///
    /// The bridge relation comes straight from device registers, so it is not guaranteed to
    /// be acyclic; a bus is visited at most once and a link back to a visited bus is dropped
    /// with a warning.
    pub fn walk(&self) -> Vec<BusVisit> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::with_capacity(self.buses.len());

        let starts = self
            .roots()
            .chain(self.buses.values().filter(|bus| !bus.is_root));
        for start in starts {
            if visited.contains(&start.key()) {
                continue;
            }
            let mut stack = vec![BusVisit {
                key: start.key(),
                depth: 0,
                bridge: None,
            }];
            while let Some(visit) = stack.pop() {
                if !visited.insert(visit.key) {
                    tracing::warn!(
                        "bus {:04x}:{:02x} reached twice (via {:?}); ignoring link",
                        visit.key.0,
                        visit.key.1,
                        visit.bridge.map(|b| b.to_string())
                    );
                    continue;
                }
                order.push(visit);

                let Some(bus) = self.buses.get(&visit.key) else {
                    continue;
                };
                let children: Vec<_> = self.children(bus).collect();
                // Reverse so the lowest-addressed bridge is visited first.
                for (bridge, child) in children.into_iter().rev() {
                    stack.push(BusVisit {
                        key: child.key(),
                        depth: visit.depth + 1,
                        bridge: Some(bridge.address()),
                    });
                }
            }
        }
        order
    }
}

/// Models every descriptor and sorts the result by address.
fn build_models(
    devices: Vec<RawDeviceDescriptor>,
    names: &mut NameResolver,
) -> Result<Vec<DeviceModel>> {
    let mut models = Vec::with_capacity(devices.len());
    for raw in devices {
        let address = raw.address;
        match DeviceModel::build(raw, names) {
            Ok(model) => models.push(model),
            // Capability loops and undecodable headers only lose the affected device.
            Err(err @ (Error::Malformed { .. } | Error::CapabilityLoop { .. })) => {
                tracing::warn!("skipping {address}: {err}");
            }
            Err(err) => return Err(err),
        }
    }
    models.sort_by_key(DeviceModel::address);
    Ok(models)
}
