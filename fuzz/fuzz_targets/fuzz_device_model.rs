#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pcitop_core::{BusAddress, DeviceModel, NameResolver, RawDeviceDescriptor, ResourceTriple};

#[derive(Debug, Arbitrary)]
struct Input {
    extended: bool,
    config: Vec<u8>,
    resources: Vec<(u64, u64, u64)>,
}

fuzz_target!(|input: Input| {
    // Real sources only ever hand over one of the two config-space sizes.
    let len = if input.extended { 4096 } else { 256 };
    let mut config = input.config;
    config.resize(len, 0);

    let raw = RawDeviceDescriptor {
        address: BusAddress::new(0, 0, 0, 0),
        config,
        resources: input
            .resources
            .into_iter()
            .map(|(start, end, flags)| ResourceTriple::new(start, end, flags))
            .collect(),
        driver: None,
        numa_node: None,
        iommu_group: None,
    };
    let _ = DeviceModel::build(raw, &mut NameResolver::empty());
});
