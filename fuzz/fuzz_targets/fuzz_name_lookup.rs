#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pcitop_ids::NameResolver;

#[derive(Debug, Arbitrary)]
struct Input {
    db: Vec<u8>,
    vendor: u16,
    device: u16,
    subsystem_vendor: u16,
    subsystem: u16,
    class_code: u32,
}

fuzz_target!(|input: Input| {
    let mut names = NameResolver::new(input.db);
    let _ = names.vendor_name(input.vendor);
    let _ = names.device_name(input.vendor, input.device);
    let _ = names.subsystem_name(
        input.vendor,
        input.device,
        input.subsystem_vendor,
        input.subsystem,
    );
    let _ = names.class_info(input.class_code & 0x00ff_ffff);
});
