use pcitop_ids::{ClassNames, NameResolver};
use proptest::prelude::*;

const DB: &str = "\
#
#\tList of PCI ID's
#
1234  Technical Corp.
\t1111  Emulated VGA
8086  Intel Corporation
\t100e  82540EM Gigabit Ethernet Controller
\t\t1014 0265  PRO/1000 MT Desktop Connection
\t\t8086 001e  PRO/1000 MT Desktop Adapter
\t1234  Test Accelerator
\t29c0  82G33/G31/P35/P31 Express DRAM Controller
\t\t1af4 1100  QEMU Virtual Machine
1b36  Red Hat, Inc.
\t000c  QEMU PCIe Root port
# List of known device classes, subclasses and programming interfaces
C 00  Unclassified device
\t00  Non-VGA unclassified device
\t01  VGA compatible unclassified device
C 02  Network controller
\t00  Ethernet controller
\t80  Network controller
C 03  Display controller
\t00  VGA compatible controller
\t\t00  VGA controller
\t\t01  8514 controller
\t80  Display controller
C 0c  Serial bus controller
\t03  USB controller
\t\t00  UHCI
\t\t30  XHCI
\t\tfe  USB Device
";

fn resolver() -> NameResolver {
    NameResolver::new(DB.as_bytes().to_vec())
}

#[test]
fn device_lookup_is_cache_consistent() {
    let mut ids = resolver();
    let vendor = ids.vendor_name(0x8086).to_owned();
    let first = ids.device_name(0x8086, 0x100e).to_owned();
    let second = ids.device_name(0x8086, 0x100e).to_owned();
    assert_eq!(vendor, "Intel Corporation");
    assert_eq!(first, "82540EM Gigabit Ethernet Controller");
    assert_eq!(first, second);

    // A vendor re-lookup must not disturb the device cache.
    assert_eq!(ids.vendor_name(0x8086), "Intel Corporation");
    assert_eq!(ids.device_name(0x8086, 0x100e), first);
}

#[test]
fn subsystem_lookup_follows_device() {
    let mut ids = resolver();
    ids.vendor_name(0x8086);
    ids.device_name(0x8086, 0x100e);
    assert_eq!(
        ids.subsystem_name(0x8086, 0x100e, 0x8086, 0x001e),
        "PRO/1000 MT Desktop Adapter"
    );
    assert_eq!(ids.subsystem_name(0x8086, 0x100e, 0x1af4, 0x1100), "");

    ids.device_name(0x8086, 0x29c0);
    assert_eq!(
        ids.subsystem_name(0x8086, 0x29c0, 0x1af4, 0x1100),
        "QEMU Virtual Machine"
    );
}

#[test]
fn subsystem_lookup_without_device_is_empty() {
    let mut ids = resolver();
    ids.vendor_name(0x8086);
    assert_eq!(ids.subsystem_name(0x8086, 0x100e, 0x8086, 0x001e), "");
}

#[test]
fn vendor_id_does_not_match_device_lines() {
    let mut ids = resolver();
    // `1234` appears as a device line under 8086 and as a vendor line.
    assert_eq!(ids.vendor_name(0x1234), "Technical Corp.");
    // `100e` only exists as a device.
    assert_eq!(ids.vendor_name(0x100e), "");
}

#[test]
fn class_lookup_resolves_all_levels() {
    let mut ids = resolver();
    assert_eq!(
        ids.class_info(0x0c_03_30),
        ClassNames {
            class: "Serial bus controller",
            subclass: "USB controller",
            prog_if: "XHCI",
        }
    );
    assert_eq!(
        ids.class_info(0x02_00_00),
        ClassNames {
            class: "Network controller",
            subclass: "Ethernet controller",
            prog_if: "",
        }
    );
}

#[test]
fn class_lookup_at_end_of_buffer() {
    let mut ids = resolver();
    assert_eq!(ids.class_info(0x0c_03_fe).prog_if, "USB Device");
}

proptest! {
    #[test]
    fn class_lookup_is_monotonic_in_specificity(class_code in 0u32..0x0100_0000) {
        let mut ids = resolver();
        let names = ids.class_info(class_code);
        if names.class.is_empty() {
            prop_assert!(names.subclass.is_empty());
        }
        if names.subclass.is_empty() {
            prop_assert!(names.prog_if.is_empty());
        }
    }

    #[test]
    fn lookups_never_panic_on_arbitrary_databases(
        db in proptest::collection::vec(any::<u8>(), 0..512),
        vendor in any::<u16>(),
        device in any::<u16>(),
        class_code in 0u32..0x0100_0000,
    ) {
        let mut ids = NameResolver::new(db);
        ids.vendor_name(vendor);
        ids.device_name(vendor, device);
        ids.subsystem_name(vendor, device, vendor, device);
        ids.class_info(class_code);
    }
}
