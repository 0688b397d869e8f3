#![forbid(unsafe_code)]
//! Vendor, device, subsystem and class names from a `pci.ids` style database.
//!
//! The database is kept as one immutable byte buffer. Lookups are point searches over that
//! buffer; every hit is memoized as a byte span so later lookups (and the nested device and
//! subsystem searches that depend on them) skip straight to the right place.
//!
//! Database layout, one entry per line:
//!
//! ```text
//! 8086  Intel Corporation
//! \t1237  440FX - 82441FX PMC [Natoma]
//! \t\t1af4 1100  Qemu virtual machine
//! C 01  Mass storage controller
//! \t06  SATA controller
//! \t\t01  AHCI 1.0
//! ```
//!
//! A lookup that finds nothing yields an empty string, never an error.

use std::collections::HashMap;
use std::io;
use std::ops::Range;
use std::path::Path;

mod lines;

use crate::lines::{hex2, hex4, name_span, Lines};

/// Well-known install locations of the database, in lookup order.
pub const DEFAULT_DATABASE_PATHS: &[&str] = &[
    "/usr/share/hwdata/pci.ids",
    "/usr/share/misc/pci.ids",
    "/usr/share/pci.ids",
];

#[derive(Debug, Clone)]
struct VendorEntry {
    name: Range<usize>,
    /// First byte of the line after the vendor line; device lines start here.
    devices_at: usize,
    devices: HashMap<u16, Option<DeviceEntry>>,
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    name: Range<usize>,
    /// First byte of the line after the device line; subsystem lines start here.
    subsystems_at: usize,
}

/// Class, subclass and programming-interface names for one class code.
///
/// Fields that could not be resolved are empty. A more specific field is only ever
/// non-empty when every less specific field resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassNames<'a> {
    pub class: &'a str,
    pub subclass: &'a str,
    pub prog_if: &'a str,
}

#[derive(Debug, Default)]
pub struct NameResolver {
    db: Vec<u8>,
    vendors: HashMap<u16, Option<VendorEntry>>,
    /// Offset of the `C 00` line; `Some(None)` once we know there is no class block.
    class_block: Option<Option<usize>>,
}

impl NameResolver {
    pub fn new(db: Vec<u8>) -> Self {
        Self {
            db,
            vendors: HashMap::new(),
            class_block: None,
        }
    }

    /// A resolver without a database. Every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let db = std::fs::read(path.as_ref())?;
        tracing::debug!(
            "loaded {} byte name database from {}",
            db.len(),
            path.as_ref().display()
        );
        Ok(Self::new(db))
    }

    /// Opens the first database found under [`DEFAULT_DATABASE_PATHS`].
    pub fn open_default() -> Option<Self> {
        DEFAULT_DATABASE_PATHS
            .iter()
            .map(Path::new)
            .filter(|path| path.is_file())
            .find_map(|path| Self::open(path).ok())
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    fn text(&self, span: Range<usize>) -> &str {
        self.db
            .get(span)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .unwrap_or("")
    }

    pub fn vendor_name(&mut self, vendor_id: u16) -> &str {
        if !self.vendors.contains_key(&vendor_id) {
            let entry = self.search_vendor(vendor_id);
            self.vendors.insert(vendor_id, entry);
        }
        match self.vendors.get(&vendor_id) {
            Some(Some(entry)) => {
                let span = entry.name.clone();
                self.text(span)
            }
            _ => "",
        }
    }

    fn search_vendor(&self, vendor_id: u16) -> Option<VendorEntry> {
        let id = hex4(vendor_id);
        Lines::new(&self.db, 0, self.db.len())
            .find(|line| line.starts_with_id(&[], &id))
            .map(|line| VendorEntry {
                name: name_span(&self.db, line.start + id.len(), line.end),
                devices_at: line.next,
                devices: HashMap::new(),
            })
    }

    /// Device name for `(vendor_id, device_id)`.
    ///
    /// The vendor must have been looked up with [`Self::vendor_name`] first; otherwise the
    /// result is empty.
    pub fn device_name(&mut self, vendor_id: u16, device_id: u16) -> &str {
        let (devices_at, cached) = match self.vendors.get(&vendor_id) {
            Some(Some(vendor)) => (vendor.devices_at, vendor.devices.get(&device_id).cloned()),
            _ => return "",
        };
        let entry = match cached {
            Some(entry) => entry,
            None => {
                let entry = search_device(&self.db, devices_at, device_id);
                if let Some(Some(vendor)) = self.vendors.get_mut(&vendor_id) {
                    vendor.devices.insert(device_id, entry.clone());
                }
                entry
            }
        };
        match entry {
            Some(device) => self.text(device.name),
            None => "",
        }
    }

    /// Subsystem name for a device's `(sub_vendor_id, sub_device_id)` pair.
    ///
    /// Requires both [`Self::vendor_name`] and [`Self::device_name`] to have been called for
    /// `(vendor_id, device_id)`.
    pub fn subsystem_name(
        &self,
        vendor_id: u16,
        device_id: u16,
        sub_vendor_id: u16,
        sub_device_id: u16,
    ) -> &str {
        let Some(Some(vendor)) = self.vendors.get(&vendor_id) else {
            return "";
        };
        let Some(Some(device)) = vendor.devices.get(&device_id) else {
            return "";
        };

        let mut pattern = [0u8; 9];
        pattern[..4].copy_from_slice(&hex4(sub_vendor_id));
        pattern[4] = b' ';
        pattern[5..].copy_from_slice(&hex4(sub_device_id));

        for line in Lines::new(&self.db, device.subsystems_at, self.db.len()) {
            let bytes = line.text;
            if !bytes.starts_with(b"\t\t") {
                break;
            }
            if bytes[2..].starts_with(&pattern) {
                let span = name_span(&self.db, line.start + 2 + pattern.len(), line.end);
                return self.text(span);
            }
        }
        ""
    }

    /// Names for a packed class code (`base << 16 | sub << 8 | prog_if`).
    pub fn class_info(&mut self, class_code: u32) -> ClassNames<'_> {
        let base = ((class_code >> 16) & 0xff) as u8;
        let sub = ((class_code >> 8) & 0xff) as u8;
        let prog_if = (class_code & 0xff) as u8;

        let block = *self
            .class_block
            .get_or_insert_with(|| find_class_block(&self.db));
        let Some(block) = block else {
            return ClassNames::default();
        };

        let (class, sub_span, prog_span) = self.search_class(block, base, sub, prog_if);
        ClassNames {
            class: class.map_or("", |span| self.text(span)),
            subclass: sub_span.map_or("", |span| self.text(span)),
            prog_if: prog_span.map_or("", |span| self.text(span)),
        }
    }

    #[allow(clippy::type_complexity)]
    fn search_class(
        &self,
        block: usize,
        base: u8,
        sub: u8,
        prog_if: u8,
    ) -> (
        Option<Range<usize>>,
        Option<Range<usize>>,
        Option<Range<usize>>,
    ) {
        let db = &self.db;
        let base_id = hex2(base);
        let Some(class_line) =
            Lines::new(db, block, db.len()).find(|line| line.starts_with_id(b"C ", &base_id))
        else {
            return (None, None, None);
        };
        let class = name_span(db, class_line.start + 2 + base_id.len(), class_line.end);

        let class_end = Lines::new(db, class_line.next, db.len())
            .find(|line| line.text.starts_with(b"C "))
            .map_or(db.len(), |line| line.start);

        let sub_id = hex2(sub);
        let Some(sub_line) = Lines::new(db, class_line.next, class_end)
            .find(|line| line.starts_with_id(b"\t", &sub_id))
        else {
            return (Some(class), None, None);
        };
        let subclass = name_span(db, sub_line.start + 1 + sub_id.len(), sub_line.end);

        let sub_end = Lines::new(db, sub_line.next, class_end)
            .find(|line| {
                let bytes = line.text;
                bytes.starts_with(b"\t") && !bytes.starts_with(b"\t\t")
            })
            .map_or(class_end, |line| line.start);

        let prog_id = hex2(prog_if);
        let prog = Lines::new(db, sub_line.next, sub_end)
            .find(|line| line.starts_with_id(b"\t\t", &prog_id))
            .map(|line| name_span(db, line.start + 2 + prog_id.len(), line.end));

        (Some(class), Some(subclass), prog)
    }
}

fn search_device(db: &[u8], from: usize, device_id: u16) -> Option<DeviceEntry> {
    let id = hex4(device_id);
    for line in Lines::new(db, from, db.len()) {
        let bytes = line.text;
        // The vendor block ends at the next line that is neither indented nor a comment.
        if !bytes.is_empty() && bytes[0] != b'\t' && bytes[0] != b'#' {
            return None;
        }
        if line.starts_with_id(b"\t", &id) {
            return Some(DeviceEntry {
                name: name_span(db, line.start + 1 + id.len(), line.end),
                subsystems_at: line.next,
            });
        }
    }
    None
}

fn find_class_block(db: &[u8]) -> Option<usize> {
    const SENTINEL: &[u8] = b"\nC 00";
    db.windows(SENTINEL.len())
        .rposition(|window| window == SENTINEL)
        .map(|pos| pos + 1)
        .or_else(|| db.starts_with(&SENTINEL[1..]).then_some(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DB: &str = "\
# comment line
0e11  Compaq Computer Corporation
\t0001  PCI to EISA Bridge
8086  Intel Corporation
\t1237  440FX - 82441FX PMC [Natoma]
\t\t1af4 1100  Qemu virtual machine
\t7000  82371SB PIIX3 ISA [Natoma/Triton II]
\t\t1af4 1100  Qemu virtual machine
\t\t8086 7000  PIIX3 reference
1af4  Red Hat, Inc.
\t1000  Virtio network device
\t\t1af4 0001  Virtio network device
C 00  Unclassified device
\t00  Non-VGA unclassified device
C 01  Mass storage controller
\t01  IDE interface
\t\t80  ISA Compatibility mode-only controller, supports bus mastering
\t06  SATA controller
\t\t01  AHCI 1.0
C 06  Bridge
\t00  Host bridge
\t04  PCI bridge
\t\t00  Normal decode
";

    fn resolver() -> NameResolver {
        NameResolver::new(DB.as_bytes().to_vec())
    }

    #[test]
    fn vendor_then_device_then_subsystem() {
        let mut ids = resolver();
        assert_eq!(ids.vendor_name(0x8086), "Intel Corporation");
        assert_eq!(ids.device_name(0x8086, 0x7000), "82371SB PIIX3 ISA [Natoma/Triton II]");
        assert_eq!(
            ids.subsystem_name(0x8086, 0x7000, 0x8086, 0x7000),
            "PIIX3 reference"
        );
        assert_eq!(
            ids.subsystem_name(0x8086, 0x7000, 0x1af4, 0x1100),
            "Qemu virtual machine"
        );
    }

    #[test]
    fn device_lookup_requires_vendor() {
        let mut ids = resolver();
        assert_eq!(ids.device_name(0x8086, 0x1237), "");
        ids.vendor_name(0x8086);
        assert_eq!(ids.device_name(0x8086, 0x1237), "440FX - 82441FX PMC [Natoma]");
    }

    #[test]
    fn device_lookup_does_not_leak_into_next_vendor() {
        let mut ids = resolver();
        ids.vendor_name(0x0e11);
        assert_eq!(ids.device_name(0x0e11, 0x1000), "");
    }

    #[test]
    fn subsystem_scan_stops_at_end_of_block() {
        let mut ids = resolver();
        ids.vendor_name(0x8086);
        ids.device_name(0x8086, 0x1237);
        // Matches a subsystem of the *next* device, which must not be found.
        assert_eq!(ids.subsystem_name(0x8086, 0x1237, 0x8086, 0x7000), "");
    }

    #[test]
    fn unknown_ids_are_empty() {
        let mut ids = resolver();
        assert_eq!(ids.vendor_name(0xabcd), "");
        assert_eq!(ids.device_name(0xabcd, 0x0001), "");
        assert_eq!(ids.subsystem_name(0xabcd, 0x0001, 0, 0), "");
    }

    #[test]
    fn class_lookup_is_partial_on_miss() {
        let mut ids = resolver();
        assert_eq!(
            ids.class_info(0x01_06_01),
            ClassNames {
                class: "Mass storage controller",
                subclass: "SATA controller",
                prog_if: "AHCI 1.0",
            }
        );
        assert_eq!(
            ids.class_info(0x01_01_00),
            ClassNames {
                class: "Mass storage controller",
                subclass: "IDE interface",
                prog_if: "",
            }
        );
        // Subclass 0x80 does not exist under class 0x01 even though prog-if 0x80 does.
        assert_eq!(
            ids.class_info(0x01_80_80),
            ClassNames {
                class: "Mass storage controller",
                subclass: "",
                prog_if: "",
            }
        );
        assert_eq!(ids.class_info(0xff_00_00), ClassNames::default());
    }

    #[test]
    fn prog_if_search_is_bounded_by_subclass() {
        let mut ids = resolver();
        // prog-if 0x01 exists only under subclass 0x06.
        assert_eq!(ids.class_info(0x01_01_01).prog_if, "");
    }

    #[test]
    fn empty_resolver_misses_everything() {
        let mut ids = NameResolver::empty();
        assert!(ids.is_empty());
        assert_eq!(ids.vendor_name(0x8086), "");
        assert_eq!(ids.class_info(0x06_04_00), ClassNames::default());
    }
}
