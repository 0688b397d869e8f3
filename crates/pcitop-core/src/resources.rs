use core::ops::Range;

use bitflags::bitflags;

use crate::device::DeviceKind;

/// Resource slot holding the expansion ROM on Type 0 devices.
pub const EXPANSION_ROM_SLOT: usize = 6;
/// Resource slots holding the I/O, memory and prefetchable-memory windows of a bridge.
pub const BRIDGE_WINDOW_SLOTS: Range<usize> = 13..16;

bitflags! {
    /// Resource flag bits as reported by the kernel alongside each `(start, end)` pair.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u64 {
        const IO = 0x0000_0100;
        const MEM = 0x0000_0200;
        const PREFETCH = 0x0000_2000;
        const MEM_64 = 0x0010_0000;

        const _ = !0;
    }
}

/// One `start end flags` resource entry, exactly as the data source reported it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ResourceTriple {
    pub start: u64,
    pub end: u64,
    pub flags: u64,
}

impl ResourceTriple {
    pub const fn new(start: u64, end: u64, flags: u64) -> Self {
        Self { start, end, flags }
    }

    pub fn flags(&self) -> ResourceFlags {
        ResourceFlags::from_bits_retain(self.flags)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BarKind {
    Memory,
    Io,
    Empty,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BarResource {
    pub kind: BarKind,
    pub address: u64,
    pub length: u64,
    pub is_64bit: bool,
    pub prefetchable: bool,
}

impl BarResource {
    pub const EMPTY: Self = Self {
        kind: BarKind::Empty,
        address: 0,
        length: 0,
        is_64bit: false,
        prefetchable: false,
    };

    pub fn classify(triple: &ResourceTriple) -> Self {
        if triple.flags == 0 {
            return Self {
                address: triple.start,
                ..Self::EMPTY
            };
        }

        let flags = triple.flags();
        let kind = if flags.contains(ResourceFlags::IO) {
            BarKind::Io
        } else if flags.contains(ResourceFlags::MEM) {
            BarKind::Memory
        } else {
            BarKind::Empty
        };
        let is_memory = kind == BarKind::Memory;

        Self {
            kind,
            address: triple.start,
            length: resource_length(triple),
            is_64bit: is_memory && flags.contains(ResourceFlags::MEM_64),
            prefetchable: is_memory && flags.contains(ResourceFlags::PREFETCH),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kind == BarKind::Empty
    }

    pub fn end_exclusive(&self) -> u64 {
        self.address.saturating_add(self.length)
    }
}

/// `end - start + 1`, or 0 for an all-zero or inverted range.
fn resource_length(triple: &ResourceTriple) -> u64 {
    if triple.start == 0 && triple.end == 0 {
        return 0;
    }
    triple
        .end
        .checked_sub(triple.start)
        .map_or(0, |span| span.saturating_add(1))
}

/// One BAR register slot after classification.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BarSlot {
    pub index: u8,
    pub resource: BarResource,
    /// Set when this slot is the upper address half of the 64-bit memory BAR at the given
    /// slot rather than a resource of its own. The slot's own record stays empty.
    pub upper_half_of: Option<u8>,
}

impl BarSlot {
    pub fn is_upper_half(&self) -> bool {
        self.upper_half_of.is_some()
    }
}

/// Classifies the BAR slots of a device from its resource list.
///
/// Resources align positionally with BAR slots; slots past the end of the list are empty.
pub fn classify_bars(resources: &[ResourceTriple], kind: DeviceKind) -> Vec<BarSlot> {
    let mut slots: Vec<BarSlot> = (0..kind.bar_count())
        .map(|index| BarSlot {
            index: index as u8,
            resource: resources
                .get(index)
                .map_or(BarResource::EMPTY, BarResource::classify),
            upper_half_of: None,
        })
        .collect();

    for index in 1..slots.len() {
        let prev = slots[index - 1];
        let lower_is_64bit_mem = prev.resource.kind == BarKind::Memory
            && prev.resource.is_64bit
            && !prev.is_upper_half();
        if slots[index].resource.is_empty() && lower_is_64bit_mem {
            slots[index].upper_half_of = Some(prev.index);
        }
    }

    slots
}

/// The expansion ROM resource of a Type 0 device, if one is assigned.
pub fn expansion_rom(resources: &[ResourceTriple], kind: DeviceKind) -> Option<BarResource> {
    if kind != DeviceKind::Type0 {
        return None;
    }
    let rom = BarResource::classify(resources.get(EXPANSION_ROM_SLOT)?);
    (!rom.is_empty()).then_some(rom)
}

/// The non-empty forwarding windows of a Type 1 bridge.
pub fn bridge_windows(resources: &[ResourceTriple], kind: DeviceKind) -> Vec<BarResource> {
    if kind != DeviceKind::Type1 {
        return Vec::new();
    }
    resources
        .iter()
        .skip(BRIDGE_WINDOW_SLOTS.start)
        .take(BRIDGE_WINDOW_SLOTS.len())
        .map(BarResource::classify)
        .filter(|window| !window.is_empty())
        .collect()
}
