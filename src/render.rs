//! Text output in the style of `lspci`.

use std::io::{self, Write};

use pcitop_core::{BarKind, BarResource, CapabilityKind, DeviceKind, DeviceModel, Topology};

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Print raw IDs instead of database names.
    pub numeric: bool,
    /// Print subsystem, bus, interrupt, BAR and capability details under each device.
    pub verbose: bool,
}

/// One line per device in address order.
pub fn write_listing<W: Write>(
    out: &mut W,
    topology: &Topology,
    opts: RenderOptions,
) -> io::Result<()> {
    for dev in topology.devices() {
        write_device(out, dev, opts, "")?;
    }
    Ok(())
}

/// Buses in depth-first order from each root, each followed by its devices.
///
/// Devices on a bus the source did not report are listed last.
pub fn write_tree<W: Write>(out: &mut W, topology: &Topology, opts: RenderOptions) -> io::Result<()> {
    let mut listed = vec![false; topology.devices().len()];

    for visit in topology.walk() {
        let Some(bus) = topology.bus(visit.key.0, visit.key.1) else {
            continue;
        };
        let indent = "  ".repeat(visit.depth);
        write!(out, "{indent}[{:04x}:{:02x}]", bus.domain, bus.number)?;
        match visit.bridge {
            Some(bridge) => writeln!(out, " behind {bridge}")?,
            None if bus.is_root => writeln!(out, " root")?,
            None => writeln!(out)?,
        }

        let device_indent = format!("{indent}  ");
        for &index in bus.device_indices() {
            let Some(dev) = topology.devices().get(index) else {
                continue;
            };
            if let Some(seen) = listed.get_mut(index) {
                *seen = true;
            }
            write_device(out, dev, opts, &device_indent)?;
        }
    }

    let mut unlisted = topology
        .devices()
        .iter()
        .zip(&listed)
        .filter(|(_, seen)| !**seen)
        .map(|(dev, _)| dev)
        .peekable();
    if unlisted.peek().is_some() {
        writeln!(out, "[unlisted buses]")?;
        for dev in unlisted {
            write_device(out, dev, opts, "  ")?;
        }
    }
    Ok(())
}

fn write_device<W: Write>(
    out: &mut W,
    dev: &DeviceModel,
    opts: RenderOptions,
    indent: &str,
) -> io::Result<()> {
    let class = dev.class_code() >> 8;
    let vendor_id = dev.vendor_id();
    let device_id = dev.device_id();

    write!(out, "{indent}{} ", dev.address())?;
    if opts.numeric {
        write!(out, "{class:04x}: {vendor_id:04x}:{device_id:04x}")?;
    } else {
        let names = dev.names();
        let class_name = [names.subclass.as_str(), names.class.as_str()]
            .into_iter()
            .find(|name| !name.is_empty())
            .map_or_else(|| format!("Class {class:04x}"), str::to_owned);
        write!(
            out,
            "{class_name}: {} {}",
            name_or_id(&names.vendor, "Vendor", vendor_id),
            name_or_id(&names.device, "Device", device_id)
        )?;
    }
    match dev.config().revision_id() {
        Some(rev) if rev != 0 => writeln!(out, " (rev {rev:02x})")?,
        _ => writeln!(out)?,
    }

    if opts.verbose {
        write_details(out, dev, opts, &format!("{indent}\t"))?;
    }
    Ok(())
}

fn write_details<W: Write>(
    out: &mut W,
    dev: &DeviceModel,
    opts: RenderOptions,
    prefix: &str,
) -> io::Result<()> {
    let config = dev.config();

    if let Some(ids) = dev.subsystem_ids() {
        let names = dev.names();
        if opts.numeric || (names.subsystem_vendor.is_empty() && names.subsystem.is_empty()) {
            writeln!(
                out,
                "{prefix}Subsystem: {:04x}:{:04x}",
                ids.subsystem_vendor_id, ids.subsystem_id
            )?;
        } else {
            writeln!(
                out,
                "{prefix}Subsystem: {} {}",
                name_or_id(&names.subsystem_vendor, "Vendor", ids.subsystem_vendor_id),
                name_or_id(&names.subsystem, "Device", ids.subsystem_id)
            )?;
        }
    }

    if dev.kind() == DeviceKind::Type1 {
        if let (Some(primary), Some(secondary), Some(subordinate)) = (
            config.primary_bus(),
            config.secondary_bus(),
            config.subordinate_bus(),
        ) {
            writeln!(
                out,
                "{prefix}Bus: primary={primary:02x}, secondary={secondary:02x}, subordinate={subordinate:02x}"
            )?;
        }
    }

    if let Some(pin @ 1..=4) = config.interrupt_pin() {
        let line = config.interrupt_line().unwrap_or(0);
        let pin = char::from(b'A' + pin - 1);
        writeln!(out, "{prefix}Interrupt: pin {pin} routed to IRQ {line}")?;
    }
    if let Some(node) = dev.numa_node() {
        writeln!(out, "{prefix}NUMA node: {node}")?;
    }
    if let Some(group) = dev.iommu_group() {
        writeln!(out, "{prefix}IOMMU group: {group}")?;
    }

    for slot in dev.bars() {
        if slot.is_upper_half() || slot.resource.is_empty() {
            continue;
        }
        writeln!(
            out,
            "{prefix}Region {}: {}",
            slot.index,
            describe_bar(&slot.resource)
        )?;
    }
    if let Some(rom) = dev.expansion_rom() {
        writeln!(
            out,
            "{prefix}Expansion ROM at {:08x} [size={}]",
            rom.address,
            size_string(rom.length)
        )?;
    }
    for window in dev.bridge_windows() {
        let label = match (window.kind, window.prefetchable) {
            (BarKind::Io, _) => "I/O",
            (_, true) => "Prefetchable memory",
            _ => "Memory",
        };
        let last = window
            .address
            .saturating_add(window.length.saturating_sub(1));
        writeln!(
            out,
            "{prefix}{label} behind bridge: {:08x}-{last:08x} [size={}]",
            window.address,
            size_string(window.length)
        )?;
    }

    for cap in dev.capabilities() {
        match cap.kind {
            CapabilityKind::Compatible => writeln!(
                out,
                "{prefix}Capabilities: [{:02x}] {}",
                cap.offset,
                cap.name().unwrap_or("Unknown")
            )?,
            CapabilityKind::Extended => writeln!(
                out,
                "{prefix}Capabilities: [{:03x} v{}] {}",
                cap.offset,
                cap.version,
                cap.name().unwrap_or("Unknown")
            )?,
        }
    }

    if let Some(driver) = dev.driver() {
        writeln!(out, "{prefix}Kernel driver in use: {driver}")?;
    }
    Ok(())
}

fn describe_bar(bar: &BarResource) -> String {
    match bar.kind {
        BarKind::Io => format!(
            "I/O ports at {:x} [size={}]",
            bar.address,
            size_string(bar.length)
        ),
        _ => format!(
            "Memory at {:x} ({}, {}) [size={}]",
            bar.address,
            if bar.is_64bit { "64-bit" } else { "32-bit" },
            if bar.prefetchable {
                "prefetchable"
            } else {
                "non-prefetchable"
            },
            size_string(bar.length)
        ),
    }
}

fn name_or_id(name: &str, what: &str, id: u16) -> String {
    if name.is_empty() {
        format!("{what} {id:04x}")
    } else {
        name.to_owned()
    }
}

/// Byte count with the largest binary unit that divides it evenly.
fn size_string(len: u64) -> String {
    const UNITS: [(u64, &str); 4] = [(1 << 40, "T"), (1 << 30, "G"), (1 << 20, "M"), (1 << 10, "K")];
    UNITS
        .iter()
        .find(|(unit, _)| len >= *unit && len % unit == 0)
        .map_or_else(|| len.to_string(), |(unit, suffix)| format!("{}{suffix}", len / unit))
}
