use core::fmt;
use core::str::FromStr;

use crate::error::Error;

/// PCI domain plus bus/device/function.
///
/// Ordering is by domain, then bus, device and function, which is the order devices are
/// listed in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BusAddress {
    pub domain: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl BusAddress {
    pub const fn new(domain: u16, bus: u8, device: u8, function: u8) -> Self {
        Self {
            domain,
            bus,
            device,
            function,
        }
    }

    /// Packs bus/device/function into the standard config-address layout.
    ///
    /// Layout (LSB..MSB):
    /// - bits 0..=2: function (0-7)
    /// - bits 3..=7: device (0-31)
    /// - bits 8..=15: bus (0-255)
    pub const fn key(self) -> u32 {
        ((self.bus as u32) << 8) | (((self.device & 0x1f) as u32) << 3) | (self.function & 0x7) as u32
    }

    /// Domain in the upper 32 bits, [`Self::key`] in the lower 32. Sorts like `Self`.
    pub const fn to_u64(self) -> u64 {
        ((self.domain as u64) << 32) | self.key() as u64
    }

    pub fn from_u64(v: u64) -> Result<Self, Error> {
        let domain = u16::try_from(v >> 32)
            .map_err(|_| Error::malformed("device address", format!("{v:#x}")))?;
        let key = v as u32;
        if key > 0xffff {
            return Err(Error::malformed("device address", format!("{v:#x}")));
        }
        Ok(Self {
            domain,
            bus: (key >> 8) as u8,
            device: ((key >> 3) & 0x1f) as u8,
            function: (key & 0x7) as u8,
        })
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

/// Parses `DDDD:BB:DD.F`, the form used for device directory names.
impl FromStr for BusAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || Error::malformed("device address", s);

        let (bus_id, slot) = s.rsplit_once(':').ok_or_else(bad)?;
        let (domain, bus) = parse_bus_id(bus_id).map_err(|_| bad())?;
        let (device, function) = slot.split_once('.').ok_or_else(bad)?;
        if device.len() != 2 || function.len() != 1 {
            return Err(bad());
        }
        let device = u8::from_str_radix(device, 16).map_err(|_| bad())?;
        let function = u8::from_str_radix(function, 16).map_err(|_| bad())?;
        if device > 0x1f || function > 0x7 {
            return Err(bad());
        }

        Ok(Self::new(domain, bus, device, function))
    }
}

/// Parses a `DDDD:BB` bus identifier.
pub fn parse_bus_id(s: &str) -> Result<(u16, u8), Error> {
    let bad = || Error::malformed("bus identifier", s);

    let (domain, bus) = s.split_once(':').ok_or_else(bad)?;
    if domain.is_empty() || domain.len() > 4 || bus.len() != 2 {
        return Err(bad());
    }
    let domain = u16::from_str_radix(domain, 16).map_err(|_| bad())?;
    let bus = u8::from_str_radix(bus, 16).map_err(|_| bad())?;
    Ok((domain, bus))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let addr: BusAddress = "0000:3b:1f.7".parse().unwrap();
        assert_eq!(addr, BusAddress::new(0, 0x3b, 0x1f, 7));
        assert_eq!(addr.to_string(), "0000:3b:1f.7");
    }

    #[test]
    fn rejects_out_of_range_slot() {
        assert!("0000:00:20.0".parse::<BusAddress>().is_err());
        assert!("0000:00:00.8".parse::<BusAddress>().is_err());
        assert!("0000:00:00".parse::<BusAddress>().is_err());
        assert!("zzzz:00:00.0".parse::<BusAddress>().is_err());
    }

    #[test]
    fn packed_forms_roundtrip_and_sort() {
        let a = BusAddress::new(1, 0x00, 0x02, 0);
        let b = BusAddress::new(0, 0xff, 0x1f, 7);
        assert_eq!(BusAddress::from_u64(a.to_u64()).unwrap(), a);
        assert_eq!(b.key(), 0xffff);
        assert!(b < a);
        assert!(b.to_u64() < a.to_u64());
    }

    #[test]
    fn bus_id() {
        assert_eq!(parse_bus_id("0001:80").unwrap(), (1, 0x80));
        assert!(parse_bus_id("0000:800").is_err());
        assert!(parse_bus_id("000000").is_err());
    }
}
