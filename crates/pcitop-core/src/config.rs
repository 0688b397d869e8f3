//! Bounds-checked register accessors over a captured configuration-space buffer.
//!
//! All multi-byte registers are little-endian.

pub const PCI_CONFIG_SPACE_SIZE: usize = 256;
pub const PCIE_CONFIG_SPACE_SIZE: usize = 4096;

pub const PCI_VENDOR_ID_OFFSET: usize = 0x00;
pub const PCI_DEVICE_ID_OFFSET: usize = 0x02;
pub const PCI_COMMAND_OFFSET: usize = 0x04;
pub const PCI_STATUS_OFFSET: usize = 0x06;
pub const PCI_REVISION_ID_OFFSET: usize = 0x08;
pub const PCI_CLASS_CODE_OFFSET: usize = 0x09;
pub const PCI_HEADER_TYPE_OFFSET: usize = 0x0e;
pub const PCI_SUBSYSTEM_VENDOR_ID_OFFSET: usize = 0x2c;
pub const PCI_SUBSYSTEM_ID_OFFSET: usize = 0x2e;
pub const PCI_CAP_PTR_OFFSET: usize = 0x34;
pub const PCI_INTERRUPT_LINE_OFFSET: usize = 0x3c;
pub const PCI_INTERRUPT_PIN_OFFSET: usize = 0x3d;

pub const PCI_PRIMARY_BUS_OFFSET: usize = 0x18;
pub const PCI_SECONDARY_BUS_OFFSET: usize = 0x19;
pub const PCI_SUBORDINATE_BUS_OFFSET: usize = 0x1a;

/// Size of the standard header shared by all header layouts.
pub const PCI_STANDARD_HEADER_SIZE: usize = 0x40;

pub const PCI_STATUS_CAPABILITIES_LIST: u16 = 1 << 4;
pub const PCI_HEADER_TYPE_MULTI_FUNCTION: u8 = 0x80;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PciVendorDeviceId {
    pub vendor_id: u16,
    pub device_id: u16,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PciSubsystemIds {
    pub subsystem_vendor_id: u16,
    pub subsystem_id: u16,
}

/// A device's configuration-space bytes, either the 256-byte legacy space or the 4096-byte
/// extended space.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigSpace {
    bytes: Box<[u8]>,
}

impl core::fmt::Debug for ConfigSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfigSpace")
            .field("len", &self.bytes.len())
            .field("vendor_id", &self.vendor_id())
            .field("device_id", &self.device_id())
            .finish()
    }
}

impl ConfigSpace {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the buffer covers the extended (PCIe) region past offset 0x100.
    pub fn is_extended(&self) -> bool {
        self.bytes.len() > PCI_CONFIG_SPACE_SIZE
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn read_u8(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).copied()
    }

    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        let bytes = self.bytes.get(offset..offset.checked_add(2)?)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.bytes.get(offset..offset.checked_add(4)?)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn vendor_id(&self) -> Option<u16> {
        self.read_u16(PCI_VENDOR_ID_OFFSET)
    }

    pub fn device_id(&self) -> Option<u16> {
        self.read_u16(PCI_DEVICE_ID_OFFSET)
    }

    pub fn vendor_device_id(&self) -> Option<PciVendorDeviceId> {
        Some(PciVendorDeviceId {
            vendor_id: self.vendor_id()?,
            device_id: self.device_id()?,
        })
    }

    pub fn command(&self) -> Option<u16> {
        self.read_u16(PCI_COMMAND_OFFSET)
    }

    pub fn status(&self) -> Option<u16> {
        self.read_u16(PCI_STATUS_OFFSET)
    }

    pub fn has_capability_list(&self) -> bool {
        self.status()
            .is_some_and(|status| status & PCI_STATUS_CAPABILITIES_LIST != 0)
    }

    pub fn revision_id(&self) -> Option<u8> {
        self.read_u8(PCI_REVISION_ID_OFFSET)
    }

    /// Base class, subclass and programming interface packed as
    /// `base << 16 | sub << 8 | prog_if`.
    pub fn class_code(&self) -> Option<u32> {
        let prog_if = self.read_u8(PCI_CLASS_CODE_OFFSET)?;
        let sub = self.read_u8(PCI_CLASS_CODE_OFFSET + 1)?;
        let base = self.read_u8(PCI_CLASS_CODE_OFFSET + 2)?;
        Some((u32::from(base) << 16) | (u32::from(sub) << 8) | u32::from(prog_if))
    }

    /// Header layout with the multi-function bit masked off.
    pub fn header_layout(&self) -> Option<u8> {
        self.read_u8(PCI_HEADER_TYPE_OFFSET)
            .map(|v| v & !PCI_HEADER_TYPE_MULTI_FUNCTION)
    }

    pub fn is_multi_function(&self) -> bool {
        self.read_u8(PCI_HEADER_TYPE_OFFSET)
            .is_some_and(|v| v & PCI_HEADER_TYPE_MULTI_FUNCTION != 0)
    }

    /// First compatible capability offset, reserved low bits discarded.
    pub fn capabilities_pointer(&self) -> Option<u8> {
        self.read_u8(PCI_CAP_PTR_OFFSET).map(|v| v & 0xfc)
    }

    /// Type 0 subsystem IDs.
    pub fn subsystem_ids(&self) -> Option<PciSubsystemIds> {
        Some(PciSubsystemIds {
            subsystem_vendor_id: self.read_u16(PCI_SUBSYSTEM_VENDOR_ID_OFFSET)?,
            subsystem_id: self.read_u16(PCI_SUBSYSTEM_ID_OFFSET)?,
        })
    }

    pub fn interrupt_line(&self) -> Option<u8> {
        self.read_u8(PCI_INTERRUPT_LINE_OFFSET)
    }

    pub fn interrupt_pin(&self) -> Option<u8> {
        self.read_u8(PCI_INTERRUPT_PIN_OFFSET)
    }

    /// Type 1 primary bus number.
    pub fn primary_bus(&self) -> Option<u8> {
        self.read_u8(PCI_PRIMARY_BUS_OFFSET)
    }

    /// Type 1 secondary bus number.
    pub fn secondary_bus(&self) -> Option<u8> {
        self.read_u8(PCI_SECONDARY_BUS_OFFSET)
    }

    /// Type 1 subordinate bus number.
    pub fn subordinate_bus(&self) -> Option<u8> {
        self.read_u8(PCI_SUBORDINATE_BUS_OFFSET)
    }
}

/// Test helper for building config buffers by register.
#[cfg(test)]
pub(crate) mod builder {
    pub struct ConfigBuilder {
        pub bytes: Vec<u8>,
    }

    impl ConfigBuilder {
        pub fn new(len: usize, vendor_id: u16, device_id: u16) -> Self {
            let mut bytes = vec![0u8; len];
            bytes[0..2].copy_from_slice(&vendor_id.to_le_bytes());
            bytes[2..4].copy_from_slice(&device_id.to_le_bytes());
            Self { bytes }
        }

        pub fn u8(mut self, offset: usize, v: u8) -> Self {
            self.bytes[offset] = v;
            self
        }

        pub fn u16(mut self, offset: usize, v: u16) -> Self {
            self.bytes[offset..offset + 2].copy_from_slice(&v.to_le_bytes());
            self
        }

        pub fn u32(mut self, offset: usize, v: u32) -> Self {
            self.bytes[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
            self
        }

        /// Sets the status capability-list bit and the capabilities pointer.
        pub fn cap_ptr(self, ptr: u8) -> Self {
            self.u16(super::PCI_STATUS_OFFSET, super::PCI_STATUS_CAPABILITIES_LIST)
                .u8(super::PCI_CAP_PTR_OFFSET, ptr)
        }

        /// Writes a compatible capability header.
        pub fn cap(self, offset: usize, id: u8, next: u8) -> Self {
            self.u8(offset, id).u8(offset + 1, next)
        }

        /// Writes an extended capability header.
        pub fn ext_cap(self, offset: usize, id: u16, version: u8, next: u16) -> Self {
            let header =
                u32::from(id) | (u32::from(version & 0xf) << 16) | (u32::from(next) << 20);
            self.u32(offset, header)
        }

        pub fn build(self) -> Vec<u8> {
            self.bytes
        }
    }
}
