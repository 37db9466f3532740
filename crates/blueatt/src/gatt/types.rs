//! Common types for GATT services, characteristics, and descriptors

use bitflags::bitflags;

use crate::uuid::Uuid;

// GATT attribute type UUIDs (16-bit, SIG-assigned)
pub const PRIMARY_SERVICE_UUID: u16 = 0x2800;
pub const SECONDARY_SERVICE_UUID: u16 = 0x2801;
pub const INCLUDE_UUID: u16 = 0x2802;
pub const CHARACTERISTIC_UUID: u16 = 0x2803;
pub const CHAR_EXTENDED_PROPS_UUID: u16 = 0x2900;
pub const CHAR_USER_DESC_UUID: u16 = 0x2901;
pub const CLIENT_CHAR_CONFIG_UUID: u16 = 0x2902;
pub const SERVER_CHAR_CONFIG_UUID: u16 = 0x2903;
pub const CHAR_FORMAT_UUID: u16 = 0x2904;

bitflags! {
    /// ATT attribute permissions.
    ///
    /// Plain READ/WRITE gate access outright; the remaining bits state which
    /// link security an access additionally requires.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u16 {
        const READ                = 0x0001;
        const WRITE               = 0x0002;
        const READ_ENCRYPTED      = 0x0004;
        const WRITE_ENCRYPTED     = 0x0008;
        const READ_AUTHENTICATED  = 0x0010;
        const WRITE_AUTHENTICATED = 0x0020;
        const AUTHORIZED          = 0x0040;
    }
}

impl Permissions {
    pub fn read_only() -> Self {
        Permissions::READ
    }

    pub fn write_only() -> Self {
        Permissions::WRITE
    }

    pub fn read_write() -> Self {
        Permissions::READ | Permissions::WRITE
    }

    pub fn can_read(&self) -> bool {
        self.contains(Permissions::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(Permissions::WRITE)
    }
}

bitflags! {
    /// Characteristic properties as carried in the declaration attribute.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST                    = 0x01;
        const READ                         = 0x02;
        const WRITE_WITHOUT_RESPONSE       = 0x04;
        const WRITE                        = 0x08;
        const NOTIFY                       = 0x10;
        const INDICATE                     = 0x20;
        const AUTHENTICATED_SIGNED_WRITES  = 0x40;
        const EXTENDED_PROPERTIES          = 0x80;
    }
}

/// A contiguous handle range, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

impl HandleRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, handle: u16) -> bool {
        handle >= self.start && handle <= self.end
    }

    /// Whether two ranges share at least one handle.
    pub fn overlaps(&self, other: &HandleRange) -> bool {
        !(self.end < other.start || self.start > other.end)
    }
}

/// Descriptor definition used when populating a database.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub permissions: Permissions,
    pub value: Vec<u8>,
}

impl Descriptor {
    pub fn new(uuid: Uuid, permissions: Permissions, value: Vec<u8>) -> Self {
        Self {
            uuid,
            permissions,
            value,
        }
    }
}

/// Characteristic definition used when populating a database.
#[derive(Debug, Clone)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub permissions: Permissions,
    pub value: Vec<u8>,
    pub descriptors: Vec<Descriptor>,
}

impl Characteristic {
    pub fn new(
        uuid: Uuid,
        properties: CharacteristicProperties,
        permissions: Permissions,
        value: Vec<u8>,
    ) -> Self {
        Self {
            uuid,
            properties,
            permissions,
            value,
            descriptors: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: Descriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }
}

/// Service definition used when populating a database.
///
/// The structural shape (characteristic and descriptor count and order) is
/// fixed once the service is added; only attribute values change afterwards.
#[derive(Debug, Clone)]
pub struct Service {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(uuid: Uuid, primary: bool) -> Self {
        Self {
            uuid,
            primary,
            characteristics: Vec::new(),
        }
    }

    pub fn with_characteristic(mut self, characteristic: Characteristic) -> Self {
        self.characteristics.push(characteristic);
        self
    }

    /// The attribute type of this service's declaration.
    pub fn declaration_type(&self) -> Uuid {
        if self.primary {
            Uuid::from_u16(PRIMARY_SERVICE_UUID)
        } else {
            Uuid::from_u16(SECONDARY_SERVICE_UUID)
        }
    }

    /// Number of attributes this service occupies in a database.
    pub fn attribute_count(&self) -> usize {
        1 + self
            .characteristics
            .iter()
            .map(|characteristic| 2 + characteristic.descriptors.len())
            .sum::<usize>()
    }
}
