//! GATT attribute database
//!
//! An ordered collection of attributes laid out in contiguous groups, one
//! group per service: service declaration first, then per characteristic the
//! declaration, the value attribute, and any descriptors. Handles come from a
//! single monotonic allocator owned by the database; they are never reused,
//! and `clear` resets attributes and allocator together.
//!
//! All range queries are linear scans in ascending handle order. Databases on
//! a device are tens to low hundreds of attributes, so an index would buy
//! nothing; a reimplementation at larger scale must still preserve the
//! ascending iteration order clients depend on.

use log::debug;

use super::types::{HandleRange, Permissions, Service, CHARACTERISTIC_UUID};
use crate::att::constants::ATT_HANDLE_MIN;
use crate::uuid::Uuid;

/// One attribute: handle, type, value, permissions.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub handle: u16,
    pub attr_type: Uuid,
    pub value: Vec<u8>,
    pub permissions: Permissions,
}

/// A contiguous run of attributes forming one service.
#[derive(Debug, Clone)]
struct AttributeGroup {
    /// Non-empty; `attributes[0]` is the service declaration.
    attributes: Vec<Attribute>,
}

impl AttributeGroup {
    fn range(&self) -> HandleRange {
        HandleRange::new(
            self.attributes[0].handle,
            self.attributes[self.attributes.len() - 1].handle,
        )
    }

    fn declaration(&self) -> &Attribute {
        &self.attributes[0]
    }
}

/// The in-memory attribute database a GATT server exposes.
pub struct GattDatabase {
    groups: Vec<AttributeGroup>,
    /// Next handle to allocate; 0 means the 16-bit space is exhausted.
    next_handle: u16,
}

impl Default for GattDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl GattDatabase {
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            next_handle: ATT_HANDLE_MIN,
        }
    }

    /// Removes every attribute and resets the handle allocator.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.next_handle = ATT_HANDLE_MIN;
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn attribute_count(&self) -> usize {
        self.groups.iter().map(|group| group.attributes.len()).sum()
    }

    /// All attributes in ascending handle order.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.groups.iter().flat_map(|group| group.attributes.iter())
    }

    fn allocate_handle(&mut self) -> u16 {
        assert_ne!(self.next_handle, 0, "attribute handle space exhausted");
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        handle
    }

    /// Lays out `service` as a new attribute group and returns its handle
    /// range. Allocation order: service declaration, then per characteristic
    /// the declaration, the value attribute, and each descriptor.
    pub fn add_service(&mut self, service: &Service) -> HandleRange {
        let mut attributes = Vec::with_capacity(service.attribute_count());

        let declaration_handle = self.allocate_handle();
        attributes.push(Attribute {
            handle: declaration_handle,
            attr_type: service.declaration_type(),
            value: service.uuid.to_wire_bytes(),
            permissions: Permissions::read_only(),
        });

        for characteristic in &service.characteristics {
            let handle = self.allocate_handle();

            // Declaration value: [properties, value handle LE, value UUID]
            let value_handle = self.next_handle;
            let mut declaration_value = vec![characteristic.properties.bits()];
            declaration_value.extend_from_slice(&value_handle.to_le_bytes());
            declaration_value.extend_from_slice(&characteristic.uuid.to_wire_bytes());

            attributes.push(Attribute {
                handle,
                attr_type: Uuid::from_u16(CHARACTERISTIC_UUID),
                value: declaration_value,
                permissions: Permissions::read_only(),
            });

            let handle = self.allocate_handle();
            debug_assert_eq!(handle, value_handle);
            attributes.push(Attribute {
                handle,
                attr_type: characteristic.uuid,
                value: characteristic.value.clone(),
                permissions: characteristic.permissions,
            });

            for descriptor in &characteristic.descriptors {
                let handle = self.allocate_handle();
                attributes.push(Attribute {
                    handle,
                    attr_type: descriptor.uuid,
                    value: descriptor.value.clone(),
                    permissions: descriptor.permissions,
                });
            }
        }

        let group = AttributeGroup { attributes };
        let range = group.range();
        self.groups.push(group);

        debug!(
            "added service {:?} at 0x{:04X}..=0x{:04X}",
            service.uuid, range.start, range.end
        );

        range
    }

    /// Point lookup for a handle the caller obtained from this database.
    ///
    /// Panics on an unknown handle - that is a programming error, not a
    /// runtime condition. Use [`find_attribute`](Self::find_attribute) for
    /// peer-supplied handles.
    pub fn attribute(&self, handle: u16) -> &Attribute {
        self.find_attribute(handle)
            .unwrap_or_else(|| panic!("invalid attribute handle 0x{:04X}", handle))
    }

    /// Non-panicking point lookup for peer-supplied handles.
    pub fn find_attribute(&self, handle: u16) -> Option<&Attribute> {
        self.groups
            .iter()
            .find(|group| group.range().contains(handle))
            .and_then(|group| {
                group
                    .attributes
                    .iter()
                    .find(|attribute| attribute.handle == handle)
            })
    }

    pub fn find_attribute_mut(&mut self, handle: u16) -> Option<&mut Attribute> {
        self.groups
            .iter_mut()
            .find(|group| group.range().contains(handle))
            .and_then(|group| {
                group
                    .attributes
                    .iter_mut()
                    .find(|attribute| attribute.handle == handle)
            })
    }

    /// Replaces an attribute value.
    ///
    /// Panics on an unknown handle: handles are obtained from this database,
    /// so a miss is a caller bug.
    pub fn write(&mut self, handle: u16, value: Vec<u8>) {
        match self.find_attribute_mut(handle) {
            Some(attribute) => attribute.value = value,
            None => panic!("invalid attribute handle 0x{:04X}", handle),
        }
    }

    /// Boundary handles of the group owning `handle`.
    pub fn service_of(&self, handle: u16) -> Option<HandleRange> {
        self.groups
            .iter()
            .map(|group| group.range())
            .find(|range| range.contains(handle))
    }

    /// Groups overlapping `range` whose declaration type equals `group_type`,
    /// as (group range, declaration value), ascending.
    pub fn read_by_group_type(
        &self,
        range: HandleRange,
        group_type: &Uuid,
    ) -> Vec<(HandleRange, Vec<u8>)> {
        self.groups
            .iter()
            .filter(|group| group.range().overlaps(&range))
            .filter(|group| group.declaration().attr_type == *group_type)
            .map(|group| (group.range(), group.declaration().value.clone()))
            .collect()
    }

    /// Attributes in `range` whose type equals `attr_type`, ascending.
    pub fn read_by_type(&self, range: HandleRange, attr_type: &Uuid) -> Vec<&Attribute> {
        self.attributes()
            .filter(|attribute| range.contains(attribute.handle))
            .filter(|attribute| attribute.attr_type == *attr_type)
            .collect()
    }

    /// All attributes in `range`, ascending.
    pub fn find_information(&self, range: HandleRange) -> Vec<&Attribute> {
        self.attributes()
            .filter(|attribute| range.contains(attribute.handle))
            .collect()
    }

    /// Grouping attributes in `range` with type `attr_type` (16-bit) whose
    /// value equals `value`, as (found handle, group end), ascending.
    pub fn find_by_type_value(
        &self,
        range: HandleRange,
        attr_type: u16,
        value: &[u8],
    ) -> Vec<HandleRange> {
        let attr_type = Uuid::from_u16(attr_type);

        self.attributes()
            .filter(|attribute| range.contains(attribute.handle))
            .filter(|attribute| attribute.attr_type == attr_type)
            .filter(|attribute| attribute.value == value)
            .map(|attribute| {
                // A match on a group declaration reports the whole group;
                // anything else ends at its own handle.
                let end = match self.service_of(attribute.handle) {
                    Some(group) if group.start == attribute.handle => group.end,
                    _ => attribute.handle,
                };
                HandleRange::new(attribute.handle, end)
            })
            .collect()
    }
}
