//! ATT protocol data units
//!
//! Each PDU type knows its opcode and wire layout and provides a pure
//! `decode` (validation, never panics) plus a total `encode`. Multi-byte
//! integers are little-endian throughout. Fixed-size PDUs are rejected unless
//! the byte length matches exactly; variable PDUs enforce their minimum and
//! the consistency of any format/length fields they carry.
//!
//! [`Pdu`] is the tagged union over all of them, keyed by the opcode byte.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::constants::*;
use super::error::ErrorCode;
use super::opcode::{Opcode, OpcodeKind};
use crate::uuid::Uuid;

/// Wire codec for one ATT PDU type.
pub trait AttPdu: Sized {
    /// The opcode in byte 0 of every encoding of this type.
    const OPCODE: Opcode;

    /// Parses `data` (including the opcode byte). Returns `None` on any
    /// mismatch; callers turn that into a garbage-PDU condition.
    fn decode(data: &[u8]) -> Option<Self>;

    /// Serializes the PDU, opcode byte first. Total for any value that came
    /// out of `decode` or a validating constructor.
    fn encode(&self) -> Vec<u8>;
}

fn check_opcode<T: AttPdu>(data: &[u8]) -> Option<()> {
    (data.first().copied() == Some(T::OPCODE as u8)).then_some(())
}

/// Reads the 16 or 128-bit attribute type that ends a request, based on how
/// many bytes remain after `offset`.
fn decode_trailing_uuid(data: &[u8], offset: usize) -> Option<Uuid> {
    match data.len() - offset {
        2 | 16 => Uuid::try_from_slice_le(&data[offset..]),
        _ => None,
    }
}

// --- Error Response ---

/// Error Response: answers any request that could not be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Opcode of the request in error
    pub request_opcode: u8,
    /// Attribute handle in error (0 when not applicable)
    pub handle: u16,
    /// Error code
    pub error_code: ErrorCode,
}

impl ErrorResponse {
    pub fn new(request_opcode: Opcode, handle: u16, error_code: ErrorCode) -> Self {
        Self {
            request_opcode: request_opcode as u8,
            handle,
            error_code,
        }
    }
}

impl AttPdu for ErrorResponse {
    const OPCODE: Opcode = Opcode::ErrorResponse;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() != 5 {
            return None;
        }

        let mut cursor = Cursor::new(&data[2..]);
        let handle = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self {
            request_opcode: data[1],
            handle,
            error_code: ErrorCode::from(data[4]),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);
        packet.push(Self::OPCODE as u8);
        packet.push(self.request_opcode);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.push(self.error_code.into());
        packet
    }
}

// --- Exchange MTU ---

/// Exchange MTU Request: carries the client Rx MTU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMtuRequest {
    pub client_mtu: u16,
}

impl AttPdu for ExchangeMtuRequest {
    const OPCODE: Opcode = Opcode::ExchangeMtuRequest;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() != 3 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let client_mtu = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self { client_mtu })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.client_mtu.to_le_bytes());
        packet
    }
}

/// Exchange MTU Response: carries the server Rx MTU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMtuResponse {
    pub server_mtu: u16,
}

impl AttPdu for ExchangeMtuResponse {
    const OPCODE: Opcode = Opcode::ExchangeMtuResponse;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() != 3 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let server_mtu = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self { server_mtu })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.server_mtu.to_le_bytes());
        packet
    }
}

// --- Find Information ---

/// Find Information Request: asks for the types of all attributes in a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInformationRequest {
    pub start_handle: u16,
    pub end_handle: u16,
}

impl AttPdu for FindInformationRequest {
    const OPCODE: Opcode = Opcode::FindInformationRequest;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() != 5 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let start_handle = cursor.read_u16::<LittleEndian>().ok()?;
        let end_handle = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self {
            start_handle,
            end_handle,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet
    }
}

/// Handle/type pairs of one Find Information Response. The format byte tags
/// whether every pair carries a 16-bit or a 128-bit UUID; mixing is not
/// representable in one PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InformationData {
    Uuid16(Vec<(u16, u16)>),
    Uuid128(Vec<(u16, Uuid)>),
}

impl InformationData {
    pub fn len(&self) -> usize {
        match self {
            InformationData::Uuid16(pairs) => pairs.len(),
            InformationData::Uuid128(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encoded size of one handle/type pair.
    pub fn pair_size(&self) -> usize {
        match self {
            InformationData::Uuid16(_) => 4,
            InformationData::Uuid128(_) => 18,
        }
    }
}

/// Find Information Response: format-tagged list of handle/type pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInformationResponse {
    data: InformationData,
}

impl FindInformationResponse {
    /// Validates the entry list: at least one pair is required.
    pub fn new(data: InformationData) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        Some(Self { data })
    }

    pub fn data(&self) -> &InformationData {
        &self.data
    }
}

impl AttPdu for FindInformationResponse {
    const OPCODE: Opcode = Opcode::FindInformationResponse;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() < 2 {
            return None;
        }

        let format = data[1];
        let list = &data[2..];

        let information = match format {
            ATT_FIND_INFO_RSP_FORMAT_16BIT => {
                if list.is_empty() || list.len() % 4 != 0 {
                    return None;
                }
                let pairs = list
                    .chunks_exact(4)
                    .map(|chunk| {
                        (
                            u16::from_le_bytes([chunk[0], chunk[1]]),
                            u16::from_le_bytes([chunk[2], chunk[3]]),
                        )
                    })
                    .collect();
                InformationData::Uuid16(pairs)
            }
            ATT_FIND_INFO_RSP_FORMAT_128BIT => {
                if list.is_empty() || list.len() % 18 != 0 {
                    return None;
                }
                let mut pairs = Vec::with_capacity(list.len() / 18);
                for chunk in list.chunks_exact(18) {
                    let handle = u16::from_le_bytes([chunk[0], chunk[1]]);
                    let uuid = Uuid::try_from_slice_le(&chunk[2..18])?;
                    pairs.push((handle, uuid));
                }
                InformationData::Uuid128(pairs)
            }
            _ => return None,
        };

        Some(Self { data: information })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(Self::OPCODE as u8);

        match &self.data {
            InformationData::Uuid16(pairs) => {
                packet.push(ATT_FIND_INFO_RSP_FORMAT_16BIT);
                for (handle, uuid16) in pairs {
                    packet.extend_from_slice(&handle.to_le_bytes());
                    packet.extend_from_slice(&uuid16.to_le_bytes());
                }
            }
            InformationData::Uuid128(pairs) => {
                packet.push(ATT_FIND_INFO_RSP_FORMAT_128BIT);
                for (handle, uuid) in pairs {
                    packet.extend_from_slice(&handle.to_le_bytes());
                    packet.extend_from_slice(uuid.as_bytes_le());
                }
            }
        }

        packet
    }
}

// --- Find By Type Value ---

/// Find By Type Value Request: finds attributes by 16-bit type and exact value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindByTypeValueRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    /// Attribute type; restricted to 16-bit UUIDs on the wire
    pub attribute_type: u16,
    pub attribute_value: Vec<u8>,
}

impl AttPdu for FindByTypeValueRequest {
    const OPCODE: Opcode = Opcode::FindByTypeValueRequest;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() < 7 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let start_handle = cursor.read_u16::<LittleEndian>().ok()?;
        let end_handle = cursor.read_u16::<LittleEndian>().ok()?;
        let attribute_type = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self {
            start_handle,
            end_handle,
            attribute_type,
            attribute_value: data[7..].to_vec(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(7 + self.attribute_value.len());
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.attribute_type.to_le_bytes());
        packet.extend_from_slice(&self.attribute_value);
        packet
    }
}

/// One found attribute with its group end, in a Find By Type Value Response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundRange {
    pub found_handle: u16,
    pub group_end_handle: u16,
}

/// Find By Type Value Response: list of found handle ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindByTypeValueResponse {
    handles: Vec<FoundRange>,
}

impl FindByTypeValueResponse {
    /// Validates the list: at least one range is required.
    pub fn new(handles: Vec<FoundRange>) -> Option<Self> {
        if handles.is_empty() {
            return None;
        }
        Some(Self { handles })
    }

    pub fn handles(&self) -> &[FoundRange] {
        &self.handles
    }
}

impl AttPdu for FindByTypeValueResponse {
    const OPCODE: Opcode = Opcode::FindByTypeValueResponse;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        let list = &data[1..];
        if list.is_empty() || list.len() % 4 != 0 {
            return None;
        }

        let handles = list
            .chunks_exact(4)
            .map(|chunk| FoundRange {
                found_handle: u16::from_le_bytes([chunk[0], chunk[1]]),
                group_end_handle: u16::from_le_bytes([chunk[2], chunk[3]]),
            })
            .collect();

        Some(Self { handles })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.handles.len() * 4);
        packet.push(Self::OPCODE as u8);
        for range in &self.handles {
            packet.extend_from_slice(&range.found_handle.to_le_bytes());
            packet.extend_from_slice(&range.group_end_handle.to_le_bytes());
        }
        packet
    }
}

// --- Read By Type ---

/// Read By Type Request: reads all attributes of one type within a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub attribute_type: Uuid,
}

impl AttPdu for ReadByTypeRequest {
    const OPCODE: Opcode = Opcode::ReadByTypeRequest;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() != 7 && data.len() != 21 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let start_handle = cursor.read_u16::<LittleEndian>().ok()?;
        let end_handle = cursor.read_u16::<LittleEndian>().ok()?;
        let attribute_type = decode_trailing_uuid(data, 5)?;

        Some(Self {
            start_handle,
            end_handle,
            attribute_type,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.attribute_type.to_wire_bytes());
        packet
    }
}

/// One handle/value entry of a Read By Type Response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValue {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// Read By Type Response: uniform-size handle/value entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByTypeResponse {
    data: Vec<HandleValue>,
}

impl ReadByTypeResponse {
    /// Validates the entry list: non-empty, every value the same length, and
    /// the per-entry size must fit the length byte.
    pub fn new(data: Vec<HandleValue>) -> Option<Self> {
        let first = data.first()?;
        if first.value.len() + 2 > u8::MAX as usize {
            return None;
        }
        if data.iter().any(|entry| entry.value.len() != first.value.len()) {
            return None;
        }
        Some(Self { data })
    }

    pub fn data(&self) -> &[HandleValue] {
        &self.data
    }

    /// The per-entry size on the wire (handle + value).
    pub fn entry_length(&self) -> usize {
        2 + self.data[0].value.len()
    }
}

impl AttPdu for ReadByTypeResponse {
    const OPCODE: Opcode = Opcode::ReadByTypeResponse;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() < 4 {
            return None;
        }

        let length = data[1] as usize;
        let list = &data[2..];
        if length < 2 || list.is_empty() || list.len() % length != 0 {
            return None;
        }

        let entries = list
            .chunks_exact(length)
            .map(|chunk| HandleValue {
                handle: u16::from_le_bytes([chunk[0], chunk[1]]),
                value: chunk[2..].to_vec(),
            })
            .collect();

        Some(Self { data: entries })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(Self::OPCODE as u8);
        packet.push(self.entry_length() as u8);
        for entry in &self.data {
            packet.extend_from_slice(&entry.handle.to_le_bytes());
            packet.extend_from_slice(&entry.value);
        }
        packet
    }
}

// --- Read / Read Blob ---

/// Read Request: reads one attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub handle: u16,
}

impl AttPdu for ReadRequest {
    const OPCODE: Opcode = Opcode::ReadRequest;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() != 3 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self { handle })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet
    }
}

/// Read Response: the attribute value, possibly truncated to MTU - 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub value: Vec<u8>,
}

impl AttPdu for ReadResponse {
    const OPCODE: Opcode = Opcode::ReadResponse;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        Some(Self {
            value: data[1..].to_vec(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.value.len());
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Read Blob Request: continues a read at a byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBlobRequest {
    pub handle: u16,
    pub offset: u16,
}

impl AttPdu for ReadBlobRequest {
    const OPCODE: Opcode = Opcode::ReadBlobRequest;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() != 5 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = cursor.read_u16::<LittleEndian>().ok()?;
        let offset = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self { handle, offset })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());
        packet
    }
}

/// Read Blob Response: one part of a long attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBlobResponse {
    pub value: Vec<u8>,
}

impl AttPdu for ReadBlobResponse {
    const OPCODE: Opcode = Opcode::ReadBlobResponse;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        Some(Self {
            value: data[1..].to_vec(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.value.len());
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.value);
        packet
    }
}

// --- Read By Group Type ---

/// Read By Group Type Request: reads grouping attributes within a range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByGroupTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub group_type: Uuid,
}

impl AttPdu for ReadByGroupTypeRequest {
    const OPCODE: Opcode = Opcode::ReadByGroupTypeRequest;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() != 7 && data.len() != 21 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let start_handle = cursor.read_u16::<LittleEndian>().ok()?;
        let end_handle = cursor.read_u16::<LittleEndian>().ok()?;
        let group_type = decode_trailing_uuid(data, 5)?;

        Some(Self {
            start_handle,
            end_handle,
            group_type,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.group_type.to_wire_bytes());
        packet
    }
}

/// One group entry of a Read By Group Type Response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeGroupData {
    pub handle: u16,
    pub end_group_handle: u16,
    pub value: Vec<u8>,
}

/// Read By Group Type Response: uniform-size group entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByGroupTypeResponse {
    data: Vec<AttributeGroupData>,
}

impl ReadByGroupTypeResponse {
    /// Validates the entry list: non-empty, every value the same length, and
    /// the per-entry size must fit the length byte.
    pub fn new(data: Vec<AttributeGroupData>) -> Option<Self> {
        let first = data.first()?;
        if first.value.len() + 4 > u8::MAX as usize {
            return None;
        }
        if data.iter().any(|entry| entry.value.len() != first.value.len()) {
            return None;
        }
        Some(Self { data })
    }

    pub fn data(&self) -> &[AttributeGroupData] {
        &self.data
    }

    /// The per-entry size on the wire (handle + group end + value).
    pub fn entry_length(&self) -> usize {
        4 + self.data[0].value.len()
    }
}

impl AttPdu for ReadByGroupTypeResponse {
    const OPCODE: Opcode = Opcode::ReadByGroupTypeResponse;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() < 2 {
            return None;
        }

        let length = data[1] as usize;
        let list = &data[2..];
        // 4 bytes of handles plus at least a 16-bit UUID value
        if length < 6 || list.is_empty() || list.len() % length != 0 {
            return None;
        }

        let entries = list
            .chunks_exact(length)
            .map(|chunk| AttributeGroupData {
                handle: u16::from_le_bytes([chunk[0], chunk[1]]),
                end_group_handle: u16::from_le_bytes([chunk[2], chunk[3]]),
                value: chunk[4..].to_vec(),
            })
            .collect();

        Some(Self { data: entries })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.push(Self::OPCODE as u8);
        packet.push(self.entry_length() as u8);
        for entry in &self.data {
            packet.extend_from_slice(&entry.handle.to_le_bytes());
            packet.extend_from_slice(&entry.end_group_handle.to_le_bytes());
            packet.extend_from_slice(&entry.value);
        }
        packet
    }
}

// --- Writes ---

/// Write Request: writes an attribute value, expects a Write Response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPdu for WriteRequest {
    const OPCODE: Opcode = Opcode::WriteRequest;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() < 3 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Write Response: empty acknowledgement of a Write Request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse;

impl AttPdu for WriteResponse {
    const OPCODE: Opcode = Opcode::WriteResponse;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        (data.len() == 1).then_some(Self)
    }

    fn encode(&self) -> Vec<u8> {
        vec![Self::OPCODE as u8]
    }
}

/// Write Command: fire-and-forget write, never answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPdu for WriteCommand {
    const OPCODE: Opcode = Opcode::WriteCommand;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() < 3 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

// --- Server-initiated value transport ---

/// Handle Value Notification: unacknowledged server push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueNotification {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPdu for HandleValueNotification {
    const OPCODE: Opcode = Opcode::HandleValueNotification;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() < 3 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Handle Value Indication: acknowledged server push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueIndication {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPdu for HandleValueIndication {
    const OPCODE: Opcode = Opcode::HandleValueIndication;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        if data.len() < 3 {
            return None;
        }

        let mut cursor = Cursor::new(&data[1..]);
        let handle = cursor.read_u16::<LittleEndian>().ok()?;

        Some(Self {
            handle,
            value: data[3..].to_vec(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::OPCODE as u8);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Handle Value Confirmation: acknowledges one indication. Always one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleValueConfirmation;

impl AttPdu for HandleValueConfirmation {
    const OPCODE: Opcode = Opcode::HandleValueConfirmation;

    fn decode(data: &[u8]) -> Option<Self> {
        check_opcode::<Self>(data)?;
        (data.len() == 1).then_some(Self)
    }

    fn encode(&self) -> Vec<u8> {
        vec![Self::OPCODE as u8]
    }
}

// --- Tagged union ---

/// Any ATT PDU, keyed by its opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    ErrorResponse(ErrorResponse),
    ExchangeMtuRequest(ExchangeMtuRequest),
    ExchangeMtuResponse(ExchangeMtuResponse),
    FindInformationRequest(FindInformationRequest),
    FindInformationResponse(FindInformationResponse),
    FindByTypeValueRequest(FindByTypeValueRequest),
    FindByTypeValueResponse(FindByTypeValueResponse),
    ReadByTypeRequest(ReadByTypeRequest),
    ReadByTypeResponse(ReadByTypeResponse),
    ReadRequest(ReadRequest),
    ReadResponse(ReadResponse),
    ReadBlobRequest(ReadBlobRequest),
    ReadBlobResponse(ReadBlobResponse),
    ReadByGroupTypeRequest(ReadByGroupTypeRequest),
    ReadByGroupTypeResponse(ReadByGroupTypeResponse),
    WriteRequest(WriteRequest),
    WriteResponse(WriteResponse),
    WriteCommand(WriteCommand),
    HandleValueNotification(HandleValueNotification),
    HandleValueIndication(HandleValueIndication),
    HandleValueConfirmation(HandleValueConfirmation),
}

impl Pdu {
    /// Decodes any known PDU: switches on the opcode byte, then parses the
    /// remainder with that type's layout.
    pub fn decode(data: &[u8]) -> Option<Pdu> {
        let opcode = Opcode::from_u8(*data.first()?)?;

        let pdu = match opcode {
            Opcode::ErrorResponse => Pdu::ErrorResponse(ErrorResponse::decode(data)?),
            Opcode::ExchangeMtuRequest => Pdu::ExchangeMtuRequest(ExchangeMtuRequest::decode(data)?),
            Opcode::ExchangeMtuResponse => {
                Pdu::ExchangeMtuResponse(ExchangeMtuResponse::decode(data)?)
            }
            Opcode::FindInformationRequest => {
                Pdu::FindInformationRequest(FindInformationRequest::decode(data)?)
            }
            Opcode::FindInformationResponse => {
                Pdu::FindInformationResponse(FindInformationResponse::decode(data)?)
            }
            Opcode::FindByTypeValueRequest => {
                Pdu::FindByTypeValueRequest(FindByTypeValueRequest::decode(data)?)
            }
            Opcode::FindByTypeValueResponse => {
                Pdu::FindByTypeValueResponse(FindByTypeValueResponse::decode(data)?)
            }
            Opcode::ReadByTypeRequest => Pdu::ReadByTypeRequest(ReadByTypeRequest::decode(data)?),
            Opcode::ReadByTypeResponse => Pdu::ReadByTypeResponse(ReadByTypeResponse::decode(data)?),
            Opcode::ReadRequest => Pdu::ReadRequest(ReadRequest::decode(data)?),
            Opcode::ReadResponse => Pdu::ReadResponse(ReadResponse::decode(data)?),
            Opcode::ReadBlobRequest => Pdu::ReadBlobRequest(ReadBlobRequest::decode(data)?),
            Opcode::ReadBlobResponse => Pdu::ReadBlobResponse(ReadBlobResponse::decode(data)?),
            Opcode::ReadByGroupTypeRequest => {
                Pdu::ReadByGroupTypeRequest(ReadByGroupTypeRequest::decode(data)?)
            }
            Opcode::ReadByGroupTypeResponse => {
                Pdu::ReadByGroupTypeResponse(ReadByGroupTypeResponse::decode(data)?)
            }
            Opcode::WriteRequest => Pdu::WriteRequest(WriteRequest::decode(data)?),
            Opcode::WriteResponse => Pdu::WriteResponse(WriteResponse::decode(data)?),
            Opcode::WriteCommand => Pdu::WriteCommand(WriteCommand::decode(data)?),
            Opcode::HandleValueNotification => {
                Pdu::HandleValueNotification(HandleValueNotification::decode(data)?)
            }
            Opcode::HandleValueIndication => {
                Pdu::HandleValueIndication(HandleValueIndication::decode(data)?)
            }
            Opcode::HandleValueConfirmation => {
                Pdu::HandleValueConfirmation(HandleValueConfirmation::decode(data)?)
            }
        };

        Some(pdu)
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Pdu::ErrorResponse(_) => Opcode::ErrorResponse,
            Pdu::ExchangeMtuRequest(_) => Opcode::ExchangeMtuRequest,
            Pdu::ExchangeMtuResponse(_) => Opcode::ExchangeMtuResponse,
            Pdu::FindInformationRequest(_) => Opcode::FindInformationRequest,
            Pdu::FindInformationResponse(_) => Opcode::FindInformationResponse,
            Pdu::FindByTypeValueRequest(_) => Opcode::FindByTypeValueRequest,
            Pdu::FindByTypeValueResponse(_) => Opcode::FindByTypeValueResponse,
            Pdu::ReadByTypeRequest(_) => Opcode::ReadByTypeRequest,
            Pdu::ReadByTypeResponse(_) => Opcode::ReadByTypeResponse,
            Pdu::ReadRequest(_) => Opcode::ReadRequest,
            Pdu::ReadResponse(_) => Opcode::ReadResponse,
            Pdu::ReadBlobRequest(_) => Opcode::ReadBlobRequest,
            Pdu::ReadBlobResponse(_) => Opcode::ReadBlobResponse,
            Pdu::ReadByGroupTypeRequest(_) => Opcode::ReadByGroupTypeRequest,
            Pdu::ReadByGroupTypeResponse(_) => Opcode::ReadByGroupTypeResponse,
            Pdu::WriteRequest(_) => Opcode::WriteRequest,
            Pdu::WriteResponse(_) => Opcode::WriteResponse,
            Pdu::WriteCommand(_) => Opcode::WriteCommand,
            Pdu::HandleValueNotification(_) => Opcode::HandleValueNotification,
            Pdu::HandleValueIndication(_) => Opcode::HandleValueIndication,
            Pdu::HandleValueConfirmation(_) => Opcode::HandleValueConfirmation,
        }
    }

    pub fn kind(&self) -> OpcodeKind {
        self.opcode().kind()
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Pdu::ErrorResponse(pdu) => pdu.encode(),
            Pdu::ExchangeMtuRequest(pdu) => pdu.encode(),
            Pdu::ExchangeMtuResponse(pdu) => pdu.encode(),
            Pdu::FindInformationRequest(pdu) => pdu.encode(),
            Pdu::FindInformationResponse(pdu) => pdu.encode(),
            Pdu::FindByTypeValueRequest(pdu) => pdu.encode(),
            Pdu::FindByTypeValueResponse(pdu) => pdu.encode(),
            Pdu::ReadByTypeRequest(pdu) => pdu.encode(),
            Pdu::ReadByTypeResponse(pdu) => pdu.encode(),
            Pdu::ReadRequest(pdu) => pdu.encode(),
            Pdu::ReadResponse(pdu) => pdu.encode(),
            Pdu::ReadBlobRequest(pdu) => pdu.encode(),
            Pdu::ReadBlobResponse(pdu) => pdu.encode(),
            Pdu::ReadByGroupTypeRequest(pdu) => pdu.encode(),
            Pdu::ReadByGroupTypeResponse(pdu) => pdu.encode(),
            Pdu::WriteRequest(pdu) => pdu.encode(),
            Pdu::WriteResponse(pdu) => pdu.encode(),
            Pdu::WriteCommand(pdu) => pdu.encode(),
            Pdu::HandleValueNotification(pdu) => pdu.encode(),
            Pdu::HandleValueIndication(pdu) => pdu.encode(),
            Pdu::HandleValueConfirmation(pdu) => pdu.encode(),
        }
    }
}
