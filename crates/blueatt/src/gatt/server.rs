//! GATT server
//!
//! A thin user of [`AttConnection`]: registers a callback per inbound request
//! opcode, consults the [`GattDatabase`], and answers each request with
//! exactly one response or error response. The server owns the connection and
//! shares the database with the application through an `Rc<RefCell<_>>`; both
//! are driven from the single task that runs the bearer's read/write loop.

use log::{debug, warn};
use std::cell::RefCell;
use std::rc::Rc;

use crate::att::constants::{ATT_DEFAULT_MTU, ATT_MAX_MTU};
use crate::att::pdu::{
    AttributeGroupData, ExchangeMtuRequest, ExchangeMtuResponse, FindByTypeValueRequest,
    FindByTypeValueResponse, FindInformationRequest, FindInformationResponse, FoundRange,
    HandleValue, HandleValueIndication, HandleValueNotification, InformationData, Pdu,
    ReadBlobRequest, ReadBlobResponse, ReadByGroupTypeRequest, ReadByGroupTypeResponse,
    ReadByTypeRequest, ReadByTypeResponse, ReadRequest, ReadResponse, WriteCommand, WriteRequest,
    WriteResponse,
};
use crate::att::{AttConnection, ConnectionError, ErrorCode, Opcode, Outbound, SendError};
use crate::transport::Transport;
use crate::uuid::Uuid;

use super::database::GattDatabase;
use super::types::{
    HandleRange, Service, PRIMARY_SERVICE_UUID, SECONDARY_SERVICE_UUID,
};

/// GATT server configuration.
#[derive(Debug, Clone)]
pub struct GattServerConfig {
    /// Server Rx MTU advertised during the MTU exchange.
    pub preferred_mtu: usize,
}

impl Default for GattServerConfig {
    fn default() -> Self {
        Self {
            preferred_mtu: ATT_DEFAULT_MTU,
        }
    }
}

/// A GATT server bound to one ATT bearer.
pub struct GattServer<T: Transport> {
    connection: AttConnection<T>,
    database: Rc<RefCell<GattDatabase>>,
}

impl<T: Transport> GattServer<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, GattServerConfig::default())
    }

    pub fn with_config(transport: T, config: GattServerConfig) -> Self {
        assert!((ATT_DEFAULT_MTU..=ATT_MAX_MTU).contains(&config.preferred_mtu));

        let mut connection = AttConnection::new(transport);
        let database = Rc::new(RefCell::new(GattDatabase::new()));

        register_handlers(&mut connection, &database, config.preferred_mtu as u16);

        Self {
            connection,
            database,
        }
    }

    /// Shared handle to the attribute database.
    pub fn database(&self) -> Rc<RefCell<GattDatabase>> {
        self.database.clone()
    }

    /// Adds a service and returns its handle range.
    pub fn add_service(&mut self, service: &Service) -> HandleRange {
        self.database.borrow_mut().add_service(service)
    }

    /// Replaces an attribute value. The handle must have come from
    /// [`add_service`](Self::add_service).
    pub fn update_value(&mut self, handle: u16, value: Vec<u8>) {
        self.database.borrow_mut().write(handle, value);
    }

    /// Queues an unacknowledged value notification for `value_handle`,
    /// truncated to what the current MTU can carry.
    pub fn notify(&mut self, value_handle: u16) -> Result<u64, SendError> {
        let value = self.clamped_value(value_handle);
        self.connection.send(
            Pdu::HandleValueNotification(HandleValueNotification {
                handle: value_handle,
                value,
            }),
            None,
        )
    }

    /// Queues a value indication for `value_handle`. At most one indication
    /// is in flight at a time; the rest wait in the indication queue until
    /// the peer confirms.
    pub fn indicate(&mut self, value_handle: u16) -> Result<u64, SendError> {
        let value = self.clamped_value(value_handle);
        self.connection.send(
            Pdu::HandleValueIndication(HandleValueIndication {
                handle: value_handle,
                value,
            }),
            Some(Box::new(move |_response, _out| {
                debug!("indication for 0x{:04X} confirmed", value_handle);
            })),
        )
    }

    fn clamped_value(&self, handle: u16) -> Vec<u8> {
        let database = self.database.borrow();
        let value = &database.attribute(handle).value;
        let limit = self.connection.mtu() - 3;
        value[..value.len().min(limit)].to_vec()
    }

    /// Receives and dispatches one PDU.
    pub fn read(&mut self) -> Result<(), ConnectionError> {
        self.connection.read()
    }

    /// Writes at most one queued PDU.
    pub fn write(&mut self) -> Result<bool, ConnectionError> {
        self.connection.write()
    }

    /// Writes queued PDUs until nothing more is eligible.
    pub fn write_all(&mut self) -> Result<usize, ConnectionError> {
        self.connection.write_all()
    }

    pub fn mtu(&self) -> usize {
        self.connection.mtu()
    }

    pub fn connection(&self) -> &AttConnection<T> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut AttConnection<T> {
        &mut self.connection
    }
}

fn register_handlers<T: Transport>(
    connection: &mut AttConnection<T>,
    database: &Rc<RefCell<GattDatabase>>,
    preferred_mtu: u16,
) {
    connection.register(
        Opcode::ExchangeMtuRequest,
        Box::new(move |pdu, out| {
            if let Pdu::ExchangeMtuRequest(request) = pdu {
                exchange_mtu(preferred_mtu, request, out);
            }
        }),
    );

    let db = database.clone();
    connection.register(
        Opcode::ReadByGroupTypeRequest,
        Box::new(move |pdu, out| {
            if let Pdu::ReadByGroupTypeRequest(request) = pdu {
                read_by_group_type(&db.borrow(), request, out);
            }
        }),
    );

    let db = database.clone();
    connection.register(
        Opcode::ReadByTypeRequest,
        Box::new(move |pdu, out| {
            if let Pdu::ReadByTypeRequest(request) = pdu {
                read_by_type(&db.borrow(), request, out);
            }
        }),
    );

    let db = database.clone();
    connection.register(
        Opcode::FindInformationRequest,
        Box::new(move |pdu, out| {
            if let Pdu::FindInformationRequest(request) = pdu {
                find_information(&db.borrow(), request, out);
            }
        }),
    );

    let db = database.clone();
    connection.register(
        Opcode::FindByTypeValueRequest,
        Box::new(move |pdu, out| {
            if let Pdu::FindByTypeValueRequest(request) = pdu {
                find_by_type_value(&db.borrow(), request, out);
            }
        }),
    );

    let db = database.clone();
    connection.register(
        Opcode::ReadRequest,
        Box::new(move |pdu, out| {
            if let Pdu::ReadRequest(request) = pdu {
                read(&db.borrow(), request, out);
            }
        }),
    );

    let db = database.clone();
    connection.register(
        Opcode::ReadBlobRequest,
        Box::new(move |pdu, out| {
            if let Pdu::ReadBlobRequest(request) = pdu {
                read_blob(&db.borrow(), request, out);
            }
        }),
    );

    let db = database.clone();
    connection.register(
        Opcode::WriteRequest,
        Box::new(move |pdu, out| {
            if let Pdu::WriteRequest(request) = pdu {
                write(&mut db.borrow_mut(), request, out);
            }
        }),
    );

    let db = database.clone();
    connection.register(
        Opcode::WriteCommand,
        Box::new(move |pdu, _out| {
            if let Pdu::WriteCommand(command) = pdu {
                write_command(&mut db.borrow_mut(), command);
            }
        }),
    );
}

/// Validates a request's handle range. Queues the error response and returns
/// `None` when the range is invalid.
fn check_range(out: &mut Outbound, opcode: Opcode, start: u16, end: u16) -> Option<HandleRange> {
    if start == 0 || end == 0 {
        out.respond_error(opcode, 0, ErrorCode::InvalidHandle);
        return None;
    }
    if start > end {
        out.respond_error(opcode, start, ErrorCode::InvalidHandle);
        return None;
    }
    Some(HandleRange::new(start, end))
}

fn exchange_mtu(preferred_mtu: u16, request: &ExchangeMtuRequest, out: &mut Outbound) {
    let final_mtu = request
        .client_mtu
        .min(preferred_mtu)
        .max(ATT_DEFAULT_MTU as u16);

    debug!(
        "MTU exchange: client {} server {} -> {}",
        request.client_mtu, preferred_mtu, final_mtu
    );

    // The response advertises our Rx MTU and must itself fit the old MTU;
    // the new one takes effect once the response bytes are out.
    out.respond_then_set_mtu(
        Pdu::ExchangeMtuResponse(ExchangeMtuResponse {
            server_mtu: preferred_mtu,
        }),
        final_mtu as usize,
    );
}

fn read_by_group_type(database: &GattDatabase, request: &ReadByGroupTypeRequest, out: &mut Outbound) {
    let opcode = Opcode::ReadByGroupTypeRequest;

    debug!(
        "Read By Group Type 0x{:04X}..=0x{:04X} {:?}",
        request.start_handle, request.end_handle, request.group_type
    );

    let Some(range) = check_range(out, opcode, request.start_handle, request.end_handle) else {
        return;
    };

    // GATT allows only the two service group types here.
    if request.group_type != PRIMARY_SERVICE_UUID && request.group_type != SECONDARY_SERVICE_UUID {
        out.respond_error(opcode, range.start, ErrorCode::UnsupportedGroupType);
        return;
    }

    let groups = database.read_by_group_type(range, &request.group_type);
    if groups.is_empty() {
        out.respond_error(opcode, range.start, ErrorCode::AttributeNotFound);
        return;
    }

    // One response PDU filled up to the MTU; entries stay uniform, so a
    // differently-sized group value also ends this response. The client
    // re-requests from the last group end + 1.
    let value_len = groups[0].1.len();
    let entry_len = 4 + value_len;
    let capacity = (out.mtu() - 2) / entry_len;

    let entries: Vec<AttributeGroupData> = groups
        .iter()
        .take_while(|(_, value)| value.len() == value_len)
        .take(capacity.max(1))
        .map(|(group, value)| AttributeGroupData {
            handle: group.start,
            end_group_handle: group.end,
            value: value.clone(),
        })
        .collect();

    match ReadByGroupTypeResponse::new(entries) {
        Some(response) => out.respond(Pdu::ReadByGroupTypeResponse(response)),
        None => {
            warn!("could not build Read By Group Type response");
            out.respond_error(opcode, range.start, ErrorCode::Unlikely);
        }
    }
}

fn read_by_type(database: &GattDatabase, request: &ReadByTypeRequest, out: &mut Outbound) {
    let opcode = Opcode::ReadByTypeRequest;

    debug!(
        "Read By Type 0x{:04X}..=0x{:04X} {:?}",
        request.start_handle, request.end_handle, request.attribute_type
    );

    let Some(range) = check_range(out, opcode, request.start_handle, request.end_handle) else {
        return;
    };

    let readable: Vec<_> = database
        .read_by_type(range, &request.attribute_type)
        .into_iter()
        .filter(|attribute| attribute.permissions.can_read())
        .collect();

    if readable.is_empty() {
        out.respond_error(opcode, range.start, ErrorCode::AttributeNotFound);
        return;
    }

    // Entry size is fixed by the first attribute; long values are truncated
    // to what one entry can carry under the current MTU.
    let first_len = readable[0].value.len();
    let value_len = first_len.min(out.mtu() - 4).min(u8::MAX as usize - 2);
    let entry_len = 2 + value_len;
    let capacity = (out.mtu() - 2) / entry_len;

    let entries: Vec<HandleValue> = readable
        .iter()
        .take_while(|attribute| attribute.value.len() == first_len)
        .take(capacity.max(1))
        .map(|attribute| HandleValue {
            handle: attribute.handle,
            value: attribute.value[..value_len].to_vec(),
        })
        .collect();

    match ReadByTypeResponse::new(entries) {
        Some(response) => out.respond(Pdu::ReadByTypeResponse(response)),
        None => {
            warn!("could not build Read By Type response");
            out.respond_error(opcode, range.start, ErrorCode::Unlikely);
        }
    }
}

fn find_information(database: &GattDatabase, request: &FindInformationRequest, out: &mut Outbound) {
    let opcode = Opcode::FindInformationRequest;

    debug!(
        "Find Information 0x{:04X}..=0x{:04X}",
        request.start_handle, request.end_handle
    );

    let Some(range) = check_range(out, opcode, request.start_handle, request.end_handle) else {
        return;
    };

    let attributes = database.find_information(range);
    if attributes.is_empty() {
        out.respond_error(opcode, range.start, ErrorCode::AttributeNotFound);
        return;
    }

    // Format follows the first attribute; a type of the other width ends the
    // response, the client resumes past it.
    let first_is_16bit = attributes[0].attr_type.as_u16().is_some();
    let pair_size = if first_is_16bit { 4 } else { 18 };
    let capacity = ((out.mtu() - 2) / pair_size).max(1);

    let data = if first_is_16bit {
        let pairs: Vec<(u16, u16)> = attributes
            .iter()
            .map_while(|attribute| {
                attribute
                    .attr_type
                    .as_u16()
                    .map(|uuid16| (attribute.handle, uuid16))
            })
            .take(capacity)
            .collect();
        InformationData::Uuid16(pairs)
    } else {
        let pairs: Vec<(u16, Uuid)> = attributes
            .iter()
            .take_while(|attribute| attribute.attr_type.as_u16().is_none())
            .take(capacity)
            .map(|attribute| (attribute.handle, attribute.attr_type))
            .collect();
        InformationData::Uuid128(pairs)
    };

    match FindInformationResponse::new(data) {
        Some(response) => out.respond(Pdu::FindInformationResponse(response)),
        None => {
            warn!("could not build Find Information response");
            out.respond_error(opcode, range.start, ErrorCode::Unlikely);
        }
    }
}

fn find_by_type_value(
    database: &GattDatabase,
    request: &FindByTypeValueRequest,
    out: &mut Outbound,
) {
    let opcode = Opcode::FindByTypeValueRequest;

    debug!(
        "Find By Type Value 0x{:04X}..=0x{:04X} 0x{:04X}",
        request.start_handle, request.end_handle, request.attribute_type
    );

    let Some(range) = check_range(out, opcode, request.start_handle, request.end_handle) else {
        return;
    };

    let found = database.find_by_type_value(range, request.attribute_type, &request.attribute_value);
    if found.is_empty() {
        out.respond_error(opcode, range.start, ErrorCode::AttributeNotFound);
        return;
    }

    let capacity = ((out.mtu() - 1) / 4).max(1);
    let handles = found
        .iter()
        .take(capacity)
        .map(|group| FoundRange {
            found_handle: group.start,
            group_end_handle: group.end,
        })
        .collect();

    match FindByTypeValueResponse::new(handles) {
        Some(response) => out.respond(Pdu::FindByTypeValueResponse(response)),
        None => {
            warn!("could not build Find By Type Value response");
            out.respond_error(opcode, range.start, ErrorCode::Unlikely);
        }
    }
}

fn read(database: &GattDatabase, request: &ReadRequest, out: &mut Outbound) {
    let opcode = Opcode::ReadRequest;

    debug!("Read 0x{:04X}", request.handle);

    let Some(attribute) = database.find_attribute(request.handle) else {
        out.respond_error(opcode, request.handle, ErrorCode::InvalidHandle);
        return;
    };

    if !attribute.permissions.can_read() {
        out.respond_error(opcode, request.handle, ErrorCode::ReadNotPermitted);
        return;
    }

    let limit = out.mtu() - 1;
    let value = attribute.value[..attribute.value.len().min(limit)].to_vec();
    out.respond(Pdu::ReadResponse(ReadResponse { value }));
}

fn read_blob(database: &GattDatabase, request: &ReadBlobRequest, out: &mut Outbound) {
    let opcode = Opcode::ReadBlobRequest;

    debug!("Read Blob 0x{:04X} offset {}", request.handle, request.offset);

    let Some(attribute) = database.find_attribute(request.handle) else {
        out.respond_error(opcode, request.handle, ErrorCode::InvalidHandle);
        return;
    };

    if !attribute.permissions.can_read() {
        out.respond_error(opcode, request.handle, ErrorCode::ReadNotPermitted);
        return;
    }

    let offset = request.offset as usize;
    if offset > attribute.value.len() {
        out.respond_error(opcode, request.handle, ErrorCode::InvalidOffset);
        return;
    }

    let limit = out.mtu() - 1;
    let part = &attribute.value[offset..];
    let value = part[..part.len().min(limit)].to_vec();
    out.respond(Pdu::ReadBlobResponse(ReadBlobResponse { value }));
}

fn write(database: &mut GattDatabase, request: &WriteRequest, out: &mut Outbound) {
    let opcode = Opcode::WriteRequest;

    debug!("Write 0x{:04X} ({} bytes)", request.handle, request.value.len());

    let Some(attribute) = database.find_attribute_mut(request.handle) else {
        out.respond_error(opcode, request.handle, ErrorCode::InvalidHandle);
        return;
    };

    if !attribute.permissions.can_write() {
        out.respond_error(opcode, request.handle, ErrorCode::WriteNotPermitted);
        return;
    }

    attribute.value = request.value.clone();
    out.respond(Pdu::WriteResponse(WriteResponse));
}

fn write_command(database: &mut GattDatabase, command: &WriteCommand) {
    // Commands are never answered; failures are dropped on the floor.
    let Some(attribute) = database.find_attribute_mut(command.handle) else {
        debug!("write command for unknown handle 0x{:04X}", command.handle);
        return;
    };

    if !attribute.permissions.can_write() {
        debug!("write command denied for 0x{:04X}", command.handle);
        return;
    }

    attribute.value = command.value.clone();
}
