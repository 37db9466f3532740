//! GATT client
//!
//! A thin, reactive user of [`AttConnection`]: issues discovery/read/write
//! requests and interprets the responses. Nothing here polls; the owner
//! drives `read`/`write_all` from its event loop and the completion callbacks
//! fire as replies arrive. Multi-PDU operations (service discovery, long
//! reads) chain their follow-up requests from inside the response callback.

use log::{debug, trace};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

use crate::att::constants::ATT_DEFAULT_MTU;
use crate::att::pdu::{
    ExchangeMtuRequest, HandleValueConfirmation, Pdu, ReadBlobRequest, ReadByGroupTypeRequest,
    ReadByTypeRequest, ReadRequest, WriteCommand, WriteRequest,
};
use crate::att::{
    AttConnection, AttResponse, ConnectionError, ErrorCode, Opcode, Outbound, ResponseCallback,
    SendError,
};
use crate::transport::Transport;
use crate::uuid::Uuid;

use super::types::{
    CharacteristicProperties, HandleRange, CHARACTERISTIC_UUID, PRIMARY_SERVICE_UUID,
};

/// A service found by discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub primary: bool,
    pub range: HandleRange,
}

/// A characteristic found by discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub declaration_handle: u16,
    pub value_handle: u16,
}

/// Failures of one GATT client operation. The connection stays usable after
/// any of these; bearer-fatal conditions surface from `read` instead.
#[derive(Debug, Error)]
pub enum GattClientError {
    #[error("peer answered {0:?} for handle 0x{1:04X}")]
    ErrorResponse(ErrorCode, u16),

    #[error("peer sent an unusable {0:?}")]
    InvalidResponse(Opcode),
}

pub type GattResult<T> = Result<T, GattClientError>;

/// A GATT client bound to one ATT bearer.
pub struct GattClient<T: Transport> {
    connection: AttConnection<T>,
}

struct ServiceDiscovery {
    next_start: u16,
    end: u16,
    found: Vec<DiscoveredService>,
    completion: Box<dyn FnMut(GattResult<Vec<DiscoveredService>>)>,
}

struct CharacteristicDiscovery {
    next_start: u16,
    end: u16,
    found: Vec<DiscoveredCharacteristic>,
    completion: Box<dyn FnMut(GattResult<Vec<DiscoveredCharacteristic>>)>,
}

struct ReadOperation {
    handle: u16,
    data: Vec<u8>,
    completion: Box<dyn FnMut(GattResult<Vec<u8>>)>,
}

impl<T: Transport> GattClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            connection: AttConnection::new(transport),
        }
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

    /// Negotiates the MTU. On success the connection operates at
    /// `max(23, min(client_mtu, server_mtu))`, which is also handed to the
    /// completion callback.
    pub fn exchange_mtu(
        &mut self,
        client_mtu: u16,
        mut completion: Box<dyn FnMut(GattResult<u16>)>,
    ) -> Result<u64, SendError> {
        let request = Pdu::ExchangeMtuRequest(ExchangeMtuRequest { client_mtu });

        self.connection.send(
            request,
            Some(Box::new(move |response, out: &mut Outbound| {
                match response {
                    AttResponse::Error(error) => {
                        completion(Err(GattClientError::ErrorResponse(
                            error.error_code,
                            error.handle,
                        )));
                    }
                    AttResponse::Value(Pdu::ExchangeMtuResponse(rsp)) => {
                        let final_mtu = client_mtu
                            .min(rsp.server_mtu)
                            .max(ATT_DEFAULT_MTU as u16);
                        debug!(
                            "MTU exchange: client {} server {} -> {}",
                            client_mtu, rsp.server_mtu, final_mtu
                        );
                        out.set_mtu(final_mtu as usize);
                        completion(Ok(final_mtu));
                    }
                    AttResponse::Value(other) => {
                        completion(Err(GattClientError::InvalidResponse(other.opcode())));
                    }
                }
            })),
        )
    }

    /// Discovers all primary services, issuing as many Read By Group Type
    /// requests as the server's responses require.
    pub fn discover_all_primary_services(
        &mut self,
        completion: Box<dyn FnMut(GattResult<Vec<DiscoveredService>>)>,
    ) -> Result<u64, SendError> {
        let operation = Rc::new(RefCell::new(ServiceDiscovery {
            next_start: 0x0001,
            end: 0xFFFF,
            found: Vec::new(),
            completion,
        }));

        self.connection.send(
            service_discovery_request(0x0001, 0xFFFF),
            Some(service_discovery_callback(operation)),
        )
    }

    /// Discovers the characteristics declared inside `range` (typically a
    /// discovered service's handle range).
    pub fn discover_characteristics(
        &mut self,
        range: HandleRange,
        completion: Box<dyn FnMut(GattResult<Vec<DiscoveredCharacteristic>>)>,
    ) -> Result<u64, SendError> {
        let operation = Rc::new(RefCell::new(CharacteristicDiscovery {
            next_start: range.start,
            end: range.end,
            found: Vec::new(),
            completion,
        }));

        self.connection.send(
            characteristic_discovery_request(range.start, range.end),
            Some(characteristic_discovery_callback(operation)),
        )
    }

    /// Reads a characteristic value, continuing with Read Blob requests while
    /// full-MTU parts keep arriving.
    pub fn read_characteristic(
        &mut self,
        value_handle: u16,
        completion: Box<dyn FnMut(GattResult<Vec<u8>>)>,
    ) -> Result<u64, SendError> {
        let operation = Rc::new(RefCell::new(ReadOperation {
            handle: value_handle,
            data: Vec::new(),
            completion,
        }));

        self.connection.send(
            Pdu::ReadRequest(ReadRequest {
                handle: value_handle,
            }),
            Some(read_callback(operation)),
        )
    }

    /// Writes a characteristic value and waits for the acknowledgement.
    pub fn write_characteristic(
        &mut self,
        value_handle: u16,
        value: Vec<u8>,
        mut completion: Box<dyn FnMut(GattResult<()>)>,
    ) -> Result<u64, SendError> {
        let request = Pdu::WriteRequest(WriteRequest {
            handle: value_handle,
            value,
        });

        self.connection.send(
            request,
            Some(Box::new(move |response, _out: &mut Outbound| {
                match response {
                    AttResponse::Error(error) => completion(Err(GattClientError::ErrorResponse(
                        error.error_code,
                        error.handle,
                    ))),
                    AttResponse::Value(Pdu::WriteResponse(_)) => completion(Ok(())),
                    AttResponse::Value(other) => {
                        completion(Err(GattClientError::InvalidResponse(other.opcode())))
                    }
                }
            })),
        )
    }

    /// Fire-and-forget write; the peer never acknowledges it.
    pub fn write_without_response(
        &mut self,
        value_handle: u16,
        value: Vec<u8>,
    ) -> Result<u64, SendError> {
        self.connection.send(
            Pdu::WriteCommand(WriteCommand {
                handle: value_handle,
                value,
            }),
            None,
        )
    }

    /// Registers a callback for server-pushed notifications.
    pub fn register_notifications(
        &mut self,
        mut callback: Box<dyn FnMut(u16, &[u8])>,
    ) -> u64 {
        self.connection.register(
            Opcode::HandleValueNotification,
            Box::new(move |pdu, _out| {
                if let Pdu::HandleValueNotification(notification) = pdu {
                    callback(notification.handle, &notification.value);
                }
            }),
        )
    }

    /// Registers a callback for server-pushed indications. Each indication
    /// is confirmed automatically after the callback runs.
    pub fn register_indications(&mut self, mut callback: Box<dyn FnMut(u16, &[u8])>) -> u64 {
        self.connection.register(
            Opcode::HandleValueIndication,
            Box::new(move |pdu, out| {
                if let Pdu::HandleValueIndication(indication) = pdu {
                    callback(indication.handle, &indication.value);
                    out.respond(Pdu::HandleValueConfirmation(HandleValueConfirmation));
                }
            }),
        )
    }
}

fn service_discovery_request(start: u16, end: u16) -> Pdu {
    Pdu::ReadByGroupTypeRequest(ReadByGroupTypeRequest {
        start_handle: start,
        end_handle: end,
        group_type: Uuid::from_u16(PRIMARY_SERVICE_UUID),
    })
}

fn service_discovery_callback(operation: Rc<RefCell<ServiceDiscovery>>) -> ResponseCallback {
    Box::new(move |response, out| {
        let mut state = operation.borrow_mut();

        match response {
            AttResponse::Error(error) if error.error_code == ErrorCode::AttributeNotFound => {
                // Ran past the last service; discovery is complete.
                let found = std::mem::take(&mut state.found);
                debug!("service discovery finished: {} services", found.len());
                (state.completion)(Ok(found));
            }
            AttResponse::Error(error) => {
                (state.completion)(Err(GattClientError::ErrorResponse(
                    error.error_code,
                    error.handle,
                )));
            }
            AttResponse::Value(Pdu::ReadByGroupTypeResponse(rsp)) => {
                let mut last_end = state.next_start;

                for entry in rsp.data() {
                    let Some(uuid) = Uuid::try_from_slice_le(&entry.value) else {
                        (state.completion)(Err(GattClientError::InvalidResponse(
                            Opcode::ReadByGroupTypeResponse,
                        )));
                        return;
                    };

                    trace!(
                        "service {:?} 0x{:04X}..=0x{:04X}",
                        uuid,
                        entry.handle,
                        entry.end_group_handle
                    );

                    state.found.push(DiscoveredService {
                        uuid,
                        primary: true,
                        range: HandleRange::new(entry.handle, entry.end_group_handle),
                    });
                    last_end = entry.end_group_handle;
                }

                if last_end >= state.end {
                    let found = std::mem::take(&mut state.found);
                    debug!("service discovery finished: {} services", found.len());
                    (state.completion)(Ok(found));
                } else {
                    state.next_start = last_end + 1;
                    let next = service_discovery_request(state.next_start, state.end);
                    drop(state);
                    out.request(next, service_discovery_callback(operation.clone()));
                }
            }
            AttResponse::Value(other) => {
                (state.completion)(Err(GattClientError::InvalidResponse(other.opcode())));
            }
        }
    })
}

fn characteristic_discovery_request(start: u16, end: u16) -> Pdu {
    Pdu::ReadByTypeRequest(ReadByTypeRequest {
        start_handle: start,
        end_handle: end,
        attribute_type: Uuid::from_u16(CHARACTERISTIC_UUID),
    })
}

/// Parses a characteristic declaration value:
/// `[properties, value handle LE, UUID (2 or 16 bytes)]`.
fn parse_declaration(handle: u16, value: &[u8]) -> Option<DiscoveredCharacteristic> {
    if value.len() != 5 && value.len() != 19 {
        return None;
    }

    let properties = CharacteristicProperties::from_bits_retain(value[0]);
    let value_handle = u16::from_le_bytes([value[1], value[2]]);
    let uuid = Uuid::try_from_slice_le(&value[3..])?;

    Some(DiscoveredCharacteristic {
        uuid,
        properties,
        declaration_handle: handle,
        value_handle,
    })
}

fn characteristic_discovery_callback(
    operation: Rc<RefCell<CharacteristicDiscovery>>,
) -> ResponseCallback {
    Box::new(move |response, out| {
        let mut state = operation.borrow_mut();

        match response {
            AttResponse::Error(error) if error.error_code == ErrorCode::AttributeNotFound => {
                let found = std::mem::take(&mut state.found);
                debug!("characteristic discovery finished: {} found", found.len());
                (state.completion)(Ok(found));
            }
            AttResponse::Error(error) => {
                (state.completion)(Err(GattClientError::ErrorResponse(
                    error.error_code,
                    error.handle,
                )));
            }
            AttResponse::Value(Pdu::ReadByTypeResponse(rsp)) => {
                let mut last_handle = state.next_start;

                for entry in rsp.data() {
                    let Some(characteristic) = parse_declaration(entry.handle, &entry.value)
                    else {
                        (state.completion)(Err(GattClientError::InvalidResponse(
                            Opcode::ReadByTypeResponse,
                        )));
                        return;
                    };

                    trace!(
                        "characteristic {:?} declared at 0x{:04X}",
                        characteristic.uuid,
                        entry.handle
                    );

                    state.found.push(characteristic);
                    last_handle = entry.handle;
                }

                if last_handle >= state.end {
                    let found = std::mem::take(&mut state.found);
                    debug!("characteristic discovery finished: {} found", found.len());
                    (state.completion)(Ok(found));
                } else {
                    state.next_start = last_handle + 1;
                    let next = characteristic_discovery_request(state.next_start, state.end);
                    drop(state);
                    out.request(next, characteristic_discovery_callback(operation.clone()));
                }
            }
            AttResponse::Value(other) => {
                (state.completion)(Err(GattClientError::InvalidResponse(other.opcode())));
            }
        }
    })
}

fn read_callback(operation: Rc<RefCell<ReadOperation>>) -> ResponseCallback {
    Box::new(move |response, out| {
        let mut state = operation.borrow_mut();

        match response {
            // A server without long-read support answers the first blob
            // request with AttributeNotLong; the value is simply complete.
            AttResponse::Error(error)
                if error.error_code == ErrorCode::AttributeNotLong && !state.data.is_empty() =>
            {
                let data = std::mem::take(&mut state.data);
                (state.completion)(Ok(data));
            }
            AttResponse::Error(error) => {
                (state.completion)(Err(GattClientError::ErrorResponse(
                    error.error_code,
                    error.handle,
                )));
            }
            AttResponse::Value(Pdu::ReadResponse(rsp)) => {
                continue_or_finish(&mut state, rsp.value, out, &operation);
            }
            AttResponse::Value(Pdu::ReadBlobResponse(rsp)) => {
                continue_or_finish(&mut state, rsp.value, out, &operation);
            }
            AttResponse::Value(other) => {
                (state.completion)(Err(GattClientError::InvalidResponse(other.opcode())));
            }
        }
    })
}

fn continue_or_finish(
    state: &mut ReadOperation,
    part: Vec<u8>,
    out: &mut Outbound,
    operation: &Rc<RefCell<ReadOperation>>,
) {
    let full_part = part.len() == out.mtu() - 1;
    state.data.extend_from_slice(&part);

    // A part shorter than the MTU allows means the value ended; a full part
    // may continue, so ask for the next slice.
    if full_part && state.data.len() <= u16::MAX as usize {
        let next = Pdu::ReadBlobRequest(ReadBlobRequest {
            handle: state.handle,
            offset: state.data.len() as u16,
        });
        out.request(next, read_callback(operation.clone()));
    } else {
        let data = std::mem::take(&mut state.data);
        (state.completion)(Ok(data));
    }
}
