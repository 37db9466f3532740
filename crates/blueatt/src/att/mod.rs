//! Attribute Protocol (ATT) implementation
//!
//! This module provides the ATT protocol implementation: the PDU codec, the
//! opcode taxonomy, and the per-connection multiplexer that serializes
//! requests, responses, indications, and notifications over one transport
//! stream. The GATT layer builds on top of it.

pub mod connection;
pub mod constants;
pub mod error;
pub mod opcode;
pub mod pdu;

#[cfg(test)]
mod tests;

// Re-export the public API
pub use self::connection::{
    AttConnection, AttResponse, DisconnectCallback, NotifyCallback, Outbound, ResponseCallback,
};
pub use self::constants::*;
pub use self::error::{ConnectionError, ErrorCode, SendError};
pub use self::opcode::{Opcode, OpcodeKind};
pub use self::pdu::{
    AttPdu, AttributeGroupData, ErrorResponse, ExchangeMtuRequest, ExchangeMtuResponse,
    FindByTypeValueRequest, FindByTypeValueResponse, FindInformationRequest,
    FindInformationResponse, FoundRange, HandleValue, HandleValueConfirmation,
    HandleValueIndication, HandleValueNotification, InformationData, Pdu, ReadBlobRequest,
    ReadBlobResponse, ReadByGroupTypeRequest, ReadByGroupTypeResponse, ReadByTypeRequest,
    ReadByTypeResponse, ReadRequest, ReadResponse, WriteCommand, WriteRequest, WriteResponse,
};
