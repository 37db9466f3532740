//! BlueATT - a host-side ATT/GATT protocol stack
//!
//! This library implements the Bluetooth Attribute Protocol (ATT) and the
//! Generic Attribute Profile (GATT) built on top of it: the PDU codec, the
//! per-connection request/response/indication multiplexer, the in-memory
//! attribute database that GATT servers expose, and thin GATT client and
//! server layers that drive the connection.
//!
//! The stack is transport-agnostic: anything providing an ordered, reliable,
//! frame-preserving byte channel (an L2CAP socket bound to the ATT channel in
//! practice) can implement [`transport::Transport`] and carry a connection.

pub mod att;
pub mod gatt;
pub mod transport;
pub mod uuid;

// Re-export common types for convenience
pub use att::{
    AttConnection, AttResponse, ConnectionError, ErrorCode, Opcode, OpcodeKind, Outbound, Pdu,
    SendError,
};
pub use gatt::{
    Characteristic, CharacteristicProperties, Descriptor, GattClient, GattDatabase, GattServer,
    GattServerConfig, HandleRange, Permissions, Service,
};
pub use transport::Transport;
pub use uuid::Uuid;
