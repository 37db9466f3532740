//! Generic Attribute Profile (GATT)
//!
//! The profile layer over ATT: the attribute database a server exposes,
//! the server request handlers, and the client discovery/read/write
//! operations.

pub mod client;
pub mod database;
pub mod server;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export the public API
pub use self::client::{
    DiscoveredCharacteristic, DiscoveredService, GattClient, GattClientError, GattResult,
};
pub use self::database::{Attribute, GattDatabase};
pub use self::server::{GattServer, GattServerConfig};
pub use self::types::{
    Characteristic, CharacteristicProperties, Descriptor, HandleRange, Permissions, Service,
    CHARACTERISTIC_UUID, CHAR_USER_DESC_UUID, CLIENT_CHAR_CONFIG_UUID, PRIMARY_SERVICE_UUID,
    SECONDARY_SERVICE_UUID,
};
