//! Error handling for the ATT protocol
use super::constants::*;
use super::opcode::Opcode;
use thiserror::Error;

/// ATT error codes as defined in the specification, carried in
/// Error Response PDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    Unlikely,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    /// Application-defined error (0x80..=0x9F)
    ApplicationError(u8),
    /// Reserved or profile-defined code
    Unknown(u8),
}

impl From<u8> for ErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ATT_ERROR_INVALID_HANDLE => ErrorCode::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => ErrorCode::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => ErrorCode::WriteNotPermitted,
            ATT_ERROR_INVALID_PDU => ErrorCode::InvalidPdu,
            ATT_ERROR_INSUFFICIENT_AUTHENTICATION => ErrorCode::InsufficientAuthentication,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => ErrorCode::RequestNotSupported,
            ATT_ERROR_INVALID_OFFSET => ErrorCode::InvalidOffset,
            ATT_ERROR_INSUFFICIENT_AUTHORIZATION => ErrorCode::InsufficientAuthorization,
            ATT_ERROR_PREPARE_QUEUE_FULL => ErrorCode::PrepareQueueFull,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => ErrorCode::AttributeNotFound,
            ATT_ERROR_ATTRIBUTE_NOT_LONG => ErrorCode::AttributeNotLong,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE => ErrorCode::InsufficientEncryptionKeySize,
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => ErrorCode::InvalidAttributeValueLength,
            ATT_ERROR_UNLIKELY => ErrorCode::Unlikely,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION => ErrorCode::InsufficientEncryption,
            ATT_ERROR_UNSUPPORTED_GROUP_TYPE => ErrorCode::UnsupportedGroupType,
            ATT_ERROR_INSUFFICIENT_RESOURCES => ErrorCode::InsufficientResources,
            c if (ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END)
                .contains(&c) =>
            {
                ErrorCode::ApplicationError(c)
            }
            c => ErrorCode::Unknown(c),
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> u8 {
        match code {
            ErrorCode::InvalidHandle => ATT_ERROR_INVALID_HANDLE,
            ErrorCode::ReadNotPermitted => ATT_ERROR_READ_NOT_PERMITTED,
            ErrorCode::WriteNotPermitted => ATT_ERROR_WRITE_NOT_PERMITTED,
            ErrorCode::InvalidPdu => ATT_ERROR_INVALID_PDU,
            ErrorCode::InsufficientAuthentication => ATT_ERROR_INSUFFICIENT_AUTHENTICATION,
            ErrorCode::RequestNotSupported => ATT_ERROR_REQUEST_NOT_SUPPORTED,
            ErrorCode::InvalidOffset => ATT_ERROR_INVALID_OFFSET,
            ErrorCode::InsufficientAuthorization => ATT_ERROR_INSUFFICIENT_AUTHORIZATION,
            ErrorCode::PrepareQueueFull => ATT_ERROR_PREPARE_QUEUE_FULL,
            ErrorCode::AttributeNotFound => ATT_ERROR_ATTRIBUTE_NOT_FOUND,
            ErrorCode::AttributeNotLong => ATT_ERROR_ATTRIBUTE_NOT_LONG,
            ErrorCode::InsufficientEncryptionKeySize => {
                ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE
            }
            ErrorCode::InvalidAttributeValueLength => ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH,
            ErrorCode::Unlikely => ATT_ERROR_UNLIKELY,
            ErrorCode::InsufficientEncryption => ATT_ERROR_INSUFFICIENT_ENCRYPTION,
            ErrorCode::UnsupportedGroupType => ATT_ERROR_UNSUPPORTED_GROUP_TYPE,
            ErrorCode::InsufficientResources => ATT_ERROR_INSUFFICIENT_RESOURCES,
            ErrorCode::ApplicationError(c) => c,
            ErrorCode::Unknown(c) => c,
        }
    }
}

/// Bearer-fatal connection failures.
///
/// Anything of this type means the peer broke the ATT serialization contract
/// or sent bytes that cannot be parsed; there is no PDU-level resync in ATT,
/// so the correct reaction is to tear the connection down. Transport I/O
/// errors are passed through for the driver loop to judge.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The received data could not be parsed correctly.
    #[error("garbage PDU ({0:02x?})")]
    GarbageResponse(Vec<u8>),

    /// A response, confirmation, or request arrived that the protocol state
    /// does not allow.
    #[error("unexpected PDU ({0:02x?})")]
    UnexpectedResponse(Vec<u8>),

    /// Transport-level I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Failures to enqueue an outbound PDU.
///
/// These are caller errors surfaced at `send` time; nothing has been queued
/// when one is returned.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("encoded PDU is {len} bytes but MTU is {mtu}")]
    PduTooLarge { len: usize, mtu: usize },

    #[error("{0:?} expects a response callback")]
    CallbackExpected(Opcode),

    #[error("{0:?} cannot take a response callback")]
    CallbackNotAllowed(Opcode),
}
