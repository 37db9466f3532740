//! ATT opcodes and their protocol categories

use super::constants::*;

/// Every ATT opcode this stack speaks.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    ErrorResponse = ATT_ERROR_RSP,
    ExchangeMtuRequest = ATT_EXCHANGE_MTU_REQ,
    ExchangeMtuResponse = ATT_EXCHANGE_MTU_RSP,
    FindInformationRequest = ATT_FIND_INFO_REQ,
    FindInformationResponse = ATT_FIND_INFO_RSP,
    FindByTypeValueRequest = ATT_FIND_BY_TYPE_VALUE_REQ,
    FindByTypeValueResponse = ATT_FIND_BY_TYPE_VALUE_RSP,
    ReadByTypeRequest = ATT_READ_BY_TYPE_REQ,
    ReadByTypeResponse = ATT_READ_BY_TYPE_RSP,
    ReadRequest = ATT_READ_REQ,
    ReadResponse = ATT_READ_RSP,
    ReadBlobRequest = ATT_READ_BLOB_REQ,
    ReadBlobResponse = ATT_READ_BLOB_RSP,
    ReadByGroupTypeRequest = ATT_READ_BY_GROUP_TYPE_REQ,
    ReadByGroupTypeResponse = ATT_READ_BY_GROUP_TYPE_RSP,
    WriteRequest = ATT_WRITE_REQ,
    WriteResponse = ATT_WRITE_RSP,
    WriteCommand = ATT_WRITE_CMD,
    HandleValueNotification = ATT_HANDLE_VALUE_NTF,
    HandleValueIndication = ATT_HANDLE_VALUE_IND,
    HandleValueConfirmation = ATT_HANDLE_VALUE_CONF,
}

/// Protocol category of an opcode.
///
/// The category decides queueing and pending-slot behavior on the connection:
/// requests and indications expect a reply and are serialized one-at-a-time,
/// everything else is fire-and-forget from the sender's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeKind {
    Request,
    Response,
    Command,
    Notification,
    Indication,
    Confirmation,
}

impl Opcode {
    /// Decodes an opcode byte. Returns `None` for opcodes this stack does not
    /// speak - the caller treats that as a garbage PDU.
    pub fn from_u8(value: u8) -> Option<Opcode> {
        match value {
            ATT_ERROR_RSP => Some(Opcode::ErrorResponse),
            ATT_EXCHANGE_MTU_REQ => Some(Opcode::ExchangeMtuRequest),
            ATT_EXCHANGE_MTU_RSP => Some(Opcode::ExchangeMtuResponse),
            ATT_FIND_INFO_REQ => Some(Opcode::FindInformationRequest),
            ATT_FIND_INFO_RSP => Some(Opcode::FindInformationResponse),
            ATT_FIND_BY_TYPE_VALUE_REQ => Some(Opcode::FindByTypeValueRequest),
            ATT_FIND_BY_TYPE_VALUE_RSP => Some(Opcode::FindByTypeValueResponse),
            ATT_READ_BY_TYPE_REQ => Some(Opcode::ReadByTypeRequest),
            ATT_READ_BY_TYPE_RSP => Some(Opcode::ReadByTypeResponse),
            ATT_READ_REQ => Some(Opcode::ReadRequest),
            ATT_READ_RSP => Some(Opcode::ReadResponse),
            ATT_READ_BLOB_REQ => Some(Opcode::ReadBlobRequest),
            ATT_READ_BLOB_RSP => Some(Opcode::ReadBlobResponse),
            ATT_READ_BY_GROUP_TYPE_REQ => Some(Opcode::ReadByGroupTypeRequest),
            ATT_READ_BY_GROUP_TYPE_RSP => Some(Opcode::ReadByGroupTypeResponse),
            ATT_WRITE_REQ => Some(Opcode::WriteRequest),
            ATT_WRITE_RSP => Some(Opcode::WriteResponse),
            ATT_WRITE_CMD => Some(Opcode::WriteCommand),
            ATT_HANDLE_VALUE_NTF => Some(Opcode::HandleValueNotification),
            ATT_HANDLE_VALUE_IND => Some(Opcode::HandleValueIndication),
            ATT_HANDLE_VALUE_CONF => Some(Opcode::HandleValueConfirmation),
            _ => None,
        }
    }

    /// The protocol category of this opcode.
    pub fn kind(self) -> OpcodeKind {
        match self {
            Opcode::ExchangeMtuRequest
            | Opcode::FindInformationRequest
            | Opcode::FindByTypeValueRequest
            | Opcode::ReadByTypeRequest
            | Opcode::ReadRequest
            | Opcode::ReadBlobRequest
            | Opcode::ReadByGroupTypeRequest
            | Opcode::WriteRequest => OpcodeKind::Request,

            Opcode::ErrorResponse
            | Opcode::ExchangeMtuResponse
            | Opcode::FindInformationResponse
            | Opcode::FindByTypeValueResponse
            | Opcode::ReadByTypeResponse
            | Opcode::ReadResponse
            | Opcode::ReadBlobResponse
            | Opcode::ReadByGroupTypeResponse
            | Opcode::WriteResponse => OpcodeKind::Response,

            Opcode::WriteCommand => OpcodeKind::Command,
            Opcode::HandleValueNotification => OpcodeKind::Notification,
            Opcode::HandleValueIndication => OpcodeKind::Indication,
            Opcode::HandleValueConfirmation => OpcodeKind::Confirmation,
        }
    }

    /// For a response opcode, the request opcode it answers.
    ///
    /// `ErrorResponse` maps to `None`: the request opcode is carried inside
    /// the error PDU itself.
    pub fn request(self) -> Option<Opcode> {
        match self {
            Opcode::ExchangeMtuResponse => Some(Opcode::ExchangeMtuRequest),
            Opcode::FindInformationResponse => Some(Opcode::FindInformationRequest),
            Opcode::FindByTypeValueResponse => Some(Opcode::FindByTypeValueRequest),
            Opcode::ReadByTypeResponse => Some(Opcode::ReadByTypeRequest),
            Opcode::ReadResponse => Some(Opcode::ReadRequest),
            Opcode::ReadBlobResponse => Some(Opcode::ReadBlobRequest),
            Opcode::ReadByGroupTypeResponse => Some(Opcode::ReadByGroupTypeRequest),
            Opcode::WriteResponse => Some(Opcode::WriteRequest),
            _ => None,
        }
    }

    /// For a request or indication opcode, the reply opcode the peer owes us.
    pub fn response(self) -> Option<Opcode> {
        match self {
            Opcode::ExchangeMtuRequest => Some(Opcode::ExchangeMtuResponse),
            Opcode::FindInformationRequest => Some(Opcode::FindInformationResponse),
            Opcode::FindByTypeValueRequest => Some(Opcode::FindByTypeValueResponse),
            Opcode::ReadByTypeRequest => Some(Opcode::ReadByTypeResponse),
            Opcode::ReadRequest => Some(Opcode::ReadResponse),
            Opcode::ReadBlobRequest => Some(Opcode::ReadBlobResponse),
            Opcode::ReadByGroupTypeRequest => Some(Opcode::ReadByGroupTypeResponse),
            Opcode::WriteRequest => Some(Opcode::WriteResponse),
            Opcode::HandleValueIndication => Some(Opcode::HandleValueConfirmation),
            _ => None,
        }
    }

    /// Whether the command flag bit (0x40) is set.
    pub fn is_command(self) -> bool {
        (self as u8) & ATT_OPCODE_COMMAND_FLAG != 0
    }

    /// Whether the authenticated-signed-write flag bit (0x80) is set.
    pub fn is_signed(self) -> bool {
        (self as u8) & ATT_OPCODE_SIGNED_FLAG != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(Opcode::ReadRequest.kind(), OpcodeKind::Request);
        assert_eq!(Opcode::ErrorResponse.kind(), OpcodeKind::Response);
        assert_eq!(Opcode::WriteCommand.kind(), OpcodeKind::Command);
        assert_eq!(Opcode::HandleValueIndication.kind(), OpcodeKind::Indication);
        assert_eq!(
            Opcode::HandleValueConfirmation.kind(),
            OpcodeKind::Confirmation
        );
    }

    #[test]
    fn request_response_mapping_is_symmetric() {
        for byte in 0u8..=0xFF {
            let Some(opcode) = Opcode::from_u8(byte) else {
                continue;
            };
            if let Some(response) = opcode.response() {
                if opcode.kind() == OpcodeKind::Request {
                    assert_eq!(response.request(), Some(opcode));
                }
            }
        }
    }

    #[test]
    fn command_flag() {
        assert!(Opcode::WriteCommand.is_command());
        assert!(!Opcode::WriteRequest.is_command());
        assert!(!Opcode::WriteCommand.is_signed());
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert_eq!(Opcode::from_u8(0xFF), None);
        assert_eq!(Opcode::from_u8(0x00), None);
    }
}
