// ABOUTME: bind_transmitter / bind_receiver / bind_transceiver requests and their responses
// ABOUTME: One request and one response type cover all three roles, selected by BindType

use crate::codec::{
    CodecError, Decodable, Encodable, PduHeader, decode_cstring, decode_u8, encode_cstring,
    encode_u8,
};
use crate::datatypes::{CommandId, CommandStatus, Tlv, decode_tlvs};
use bytes::{Buf, BytesMut};
use std::fmt;
use std::io::Cursor;

// Field limits excluding the NUL terminator
pub const MAX_SYSTEM_ID_LENGTH: usize = 15;
pub const MAX_PASSWORD_LENGTH: usize = 8;
const MAX_SYSTEM_TYPE_LENGTH: usize = 12;
const MAX_ADDRESS_RANGE_LENGTH: usize = 40;

/// SMPP v3.4
pub const INTERFACE_VERSION_34: u8 = 0x34;

/// The role a session is bound in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindType {
    Transmitter,
    Receiver,
    Transceiver,
}

impl BindType {
    pub fn command_id(&self) -> CommandId {
        match self {
            BindType::Transmitter => CommandId::BindTransmitter,
            BindType::Receiver => CommandId::BindReceiver,
            BindType::Transceiver => CommandId::BindTransceiver,
        }
    }

    pub fn response_command_id(&self) -> CommandId {
        match self {
            BindType::Transmitter => CommandId::BindTransmitterResp,
            BindType::Receiver => CommandId::BindReceiverResp,
            BindType::Transceiver => CommandId::BindTransceiverResp,
        }
    }

    pub fn from_command_id(command_id: CommandId) -> Option<Self> {
        match command_id {
            CommandId::BindTransmitter | CommandId::BindTransmitterResp => {
                Some(BindType::Transmitter)
            }
            CommandId::BindReceiver | CommandId::BindReceiverResp => Some(BindType::Receiver),
            CommandId::BindTransceiver | CommandId::BindTransceiverResp => {
                Some(BindType::Transceiver)
            }
            _ => None,
        }
    }

    /// Whether a session in this role may originate application messages.
    pub fn can_submit(&self) -> bool {
        matches!(self, BindType::Transmitter | BindType::Transceiver)
    }

    /// Whether a session in this role may be sent application messages.
    pub fn can_receive(&self) -> bool {
        matches!(self, BindType::Receiver | BindType::Transceiver)
    }
}

impl fmt::Display for BindType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BindType::Transmitter => "transmitter",
            BindType::Receiver => "receiver",
            BindType::Transceiver => "transceiver",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BindRequest {
    pub sequence_number: u32,
    pub bind_type: BindType,
    /// Identifies the ESME to the SMSC, up to 15 characters.
    pub system_id: String,
    /// Up to 8 characters; empty when the SMSC requires none.
    pub password: String,
    pub system_type: String,
    pub interface_version: u8,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BindValidationError {
    #[error("system_id exceeds maximum length of {MAX_SYSTEM_ID_LENGTH} characters: {actual}")]
    SystemIdTooLong { actual: usize },

    #[error("password exceeds maximum length of {MAX_PASSWORD_LENGTH} characters: {actual}")]
    PasswordTooLong { actual: usize },

    #[error("system_type exceeds maximum length of {MAX_SYSTEM_TYPE_LENGTH} characters: {actual}")]
    SystemTypeTooLong { actual: usize },

    #[error("address_range exceeds maximum length of {MAX_ADDRESS_RANGE_LENGTH} characters: {actual}")]
    AddressRangeTooLong { actual: usize },
}

impl BindRequest {
    pub fn new(
        sequence_number: u32,
        bind_type: BindType,
        system_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            sequence_number,
            bind_type,
            system_id: system_id.into(),
            password: password.into(),
            system_type: String::new(),
            interface_version: INTERFACE_VERSION_34,
            addr_ton: 0,
            addr_npi: 0,
            address_range: String::new(),
        }
    }

    pub fn with_system_type(mut self, system_type: impl Into<String>) -> Self {
        self.system_type = system_type.into();
        self
    }

    /// Field length checks; encoding would silently truncate otherwise.
    pub fn validate(&self) -> Result<(), BindValidationError> {
        if self.system_id.len() > MAX_SYSTEM_ID_LENGTH {
            return Err(BindValidationError::SystemIdTooLong {
                actual: self.system_id.len(),
            });
        }
        if self.password.len() > MAX_PASSWORD_LENGTH {
            return Err(BindValidationError::PasswordTooLong {
                actual: self.password.len(),
            });
        }
        if self.system_type.len() > MAX_SYSTEM_TYPE_LENGTH {
            return Err(BindValidationError::SystemTypeTooLong {
                actual: self.system_type.len(),
            });
        }
        if self.address_range.len() > MAX_ADDRESS_RANGE_LENGTH {
            return Err(BindValidationError::AddressRangeTooLong {
                actual: self.address_range.len(),
            });
        }
        Ok(())
    }
}

impl Decodable for BindRequest {
    fn command_id() -> CommandId {
        CommandId::BindTransmitter
    }

    fn validate_header(header: &PduHeader) -> Result<(), CodecError> {
        if !header.command_id.is_bind() {
            return Err(CodecError::UnexpectedCommandId {
                expected: Self::command_id(),
                actual: header.command_id,
            });
        }
        Ok(())
    }

    fn decode(header: PduHeader, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Self::validate_header(&header)?;
        let bind_type = BindType::from_command_id(header.command_id).ok_or(
            CodecError::UnexpectedCommandId {
                expected: Self::command_id(),
                actual: header.command_id,
            },
        )?;

        Ok(BindRequest {
            sequence_number: header.sequence_number,
            bind_type,
            system_id: decode_cstring(buf, MAX_SYSTEM_ID_LENGTH + 1, "system_id")?,
            password: decode_cstring(buf, MAX_PASSWORD_LENGTH + 1, "password")?,
            system_type: decode_cstring(buf, MAX_SYSTEM_TYPE_LENGTH + 1, "system_type")?,
            interface_version: decode_u8(buf)?,
            addr_ton: decode_u8(buf)?,
            addr_npi: decode_u8(buf)?,
            address_range: decode_cstring(buf, MAX_ADDRESS_RANGE_LENGTH + 1, "address_range")?,
        })
    }
}

impl Encodable for BindRequest {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        self.validate().map_err(|e| CodecError::FieldValidation {
            field: "bind",
            reason: e.to_string(),
        })?;

        let header = PduHeader {
            command_length: 0,
            command_id: self.bind_type.command_id(),
            command_status: CommandStatus::Ok,
            sequence_number: self.sequence_number,
        };
        header.encode(buf)?;

        encode_cstring(buf, &self.system_id, MAX_SYSTEM_ID_LENGTH + 1);
        encode_cstring(buf, &self.password, MAX_PASSWORD_LENGTH + 1);
        encode_cstring(buf, &self.system_type, MAX_SYSTEM_TYPE_LENGTH + 1);
        encode_u8(buf, self.interface_version);
        encode_u8(buf, self.addr_ton);
        encode_u8(buf, self.addr_npi);
        encode_cstring(buf, &self.address_range, MAX_ADDRESS_RANGE_LENGTH + 1);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BindResponse {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    pub bind_type: BindType,
    /// The SMSC's own identifier. Error responses may omit it.
    pub system_id: String,
    pub optional_parameters: Vec<Tlv>,
}

impl BindResponse {
    pub fn new(sequence_number: u32, bind_type: BindType, system_id: impl Into<String>) -> Self {
        Self {
            command_status: CommandStatus::Ok,
            sequence_number,
            bind_type,
            system_id: system_id.into(),
            optional_parameters: Vec::new(),
        }
    }

    pub fn error(sequence_number: u32, bind_type: BindType, status: CommandStatus) -> Self {
        Self {
            command_status: status,
            sequence_number,
            bind_type,
            system_id: String::new(),
            optional_parameters: Vec::new(),
        }
    }
}

impl Decodable for BindResponse {
    fn command_id() -> CommandId {
        CommandId::BindTransmitterResp
    }

    fn validate_header(header: &PduHeader) -> Result<(), CodecError> {
        if BindType::from_command_id(header.command_id).is_none()
            || !header.command_id.is_response()
        {
            return Err(CodecError::UnexpectedCommandId {
                expected: Self::command_id(),
                actual: header.command_id,
            });
        }
        Ok(())
    }

    fn decode(header: PduHeader, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Self::validate_header(&header)?;
        let bind_type = BindType::from_command_id(header.command_id).ok_or(
            CodecError::UnexpectedCommandId {
                expected: Self::command_id(),
                actual: header.command_id,
            },
        )?;

        let system_id = if buf.has_remaining() {
            decode_cstring(buf, MAX_SYSTEM_ID_LENGTH + 1, "system_id")?
        } else {
            String::new()
        };

        Ok(BindResponse {
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            bind_type,
            system_id,
            optional_parameters: decode_tlvs(buf)?,
        })
    }
}

impl Encodable for BindResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        let header = PduHeader {
            command_length: 0,
            command_id: self.bind_type.response_command_id(),
            command_status: self.command_status,
            sequence_number: self.sequence_number,
        };
        header.encode(buf)?;

        if self.command_status.is_ok() || !self.system_id.is_empty() {
            encode_cstring(buf, &self.system_id, MAX_SYSTEM_ID_LENGTH + 1);
        }
        for tlv in &self.optional_parameters {
            tlv.encode(buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_response(resp: &BindResponse) -> BindResponse {
        let bytes = resp.to_bytes().unwrap();
        let mut cursor = Cursor::new(bytes.as_ref());
        let header = PduHeader::decode(&mut cursor).unwrap();
        BindResponse::decode(header, &mut cursor).unwrap()
    }

    #[test]
    fn transceiver_bind_wire_layout() {
        let bytes = BindRequest::new(1, BindType::Transceiver, "ab", "pw")
            .to_bytes()
            .unwrap();
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x09]);
        // header + "ab\0" + "pw\0" + "\0" + version/ton/npi + "\0"
        assert_eq!(bytes.len(), 16 + 3 + 3 + 1 + 3 + 1);
        assert_eq!(bytes[16 + 7], INTERFACE_VERSION_34);
    }

    #[test]
    fn overlong_password_rejected() {
        let bind = BindRequest::new(1, BindType::Transmitter, "sys", "far-too-long");
        assert!(matches!(
            bind.validate(),
            Err(BindValidationError::PasswordTooLong { actual: 12 })
        ));
        assert!(bind.to_bytes().is_err());
    }

    #[test]
    fn error_response_without_body() {
        let resp = BindResponse::error(3, BindType::Receiver, CommandStatus::InvalidPassword);
        let bytes = resp.to_bytes().unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(roundtrip_response(&resp), resp);
    }

    #[test]
    fn ok_response_roundtrip() {
        let resp = BindResponse::new(8, BindType::Transceiver, "SMSC");
        assert_eq!(roundtrip_response(&resp), resp);
    }

    #[test]
    fn role_capabilities() {
        assert!(BindType::Transmitter.can_submit());
        assert!(!BindType::Transmitter.can_receive());
        assert!(BindType::Receiver.can_receive());
        assert!(!BindType::Receiver.can_submit());
        assert!(BindType::Transceiver.can_submit() && BindType::Transceiver.can_receive());
    }
}
