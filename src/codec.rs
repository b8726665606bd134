// SMPP v3.4 Codec - Separates parsing/encoding logic from domain models
//
// Each PDU implements Encodable/Decodable; the registry maps command ids to
// decoders so the frame parser stays a thin dispatch layer.

use crate::datatypes::{CommandId, CommandStatus};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::OnceLock;
use thiserror::Error;

/// Maximum allowed PDU size to prevent memory exhaustion attacks
pub const MAX_PDU_SIZE: u32 = 65536; // 64KB

/// SMPP v3.4 PDU Header (16 bytes, common to all PDUs)
#[derive(Debug, Clone, PartialEq)]
pub struct PduHeader {
    pub command_length: u32,
    pub command_id: CommandId,
    pub command_status: CommandStatus,
    pub sequence_number: u32,
}

impl PduHeader {
    pub const SIZE: usize = 16;

    /// Decode PDU header from buffer with validation
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        if buf.remaining() < Self::SIZE {
            return Err(CodecError::Incomplete);
        }

        let command_length = buf.get_u32();
        let command_id_raw = buf.get_u32();
        let command_id = CommandId::try_from(command_id_raw)
            .map_err(|_| CodecError::InvalidCommandId(command_id_raw))?;
        let command_status_raw = buf.get_u32();
        let sequence_number = buf.get_u32();

        if !(Self::SIZE as u32..=MAX_PDU_SIZE).contains(&command_length) {
            return Err(CodecError::InvalidPduLength {
                length: command_length,
                min: Self::SIZE as u32,
                max: MAX_PDU_SIZE,
            });
        }

        // Requests must have command_status = 0; responses may carry vendor
        // codes we have no name for.
        let command_status = if command_id.is_response() {
            CommandStatus::from_wire(command_status_raw)
        } else if command_status_raw != 0 {
            return Err(CodecError::InvalidRequestStatus {
                command_id,
                command_status: CommandStatus::from_wire(command_status_raw),
            });
        } else {
            CommandStatus::Ok
        };

        // generic_nack may legitimately echo sequence 0 when the offending
        // PDU could not be read at all.
        if command_id != CommandId::GenericNack
            && (sequence_number == 0 || sequence_number == 0xFFFF_FFFF)
        {
            return Err(CodecError::ReservedSequenceNumber(sequence_number));
        }

        Ok(PduHeader {
            command_length,
            command_id,
            command_status,
            sequence_number,
        })
    }

    /// Encode PDU header to buffer
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u32(self.command_length);
        buf.put_u32(self.command_id as u32);
        buf.put_u32(self.command_status as u32);
        buf.put_u32(self.sequence_number);
        Ok(())
    }

    /// Number of body bytes that follow this header.
    pub fn body_len(&self) -> usize {
        self.command_length as usize - Self::SIZE
    }
}

/// Trait for types that can be encoded to bytes
pub trait Encodable {
    /// Encode this PDU to the buffer
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError>;

    /// Calculate the encoded size without actually encoding
    fn encoded_size(&self) -> usize {
        let mut buf = BytesMut::new();
        self.encode(&mut buf).map(|_| buf.len()).unwrap_or(0)
    }

    /// Encode into a fresh buffer and patch command_length with the real size.
    fn to_bytes(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::with_capacity(64);
        self.encode(&mut buf)?;

        if buf.len() > MAX_PDU_SIZE as usize {
            return Err(CodecError::InvalidPduLength {
                length: buf.len() as u32,
                min: PduHeader::SIZE as u32,
                max: MAX_PDU_SIZE,
            });
        }
        if buf.len() >= 4 {
            let length = buf.len() as u32;
            buf[0..4].copy_from_slice(&length.to_be_bytes());
        }

        Ok(buf.freeze())
    }
}

/// Trait for types that can be decoded from bytes
pub trait Decodable: Sized {
    /// Decode this PDU from the buffer after header
    fn decode(header: PduHeader, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError>;

    /// Return the expected command_id for this PDU type
    fn command_id() -> CommandId;

    /// Validate the header is appropriate for this PDU type
    fn validate_header(header: &PduHeader) -> Result<(), CodecError> {
        if header.command_id != Self::command_id() {
            return Err(CodecError::UnexpectedCommandId {
                expected: Self::command_id(),
                actual: header.command_id,
            });
        }
        Ok(())
    }
}

/// Codec errors with detailed context for debugging
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Incomplete PDU: need more data")]
    Incomplete,

    #[error("Invalid command_id: {0:#x}")]
    InvalidCommandId(u32),

    #[error("Invalid PDU length: {length}, must be {min}-{max}")]
    InvalidPduLength { length: u32, min: u32, max: u32 },

    #[error("Request PDU {command_id:?} has non-zero status: {command_status:?}")]
    InvalidRequestStatus {
        command_id: CommandId,
        command_status: CommandStatus,
    },

    #[error("Reserved sequence number: {0} (0 and 0xFFFFFFFF are reserved)")]
    ReservedSequenceNumber(u32),

    #[error("Unexpected command_id: expected {expected:?}, got {actual:?}")]
    UnexpectedCommandId {
        expected: CommandId,
        actual: CommandId,
    },

    #[error("Field '{field}' validation failed: {reason}")]
    FieldValidation { field: &'static str, reason: String },

    #[error("TLV parsing error: {0}")]
    TlvError(String),

    #[error("UTF-8 decoding error in field '{field}': {source}")]
    Utf8Error {
        field: &'static str,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("PDU {0:?} cannot be encoded")]
    NotEncodable(CommandId),
}

/// Convert codec errors to appropriate SMPP command_status codes
impl CodecError {
    pub fn to_command_status(&self) -> CommandStatus {
        match self {
            CodecError::InvalidPduLength { .. } => CommandStatus::InvalidCommandLength,
            CodecError::InvalidCommandId(_) => CommandStatus::InvalidCommandId,
            CodecError::FieldValidation { field, .. } => match *field {
                "source_addr" => CommandStatus::InvalidSourceAddress,
                "destination_addr" => CommandStatus::InvalidDestinationAddress,
                "short_message" => CommandStatus::InvalidMsgLength,
                "system_id" => CommandStatus::InvalidSystemId,
                "password" => CommandStatus::InvalidPassword,
                _ => CommandStatus::SystemError,
            },
            CodecError::TlvError(_) => CommandStatus::InvalidParameterLength,
            _ => CommandStatus::SystemError,
        }
    }
}

/// Decode a NUL-terminated C-octet string of at most `max_len` bytes
/// including the terminator.
pub fn decode_cstring(
    buf: &mut Cursor<&[u8]>,
    max_len: usize,
    field_name: &'static str,
) -> Result<String, CodecError> {
    let available = &buf.chunk()[..buf.remaining().min(max_len)];
    let end = match available.iter().position(|&b| b == 0) {
        Some(end) => end,
        None if buf.remaining() < max_len => return Err(CodecError::Incomplete),
        None => {
            return Err(CodecError::FieldValidation {
                field: field_name,
                reason: format!("missing NUL terminator within {max_len} octets"),
            });
        }
    };

    let value = available[..end].to_vec();
    buf.advance(end + 1);

    String::from_utf8(value).map_err(|e| CodecError::Utf8Error {
        field: field_name,
        source: e,
    })
}

/// Decode a single byte
pub fn decode_u8(buf: &mut Cursor<&[u8]>) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u8())
}

/// Decode a 16-bit big-endian integer
pub fn decode_u16(buf: &mut Cursor<&[u8]>) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u16())
}

/// Decode a 32-bit big-endian integer
pub fn decode_u32(buf: &mut Cursor<&[u8]>) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.get_u32())
}

/// Read exactly `len` raw octets.
pub fn decode_bytes(buf: &mut Cursor<&[u8]>, len: usize) -> Result<Bytes, CodecError> {
    if buf.remaining() < len {
        return Err(CodecError::Incomplete);
    }
    Ok(buf.copy_to_bytes(len))
}

/// Peek at next 4 bytes without advancing cursor (for command_length)
pub fn peek_u32(buf: &mut Cursor<&[u8]>) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Incomplete);
    }

    let pos = buf.position();
    let value = buf.get_u32();
    buf.set_position(pos);
    Ok(value)
}

/// Encode a C-octet string, truncating to `max_len - 1` content bytes.
pub fn encode_cstring(buf: &mut BytesMut, value: &str, max_len: usize) {
    let bytes = value.as_bytes();
    let actual_len = bytes.len().min(max_len.saturating_sub(1));
    buf.put_slice(&bytes[..actual_len]);
    buf.put_u8(0);
}

/// Encode a single byte
pub fn encode_u8(buf: &mut BytesMut, value: u8) {
    buf.put_u8(value);
}

/// Encode a 16-bit big-endian integer
pub fn encode_u16(buf: &mut BytesMut, value: u16) {
    buf.put_u16(value);
}

/// Encode a 32-bit big-endian integer
pub fn encode_u32(buf: &mut BytesMut, value: u32) {
    buf.put_u32(value);
}

/// Generic frame type that can hold any PDU the simulator speaks
#[derive(Debug, Clone)]
pub enum Frame {
    // Keep-alive PDUs
    EnquireLink(crate::datatypes::EnquireLink),
    EnquireLinkResp(crate::datatypes::EnquireLinkResponse),

    // Session management PDUs
    Bind(crate::datatypes::BindRequest),
    BindResp(crate::datatypes::BindResponse),
    Unbind(crate::datatypes::Unbind),
    UnbindResp(crate::datatypes::UnbindResponse),

    // Message PDUs
    SubmitSm(Box<crate::datatypes::SubmitSm>),
    SubmitSmResp(crate::datatypes::SubmitSmResponse),
    DeliverSm(Box<crate::datatypes::DeliverSm>),
    DeliverSmResp(crate::datatypes::DeliverSmResponse),

    GenericNack(crate::datatypes::GenericNack),

    /// Standard PDUs the simulator does not model; kept opaque
    Unknown { header: PduHeader, body: Bytes },

    /// A complete PDU whose contents could not be decoded. The session
    /// answers it with a generic_nack carrying `status`.
    Malformed {
        sequence_number: u32,
        status: CommandStatus,
    },
}

/// Registry of PDU decoders for extensible parsing
type DecoderFn =
    Box<dyn Fn(PduHeader, &mut Cursor<&[u8]>) -> Result<Frame, CodecError> + Send + Sync>;

pub struct PduRegistry {
    decoders: HashMap<CommandId, DecoderFn>,
}

impl PduRegistry {
    /// Create a new registry with the simulator's PDUs registered
    pub fn new() -> Self {
        use crate::datatypes::*;

        let mut registry = Self {
            decoders: HashMap::new(),
        };

        registry.register_pdu::<EnquireLink, _>(Frame::EnquireLink);
        registry.register_pdu::<EnquireLinkResponse, _>(Frame::EnquireLinkResp);
        registry.register_pdu::<Unbind, _>(Frame::Unbind);
        registry.register_pdu::<UnbindResponse, _>(Frame::UnbindResp);
        registry.register_pdu::<GenericNack, _>(Frame::GenericNack);

        // One bind type covers all three roles
        for command_id in [
            CommandId::BindTransmitter,
            CommandId::BindReceiver,
            CommandId::BindTransceiver,
        ] {
            registry.register_pdu_as::<BindRequest, _>(command_id, Frame::Bind);
        }
        for command_id in [
            CommandId::BindTransmitterResp,
            CommandId::BindReceiverResp,
            CommandId::BindTransceiverResp,
        ] {
            registry.register_pdu_as::<BindResponse, _>(command_id, Frame::BindResp);
        }

        // Message PDUs (boxed for large structs)
        registry.register_pdu::<SubmitSm, _>(|pdu| Frame::SubmitSm(Box::new(pdu)));
        registry.register_pdu::<SubmitSmResponse, _>(Frame::SubmitSmResp);
        registry.register_pdu::<DeliverSm, _>(|pdu| Frame::DeliverSm(Box::new(pdu)));
        registry.register_pdu::<DeliverSmResponse, _>(Frame::DeliverSmResp);

        registry
    }

    /// Shared registry used by the framing layer.
    pub fn global() -> &'static PduRegistry {
        static REGISTRY: OnceLock<PduRegistry> = OnceLock::new();
        REGISTRY.get_or_init(PduRegistry::new)
    }

    fn register_pdu<T, F>(&mut self, frame_constructor: F)
    where
        T: Decodable + 'static,
        F: Fn(T) -> Frame + Send + Sync + 'static,
    {
        self.register_pdu_as::<T, F>(T::command_id(), frame_constructor);
    }

    /// Register a decoder under an explicit command id, for PDU types that
    /// serve several ids.
    fn register_pdu_as<T, F>(&mut self, command_id: CommandId, frame_constructor: F)
    where
        T: Decodable + 'static,
        F: Fn(T) -> Frame + Send + Sync + 'static,
    {
        let decoder = Box::new(move |header: PduHeader, buf: &mut Cursor<&[u8]>| {
            let pdu = T::decode(header, buf)?;
            Ok(frame_constructor(pdu))
        });
        self.decoders.insert(command_id, decoder);
    }

    /// Decode a PDU given its header and body
    pub fn decode_pdu(
        &self,
        header: PduHeader,
        buf: &mut Cursor<&[u8]>,
    ) -> Result<Frame, CodecError> {
        match self.decoders.get(&header.command_id) {
            Some(decoder) => decoder(header, buf),
            None => {
                let body = decode_bytes(buf, header.body_len())?;
                tracing::debug!(
                    "Unmodelled PDU command_id: {:#x}, treating as opaque data",
                    header.command_id as u32
                );

                Ok(Frame::Unknown { header, body })
            }
        }
    }

    /// Check if a command_id is registered
    pub fn is_registered(&self, command_id: CommandId) -> bool {
        self.decoders.contains_key(&command_id)
    }

    /// Get all registered command_ids
    pub fn registered_commands(&self) -> Vec<CommandId> {
        self.decoders.keys().copied().collect()
    }
}

impl Default for PduRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    /// Get the command_id for this frame
    pub fn command_id(&self) -> CommandId {
        match self {
            Frame::EnquireLink(_) => CommandId::EnquireLink,
            Frame::EnquireLinkResp(_) => CommandId::EnquireLinkResp,
            Frame::Bind(pdu) => pdu.bind_type.command_id(),
            Frame::BindResp(pdu) => pdu.bind_type.response_command_id(),
            Frame::Unbind(_) => CommandId::Unbind,
            Frame::UnbindResp(_) => CommandId::UnbindResp,
            Frame::SubmitSm(_) => CommandId::SubmitSm,
            Frame::SubmitSmResp(_) => CommandId::SubmitSmResp,
            Frame::DeliverSm(_) => CommandId::DeliverSm,
            Frame::DeliverSmResp(_) => CommandId::DeliverSmResp,
            Frame::GenericNack(_) => CommandId::GenericNack,
            Frame::Unknown { header, .. } => header.command_id,
            Frame::Malformed { .. } => CommandId::GenericNack,
        }
    }

    /// Get the sequence number for this frame
    pub fn sequence_number(&self) -> u32 {
        match self {
            Frame::EnquireLink(pdu) => pdu.sequence_number,
            Frame::EnquireLinkResp(pdu) => pdu.sequence_number,
            Frame::Bind(pdu) => pdu.sequence_number,
            Frame::BindResp(pdu) => pdu.sequence_number,
            Frame::Unbind(pdu) => pdu.sequence_number,
            Frame::UnbindResp(pdu) => pdu.sequence_number,
            Frame::SubmitSm(pdu) => pdu.sequence_number,
            Frame::SubmitSmResp(pdu) => pdu.sequence_number,
            Frame::DeliverSm(pdu) => pdu.sequence_number,
            Frame::DeliverSmResp(pdu) => pdu.sequence_number,
            Frame::GenericNack(pdu) => pdu.sequence_number,
            Frame::Unknown { header, .. } => header.sequence_number,
            Frame::Malformed {
                sequence_number, ..
            } => *sequence_number,
        }
    }

    /// Set the sequence number, used when the session allocates one at send time.
    pub fn set_sequence_number(&mut self, sequence_number: u32) {
        match self {
            Frame::EnquireLink(pdu) => pdu.sequence_number = sequence_number,
            Frame::EnquireLinkResp(pdu) => pdu.sequence_number = sequence_number,
            Frame::Bind(pdu) => pdu.sequence_number = sequence_number,
            Frame::BindResp(pdu) => pdu.sequence_number = sequence_number,
            Frame::Unbind(pdu) => pdu.sequence_number = sequence_number,
            Frame::UnbindResp(pdu) => pdu.sequence_number = sequence_number,
            Frame::SubmitSm(pdu) => pdu.sequence_number = sequence_number,
            Frame::SubmitSmResp(pdu) => pdu.sequence_number = sequence_number,
            Frame::DeliverSm(pdu) => pdu.sequence_number = sequence_number,
            Frame::DeliverSmResp(pdu) => pdu.sequence_number = sequence_number,
            Frame::GenericNack(pdu) => pdu.sequence_number = sequence_number,
            Frame::Unknown { header, .. } => header.sequence_number = sequence_number,
            Frame::Malformed {
                sequence_number: seq,
                ..
            } => *seq = sequence_number,
        }
    }

    /// The command_status carried by response frames; requests report `Ok`.
    pub fn command_status(&self) -> CommandStatus {
        match self {
            Frame::EnquireLinkResp(pdu) => pdu.command_status,
            Frame::BindResp(pdu) => pdu.command_status,
            Frame::UnbindResp(pdu) => pdu.command_status,
            Frame::SubmitSmResp(pdu) => pdu.command_status,
            Frame::DeliverSmResp(pdu) => pdu.command_status,
            Frame::GenericNack(pdu) => pdu.command_status,
            Frame::Unknown { header, .. } => header.command_status,
            Frame::Malformed { status, .. } => *status,
            _ => CommandStatus::Ok,
        }
    }

    /// Check if this frame is a response PDU
    pub fn is_response(&self) -> bool {
        self.command_id().is_response()
    }

    /// Encode this frame to wire bytes.
    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        match self {
            Frame::EnquireLink(pdu) => pdu.to_bytes(),
            Frame::EnquireLinkResp(pdu) => pdu.to_bytes(),
            Frame::Bind(pdu) => pdu.to_bytes(),
            Frame::BindResp(pdu) => pdu.to_bytes(),
            Frame::Unbind(pdu) => pdu.to_bytes(),
            Frame::UnbindResp(pdu) => pdu.to_bytes(),
            Frame::SubmitSm(pdu) => pdu.to_bytes(),
            Frame::SubmitSmResp(pdu) => pdu.to_bytes(),
            Frame::DeliverSm(pdu) => pdu.to_bytes(),
            Frame::DeliverSmResp(pdu) => pdu.to_bytes(),
            Frame::GenericNack(pdu) => pdu.to_bytes(),
            Frame::Unknown { header, body } => {
                let mut buf = BytesMut::with_capacity(PduHeader::SIZE + body.len());
                let header = PduHeader {
                    command_length: (PduHeader::SIZE + body.len()) as u32,
                    ..header.clone()
                };
                header.encode(&mut buf)?;
                buf.put_slice(body);
                Ok(buf.freeze())
            }
            Frame::Malformed { .. } => Err(CodecError::NotEncodable(CommandId::GenericNack)),
        }
    }

    /// Check whether `buf` holds one complete PDU, without decoding it.
    pub fn check(buf: &mut Cursor<&[u8]>) -> Result<(), crate::frame::Error> {
        if buf.remaining() < PduHeader::SIZE {
            return Err(crate::frame::Error::Incomplete);
        }

        let command_length = peek_u32(buf)?;

        if !(PduHeader::SIZE as u32..=MAX_PDU_SIZE).contains(&command_length) {
            return Err(crate::frame::Error::Other(Box::new(
                CodecError::InvalidPduLength {
                    length: command_length,
                    min: PduHeader::SIZE as u32,
                    max: MAX_PDU_SIZE,
                },
            )));
        }

        if buf.remaining() < command_length as usize {
            return Err(crate::frame::Error::Incomplete);
        }

        Ok(())
    }

    /// Parse one complete PDU; `check` must have succeeded on the same buffer.
    ///
    /// The body is decoded from a slice bounded by command_length so a PDU
    /// can never read into the next one.
    pub fn parse(buf: &mut Cursor<&[u8]>) -> Result<Frame, crate::frame::Error> {
        let start = buf.position() as usize;
        let command_length = peek_u32(buf)? as usize;
        let pdu = &buf.get_ref()[start..start + command_length];

        let mut cursor = Cursor::new(pdu);
        let header = PduHeader::decode(&mut cursor)?;
        let frame = PduRegistry::global().decode_pdu(header, &mut cursor)?;

        if cursor.has_remaining() {
            return Err(CodecError::FieldValidation {
                field: "command_length",
                reason: format!("{} trailing octets after PDU body", cursor.remaining()),
            }
            .into());
        }

        buf.set_position((start + command_length) as u64);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{
        BindRequest, BindType, EnquireLink, EnquireLinkResponse, GenericNack, Unbind,
    };

    fn decode_frame(bytes: &[u8]) -> Frame {
        let mut cursor = Cursor::new(bytes);
        Frame::check(&mut cursor).unwrap();
        cursor.set_position(0);
        Frame::parse(&mut cursor).unwrap()
    }

    #[test]
    fn pdu_header_encode_decode() {
        let header = PduHeader {
            command_length: 16,
            command_id: CommandId::EnquireLink,
            command_status: CommandStatus::Ok,
            sequence_number: 42,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf.as_ref());
        let decoded = PduHeader::decode(&mut cursor).unwrap();

        assert_eq!(header, decoded);
    }

    #[test]
    fn decode_cstring_stops_at_nul() {
        let data = b"hello\0rest";
        let mut cursor = Cursor::new(&data[..]);
        let result = decode_cstring(&mut cursor, 16, "test").unwrap();
        assert_eq!(result, "hello");
        assert_eq!(cursor.position(), 6);
    }

    #[test]
    fn decode_cstring_rejects_overlong() {
        let data = b"0123456789abcdefXYZ\0";
        let mut cursor = Cursor::new(&data[..]);
        let result = decode_cstring(&mut cursor, 16, "system_id");
        assert!(matches!(result, Err(CodecError::FieldValidation { .. })));
    }

    #[test]
    fn encode_cstring_is_variable_length() {
        let mut buf = BytesMut::new();
        encode_cstring(&mut buf, "hello", 10);
        assert_eq!(buf.as_ref(), b"hello\0");

        let mut buf = BytesMut::new();
        encode_cstring(&mut buf, "toolongvalue", 6);
        assert_eq!(buf.as_ref(), b"toolo\0");
    }

    #[test]
    fn registry_decode_enquire_link() {
        let registry = PduRegistry::new();
        let encoded_bytes = EnquireLink::new(42).to_bytes().unwrap();

        let mut cursor = Cursor::new(encoded_bytes.as_ref());
        let header = PduHeader::decode(&mut cursor).unwrap();
        let frame = registry.decode_pdu(header, &mut cursor).unwrap();

        match frame {
            Frame::EnquireLink(decoded) => {
                assert_eq!(decoded.sequence_number, 42);
                assert_eq!(decoded.command_status, CommandStatus::Ok);
            }
            _ => panic!("Expected EnquireLink frame"),
        }
    }

    #[test]
    fn registry_decode_unmodelled_pdu() {
        // query_sm is a standard PDU the simulator does not model
        let mut pdu_data = Vec::new();
        pdu_data.extend_from_slice(&20u32.to_be_bytes());
        pdu_data.extend_from_slice(&0x0000_0003u32.to_be_bytes());
        pdu_data.extend_from_slice(&0u32.to_be_bytes());
        pdu_data.extend_from_slice(&7u32.to_be_bytes());
        pdu_data.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);

        match decode_frame(&pdu_data) {
            Frame::Unknown { header, body } => {
                assert_eq!(header.command_id, CommandId::QuerySm);
                assert_eq!(header.sequence_number, 7);
                assert_eq!(body.as_ref(), &[0x01, 0x02, 0x03, 0x04]);
            }
            other => panic!("Expected Unknown frame, got {other:?}"),
        }
    }

    #[test]
    fn pdu_header_validation() {
        let data: &[u8] = &[
            0x00, 0x00, 0x00, 0x08, // command_length too small
            0x00, 0x00, 0x00, 0x15, // command_id
            0x00, 0x00, 0x00, 0x00, // command_status
            0x00, 0x00, 0x00, 0x01, // sequence_number
        ];
        let mut cursor = Cursor::new(data);
        let result = PduHeader::decode(&mut cursor);
        assert!(matches!(result, Err(CodecError::InvalidPduLength { .. })));

        let data: &[u8] = &[
            0x00, 0x00, 0x00, 0x10, // command_length
            0x00, 0x00, 0x00, 0x15, // command_id
            0x00, 0x00, 0x00, 0x00, // command_status
            0x00, 0x00, 0x00, 0x00, // sequence_number (reserved)
        ];
        let mut cursor = Cursor::new(data);
        let result = PduHeader::decode(&mut cursor);
        assert!(matches!(result, Err(CodecError::ReservedSequenceNumber(0))));

        let data: &[u8] = &[
            0x00, 0x00, 0x00, 0x10, // command_length
            0x00, 0x00, 0x00, 0x15, // enquire_link request
            0x00, 0x00, 0x00, 0x08, // non-zero status on a request
            0x00, 0x00, 0x00, 0x01, // sequence_number
        ];
        let mut cursor = Cursor::new(data);
        let result = PduHeader::decode(&mut cursor);
        assert!(matches!(
            result,
            Err(CodecError::InvalidRequestStatus { .. })
        ));
    }

    #[test]
    fn unnamed_response_status_is_tolerated() {
        let data: &[u8] = &[
            0x00, 0x00, 0x00, 0x10, // command_length
            0x80, 0x00, 0x00, 0x15, // enquire_link_resp
            0x00, 0x00, 0x04, 0x01, // vendor status
            0x00, 0x00, 0x00, 0x09, // sequence_number
        ];
        let mut cursor = Cursor::new(data);
        let header = PduHeader::decode(&mut cursor).unwrap();
        assert_eq!(header.command_status, CommandStatus::UnknownError);
    }

    #[test]
    fn frame_accessors() {
        let frame = Frame::EnquireLink(EnquireLink::new(42));
        assert_eq!(frame.command_id(), CommandId::EnquireLink);
        assert_eq!(frame.sequence_number(), 42);
        assert!(!frame.is_response());

        let mut frame = Frame::EnquireLinkResp(EnquireLinkResponse::new(43));
        assert_eq!(frame.command_id(), CommandId::EnquireLinkResp);
        assert!(frame.is_response());
        frame.set_sequence_number(99);
        assert_eq!(frame.sequence_number(), 99);
    }

    #[test]
    fn parse_leaves_following_pdu_in_buffer() {
        let mut data = Unbind::new(1).to_bytes().unwrap().to_vec();
        data.extend_from_slice(&GenericNack::system_error(2).to_bytes().unwrap());

        let mut cursor = Cursor::new(data.as_slice());
        Frame::check(&mut cursor).unwrap();
        let first = Frame::parse(&mut cursor).unwrap();
        assert!(matches!(first, Frame::Unbind(_)));
        assert_eq!(cursor.position(), 16);

        let second = Frame::parse(&mut cursor).unwrap();
        assert!(matches!(second, Frame::GenericNack(_)));
    }

    #[test]
    fn bind_variants_share_one_decoder() {
        for bind_type in [
            BindType::Transmitter,
            BindType::Receiver,
            BindType::Transceiver,
        ] {
            let bind = BindRequest::new(5, bind_type, "sim", "secret");
            let bytes = bind.to_bytes().unwrap();
            match decode_frame(&bytes) {
                Frame::Bind(decoded) => assert_eq!(decoded, bind),
                other => panic!("Expected Bind frame, got {other:?}"),
            }
        }
    }

    #[test]
    fn check_rejects_oversized_length() {
        let mut data = vec![0u8; 16];
        data[0..4].copy_from_slice(&(MAX_PDU_SIZE + 1).to_be_bytes());
        let mut cursor = Cursor::new(data.as_slice());
        assert!(matches!(
            Frame::check(&mut cursor),
            Err(crate::frame::Error::Other(_))
        ));
    }

    #[test]
    fn encoding_refuses_pdus_the_peer_would_reject() {
        use crate::datatypes::{SubmitSm, Tlv, tags};

        let mut pdu = SubmitSm::new("1000", "2000");
        pdu.optional_parameters
            .push(Tlv::new(tags::MESSAGE_PAYLOAD, vec![b'p'; 65_530]));
        assert!(matches!(
            pdu.to_bytes(),
            Err(CodecError::InvalidPduLength { max: MAX_PDU_SIZE, .. })
        ));

        pdu.optional_parameters[0] = Tlv::new(tags::MESSAGE_PAYLOAD, vec![b'p'; 65_000]);
        let bytes = pdu.to_bytes().unwrap();
        let mut cursor = Cursor::new(&bytes[..]);
        assert!(Frame::check(&mut cursor).is_ok());
    }

    #[test]
    fn registry_has_simulator_pdus() {
        let registry = PduRegistry::new();
        for command_id in [
            CommandId::EnquireLink,
            CommandId::EnquireLinkResp,
            CommandId::Unbind,
            CommandId::UnbindResp,
            CommandId::GenericNack,
            CommandId::BindTransmitter,
            CommandId::BindReceiverResp,
            CommandId::SubmitSm,
            CommandId::DeliverSmResp,
        ] {
            assert!(registry.is_registered(command_id), "{command_id:?}");
        }
        assert!(!registry.is_registered(CommandId::QuerySm));
    }

    #[test]
    fn codec_error_status_mapping() {
        let err = CodecError::FieldValidation {
            field: "short_message",
            reason: "too long".into(),
        };
        assert_eq!(err.to_command_status(), CommandStatus::InvalidMsgLength);
        assert_eq!(
            CodecError::InvalidCommandId(0x0A).to_command_status(),
            CommandStatus::InvalidCommandId
        );
    }
}
