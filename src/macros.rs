// ABOUTME: This module provides macros to reduce boilerplate in SMPP PDU implementations
// ABOUTME: Includes macros for header-only PDUs, short-message PDUs, message-id responses and setters

/// Macro for implementing codec traits on header-only PDUs (no body)
///
/// # Arguments
/// * `$pdu_type` - The PDU struct name (e.g., EnquireLink)
/// * `$command_id` - The CommandId variant (e.g., CommandId::EnquireLink)
macro_rules! impl_header_only_pdu {
    ($pdu_type:ident, $command_id:expr) => {
        impl $crate::codec::Decodable for $pdu_type {
            fn command_id() -> $crate::datatypes::CommandId {
                $command_id
            }

            fn decode(
                header: $crate::codec::PduHeader,
                buf: &mut std::io::Cursor<&[u8]>,
            ) -> Result<Self, $crate::codec::CodecError> {
                use bytes::Buf;

                Self::validate_header(&header)?;

                if buf.has_remaining() {
                    return Err($crate::codec::CodecError::FieldValidation {
                        field: concat!(stringify!($pdu_type), "_body"),
                        reason: concat!(stringify!($pdu_type), " PDU should have no body")
                            .to_string(),
                    });
                }

                Ok($pdu_type {
                    command_status: header.command_status,
                    sequence_number: header.sequence_number,
                })
            }
        }

        impl $crate::codec::Encodable for $pdu_type {
            fn encode(&self, buf: &mut bytes::BytesMut) -> Result<(), $crate::codec::CodecError> {
                let header = $crate::codec::PduHeader {
                    command_length: $crate::codec::PduHeader::SIZE as u32,
                    command_id: $command_id,
                    command_status: self.command_status,
                    sequence_number: self.sequence_number,
                };
                header.encode(buf)
            }

            fn encoded_size(&self) -> usize {
                $crate::codec::PduHeader::SIZE
            }
        }
    };
}

/// Generates `new(sequence_number)` and `error(sequence_number, status)`
/// for header-only PDUs.
macro_rules! impl_header_only_constructors {
    ($pdu_type:ident) => {
        impl $pdu_type {
            /// Create a new PDU with Ok status
            pub fn new(sequence_number: u32) -> Self {
                Self {
                    command_status: $crate::datatypes::CommandStatus::Ok,
                    sequence_number,
                }
            }

            /// Create a PDU with error status
            pub fn error(sequence_number: u32, status: $crate::datatypes::CommandStatus) -> Self {
                Self {
                    command_status: status,
                    sequence_number,
                }
            }
        }
    };
}

/// Codec implementation plus constructors for header-only PDUs
macro_rules! impl_complete_header_only_pdu {
    ($pdu_type:ident, $command_id:expr) => {
        $crate::macros::impl_header_only_pdu!($pdu_type, $command_id);
        $crate::macros::impl_header_only_constructors!($pdu_type);
    };
}

/// Codec implementation for submit_sm / deliver_sm, which share an
/// identical body layout.
///
/// The struct must declare the standard mandatory fields, `short_message:
/// Bytes` and `optional_parameters: Vec<Tlv>`. Encoding rejects a
/// short_message over 254 octets and a body that uses both short_message
/// and message_payload.
macro_rules! impl_short_message_pdu {
    ($pdu_type:ident, $command_id:expr) => {
        impl $crate::codec::Decodable for $pdu_type {
            fn command_id() -> $crate::datatypes::CommandId {
                $command_id
            }

            fn decode(
                header: $crate::codec::PduHeader,
                buf: &mut std::io::Cursor<&[u8]>,
            ) -> Result<Self, $crate::codec::CodecError> {
                use $crate::codec::{decode_bytes, decode_cstring, decode_u8};

                Self::validate_header(&header)?;

                let service_type = decode_cstring(buf, 6, "service_type")?;
                let source_addr_ton = decode_u8(buf)?;
                let source_addr_npi = decode_u8(buf)?;
                let source_addr = decode_cstring(buf, 21, "source_addr")?;
                let dest_addr_ton = decode_u8(buf)?;
                let dest_addr_npi = decode_u8(buf)?;
                let destination_addr = decode_cstring(buf, 21, "destination_addr")?;
                let esm_class = $crate::datatypes::EsmClass::new(decode_u8(buf)?);
                let protocol_id = decode_u8(buf)?;
                let priority_flag = decode_u8(buf)?;
                let schedule_delivery_time = decode_cstring(buf, 17, "schedule_delivery_time")?;
                let validity_period = decode_cstring(buf, 17, "validity_period")?;
                let registered_delivery = decode_u8(buf)?;
                let replace_if_present_flag = decode_u8(buf)?;
                let data_coding = decode_u8(buf)?;
                let sm_default_msg_id = decode_u8(buf)?;
                let sm_length = decode_u8(buf)? as usize;
                let short_message = decode_bytes(buf, sm_length).map_err(|_| {
                    $crate::codec::CodecError::FieldValidation {
                        field: "short_message",
                        reason: format!("sm_length {sm_length} exceeds the PDU body"),
                    }
                })?;
                let optional_parameters = $crate::datatypes::decode_tlvs(buf)?;

                Ok($pdu_type {
                    sequence_number: header.sequence_number,
                    service_type,
                    source_addr_ton,
                    source_addr_npi,
                    source_addr,
                    dest_addr_ton,
                    dest_addr_npi,
                    destination_addr,
                    esm_class,
                    protocol_id,
                    priority_flag,
                    schedule_delivery_time,
                    validity_period,
                    registered_delivery,
                    replace_if_present_flag,
                    data_coding,
                    sm_default_msg_id,
                    short_message,
                    optional_parameters,
                })
            }
        }

        impl $crate::codec::Encodable for $pdu_type {
            fn encode(&self, buf: &mut bytes::BytesMut) -> Result<(), $crate::codec::CodecError> {
                use $crate::codec::{encode_cstring, encode_u8};

                if self.short_message.len() > $crate::datatypes::MAX_SHORT_MESSAGE_LEN {
                    return Err($crate::codec::CodecError::FieldValidation {
                        field: "short_message",
                        reason: format!(
                            "{} octets exceeds {}; use message_payload",
                            self.short_message.len(),
                            $crate::datatypes::MAX_SHORT_MESSAGE_LEN
                        ),
                    });
                }
                if !self.short_message.is_empty() && self.message_payload().is_some() {
                    return Err($crate::codec::CodecError::FieldValidation {
                        field: "short_message",
                        reason: "short_message and message_payload are mutually exclusive"
                            .to_string(),
                    });
                }

                let header = $crate::codec::PduHeader {
                    command_length: 0,
                    command_id: $command_id,
                    command_status: $crate::datatypes::CommandStatus::Ok,
                    sequence_number: self.sequence_number,
                };
                header.encode(buf)?;

                encode_cstring(buf, &self.service_type, 6);
                encode_u8(buf, self.source_addr_ton);
                encode_u8(buf, self.source_addr_npi);
                encode_cstring(buf, &self.source_addr, 21);
                encode_u8(buf, self.dest_addr_ton);
                encode_u8(buf, self.dest_addr_npi);
                encode_cstring(buf, &self.destination_addr, 21);
                encode_u8(buf, self.esm_class.raw());
                encode_u8(buf, self.protocol_id);
                encode_u8(buf, self.priority_flag);
                encode_cstring(buf, &self.schedule_delivery_time, 17);
                encode_cstring(buf, &self.validity_period, 17);
                encode_u8(buf, self.registered_delivery);
                encode_u8(buf, self.replace_if_present_flag);
                encode_u8(buf, self.data_coding);
                encode_u8(buf, self.sm_default_msg_id);
                encode_u8(buf, self.short_message.len() as u8);
                bytes::BufMut::put_slice(buf, &self.short_message);

                for tlv in &self.optional_parameters {
                    tlv.encode(buf)?;
                }
                Ok(())
            }
        }

        impl $pdu_type {
            pub fn new(
                source_addr: impl Into<String>,
                destination_addr: impl Into<String>,
            ) -> Self {
                Self {
                    source_addr: source_addr.into(),
                    destination_addr: destination_addr.into(),
                    ..Default::default()
                }
            }

            $crate::macros::builder_setters!(
                service_type: String,
                esm_class: $crate::datatypes::EsmClass,
                registered_delivery: u8,
                data_coding: u8,
                short_message: bytes::Bytes,
            );

            /// Append an optional parameter.
            pub fn with_tlv(mut self, tlv: $crate::datatypes::Tlv) -> Self {
                self.optional_parameters.push(tlv);
                self
            }

            pub fn tlv(&self, tag: u16) -> Option<&$crate::datatypes::Tlv> {
                $crate::datatypes::find_tlv(&self.optional_parameters, tag)
            }

            pub fn message_payload(&self) -> Option<&bytes::Bytes> {
                self.tlv($crate::datatypes::tags::MESSAGE_PAYLOAD)
                    .map(|tlv| &tlv.value)
            }
        }
    };
}

/// Codec implementation for responses whose body is a single message_id
/// C-string. Error responses may omit the body entirely.
macro_rules! impl_message_id_response {
    ($pdu_type:ident, $command_id:expr) => {
        impl $crate::codec::Decodable for $pdu_type {
            fn command_id() -> $crate::datatypes::CommandId {
                $command_id
            }

            fn decode(
                header: $crate::codec::PduHeader,
                buf: &mut std::io::Cursor<&[u8]>,
            ) -> Result<Self, $crate::codec::CodecError> {
                use bytes::Buf;

                Self::validate_header(&header)?;

                let message_id = if buf.has_remaining() {
                    $crate::codec::decode_cstring(buf, 65, "message_id")?
                } else {
                    String::new()
                };

                Ok($pdu_type {
                    command_status: header.command_status,
                    sequence_number: header.sequence_number,
                    message_id,
                })
            }
        }

        impl $crate::codec::Encodable for $pdu_type {
            fn encode(&self, buf: &mut bytes::BytesMut) -> Result<(), $crate::codec::CodecError> {
                let header = $crate::codec::PduHeader {
                    command_length: 0,
                    command_id: $command_id,
                    command_status: self.command_status,
                    sequence_number: self.sequence_number,
                };
                header.encode(buf)?;

                if self.command_status.is_ok() || !self.message_id.is_empty() {
                    $crate::codec::encode_cstring(buf, &self.message_id, 65);
                }
                Ok(())
            }
        }

        impl $pdu_type {
            pub fn new(sequence_number: u32, message_id: impl Into<String>) -> Self {
                Self {
                    command_status: $crate::datatypes::CommandStatus::Ok,
                    sequence_number,
                    message_id: message_id.into(),
                }
            }

            pub fn error(sequence_number: u32, status: $crate::datatypes::CommandStatus) -> Self {
                Self {
                    command_status: status,
                    sequence_number,
                    message_id: String::new(),
                }
            }
        }
    };
}

/// Macro for generating fluent builder setter methods
macro_rules! builder_setters {
    ($($field:ident: $type:ty),* $(,)?) => {
        $(
            pub fn $field(mut self, $field: $type) -> Self {
                self.$field = $field;
                self
            }
        )*
    };
}

// Make macros available to the rest of the crate
pub(crate) use {
    builder_setters, impl_complete_header_only_pdu, impl_header_only_constructors,
    impl_header_only_pdu, impl_message_id_response, impl_short_message_pdu,
};
