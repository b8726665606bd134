use crate::datatypes::{CommandId, CommandStatus, EsmClass, Tlv};
use crate::macros::{impl_message_id_response, impl_short_message_pdu};
use bytes::Bytes;

/// Longest body that fits the short_message field. Anything larger travels
/// in the message_payload TLV.
pub const MAX_SHORT_MESSAGE_LEN: usize = 254;

/// submit_sm: an ESME hands one message (or one segment of a concatenated
/// message) to the SMSC.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubmitSm {
    pub sequence_number: u32,
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub destination_addr: String,
    pub esm_class: EsmClass,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    /// Bit 0 requests an SMSC delivery receipt.
    pub registered_delivery: u8,
    pub replace_if_present_flag: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Bytes,
    pub optional_parameters: Vec<Tlv>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmitSmResponse {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    /// SMSC assigned identifier, used later to correlate delivery receipts.
    pub message_id: String,
}

impl_short_message_pdu!(SubmitSm, CommandId::SubmitSm);
impl_message_id_response!(SubmitSmResponse, CommandId::SubmitSmResp);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, Decodable, Encodable, PduHeader};
    use crate::datatypes::tags;
    use std::io::Cursor;

    fn decode(bytes: &[u8]) -> Result<SubmitSm, CodecError> {
        let mut cursor = Cursor::new(bytes);
        let header = PduHeader::decode(&mut cursor)?;
        SubmitSm::decode(header, &mut cursor)
    }

    #[test]
    fn submit_with_sar_tlvs_roundtrip() {
        let pdu = SubmitSm::new("12345", "67890")
            .short_message(Bytes::from_static(b"Hello World"))
            .registered_delivery(1)
            .with_tlv(Tlv::u16(tags::SAR_MSG_REF_NUM, 513))
            .with_tlv(Tlv::u8(tags::SAR_TOTAL_SEGMENTS, 2))
            .with_tlv(Tlv::u8(tags::SAR_SEGMENT_SEQNUM, 1));
        let pdu = SubmitSm {
            sequence_number: 7,
            ..pdu
        };

        let bytes = pdu.to_bytes().unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, pdu);
        assert_eq!(
            decoded.tlv(tags::SAR_MSG_REF_NUM).and_then(Tlv::as_u16),
            Some(513)
        );
    }

    #[test]
    fn short_message_length_limit() {
        let pdu = SubmitSm {
            sequence_number: 1,
            short_message: Bytes::from(vec![b'a'; MAX_SHORT_MESSAGE_LEN + 1]),
            ..Default::default()
        };
        assert!(matches!(
            pdu.to_bytes(),
            Err(CodecError::FieldValidation {
                field: "short_message",
                ..
            })
        ));
    }

    #[test]
    fn payload_and_short_message_are_exclusive() {
        let pdu = SubmitSm {
            sequence_number: 1,
            short_message: Bytes::from_static(b"x"),
            ..Default::default()
        }
        .with_tlv(Tlv::new(tags::MESSAGE_PAYLOAD, b"y".to_vec()));
        assert!(pdu.to_bytes().is_err());
    }

    #[test]
    fn sm_length_beyond_body_is_rejected() {
        let mut bytes = SubmitSm {
            sequence_number: 1,
            short_message: Bytes::from_static(b"abc"),
            ..Default::default()
        }
        .to_bytes()
        .unwrap()
        .to_vec();
        // sm_length is the octet right before the 3 message bytes
        let sm_length_at = bytes.len() - 4;
        bytes[sm_length_at] = 200;

        assert!(matches!(
            decode(&bytes),
            Err(CodecError::FieldValidation {
                field: "short_message",
                ..
            })
        ));
    }

    #[test]
    fn error_response_may_omit_message_id() {
        let resp = SubmitSmResponse::error(9, CommandStatus::SubmitFailed);
        let bytes = resp.to_bytes().unwrap();
        assert_eq!(bytes.len(), 16);

        let ok = SubmitSmResponse::new(9, "000001").to_bytes().unwrap();
        assert_eq!(&ok[16..], b"000001\0");
    }
}
