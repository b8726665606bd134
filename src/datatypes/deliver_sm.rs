use crate::datatypes::{CommandId, CommandStatus, EsmClass, Tlv};
use crate::macros::{impl_message_id_response, impl_short_message_pdu};
use bytes::Bytes;

/// deliver_sm: the SMSC routes a mobile originated message, or a delivery
/// receipt, to an ESME bound as receiver or transceiver.
///
/// The body layout is identical to submit_sm; schedule_delivery_time,
/// validity_period and replace_if_present_flag are unused and sent empty.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeliverSm {
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
    pub registered_delivery: u8,
    pub replace_if_present_flag: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Bytes,
    pub optional_parameters: Vec<Tlv>,
}

/// The message_id field is unused in deliver_sm_resp and always empty.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliverSmResponse {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    pub message_id: String,
}

impl_short_message_pdu!(DeliverSm, CommandId::DeliverSm);
impl_message_id_response!(DeliverSmResponse, CommandId::DeliverSmResp);
