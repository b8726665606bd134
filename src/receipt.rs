// ABOUTME: Delivery receipt text format, tolerant parser and the deliver_sm that carries a receipt
// ABOUTME: Maps SMPP message_state codes to the short stat strings used inside receipt text

use crate::datatypes::{DeliverSm, EsmClass, SubmitSm, Tlv, find_tlv, tags};
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

const RECEIPT_DATE_FORMAT: &str = "%y%m%d%H%M";
const RECEIPT_TEXT_CHARS: usize = 20;
/// network_error_code network type for GSM
const NETWORK_TYPE_GSM: u8 = 0x03;

/// SMPP v3.4 message_state values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageState {
    Enroute,
    Delivered,
    Expired,
    Deleted,
    Undeliverable,
    Accepted,
    Unknown,
    Rejected,
}

impl MessageState {
    pub fn code(&self) -> u8 {
        match self {
            MessageState::Enroute => 1,
            MessageState::Delivered => 2,
            MessageState::Expired => 3,
            MessageState::Deleted => 4,
            MessageState::Undeliverable => 5,
            MessageState::Accepted => 6,
            MessageState::Unknown => 7,
            MessageState::Rejected => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => MessageState::Enroute,
            2 => MessageState::Delivered,
            3 => MessageState::Expired,
            4 => MessageState::Deleted,
            5 => MessageState::Undeliverable,
            6 => MessageState::Accepted,
            7 => MessageState::Unknown,
            8 => MessageState::Rejected,
            _ => return None,
        })
    }

    /// The seven character `stat:` value.
    pub fn stat(&self) -> &'static str {
        match self {
            MessageState::Enroute => "ENROUTE",
            MessageState::Delivered => "DELIVRD",
            MessageState::Expired => "EXPIRED",
            MessageState::Deleted => "DELETED",
            MessageState::Undeliverable => "UNDELIV",
            MessageState::Accepted => "ACCEPTD",
            MessageState::Unknown => "UNKNOWN",
            MessageState::Rejected => "REJECTD",
        }
    }

    /// Error code reported with this state when none is given.
    pub fn default_error_code(&self) -> u16 {
        match self {
            MessageState::Delivered => 0,
            MessageState::Expired => 4,
            MessageState::Deleted => 5,
            MessageState::Undeliverable => 6,
            MessageState::Rejected => 7,
            _ => 1,
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stat())
    }
}

impl FromStr for MessageState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.trim().to_ascii_uppercase().as_str() {
            "ENROUTE" => MessageState::Enroute,
            "DELIVRD" | "DELIVERED" => MessageState::Delivered,
            "EXPIRED" => MessageState::Expired,
            "DELETED" => MessageState::Deleted,
            "UNDELIV" | "UNDELIVERABLE" => MessageState::Undeliverable,
            "ACCEPTD" | "ACCEPTED" => MessageState::Accepted,
            "UNKNOWN" => MessageState::Unknown,
            "REJECTD" | "REJECTED" => MessageState::Rejected,
            other => return Err(format!("unknown message state '{other}'")),
        };
        Ok(state)
    }
}

/// The `id:... stat:... text:...` body of a delivery receipt.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub submitted: u32,
    pub delivered: u32,
    pub submit_date: Option<NaiveDateTime>,
    pub done_date: Option<NaiveDateTime>,
    /// Raw stat value; see [`DeliveryReceipt::state`]
    pub stat: String,
    pub error_code: u16,
    pub text: String,
}

impl DeliveryReceipt {
    /// Receipt for one message in `state`, done now.
    pub fn new(
        message_id: impl Into<String>,
        state: MessageState,
        submitted_at: DateTime<Utc>,
        text: &str,
    ) -> Self {
        let delivered = u32::from(state == MessageState::Delivered);
        Self {
            message_id: message_id.into(),
            submitted: 1,
            delivered,
            submit_date: Some(submitted_at.naive_utc()),
            done_date: Some(Utc::now().naive_utc()),
            stat: state.stat().to_string(),
            error_code: state.default_error_code(),
            text: text.chars().take(RECEIPT_TEXT_CHARS).collect(),
        }
    }

    pub fn state(&self) -> Option<MessageState> {
        self.stat.parse().ok()
    }

    /// Read a receipt body. Missing fields keep their defaults; a body
    /// without either an id or a stat is not a receipt.
    pub fn parse(body: &str) -> Option<DeliveryReceipt> {
        static FIELDS: OnceLock<Regex> = OnceLock::new();
        static TEXT: OnceLock<Regex> = OnceLock::new();
        let fields = FIELDS.get_or_init(|| {
            Regex::new(r"(?i)\b(id|sub|dlvrd|submit date|done date|stat|err):(\S*)")
                .expect("static pattern")
        });
        let text = TEXT.get_or_init(|| Regex::new(r"(?is)\btext:(.*)$").expect("static pattern"));

        let (head, text) = match text.captures(body) {
            Some(captures) => {
                let start = captures.get(0).map_or(body.len(), |m| m.start());
                let value = captures.get(1).map_or("", |m| m.as_str());
                (&body[..start], value.to_string())
            }
            None => (body, String::new()),
        };

        let mut receipt = DeliveryReceipt {
            message_id: String::new(),
            submitted: 0,
            delivered: 0,
            submit_date: None,
            done_date: None,
            stat: String::new(),
            error_code: 0,
            text,
        };

        for captures in fields.captures_iter(head) {
            let (Some(key), Some(value)) = (captures.get(1), captures.get(2)) else {
                continue;
            };
            let value = value.as_str();
            match key.as_str().to_ascii_lowercase().as_str() {
                "id" => receipt.message_id = value.to_string(),
                "sub" => receipt.submitted = value.parse().unwrap_or(0),
                "dlvrd" => receipt.delivered = value.parse().unwrap_or(0),
                "submit date" => receipt.submit_date = parse_receipt_date(value),
                "done date" => receipt.done_date = parse_receipt_date(value),
                "stat" => receipt.stat = value.to_ascii_uppercase(),
                "err" => receipt.error_code = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        if receipt.message_id.is_empty() && receipt.stat.is_empty() {
            return None;
        }
        Some(receipt)
    }

    /// deliver_sm carrying this receipt back to the submitter of `original`.
    pub fn to_deliver_sm(&self, original: &SubmitSm) -> DeliverSm {
        let mut pdu = DeliverSm::new(
            original.destination_addr.clone(),
            original.source_addr.clone(),
        )
        .esm_class(EsmClass::delivery_receipt())
        .data_coding(0)
        .short_message(Bytes::from(self.to_string().into_bytes()))
        .with_tlv(Tlv::cstring(tags::RECEIPTED_MESSAGE_ID, &self.message_id));
        pdu.source_addr_ton = original.dest_addr_ton;
        pdu.source_addr_npi = original.dest_addr_npi;
        pdu.dest_addr_ton = original.source_addr_ton;
        pdu.dest_addr_npi = original.source_addr_npi;

        if let Some(state) = self.state() {
            pdu = pdu.with_tlv(Tlv::u8(tags::MESSAGE_STATE, state.code()));
            if state != MessageState::Delivered && self.error_code != 0 {
                let [hi, lo] = self.error_code.to_be_bytes();
                pdu = pdu.with_tlv(Tlv::new(
                    tags::NETWORK_ERROR_CODE,
                    vec![NETWORK_TYPE_GSM, hi, lo],
                ));
            }
        }
        pdu
    }

    /// Receipt carried by a received deliver_sm. The text body is
    /// preferred; receipted_message_id and message_state fill the gaps.
    pub fn from_deliver_sm(pdu: &DeliverSm) -> Option<DeliveryReceipt> {
        let body = String::from_utf8_lossy(&pdu.short_message);
        let tlv_id = pdu
            .tlv(tags::RECEIPTED_MESSAGE_ID)
            .map(Tlv::as_cstring)
            .filter(|id| !id.is_empty());
        let tlv_state = pdu
            .tlv(tags::MESSAGE_STATE)
            .and_then(Tlv::as_u8)
            .and_then(MessageState::from_code);

        let mut receipt = match DeliveryReceipt::parse(&body) {
            Some(receipt) => receipt,
            None => DeliveryReceipt {
                message_id: tlv_id.clone()?,
                submitted: 0,
                delivered: 0,
                submit_date: None,
                done_date: None,
                stat: String::new(),
                error_code: 0,
                text: String::new(),
            },
        };
        if let Some(id) = tlv_id {
            receipt.message_id = id;
        }
        if receipt.stat.is_empty() {
            if let Some(state) = tlv_state {
                receipt.stat = state.stat().to_string();
            }
        }
        if receipt.error_code == 0 {
            if let Some(code) = network_error_code(&pdu.optional_parameters) {
                receipt.error_code = code;
            }
        }
        Some(receipt)
    }
}

impl fmt::Display for DeliveryReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date = |value: &Option<NaiveDateTime>| {
            value
                .map(|d| d.format(RECEIPT_DATE_FORMAT).to_string())
                .unwrap_or_default()
        };
        write!(
            f,
            "id:{} sub:{:03} dlvrd:{:03} submit date:{} done date:{} stat:{} err:{:03} text:{}",
            self.message_id,
            self.submitted,
            self.delivered,
            date(&self.submit_date),
            date(&self.done_date),
            self.stat,
            self.error_code,
            self.text
        )
    }
}

fn parse_receipt_date(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, RECEIPT_DATE_FORMAT).ok()
}

fn network_error_code(tlvs: &[Tlv]) -> Option<u16> {
    let value = &find_tlv(tlvs, tags::NETWORK_ERROR_CODE)?.value;
    match value.as_ref() {
        [_, hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}
