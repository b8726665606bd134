use crate::datatypes::{EsmClass, SubmitSm, DeliverSm, Tlv};
use crate::encoding::Encoding;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a long message is carried across PDUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcatenationType {
    /// Single PDU, no framing. Behaves as `Udhi` when the text must be split.
    Default,
    /// "N/M " prefix on each part's text
    TextBase,
    /// User data header inside short_message
    Udhi,
    /// sar_* optional parameters
    Sar,
    /// Whole body in one message_payload parameter
    Payload,
    /// User data header inside message_payload
    UdhiPayload,
}

impl ConcatenationType {
    pub fn uses_udhi(&self) -> bool {
        matches!(self, ConcatenationType::Udhi | ConcatenationType::UdhiPayload)
    }

    pub fn uses_tlv(&self) -> bool {
        matches!(
            self,
            ConcatenationType::Sar | ConcatenationType::Payload | ConcatenationType::UdhiPayload
        )
    }

    pub fn requires_splitting(&self) -> bool {
        matches!(
            self,
            ConcatenationType::TextBase
                | ConcatenationType::Udhi
                | ConcatenationType::Sar
                | ConcatenationType::UdhiPayload
        )
    }

    pub fn esm_class(&self) -> EsmClass {
        if self.uses_udhi() {
            EsmClass::new(EsmClass::UDHI)
        } else {
            EsmClass::default()
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConcatenationType::Default => "default",
            ConcatenationType::TextBase => "text_base",
            ConcatenationType::Udhi => "udhi",
            ConcatenationType::Sar => "sar",
            ConcatenationType::Payload => "payload",
            ConcatenationType::UdhiPayload => "udhi_payload",
        }
    }
}

impl fmt::Display for ConcatenationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConcatenationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(ConcatenationType::Default),
            "text_base" | "textbase" => Ok(ConcatenationType::TextBase),
            "udhi" => Ok(ConcatenationType::Udhi),
            "sar" => Ok(ConcatenationType::Sar),
            "payload" => Ok(ConcatenationType::Payload),
            "udhi_payload" => Ok(ConcatenationType::UdhiPayload),
            other => Err(format!("unknown concatenation type '{other}'")),
        }
    }
}

/// One segment produced by splitting. Lives only for the duration of a send.
#[derive(Clone, Debug, PartialEq)]
pub struct MessagePart {
    /// Text of this part; for TextBase it already carries the "N/M " prefix
    pub text: String,
    pub encoding: Encoding,
    /// 1-based
    pub part_number: u8,
    pub total_parts: u8,
    pub reference: u16,
    pub method: ConcatenationType,
    /// Encoded user data header for UDHI methods
    pub udh: Option<Bytes>,
    /// The requested encoding could not carry the text
    pub encoding_corrected: bool,
}

impl MessagePart {
    pub fn is_multipart(&self) -> bool {
        self.total_parts > 1
    }
}

/// Concatenation metadata recovered from a received PDU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConcatInfo {
    pub reference: u16,
    pub total: u8,
    pub part: u8,
    pub method: ConcatenationType,
}

/// Decoded content of one received PDU.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedPart {
    pub text: String,
    pub encoding: Encoding,
    pub confidence: f64,
    pub concat: Option<ConcatInfo>,
}

impl ExtractedPart {
    pub fn is_complete(&self) -> bool {
        self.concat.is_none_or(|info| info.total == 1)
    }
}

/// Protocol-level fields a part contributes to its PDU.
#[derive(Clone, Debug, PartialEq)]
pub struct WireSegment {
    pub esm_class: EsmClass,
    pub data_coding: u8,
    pub short_message: Bytes,
    pub tlvs: Vec<Tlv>,
    pub encoding_corrected: bool,
}

impl WireSegment {
    pub fn apply_to_submit(self, mut pdu: SubmitSm) -> SubmitSm {
        pdu.esm_class = EsmClass::new(pdu.esm_class.raw() | self.esm_class.raw());
        pdu.data_coding = self.data_coding;
        pdu.short_message = self.short_message;
        pdu.optional_parameters.extend(self.tlvs);
        pdu
    }

    pub fn apply_to_deliver(self, mut pdu: DeliverSm) -> DeliverSm {
        pdu.esm_class = EsmClass::new(pdu.esm_class.raw() | self.esm_class.raw());
        pdu.data_coding = self.data_coding;
        pdu.short_message = self.short_message;
        pdu.optional_parameters.extend(self.tlvs);
        pdu
    }
}
