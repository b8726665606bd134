// ABOUTME: Recovers text and concatenation metadata from a received short message or payload
// ABOUTME: Detection order is UDH, SAR parameters, message_payload, then the "N/M " text marker

use super::engine::text_reference;
use super::types::{ConcatInfo, ConcatenationType, ExtractedPart};
use crate::datatypes::{EsmClass, Tlv, find_tlv, tags};
use crate::encoding::{self, Encoding};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

const IE_CONCAT_8BIT: u8 = 0x00;
const IE_CONCAT_16BIT: u8 = 0x08;

fn text_base_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // A single separator: the text of a part may itself start with a space
        Regex::new(r"(?s)^(\d+)/(\d+)\s(.*)$").expect("static pattern")
    })
}

/// Parsed user data header: concatenation IE if any, and where text starts.
#[derive(Debug, PartialEq)]
pub struct UserDataHeader {
    pub concat: Option<(u16, u8, u8)>,
    pub header_len: usize,
}

/// Walk the information elements of a UDH.
///
/// IEs are read while two octets of IE header still fit inside the declared
/// length. The header ends where the walk stops, so a 16-bit concatenation
/// header declared as either 0x06 or 0x07 leaves the text intact.
pub fn parse_udh(body: &[u8]) -> Option<UserDataHeader> {
    let declared = *body.first()? as usize;
    if declared == 0 {
        return None;
    }
    let limit = (1 + declared).min(body.len());

    let mut offset = 1;
    let mut concat = None;
    while offset + 2 <= limit {
        let iei = body[offset];
        let len = body[offset + 1] as usize;
        let data = body.get(offset + 2..offset + 2 + len)?;
        match (iei, data) {
            (IE_CONCAT_8BIT, [reference, total, part]) => {
                concat = Some((*reference as u16, *total, *part));
            }
            (IE_CONCAT_16BIT, [hi, lo, total, part]) => {
                concat = Some((u16::from_be_bytes([*hi, *lo]), *total, *part));
            }
            _ => {}
        }
        offset += 2 + len;
    }

    if let Some((_, total, part)) = concat {
        if total == 0 || part == 0 || part > total {
            return None;
        }
    }

    Some(UserDataHeader {
        concat,
        header_len: offset,
    })
}

fn sar_info(tlvs: &[Tlv]) -> Option<ConcatInfo> {
    let reference = find_tlv(tlvs, tags::SAR_MSG_REF_NUM)?.as_u16()?;
    let total = find_tlv(tlvs, tags::SAR_TOTAL_SEGMENTS)?.as_u8()?;
    let part = find_tlv(tlvs, tags::SAR_SEGMENT_SEQNUM)?.as_u8()?;
    if total == 0 || part == 0 || part > total {
        return None;
    }
    Some(ConcatInfo {
        reference,
        total,
        part,
        method: ConcatenationType::Sar,
    })
}

/// Split a UDHI body into text octets and concatenation info. A malformed
/// header leaves the whole body as text.
fn strip_udh(body: &[u8], method: ConcatenationType) -> (&[u8], Option<ConcatInfo>) {
    match parse_udh(body) {
        Some(udh) => {
            let info = udh.concat.map(|(reference, total, part)| ConcatInfo {
                reference,
                total,
                part,
                method,
            });
            (&body[udh.header_len..], info)
        }
        None => {
            debug!("malformed user data header, treating body as text");
            (body, None)
        }
    }
}

/// Decode one received message body and detect its concatenation method.
pub fn extract_part(
    esm_class: EsmClass,
    data_coding: u8,
    short_message: &[u8],
    tlvs: &[Tlv],
) -> ExtractedPart {
    let declared = Encoding::from_data_coding(data_coding);
    let payload = find_tlv(tlvs, tags::MESSAGE_PAYLOAD).map(|tlv| tlv.value.as_ref());

    let (body, udh_method) = match payload {
        Some(payload) => (payload, ConcatenationType::UdhiPayload),
        None => (short_message, ConcatenationType::Udhi),
    };
    let (text_bytes, udh_concat) = if esm_class.has_udhi() {
        strip_udh(body, udh_method)
    } else {
        (body, None)
    };

    let decoded = encoding::decode(text_bytes, declared);
    let mut part = ExtractedPart {
        text: decoded.text,
        encoding: decoded.encoding,
        confidence: decoded.confidence,
        concat: udh_concat,
    };

    if part.concat.is_some() {
        return part;
    }
    if let Some(info) = sar_info(tlvs) {
        part.concat = Some(info);
        return part;
    }
    if payload.is_some() {
        return part;
    }

    if let Some((info, rest)) = match_text_base(&part.text) {
        part.concat = Some(info);
        part.text = rest;
    }
    part
}

/// `N/M text` with 1 <= N <= M <= 255. The reference is left at 0; the
/// caller derives a receive-side key with [`text_base_reference`].
fn match_text_base(text: &str) -> Option<(ConcatInfo, String)> {
    let captures = text_base_pattern().captures(text)?;
    let part: u8 = captures.get(1)?.as_str().parse().ok()?;
    let total: u8 = captures.get(2)?.as_str().parse().ok()?;
    if part == 0 || part > total {
        return None;
    }
    Some((
        ConcatInfo {
            reference: 0,
            total,
            part,
            method: ConcatenationType::TextBase,
        },
        captures.get(3)?.as_str().to_string(),
    ))
}

/// Reference shared by all TextBase parts of one message on the receiving
/// side, where the original content hash is unknown.
pub fn text_base_reference(source: &str, destination: &str, total: u8) -> u16 {
    text_reference(&format!("{source}|{destination}|{total}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concatenation::{ConcatenationEngine, apply_to_wire};

    fn extract_wire(wire: &crate::concatenation::WireSegment) -> ExtractedPart {
        extract_part(wire.esm_class, wire.data_coding, &wire.short_message, &wire.tlvs)
    }

    #[test]
    fn udh_8bit_and_16bit() {
        let udh = parse_udh(&[0x05, 0x00, 0x03, 0x2A, 0x03, 0x01, b'h', b'i']).unwrap();
        assert_eq!(udh.concat, Some((0x2A, 3, 1)));
        assert_eq!(udh.header_len, 6);

        for declared in [0x06, 0x07] {
            let body = [declared, 0x08, 0x04, 0x01, 0x02, 0x02, 0x02, b'o', b'k'];
            let udh = parse_udh(&body).unwrap();
            assert_eq!(udh.concat, Some((0x0102, 2, 2)));
            assert_eq!(&body[udh.header_len..], b"ok");
        }
    }

    #[test]
    fn udh_skips_unrelated_elements() {
        // port addressing IE (0x04) before the concat IE
        let body = [0x09, 0x04, 0x02, 0x10, 0x20, 0x00, 0x03, 0x07, 0x02, 0x01, b'x'];
        let udh = parse_udh(&body).unwrap();
        assert_eq!(udh.concat, Some((7, 2, 1)));
        assert_eq!(udh.header_len, 10);
    }

    #[test]
    fn malformed_udh_is_text() {
        assert!(parse_udh(&[0x05, 0x00, 0x09]).is_none());
        assert!(parse_udh(&[0x05, 0x00, 0x03, 0x01, 0x02, 0x05]).is_none());

        let part = extract_part(EsmClass::new(0x40), 0, &[0x05, 0x00, 0x09], &[]);
        assert_eq!(part.concat, None);
        assert_eq!(part.text.chars().count(), 3);
    }

    #[test]
    fn each_method_round_trips() {
        let engine = ConcatenationEngine::new();
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(8);

        for method in [
            ConcatenationType::Udhi,
            ConcatenationType::Sar,
            ConcatenationType::UdhiPayload,
            ConcatenationType::TextBase,
        ] {
            let parts = engine.split(&text, "GSM7", method).unwrap();
            assert!(parts.len() > 1, "{method}");
            let mut rebuilt = String::new();
            for part in &parts {
                let extracted = extract_wire(&apply_to_wire(part));
                let info = extracted.concat.unwrap();
                assert_eq!(info.method, method);
                assert_eq!(info.total, part.total_parts);
                assert_eq!(info.part, part.part_number);
                if method != ConcatenationType::TextBase {
                    assert_eq!(info.reference, part.reference);
                }
                assert!(!extracted.is_complete());
                rebuilt.push_str(&extracted.text);
            }
            assert_eq!(rebuilt, text, "{method}");
        }
    }

    #[test]
    fn payload_body_is_complete() {
        let engine = ConcatenationEngine::new();
        let text = "payload ".repeat(40);
        let parts = engine.split(&text, "GSM7", ConcatenationType::Payload).unwrap();
        let extracted = extract_wire(&apply_to_wire(&parts[0]));
        assert_eq!(extracted.text, text);
        assert!(extracted.is_complete());
    }

    #[test]
    fn ucs2_parts_decode() {
        let engine = ConcatenationEngine::new();
        let text = "Привет, мир! ".repeat(10);
        let parts = engine.split(&text, "UCS2", ConcatenationType::Udhi).unwrap();
        let rebuilt: String = parts
            .iter()
            .map(|p| extract_wire(&apply_to_wire(p)).text)
            .collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn text_base_bounds() {
        assert!(match_text_base("0/2 nope").is_none());
        assert!(match_text_base("3/2 nope").is_none());
        assert!(match_text_base("1/300 nope").is_none());
        let (info, rest) = match_text_base("2/2 multi\nline").unwrap();
        assert_eq!((info.part, info.total), (2, 2));
        assert_eq!(rest, "multi\nline");
    }

    #[test]
    fn plain_text_is_complete() {
        let part = extract_part(EsmClass::default(), 0, b"just text", &[]);
        assert_eq!(part.text, "just text");
        assert!(part.is_complete());
    }

    #[test]
    fn receive_side_reference_is_stable() {
        assert_eq!(
            text_base_reference("111", "222", 3),
            text_base_reference("111", "222", 3)
        );
        assert_ne!(
            text_base_reference("111", "222", 3),
            text_base_reference("111", "223", 3)
        );
    }
}
