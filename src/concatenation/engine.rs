// ABOUTME: Splits outbound text into protocol-sized parts and maps each part onto PDU fields
// ABOUTME: Owns the 8-bit and 16-bit reference counters shared by every connection using this engine

use super::types::{ConcatenationType, MessagePart, WireSegment};
use crate::codec::{MAX_PDU_SIZE, PduHeader};
use crate::datatypes::{EsmClass, Tlv, tags};
use crate::encoding::{self, Encoding};
use crate::error::{SmppError, SmppResult};
use bytes::{BufMut, Bytes, BytesMut};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

/// Largest number of parts any method can express.
pub const MAX_PARTS: usize = 255;

/// Above this many encoded octets the Payload method switches from
/// short_message to message_payload.
pub const PAYLOAD_THRESHOLD: usize = 140;

/// Largest submit_sm/deliver_sm body ahead of the optional parameters, with
/// every C-string field at its maximum length.
const MAX_FIXED_BODY: usize = 94;

/// Upper bound of a message_payload value that still fits one PDU next to
/// the header and the largest fixed body.
pub const MAX_PAYLOAD_SIZE: usize =
    MAX_PDU_SIZE as usize - PduHeader::SIZE - MAX_FIXED_BODY - Tlv::HEADER_SIZE;

/// Capacities in characters (7-bit class) and UTF-16 units (double-byte class).
#[derive(Clone, Copy, Debug)]
struct Capacity {
    seven_bit: usize,
    double_byte: usize,
}

impl Capacity {
    const fn for_class(&self, double_byte: bool) -> usize {
        if double_byte {
            self.double_byte
        } else {
            self.seven_bit
        }
    }
}

const SINGLE: Capacity = Capacity {
    seven_bit: 160,
    double_byte: 70,
};
const UDHI_PART: Capacity = Capacity {
    seven_bit: 153,
    double_byte: 67,
};
const SAR_PART: Capacity = Capacity {
    seven_bit: 159,
    double_byte: 69,
};
/// Room left for the "NNN/MMM " marker.
const TEXT_BASE_MARKER: usize = 8;

pub struct ConcatenationEngine {
    reference_8bit: AtomicU32,
    reference_16bit: AtomicU32,
    wide_udh_reference: bool,
}

impl Default for ConcatenationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcatenationEngine {
    pub fn new() -> Self {
        Self {
            reference_8bit: AtomicU32::new(0),
            reference_16bit: AtomicU32::new(0),
            wide_udh_reference: false,
        }
    }

    /// Use the 16-bit counter (and the 7 octet UDH) for UDHI methods.
    pub fn with_16bit_udh_reference(mut self, enabled: bool) -> Self {
        self.wide_udh_reference = enabled;
        self
    }

    /// Issues 1..=255, wrapping back to 1.
    pub fn next_reference_8bit(&self) -> u16 {
        next_wrapping(&self.reference_8bit, 0xFF) as u16
    }

    /// Issues 1..=65535, wrapping back to 1.
    pub fn next_reference_16bit(&self) -> u16 {
        next_wrapping(&self.reference_16bit, 0xFFFF) as u16
    }

    /// Split `text` for sending. An empty text yields no parts.
    ///
    /// The effective encoding is chosen once for the whole message, so a
    /// fallback to UCS2 applies to every part.
    pub fn split(
        &self,
        text: &str,
        encoding_name: &str,
        method: ConcatenationType,
    ) -> SmppResult<Vec<MessagePart>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let encoded = encoding::encode(text, encoding_name);
        let effective = encoded.encoding;
        let corrected = encoded.used_fallback;
        let double_byte = effective.is_double_byte();

        let single = |method| MessagePart {
            text: text.to_string(),
            encoding: effective,
            part_number: 1,
            total_parts: 1,
            reference: 0,
            method,
            udh: None,
            encoding_corrected: corrected,
        };

        if method == ConcatenationType::Payload {
            let size = encoded.bytes.len();
            if size <= PAYLOAD_THRESHOLD {
                return Ok(vec![single(ConcatenationType::Default)]);
            }
            if size > MAX_PAYLOAD_SIZE {
                return Err(SmppError::PayloadTooLarge {
                    size,
                    max: MAX_PAYLOAD_SIZE,
                });
            }
            return Ok(vec![single(ConcatenationType::Payload)]);
        }

        if encoding::text_units(text, effective) <= SINGLE.for_class(double_byte) {
            return Ok(vec![single(ConcatenationType::Default)]);
        }

        let method = match method {
            ConcatenationType::Default => ConcatenationType::Udhi,
            other => other,
        };
        let capacity = match method {
            ConcatenationType::Sar => SAR_PART.for_class(double_byte),
            ConcatenationType::TextBase => SINGLE.for_class(double_byte) - TEXT_BASE_MARKER,
            _ => UDHI_PART.for_class(double_byte),
        };

        let chunks = chunk_text(text, effective, capacity);
        if chunks.len() > MAX_PARTS {
            return Err(SmppError::SizeLimit {
                parts: chunks.len(),
                max: MAX_PARTS,
            });
        }
        let total = chunks.len() as u8;

        let (reference, wide) = match method {
            ConcatenationType::Sar => (self.next_reference_16bit(), true),
            ConcatenationType::TextBase => (text_reference(text), true),
            _ if self.wide_udh_reference => (self.next_reference_16bit(), true),
            _ => (self.next_reference_8bit(), false),
        };

        debug!(
            %method,
            encoding = %effective,
            parts = total,
            reference,
            "split message"
        );

        let parts = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let part_number = index as u8 + 1;
                let (text, udh) = match method {
                    ConcatenationType::TextBase => {
                        (format!("{part_number}/{total} {chunk}"), None)
                    }
                    m if m.uses_udhi() => {
                        (chunk, Some(build_udh(reference, total, part_number, wide)))
                    }
                    _ => (chunk, None),
                };
                MessagePart {
                    text,
                    encoding: effective,
                    part_number,
                    total_parts: total,
                    reference,
                    method,
                    udh,
                    encoding_corrected: corrected,
                }
            })
            .collect();

        Ok(parts)
    }

    pub fn apply_to_wire(&self, part: &MessagePart) -> WireSegment {
        apply_to_wire(part)
    }
}

/// Protocol fields for one part: short_message, TLVs and esm_class bits.
pub fn apply_to_wire(part: &MessagePart) -> WireSegment {
    let encoded = encoding::encode_as(&part.text, part.encoding);
    let body = Bytes::from(encoded.bytes);

    let mut segment = WireSegment {
        esm_class: EsmClass::default(),
        data_coding: encoded.data_coding,
        short_message: Bytes::new(),
        tlvs: Vec::new(),
        encoding_corrected: part.encoding_corrected || encoded.used_fallback,
    };

    match part.method {
        ConcatenationType::Default | ConcatenationType::TextBase => {
            segment.short_message = body;
        }
        ConcatenationType::Udhi => {
            segment.esm_class = segment.esm_class.with_udhi();
            segment.short_message = prepend_udh(part.udh.as_ref(), body);
        }
        ConcatenationType::Sar => {
            segment.short_message = body;
            segment.tlvs = vec![
                Tlv::u16(tags::SAR_MSG_REF_NUM, part.reference),
                Tlv::u8(tags::SAR_TOTAL_SEGMENTS, part.total_parts),
                Tlv::u8(tags::SAR_SEGMENT_SEQNUM, part.part_number),
            ];
        }
        ConcatenationType::Payload => {
            segment.tlvs = vec![Tlv::new(tags::MESSAGE_PAYLOAD, body)];
        }
        ConcatenationType::UdhiPayload => {
            segment.esm_class = segment.esm_class.with_udhi();
            segment.tlvs = vec![Tlv::new(
                tags::MESSAGE_PAYLOAD,
                prepend_udh(part.udh.as_ref(), body),
            )];
        }
    }

    segment
}

fn prepend_udh(udh: Option<&Bytes>, body: Bytes) -> Bytes {
    match udh {
        Some(udh) => {
            let mut buf = BytesMut::with_capacity(udh.len() + body.len());
            buf.put_slice(udh);
            buf.put_slice(&body);
            buf.freeze()
        }
        None => body,
    }
}

/// `05 00 03 ref total part`, or `07 08 04 refHi refLo total part`.
pub fn build_udh(reference: u16, total: u8, part: u8, wide: bool) -> Bytes {
    let udh = if wide {
        let [hi, lo] = reference.to_be_bytes();
        vec![0x07, 0x08, 0x04, hi, lo, total, part]
    } else {
        vec![0x05, 0x00, 0x03, reference as u8, total, part]
    };
    Bytes::from(udh)
}

/// 31-multiplier polynomial over UTF-16 units, masked to 16 bits.
pub fn text_reference(text: &str) -> u16 {
    let hash = text
        .encode_utf16()
        .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as u32));
    (hash & 0xFFFF) as u16
}

fn next_wrapping(counter: &AtomicU32, max: u32) -> u32 {
    let step = |value: u32| if value >= max { 1 } else { value + 1 };
    let previous = counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| Some(step(value)))
        .unwrap_or_else(|value| value);
    step(previous)
}

/// Greedy split by capacity units; a character is never divided.
fn chunk_text(text: &str, encoding: Encoding, capacity: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut used = 0;

    for ch in text.chars() {
        let width = encoding::unit_width(ch, encoding);
        if used + width > capacity && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(ch);
        used += width;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn engine() -> ConcatenationEngine {
        ConcatenationEngine::new()
    }

    #[test]
    fn three_hundred_gsm_chars_make_two_udhi_parts() {
        let text: String = "abcdefghij".repeat(30);
        let parts = engine().split(&text, "GSM7", ConcatenationType::Udhi).unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text.chars().count(), 153);
        assert_eq!(parts[1].text.chars().count(), 147);
        assert!(parts.iter().all(|p| p.total_parts == 2));
        assert_eq!(parts[0].reference, parts[1].reference);
        assert_eq!((parts[0].part_number, parts[1].part_number), (1, 2));
        assert_eq!(format!("{}{}", parts[0].text, parts[1].text), text);

        let wire = apply_to_wire(&parts[1]);
        assert!(wire.esm_class.has_udhi());
        assert_eq!(
            &wire.short_message[..6],
            &[0x05, 0x00, 0x03, parts[1].reference as u8, 2, 2]
        );
        assert_eq!(wire.short_message.len(), 6 + 147);
    }

    #[test]
    fn short_text_is_single_default_part() {
        let parts = engine().split("hello", "GSM7", ConcatenationType::Sar).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].method, ConcatenationType::Default);

        let parts = engine()
            .split(&"x".repeat(160), "GSM7", ConcatenationType::Udhi)
            .unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(engine().split("", "GSM7", ConcatenationType::Udhi).unwrap().is_empty());
    }

    #[test]
    fn sar_parts_carry_tlvs() {
        let text = "y".repeat(200);
        let parts = engine().split(&text, "GSM7", ConcatenationType::Sar).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text.len(), 159);

        let wire = apply_to_wire(&parts[0]);
        assert!(!wire.esm_class.has_udhi());
        assert_eq!(wire.tlvs.len(), 3);
        assert_eq!(wire.tlvs[0].as_u16(), Some(parts[0].reference));
        assert_eq!(wire.tlvs[1].as_u8(), Some(2));
        assert_eq!(wire.tlvs[2].as_u8(), Some(1));
    }

    #[test]
    fn ucs2_capacity_class() {
        let text = "Ж".repeat(100);
        let parts = engine().split(&text, "GSM7", ConcatenationType::Udhi).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].encoding, Encoding::Ucs2);
        assert!(parts[0].encoding_corrected);
        assert_eq!(parts[0].text.chars().count(), 67);

        let wire = apply_to_wire(&parts[0]);
        assert_eq!(wire.data_coding, 0x08);
        assert!(wire.encoding_corrected);
    }

    #[test]
    fn surrogate_pairs_are_never_split() {
        let text = "😀".repeat(40);
        let parts = engine().split(&text, "UCS2", ConcatenationType::Udhi).unwrap();
        // 80 UTF-16 units, 67 per part rounds down to 33 emoji
        assert_eq!(parts[0].text.chars().count(), 33);
        assert_eq!(parts.concat_text(), text);
    }

    trait ConcatText {
        fn concat_text(&self) -> String;
    }

    impl ConcatText for Vec<MessagePart> {
        fn concat_text(&self) -> String {
            self.iter().map(|p| p.text.as_str()).collect()
        }
    }

    #[test]
    fn text_base_prefixes_parts() {
        let text = "z".repeat(160) + "tail";
        let parts = engine().split(&text, "GSM7", ConcatenationType::TextBase).unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].text.starts_with("1/2 "));
        assert!(parts[1].text.starts_with("2/2 "));
        assert_eq!(parts[0].reference, text_reference(&text));

        let stripped: String = parts
            .iter()
            .map(|p| p.text.splitn(2, ' ').nth(1).unwrap_or_default().to_string())
            .collect();
        assert_eq!(stripped, text);
    }

    #[test]
    fn text_base_reference_collides_for_equal_hashes() {
        let engine = engine();
        let body = "q".repeat(200);
        let a = engine.split(&body, "GSM7", ConcatenationType::TextBase).unwrap();
        let b = engine.split(&body, "GSM7", ConcatenationType::TextBase).unwrap();
        assert_eq!(a[0].reference, b[0].reference);

        // "Aa" and "BB" share a polynomial hash, so these distinct bodies collide
        let first = format!("Aa{body}");
        let second = format!("BB{body}");
        let a = engine.split(&first, "GSM7", ConcatenationType::TextBase).unwrap();
        let b = engine.split(&second, "GSM7", ConcatenationType::TextBase).unwrap();
        assert_ne!(first, second);
        assert_eq!(a[0].reference, b[0].reference);
    }

    #[test]
    fn payload_method_thresholds() {
        let engine = engine();
        let parts = engine.split(&"p".repeat(140), "GSM7", ConcatenationType::Payload).unwrap();
        assert_eq!(parts[0].method, ConcatenationType::Default);

        let parts = engine.split(&"p".repeat(600), "GSM7", ConcatenationType::Payload).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].method, ConcatenationType::Payload);
        let wire = apply_to_wire(&parts[0]);
        assert!(wire.short_message.is_empty());
        assert_eq!(wire.tlvs[0].tag, tags::MESSAGE_PAYLOAD);
        assert_eq!(wire.tlvs[0].value.len(), 600);

        let err = engine
            .split(&"p".repeat(MAX_PAYLOAD_SIZE + 1), "GSM7", ConcatenationType::Payload)
            .unwrap_err();
        assert!(matches!(
            err,
            SmppError::PayloadTooLarge { size, max } if size == MAX_PAYLOAD_SIZE + 1 && max == MAX_PAYLOAD_SIZE
        ));
    }

    #[test]
    fn largest_payload_still_fits_one_pdu() {
        use crate::codec::Encodable;
        use crate::datatypes::SubmitSm;

        assert_eq!(MAX_PAYLOAD_SIZE, 65422);
        let parts = engine()
            .split(&"p".repeat(MAX_PAYLOAD_SIZE), "GSM7", ConcatenationType::Payload)
            .unwrap();
        let wire = apply_to_wire(&parts[0]);

        let mut pdu = SubmitSm::new(&"1".repeat(20), &"2".repeat(20));
        pdu.service_type = "CMTXX".into();
        pdu.schedule_delivery_time = "2".repeat(16);
        pdu.validity_period = "3".repeat(16);
        let bytes = wire.apply_to_submit(pdu).to_bytes().unwrap();
        assert_eq!(bytes.len(), MAX_PDU_SIZE as usize);
    }

    #[test]
    fn udhi_payload_puts_header_in_payload() {
        let parts = engine()
            .split(&"u".repeat(400), "GSM7", ConcatenationType::UdhiPayload)
            .unwrap();
        assert_eq!(parts.len(), 3);
        let wire = apply_to_wire(&parts[0]);
        assert!(wire.short_message.is_empty());
        assert!(wire.esm_class.has_udhi());
        assert_eq!(wire.tlvs[0].value[0], 0x05);
    }

    #[test]
    fn default_method_splits_like_udhi() {
        let parts = engine()
            .split(&"d".repeat(200), "GSM7", ConcatenationType::Default)
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].method, ConcatenationType::Udhi);
    }

    #[test]
    fn too_many_parts_is_rejected() {
        let fits = "a".repeat(153 * 255);
        assert_eq!(
            engine().split(&fits, "GSM7", ConcatenationType::Udhi).unwrap().len(),
            255
        );

        let text = "a".repeat(153 * 255 + 1);
        let err = engine().split(&text, "GSM7", ConcatenationType::Udhi).unwrap_err();
        assert!(matches!(err, SmppError::SizeLimit { parts: 256, max: 255 }));
    }

    #[test]
    fn wide_udh_reference() {
        let engine = ConcatenationEngine::new().with_16bit_udh_reference(true);
        let parts = engine.split(&"w".repeat(300), "GSM7", ConcatenationType::Udhi).unwrap();
        let udh = parts[0].udh.clone().unwrap();
        assert_eq!(&udh[..3], &[0x07, 0x08, 0x04]);
        assert_eq!(udh.len(), 7);
    }

    #[test]
    fn counters_wrap_to_one() {
        let engine = engine();
        let first: Vec<u16> = (0..255).map(|_| engine.next_reference_8bit()).collect();
        assert_eq!(first[0], 1);
        assert_eq!(first[254], 255);
        assert_eq!(engine.next_reference_8bit(), 1);

        engine.reference_16bit.store(65534, Ordering::SeqCst);
        assert_eq!(engine.next_reference_16bit(), 65535);
        assert_eq!(engine.next_reference_16bit(), 1);
    }

    #[test]
    fn concurrent_references_are_unique() {
        let engine = Arc::new(engine());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    (0..30)
                        .map(|_| {
                            engine
                                .split(&"c".repeat(200), "GSM7", ConcatenationType::Sar)
                                .unwrap()[0]
                                .reference
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for reference in handle.join().unwrap() {
                assert!(seen.insert(reference), "duplicate reference {reference}");
            }
        }
        assert_eq!(seen.len(), 240);
    }

    #[test]
    fn separate_engines_do_not_share_counters() {
        let a = engine();
        let b = engine();
        assert_eq!(a.next_reference_8bit(), 1);
        assert_eq!(b.next_reference_8bit(), 1);
    }
}
