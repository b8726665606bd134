// ABOUTME: Encoding handler that turns text into SMPP short message octets and back
// ABOUTME: Falls back to UCS2 on unrepresentable text and scores candidate decodings when the declared one looks wrong

mod charsets;

use charsets::{Iso8859, REPLACEMENT};
use std::fmt;
use tracing::{debug, warn};

/// Character sets the simulator can put on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// GSM 03.38 default alphabet, unpacked
    Gsm7,
    Latin1,
    Binary,
    Cyrillic,
    Hebrew,
    Ucs2,
    /// Only produced by detection; encoding to it yields UCS2 octets
    Utf8,
    Arabic,
}

impl Encoding {
    /// Resolve a configuration or request name. Case, `_` and `-` are ignored.
    pub fn from_name(name: &str) -> Option<Self> {
        let key: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        match key.as_str() {
            "GSM7" | "GSM7BIT" | "GSMDEFAULT" | "XGSM7BIT" => Some(Encoding::Gsm7),
            "LATIN1" | "ISO88591" => Some(Encoding::Latin1),
            "BINARY" | "8BIT" => Some(Encoding::Binary),
            "CYRILLIC" | "ISO88595" => Some(Encoding::Cyrillic),
            "HEBREW" | "ISO88598" => Some(Encoding::Hebrew),
            "UCS2" | "UTF16BE" | "UTF16" => Some(Encoding::Ucs2),
            "UTF8" => Some(Encoding::Utf8),
            "ARABIC" | "ISO88596" => Some(Encoding::Arabic),
            _ => None,
        }
    }

    pub fn from_data_coding(data_coding: u8) -> Self {
        match data_coding {
            0x00 | 0x01 => Encoding::Gsm7,
            0x02 | 0x04 => Encoding::Binary,
            0x03 => Encoding::Latin1,
            0x06 => Encoding::Cyrillic,
            0x07 => Encoding::Hebrew,
            0x08 => Encoding::Ucs2,
            0x0B => Encoding::Arabic,
            _ => Encoding::Gsm7,
        }
    }

    pub fn data_coding(&self) -> u8 {
        match self {
            Encoding::Gsm7 => 0x00,
            Encoding::Latin1 => 0x03,
            Encoding::Binary => 0x04,
            Encoding::Cyrillic => 0x06,
            Encoding::Hebrew => 0x07,
            Encoding::Ucs2 | Encoding::Utf8 => 0x08,
            Encoding::Arabic => 0x0B,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Gsm7 => "GSM7",
            Encoding::Latin1 => "ISO-8859-1",
            Encoding::Binary => "BINARY",
            Encoding::Cyrillic => "ISO-8859-5",
            Encoding::Hebrew => "ISO-8859-8",
            Encoding::Ucs2 => "UCS2",
            Encoding::Utf8 => "UTF-8",
            Encoding::Arabic => "ISO-8859-6",
        }
    }

    /// Capacity class for segmentation: 70/67/69 units instead of 160/153/159.
    pub fn is_double_byte(&self) -> bool {
        matches!(self, Encoding::Ucs2 | Encoding::Utf8)
    }

    fn encode_raw(&self, text: &str) -> Vec<u8> {
        match self {
            Encoding::Gsm7 => charsets::gsm7_encode(text),
            Encoding::Latin1 | Encoding::Binary => Iso8859::Latin1.encode(text),
            Encoding::Cyrillic => Iso8859::Cyrillic.encode(text),
            Encoding::Hebrew => Iso8859::Hebrew.encode(text),
            Encoding::Arabic => Iso8859::Arabic.encode(text),
            Encoding::Ucs2 | Encoding::Utf8 => charsets::ucs2_encode(text),
        }
    }

    fn decode_raw(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Gsm7 => charsets::gsm7_decode(bytes),
            Encoding::Latin1 | Encoding::Binary => Iso8859::Latin1.decode(bytes),
            Encoding::Cyrillic => Iso8859::Cyrillic.decode(bytes),
            Encoding::Hebrew => Iso8859::Hebrew.decode(bytes),
            Encoding::Arabic => Iso8859::Arabic.decode(bytes),
            Encoding::Ucs2 => charsets::ucs2_decode(bytes),
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    fn detection_candidates(&self) -> Vec<Encoding> {
        use Encoding::*;
        match self {
            Ucs2 => vec![Ucs2, Utf8, Latin1],
            Utf8 => vec![Utf8, Latin1, Ucs2],
            Latin1 => vec![Latin1, Utf8, Gsm7],
            Gsm7 => vec![Gsm7, Latin1, Utf8],
            other => vec![*other, Utf8, Ucs2, Latin1, Gsm7],
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of [`encode`].
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedText {
    pub bytes: Vec<u8>,
    /// Encoding actually used on the wire
    pub encoding: Encoding,
    pub data_coding: u8,
    /// The requested encoding could not represent the text and UCS2 was used
    pub used_fallback: bool,
    /// The requested name was not recognised and GSM7 was assumed
    pub substituted_default: bool,
}

/// Result of [`decode`].
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: Encoding,
    pub declared: Encoding,
    /// 0.0 (garbage) to 1.0 (clean)
    pub confidence: f64,
}

impl DecodedText {
    pub fn was_corrected(&self) -> bool {
        self.encoding != self.declared
    }
}

/// Resolve an encoding name, substituting GSM7 for unknown names.
pub fn resolve(name: &str) -> (Encoding, bool) {
    match Encoding::from_name(name) {
        Some(encoding) => (encoding, false),
        None => {
            warn!(requested = name, "unknown encoding, using GSM7");
            (Encoding::Gsm7, true)
        }
    }
}

/// Encode `text` with the named encoding, never failing.
pub fn encode(text: &str, name: &str) -> EncodedText {
    let (encoding, substituted_default) = resolve(name);
    EncodedText {
        substituted_default,
        ..encode_as(text, encoding)
    }
}

/// Encode with an already resolved encoding. Representability is checked by
/// decoding the produced octets and comparing with the input.
pub fn encode_as(text: &str, encoding: Encoding) -> EncodedText {
    let wire = if encoding == Encoding::Utf8 {
        Encoding::Ucs2
    } else {
        encoding
    };

    let bytes = wire.encode_raw(text);
    if wire.decode_raw(&bytes) == text {
        return EncodedText {
            bytes,
            encoding: wire,
            data_coding: wire.data_coding(),
            used_fallback: false,
            substituted_default: false,
        };
    }

    warn!(requested = %encoding, "text not representable, encoding corrected to UCS2");
    EncodedText {
        bytes: charsets::ucs2_encode(text),
        encoding: Encoding::Ucs2,
        data_coding: Encoding::Ucs2.data_coding(),
        used_fallback: true,
        substituted_default: false,
    }
}

/// Encode only, choosing the effective encoding. Used by callers that need
/// to know the capacity class before splitting.
pub fn effective_encoding(text: &str, name: &str) -> Encoding {
    encode(text, name).encoding
}

/// Decode octets, trying other candidates when the declared encoding
/// produces implausible text. Always returns something.
pub fn decode(bytes: &[u8], declared: Encoding) -> DecodedText {
    if bytes.is_empty() {
        return DecodedText {
            text: String::new(),
            encoding: declared,
            declared,
            confidence: 1.0,
        };
    }

    let text = declared.decode_raw(bytes);
    let declared_score = score(&text, bytes.len());
    if declared_score >= 0.9 {
        return DecodedText {
            text,
            encoding: declared,
            declared,
            confidence: declared_score,
        };
    }

    let mut best = DecodedText {
        text,
        encoding: declared,
        declared,
        confidence: declared_score,
    };
    for candidate in declared.detection_candidates() {
        let text = candidate.decode_raw(bytes);
        let score = score(&text, bytes.len());
        if score > best.confidence {
            best = DecodedText {
                text,
                encoding: candidate,
                declared,
                confidence: score,
            };
        }
        if score >= 0.95 {
            break;
        }
    }

    if best.was_corrected() {
        warn!(
            declared = %declared,
            detected = %best.encoding,
            confidence = best.confidence,
            "encoding corrected"
        );
    } else {
        debug!(encoding = %declared, confidence = best.confidence, "low confidence decode");
    }
    best
}

/// [`decode`] with the encoding taken from a data_coding octet.
pub fn decode_data_coding(bytes: &[u8], data_coding: u8) -> DecodedText {
    decode(bytes, Encoding::from_data_coding(data_coding))
}

/// Plausibility of decoded text, 0.0 to 1.0. Lengths are in UTF-16 units.
pub fn score(text: &str, byte_len: usize) -> f64 {
    let mut length = 0usize;
    let mut replacement = 0usize;
    let mut nul = 0usize;
    let mut control = 0usize;
    let mut printable = 0usize;

    for ch in text.chars() {
        length += ch.len_utf16();
        match ch {
            REPLACEMENT => replacement += 1,
            '\0' => nul += 1,
            '\n' | '\r' | '\t' => {}
            c if (c as u32) < 0x20 => control += 1,
            _ => printable += ch.len_utf16(),
        }
    }

    if length == 0 {
        return 0.0;
    }

    let length_f = length as f64;
    let mut score = 1.0;
    score -= replacement as f64 / length_f * 2.0;
    score -= control as f64 / length_f * 1.5;
    score -= nul as f64 / length_f * 2.0;
    score *= printable as f64 / length_f;

    if byte_len > 0 {
        let ratio = length_f / byte_len as f64;
        if !(0.5..=2.0).contains(&ratio) {
            score *= 0.5;
        }
    }

    score.clamp(0.0, 1.0)
}

/// Capacity units one character occupies: UTF-16 code units for double-byte
/// encodings, two septets for GSM7 extension characters, otherwise one.
pub fn unit_width(ch: char, encoding: Encoding) -> usize {
    match encoding {
        e if e.is_double_byte() => ch.len_utf16(),
        Encoding::Gsm7 if charsets::is_gsm7_extension(ch) => 2,
        _ => 1,
    }
}

/// Length of `text` in segmentation capacity units.
pub fn text_units(text: &str, encoding: Encoding) -> usize {
    text.chars().map(|ch| unit_width(ch, encoding)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_resolution_ignores_case_and_separators() {
        assert_eq!(Encoding::from_name("gsm_7bit"), Some(Encoding::Gsm7));
        assert_eq!(Encoding::from_name("x-gsm7bit"), Some(Encoding::Gsm7));
        assert_eq!(Encoding::from_name("iso-8859-5"), Some(Encoding::Cyrillic));
        assert_eq!(Encoding::from_name("UTF_16BE"), Some(Encoding::Ucs2));
        assert_eq!(Encoding::from_name("klingon"), None);
    }

    #[test]
    fn data_coding_mapping() {
        assert_eq!(Encoding::from_data_coding(0x01), Encoding::Gsm7);
        assert_eq!(Encoding::from_data_coding(0x02), Encoding::Binary);
        assert_eq!(Encoding::from_data_coding(0x0B), Encoding::Arabic);
        assert_eq!(Encoding::from_data_coding(0xF5), Encoding::Gsm7);
        assert_eq!(Encoding::Hebrew.data_coding(), 0x07);
        assert_eq!(Encoding::Utf8.data_coding(), 0x08);
    }

    #[test]
    fn round_trip_in_each_alphabet() {
        let samples = [
            (Encoding::Gsm7, "Hello @ World {ok} €5"),
            (Encoding::Latin1, "Café déjà vu"),
            (Encoding::Cyrillic, "Привет мир"),
            (Encoding::Hebrew, "שלום עולם"),
            (Encoding::Arabic, "مرحبا بالعالم"),
            (Encoding::Ucs2, "你好 😀 world"),
        ];
        for (encoding, text) in samples {
            let encoded = encode_as(text, encoding);
            assert!(!encoded.used_fallback, "{encoding}");
            assert_eq!(encoded.encoding, encoding);
            let decoded = decode(&encoded.bytes, encoding);
            assert_eq!(decoded.text, text, "{encoding}");
            assert!(!decoded.was_corrected());
        }
    }

    #[test]
    fn unrepresentable_text_falls_back_to_ucs2() {
        let encoded = encode("Hello Привет", "GSM7");
        assert!(encoded.used_fallback);
        assert_eq!(encoded.encoding, Encoding::Ucs2);
        assert_eq!(encoded.data_coding, 0x08);
        assert_eq!(encoded.bytes.len(), 24);
    }

    #[test]
    fn unknown_name_substitutes_gsm7() {
        let encoded = encode("plain", "EBCDIC-42");
        assert!(encoded.substituted_default);
        assert!(!encoded.used_fallback);
        assert_eq!(encoded.encoding, Encoding::Gsm7);
        assert_eq!(encoded.bytes, b"plain");
    }

    #[test]
    fn utf8_request_is_sent_as_ucs2() {
        let encoded = encode("hi", "utf-8");
        assert_eq!(encoded.encoding, Encoding::Ucs2);
        assert_eq!(encoded.bytes, vec![0, b'h', 0, b'i']);
        assert!(!encoded.used_fallback);
    }

    #[test]
    fn empty_input_decodes_with_full_confidence() {
        let decoded = decode(&[], Encoding::Ucs2);
        assert_eq!(decoded.text, "");
        assert_eq!(decoded.confidence, 1.0);
    }

    #[test]
    fn mislabelled_utf8_is_detected() {
        // UTF-8 octets declared as UCS2; the odd length leaves a dangling octet
        let bytes = "Hello there, world!".as_bytes();
        let decoded = decode(bytes, Encoding::Ucs2);
        assert_eq!(decoded.encoding, Encoding::Utf8);
        assert_eq!(decoded.text, "Hello there, world!");
        assert!(decoded.confidence >= 0.95);
        assert!(decoded.was_corrected());
    }

    #[test]
    fn clean_declared_decoding_is_accepted() {
        let decoded = decode_data_coding(b"Plain ascii text", 0x00);
        assert_eq!(decoded.encoding, Encoding::Gsm7);
        assert!(decoded.confidence >= 0.9);
    }

    #[test]
    fn score_penalises_garbage() {
        assert_eq!(score("", 4), 0.0);
        assert_eq!(score("abcd", 4), 1.0);
        assert!(score("\u{FFFD}\u{FFFD}ab", 4) == 0.0);
        // ratio above 2 halves the score
        assert_eq!(score("abcdef", 2), 0.5);
    }

    #[test]
    fn text_units_by_capacity_class() {
        assert_eq!(text_units("a😀", Encoding::Ucs2), 3);
        assert_eq!(text_units("a😀", Encoding::Latin1), 2);
        assert_eq!(text_units("a€", Encoding::Gsm7), 3);
    }
}
