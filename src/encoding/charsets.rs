// ABOUTME: Byte-level character tables for the GSM 03.38 default alphabet and ISO-8859 national sets
// ABOUTME: Decoding never fails; unmapped octets become U+FFFD and unmappable characters become '?'

use std::collections::HashMap;
use std::sync::OnceLock;

pub(super) const REPLACEMENT: char = '\u{FFFD}';

const GSM7_ESCAPE: u8 = 0x1B;

/// GSM 03.38 default alphabet, indexed by septet value.
#[rustfmt::skip]
const GSM7_BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1B}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

/// Extension table reached through the 0x1B escape.
const GSM7_EXTENSION: [(u8, char); 10] = [
    (0x0A, '\u{0C}'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

fn gsm7_reverse() -> &'static HashMap<char, (u8, bool)> {
    static TABLE: OnceLock<HashMap<char, (u8, bool)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::with_capacity(GSM7_BASIC.len() + GSM7_EXTENSION.len());
        for (septet, &ch) in GSM7_BASIC.iter().enumerate() {
            if septet as u8 != GSM7_ESCAPE {
                map.insert(ch, (septet as u8, false));
            }
        }
        for &(septet, ch) in GSM7_EXTENSION.iter() {
            map.insert(ch, (septet, true));
        }
        map
    })
}

pub(super) fn is_gsm7_extension(ch: char) -> bool {
    matches!(gsm7_reverse().get(&ch), Some((_, true)))
}

/// Unpacked GSM 7-bit: one septet per octet, extension characters escaped.
pub(super) fn gsm7_encode(text: &str) -> Vec<u8> {
    let table = gsm7_reverse();
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        match table.get(&ch) {
            Some(&(septet, true)) => {
                out.push(GSM7_ESCAPE);
                out.push(septet);
            }
            Some(&(septet, false)) => out.push(septet),
            None => out.push(b'?'),
        }
    }
    out
}

pub(super) fn gsm7_decode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(byte) = iter.next() {
        if byte == GSM7_ESCAPE {
            let ext = iter.next().and_then(|next| {
                GSM7_EXTENSION
                    .iter()
                    .find(|(septet, _)| *septet == next)
                    .map(|(_, ch)| *ch)
            });
            out.push(ext.unwrap_or(REPLACEMENT));
        } else if byte < 0x80 {
            out.push(GSM7_BASIC[byte as usize]);
        } else {
            out.push(REPLACEMENT);
        }
    }
    out
}

/// An ISO-8859 part: octets below 0xA1 are shared with Latin-1, the upper
/// range is described by a mapping function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Iso8859 {
    Latin1,
    Cyrillic,
    Hebrew,
    Arabic,
}

impl Iso8859 {
    pub(super) fn decode_byte(self, byte: u8) -> Option<char> {
        if byte < 0xA1 {
            return Some(byte as char);
        }
        let b = byte as u32;
        let code = match self {
            Iso8859::Latin1 => Some(b),
            Iso8859::Cyrillic => match byte {
                0xAD => Some(0x00AD),
                0xF0 => Some(0x2116),
                0xFD => Some(0x00A7),
                0xA1..=0xFF => Some(b - 0xA0 + 0x0400),
                _ => None,
            },
            Iso8859::Hebrew => match byte {
                0xAA => Some(0x00D7),
                0xBA => Some(0x00F7),
                0xA2..=0xBE => Some(b),
                0xDF => Some(0x2017),
                0xE0..=0xFA => Some(b - 0xE0 + 0x05D0),
                0xFD => Some(0x200E),
                0xFE => Some(0x200F),
                _ => None,
            },
            Iso8859::Arabic => match byte {
                0xA4 | 0xAD => Some(b),
                0xAC => Some(0x060C),
                0xBB => Some(0x061B),
                0xBF => Some(0x061F),
                0xC1..=0xDA => Some(b - 0xC1 + 0x0621),
                0xE0..=0xF2 => Some(b - 0xE0 + 0x0640),
                _ => None,
            },
        };
        code.and_then(char::from_u32)
    }

    fn reverse(self) -> &'static HashMap<char, u8> {
        static LATIN1: OnceLock<HashMap<char, u8>> = OnceLock::new();
        static CYRILLIC: OnceLock<HashMap<char, u8>> = OnceLock::new();
        static HEBREW: OnceLock<HashMap<char, u8>> = OnceLock::new();
        static ARABIC: OnceLock<HashMap<char, u8>> = OnceLock::new();

        let cell = match self {
            Iso8859::Latin1 => &LATIN1,
            Iso8859::Cyrillic => &CYRILLIC,
            Iso8859::Hebrew => &HEBREW,
            Iso8859::Arabic => &ARABIC,
        };
        cell.get_or_init(|| {
            (0..=u8::MAX)
                .filter_map(|byte| self.decode_byte(byte).map(|ch| (ch, byte)))
                .collect()
        })
    }

    pub(super) fn encode(self, text: &str) -> Vec<u8> {
        let table = self.reverse();
        text.chars()
            .map(|ch| table.get(&ch).copied().unwrap_or(b'?'))
            .collect()
    }

    pub(super) fn decode(self, bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|&byte| self.decode_byte(byte).unwrap_or(REPLACEMENT))
            .collect()
    }
}

pub(super) fn ucs2_encode(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|unit| unit.to_be_bytes()).collect()
}

pub(super) fn ucs2_decode(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let mut text = String::from_utf16_lossy(&units);
    if bytes.len() % 2 == 1 {
        text.push(REPLACEMENT);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gsm7_extension_uses_escape() {
        assert_eq!(gsm7_encode("€["), vec![0x1B, 0x65, 0x1B, 0x3C]);
        assert_eq!(gsm7_decode(&[0x1B, 0x65, 0x41]), "€A");
    }

    #[test]
    fn gsm7_unmappable_and_invalid() {
        assert_eq!(gsm7_encode("Ж"), vec![b'?']);
        assert_eq!(gsm7_decode(&[0x80, 0x1B]), "\u{FFFD}\u{FFFD}");
        assert_eq!(gsm7_decode(&[0x00, 0x02]), "@$");
    }

    #[test]
    fn cyrillic_table() {
        assert_eq!(Iso8859::Cyrillic.decode_byte(0xB0), Some('А'));
        assert_eq!(Iso8859::Cyrillic.decode_byte(0xEF), Some('я'));
        assert_eq!(Iso8859::Cyrillic.decode_byte(0xF0), Some('№'));
        assert_eq!(Iso8859::Cyrillic.encode("Привет"), vec![0xBF, 0xE0, 0xD8, 0xD2, 0xD5, 0xE2]);
    }

    #[test]
    fn hebrew_and_arabic_gaps() {
        assert_eq!(Iso8859::Hebrew.decode_byte(0xE0), Some('א'));
        assert_eq!(Iso8859::Hebrew.decode_byte(0xC0), None);
        assert_eq!(Iso8859::Arabic.decode_byte(0xC7), Some('ا'));
        assert_eq!(Iso8859::Arabic.decode_byte(0xA1), None);
        assert_eq!(Iso8859::Arabic.decode(&[0xA1]), "\u{FFFD}");
    }

    #[test]
    fn ucs2_odd_length() {
        assert_eq!(ucs2_decode(&[0x00, 0x41, 0x00]), "A\u{FFFD}");
        assert_eq!(ucs2_encode("A😀").len(), 6);
    }
}
