// ABOUTME: SMPP optional parameter (tag, length, value) encoding and the tag registry used by the simulator
// ABOUTME: Provides typed constructors and accessors so PDU code never hand-packs TLV bytes

use crate::codec::{CodecError, decode_bytes, decode_u16};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::Cursor;

/// Tags of the optional parameters the simulator reads or writes.
pub mod tags {
    pub const RECEIPTED_MESSAGE_ID: u16 = 0x001E;
    pub const SAR_MSG_REF_NUM: u16 = 0x020C;
    pub const SAR_TOTAL_SEGMENTS: u16 = 0x020E;
    pub const SAR_SEGMENT_SEQNUM: u16 = 0x020F;
    pub const NETWORK_ERROR_CODE: u16 = 0x0423;
    pub const MESSAGE_PAYLOAD: u16 = 0x0424;
    pub const MESSAGE_STATE: u16 = 0x0427;

    // Simulator specific tags in the vendor range
    pub const OWNER: u16 = 0x1926;
    pub const MESSAGE_ID: u16 = 0x1927;
    pub const MESSAGE_TIME: u16 = 0x1928;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tlv {
    /// Uniquely identifies the optional parameter.
    pub tag: u16,

    /// The parameter value. The wire length field is derived from it.
    pub value: Bytes,
}

impl Tlv {
    /// Octets of tag plus length ahead of the value.
    pub const HEADER_SIZE: usize = 4;

    pub fn new(tag: u16, value: impl Into<Bytes>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    pub fn u8(tag: u16, value: u8) -> Self {
        Self::new(tag, vec![value])
    }

    pub fn u16(tag: u16, value: u16) -> Self {
        Self::new(tag, value.to_be_bytes().to_vec())
    }

    pub fn u32(tag: u16, value: u32) -> Self {
        Self::new(tag, value.to_be_bytes().to_vec())
    }

    /// A NUL-terminated string value, as receipted_message_id expects.
    pub fn cstring(tag: u16, value: &str) -> Self {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        Self::new(tag, bytes)
    }

    pub fn length(&self) -> u16 {
        self.value.len() as u16
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self.value.as_ref() {
            [value] => Some(*value),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self.value.as_ref() {
            [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
            // Some peers send 8-bit references in a 16-bit tag
            [value] => Some(*value as u16),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.value.as_ref().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// The value as text with any trailing NUL removed.
    pub fn as_cstring(&self) -> String {
        let raw = self.value.as_ref();
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        if self.value.len() > u16::MAX as usize {
            return Err(CodecError::TlvError(format!(
                "value of tag {:#06x} is {} octets, limit is {}",
                self.tag,
                self.value.len(),
                u16::MAX
            )));
        }
        buf.put_u16(self.tag);
        buf.put_u16(self.length());
        buf.put_slice(&self.value);
        Ok(())
    }

    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.value.len()
    }

    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let tag = decode_u16(buf)?;
        let length = decode_u16(buf)? as usize;
        let value = decode_bytes(buf, length).map_err(|_| {
            CodecError::TlvError(format!(
                "tag {tag:#06x} declares {length} octets beyond the end of the PDU"
            ))
        })?;
        Ok(Self { tag, value })
    }
}

/// Find the first parameter with `tag`.
pub fn find_tlv(tlvs: &[Tlv], tag: u16) -> Option<&Tlv> {
    tlvs.iter().find(|tlv| tlv.tag == tag)
}

/// Decode TLVs until the cursor is exhausted.
pub fn decode_tlvs(buf: &mut Cursor<&[u8]>) -> Result<Vec<Tlv>, CodecError> {
    use bytes::Buf;

    let mut tlvs = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 4 {
            return Err(CodecError::TlvError(format!(
                "{} stray octets where a TLV header was expected",
                buf.remaining()
            )));
        }
        tlvs.push(Tlv::decode(buf)?);
    }
    Ok(tlvs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_tag_length_value() {
        let mut buf = BytesMut::new();
        Tlv::u16(tags::SAR_MSG_REF_NUM, 0x1234)
            .encode(&mut buf)
            .unwrap();
        assert_eq!(buf.as_ref(), &[0x02, 0x0C, 0x00, 0x02, 0x12, 0x34]);
    }

    #[test]
    fn decodes_sequence() {
        let mut buf = BytesMut::new();
        Tlv::u8(tags::SAR_TOTAL_SEGMENTS, 3).encode(&mut buf).unwrap();
        Tlv::cstring(tags::RECEIPTED_MESSAGE_ID, "000042")
            .encode(&mut buf)
            .unwrap();

        let mut cursor = Cursor::new(buf.as_ref());
        let tlvs = decode_tlvs(&mut cursor).unwrap();
        assert_eq!(tlvs.len(), 2);
        assert_eq!(find_tlv(&tlvs, tags::SAR_TOTAL_SEGMENTS).and_then(Tlv::as_u8), Some(3));
        assert_eq!(
            find_tlv(&tlvs, tags::RECEIPTED_MESSAGE_ID).map(Tlv::as_cstring),
            Some("000042".to_string())
        );
    }

    #[test]
    fn truncated_value_is_an_error() {
        let data: &[u8] = &[0x04, 0x24, 0x00, 0x10, 0x41];
        let mut cursor = Cursor::new(data);
        assert!(matches!(decode_tlvs(&mut cursor), Err(CodecError::TlvError(_))));
    }

    #[test]
    fn typed_accessors() {
        assert_eq!(Tlv::u32(tags::OWNER, 7).as_u32(), Some(7));
        assert_eq!(Tlv::u8(tags::SAR_MSG_REF_NUM, 9).as_u16(), Some(9));
        assert_eq!(Tlv::new(tags::OWNER, vec![1, 2, 3]).as_u32(), None);
    }
}
