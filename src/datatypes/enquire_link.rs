use crate::datatypes::{CommandId, CommandStatus};
use crate::macros::impl_complete_header_only_pdu;

/// Keep-alive probe. Either side may send it at any time after bind; the
/// peer must answer with enquire_link_resp carrying the same sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct EnquireLink {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnquireLinkResponse {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
}

impl_complete_header_only_pdu!(EnquireLink, CommandId::EnquireLink);
impl_complete_header_only_pdu!(EnquireLinkResponse, CommandId::EnquireLinkResp);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decodable, Encodable, PduHeader};
    use std::io::Cursor;

    #[test]
    fn enquire_link_wire_bytes() {
        let bytes = EnquireLink::new(1).to_bytes().unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[
                0x00, 0x00, 0x00, 0x10, //
                0x00, 0x00, 0x00, 0x15, //
                0x00, 0x00, 0x00, 0x00, //
                0x00, 0x00, 0x00, 0x01,
            ]
        );
    }

    #[test]
    fn response_roundtrip_keeps_status() {
        let original = EnquireLinkResponse::error(123, CommandStatus::SystemError);
        let bytes = original.to_bytes().unwrap();

        let mut cursor = Cursor::new(bytes.as_ref());
        let header = PduHeader::decode(&mut cursor).unwrap();
        let decoded = EnquireLinkResponse::decode(header, &mut cursor).unwrap();

        assert_eq!(original, decoded);
    }
}
