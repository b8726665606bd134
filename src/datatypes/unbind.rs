use crate::datatypes::{CommandId, CommandStatus};
use crate::macros::impl_complete_header_only_pdu;

/// Deregisters the session. After sending or answering unbind neither side
/// may issue further application PDUs and the TCP connection is closed.
#[derive(Clone, Debug, PartialEq)]
pub struct Unbind {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnbindResponse {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
}

impl_complete_header_only_pdu!(Unbind, CommandId::Unbind);
impl_complete_header_only_pdu!(UnbindResponse, CommandId::UnbindResp);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, Decodable, Encodable, PduHeader};
    use std::io::Cursor;

    #[test]
    fn unbind_roundtrip() {
        let original = Unbind::new(123);
        let bytes = original.to_bytes().unwrap();

        let mut cursor = Cursor::new(bytes.as_ref());
        let header = PduHeader::decode(&mut cursor).unwrap();
        assert_eq!(Unbind::decode(header, &mut cursor).unwrap(), original);
    }

    #[test]
    fn header_only_pdu_rejects_body() {
        let mut bytes = UnbindResponse::new(5).to_bytes().unwrap().to_vec();
        bytes.push(0xFF);
        bytes[3] = 17;

        let mut cursor = Cursor::new(bytes.as_slice());
        let header = PduHeader::decode(&mut cursor).unwrap();
        assert!(matches!(
            UnbindResponse::decode(header, &mut cursor),
            Err(CodecError::FieldValidation { .. })
        ));
    }
}
