use num_enum::TryFromPrimitive;

/// SMPP v3.4 command identifiers.
///
/// Every standard identifier is listed so that PDUs the simulator does not
/// model still decode (as `Frame::Unknown`) instead of tearing down the
/// session. Response identifiers are the request identifier with the high
/// bit set.
#[derive(TryFromPrimitive)]
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommandId {
    GenericNack = 0x8000_0000,
    BindReceiver = 0x0000_0001,
    BindReceiverResp = 0x8000_0001,
    BindTransmitter = 0x0000_0002,
    BindTransmitterResp = 0x8000_0002,
    QuerySm = 0x0000_0003,
    QuerySmResp = 0x8000_0003,
    SubmitSm = 0x0000_0004,
    SubmitSmResp = 0x8000_0004,
    DeliverSm = 0x0000_0005,
    DeliverSmResp = 0x8000_0005,
    Unbind = 0x0000_0006,
    UnbindResp = 0x8000_0006,
    ReplaceSm = 0x0000_0007,
    ReplaceSmResp = 0x8000_0007,
    CancelSm = 0x0000_0008,
    CancelSmResp = 0x8000_0008,
    BindTransceiver = 0x0000_0009,
    BindTransceiverResp = 0x8000_0009,
    Outbind = 0x0000_000B,
    EnquireLink = 0x0000_0015,
    EnquireLinkResp = 0x8000_0015,
    SubmitMulti = 0x0000_0021,
    SubmitMultiResp = 0x8000_0021,
    AlertNotification = 0x0000_0102,
    DataSm = 0x0000_0103,
    DataSmResp = 0x8000_0103,
}

impl CommandId {
    /// Check if this command_id represents a response PDU
    pub fn is_response(&self) -> bool {
        (*self as u32) & 0x8000_0000 != 0
    }

    /// True for the three bind requests.
    pub fn is_bind(&self) -> bool {
        matches!(
            self,
            CommandId::BindTransmitter | CommandId::BindReceiver | CommandId::BindTransceiver
        )
    }

    /// The response identifier paired with this request, if it has one.
    ///
    /// `generic_nack`, `outbind` and `alert_notification` have no response.
    pub fn response_id(&self) -> Option<CommandId> {
        if self.is_response() {
            return None;
        }
        CommandId::try_from((*self as u32) | 0x8000_0000).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_bit() {
        assert!(!CommandId::EnquireLink.is_response());
        assert!(CommandId::EnquireLinkResp.is_response());
        assert!(CommandId::GenericNack.is_response());
    }

    #[test]
    fn response_pairs() {
        assert_eq!(
            CommandId::SubmitSm.response_id(),
            Some(CommandId::SubmitSmResp)
        );
        assert_eq!(
            CommandId::BindTransceiver.response_id(),
            Some(CommandId::BindTransceiverResp)
        );
        assert_eq!(CommandId::Outbind.response_id(), None);
        assert_eq!(CommandId::SubmitSmResp.response_id(), None);
    }

    #[test]
    fn unknown_raw_value_rejected() {
        assert!(CommandId::try_from(0x0000_000Au32).is_err());
    }
}
