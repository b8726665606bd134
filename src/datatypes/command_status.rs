use num_enum::TryFromPrimitive;

/// The command_status field of an SMPP response indicates the success or
/// failure of the matching request. Requests always carry `Ok`.
#[derive(TryFromPrimitive)]
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommandStatus {
    /// No Error
    Ok = 0x0000_0000,
    /// Message Length is invalid
    InvalidMsgLength = 0x0000_0001,
    /// Command Length is invalid
    InvalidCommandLength = 0x0000_0002,
    /// Invalid Command ID
    InvalidCommandId = 0x0000_0003,
    /// Incorrect BIND Status for given command
    IncorrectBindStatus = 0x0000_0004,
    /// ESME Already in Bound State
    AlreadyBoundState = 0x0000_0005,
    InvalidPriorityFlag = 0x0000_0006,
    InvalidRegisteredDeliveryFlag = 0x0000_0007,
    /// System Error
    SystemError = 0x0000_0008,
    InvalidSourceAddress = 0x0000_000A,
    InvalidDestinationAddress = 0x0000_000B,
    InvalidMessageId = 0x0000_000C,
    /// Bind Failed
    BindFailed = 0x0000_000D,
    /// Invalid Password
    InvalidPassword = 0x0000_000E,
    /// Invalid System ID
    InvalidSystemId = 0x0000_000F,
    CancelSmFailed = 0x0000_0011,
    ReplacedSmFailed = 0x0000_0013,
    MessageQueueFull = 0x0000_0014,
    InvalidServiceType = 0x0000_0015,
    InvalidEsmClassFieldData = 0x0000_0043,
    SubmitFailed = 0x0000_0045,
    InvalidSystemTypeField = 0x0000_0053,
    ThrottlingError = 0x0000_0058,
    InvalidScheduledDeliveryTime = 0x0000_0061,
    InvalidExpiryTime = 0x0000_0062,
    ReceiverTemporaryAppError = 0x0000_0064,
    ReceiverPermanentAppError = 0x0000_0065,
    ReceiverRejectMessageError = 0x0000_0066,
    ErrorInOptionalPartofPduBody = 0x0000_00C0,
    OptionalParameterNotAllowed = 0x0000_00C1,
    InvalidParameterLength = 0x0000_00C2,
    ExpectedOptionalParameterMissing = 0x0000_00C3,
    InvalidOptionalParameterValue = 0x0000_00C4,
    DeliveryFailed = 0x0000_00FE,
    /// Unknown Error. Also stands in for vendor specific codes the
    /// simulator has no name for.
    UnknownError = 0x0000_00FF,
}

impl CommandStatus {
    pub fn is_ok(&self) -> bool {
        *self == CommandStatus::Ok
    }

    /// Statuses a peer sends when it refuses the credentials of a bind.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            CommandStatus::InvalidPassword | CommandStatus::InvalidSystemId | CommandStatus::BindFailed
        )
    }

    /// Statuses meaning the peer no longer considers the session usable,
    /// so the sender should rebind rather than retry on the same session.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, CommandStatus::IncorrectBindStatus)
    }

    /// Lenient conversion used for response headers: unknown codes map to
    /// `UnknownError` instead of failing the decode.
    pub fn from_wire(raw: u32) -> Self {
        CommandStatus::try_from(raw).unwrap_or(CommandStatus::UnknownError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_wire_mapping() {
        assert_eq!(CommandStatus::from_wire(0), CommandStatus::Ok);
        assert_eq!(CommandStatus::from_wire(0x0E), CommandStatus::InvalidPassword);
        assert_eq!(CommandStatus::from_wire(0x0400), CommandStatus::UnknownError);
    }

    #[test]
    fn classification() {
        assert!(CommandStatus::InvalidSystemId.is_authentication_failure());
        assert!(!CommandStatus::SystemError.is_authentication_failure());
        assert!(CommandStatus::IncorrectBindStatus.invalidates_session());
    }
}
