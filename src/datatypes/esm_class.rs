// ABOUTME: SMPP esm_class bitfield as a transparent newtype over the wire octet
// ABOUTME: Exposes the UDHI and delivery-receipt bits the simulator relies on

use std::fmt;

/// ESM (External Short Message) class octet.
///
/// Bits 1-0 select the messaging mode, bits 5-2 the message type and bits
/// 7-6 the GSM network features. Only the bits the simulator reads or writes
/// get named accessors; the raw value is always preserved.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EsmClass(u8);

impl EsmClass {
    /// User Data Header Indicator (GSM feature bit 6)
    pub const UDHI: u8 = 0x40;
    /// Message type: SMSC delivery receipt
    pub const DELIVERY_RECEIPT: u8 = 0x04;
    /// Message type mask (bits 5-2)
    pub const TYPE_MASK: u8 = 0x3C;

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }

    pub fn has_udhi(&self) -> bool {
        self.0 & Self::UDHI != 0
    }

    pub fn with_udhi(self) -> Self {
        Self(self.0 | Self::UDHI)
    }

    pub fn is_delivery_receipt(&self) -> bool {
        self.0 & Self::TYPE_MASK == Self::DELIVERY_RECEIPT
    }

    pub fn delivery_receipt() -> Self {
        Self(Self::DELIVERY_RECEIPT)
    }
}

impl From<u8> for EsmClass {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<EsmClass> for u8 {
    fn from(value: EsmClass) -> Self {
        value.0
    }
}

impl fmt::Debug for EsmClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EsmClass({:#04x}", self.0)?;
        if self.has_udhi() {
            write!(f, ", udhi")?;
        }
        if self.is_delivery_receipt() {
            write!(f, ", receipt")?;
        }
        write!(f, ")")
    }
}
