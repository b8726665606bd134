//! Multi-part message handling.
//!
//! Outbound, [`ConcatenationEngine::split`] cuts text into [`MessagePart`]s
//! and [`apply_to_wire`] turns each part into PDU fields. Inbound,
//! [`extract_part`] reads one PDU body back and [`Reassembler`] joins the
//! parts of a concatenated message.
//!
//! | Method        | Framing                           | Part capacity (7-bit / UCS2) |
//! |---------------|-----------------------------------|------------------------------|
//! | `Udhi`        | UDH in short_message, esm 0x40    | 153 / 67                     |
//! | `Sar`         | sar_* TLVs                        | 159 / 69                     |
//! | `Payload`     | message_payload TLV, no splitting | up to 64KB                   |
//! | `UdhiPayload` | UDH inside message_payload        | 153 / 67                     |
//! | `TextBase`    | "N/M " text prefix                | 152 / 62                     |

mod engine;
mod extract;
mod reassembly;
mod types;

pub use engine::{
    ConcatenationEngine, MAX_PARTS, MAX_PAYLOAD_SIZE, PAYLOAD_THRESHOLD, apply_to_wire, build_udh,
    text_reference,
};
pub use extract::{UserDataHeader, extract_part, parse_udh, text_base_reference};
pub use reassembly::{ExpiredMessage, ReassemblyKey, ReassemblyOutcome, Reassembler};
pub use types::{ConcatInfo, ConcatenationType, ExtractedPart, MessagePart, WireSegment};
