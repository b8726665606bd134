mod bind;
mod command_id;
mod command_status;
mod deliver_sm;
mod enquire_link;
mod esm_class;
mod generic_nack;
mod submit_sm;
mod tlv;
mod unbind;

pub use bind::{
    BindRequest, BindResponse, BindType, BindValidationError, INTERFACE_VERSION_34,
    MAX_PASSWORD_LENGTH, MAX_SYSTEM_ID_LENGTH,
};
pub use command_id::CommandId;
pub use command_status::CommandStatus;
pub use deliver_sm::{DeliverSm, DeliverSmResponse};
pub use enquire_link::{EnquireLink, EnquireLinkResponse};
pub use esm_class::EsmClass;
pub use generic_nack::GenericNack;
pub use submit_sm::{MAX_SHORT_MESSAGE_LEN, SubmitSm, SubmitSmResponse};
pub use tlv::{Tlv, decode_tlvs, find_tlv, tags};
pub use unbind::{Unbind, UnbindResponse};
