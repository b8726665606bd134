//! Connection managers.
//!
//! A [`ConnectionManager`] owns the session of one logical connection role:
//! [`EsmeManager`] binds out to a peer and keeps the binding alive,
//! [`SmscManager`] listens and accepts binds. Both send through the same
//! split, provider and wire path.

mod esme;
mod smsc;

pub use esme::EsmeManager;
pub use smsc::SmscManager;

use crate::cache::{Direction, MessageRecord};
use crate::codec::CodecError;
use crate::concatenation::{ConcatenationEngine, ConcatenationType, MessagePart, apply_to_wire};
use crate::config::{ConnectionConfig, MonitoringSettings, SessionSettings};
use crate::datatypes::{CommandId, DeliverSm, SubmitSm};
use crate::error::{SmppError, SmppResult};
use crate::frame::Frame;
use crate::registry::ProviderHandler;
use crate::session::{HandlerResources, SessionHandle, SessionStateManager, expect_response};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle of a manager as seen by operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    Starting,
    Bound,
    /// The last bind attempt failed; reconnection may still succeed
    BindingFailed,
    /// Every reconnection attempt failed. Only stop/start leaves this state.
    PermanentlyFailed,
    Stopped,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ManagerState::Starting => "STARTING",
            ManagerState::Bound => "BOUND",
            ManagerState::BindingFailed => "BINDING_FAILED",
            ManagerState::PermanentlyFailed => "PERMANENTLY_FAILED",
            ManagerState::Stopped => "STOPPED",
        })
    }
}

/// One message to send, before splitting.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SmsRequest {
    pub source: String,
    pub destination: String,
    pub text: String,
    /// Overrides the connection's configured encoding
    pub encoding: Option<String>,
    /// Overrides the connection's configured concatenation method
    pub concatenation: Option<ConcatenationType>,
    pub registered_delivery: bool,
    /// Free-form values for provider handlers
    pub params: BTreeMap<String, String>,
}

impl SmsRequest {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn concatenation(mut self, method: ConcatenationType) -> Self {
        self.concatenation = Some(method);
        self
    }

    /// Request a delivery receipt
    pub fn with_delivery_receipt(mut self) -> Self {
        self.registered_delivery = true;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one send call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SendResult {
    pub success: bool,
    pub parts_sent: usize,
    pub total_parts: usize,
    /// Peer-assigned ids of the parts that were accepted, in order
    pub message_ids: Vec<String>,
    pub error: Option<String>,
}

impl SendResult {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Some but not all parts went out.
    pub fn is_partial(&self) -> bool {
        self.parts_sent > 0 && self.parts_sent < self.total_parts
    }
}

/// Operations shared by ESME and SMSC managers.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    async fn start(&self) -> SmppResult<()>;

    async fn stop(&self);

    /// Split and send `request`. With `send_all_parts` false only the first
    /// part goes out.
    async fn send(&self, request: &SmsRequest, send_all_parts: bool) -> SendResult;

    fn is_bound(&self) -> bool;

    /// Whether `send` is possible in this manager's role at all.
    fn can_send(&self) -> bool;

    fn connection_id(&self) -> &str;

    /// Identifies this manager in logs and reports. Unique per simulator.
    fn key(&self) -> &str;

    fn connection_name(&self) -> &str;

    fn state(&self) -> ManagerState;

    fn subscribe(&self) -> watch::Receiver<ManagerState>;
}

/// Shared collaborators handed to every manager.
#[derive(Clone)]
pub struct ManagerContext {
    pub states: Arc<SessionStateManager>,
    pub engine: Arc<ConcatenationEngine>,
    pub resources: HandlerResources,
    pub provider: Arc<dyn ProviderHandler>,
    pub session: SessionSettings,
    pub monitoring: MonitoringSettings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PduKind {
    SubmitSm,
    DeliverSm,
}

impl PduKind {
    fn response_id(&self) -> CommandId {
        match self {
            PduKind::SubmitSm => CommandId::SubmitSmResp,
            PduKind::DeliverSm => CommandId::DeliverSmResp,
        }
    }
}

/// Result of [`send_parts`]; `transport_error` tells the caller to drop
/// the session.
pub(crate) struct Delivery {
    pub result: SendResult,
    pub transport_error: bool,
}

fn build_frame(kind: PduKind, request: &SmsRequest, part: &MessagePart, provider: &dyn ProviderHandler) -> Frame {
    let mut wire = apply_to_wire(part);
    provider.prepare_submit(request, &mut wire.tlvs);
    match kind {
        PduKind::SubmitSm => {
            let pdu = SubmitSm::new(&request.source, &request.destination)
                .registered_delivery(u8::from(request.registered_delivery));
            Frame::SubmitSm(Box::new(wire.apply_to_submit(pdu)))
        }
        PduKind::DeliverSm => {
            let pdu = DeliverSm::new(&request.source, &request.destination);
            Frame::DeliverSm(Box::new(wire.apply_to_deliver(pdu)))
        }
    }
}

/// Fail before sending when the encoded PDU would exceed what a peer accepts.
fn check_frame_size(frame: &Frame) -> SmppResult<()> {
    match frame.to_bytes() {
        Ok(_) => Ok(()),
        Err(CodecError::InvalidPduLength { length, max, .. }) => Err(SmppError::PayloadTooLarge {
            size: length as usize,
            max: max as usize,
        }),
        Err(err) => Err(err.into()),
    }
}

fn response_message_id(response: &Frame) -> Option<String> {
    let id = match response {
        Frame::SubmitSmResp(resp) => &resp.message_id,
        Frame::DeliverSmResp(resp) => &resp.message_id,
        _ => return None,
    };
    (!id.is_empty()).then(|| id.clone())
}

/// Split `request` and send each part over `session`, awaiting every
/// response before the next part.
pub(crate) async fn send_parts(
    context: &ManagerContext,
    config: &ConnectionConfig,
    session: &SessionHandle,
    request: &SmsRequest,
    send_all_parts: bool,
    kind: PduKind,
) -> Delivery {
    let method = request.concatenation.unwrap_or(config.concatenation);
    let encoding = request.encoding.as_deref().unwrap_or(&config.encoding);

    let parts = match context.engine.split(&request.text, encoding, method) {
        Ok(parts) if parts.is_empty() => {
            return Delivery {
                result: SendResult::failed("message text is empty"),
                transport_error: false,
            };
        }
        Ok(parts) => parts,
        Err(err) => {
            warn!(connection_id = %config.id, %err, "could not split message");
            return Delivery {
                result: SendResult::failed(err.to_string()),
                transport_error: false,
            };
        }
    };

    let total_parts = parts.len();
    let to_send = if send_all_parts { total_parts } else { 1 };
    let mut result = SendResult {
        total_parts,
        ..Default::default()
    };

    let frames: SmppResult<Vec<Frame>> = parts
        .iter()
        .take(to_send)
        .map(|part| {
            let frame = build_frame(kind, request, part, context.provider.as_ref());
            check_frame_size(&frame)?;
            Ok(frame)
        })
        .collect();
    let frames = match frames {
        Ok(frames) => frames,
        Err(err) => {
            warn!(connection_id = %config.id, %err, "message cannot be put on the wire");
            result.error = Some(err.to_string());
            return Delivery {
                result,
                transport_error: false,
            };
        }
    };

    for (part, frame) in parts.iter().zip(frames) {
        let outcome = session
            .request(frame, context.session.response_timeout())
            .await
            .and_then(|response| {
                expect_response(&response, kind.response_id())?;
                Ok(response)
            });

        match outcome {
            Ok(response) => {
                let message_id = response_message_id(&response)
                    .unwrap_or_else(|| context.resources.message_ids.next_id());
                context.states.increment_sent(session.key());
                context.resources.cache.put(outbound_record(
                    &message_id,
                    config,
                    request,
                    encoding,
                    part,
                ));
                debug!(
                    session = %session.key(),
                    %message_id,
                    part = part.part_number,
                    total = part.total_parts,
                    "part accepted"
                );
                result.message_ids.push(message_id);
                result.parts_sent += 1;
            }
            Err(err) => {
                context.states.increment_errors(session.key());
                let transport_error = err.is_transport();
                warn!(
                    session = %session.key(),
                    part = part.part_number,
                    total = part.total_parts,
                    %err,
                    "send failed"
                );
                result.error = Some(describe_failure(&err));
                return Delivery {
                    result,
                    transport_error,
                };
            }
        }
    }

    result.success = true;
    info!(
        session = %session.key(),
        parts = result.parts_sent,
        total = total_parts,
        method = method.name(),
        "message sent"
    );
    Delivery {
        result,
        transport_error: false,
    }
}

fn describe_failure(err: &SmppError) -> String {
    match err.command_status() {
        Some(status) => format!("rejected by peer: {status:?}"),
        None => err.to_string(),
    }
}

fn outbound_record(
    message_id: &str,
    config: &ConnectionConfig,
    request: &SmsRequest,
    requested_encoding: &str,
    part: &MessagePart,
) -> MessageRecord {
    let mut record = MessageRecord::new(
        message_id,
        &config.id,
        Direction::Outbound,
        &request.source,
        &request.destination,
        &part.text,
    );
    record.encoding = part.encoding.name().to_string();
    record.declared_encoding = requested_encoding.to_string();
    record.encoding_corrected = part.encoding_corrected;
    record.concatenation = Some(part.method);
    record.total_parts = part.total_parts;
    if part.is_multipart() {
        record.part_number = Some(part.part_number);
        record.reference = Some(part.reference);
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::{Tlv, tags};
    use crate::encoding::Encoding;
    use crate::registry::CustomTlvProvider;

    fn part(text: &str) -> MessagePart {
        MessagePart {
            text: text.to_string(),
            encoding: Encoding::Gsm7,
            part_number: 1,
            total_parts: 1,
            reference: 0,
            method: ConcatenationType::Default,
            udh: None,
            encoding_corrected: false,
        }
    }

    #[test]
    fn send_result_partial() {
        let mut result = SendResult {
            total_parts: 3,
            parts_sent: 1,
            ..Default::default()
        };
        assert!(result.is_partial());
        result.parts_sent = 3;
        assert!(!result.is_partial());
        assert!(!SendResult::failed("nope").is_partial());
    }

    #[test]
    fn submit_frame_carries_request_fields_and_provider_tlvs() {
        let request = SmsRequest::new("1000", "2000", "hi")
            .with_delivery_receipt()
            .param("owner", "7");
        let frame = build_frame(PduKind::SubmitSm, &request, &part("hi"), &CustomTlvProvider);
        let Frame::SubmitSm(pdu) = frame else {
            panic!("expected submit_sm");
        };
        assert_eq!(pdu.source_addr, "1000");
        assert_eq!(pdu.destination_addr, "2000");
        assert_eq!(pdu.registered_delivery, 1);
        assert_eq!(&pdu.short_message[..], b"hi");
        assert_eq!(pdu.tlv(tags::OWNER), Some(&Tlv::u32(tags::OWNER, 7)));
    }

    #[test]
    fn provider_tlvs_can_push_a_frame_over_the_limit() {
        let engine = ConcatenationEngine::new();
        let text = "p".repeat(crate::concatenation::MAX_PAYLOAD_SIZE);
        let parts = engine.split(&text, "GSM7", ConcatenationType::Payload).unwrap();

        let request = SmsRequest::new("1000", "2000", &text);
        let frame = build_frame(PduKind::SubmitSm, &request, &parts[0], &crate::registry::DefaultProvider);
        assert!(check_frame_size(&frame).is_ok());

        let request = request.param("0x1500", "x".repeat(100));
        let frame = build_frame(PduKind::SubmitSm, &request, &parts[0], &CustomTlvProvider);
        assert!(matches!(
            check_frame_size(&frame),
            Err(SmppError::PayloadTooLarge { max: 65536, .. })
        ));
    }

    #[test]
    fn deliver_frame_for_smsc_side() {
        let request = SmsRequest::new("1000", "2000", "hi");
        let frame = build_frame(PduKind::DeliverSm, &request, &part("hi"), &crate::registry::DefaultProvider);
        assert_eq!(frame.command_id(), CommandId::DeliverSm);
    }

    #[test]
    fn outbound_record_tracks_parts() {
        let config = ConnectionConfig {
            id: "c1".into(),
            ..Default::default()
        };
        let request = SmsRequest::new("1000", "2000", "ignored");
        let mut multipart = part("second");
        multipart.part_number = 2;
        multipart.total_parts = 3;
        multipart.reference = 42;
        multipart.method = ConcatenationType::Udhi;

        let record = outbound_record("000009", &config, &request, "GSM7", &multipart);
        assert_eq!(record.message_id, "000009");
        assert_eq!(record.connection_id, "c1");
        assert_eq!(record.direction, Direction::Outbound);
        assert_eq!(record.part_number, Some(2));
        assert_eq!(record.reference, Some(42));
        assert_eq!(record.text, "second");
    }
}
