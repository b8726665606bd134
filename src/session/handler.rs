// ABOUTME: Answers inbound requests on a bound session: keep-alive, unbind, deliver_sm and submit_sm
// ABOUTME: Decodes and reassembles message bodies, feeds the message cache and sends automatic receipts

use super::handle::{SessionHandle, expect_response};
use crate::cache::{Direction, MessageCache, MessageRecord};
use crate::concatenation::{
    ConcatenationType, ReassemblyKey, ReassemblyOutcome, Reassembler, extract_part,
    text_base_reference,
};
use crate::config::{ConnectionConfig, ConnectionMode, SessionSettings};
use crate::datatypes::{
    BindResponse, CommandId, CommandStatus, DeliverSm, DeliverSmResponse, EnquireLinkResponse,
    EsmClass, GenericNack, SubmitSm, SubmitSmResponse, Tlv, UnbindResponse,
};
use crate::encoding::Encoding;
use crate::frame::Frame;
use crate::receipt::{DeliveryReceipt, MessageState};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Called on a worker task for every request PDU a session receives.
/// The handler writes its own responses through `session`.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, session: &SessionHandle, frame: Frame);
}

const MAX_MESSAGE_ID: u32 = 999_999;

/// Issues zero-padded six digit message ids, wrapping back to 000001.
#[derive(Debug)]
pub struct MessageIdGenerator {
    counter: AtomicU32,
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self {
            counter: AtomicU32::new(1),
        }
    }
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let id = self
            .counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(if current >= MAX_MESSAGE_ID { 1 } else { current + 1 })
            })
            .unwrap_or(1);
        format!("{id:06}")
    }
}

/// Shared state every [`SimulatorHandler`] needs.
#[derive(Clone)]
pub struct HandlerResources {
    pub cache: Arc<dyn MessageCache>,
    pub reassembler: Arc<Reassembler>,
    pub message_ids: Arc<MessageIdGenerator>,
}

/// Inbound behaviour of a simulated ESME or SMSC.
pub struct SimulatorHandler {
    connection_id: String,
    mode: ConnectionMode,
    automatic_dr: Option<MessageState>,
    response_timeout: Duration,
    resources: HandlerResources,
}

/// Fields of a received submit_sm or deliver_sm body.
struct InboundBody<'a> {
    source: &'a str,
    destination: &'a str,
    esm_class: EsmClass,
    data_coding: u8,
    short_message: &'a Bytes,
    tlvs: &'a [Tlv],
}

impl SimulatorHandler {
    pub fn new(
        config: &ConnectionConfig,
        settings: &SessionSettings,
        resources: HandlerResources,
    ) -> Self {
        let automatic_dr = config.automatic_dr_status().map(|status| {
            status.parse().unwrap_or_else(|err| {
                warn!(connection_id = %config.id, %err, "unknown automatic_dr status, using DELIVRD");
                MessageState::Delivered
            })
        });
        Self {
            connection_id: config.id.clone(),
            mode: config.mode,
            automatic_dr,
            response_timeout: settings.response_timeout(),
            resources,
        }
    }

    async fn respond(&self, session: &SessionHandle, frame: Frame) {
        if let Err(err) = session.send_response(frame).await {
            debug!(session = %session.key(), %err, "could not queue response");
        }
    }

    async fn on_deliver_sm(&self, session: &SessionHandle, pdu: DeliverSm) {
        let sequence_number = pdu.sequence_number;
        let states = session.states();

        if !session.bind_type().can_receive() {
            if let Some(states) = &states {
                states.increment_errors(session.key());
            }
            let response = DeliverSmResponse::error(sequence_number, CommandStatus::IncorrectBindStatus);
            self.respond(session, Frame::DeliverSmResp(response)).await;
            return;
        }
        if let Some(states) = &states {
            states.increment_received(session.key());
        }

        if pdu.esm_class.is_delivery_receipt() {
            self.on_receipt(&pdu);
        } else {
            let message_id = self.resources.message_ids.next_id();
            self.accept_message(
                &message_id,
                &InboundBody {
                    source: &pdu.source_addr,
                    destination: &pdu.destination_addr,
                    esm_class: pdu.esm_class,
                    data_coding: pdu.data_coding,
                    short_message: &pdu.short_message,
                    tlvs: &pdu.optional_parameters,
                },
            );
        }

        let response = DeliverSmResponse::new(sequence_number, "");
        self.respond(session, Frame::DeliverSmResp(response)).await;
    }

    fn on_receipt(&self, pdu: &DeliverSm) {
        let Some(receipt) = DeliveryReceipt::from_deliver_sm(pdu) else {
            warn!(connection_id = %self.connection_id, "delivery receipt without a message id");
            return;
        };

        if self.resources.cache.record_receipt(&receipt) {
            info!(
                connection_id = %self.connection_id,
                message_id = %receipt.message_id,
                stat = %receipt.stat,
                "delivery receipt correlated"
            );
        } else {
            debug!(message_id = %receipt.message_id, "receipt for a message not in the cache");
        }

        let mut record = MessageRecord::new(
            format!("dr-{}", receipt.message_id),
            &self.connection_id,
            Direction::Inbound,
            &pdu.source_addr,
            &pdu.destination_addr,
            receipt.to_string(),
        );
        record.status = Some(receipt.stat.clone());
        record.receipt_time = Some(Utc::now());
        self.resources.cache.put(record);
    }

    async fn on_submit_sm(&self, session: &SessionHandle, pdu: SubmitSm) {
        let sequence_number = pdu.sequence_number;
        let states = session.states();

        if !session.bind_type().can_submit() {
            if let Some(states) = &states {
                states.increment_errors(session.key());
            }
            let response = SubmitSmResponse::error(sequence_number, CommandStatus::IncorrectBindStatus);
            self.respond(session, Frame::SubmitSmResp(response)).await;
            return;
        }
        if let Some(states) = &states {
            states.increment_received(session.key());
        }

        let message_id = self.resources.message_ids.next_id();
        let text = self.accept_message(
            &message_id,
            &InboundBody {
                source: &pdu.source_addr,
                destination: &pdu.destination_addr,
                esm_class: pdu.esm_class,
                data_coding: pdu.data_coding,
                short_message: &pdu.short_message,
                tlvs: &pdu.optional_parameters,
            },
        );

        let response = SubmitSmResponse::new(sequence_number, message_id.clone());
        self.respond(session, Frame::SubmitSmResp(response)).await;

        let Some(state) = self.automatic_dr else {
            return;
        };
        if pdu.registered_delivery & 0x01 == 0 {
            return;
        }
        if !session.bind_type().can_receive() {
            debug!(
                session = %session.key(),
                message_id = %message_id,
                "receipt requested but the session cannot receive"
            );
            return;
        }

        let receipt = DeliveryReceipt::new(&message_id, state, Utc::now(), &text);
        let frame = Frame::DeliverSm(Box::new(receipt.to_deliver_sm(&pdu)));
        // Sent from its own task so it never holds a worker permit while
        // the reader waits to route the deliver_sm_resp.
        let session = session.clone();
        let timeout = self.response_timeout;
        tokio::spawn(async move {
            let outcome = session
                .request(frame, timeout)
                .await
                .and_then(|response| expect_response(&response, CommandId::DeliverSmResp));
            match outcome {
                Ok(()) => {
                    if let Some(states) = session.states() {
                        states.increment_sent(session.key());
                    }
                    debug!(session = %session.key(), message_id = %message_id, "receipt delivered");
                }
                Err(err) => {
                    if let Some(states) = session.states() {
                        states.increment_errors(session.key());
                    }
                    warn!(session = %session.key(), message_id = %message_id, %err, "receipt not acknowledged");
                }
            }
        });
    }

    /// Decode one body, reassembling when it is part of a longer message.
    /// Returns the text of this body.
    fn accept_message(&self, message_id: &str, body: &InboundBody<'_>) -> String {
        let part = extract_part(body.esm_class, body.data_coding, body.short_message, body.tlvs);
        let declared = Encoding::from_data_coding(body.data_coding);
        if part.encoding != declared {
            warn!(
                connection_id = %self.connection_id,
                declared = %declared,
                detected = %part.encoding,
                "inbound encoding corrected"
            );
        }

        let mut record = MessageRecord::new(
            message_id,
            &self.connection_id,
            Direction::Inbound,
            body.source,
            body.destination,
            part.text.clone(),
        );
        record.encoding = part.encoding.name().to_string();
        record.declared_encoding = declared.name().to_string();
        record.encoding_corrected = part.encoding != declared;
        record.confidence = part.confidence;

        let Some(info) = part.concat.filter(|_| !part.is_complete()) else {
            self.resources.cache.put(record);
            return part.text;
        };

        let reference = match info.method {
            ConcatenationType::TextBase => {
                text_base_reference(body.source, body.destination, info.total)
            }
            _ => info.reference,
        };
        let key = ReassemblyKey::new(body.source, body.destination, reference);
        match self
            .resources
            .reassembler
            .add_part(key, info, part.text.clone())
        {
            ReassemblyOutcome::Complete { text, total } => {
                info!(
                    connection_id = %self.connection_id,
                    reference,
                    total,
                    method = %info.method,
                    "concatenated message complete"
                );
                record.text = text;
                record.concatenation = Some(info.method);
                record.total_parts = total;
                record.reference = Some(reference);
                self.resources.cache.put(record);
            }
            ReassemblyOutcome::Incomplete { received, total } => {
                debug!(reference, part = info.part, received, total, "stored message part");
            }
            ReassemblyOutcome::Duplicate { .. } => {
                debug!(reference, part = info.part, "duplicate message part ignored");
            }
        }
        part.text
    }
}

#[async_trait]
impl InboundHandler for SimulatorHandler {
    async fn handle(&self, session: &SessionHandle, frame: Frame) {
        let sequence_number = frame.sequence_number();
        match frame {
            Frame::EnquireLink(_) => {
                let response = EnquireLinkResponse::new(sequence_number);
                self.respond(session, Frame::EnquireLinkResp(response)).await;
            }
            Frame::Unbind(_) => {
                info!(session = %session.key(), "peer requested unbind");
                if let Some(states) = session.states() {
                    states.update_state(session.key(), super::SessionState::Unbinding);
                }
                let response = UnbindResponse::new(sequence_number);
                self.respond(session, Frame::UnbindResp(response)).await;
                session.close();
            }
            Frame::Bind(bind) => {
                warn!(session = %session.key(), "bind received on a bound session");
                let response = BindResponse::error(
                    sequence_number,
                    bind.bind_type,
                    CommandStatus::AlreadyBoundState,
                );
                self.respond(session, Frame::BindResp(response)).await;
            }
            Frame::DeliverSm(pdu) => self.on_deliver_sm(session, *pdu).await,
            Frame::SubmitSm(pdu) if self.mode == ConnectionMode::Smsc => {
                self.on_submit_sm(session, *pdu).await
            }
            other => {
                debug!(
                    session = %session.key(),
                    command = ?other.command_id(),
                    "unsupported request"
                );
                let nack = GenericNack::invalid_command_id(sequence_number);
                self.respond(session, Frame::GenericNack(nack)).await;
            }
        }
    }
}
