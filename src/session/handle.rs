// ABOUTME: A bound SMPP session running as a reader task, a writer task and a bounded worker pool
// ABOUTME: Correlates responses to requests by sequence number and tears everything down on close

use super::handler::InboundHandler;
use super::state::{SessionStateManager, session_key};
use super::wait_for_signal;
use crate::config::SessionSettings;
use crate::connection::{Connection, FrameReader, FrameWriter};
use crate::datatypes::{
    BindType, CommandId, CommandStatus, EnquireLink, GenericNack, Unbind,
};
use crate::error::{SmppError, SmppResult};
use crate::frame::Frame;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Highest sequence number a request may carry.
const MAX_SEQUENCE: u32 = 0x7FFF_FFFF;

/// Everything a new session needs besides its socket.
#[derive(Clone)]
pub struct SessionContext {
    pub states: Arc<SessionStateManager>,
    pub handler: Arc<dyn InboundHandler>,
    pub settings: SessionSettings,
}

/// Cheap, cloneable reference to a live session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

struct Inner {
    key: String,
    connection_id: String,
    bind_type: BindType,
    peer_addr: Option<SocketAddr>,
    sequence: AtomicU32,
    outbound: mpsc::Sender<Bytes>,
    pending: Mutex<HashMap<u32, oneshot::Sender<Frame>>>,
    last_activity: Mutex<Instant>,
    closed: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    states: Weak<SessionStateManager>,
    settings: SessionSettings,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("key", &self.inner.key)
            .field("peer_addr", &self.inner.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionHandle {
    /// Take over a connection whose bind handshake already succeeded.
    ///
    /// `last_sequence` is the highest sequence number this side has used so
    /// far, so the first request goes out with the next one.
    pub fn spawn(
        connection: Connection,
        connection_id: &str,
        bind_type: BindType,
        last_sequence: u32,
        context: &SessionContext,
    ) -> SessionHandle {
        let peer_addr = connection.peer_addr().ok();
        let (reader, writer) = connection.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(context.settings.queue_capacity.max(1));
        let (closed, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);

        let handle = SessionHandle {
            inner: Arc::new(Inner {
                key: session_key(connection_id, bind_type),
                connection_id: connection_id.to_string(),
                bind_type,
                peer_addr,
                sequence: AtomicU32::new(last_sequence.min(MAX_SEQUENCE)),
                outbound: outbound_tx,
                pending: Mutex::new(HashMap::new()),
                last_activity: Mutex::new(Instant::now()),
                closed,
                shutdown,
                tasks: Mutex::new(Vec::with_capacity(2)),
                states: Arc::downgrade(&context.states),
                settings: context.settings.clone(),
            }),
        };

        let writer_task = tokio::spawn(run_writer(
            handle.clone(),
            writer,
            outbound_rx,
            handle.inner.shutdown.subscribe(),
        ));
        let reader_task = tokio::spawn(run_reader(
            handle.clone(),
            reader,
            context.handler.clone(),
            handle.inner.shutdown.subscribe(),
        ));
        lock(&handle.inner.tasks).extend([writer_task, reader_task]);

        info!(
            session = %handle.inner.key,
            peer = ?handle.inner.peer_addr,
            "session started"
        );
        handle
    }

    /// Registry key: connection id plus role.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    pub fn bind_type(&self) -> BindType {
        self.inner.bind_type
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    pub fn ptr_eq(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn states(&self) -> Option<Arc<SessionStateManager>> {
        self.inner.states.upgrade()
    }

    /// Allocate the next request sequence number, wrapping back to 1.
    pub fn next_sequence(&self) -> u32 {
        let previous = self
            .inner
            .sequence
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(if current >= MAX_SEQUENCE { 1 } else { current + 1 })
            })
            .unwrap_or(0);
        if previous >= MAX_SEQUENCE {
            1
        } else {
            previous + 1
        }
    }

    /// Time since the last frame was read or written.
    pub fn idle_for(&self) -> Duration {
        lock(&self.inner.last_activity).elapsed()
    }

    fn touch(&self) {
        *lock(&self.inner.last_activity) = Instant::now();
        if let Some(states) = self.inner.states.upgrade() {
            states.touch(&self.inner.key);
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<Frame>>> {
        lock(&self.inner.pending)
    }

    pub fn pending_requests(&self) -> usize {
        self.pending().len()
    }

    /// Send a request and wait for its response.
    ///
    /// A fresh sequence number is assigned. A generic_nack for the request
    /// comes back as `SmppError::Protocol`; other statuses are left for the
    /// caller to inspect.
    pub async fn request(&self, mut frame: Frame, timeout: Duration) -> SmppResult<Frame> {
        if self.is_closed() {
            return Err(SmppError::ConnectionClosed);
        }

        let sequence_number = self.next_sequence();
        frame.set_sequence_number(sequence_number);
        let bytes = frame.to_bytes()?;

        let (tx, rx) = oneshot::channel();
        self.pending().insert(sequence_number, tx);
        if self.is_closed() {
            self.pending().remove(&sequence_number);
            return Err(SmppError::ConnectionClosed);
        }

        debug!(
            session = %self.inner.key,
            sequence_number,
            command = ?frame.command_id(),
            "sending request"
        );

        let exchange = async {
            self.inner
                .outbound
                .send(bytes)
                .await
                .map_err(|_| SmppError::ConnectionClosed)?;
            rx.await.map_err(|_| SmppError::ConnectionClosed)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(Frame::GenericNack(nack))) => Err(SmppError::Protocol(nack.command_status)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                self.pending().remove(&sequence_number);
                Err(err)
            }
            Err(_) => {
                self.pending().remove(&sequence_number);
                debug!(session = %self.inner.key, sequence_number, "request timed out");
                Err(SmppError::Timeout)
            }
        }
    }

    /// Queue a response (or any frame whose sequence number is already set).
    pub async fn send_response(&self, frame: Frame) -> SmppResult<()> {
        let bytes = frame.to_bytes()?;
        self.inner
            .outbound
            .send(bytes)
            .await
            .map_err(|_| SmppError::ConnectionClosed)
    }

    /// Probe the peer; returns the round-trip time.
    pub async fn enquire_link(&self, timeout: Duration) -> SmppResult<Duration> {
        let started = Instant::now();
        let response = self
            .request(Frame::EnquireLink(EnquireLink::new(0)), timeout)
            .await?;
        expect_response(&response, CommandId::EnquireLinkResp)?;
        Ok(started.elapsed())
    }

    /// Send unbind, wait for unbind_resp, then close the session.
    pub async fn unbind(&self, timeout: Duration) -> SmppResult<()> {
        if let Some(states) = self.inner.states.upgrade() {
            states.update_state(&self.inner.key, super::SessionState::Unbinding);
        }
        let result = self
            .request(Frame::Unbind(Unbind::new(0)), timeout)
            .await
            .and_then(|response| expect_response(&response, CommandId::UnbindResp));
        self.close();
        result
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once the session has closed.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        wait_for_signal(&mut closed).await;
    }

    /// Ask the session to stop. Frames already queued are still written.
    pub fn close(&self) {
        self.inner.shutdown.send_replace(true);
    }

    /// Close and wait up to `grace` for the session tasks, then abort them.
    pub async fn shutdown(&self, grace: Duration) {
        self.close();
        let tasks: Vec<JoinHandle<()>> = lock(&self.inner.tasks).drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!(session = %self.inner.key, "session task did not stop in time, aborting");
                task.abort();
            }
        }
    }

    fn complete(&self, frame: Frame) {
        let sequence_number = frame.sequence_number();
        match self.pending().remove(&sequence_number) {
            Some(waiter) => {
                let _ = waiter.send(frame);
            }
            None => debug!(
                session = %self.inner.key,
                sequence_number,
                command = ?frame.command_id(),
                "dropping unsolicited response"
            ),
        }
    }

    /// Runs once, when the reader stops.
    async fn finish(&self, mut workers: JoinSet<()>) {
        self.inner.closed.send_replace(true);
        let abandoned: Vec<_> = self.pending().drain().collect();
        if !abandoned.is_empty() {
            debug!(session = %self.inner.key, count = abandoned.len(), "failing pending requests");
        }
        drop(abandoned);
        self.inner.shutdown.send_replace(true);

        if let Some(states) = self.inner.states.upgrade() {
            states.mark_closed(&self.inner.key, self);
        }

        let drain = async { while workers.join_next().await.is_some() {} };
        if tokio::time::timeout(self.inner.settings.worker_shutdown_timeout(), drain)
            .await
            .is_err()
        {
            warn!(session = %self.inner.key, "workers still busy, aborting them");
            workers.abort_all();
        }
        info!(session = %self.inner.key, "session finished");
    }
}

/// Check that `response` is the expected type and carries status OK.
pub fn expect_response(response: &Frame, expected: CommandId) -> SmppResult<()> {
    if response.command_id() != expected {
        return Err(SmppError::UnexpectedPdu {
            expected: format!("{expected:?}"),
            actual: format!("{:?}", response.command_id()),
        });
    }
    match response.command_status() {
        CommandStatus::Ok => Ok(()),
        status => Err(SmppError::Protocol(status)),
    }
}

async fn run_writer(
    session: SessionHandle,
    mut writer: FrameWriter,
    mut outbound: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            pdu = outbound.recv() => {
                let Some(pdu) = pdu else { break };
                if let Err(err) = writer.write_pdu(&pdu).await {
                    warn!(session = %session.key(), %err, "write failed");
                    session.close();
                    return;
                }
                session.touch();
            }
            _ = wait_for_signal(&mut shutdown) => {
                outbound.close();
                while let Some(pdu) = outbound.recv().await {
                    if writer.write_pdu(&pdu).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}

async fn run_reader(
    session: SessionHandle,
    mut reader: FrameReader,
    handler: Arc<dyn InboundHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(session.inner.settings.worker_pool_size.max(1)));
    let mut workers = JoinSet::new();

    loop {
        let frame = tokio::select! {
            _ = wait_for_signal(&mut shutdown) => break,
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                if let Err(err) = joined {
                    if err.is_panic() {
                        warn!(session = %session.key(), "inbound handler panicked");
                    }
                }
                continue;
            }
            read = reader.read_frame() => match read {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!(session = %session.key(), "peer closed the connection");
                    break;
                }
                Err(err) => {
                    warn!(session = %session.key(), %err, "read failed");
                    break;
                }
            },
        };
        session.touch();

        if let Frame::Malformed {
            sequence_number,
            status,
        } = frame
        {
            let nack = Frame::GenericNack(GenericNack::new(status, sequence_number));
            if session.send_response(nack).await.is_err() {
                break;
            }
            continue;
        }

        if frame.is_response() {
            session.complete(frame);
            continue;
        }

        debug!(
            session = %session.key(),
            sequence_number = frame.sequence_number(),
            command = ?frame.command_id(),
            "request received"
        );

        let permit = tokio::select! {
            _ = wait_for_signal(&mut shutdown) => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let handler = handler.clone();
        let worker_session = session.clone();
        workers.spawn(async move {
            let _permit = permit;
            handler.handle(&worker_session, frame).await;
        });
    }

    session.finish(workers).await;
}
