// ABOUTME: SMSC-side connection manager: listens, authenticates binds and serves the bound sessions
// ABOUTME: Sends deliver_sm to the bound ESME through the same split and provider path as the ESME side

use super::{ConnectionManager, ManagerContext, ManagerState, PduKind, SendResult, SmsRequest, send_parts};
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::datatypes::{BindRequest, BindResponse, BindType, CommandStatus, GenericNack};
use crate::error::{SmppError, SmppResult};
use crate::frame::Frame;
use crate::session::{InboundHandler, SessionContext, SessionHandle, session_key, wait_for_signal};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Last word to a peer that is about to be dropped. The peer may already be
/// gone, so failures are only logged.
async fn reply_before_close(connection: &mut Connection, frame: Frame, peer: SocketAddr) {
    let command = frame.command_id();
    if let Err(err) = connection.write_frame(&frame).await {
        debug!(%peer, ?command, %err, "could not send reply before closing");
    }
}

/// Accepts ESME binds on the connection's configured port.
pub struct SmscManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    port: u16,
    context: ManagerContext,
    handler: Arc<dyn InboundHandler>,
    state: watch::Sender<ManagerState>,
    shutdown: watch::Sender<bool>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    sessions: Mutex<Vec<SessionHandle>>,
}

impl SmscManager {
    pub fn new(
        config: ConnectionConfig,
        context: ManagerContext,
        handler: Arc<dyn InboundHandler>,
    ) -> Self {
        let port = config
            .endpoints()
            .first()
            .map_or(0, |(_, endpoint)| endpoint.port);
        let (state, _) = watch::channel(ManagerState::Stopped);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                port,
                context,
                handler,
                state,
                shutdown,
                listener_task: Mutex::new(None),
                local_addr: Mutex::new(None),
                sessions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.local_addr)
    }

    /// Live sessions accepted by this listener.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        let mut sessions = lock(&self.inner.sessions);
        sessions.retain(|session| !session.is_closed());
        sessions.clone()
    }
}

impl Inner {
    fn set_state(&self, state: ManagerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(connection_id = %self.config.id, from = %previous, to = %state, "manager state changed");
        }
    }

    /// Check a bind against the configured credentials for its role.
    fn authenticate(&self, bind: &BindRequest) -> Result<&str, CommandStatus> {
        let Some(expected) = self.config.credentials_for(bind.bind_type) else {
            return Err(CommandStatus::BindFailed);
        };
        if bind.system_id != expected.system_id {
            return Err(CommandStatus::InvalidSystemId);
        }
        if bind.password != expected.password {
            return Err(CommandStatus::InvalidPassword);
        }
        Ok(&expected.system_id)
    }

    /// The session deliver_sm should go to: a transceiver first, then a
    /// receiver.
    fn delivery_session(&self) -> Option<SessionHandle> {
        [BindType::Transceiver, BindType::Receiver]
            .into_iter()
            .filter_map(|bind_type| {
                self.context
                    .states
                    .handle(&session_key(&self.config.id, bind_type))
            })
            .find(|session| !session.is_closed())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        let mut handshakes = JoinSet::new();

        loop {
            tokio::select! {
                _ = wait_for_signal(&mut shutdown) => break,
                Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        debug!(connection_id = %self.config.id, %peer, "accepted connection");
                        handshakes.spawn(self.clone().handshake(socket, peer));
                    }
                    Err(err) => {
                        warn!(connection_id = %self.config.id, %err, "accept failed");
                    }
                },
            }
        }

        handshakes.shutdown().await;
        debug!(connection_id = %self.config.id, "listener stopped");
    }

    /// Wait for the bind, answer it, and hand an accepted connection over
    /// to a session.
    async fn handshake(self: Arc<Self>, socket: TcpStream, peer: SocketAddr) {
        let mut connection = Connection::new(socket);
        let first = tokio::time::timeout(
            self.context.session.bind_timeout(),
            connection.read_frame(),
        )
        .await;

        let bind = match first {
            Ok(Ok(Some(Frame::Bind(bind)))) => bind,
            Ok(Ok(Some(Frame::Malformed { sequence_number, status }))) => {
                let nack = GenericNack::new(status, sequence_number);
                reply_before_close(&mut connection, Frame::GenericNack(nack), peer).await;
                return;
            }
            Ok(Ok(Some(frame))) => {
                warn!(%peer, command = ?frame.command_id(), "expected a bind");
                if !frame.is_response() {
                    let nack = GenericNack::new(
                        CommandStatus::IncorrectBindStatus,
                        frame.sequence_number(),
                    );
                    reply_before_close(&mut connection, Frame::GenericNack(nack), peer).await;
                }
                return;
            }
            Ok(Ok(None)) => {
                debug!(%peer, "closed before binding");
                return;
            }
            Ok(Err(err)) => {
                debug!(%peer, %err, "read failed before binding");
                return;
            }
            Err(_) => {
                warn!(%peer, "no bind received in time");
                return;
            }
        };

        let sequence_number = bind.sequence_number;
        let bind_type = bind.bind_type;
        let response = match self.authenticate(&bind) {
            Ok(system_id) => BindResponse::new(sequence_number, bind_type, system_id),
            Err(status) => {
                warn!(
                    connection_id = %self.config.id,
                    %peer,
                    system_id = %bind.system_id,
                    ?status,
                    "bind rejected"
                );
                let response = BindResponse::error(sequence_number, bind_type, status);
                reply_before_close(&mut connection, Frame::BindResp(response), peer).await;
                return;
            }
        };
        if let Err(err) = connection.write_frame(&Frame::BindResp(response)).await {
            warn!(%peer, %err, "could not answer bind");
            return;
        }

        let context = SessionContext {
            states: self.context.states.clone(),
            handler: self.handler.clone(),
            settings: self.context.session.clone(),
        };
        let session = SessionHandle::spawn(connection, &self.config.id, bind_type, 0, &context);
        self.context.states.register(session.key(), session.clone());
        {
            let mut sessions = lock(&self.sessions);
            sessions.retain(|existing| !existing.is_closed());
            sessions.push(session);
        }
        info!(
            connection_id = %self.config.id,
            %peer,
            system_id = %bind.system_id,
            %bind_type,
            "ESME bound"
        );
    }
}

#[async_trait]
impl ConnectionManager for SmscManager {
    async fn start(&self) -> SmppResult<()> {
        let inner = &self.inner;
        if lock(&inner.listener_task).is_some() {
            return Ok(());
        }

        inner.set_state(ManagerState::Starting);
        let address = format!("0.0.0.0:{}", inner.port);
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(connection_id = %inner.config.id, %address, %err, "could not listen");
                inner.set_state(ManagerState::BindingFailed);
                return Err(SmppError::Connection(err));
            }
        };
        let local_addr = listener.local_addr()?;
        *lock(&inner.local_addr) = Some(local_addr);

        inner.shutdown.send_replace(false);
        let task = tokio::spawn(inner.clone().accept_loop(listener));
        *lock(&inner.listener_task) = Some(task);
        inner.set_state(ManagerState::Bound);
        info!(connection_id = %inner.config.id, %local_addr, "listening for binds");
        Ok(())
    }

    async fn stop(&self) {
        let inner = &self.inner;
        inner.shutdown.send_replace(true);

        let task = lock(&inner.listener_task).take();
        if let Some(mut task) = task {
            let timeout = inner.context.session.worker_shutdown_timeout();
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!(connection_id = %inner.config.id, "listener did not stop in time, aborting");
                task.abort();
            }
        }

        let sessions: Vec<SessionHandle> = lock(&inner.sessions).drain(..).collect();
        for session in sessions {
            if !session.is_closed() {
                if let Err(err) = session.unbind(inner.context.session.unbind_grace()).await {
                    debug!(session = %session.key(), %err, "unbind failed, closing anyway");
                }
            }
            session
                .shutdown(inner.context.session.worker_shutdown_timeout())
                .await;
            inner.context.states.unregister(session.key());
        }

        *lock(&inner.local_addr) = None;
        inner.set_state(ManagerState::Stopped);
    }

    async fn send(&self, request: &SmsRequest, send_all_parts: bool) -> SendResult {
        let Some(session) = self.inner.delivery_session() else {
            return SendResult::failed(format!(
                "no ESME bound to {} can receive",
                self.inner.config.id
            ));
        };

        let delivery = send_parts(
            &self.inner.context,
            &self.inner.config,
            &session,
            request,
            send_all_parts,
            PduKind::DeliverSm,
        )
        .await;
        if delivery.transport_error {
            session.close();
        }
        delivery.result
    }

    /// Whether the listener is running.
    fn is_bound(&self) -> bool {
        *self.inner.state.borrow() == ManagerState::Bound
    }

    fn can_send(&self) -> bool {
        true
    }

    fn connection_id(&self) -> &str {
        &self.inner.config.id
    }

    fn key(&self) -> &str {
        &self.inner.config.id
    }

    fn connection_name(&self) -> &str {
        self.inner.config.display_name()
    }

    fn state(&self) -> ManagerState {
        *self.inner.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ManagerState> {
        self.inner.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryMessageCache;
    use crate::concatenation::{ConcatenationEngine, Reassembler};
    use crate::config::{ConnectionMode, EndpointConfig, MonitoringSettings, SessionSettings};
    use crate::registry::DefaultProvider;
    use crate::session::{HandlerResources, MessageIdGenerator, SessionStateManager, SimulatorHandler};

    fn manager(port: u16) -> SmscManager {
        let endpoint = EndpointConfig {
            port,
            system_id: "smsc".into(),
            password: "secret".into(),
            ..Default::default()
        };
        let config = ConnectionConfig {
            id: "listener".into(),
            mode: ConnectionMode::Smsc,
            transceiver: Some(endpoint),
            ..Default::default()
        };
        let resources = HandlerResources {
            cache: Arc::new(InMemoryMessageCache::new()),
            reassembler: Arc::new(Reassembler::new()),
            message_ids: Arc::new(MessageIdGenerator::new()),
        };
        let session = SessionSettings {
            unbind_grace_ms: 100,
            worker_shutdown_timeout_ms: 200,
            ..Default::default()
        };
        let handler = Arc::new(SimulatorHandler::new(&config, &session, resources.clone()));
        let context = ManagerContext {
            states: Arc::new(SessionStateManager::new()),
            engine: Arc::new(ConcatenationEngine::new()),
            resources,
            provider: Arc::new(DefaultProvider),
            session,
            monitoring: MonitoringSettings::default(),
        };
        SmscManager::new(config, context, handler)
    }

    #[test]
    fn authenticate_checks_system_id_then_password() {
        let manager = manager(2775);
        let inner = &manager.inner;

        let good = BindRequest::new(1, BindType::Receiver, "smsc", "secret");
        assert_eq!(inner.authenticate(&good), Ok("smsc"));

        let wrong_id = BindRequest::new(1, BindType::Transmitter, "other", "secret");
        assert_eq!(inner.authenticate(&wrong_id), Err(CommandStatus::InvalidSystemId));

        let wrong_password = BindRequest::new(1, BindType::Transceiver, "smsc", "guess");
        assert_eq!(inner.authenticate(&wrong_password), Err(CommandStatus::InvalidPassword));
    }

    #[tokio::test]
    async fn listener_lifecycle() {
        let manager = manager(0);
        assert_eq!(manager.state(), ManagerState::Stopped);

        manager.start().await.unwrap();
        assert!(manager.is_bound());
        assert!(manager.local_addr().is_some());
        // Starting twice is harmless
        manager.start().await.unwrap();

        let result = manager.send(&SmsRequest::new("1", "2", "hi"), true).await;
        assert!(!result.success);
        assert!(manager.sessions().is_empty());

        manager.stop().await;
        assert_eq!(manager.state(), ManagerState::Stopped);
        assert!(manager.local_addr().is_none());
        assert!(!manager.is_bound());
    }

    #[tokio::test]
    async fn port_in_use_fails_to_start() {
        let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let manager = manager(taken.local_addr().unwrap().port());

        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, SmppError::Connection(_)));
        assert_eq!(manager.state(), ManagerState::BindingFailed);
    }

    #[tokio::test]
    async fn rejected_peers_do_not_disturb_the_listener() {
        use crate::datatypes::EnquireLink;

        let manager = manager(0);
        manager.start().await.unwrap();
        let addr = ("127.0.0.1", manager.local_addr().unwrap().port());

        // wrong password, answered with a bind_resp error
        let socket = TcpStream::connect(addr).await.unwrap();
        let mut connection = Connection::new(socket);
        let bind = BindRequest::new(1, BindType::Transceiver, "smsc", "guess");
        connection.write_frame(&Frame::Bind(bind)).await.unwrap();
        match connection.read_frame().await.unwrap() {
            Some(Frame::BindResp(resp)) => {
                assert_eq!(resp.command_status, CommandStatus::InvalidPassword)
            }
            other => panic!("expected bind_resp, got {other:?}"),
        }

        // a request before bind from a peer that hangs up straight away
        let socket = TcpStream::connect(addr).await.unwrap();
        let mut connection = Connection::new(socket);
        connection
            .write_frame(&Frame::EnquireLink(EnquireLink::new(2)))
            .await
            .unwrap();
        drop(connection);

        let socket = TcpStream::connect(addr).await.unwrap();
        let mut connection = Connection::new(socket);
        let bind = BindRequest::new(3, BindType::Transceiver, "smsc", "secret");
        connection.write_frame(&Frame::Bind(bind)).await.unwrap();
        match connection.read_frame().await.unwrap() {
            Some(Frame::BindResp(resp)) => assert_eq!(resp.command_status, CommandStatus::Ok),
            other => panic!("expected bind_resp, got {other:?}"),
        }

        manager.stop().await;
    }
}
