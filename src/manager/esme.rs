// ABOUTME: ESME-side connection manager: connects out, binds, submits and keeps the binding alive
// ABOUTME: Bind failures and dropped sessions hand over to the monitor's reconnect loop

use super::{ConnectionManager, ManagerContext, ManagerState, PduKind, SendResult, SmsRequest, send_parts};
use crate::config::{ConnectionConfig, EndpointConfig};
use crate::connection::Connection;
use crate::datatypes::{BindRequest, BindType, CommandStatus};
use crate::error::{SmppError, SmppResult};
use crate::frame::Frame;
use crate::monitor::{ConnectionMonitor, MonitorHandle, MonitorMetrics, MonitoredSession};
use crate::session::{InboundHandler, SessionContext, SessionHandle, SessionState, session_key};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Sequence number of the bind request; the session continues after it.
const BIND_SEQUENCE: u32 = 1;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Binds one role (TX, RX or TRX) of a connection to a remote SMSC.
pub struct EsmeManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    endpoint: EndpointConfig,
    bind_type: BindType,
    key: String,
    context: ManagerContext,
    handler: Arc<dyn InboundHandler>,
    state: watch::Sender<ManagerState>,
    session: Mutex<Option<SessionHandle>>,
    monitor: Mutex<Option<ConnectionMonitor<Link>>>,
    monitor_handle: Mutex<Option<MonitorHandle>>,
    stopping: AtomicBool,
}

/// What the monitor holds. Weak, so the monitor's tasks never keep a
/// dropped manager alive.
struct Link {
    inner: Weak<Inner>,
    name: String,
}

impl EsmeManager {
    pub fn new(
        config: ConnectionConfig,
        bind_type: BindType,
        endpoint: EndpointConfig,
        context: ManagerContext,
        handler: Arc<dyn InboundHandler>,
    ) -> Self {
        let (state, _) = watch::channel(ManagerState::Stopped);
        Self {
            inner: Arc::new(Inner {
                key: session_key(&config.id, bind_type),
                config,
                endpoint,
                bind_type,
                context,
                handler,
                state,
                session: Mutex::new(None),
                monitor: Mutex::new(None),
                monitor_handle: Mutex::new(None),
                stopping: AtomicBool::new(false),
            }),
        }
    }

    pub fn bind_type(&self) -> BindType {
        self.inner.bind_type
    }

    /// Key the session is registered under, e.g. `smsc-a/transceiver`
    pub fn session_key(&self) -> &str {
        &self.inner.key
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.inner.current_session()
    }

    pub fn monitor_metrics(&self) -> Option<MonitorMetrics> {
        lock(&self.inner.monitor).as_ref().map(ConnectionMonitor::metrics)
    }

    fn trigger_reconnect(&self) {
        let monitor = lock(&self.inner.monitor).clone();
        if let Some(monitor) = monitor {
            monitor.trigger_reconnect();
        }
    }
}

impl Inner {
    fn current_session(&self) -> Option<SessionHandle> {
        lock(&self.session)
            .as_ref()
            .filter(|session| !session.is_closed())
            .cloned()
    }

    fn set_state(&self, state: ManagerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(session = %self.key, from = %previous, to = %state, "manager state changed");
        }
    }

    fn session_bound(&self) -> bool {
        *self.state.borrow() == ManagerState::Bound && self.current_session().is_some()
    }

    async fn connect_and_bind(&self) -> SmppResult<SessionHandle> {
        let settings = &self.context.session;
        let bind_timeout = settings.bind_timeout();
        let address = self.endpoint.address();

        let bind = BindRequest::new(
            BIND_SEQUENCE,
            self.bind_type,
            &self.endpoint.system_id,
            &self.endpoint.password,
        )
        .with_system_type(&self.endpoint.system_type);
        bind.validate()
            .map_err(|err| SmppError::InvalidData(err.to_string()))?;

        let stream = tokio::time::timeout(bind_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| SmppError::Timeout)??;
        let mut connection = Connection::new(stream);

        connection.write_frame(&Frame::Bind(bind)).await?;
        let response = tokio::time::timeout(bind_timeout, connection.read_frame())
            .await
            .map_err(|_| SmppError::Timeout)??
            .ok_or(SmppError::ConnectionClosed)?;

        match response {
            Frame::BindResp(resp) if resp.command_status == CommandStatus::Ok => {}
            Frame::BindResp(resp) => return Err(SmppError::Protocol(resp.command_status)),
            Frame::GenericNack(nack) => return Err(SmppError::Protocol(nack.command_status)),
            other => {
                return Err(SmppError::UnexpectedPdu {
                    expected: format!("{:?}", self.bind_type.response_command_id()),
                    actual: format!("{:?}", other.command_id()),
                });
            }
        }

        let context = SessionContext {
            states: self.context.states.clone(),
            handler: self.handler.clone(),
            settings: settings.clone(),
        };
        Ok(SessionHandle::spawn(
            connection,
            &self.config.id,
            self.bind_type,
            BIND_SEQUENCE,
            &context,
        ))
    }

    /// Retire any previous session, then bind a new one.
    async fn establish(&self) -> SmppResult<()> {
        let previous = lock(&self.session).take();
        if let Some(previous) = previous {
            previous
                .shutdown(self.context.session.worker_shutdown_timeout())
                .await;
        }

        self.context.states.update_state(&self.key, SessionState::Binding);
        match self.connect_and_bind().await {
            Ok(session) => {
                if self.stopping.load(Ordering::SeqCst) {
                    session.shutdown(self.context.session.worker_shutdown_timeout()).await;
                    return Err(SmppError::InvalidState("manager stopped while binding".into()));
                }
                self.context.states.register(&self.key, session.clone());
                *lock(&self.session) = Some(session);
                self.set_state(ManagerState::Bound);
                info!(
                    session = %self.key,
                    address = %self.endpoint.address(),
                    system_id = %self.endpoint.system_id,
                    "bound"
                );
                Ok(())
            }
            Err(err) => {
                self.context.states.update_state(&self.key, SessionState::Failed);
                if *self.state.borrow() != ManagerState::PermanentlyFailed {
                    self.set_state(ManagerState::BindingFailed);
                }
                match err.command_status() {
                    Some(status) if status.is_authentication_failure() => {
                        error!(session = %self.key, %err, "bind rejected, check credentials")
                    }
                    _ => warn!(session = %self.key, %err, "bind failed"),
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl MonitoredSession for Link {
    fn monitor_name(&self) -> String {
        self.name.clone()
    }

    fn is_bound(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.session_bound())
    }

    fn idle_for(&self) -> Option<Duration> {
        let inner = self.inner.upgrade()?;
        inner.current_session().map(|session| session.idle_for())
    }

    async fn probe(&self, timeout: Duration) -> SmppResult<Duration> {
        let session = self
            .inner
            .upgrade()
            .and_then(|inner| inner.current_session())
            .ok_or(SmppError::ConnectionClosed)?;
        session.enquire_link(timeout).await
    }

    async fn reconnect(&self) -> SmppResult<()> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| SmppError::InvalidState("manager dropped".into()))?;
        inner.establish().await
    }

    fn reconnect_allowed(&self) -> bool {
        self.inner.upgrade().is_some_and(|inner| {
            !inner.stopping.load(Ordering::SeqCst)
                && !matches!(
                    *inner.state.borrow(),
                    ManagerState::PermanentlyFailed | ManagerState::Stopped
                )
        })
    }

    fn on_reconnect_exhausted(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.context.states.update_state(&inner.key, SessionState::Failed);
            inner.set_state(ManagerState::PermanentlyFailed);
        }
    }
}

#[async_trait]
impl ConnectionManager for EsmeManager {
    /// Bind and start monitoring. When the first bind fails the error is
    /// returned and the reconnect loop keeps trying in the background.
    async fn start(&self) -> SmppResult<()> {
        if lock(&self.inner.monitor_handle).is_some() {
            return if self.inner.session_bound() {
                Ok(())
            } else {
                Err(SmppError::InvalidState(format!("{} is already starting", self.inner.key)))
            };
        }

        self.inner.stopping.store(false, Ordering::SeqCst);
        self.inner.set_state(ManagerState::Starting);

        let link = Arc::new(Link {
            inner: Arc::downgrade(&self.inner),
            name: self.inner.key.clone(),
        });
        let monitor = ConnectionMonitor::new(link, &self.inner.context.monitoring);
        *lock(&self.inner.monitor) = Some(monitor.clone());

        let result = self.inner.establish().await;
        *lock(&self.inner.monitor_handle) = Some(monitor.start());
        if result.is_err() {
            monitor.trigger_reconnect();
        }
        result
    }

    async fn stop(&self) {
        let inner = &self.inner;
        inner.stopping.store(true, Ordering::SeqCst);

        let handle = lock(&inner.monitor_handle).take();
        if let Some(handle) = handle {
            handle.stop(inner.context.session.worker_shutdown_timeout()).await;
        }
        lock(&inner.monitor).take();

        let session = lock(&inner.session).take();
        if let Some(session) = session {
            if !session.is_closed() {
                if let Err(err) = session.unbind(inner.context.session.unbind_grace()).await {
                    warn!(session = %inner.key, %err, "unbind failed, closing anyway");
                }
            }
            session
                .shutdown(inner.context.session.worker_shutdown_timeout())
                .await;
        }

        inner.context.states.unregister(&inner.key);
        inner.set_state(ManagerState::Stopped);
    }

    async fn send(&self, request: &SmsRequest, send_all_parts: bool) -> SendResult {
        if !self.inner.bind_type.can_submit() {
            return SendResult::failed(format!(
                "{} is bound as receiver and cannot submit",
                self.inner.key
            ));
        }
        let Some(session) = self.inner.current_session() else {
            return SendResult::failed(format!("{} is not bound", self.inner.key));
        };

        let delivery = send_parts(
            &self.inner.context,
            &self.inner.config,
            &session,
            request,
            send_all_parts,
            PduKind::SubmitSm,
        )
        .await;

        if delivery.transport_error {
            warn!(session = %self.inner.key, "transport failure during send, reconnecting");
            session.close();
            self.trigger_reconnect();
        }
        delivery.result
    }

    fn is_bound(&self) -> bool {
        self.inner.session_bound()
    }

    fn can_send(&self) -> bool {
        self.inner.bind_type.can_submit()
    }

    fn connection_id(&self) -> &str {
        &self.inner.config.id
    }

    fn key(&self) -> &str {
        &self.inner.key
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
    use crate::config::{MonitoringSettings, SessionSettings};
    use crate::registry::DefaultProvider;
    use crate::session::{HandlerResources, MessageIdGenerator, SessionStateManager, SimulatorHandler};

    fn manager(port: u16, bind_type: BindType) -> EsmeManager {
        let monitoring = MonitoringSettings {
            auto_reconnect: false,
            ..Default::default()
        };
        manager_with(port, bind_type, monitoring)
    }

    fn manager_with(port: u16, bind_type: BindType, monitoring: MonitoringSettings) -> EsmeManager {
        let endpoint = EndpointConfig {
            port,
            system_id: "esme".into(),
            password: "pw".into(),
            ..Default::default()
        };
        let config = ConnectionConfig {
            id: "c1".into(),
            transceiver: Some(endpoint.clone()),
            ..Default::default()
        };
        let resources = HandlerResources {
            cache: Arc::new(InMemoryMessageCache::new()),
            reassembler: Arc::new(Reassembler::new()),
            message_ids: Arc::new(MessageIdGenerator::new()),
        };
        let session = SessionSettings {
            bind_timeout_ms: 200,
            unbind_grace_ms: 200,
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
            monitoring,
        };
        EsmeManager::new(config, bind_type, endpoint, context, handler)
    }

    fn unused_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .map(|addr| addr.port())
            .unwrap()
    }

    #[tokio::test]
    async fn refused_connection_leaves_binding_failed() {
        let manager = manager(unused_port(), BindType::Transceiver);
        let err = manager.start().await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
        assert_eq!(manager.state(), ManagerState::BindingFailed);
        assert!(!manager.is_bound());
        assert_eq!(
            manager.inner.context.states.state(manager.session_key()),
            SessionState::Failed
        );

        manager.stop().await;
        assert_eq!(manager.state(), ManagerState::Stopped);
    }

    #[tokio::test]
    async fn receiver_cannot_send() {
        let manager = manager(unused_port(), BindType::Receiver);
        assert!(!manager.can_send());
        let result = manager.send(&SmsRequest::new("1", "2", "hi"), true).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("receiver"));
    }

    #[tokio::test]
    async fn send_without_session_fails() {
        let manager = manager(unused_port(), BindType::Transmitter);
        let result = manager.send(&SmsRequest::new("1", "2", "hi"), true).await;
        assert!(!result.success);
        assert_eq!(result.parts_sent, 0);
    }

    /// Accepts one ESME, accepts its bind and answers unbind.
    async fn accept_one(listener: tokio::net::TcpListener) {
        use crate::datatypes::{BindResponse, UnbindResponse};

        let (socket, _) = listener.accept().await.unwrap();
        let mut connection = Connection::new(socket);
        while let Ok(Some(frame)) = connection.read_frame().await {
            let reply = match frame {
                Frame::Bind(bind) => Frame::BindResp(BindResponse::new(
                    bind.sequence_number,
                    bind.bind_type,
                    "smsc",
                )),
                Frame::Unbind(unbind) => {
                    Frame::UnbindResp(UnbindResponse::new(unbind.sequence_number))
                }
                _ => continue,
            };
            if connection.write_frame(&reply).await.is_err() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn exhausted_retries_fail_permanently_until_restarted() {
        let port = unused_port();
        let monitoring = MonitoringSettings {
            reconnect_initial_delay_ms: 20,
            reconnect_multiplier: 1.0,
            reconnect_max_delay_ms: 20,
            reconnect_max_attempts: 3,
            enquire_link_interval_ms: 60_000,
            health_check_interval_ms: 60_000,
            ..Default::default()
        };
        let manager = manager_with(port, BindType::Transceiver, monitoring);
        let mut states = manager.subscribe();

        assert!(manager.start().await.is_err());
        assert_eq!(manager.state(), ManagerState::BindingFailed);

        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|state| *state == ManagerState::PermanentlyFailed),
        )
        .await
        .expect("retries never ran out")
        .unwrap();
        assert_eq!(manager.monitor_metrics().unwrap().reconnect_attempts, 3);
        assert!(!manager.is_bound());

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let peer = tokio::spawn(accept_one(listener));

        manager.stop().await;
        assert_eq!(manager.state(), ManagerState::Stopped);
        manager.start().await.unwrap();
        assert_eq!(manager.state(), ManagerState::Bound);
        assert!(manager.is_bound());

        manager.stop().await;
        assert_eq!(manager.state(), ManagerState::Stopped);
        tokio::time::timeout(Duration::from_secs(2), peer)
            .await
            .expect("peer never saw the connection close")
            .unwrap();
    }
}
