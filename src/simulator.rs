// ABOUTME: Composition root: builds managers from configuration around shared state, cache and engines
// ABOUTME: Explicit start and stop, plus lookups and send routing by connection id

use crate::cache::{Direction, MessageCache, MessageRecord};
use crate::concatenation::{ConcatenationEngine, ExpiredMessage, Reassembler};
use crate::config::{ConnectionConfig, ConnectionMode, SimulatorConfig};
use crate::manager::{
    ConnectionManager, EsmeManager, ManagerContext, SendResult, SmscManager, SmsRequest,
};
use crate::registry::ProviderRegistry;
use crate::session::{HandlerResources, MessageIdGenerator, SessionStateManager, SimulatorHandler};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What happened when the simulator started.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StartReport {
    /// Manager keys that started
    pub started: Vec<String>,
    /// Manager keys (or connection ids for invalid configuration) with the reason
    pub failed: Vec<(String, String)>,
}

impl StartReport {
    pub fn all_started(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Cleanup {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns every manager and the state they share.
pub struct Simulator {
    config: SimulatorConfig,
    states: Arc<SessionStateManager>,
    cache: Arc<dyn MessageCache>,
    reassembler: Arc<Reassembler>,
    managers: Vec<Arc<dyn ConnectionManager>>,
    rejected: Vec<(String, String)>,
    cleanup: Mutex<Option<Cleanup>>,
}

impl Simulator {
    /// Build managers for every enabled connection. Nothing touches the
    /// network until [`Simulator::start`].
    pub fn new(
        config: SimulatorConfig,
        cache: Arc<dyn MessageCache>,
        registry: ProviderRegistry,
    ) -> Self {
        let states = Arc::new(SessionStateManager::new());
        let engine = Arc::new(ConcatenationEngine::new());
        let reassembler = Arc::new(Reassembler::new());
        let resources = HandlerResources {
            cache: cache.clone(),
            reassembler: reassembler.clone(),
            message_ids: Arc::new(MessageIdGenerator::new()),
        };

        let mut managers: Vec<Arc<dyn ConnectionManager>> = Vec::new();
        let mut rejected = Vec::new();
        for connection in config.connections.iter().filter(|c| c.enabled) {
            if let Err(err) = connection.validate() {
                error!(connection_id = %connection.id, %err, "skipping invalid connection");
                rejected.push((connection.id.clone(), err.to_string()));
                continue;
            }
            let context = ManagerContext {
                states: states.clone(),
                engine: engine.clone(),
                resources: resources.clone(),
                provider: registry.resolve(connection.provider.as_deref()),
                session: config.session.clone(),
                monitoring: config.monitoring.clone(),
            };
            managers.extend(build_managers(connection, &context));
        }

        info!(
            managers = managers.len(),
            rejected = rejected.len(),
            "simulator configured"
        );
        Self {
            config,
            states,
            cache,
            reassembler,
            managers,
            rejected,
            cleanup: Mutex::new(None),
        }
    }

    /// Start every manager and the reassembly cleanup task. A manager that
    /// fails to start is reported and left to its own reconnection.
    pub async fn start(&self) -> StartReport {
        let mut report = StartReport {
            failed: self.rejected.clone(),
            ..Default::default()
        };

        for manager in &self.managers {
            match manager.start().await {
                Ok(()) => report.started.push(manager.key().to_string()),
                Err(err) => {
                    warn!(manager = manager.key(), %err, "manager failed to start");
                    report.failed.push((manager.key().to_string(), err.to_string()));
                }
            }
        }

        self.start_cleanup();
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "simulator started"
        );
        report
    }

    fn start_cleanup(&self) {
        let mut cleanup = lock(&self.cleanup);
        if cleanup.is_some() {
            return;
        }
        let (shutdown, receiver) = watch::channel(false);
        let cache = self.cache.clone();
        let task = tokio::spawn(self.reassembler.clone().run_cleanup(
            self.config.reassembly.max_age(),
            self.config.reassembly.cleanup_interval(),
            receiver,
            move |expired| cache.put(incomplete_record(expired)),
        ));
        *cleanup = Some(Cleanup { shutdown, task });
    }

    /// Stop every manager, then the cleanup task.
    pub async fn stop(&self) {
        for manager in &self.managers {
            manager.stop().await;
        }

        let cleanup = lock(&self.cleanup).take();
        if let Some(cleanup) = cleanup {
            cleanup.shutdown.send_replace(true);
            if let Err(err) = cleanup.task.await {
                warn!(%err, "reassembly cleanup task failed");
            }
        }
        info!("simulator stopped");
    }

    pub fn managers(&self) -> &[Arc<dyn ConnectionManager>] {
        &self.managers
    }

    /// The manager that sends for `connection_id`: the first one able to
    /// send, else the first one configured.
    pub fn manager(&self, connection_id: &str) -> Option<Arc<dyn ConnectionManager>> {
        let mut candidates = self
            .managers
            .iter()
            .filter(|manager| manager.connection_id() == connection_id);
        let first = candidates.clone().next().cloned();
        candidates.find(|manager| manager.can_send()).cloned().or(first)
    }

    pub async fn send(
        &self,
        connection_id: &str,
        request: &SmsRequest,
        send_all_parts: bool,
    ) -> SendResult {
        match self.manager(connection_id) {
            Some(manager) => manager.send(request, send_all_parts).await,
            None => SendResult::failed(format!("unknown connection '{connection_id}'")),
        }
    }

    pub fn states(&self) -> &Arc<SessionStateManager> {
        &self.states
    }

    pub fn cache(&self) -> &Arc<dyn MessageCache> {
        &self.cache
    }

    pub fn reassembler(&self) -> &Arc<Reassembler> {
        &self.reassembler
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }
}

/// One listener in SMSC mode; one manager per endpoint block in ESME mode.
fn build_managers(
    connection: &ConnectionConfig,
    context: &ManagerContext,
) -> Vec<Arc<dyn ConnectionManager>> {
    let handler = Arc::new(SimulatorHandler::new(
        connection,
        &context.session,
        context.resources.clone(),
    ));

    match connection.mode {
        ConnectionMode::Smsc => vec![Arc::new(SmscManager::new(
            connection.clone(),
            context.clone(),
            handler,
        )) as Arc<dyn ConnectionManager>],
        ConnectionMode::Esme => connection
            .endpoints()
            .into_iter()
            .map(|(bind_type, endpoint)| {
                Arc::new(EsmeManager::new(
                    connection.clone(),
                    bind_type,
                    endpoint.clone(),
                    context.clone(),
                    handler.clone(),
                )) as Arc<dyn ConnectionManager>
            })
            .collect(),
    }
}

/// Cache entry for a multipart message whose remaining parts never came.
fn incomplete_record(expired: ExpiredMessage) -> MessageRecord {
    let id = format!(
        "incomplete-{}-{}-{}",
        expired.key.source, expired.key.destination, expired.key.reference
    );
    let mut record = MessageRecord::new(
        id,
        "",
        Direction::Inbound,
        expired.key.source,
        expired.key.destination,
        expired.text,
    );
    record.total_parts = expired.total;
    record.reference = Some(expired.key.reference);
    record.status = Some(format!("INCOMPLETE {}/{}", expired.received, expired.total));
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryMessageCache;
    use crate::config::EndpointConfig;
    use crate::manager::ManagerState;

    fn endpoint(port: u16) -> EndpointConfig {
        EndpointConfig {
            port,
            system_id: "sim".into(),
            password: "pw".into(),
            ..Default::default()
        }
    }

    fn simulator(connections: Vec<ConnectionConfig>) -> Simulator {
        let config = SimulatorConfig {
            connections,
            ..Default::default()
        };
        Simulator::new(
            config,
            Arc::new(InMemoryMessageCache::new()),
            ProviderRegistry::new(),
        )
    }

    #[test]
    fn managers_follow_endpoint_blocks() {
        let sim = simulator(vec![
            ConnectionConfig {
                id: "split".into(),
                transmitter: Some(endpoint(2775)),
                receiver: Some(endpoint(2775)),
                ..Default::default()
            },
            ConnectionConfig {
                id: "trx".into(),
                transceiver: Some(endpoint(2775)),
                transmitter: Some(endpoint(2775)),
                ..Default::default()
            },
            ConnectionConfig {
                id: "server".into(),
                mode: ConnectionMode::Smsc,
                transceiver: Some(endpoint(2776)),
                ..Default::default()
            },
            ConnectionConfig {
                id: "off".into(),
                transceiver: Some(endpoint(2775)),
                enabled: false,
                ..Default::default()
            },
        ]);

        let keys: Vec<&str> = sim.managers().iter().map(|m| m.key()).collect();
        assert_eq!(
            keys,
            ["split/transmitter", "split/receiver", "trx/transceiver", "server"]
        );
        assert!(sim.managers().iter().all(|m| m.state() == ManagerState::Stopped));
        assert_eq!(sim.manager("split").unwrap().key(), "split/transmitter");
        assert!(sim.manager("off").is_none());
    }

    #[test]
    fn invalid_connections_are_rejected() {
        let sim = simulator(vec![ConnectionConfig {
            id: "broken".into(),
            ..Default::default()
        }]);
        assert!(sim.managers().is_empty());
        assert_eq!(sim.rejected.len(), 1);
        assert_eq!(sim.rejected[0].0, "broken");
    }

    #[tokio::test]
    async fn send_to_unknown_connection_fails() {
        let sim = simulator(Vec::new());
        let result = sim.send("missing", &SmsRequest::new("1", "2", "hi"), true).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing"));
    }

    #[test]
    fn incomplete_records_keep_what_arrived() {
        let expired = ExpiredMessage {
            key: crate::concatenation::ReassemblyKey::new("1000", "2000", 7),
            text: "first half".into(),
            received: 1,
            total: 2,
        };
        let record = incomplete_record(expired);
        assert_eq!(record.message_id, "incomplete-1000-2000-7");
        assert_eq!(record.text, "first half");
        assert_eq!(record.status.as_deref(), Some("INCOMPLETE 1/2"));
    }
}
