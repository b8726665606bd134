// ABOUTME: Keep-alive probing, health checks and backoff reconnection for long-running sessions
// ABOUTME: Works against any MonitoredSession so both endpoint roles can reuse it

use crate::config::MonitoringSettings;
use crate::error::SmppResult;
use crate::session::wait_for_signal;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Configuration for SMPP keep-alive functionality
///
/// Controls the behavior of periodic enquire_link PDUs sent to maintain
/// session health during long-running connections. The keep-alive mechanism
/// helps detect connection failures and ensures the SMPP session remains active.
///
/// # SMPP Keep-Alive Protocol
///
/// According to SMPP v3.4 specification, enquire_link PDUs should be sent
/// periodically during idle periods to verify the connection is still active.
/// The peer should respond with enquire_link_resp within a reasonable time.
///
/// # Example
///
/// ```rust
/// use smpp_sim::monitor::KeepAliveConfig;
/// use std::time::Duration;
///
/// // Default configuration (30s interval, 10s timeout, 3 max failures)
/// let config = KeepAliveConfig::default();
///
/// // Custom configuration
/// let config = KeepAliveConfig::new(Duration::from_secs(60))
///     .with_timeout(Duration::from_secs(15))
///     .with_max_failures(5);
///
/// // Disabled keep-alive
/// let config = KeepAliveConfig::disabled();
/// assert!(!config.enabled);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct KeepAliveConfig {
    /// Interval between enquire_link PDUs (default: 30 seconds)
    ///
    /// Shorter intervals detect failures faster but generate more traffic.
    pub interval: Duration,

    /// Timeout for enquire_link responses (default: 10 seconds)
    ///
    /// If no response is received within this time, the probe counts as a
    /// failure. Should be significantly less than the interval.
    pub timeout: Duration,

    /// Maximum consecutive failures before considering connection dead (default: 3)
    pub max_failures: u32,

    /// Whether keep-alive is enabled (default: true)
    ///
    /// When false, no enquire_link PDUs are sent on a timer. Health checks
    /// may still probe a stale session.
    pub enabled: bool,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            max_failures: 3,
            enabled: true,
        }
    }
}

impl KeepAliveConfig {
    /// Create a new keep-alive configuration with custom interval
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Set the timeout for enquire_link responses
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum consecutive failures before connection is considered dead
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Create a disabled keep-alive configuration
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

impl From<&MonitoringSettings> for KeepAliveConfig {
    fn from(settings: &MonitoringSettings) -> Self {
        KeepAliveConfig::new(Duration::from_millis(settings.enquire_link_interval_ms))
            .with_timeout(Duration::from_millis(settings.enquire_link_timeout_ms))
            .with_max_failures(settings.max_keepalive_failures.max(1))
    }
}

/// Exponential backoff between reconnection attempts.
///
/// ```rust
/// use smpp_sim::monitor::ReconnectPolicy;
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy::default();
/// let delays: Vec<_> = policy.delays().take(3).collect();
/// assert_eq!(delays, [1, 2, 4].map(Duration::from_secs));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

impl From<&MonitoringSettings> for ReconnectPolicy {
    fn from(settings: &MonitoringSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.reconnect_initial_delay_ms),
            multiplier: settings.reconnect_multiplier,
            max_delay: Duration::from_millis(settings.reconnect_max_delay_ms),
            max_attempts: settings.reconnect_max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based), capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    /// Every delay of the policy, in attempt order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).map(|attempt| self.delay_for(attempt))
    }
}

/// Keep-alive and reconnection statistics for one monitored session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorMetrics {
    /// Probes that failed in a row; reset by any success
    pub consecutive_failures: u32,
    pub enquire_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub average_response_time: Option<Duration>,
    pub min_response_time: Option<Duration>,
    pub max_response_time: Option<Duration>,
    pub reconnect_attempts: u64,
}

/// Tracks enquire_link outcomes against the failure threshold
///
/// The manager does no I/O. The monitor reports each probe through
/// `on_ping_sent()`, then `on_ping_success()` or `on_ping_failure()`, and
/// asks `is_connection_failed()` whether the threshold was reached.
///
/// # Example
///
/// ```rust
/// use smpp_sim::monitor::{KeepAliveConfig, KeepAliveManager};
/// use std::time::Duration;
///
/// let mut manager = KeepAliveManager::new(KeepAliveConfig::default().with_max_failures(2));
///
/// manager.on_ping_sent();
/// manager.on_ping_success(Duration::from_millis(12));
/// assert_eq!(manager.metrics().success_count, 1);
///
/// manager.on_ping_failure();
/// manager.on_ping_failure();
/// assert!(manager.is_connection_failed());
/// ```
#[derive(Debug)]
pub struct KeepAliveManager {
    /// Configuration for keep-alive behavior
    config: KeepAliveConfig,

    /// Counters exposed through `metrics()`
    metrics: MonitorMetrics,

    /// Sum of all measured response times, for the average
    total_response_time: Duration,
}

impl KeepAliveManager {
    /// Create a new keep-alive manager with the specified configuration
    pub fn new(config: KeepAliveConfig) -> Self {
        Self {
            config,
            metrics: MonitorMetrics::default(),
            total_response_time: Duration::ZERO,
        }
    }

    /// Record that an enquire_link was sent
    pub fn on_ping_sent(&mut self) {
        self.metrics.enquire_count += 1;
        debug!("Enquire_link sent (total: {})", self.metrics.enquire_count);
    }

    /// Record a successful enquire_link response
    ///
    /// Resets the consecutive failure counter and folds `response_time`
    /// into the min/max/average figures.
    pub fn on_ping_success(&mut self, response_time: Duration) {
        let metrics = &mut self.metrics;
        metrics.consecutive_failures = 0;
        metrics.success_count += 1;
        self.total_response_time += response_time;
        metrics.average_response_time = Some(
            self.total_response_time / u32::try_from(metrics.success_count).unwrap_or(u32::MAX),
        );
        metrics.min_response_time = Some(
            metrics
                .min_response_time
                .map_or(response_time, |min| min.min(response_time)),
        );
        metrics.max_response_time = Some(
            metrics
                .max_response_time
                .map_or(response_time, |max| max.max(response_time)),
        );
        debug!(
            "Enquire_link successful in {:?} (total: {})",
            response_time, metrics.success_count
        );
    }

    /// Record a failed enquire_link operation
    ///
    /// Call this when an enquire_link times out, receives an error response,
    /// or fails to send.
    pub fn on_ping_failure(&mut self) {
        self.metrics.consecutive_failures += 1;
        self.metrics.failure_count += 1;
        warn!(
            "Enquire_link failed (consecutive failures: {})",
            self.metrics.consecutive_failures
        );
    }

    pub fn on_reconnect_attempt(&mut self) {
        self.metrics.reconnect_attempts += 1;
    }

    /// Reset the failure counter
    ///
    /// Called after a successful reconnect, so the new session starts with
    /// a clean slate.
    pub fn reset_failures(&mut self) {
        if self.metrics.consecutive_failures > 0 {
            debug!(
                "Resetting {} consecutive failures",
                self.metrics.consecutive_failures
            );
            self.metrics.consecutive_failures = 0;
        }
    }

    /// True once consecutive failures reach the configured maximum.
    pub fn is_connection_failed(&self) -> bool {
        self.metrics.consecutive_failures >= self.config.max_failures
    }

    pub fn metrics(&self) -> MonitorMetrics {
        self.metrics.clone()
    }

    /// Check if keep-alive is currently enabled
    pub fn is_running(&self) -> bool {
        self.config.enabled
    }

    /// Get the configured keep-alive interval
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Get the configured timeout
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }
}

/// What the monitor needs from the thing it watches.
#[async_trait]
pub trait MonitoredSession: Send + Sync + 'static {
    /// Used in log lines
    fn monitor_name(&self) -> String;

    fn is_bound(&self) -> bool;

    /// Time since the session last moved a frame, if there is a session
    fn idle_for(&self) -> Option<Duration>;

    /// Send one enquire_link and return its round-trip time.
    async fn probe(&self, timeout: Duration) -> SmppResult<Duration>;

    /// Tear down whatever is left of the old session and bind a new one.
    async fn reconnect(&self) -> SmppResult<()>;

    /// False once the owner no longer wants reconnection (stopped, or
    /// already given up).
    fn reconnect_allowed(&self) -> bool {
        true
    }

    /// Called once when every reconnection attempt has failed.
    fn on_reconnect_exhausted(&self) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared<T> {
    target: Arc<T>,
    keep_alive: KeepAliveConfig,
    policy: ReconnectPolicy,
    health_interval: Duration,
    stale_threshold: Duration,
    auto_reconnect: bool,
    tracker: Mutex<KeepAliveManager>,
    reconnecting: AtomicBool,
    reconnect_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Keep-alive, health-check and reconnection tasks for one session owner.
pub struct ConnectionMonitor<T: MonitoredSession> {
    shared: Arc<Shared<T>>,
}

impl<T: MonitoredSession> Clone for ConnectionMonitor<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: MonitoredSession> ConnectionMonitor<T> {
    pub fn new(target: Arc<T>, settings: &MonitoringSettings) -> Self {
        let keep_alive = KeepAliveConfig::from(settings);
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                target,
                tracker: Mutex::new(KeepAliveManager::new(keep_alive.clone())),
                keep_alive,
                policy: ReconnectPolicy::from(settings),
                health_interval: Duration::from_millis(settings.health_check_interval_ms.max(1)),
                stale_threshold: Duration::from_millis(settings.stale_session_threshold_ms),
                auto_reconnect: settings.auto_reconnect,
                reconnecting: AtomicBool::new(false),
                reconnect_task: Arc::new(Mutex::new(None)),
                shutdown: Arc::new(shutdown),
            }),
        }
    }

    pub fn metrics(&self) -> MonitorMetrics {
        lock(&self.shared.tracker).metrics()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.shared.reconnecting.load(Ordering::SeqCst)
    }

    /// Spawn the keep-alive and health-check tasks.
    pub fn start(&self) -> MonitorHandle {
        let mut tasks = Vec::with_capacity(2);
        if self.shared.keep_alive.enabled {
            tasks.push(tokio::spawn(
                self.shared.clone().keep_alive_loop(self.shared.shutdown.subscribe()),
            ));
        }
        tasks.push(tokio::spawn(
            self.shared.clone().health_loop(self.shared.shutdown.subscribe()),
        ));
        info!(target_name = %self.shared.target.monitor_name(), "connection monitor started");

        MonitorHandle {
            shutdown: self.shared.shutdown.clone(),
            tasks,
            reconnect_task: self.shared.reconnect_task.clone(),
        }
    }

    /// Start the reconnect loop unless one is already running. Returns
    /// whether this call started it.
    pub fn trigger_reconnect(&self) -> bool {
        self.shared.trigger_reconnect()
    }
}

impl<T: MonitoredSession> Shared<T> {
    fn trigger_reconnect(self: &Arc<Self>) -> bool {
        if !self.auto_reconnect || *self.shutdown.borrow() {
            return false;
        }
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(target_name = %self.target.monitor_name(), "reconnect already in progress");
            return false;
        }

        let task = tokio::spawn(self.clone().reconnect_loop(self.shutdown.subscribe()));
        *lock(&self.reconnect_task) = Some(task);
        true
    }

    async fn reconnect_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let name = self.target.monitor_name();

        for (index, delay) in self.policy.delays().enumerate() {
            let attempt = index + 1;
            info!(target_name = %name, attempt, ?delay, "reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_signal(&mut shutdown) => {
                    self.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }
            }
            if !self.target.reconnect_allowed() {
                debug!(target_name = %name, "reconnection no longer wanted");
                self.reconnecting.store(false, Ordering::SeqCst);
                return;
            }

            lock(&self.tracker).on_reconnect_attempt();
            let result = tokio::select! {
                result = self.target.reconnect() => result,
                _ = wait_for_signal(&mut shutdown) => {
                    self.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }
            };
            match result {
                Ok(()) => {
                    info!(target_name = %name, attempt, "reconnected");
                    lock(&self.tracker).reset_failures();
                    self.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }
                Err(err) => warn!(target_name = %name, attempt, %err, "reconnect attempt failed"),
            }
        }

        error!(
            target_name = %name,
            attempts = self.policy.max_attempts,
            "reconnection attempts exhausted"
        );
        self.target.on_reconnect_exhausted();
        self.reconnecting.store(false, Ordering::SeqCst);
    }

    async fn probe_once(self: &Arc<Self>) {
        lock(&self.tracker).on_ping_sent();
        let outcome = self.target.probe(self.keep_alive.timeout).await;

        let failed = {
            let mut tracker = lock(&self.tracker);
            match outcome {
                Ok(rtt) => {
                    tracker.on_ping_success(rtt);
                    false
                }
                Err(err) => {
                    debug!(target_name = %self.target.monitor_name(), %err, "probe failed");
                    tracker.on_ping_failure();
                    tracker.is_connection_failed()
                }
            }
        };

        if failed {
            warn!(
                target_name = %self.target.monitor_name(),
                "keep-alive failure threshold reached"
            );
            if self.trigger_reconnect() {
                lock(&self.tracker).reset_failures();
            }
        }
    }

    async fn keep_alive_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = self.keep_alive.interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_signal(&mut shutdown) => break,
            }
            if !self.target.is_bound() || self.reconnecting.load(Ordering::SeqCst) {
                continue;
            }
            tokio::select! {
                _ = self.probe_once() => {}
                _ = wait_for_signal(&mut shutdown) => break,
            }
        }
        debug!(target_name = %self.target.monitor_name(), "keep-alive task stopped");
    }

    async fn health_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.health_interval, self.health_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_signal(&mut shutdown) => break,
            }

            if !self.target.is_bound() {
                if self.target.reconnect_allowed() && self.trigger_reconnect() {
                    info!(target_name = %self.target.monitor_name(), "session down, reconnecting");
                }
                continue;
            }

            let stale = self
                .target
                .idle_for()
                .is_some_and(|idle| idle >= self.stale_threshold);
            if stale && !self.reconnecting.load(Ordering::SeqCst) {
                debug!(target_name = %self.target.monitor_name(), "session idle, probing");
                tokio::select! {
                    _ = self.probe_once() => {}
                    _ = wait_for_signal(&mut shutdown) => break,
                }
            }
        }
        debug!(target_name = %self.target.monitor_name(), "health-check task stopped");
    }
}

/// Stops a running [`ConnectionMonitor`].
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
    reconnect_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MonitorHandle {
    /// Signal shutdown and wait up to `timeout` for each task, aborting
    /// the ones that do not finish.
    pub async fn stop(self, timeout: Duration) {
        self.shutdown.send_replace(true);
        let reconnect = lock(&self.reconnect_task).take();
        for mut task in self.tasks.into_iter().chain(reconnect) {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!("monitor task did not stop in time, aborting");
                task.abort();
            }
        }
    }
}
