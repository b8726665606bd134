// ABOUTME: TOML configuration for simulator connections, session timing, monitoring and reassembly
// ABOUTME: Each connection is validated on its own so one bad definition never blocks the others

use crate::concatenation::ConcatenationType;
use crate::datatypes::{BindType, MAX_PASSWORD_LENGTH, MAX_SYSTEM_ID_LENGTH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("connection '{connection}' is invalid: {reason}")]
    InvalidConnection { connection: String, reason: String },
}

/// Top-level simulator configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub monitoring: MonitoringSettings,
    #[serde(default)]
    pub reassembly: ReassemblySettings,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

impl SimulatorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Write a sample configuration: an SMSC listener and an ESME bound to it.
    pub fn write_default(path: impl AsRef<Path>) -> Result<(), ConfigError> {
        Self::sample().save(path)
    }

    pub fn sample() -> Self {
        let endpoint = |host: &str| EndpointConfig {
            host: host.to_string(),
            port: 2775,
            system_id: "simulator".to_string(),
            password: "secret".to_string(),
            system_type: String::new(),
        };

        SimulatorConfig {
            connections: vec![
                ConnectionConfig {
                    id: "smsc-1".to_string(),
                    name: "Local SMSC".to_string(),
                    mode: ConnectionMode::Smsc,
                    transceiver: Some(endpoint("0.0.0.0")),
                    automatic_dr: Some("DELIVRD".to_string()),
                    ..ConnectionConfig::default()
                },
                ConnectionConfig {
                    id: "esme-1".to_string(),
                    name: "Local ESME".to_string(),
                    transceiver: Some(endpoint("127.0.0.1")),
                    ..ConnectionConfig::default()
                },
            ],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Connects out and binds
    #[default]
    Esme,
    /// Listens and accepts binds
    Smsc,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    pub system_id: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub system_type: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            system_id: String::new(),
            password: String::new(),
            system_type: String::new(),
        }
    }
}

impl EndpointConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_encoding() -> String {
    "GSM7".to_string()
}

fn default_concatenation() -> ConcatenationType {
    ConcatenationType::Udhi
}

fn default_enabled() -> bool {
    true
}

/// One logical connection. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mode: ConnectionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmitter: Option<EndpointConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<EndpointConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transceiver: Option<EndpointConfig>,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_concatenation")]
    pub concatenation: ConcatenationType,
    /// Receipt status sent automatically for submits asking for one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic_dr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            mode: ConnectionMode::Esme,
            transmitter: None,
            receiver: None,
            transceiver: None,
            encoding: default_encoding(),
            concatenation: default_concatenation(),
            automatic_dr: None,
            provider: None,
            enabled: true,
        }
    }
}

impl ConnectionConfig {
    /// Endpoint blocks in the order managers are created. A transceiver
    /// block replaces separate transmitter and receiver sessions.
    pub fn endpoints(&self) -> Vec<(BindType, &EndpointConfig)> {
        if let Some(trx) = &self.transceiver {
            return vec![(BindType::Transceiver, trx)];
        }
        let mut endpoints = Vec::with_capacity(2);
        if let Some(tx) = &self.transmitter {
            endpoints.push((BindType::Transmitter, tx));
        }
        if let Some(rx) = &self.receiver {
            endpoints.push((BindType::Receiver, rx));
        }
        endpoints
    }

    /// Credentials an SMSC checks a bind of `bind_type` against.
    pub fn credentials_for(&self, bind_type: BindType) -> Option<&EndpointConfig> {
        let exact = match bind_type {
            BindType::Transmitter => self.transmitter.as_ref(),
            BindType::Receiver => self.receiver.as_ref(),
            BindType::Transceiver => self.transceiver.as_ref(),
        };
        exact
            .or(self.transceiver.as_ref())
            .or_else(|| self.endpoints().first().map(|(_, endpoint)| *endpoint))
    }

    /// The receipt status to send automatically, if any.
    pub fn automatic_dr_status(&self) -> Option<&str> {
        self.automatic_dr
            .as_deref()
            .map(str::trim)
            .filter(|status| !status.is_empty() && !status.eq_ignore_ascii_case("NONE"))
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidConnection {
            connection: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty".into()));
        }

        let endpoints = self.endpoints();
        if endpoints.is_empty() {
            return Err(invalid(
                "no transmitter, receiver or transceiver block".into(),
            ));
        }

        for (bind_type, endpoint) in &endpoints {
            if endpoint.port == 0 {
                return Err(invalid(format!("{bind_type} port must not be 0")));
            }
            if endpoint.system_id.is_empty() {
                return Err(invalid(format!("{bind_type} system_id must not be empty")));
            }
            if endpoint.system_id.len() > MAX_SYSTEM_ID_LENGTH {
                return Err(invalid(format!(
                    "{bind_type} system_id longer than {MAX_SYSTEM_ID_LENGTH}"
                )));
            }
            if endpoint.password.len() > MAX_PASSWORD_LENGTH {
                return Err(invalid(format!(
                    "{bind_type} password longer than {MAX_PASSWORD_LENGTH}"
                )));
            }
        }

        if self.mode == ConnectionMode::Smsc {
            let ports: BTreeSet<u16> = [&self.transmitter, &self.receiver, &self.transceiver]
                .into_iter()
                .flatten()
                .map(|endpoint| endpoint.port)
                .collect();
            if ports.len() > 1 {
                return Err(invalid(format!(
                    "an SMSC listens on one port, found {ports:?}"
                )));
            }
        }

        Ok(())
    }
}

/// Session timing and worker pool sizing. Times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionSettings {
    pub bind_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub worker_pool_size: usize,
    pub queue_capacity: usize,
    pub unbind_grace_ms: u64,
    pub worker_shutdown_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            bind_timeout_ms: 5_000,
            response_timeout_ms: 10_000,
            worker_pool_size: 8,
            queue_capacity: 64,
            unbind_grace_ms: 5_000,
            worker_shutdown_timeout_ms: 10_000,
        }
    }
}

impl SessionSettings {
    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn unbind_grace(&self) -> Duration {
        Duration::from_millis(self.unbind_grace_ms)
    }

    pub fn worker_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_shutdown_timeout_ms)
    }
}

/// Keep-alive, health check and reconnection settings. Times are in
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub enquire_link_interval_ms: u64,
    pub enquire_link_timeout_ms: u64,
    pub max_keepalive_failures: u32,
    pub health_check_interval_ms: u64,
    pub stale_session_threshold_ms: u64,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_multiplier: f64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
    pub auto_reconnect: bool,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            enquire_link_interval_ms: 30_000,
            enquire_link_timeout_ms: 10_000,
            max_keepalive_failures: 3,
            health_check_interval_ms: 10_000,
            stale_session_threshold_ms: 300_000,
            reconnect_initial_delay_ms: 1_000,
            reconnect_multiplier: 2.0,
            reconnect_max_delay_ms: 60_000,
            reconnect_max_attempts: 10,
            auto_reconnect: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReassemblySettings {
    pub max_age_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for ReassemblySettings {
    fn default() -> Self {
        Self {
            max_age_secs: 3600,
            cleanup_interval_secs: 60,
        }
    }
}

impl ReassemblySettings {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
