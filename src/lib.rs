//! SMPP endpoint simulator.
//!
//! Simulates both sides of an SMPP v3.4 link for testing messaging
//! infrastructure: an ESME that binds out and submits, and an SMSC that
//! listens, accepts binds, answers submits and sends delivery receipts.
//!
//! The protocol engine is split into:
//!
//! * [`encoding`]: text to and from the SMS character sets, with fallback
//!   to UCS2 and confidence-scored decoding
//! * [`concatenation`]: splitting long text with one of five methods and
//!   reassembling received parts
//! * [`session`]: the live session registry and the per-session reader,
//!   writer and worker tasks
//! * [`manager`]: ESME and SMSC connection managers
//! * [`monitor`]: keep-alive probing and reconnection with backoff
//!
//! [`simulator::Simulator`] wires these together from a
//! [`config::SimulatorConfig`].
//!
//! # Example
//!
//! ```rust,no_run
//! use smpp_sim::cache::InMemoryMessageCache;
//! use smpp_sim::config::SimulatorConfig;
//! use smpp_sim::manager::SmsRequest;
//! use smpp_sim::registry::ProviderRegistry;
//! use smpp_sim::simulator::Simulator;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SimulatorConfig::load("simulator.toml")?;
//!     let simulator = Simulator::new(
//!         config,
//!         Arc::new(InMemoryMessageCache::new()),
//!         ProviderRegistry::new(),
//!     );
//!
//!     let report = simulator.start().await;
//!     println!("started: {:?}", report.started);
//!
//!     let request = SmsRequest::new("1000", "2000", "Hello SMPP world!").with_delivery_receipt();
//!     let result = simulator.send("esme-1", &request, true).await;
//!     println!("sent {}/{} parts", result.parts_sent, result.total_parts);
//!
//!     simulator.stop().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod codec;
pub mod concatenation;
pub mod config;
pub mod connection;
pub mod datatypes;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod manager;
pub mod monitor;
pub mod receipt;
pub mod registry;
pub mod session;
pub mod simulator;

mod macros;


pub use codec::{CodecError, Decodable, Encodable, Frame, PduHeader, PduRegistry};
pub use config::{ConnectionConfig, SimulatorConfig};
pub use error::{SmppError, SmppResult};
pub use manager::{ConnectionManager, ManagerState, SendResult, SmsRequest};
pub use simulator::{Simulator, StartReport};

/// Error returned by the framing layer.
///
/// Partial frames are an expected condition while reading a socket, so
/// `frame` uses its own error enum on that path and only boxes the rare
/// cases.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for the framing layer.
pub type Result<T> = std::result::Result<T, Error>;
