//! Bound SMPP sessions.
//!
//! [`SessionStateManager`] is the registry of live sessions and their
//! counters. [`SessionHandle`] owns one bound connection through a reader
//! task, a writer task and a bounded pool of workers running an
//! [`InboundHandler`].

mod handle;
mod handler;
mod state;

pub use handle::{SessionContext, SessionHandle, expect_response};
pub use handler::{HandlerResources, InboundHandler, MessageIdGenerator, SimulatorHandler};
pub use state::{SessionSnapshot, SessionState, SessionStateManager, session_key};

use tokio::sync::watch;

/// Resolves once `signal` is true or its sender is gone.
pub(crate) async fn wait_for_signal(signal: &mut watch::Receiver<bool>) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}
