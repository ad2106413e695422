//! Cross-thread plumbing between the simulation and the UI owner thread
//!
//! - [`ui_thread`]: the single thread that owns decision and display state
//! - [`shutdown`]: registry that force-releases everything at teardown
//! - [`rendezvous`]: blocking request/response built on the two above

pub mod rendezvous;
pub mod shutdown;
pub mod ui_thread;

use std::any::Any;

pub use rendezvous::{Decision, DecisionKind, DecisionRendezvous, Responder, Wait};
pub use shutdown::{HookId, ShutdownRegistry, ShutdownWaiter, TeardownId, WaiterId};
pub use ui_thread::{Dispatch, UiHandle, UiJob, UiThread};

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
