//! Blocking request/response between a worker thread and the UI thread
//!
//! The worker builds a request, hands a renderer to the UI thread and parks
//! until one of three things happens: the UI answers through the
//! [`Responder`], the shutdown registry releases the waiter, or the
//! optional timeout expires.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{after, bounded, never, select, Sender};
use serde::{Deserialize, Serialize};

use crate::core::error::{CouncilError, Result};
use crate::sync::shutdown::{ShutdownRegistry, ShutdownWaiter};
use crate::sync::ui_thread::UiHandle;

/// What a decision request is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionKind {
    Confirmation,
    Retreat,
    Submerge,
    CasualtySelection,
}

/// How long a request may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Give up after the duration; only for requests with a safe default
    Bounded(Duration),
    /// Wait for the operator however long it takes
    Unbounded,
}

/// Outcome of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<T> {
    /// The UI answered
    Made(T),
    /// Shutdown released the waiter first
    Cancelled,
    /// A bounded wait expired
    TimedOut,
    /// The UI dropped the responder without answering
    Abandoned,
}

impl<T> Decision<T> {
    pub fn is_made(&self) -> bool {
        matches!(self, Decision::Made(_))
    }

    /// The answer, or `None` for every flavour of "no decision"
    pub fn into_option(self) -> Option<T> {
        match self {
            Decision::Made(value) => Some(value),
            Decision::Cancelled | Decision::TimedOut | Decision::Abandoned => None,
        }
    }
}

/// Write-once answer slot handed to the UI side
///
/// `respond` consumes the responder. The value is queued behind the running
/// UI job, so the requester never sees it before that job has returned.
#[derive(Debug)]
pub struct Responder<T> {
    kind: DecisionKind,
    tx: Sender<T>,
    ui: UiHandle,
}

impl<T: Send + 'static> Responder<T> {
    pub fn kind(&self) -> DecisionKind {
        self.kind
    }

    /// Complete the request. Returns false if the UI loop is gone.
    pub fn respond(self, value: T) -> bool {
        let tx = self.tx;
        self.ui.invoke_later(move || {
            // The requester may already have given up (timeout or shutdown)
            let _ = tx.send(value);
        })
    }
}

/// Removes the waiter from the registry on every exit path
struct WaiterGuard<'a> {
    registry: &'a ShutdownRegistry,
    waiter: Arc<ShutdownWaiter>,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.registry.unregister(&self.waiter);
    }
}

/// Blocking decision requests from worker threads to the UI thread
#[derive(Debug, Clone)]
pub struct DecisionRendezvous {
    ui: UiHandle,
    registry: Arc<ShutdownRegistry>,
}

impl DecisionRendezvous {
    pub fn new(ui: UiHandle, registry: Arc<ShutdownRegistry>) -> Self {
        Self { ui, registry }
    }

    pub fn ui(&self) -> &UiHandle {
        &self.ui
    }

    pub fn registry(&self) -> &Arc<ShutdownRegistry> {
        &self.registry
    }

    /// Ask the UI thread for a decision and block until it arrives
    ///
    /// `render` runs on the UI thread and must eventually call
    /// [`Responder::respond`] in reaction to operator input. Fails fast when
    /// called from the UI thread, since blocking there would deadlock.
    pub fn request<T, F>(&self, kind: DecisionKind, wait: Wait, render: F) -> Result<Decision<T>>
    where
        T: Send + 'static,
        F: FnOnce(Responder<T>) + Send + 'static,
    {
        if self.ui.is_ui_thread() {
            return Err(CouncilError::CalledFromUiThread(kind));
        }

        let (tx, rx) = bounded::<T>(1);
        let waiter = ShutdownWaiter::new();
        self.registry.register(&waiter);
        let guard = WaiterGuard {
            registry: &self.registry,
            waiter,
        };

        if guard.waiter.is_released() {
            tracing::debug!("{:?} request after shutdown, cancelled", kind);
            return Ok(Decision::Cancelled);
        }

        let responder = Responder {
            kind,
            tx,
            ui: self.ui.clone(),
        };
        if !self.ui.invoke_later(move || render(responder)) {
            tracing::warn!("{:?} request could not reach the UI thread", kind);
            return Ok(Decision::Cancelled);
        }

        let timeout = match wait {
            Wait::Bounded(duration) => after(duration),
            Wait::Unbounded => never(),
        };
        let released = guard.waiter.released_signal();

        let decision = select! {
            recv(rx) -> answer => match answer {
                Ok(value) => Decision::Made(value),
                Err(_) => Decision::Abandoned,
            },
            recv(released) -> _ => Decision::Cancelled,
            recv(timeout) -> _ => Decision::TimedOut,
        };

        if !decision.is_made() {
            tracing::debug!(
                "{:?} request resolved without a decision: {:?}",
                kind,
                outcome_name(&decision)
            );
        }
        Ok(decision)
    }
}

fn outcome_name<T>(decision: &Decision<T>) -> &'static str {
    match decision {
        Decision::Made(_) => "made",
        Decision::Cancelled => "cancelled",
        Decision::TimedOut => "timed out",
        Decision::Abandoned => "abandoned",
    }
}
