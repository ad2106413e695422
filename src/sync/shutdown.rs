//! Process-wide registry of things to release at teardown
//!
//! Three kinds of registrations:
//! - waiters: blocked rendezvous calls, released exactly once
//! - hooks: callbacks run once on the shutting-down thread
//! - teardown tasks: dispatched fire-and-forget onto the UI thread, never
//!   run inline and never awaited
//!
//! Anything registered after shutdown is resolved immediately.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::sync::panic_message;
use crate::sync::ui_thread::{Dispatch, UiJob};

static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TeardownId(pub u64);

/// A blocked caller that shutdown can force-release
#[derive(Debug)]
pub struct ShutdownWaiter {
    id: WaiterId,
    registered_at: Instant,
    released: AtomicBool,
    signal_tx: Sender<()>,
    signal_rx: Receiver<()>,
}

impl ShutdownWaiter {
    pub fn new() -> Arc<Self> {
        let (signal_tx, signal_rx) = bounded(1);
        Arc::new(Self {
            id: WaiterId(NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed)),
            registered_at: Instant::now(),
            released: AtomicBool::new(false),
            signal_tx,
            signal_rx,
        })
    }

    pub fn id(&self) -> WaiterId {
        self.id
    }

    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    /// Release the waiter. Only the first call has any effect.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.signal_tx.try_send(());
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Channel that becomes ready once the waiter is released
    pub fn released_signal(&self) -> &Receiver<()> {
        &self.signal_rx
    }
}

type Hook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct RegistryState {
    shut_down: bool,
    next_id: u64,
    waiters: Vec<Arc<ShutdownWaiter>>,
    hooks: Vec<(HookId, Hook)>,
    teardowns: Vec<(TeardownId, UiJob)>,
}

impl RegistryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Registry of everything that must be released at teardown
pub struct ShutdownRegistry {
    state: Mutex<RegistryState>,
    dispatcher: Option<Arc<dyn Dispatch>>,
}

impl std::fmt::Debug for ShutdownRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ShutdownRegistry")
            .field("shut_down", &state.shut_down)
            .field("waiters", &state.waiters.len())
            .field("hooks", &state.hooks.len())
            .field("teardowns", &state.teardowns.len())
            .finish()
    }
}

impl Default for ShutdownRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownRegistry {
    /// Registry without a UI dispatcher; teardown tasks then run inline
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            dispatcher: None,
        }
    }

    /// Registry that hands teardown tasks to the UI thread
    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            dispatcher: Some(dispatcher),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Track a waiter, or release it on the spot if shutdown already happened
    pub fn register(&self, waiter: &Arc<ShutdownWaiter>) {
        let mut state = self.lock();
        if state.shut_down {
            drop(state);
            waiter.release();
            return;
        }
        state.waiters.push(Arc::clone(waiter));
    }

    /// Forget a waiter; no-op if it is not registered
    pub fn unregister(&self, waiter: &ShutdownWaiter) {
        let id = waiter.id();
        self.lock().waiters.retain(|w| w.id() != id);
    }

    pub fn waiter_count(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Add a callback run at shutdown
    ///
    /// Returns `None` when shutdown already happened; the hook has then
    /// already run on the calling thread.
    pub fn add_shutdown_hook<F>(&self, hook: F) -> Option<HookId>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if state.shut_down {
            drop(state);
            run_hook(Box::new(hook));
            return None;
        }
        let id = HookId(state.next_id());
        state.hooks.push((id, Box::new(hook)));
        Some(id)
    }

    pub fn remove_shutdown_hook(&self, id: HookId) {
        self.lock().hooks.retain(|(hook_id, _)| *hook_id != id);
    }

    /// Add a teardown task (closing a dialog, disposing a panel)
    ///
    /// Teardown always goes through the UI dispatcher without waiting. A
    /// synchronous wait here could deadlock against a UI job that is itself
    /// blocked on a lock held by the thread tearing down.
    pub fn add_teardown<F>(&self, task: F) -> Option<TeardownId>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if state.shut_down {
            drop(state);
            self.dispatch_teardown(Box::new(task));
            return None;
        }
        let id = TeardownId(state.next_id());
        state.teardowns.push((id, Box::new(task)));
        Some(id)
    }

    pub fn remove_teardown(&self, id: TeardownId) {
        self.lock().teardowns.retain(|(task_id, _)| *task_id != id);
    }

    /// Release every waiter, dispatch teardown tasks and run hooks
    ///
    /// Idempotent and never panics. Hooks run after the registry lock is
    /// released so a hook may call back into the registry.
    pub fn shutdown(&self) {
        let (hooks, teardowns) = {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            tracing::info!(
                "Shutting down: releasing {} waiters, {} hooks, {} teardown tasks",
                state.waiters.len(),
                state.hooks.len(),
                state.teardowns.len()
            );
            for waiter in state.waiters.drain(..) {
                waiter.release();
            }
            (
                std::mem::take(&mut state.hooks),
                std::mem::take(&mut state.teardowns),
            )
        };

        for (_, task) in teardowns {
            self.dispatch_teardown(task);
        }
        for (_, hook) in hooks {
            run_hook(hook);
        }
        tracing::info!("Shutdown complete");
    }

    fn dispatch_teardown(&self, task: UiJob) {
        match &self.dispatcher {
            Some(dispatcher) => {
                if !dispatcher.dispatch(task) {
                    tracing::warn!("UI loop gone, teardown task dropped");
                }
            }
            None => run_hook(task),
        }
    }
}

fn run_hook(hook: Hook) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(hook)) {
        tracing::error!("Shutdown hook failed: {}", panic_message(payload.as_ref()));
    }
}
