//! The UI owner thread
//!
//! All decision and display state is mutated on one dedicated thread that
//! runs a current-thread tokio runtime. Other threads talk to it only by
//! queueing fire-and-forget jobs; nothing ever waits synchronously for a
//! queued job to finish.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use crate::core::error::{CouncilError, Result};
use crate::sync::panic_message;

/// A unit of work executed on the UI thread
pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget dispatch onto the UI thread
pub trait Dispatch: Send + Sync {
    /// Queue a job. Returns false when the UI loop is gone.
    fn dispatch(&self, job: UiJob) -> bool;

    /// Whether the calling thread is the UI thread
    fn is_ui_thread(&self) -> bool;
}

enum UiMessage {
    Run(UiJob),
    Stop,
}

/// Cloneable handle used to reach the UI thread from anywhere
#[derive(Clone)]
pub struct UiHandle {
    tx: UnboundedSender<UiMessage>,
    thread_id: ThreadId,
    runtime: Handle,
}

impl std::fmt::Debug for UiHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiHandle")
            .field("thread_id", &self.thread_id)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl UiHandle {
    /// Queue `job` to run on the UI thread after every job queued before it
    pub fn invoke_later<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(UiMessage::Run(Box::new(job))).is_ok()
    }

    /// Run `job` on the UI thread once `delay` has elapsed
    ///
    /// The delay is an async sleep on the UI runtime, so the UI thread keeps
    /// processing other jobs meanwhile.
    pub fn run_after<F>(&self, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            run_job(Box::new(job));
        });
    }

    pub fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Whether the UI loop has stopped accepting jobs
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Dispatch for UiHandle {
    fn dispatch(&self, job: UiJob) -> bool {
        self.tx.send(UiMessage::Run(job)).is_ok()
    }

    fn is_ui_thread(&self) -> bool {
        UiHandle::is_ui_thread(self)
    }
}

/// Owner of the UI thread; stopping or dropping it ends the loop
#[derive(Debug)]
pub struct UiThread {
    handle: UiHandle,
    join: Option<JoinHandle<()>>,
}

impl UiThread {
    /// Start the UI loop on a new named thread
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, mut rx) = unbounded_channel::<UiMessage>();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_time().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(runtime.handle().clone()));

                runtime.block_on(async move {
                    while let Some(message) = rx.recv().await {
                        match message {
                            UiMessage::Run(job) => run_job(job),
                            UiMessage::Stop => break,
                        }
                    }
                });
                tracing::debug!("UI loop stopped");
            })?;

        let runtime = ready_rx
            .recv()
            .map_err(|_| CouncilError::UiThread("UI thread exited during startup".into()))?
            .map_err(CouncilError::UiThread)?;
        let thread_id = join.thread().id();

        tracing::debug!("UI loop started on thread '{}'", name);

        Ok(Self {
            handle: UiHandle {
                tx,
                thread_id,
                runtime,
            },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> UiHandle {
        self.handle.clone()
    }

    /// Stop the loop and join the thread. Pending timers are dropped.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        let _ = self.handle.tx.send(UiMessage::Stop);
        if let Some(join) = self.join.take() {
            // Joining from the UI thread itself would never return
            if !self.handle.is_ui_thread() {
                let _ = join.join();
            }
        }
    }
}

impl Drop for UiThread {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

fn run_job(job: UiJob) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        tracing::error!("UI job panicked: {}", panic_message(payload.as_ref()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_jobs_run_on_ui_thread_in_order() {
        let ui = UiThread::spawn("test-ui").expect("spawn ui");
        let handle = ui.handle();
        assert!(!handle.is_ui_thread());

        let (tx, rx) = bounded(4);
        for i in 0..3 {
            let tx = tx.clone();
            let probe = handle.clone();
            assert!(handle.invoke_later(move || {
                tx.send((i, probe.is_ui_thread())).expect("send");
            }));
        }

        for expected in 0..3 {
            let (i, on_ui) = rx.recv_timeout(WAIT).expect("job ran");
            assert_eq!(i, expected);
            assert!(on_ui);
        }
    }

    #[test]
    fn test_run_after_fires_on_ui_thread() {
        let ui = UiThread::spawn("test-ui-timer").expect("spawn ui");
        let handle = ui.handle();
        let (tx, rx) = bounded(1);
        let probe = handle.clone();
        handle.run_after(Duration::from_millis(5), move || {
            tx.send(probe.is_ui_thread()).expect("send");
        });
        assert!(rx.recv_timeout(WAIT).expect("timer fired"));
    }

    #[test]
    fn test_panicking_job_does_not_kill_loop() {
        let ui = UiThread::spawn("test-ui-panic").expect("spawn ui");
        let handle = ui.handle();
        handle.invoke_later(|| panic!("boom"));

        let (tx, rx) = bounded(1);
        handle.invoke_later(move || tx.send(()).expect("send"));
        assert!(rx.recv_timeout(WAIT).is_ok());
    }

    #[test]
    fn test_invoke_after_stop_is_rejected() {
        let ui = UiThread::spawn("test-ui-stop").expect("spawn ui");
        let handle = ui.handle();
        ui.stop();
        assert!(handle.is_closed());
        assert!(!handle.invoke_later(|| {}));
    }
}
