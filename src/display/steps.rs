//! Battle step display
//!
//! The display highlights one step of the battle round at a time. When the
//! simulation jumps ahead, the highlight walks to the new step one tick at a
//! time instead of jumping, so the operator can follow what happened.
//!
//! All changes to the step list, the target and the highlight happen on the
//! UI thread. Calls from other threads are queued onto it; waiters count
//! queued changes as unfinished work. Ticks are timers on the UI runtime.
//! At most one tick is in flight per animator; triggers arriving while one
//! is pending are absorbed by it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::core::error::{CouncilError, Result};
use crate::sync::ui_thread::UiHandle;

/// Where the highlight should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTarget {
    Named(String),
    /// Whatever the last step of the current list is
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnimatorState {
    Idle,
    Seeking(StepTarget),
    Done,
}

/// Ordered step names with the highlighted index
#[derive(Debug, Default)]
struct StepSequence {
    steps: Vec<String>,
    current: usize,
    target: Option<StepTarget>,
    done: bool,
    ticking: bool,
    /// Changes queued onto the UI thread and not yet applied
    pending: u64,
    deactivated: bool,
    wake_generation: u64,
}

impl StepSequence {
    fn target_index(&self) -> Option<usize> {
        match self.target.as_ref()? {
            StepTarget::Named(name) => self.steps.iter().position(|s| s == name),
            StepTarget::Last => self.steps.len().checked_sub(1),
        }
    }

    fn reached_target(&self) -> bool {
        match &self.target {
            None => false,
            Some(StepTarget::Last) if self.steps.is_empty() => true,
            Some(_) => self.target_index() == Some(self.current),
        }
    }

    fn advance(&mut self) {
        if !self.steps.is_empty() {
            self.current = (self.current + 1) % self.steps.len();
        }
    }

    fn state(&self) -> AnimatorState {
        match &self.target {
            _ if self.done => AnimatorState::Done,
            Some(target) => AnimatorState::Seeking(target.clone()),
            None => AnimatorState::Idle,
        }
    }

    fn is_settled(&self) -> bool {
        self.deactivated || (self.pending == 0 && (self.done || self.target.is_none()))
    }

    fn replace_steps(&mut self, steps: Vec<String>) {
        self.steps = steps;
        if self.current >= self.steps.len() {
            self.current = 0;
        }
        if let Some(StepTarget::Named(name)) = &self.target {
            if !self.steps.contains(name) {
                tracing::debug!("Step '{}' not in new step list, clearing target", name);
                self.target = None;
                self.done = false;
            }
        }
    }

    fn install_target(&mut self, target: StepTarget) {
        if let StepTarget::Named(name) = &target {
            if !self.steps.contains(name) {
                tracing::warn!("Could not find step name: {}", name);
                self.target = None;
                self.done = false;
                return;
            }
        }
        self.target = Some(target);
        self.done = false;
    }
}

struct AnimatorShared {
    sequence: Mutex<StepSequence>,
    finished: Condvar,
    ui: UiHandle,
    interval: Duration,
    ticks_started: AtomicU64,
}

/// Walks the highlighted step towards a target at a fixed cadence
#[derive(Clone)]
pub struct StepAnimator {
    shared: Arc<AnimatorShared>,
}

impl std::fmt::Debug for StepAnimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sequence = self.lock();
        f.debug_struct("StepAnimator")
            .field("steps", &sequence.steps)
            .field("current", &sequence.current)
            .field("state", &sequence.state())
            .finish()
    }
}

impl StepAnimator {
    pub fn new(ui: UiHandle, interval: Duration) -> Self {
        Self {
            shared: Arc::new(AnimatorShared {
                sequence: Mutex::new(StepSequence::default()),
                finished: Condvar::new(),
                ui,
                interval,
                ticks_started: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StepSequence> {
        self.shared
            .sequence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` on the UI thread, then continue the walk
    ///
    /// Off the UI thread the change is queued and counted as pending until
    /// it runs, so a waiter never mistakes the state before it for the
    /// state after it.
    fn update<F>(&self, change: F)
    where
        F: FnOnce(&mut StepSequence) + Send + 'static,
    {
        if self.shared.ui.is_ui_thread() {
            self.apply(change, false);
            return;
        }

        self.lock().pending += 1;
        let animator = self.clone();
        if !self.shared.ui.invoke_later(move || animator.apply(change, true)) {
            tracing::debug!("UI loop gone, step change dropped");
            let mut sequence = self.lock();
            sequence.pending = sequence.pending.saturating_sub(1);
            self.shared.finished.notify_all();
        }
    }

    fn apply<F>(&self, change: F, queued: bool)
    where
        F: FnOnce(&mut StepSequence),
    {
        {
            let mut sequence = self.lock();
            if queued {
                sequence.pending = sequence.pending.saturating_sub(1);
            }
            if !sequence.deactivated {
                change(&mut *sequence);
            }
            // The change may have cleared the target
            self.shared.finished.notify_all();
        }
        self.walk_step();
    }

    /// Replace the step list
    ///
    /// A named target missing from the new list is dropped (back to idle)
    /// and its waiters are released.
    pub fn set_steps(&self, steps: Vec<String>) {
        self.update(move |sequence| sequence.replace_steps(steps));
    }

    pub fn steps(&self) -> Vec<String> {
        self.lock().steps.clone()
    }

    pub fn current_index(&self) -> usize {
        self.lock().current
    }

    pub fn current_step(&self) -> Option<String> {
        let sequence = self.lock();
        sequence.steps.get(sequence.current).cloned()
    }

    pub fn state(&self) -> AnimatorState {
        self.lock().state()
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Number of tick timers started so far
    pub fn ticks_started(&self) -> u64 {
        self.shared.ticks_started.load(Ordering::Relaxed)
    }

    /// Start walking towards `target`
    ///
    /// An unknown step name is logged and leaves the animator idle.
    pub fn set_target(&self, target: StepTarget) {
        self.update(move |sequence| sequence.install_target(target));
    }

    pub fn set_target_step(&self, name: &str) {
        self.set_target(StepTarget::Named(name.to_string()));
    }

    pub fn walk_to_last_step(&self) {
        self.set_target(StepTarget::Last);
    }

    fn walk_step(&self) {
        let mut sequence = self.lock();
        if sequence.ticking || sequence.target.is_none() || sequence.deactivated {
            return;
        }
        if sequence.reached_target() {
            self.finish(&mut sequence);
            return;
        }
        sequence.advance();
        if sequence.reached_target() {
            self.finish(&mut sequence);
            return;
        }

        sequence.ticking = true;
        drop(sequence);

        self.shared.ticks_started.fetch_add(1, Ordering::Relaxed);
        let animator = self.clone();
        self.shared
            .ui
            .run_after(self.shared.interval, move || animator.on_tick());
    }

    fn on_tick(&self) {
        self.lock().ticking = false;
        self.walk_step();
    }

    fn finish(&self, sequence: &mut StepSequence) {
        sequence.done = true;
        self.shared.finished.notify_all();
    }

    /// Block until the target is reached or [`wake_all`](Self::wake_all) is called
    ///
    /// Changes queued before the call are waited for. Returns once they have
    /// run and there is no target. Must not be called from the UI thread,
    /// whose jobs and timers drive the walk.
    pub fn wait_until_finished(&self) -> Result<()> {
        if self.shared.ui.is_ui_thread() {
            return Err(CouncilError::WaitOnUiThread("battle steps"));
        }
        let mut sequence = self.lock();
        let generation = sequence.wake_generation;
        while !sequence.is_settled() && sequence.wake_generation == generation {
            sequence = self
                .shared
                .finished
                .wait(sequence)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    /// Release every thread blocked in `wait_until_finished`
    pub fn wake_all(&self) {
        let mut sequence = self.lock();
        sequence.wake_generation += 1;
        self.shared.finished.notify_all();
    }

    /// Stop walking for good and release waiters; used when the display closes
    ///
    /// Changes still queued are discarded when they reach the UI thread.
    pub fn deactivate(&self) {
        let mut sequence = self.lock();
        sequence.deactivated = true;
        sequence.target = None;
        sequence.wake_generation += 1;
        self.shared.finished.notify_all();
    }
}
