//! Battle session: the decisions one battle asks of its operator
//!
//! Every `request_*` method is called from the simulation thread and blocks
//! until the operator answers through the [`BattlePrompter`], shutdown
//! releases it, or a bounded wait runs out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::casualty::allocator::{Cap, CasualtyAllocator, SelectionRule};
use crate::casualty::category::{SeparatorCategories, UnitSeparator};
use crate::casualty::units::{CasualtyDetails, CasualtyList, DependentsMap, Unit};
use crate::core::config::SessionConfig;
use crate::core::error::Result;
use crate::core::types::{BattleId, Territory, UnitId};
use crate::display::steps::StepAnimator;
use crate::session::dialogs::{
    BattlePrompter, CasualtyDialog, ConfirmationDialog, PendingDecision, RetreatDialog,
    SubmergeDialog,
};
use crate::sync::rendezvous::{Decision, DecisionKind, DecisionRendezvous, Wait};
use crate::sync::shutdown::{HookId, ShutdownRegistry, TeardownId};
use crate::sync::ui_thread::UiHandle;

/// Everything needed to ask for casualties
pub struct CasualtyRequest {
    pub hit_player: String,
    pub message: String,
    pub pool: Vec<Unit>,
    /// `None` for edit mode
    pub required: Option<u32>,
    pub dependents: DependentsMap,
    pub allow_multiple_hits: bool,
    pub defaults: CasualtyList,
    pub rule: Option<SelectionRule>,
}

impl CasualtyRequest {
    pub fn new(
        hit_player: impl Into<String>,
        message: impl Into<String>,
        pool: Vec<Unit>,
        required: Option<u32>,
    ) -> Self {
        Self {
            hit_player: hit_player.into(),
            message: message.into(),
            pool,
            required,
            dependents: DependentsMap::new(),
            allow_multiple_hits: false,
            defaults: CasualtyList::new(),
            rule: None,
        }
    }

    pub fn with_dependents(mut self, dependents: DependentsMap) -> Self {
        self.dependents = dependents;
        self
    }

    pub fn with_defaults(mut self, defaults: CasualtyList) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_multiple_hits(mut self) -> Self {
        self.allow_multiple_hits = true;
        self
    }

    pub fn with_rule(mut self, rule: SelectionRule) -> Self {
        self.rule = Some(rule);
        self
    }
}

/// Read access to live game state
pub trait UnitRoster {
    fn unit(&self, id: UnitId) -> Option<Unit>;

    fn dependents_of(&self, id: UnitId) -> Vec<Unit>;
}

/// Copy units and their dependents out of the game state
///
/// The read lock is released before this returns; nothing built from the
/// snapshot holds on to it. Unknown ids are skipped.
pub fn snapshot_pool<R: UnitRoster>(
    state: &RwLock<R>,
    ids: &[UnitId],
) -> (Vec<Unit>, DependentsMap) {
    let roster = state.read().unwrap_or_else(PoisonError::into_inner);
    let mut units = Vec::with_capacity(ids.len());
    let mut dependents = DependentsMap::new();
    for &id in ids {
        let Some(unit) = roster.unit(id) else {
            tracing::debug!("Unit {:?} not in game state, skipped", id);
            continue;
        };
        let carried = roster.dependents_of(id);
        if !carried.is_empty() {
            dependents.insert(id, carried);
        }
        units.push(unit);
    }
    (units, dependents)
}

/// One battle's link between the simulation and the operator
pub struct BattleSession {
    id: BattleId,
    location: Territory,
    config: SessionConfig,
    rendezvous: DecisionRendezvous,
    prompter: Arc<dyn BattlePrompter>,
    animator: StepAnimator,
    separator: UnitSeparator,
    hook: Mutex<Option<HookId>>,
    teardown: Mutex<Option<TeardownId>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for BattleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BattleSession")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl BattleSession {
    /// Open a session for the battle at `location`
    ///
    /// Shutdown wakes the step animator and disposes the prompter on the UI
    /// thread.
    pub fn new(
        ui: UiHandle,
        registry: Arc<ShutdownRegistry>,
        prompter: Arc<dyn BattlePrompter>,
        config: SessionConfig,
        location: Territory,
    ) -> Self {
        let animator = StepAnimator::new(ui.clone(), config.step_interval());

        let waking = animator.clone();
        let hook = registry.add_shutdown_hook(move || waking.wake_all());
        let disposing = Arc::clone(&prompter);
        let teardown_ui = ui.clone();
        // The registry may run teardown inline; the prompter only lives on the UI thread
        let teardown = registry.add_teardown(move || {
            if teardown_ui.is_ui_thread() {
                disposing.dispose();
            } else {
                run_on_ui(&teardown_ui, move || disposing.dispose());
            }
        });

        let id = BattleId::new();
        tracing::debug!("Battle session {:?} opened at {}", id, location);

        Self {
            id,
            location,
            separator: UnitSeparator::new(SeparatorCategories::from_config(&config)),
            config,
            rendezvous: DecisionRendezvous::new(ui, registry),
            prompter,
            animator,
            hook: Mutex::new(hook),
            teardown: Mutex::new(teardown),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> BattleId {
        self.id
    }

    pub fn location(&self) -> &Territory {
        &self.location
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn steps(&self) -> &StepAnimator {
        &self.animator
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ask whether to retreat, and where
    ///
    /// With the submerge shortcut and at most one destination the operator
    /// only chooses between submerging in place and remaining. Returns the
    /// chosen territory, or `None` to stay (or when no decision was made).
    pub fn request_retreat(
        &self,
        message: impl Into<String>,
        destinations: Vec<Territory>,
        submerge: bool,
    ) -> Result<Option<Territory>> {
        let message = message.into();
        let prompter = Arc::clone(&self.prompter);

        let decision = if !submerge || destinations.len() > 1 {
            self.rendezvous
                .request(DecisionKind::Retreat, Wait::Unbounded, move |responder| {
                    prompter.present(PendingDecision::Retreat(RetreatDialog::new(
                        message,
                        destinations,
                        responder,
                    )));
                })?
        } else {
            let location = self.location.clone();
            self.rendezvous
                .request(DecisionKind::Submerge, Wait::Unbounded, move |responder| {
                    prompter.present(PendingDecision::Submerge(SubmergeDialog::new(
                        message, location, responder,
                    )));
                })?
        };

        self.clear_prompter();
        Ok(decision.into_option().flatten())
    }

    /// Ask which units take the hits
    ///
    /// The allocator is built here and handed to the UI thread, so a pool
    /// that cannot absorb the required count fails before anything is shown.
    /// `None` means no decision was made.
    pub fn request_casualties(&self, request: CasualtyRequest) -> Result<Option<CasualtyDetails>> {
        let CasualtyRequest {
            hit_player,
            message,
            pool,
            required,
            dependents,
            allow_multiple_hits,
            defaults,
            rule,
        } = request;

        let mut allocator = CasualtyAllocator::new(
            pool,
            &defaults,
            dependents,
            &self.separator,
            allow_multiple_hits,
            Cap::from_required(required),
        )?;
        if let Some(rule) = rule {
            allocator = allocator.with_rule(rule);
        }

        let prompter = Arc::clone(&self.prompter);
        let decision = self.rendezvous.request(
            DecisionKind::CasualtySelection,
            Wait::Unbounded,
            move |responder| {
                prompter.present(PendingDecision::Casualties(CasualtyDialog::new(
                    hit_player, message, required, allocator, responder,
                )));
            },
        )?;

        self.clear_prompter();
        Ok(decision.into_option())
    }

    /// Show `message` until the operator continues, or for at most the
    /// configured timeout when `bounded`
    pub fn request_confirmation(
        &self,
        message: impl Into<String>,
        bounded: bool,
    ) -> Result<Decision<()>> {
        let message = message.into();
        let wait = if bounded {
            Wait::Bounded(self.config.confirmation_timeout())
        } else {
            Wait::Unbounded
        };
        let prompter = Arc::clone(&self.prompter);
        let decision = self
            .rendezvous
            .request(DecisionKind::Confirmation, wait, move |responder| {
                prompter.present(PendingDecision::Confirmation(ConfirmationDialog::new(
                    message, responder,
                )));
            })?;

        self.clear_prompter();
        Ok(decision)
    }

    /// Confirmation whose wait follows `confirm_defensive_rolls`
    pub fn wait_for_confirmation(&self, message: impl Into<String>) -> Result<Decision<()>> {
        self.request_confirmation(message, !self.config.confirm_defensive_rolls)
    }

    /// Move the step display to `step` and wait until it gets there
    ///
    /// The move itself is queued onto the UI thread; the wait covers it.
    pub fn goto_step(&self, step: &str) -> Result<()> {
        self.animator.set_target_step(step);
        self.animator.wait_until_finished()
    }

    /// Walk the display to the last step and tell the prompter the battle
    /// is over. Does not wait.
    pub fn end_battle(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("Battle {:?} at {} ended: {}", self.id, self.location, message);
        self.animator.walk_to_last_step();
        let prompter = Arc::clone(&self.prompter);
        self.dispatch(move || prompter.battle_ended(&message));
    }

    /// Detach from the registry, release step waiters and dispose the
    /// prompter on the UI thread. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let registry = self.rendezvous.registry();
        if let Some(id) = self.hook.lock().unwrap_or_else(PoisonError::into_inner).take() {
            registry.remove_shutdown_hook(id);
        }
        if let Some(id) = self.teardown.lock().unwrap_or_else(PoisonError::into_inner).take() {
            registry.remove_teardown(id);
        }
        self.animator.deactivate();

        let prompter = Arc::clone(&self.prompter);
        self.dispatch(move || prompter.dispose());
        tracing::debug!("Battle session {:?} closed", self.id);
    }

    fn clear_prompter(&self) {
        let prompter = Arc::clone(&self.prompter);
        self.dispatch(move || prompter.clear());
    }

    fn dispatch<F: FnOnce() + Send + 'static>(&self, job: F) {
        run_on_ui(self.rendezvous.ui(), job);
    }
}

fn run_on_ui<F: FnOnce() + Send + 'static>(ui: &UiHandle, job: F) {
    if !ui.invoke_later(job) {
        tracing::debug!("UI loop gone, prompter job dropped");
    }
}
