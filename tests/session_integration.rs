//! Battle session integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use battle_council::casualty::{DependentsMap, Unit};
use battle_council::core::config::SessionConfig;
use battle_council::core::types::{PlayerId, Territory, UnitId, UnitTypeId};
use battle_council::display::{AnimatorState, StepAnimator, StepTarget};
use battle_council::session::*;
use battle_council::sync::{Decision, ShutdownRegistry, UiThread};
use crossbeam_channel::{unbounded, Receiver, Sender};

const WAIT: Duration = Duration::from_secs(5);
const STEPS: [&str; 5] = ["bombard", "fire", "select casualties", "remove casualties", "retreat"];

/// Forwards decisions to the test thread and counts lifecycle calls
#[derive(Default)]
struct TestPrompter {
    decisions: Option<Sender<PendingDecision>>,
    cleared: AtomicUsize,
    ended: AtomicUsize,
    disposed: AtomicUsize,
}

impl BattlePrompter for TestPrompter {
    fn present(&self, decision: PendingDecision) {
        if let Some(tx) = &self.decisions {
            tx.send(decision).expect("forward decision");
        }
    }

    fn clear(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn battle_ended(&self, _message: &str) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    ui: UiThread,
    registry: Arc<ShutdownRegistry>,
    prompter: Arc<TestPrompter>,
    session: Arc<BattleSession>,
    decisions: Receiver<PendingDecision>,
}

fn harness(config: SessionConfig) -> Harness {
    let ui = UiThread::spawn("session-it-ui").expect("spawn ui");
    let registry = Arc::new(ShutdownRegistry::with_dispatcher(Arc::new(ui.handle())));
    let (tx, rx) = unbounded();
    let prompter = Arc::new(TestPrompter {
        decisions: Some(tx),
        ..TestPrompter::default()
    });
    let session = BattleSession::new(
        ui.handle(),
        Arc::clone(&registry),
        prompter.clone(),
        config,
        Territory::new(10, "Western Germany"),
    );
    Harness {
        ui,
        registry,
        prompter,
        session: Arc::new(session),
        decisions: rx,
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        step_interval_ms: 5,
        confirmation_timeout_ms: 50,
        ..SessionConfig::default()
    }
}

fn step_names() -> Vec<String> {
    STEPS.iter().map(|s| s.to_string()).collect()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn pool(infantry: usize, tanks: usize) -> Vec<Unit> {
    let mut units: Vec<Unit> = (0..infantry)
        .map(|_| Unit::new(PlayerId(1), UnitTypeId(1), 1))
        .collect();
    units.extend((0..tanks).map(|_| Unit::new(PlayerId(1), UnitTypeId(2), 2)));
    units
}

#[test]
fn test_casualty_selection_round_trip() {
    let h = harness(fast_config());
    let worker = Arc::clone(&h.session);
    let join = thread::spawn(move || {
        let request =
            CasualtyRequest::new("Germans", "4 hits", pool(5, 2), Some(4)).with_multiple_hits();
        worker.request_casualties(request)
    });

    let decision = h.decisions.recv_timeout(WAIT).expect("dialog");
    let PendingDecision::Casualties(mut dialog) = decision else {
        panic!("expected a casualty dialog");
    };
    assert_eq!(dialog.button_text(), "Germans, press space to select 4 casualties");

    // Three hits is not enough; the dialog stays open
    dialog.allocator_mut().set_hits(0, 0, 3).expect("set");
    assert!(dialog.accept().is_err());

    dialog.allocator_mut().set_hits(0, 0, 2).expect("set");
    dialog.allocator_mut().set_hits(1, 0, 1).expect("set");
    dialog.allocator_mut().set_hits(1, 1, 1).expect("set");
    dialog.accept().expect("accept");

    let details = join.join().expect("worker").expect("request").expect("decision");
    assert_eq!(details.killed.len(), 3);
    assert_eq!(details.damaged.len(), 1);
    assert!(wait_until(|| h.prompter.cleared.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_ask_me_later_keeps_requester_waiting() {
    let h = harness(fast_config());
    let worker = Arc::clone(&h.session);
    let destinations = vec![Territory::new(11, "Poland"), Territory::new(12, "Berlin")];
    let join = thread::spawn(move || worker.request_retreat("Retreat?", destinations, false));

    let decision = h.decisions.recv_timeout(WAIT).expect("dialog");
    let PendingDecision::Retreat(mut dialog) = decision else {
        panic!("expected a retreat dialog");
    };
    assert_eq!(dialog.retreat_label(), "Retreat");

    thread::sleep(Duration::from_millis(50));
    assert!(!join.is_finished());

    dialog.retreat(&Territory::new(12, "Berlin")).expect("retreat");
    let answer = join.join().expect("worker").expect("request");
    assert_eq!(answer.map(|t| t.name), Some("Berlin".to_string()));
}

#[test]
fn test_unanswered_confirmation_auto_continues() {
    let h = harness(fast_config());
    let start = Instant::now();
    let decision = h.session.wait_for_confirmation("Defender rolls").expect("request");
    assert_eq!(decision, Decision::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(50));
    // The dialog is still queued; dropping it now changes nothing
    assert!(h.decisions.try_recv().is_ok());
}

#[test]
fn test_confirm_defensive_rolls_waits_until_shutdown() {
    let config = SessionConfig {
        confirm_defensive_rolls: true,
        ..fast_config()
    };
    let h = harness(config);
    let worker = Arc::clone(&h.session);
    let join = thread::spawn(move || worker.wait_for_confirmation("Defender rolls"));

    let _held = h.decisions.recv_timeout(WAIT).expect("dialog");
    thread::sleep(Duration::from_millis(100));
    assert!(!join.is_finished());

    h.registry.shutdown();
    let decision = join.join().expect("worker").expect("request");
    assert_eq!(decision, Decision::Cancelled);
    assert!(wait_until(|| h.prompter.disposed.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_walk_to_last_step_reaches_end() {
    let h = harness(fast_config());
    let steps = h.session.steps();
    steps.set_steps(step_names());
    steps.walk_to_last_step();
    steps.wait_until_finished().expect("wait");

    assert_eq!(steps.current_index(), 4);
    assert_eq!(steps.state(), AnimatorState::Done);
    assert!(steps.ticks_started() <= 4);
}

#[test]
fn test_retriggers_never_start_a_second_tick() {
    let ui = UiThread::spawn("animator-it-ui").expect("spawn ui");
    let animator = StepAnimator::new(ui.handle(), Duration::from_millis(15));
    animator.set_steps(step_names());

    let triggers: Vec<_> = (0..4)
        .map(|_| {
            let animator = animator.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    animator.set_target(StepTarget::Last);
                    thread::sleep(Duration::from_millis(2));
                }
            })
        })
        .collect();
    for trigger in triggers {
        trigger.join().expect("trigger thread");
    }

    animator.wait_until_finished().expect("wait");
    assert_eq!(animator.current_index(), 4);
    assert!(animator.ticks_started() <= 4);
}

#[test]
fn test_shutdown_wakes_step_waiters() {
    let config = SessionConfig {
        step_interval_ms: 60_000,
        ..fast_config()
    };
    let h = harness(config);
    h.session.steps().set_steps(step_names());

    let worker = Arc::clone(&h.session);
    let join = thread::spawn(move || worker.goto_step("retreat"));
    thread::sleep(Duration::from_millis(30));
    assert!(!join.is_finished());

    h.registry.shutdown();
    join.join().expect("worker").expect("goto step");
    assert_ne!(h.session.steps().current_index(), 4);
}

#[test]
fn test_end_battle_and_close() {
    let h = harness(fast_config());
    h.session.steps().set_steps(step_names());
    h.session.end_battle("Attacker wins");
    h.session.steps().wait_until_finished().expect("wait");
    assert!(wait_until(|| h.prompter.ended.load(Ordering::SeqCst) == 1));

    h.session.close();
    assert!(wait_until(|| h.prompter.disposed.load(Ordering::SeqCst) == 1));

    // Closed sessions are detached from shutdown
    h.registry.shutdown();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(h.prompter.disposed.load(Ordering::SeqCst), 1);
    h.ui.stop();
}

struct GameState {
    units: AHashMap<UnitId, Unit>,
    cargo: DependentsMap,
}

impl UnitRoster for GameState {
    fn unit(&self, id: UnitId) -> Option<Unit> {
        self.units.get(&id).cloned()
    }

    fn dependents_of(&self, id: UnitId) -> Vec<Unit> {
        self.cargo.get(&id).cloned().unwrap_or_default()
    }
}

#[test]
fn test_snapshot_feeds_casualty_request() {
    let h = harness(fast_config());
    let transport = Unit::new(PlayerId(1), UnitTypeId(6), 1);
    let passenger = Unit::new(PlayerId(1), UnitTypeId(1), 1);
    let escort = Unit::new(PlayerId(1), UnitTypeId(6), 1);

    let mut units = AHashMap::new();
    for unit in [&transport, &escort] {
        units.insert(unit.id, unit.clone());
    }
    let mut cargo = DependentsMap::new();
    cargo.insert(transport.id, vec![passenger.clone()]);
    let state = RwLock::new(GameState { units, cargo });

    let (pool, dependents) = snapshot_pool(&state, &[transport.id, escort.id]);
    // The lock is free again while the operator decides
    let _writer = state.write().expect("write lock");

    let worker = Arc::clone(&h.session);
    let join = thread::spawn(move || {
        worker.request_casualties(
            CasualtyRequest::new("Germans", "1 hit", pool, Some(1)).with_dependents(dependents),
        )
    });

    let decision = h.decisions.recv_timeout(WAIT).expect("dialog");
    let PendingDecision::Casualties(mut dialog) = decision else {
        panic!("expected a casualty dialog");
    };
    // The loaded transport is its own category
    assert_eq!(dialog.allocator().entries().len(), 2);
    assert_eq!(dialog.button_text(), "Germans, press space to select 1 casualty");
    let loaded = dialog
        .allocator()
        .entries()
        .iter()
        .position(|e| !e.category().dependents().is_empty())
        .expect("loaded transport category");
    dialog.allocator_mut().set_hits(loaded, 0, 1).expect("set");
    assert_eq!(dialog.allocator().get_selected(true).len(), 2);
    dialog.accept().expect("accept");

    let details = join.join().expect("worker").expect("request").expect("decision");
    assert_eq!(details.killed.len(), 1);
    assert_eq!(details.killed[0].id, transport.id);
}
