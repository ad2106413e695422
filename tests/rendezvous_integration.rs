//! Rendezvous and shutdown integration tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use battle_council::sync::*;
use crossbeam_channel::bounded;
use proptest::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

fn setup() -> (UiThread, DecisionRendezvous) {
    let ui = UiThread::spawn("rendezvous-it-ui").expect("spawn ui");
    let registry = Arc::new(ShutdownRegistry::with_dispatcher(Arc::new(ui.handle())));
    let rendezvous = DecisionRendezvous::new(ui.handle(), registry);
    (ui, rendezvous)
}

#[test]
fn test_shutdown_releases_blocked_request() {
    let (_ui, rendezvous) = setup();
    let (shown_tx, shown_rx) = bounded(1);

    let worker = rendezvous.clone();
    let join = thread::spawn(move || {
        worker.request(DecisionKind::Retreat, Wait::Unbounded, move |responder: Responder<u32>| {
            // Ask me later: keep the responder alive without answering
            std::mem::forget(responder);
            shown_tx.send(()).expect("shown");
        })
    });

    shown_rx.recv_timeout(WAIT).expect("dialog shown");
    assert_eq!(rendezvous.registry().waiter_count(), 1);
    rendezvous.registry().shutdown();

    let decision = join.join().expect("worker").expect("request");
    assert_eq!(decision, Decision::Cancelled);
    assert_eq!(rendezvous.registry().waiter_count(), 0);
}

#[test]
fn test_request_after_shutdown_returns_at_once() {
    let (_ui, rendezvous) = setup();
    rendezvous.registry().shutdown();

    let rendered = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&rendered);
    let start = Instant::now();
    let decision = rendezvous
        .request(DecisionKind::CasualtySelection, Wait::Unbounded, move |_r: Responder<()>| {
            flag.store(true, Ordering::SeqCst);
        })
        .expect("request");

    assert_eq!(decision, Decision::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!rendered.load(Ordering::SeqCst));
}

#[test]
fn test_bounded_wait_times_out() {
    let (_ui, rendezvous) = setup();
    let start = Instant::now();
    let decision = rendezvous
        .request(
            DecisionKind::Confirmation,
            Wait::Bounded(Duration::from_millis(50)),
            |responder: Responder<()>| std::mem::forget(responder),
        )
        .expect("request");
    assert_eq!(decision, Decision::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(rendezvous.registry().waiter_count(), 0);
}

#[test]
fn test_answer_arrives_after_handler_returns() {
    let (_ui, rendezvous) = setup();
    let handler_done = Arc::new(AtomicBool::new(false));
    let done = Arc::clone(&handler_done);

    let decision = rendezvous
        .request(DecisionKind::Confirmation, Wait::Unbounded, move |responder: Responder<u8>| {
            responder.respond(1);
            thread::sleep(Duration::from_millis(30));
            done.store(true, Ordering::SeqCst);
        })
        .expect("request");

    assert_eq!(decision, Decision::Made(1));
    assert!(handler_done.load(Ordering::SeqCst));
}

#[test]
fn test_stopped_ui_cancels_request() {
    let (ui, rendezvous) = setup();
    ui.stop();
    let decision = rendezvous
        .request(DecisionKind::Retreat, Wait::Unbounded, |_r: Responder<()>| {})
        .expect("request");
    assert_eq!(decision, Decision::Cancelled);
}

#[test]
fn test_teardown_runs_on_ui_thread_without_blocking() {
    let (ui, rendezvous) = setup();
    let registry = rendezvous.registry();
    let (tx, rx) = bounded(1);
    let probe = ui.handle();
    registry.add_teardown(move || {
        tx.send(probe.is_ui_thread()).expect("send");
    });

    registry.shutdown();
    assert!(rx.recv_timeout(WAIT).expect("teardown ran"));
}

#[test]
fn test_panicking_hook_does_not_stop_the_others() {
    let registry = ShutdownRegistry::new();
    let ran = Arc::new(AtomicUsize::new(0));
    registry.add_shutdown_hook(|| panic!("hook failure"));
    let counter = Arc::clone(&ran);
    registry.add_shutdown_hook(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    registry.shutdown();
    registry.shutdown();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[derive(Debug, Clone)]
enum Op {
    Register(usize),
    Unregister(usize),
    Shutdown,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..4).prop_map(Op::Register),
        2 => (0usize..4).prop_map(Op::Unregister),
        1 => Just(Op::Shutdown),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Waiters are released at most once, exactly when registered at (or
    /// after) shutdown, and repeated shutdowns change nothing.
    #[test]
    fn prop_waiters_released_at_most_once(ops in prop::collection::vec(op_strategy(), 0..30)) {
        let registry = ShutdownRegistry::new();
        let hooks_run = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hooks_run);
        registry.add_shutdown_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let waiters: Vec<Arc<ShutdownWaiter>> = (0..4).map(|_| ShutdownWaiter::new()).collect();
        let mut registered = [false; 4];
        let mut expected = [false; 4];
        let mut shut_down = false;

        for op in &ops {
            match *op {
                Op::Register(i) => {
                    registry.register(&waiters[i]);
                    if shut_down {
                        expected[i] = true;
                    } else {
                        registered[i] = true;
                    }
                }
                Op::Unregister(i) => {
                    registry.unregister(&waiters[i]);
                    registered[i] = false;
                }
                Op::Shutdown => {
                    registry.shutdown();
                    if !shut_down {
                        for i in 0..4 {
                            expected[i] |= registered[i];
                        }
                        shut_down = true;
                    }
                }
            }
        }

        for (waiter, expected) in waiters.iter().zip(expected) {
            prop_assert_eq!(waiter.is_released(), expected);
            let signals = waiter.released_signal().try_iter().count();
            prop_assert_eq!(signals, usize::from(expected));
            prop_assert!(!waiter.release() || !expected);
        }

        registry.shutdown();
        registry.shutdown();
        prop_assert_eq!(hooks_run.load(Ordering::SeqCst), 1);
    }
}
