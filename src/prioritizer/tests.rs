use std::{
    sync::{atomic::AtomicUsize, mpsc},
    time::Instant,
};

use crate::{
    dispatch::{DesignatedDispatchThread, NoDispatchThread},
    scheduler::ThreadScheduler,
};

use super::*;

#[derive(Default)]
struct SpyListener {
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl SpyListener {
    fn counts(&self) -> (usize, usize) {
        (
            self.started.load(Ordering::SeqCst),
            self.finished.load(Ordering::SeqCst),
        )
    }
}

impl PrioritizationListener for SpyListener {
    fn prioritizing_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn prioritizing_finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

fn eager_config() -> ProgressConfig {
    ProgressConfig::default().min_prioritization(Duration::ZERO)
}

fn prioritizer_with(
    config: ProgressConfig,
    dispatch: Arc<dyn DispatchThread>,
) -> (Arc<ThreadPrioritizer>, Arc<SpyListener>) {
    let listener = Arc::new(SpyListener::default());
    let prioritizer = ThreadPrioritizer::new(
        config,
        dispatch,
        Arc::new(ThreadScheduler::new()),
        Some(Arc::<SpyListener>::clone(&listener) as Arc<dyn PrioritizationListener>),
    );
    (prioritizer, listener)
}

fn prioritizer(config: ProgressConfig) -> (Arc<ThreadPrioritizer>, Arc<SpyListener>) {
    prioritizer_with(config, Arc::new(NoDispatchThread))
}

/// Runs `f` while another thread sits inside `compute_prioritized()`.
fn while_prioritized_elsewhere(prioritizer: &ThreadPrioritizer, f: impl FnOnce(ThreadId)) {
    thread::scope(|scope| {
        let (ready_sender, ready_receiver) = mpsc::channel();
        let (release_sender, release_receiver) = mpsc::channel::<()>();

        scope.spawn(move || {
            prioritizer.compute_prioritized(|| {
                ready_sender.send(thread::current().id()).unwrap();
                let _ = release_receiver.recv();
            })
        });

        let prioritized = ready_receiver.recv().unwrap();
        f(prioritized);
        drop(release_sender);
    });
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn nested_prioritization_notifies_once() {
    let (prioritizer, listener) = prioritizer(eager_config());

    prioritizer.compute_prioritized(|| {
        assert!(prioritizer.is_current_thread_prioritized());
        assert!(prioritizer.is_prioritizing());

        prioritizer.compute_prioritized(|| {
            assert!(prioritizer.is_current_thread_prioritized());
        });

        // The inner call must not unprioritize the outer one.
        assert!(prioritizer.is_current_thread_prioritized());
        assert_eq!(listener.counts(), (1, 0));
    });

    assert!(!prioritizer.is_current_thread_prioritized());
    assert!(!prioritizer.is_prioritizing());
    assert_eq!(listener.counts(), (1, 1));
}

#[test]
fn prioritization_ends_on_panic() {
    let (prioritizer, _listener) = prioritizer(eager_config());

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        prioritizer.compute_prioritized(|| panic!("prioritized work failed"))
    }));

    assert!(result.is_err());
    assert!(!prioritizer.is_current_thread_prioritized());
    assert!(!prioritizer.is_prioritizing());
}

#[test]
fn low_priority_thread_yields_to_prioritized_one() {
    let (prioritizer, _listener) = prioritizer(eager_config());

    assert!(!prioritizer.sleep_if_needed_to_give_priority_to_another_thread());

    while_prioritized_elsewhere(&prioritizer, |prioritized| {
        assert!(prioritizer.is_prioritized_thread(prioritized));
        assert!(!prioritizer.is_current_thread_prioritized());

        assert!(prioritizer.sleep_if_needed_to_give_priority_to_another_thread());
    });

    assert!(!prioritizer.sleep_if_needed_to_give_priority_to_another_thread());
}

#[test]
fn prioritized_thread_never_yields() {
    let (prioritizer, _listener) = prioritizer(eager_config());

    while_prioritized_elsewhere(&prioritizer, |_| {
        prioritizer.compute_prioritized(|| {
            assert!(!prioritizer.sleep_if_needed_to_give_priority_to_another_thread());
        });
    });
}

#[test]
fn young_prioritization_is_not_worth_yielding_for() {
    let config = ProgressConfig::default().min_prioritization(Duration::from_secs(3600));
    let (prioritizer, _listener) = prioritizer(config);

    while_prioritized_elsewhere(&prioritizer, |_| {
        assert!(!prioritizer.sleep_if_needed_to_give_priority_to_another_thread());
    });
}

#[test]
fn dispatch_thread_never_yields() {
    let (prioritizer, _listener) =
        prioritizer_with(eager_config(), Arc::new(DesignatedDispatchThread::current()));

    while_prioritized_elsewhere(&prioritizer, |_| {
        assert!(!prioritizer.sleep_if_needed_to_give_priority_to_another_thread());
    });
}

#[test]
fn overlong_prioritization_is_dropped() {
    let config = eager_config().max_prioritization(Duration::from_millis(10));
    let (prioritizer, listener) = prioritizer(config);

    while_prioritized_elsewhere(&prioritizer, |prioritized| {
        thread::sleep(Duration::from_millis(30));

        assert!(!prioritizer.sleep_if_needed_to_give_priority_to_another_thread());

        assert!(!prioritizer.is_prioritized_thread(prioritized));
        assert!(!prioritizer.is_prioritizing());
        assert_eq!(listener.counts(), (1, 1));
    });
}

#[test]
fn suppression_nests_and_notifies() {
    let (prioritizer, listener) = prioritizer(eager_config());

    prioritizer.compute_prioritized(|| {
        prioritizer.suppress_prioritizing();
        prioritizer.suppress_prioritizing();
        assert!(!prioritizer.is_prioritizing());
        assert!(prioritizer.is_current_thread_prioritized());
        assert_eq!(listener.counts(), (1, 1));

        prioritizer.restore_prioritizing();
        assert!(!prioritizer.is_prioritizing());

        prioritizer.restore_prioritizing();
        assert!(prioritizer.is_prioritizing());
        assert_eq!(listener.counts(), (2, 1));
    });

    assert_eq!(listener.counts(), (2, 2));
}

#[test]
fn unmatched_restore_is_ignored() {
    let (prioritizer, _listener) = prioritizer(eager_config());

    prioritizer.restore_prioritizing();

    assert_eq!(prioritizer.suppression_depth(), 0);

    prioritizer.compute_prioritized(|| {
        assert!(prioritizer.is_prioritizing());
    });
}

#[test]
fn blocked_prioritized_thread_suspends_yielding_until_unblocked() {
    let (prioritizer, _listener) = prioritizer(eager_config());

    thread::scope(|scope| {
        let (ready_sender, ready_receiver) = mpsc::channel();
        let (unblock_sender, unblock_receiver) = mpsc::channel::<()>();
        let (release_sender, release_receiver) = mpsc::channel::<()>();

        let prioritizer = &prioritizer;

        scope.spawn(move || {
            prioritizer.compute_prioritized(|| {
                {
                    let _blocked = prioritizer.blocking();
                    ready_sender.send(()).unwrap();
                    let _ = unblock_receiver.recv();
                }
                let _ = release_receiver.recv();
            })
        });

        ready_receiver.recv().unwrap();

        assert!(!prioritizer.sleep_if_needed_to_give_priority_to_another_thread());
        assert_eq!(prioritizer.suppression_depth(), 1);
        assert!(!prioritizer.is_prioritizing());

        // Still blocked: the recheck keeps prioritization suppressed.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(prioritizer.suppression_depth(), 1);

        drop(unblock_sender);
        wait_until("prioritization to be restored", || {
            prioritizer.suppression_depth() == 0
        });

        assert!(prioritizer.is_prioritizing());
        assert!(prioritizer.sleep_if_needed_to_give_priority_to_another_thread());

        drop(release_sender);
    });
}
