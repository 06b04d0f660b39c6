//! Thread ↔ indicator bookkeeping.
//!
//! The registry records which threads currently execute under which
//! indicators. That lets `check_canceled()` find the calling thread's
//! indicator by thread identity alone, and lets a canceled indicator flag
//! every thread running under it.
//!
//! All membership state sits behind one mutex, and the check-canceled behavior
//! flag is recomputed under that same mutex after every mutation. A thread
//! observing a canceled registry state therefore also observes the flag that
//! makes `check_canceled()` look at it.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Weak,
    },
    thread::{self, ThreadId},
};

use parking_lot::{Mutex, RwLock};

use crate::{
    check::{AtomicBehavior, CheckCanceledBehavior, CheckCanceledHook},
    config::ProgressConfig,
    indicator::{chain, Indicator, IndicatorId},
    log::{contract_violation, trace},
    pinger,
    scheduler::{ScheduledHandle, Scheduler},
};

/// The threads running under one indicator.
pub(crate) struct UnderIndicator {
    pub(crate) indicator: Arc<dyn Indicator>,
    pub(crate) threads: HashSet<ThreadId>,
}

/// A registered non-standard indicator, counted per registration.
pub(crate) struct NonStandard {
    pub(crate) indicator: Arc<dyn Indicator>,
    pub(crate) registrations: usize,
}

/// State guarded by the registry's lock.
#[derive(Default)]
pub(crate) struct RegistryState {
    pub(crate) threads_under_indicator: HashMap<IndicatorId, UnderIndicator>,
    pub(crate) threads_under_canceled_indicator: HashSet<ThreadId>,
    pub(crate) non_standard_indicators: HashMap<IndicatorId, NonStandard>,
    pub(crate) ping: Option<ScheduledHandle>,
    pub(crate) prioritizing: bool,
}

/// A thread's active and outermost indicators.
struct ThreadIndicators {
    current: Arc<dyn Indicator>,
    top_level: Arc<dyn Indicator>,
}

/// The process-wide registry of threads running under indicators.
pub struct ProgressRegistry {
    this: Weak<ProgressRegistry>,
    config: ProgressConfig,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<RegistryState>,
    // Each thread only ever writes its own entry.
    threads: RwLock<HashMap<ThreadId, ThreadIndicators>>,
    behavior: AtomicBehavior,
    // Written only while `state` is locked.
    hook: RwLock<Option<Arc<dyn CheckCanceledHook>>>,
    unsafe_progress_count: AtomicUsize,
}

impl ProgressRegistry {
    /// Creates a registry polling non-standard indicators on `scheduler`.
    pub fn new(config: ProgressConfig, scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            scheduler,
            state: Mutex::new(RegistryState::default()),
            threads: RwLock::new(HashMap::new()),
            behavior: AtomicBehavior::from(CheckCanceledBehavior::None),
            hook: RwLock::new(None),
            unsafe_progress_count: AtomicUsize::new(0),
        })
    }

    /// Returns the registry's configuration.
    pub fn config(&self) -> &ProgressConfig {
        &self.config
    }

    pub(crate) fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub(crate) fn weak(&self) -> Weak<Self> {
        self.this.clone()
    }

    /// Returns the current check-canceled behavior.
    pub fn behavior(&self) -> CheckCanceledBehavior {
        self.behavior.load(Ordering::Acquire)
    }

    /// Returns the installed check-canceled hook.
    pub fn check_canceled_hook(&self) -> Option<Arc<dyn CheckCanceledHook>> {
        self.hook.read().clone()
    }

    /// Installs `hook`, replacing and returning the previous one.
    ///
    /// There is a single slot: the last installation wins.
    pub fn set_check_canceled_hook(
        &self,
        hook: Option<Arc<dyn CheckCanceledHook>>,
    ) -> Option<Arc<dyn CheckCanceledHook>> {
        let state = self.state.lock();
        let previous = std::mem::replace(&mut *self.hook.write(), hook);
        self.update_behavior(&state);
        previous
    }

    /// Runs the installed hook, returning whether it did expensive work.
    pub fn run_check_canceled_hook(&self, indicator: Option<&Arc<dyn Indicator>>) -> bool {
        let hook = self.hook.read().clone();
        hook.is_some_and(|hook| hook.run_hook(indicator))
    }

    pub(crate) fn set_prioritizing(&self, prioritizing: bool) {
        let mut state = self.state.lock();
        state.prioritizing = prioritizing;
        self.update_behavior(&state);
    }

    /// Returns `true` while some thread is effectively prioritized.
    pub fn is_prioritizing(&self) -> bool {
        self.state.lock().prioritizing
    }

    /// Recomputes the check-canceled behavior flag.
    pub fn update_should_check_canceled(&self) {
        let state = self.state.lock();
        self.update_behavior(&state);
    }

    // Must be called with `state` locked.
    fn update_behavior(&self, state: &RegistryState) {
        let has_hook = self.hook.read().is_some() || state.prioritizing;
        let has_canceled_thread = !state.threads_under_canceled_indicator.is_empty();

        let behavior = CheckCanceledBehavior::compute(
            has_hook,
            has_canceled_thread,
            self.config.check_canceled_enabled,
        );

        let previous = self.behavior.swap(behavior, Ordering::AcqRel);

        if previous != behavior {
            trace!(from = ?previous, to = ?behavior, "Check-canceled behavior changed");
        }
    }

    /// Returns the indicator `thread` currently runs under.
    pub fn current_indicator(&self, thread: ThreadId) -> Option<Arc<dyn Indicator>> {
        self.threads
            .read()
            .get(&thread)
            .map(|indicators| Arc::clone(&indicators.current))
    }

    /// Returns the outermost indicator `thread` currently runs under.
    pub fn top_level_indicator(&self, thread: ThreadId) -> Option<Arc<dyn Indicator>> {
        self.threads
            .read()
            .get(&thread)
            .map(|indicators| Arc::clone(&indicators.top_level))
    }

    fn set_current_indicator(&self, thread: ThreadId, indicator: Option<Arc<dyn Indicator>>) {
        let mut threads = self.threads.write();

        let Some(indicator) = indicator else {
            threads.remove(&thread);
            return;
        };

        match threads.get_mut(&thread) {
            Some(indicators) => indicators.current = indicator,
            None => {
                let top_level = Arc::clone(&indicator);
                threads.insert(
                    thread,
                    ThreadIndicators {
                        current: indicator,
                        top_level,
                    },
                );
            }
        }
    }

    /// Returns `true` while some work runs with no indicator at all.
    pub fn has_unsafe_progress(&self) -> bool {
        self.unsafe_progress_count.load(Ordering::SeqCst) > 0
    }

    /// Runs `work` on the calling thread under `indicator`.
    ///
    /// While `work` runs, `indicator` is the thread's current indicator and the
    /// thread is registered under every indicator of its wrapping chain.
    /// Re-entrant calls with the thread's current indicator run `work` directly.
    /// Passing `None` runs `work` untracked.
    pub fn execute_process_under_progress<R>(
        self: &Arc<Self>,
        indicator: Option<&Arc<dyn Indicator>>,
        work: impl FnOnce() -> R,
    ) -> R {
        let Some(indicator) = indicator else {
            let _unsafe_progress = UnsafeProgress::enter(&self.unsafe_progress_count);
            return work();
        };

        let thread = thread::current().id();
        let old = self.current_indicator(thread);

        if old.as_ref().is_some_and(|old| old.id() == indicator.id()) {
            return work();
        }

        self.set_current_indicator(thread, Some(Arc::clone(indicator)));

        let restore = RestoreCurrent {
            registry: self,
            thread,
            old,
        };

        self.register_and_run(indicator, thread, restore.old.as_ref(), work)
    }

    fn register_and_run<R>(
        self: &Arc<Self>,
        indicator: &Arc<dyn Indicator>,
        thread: ThreadId,
        old: Option<&Arc<dyn Indicator>>,
        work: impl FnOnce() -> R,
    ) -> R {
        let mut links = Vec::new();

        {
            let mut state = self.state.lock();
            let mut one_of_the_indicators_is_canceled = false;

            for link in chain(indicator) {
                link.bind_registry(self);

                let under = state
                    .threads_under_indicator
                    .entry(link.id())
                    .or_insert_with(|| UnderIndicator {
                        indicator: Arc::clone(&link),
                        threads: HashSet::new(),
                    });
                let inserted = under.threads.insert(thread);

                if !link.is_standard() {
                    state
                        .non_standard_indicators
                        .entry(link.id())
                        .or_insert_with(|| NonStandard {
                            indicator: Arc::clone(&link),
                            registrations: 0,
                        })
                        .registrations += 1;
                    pinger::start(self, &mut state);
                }

                one_of_the_indicators_is_canceled |= link.is_canceled();

                links.push(RegisteredLink { link, inserted });
            }

            if one_of_the_indicators_is_canceled {
                state.threads_under_canceled_indicator.insert(thread);
            } else {
                state.threads_under_canceled_indicator.remove(&thread);
            }

            self.update_behavior(&state);
        }

        let _registration = Registration {
            registry: self,
            thread,
            old,
            links,
        };

        work()
    }

    fn deregister(&self, registration: &mut Registration<'_>) {
        let thread = registration.thread;
        let mut state = self.state.lock();

        for RegisteredLink { link, inserted } in registration.links.drain(..) {
            let id = link.id();

            if inserted {
                if let Some(under) = state.threads_under_indicator.get_mut(&id) {
                    under.threads.remove(&thread);
                    if under.threads.is_empty() {
                        state.threads_under_indicator.remove(&id);
                    }
                }
            }

            if !link.is_standard() {
                if let Some(non_standard) = state.non_standard_indicators.get_mut(&id) {
                    non_standard.registrations -= 1;
                    if non_standard.registrations == 0 {
                        state.non_standard_indicators.remove(&id);
                    }
                }

                if state.non_standard_indicators.is_empty() {
                    pinger::stop(&mut state);
                }
            }
        }

        // By now the restored indicator may have been canceled.
        if registration.old.is_some_and(|old| old.is_canceled()) {
            state.threads_under_canceled_indicator.insert(thread);
        } else {
            state.threads_under_canceled_indicator.remove(&thread);
        }

        self.update_behavior(&state);
    }

    /// Marks threads running under `indicator` as running under a canceled indicator.
    ///
    /// Only threads whose current wrapping chain still contains `indicator`
    /// are marked; threads that moved on to unrelated indicators are left alone.
    pub fn indicator_canceled(&self, indicator: IndicatorId) {
        let mut state = self.state.lock();

        let Some(under) = state.threads_under_indicator.get(&indicator) else {
            return;
        };

        let canceled_threads: Vec<ThreadId> = under
            .threads
            .iter()
            .copied()
            .filter(|&thread| {
                self.current_indicator(thread).is_some_and(|current| {
                    chain(&current).any(|link| link.id() == indicator)
                })
            })
            .collect();

        if canceled_threads.is_empty() {
            return;
        }

        trace!(
            indicator = indicator.0,
            threads = canceled_threads.len(),
            "Marking threads as canceled"
        );

        state
            .threads_under_canceled_indicator
            .extend(canceled_threads);

        self.update_behavior(&state);
    }

    /// Returns `true` if `thread` is registered under `indicator`.
    pub fn is_thread_under_indicator(&self, indicator: IndicatorId, thread: ThreadId) -> bool {
        self.state
            .lock()
            .threads_under_indicator
            .get(&indicator)
            .is_some_and(|under| under.threads.contains(&thread))
    }

    /// Returns the number of threads registered under `indicator`.
    pub fn thread_count_under(&self, indicator: IndicatorId) -> usize {
        self.state
            .lock()
            .threads_under_indicator
            .get(&indicator)
            .map_or(0, |under| under.threads.len())
    }

    /// Returns `true` if `thread` is marked as running under a canceled indicator.
    pub fn is_canceled_thread(&self, thread: ThreadId) -> bool {
        self.state
            .lock()
            .threads_under_canceled_indicator
            .contains(&thread)
    }

    /// Returns every indicator some thread is registered under.
    pub fn indicators(&self) -> Vec<Arc<dyn Indicator>> {
        self.state
            .lock()
            .threads_under_indicator
            .values()
            .map(|under| Arc::clone(&under.indicator))
            .collect()
    }

    /// Returns `true` if some thread is registered under a modal indicator.
    pub fn has_modal_indicator(&self) -> bool {
        self.state
            .lock()
            .threads_under_indicator
            .values()
            .any(|under| under.indicator.is_modal())
    }

    /// Returns the number of distinct non-standard indicators being polled.
    pub fn non_standard_count(&self) -> usize {
        self.state.lock().non_standard_indicators.len()
    }

    /// Returns `true` while the non-standard indicator pinger is scheduled.
    pub fn is_pinging(&self) -> bool {
        self.state.lock().ping.is_some()
    }

    pub(crate) fn non_standard_indicators(&self) -> Vec<Arc<dyn Indicator>> {
        self.state
            .lock()
            .non_standard_indicators
            .values()
            .map(|non_standard| Arc::clone(&non_standard.indicator))
            .collect()
    }

    /// Checks that the calling thread runs under `indicator`, logging an error otherwise.
    pub fn assert_under_progress(&self, indicator: &Arc<dyn Indicator>) -> bool {
        let under = self.is_thread_under_indicator(indicator.id(), thread::current().id());

        if !under {
            contract_violation!(
                indicator = indicator.id().0,
                "Must be executed under the progress indicator. See `run_process()`."
            );
        }

        under
    }

    /// Stops background polling.
    pub fn dispose(&self) {
        pinger::stop(&mut self.state.lock());
    }
}

impl Drop for ProgressRegistry {
    fn drop(&mut self) {
        pinger::stop(self.state.get_mut());
    }
}

impl fmt::Debug for ProgressRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("ProgressRegistry")
            .field("indicators", &state.threads_under_indicator.len())
            .field(
                "canceled_threads",
                &state.threads_under_canceled_indicator.len(),
            )
            .field("non_standard", &state.non_standard_indicators.len())
            .field("behavior", &self.behavior())
            .finish()
    }
}

struct RegisteredLink {
    link: Arc<dyn Indicator>,
    // `false` if the thread was already registered under `link` by an outer call.
    inserted: bool,
}

struct Registration<'a> {
    registry: &'a ProgressRegistry,
    thread: ThreadId,
    old: Option<&'a Arc<dyn Indicator>>,
    links: Vec<RegisteredLink>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let registry = self.registry;
        registry.deregister(self);
    }
}

struct RestoreCurrent<'a> {
    registry: &'a ProgressRegistry,
    thread: ThreadId,
    old: Option<Arc<dyn Indicator>>,
}

impl Drop for RestoreCurrent<'_> {
    fn drop(&mut self) {
        self.registry
            .set_current_indicator(self.thread, self.old.take());
    }
}

struct UnsafeProgress<'a>(&'a AtomicUsize);

impl<'a> UnsafeProgress<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for UnsafeProgress<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
