//! Giving foreground work priority over background work.
//!
//! A thread may ask to be prioritized for the duration of a computation.
//! Other threads sharing locks with it then voluntarily yield at their
//! cancellation checkpoints. This mitigates priority inversion; it is not a
//! scheduler. Nothing is ever suspended forcibly, and prioritization that
//! lasts longer than a safety ceiling is dropped.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use parking_lot::{Mutex, RwLock};

use crate::{
    config::ProgressConfig,
    dispatch::DispatchThread,
    log::{contract_violation, debug, trace},
    scheduler::Scheduler,
    thread_state::{BlockedGuard, ThreadStates},
};

/// Gets notified when prioritization becomes effective or stops being effective.
pub trait PrioritizationListener: Send + Sync {
    /// The first thread became effectively prioritized.
    fn prioritizing_started(&self);

    /// No thread is effectively prioritized anymore.
    fn prioritizing_finished(&self);
}

#[derive(Default)]
struct PrioritizationState {
    prioritized: HashSet<ThreadId>,
    deprioritizations: usize,
}

/// Tracks prioritized threads and makes other threads yield to them.
pub struct ThreadPrioritizer {
    this: Weak<ThreadPrioritizer>,
    config: ProgressConfig,
    dispatch: Arc<dyn DispatchThread>,
    scheduler: Arc<dyn Scheduler>,
    listener: Option<Arc<dyn PrioritizationListener>>,
    state: Mutex<PrioritizationState>,
    // Empty while suppressed or while nobody asks for priority.
    effective: RwLock<Arc<[ThreadId]>>,
    epoch: Instant,
    prioritizing_started: AtomicU64,
    thread_states: ThreadStates,
}

impl ThreadPrioritizer {
    /// Creates a prioritizer.
    ///
    /// `scheduler` runs the rechecks after yielding was suspended because a
    /// prioritized thread was blocked.
    pub fn new(
        config: ProgressConfig,
        dispatch: Arc<dyn DispatchThread>,
        scheduler: Arc<dyn Scheduler>,
        listener: Option<Arc<dyn PrioritizationListener>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            dispatch,
            scheduler,
            listener,
            state: Mutex::new(PrioritizationState::default()),
            effective: RwLock::new(Vec::new().into()),
            epoch: Instant::now(),
            prioritizing_started: AtomicU64::new(0),
            thread_states: ThreadStates::new(),
        })
    }

    /// Runs `work` with the calling thread prioritized.
    ///
    /// Nested calls on an already prioritized thread just run `work`.
    pub fn compute_prioritized<R>(&self, work: impl FnOnce() -> R) -> R {
        let thread = thread::current().id();

        let prioritize = {
            let mut state = self.state.lock();

            if state.prioritized.contains(&thread) {
                false
            } else {
                if state.prioritized.is_empty() {
                    self.prioritizing_started
                        .store(self.nanos_since_epoch(), Ordering::SeqCst);
                }
                state.prioritized.insert(thread);
                self.update_effective(&state);
                true
            }
        };

        let _unprioritize = prioritize.then(|| Unprioritize {
            prioritizer: self,
            thread,
        });

        work()
    }

    /// Returns `true` if the calling thread asked for priority.
    pub fn is_current_thread_prioritized(&self) -> bool {
        self.is_prioritized_thread(thread::current().id())
    }

    /// Returns `true` if `thread` asked for priority.
    pub fn is_prioritized_thread(&self, thread: ThreadId) -> bool {
        self.state.lock().prioritized.contains(&thread)
    }

    /// Returns `true` if some thread is effectively prioritized.
    pub fn is_prioritizing(&self) -> bool {
        !self.effective.read().is_empty()
    }

    fn is_current_thread_effectively_prioritized(&self) -> bool {
        let current = thread::current().id();
        self.effective.read().contains(&current)
    }

    /// Yields for a moment if another thread is effectively prioritized.
    ///
    /// Meant to be called at safe points of low-priority work. Returns `true`
    /// if the calling thread yielded, in which case the caller should recheck
    /// whatever it was about to do.
    pub fn sleep_if_needed_to_give_priority_to_another_thread(&self) -> bool {
        if !self.is_prioritizing() {
            return false;
        }

        if !self.is_current_thread_effectively_prioritized()
            && self.check_low_priority_really_applicable()
        {
            thread::park_timeout(self.config.deprioritization_park);
            self.avoid_blocking_prioritizing_thread();
            return true;
        }

        false
    }

    fn check_low_priority_really_applicable(&self) -> bool {
        let elapsed = self.prioritizing_elapsed();

        // Very short prioritized activities are not worth yielding for.
        if elapsed < self.config.min_prioritization {
            return false;
        }

        if self.avoid_blocking_prioritizing_thread() {
            return false;
        }

        if self.dispatch.is_dispatch_thread() {
            return false;
        }

        if elapsed > self.config.max_prioritization {
            contract_violation!(
                elapsed = ?elapsed,
                "Prioritization exceeded its safety ceiling, forgot to stop prioritizing?"
            );
            self.stop_all_prioritization();
            return false;
        }

        true
    }

    fn avoid_blocking_prioritizing_thread(&self) -> bool {
        let blocked = {
            let effective = self.effective.read();
            self.thread_states.any_blocked(effective.iter())
        };

        if !blocked {
            return false;
        }

        // The calling thread might hold a lock a prioritized thread is waiting for.
        trace!("Prioritized thread is blocked, suppressing prioritization");
        self.suppress_prioritizing();
        self.check_later_threads_are_unblocked();

        true
    }

    fn is_any_requested_thread_blocked(&self) -> bool {
        let state = self.state.lock();
        self.thread_states.any_blocked(state.prioritized.iter())
    }

    fn check_later_threads_are_unblocked(&self) {
        let this = self.this.clone();

        let scheduled = self.scheduler.schedule(
            self.config.unblock_recheck_delay,
            Box::new(move || {
                let Some(prioritizer) = this.upgrade() else {
                    return;
                };

                if prioritizer.is_any_requested_thread_blocked() {
                    prioritizer.check_later_threads_are_unblocked();
                } else {
                    prioritizer.restore_prioritizing();
                }
            }),
        );

        match scheduled {
            Ok(()) => {}
            #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
            Err(err) => {
                trace!(error = %err, "Unblock recheck rejected, restoring prioritization");
                self.restore_prioritizing();
            }
        }
    }

    /// Suspends prioritization until the matching `restore_prioritizing()`.
    ///
    /// Calls nest.
    pub fn suppress_prioritizing(&self) {
        let mut state = self.state.lock();

        state.deprioritizations += 1;

        if state.deprioritizations == self.config.suppression_nesting_limit {
            contract_violation!(
                depth = state.deprioritizations,
                "A suspiciously high nesting of suppress_prioritizing(), forgot to call restore_prioritizing()?"
            );
        }

        self.update_effective(&state);
    }

    /// Undoes one `suppress_prioritizing()`.
    pub fn restore_prioritizing(&self) {
        let mut state = self.state.lock();

        if state.deprioritizations == 0 {
            contract_violation!("Unmatched suppress_prioritizing()/restore_prioritizing()");
        } else {
            state.deprioritizations -= 1;
        }

        self.update_effective(&state);
    }

    /// Returns the current `suppress_prioritizing()` nesting depth.
    pub fn suppression_depth(&self) -> usize {
        self.state.lock().deprioritizations
    }

    /// Drops every thread's priority.
    pub fn stop_all_prioritization(&self) {
        let mut state = self.state.lock();
        state.prioritized.clear();
        self.update_effective(&state);
    }

    /// Marks the calling thread as blocked until the guard is dropped.
    ///
    /// A blocked prioritized thread makes others stop yielding to it.
    pub fn blocking(&self) -> BlockedGuard<'_> {
        self.thread_states.blocking()
    }

    /// Returns the blocked-thread tracker.
    pub fn thread_states(&self) -> &ThreadStates {
        &self.thread_states
    }

    // Must be called with `state` locked.
    fn update_effective(&self, state: &PrioritizationState) {
        let current: Arc<[ThreadId]> =
            if state.deprioritizations > 0 || state.prioritized.is_empty() {
                Vec::new().into()
            } else {
                state.prioritized.iter().copied().collect()
            };

        let was_empty = {
            let mut effective = self.effective.write();
            let was_empty = effective.is_empty();
            *effective = Arc::clone(&current);
            was_empty
        };

        if was_empty && !current.is_empty() {
            debug!(threads = current.len(), "Prioritizing started");
            if let Some(listener) = &self.listener {
                listener.prioritizing_started();
            }
        } else if !was_empty && current.is_empty() {
            debug!("Prioritizing finished");
            if let Some(listener) = &self.listener {
                listener.prioritizing_finished();
            }
        }
    }

    fn nanos_since_epoch(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn prioritizing_elapsed(&self) -> Duration {
        let started = self.prioritizing_started.load(Ordering::SeqCst);
        Duration::from_nanos(self.nanos_since_epoch().saturating_sub(started))
    }
}

struct Unprioritize<'a> {
    prioritizer: &'a ThreadPrioritizer,
    thread: ThreadId,
}

impl Drop for Unprioritize<'_> {
    fn drop(&mut self) {
        let mut state = self.prioritizer.state.lock();
        state.prioritized.remove(&self.thread);
        self.prioritizer.update_effective(&state);
    }
}

#[cfg(test)]
mod tests;
