//! Progress indicators.

use std::{
    backtrace::Backtrace,
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, OnceLock, Weak,
    },
};

use parking_lot::Mutex;

use crate::{
    activity::{ActivitySource, ActivityToken},
    error::{Canceled, IndicatorError},
    log::{contract_violation, debug, warning},
    non_cancelable,
    registry::ProgressRegistry,
};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// An indicator's unique identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct IndicatorId(pub(crate) usize);

impl Default for IndicatorId {
    fn default() -> Self {
        Self::new_unique()
    }
}

impl IndicatorId {
    /// Returns a fresh identifier, distinct from all previously returned ones.
    pub fn new_unique() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns the raw internal identifier value.
    pub fn as_raw(&self) -> usize {
        self.0
    }
}

/// Types able to keep a caller's event loop alive while it waits.
///
/// Used by modal runs: the calling thread pumps its events until the
/// computation has completed instead of blocking outright.
pub trait BlockingPump: Send + Sync {
    /// Pumps events until `done()` returns `true`.
    fn pump_until(&self, done: &dyn Fn() -> bool);
}

/// An entry of an indicator's save/restore stack.
#[derive(Clone, PartialEq, Debug)]
pub struct SavedState {
    /// The saved primary text.
    pub text: String,
    /// The saved fraction.
    pub fraction: f64,
    /// The saved secondary text.
    pub text2: String,
}

/// A copy of an indicator's observable state.
#[derive(Clone, PartialEq, Default, Debug)]
pub struct IndicatorSnapshot {
    /// The primary text.
    pub text: String,
    /// The secondary text.
    pub text2: String,
    /// The completed fraction.
    pub fraction: f64,
    /// Whether the fraction is meaningless.
    pub indeterminate: bool,
    /// Whether the indicator is running.
    pub running: bool,
    /// Whether the indicator is canceled.
    pub canceled: bool,
    /// The save/restore stack, bottom first.
    pub states: Vec<SavedState>,
}

/// The capabilities the cancellation machinery needs from an indicator.
///
/// Indicators are shared as `Arc<dyn Indicator>` and identified by [`Indicator::id`].
pub trait Indicator: Send + Sync {
    /// Returns the indicator's identity.
    fn id(&self) -> IndicatorId;

    /// Marks the indicator as running.
    fn start(&self) -> Result<(), IndicatorError>;

    /// Marks the indicator as finished.
    fn stop(&self) -> Result<(), IndicatorError>;

    /// Returns `true` between `start()` and `stop()`.
    fn is_running(&self) -> bool;

    /// Requests cancellation. Idempotent.
    fn cancel(&self);

    /// Returns `true` once cancellation was requested.
    fn is_canceled(&self) -> bool;

    /// Returns `false` while cancellation must not be observed.
    fn is_cancelable(&self) -> bool {
        !non_cancelable::is_active()
    }

    /// Returns `Err(Canceled)` if the indicator is canceled and currently cancelable.
    fn check_canceled(&self) -> Result<(), Canceled> {
        if self.is_canceled() && self.is_cancelable() {
            return Err(Canceled::new());
        }

        Ok(())
    }

    /// Returns `true` if the indicator establishes a blocking (modal) scope.
    fn is_modal(&self) -> bool {
        false
    }

    /// Returns the indicator establishing the modal scope this one runs in, if any.
    fn modality_progress(&self) -> Option<Arc<dyn Indicator>> {
        None
    }

    /// Returns the indicator wrapped by this one, if any.
    fn original(&self) -> Option<Arc<dyn Indicator>> {
        None
    }

    /// Returns `true` if cancellation of this indicator is always announced to
    /// its registry, so it needs no background polling.
    fn is_standard(&self) -> bool {
        false
    }

    /// Returns the indicator's event-pump capability for modal runs, if any.
    fn blocking_pump(&self) -> Option<Arc<dyn BlockingPump>> {
        None
    }

    /// Returns a copy of the indicator's state, if it exposes one.
    fn snapshot(&self) -> Option<IndicatorSnapshot> {
        None
    }

    /// Called when a thread registers under this indicator in `registry`.
    fn bind_registry(&self, _registry: &Arc<ProgressRegistry>) {}
}

impl fmt::Debug for dyn Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indicator")
            .field("id", &self.id())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Iterates `indicator` followed by every indicator it (transitively) wraps.
pub fn chain(indicator: &Arc<dyn Indicator>) -> impl Iterator<Item = Arc<dyn Indicator>> {
    std::iter::successors(Some(Arc::clone(indicator)), |link| link.original())
}

/// Returns the innermost indicator of `indicator`'s wrapping chain.
pub fn unwrap(indicator: &Arc<dyn Indicator>) -> Arc<dyn Indicator> {
    chain(indicator)
        .last()
        .unwrap_or_else(|| Arc::clone(indicator))
}

/// Construction options of a [`ProgressIndicator`].
#[derive(Clone)]
pub struct IndicatorOptions {
    reusable: bool,
    modal: bool,
    kind: &'static str,
    activity: Option<Arc<dyn ActivitySource>>,
    blocking_pump: Option<Arc<dyn BlockingPump>>,
}

impl Default for IndicatorOptions {
    /// Returns options with following default values:
    ///
    /// - `reusable: false`,
    /// - `modal: false`,
    /// - `kind: "ProgressIndicator"`,
    /// - `activity: None`,
    /// - `blocking_pump: None`,
    fn default() -> Self {
        Self {
            reusable: false,
            modal: false,
            kind: "ProgressIndicator",
            activity: None,
            blocking_pump: None,
        }
    }
}

impl IndicatorOptions {
    /// Builder-style method for allowing restarts after cancellation without notice.
    pub fn reusable(mut self, reusable: bool) -> Self {
        self.reusable = reusable;
        self
    }

    /// Builder-style method for making the indicator modal.
    pub fn modal(mut self, modal: bool) -> Self {
        self.modal = modal;
        self
    }

    /// Builder-style method for setting the indicator's kind.
    ///
    /// The kind groups indicators for the one-time notice about reusing a
    /// canceled indicator.
    pub fn kind(mut self, kind: &'static str) -> Self {
        self.kind = kind;
        self
    }

    /// Builder-style method for setting the source of activity tokens.
    pub fn activity(mut self, activity: Arc<dyn ActivitySource>) -> Self {
        self.activity = Some(activity);
        self
    }

    /// Builder-style method for setting the event pump used by modal runs.
    pub fn blocking_pump(mut self, pump: Arc<dyn BlockingPump>) -> Self {
        self.blocking_pump = Some(pump);
        self
    }
}

struct IndicatorState {
    text: String,
    text2: String,
    fraction: f64,
    indeterminate: bool,
    running: bool,
    finished: bool,
    non_cancelable_depth: usize,
    states: Vec<SavedState>,
    activity: Option<ActivityToken>,
    dont_start_activity: bool,
    modality_progress: Option<Arc<dyn Indicator>>,
    cancellation_trace: Option<Arc<Backtrace>>,
}

impl Default for IndicatorState {
    fn default() -> Self {
        Self {
            text: String::new(),
            text2: String::new(),
            fraction: 0.0,
            indeterminate: true,
            running: false,
            finished: false,
            non_cancelable_depth: 0,
            states: Vec::new(),
            activity: None,
            dont_start_activity: false,
            modality_progress: None,
            cancellation_trace: None,
        }
    }
}

/// The standard indicator.
///
/// Its cancellation is announced to the registry it runs in, which makes it
/// visible to `check_canceled()` on every thread registered under it.
pub struct ProgressIndicator {
    id: IndicatorId,
    options: IndicatorOptions,
    original: Option<Arc<dyn Indicator>>,
    canceled: AtomicBool,
    state: Mutex<IndicatorState>,
    registry: Mutex<Weak<ProgressRegistry>>,
}

impl ProgressIndicator {
    /// Creates an indicator.
    pub fn new(options: IndicatorOptions) -> Arc<Self> {
        Arc::new(Self::new_impl(options, None))
    }

    /// Creates an indicator wrapping `original`.
    ///
    /// The wrapper starts out with a copy of the original's state, counts as
    /// canceled whenever the original is, and never begins activities of its own.
    pub fn wrap(original: Arc<dyn Indicator>) -> Arc<Self> {
        let options = IndicatorOptions::default()
            .modal(original.is_modal())
            .kind("WrappedIndicator");
        let wrapper = Self::new_impl(options, Some(Arc::clone(&original)));

        wrapper.init_state_from(&*original);
        wrapper.state.lock().modality_progress = original.modality_progress();

        Arc::new(wrapper)
    }

    fn new_impl(options: IndicatorOptions, original: Option<Arc<dyn Indicator>>) -> Self {
        Self {
            id: IndicatorId::new_unique(),
            options,
            original,
            canceled: AtomicBool::new(false),
            state: Mutex::new(IndicatorState::default()),
            registry: Mutex::new(Weak::new()),
        }
    }

    /// Returns the indicator's kind.
    pub fn kind(&self) -> &'static str {
        self.options.kind
    }

    /// Returns `true` if the indicator may be restarted after cancellation without notice.
    pub fn is_reusable(&self) -> bool {
        self.options.reusable
    }

    /// Returns `true` once the indicator was stopped.
    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Requests cancellation, recording `trace` as the cause.
    ///
    /// Subsequent `Canceled` signals raised by this indicator carry `trace`.
    pub fn cancel_with_trace(&self, trace: Backtrace) {
        self.state.lock().cancellation_trace = Some(Arc::new(trace));
        self.cancel();
    }

    /// Returns the primary text.
    pub fn text(&self) -> String {
        self.state.lock().text.clone()
    }

    /// Sets the primary text.
    pub fn set_text(&self, text: impl Into<String>) {
        self.state.lock().text = text.into();
    }

    /// Returns the secondary text.
    pub fn text2(&self) -> String {
        self.state.lock().text2.clone()
    }

    /// Sets the secondary text.
    pub fn set_text2(&self, text: impl Into<String>) {
        self.state.lock().text2 = text.into();
    }

    /// Returns the completed fraction.
    pub fn fraction(&self) -> f64 {
        self.state.lock().fraction
    }

    /// Sets the completed fraction.
    ///
    /// The value is stored as given, without clamping to `0.0..=1.0`.
    /// Setting a fraction on an indeterminate indicator is a mistake: it gets
    /// logged and the indicator switches to determinate.
    pub fn set_fraction(&self, fraction: f64) {
        let mut state = self.state.lock();

        if state.indeterminate {
            warning!(
                indicator = self.id.0,
                fraction, "Fraction set on an indeterminate indicator"
            );
            state.indeterminate = false;
        }

        state.fraction = fraction;
    }

    /// Returns `true` if the fraction carries no meaning.
    pub fn is_indeterminate(&self) -> bool {
        self.state.lock().indeterminate
    }

    /// Sets whether the fraction carries meaning.
    pub fn set_indeterminate(&self, indeterminate: bool) {
        self.state.lock().indeterminate = indeterminate;
    }

    /// Saves text, fraction and secondary text onto the state stack.
    pub fn push_state(&self) {
        let mut state = self.state.lock();

        let saved = SavedState {
            text: state.text.clone(),
            fraction: state.fraction,
            text2: state.text2.clone(),
        };

        state.states.push(saved);
    }

    /// Restores the most recently saved state.
    ///
    /// The fraction is left untouched while the indicator is indeterminate.
    pub fn pop_state(&self) -> Result<(), IndicatorError> {
        let mut state = self.state.lock();

        let Some(saved) = state.states.pop() else {
            drop(state);
            contract_violation!(indicator = self.id.0, "pop_state() on an empty stack");
            return Err(IndicatorError::EmptyStateStack);
        };

        state.text = saved.text;
        state.text2 = saved.text2;

        if !state.indeterminate {
            state.fraction = saved.fraction;
        }

        Ok(())
    }

    /// Enters a section in which this indicator's cancellation is not observed.
    pub fn start_non_cancelable_section(&self) {
        self.state.lock().non_cancelable_depth += 1;
    }

    /// Leaves a section entered with `start_non_cancelable_section()`.
    pub fn finish_non_cancelable_section(&self) -> Result<(), IndicatorError> {
        let mut state = self.state.lock();

        if state.non_cancelable_depth == 0 {
            drop(state);
            contract_violation!(
                indicator = self.id.0,
                "finish_non_cancelable_section() without matching start"
            );
            return Err(IndicatorError::NonCancelableUnderflow);
        }

        state.non_cancelable_depth -= 1;

        Ok(())
    }

    /// Sets the indicator establishing the modal scope this one runs in.
    pub fn set_modality_progress(&self, progress: Option<Arc<dyn Indicator>>) {
        self.state.lock().modality_progress = progress;
    }

    /// Copies the state of `other` into `self`.
    ///
    /// Running and canceled flags are always copied; texts, fraction and the
    /// state stack only if `other` exposes a snapshot. Afterwards `self` no
    /// longer begins activities on `start()`, as `other` already holds one.
    pub fn init_state_from(&self, other: &dyn Indicator) {
        let snapshot = other.snapshot();
        let running = other.is_running();
        let canceled = other.is_canceled();

        let mut state = self.state.lock();

        state.running = running;
        self.canceled.store(canceled, Ordering::SeqCst);

        if let Some(snapshot) = snapshot {
            state.text = snapshot.text;
            state.text2 = snapshot.text2;
            state.fraction = snapshot.fraction;
            state.indeterminate = snapshot.indeterminate;
            state.states = snapshot.states;
        }

        state.dont_start_activity = true;
    }
}

impl Indicator for ProgressIndicator {
    fn id(&self) -> IndicatorId {
        self.id
    }

    fn start(&self) -> Result<(), IndicatorError> {
        let mut state = self.state.lock();

        if state.running {
            drop(state);
            contract_violation!(indicator = self.id.0, "Attempt to start an already running indicator");
            return Err(IndicatorError::AlreadyRunning);
        }

        if state.finished && self.canceled.load(Ordering::SeqCst) && !self.options.reusable {
            report_reuse_once(self.options.kind);
        }

        self.canceled.store(false, Ordering::SeqCst);
        state.finished = false;
        state.text.clear();
        state.text2.clear();
        state.fraction = 0.0;
        state.cancellation_trace = None;

        if !state.dont_start_activity {
            if let Some(activity) = &self.options.activity {
                state.activity = Some(activity.begin(self.options.kind));
            }
        }

        state.running = true;

        Ok(())
    }

    fn stop(&self) -> Result<(), IndicatorError> {
        let activity = {
            let mut state = self.state.lock();

            if !state.running {
                drop(state);
                contract_violation!(indicator = self.id.0, "Attempt to stop an indicator that is not running");
                return Err(IndicatorError::NotRunning);
            }

            state.running = false;
            state.finished = true;
            state.activity.take()
        };

        drop(activity);

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);

        let activity = self.state.lock().activity.take();
        drop(activity);

        debug!(indicator = self.id.0, "Indicator canceled");

        let registry = self.registry.lock().upgrade();

        if let Some(registry) = registry {
            registry.indicator_canceled(self.id);
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
            || self
                .original
                .as_ref()
                .is_some_and(|original| original.is_canceled())
    }

    fn is_cancelable(&self) -> bool {
        self.state.lock().non_cancelable_depth == 0 && !non_cancelable::is_active()
    }

    fn check_canceled(&self) -> Result<(), Canceled> {
        if self.is_canceled() && self.is_cancelable() {
            let trace = self.state.lock().cancellation_trace.clone();
            return Err(Canceled::with_trace(trace));
        }

        Ok(())
    }

    fn is_modal(&self) -> bool {
        self.options.modal
    }

    fn modality_progress(&self) -> Option<Arc<dyn Indicator>> {
        self.state.lock().modality_progress.clone()
    }

    fn original(&self) -> Option<Arc<dyn Indicator>> {
        self.original.clone()
    }

    fn is_standard(&self) -> bool {
        true
    }

    fn blocking_pump(&self) -> Option<Arc<dyn BlockingPump>> {
        self.options.blocking_pump.clone()
    }

    fn snapshot(&self) -> Option<IndicatorSnapshot> {
        let state = self.state.lock();

        Some(IndicatorSnapshot {
            text: state.text.clone(),
            text2: state.text2.clone(),
            fraction: state.fraction,
            indeterminate: state.indeterminate,
            running: state.running,
            canceled: self.canceled.load(Ordering::SeqCst),
            states: state.states.clone(),
        })
    }

    fn bind_registry(&self, registry: &Arc<ProgressRegistry>) {
        *self.registry.lock() = Arc::downgrade(registry);
    }
}

impl fmt::Debug for ProgressIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("ProgressIndicator")
            .field("id", &self.id)
            .field("kind", &self.options.kind)
            .field("text", &state.text)
            .field("fraction", &state.fraction)
            .field("running", &state.running)
            .field("finished", &state.finished)
            .field("canceled", &self.canceled.load(Ordering::SeqCst))
            .field("wraps", &self.original.as_ref().map(|original| original.id()))
            .finish()
    }
}

fn reported_reuse_kinds() -> &'static Mutex<HashSet<&'static str>> {
    static REPORTED: OnceLock<Mutex<HashSet<&'static str>>> = OnceLock::new();

    REPORTED.get_or_init(Default::default)
}

/// Logs the reuse notice for `kind` unless it was logged before.
///
/// Returns `true` if the notice was logged by this call.
pub(crate) fn report_reuse_once(kind: &'static str) -> bool {
    let first = reported_reuse_kinds().lock().insert(kind);

    if first {
        warning!(
            kind,
            "Restarting a canceled indicator. Indicators of this kind should be \
             declared reusable, or a fresh indicator should be created per run."
        );
    }

    first
}

#[cfg(test)]
pub(crate) fn was_reuse_reported(kind: &'static str) -> bool {
    reported_reuse_kinds().lock().contains(kind)
}

#[cfg(test)]
mod tests;
