//! The platform entry points.
//!
//! A [`ProgressManager`] ties the [`ProgressRegistry`] and the
//! [`ThreadPrioritizer`] to their environment and exposes the operations the
//! rest of a program calls from arbitrary threads: running work under
//! indicators, checking for cancellation, and prioritizing threads.

use std::{
    fmt,
    sync::{Arc, Weak},
    thread,
};

use crate::{
    check::{CheckCanceledBehavior, CheckCanceledHook},
    completion::{self, Completion},
    config::{global_config, ProgressConfig},
    dispatch::{DispatchThread, NoDispatchThread},
    error::{Canceled, RunnerError, TaskError},
    executor::{Executor, ThreadExecutor},
    indicator::{self, Indicator, IndicatorOptions, ProgressIndicator},
    log::debug,
    non_cancelable::{self, NonCancelableIndicator, SectionGuard},
    prioritizer::{PrioritizationListener, ThreadPrioritizer},
    registry::ProgressRegistry,
    runner::{self, ProgressRunner, RunResult},
    scheduler::{Scheduler, ThreadScheduler},
    task::{self, Task},
    thread_state::BlockedGuard,
};

/// Builder of a [`ProgressManager`].
#[derive(Default)]
pub struct ProgressManagerBuilder {
    config: Option<ProgressConfig>,
    scheduler: Option<Arc<dyn Scheduler>>,
    dispatch: Option<Arc<dyn DispatchThread>>,
    executor: Option<Arc<dyn Executor>>,
}

impl ProgressManagerBuilder {
    /// Builder-style method for setting the configuration.
    ///
    /// Defaults to [`ProgressConfig::from_env`].
    pub fn config(mut self, config: ProgressConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Builder-style method for setting the scheduler of background jobs.
    ///
    /// Defaults to a fresh [`ThreadScheduler`].
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Builder-style method for setting the dispatch thread.
    ///
    /// Defaults to [`NoDispatchThread`].
    pub fn dispatch(mut self, dispatch: Arc<dyn DispatchThread>) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// Builder-style method for setting the executor of asynchronous runs.
    ///
    /// Defaults to [`ThreadExecutor`].
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Creates the manager.
    pub fn build(self) -> Arc<ProgressManager> {
        let config = self.config.unwrap_or_else(|| global_config().clone());
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(ThreadScheduler::new()));
        let dispatch = self.dispatch.unwrap_or_else(|| Arc::new(NoDispatchThread));
        let executor = self.executor.unwrap_or_else(|| Arc::new(ThreadExecutor));

        let registry = ProgressRegistry::new(config.clone(), Arc::clone(&scheduler));

        let prioritizer = ThreadPrioritizer::new(
            config,
            Arc::clone(&dispatch),
            scheduler,
            Some(Arc::new(PrioritizingHook(Arc::downgrade(&registry)))),
        );

        Arc::new(ProgressManager {
            registry,
            prioritizer,
            dispatch,
            executor,
        })
    }
}

/// Makes `check_canceled()` run the yield hook while prioritizing.
struct PrioritizingHook(Weak<ProgressRegistry>);

impl PrioritizationListener for PrioritizingHook {
    fn prioritizing_started(&self) {
        if let Some(registry) = self.0.upgrade() {
            registry.set_prioritizing(true);
        }
    }

    fn prioritizing_finished(&self) {
        if let Some(registry) = self.0.upgrade() {
            registry.set_prioritizing(false);
        }
    }
}

/// Runs work under indicators, checks for cancellation and prioritizes threads.
pub struct ProgressManager {
    registry: Arc<ProgressRegistry>,
    prioritizer: Arc<ThreadPrioritizer>,
    dispatch: Arc<dyn DispatchThread>,
    executor: Arc<dyn Executor>,
}

impl ProgressManager {
    /// Returns a builder with default environment.
    pub fn builder() -> ProgressManagerBuilder {
        ProgressManagerBuilder::default()
    }

    /// Returns the thread ↔ indicator registry.
    pub fn registry(&self) -> &Arc<ProgressRegistry> {
        &self.registry
    }

    /// Returns the thread prioritizer.
    pub fn prioritizer(&self) -> &Arc<ThreadPrioritizer> {
        &self.prioritizer
    }

    /// Returns the dispatch thread view.
    pub fn dispatch(&self) -> &Arc<dyn DispatchThread> {
        &self.dispatch
    }

    /// Returns the executor of asynchronous runs.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Runs `work` under `indicator`, starting it first if needed and
    /// stopping it afterwards if still running.
    pub fn run_process<R>(
        &self,
        indicator: Option<&Arc<dyn Indicator>>,
        work: impl FnOnce() -> R,
    ) -> R {
        self.registry.execute_process_under_progress(indicator, || {
            if let Some(indicator) = indicator {
                if !indicator.is_running() {
                    // Contract violations are logged by the indicator.
                    let _ = indicator.start();
                }
            }

            let _stop = StopOnExit(indicator);

            work()
        })
    }

    /// Runs `work` under `indicator` without touching its running state.
    ///
    /// See [`ProgressRegistry::execute_process_under_progress`].
    pub fn execute_process_under_progress<R>(
        &self,
        indicator: Option<&Arc<dyn Indicator>>,
        work: impl FnOnce() -> R,
    ) -> R {
        self.registry.execute_process_under_progress(indicator, work)
    }

    /// Runs `work` so that `check_canceled()` never fails within it.
    ///
    /// Re-entrant calls just run `work`.
    pub fn execute_non_cancelable_section<R>(&self, work: impl FnOnce() -> R) -> R {
        if non_cancelable::is_active() {
            return work();
        }

        let _section = SectionGuard::enter();
        let indicator = NonCancelableIndicator::shared();

        self.registry
            .execute_process_under_progress(Some(&indicator), work)
    }

    /// Returns `true` if the calling thread runs inside a non-cancelable section.
    pub fn is_in_non_cancelable_section(&self) -> bool {
        non_cancelable::is_active()
    }

    /// Returns `Err(Canceled)` if the calling thread runs under a canceled,
    /// cancelable indicator.
    ///
    /// Also runs the installed check-canceled hook, and yields to prioritized
    /// threads. Free while nothing is canceled and no hook is installed.
    pub fn check_canceled(&self) -> Result<(), Canceled> {
        let behavior = self.registry.behavior();

        if behavior == CheckCanceledBehavior::None {
            return Ok(());
        }

        let indicator = self.progress_indicator();

        if behavior == CheckCanceledBehavior::IndicatorPlusHooks {
            if let Some(indicator) = &indicator {
                indicator.check_canceled()?;
            }
        }

        self.run_check_canceled_hooks(indicator.as_ref());

        Ok(())
    }

    /// Runs the installed hook and the prioritization yield, returning whether
    /// either did something that might have taken a while.
    pub fn run_check_canceled_hooks(&self, indicator: Option<&Arc<dyn Indicator>>) -> bool {
        let hook = self.registry.run_check_canceled_hook(indicator);

        let slept = self
            .prioritizer
            .sleep_if_needed_to_give_priority_to_another_thread();

        hook || slept
    }

    /// Installs `hook`, returning the previous one.
    pub fn set_check_canceled_hook(
        &self,
        hook: Option<Arc<dyn CheckCanceledHook>>,
    ) -> Option<Arc<dyn CheckCanceledHook>> {
        self.registry.set_check_canceled_hook(hook)
    }

    /// Runs `work` with the calling thread prioritized.
    ///
    /// See [`ThreadPrioritizer::compute_prioritized`].
    pub fn compute_prioritized<R>(&self, work: impl FnOnce() -> R) -> R {
        self.prioritizer.compute_prioritized(work)
    }

    /// See [`ThreadPrioritizer::sleep_if_needed_to_give_priority_to_another_thread`].
    pub fn sleep_if_needed_to_give_priority_to_another_thread(&self) -> bool {
        self.prioritizer
            .sleep_if_needed_to_give_priority_to_another_thread()
    }

    /// See [`ThreadPrioritizer::suppress_prioritizing`].
    pub fn suppress_prioritizing(&self) {
        self.prioritizer.suppress_prioritizing();
    }

    /// See [`ThreadPrioritizer::restore_prioritizing`].
    pub fn restore_prioritizing(&self) {
        self.prioritizer.restore_prioritizing();
    }

    /// Returns `true` if the calling thread asked for priority.
    pub fn is_current_thread_prioritized(&self) -> bool {
        self.prioritizer.is_current_thread_prioritized()
    }

    /// Runs `work` marked as a blocking wait of the calling thread.
    ///
    /// Prioritized threads should wrap waits on locks and conditions with it,
    /// so that other threads stop yielding to them meanwhile.
    pub fn blocking_section<R>(&self, work: impl FnOnce() -> R) -> R {
        let _blocked: BlockedGuard<'_> = self.prioritizer.blocking();
        work()
    }

    /// Returns the calling thread's current indicator.
    pub fn progress_indicator(&self) -> Option<Arc<dyn Indicator>> {
        self.registry.current_indicator(thread::current().id())
    }

    /// Returns `true` if the calling thread runs under an indicator.
    pub fn has_progress_indicator(&self) -> bool {
        self.progress_indicator().is_some()
    }

    /// Returns `true` if some work runs without any indicator.
    pub fn has_unsafe_progress_indicator(&self) -> bool {
        self.registry.has_unsafe_progress()
    }

    /// Returns `true` if any thread runs under a modal indicator.
    pub fn has_modal_progress_indicator(&self) -> bool {
        self.registry.has_modal_indicator()
    }

    /// Returns every indicator some thread runs under.
    pub fn current_indicators(&self) -> Vec<Arc<dyn Indicator>> {
        self.registry.indicators()
    }

    /// Returns the indicator establishing the modal scope the calling thread runs in.
    ///
    /// The scope is taken from the thread's top-level indicator, so nested
    /// work keeps the modality of the work that started it.
    pub fn current_thread_progress_modality(&self) -> Option<Arc<dyn Indicator>> {
        self.registry
            .top_level_indicator(thread::current().id())
            .and_then(|indicator| indicator.modality_progress())
    }

    /// Wraps `indicator`, so that work can run under it without disturbing its state.
    pub fn wrap(&self, indicator: &Arc<dyn Indicator>) -> Arc<dyn Indicator> {
        ProgressIndicator::wrap(Arc::clone(indicator))
    }

    /// Returns the innermost indicator `indicator` wraps.
    pub fn unwrap(&self, indicator: &Arc<dyn Indicator>) -> Arc<dyn Indicator> {
        indicator::unwrap(indicator)
    }

    /// Returns a runner for `computation`.
    pub fn runner<T>(
        self: &Arc<Self>,
        computation: impl FnOnce(&Arc<dyn Indicator>) -> Result<T, TaskError> + Send + 'static,
    ) -> ProgressRunner<T>
    where
        T: Send + 'static,
    {
        ProgressRunner::new(self, computation)
    }

    /// Runs `task` on the calling thread, then delivers its outcome to its callbacks.
    ///
    /// Returns the task once `on_finished` was called.
    pub fn run_in_current_thread<T: Task>(
        &self,
        mut task: T,
        indicator: Option<Arc<dyn Indicator>>,
    ) -> T {
        let result = run_task(self, &mut task, indicator);
        task::finish(&mut task, result);
        task
    }

    /// Runs `task` on the executor, delivering its outcome to its callbacks
    /// on the worker thread.
    ///
    /// The returned completion yields the task once `on_finished` was called.
    pub fn run_in_background<T: Task>(
        self: &Arc<Self>,
        mut task: T,
        indicator: Option<Arc<dyn Indicator>>,
    ) -> Result<Completion<T>, RunnerError> {
        let (completer, completion) = completion::channel();
        let manager = Arc::clone(self);
        let name = format!("vigil-task: {}", task.title());

        debug!(task = task.title(), "Running task in background");

        self.executor.execute(
            &name,
            Box::new(move || {
                let result = run_task(&manager, &mut task, indicator);
                task::finish(&mut task, result);
                completer.complete(task);
            }),
        )?;

        Ok(completion)
    }

    /// Stops background jobs.
    pub fn dispose(&self) {
        self.registry.dispose();
        self.prioritizer.stop_all_prioritization();
    }
}

impl fmt::Debug for ProgressManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressManager")
            .field("registry", &self.registry)
            .field("prioritizing", &self.prioritizer.is_prioritizing())
            .finish_non_exhaustive()
    }
}

fn run_task<T: Task>(
    manager: &ProgressManager,
    task: &mut T,
    indicator: Option<Arc<dyn Indicator>>,
) -> RunResult<T::Output> {
    let indicator = indicator.unwrap_or_else(|| {
        ProgressIndicator::new(IndicatorOptions::default()) as Arc<dyn Indicator>
    });

    runner::execute(manager, &indicator, |indicator| task.run(indicator))
}

struct StopOnExit<'a>(Option<&'a Arc<dyn Indicator>>);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        if let Some(indicator) = self.0 {
            if indicator.is_running() {
                let _ = indicator.stop();
            }
        }
    }
}
