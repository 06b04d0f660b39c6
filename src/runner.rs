//! Running computations under indicators.
//!
//! A [`ProgressRunner`] binds a computation to an indicator and an execution
//! mode, then [`submit`](ProgressRunner::submit)s it. Whatever the mode, the
//! computation runs through [`ProgressManager::run_process`], so registration,
//! start/stop and cancellation apply uniformly.
//!
//! | mode            | runs on         | caller                                  |
//! | --------------- | --------------- | --------------------------------------- |
//! | sync            | calling thread  | returns a completed `Completion`        |
//! | sync + modal    | executor        | pumps via `BlockingPump` until done     |
//! | async           | executor        | returns immediately                     |
//! | async + modal   | executor        | returns immediately                     |
//!
//! A caller waiting for a worker counts as blocked, so a prioritized caller
//! never makes its own worker yield.

use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use crate::{
    completion::{self, Completer, Completion},
    empty::EmptyIndicator,
    error::{Canceled, RunnerError, TaskError},
    indicator::Indicator,
    log::{contract_violation, debug, trace, warning},
    manager::ProgressManager,
};

type Computation<T> = Box<dyn FnOnce(&Arc<dyn Indicator>) -> Result<T, TaskError> + Send>;

/// The outcome of a runner computation.
#[derive(Debug)]
pub struct RunResult<T> {
    /// The computed value, if the computation returned one.
    pub value: Option<T>,
    /// Whether the computation was canceled, or its indicator was canceled by
    /// the time it completed.
    pub canceled: bool,
    /// The failure or panic the computation ended with.
    pub error: Option<TaskError>,
}

impl<T> RunResult<T> {
    pub(crate) fn new(outcome: Result<T, TaskError>, indicator_canceled: bool) -> Self {
        match outcome {
            Ok(value) => Self {
                value: Some(value),
                canceled: indicator_canceled,
                error: None,
            },
            Err(TaskError::Canceled(_)) => Self {
                value: None,
                canceled: true,
                error: None,
            },
            Err(error) => Self {
                value: None,
                canceled: indicator_canceled,
                error: Some(error),
            },
        }
    }

    pub(crate) fn failed(error: TaskError) -> Self {
        Self {
            value: None,
            canceled: false,
            error: Some(error),
        }
    }

    /// Returns `true` if a value was computed and nothing got canceled.
    pub fn is_success(&self) -> bool {
        self.value.is_some() && !self.canceled && self.error.is_none()
    }

    /// Converts into a `Result`, treating cancellation as an error.
    pub fn into_result(self) -> Result<T, TaskError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        match self.value {
            Some(value) if !self.canceled => Ok(value),
            _ => Err(TaskError::Canceled(Canceled::new())),
        }
    }
}

enum IndicatorSource {
    Absent,
    Ready(Arc<dyn Indicator>),
    Pending(Completion<Arc<dyn Indicator>>),
}

impl IndicatorSource {
    fn resolve(self, manager: &ProgressManager) -> Result<Arc<dyn Indicator>, TaskError> {
        match self {
            Self::Absent => Ok(EmptyIndicator::new() as Arc<dyn Indicator>),
            Self::Ready(indicator) => Ok(indicator),
            Self::Pending(completion) => {
                let _blocked = manager.prioritizer().blocking();
                completion
                    .wait()
                    .map_err(|_| TaskError::IndicatorUnavailable)
            }
        }
    }
}

/// Runs a computation under an indicator, synchronously or asynchronously,
/// optionally as a modal operation.
///
/// ```no_run
/// # use vigil::{ProgressIndicator, IndicatorOptions, ProgressManager, ProgressRunner};
/// let manager = ProgressManager::builder().build();
/// let indicator = ProgressIndicator::new(IndicatorOptions::default());
///
/// let result = ProgressRunner::new(&manager, |_indicator| Ok(6 * 7))
///     .with_progress(indicator)
///     .submit_and_wait()?;
///
/// assert_eq!(result.value, Some(42));
/// # Ok::<(), vigil::RunnerError>(())
/// ```
pub struct ProgressRunner<T> {
    manager: Arc<ProgressManager>,
    computation: Computation<T>,
    indicator: IndicatorSource,
    sync: bool,
    modal: bool,
}

impl<T> ProgressRunner<T>
where
    T: Send + 'static,
{
    /// Creates an asynchronous, non-modal runner for `computation`.
    ///
    /// Without an indicator, the computation runs under a fresh [`EmptyIndicator`].
    pub fn new(
        manager: &Arc<ProgressManager>,
        computation: impl FnOnce(&Arc<dyn Indicator>) -> Result<T, TaskError> + Send + 'static,
    ) -> Self {
        Self {
            manager: Arc::clone(manager),
            computation: Box::new(computation),
            indicator: IndicatorSource::Absent,
            sync: false,
            modal: false,
        }
    }

    /// Builder-style method for running under `indicator`.
    pub fn with_progress(mut self, indicator: Arc<dyn Indicator>) -> Self {
        self.indicator = IndicatorSource::Ready(indicator);
        self
    }

    /// Builder-style method for running under an indicator that becomes available later.
    ///
    /// If the indicator never arrives, the result carries
    /// [`TaskError::IndicatorUnavailable`].
    pub fn with_progress_future(mut self, indicator: Completion<Arc<dyn Indicator>>) -> Self {
        self.indicator = IndicatorSource::Pending(indicator);
        self
    }

    /// Builder-style method for running synchronously.
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    /// Builder-style method for running as a modal operation.
    pub fn modal(mut self) -> Self {
        self.modal = true;
        self
    }

    /// Starts the computation.
    ///
    /// Synchronous runs return an already completed `Completion`.
    pub fn submit(self) -> Result<Completion<RunResult<T>>, RunnerError> {
        self.validate()?;

        let (completer, completion) = completion::channel();

        let Self {
            manager,
            computation,
            indicator,
            sync,
            modal,
        } = self;

        if sync && !modal {
            let result = match indicator.resolve(&manager) {
                Ok(indicator) => execute(&manager, &indicator, computation),
                Err(error) => RunResult::failed(error),
            };
            completer.complete(result);
            return Ok(completion);
        }

        if !modal {
            spawn(&manager, indicator, computation, completer)?;
            return Ok(completion);
        }

        if !sync {
            debug!("Asynchronous modal run: the caller does not block");
            warn_without_pump(&indicator);
            spawn(&manager, indicator, computation, completer)?;
            return Ok(completion);
        }

        // The caller waits from here on. Resolving the indicator here also
        // finds its pump.
        let _blocked = manager.prioritizer().blocking();

        let indicator = match indicator.resolve(&manager) {
            Ok(indicator) => indicator,
            Err(error) => {
                completer.complete(RunResult::failed(error));
                return Ok(completion);
            }
        };

        let pump = indicator.blocking_pump();

        spawn(
            &manager,
            IndicatorSource::Ready(indicator),
            computation,
            completer,
        )?;

        match pump {
            Some(pump) => {
                trace!("Pumping events until the modal computation completes");
                pump.pump_until(&|| completion.is_done());
            }
            None => {
                warning!("Modal run without a blocking pump: waiting without pumping");
            }
        }

        completion.wait_until_done();

        Ok(completion)
    }

    /// Starts the computation and waits for its result.
    ///
    /// The calling thread counts as blocked while it waits.
    pub fn submit_and_wait(self) -> Result<RunResult<T>, RunnerError> {
        let manager = Arc::clone(&self.manager);

        // Synchronous runs either execute on the calling thread or do their
        // own blocking bookkeeping.
        let _blocked = (!self.sync).then(|| manager.prioritizer().blocking());

        self.submit()?.wait()
    }

    fn validate(&self) -> Result<(), RunnerError> {
        let on_dispatch_thread = self.manager.dispatch().is_dispatch_thread();

        if self.sync && !self.modal && on_dispatch_thread {
            contract_violation!(
                "Synchronous non-modal execution on the dispatch thread would freeze it"
            );
            return Err(RunnerError::SyncOnDispatchThread);
        }

        if !self.sync && self.modal && on_dispatch_thread {
            contract_violation!(
                "Asynchronous modal execution on the dispatch thread: use a synchronous modal run"
            );
            return Err(RunnerError::AsyncModalOnDispatchThread);
        }

        Ok(())
    }
}

impl<T> fmt::Debug for ProgressRunner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressRunner")
            .field("sync", &self.sync)
            .field("modal", &self.modal)
            .finish_non_exhaustive()
    }
}

fn warn_without_pump(indicator: &IndicatorSource) {
    if let IndicatorSource::Ready(indicator) = indicator {
        if indicator.blocking_pump().is_none() {
            warning!("Modal run without a blocking pump");
        }
    }
}

fn spawn<T>(
    manager: &Arc<ProgressManager>,
    indicator: IndicatorSource,
    computation: Computation<T>,
    completer: Completer<RunResult<T>>,
) -> Result<(), RunnerError>
where
    T: Send + 'static,
{
    let worker_manager = Arc::clone(manager);

    manager.executor().execute(
        "vigil-progress-runner",
        Box::new(move || {
            let result = match indicator.resolve(&worker_manager) {
                Ok(indicator) => execute(&worker_manager, &indicator, computation),
                Err(error) => RunResult::failed(error),
            };
            completer.complete(result);
        }),
    )?;

    Ok(())
}

/// Runs `computation` on the calling thread under `indicator`, capturing panics.
pub(crate) fn execute<T>(
    manager: &ProgressManager,
    indicator: &Arc<dyn Indicator>,
    computation: impl FnOnce(&Arc<dyn Indicator>) -> Result<T, TaskError>,
) -> RunResult<T> {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        manager.run_process(Some(indicator), || computation(indicator))
    }))
    .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)));

    RunResult::new(outcome, indicator.is_canceled())
}
