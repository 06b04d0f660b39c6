//! Error types for indicators, runners and the scheduling environment.

use std::{backtrace::Backtrace, error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

/// The cooperative cancellation signal.
///
/// Returned by `check_canceled()` once the indicator the calling thread runs
/// under has been canceled. This is the expected outcome of cancellation, not a bug.
#[derive(Clone, Default, Error)]
#[error("operation canceled")]
pub struct Canceled {
    trace: Option<Arc<Backtrace>>,
}

impl Canceled {
    /// Creates a cancellation signal without a captured trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cancellation signal carrying the trace captured at the point of cancellation.
    pub fn with_trace(trace: Option<Arc<Backtrace>>) -> Self {
        Self { trace }
    }

    /// Returns the trace captured when the indicator was canceled, if any.
    pub fn trace(&self) -> Option<&Backtrace> {
        self.trace.as_deref()
    }
}

impl fmt::Debug for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceled")
            .field("has_trace", &self.trace.is_some())
            .finish()
    }
}

impl PartialEq for Canceled {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Violations of the indicator state machine.
///
/// These are programmer errors: they get logged with a backtrace and the
/// indicator's state is left untouched.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Error)]
pub enum IndicatorError {
    /// `start()` was called on an indicator that is already running.
    #[error("attempt to start an already running indicator")]
    AlreadyRunning,
    /// `stop()` was called on an indicator that is not running.
    #[error("attempt to stop an indicator that is not running")]
    NotRunning,
    /// `pop_state()` was called without a matching `push_state()`.
    #[error("pop_state() called on an empty state stack")]
    EmptyStateStack,
    /// `finish_non_cancelable_section()` was called without a matching start.
    #[error("finish_non_cancelable_section() called without a matching start")]
    NonCancelableUnderflow,
}

/// The ways a runner computation can end without producing a value.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The computation observed cancellation.
    #[error(transparent)]
    Canceled(#[from] Canceled),
    /// The computation failed with an error of its own.
    #[error("computation failed: {0}")]
    Failed(Box<dyn StdError + Send + Sync>),
    /// The computation panicked.
    #[error("computation panicked: {0}")]
    Panicked(String),
    /// The indicator the computation should have run under was never produced.
    #[error("progress indicator was never provided")]
    IndicatorUnavailable,
}

impl TaskError {
    /// Wraps an arbitrary error as a computation failure.
    pub fn failed(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Failed(error.into())
    }

    /// Returns `true` if this is a cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_owned()
        };

        Self::Panicked(message)
    }
}

/// Reasons a runner refuses or fails to run a computation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Synchronous non-modal execution was requested on the dispatch thread.
    #[error("synchronous execution on the dispatch thread is allowed only for modal runs")]
    SyncOnDispatchThread,
    /// Asynchronous modal execution was requested on the dispatch thread.
    #[error("asynchronous modal execution on the dispatch thread is not allowed")]
    AsyncModalOnDispatchThread,
    /// The executor refused the computation.
    #[error("executor rejected the computation: {0}")]
    Rejected(#[from] ScheduleError),
    /// The worker went away without completing.
    #[error("computation was abandoned before completion")]
    Abandoned,
}

/// Rejections by a `Scheduler` or `Executor`.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The scheduler has been shut down.
    #[error("scheduler is shut down")]
    Shutdown,
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_rendered() {
        let error = TaskError::from_panic(Box::new("boom"));
        assert!(matches!(error, TaskError::Panicked(ref message) if message == "boom"));

        let error = TaskError::from_panic(Box::new(String::from("bang")));
        assert!(matches!(error, TaskError::Panicked(ref message) if message == "bang"));

        let error = TaskError::from_panic(Box::new(42_u8));
        assert!(matches!(error, TaskError::Panicked(_)));
    }

    #[test]
    fn canceled_converts_into_task_error() {
        fn compute() -> Result<(), TaskError> {
            Err::<(), Canceled>(Canceled::new())?;
            Ok(())
        }

        assert!(compute().unwrap_err().is_canceled());
    }
}
