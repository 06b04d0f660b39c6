//! Units of work with lifecycle callbacks.

use std::sync::Arc;

use crate::{error::TaskError, indicator::Indicator, runner::RunResult};

/// A unit of work run under an indicator, notified about how it ended.
///
/// Exactly one of `on_success`, `on_cancel` and `on_error` is called after
/// `run` returns, followed by `on_finished`.
pub trait Task: Send + 'static {
    /// The value `run` produces.
    type Output: Send + 'static;

    /// Returns the task's title, used to label its worker thread.
    fn title(&self) -> &str;

    /// Performs the work.
    ///
    /// Long-running work is expected to call `check_canceled()` regularly.
    fn run(&mut self, indicator: &Arc<dyn Indicator>) -> Result<Self::Output, TaskError>;

    /// Called when `run` completed and the indicator was not canceled.
    fn on_success(&mut self, _output: Self::Output) {}

    /// Called when `run` was canceled.
    fn on_cancel(&mut self) {}

    /// Called when `run` failed or panicked.
    fn on_error(&mut self, _error: TaskError) {}

    /// Always called last.
    fn on_finished(&mut self) {}
}

/// Delivers the outcome of `task.run()` to the task's callbacks.
pub(crate) fn finish<T: Task>(task: &mut T, result: RunResult<T::Output>) {
    let RunResult {
        value,
        canceled,
        error,
    } = result;

    match (error, value) {
        (Some(error), _) => task.on_error(error),
        (None, _) if canceled => task.on_cancel(),
        (None, Some(value)) => task.on_success(value),
        (None, None) => task.on_cancel(),
    }

    task.on_finished();
}
