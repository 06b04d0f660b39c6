#![warn(missing_docs)]

//! Progress indicators, cooperative cancellation and thread prioritization.

mod activity;
mod check;
mod completion;
mod config;
mod dispatch;
mod empty;
mod error;
mod executor;
mod indicator;
mod log;
mod manager;
mod non_cancelable;
mod pinger;
mod prioritizer;
mod registry;
mod runner;
mod scheduler;
mod task;
mod thread_state;

pub use self::{
    activity::{ActivitySource, ActivityToken},
    check::{CheckCanceledBehavior, CheckCanceledHook},
    completion::{channel, Completer, Completion},
    config::ProgressConfig,
    dispatch::{DesignatedDispatchThread, DispatchThread, NoDispatchThread},
    empty::EmptyIndicator,
    error::{Canceled, IndicatorError, RunnerError, ScheduleError, TaskError},
    executor::{Executor, ThreadExecutor},
    indicator::{
        BlockingPump, Indicator, IndicatorId, IndicatorOptions, IndicatorSnapshot,
        ProgressIndicator, SavedState,
    },
    manager::{ProgressManager, ProgressManagerBuilder},
    non_cancelable::NonCancelableIndicator,
    prioritizer::{PrioritizationListener, ThreadPrioritizer},
    registry::ProgressRegistry,
    runner::{ProgressRunner, RunResult},
    scheduler::{Job, PeriodicJob, ScheduledHandle, Scheduler, ThreadScheduler},
    task::Task,
    thread_state::{BlockedGuard, ThreadStates},
};

#[cfg(any(test, feature = "test-utils"))]
#[doc(hidden)]
pub mod test_utils;
