//! Worker execution contexts for runner computations.

use std::thread;

use crate::{error::ScheduleError, log::trace, scheduler::Job};

/// Types capable of running a job on some worker thread.
pub trait Executor: Send + Sync {
    /// Runs `job` on a worker, labeling the worker with `name` where supported.
    fn execute(&self, name: &str, job: Job) -> Result<(), ScheduleError>;
}

/// An `Executor` spawning one named OS thread per job.
#[derive(Copy, Clone, Default, Debug)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, name: &str, job: Job) -> Result<(), ScheduleError> {
        trace!(worker = name, "executor.spawn_named_thread");
        thread::Builder::new().name(name.to_owned()).spawn(job)?;
        Ok(())
    }
}
