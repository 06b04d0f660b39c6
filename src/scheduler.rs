//! Delayed and periodic background jobs.

use std::{
    cmp::Ordering as CmpOrdering,
    collections::BinaryHeap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{
    error::ScheduleError,
    log::{contract_violation, trace},
};

/// A one-shot job.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A job run repeatedly until its handle gets canceled.
pub type PeriodicJob = Box<dyn FnMut() + Send + 'static>;

/// Types capable of running delayed and fixed-delay periodic jobs.
pub trait Scheduler: Send + Sync {
    /// Runs `job` once after `delay`.
    fn schedule(&self, delay: Duration, job: Job) -> Result<(), ScheduleError>;

    /// Runs `job` after `initial_delay`, then again `delay` after each run completes,
    /// until the returned handle is canceled.
    fn schedule_with_fixed_delay(
        &self,
        initial_delay: Duration,
        delay: Duration,
        job: PeriodicJob,
    ) -> Result<ScheduledHandle, ScheduleError>;
}

/// A cancelable handle to a periodic job.
#[derive(Clone, Debug, Default)]
pub struct ScheduledHandle {
    canceled: Arc<AtomicBool>,
}

impl ScheduledHandle {
    /// Creates a fresh, not yet canceled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops any future runs of the associated job.
    ///
    /// A run that is already in progress completes normally.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if the handle was canceled.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

enum Work {
    Once(Job),
    Periodic {
        job: PeriodicJob,
        delay: Duration,
        handle: ScheduledHandle,
    },
}

struct Entry {
    deadline: Instant,
    seq: u64,
    work: Work,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed, so that `BinaryHeap` pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.deadline, other.seq).cmp(&(self.deadline, self.seq))
    }
}

#[derive(Default)]
struct Queue {
    entries: BinaryHeap<Entry>,
    next_seq: u64,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    condvar: Condvar,
}

/// A `Scheduler` backed by a single, lazily spawned timer thread.
///
/// Jobs run on the timer thread one after another, so they are expected to be short.
#[derive(Default)]
pub struct ThreadScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadScheduler {
    /// Creates a scheduler; its thread is spawned on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops the timer thread, dropping all pending jobs.
    ///
    /// Any later call to `schedule…` is rejected with `ScheduleError::Shutdown`.
    pub fn shutdown(&self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.condvar.notify_all();

        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        // The last reference may be dropped from within a job.
        if worker.thread().id() != thread::current().id() {
            let _ = worker.join();
        }
    }

    /// Returns the number of pending jobs, including canceled periodic ones not yet reaped.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }

    fn enqueue(&self, delay: Duration, work: Work) -> Result<(), ScheduleError> {
        self.ensure_worker()?;

        let mut queue = self.shared.queue.lock();

        if queue.shutdown {
            return Err(ScheduleError::Shutdown);
        }

        push(&mut queue, Instant::now() + delay, work);

        self.shared.condvar.notify_one();

        Ok(())
    }

    fn ensure_worker(&self) -> Result<(), ScheduleError> {
        let mut worker = self.worker.lock();

        if worker.is_some() {
            return Ok(());
        }

        if self.shared.queue.lock().shutdown {
            return Err(ScheduleError::Shutdown);
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("vigil-scheduler".into())
            .spawn(move || run_worker(&shared))?;

        *worker = Some(handle);

        Ok(())
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, job: Job) -> Result<(), ScheduleError> {
        self.enqueue(delay, Work::Once(job))
    }

    fn schedule_with_fixed_delay(
        &self,
        initial_delay: Duration,
        delay: Duration,
        job: PeriodicJob,
    ) -> Result<ScheduledHandle, ScheduleError> {
        let handle = ScheduledHandle::new();

        self.enqueue(
            initial_delay,
            Work::Periodic {
                job,
                delay,
                handle: handle.clone(),
            },
        )?;

        Ok(handle)
    }
}

fn push(queue: &mut MutexGuard<'_, Queue>, deadline: Instant, work: Work) {
    let seq = queue.next_seq;
    queue.next_seq += 1;
    queue.entries.push(Entry {
        deadline,
        seq,
        work,
    });
}

fn run_worker(shared: &Shared) {
    let mut queue = shared.queue.lock();

    loop {
        if queue.shutdown {
            queue.entries.clear();
            return;
        }

        let Some(deadline) = queue.entries.peek().map(|entry| entry.deadline) else {
            shared.condvar.wait(&mut queue);
            continue;
        };

        if deadline > Instant::now() {
            shared.condvar.wait_until(&mut queue, deadline);
            continue;
        }

        let Some(entry) = queue.entries.pop() else {
            continue;
        };

        let requeue = MutexGuard::unlocked(&mut queue, || run_entry(entry));

        if let Some((deadline, work)) = requeue {
            push(&mut queue, deadline, work);
        }
    }
}

fn run_entry(entry: Entry) -> Option<(Instant, Work)> {
    match entry.work {
        Work::Once(job) => {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                contract_violation!("Scheduled job panicked");
            }
            None
        }
        Work::Periodic {
            mut job,
            delay,
            handle,
        } => {
            if handle.is_canceled() {
                trace!("Dropping canceled periodic job");
                return None;
            }

            if catch_unwind(AssertUnwindSafe(&mut job)).is_err() {
                contract_violation!("Periodic job panicked");
            }

            if handle.is_canceled() {
                return None;
            }

            Some((Instant::now() + delay, Work::Periodic { job, delay, handle }))
        }
    }
}
