//! One-shot result hand-off between a worker and a waiting caller.

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::{Condvar, Mutex};

use crate::error::RunnerError;

enum Slot<T> {
    Pending,
    Done(T),
    Taken,
    Abandoned,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    condvar: Condvar,
}

/// Creates a connected completer/completion pair.
pub fn channel<T>() -> (Completer<T>, Completion<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::Pending),
        condvar: Condvar::new(),
    });

    (
        Completer {
            shared: Some(Arc::clone(&shared)),
        },
        Completion { shared },
    )
}

/// The producing half. Dropping it without completing abandons the completion.
pub struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Completer<T> {
    /// Publishes `value` and wakes up waiters.
    pub fn complete(mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            *shared.slot.lock() = Slot::Done(value);
            shared.condvar.notify_all();
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let mut slot = shared.slot.lock();
            if matches!(*slot, Slot::Pending) {
                *slot = Slot::Abandoned;
            }
            shared.condvar.notify_all();
        }
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}

/// The consuming half: the eventual result of a submitted computation.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completion<T> {
    /// Returns `true` once the result is available or was abandoned.
    pub fn is_done(&self) -> bool {
        !matches!(*self.shared.slot.lock(), Slot::Pending)
    }

    /// Blocks until the result is available and takes it.
    pub fn wait(self) -> Result<T, RunnerError> {
        let mut slot = self.shared.slot.lock();

        while matches!(*slot, Slot::Pending) {
            self.shared.condvar.wait(&mut slot);
        }

        take(&mut slot)
    }

    /// Blocks until the result is available, leaving it in place.
    pub fn wait_until_done(&self) {
        let mut slot = self.shared.slot.lock();

        while matches!(*slot, Slot::Pending) {
            self.shared.condvar.wait(&mut slot);
        }
    }

    /// Blocks for at most `timeout`.
    ///
    /// Returns `None` if the result is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, RunnerError>> {
        let mut slot = self.shared.slot.lock();

        if matches!(*slot, Slot::Pending) {
            self.shared.condvar.wait_for(&mut slot, timeout);
        }

        match *slot {
            Slot::Pending => None,
            _ => Some(take(&mut slot)),
        }
    }

    /// Takes the result if it is available.
    pub fn try_take(&self) -> Option<Result<T, RunnerError>> {
        let mut slot = self.shared.slot.lock();

        match *slot {
            Slot::Pending => None,
            _ => Some(take(&mut slot)),
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("done", &self.is_done())
            .finish()
    }
}

fn take<T>(slot: &mut Slot<T>) -> Result<T, RunnerError> {
    match std::mem::replace(slot, Slot::Taken) {
        Slot::Done(value) => Ok(value),
        Slot::Abandoned => {
            *slot = Slot::Abandoned;
            Err(RunnerError::Abandoned)
        }
        // A second take behaves like an abandoned completion.
        Slot::Pending | Slot::Taken => Err(RunnerError::Abandoned),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn value_crosses_threads() {
        let (completer, completion) = channel();

        thread::spawn(move || completer.complete(42));

        assert_eq!(completion.wait().unwrap(), 42);
    }

    #[test]
    fn dropped_completer_abandons() {
        let (completer, completion) = channel::<()>();

        drop(completer);

        assert!(completion.is_done());
        assert!(matches!(completion.wait(), Err(RunnerError::Abandoned)));
    }

    #[test]
    fn pending_result_times_out() {
        let (completer, completion) = channel::<u8>();

        assert!(completion
            .wait_timeout(Duration::from_millis(5))
            .is_none());
        assert!(completion.try_take().is_none());

        completer.complete(7);

        assert!(matches!(completion.try_take(), Some(Ok(7))));
        assert!(matches!(completion.try_take(), Some(Err(RunnerError::Abandoned))));
    }
}
