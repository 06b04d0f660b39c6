//! Self-reported blocking waits.
//!
//! The prioritizer needs to know whether a prioritized thread is currently
//! waiting on something, e.g. a lock held by a thread that would otherwise
//! yield to it. Threads announce such waits with [`ThreadStates::blocking`].

use std::{
    collections::HashMap,
    thread::{self, ThreadId},
};

use parking_lot::Mutex;

/// Tracks which threads are inside a blocking wait.
#[derive(Default, Debug)]
pub struct ThreadStates {
    blocked: Mutex<HashMap<ThreadId, usize>>,
}

impl ThreadStates {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the calling thread as blocked until the returned guard is dropped.
    ///
    /// Guards nest.
    pub fn blocking(&self) -> BlockedGuard<'_> {
        let thread = thread::current().id();

        *self.blocked.lock().entry(thread).or_default() += 1;

        BlockedGuard {
            states: self,
            thread,
        }
    }

    /// Returns `true` if `thread` is inside a blocking wait.
    pub fn is_blocked(&self, thread: ThreadId) -> bool {
        self.blocked.lock().contains_key(&thread)
    }

    /// Returns `true` if any of `threads` is inside a blocking wait.
    pub fn any_blocked<'a>(&self, threads: impl IntoIterator<Item = &'a ThreadId>) -> bool {
        let blocked = self.blocked.lock();

        threads
            .into_iter()
            .any(|thread| blocked.contains_key(thread))
    }
}

/// Keeps a thread marked as blocked. See [`ThreadStates::blocking`].
#[must_use = "the thread is only marked as blocked while the guard is alive"]
pub struct BlockedGuard<'a> {
    states: &'a ThreadStates,
    thread: ThreadId,
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        let mut blocked = self.states.blocked.lock();

        if let Some(depth) = blocked.get_mut(&self.thread) {
            *depth -= 1;
            if *depth == 0 {
                blocked.remove(&self.thread);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_guards_unmark_on_last_drop() {
        let states = ThreadStates::new();
        let thread = thread::current().id();

        let outer = states.blocking();
        let inner = states.blocking();

        assert!(states.is_blocked(thread));
        drop(inner);
        assert!(states.is_blocked(thread));
        drop(outer);
        assert!(!states.is_blocked(thread));
    }

    #[test]
    fn only_the_calling_thread_is_marked() {
        let states = ThreadStates::new();
        let _guard = states.blocking();

        let other = thread::scope(|scope| scope.spawn(|| thread::current().id()).join().unwrap());

        assert!(!states.is_blocked(other));
        assert!(states.any_blocked([&other, &thread::current().id()]));
    }
}
