//! The privileged dispatch (UI) thread.

use std::thread::{self, ThreadId};

/// Tells whether the calling thread is the platform's dispatch thread.
///
/// The dispatch thread is always treated as high priority and is subject to
/// extra restrictions when running tasks.
pub trait DispatchThread: Send + Sync {
    /// Returns `true` if the calling thread is the dispatch thread.
    fn is_dispatch_thread(&self) -> bool;
}

/// Headless environments: no thread is the dispatch thread.
#[derive(Copy, Clone, Default, Debug)]
pub struct NoDispatchThread;

impl DispatchThread for NoDispatchThread {
    fn is_dispatch_thread(&self) -> bool {
        false
    }
}

/// A fixed thread acting as dispatch thread.
#[derive(Copy, Clone, Debug)]
pub struct DesignatedDispatchThread(pub ThreadId);

impl DesignatedDispatchThread {
    /// Designates the calling thread.
    pub fn current() -> Self {
        Self(thread::current().id())
    }
}

impl DispatchThread for DesignatedDispatchThread {
    fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn designated_thread_is_recognized_only_on_itself() {
        let dispatch = DesignatedDispatchThread::current();

        assert!(dispatch.is_dispatch_thread());
        assert!(!thread::spawn(move || dispatch.is_dispatch_thread())
            .join()
            .unwrap());
        assert!(!NoDispatchThread.is_dispatch_thread());
    }
}
