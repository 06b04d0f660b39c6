//! Platform activity tokens held while an indicator runs.

use std::fmt;

/// A platform activity, e.g. an inhibition of system sleep.
///
/// The activity ends when the token is dropped.
pub struct ActivityToken {
    end: Option<Box<dyn FnOnce() + Send>>,
}

impl ActivityToken {
    /// Creates a token that runs `end` when the activity ends.
    pub fn new(end: impl FnOnce() + Send + 'static) -> Self {
        Self {
            end: Some(Box::new(end)),
        }
    }

    /// Creates a token that does nothing when dropped.
    pub fn noop() -> Self {
        Self { end: None }
    }
}

impl Drop for ActivityToken {
    fn drop(&mut self) {
        if let Some(end) = self.end.take() {
            end();
        }
    }
}

impl fmt::Debug for ActivityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityToken")
            .field("active", &self.end.is_some())
            .finish()
    }
}

/// Types beginning platform activities on behalf of running indicators.
pub trait ActivitySource: Send + Sync {
    /// Begins an activity described by `reason`.
    fn begin(&self, reason: &str) -> ActivityToken;
}
