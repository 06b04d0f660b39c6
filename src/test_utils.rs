use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use crate::{
    check::CheckCanceledHook,
    error::IndicatorError,
    indicator::{Indicator, IndicatorId},
};

/// An indicator that never announces its cancellation, so it has to be polled.
#[doc(hidden)]
#[derive(Debug, Default)]
pub struct NonStandardIndicator {
    id: IndicatorId,
    running: AtomicBool,
    canceled: AtomicBool,
}

impl NonStandardIndicator {
    #[doc(hidden)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Indicator for NonStandardIndicator {
    fn id(&self) -> IndicatorId {
        self.id
    }

    fn start(&self) -> Result<(), IndicatorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(IndicatorError::AlreadyRunning);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), IndicatorError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(IndicatorError::NotRunning);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// A check-canceled hook counting its invocations.
#[doc(hidden)]
#[derive(Debug, Default)]
pub struct CountingHook {
    calls: AtomicUsize,
}

impl CountingHook {
    #[doc(hidden)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[doc(hidden)]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CheckCanceledHook for CountingHook {
    fn run_hook(&self, indicator: Option<&Arc<dyn Indicator>>) -> bool {
        std::hint::black_box(indicator);
        self.calls.fetch_add(1, Ordering::SeqCst);
        false
    }
}
