//! A lightweight indicator without presentation state.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;

use crate::{
    error::IndicatorError,
    indicator::{Indicator, IndicatorId},
    log::contract_violation,
    registry::ProgressRegistry,
};

/// An indicator tracking only its running and canceled flags.
///
/// Used for headless work that still needs to be cancelable.
#[derive(Debug, Default)]
pub struct EmptyIndicator {
    id: IndicatorId,
    running: AtomicBool,
    canceled: AtomicBool,
    registry: Mutex<Weak<ProgressRegistry>>,
}

impl EmptyIndicator {
    /// Creates an indicator.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Indicator for EmptyIndicator {
    fn id(&self) -> IndicatorId {
        self.id
    }

    fn start(&self) -> Result<(), IndicatorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            contract_violation!(indicator = self.id.0, "Attempt to start an already running indicator");
            return Err(IndicatorError::AlreadyRunning);
        }

        self.canceled.store(false, Ordering::SeqCst);

        Ok(())
    }

    fn stop(&self) -> Result<(), IndicatorError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            contract_violation!(indicator = self.id.0, "Attempt to stop an indicator that is not running");
            return Err(IndicatorError::NotRunning);
        }

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);

        let registry = self.registry.lock().upgrade();

        if let Some(registry) = registry {
            registry.indicator_canceled(self.id);
        }
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn is_standard(&self) -> bool {
        true
    }

    fn bind_registry(&self, registry: &Arc<ProgressRegistry>) {
        *self.registry.lock() = Arc::downgrade(registry);
    }
}
