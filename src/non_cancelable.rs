//! Non-cancelable sections.

use std::{
    cell::Cell,
    sync::{Arc, OnceLock},
};

use crate::{
    error::IndicatorError,
    indicator::{Indicator, IndicatorId},
};

thread_local! {
    static IN_NON_CANCELABLE_SECTION: Cell<bool> = const { Cell::new(false) };
}

/// Returns `true` if the calling thread runs inside `execute_non_cancelable_section`.
pub fn is_active() -> bool {
    IN_NON_CANCELABLE_SECTION.with(Cell::get)
}

/// Marks the calling thread as inside a non-cancelable section until dropped.
pub(crate) struct SectionGuard(());

impl SectionGuard {
    pub(crate) fn enter() -> Self {
        IN_NON_CANCELABLE_SECTION.with(|flag| flag.set(true));
        Self(())
    }
}

impl Drop for SectionGuard {
    fn drop(&mut self) {
        IN_NON_CANCELABLE_SECTION.with(|flag| flag.set(false));
    }
}

/// The indicator non-cancelable sections run under: it can never be canceled.
#[derive(Debug)]
pub struct NonCancelableIndicator {
    id: IndicatorId,
}

impl NonCancelableIndicator {
    /// Returns the shared instance.
    pub fn shared() -> Arc<dyn Indicator> {
        static SHARED: OnceLock<Arc<NonCancelableIndicator>> = OnceLock::new();

        let shared = SHARED.get_or_init(|| {
            Arc::new(Self {
                id: IndicatorId::new_unique(),
            })
        });

        Arc::clone(shared) as Arc<dyn Indicator>
    }
}

impl Indicator for NonCancelableIndicator {
    fn id(&self) -> IndicatorId {
        self.id
    }

    fn start(&self) -> Result<(), IndicatorError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), IndicatorError> {
        Ok(())
    }

    fn is_running(&self) -> bool {
        true
    }

    fn cancel(&self) {}

    fn is_canceled(&self) -> bool {
        false
    }

    fn is_cancelable(&self) -> bool {
        false
    }

    fn is_standard(&self) -> bool {
        true
    }
}
