//! Background polling of non-standard indicators.
//!
//! Non-standard indicators may become canceled without telling the
//! registry. While any of them is registered, a periodic job calls their
//! `check_canceled()` and forwards observed cancellations to
//! [`ProgressRegistry::indicator_canceled`].

use crate::{
    log::{debug, warning},
    registry::{ProgressRegistry, RegistryState},
};

/// Schedules the pinger unless it is already running.
///
/// Must be called with the registry's state locked.
pub(crate) fn start(registry: &ProgressRegistry, state: &mut RegistryState) {
    if state.ping.is_some() {
        return;
    }

    let weak = registry.weak();
    let interval = registry.config().ping_interval;

    let scheduled = registry.scheduler().schedule_with_fixed_delay(
        std::time::Duration::ZERO,
        interval,
        Box::new(move || {
            if let Some(registry) = weak.upgrade() {
                ping(&registry);
            }
        }),
    );

    match scheduled {
        Ok(handle) => {
            debug!(interval = ?interval, "Started non-standard indicator pinger");
            state.ping = Some(handle);
        }
        #[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
        Err(err) => {
            warning!(error = %err, "Could not schedule non-standard indicator pinger");
        }
    }
}

/// Cancels the pinger if it is running.
///
/// Must be called with the registry's state locked.
pub(crate) fn stop(state: &mut RegistryState) {
    if let Some(handle) = state.ping.take() {
        handle.cancel();
        debug!("Stopped non-standard indicator pinger");
    }
}

/// Checks every registered non-standard indicator once.
pub(crate) fn ping(registry: &ProgressRegistry) {
    for indicator in registry.non_standard_indicators() {
        if indicator.check_canceled().is_err() {
            registry.indicator_canceled(indicator.id());
        }
    }
}
