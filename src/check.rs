//! What `check_canceled()` has to do.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use crate::indicator::Indicator;

/// The global mode of `check_canceled()`, derived from registry state.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, Debug)]
#[repr(u8)]
pub enum CheckCanceledBehavior {
    /// Nothing is canceled and no hook is installed: checking is a no-op.
    #[default]
    None = 0,
    /// Only the installed hook runs.
    OnlyHooks = 1,
    /// Some thread runs under a canceled indicator: the calling thread's
    /// indicator is checked, and the hook runs.
    IndicatorPlusHooks = 2,
}

impl CheckCanceledBehavior {
    /// Derives the behavior from the registry's current state.
    pub fn compute(has_hook: bool, has_canceled_thread: bool, enabled: bool) -> Self {
        if !has_hook && !has_canceled_thread {
            Self::None
        } else if has_canceled_thread && enabled {
            Self::IndicatorPlusHooks
        } else {
            Self::OnlyHooks
        }
    }
}

#[derive(Debug)]
pub(crate) struct BehaviorReprError {
    #[allow(dead_code)]
    pub(crate) unknown: u8,
}

pub(crate) struct BehaviorRepr(pub(crate) CheckCanceledBehavior);

impl TryFrom<u8> for BehaviorRepr {
    type Error = BehaviorReprError;

    fn try_from(repr: u8) -> Result<Self, Self::Error> {
        use CheckCanceledBehavior::*;

        match repr {
            x if x == None as u8 => Ok(Self(None)),
            x if x == OnlyHooks as u8 => Ok(Self(OnlyHooks)),
            x if x == IndicatorPlusHooks as u8 => Ok(Self(IndicatorPlusHooks)),
            unknown => Err(Self::Error { unknown }),
        }
    }
}

pub(crate) struct AtomicBehavior(pub(crate) AtomicU8);

impl From<CheckCanceledBehavior> for AtomicBehavior {
    fn from(behavior: CheckCanceledBehavior) -> Self {
        Self(AtomicU8::from(behavior as u8))
    }
}

impl AtomicBehavior {
    pub(crate) fn load(&self, order: Ordering) -> CheckCanceledBehavior {
        // Only ever stored from valid variants; fall back to the strictest mode.
        BehaviorRepr::try_from(self.0.load(order))
            .map(|repr| repr.0)
            .unwrap_or(CheckCanceledBehavior::IndicatorPlusHooks)
    }

    pub(crate) fn swap(
        &self,
        behavior: CheckCanceledBehavior,
        order: Ordering,
    ) -> CheckCanceledBehavior {
        BehaviorRepr::try_from(self.0.swap(behavior as u8, order))
            .map(|repr| repr.0)
            .unwrap_or(CheckCanceledBehavior::IndicatorPlusHooks)
    }
}

/// An extension piggybacking on `check_canceled()`.
pub trait CheckCanceledHook: Send + Sync {
    /// Runs on every `check_canceled()` while checking is not a no-op.
    ///
    /// `indicator` is the calling thread's indicator, if it has one.
    /// Returns `true` if the hook did something that might take a while.
    fn run_hook(&self, indicator: Option<&Arc<dyn Indicator>>) -> bool;
}

impl<F> CheckCanceledHook for F
where
    F: Fn(Option<&Arc<dyn Indicator>>) -> bool + Send + Sync,
{
    fn run_hook(&self, indicator: Option<&Arc<dyn Indicator>>) -> bool {
        self(indicator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_truth_table() {
        use CheckCanceledBehavior::*;

        let cases = [
            ((false, false, true), None),
            ((false, false, false), None),
            ((true, false, true), OnlyHooks),
            ((true, false, false), OnlyHooks),
            ((false, true, true), IndicatorPlusHooks),
            ((true, true, true), IndicatorPlusHooks),
            ((false, true, false), OnlyHooks),
            ((true, true, false), OnlyHooks),
        ];

        for ((hook, canceled, enabled), expected) in cases {
            assert_eq!(
                CheckCanceledBehavior::compute(hook, canceled, enabled),
                expected,
                "hook: {hook}, canceled: {canceled}, enabled: {enabled}"
            );
        }
    }

    #[test]
    fn atomic_behavior_swaps() {
        let atomic = AtomicBehavior::from(CheckCanceledBehavior::None);

        let previous = atomic.swap(CheckCanceledBehavior::OnlyHooks, Ordering::SeqCst);

        assert_eq!(previous, CheckCanceledBehavior::None);
        assert_eq!(
            atomic.load(Ordering::SeqCst),
            CheckCanceledBehavior::OnlyHooks
        );
    }

    #[test]
    fn closures_are_hooks() {
        let hook: Arc<dyn CheckCanceledHook> = Arc::new(|indicator: Option<&Arc<dyn Indicator>>| {
            indicator.is_none()
        });

        assert!(hook.run_hook(Option::None));
    }
}
