use std::sync::atomic::AtomicUsize;

use crate::activity::ActivityToken;

use super::*;

fn erased(indicator: &Arc<ProgressIndicator>) -> Arc<dyn Indicator> {
    Arc::<ProgressIndicator>::clone(indicator)
}

#[derive(Default)]
struct SpyActivity {
    begun: AtomicUsize,
    ended: Arc<AtomicUsize>,
}

impl ActivitySource for SpyActivity {
    fn begin(&self, _reason: &str) -> ActivityToken {
        self.begun.fetch_add(1, Ordering::SeqCst);
        let ended = Arc::clone(&self.ended);
        ActivityToken::new(move || {
            ended.fetch_add(1, Ordering::SeqCst);
        })
    }
}

#[test]
fn id_monotonically_increments() {
    let ids: Vec<_> = (0..1000).map(|_| IndicatorId::new_unique()).collect();

    for window in ids.windows(2) {
        let [prev, next] = window else {
            panic!("expected window of size 2");
        };

        assert!(prev.0 < next.0);
    }
}

mod start_stop {
    use super::*;

    #[test]
    fn stop_without_start_is_rejected() {
        let indicator = ProgressIndicator::new(IndicatorOptions::default());

        assert_eq!(indicator.stop(), Err(IndicatorError::NotRunning));
        assert!(!indicator.is_running());
        assert!(!indicator.is_finished());
    }

    #[test]
    fn double_start_is_rejected() {
        let indicator = ProgressIndicator::new(IndicatorOptions::default());

        assert_eq!(indicator.start(), Ok(()));
        assert_eq!(indicator.start(), Err(IndicatorError::AlreadyRunning));
        assert!(indicator.is_running());

        assert_eq!(indicator.stop(), Ok(()));
        assert_eq!(indicator.stop(), Err(IndicatorError::NotRunning));
        assert!(indicator.is_finished());
    }

    #[test]
    fn activity_spans_start_to_stop() {
        let activity = Arc::new(SpyActivity::default());
        let indicator = ProgressIndicator::new(
            IndicatorOptions::default().activity(Arc::<SpyActivity>::clone(&activity)),
        );

        indicator.start().unwrap();
        assert_eq!(activity.begun.load(Ordering::SeqCst), 1);
        assert_eq!(activity.ended.load(Ordering::SeqCst), 0);

        indicator.stop().unwrap();
        assert_eq!(activity.ended.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_ends_activity() {
        let activity = Arc::new(SpyActivity::default());
        let indicator = ProgressIndicator::new(
            IndicatorOptions::default().activity(Arc::<SpyActivity>::clone(&activity)),
        );

        indicator.start().unwrap();
        indicator.cancel();
        indicator.cancel();

        assert_eq!(activity.ended.load(Ordering::SeqCst), 1);

        indicator.stop().unwrap();
        assert_eq!(activity.ended.load(Ordering::SeqCst), 1);
    }
}

mod cancellation {
    use super::*;

    #[test]
    fn cancel_is_sticky_across_stop() {
        let indicator = ProgressIndicator::new(IndicatorOptions::default());

        indicator.start().unwrap();
        indicator.cancel();
        indicator.cancel();
        assert!(indicator.is_canceled());

        indicator.stop().unwrap();
        assert!(indicator.is_canceled());
        assert!(indicator.check_canceled().is_err());
    }

    #[test]
    fn check_canceled_carries_trace() {
        let indicator = ProgressIndicator::new(IndicatorOptions::default());

        assert!(indicator.check_canceled().is_ok());

        indicator.cancel_with_trace(Backtrace::force_capture());

        let canceled = indicator.check_canceled().unwrap_err();
        assert!(canceled.trace().is_some());
    }

    #[test]
    fn reusable_indicator_restarts_silently() {
        let kind = "ReusableTestIndicator";
        let indicator =
            ProgressIndicator::new(IndicatorOptions::default().reusable(true).kind(kind));

        indicator.start().unwrap();
        indicator.cancel();
        indicator.stop().unwrap();

        indicator.start().unwrap();

        assert!(!indicator.is_canceled());
        assert!(!was_reuse_reported(kind));
    }
}

mod non_cancelable_sections {
    use super::*;

    #[test]
    fn sections_mask_cancellation() {
        let indicator = ProgressIndicator::new(IndicatorOptions::default());
        indicator.cancel();

        indicator.start_non_cancelable_section();
        indicator.start_non_cancelable_section();
        assert!(!indicator.is_cancelable());
        assert!(indicator.check_canceled().is_ok());

        indicator.finish_non_cancelable_section().unwrap();
        assert!(indicator.check_canceled().is_ok());

        indicator.finish_non_cancelable_section().unwrap();
        assert!(indicator.is_cancelable());
        assert!(indicator.check_canceled().is_err());
    }

    #[test]
    fn unmatched_finish_is_rejected() {
        let indicator = ProgressIndicator::new(IndicatorOptions::default());

        assert_eq!(
            indicator.finish_non_cancelable_section(),
            Err(IndicatorError::NonCancelableUnderflow)
        );
        assert!(indicator.is_cancelable());
    }

    #[test]
    fn thread_wide_section_masks_cancellation() {
        let indicator = ProgressIndicator::new(IndicatorOptions::default());
        indicator.cancel();

        {
            let _section = non_cancelable::SectionGuard::enter();
            assert!(indicator.check_canceled().is_ok());
        }

        assert!(indicator.check_canceled().is_err());
    }
}

mod state_stack {
    use super::*;

    #[test]
    fn lifecycle_scenario() {
        let kind = "ScenarioIndicator";
        let indicator = ProgressIndicator::new(IndicatorOptions::default().kind(kind));

        indicator.start().unwrap();

        indicator.set_text("A");
        indicator.set_fraction(0.1);
        indicator.push_state();

        indicator.set_text("B");
        indicator.set_fraction(0.5);

        indicator.pop_state().unwrap();
        assert_eq!(indicator.text(), "A");
        assert_eq!(indicator.fraction(), 0.1);

        indicator.cancel();
        assert!(indicator.is_canceled());

        indicator.stop().unwrap();
        assert!(!indicator.is_running());

        assert!(!was_reuse_reported(kind));
        assert_eq!(indicator.start(), Ok(()));
        assert!(was_reuse_reported(kind));
        assert!(!indicator.is_canceled());
        assert!(!indicator.is_finished());
        assert!(indicator.is_running());

        // The notice is logged once per kind.
        assert!(!report_reuse_once(kind));
    }

    #[test]
    fn pop_on_empty_stack_is_rejected() {
        let indicator = ProgressIndicator::new(IndicatorOptions::default());
        indicator.set_text("unchanged");

        assert_eq!(indicator.pop_state(), Err(IndicatorError::EmptyStateStack));
        assert_eq!(indicator.text(), "unchanged");
    }

    #[test]
    fn pop_keeps_fraction_while_indeterminate() {
        let indicator = ProgressIndicator::new(IndicatorOptions::default());

        indicator.set_fraction(0.3);
        indicator.push_state();
        indicator.set_fraction(0.8);
        indicator.set_indeterminate(true);

        indicator.pop_state().unwrap();

        assert_eq!(indicator.fraction(), 0.8);
    }

    #[test]
    fn fraction_is_not_clamped() {
        let indicator = ProgressIndicator::new(IndicatorOptions::default());
        assert!(indicator.is_indeterminate());

        indicator.set_fraction(1.5);

        assert!(!indicator.is_indeterminate());
        assert_eq!(indicator.fraction(), 1.5);
    }
}

mod wrapping {
    use super::*;

    #[test]
    fn wrapper_copies_state_and_follows_original_cancellation() {
        let original = ProgressIndicator::new(IndicatorOptions::default().modal(true));
        original.start().unwrap();
        original.set_text("loading");
        original.set_fraction(0.25);
        original.push_state();

        let wrapper = ProgressIndicator::wrap(erased(&original));

        assert!(wrapper.is_running());
        assert!(wrapper.is_modal());
        assert_eq!(wrapper.text(), "loading");
        assert_eq!(wrapper.fraction(), 0.25);
        assert_eq!(wrapper.kind(), "WrappedIndicator");
        assert!(wrapper.pop_state().is_ok());

        assert!(!wrapper.is_canceled());
        original.cancel();
        assert!(wrapper.is_canceled());
    }

    #[test]
    fn wrapper_does_not_begin_activities() {
        let activity = Arc::new(SpyActivity::default());
        let original = ProgressIndicator::new(
            IndicatorOptions::default().activity(Arc::<SpyActivity>::clone(&activity)),
        );

        let wrapper = ProgressIndicator::wrap(erased(&original));
        wrapper.start().unwrap();
        wrapper.stop().unwrap();

        assert_eq!(activity.begun.load(Ordering::SeqCst), 0);

        original.start().unwrap();
        assert_eq!(activity.begun.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chain_walks_to_the_innermost_indicator() {
        let inner = ProgressIndicator::new(IndicatorOptions::default());
        let middle: Arc<dyn Indicator> = ProgressIndicator::wrap(erased(&inner));
        let outer: Arc<dyn Indicator> = ProgressIndicator::wrap(Arc::clone(&middle));

        let ids: Vec<_> = chain(&outer).map(|link| link.id()).collect();

        assert_eq!(ids, [outer.id(), middle.id(), inner.id()]);
        assert_eq!(unwrap(&outer).id(), inner.id());
        assert_eq!(unwrap(&erased(&inner)).id(), inner.id());
    }
}
