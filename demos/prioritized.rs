use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use vigil::{Indicator, IndicatorOptions, ProgressConfig, ProgressIndicator, ProgressManager};

fn main() {
    tracing_subscriber::fmt::init();

    let manager = ProgressManager::builder()
        .config(ProgressConfig::default().min_prioritization(Duration::from_millis(10)))
        .build();

    let background_steps = Arc::new(AtomicUsize::new(0));

    let background = {
        let manager = Arc::clone(&manager);
        let background_steps = Arc::clone(&background_steps);

        thread::spawn(move || {
            let indicator: Arc<dyn Indicator> =
                ProgressIndicator::new(IndicatorOptions::default());

            manager.run_process(Some(&indicator), || {
                for _ in 0..200 {
                    // Yields here whenever another thread is prioritized:
                    manager.check_canceled().ok();

                    thread::sleep(Duration::from_millis(1));
                    background_steps.fetch_add(1, Ordering::SeqCst);
                }
            });
        })
    };

    thread::sleep(Duration::from_millis(20));

    let during = manager.compute_prioritized(|| {
        let before = background_steps.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        background_steps.load(Ordering::SeqCst) - before
    });

    background.join().unwrap();

    println!("Background steps while prioritized: {during}");
    println!(
        "Background steps in total: {}",
        background_steps.load(Ordering::SeqCst)
    );
}
