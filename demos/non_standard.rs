use std::{sync::Arc, thread, time::Duration};

use vigil::{test_utils::NonStandardIndicator, Indicator, ProgressConfig, ProgressManager};

fn main() {
    tracing_subscriber::fmt::init();

    let manager = ProgressManager::builder()
        .config(ProgressConfig::default().ping_interval(Duration::from_millis(5)))
        .build();

    // Cancelling this indicator never notifies the registry by itself.
    let indicator: Arc<dyn Indicator> = NonStandardIndicator::new();

    let worker = {
        let manager = Arc::clone(&manager);
        let indicator = Arc::clone(&indicator);

        thread::spawn(move || {
            manager.run_process(Some(&indicator), || {
                let mut steps = 0;

                while manager.check_canceled().is_ok() {
                    thread::sleep(Duration::from_millis(10));
                    steps += 1;
                }

                println!("Pinger noticed the cancellation after {steps} steps.");
            });
        })
    };

    thread::sleep(Duration::from_millis(100));
    println!("pinging: {}", manager.registry().is_pinging());

    indicator.cancel();

    worker.join().unwrap();

    println!("pinging: {}", manager.registry().is_pinging());
}
