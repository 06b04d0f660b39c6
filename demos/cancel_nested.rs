use std::{sync::Arc, thread, time::Duration};

use vigil::{Indicator, IndicatorOptions, ProgressIndicator, ProgressManager};

fn main() {
    tracing_subscriber::fmt::init();

    let manager = ProgressManager::builder().build();
    let indicator = ProgressIndicator::new(IndicatorOptions::default());
    let erased: Arc<dyn Indicator> = indicator.clone();

    // Keeps the indicator running while the workers are busy:
    let coordinator = {
        let manager = Arc::clone(&manager);
        let indicator = Arc::clone(&erased);

        thread::spawn(move || {
            manager.run_process(Some(&indicator), || {
                let worker_handles: Vec<_> = (0..3)
                    .map(|worker| {
                        let manager = Arc::clone(&manager);
                        let indicator = Arc::clone(&indicator);

                        thread::spawn(move || {
                            manager.execute_process_under_progress(Some(&indicator), || {
                                for step in 1..=100 {
                                    thread::sleep(Duration::from_millis(25));

                                    // Fails as soon as anybody cancels the shared indicator:
                                    if manager.check_canceled().is_err() {
                                        println!("Worker {worker} got canceled at step {step}.");
                                        return;
                                    }
                                }

                                println!("Worker {worker} finished.");
                            });
                        })
                    })
                    .collect();

                for worker_handle in worker_handles {
                    worker_handle.join().unwrap();
                }
            });
        })
    };

    // Watch the progress for a bit, then cancel:
    for _ in 0..5 {
        thread::sleep(Duration::from_millis(100));
        println!("running: {}", indicator.is_running());
    }

    indicator.cancel();

    coordinator.join().unwrap();

    println!("canceled: {}", indicator.is_canceled());
}
