use std::{sync::Arc, thread, time::Duration};

use vigil::{Indicator, ProgressIndicator, ProgressManager, Task, TaskError};

struct CountDown {
    from: u32,
}

impl Task for CountDown {
    type Output = u32;

    fn title(&self) -> &str {
        "Counting down"
    }

    fn run(&mut self, indicator: &Arc<dyn Indicator>) -> Result<u32, TaskError> {
        for _ in 0..self.from {
            indicator.check_canceled()?;
            thread::sleep(Duration::from_millis(10));
        }

        Ok(self.from)
    }

    fn on_success(&mut self, output: u32) {
        println!("Counted down from {output}.");
    }

    fn on_cancel(&mut self) {
        println!("Count down got canceled.");
    }

    fn on_finished(&mut self) {
        println!("Count down finished.");
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let manager = ProgressManager::builder().build();

    // A plain computation, run on a worker thread:
    let result = manager
        .runner(|indicator| {
            let mut sum = 0u64;
            for value in 1..=1_000 {
                indicator.check_canceled()?;
                sum += value;
            }
            Ok(sum)
        })
        .submit_and_wait()
        .unwrap();

    println!("sum: {:?}, canceled: {}", result.value, result.canceled);

    // A task with callbacks, canceled half way:
    let indicator = ProgressIndicator::new(Default::default());
    let completion = manager
        .run_in_background(CountDown { from: 50 }, Some(indicator.clone() as Arc<dyn Indicator>))
        .unwrap();

    thread::sleep(Duration::from_millis(100));
    indicator.cancel();

    let task = completion.wait().unwrap();
    println!("'{}' returned.", task.title());
}
