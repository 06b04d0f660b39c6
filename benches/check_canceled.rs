use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::sync::Arc;

use vigil::{
    test_utils::CountingHook, CheckCanceledHook, Indicator, IndicatorOptions, ProgressIndicator,
    ProgressManager,
};

const THREAD_STEPS: [usize; 6] = [1, 2, 4, 8, 16, 32];
const ITERATIONS: usize = 10_000;

fn make_indicator() -> Arc<dyn Indicator> {
    ProgressIndicator::new(IndicatorOptions::default())
}

fn check_on_threads(manager: &Arc<ProgressManager>, threads: usize) {
    let mut handles = vec![];

    for _ in 1..=threads {
        let manager = Arc::clone(manager);

        let handle = std::thread::spawn(move || {
            let indicator = make_indicator();

            manager.execute_process_under_progress(Some(&indicator), || {
                for _ in 0..(ITERATIONS / threads) {
                    let _ = black_box(manager.check_canceled());
                }
            });
        });

        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

pub fn nothing_canceled(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_canceled(): nothing canceled");
    for threads in THREAD_STEPS {
        group.throughput(Throughput::Elements(ITERATIONS as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{threads} threads")),
            &threads,
            |b, &threads| {
                let manager = ProgressManager::builder().build();

                b.iter(|| check_on_threads(&manager, threads));
            },
        );
    }
    group.finish();
}

pub fn canceled_elsewhere(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_canceled(): canceled elsewhere");
    for threads in THREAD_STEPS {
        group.throughput(Throughput::Elements(ITERATIONS as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{threads} threads")),
            &threads,
            |b, &threads| {
                let manager = ProgressManager::builder().build();
                let canceled = make_indicator();
                canceled.cancel();

                // Forces every other thread off the fast path.
                manager.execute_process_under_progress(Some(&canceled), || {
                    b.iter(|| check_on_threads(&manager, threads));
                });
            },
        );
    }
    group.finish();
}

pub fn hook_installed(c: &mut Criterion) {
    c.bench_function("check_canceled(): hook installed", |b| {
        let manager = ProgressManager::builder().build();
        let hook = CountingHook::new();
        manager.set_check_canceled_hook(Some(hook as Arc<dyn CheckCanceledHook>));

        b.iter(|| {
            for _ in 0..ITERATIONS {
                let _ = black_box(manager.check_canceled());
            }
        });
    });
}

criterion_group!(benches, nothing_canceled, canceled_elsewhere, hook_installed);
criterion_main!(benches);
