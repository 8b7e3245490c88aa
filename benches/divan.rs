// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

fn main() {
    divan::main();
}

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const NUM_TASKS: &[usize] = &[100, 1_000, 10_000];

/// Work done by each task.
fn task(i: u64) -> u64 {
    (1..=(i % 32)).fold(1u64, |acc, x| acc.wrapping_mul(x))
}

/// Baseline benchmarks running the tasks inline (without any multi-threading
/// involved).
mod serial {
    use super::NUM_TASKS;
    use divan::counter::ItemsCount;
    use divan::{black_box, Bencher};

    #[divan::bench(args = NUM_TASKS)]
    fn submit(bencher: Bencher, num_tasks: usize) {
        bencher
            .counter(ItemsCount::new(num_tasks))
            .bench_local(|| {
                (0..num_tasks as u64)
                    .map(|i| super::task(black_box(i)))
                    .fold(0u64, u64::wrapping_add)
            })
    }
}

/// Benchmarks using Rayon's scoped spawns.
mod rayon {
    use super::{NUM_TASKS, NUM_THREADS};
    use divan::counter::ItemsCount;
    use divan::{black_box, Bencher};

    #[divan::bench(consts = NUM_THREADS, args = NUM_TASKS)]
    fn submit_rayon<const NUM_THREADS: usize>(bencher: Bencher, num_tasks: usize) {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(NUM_THREADS)
            .build()
            .unwrap();
        let mut outputs = vec![0u64; num_tasks];
        bencher
            .counter(ItemsCount::new(num_tasks))
            .bench_local(|| {
                thread_pool.scope(|scope| {
                    for (i, output) in outputs.iter_mut().enumerate() {
                        scope.spawn(move |_| *output = super::task(black_box(i as u64)));
                    }
                });
                outputs.iter().copied().fold(0u64, u64::wrapping_add)
            });
    }
}

/// Benchmarks using Taskengine.
mod taskengine {
    use super::{NUM_TASKS, NUM_THREADS};
    use divan::counter::ItemsCount;
    use divan::{black_box, Bencher};
    use taskengine::{CpuPinningPolicy, EngineBuilder, ThreadCount};

    #[divan::bench(consts = NUM_THREADS, args = NUM_TASKS)]
    fn submit_pinned<const NUM_THREADS: usize>(bencher: Bencher, num_tasks: usize) {
        submit_impl::<NUM_THREADS>(bencher, num_tasks, CpuPinningPolicy::IfSupported)
    }

    #[divan::bench(consts = NUM_THREADS, args = NUM_TASKS)]
    fn submit_unpinned<const NUM_THREADS: usize>(bencher: Bencher, num_tasks: usize) {
        submit_impl::<NUM_THREADS>(bencher, num_tasks, CpuPinningPolicy::No)
    }

    fn submit_impl<const NUM_THREADS: usize>(
        bencher: Bencher,
        num_tasks: usize,
        cpu_pinning: CpuPinningPolicy,
    ) {
        let engine = EngineBuilder {
            num_threads: ThreadCount::try_from(NUM_THREADS).unwrap(),
            cpu_pinning,
        }
        .build()
        .unwrap();

        bencher
            .counter(ItemsCount::new(num_tasks))
            .bench_local(|| {
                let handles = (0..num_tasks as u64)
                    .map(|i| engine.submit(move || super::task(black_box(i))).unwrap())
                    .collect::<Vec<_>>();
                handles
                    .into_iter()
                    .map(|handle| handle.join().unwrap())
                    .fold(0u64, u64::wrapping_add)
            });
    }
}
