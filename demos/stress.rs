// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Stress driver: floods a pool with seeded pseudo-random spin tasks from
//! several producers and verifies that every task ran exactly once.

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use workpool::{CpuPinningPolicy, ThreadCount, ThreadPoolBuilder};

#[derive(Parser)]
#[command(about = "Stress-test a bounded thread pool")]
struct Cli {
    /// Number of worker threads (defaults to the available parallelism).
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,

    /// Capacity of the task queue.
    #[arg(long, default_value_t = NonZeroUsize::new(256).unwrap())]
    queue_capacity: NonZeroUsize,

    /// Number of producer threads submitting tasks concurrently.
    #[arg(long, default_value_t = 4)]
    num_producers: u64,

    /// Number of tasks submitted by each producer.
    #[arg(long, default_value_t = 10_000)]
    tasks_per_producer: u64,

    /// Seed for the per-task workloads.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let pool = ThreadPoolBuilder {
        num_threads: match cli.num_threads {
            Some(num_threads) => ThreadCount::Count(num_threads),
            None => ThreadCount::AvailableParallelism,
        },
        queue_capacity: cli.queue_capacity,
        cpu_pinning: CpuPinningPolicy::No,
    }
    .build()
    .expect("failed to spawn the thread pool");

    println!(
        "workers = {}, queue capacity = {}, producers = {}",
        pool.num_threads(),
        pool.queue_capacity(),
        cli.num_producers
    );

    let executed = Arc::new(AtomicU64::new(0));
    let start = Instant::now();

    std::thread::scope(|scope| {
        for producer in 0..cli.num_producers {
            let pool = &pool;
            let executed = &executed;
            scope.spawn(move || {
                let mut rng = ChaCha12Rng::seed_from_u64(cli.seed.wrapping_add(producer));
                for _ in 0..cli.tasks_per_producer {
                    let spin: u32 = rng.random_range(0..1_000);
                    let executed = executed.clone();
                    pool.submit(move || {
                        for i in 0..spin {
                            black_box(i);
                        }
                        executed.fetch_add(1, Ordering::Relaxed);
                    })
                    .expect("task submission failed");
                }
            });
        }
    });

    // All producers are done; tear down and wait for the queue to drain.
    drop(pool);
    let elapsed = start.elapsed();

    let expected = cli.num_producers * cli.tasks_per_producer;
    let executed = executed.load(Ordering::Relaxed);
    assert_eq!(executed, expected, "lost or duplicated tasks");
    println!("executed {executed} tasks in {elapsed:?}");
}
