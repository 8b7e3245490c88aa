// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! One producer feeding three consumers through a closable queue. Consumers
//! keep draining the queue after it's closed, and exit once it's empty.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::time::Duration;
use taskengine::TaskQueue;

const NUM_ITEMS: usize = 10;
const NUM_CONSUMERS: usize = 3;

fn main() {
    env_logger::init();

    let queue = TaskQueue::new();

    std::thread::scope(|scope| {
        let consumers = (1..=NUM_CONSUMERS)
            .map(|id| {
                let queue = &queue;
                scope.spawn(move || {
                    let mut processed = 0usize;
                    while let Some(value) = queue.pop() {
                        println!("Consumer {id} processed {value} (result: {})", value * 2);
                        processed += 1;
                        std::thread::sleep(Duration::from_millis(200));
                    }
                    println!("Consumer {id} is done");
                    processed
                })
            })
            .collect::<Vec<_>>();

        let mut rng = ChaCha12Rng::seed_from_u64(42);
        for _ in 0..NUM_ITEMS {
            let value: u32 = rng.random_range(1..=100);
            queue
                .push(value)
                .expect("the queue is only closed by the producer");
            println!("Pushed {value}");
            std::thread::sleep(Duration::from_millis(100));
        }
        println!("Producer is done, closing the queue...");
        queue.close();

        let processed: usize = consumers
            .into_iter()
            .map(|consumer| consumer.join().unwrap())
            .sum();
        assert_eq!(processed, NUM_ITEMS);
        println!("All {processed} items were processed");
    });
}
