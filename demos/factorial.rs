// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Simple program that computes factorials on a 4-thread engine, reading the
//! results back in submission order.

use std::time::Instant;
use taskengine::{Engine, Error};

fn factorial(n: u64) -> u64 {
    (2..=n).product()
}

fn main() -> Result<(), Error> {
    env_logger::init();

    let engine = Engine::new(4)?;

    println!("Computing factorials on the engine...");
    let handles = (1..=10)
        .map(|n| engine.submit(move || factorial(n)).map(|handle| (n, handle)))
        .collect::<Result<Vec<_>, _>>()?;
    for (n, handle) in handles {
        println!("{n}! = {}", handle.join()?);
    }

    println!("\nComputing larger factorials in parallel...");
    let start = Instant::now();
    let handles = (15..=20)
        .map(|n| engine.submit(move || factorial(n)).map(|handle| (n, handle)))
        .collect::<Result<Vec<_>, _>>()?;
    for (n, handle) in handles {
        println!("{n}! = {}", handle.join()?);
    }
    println!("\nAll computations finished in {:?}", start.elapsed());

    engine.shutdown();
    match engine.submit(|| factorial(3)) {
        Err(Error::EngineStopped) => println!("Submitting after shutdown is rejected"),
        Err(e) => return Err(e),
        Ok(_) => unreachable!("the engine accepted a task after shutdown"),
    }
    Ok(())
}
