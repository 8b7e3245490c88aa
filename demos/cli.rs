// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to run examples of parallel tasks on an engine.

use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use taskengine::{CpuPinningPolicy, Engine, EngineBuilder, Error, TaskHandle, ThreadCount};

fn main() -> Result<(), Error> {
    env_logger::init();
    let cli = Cli::parse();

    let engine = EngineBuilder {
        num_threads: match cli.num_threads {
            Some(num_threads) => ThreadCount::Count(num_threads),
            None => ThreadCount::AvailableParallelism,
        },
        cpu_pinning: CpuPinningPolicy::IfSupported,
    }
    .build()?;
    let num_tasks = cli.num_tasks.unwrap_or(engine.num_threads()).get();

    match cli.scenario {
        Scenario::Sum => {
            let input = Arc::new(fill_random(cli.input_size, 1..=100));

            let start = Instant::now();
            let serial = black_box(&input).iter().map(|&x| x as u64).sum::<u64>();
            println!("serial sum = {serial} in {:?}", start.elapsed());

            let start = Instant::now();
            let parallel = split(input.len(), num_tasks)
                .map(|range| {
                    let input = input.clone();
                    engine.submit(move || input[range].iter().map(|&x| x as u64).sum::<u64>())
                })
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(TaskHandle::join)
                .sum::<Result<u64, _>>()?;
            println!("parallel sum = {parallel} in {:?}", start.elapsed());
            assert_eq!(serial, parallel);
        }
        Scenario::Blur => {
            let width = ((cli.input_size as f64).sqrt() as usize).max(1);
            let height = cli.input_size / width;
            let image = Arc::new(Image {
                width,
                height,
                pixels: fill_random(width * height, 0..=255),
            });

            let start = Instant::now();
            let serial = image.blur_rows(0..height);
            println!("serial blur of {width}x{height} in {:?}", start.elapsed());

            let start = Instant::now();
            let bands = split(height, num_tasks)
                .map(|rows| {
                    let image = image.clone();
                    engine.submit(move || image.blur_rows(rows))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let mut parallel = Vec::with_capacity(width * height);
            for band in bands {
                parallel.extend(band.join()?);
            }
            println!("parallel blur of {width}x{height} in {:?}", start.elapsed());
            assert_eq!(serial, parallel);
        }
        Scenario::Pi => {
            let start = Instant::now();
            let handles = split(cli.input_size, num_tasks)
                .enumerate()
                .map(|(i, range)| engine.submit(move || estimate_pi(i as u64, range.len())))
                .collect::<Result<Vec<_>, _>>()?;

            let mut sum = 0.0;
            let mut completed = 0;
            for handle in handles {
                match handle.join() {
                    Ok(estimate) => {
                        sum += estimate;
                        completed += 1;
                    }
                    Err(Error::TaskFailed(failure)) => eprintln!("estimation failed: {failure}"),
                    Err(e) => return Err(e),
                }
            }
            if completed == 0 {
                eprintln!("all the estimation tasks failed");
                std::process::exit(1);
            }
            let pi = sum / completed as f64;
            println!(
                "pi ~= {pi} (error {:e}) from {completed} tasks in {:?}",
                (pi - std::f64::consts::PI).abs(),
                start.elapsed()
            );
        }
    }

    engine.shutdown();
    Ok(())
}

/// Splits `0..len` into `parts` contiguous ranges, the first ones being one
/// item longer when `len` isn't a multiple of `parts`.
fn split(len: usize, parts: usize) -> impl Iterator<Item = std::ops::Range<usize>> {
    let base = len / parts;
    let remainder = len % parts;
    (0..parts).map(move |i| {
        let start = i * base + i.min(remainder);
        let end = start + base + usize::from(i < remainder);
        start..end
    })
}

/// Creates a vector of `len` random values in the given range. The values are
/// fixed by a constant-time seed for reproducibility.
fn fill_random(len: usize, range: std::ops::RangeInclusive<u8>) -> Vec<u8> {
    let mut rng = ChaCha12Rng::seed_from_u64(42);
    (0..len).map(|_| rng.random_range(range.clone())).collect()
}

/// Estimates pi by sampling `points` uniform points in the square
/// `[-1, 1] x [-1, 1]` and counting those that fall inside the unit circle.
///
/// Panics if `points` is zero.
fn estimate_pi(seed: u64, points: usize) -> f64 {
    assert!(points > 0, "the number of points must be positive");

    let mut rng = ChaCha12Rng::seed_from_u64(seed);
    let inside = (0..points)
        .filter(|_| {
            let x: f64 = rng.random_range(-1.0..=1.0);
            let y: f64 = rng.random_range(-1.0..=1.0);
            x * x + y * y <= 1.0
        })
        .count();
    4.0 * inside as f64 / points as f64
}

/// A grayscale image, stored row by row.
struct Image {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Image {
    /// Applies a 3x3 box blur to the given rows, returning the blurred rows.
    /// Pixels on the border average only their neighbors inside the image.
    fn blur_rows(&self, rows: std::ops::Range<usize>) -> Vec<u8> {
        let mut output = Vec::with_capacity(rows.len() * self.width);
        for y in rows {
            for x in 0..self.width {
                let mut sum = 0u32;
                let mut count = 0u32;
                for ny in y.saturating_sub(1)..=(y + 1).min(self.height - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(self.width - 1) {
                        sum += u32::from(self.pixels[ny * self.width + nx]);
                        count += 1;
                    }
                }
                output.push((sum / count) as u8);
            }
        }
        output
    }
}

/// CLI tool to run examples of parallel tasks on an engine.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Number of worker threads. Default to the available parallelism.
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,

    /// Number of tasks to split the work into. Default to the number of
    /// worker threads.
    #[arg(long)]
    num_tasks: Option<NonZeroUsize>,

    /// Scenario to run in parallel.
    #[arg(long, value_enum)]
    scenario: Scenario,

    /// Number of items in the input: numbers to sum, pixels to blur or points
    /// to sample.
    #[arg(long, default_value_t = 1_000_000)]
    input_size: usize,
}

/// Scenario to run.
#[derive(ValueEnum, Clone, Debug, PartialEq, Eq)]
enum Scenario {
    /// Sum a vector of random numbers.
    Sum,
    /// Apply a 3x3 blur filter to a random square image.
    Blur,
    /// Estimate pi with the Monte-Carlo method.
    Pi,
}
