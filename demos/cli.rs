// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to demonstrate the thread pool and compare it against a
//! single-threaded loop.

use clap::{Parser, ValueEnum};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::error::Error;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::time::Instant;
use taskpool::{CpuPinningPolicy, ThreadCount, ThreadPool, ThreadPoolBuilder};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let thread_pool = ThreadPoolBuilder {
        num_threads: match cli.num_threads {
            Some(num_threads) => ThreadCount::Count(num_threads),
            None => ThreadCount::AvailableParallelism,
        },
        cpu_pinning: if cli.pin_threads {
            CpuPinningPolicy::IfSupported
        } else {
            CpuPinningPolicy::No
        },
        ..Default::default()
    }
    .build()?;
    println!("Running with {} worker threads", thread_pool.num_threads());

    match cli.scenario {
        Scenario::Features => feature_demonstration(&thread_pool)?,
        Scenario::Performance => performance_comparison(&thread_pool, &cli)?,
        Scenario::All => {
            feature_demonstration(&thread_pool)?;
            performance_comparison(&thread_pool, &cli)?;
        }
    }
    Ok(())
}

/// A computationally intensive function to simulate work.
fn heavy_computation(value: f64) -> f64 {
    value.sin() * value.cos() + (value + 1.0).ln().powi(2)
}

fn feature_demonstration(thread_pool: &ThreadPool) -> Result<(), Box<dyn Error>> {
    println!("--- Feature demonstration ---");

    println!("Enqueueing a simple task...");
    let handle = thread_pool.enqueue(|| 42);
    println!("Task returned: {}", handle.join()?);

    println!("Using for_each to double each element of a vector...");
    let mut numbers = vec![1, 2, 3, 4, 5];
    println!("Original vector: {numbers:?}");
    thread_pool.for_each(&mut numbers, |n| *n *= 2)?;
    println!("Modified vector: {numbers:?}");

    println!("Using transform_reduce to compute the sum of squares...");
    let sum_of_squares = thread_pool.transform_reduce(&numbers, 0, |&n| n * n, |a, b| a + b)?;
    println!("Sum of squares (on modified vector): {sum_of_squares}");

    println!("Enqueueing a task that panics...");
    let handle = thread_pool.enqueue(|| -> u32 { panic!("something went wrong") });
    match handle.join() {
        Ok(value) => println!("Task unexpectedly returned {value}"),
        Err(e) => println!("Task failed: {e}"),
    }
    Ok(())
}

fn performance_comparison(thread_pool: &ThreadPool, cli: &Cli) -> Result<(), Box<dyn Error>> {
    println!("--- Performance comparison ---");

    let data = generate_input(cli.input_size, cli.input);
    println!("Performing heavy computation on {} elements.", data.len());

    println!("Running single-threaded computation...");
    let start = Instant::now();
    let result_single = black_box(&data)
        .iter()
        .map(|&x| heavy_computation(x))
        .collect::<Vec<f64>>();
    let duration_single = start.elapsed();
    println!(
        "Single-threaded execution time: {:.2} ms",
        duration_single.as_secs_f64() * 1000.0
    );

    println!("Running multi-threaded computation...");
    let mut result_multi = data.clone();
    let start = Instant::now();
    thread_pool.for_each(black_box(&mut result_multi), |x| *x = heavy_computation(*x))?;
    let duration_multi = start.elapsed();
    println!(
        "Multi-threaded execution time: {:.2} ms",
        duration_multi.as_secs_f64() * 1000.0
    );

    if result_single == result_multi {
        println!("Results are identical.");
        let speedup = duration_single.as_secs_f64() / duration_multi.as_secs_f64();
        println!("Speedup: {speedup:.2}x");
    } else {
        println!("Error: results are not identical!");
    }
    Ok(())
}

/// Creates the input of the performance comparison. Random inputs are fixed by
/// a constant seed for reproducibility.
fn generate_input(input_size: usize, input: Input) -> Vec<f64> {
    match input {
        Input::Sequential => (1..=input_size).map(|x| x as f64).collect(),
        Input::Random => {
            let mut rng = ChaCha12Rng::seed_from_u64(42);
            (0..input_size)
                .map(|_| rng.random_range(1.0..input_size.max(2) as f64))
                .collect()
        }
    }
}

/// CLI tool to demonstrate the thread pool.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Number of worker threads. Default to the available parallelism.
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,

    /// Whether to pin each worker thread to a CPU, when supported.
    #[arg(long, default_value_t = false)]
    pin_threads: bool,

    /// Scenario to run.
    #[arg(long, value_enum, default_value_t = Scenario::All)]
    scenario: Scenario,

    /// Number of items in the input of the performance comparison.
    #[arg(long, default_value_t = 10_000_000)]
    input_size: usize,

    /// Distribution of the input of the performance comparison.
    #[arg(long, value_enum, default_value_t = Input::Sequential)]
    input: Input,
}

/// Scenario to run.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Scenario {
    /// Demonstrate each operation of the thread pool.
    Features,
    /// Compare a heavy computation on one thread and on the thread pool.
    Performance,
    /// Run all the scenarios.
    All,
}

/// Distribution of the input values.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Input {
    /// The values 1, 2, 3, ... in order.
    Sequential,
    /// Uniformly random values.
    Random,
}
