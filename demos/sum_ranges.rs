// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Sums, over numeric ranges read from an input file, the numbers whose
//! decimal representation is a shorter digit block repeated (e.g. 2121 or
//! 777). One task per range merges its partial sum into a shared atomic
//! accumulator.

use std::env;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use workpool::ThreadPoolBuilder;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        eprintln!(
            "Usage: {} <file_input>",
            args.first().map(|s| s.as_str()).unwrap_or("sum_ranges")
        );
        return ExitCode::FAILURE;
    };
    let data = match std::fs::read_to_string(file_path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Error reading {file_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pool = match ThreadPoolBuilder::default().build() {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Failed to spawn the thread pool: {e}");
            return ExitCode::FAILURE;
        }
    };

    let total = Arc::new(AtomicU64::new(0));
    for (from, to) in parse_ranges(&data) {
        let total = total.clone();
        if let Err(e) = pool.submit(move || {
            let local = sum_repeating(from, to);
            total.fetch_add(local, Ordering::Relaxed);
        }) {
            eprintln!("Failed to submit range {from}-{to}: {e}");
            return ExitCode::FAILURE;
        }
    }

    // Joining the workers makes every merge visible before the read below.
    drop(pool);
    println!("sum = {}", total.load(Ordering::Relaxed));
    ExitCode::SUCCESS
}

/// Parses `from-to` pairs, one or more per line, separated by commas.
fn parse_ranges(data: &str) -> impl Iterator<Item = (u64, u64)> + '_ {
    data.lines()
        .flat_map(|line| line.split(','))
        .filter_map(|s| s.trim().split_once('-'))
        .filter_map(|(from, to)| Some((from.parse().ok()?, to.parse().ok()?)))
}

/// Sums the numbers in `from..=to` whose digits repeat a shorter block.
fn sum_repeating(from: u64, to: u64) -> u64 {
    (from..=to).filter(|&n| has_repeating_pattern(n)).sum()
}

/// Returns whether the decimal representation of `n` consists of a block of
/// digits repeated two or more times.
fn has_repeating_pattern(n: u64) -> bool {
    let mut digits = [0u8; 20];
    let mut len = 0;
    let mut x = n;
    loop {
        digits[len] = (x % 10) as u8;
        len += 1;
        x /= 10;
        if x == 0 {
            break;
        }
    }

    // The digits are in reverse order, which doesn't affect periodicity.
    (1..=len / 2).any(|period| {
        len % period == 0 && (period..len).all(|i| digits[i] == digits[i - period])
    })
}
