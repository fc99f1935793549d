//! Benchmarks for point lookups in the flat red-black tree.
//!
//! Searches for every inserted key once at each of the three index widths,
//! with `std::collections::BTreeMap` as the baseline.
//!
//! Run with:
//!
//! `> cargo bench --bench bench_search`
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use std::collections::{BTreeMap, HashSet};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use flat_rbt::{Rbt16, Rbt32, Rbt64};
use rand::Rng;

const MAX_SIZE: usize = 4096;

fn random_numbers(min: u32, max: u32) -> Vec<u32> {
    let mut rng = rand::thread_rng();
    let mut nums: HashSet<u32> = HashSet::new();
    while nums.len() < MAX_SIZE {
        nums.insert(rng.gen_range(min..=max));
    }
    nums.into_iter().collect()
}

pub fn benchmark_search_function(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let nums = random_numbers(0, 100_000);

    let mut tree16: Rbt16<u32, u32> = Rbt16::with_capacity(MAX_SIZE as u64).unwrap();
    let mut tree32: Rbt32<u32, u32> = Rbt32::with_capacity(MAX_SIZE as u64).unwrap();
    let mut tree64: Rbt64<u32, u32> = Rbt64::with_capacity(MAX_SIZE as u64).unwrap();
    let mut map: BTreeMap<u32, u32> = BTreeMap::new();
    for num in &nums {
        tree16.insert(*num, *num).unwrap();
        tree32.insert(*num, *num).unwrap();
        tree64.insert(*num, *num).unwrap();
        map.insert(*num, *num);
    }

    group.bench_with_input(BenchmarkId::new("rbt", "16bit"), &nums, |b, nums| {
        b.iter(|| {
            for num in nums {
                assert!(tree16.get(num).is_some());
            }
        });
    });

    group.bench_with_input(BenchmarkId::new("rbt", "32bit"), &nums, |b, nums| {
        b.iter(|| {
            for num in nums {
                assert!(tree32.get(num).is_some());
            }
        });
    });

    group.bench_with_input(BenchmarkId::new("rbt", "64bit"), &nums, |b, nums| {
        b.iter(|| {
            for num in nums {
                assert!(tree64.get(num).is_some());
            }
        });
    });

    group.bench_with_input(BenchmarkId::new("btreemap", "std"), &nums, |b, nums| {
        b.iter(|| {
            for num in nums {
                assert!(map.get(num).is_some());
            }
        });
    });

    // The dense slot layout is the whole point of the unordered cursor: a
    // full scan is a single sequential sweep.
    group.bench_function(BenchmarkId::new("rbt_scan", "32bit"), |b| {
        b.iter(|| tree32.unordered_iter().map(|(_, value)| *value as u64).sum::<u64>());
    });

    group.finish();
}

criterion_group!(benches, benchmark_search_function);
criterion_main!(benches);
