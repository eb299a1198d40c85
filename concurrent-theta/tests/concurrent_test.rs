// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;

use concurrent_theta::concurrent::ConcurrentThetaSketch;
use concurrent_theta::concurrent::CurrentThread;
use concurrent_theta::concurrent::Payload;
use concurrent_theta::concurrent::PropagationPool;
use concurrent_theta::concurrent::Scheduler;
use concurrent_theta::concurrent::SharedThetaSketch;
use concurrent_theta::concurrent::submit_propagation;
use concurrent_theta::theta::CompactThetaSketch;
use googletest::prelude::*;
use rand::seq::SliceRandom;

const BIG_THETA: u64 = i64::MAX as u64;

/// Records every contract call so tests can observe the exact merge behavior.
#[derive(Debug)]
struct RecordingSketch {
    epoch: AtomicU64,
    theta: AtomicU64,
    gate: AtomicBool,
    /// Number of threads currently inside the critical section.
    active: AtomicUsize,
    max_active: AtomicUsize,
    inserts: Mutex<Vec<u64>>,
    completions: AtomicUsize,
    flags_cleared: AtomicUsize,
}

impl RecordingSketch {
    fn new(epoch: u64, theta: u64) -> Arc<Self> {
        Arc::new(Self {
            epoch: AtomicU64::new(epoch),
            theta: AtomicU64::new(theta),
            gate: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            inserts: Mutex::new(Vec::new()),
            completions: AtomicUsize::new(0),
            flags_cleared: AtomicUsize::new(0),
        })
    }

    fn inserts(&self) -> Vec<u64> {
        self.inserts.lock().unwrap().clone()
    }
}

impl SharedThetaSketch for RecordingSketch {
    fn start_propagation(&self) {
        while self
            .gate
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            thread::yield_now();
        }
        let active = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_active.fetch_max(active, Ordering::AcqRel);
    }

    fn validate_epoch(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    fn update_single(&self, hash: u64) {
        assert!(
            self.gate.load(Ordering::Acquire),
            "update_single outside propagation rights"
        );
        self.inserts.lock().unwrap().push(hash);
    }

    fn volatile_theta(&self) -> u64 {
        self.theta.load(Ordering::Acquire)
    }

    fn end_propagation(&self, local_flag: Option<&AtomicBool>) {
        if let Some(flag) = local_flag {
            flag.store(false, Ordering::Release);
            self.flags_cleared.fetch_add(1, Ordering::AcqRel);
        }
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.completions.fetch_add(1, Ordering::AcqRel);
        self.gate.store(false, Ordering::Release);
    }
}

fn submit_now(shared: &Arc<RecordingSketch>, flag: &Arc<AtomicBool>, payload: Payload, epoch: u64) {
    flag.store(true, Ordering::Release);
    submit_propagation(&CurrentThread, Arc::clone(shared), Arc::clone(flag), payload, epoch);
}

#[test]
fn test_ordered_payload_stops_at_theta() {
    // Shared structure at epoch 5, volatile theta 1000.
    let shared = RecordingSketch::new(5, 1000);
    let flag = Arc::new(AtomicBool::new(false));
    let payload = CompactThetaSketch::new(vec![10, 500, 999, 1500, 2000], BIG_THETA, true);

    submit_now(&shared, &flag, Payload::Sketch(payload), 5);

    // Exactly the prefix below theta is inserted; 1500 and 2000 never are.
    assert_that!(shared.inserts(), eq(&vec![10u64, 500, 999]));
    assert!(!flag.load(Ordering::Acquire));
    assert_eq!(shared.completions.load(Ordering::Acquire), 1);
}

#[test]
fn test_unordered_payload_skips_gaps() {
    let shared = RecordingSketch::new(5, 1000);
    let flag = Arc::new(AtomicBool::new(false));
    let payload = CompactThetaSketch::new(vec![0, 42, 0, 7, 0], BIG_THETA, false);

    submit_now(&shared, &flag, Payload::Sketch(payload), 5);

    let mut inserted = shared.inserts();
    inserted.sort_unstable();
    assert_that!(inserted, eq(&vec![7u64, 42]));
    assert!(!flag.load(Ordering::Acquire));
}

#[test]
fn test_stale_epoch_aborts_without_merging() {
    // Task captured at epoch 5; the structure has since moved to epoch 6.
    let shared = RecordingSketch::new(6, 1000);
    let flag = Arc::new(AtomicBool::new(false));
    let payload = CompactThetaSketch::new(vec![10, 500], BIG_THETA, true);

    submit_now(&shared, &flag, Payload::Sketch(payload), 5);

    // Zero insertions, rights released, local flag left set by the task.
    assert!(shared.inserts().is_empty());
    assert!(flag.load(Ordering::Acquire), "abort must not clear the flag");
    assert!(!shared.gate.load(Ordering::Acquire), "rights must be released");
    assert_eq!(shared.completions.load(Ordering::Acquire), 1);
    assert_eq!(shared.flags_cleared.load(Ordering::Acquire), 0);
}

#[test]
fn test_single_hash_bypasses_hashing() {
    let shared = RecordingSketch::new(5, 1000);
    let flag = Arc::new(AtomicBool::new(false));

    submit_now(&shared, &flag, Payload::Single(777), 5);

    // The raw value goes straight in, exactly once.
    assert_that!(shared.inserts(), eq(&vec![777u64]));
    assert!(!flag.load(Ordering::Acquire));
    assert_eq!(shared.flags_cleared.load(Ordering::Acquire), 1);
}

#[test]
#[should_panic(expected = "below shared volatile theta")]
fn test_payload_theta_below_shared_theta_is_fatal() {
    let shared = RecordingSketch::new(5, 1000);
    let flag = Arc::new(AtomicBool::new(false));
    // A buffer can never legitimately claim a tighter theta than the shared
    // sketch it merges into.
    let payload = CompactThetaSketch::new(vec![10], 10, true);

    submit_now(&shared, &flag, Payload::Sketch(payload), 5);
}

#[test]
fn test_merges_are_mutually_exclusive() {
    let shared = RecordingSketch::new(1, BIG_THETA);
    let pool = PropagationPool::new(3);

    let mut flags = Vec::new();
    for writer in 0..16u64 {
        let entries: Vec<u64> = (1..=64u64).map(|i| writer * 1_000_000 + i).collect();
        let payload = CompactThetaSketch::new(entries, BIG_THETA, true);
        let flag = Arc::new(AtomicBool::new(true));
        submit_propagation(
            &pool,
            Arc::clone(&shared),
            Arc::clone(&flag),
            Payload::Sketch(payload),
            1,
        );
        flags.push(flag);
    }
    // Joining the pool guarantees all tasks have run.
    drop(pool);

    assert_eq!(shared.max_active.load(Ordering::Acquire), 1);
    assert_eq!(shared.completions.load(Ordering::Acquire), 16);
    assert_eq!(shared.inserts().len(), 16 * 64);
    for flag in &flags {
        assert!(!flag.load(Ordering::Acquire));
    }
}

#[test]
fn test_concurrent_writers_exact_count() {
    const WRITERS: u64 = 4;
    const PER_WRITER: u64 = 1500;

    let pool: Arc<dyn Scheduler> = Arc::new(PropagationPool::new(3));
    let shared = ConcurrentThetaSketch::builder()
        .lg_k(12)
        .buffer_capacity(32)
        .scheduler(Arc::clone(&pool))
        .build();

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let mut values: Vec<u64> =
                    (0..PER_WRITER).map(|i| writer * 1_000_000 + i).collect();
                values.shuffle(&mut rand::rng());
                let mut local = shared.local_buffer();
                for value in values {
                    local.update(value);
                }
                local.flush();
                local.await_propagation();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // 6000 distinct values keep the sketch exact at k = 4096 (no purge until
    // 7680 retained), so no update may be lost or duplicated.
    assert_eq!(shared.num_retained(), (WRITERS * PER_WRITER) as usize);
    assert_eq!(shared.estimate(), (WRITERS * PER_WRITER) as f64);
}

#[test]
fn test_concurrent_writers_estimation_mode() {
    const WRITERS: u64 = 8;
    const PER_WRITER: u64 = 25_000;
    const TOTAL: f64 = (WRITERS * PER_WRITER) as f64;

    let pool: Arc<dyn Scheduler> = Arc::new(PropagationPool::new(3));
    let shared = ConcurrentThetaSketch::builder()
        .lg_k(12)
        .scheduler(pool)
        .build();

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let mut local = shared.local_buffer();
                for i in 0..PER_WRITER {
                    local.update(writer * 10_000_000 + i);
                }
                local.flush();
                local.await_propagation();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(shared.theta() < 1.0);
    assert_that!(shared.estimate(), near(TOTAL, 0.15 * TOTAL));
}

#[test]
fn test_reset_discards_stale_buffer_contents() {
    let shared = ConcurrentThetaSketch::builder()
        .lg_k(5)
        .buffer_capacity(8)
        .exact_limit(0)
        .scheduler(Arc::new(CurrentThread))
        .build();
    let mut local = shared.local_buffer();

    for i in 0..8u64 {
        local.update(i);
    }
    // Capacity reached: the flush ran synchronously.
    assert_eq!(shared.estimate(), 8.0);

    shared.reset();
    assert_eq!(shared.epoch(), 1);
    assert_eq!(shared.estimate(), 0.0);

    // Values buffered after the reset are counted; nothing stale leaks in.
    for i in 100..108u64 {
        local.update(i);
    }
    assert_eq!(shared.estimate(), 8.0);
    assert_eq!(shared.num_retained(), 8);
}

#[test]
fn test_stale_task_against_real_sketch() {
    let shared = ConcurrentThetaSketch::builder()
        .lg_k(5)
        .scheduler(Arc::new(CurrentThread))
        .build();
    let sealed_epoch = shared.epoch();
    shared.reset();

    let flag = Arc::new(AtomicBool::new(true));
    submit_propagation(
        &CurrentThread,
        Arc::clone(&shared),
        Arc::clone(&flag),
        Payload::Single(12345),
        sealed_epoch,
    );

    assert_eq!(shared.num_retained(), 0);
    assert_eq!(shared.estimate(), 0.0);
    assert!(flag.load(Ordering::Acquire), "abort must not clear the flag");
}

#[test]
fn test_flush_after_reset_reuses_buffer() {
    let shared = ConcurrentThetaSketch::builder()
        .lg_k(5)
        .buffer_capacity(16)
        .exact_limit(0)
        .scheduler(Arc::new(CurrentThread))
        .build();
    let mut local = shared.local_buffer();

    for i in 0..5u64 {
        local.update(i);
    }
    assert_eq!(local.num_buffered(), 5);

    // The reset makes the buffered entries stale; the next interaction with
    // the buffer discards them and re-arms it.
    shared.reset();
    local.flush();
    assert_eq!(shared.estimate(), 0.0);

    for i in 0..10u64 {
        local.update(i);
    }
    local.flush();
    local.await_propagation();
    assert_eq!(shared.estimate(), 10.0);
}
