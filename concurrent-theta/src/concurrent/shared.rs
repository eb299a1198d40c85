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

//! The shared sketch and the coordination contract it exposes to propagation.

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;

use parking_lot::Mutex;
use tracing::debug;

use crate::ResizeFactor;
use crate::concurrent::buffer::LocalThetaBuffer;
use crate::concurrent::propagation::Payload;
use crate::concurrent::propagation::submit_propagation;
use crate::concurrent::scheduler::PropagationPool;
use crate::concurrent::scheduler::Scheduler;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::theta::hash_table::DEFAULT_LG_K;
use crate::theta::hash_table::MAX_LG_K;
use crate::theta::hash_table::MAX_THETA;
use crate::theta::hash_table::MIN_LG_K;
use crate::theta::hash_table::ThetaHashTable;

/// Default number of local updates a writer buffers between propagations.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;

/// Coordination contract a shared sketch offers to background propagation.
///
/// The contract establishes three guarantees the merge protocol relies on:
/// mutual exclusion (at most one holder of propagation rights mutates the
/// retained set), epoch validation (a merge sealed before a reset must not
/// apply after it), and a lock-free theta snapshot that is never torn.
pub trait SharedThetaSketch: Send + Sync {
    /// Blocks the caller until it is the sole holder of propagation rights.
    fn start_propagation(&self);

    /// Whether `epoch` is still the current epoch.
    ///
    /// Only meaningful while holding propagation rights: the epoch is advanced
    /// exclusively by operations that themselves hold the rights.
    fn validate_epoch(&self, epoch: u64) -> bool;

    /// Raw insertion of an already computed hash, bypassing the hash function.
    ///
    /// Must only be called while holding propagation rights.
    fn update_single(&self, hash: u64);

    /// Lock-free read of the current theta. May be momentarily stale while a
    /// merge is in flight, never torn.
    fn volatile_theta(&self) -> u64;

    /// Releases propagation rights. When `local_flag` is supplied it is
    /// cleared as part of the release, signaling the originating buffer that
    /// its flush has been fully applied.
    fn end_propagation(&self, local_flag: Option<&AtomicBool>);
}

/// Shared theta sketch absorbing buffered updates from many writer threads.
///
/// All mutation funnels through the propagation-rights gate; estimates and
/// theta are published to atomics at the end of every propagation so readers
/// never block. Created through [`ConcurrentThetaSketch::builder`], handed
/// around as an `Arc`.
pub struct ConcurrentThetaSketch {
    table: Mutex<ThetaHashTable>,
    /// Propagation-in-progress gate. A binary flag, not a queue.
    gate: AtomicBool,
    /// Advanced once per reset, only while holding propagation rights.
    epoch: AtomicU64,
    published_theta: AtomicU64,
    /// Estimate bits (f64), published at the end of each propagation.
    published_estimate: AtomicU64,
    published_retained: AtomicUsize,
    exact_limit: usize,
    buffer_capacity: usize,
    scheduler: Arc<dyn Scheduler>,
    /// Self-reference so propagation tasks can hold the sketch alive; set by
    /// `Arc::new_cyclic` at construction.
    me: Weak<ConcurrentThetaSketch>,
}

impl ConcurrentThetaSketch {
    /// Create a new builder for ConcurrentThetaSketch
    pub fn builder() -> ConcurrentThetaBuilder {
        ConcurrentThetaBuilder::default()
    }

    /// Create a local buffer bound to this shared sketch.
    ///
    /// One buffer per writer thread; the buffer is `Send` and moves to its
    /// writer.
    pub fn local_buffer(&self) -> LocalThetaBuffer {
        LocalThetaBuffer::new(self.strong(), self.buffer_capacity)
    }

    /// Lock-free cardinality estimate, as published by the latest completed
    /// propagation.
    pub fn estimate(&self) -> f64 {
        f64::from_bits(self.published_estimate.load(Ordering::Acquire))
    }

    /// Theta as a fraction (0.0 to 1.0), from the published snapshot.
    pub fn theta(&self) -> f64 {
        self.volatile_theta() as f64 / MAX_THETA as f64
    }

    /// Number of retained entries, as of the latest completed propagation.
    pub fn num_retained(&self) -> usize {
        self.published_retained.load(Ordering::Acquire)
    }

    /// Current epoch. Captured by local buffers when sealing a flush.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Hash seed shared with local buffers.
    pub fn seed(&self) -> u64 {
        self.table.lock().seed()
    }

    /// Whether the sketch is still exact (theta at maximum and the retained
    /// set small). In exact mode local buffers propagate single hashes
    /// directly instead of batching.
    pub fn exact_mode(&self) -> bool {
        self.volatile_theta() == MAX_THETA && self.num_retained() < self.exact_limit
    }

    /// Construct a propagation task for `payload` and submit it to the
    /// scheduler. Fire-and-forget; the caller must have set `local_flag`
    /// before submitting and must not submit again until it clears.
    pub fn propagate(&self, local_flag: &Arc<AtomicBool>, payload: Payload, epoch: u64) {
        submit_propagation(
            self.scheduler.as_ref(),
            self.strong(),
            Arc::clone(local_flag),
            payload,
            epoch,
        );
    }

    /// Reset the sketch to empty state and advance the epoch.
    ///
    /// Takes propagation rights first, so a reset is totally ordered with
    /// merges; any merge sealed under the old epoch aborts when it runs.
    pub fn reset(&self) {
        self.start_propagation();
        self.table.lock().reset();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        debug!(epoch = self.epoch(), "shared sketch reset");
        self.end_propagation(None);
    }

    fn strong(&self) -> Arc<Self> {
        // The weak self-reference only dangles inside `new_cyclic`, before
        // any caller can hold the sketch.
        self.me.upgrade().expect("sketch self-reference dangling")
    }

    fn publish(&self, table: &ThetaHashTable) {
        self.published_theta.store(table.theta(), Ordering::Release);
        self.published_retained
            .store(table.num_entries(), Ordering::Release);
        let estimate = if table.is_empty() {
            0.0
        } else {
            table.num_entries() as f64 / (table.theta() as f64 / MAX_THETA as f64)
        };
        self.published_estimate
            .store(estimate.to_bits(), Ordering::Release);
    }
}

impl SharedThetaSketch for ConcurrentThetaSketch {
    fn start_propagation(&self) {
        while self
            .gate
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            thread::yield_now();
        }
    }

    fn validate_epoch(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    fn update_single(&self, hash: u64) {
        self.table.lock().try_insert(hash);
    }

    fn volatile_theta(&self) -> u64 {
        self.published_theta.load(Ordering::Acquire)
    }

    fn end_propagation(&self, local_flag: Option<&AtomicBool>) {
        self.publish(&self.table.lock());
        self.gate.store(false, Ordering::Release);
        if let Some(flag) = local_flag {
            flag.store(false, Ordering::Release);
        }
    }
}

impl fmt::Debug for ConcurrentThetaSketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentThetaSketch")
            .field("epoch", &self.epoch())
            .field("theta", &self.theta())
            .field("num_retained", &self.num_retained())
            .field("estimate", &self.estimate())
            .finish_non_exhaustive()
    }
}

/// Builder for ConcurrentThetaSketch
pub struct ConcurrentThetaBuilder {
    lg_k: u8,
    seed: u64,
    buffer_capacity: usize,
    exact_limit: Option<usize>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl Default for ConcurrentThetaBuilder {
    fn default() -> Self {
        Self {
            lg_k: DEFAULT_LG_K,
            seed: DEFAULT_UPDATE_SEED,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            exact_limit: None,
            scheduler: None,
        }
    }
}

impl ConcurrentThetaBuilder {
    /// Set lg_k (log2 of nominal size k).
    ///
    /// # Panics
    ///
    /// If lg_k is not in range [5, 26]
    pub fn lg_k(mut self, lg_k: u8) -> Self {
        assert!(
            (MIN_LG_K..=MAX_LG_K).contains(&lg_k),
            "lg_k must be in [{}, {}], got {}",
            MIN_LG_K,
            MAX_LG_K,
            lg_k
        );
        self.lg_k = lg_k;
        self
    }

    /// Set hash seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set how many updates each local buffer accumulates before it
    /// propagates.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer capacity must be positive");
        self.buffer_capacity = capacity;
        self
    }

    /// Set the retained-set size below which writers bypass their buffers and
    /// propagate single hashes. Defaults to k/2.
    pub fn exact_limit(mut self, limit: usize) -> Self {
        self.exact_limit = Some(limit);
        self
    }

    /// Inject the scheduler that runs propagation tasks.
    ///
    /// One [`PropagationPool`] is meant to be shared across every concurrent
    /// sketch in the process; when no scheduler is supplied the sketch owns a
    /// private default pool.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Build the ConcurrentThetaSketch.
    pub fn build(self) -> Arc<ConcurrentThetaSketch> {
        let table = ThetaHashTable::new(self.lg_k, ResizeFactor::X8, 1.0, self.seed);
        let exact_limit = self.exact_limit.unwrap_or(1usize << (self.lg_k - 1));
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(PropagationPool::default()));
        let theta = table.theta();
        Arc::new_cyclic(|me| ConcurrentThetaSketch {
            table: Mutex::new(table),
            gate: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            published_theta: AtomicU64::new(theta),
            published_estimate: AtomicU64::new(0.0f64.to_bits()),
            published_retained: AtomicUsize::new(0),
            exact_limit,
            buffer_capacity: self.buffer_capacity,
            scheduler,
            me: me.clone(),
        })
    }
}

impl fmt::Debug for ConcurrentThetaBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentThetaBuilder")
            .field("lg_k", &self.lg_k)
            .field("seed", &self.seed)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("exact_limit", &self.exact_limit)
            .finish_non_exhaustive()
    }
}
