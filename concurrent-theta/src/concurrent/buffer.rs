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

//! Per-writer-thread buffer feeding the shared sketch.
//!
//! A writer updates its local buffer without synchronization. Hashes at or
//! above the shared theta are dropped immediately; the rest accumulate in a
//! small local sketch until the buffer reaches capacity and its contents are
//! sealed into an ordered compact sketch and handed to background propagation.
//! While the shared sketch is still exact, hashes are propagated one by one
//! instead so that early estimates stay exact.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;

use tracing::trace;

use crate::ResizeFactor;
use crate::concurrent::propagation::Payload;
use crate::concurrent::shared::ConcurrentThetaSketch;
use crate::concurrent::shared::SharedThetaSketch;
use crate::theta::ThetaSketch;
use crate::theta::hash_table::MIN_LG_K;

/// Thread-local staging buffer for one writer.
///
/// Exactly one flush may be in flight per buffer: the in-progress flag is set
/// when a flush is submitted and cleared by the propagation task when the
/// merge completes. The buffer never blocks on the merge at submission; it
/// waits for the previous flush only when it needs to submit the next one.
#[derive(Debug)]
pub struct LocalThetaBuffer {
    shared: Arc<ConcurrentThetaSketch>,
    sketch: ThetaSketch,
    /// Set by this buffer at submission, cleared by the propagation task on
    /// completion. Never written by two tasks concurrently.
    in_progress: Arc<AtomicBool>,
    capacity: usize,
    /// Shared epoch this buffer last observed. A mismatch means a reset
    /// happened; buffered and in-flight contents are stale.
    epoch: u64,
}

impl LocalThetaBuffer {
    pub(crate) fn new(shared: Arc<ConcurrentThetaSketch>, capacity: usize) -> Self {
        // Size the local table so it never purges below capacity entries.
        let lg_k = (capacity.next_power_of_two().trailing_zeros() as u8).max(MIN_LG_K);
        let sketch = ThetaSketch::builder()
            .lg_k(lg_k)
            .resize_factor(ResizeFactor::X2)
            .seed(shared.seed())
            .build();
        let epoch = shared.epoch();
        Self {
            shared,
            sketch,
            in_progress: Arc::new(AtomicBool::new(false)),
            capacity,
            epoch,
        }
    }

    /// Update the buffer with a hashable value.
    ///
    /// May trigger a propagation of the buffer contents (or of the single
    /// hash, in exact mode); never waits for that propagation to finish.
    pub fn update<T: Hash>(&mut self, value: T) {
        self.sync_epoch();
        let hash = self.sketch.table().hash_and_screen(value);
        if hash == 0 || hash >= self.shared.volatile_theta() {
            return;
        }
        if self.shared.exact_mode() {
            self.propagate_single(hash);
            return;
        }
        self.sketch.table_mut().try_insert(hash);
        if self.sketch.num_retained() >= self.capacity {
            self.propagate_buffer();
        }
    }

    /// Propagate a partially filled buffer without waiting for capacity.
    pub fn flush(&mut self) {
        self.sync_epoch();
        if self.sketch.num_retained() == 0 {
            return;
        }
        self.propagate_buffer();
    }

    /// Wait until no flush from this buffer is in flight.
    ///
    /// The happens-before edge on the cleared flag makes every update of the
    /// completed flush visible in the shared sketch afterwards. Returns early
    /// when a reset intervenes: the aborted task will never clear the flag,
    /// and the next buffer operation re-arms it instead.
    pub fn await_propagation(&self) {
        while self.in_progress.load(Ordering::Acquire) {
            if self.shared.epoch() != self.epoch {
                return;
            }
            thread::yield_now();
        }
    }

    /// Number of entries currently staged locally.
    pub fn num_buffered(&self) -> usize {
        self.sketch.num_retained()
    }

    fn propagate_buffer(&mut self) {
        self.await_propagation();
        let payload = self.sketch.compact(true);
        self.sketch.reset();
        self.in_progress.store(true, Ordering::Release);
        self.shared
            .propagate(&self.in_progress, Payload::Sketch(payload), self.epoch);
    }

    fn propagate_single(&mut self, hash: u64) {
        self.await_propagation();
        self.in_progress.store(true, Ordering::Release);
        self.shared
            .propagate(&self.in_progress, Payload::Single(hash), self.epoch);
    }

    /// Re-arm the buffer after a shared reset.
    ///
    /// A propagation aborted on epoch mismatch leaves the in-progress flag
    /// set; the owning thread clears it here, together with any staged
    /// entries collected under the old epoch.
    fn sync_epoch(&mut self) {
        let current = self.shared.epoch();
        if current != self.epoch {
            trace!(old = self.epoch, new = current, "buffer re-armed after reset");
            self.epoch = current;
            self.in_progress.store(false, Ordering::Release);
            self.sketch.reset();
        }
    }
}
