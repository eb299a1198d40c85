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

//! Background propagation of local buffers into the shared sketch.
//!
//! A propagation task carries one sealed payload from a writer's local buffer
//! to the shared sketch and merges it under the sketch's propagation-rights
//! gate. Tasks are created per merge request, immutable after construction,
//! and consumed exactly once by whichever scheduler thread runs them.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::trace;

use crate::concurrent::scheduler::Scheduler;
use crate::concurrent::shared::SharedThetaSketch;
use crate::theta::CompactThetaSketch;

/// What a propagation task merges into the shared sketch.
///
/// Either a single pre-computed hash (the exact-mode fast path) or a compact
/// partial sketch sealed from a full local buffer. Exactly one form per task.
#[derive(Debug, Clone)]
pub enum Payload {
    /// One already hashed value, inserted through the raw backdoor.
    Single(u64),
    /// A sealed partial sketch. Ordered caches allow early termination at the
    /// shared theta; unordered caches are scanned in full, skipping gaps.
    Sketch(CompactThetaSketch),
}

/// One unit of background merge work.
pub(crate) struct PropagationTask<S: SharedThetaSketch + ?Sized> {
    shared: Arc<S>,
    /// Owned by the originating local buffer; cleared on completion to signal
    /// the buffer that it may submit again.
    local_flag: Arc<AtomicBool>,
    payload: Payload,
    /// Epoch observed when the payload was sealed. The merge applies only if
    /// it still matches the shared epoch at execution time.
    epoch: u64,
}

impl<S: SharedThetaSketch + ?Sized> PropagationTask<S> {
    pub(crate) fn new(
        shared: Arc<S>,
        local_flag: Arc<AtomicBool>,
        payload: Payload,
        epoch: u64,
    ) -> Self {
        Self {
            shared,
            local_flag,
            payload,
            epoch,
        }
    }

    /// Propagation protocol:
    /// 1) acquire propagation rights: no other thread can mutate the shared
    ///    sketch until they are released
    /// 2) validate the captured epoch, otherwise abort without merging; the
    ///    local flag is left set on this path and is re-armed by its owning
    ///    buffer when it observes the new epoch
    /// 3) merge the payload: a single hash through the raw backdoor, or a
    ///    partial sketch entry by entry
    /// 4) release propagation rights and clear the local flag
    pub(crate) fn run(self) {
        self.shared.start_propagation();

        if !self.shared.validate_epoch(self.epoch) {
            trace!(epoch = self.epoch, "stale epoch, aborting propagation");
            self.shared.end_propagation(None);
            return;
        }

        match &self.payload {
            Payload::Single(hash) => {
                self.shared.update_single(*hash);
            }
            Payload::Sketch(sketch) => {
                let volatile_theta = self.shared.volatile_theta();
                assert!(
                    sketch.theta64() >= volatile_theta,
                    "payload theta {} below shared volatile theta {volatile_theta}",
                    sketch.theta64(),
                );
                if sketch.is_ordered() {
                    // Sorted ascending: everything at or past theta is
                    // excluded, so stop at the first such entry.
                    for &hash in sketch.cache() {
                        if hash >= volatile_theta {
                            break;
                        }
                        self.shared.update_single(hash);
                    }
                } else {
                    // Unsorted raw cache: zero entries are gaps.
                    for &hash in sketch.cache() {
                        if hash > 0 {
                            self.shared.update_single(hash);
                        }
                    }
                }
            }
        }

        self.shared.end_propagation(Some(&self.local_flag));
    }
}

/// Construct a propagation task and hand it to the scheduler.
///
/// Never blocks on the merge itself. The caller must have set `local_flag`
/// before calling and must not reuse the flag for another submission until it
/// has been cleared.
pub fn submit_propagation<S: SharedThetaSketch + 'static>(
    scheduler: &dyn Scheduler,
    shared: Arc<S>,
    local_flag: Arc<AtomicBool>,
    payload: Payload,
    epoch: u64,
) {
    let task = PropagationTask::new(shared, local_flag, payload, epoch);
    scheduler.spawn(Box::new(move || task.run()));
}
