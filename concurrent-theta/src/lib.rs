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

//! Concurrent theta sketch for multi-threaded cardinality estimation.
//!
//! A theta sketch estimates the number of distinct items in a stream by retaining
//! only hashes below a sampling threshold (theta). This crate adds a concurrency
//! layer on top of the classic single-threaded sketch: many writer threads update
//! cheap thread-local buffers, and full buffers are merged into one shared sketch
//! by a small pool of background propagation threads. Writers never contend on the
//! shared sketch directly, and readers obtain estimates without taking any lock.
//!
//! # Architecture
//!
//! - [`theta::ThetaSketch`]: the single-threaded sketch, also usable on its own.
//! - [`concurrent::ConcurrentThetaSketch`]: the shared sketch. Owns the mutual
//!   exclusion gate that serializes merges, the epoch counter that invalidates
//!   merges across a reset, and the lock-free published theta and estimate.
//! - [`concurrent::LocalThetaBuffer`]: a per-writer-thread buffer. Fills locally
//!   and hands its contents to the propagation pool when full.
//! - [`concurrent::PropagationPool`]: a bounded pool of background threads that
//!   executes merges. One pool can (and normally should) be shared by every
//!   concurrent sketch in the process.
//!
//! # Example
//!
//! ```
//! # use concurrent_theta::concurrent::ConcurrentThetaSketch;
//! let shared = ConcurrentThetaSketch::builder().build();
//! let mut local = shared.local_buffer();
//! for i in 0..1000 {
//!     local.update(i);
//! }
//! local.flush();
//! local.await_propagation();
//! assert_eq!(shared.estimate(), 1000.0);
//! ```

pub mod concurrent;
mod hash;
pub mod theta;

/// Hash table growth factor used when a sketch resizes toward its target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeFactor {
    /// No intermediate sizes; the table starts at its final size.
    X1,
    /// Double the table on each resize.
    X2,
    /// Quadruple the table on each resize.
    X4,
    /// Grow the table eightfold on each resize.
    X8,
}

impl ResizeFactor {
    /// Log base 2 of the growth multiple.
    pub(crate) fn lg(self) -> u8 {
        match self {
            ResizeFactor::X1 => 0,
            ResizeFactor::X2 => 1,
            ResizeFactor::X4 => 2,
            ResizeFactor::X8 => 3,
        }
    }
}
