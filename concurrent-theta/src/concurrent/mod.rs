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

//! Concurrency layer: shared sketch, per-thread buffers, background propagation.
//!
//! # Overview
//!
//! Writer threads update [`LocalThetaBuffer`]s without synchronization. A full
//! buffer is sealed into a compact payload and submitted as a propagation task
//! to a bounded [`PropagationPool`]; the task merges the payload into the
//! [`ConcurrentThetaSketch`] under the sketch's propagation-rights gate, so at
//! most one merge mutates the retained set at any time. Readers call
//! [`ConcurrentThetaSketch::estimate`] at any point without blocking.
//!
//! Correctness across resets is handled with an epoch counter: a payload
//! sealed before a reset carries the old epoch and is silently discarded when
//! its task runs after the reset.
//!
//! The merge coordination contract lives in the [`SharedThetaSketch`] trait;
//! [`submit_propagation`] accepts any implementation of it.

mod buffer;
mod propagation;
mod scheduler;
mod shared;

pub use self::buffer::LocalThetaBuffer;
pub use self::propagation::Payload;
pub use self::propagation::submit_propagation;
pub use self::scheduler::CurrentThread;
pub use self::scheduler::DEFAULT_POOL_THREADS;
pub use self::scheduler::PropagationPool;
pub use self::scheduler::Scheduler;
pub use self::shared::ConcurrentThetaBuilder;
pub use self::shared::ConcurrentThetaSketch;
pub use self::shared::DEFAULT_BUFFER_CAPACITY;
pub use self::shared::SharedThetaSketch;
