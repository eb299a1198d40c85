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

//! Scheduling of background propagation work.
//!
//! Propagation is decoupled from writer threads: a writer seals its buffer,
//! submits the merge, and returns to updating. The pool that runs merges is
//! bounded and sized independently of the number of writers or sketches;
//! a single pool instance is meant to be shared by every concurrent sketch in
//! the process, injected at sketch construction. Tests substitute
//! [`CurrentThread`] to make propagation synchronous and deterministic.

use std::thread;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tracing::debug;

/// Default number of pool threads serving all propagation work in a process.
pub const DEFAULT_POOL_THREADS: usize = 3;

type Job = Box<dyn FnOnce() + Send>;

/// Executes submitted propagation jobs.
///
/// Submission must never block the submitting thread on the job itself; jobs
/// may run on any thread and may be reordered relative to submission order.
pub trait Scheduler: Send + Sync {
    /// Hand a job to the scheduler. Fire-and-forget.
    fn spawn(&self, job: Box<dyn FnOnce() + Send>);
}

/// Fixed-size pool of background propagation threads.
///
/// Dropping the pool disconnects the queue and joins the workers; jobs already
/// submitted are still drained, so a submitted merge never holds propagation
/// rights forever.
#[derive(Debug)]
pub struct PropagationPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl PropagationPool {
    /// Spawn a pool with the given number of worker threads.
    ///
    /// # Panics
    ///
    /// If `num_threads` is zero.
    pub fn new(num_threads: usize) -> Self {
        assert!(num_threads > 0, "pool requires at least one thread");
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..num_threads)
            .map(|index| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("theta-propagation-{index}"))
                    .spawn(move || {
                        debug!("propagation worker started");
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                        debug!("propagation worker stopped");
                    })
                    .expect("failed to spawn propagation worker thread")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
        }
    }
}

impl Default for PropagationPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_THREADS)
    }
}

impl Scheduler for PropagationPool {
    fn spawn(&self, job: Box<dyn FnOnce() + Send>) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(job).is_err() {
            debug!("propagation pool already shut down, dropping job");
        }
    }
}

impl Drop for PropagationPool {
    fn drop(&mut self) {
        // Disconnect the queue; workers drain what is left and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                debug!("propagation worker panicked during shutdown");
            }
        }
    }
}

/// Runs every job synchronously on the submitting thread.
///
/// Intended for tests that need deterministic interleaving of the propagation
/// protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentThread;

impl Scheduler for CurrentThread {
    fn spawn(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    #[test]
    fn test_pool_runs_all_jobs_before_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = PropagationPool::new(3);
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.spawn(Box::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }));
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_current_thread_is_synchronous() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = CurrentThread;
        let cloned = Arc::clone(&counter);
        scheduler.spawn(Box::new(move || {
            cloned.fetch_add(1, Ordering::Relaxed);
        }));
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    #[should_panic(expected = "at least one thread")]
    fn test_zero_threads_rejected() {
        let _pool = PropagationPool::new(0);
    }
}
