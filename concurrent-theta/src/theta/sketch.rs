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

//! Theta sketch implementation
//!
//! This module provides ThetaSketch (mutable) and CompactThetaSketch (immutable)
//! for cardinality estimation.

use std::hash::Hash;

use crate::ResizeFactor;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::theta::hash_table::DEFAULT_LG_K;
use crate::theta::hash_table::MAX_LG_K;
use crate::theta::hash_table::MAX_THETA;
use crate::theta::hash_table::MIN_LG_K;
use crate::theta::hash_table::ThetaHashTable;

/// Mutable theta sketch for building from input data
#[derive(Debug)]
pub struct ThetaSketch {
    table: ThetaHashTable,
}

impl ThetaSketch {
    /// Create a new builder for ThetaSketch
    pub fn builder() -> ThetaSketchBuilder {
        ThetaSketchBuilder::default()
    }

    /// Update the sketch with a hashable value
    pub fn update<T: Hash>(&mut self, value: T) {
        let hash = self.table.hash_and_screen(value);
        if hash != 0 {
            self.table.try_insert(hash);
        }
    }

    /// Return cardinality estimate
    pub fn estimate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let num_retained = self.table.num_entries() as f64;
        let theta = self.table.theta() as f64 / MAX_THETA as f64;
        num_retained / theta
    }

    /// Return theta as a fraction (0.0 to 1.0)
    pub fn theta(&self) -> f64 {
        self.table.theta() as f64 / MAX_THETA as f64
    }

    /// Return theta as u64
    pub fn theta64(&self) -> u64 {
        self.table.theta()
    }

    /// Check if sketch is empty
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Check if sketch is in estimation mode
    pub fn is_estimation_mode(&self) -> bool {
        self.table.theta() < MAX_THETA
    }

    /// Return number of retained entries
    pub fn num_retained(&self) -> usize {
        self.table.num_entries()
    }

    /// Return lg_k
    pub fn lg_k(&self) -> u8 {
        self.table.lg_nom_size()
    }

    /// Trim the sketch to nominal size k
    pub fn trim(&mut self) {
        self.table.trim();
    }

    /// Reset the sketch to empty state
    pub fn reset(&mut self) {
        self.table.reset();
    }

    /// Return iterator over hash values
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.table.iter()
    }

    /// Produce an immutable snapshot of the retained entries.
    ///
    /// With `ordered = true` the entry cache is compacted and sorted ascending,
    /// which allows merge consumers to stop early at their theta. With
    /// `ordered = false` the raw slot array is copied as-is, including zero
    /// gaps.
    pub fn compact(&self, ordered: bool) -> CompactThetaSketch {
        let entries = if ordered {
            let mut entries: Vec<u64> = self.table.iter().collect();
            entries.sort_unstable();
            entries
        } else {
            self.table.raw_entries().to_vec()
        };
        CompactThetaSketch {
            entries,
            theta: self.table.theta(),
            ordered,
        }
    }

    pub(crate) fn table(&self) -> &ThetaHashTable {
        &self.table
    }

    pub(crate) fn table_mut(&mut self) -> &mut ThetaHashTable {
        &mut self.table
    }
}

/// Immutable compact snapshot of a theta sketch.
///
/// This is the payload form handed to background propagation: an entry cache,
/// the theta the entries were collected under, and whether the cache is
/// ordered. Unordered caches may contain zero-valued gaps.
#[derive(Debug, Clone)]
pub struct CompactThetaSketch {
    entries: Vec<u64>,
    theta: u64,
    ordered: bool,
}

impl CompactThetaSketch {
    /// Build a compact sketch from raw parts.
    ///
    /// # Panics
    ///
    /// Panics if `theta` is zero. In debug builds, also panics if `ordered`
    /// is claimed for a cache that is not sorted ascending or contains gaps.
    pub fn new(entries: Vec<u64>, theta: u64, ordered: bool) -> Self {
        assert!(theta > 0, "theta must be positive");
        debug_assert!(
            !ordered
                || (entries.first() != Some(&0)
                    && entries.windows(2).all(|pair| pair[0] < pair[1])),
            "ordered cache must be sorted ascending without gaps",
        );
        Self {
            entries,
            theta,
            ordered,
        }
    }

    /// Return theta as u64
    pub fn theta64(&self) -> u64 {
        self.theta
    }

    /// Entry cache. Ordered and gap-free when [`is_ordered`](Self::is_ordered)
    /// is true; may contain zero gaps otherwise.
    pub fn cache(&self) -> &[u64] {
        &self.entries
    }

    /// Whether the entry cache is sorted ascending and compacted
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Return number of retained entries
    pub fn num_retained(&self) -> usize {
        if self.ordered {
            self.entries.len()
        } else {
            self.entries.iter().filter(|&&entry| entry != 0).count()
        }
    }

    /// Return cardinality estimate
    pub fn estimate(&self) -> f64 {
        let num_retained = self.num_retained();
        if num_retained == 0 {
            return 0.0;
        }
        let theta = self.theta as f64 / MAX_THETA as f64;
        num_retained as f64 / theta
    }
}

/// Builder for ThetaSketch
#[derive(Debug)]
pub struct ThetaSketchBuilder {
    lg_k: u8,
    resize_factor: ResizeFactor,
    sampling_probability: f32,
    seed: u64,
}

impl Default for ThetaSketchBuilder {
    fn default() -> Self {
        Self {
            lg_k: DEFAULT_LG_K,
            resize_factor: ResizeFactor::X8,
            sampling_probability: 1.0,
            seed: DEFAULT_UPDATE_SEED,
        }
    }
}

impl ThetaSketchBuilder {
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

    /// Set resize factor.
    pub fn resize_factor(mut self, factor: ResizeFactor) -> Self {
        self.resize_factor = factor;
        self
    }

    /// Set sampling probability p.
    ///
    /// # Panics
    ///
    /// If p is not in range [0.0, 1.0]
    pub fn sampling_probability(mut self, probability: f32) -> Self {
        assert!(
            (0.0..=1.0).contains(&probability),
            "p must be in [0.0, 1.0], got {probability}"
        );
        self.sampling_probability = probability;
        self
    }

    /// Set hash seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Build the ThetaSketch.
    pub fn build(self) -> ThetaSketch {
        let table = ThetaHashTable::new(
            self.lg_k,
            self.resize_factor,
            self.sampling_probability,
            self.seed,
        );

        ThetaSketch { table }
    }
}
