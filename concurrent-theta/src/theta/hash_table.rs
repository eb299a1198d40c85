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

//! Open-addressed hash table of retained theta entries.
//!
//! Entries are 63-bit hashes in `[1, 2^63)`; slot value 0 means empty. The
//! table grows by the configured resize factor up to twice the nominal size
//! `k`, after which it purges down to the `k` smallest entries and lowers
//! theta to the `(k+1)`-th smallest value (quickselect rebuild).

use std::hash::Hash;
use std::hash::Hasher;

use crate::ResizeFactor;
use crate::hash::MurmurHash3;

pub(crate) const MIN_LG_K: u8 = 5;
pub(crate) const MAX_LG_K: u8 = 26;
pub(crate) const DEFAULT_LG_K: u8 = 12;
/// Largest theta; hashes occupy `[1, MAX_THETA)`.
pub(crate) const MAX_THETA: u64 = i64::MAX as u64;

const MIN_LG_ARR_SIZE: u8 = 5;
const REBUILD_NUMERATOR: usize = 15;
const REBUILD_DENOMINATOR: usize = 16;
const STRIDE_HASH_BITS: u32 = 7;
const STRIDE_MASK: u64 = (1 << STRIDE_HASH_BITS) - 1;

#[derive(Debug, Clone)]
pub(crate) struct ThetaHashTable {
    lg_cur_size: u8,
    lg_nom_size: u8,
    resize_factor: ResizeFactor,
    sampling_probability: f32,
    seed: u64,
    theta: u64,
    num_entries: usize,
    empty: bool,
    entries: Vec<u64>,
}

impl ThetaHashTable {
    pub(crate) fn new(
        lg_nom_size: u8,
        resize_factor: ResizeFactor,
        sampling_probability: f32,
        seed: u64,
    ) -> Self {
        let lg_cur_size =
            starting_sub_multiple(lg_nom_size + 1, resize_factor.lg(), MIN_LG_ARR_SIZE);
        Self {
            lg_cur_size,
            lg_nom_size,
            resize_factor,
            sampling_probability,
            seed,
            theta: initial_theta(sampling_probability),
            num_entries: 0,
            empty: true,
            entries: vec![0; 1 << lg_cur_size],
        }
    }

    /// Hashes a value with the table seed and screens it against theta.
    ///
    /// Returns 0 when the value hashes at or above theta (or to the reserved
    /// empty-slot value) and must be dropped.
    pub(crate) fn hash_and_screen<T: Hash>(&self, value: T) -> u64 {
        let mut hasher = MurmurHash3::with_seed(self.seed);
        value.hash(&mut hasher);
        // Top 64 bits of the 128-bit digest, shifted into [0, 2^63).
        let hash = hasher.finish() >> 1;
        if hash != 0 && hash < self.theta { hash } else { 0 }
    }

    /// Inserts an already screened hash. Returns false for duplicates and for
    /// hashes at or above the current theta.
    pub(crate) fn try_insert(&mut self, hash: u64) -> bool {
        if hash == 0 || hash >= self.theta {
            return false;
        }
        self.empty = false;
        if !probe_insert(&mut self.entries, self.lg_cur_size, hash) {
            return false;
        }
        self.num_entries += 1;
        if self.num_entries > self.rebuild_threshold() {
            if self.lg_cur_size <= self.lg_nom_size {
                self.resize();
            } else {
                self.purge();
            }
        }
        true
    }

    pub(crate) fn theta(&self) -> u64 {
        self.theta
    }

    pub(crate) fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.empty
    }

    pub(crate) fn lg_nom_size(&self) -> u8 {
        self.lg_nom_size
    }

    pub(crate) fn seed(&self) -> u64 {
        self.seed
    }

    /// Raw slot array, including empty (zero) gaps.
    pub(crate) fn raw_entries(&self) -> &[u64] {
        &self.entries
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().copied().filter(|&entry| entry != 0)
    }

    /// Purges down to at most `k` retained entries.
    pub(crate) fn trim(&mut self) {
        if self.num_entries > (1 << self.lg_nom_size) {
            self.purge();
        }
    }

    /// Restores the freshly built state. Theta returns to its initial value.
    pub(crate) fn reset(&mut self) {
        let lg_cur_size =
            starting_sub_multiple(self.lg_nom_size + 1, self.resize_factor.lg(), MIN_LG_ARR_SIZE);
        self.lg_cur_size = lg_cur_size;
        self.theta = initial_theta(self.sampling_probability);
        self.num_entries = 0;
        self.empty = true;
        self.entries.clear();
        self.entries.resize(1 << lg_cur_size, 0);
    }

    fn rebuild_threshold(&self) -> usize {
        (REBUILD_NUMERATOR * (1usize << self.lg_cur_size)) / REBUILD_DENOMINATOR
    }

    fn resize(&mut self) {
        let lg_new = (self.lg_cur_size + self.resize_factor.lg().max(1)).min(self.lg_nom_size + 1);
        let mut new_entries = vec![0u64; 1 << lg_new];
        for &entry in self.entries.iter().filter(|&&entry| entry != 0) {
            probe_insert(&mut new_entries, lg_new, entry);
        }
        self.lg_cur_size = lg_new;
        self.entries = new_entries;
    }

    /// Quickselect rebuild: keep the `k` smallest entries, lower theta to the
    /// `(k+1)`-th smallest. Only reachable once the table is at full size and
    /// holds more than `k` entries.
    fn purge(&mut self) {
        let nominal = 1usize << self.lg_nom_size;
        let mut values: Vec<u64> = self.iter().collect();
        let (kept, pivot, _) = values.select_nth_unstable(nominal);
        self.theta = *pivot;
        let mut new_entries = vec![0u64; 1 << self.lg_cur_size];
        for &entry in kept.iter() {
            probe_insert(&mut new_entries, self.lg_cur_size, entry);
        }
        self.num_entries = nominal;
        self.entries = new_entries;
    }
}

/// Inserts into the slot array with stride probing. Returns false on duplicate.
fn probe_insert(entries: &mut [u64], lg_size: u8, hash: u64) -> bool {
    let mask = (1u64 << lg_size) - 1;
    let stride = (2 * ((hash >> lg_size) & STRIDE_MASK)) + 1;
    let mut index = (hash & mask) as usize;
    loop {
        let entry = entries[index];
        if entry == 0 {
            entries[index] = hash;
            return true;
        }
        if entry == hash {
            return false;
        }
        index = ((index as u64 + stride) & mask) as usize;
    }
}

fn initial_theta(sampling_probability: f32) -> u64 {
    if sampling_probability >= 1.0 {
        MAX_THETA
    } else {
        (sampling_probability as f64 * MAX_THETA as f64) as u64
    }
}

fn starting_sub_multiple(lg_target: u8, lg_resize: u8, lg_min: u8) -> u8 {
    if lg_target <= lg_min {
        lg_min
    } else if lg_resize == 0 {
        lg_target
    } else {
        ((lg_target - lg_min) % lg_resize) + lg_min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::DEFAULT_UPDATE_SEED;

    fn table(lg_k: u8) -> ThetaHashTable {
        ThetaHashTable::new(lg_k, ResizeFactor::X2, 1.0, DEFAULT_UPDATE_SEED)
    }

    #[test]
    fn test_insert_and_duplicates() {
        let mut table = table(5);
        assert!(table.is_empty());
        assert!(table.try_insert(17));
        assert!(!table.try_insert(17));
        assert!(table.try_insert(99));
        assert_eq!(table.num_entries(), 2);
        assert!(!table.is_empty());
    }

    #[test]
    fn test_rejects_zero_and_over_theta() {
        let mut table = table(5);
        assert!(!table.try_insert(0));
        assert!(!table.try_insert(MAX_THETA));
        assert_eq!(table.num_entries(), 0);
    }

    #[test]
    fn test_hash_and_screen_domain() {
        let table = table(5);
        for i in 0..1000u64 {
            let hash = table.hash_and_screen(i);
            assert!(hash < MAX_THETA);
        }
    }

    #[test]
    fn test_resize_preserves_entries() {
        let mut table = table(8);
        let hashes: Vec<u64> = (1..=200u64).map(|i| i * 1_000_003).collect();
        for &hash in &hashes {
            table.try_insert(hash);
        }
        assert_eq!(table.num_entries(), hashes.len());
        let mut retained: Vec<u64> = table.iter().collect();
        retained.sort_unstable();
        assert_eq!(retained, hashes);
    }

    #[test]
    fn test_purge_lowers_theta_and_keeps_k_smallest() {
        let mut table = table(5);
        let k = 32usize;
        // Enough distinct odd hashes to force a purge at full table size.
        for i in 1..=200u64 {
            table.try_insert(i * 2 + 1);
        }
        assert!(table.theta() < MAX_THETA);
        assert!(table.num_entries() <= 2 * k);
        for entry in table.iter() {
            assert!(entry < table.theta());
        }
    }

    #[test]
    fn test_reset() {
        let mut table = table(5);
        for i in 1..=500u64 {
            table.try_insert(i * 7 + 1);
        }
        table.reset();
        assert!(table.is_empty());
        assert_eq!(table.num_entries(), 0);
        assert_eq!(table.theta(), MAX_THETA);
        assert_eq!(table.iter().count(), 0);
    }
}
