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

//! MurmurHash3 x64-128 with a 64-bit seed.
//!
//! Implemented as a [`std::hash::Hasher`] so any `T: Hash` can be fed into a
//! sketch. The seed is 64 bits (not the 32 bits of the reference C signature)
//! to match the seed domain used by the DataSketches family; the default update
//! seed is 9001.

use std::hash::Hasher;

pub(crate) const DEFAULT_UPDATE_SEED: u64 = 9001;

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;

/// Streaming MurmurHash3 x64-128.
///
/// `finish` returns the first 64 bits of the 128-bit digest; `finish128`
/// exposes both halves.
#[derive(Debug, Clone)]
pub(crate) struct MurmurHash3 {
    h1: u64,
    h2: u64,
    buf: [u8; 16],
    buf_len: usize,
    processed: u64,
}

impl MurmurHash3 {
    pub(crate) fn with_seed(seed: u64) -> Self {
        Self {
            h1: seed,
            h2: seed,
            buf: [0; 16],
            buf_len: 0,
            processed: 0,
        }
    }

    fn mix_block(&mut self, k1: u64, k2: u64) {
        self.h1 ^= mix_k1(k1);
        self.h1 = self
            .h1
            .rotate_left(27)
            .wrapping_add(self.h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);
        self.h2 ^= mix_k2(k2);
        self.h2 = self
            .h2
            .rotate_left(31)
            .wrapping_add(self.h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    /// Finalizes over the buffered tail without consuming the hasher state.
    pub(crate) fn finish128(&self) -> (u64, u64) {
        let mut h1 = self.h1;
        let mut h2 = self.h2;

        let tail = &self.buf[..self.buf_len];
        let mut k1 = [0u8; 8];
        let mut k2 = [0u8; 8];
        if tail.len() > 8 {
            k1.copy_from_slice(&tail[..8]);
            k2[..tail.len() - 8].copy_from_slice(&tail[8..]);
        } else {
            k1[..tail.len()].copy_from_slice(tail);
        }
        // mix_k1(0) and mix_k2(0) are zero, so empty tails are no-ops.
        h1 ^= mix_k1(u64::from_le_bytes(k1));
        h2 ^= mix_k2(u64::from_le_bytes(k2));

        let len = self.processed + self.buf_len as u64;
        h1 ^= len;
        h2 ^= len;
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);
        h1 = fmix64(h1);
        h2 = fmix64(h2);
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);
        (h1, h2)
    }
}

impl Hasher for MurmurHash3 {
    fn finish(&self) -> u64 {
        self.finish128().0
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut rest = bytes;

        if self.buf_len > 0 {
            let take = (16 - self.buf_len).min(rest.len());
            self.buf[self.buf_len..self.buf_len + take].copy_from_slice(&rest[..take]);
            self.buf_len += take;
            rest = &rest[take..];
            if self.buf_len < 16 {
                return;
            }
            let (k1, k2) = split_block(&self.buf);
            self.mix_block(k1, k2);
            self.processed += 16;
            self.buf_len = 0;
        }

        let mut chunks = rest.chunks_exact(16);
        for chunk in &mut chunks {
            let mut block = [0u8; 16];
            block.copy_from_slice(chunk);
            let (k1, k2) = split_block(&block);
            self.mix_block(k1, k2);
            self.processed += 16;
        }

        let rem = chunks.remainder();
        self.buf[..rem.len()].copy_from_slice(rem);
        self.buf_len = rem.len();
    }
}

fn split_block(block: &[u8; 16]) -> (u64, u64) {
    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    a.copy_from_slice(&block[..8]);
    b.copy_from_slice(&block[8..]);
    (u64::from_le_bytes(a), u64::from_le_bytes(b))
}

fn mix_k1(k1: u64) -> u64 {
    k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

fn mix_k2(k2: u64) -> u64 {
    k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}
