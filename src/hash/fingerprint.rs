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

//! The 64-bit fingerprint BigQuery applies to values before adding them to an HLL++ sketch.
//!
//! The three length classes (up to 32 bytes, 33 to 64 bytes, longer) each use their own mixing
//! routine, and the result is always finished by folding in the first and last eight bytes of
//! the input. Every constant, rotation and offset below is part of the compatibility contract.

use super::read_u64_le;

const K0: u64 = 0xa5b85c5e198ed849;
const K1: u64 = 0x8d58ac26afe12e47;
const K2: u64 = 0xc47b6e9e3a970ed3;
const K3: u64 = 0xc6a4a7935bd1e995;

/// Computes the BigQuery-compatible 64-bit fingerprint of `bytes`.
///
/// The result is never 0 or 1; those two values are shifted to the top of the `u64` range.
///
/// # Examples
///
/// ```
/// use hllpp::hash::bigquery_hash;
///
/// assert_eq!(bigquery_hash(b"hello world"), 0xC395B7D271B4ECCC);
/// assert_eq!(bigquery_hash(b""), bigquery_hash(&[]));
/// ```
pub fn bigquery_hash(bytes: &[u8]) -> u64 {
    let length = bytes.len();
    let result = if length <= 32 {
        murmur_hash64_with_seed(bytes, K0 ^ K1 ^ K2)
    } else if length <= 64 {
        hash_length_33_to_64(bytes)
    } else {
        full_fingerprint(bytes)
    };

    let u = if length >= 8 { read_u64_le(bytes) } else { K0 };
    let v = if length >= 9 {
        read_u64_le(&bytes[length - 8..])
    } else {
        K0
    };
    finish(hash128_to_64(result.wrapping_add(v), u))
}

/// Moves the reserved values 0 and 1 to `u64::MAX - 1` and `u64::MAX`.
#[inline]
fn finish(result: u64) -> u64 {
    if result == 0 || result == 1 {
        result.wrapping_add(!1u64)
    } else {
        result
    }
}

#[inline]
fn load64(bytes: &[u8], offset: usize) -> u64 {
    read_u64_le(&bytes[offset..offset + 8])
}

/// Loads up to eight trailing bytes as a little-endian word, zero-padding the high bytes.
#[inline]
fn load64_safely(bytes: &[u8], offset: usize, length: usize) -> u64 {
    bytes[offset..offset + length.min(8)]
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | ((b as u64) << (i * 8)))
}

#[inline]
fn shift_mix(val: u64) -> u64 {
    val ^ (val >> 47)
}

#[inline]
fn hash128_to_64(high: u64, low: u64) -> u64 {
    let mut a = (low ^ high).wrapping_mul(K3);
    a ^= a >> 47;
    let mut b = (high ^ a).wrapping_mul(K3);
    b ^= b >> 47;
    b.wrapping_mul(K3)
}

fn murmur_hash64_with_seed(bytes: &[u8], seed: u64) -> u64 {
    let mul = K3;
    let length = bytes.len();
    let length_aligned = length & !7;
    let length_remainder = length & 7;
    let mut hash = seed ^ (length as u64).wrapping_mul(mul);

    for chunk in bytes[..length_aligned].chunks_exact(8) {
        let data = shift_mix(read_u64_le(chunk).wrapping_mul(mul)).wrapping_mul(mul);
        hash ^= data;
        hash = hash.wrapping_mul(mul);
    }

    if length_remainder != 0 {
        let data = load64_safely(bytes, length_aligned, length_remainder);
        hash ^= data;
        hash = hash.wrapping_mul(mul);
    }

    hash = shift_mix(hash).wrapping_mul(mul);
    shift_mix(hash)
}

fn hash_length_33_to_64(bytes: &[u8]) -> u64 {
    let length = bytes.len();

    let mut z = load64(bytes, 24);
    let mut a = load64(bytes, 0).wrapping_add(
        (length as u64)
            .wrapping_add(load64(bytes, length - 16))
            .wrapping_mul(K0),
    );
    let mut b = a.wrapping_add(z).rotate_right(52);
    let mut c = a.rotate_right(37);
    a = a.wrapping_add(load64(bytes, 8));
    c = c.wrapping_add(a.rotate_right(7));
    a = a.wrapping_add(load64(bytes, 16));
    let vf = a.wrapping_add(z);
    let vs = b.wrapping_add(a.rotate_right(31)).wrapping_add(c);

    a = load64(bytes, 16).wrapping_add(load64(bytes, length - 32));
    z = load64(bytes, length - 8);
    b = a.wrapping_add(z).rotate_right(52);
    c = a.rotate_right(37);
    a = a.wrapping_add(load64(bytes, length - 24));
    c = c.wrapping_add(a.rotate_right(7));
    a = a.wrapping_add(load64(bytes, length - 16));
    let wf = a.wrapping_add(z);
    let ws = b.wrapping_add(a.rotate_right(31)).wrapping_add(c);

    let r = shift_mix(
        vf.wrapping_add(ws)
            .wrapping_mul(K2)
            .wrapping_add(wf.wrapping_add(vs).wrapping_mul(K0)),
    );
    shift_mix(r.wrapping_mul(K0).wrapping_add(vs)).wrapping_mul(K2)
}

/// Hashes 32 bytes starting at `offset` into a pair of words, seeded by `seed_a` and `seed_b`.
fn weak_hash_length_32_with_seeds(
    bytes: &[u8],
    offset: usize,
    mut seed_a: u64,
    mut seed_b: u64,
) -> (u64, u64) {
    let part1 = load64(bytes, offset);
    let part2 = load64(bytes, offset + 8);
    let part3 = load64(bytes, offset + 16);
    let part4 = load64(bytes, offset + 24);

    seed_a = seed_a.wrapping_add(part1);
    seed_b = seed_b
        .wrapping_add(seed_a)
        .wrapping_add(part4)
        .rotate_right(51);
    let c = seed_a;
    seed_a = seed_a.wrapping_add(part2);
    seed_a = seed_a.wrapping_add(part3);
    seed_b = seed_b.wrapping_add(seed_a.rotate_right(23));

    (seed_a.wrapping_add(part4), seed_b.wrapping_add(c))
}

/// Fingerprint for inputs longer than 64 bytes.
///
/// The tail of the input seeds five words of state, then every whole 64-byte block from the
/// start of the input is folded in. The final block is the one the tail overlaps, so the loop
/// always runs at least once.
fn full_fingerprint(bytes: &[u8]) -> u64 {
    let length = bytes.len();
    debug_assert!(length > 64);

    let mut x = load64(bytes, 0);
    let mut y = load64(bytes, length - 16) ^ K1;
    let mut z = load64(bytes, length - 56) ^ K0;
    let mut v = weak_hash_length_32_with_seeds(bytes, length - 64, length as u64, y);
    let mut w = weak_hash_length_32_with_seeds(
        bytes,
        length - 32,
        (length as u64).wrapping_mul(K1),
        K0,
    );
    z = z.wrapping_add(shift_mix(v.1).wrapping_mul(K1));
    x = z.wrapping_add(x).rotate_right(39).wrapping_mul(K1);
    y = y.rotate_right(33).wrapping_mul(K1);

    let mut offset = 0;
    let mut remaining = (length - 1) & !63;
    loop {
        x = x
            .wrapping_add(y)
            .wrapping_add(v.0)
            .wrapping_add(load64(bytes, offset + 16))
            .rotate_right(37)
            .wrapping_mul(K1);
        y = y
            .wrapping_add(v.1)
            .wrapping_add(load64(bytes, offset + 48))
            .rotate_right(42)
            .wrapping_mul(K1);
        x ^= w.1;
        y ^= v.0;
        z = (z ^ w.0).rotate_right(33);
        v = weak_hash_length_32_with_seeds(
            bytes,
            offset,
            v.1.wrapping_mul(K1),
            x.wrapping_add(w.0),
        );
        w = weak_hash_length_32_with_seeds(bytes, offset + 32, z.wrapping_add(w.1), y);
        std::mem::swap(&mut z, &mut x);
        offset += 64;
        remaining -= 64;
        if remaining == 0 {
            break;
        }
    }

    hash128_to_64(
        hash128_to_64(v.0, w.0)
            .wrapping_add(shift_mix(y).wrapping_mul(K1))
            .wrapping_add(z),
        hash128_to_64(v.1, w.1).wrapping_add(x),
    )
}
