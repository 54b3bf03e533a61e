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

//! Conversion between 64-bit hashes and encoded sparse entries.

use std::cmp::Reverse;

use super::MAX_SPARSE_PRECISION;
use super::MIN_PRECISION;
use super::RHOW_BITS;
use super::bits::low_bits_mask;

#[inline]
fn debug_assert_precisions(p: u8, p_prime: u8) {
    debug_assert!(
        MIN_PRECISION <= p && p <= p_prime && p_prime <= MAX_SPARSE_PRECISION,
        "invalid precisions: p={p}, p'={p_prime}"
    );
}

/// Flag bit marking an entry that carries an explicit run length.
///
/// It sits just above the larger of the sparse index (`p'` bits) and the packed
/// normal index plus run length (`p + 6` bits).
#[inline]
fn rho_encoded_flag(p: u8, p_prime: u8) -> u32 {
    1 << p_prime.max(p + RHOW_BITS)
}

/// Encodes a sparse index and its run length as a sparse entry.
///
/// If any of the low `p' - p` bits of `sparse_index` are set, the run length at precision `p`
/// is implied by those bits and the index itself is returned. Otherwise the normal index and
/// `sparse_rho_w` are packed under the flag bit.
///
/// # Panics
///
/// Panics in debug builds unless `4 <= p <= p' <= 25`.
///
/// # Examples
///
/// ```
/// use hllpp::hll::encode;
///
/// assert_eq!(encode(0, 21, 15, 20), 2097173);
/// assert_eq!(encode(0b101, 3, 15, 20), 0b101);
/// ```
pub fn encode(sparse_index: u32, sparse_rho_w: u8, p: u8, p_prime: u8) -> u32 {
    debug_assert_precisions(p, p_prime);
    if sparse_index & low_bits_mask(p_prime - p) != 0 {
        return sparse_index;
    }

    let normal_index = sparse_index >> (p_prime - p);
    rho_encoded_flag(p, p_prime) | (normal_index << RHOW_BITS) | sparse_rho_w as u32
}

/// Run length of the low `bits` bits of `value`: the position of their leftmost one bit,
/// counting from one, or `bits + 1` when they are all zero.
///
/// # Examples
///
/// ```
/// use hllpp::hll::compute_rho_w;
///
/// assert_eq!(compute_rho_w(0xf00d, 44), 29);
/// assert_eq!(compute_rho_w(0, 44), 45);
/// ```
#[inline]
pub fn compute_rho_w(value: u64, bits: u8) -> u8 {
    // Strip the index bits and move the run-length bits to the top.
    let w = value.checked_shl(64 - bits as u32).unwrap_or(0);
    if w == 0 {
        bits + 1
    } else {
        w.leading_zeros() as u8 + 1
    }
}

/// Encodes a 64-bit hash as a sparse entry: the top `p'` bits form the sparse index and the
/// remaining `64 - p'` bits give the run length.
///
/// # Panics
///
/// Panics in debug builds unless `4 <= p <= p' <= 25`.
///
/// # Examples
///
/// ```
/// use hllpp::hll::encode_sparse_hash;
///
/// assert_eq!(encode_sparse_hash(0xf00d, 15, 20), 2097181);
/// assert_eq!(encode_sparse_hash(0x2486bb7bf76b8a, 14, 25), 18701);
/// ```
pub fn encode_sparse_hash(hash: u64, p: u8, p_prime: u8) -> u32 {
    debug_assert_precisions(p, p_prime);
    let sparse_index = (hash >> (64 - p_prime)) as u32;
    let sparse_rho_w = compute_rho_w(hash, 64 - p_prime);
    encode(sparse_index, sparse_rho_w, p, p_prime)
}

/// Decodes a sparse entry into its sparse index and run length.
///
/// The run length is 0 for entries without the flag bit; it is implied by the low bits of
/// the index and only materializes at normal precision, see
/// [`decode_sparse_hash_for_normal`].
///
/// # Panics
///
/// Panics in debug builds unless `4 <= p <= p' <= 25`.
///
/// # Examples
///
/// ```
/// use hllpp::hll::decode_sparse_hash;
///
/// assert_eq!(decode_sparse_hash(0x4ce3e, 15, 20), (314942, 0));
/// assert_eq!(decode_sparse_hash(2097173, 15, 20), (0, 21));
/// ```
pub fn decode_sparse_hash(encoded: u32, p: u8, p_prime: u8) -> (u32, u8) {
    debug_assert_precisions(p, p_prime);
    let flag = rho_encoded_flag(p, p_prime);
    if encoded & flag == 0 {
        return (encoded, 0);
    }

    let normal_index = (encoded ^ flag) >> RHOW_BITS;
    (
        normal_index << (p_prime - p),
        (encoded & low_bits_mask(RHOW_BITS)) as u8,
    )
}

/// Decodes a sparse entry into its normal index and the run length over the `64 - p` bits
/// that follow it.
///
/// Requires `4 <= p <= p' <= 25`, like [`decode_sparse_hash`].
pub fn decode_sparse_hash_for_normal(encoded: u32, p: u8, p_prime: u8) -> (u32, u8) {
    debug_assert_precisions(p, p_prime);
    let flag = rho_encoded_flag(p, p_prime);
    if encoded & flag == 0 {
        return (
            encoded >> (p_prime - p),
            compute_rho_w(encoded as u64, p_prime - p),
        );
    }

    let rho_w = (encoded & low_bits_mask(RHOW_BITS)) as u8;
    ((encoded ^ flag) >> RHOW_BITS, rho_w + (p_prime - p))
}

/// Whether `encoded` is a well-formed entry for `(p, p')`: either a sparse index below `2^p'`,
/// or a flagged entry whose normal index is below `2^p`.
pub(super) fn is_valid_entry(encoded: u32, p: u8, p_prime: u8) -> bool {
    let flag = rho_encoded_flag(p, p_prime);
    if encoded & flag == 0 {
        (encoded as u64) < 1u64 << p_prime
    } else {
        (((encoded ^ flag) >> RHOW_BITS) as u64) < 1u64 << p
    }
}

/// Sorts sparse entries by decoded index, and by descending run length within an index, so
/// the entry that survives deduplication comes first.
///
/// Requires `4 <= p <= p' <= 25`, like [`decode_sparse_hash`].
pub fn sort_hashcodes_by_index(entries: &mut [u32], p: u8, p_prime: u8) {
    entries.sort_unstable_by_key(|&encoded| {
        let (index, rho_w) = decode_sparse_hash(encoded, p, p_prime);
        (index, Reverse(rho_w))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        assert_eq!(decode_sparse_hash(0x4ce3e, 15, 20), (314942, 0));
        assert_eq!(decode_sparse_hash(2097173, 15, 20), (0, 21));
        assert_eq!(decode_sparse_hash(18701, 14, 25), (18701, 0));
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode(0, 21, 15, 20), 2097173);
        assert_eq!(compute_rho_w(0xf00d, 64 - 20), 29);
        assert_eq!(encode_sparse_hash(0xf00d, 15, 20), 2097181);
        assert_eq!(compute_rho_w(3226844164433860790, 64 - 20), 1);
        assert_eq!(encode_sparse_hash(3226844164433860790, 15, 20), 2464001);
        assert_eq!(encode_sparse_hash(0x2486bb7bf76b8a, 14, 25), 18701);
    }

    #[test]
    fn test_compute_rho_w_edges() {
        assert_eq!(compute_rho_w(u64::MAX, 0), 1);
        assert_eq!(compute_rho_w(0, 0), 1);
        assert_eq!(compute_rho_w(1, 1), 1);
        assert_eq!(compute_rho_w(0b10, 1), 2);
        assert_eq!(compute_rho_w(1, 64), 64);
        assert_eq!(compute_rho_w(1 << 63, 64), 1);
        assert_eq!(compute_rho_w(0, 64), 65);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid precisions: p=20, p'=15")]
    fn test_encode_rejects_inverted_precisions() {
        encode(3, 1, 20, 15);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid precisions: p=4, p'=0")]
    fn test_decode_rejects_zero_sparse_precision() {
        decode_sparse_hash_for_normal(3, 4, 0);
    }

    #[test]
    fn test_flag_position() {
        // p' dominates when it is at least p + 6.
        assert_eq!(rho_encoded_flag(15, 25), 1 << 25);
        assert_eq!(rho_encoded_flag(15, 21), 1 << 21);
        // Otherwise the packed normal index and run length need p + 6 bits.
        assert_eq!(rho_encoded_flag(15, 20), 1 << 21);
        assert_eq!(rho_encoded_flag(25, 25), 1 << 31);
    }

    #[test]
    fn test_equal_precisions_always_flag() {
        // With p == p' there are no spare index bits, so every entry carries its run length.
        let hash = 0xdead_beef_0000_f00d;
        let encoded = encode_sparse_hash(hash, 12, 12);
        assert_ne!(encoded & rho_encoded_flag(12, 12), 0);
        assert_eq!(
            decode_sparse_hash_for_normal(encoded, 12, 12),
            ((hash >> 52) as u32, compute_rho_w(hash, 52))
        );
    }

    #[test]
    fn test_decode_round_trip() {
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        for p in 4..=25u8 {
            for p_prime in p..=25u8 {
                for _ in 0..64 {
                    state = state
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    // Sprinkle in hashes whose low sparse-index bits are all zero.
                    let hash = if state & 3 == 0 {
                        state & !(((1u64 << (p_prime - p)) - 1) << (64 - p_prime))
                    } else {
                        state
                    };

                    let encoded = encode_sparse_hash(hash, p, p_prime);
                    let sparse_index = (hash >> (64 - p_prime)) as u32;
                    let (index, rho_w) = decode_sparse_hash(encoded, p, p_prime);
                    assert_eq!(index, sparse_index);
                    if encoded & rho_encoded_flag(p, p_prime) != 0 {
                        assert_eq!(rho_w, compute_rho_w(hash, 64 - p_prime));
                    } else {
                        assert_eq!(rho_w, 0);
                    }

                    let normal = decode_sparse_hash_for_normal(encoded, p, p_prime);
                    assert_eq!(
                        normal,
                        ((hash >> (64 - p)) as u32, compute_rho_w(hash, 64 - p)),
                        "hash {hash:#x} at ({p}, {p_prime})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_is_valid_entry() {
        assert!(is_valid_entry(0x4ce3e, 15, 20));
        assert!(is_valid_entry(2097173, 15, 20));
        assert!(is_valid_entry((1 << 20) - 1, 15, 20));
        // Bit 20 is neither an index bit nor the flag at (15, 20).
        assert!(!is_valid_entry(1 << 20, 15, 20));
        assert!(is_valid_entry((1 << 21) | ((1 << 21) - 1), 15, 20));
        // Flagged, but with bits above the flag.
        assert!(!is_valid_entry((1 << 22) | (1 << 21), 15, 20));
        assert!(!is_valid_entry(u32::MAX, 15, 25));
    }

    #[test]
    fn test_sort_by_index_then_descending_rho() {
        let (p, p_prime) = (15, 20);
        let mut entries = vec![
            encode(64, 3, p, p_prime),
            encode(1, 0, p, p_prime),
            encode(64, 9, p, p_prime),
            encode(0, 2, p, p_prime),
            encode(33, 0, p, p_prime),
        ];
        sort_hashcodes_by_index(&mut entries, p, p_prime);
        let decoded: Vec<_> = entries
            .iter()
            .map(|&e| decode_sparse_hash(e, p, p_prime))
            .collect();
        assert_eq!(decoded, vec![(0, 2), (1, 0), (33, 0), (64, 9), (64, 3)]);
    }
}
