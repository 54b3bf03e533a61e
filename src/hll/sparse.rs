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

//! Sparse-mode storage: a difference-encoded list of sparse entries and the sort-merge that
//! folds batches of new entries into it.

use std::cmp::Ordering;
use std::iter::Peekable;

use crate::codec::SketchBytes;
use crate::codec::SketchSlice;
use crate::codec::varint_u32_len;
use crate::error::Error;
use crate::hll::encoding::decode_sparse_hash;
use crate::hll::encoding::decode_sparse_hash_for_normal;
use crate::hll::registers::Registers;

/// Sorted list of sparse entries, each index at most once.
///
/// Entries are stored as unsigned varints of the wrapping 32-bit difference to the previous
/// entry. The list only grows by appending, and appends must arrive in decoded-index order;
/// [`merge`] is the one producer of new lists.
#[derive(Debug, Clone)]
pub struct SparseList {
    buf: SketchBytes,
    num_elements: u32,
    last_val: u32,
}

impl SparseList {
    /// Creates an empty list with room for `size_hint` encoded bytes.
    pub fn new(size_hint: usize) -> Self {
        Self {
            buf: SketchBytes::with_capacity(size_hint),
            num_elements: 0,
            last_val: 0,
        }
    }

    /// Adopts an already encoded buffer of `num_elements` entries.
    ///
    /// The buffer is walked once to check that it holds exactly `num_elements` well-formed
    /// varints and to position the append cursor after the last entry.
    pub fn from_raw(buf: Vec<u8>, num_elements: u32) -> Result<Self, Error> {
        let mut slice = SketchSlice::new(&buf);
        let mut last_val = 0u32;
        for i in 0..num_elements {
            let delta = slice.read_varint_u32().map_err(|err| {
                Error::insufficient_data("sparse_data")
                    .with_context("entry", i)
                    .with_context("sparse_size", num_elements)
                    .set_source(err)
            })?;
            last_val = last_val.wrapping_add(delta);
        }
        if !slice.is_exhausted() {
            return Err(
                Error::deserial("sparse data holds more entries than sparse_size")
                    .with_context("sparse_size", num_elements),
            );
        }

        Ok(Self {
            buf: SketchBytes::from_vec(buf),
            num_elements,
            last_val,
        })
    }

    /// Appends an entry. It must not sort before the current last entry.
    pub fn add(&mut self, encoded: u32) {
        self.buf.write_varint_u32(encoded.wrapping_sub(self.last_val));
        self.last_val = encoded;
        self.num_elements += 1;
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.num_elements as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_elements == 0
    }

    /// Size of the encoded entries in bytes.
    pub fn byte_len(&self) -> usize {
        self.buf.len()
    }

    /// The entry appended last, or 0 for an empty list.
    pub fn last_value(&self) -> u32 {
        self.last_val
    }

    /// Iterates over the entries in list order.
    pub fn iter(&self) -> SparseIter<'_> {
        SparseIter {
            slice: SketchSlice::new(self.buf.as_slice()),
            remaining: self.num_elements,
            last_val: 0,
        }
    }

    /// The list's entries in ascending numeric order, difference-encoded.
    ///
    /// This is the layout of the BigQuery `sparse_data` field.
    pub(super) fn to_numeric_order_bytes(&self) -> Vec<u8> {
        let mut entries: Vec<u32> = self.iter().collect();
        entries.sort_unstable();

        let mut bytes = SketchBytes::with_capacity(self.byte_len());
        let mut last = 0u32;
        for encoded in entries {
            bytes.write_varint_u32(encoded - last);
            last = encoded;
        }
        bytes.into_bytes()
    }
}

impl<'a> IntoIterator for &'a SparseList {
    type Item = u32;
    type IntoIter = SparseIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Single pass over the entries of a [`SparseList`].
pub struct SparseIter<'a> {
    slice: SketchSlice<'a>,
    remaining: u32,
    last_val: u32,
}

impl Iterator for SparseIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }
        // Buffers are either written by `add` or checked by `from_raw`.
        let delta = self.slice.read_varint_u32().ok()?;
        self.remaining -= 1;
        self.last_val = self.last_val.wrapping_add(delta);
        Some(self.last_val)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

#[derive(Debug, Clone, Copy)]
struct MergeElem {
    index: u32,
    rho_w: u8,
    encoded: u32,
}

/// Decodes a sorted entry stream, keeping only the first entry of each index.
///
/// A freshly sorted batch of new entries can hold one index several times; sorting puts
/// the largest run length first, so the first one wins.
struct DedupByIndex<I> {
    input: I,
    p: u8,
    p_prime: u8,
    last_index: Option<u32>,
}

impl<I: Iterator<Item = u32>> Iterator for DedupByIndex<I> {
    type Item = MergeElem;

    fn next(&mut self) -> Option<MergeElem> {
        for encoded in self.input.by_ref() {
            let (index, rho_w) = decode_sparse_hash(encoded, self.p, self.p_prime);
            if self.last_index == Some(index) {
                continue;
            }
            self.last_index = Some(index);
            return Some(MergeElem {
                index,
                rho_w,
                encoded,
            });
        }
        None
    }
}

fn dedup_by_index<I>(input: I, p: u8, p_prime: u8) -> Peekable<DedupByIndex<I::IntoIter>>
where
    I: IntoIterator<Item = u32>,
{
    DedupByIndex {
        input: input.into_iter(),
        p,
        p_prime,
        last_index: None,
    }
    .peekable()
}

/// Merges two entry streams, each sorted by decoded index, into a new [`SparseList`].
///
/// On equal indices the entry with the larger run length is kept. `size_hint` is the
/// expected encoded size of the result in bytes.
///
/// # Examples
///
/// ```
/// use hllpp::hll::{decode_sparse_hash, encode, merge};
///
/// let (p, p_prime) = (15, 20);
/// let left = [encode(1, 0, p, p_prime), encode(64, 3, p, p_prime)];
/// let right = [encode(64, 9, p, p_prime), encode(70, 0, p, p_prime)];
///
/// let merged = merge(p, p_prime, 0, left, right);
/// let decoded: Vec<_> = merged
///     .iter()
///     .map(|e| decode_sparse_hash(e, p, p_prime))
///     .collect();
/// assert_eq!(decoded, vec![(1, 0), (64, 9), (70, 0)]);
/// ```
pub fn merge<L, R>(p: u8, p_prime: u8, size_hint: usize, left: L, right: R) -> SparseList
where
    L: IntoIterator<Item = u32>,
    R: IntoIterator<Item = u32>,
{
    let mut left = dedup_by_index(left, p, p_prime);
    let mut right = dedup_by_index(right, p, p_prime);
    let mut output = SparseList::new(size_hint);

    loop {
        let order = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l.index.cmp(&r.index),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        let to_append = match order {
            Ordering::Less => left.next(),
            Ordering::Greater => right.next(),
            Ordering::Equal => {
                // The indexes are equal. Keep the one with the higher rho value.
                match (left.next(), right.next()) {
                    (Some(l), Some(r)) if l.rho_w > r.rho_w => Some(l),
                    (_, r) => r,
                }
            }
        };
        if let Some(elem) = to_append {
            output.add(elem.encoded);
        }
    }

    output
}

/// Expands sparse entries into `2^p` registers, each holding the largest run length among
/// the entries that map to it.
pub fn to_normal<I>(entries: I, p: u8, p_prime: u8) -> Registers
where
    I: IntoIterator<Item = u32>,
{
    let mut registers = Registers::new(p);
    add_to_registers(&mut registers, entries, p_prime);
    registers
}

/// Folds sparse entries at sparse precision `p_prime` into existing registers.
pub(super) fn add_to_registers<I>(registers: &mut Registers, entries: I, p_prime: u8)
where
    I: IntoIterator<Item = u32>,
{
    let p = registers.precision();
    for encoded in entries {
        let (index, rho_w) = decode_sparse_hash_for_normal(encoded, p, p_prime);
        registers.update_max(index, rho_w);
    }
}

/// Upper bound on the encoded size of `n` entries appended to a list of `list_bytes` bytes.
pub(super) fn merged_size_hint(list_bytes: usize, pending: &[u32]) -> usize {
    list_bytes
        + pending
            .iter()
            .map(|&encoded| varint_u32_len(encoded))
            .sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hll::encoding::encode_sparse_hash;
    use crate::hll::encoding::sort_hashcodes_by_index;

    fn pseudo_random_hashes(seed: u64, count: usize) -> Vec<u64> {
        let mut state = seed;
        (0..count)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                state ^ (state >> 29)
            })
            .collect()
    }

    fn sorted_entries(hashes: &[u64], p: u8, p_prime: u8) -> Vec<u32> {
        let mut entries: Vec<u32> = hashes
            .iter()
            .map(|&h| encode_sparse_hash(h, p, p_prime))
            .collect();
        sort_hashcodes_by_index(&mut entries, p, p_prime);
        entries
    }

    #[test]
    fn test_sparse_iterator() {
        let mut list = SparseList::new(5);
        let inputs = [3u32, 5, 6, 6, 10];
        for x in inputs {
            list.add(x);
        }
        assert_eq!(list.len(), 5);
        assert_eq!(list.last_value(), 10);

        let mut iter = list.iter();
        for elem in inputs {
            assert_eq!(iter.next(), Some(elem));
        }
        // iterator should be exhausted
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_wrapping_deltas() {
        // Flagged entries sort by index, not by value, so deltas can be negative.
        let inputs = [1u32 << 25 | 7, 3, u32::MAX, 0];
        let mut list = SparseList::new(0);
        for x in inputs {
            list.add(x);
        }
        assert_eq!(list.iter().collect::<Vec<_>>(), inputs);
    }

    #[test]
    fn test_from_raw() {
        let mut list = SparseList::new(0);
        for x in [10u32, 200, 70_000] {
            list.add(x);
        }
        let bytes = list.buf.as_slice().to_vec();

        let restored = SparseList::from_raw(bytes.clone(), 3).unwrap();
        assert_eq!(restored.last_value(), 70_000);
        assert_eq!(restored.iter().collect::<Vec<_>>(), vec![10, 200, 70_000]);

        assert!(SparseList::from_raw(bytes.clone(), 4).is_err());
        assert!(SparseList::from_raw(bytes, 2).is_err());
        assert!(SparseList::from_raw(vec![], 0).unwrap().is_empty());
    }

    #[test]
    fn test_numeric_order_bytes() {
        let (p, p_prime) = (15, 20);
        let mut list = SparseList::new(0);
        // Index order: flagged index 0 first, then raw index 1.
        list.add(2097173);
        list.add(1);
        let bytes = list.to_numeric_order_bytes();
        let restored = SparseList::from_raw(bytes, 2).unwrap();
        assert_eq!(restored.iter().collect::<Vec<_>>(), vec![1, 2097173]);
        assert_eq!(decode_sparse_hash(2097173, p, p_prime), (0, 21));
    }

    #[test]
    fn test_merge_is_sorted_and_deduplicated() {
        let (p, p_prime) = (12, 25);
        let left = sorted_entries(&pseudo_random_hashes(1, 200), p, p_prime);
        let right = sorted_entries(&pseudo_random_hashes(2, 100), p, p_prime);

        let merged = merge(p, p_prime, 0, left, right);
        let mut last_index = None;
        for encoded in &merged {
            let (index, _) = decode_sparse_hash(encoded, p, p_prime);
            if let Some(last) = last_index {
                assert!(index > last, "{index} after {last}");
            }
            last_index = Some(index);
        }
        assert_eq!(merged.len(), 300);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let (p, p_prime) = (10, 14);
        // A small sparse precision forces plenty of shared indices.
        let left = sorted_entries(&pseudo_random_hashes(3, 3000), p, p_prime);
        let right = sorted_entries(&pseudo_random_hashes(4, 3000), p, p_prime);

        let ab: Vec<u32> = merge(p, p_prime, 0, left.clone(), right.clone())
            .iter()
            .collect();
        let ba: Vec<u32> = merge(p, p_prime, 0, right, left).iter().collect();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_merge_keeps_highest_rho() {
        let (p, p_prime) = (15, 20);
        let low = crate::hll::encode(64, 3, p, p_prime);
        let high = crate::hll::encode(64, 9, p, p_prime);

        let merged: Vec<u32> = merge(p, p_prime, 0, [low], [high]).iter().collect();
        assert_eq!(merged, vec![high]);
        let merged: Vec<u32> = merge(p, p_prime, 0, [high], [low]).iter().collect();
        assert_eq!(merged, vec![high]);
        // Duplicates within one side: the first (highest rho after sorting) survives.
        let merged: Vec<u32> = merge(p, p_prime, 0, [high, low], std::iter::empty::<u32>())
            .iter()
            .collect();
        assert_eq!(merged, vec![high]);
    }

    #[test]
    fn test_to_normal_takes_register_max() {
        let (p, p_prime) = (10, 16);
        let hashes = pseudo_random_hashes(5, 5000);
        let entries = sorted_entries(&hashes, p, p_prime);
        let list = merge(p, p_prime, 0, entries, std::iter::empty::<u32>());

        let registers = to_normal(&list, p, p_prime);

        let mut expected = vec![0u8; 1 << p];
        for &h in &hashes {
            let index = (h >> (64 - p)) as usize;
            expected[index] = expected[index].max(crate::hll::compute_rho_w(h, 64 - p));
        }
        assert_eq!(registers.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_merged_size_hint() {
        assert_eq!(merged_size_hint(10, &[]), 10);
        assert_eq!(merged_size_hint(10, &[1, 300, 1 << 25]), 10 + 1 + 2 + 4);
    }
}
