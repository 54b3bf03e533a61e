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

use std::fmt;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::hash::bigquery_hash;
use crate::hll::DEFAULT_BIGQUERY_P;
use crate::hll::DEFAULT_BIGQUERY_P_PRIME;
use crate::hll::check_precisions;
use crate::hll::encoding::compute_rho_w;
use crate::hll::encoding::encode_sparse_hash;
use crate::hll::encoding::sort_hashcodes_by_index;
use crate::hll::estimator;
use crate::hll::mode::Mode;
use crate::hll::serialization;
use crate::hll::sparse::SparseList;
use crate::hll::sparse::add_to_registers;
use crate::hll::sparse::merge;
use crate::hll::sparse::merged_size_hint;
use crate::hll::sparse::to_normal;

/// A HyperLogLog++ sketch over 64-bit hashes.
///
/// The sketch starts in sparse mode at precision `p'` and switches to `2^p` normal registers
/// once the sparse list outgrows three quarters of their size. Inserts in sparse mode are
/// buffered and merged into the list in batches; reading the estimate, merging and exporting
/// flush the buffer first, which is why they take `&mut self`.
///
/// # Examples
///
/// ```
/// use hllpp::hll::HllSketch;
///
/// let mut sketch = HllSketch::new(14, 25);
/// sketch.update_bytes(b"apple");
/// sketch.update_bytes(b"banana");
/// sketch.update_bytes(b"apple");
/// assert_eq!(sketch.cardinality(), 2);
/// ```
#[derive(Clone)]
pub struct HllSketch {
    precision: u8,
    sparse_precision: u8,
    mode: Mode,
}

impl HllSketch {
    /// Creates an empty sketch with normal precision `precision` and sparse precision
    /// `sparse_precision`.
    ///
    /// # Panics
    ///
    /// Panics unless `4 <= precision <= sparse_precision <= 25`. Use
    /// [`try_new`](Self::try_new) to get an error instead.
    pub fn new(precision: u8, sparse_precision: u8) -> Self {
        assert!(
            check_precisions(precision, sparse_precision).is_ok(),
            "precisions must satisfy 4 <= p <= p' <= 25, got ({precision}, {sparse_precision})"
        );
        Self::from_parts(
            precision,
            sparse_precision,
            Mode::sparse(SparseList::new(0)),
        )
    }

    /// Creates an empty sketch, or returns [`ErrorKind::ConfigInvalid`] if the precisions are
    /// out of range.
    pub fn try_new(precision: u8, sparse_precision: u8) -> Result<Self, Error> {
        check_precisions(precision, sparse_precision)?;
        Ok(Self::new(precision, sparse_precision))
    }

    pub(super) fn from_parts(precision: u8, sparse_precision: u8, mode: Mode) -> Self {
        Self {
            precision,
            sparse_precision,
            mode,
        }
    }

    /// Decodes a sketch serialized by BigQuery (`HLL_COUNT.INIT`) or by
    /// [`to_bigquery`](Self::to_bigquery).
    ///
    /// An empty input decodes to an empty sketch with the BigQuery default precisions.
    ///
    /// # Errors
    ///
    /// Fails if the input is truncated or malformed, is not an HLL++ sketch, uses an encoding
    /// version other than 2, carries both normal and sparse data, or has invalid precisions.
    ///
    /// # Examples
    ///
    /// ```
    /// use hllpp::hll::HllSketch;
    ///
    /// let sketch = HllSketch::from_bigquery(&[]).unwrap();
    /// assert_eq!(sketch.precision(), 15);
    /// assert_eq!(sketch.sparse_precision(), 20);
    /// assert!(sketch.is_empty());
    /// ```
    pub fn from_bigquery(bytes: &[u8]) -> Result<Self, Error> {
        serialization::decode(bytes)
    }

    /// Serializes the sketch in the BigQuery format accepted by `HLL_COUNT.MERGE` and
    /// `HLL_COUNT.EXTRACT`.
    ///
    /// # Examples
    ///
    /// ```
    /// use hllpp::hll::HllSketch;
    ///
    /// let mut sketch = HllSketch::new(15, 20);
    /// sketch.update_bytes(b"apple");
    /// let bytes = sketch.to_bigquery().unwrap();
    ///
    /// let mut restored = HllSketch::from_bigquery(&bytes).unwrap();
    /// assert_eq!(restored.cardinality(), 1);
    /// ```
    pub fn to_bigquery(&mut self) -> Result<Vec<u8>, Error> {
        self.flush();
        serialization::encode(self)
    }

    /// Normal precision `p`.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Sparse precision `p'`.
    pub fn sparse_precision(&self) -> u8 {
        self.sparse_precision
    }

    /// Whether the sketch is still in sparse mode.
    pub fn is_sparse(&self) -> bool {
        matches!(self.mode, Mode::Sparse { .. })
    }

    /// Whether nothing has been added to the sketch.
    pub fn is_empty(&self) -> bool {
        match &self.mode {
            Mode::Sparse { list, tmp_set } => list.is_empty() && tmp_set.is_empty(),
            Mode::Normal(registers) => registers.num_zeros() as usize == registers.len(),
        }
    }

    pub(super) fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Adds a 64-bit hash to the sketch.
    ///
    /// Hashes must be uniformly distributed. Use [`update_bytes`](Self::update_bytes) to
    /// hash values the way BigQuery does.
    pub fn update(&mut self, hash: u64) {
        let (p, p_prime) = (self.precision, self.sparse_precision);
        let tmp_set_limit = self.tmp_set_limit();

        let needs_flush = match &mut self.mode {
            Mode::Sparse { tmp_set, .. } => {
                tmp_set.insert(encode_sparse_hash(hash, p, p_prime));
                tmp_set.len() >= tmp_set_limit
            }
            Mode::Normal(registers) => {
                let index = (hash >> (64 - p)) as u32;
                registers.update_max(index, compute_rho_w(hash, 64 - p));
                false
            }
        };

        if needs_flush {
            self.flush();
        }
    }

    /// Hashes `bytes` with [`bigquery_hash`] and adds the result.
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.update(bigquery_hash(bytes));
    }

    /// Returns the estimated number of distinct hashes added.
    pub fn estimate(&mut self) -> f64 {
        self.flush();
        match &self.mode {
            Mode::Sparse { list, .. } => {
                estimator::sparse_estimate(self.sparse_precision, list.len()).unwrap_or_else(|| {
                    let registers = to_normal(list, self.precision, self.sparse_precision);
                    estimator::normal_estimate(&registers)
                })
            }
            Mode::Normal(registers) => estimator::normal_estimate(registers),
        }
    }

    /// Returns the estimate rounded to the nearest integer.
    pub fn cardinality(&mut self) -> u64 {
        self.estimate().round() as u64
    }

    /// Merges `other` into this sketch.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::IncompatiblePrecision`] unless both sketches have the same normal
    /// and sparse precisions.
    pub fn merge(&mut self, other: &HllSketch) -> Result<(), Error> {
        if self.precision != other.precision || self.sparse_precision != other.sparse_precision {
            return Err(Error::new(
                ErrorKind::IncompatiblePrecision,
                "cannot merge sketches with different precisions",
            )
            .with_context("precision", self.precision)
            .with_context("sparse_precision", self.sparse_precision)
            .with_context("other_precision", other.precision)
            .with_context("other_sparse_precision", other.sparse_precision));
        }

        let (p, p_prime) = (self.precision, self.sparse_precision);
        match &other.mode {
            Mode::Sparse {
                list: other_list,
                tmp_set: other_tmp_set,
            } => {
                self.flush();
                match &mut self.mode {
                    Mode::Sparse { list, .. } => {
                        let mut pending: Vec<u32> = other_tmp_set.iter().copied().collect();
                        sort_hashcodes_by_index(&mut pending, p, p_prime);
                        let size_hint = merged_size_hint(other_list.byte_len(), &pending);
                        let incoming = merge(p, p_prime, size_hint, other_list, pending);

                        let size_hint = list.byte_len() + incoming.byte_len();
                        *list = merge(p, p_prime, size_hint, &*list, &incoming);
                    }
                    Mode::Normal(registers) => {
                        let entries = other_list.iter().chain(other_tmp_set.iter().copied());
                        add_to_registers(registers, entries, p_prime);
                    }
                }
                self.promote_if_needed();
            }
            Mode::Normal(other_registers) => {
                self.promote();
                if let Mode::Normal(registers) = &mut self.mode {
                    registers.merge(other_registers);
                }
            }
        }
        Ok(())
    }

    /// Sorts the pending inserts into the sparse list, then promotes if the list grew too
    /// large.
    fn flush(&mut self) {
        let (p, p_prime) = (self.precision, self.sparse_precision);
        if let Mode::Sparse { list, tmp_set } = &mut self.mode {
            if !tmp_set.is_empty() {
                let mut pending: Vec<u32> = tmp_set.drain().collect();
                sort_hashcodes_by_index(&mut pending, p, p_prime);
                let size_hint = merged_size_hint(list.byte_len(), &pending);
                *list = merge(p, p_prime, size_hint, &*list, pending);
            }
        }
        self.promote_if_needed();
    }

    fn promote_if_needed(&mut self) {
        let max_sparse_bytes = self.max_sparse_bytes();
        if matches!(&self.mode, Mode::Sparse { list, .. } if list.byte_len() > max_sparse_bytes) {
            self.promote();
        }
    }

    /// Switches to normal mode, folding in both the sparse list and any pending inserts.
    fn promote(&mut self) {
        let registers = match &self.mode {
            Mode::Sparse { list, tmp_set } => {
                let mut registers = to_normal(list, self.precision, self.sparse_precision);
                add_to_registers(&mut registers, tmp_set.iter().copied(), self.sparse_precision);
                registers
            }
            Mode::Normal(_) => return,
        };
        self.mode = Mode::Normal(registers);
    }

    /// Pending inserts held before they are merged into the sparse list.
    fn tmp_set_limit(&self) -> usize {
        ((1usize << self.precision) / 4).max(1)
    }

    /// Largest encoded sparse list, in bytes, before switching to normal mode.
    fn max_sparse_bytes(&self) -> usize {
        3 * (1usize << self.precision) / 4
    }
}

impl Default for HllSketch {
    fn default() -> Self {
        Self::new(DEFAULT_BIGQUERY_P, DEFAULT_BIGQUERY_P_PRIME)
    }
}

impl fmt::Debug for HllSketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut de = f.debug_struct("HllSketch");
        de.field("precision", &self.precision);
        de.field("sparse_precision", &self.sparse_precision);
        de.field("mode", &self.mode.name());
        match &self.mode {
            Mode::Sparse { list, tmp_set } => {
                de.field("entries", &list.len());
                de.field("sparse_bytes", &list.byte_len());
                de.field("pending", &tmp_set.len());
            }
            Mode::Normal(registers) => {
                de.field("num_zeros", &registers.num_zeros());
            }
        }
        de.finish()
    }
}

#[cfg(test)]
mod tests {
    use googletest::assert_that;
    use googletest::prelude::contains_substring;
    use googletest::prelude::near;

    use super::*;

    fn splitmix(seed: u64, count: usize) -> impl Iterator<Item = u64> {
        let mut state = seed;
        (0..count).map(move |_| {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^ (z >> 31)
        })
    }

    #[test]
    fn test_new_sketch_is_empty() {
        let mut sketch = HllSketch::new(15, 20);
        assert!(sketch.is_empty());
        assert!(sketch.is_sparse());
        assert_eq!(sketch.estimate(), 0.0);
        assert_eq!(sketch.cardinality(), 0);
    }

    #[test]
    fn test_try_new_rejects_bad_precisions() {
        let err = HllSketch::try_new(16, 15).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert!(HllSketch::try_new(4, 4).is_ok());
    }

    #[test]
    #[should_panic(expected = "precisions must satisfy")]
    fn test_new_panics_on_bad_precisions() {
        HllSketch::new(3, 20);
    }

    #[test]
    fn test_pending_inserts_are_flushed_before_estimate() {
        let mut sketch = HllSketch::new(15, 20);
        for hash in splitmix(1, 3) {
            sketch.update(hash);
        }
        match sketch.mode() {
            Mode::Sparse { list, tmp_set } => {
                assert!(list.is_empty());
                assert_eq!(tmp_set.len(), 3);
            }
            Mode::Normal(_) => panic!("expected sparse mode"),
        }

        assert_eq!(sketch.cardinality(), 3);
        match sketch.mode() {
            Mode::Sparse { list, tmp_set } => {
                assert_eq!(list.len(), 3);
                assert!(tmp_set.is_empty());
            }
            Mode::Normal(_) => panic!("expected sparse mode"),
        }
    }

    #[test]
    fn test_tmp_set_flushes_at_threshold() {
        let mut sketch = HllSketch::new(10, 16);
        // 1024 / 4 = 256 pending entries trigger a flush.
        for hash in splitmix(2, 256) {
            sketch.update(hash);
        }
        match sketch.mode() {
            Mode::Sparse { list, tmp_set } => {
                assert!(tmp_set.is_empty());
                assert!(list.len() > 250);
            }
            Mode::Normal(_) => panic!("expected sparse mode"),
        }
    }

    #[test]
    fn test_promotion_to_normal() {
        let mut sketch = HllSketch::new(10, 16);
        for hash in splitmix(3, 5000) {
            sketch.update(hash);
        }
        assert!(!sketch.is_sparse());
        assert_that!(sketch.estimate(), near(5000.0, 0.1 * 5000.0));
    }

    #[test]
    fn test_duplicates_are_idempotent() {
        let mut sketch = HllSketch::new(12, 20);
        let hashes: Vec<u64> = splitmix(4, 1000).collect();
        for &hash in &hashes {
            sketch.update(hash);
        }
        let before = sketch.estimate();
        for &hash in &hashes {
            sketch.update(hash);
            sketch.update(hash);
        }
        assert_eq!(sketch.estimate(), before);
    }

    #[test]
    fn test_normal_mode_updates_registers() {
        let mut sketch = HllSketch::new(4, 4);
        for hash in splitmix(5, 100) {
            sketch.update(hash);
        }
        assert!(!sketch.is_sparse());

        let hash = 0x3000_0000_0000_0001u64;
        sketch.update(hash);
        match sketch.mode() {
            Mode::Normal(registers) => assert!(registers.get(3) >= compute_rho_w(hash, 60)),
            Mode::Sparse { .. } => panic!("expected normal mode"),
        }
    }

    #[test]
    fn test_merge_rejects_different_precisions() {
        let mut left = HllSketch::new(14, 25);
        let right = HllSketch::new(14, 20);
        let err = left.merge(&right).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatiblePrecision);
        assert_that!(
            err.to_string().as_str(),
            contains_substring("other_sparse_precision: 20")
        );
    }

    #[test]
    fn test_merge_all_mode_combinations() {
        let build = |seed: u64, count: usize| {
            let mut sketch = HllSketch::new(10, 16);
            for hash in splitmix(seed, count) {
                sketch.update(hash);
            }
            sketch
        };
        let mut expected = build(6, 100);
        for hash in splitmix(7, 3000) {
            expected.update(hash);
        }
        let expected = expected.estimate();

        // sparse + normal
        let mut left = build(6, 100);
        let right = build(7, 3000);
        assert!(left.is_sparse() && !right.is_sparse());
        left.merge(&right).unwrap();
        assert!(!left.is_sparse());
        assert_eq!(left.estimate(), expected);

        // normal + sparse, with the sparse side still holding pending inserts
        let mut left = build(7, 3000);
        let right = build(6, 100);
        left.merge(&right).unwrap();
        assert_eq!(left.estimate(), expected);

        // sparse + sparse
        let mut left = build(6, 100);
        let right = build(8, 100);
        left.merge(&right).unwrap();
        assert!(left.is_sparse());
        let mut both = build(6, 100);
        for hash in splitmix(8, 100) {
            both.update(hash);
        }
        assert_eq!(left.estimate(), both.estimate());
    }

    #[test]
    fn test_debug_shows_shape_only() {
        let mut sketch = HllSketch::default();
        sketch.update(42);
        let debug = format!("{sketch:?}");
        assert_that!(debug.as_str(), contains_substring("mode: \"sparse\""));
        assert_that!(debug.as_str(), contains_substring("pending: 1"));
    }
}
