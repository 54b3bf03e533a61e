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

//! HyperLogLog++ sketch implementation for cardinality estimation.
//!
//! This module provides a probabilistic data structure for estimating the cardinality
//! (number of distinct elements) of a stream of 64-bit hashes, using the representation
//! and encoding of BigQuery's `HLL_COUNT` functions.
//!
//! # Representations
//!
//! A sketch starts in sparse mode and moves to normal mode once the sparse form would cost
//! more than three quarters of the dense array. The move is one-way.
//!
//! - **Sparse**: a sorted, difference-encoded list of encoded entries at the sparse precision
//!   `p'`, plus an unsorted buffer of recent inserts that is periodically merged into it.
//! - **Normal**: `2^p` byte registers, each holding the largest run length seen for its index.
//!
//! # Encoded entries
//!
//! A sparse entry is a 32-bit value. When the low `p' - p` bits of the sparse index are not all
//! zero, the run length at precision `p` can be recomputed from those bits and the entry is
//! just the sparse index. Otherwise the entry sets a flag bit above the index bits and packs
//! the normal index together with a 6-bit run length.
//!
//! # Examples
//!
//! ```
//! use hllpp::hll::HllSketch;
//!
//! let mut left = HllSketch::new(14, 25);
//! let mut right = HllSketch::new(14, 25);
//! for i in 0..500 {
//!     left.update_bytes(format!("a{i}").as_bytes());
//!     right.update_bytes(format!("b{i}").as_bytes());
//! }
//! left.merge(&right).unwrap();
//! assert!((left.estimate() - 1000.0).abs() < 20.0);
//! ```

mod bias_data;
mod bits;
mod encoding;
mod estimator;
mod mode;
mod registers;
mod serialization;
mod sketch;
mod sparse;

use crate::error::Error;

pub use bits::ones_from_to;
pub use encoding::compute_rho_w;
pub use encoding::decode_sparse_hash;
pub use encoding::decode_sparse_hash_for_normal;
pub use encoding::encode;
pub use encoding::encode_sparse_hash;
pub use encoding::sort_hashcodes_by_index;
pub use registers::Registers;
pub use sketch::HllSketch;
pub use sparse::SparseIter;
pub use sparse::SparseList;
pub use sparse::merge;
pub use sparse::to_normal;

/// Normal precision used by BigQuery when none is given.
pub const DEFAULT_BIGQUERY_P: u8 = 15;
/// Sparse precision used by BigQuery when none is given.
pub const DEFAULT_BIGQUERY_P_PRIME: u8 = 20;

/// Smallest supported normal precision.
pub const MIN_PRECISION: u8 = 4;
/// Largest supported sparse precision. Encoded entries, flag bit included, must fit 32 bits.
pub const MAX_SPARSE_PRECISION: u8 = 25;

/// Number of bits holding the run length in a flagged sparse entry.
const RHOW_BITS: u8 = 6;

/// Checks `MIN_PRECISION <= p <= p_prime <= MAX_SPARSE_PRECISION`.
fn check_precisions(p: u8, p_prime: u8) -> Result<(), Error> {
    if (MIN_PRECISION..=MAX_SPARSE_PRECISION).contains(&p)
        && (p..=MAX_SPARSE_PRECISION).contains(&p_prime)
    {
        Ok(())
    } else {
        Err(Error::invalid_precision(p, p_prime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_check_precisions() {
        assert!(check_precisions(4, 4).is_ok());
        assert!(check_precisions(15, 20).is_ok());
        assert!(check_precisions(25, 25).is_ok());
        assert!(check_precisions(DEFAULT_BIGQUERY_P, DEFAULT_BIGQUERY_P_PRIME).is_ok());

        for (p, p_prime) in [(3, 20), (0, 0), (15, 14), (15, 26), (26, 26)] {
            let err = check_precisions(p, p_prime).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ConfigInvalid, "({p}, {p_prime})");
        }
    }
}
