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

//! Cardinality estimators for both representations.
//!
//! - Sparse mode uses linear counting over the `2^p'` sparse buckets.
//! - Normal mode starts from the raw HyperLogLog harmonic mean over the `2^p` registers.
//!   Estimates up to `5m` have the empirical bias from the HyperLogLog++ paper subtracted.
//!   Linear counting takes over while the registers are mostly empty. Estimates approaching
//!   the size of the 64-bit hash space get a large-range correction.

use crate::hll::bias_data::BIAS_DATA;
use crate::hll::bias_data::RAW_ESTIMATE_DATA;
use crate::hll::registers::Registers;

/// Largest precision with empirical bias data and linear counting threshold.
const MAX_TABULATED_PRECISION: u8 = 18;

/// Size of the hash space.
const TWO_POW_64: f64 = 18446744073709551616.0;

/// Cardinality below which linear counting beats the bias-corrected estimate, per precision
/// `4..=18`, from the HyperLogLog++ paper.
const LINEAR_COUNTING_THRESHOLD: [f64; 15] = [
    10.0,     // precision 4
    20.0,     // precision 5
    40.0,     // precision 6
    80.0,     // precision 7
    220.0,    // precision 8
    400.0,    // precision 9
    900.0,    // precision 10
    1800.0,   // precision 11
    3100.0,   // precision 12
    6500.0,   // precision 13
    11500.0,  // precision 14
    20000.0,  // precision 15
    50000.0,  // precision 16
    120000.0, // precision 17
    350000.0, // precision 18
];

/// Estimates the cardinality of a sketch in normal mode.
pub(super) fn normal_estimate(registers: &Registers) -> f64 {
    let p = registers.precision();
    let m = registers.len() as f64;
    let sum = registers.inverse_power_sum();
    let zeros = registers.num_zeros();

    let mut estimate = raw_estimate(m, sum);
    if p <= MAX_TABULATED_PRECISION && estimate <= 5.0 * m {
        estimate -= estimate_bias(estimate, p);
    }

    if zeros > 0 {
        let lin_est = linear_counting(m, zeros as f64);
        if lin_est <= linear_counting_threshold(p, m) {
            return lin_est;
        }
    }

    if estimate > TWO_POW_64 / 30.0 && estimate < TWO_POW_64 {
        estimate = -TWO_POW_64 * (1.0 - estimate / TWO_POW_64).ln();
    }
    estimate
}

/// Estimates the cardinality of a sketch in sparse mode from its number of distinct sparse
/// indices, or `None` when every sparse bucket is taken and linear counting is undefined.
pub(super) fn sparse_estimate(p_prime: u8, num_entries: usize) -> Option<f64> {
    let m = (1u64 << p_prime) as f64;
    let empty = m - num_entries as f64;
    if empty <= 0.0 {
        return None;
    }
    Some(linear_counting(m, empty))
}

/// Raw HyperLogLog estimate: `alpha * m^2 / sum(2^-M[j])`.
fn raw_estimate(m: f64, sum: f64) -> f64 {
    alpha(m) * m * m / sum
}

/// Linear counting estimate over `m` buckets of which `empty` are unused.
fn linear_counting(m: f64, empty: f64) -> f64 {
    m * (m / empty).ln()
}

fn linear_counting_threshold(p: u8, m: f64) -> f64 {
    if p <= MAX_TABULATED_PRECISION {
        LINEAR_COUNTING_THRESHOLD[(p - 4) as usize]
    } else {
        2.5 * m
    }
}

fn alpha(m: f64) -> f64 {
    match m as u64 {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m),
    }
}

/// Empirical bias of the raw estimate `raw` at precision `p`, interpolated linearly between
/// the neighbouring points of the bias tables and clamped to their first and last entries.
///
/// The table rows are not strictly sorted, so the upper neighbour is the first entry not
/// below `raw`.
fn estimate_bias(raw: f64, p: u8) -> f64 {
    let estimates = RAW_ESTIMATE_DATA[(p - 4) as usize];
    let biases = BIAS_DATA[(p - 4) as usize];

    match estimates.iter().position(|&est| est >= raw) {
        Some(idx) if idx > 0 => {
            let prv = idx - 1;
            let ratio = (raw - estimates[prv]) / (estimates[idx] - estimates[prv]);
            biases[prv] + ratio * (biases[idx] - biases[prv])
        }
        Some(_) => biases[0],
        None => biases[biases.len() - 1],
    }
}
