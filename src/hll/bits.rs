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

/// Returns a mask with bits `start..=end` set, counting from the least significant bit.
///
/// Requires `start <= end <= 63`.
///
/// # Examples
///
/// ```
/// use hllpp::hll::ones_from_to;
///
/// assert_eq!(ones_from_to(2, 4), 0b11100);
/// assert_eq!(ones_from_to(0, 63), u64::MAX);
/// ```
#[inline]
pub fn ones_from_to(start: u32, end: u32) -> u64 {
    debug_assert!(start <= end && end <= 63);
    let high_order_ones = u64::MAX << start;
    let low_order_ones = u64::MAX >> (63 - end);
    high_order_ones & low_order_ones
}

/// Mask of the lowest `n` bits of a word, `n <= 32`.
#[inline]
pub(super) fn low_bits_mask(n: u8) -> u32 {
    if n == 0 {
        0
    } else {
        ones_from_to(0, n as u32 - 1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ones_from_to() {
        assert_eq!(ones_from_to(0, 0), 1);
        assert_eq!(ones_from_to(63, 63), 1 << 63);
        assert_eq!(ones_from_to(2, 4), 28);
        assert_eq!(ones_from_to(56, 63), 0xFF00_0000_0000_0000);
        assert_eq!(ones_from_to(0, 63), u64::MAX);
        assert_eq!(ones_from_to(0, 31), u32::MAX as u64);
    }

    #[test]
    fn test_low_bits_mask() {
        assert_eq!(low_bits_mask(0), 0);
        assert_eq!(low_bits_mask(1), 1);
        assert_eq!(low_bits_mask(6), 63);
        assert_eq!(low_bits_mask(21), (1 << 21) - 1);
        assert_eq!(low_bits_mask(32), u32::MAX);
    }
}
