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

//! Normal-mode register array: one byte per register.

use crate::error::Error;

/// The `2^p` registers of a sketch in normal mode.
///
/// Each register holds the largest run length observed for its index. Only the low six
/// bits are ever meaningful, but a whole byte per register keeps reads and writes direct
/// and matches the BigQuery `data` field byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    precision: u8,
    bytes: Box<[u8]>,
    num_zeros: u32,
}

impl Registers {
    /// Largest value a register may hold.
    pub const MAX_VALUE: u8 = 63;

    /// Creates `2^precision` zeroed registers.
    pub fn new(precision: u8) -> Self {
        let m = 1u32 << precision;
        Self {
            precision,
            bytes: vec![0u8; m as usize].into_boxed_slice(),
            num_zeros: m,
        }
    }

    /// Rebuilds registers from their serialized form, one byte per register.
    pub(super) fn from_bytes(precision: u8, bytes: Vec<u8>) -> Result<Self, Error> {
        let expected = 1usize << precision;
        if bytes.len() != expected {
            return Err(Error::deserial("normal data length must be 2^precision")
                .with_context("precision", precision)
                .with_context("expected", expected)
                .with_context("actual", bytes.len()));
        }
        if let Some(index) = bytes.iter().position(|&v| v > Self::MAX_VALUE) {
            return Err(Error::deserial("register value out of range")
                .with_context("index", index)
                .with_context("value", bytes[index]));
        }

        let num_zeros = bytes.iter().filter(|&&v| v == 0).count() as u32;
        Ok(Self {
            precision,
            bytes: bytes.into_boxed_slice(),
            num_zeros,
        })
    }

    /// Normal precision `p` of these registers.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Number of registers, `2^p`.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: there is at least one register.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Get value from a register
    #[inline]
    pub fn get(&self, index: u32) -> u8 {
        self.bytes[index as usize]
    }

    /// Set value in a register, unconditionally.
    #[inline]
    pub fn set(&mut self, index: u32, value: u8) {
        let slot = &mut self.bytes[index as usize];
        match (*slot == 0, value == 0) {
            (true, false) => self.num_zeros -= 1,
            (false, true) => self.num_zeros += 1,
            _ => {}
        }
        *slot = value;
    }

    /// Raises a register to `value` if it is currently lower. Returns whether it changed.
    #[inline]
    pub fn update_max(&mut self, index: u32, value: u8) -> bool {
        if value > self.get(index) {
            self.set(index, value);
            true
        } else {
            false
        }
    }

    /// Register-wise maximum with registers of the same precision.
    pub fn merge(&mut self, other: &Registers) {
        debug_assert_eq!(self.precision, other.precision);
        for (index, &value) in other.bytes.iter().enumerate() {
            self.update_max(index as u32, value);
        }
    }

    /// Get the number of zero-valued registers
    pub fn num_zeros(&self) -> u32 {
        self.num_zeros
    }

    /// Sum of `2^-M[j]` over all registers.
    ///
    /// Accumulated in two parts, values below 32 and the rest, so the tiny contributions of
    /// large registers are not lost against the large ones.
    pub fn inverse_power_sum(&self) -> f64 {
        let mut kxq0 = 0.0;
        let mut kxq1 = 0.0;
        for &value in self.bytes.iter() {
            if value < 32 {
                kxq0 += inv_pow2(value);
            } else {
                kxq1 += inv_pow2(value);
            }
        }
        kxq0 + kxq1
    }

    /// Register bytes in index order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Compute 1 / 2^value (inverse power of 2)
#[inline]
fn inv_pow2(value: u8) -> f64 {
    if value == 0 {
        1.0
    } else if value <= 63 {
        1.0 / (1u64 << value) as f64
    } else {
        f64::exp2(-(value as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_registers_basic() {
        let regs = Registers::new(10);

        assert_eq!(regs.get(0), 0);
        assert_eq!(regs.get(100), 0);
        assert_eq!(regs.get(1023), 0);
        assert_eq!(regs.num_zeros(), 1024);
        assert_eq!(regs.len(), 1024);
        assert_eq!(regs.precision(), 10);
        assert!(!regs.is_empty());
    }

    #[test]
    fn test_storage_calculation() {
        assert_eq!(Registers::new(4).len(), 16);
        assert_eq!(Registers::new(8).len(), 256);
        assert_eq!(Registers::new(14).len(), 16384);
    }

    #[test]
    fn test_get_set() {
        let mut regs = Registers::new(4);
        for index in 0..16 {
            regs.set(index, (index * 3) as u8);
        }
        for index in 0..16 {
            assert_eq!(regs.get(index), (index * 3) as u8);
        }
        // Index 0 was set to 0, everything else is non-zero.
        assert_eq!(regs.num_zeros(), 1);

        regs.set(5, 0);
        assert_eq!(regs.num_zeros(), 2);
    }

    #[test]
    fn test_update_max() {
        let mut regs = Registers::new(4);

        assert!(regs.update_max(0, 5));
        assert_eq!(regs.get(0), 5);

        // Smaller values are ignored
        assert!(!regs.update_max(0, 3));
        assert_eq!(regs.get(0), 5);

        assert!(regs.update_max(0, 42));
        assert_eq!(regs.get(0), 42);
        assert_eq!(regs.num_zeros(), 15);
    }

    #[test]
    fn test_merge_takes_max() {
        let mut left = Registers::new(4);
        let mut right = Registers::new(4);
        left.set(0, 3);
        left.set(1, 7);
        right.set(1, 2);
        right.set(2, 9);

        left.merge(&right);
        assert_eq!(&left.as_bytes()[..4], &[3, 7, 9, 0]);
        assert_eq!(left.num_zeros(), 13);
    }

    #[test]
    fn test_inverse_power_sum() {
        let mut regs = Registers::new(4);
        assert_eq!(regs.inverse_power_sum(), 16.0);

        regs.set(0, 1);
        regs.set(1, 2);
        regs.set(2, 40);
        let expected = 13.0 + 0.5 + 0.25 + f64::exp2(-40.0);
        assert_eq!(regs.inverse_power_sum(), expected);
    }

    #[test]
    fn test_from_bytes() {
        let mut bytes = vec![0u8; 16];
        bytes[3] = 7;
        let regs = Registers::from_bytes(4, bytes).unwrap();
        assert_eq!(regs.get(3), 7);
        assert_eq!(regs.num_zeros(), 15);

        let err = Registers::from_bytes(4, vec![0u8; 15]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);

        let err = Registers::from_bytes(4, vec![64u8; 16]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
    }
}
