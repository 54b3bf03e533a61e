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

use std::io;
use std::io::Cursor;
use std::io::Read;

/// Maximum number of bytes an unsigned LEB128 encoded `u32` occupies.
pub(crate) const MAX_VARINT32_LEN: usize = 5;

#[derive(Debug, Clone, Default)]
pub(crate) struct SketchBytes {
    bytes: Vec<u8>,
}

impl SketchBytes {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn write_u8(&mut self, n: u8) {
        self.bytes.push(n);
    }

    /// Writes `n` as an unsigned LEB128 varint, seven bits per byte, low bits first.
    pub fn write_varint_u32(&mut self, mut n: u32) {
        while n >= 0x80 {
            self.write_u8((n as u8) | 0x80);
            n >>= 7;
        }
        self.write_u8(n as u8);
    }
}

/// Number of bytes [`SketchBytes::write_varint_u32`] emits for `n`.
pub(crate) fn varint_u32_len(n: u32) -> usize {
    match n {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0x0fff_ffff => 4,
        _ => MAX_VARINT32_LEN,
    }
}

#[derive(Debug)]
pub(crate) struct SketchSlice<'a> {
    slice: Cursor<&'a [u8]>,
}

impl SketchSlice<'_> {
    pub fn new(slice: &[u8]) -> SketchSlice<'_> {
        SketchSlice {
            slice: Cursor::new(slice),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.slice.position() as usize >= self.slice.get_ref().len()
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.slice.read_exact(buf)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads an unsigned LEB128 varint that must fit in 32 bits.
    pub fn read_varint_u32(&mut self) -> io::Result<u32> {
        let mut result = 0u32;
        for i in 0..MAX_VARINT32_LEN {
            let byte = self.read_u8()?;
            let payload = (byte & 0x7f) as u32;
            if i == MAX_VARINT32_LEN - 1 && payload > 0x0f {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "varint overflows 32 bits",
                ));
            }
            result |= payload << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "varint is longer than 5 bytes",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        for (value, len) in [
            (0u32, 1),
            (0x7f, 1),
            (0x80, 2),
            (0x3fff, 2),
            (0x4000, 3),
            (0x1f_ffff, 3),
            (0x20_0000, 4),
            (0x0fff_ffff, 4),
            (0x1000_0000, 5),
            (u32::MAX, 5),
        ] {
            let mut bytes = SketchBytes::default();
            bytes.write_varint_u32(value);
            assert_eq!(bytes.len(), len, "encoded length of {value:#x}");
            assert_eq!(varint_u32_len(value), len);

            let mut slice = SketchSlice::new(bytes.as_slice());
            assert_eq!(slice.read_varint_u32().unwrap(), value);
            assert!(slice.is_exhausted());
        }
    }

    #[test]
    fn test_varint_known_encoding() {
        let mut bytes = SketchBytes::with_capacity(2);
        bytes.write_varint_u32(300);
        assert_eq!(bytes.into_bytes(), vec![0xac, 0x02]);
    }

    #[test]
    fn test_truncated_varint() {
        let mut slice = SketchSlice::new(&[0x80, 0x80]);
        let err = slice.read_varint_u32().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_overlong_varint() {
        let mut slice = SketchSlice::new(&[0xff, 0xff, 0xff, 0xff, 0x1f]);
        let err = slice.read_varint_u32().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut slice = SketchSlice::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(slice.read_varint_u32().is_err());
    }
}
