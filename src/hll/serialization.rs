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

//! BigQuery / zetasketch wire format.
//!
//! A BigQuery HLL++ sketch is an `AggregatorStateProto` whose HLL++ state sits in extension
//! field 112. Only the fields read or written below are understood; anything else is skipped
//! according to its wire type.
//!
//! ```text
//! AggregatorStateProto {
//!   1: type             varint   (112 = HYPERLOGLOG_PLUS_UNIQUE)
//!   2: num_values       varint
//!   3: encoding_version varint   (2)
//!   4: value_type       varint
//!   112: HyperLogLogPlusUniqueStateProto {
//!     2: sparse_size        varint
//!     3: precision_or_num_buckets varint
//!     4: sparse_precision_or_num_buckets varint
//!     5: data               bytes  (one byte per register)
//!     6: sparse_data        bytes  (difference-encoded varints, numeric order)
//!   }
//! }
//! ```

use protobuf::CodedInputStream;
use protobuf::CodedOutputStream;

use crate::error::Error;
use crate::error::ErrorKind;
use crate::hll::DEFAULT_BIGQUERY_P;
use crate::hll::DEFAULT_BIGQUERY_P_PRIME;
use crate::hll::check_precisions;
use crate::hll::encoding::decode_sparse_hash;
use crate::hll::encoding::is_valid_entry;
use crate::hll::encoding::sort_hashcodes_by_index;
use crate::hll::mode::Mode;
use crate::hll::registers::Registers;
use crate::hll::sketch::HllSketch;
use crate::hll::sparse::SparseList;
use crate::hll::sparse::merge;

const HYPERLOGLOG_PLUS_UNIQUE: u64 = 112;
const ENCODING_VERSION: u64 = 2;

const FIELD_TYPE: u32 = 1;
const FIELD_NUM_VALUES: u32 = 2;
const FIELD_ENCODING_VERSION: u32 = 3;
const FIELD_VALUE_TYPE: u32 = 4;
const FIELD_HLL_STATE: u32 = 112;

const FIELD_SPARSE_SIZE: u32 = 2;
const FIELD_PRECISION: u32 = 3;
const FIELD_SPARSE_PRECISION: u32 = 4;
const FIELD_DATA: u32 = 5;
const FIELD_SPARSE_DATA: u32 = 6;

const WIRE_TYPE_VARINT: u32 = 0;
const WIRE_TYPE_FIXED64: u32 = 1;
const WIRE_TYPE_LENGTH_DELIMITED: u32 = 2;
const WIRE_TYPE_FIXED32: u32 = 5;

const MAX_VARINT_LEN: usize = 10;

/// HLL++ fields as they appear on the wire, before validation.
#[derive(Debug, Default)]
struct HllState {
    sparse_size: u64,
    precision: u64,
    sparse_precision: u64,
    data: Vec<u8>,
    sparse_data: Vec<u8>,
}

fn malformed(err: protobuf::Error) -> Error {
    Error::deserial("malformed protobuf message").set_source(err)
}

/// Reads the next tag, or `None` at the end of the message.
///
/// A tag varint cut off by the end of the buffer also ends the message.
fn read_tag(input: &mut CodedInputStream<'_>, bytes: &[u8]) -> Result<Option<u32>, Error> {
    let pos = input.pos() as usize;
    match input.read_raw_tag_or_eof() {
        Ok(tag) => Ok(tag),
        Err(err) => {
            let rest = bytes.get(pos..).unwrap_or_default();
            if rest.len() < MAX_VARINT_LEN && rest.iter().all(|b| b & 0x80 != 0) {
                Ok(None)
            } else {
                Err(malformed(err))
            }
        }
    }
}

fn split_tag(tag: u32) -> (u32, u32) {
    (tag >> 3, tag & 7)
}

fn check_wire_type(field: u32, expected: u32, actual: u32) -> Result<(), Error> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::unexpected_wire_type(field, expected, actual))
    }
}

fn read_varint_field(
    input: &mut CodedInputStream<'_>,
    field: u32,
    wire_type: u32,
) -> Result<u64, Error> {
    check_wire_type(field, WIRE_TYPE_VARINT, wire_type)?;
    input.read_uint64().map_err(malformed)
}

fn read_bytes_field(
    input: &mut CodedInputStream<'_>,
    field: u32,
    wire_type: u32,
) -> Result<Vec<u8>, Error> {
    check_wire_type(field, WIRE_TYPE_LENGTH_DELIMITED, wire_type)?;
    input.read_bytes().map_err(malformed)
}

fn skip_field(input: &mut CodedInputStream<'_>, field: u32, wire_type: u32) -> Result<(), Error> {
    match wire_type {
        WIRE_TYPE_VARINT => input.read_raw_varint64().map(drop),
        WIRE_TYPE_FIXED64 => input.read_fixed64().map(drop),
        WIRE_TYPE_LENGTH_DELIMITED => input.read_bytes().map(drop),
        WIRE_TYPE_FIXED32 => input.read_fixed32().map(drop),
        _ => {
            return Err(Error::new(ErrorKind::UnexpectedWireType, "unsupported wire type")
                .with_context("field", field)
                .with_context("actual", wire_type));
        }
    }
    .map_err(malformed)
}

fn precision_from_wire(field: &'static str, value: u64) -> Result<u8, Error> {
    u8::try_from(value).map_err(|_| {
        Error::new(ErrorKind::ConfigInvalid, "precision out of range")
            .with_context("field", field)
            .with_context("value", value)
    })
}

fn parse_hll_state(bytes: &[u8]) -> Result<HllState, Error> {
    let mut input = CodedInputStream::from_bytes(bytes);
    let mut state = HllState::default();
    while let Some(tag) = read_tag(&mut input, bytes)? {
        let (field, wire_type) = split_tag(tag);
        match field {
            FIELD_SPARSE_SIZE => {
                state.sparse_size = read_varint_field(&mut input, field, wire_type)?
            }
            FIELD_PRECISION => state.precision = read_varint_field(&mut input, field, wire_type)?,
            FIELD_SPARSE_PRECISION => {
                state.sparse_precision = read_varint_field(&mut input, field, wire_type)?
            }
            FIELD_DATA => state.data = read_bytes_field(&mut input, field, wire_type)?,
            FIELD_SPARSE_DATA => {
                state.sparse_data = read_bytes_field(&mut input, field, wire_type)?
            }
            _ => skip_field(&mut input, field, wire_type)?,
        }
    }
    Ok(state)
}

/// Decodes an `AggregatorStateProto` holding an HLL++ sketch.
pub(super) fn decode(bytes: &[u8]) -> Result<HllSketch, Error> {
    if bytes.is_empty() {
        return Ok(HllSketch::new(DEFAULT_BIGQUERY_P, DEFAULT_BIGQUERY_P_PRIME));
    }

    let mut input = CodedInputStream::from_bytes(bytes);
    let mut sketch_type = None;
    let mut encoding_version = None;
    let mut hll_state = None;
    while let Some(tag) = read_tag(&mut input, bytes)? {
        let (field, wire_type) = split_tag(tag);
        match field {
            FIELD_TYPE => sketch_type = Some(read_varint_field(&mut input, field, wire_type)?),
            FIELD_NUM_VALUES | FIELD_VALUE_TYPE => {
                read_varint_field(&mut input, field, wire_type)?;
            }
            FIELD_ENCODING_VERSION => {
                encoding_version = Some(read_varint_field(&mut input, field, wire_type)?)
            }
            FIELD_HLL_STATE => {
                let payload = read_bytes_field(&mut input, field, wire_type)?;
                hll_state = Some(parse_hll_state(&payload)?);
            }
            _ => skip_field(&mut input, field, wire_type)?,
        }
    }

    let sketch_type = sketch_type.unwrap_or_default();
    if sketch_type != HYPERLOGLOG_PLUS_UNIQUE {
        return Err(Error::unsupported_sketch_type(
            HYPERLOGLOG_PLUS_UNIQUE,
            sketch_type,
        ));
    }
    let encoding_version = encoding_version.unwrap_or_default();
    if encoding_version != ENCODING_VERSION {
        return Err(Error::unsupported_encoding_version(
            ENCODING_VERSION,
            encoding_version,
        ));
    }

    let state = hll_state.unwrap_or_default();
    sketch_from_state(state)
}

fn sketch_from_state(state: HllState) -> Result<HllSketch, Error> {
    let precision = precision_from_wire("precision", state.precision)?;
    let sparse_precision = match state.sparse_precision {
        0 => precision,
        value => precision_from_wire("sparse_precision", value)?,
    };
    check_precisions(precision, sparse_precision)?;

    let has_data = !state.data.is_empty();
    let has_sparse_data = !state.sparse_data.is_empty();
    let mode = match (has_data, has_sparse_data) {
        (true, true) => {
            return Err(Error::new(
                ErrorKind::ConflictingRepresentation,
                "sketch carries both normal and sparse data",
            ));
        }
        (true, false) => Mode::Normal(Registers::from_bytes(precision, state.data)?),
        (false, _) => {
            let sparse_size = u32::try_from(state.sparse_size).map_err(|_| {
                Error::deserial("sparse size out of range")
                    .with_context("sparse_size", state.sparse_size)
            })?;
            let list = SparseList::from_raw(state.sparse_data, sparse_size)?;
            Mode::sparse(index_ordered(list, precision, sparse_precision)?)
        }
    };

    Ok(HllSketch::from_parts(precision, sparse_precision, mode))
}

/// Validates imported sparse entries and rebuilds the list in index order when the input
/// was written in numeric order.
fn index_ordered(list: SparseList, p: u8, p_prime: u8) -> Result<SparseList, Error> {
    let mut in_index_order = true;
    let mut last_index = None;
    for (i, encoded) in list.iter().enumerate() {
        if !is_valid_entry(encoded, p, p_prime) {
            return Err(Error::deserial("invalid sparse entry")
                .with_context("entry", i)
                .with_context("value", encoded));
        }
        let (index, _) = decode_sparse_hash(encoded, p, p_prime);
        if last_index.is_some_and(|last| last >= index) {
            in_index_order = false;
        }
        last_index = Some(index);
    }

    if in_index_order {
        return Ok(list);
    }

    let mut entries: Vec<u32> = list.iter().collect();
    sort_hashcodes_by_index(&mut entries, p, p_prime);
    Ok(merge(
        p,
        p_prime,
        list.byte_len(),
        entries,
        std::iter::empty::<u32>(),
    ))
}

/// Encodes a flushed sketch as an `AggregatorStateProto`.
pub(super) fn encode(sketch: &HllSketch) -> Result<Vec<u8>, Error> {
    let mut state = Vec::new();
    {
        let mut output = CodedOutputStream::vec(&mut state);
        write_hll_state(&mut output, sketch).map_err(serialize_failed)?;
        output.flush().map_err(serialize_failed)?;
    }

    let mut bytes = Vec::with_capacity(state.len() + 16);
    {
        let mut output = CodedOutputStream::vec(&mut bytes);
        write_aggregator_state(&mut output, &state).map_err(serialize_failed)?;
        output.flush().map_err(serialize_failed)?;
    }
    Ok(bytes)
}

fn serialize_failed(err: protobuf::Error) -> Error {
    Error::new(ErrorKind::MalformedDeserializeData, "failed to write protobuf message")
        .set_source(err)
}

fn write_aggregator_state(
    output: &mut CodedOutputStream<'_>,
    hll_state: &[u8],
) -> protobuf::Result<()> {
    output.write_uint64(FIELD_TYPE, HYPERLOGLOG_PLUS_UNIQUE)?;
    output.write_uint64(FIELD_NUM_VALUES, 0)?;
    output.write_uint64(FIELD_ENCODING_VERSION, ENCODING_VERSION)?;
    output.write_uint64(FIELD_VALUE_TYPE, 0)?;
    output.write_bytes(FIELD_HLL_STATE, hll_state)
}

fn write_hll_state(output: &mut CodedOutputStream<'_>, sketch: &HllSketch) -> protobuf::Result<()> {
    if let Mode::Sparse { list, .. } = sketch.mode() {
        output.write_uint64(FIELD_SPARSE_SIZE, list.len() as u64)?;
    }
    output.write_uint64(FIELD_PRECISION, u64::from(sketch.precision()))?;
    output.write_uint64(FIELD_SPARSE_PRECISION, u64::from(sketch.sparse_precision()))?;
    match sketch.mode() {
        Mode::Sparse { list, .. } => {
            if !list.is_empty() {
                output.write_bytes(FIELD_SPARSE_DATA, &list.to_numeric_order_bytes())?;
            }
        }
        Mode::Normal(registers) => output.write_bytes(FIELD_DATA, registers.as_bytes())?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use googletest::assert_that;
    use googletest::prelude::contains_substring;

    use super::*;
    use crate::hll::encoding::encode;

    fn tag(field: u32, wire_type: u32) -> u8 {
        ((field << 3) | wire_type) as u8
    }

    fn wrap(hll_state: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut output = CodedOutputStream::vec(&mut bytes);
        write_aggregator_state(&mut output, hll_state).unwrap();
        output.flush().unwrap();
        drop(output);
        bytes
    }

    fn sparse_state(p: u8, p_prime: u8, sparse_size: u64, sparse_data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let mut output = CodedOutputStream::vec(&mut bytes);
        output.write_uint64(FIELD_SPARSE_SIZE, sparse_size).unwrap();
        output.write_uint64(FIELD_PRECISION, u64::from(p)).unwrap();
        output
            .write_uint64(FIELD_SPARSE_PRECISION, u64::from(p_prime))
            .unwrap();
        output.write_bytes(FIELD_SPARSE_DATA, sparse_data).unwrap();
        output.flush().unwrap();
        drop(output);
        bytes
    }

    #[test]
    fn test_empty_input_is_default_sketch() {
        let sketch = decode(&[]).unwrap();
        assert_eq!(sketch.precision(), 15);
        assert_eq!(sketch.sparse_precision(), 20);
        assert!(sketch.is_sparse());
        assert!(sketch.is_empty());
    }

    #[test]
    fn test_header_layout() {
        let mut sketch = HllSketch::new(15, 20);
        let bytes = sketch.to_bigquery().unwrap();
        // type, num_values, encoding_version, value_type, then field 112 (two-byte tag)
        assert_eq!(
            &bytes[..10],
            &[0x08, 0x70, 0x10, 0x00, 0x18, 0x02, 0x20, 0x00, 0x82, 0x07]
        );
        let len = bytes[10] as usize;
        assert_eq!(bytes.len(), 11 + len);
        // precision 15, sparse precision 20
        assert_eq!(&bytes[11..], &[0x10, 0x00, 0x18, 0x0f, 0x20, 0x14]);
    }

    #[test]
    fn test_rejects_wrong_sketch_type() {
        let bytes = [tag(FIELD_TYPE, WIRE_TYPE_VARINT), 100];
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedSketchType);
        assert_that!(err.to_string().as_str(), contains_substring("type: 100"));
    }

    #[test]
    fn test_rejects_wrong_encoding_version() {
        let bytes = [
            tag(FIELD_TYPE, WIRE_TYPE_VARINT),
            112,
            tag(FIELD_ENCODING_VERSION, WIRE_TYPE_VARINT),
            1,
        ];
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedEncodingVersion);
    }

    #[test]
    fn test_rejects_unexpected_wire_type() {
        let bytes = [tag(FIELD_TYPE, WIRE_TYPE_LENGTH_DELIMITED), 1, 0];
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedWireType);

        let state = [tag(FIELD_PRECISION, WIRE_TYPE_FIXED32), 0, 0, 0, 0];
        let err = decode(&wrap(&state)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedWireType);
        assert_that!(err.to_string().as_str(), contains_substring("field: 3"));
    }

    #[test]
    fn test_rejects_truncated_input() {
        let mut sketch = HllSketch::new(10, 16);
        for i in 0..100u32 {
            sketch.update_bytes(&i.to_le_bytes());
        }
        let bytes = sketch.to_bigquery().unwrap();
        let err = decode(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
    }

    #[test]
    fn test_truncated_trailing_tag_ends_message() {
        let mut sketch = HllSketch::new(10, 16);
        for i in 0..100u32 {
            sketch.update_bytes(&i.to_le_bytes());
        }
        let mut bytes = sketch.to_bigquery().unwrap();
        bytes.push(0x82);
        assert_eq!(decode(&bytes).unwrap().cardinality(), sketch.cardinality());

        let mut state = sparse_state(10, 16, 1, &[encode(3, 0, 10, 16) as u8]);
        state.extend_from_slice(&[0x82, 0x80]);
        let mut restored = decode(&wrap(&state)).unwrap();
        assert_eq!(restored.precision(), 10);
        assert_eq!(restored.sparse_precision(), 16);
        assert_eq!(restored.cardinality(), 1);
    }

    #[test]
    fn test_rejects_overlong_trailing_tag() {
        let mut bytes = HllSketch::new(15, 20).to_bigquery().unwrap();
        bytes.extend_from_slice(&[0x80; MAX_VARINT_LEN]);
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
    }

    #[test]
    fn test_rejects_conflicting_representation() {
        let mut state = Vec::new();
        let mut output = CodedOutputStream::vec(&mut state);
        output.write_uint64(FIELD_SPARSE_SIZE, 1).unwrap();
        output.write_uint64(FIELD_PRECISION, 4).unwrap();
        output.write_uint64(FIELD_SPARSE_PRECISION, 4).unwrap();
        output.write_bytes(FIELD_DATA, &[0u8; 16]).unwrap();
        output
            .write_bytes(FIELD_SPARSE_DATA, &[encode(1, 1, 4, 4) as u8])
            .unwrap();
        output.flush().unwrap();
        drop(output);

        let err = decode(&wrap(&state)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConflictingRepresentation);
    }

    #[test]
    fn test_rejects_invalid_precisions() {
        let state = [
            tag(FIELD_PRECISION, WIRE_TYPE_VARINT),
            15,
            tag(FIELD_SPARSE_PRECISION, WIRE_TYPE_VARINT),
            26,
        ];
        let err = decode(&wrap(&state)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let state = [tag(FIELD_PRECISION, WIRE_TYPE_VARINT), 0xac, 0x02];
        let err = decode(&wrap(&state)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_missing_sparse_precision_defaults_to_precision() {
        let state = [tag(FIELD_PRECISION, WIRE_TYPE_VARINT), 12];
        let sketch = decode(&wrap(&state)).unwrap();
        assert_eq!(sketch.precision(), 12);
        assert_eq!(sketch.sparse_precision(), 12);
    }

    #[test]
    fn test_rejects_wrong_register_count() {
        let state = [
            tag(FIELD_PRECISION, WIRE_TYPE_VARINT),
            4,
            tag(FIELD_DATA, WIRE_TYPE_LENGTH_DELIMITED),
            3,
            1,
            2,
            3,
        ];
        let err = decode(&wrap(&state)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
    }

    #[test]
    fn test_rejects_sparse_size_mismatch() {
        let entry = encode(3, 0, 10, 16) as u8;
        let state = sparse_state(10, 16, 2, &[entry]);
        let err = decode(&wrap(&state)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
    }

    #[test]
    fn test_skips_unknown_fields() {
        let mut sketch = HllSketch::new(10, 16);
        for i in 0..50u32 {
            sketch.update_bytes(&i.to_le_bytes());
        }
        let expected = sketch.estimate();
        let mut bytes = sketch.to_bigquery().unwrap();
        // fixed64 field 9, fixed32 field 10, bytes field 11, varint field 12
        bytes.extend_from_slice(&[tag(9, WIRE_TYPE_FIXED64), 1, 2, 3, 4, 5, 6, 7, 8]);
        bytes.extend_from_slice(&[tag(10, WIRE_TYPE_FIXED32), 1, 2, 3, 4]);
        bytes.extend_from_slice(&[tag(11, WIRE_TYPE_LENGTH_DELIMITED), 2, 0xff, 0xff]);
        bytes.extend_from_slice(&[tag(12, WIRE_TYPE_VARINT), 0x80, 0x01]);

        let mut decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.estimate(), expected);
    }

    #[test]
    fn test_sparse_data_is_written_in_numeric_order() {
        let (p, p_prime) = (10, 16);
        // Index order puts the flagged entry for index 64 between 63 and 65, numeric order
        // puts it last.
        let entries = [
            encode(63, 0, p, p_prime),
            encode(64, 2, p, p_prime),
            encode(65, 0, p, p_prime),
        ];
        let list = merge(p, p_prime, 0, entries, std::iter::empty::<u32>());
        let mut sketch = HllSketch::from_parts(p, p_prime, Mode::sparse(list));

        let bytes = sketch.to_bigquery().unwrap();
        let decoded = decode(&bytes).unwrap();
        match decoded.mode() {
            Mode::Sparse { list, .. } => {
                let got: Vec<u32> = list.iter().collect();
                assert_eq!(got, entries);
            }
            Mode::Normal(_) => panic!("expected sparse mode"),
        }

        let mut numeric = entries;
        numeric.sort_unstable();
        assert_eq!(numeric[2], encode(64, 2, p, p_prime));
    }

    #[test]
    fn test_rejects_invalid_sparse_entry() {
        // An unflagged entry must fit in p' bits.
        let state = sparse_state(10, 16, 1, &[0x80, 0x80, 0x08]);
        let err = decode(&wrap(&state)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
        assert_that!(err.to_string().as_str(), contains_substring("invalid sparse entry"));
    }

    #[test]
    fn test_normal_round_trip() {
        let mut sketch = HllSketch::new(4, 10);
        for i in 0..200u32 {
            sketch.update_bytes(&i.to_le_bytes());
        }
        assert!(!sketch.is_sparse());

        let bytes = sketch.to_bigquery().unwrap();
        let decoded = decode(&bytes).unwrap();
        match (sketch.mode(), decoded.mode()) {
            (Mode::Normal(expected), Mode::Normal(actual)) => assert_eq!(actual, expected),
            _ => panic!("expected normal mode"),
        }
    }
}
