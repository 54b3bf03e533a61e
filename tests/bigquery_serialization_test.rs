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

use googletest::assert_that;
use googletest::prelude::contains_substring;
use googletest::prelude::near;
use hllpp::error::ErrorKind;
use hllpp::hll::HllSketch;

/// "apple", "banana" and "cherry" at precisions (15, 20), as written by `to_bigquery`.
const FRUIT_SKETCH: [u8; 28] = [
    0x08, 0x70, 0x10, 0x00, 0x18, 0x02, 0x20, 0x00, 0x82, 0x07, 0x11, 0x10, 0x03, 0x18, 0x0f,
    0x20, 0x14, 0x32, 0x09, 0xd6, 0x83, 0x0b, 0xe0, 0x93, 0x0d, 0xf3, 0xc8, 0x10,
];

fn build(
    precision: u8,
    sparse_precision: u8,
    values: impl IntoIterator<Item = String>,
) -> HllSketch {
    let mut sketch = HllSketch::new(precision, sparse_precision);
    for value in values {
        sketch.update_bytes(value.as_bytes());
    }
    sketch
}

#[test]
fn test_export_matches_known_bytes() {
    let mut sketch = build(15, 20, ["apple", "banana", "cherry"].map(String::from));
    assert_eq!(sketch.to_bigquery().unwrap(), FRUIT_SKETCH);
}

#[test]
fn test_import_known_bytes() {
    let mut sketch = HllSketch::from_bigquery(&FRUIT_SKETCH).unwrap();
    assert_eq!(sketch.precision(), 15);
    assert_eq!(sketch.sparse_precision(), 20);
    assert!(sketch.is_sparse());
    assert_eq!(sketch.cardinality(), 3);

    // Re-adding a value already in the sketch changes nothing.
    sketch.update_bytes(b"banana");
    assert_eq!(sketch.cardinality(), 3);
    sketch.update_bytes(b"durian");
    assert_eq!(sketch.cardinality(), 4);
}

/// A sparse sketch at precisions (15, 20) laid out the way BigQuery writes one: three values
/// with value type 11, and sparse entries in ascending numeric order. The entries are sparse
/// indices 1000 and 300001, then a flagged entry for normal index 2 (sparse index 64) with run
/// length 3, which is numerically last but first by index.
const EXTERNAL_SKETCH: [u8; 27] = [
    0x08, 0x70, 0x10, 0x03, 0x18, 0x02, 0x20, 0x0b, 0x82, 0x07, 0x10, 0x10, 0x03, 0x18, 0x0f,
    0x20, 0x14, 0x32, 0x08, 0xe8, 0x07, 0xf9, 0x9f, 0x12, 0xa2, 0xd9, 0x6d,
];

#[test]
fn test_import_external_sparse_layout() {
    let mut sketch = HllSketch::from_bigquery(&EXTERNAL_SKETCH).unwrap();
    assert_eq!(sketch.precision(), 15);
    assert_eq!(sketch.sparse_precision(), 20);
    assert!(sketch.is_sparse());
    assert_eq!(sketch.cardinality(), 3);

    // Same sparse index as the first entry.
    sketch.update(1000u64 << 44 | 1);
    assert_eq!(sketch.cardinality(), 3);
    // Sparse index 64 again, with run length 4: replaces the flagged entry.
    sketch.update(64u64 << 44 | 1 << 40);
    assert!(sketch.is_sparse());
    assert_eq!(sketch.cardinality(), 3);

    // Written back in numeric order, with the flagged entry now carrying run length 4.
    let bytes = sketch.to_bigquery().unwrap();
    assert_eq!(
        bytes,
        [
            0x08, 0x70, 0x10, 0x00, 0x18, 0x02, 0x20, 0x00, 0x82, 0x07, 0x10, 0x10, 0x03, 0x18,
            0x0f, 0x20, 0x14, 0x32, 0x08, 0xe8, 0x07, 0xf9, 0x9f, 0x12, 0xa3, 0xd9, 0x6d,
        ]
    );
}

#[test]
fn test_sparse_round_trip() {
    let mut sketch = build(14, 25, (0..2000).map(|i| format!("id-{i}")));
    assert!(sketch.is_sparse());
    let expected = sketch.estimate();

    let bytes = sketch.to_bigquery().unwrap();
    let mut restored = HllSketch::from_bigquery(&bytes).unwrap();
    assert!(restored.is_sparse());
    assert_eq!(restored.estimate(), expected);
    assert_eq!(restored.to_bigquery().unwrap(), bytes);
}

#[test]
fn test_normal_round_trip() {
    let mut sketch = build(12, 20, (0..100_000).map(|i| i.to_string()));
    assert!(!sketch.is_sparse());
    let expected = sketch.estimate();
    assert_that!(expected, near(100_000.0, 0.05 * 100_000.0));

    let bytes = sketch.to_bigquery().unwrap();
    // header, field 112 length, precisions, data tag and length, registers
    assert_eq!(bytes.len(), 10 + 2 + 4 + 3 + 4096);

    let mut restored = HllSketch::from_bigquery(&bytes).unwrap();
    assert!(!restored.is_sparse());
    assert_eq!(restored.estimate(), expected);
}

#[test]
fn test_merge_imported_sketches() {
    let mut left = build(15, 20, (0..5000).map(|i| format!("a{i}")));
    let mut right = build(15, 20, (0..5000).map(|i| format!("b{i}")));
    let mut union = build(15, 20, (0..5000).flat_map(|i| [format!("a{i}"), format!("b{i}")]));

    let mut merged = HllSketch::from_bigquery(&left.to_bigquery().unwrap()).unwrap();
    merged
        .merge(&HllSketch::from_bigquery(&right.to_bigquery().unwrap()).unwrap())
        .unwrap();

    assert_eq!(merged.estimate(), union.estimate());
    assert_eq!(merged.to_bigquery().unwrap(), union.to_bigquery().unwrap());
}

#[test]
fn test_empty_input() {
    let mut sketch = HllSketch::from_bigquery(&[]).unwrap();
    assert_eq!(sketch.precision(), 15);
    assert_eq!(sketch.sparse_precision(), 20);
    assert_eq!(sketch.cardinality(), 0);
}

#[test]
fn test_invalid_inputs() {
    let err = HllSketch::from_bigquery(&[0x08, 0x71]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedSketchType);

    let mut bytes = FRUIT_SKETCH;
    bytes[5] = 0x01;
    let err = HllSketch::from_bigquery(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedEncodingVersion);

    let err = HllSketch::from_bigquery(&FRUIT_SKETCH[..20]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
    assert_that!(err.to_string().as_str(), contains_substring("source:"));

    // sparse_size claims four entries, the data holds three
    let mut bytes = FRUIT_SKETCH;
    bytes[12] = 0x04;
    let err = HllSketch::from_bigquery(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedDeserializeData);
}
