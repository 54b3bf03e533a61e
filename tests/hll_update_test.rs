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
use googletest::prelude::near;
use hllpp::hash::bigquery_hash;
use hllpp::hll::HllSketch;

fn relative_error(estimate: f64, actual: f64) -> f64 {
    (estimate - actual).abs() / actual
}

#[test]
fn test_basic_update() {
    let mut sketch = HllSketch::new(15, 20);
    assert_eq!(sketch.estimate(), 0.0);

    for i in 0..100 {
        sketch.update_bytes(i.to_string().as_bytes());
    }

    assert_eq!(sketch.cardinality(), 100);
    assert!(sketch.is_sparse());
}

#[test]
fn test_million_distinct_values() {
    let mut sketch = HllSketch::new(14, 25);
    for i in 0..1_000_000 {
        sketch.update(bigquery_hash(i.to_string().as_bytes()));
    }

    // Duplicates do not change the estimate.
    let before = sketch.estimate();
    for _ in 0..10_000 {
        sketch.update(bigquery_hash(b"1"));
    }
    let after = sketch.estimate();
    assert_eq!(before, after);

    assert!(!sketch.is_sparse());
    assert_that!(after, near(1_000_000.0, 0.03 * 1_000_000.0));
}

#[test]
fn test_accuracy_across_promotion() {
    let mut sketch = HllSketch::new(12, 20);
    let mut was_sparse = true;
    for n in 1..=50_000u32 {
        sketch.update_bytes(&n.to_le_bytes());
        if n % 1000 == 0 {
            let estimate = sketch.estimate();
            assert!(
                relative_error(estimate, n as f64) < 0.06,
                "estimate {estimate} too far from {n}"
            );
            assert!(was_sparse || !sketch.is_sparse(), "sketch went back to sparse");
            was_sparse = sketch.is_sparse();
        }
    }
    assert!(!was_sparse);
}

#[test]
fn test_sparse_accuracy_at_high_precision() {
    let mut sketch = HllSketch::new(15, 25);
    for i in 0..5000 {
        sketch.update_bytes(format!("user-{i}").as_bytes());
    }
    assert!(sketch.is_sparse());
    assert_that!(sketch.estimate(), near(5000.0, 10.0));
}

#[test]
fn test_merge_matches_union() {
    let mut left = HllSketch::new(14, 25);
    let mut right = HllSketch::new(14, 25);
    let mut union = HllSketch::new(14, 25);
    for i in 0..30_000 {
        let hash = bigquery_hash(i.to_string().as_bytes());
        if i < 20_000 {
            left.update(hash);
        }
        if i >= 10_000 {
            right.update(hash);
        }
        union.update(hash);
    }

    left.merge(&right).unwrap();
    assert_eq!(left.estimate(), union.estimate());
    assert_that!(left.estimate(), near(30_000.0, 0.03 * 30_000.0));
}

#[test]
fn test_merge_is_commutative() {
    let build = |prefix: &str, count: usize| {
        let mut sketch = HllSketch::default();
        for i in 0..count {
            sketch.update_bytes(format!("{prefix}{i}").as_bytes());
        }
        sketch
    };

    let mut ab = build("a", 300);
    ab.merge(&build("b", 100_000)).unwrap();
    let mut ba = build("b", 100_000);
    ba.merge(&build("a", 300)).unwrap();

    assert_eq!(ab.estimate(), ba.estimate());
}

#[test]
fn test_merge_empty_sketch() {
    let mut sketch = HllSketch::new(14, 25);
    for i in 0..1000 {
        sketch.update_bytes(i.to_string().as_bytes());
    }
    let expected = sketch.estimate();

    sketch.merge(&HllSketch::new(14, 25)).unwrap();
    assert_eq!(sketch.estimate(), expected);

    let mut empty = HllSketch::new(14, 25);
    empty.merge(&sketch).unwrap();
    assert_eq!(empty.estimate(), expected);
}

#[test]
#[should_panic(expected = "precisions must satisfy")]
fn test_invalid_sparse_precision() {
    HllSketch::new(15, 26);
}
