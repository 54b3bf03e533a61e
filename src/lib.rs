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

//! HyperLogLog++ cardinality sketches that interoperate with BigQuery.
//!
//! The sketches in this crate use the same sparse and normal representations, the same
//! sparse entry encoding and the same wire format as the `HLL_COUNT` family of functions
//! in BigQuery (ZetaSketch). A sketch exported by BigQuery can be decoded with
//! [`HllSketch::from_bigquery`](hll::HllSketch::from_bigquery), merged with locally built
//! sketches, and exported again.
//!
//! Values must be hashed with [`bigquery_hash`](hash::bigquery_hash) for the
//! resulting sketch to be mergeable with sketches built inside BigQuery.
//!
//! # Examples
//!
//! ```
//! use hllpp::hll::HllSketch;
//!
//! let mut sketch = HllSketch::new(14, 25);
//! for i in 0..1000 {
//!     sketch.update_bytes(i.to_string().as_bytes());
//! }
//! let estimate = sketch.estimate();
//! assert!((estimate - 1000.0).abs() < 20.0);
//! ```

mod codec;

pub mod error;
pub mod hash;
pub mod hll;
