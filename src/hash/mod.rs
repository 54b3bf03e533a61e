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

//! Hash functions used to turn values into sketch updates.
//!
//! Only the BigQuery fingerprint is provided: it is the one hash whose output must match an
//! external implementation bit for bit, so that sketches built here merge with sketches
//! built by BigQuery.

use byteorder::ByteOrder;
use byteorder::LittleEndian;

mod fingerprint;

pub use fingerprint::bigquery_hash;

#[inline]
fn read_u64_le(bytes: &[u8]) -> u64 {
    LittleEndian::read_u64(bytes)
}
