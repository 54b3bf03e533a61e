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

use std::collections::HashSet;

use crate::hll::registers::Registers;
use crate::hll::sparse::SparseList;

/// Active representation of a sketch. Sparse moves to normal, never back.
#[derive(Debug, Clone)]
pub(super) enum Mode {
    Sparse {
        /// Merged entries, sorted by decoded index.
        list: SparseList,
        /// Entries inserted since the last flush, in no particular order.
        tmp_set: HashSet<u32>,
    },
    Normal(Registers),
}

impl Mode {
    pub(super) fn sparse(list: SparseList) -> Self {
        Mode::Sparse {
            list,
            tmp_set: HashSet::new(),
        }
    }

    pub(super) fn name(&self) -> &'static str {
        match self {
            Mode::Sparse { .. } => "sparse",
            Mode::Normal(_) => "normal",
        }
    }
}
