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
//! Output-expression handling for the coordinator fragment.
//!
//! Expression evaluation itself happens inside the fragment executor; the
//! coordinator only materializes the fragment's output expression specs and
//! resolves their slot references against the descriptor table so the client
//! layer can fetch typed columns from the returned batches.
use serde::{Deserialize, Serialize};

use crate::common::status::Status;
use crate::plan::DescriptorTable;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ExprSpec {
    SlotRef { slot_id: i32 },
    Literal { value: String },
}

/// A prepared output expression: the spec plus the resolved output column
/// name (slot refs resolve through the descriptor table).
#[derive(Clone, Debug)]
pub struct OutputExpr {
    pub spec: ExprSpec,
    pub output_name: String,
}

/// Build and prepare the output expression trees for the coordinator
/// fragment. An unresolvable slot reference is a plan inconsistency.
pub fn create_expr_trees(
    specs: &[ExprSpec],
    desc_tbl: &DescriptorTable,
) -> Result<Vec<OutputExpr>, Status> {
    let mut prepared = Vec::with_capacity(specs.len());
    for spec in specs {
        let output_name = match spec {
            ExprSpec::SlotRef { slot_id } => desc_tbl
                .slot(*slot_id)
                .map(|s| s.col_name.clone())
                .ok_or_else(|| {
                    Status::internal_error(format!(
                        "output expr references unknown slot id {}",
                        slot_id
                    ))
                })?,
            ExprSpec::Literal { value } => value.clone(),
        };
        prepared.push(OutputExpr {
            spec: spec.clone(),
            output_name,
        });
    }
    Ok(prepared)
}
