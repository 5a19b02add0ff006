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
//! Internal-service message types exchanged between the coordinator and
//! worker backends, plus the registry that routes incoming worker reports
//! to the owning coordinator.
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};

use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::plan::{
    DescriptorTable, NetworkAddress, PerNodeScanRanges, PlanFragment, PlanFragmentDestination,
    QueryCtx, ResourceAllocation,
};
use crate::runtime::coordinator::Coordinator;
use crate::runtime::profile::ProfileTreeSnapshot;

pub const PROTOCOL_VERSION: i32 = 1;

/// Exec-node lifecycle phase a debug action can attach to. Matches the
/// worker's phase enum by name, case-insensitively.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExecNodePhase {
    Prepare,
    Open,
    GetNext,
    Close,
    Invalid,
}

impl ExecNodePhase {
    pub fn parse(key: &str) -> ExecNodePhase {
        match key.to_ascii_uppercase().as_str() {
            "PREPARE" => ExecNodePhase::Prepare,
            "OPEN" => ExecNodePhase::Open,
            "GETNEXT" => ExecNodePhase::GetNext,
            "CLOSE" => ExecNodePhase::Close,
            _ => ExecNodePhase::Invalid,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DebugAction {
    Wait,
    Fail,
}

impl DebugAction {
    pub fn parse(key: &str) -> DebugAction {
        match key.to_ascii_uppercase().as_str() {
            "FAIL" => DebugAction::Fail,
            _ => DebugAction::Wait,
        }
    }
}

/// Per-instance part of the start request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanFragmentExecParams {
    pub query_id: UniqueId,
    pub fragment_instance_id: UniqueId,
    pub per_node_scan_ranges: PerNodeScanRanges,
    pub per_exch_num_senders: HashMap<i32, i32>,
    pub destinations: Vec<PlanFragmentDestination>,
    pub request_pool: String,
    pub debug_node_id: Option<i32>,
    pub debug_phase: Option<ExecNodePhase>,
    pub debug_action: Option<DebugAction>,
}

/// Fully assembled ExecPlanFragment request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecPlanFragmentParams {
    pub protocol_version: i32,
    pub fragment: PlanFragment,
    pub desc_tbl: DescriptorTable,
    pub params: PlanFragmentExecParams,
    pub coord: NetworkAddress,
    pub backend_num: i32,
    pub query_ctx: QueryCtx,
    pub reserved_resource: Option<ResourceAllocation>,
    pub local_resource_address: Option<NetworkAddress>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecPlanFragmentResult {
    pub status: Status,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelPlanFragmentParams {
    pub protocol_version: i32,
    pub fragment_instance_id: UniqueId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelPlanFragmentResult {
    pub status: Status,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InsertStats {
    pub bytes_written: i64,
}

/// Write-side outputs a worker attaches to its final report.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InsertExecStatus {
    /// partition key -> rows appended by this instance.
    pub num_appended_rows: HashMap<String, i64>,
    /// staged path -> final path; an empty destination marks a staging
    /// directory to delete after all renames ran.
    pub files_to_move: HashMap<String, String>,
    pub insert_stats: Option<HashMap<String, InsertStats>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportExecStatusParams {
    pub backend_num: i32,
    pub fragment_instance_id: UniqueId,
    pub status: Status,
    pub done: bool,
    pub profile: ProfileTreeSnapshot,
    pub error_log: Vec<String>,
    pub insert_exec_status: Option<InsertExecStatus>,
}

/// Partitions created by a write query, handed to the catalog afterwards.
#[derive(Clone, Debug, Default)]
pub struct CatalogUpdate {
    pub created_partitions: BTreeSet<String>,
}

pub fn merge_insert_stats(
    src: &HashMap<String, InsertStats>,
    dst: &mut HashMap<String, InsertStats>,
) {
    for (partition, stats) in src {
        let entry = dst.entry(partition.clone()).or_default();
        entry.bytes_written += stats.bytes_written;
    }
}

pub fn output_insert_stats(stats: &HashMap<String, InsertStats>, sep: &str) -> String {
    let mut keys: Vec<&String> = stats.keys().collect();
    keys.sort();
    keys.iter()
        .map(|k| {
            let partition = if k.is_empty() { "default" } else { k.as_str() };
            format!("{}: bytes_written={}", partition, stats[*k].bytes_written)
        })
        .collect::<Vec<_>>()
        .join(sep)
}

/// Routes `ReportExecStatus` calls from the RPC server to the coordinator
/// that owns the query. Owned by `ExecEnv`, not a process global.
#[derive(Default)]
pub struct CoordinatorRegistry {
    coordinators: Mutex<HashMap<UniqueId, Weak<Coordinator>>>,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, query_id: UniqueId, coordinator: &Arc<Coordinator>) {
        self.coordinators
            .lock()
            .expect("coordinator registry lock")
            .insert(query_id, Arc::downgrade(coordinator));
    }

    pub fn unregister(&self, query_id: UniqueId) {
        self.coordinators
            .lock()
            .expect("coordinator registry lock")
            .remove(&query_id);
    }

    pub fn lookup(&self, query_id: UniqueId) -> Option<Arc<Coordinator>> {
        self.coordinators
            .lock()
            .expect("coordinator registry lock")
            .get(&query_id)
            .and_then(Weak::upgrade)
    }

    /// Server-side entry point for worker reports.
    pub fn report_exec_status(
        &self,
        query_id: UniqueId,
        params: ReportExecStatusParams,
    ) -> Result<(), Status> {
        let coordinator = self
            .lookup(query_id)
            .ok_or_else(|| Status::internal_error(format!("unknown query id: {query_id}")))?;
        coordinator.update_fragment_exec_status(params)
    }
}
