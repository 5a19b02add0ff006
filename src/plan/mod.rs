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
//! Compiled-plan data model consumed by the coordinator.
//!
//! The planner and scheduler live in the frontend; the execution layer only
//! sees these plain types, so it does not depend on the frontend's wire
//! representation directly.
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::types::UniqueId;

pub mod exprs;
pub mod schedule;

pub use schedule::{FragmentExecParams, QuerySchedule, ReservationInfo, ResourceAllocation};

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub hostname: String,
    pub port: i32,
}

impl NetworkAddress {
    pub fn new(hostname: impl Into<String>, port: i32) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PartitionType {
    Unpartitioned,
    HashPartitioned,
    RandomPartitioned,
}

/// Plan-node discrimination is on this tag; the coordinator only cares
/// whether a node is a scan (for derived counters and split accounting).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PlanNodeKind {
    HdfsScan,
    HbaseScan,
    Exchange,
    Aggregate,
    HashJoin,
    Sort,
    Union,
}

impl PlanNodeKind {
    pub fn is_scan(self) -> bool {
        matches!(self, PlanNodeKind::HdfsScan | PlanNodeKind::HbaseScan)
    }

    pub fn name(self) -> &'static str {
        match self {
            PlanNodeKind::HdfsScan => "HDFS_SCAN_NODE",
            PlanNodeKind::HbaseScan => "HBASE_SCAN_NODE",
            PlanNodeKind::Exchange => "EXCHANGE_NODE",
            PlanNodeKind::Aggregate => "AGGREGATION_NODE",
            PlanNodeKind::HashJoin => "HASH_JOIN_NODE",
            PlanNodeKind::Sort => "SORT_NODE",
            PlanNodeKind::Union => "UNION_NODE",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanNode {
    pub node_id: i32,
    pub kind: PlanNodeKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanFragment {
    /// Nodes of this fragment's sub-plan, leftmost (root-of-fragment) first.
    pub plan: Vec<PlanNode>,
    pub partition: PartitionType,
    pub output_exprs: Vec<exprs::ExprSpec>,
}

/// A contiguous extent of input assigned to a scan node. Only file splits
/// contribute to the per-instance byte balance summary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ScanRange {
    FileSplit {
        path: String,
        offset: i64,
        length: i64,
    },
    KeyRange {
        start_key: String,
        stop_key: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanRangeParams {
    pub scan_range: ScanRange,
    pub volume_id: i32,
}

/// plan node id -> scan ranges assigned to that node on one host.
pub type PerNodeScanRanges = HashMap<i32, Vec<ScanRangeParams>>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanFragmentDestination {
    pub fragment_instance_id: UniqueId,
    pub server: NetworkAddress,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SlotDescriptor {
    pub id: i32,
    pub tuple_id: i32,
    pub col_name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DescriptorTable {
    pub slot_descriptors: Vec<SlotDescriptor>,
}

impl DescriptorTable {
    pub fn slot(&self, slot_id: i32) -> Option<&SlotDescriptor> {
        self.slot_descriptors.iter().find(|s| s.id == slot_id)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StmtType {
    Query,
    Dml,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalizeParams {
    pub hdfs_base_dir: String,
    pub staging_dir: String,
    pub is_overwrite: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    pub batch_size: Option<i32>,
    pub debug_action: Option<String>,
    pub enable_profile: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryCtx {
    pub connected_user: String,
    pub current_db: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryExecRequest {
    pub fragments: Vec<PlanFragment>,
    pub desc_tbl: DescriptorTable,
    pub query_ctx: QueryCtx,
    pub stmt_type: StmtType,
    pub finalize_params: Option<FinalizeParams>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_kinds_are_scans() {
        assert!(PlanNodeKind::HdfsScan.is_scan());
        assert!(PlanNodeKind::HbaseScan.is_scan());
        assert!(!PlanNodeKind::Exchange.is_scan());
    }

    #[test]
    fn network_address_display() {
        let addr = NetworkAddress::new("worker-1", 9060);
        assert_eq!(addr.to_string(), "worker-1:9060");
    }

    #[test]
    fn descriptor_table_slot_lookup() {
        let desc_tbl = DescriptorTable {
            slot_descriptors: vec![SlotDescriptor {
                id: 3,
                tuple_id: 0,
                col_name: "c_custkey".to_string(),
            }],
        };
        assert_eq!(desc_tbl.slot(3).map(|s| s.col_name.as_str()), Some("c_custkey"));
        assert!(desc_tbl.slot(4).is_none());
    }
}
