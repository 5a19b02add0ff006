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
//! The scheduler's output: fragment-to-host assignment for one query.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::types::UniqueId;
use crate::plan::{
    NetworkAddress, PartitionType, PerNodeScanRanges, PlanFragmentDestination, QueryExecRequest,
    QueryOptions,
};

/// Per-fragment execution parameters. `instance_ids` and `hosts` are
/// index-aligned: instance i of the fragment runs on `hosts[i]`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FragmentExecParams {
    pub instance_ids: Vec<UniqueId>,
    pub hosts: Vec<NetworkAddress>,
    pub scan_range_assignment: HashMap<NetworkAddress, PerNodeScanRanges>,
    pub per_exch_num_senders: HashMap<i32, i32>,
    pub destinations: Vec<PlanFragmentDestination>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub memory_mb: i64,
    pub vcores: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReservationInfo {
    pub allocated_resources: HashMap<NetworkAddress, ResourceAllocation>,
    /// Execution hostport -> resource-manager hostport.
    pub hostport_mapping: HashMap<NetworkAddress, NetworkAddress>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuerySchedule {
    pub query_id: UniqueId,
    pub request: QueryExecRequest,
    /// One entry per fragment, aligned with `request.fragments`.
    pub exec_params: Vec<FragmentExecParams>,
    pub query_options: QueryOptions,
    pub request_pool: String,
    pub reservation: Option<ReservationInfo>,
    pub num_scan_ranges: i64,
}

impl QuerySchedule {
    /// True when fragment 0 runs co-located with the coordinator.
    pub fn has_coordinator_fragment(&self) -> bool {
        self.request
            .fragments
            .first()
            .map(|f| f.partition == PartitionType::Unpartitioned)
            .unwrap_or(false)
    }

    /// Number of remote fragment instances; the co-located root fragment,
    /// if any, is not counted.
    pub fn num_backends(&self) -> usize {
        let first_remote = if self.has_coordinator_fragment() { 1 } else { 0 };
        self.exec_params
            .iter()
            .skip(first_remote)
            .map(|p| p.hosts.len())
            .sum()
    }

    pub fn has_reservation(&self) -> bool {
        self.reservation.is_some()
    }

    /// Resolve the resource-manager hostport for an execution host.
    pub fn resource_hostport(&self, exec_host: &NetworkAddress) -> Option<NetworkAddress> {
        let reservation = self.reservation.as_ref()?;
        reservation
            .hostport_mapping
            .get(exec_host)
            .cloned()
            .or_else(|| Some(exec_host.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DescriptorTable, PlanFragment, QueryCtx, StmtType};

    fn fragment(partition: PartitionType) -> PlanFragment {
        PlanFragment {
            plan: Vec::new(),
            partition,
            output_exprs: Vec::new(),
        }
    }

    fn schedule(fragments: Vec<PlanFragment>, exec_params: Vec<FragmentExecParams>) -> QuerySchedule {
        QuerySchedule {
            query_id: UniqueId::new(1, 2),
            request: QueryExecRequest {
                fragments,
                desc_tbl: DescriptorTable::default(),
                query_ctx: QueryCtx::default(),
                stmt_type: StmtType::Query,
                finalize_params: None,
            },
            exec_params,
            query_options: QueryOptions::default(),
            request_pool: "default".to_string(),
            reservation: None,
            num_scan_ranges: 0,
        }
    }

    #[test]
    fn coordinator_fragment_not_counted_as_backend() {
        let mut coord_params = FragmentExecParams::default();
        coord_params.instance_ids.push(UniqueId::new(1, 0));
        coord_params.hosts.push(NetworkAddress::new("coord", 9060));
        let mut remote_params = FragmentExecParams::default();
        for i in 0..3 {
            remote_params.instance_ids.push(UniqueId::new(1, i + 1));
            remote_params
                .hosts
                .push(NetworkAddress::new(format!("worker-{i}"), 9060));
        }
        let s = schedule(
            vec![
                fragment(PartitionType::Unpartitioned),
                fragment(PartitionType::HashPartitioned),
            ],
            vec![coord_params, remote_params],
        );
        assert!(s.has_coordinator_fragment());
        assert_eq!(s.num_backends(), 3);
    }

    #[test]
    fn all_fragments_remote_without_unpartitioned_root() {
        let mut params = FragmentExecParams::default();
        params.instance_ids.push(UniqueId::new(1, 1));
        params.hosts.push(NetworkAddress::new("worker-0", 9060));
        let s = schedule(vec![fragment(PartitionType::HashPartitioned)], vec![params]);
        assert!(!s.has_coordinator_fragment());
        assert_eq!(s.num_backends(), 1);
    }
}
