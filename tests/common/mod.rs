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
//! Shared fixtures for coordinator integration tests: a scripted mock
//! worker fleet, a mock co-located fragment executor, an in-memory file
//! system that records operation order, and schedule builders.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use borealis::common::status::Status;
use borealis::common::types::UniqueId;
use borealis::fs::{FileEntry, FileSystem};
use borealis::plan::exprs::ExprSpec;
use borealis::plan::{
    DescriptorTable, FinalizeParams, FragmentExecParams, NetworkAddress, PartitionType,
    PlanFragment, PlanNode, PlanNodeKind, QueryCtx, QueryExecRequest, QueryOptions, QuerySchedule,
    ScanRange, ScanRangeParams, SlotDescriptor, StmtType,
};
use borealis::runtime::coordinator::{
    PEAK_MEMORY_COUNTER, SCAN_RANGES_COMPLETE_COUNTER, TOTAL_THROUGHPUT_COUNTER,
};
use borealis::runtime::exec_env::{DataStreamManager, ExecEnv};
use borealis::runtime::fragment_executor::PlanFragmentExecutor;
use borealis::runtime::profile::{
    CounterSnapshot, CounterUnit, ProfileNodeSnapshot, ProfileTreeSnapshot, RuntimeProfile,
    INVALID_PLAN_NODE_ID, TOTAL_TIME_COUNTER,
};
use borealis::runtime::runtime_state::RuntimeState;
use borealis::service::backend_client::{
    BackendConnectionFactory, BackendService, TransportError,
};
use borealis::service::internal_service::{
    CancelPlanFragmentParams, CancelPlanFragmentResult, ExecPlanFragmentParams,
    ExecPlanFragmentResult, InsertExecStatus, InsertStats, ReportExecStatusParams,
};

pub fn query_id() -> UniqueId {
    UniqueId::new(0x10, 0x20)
}

pub fn local_instance_id() -> UniqueId {
    UniqueId::new(0x10, 99)
}

pub fn remote_instance_id(i: usize) -> UniqueId {
    UniqueId::new(0x10, 100 + i as i64)
}

pub fn coordinator_address() -> NetworkAddress {
    NetworkAddress::new("coordinator", 9060)
}

pub fn worker_address(i: usize) -> NetworkAddress {
    NetworkAddress::new(format!("worker-{i}"), 9060)
}

// ---------------------------------------------------------------------------
// Mock worker fleet
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockCluster {
    pub exec_requests: Mutex<Vec<ExecPlanFragmentParams>>,
    pub cancel_requests: Mutex<Vec<CancelPlanFragmentParams>>,
    fail_exec_instances: Mutex<HashSet<UniqueId>>,
    transport_failures: Mutex<HashMap<UniqueId, usize>>,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The named instance's start RPC returns a non-OK worker status.
    pub fn fail_exec_for(&self, instance_id: UniqueId) {
        self.fail_exec_instances
            .lock()
            .expect("fail set lock")
            .insert(instance_id);
    }

    /// The named instance's next `n` start RPCs fail at the transport.
    pub fn fail_transport_times(&self, instance_id: UniqueId, n: usize) {
        self.transport_failures
            .lock()
            .expect("transport failures lock")
            .insert(instance_id, n);
    }

    pub fn exec_order(&self) -> Vec<UniqueId> {
        self.exec_requests
            .lock()
            .expect("exec requests lock")
            .iter()
            .map(|p| p.params.fragment_instance_id)
            .collect()
    }

    pub fn cancelled_instances(&self) -> Vec<UniqueId> {
        self.cancel_requests
            .lock()
            .expect("cancel requests lock")
            .iter()
            .map(|p| p.fragment_instance_id)
            .collect()
    }
}

pub struct MockClusterFactory {
    pub cluster: Arc<MockCluster>,
}

impl BackendConnectionFactory for MockClusterFactory {
    fn connect(
        &self,
        _address: &NetworkAddress,
    ) -> Result<Box<dyn BackendService>, TransportError> {
        Ok(Box::new(MockBackendClient {
            cluster: Arc::clone(&self.cluster),
        }))
    }
}

struct MockBackendClient {
    cluster: Arc<MockCluster>,
}

impl BackendService for MockBackendClient {
    fn exec_plan_fragment(
        &mut self,
        params: &ExecPlanFragmentParams,
    ) -> Result<ExecPlanFragmentResult, TransportError> {
        let instance_id = params.params.fragment_instance_id;
        {
            let mut failures = self
                .cluster
                .transport_failures
                .lock()
                .expect("transport failures lock");
            if let Some(remaining) = failures.get_mut(&instance_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError("connection reset by peer".to_string()));
                }
            }
        }
        self.cluster
            .exec_requests
            .lock()
            .expect("exec requests lock")
            .push(params.clone());
        if self
            .cluster
            .fail_exec_instances
            .lock()
            .expect("fail set lock")
            .contains(&instance_id)
        {
            return Ok(ExecPlanFragmentResult {
                status: Status::runtime_error("worker failed to start fragment"),
            });
        }
        Ok(ExecPlanFragmentResult { status: Status::ok() })
    }

    fn cancel_plan_fragment(
        &mut self,
        params: &CancelPlanFragmentParams,
    ) -> Result<CancelPlanFragmentResult, TransportError> {
        self.cluster
            .cancel_requests
            .lock()
            .expect("cancel requests lock")
            .push(params.clone());
        Ok(CancelPlanFragmentResult { status: Status::ok() })
    }
}

// ---------------------------------------------------------------------------
// Mock co-located fragment executor
// ---------------------------------------------------------------------------

struct MockExecutorInner {
    batches: Mutex<VecDeque<RecordBatch>>,
    open_error: Mutex<Option<Status>>,
    open_count: AtomicUsize,
    reached_limit: AtomicBool,
    cancelled: AtomicBool,
    thread_token_released: AtomicBool,
    profile: RuntimeProfile,
    runtime_state: Arc<RuntimeState>,
}

#[derive(Clone)]
pub struct MockExecutor {
    inner: Arc<MockExecutorInner>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockExecutorInner {
                batches: Mutex::new(VecDeque::new()),
                open_error: Mutex::new(None),
                open_count: AtomicUsize::new(0),
                reached_limit: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                thread_token_released: AtomicBool::new(false),
                profile: RuntimeProfile::new("Coordinator Instance"),
                runtime_state: Arc::new(RuntimeState::new(local_instance_id())),
            }),
        }
    }

    pub fn push_batch(&self, batch: RecordBatch) {
        self.inner
            .batches
            .lock()
            .expect("batches lock")
            .push_back(batch);
    }

    pub fn set_open_error(&self, status: Status) {
        *self.inner.open_error.lock().expect("open error lock") = Some(status);
    }

    pub fn set_reached_limit(&self, reached: bool) {
        self.inner.reached_limit.store(reached, Ordering::SeqCst);
    }

    pub fn was_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.inner.open_count.load(Ordering::SeqCst)
    }

    pub fn thread_token_released(&self) -> bool {
        self.inner.thread_token_released.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> Arc<RuntimeState> {
        Arc::clone(&self.inner.runtime_state)
    }
}

impl PlanFragmentExecutor for MockExecutor {
    fn prepare(&mut self, _request: &ExecPlanFragmentParams) -> Result<(), Status> {
        Ok(())
    }

    fn open(&self) -> Result<(), Status> {
        self.inner.open_count.fetch_add(1, Ordering::SeqCst);
        match self.inner.open_error.lock().expect("open error lock").take() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn get_next(&self) -> Result<Option<RecordBatch>, Status> {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return Err(Status::cancelled());
        }
        Ok(self.inner.batches.lock().expect("batches lock").pop_front())
    }

    fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    fn reached_limit(&self) -> bool {
        self.inner.reached_limit.load(Ordering::SeqCst)
    }

    fn release_thread_token(&self) {
        self.inner.thread_token_released.store(true, Ordering::SeqCst);
    }

    fn profile(&self) -> RuntimeProfile {
        self.inner.profile.clone()
    }

    fn runtime_state(&self) -> Arc<RuntimeState> {
        Arc::clone(&self.inner.runtime_state)
    }
}

// ---------------------------------------------------------------------------
// Mock stream manager
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockStreamManager {
    pub cancelled: Mutex<Vec<UniqueId>>,
}

impl DataStreamManager for MockStreamManager {
    fn cancel(&self, fragment_instance_id: UniqueId) {
        self.cancelled
            .lock()
            .expect("stream cancel lock")
            .push(fragment_instance_id);
    }
}

// ---------------------------------------------------------------------------
// In-memory file system recording operation order
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockFsState {
    dirs: BTreeSet<String>,
    files: BTreeSet<String>,
    op_log: Vec<String>,
    fail_renames: bool,
    fail_create_dirs: bool,
}

#[derive(Default)]
pub struct MockFileSystem {
    state: Mutex<MockFsState>,
}

fn norm(path: &str) -> String {
    path.trim_end_matches('/').to_string()
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir(&self, path: &str) {
        self.state
            .lock()
            .expect("fs lock")
            .dirs
            .insert(norm(path));
    }

    pub fn add_file(&self, path: &str) {
        self.state
            .lock()
            .expect("fs lock")
            .files
            .insert(norm(path));
    }

    pub fn set_fail_renames(&self, fail: bool) {
        self.state.lock().expect("fs lock").fail_renames = fail;
    }

    pub fn set_fail_create_dirs(&self, fail: bool) {
        self.state.lock().expect("fs lock").fail_create_dirs = fail;
    }

    pub fn op_log(&self) -> Vec<String> {
        self.state.lock().expect("fs lock").op_log.clone()
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.state.lock().expect("fs lock").files.contains(&norm(path))
    }

    pub fn contains_dir(&self, path: &str) -> bool {
        self.state.lock().expect("fs lock").dirs.contains(&norm(path))
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &str) -> anyhow::Result<bool> {
        let state = self.state.lock().expect("fs lock");
        let p = norm(path);
        Ok(state.dirs.contains(&p) || state.files.contains(&p))
    }

    fn list_files(&self, dir: &str) -> anyhow::Result<Vec<FileEntry>> {
        let state = self.state.lock().expect("fs lock");
        let prefix = format!("{}/", norm(dir));
        let mut entries = Vec::new();
        for f in &state.files {
            if let Some(rest) = f.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(FileEntry {
                        path: f.clone(),
                        name: rest.to_string(),
                        is_file: true,
                    });
                }
            }
        }
        for d in &state.dirs {
            if let Some(rest) = d.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(FileEntry {
                        path: d.clone(),
                        name: rest.to_string(),
                        is_file: false,
                    });
                }
            }
        }
        Ok(entries)
    }

    fn create_dir(&self, path: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().expect("fs lock");
        if state.fail_create_dirs {
            bail!("simulated create failure: {path}");
        }
        let p = norm(path);
        state.op_log.push(format!("create {p}"));
        state.dirs.insert(p);
        Ok(())
    }

    fn delete(&self, path: &str, _recursive: bool) -> anyhow::Result<()> {
        let mut state = self.state.lock().expect("fs lock");
        let p = norm(path);
        state.op_log.push(format!("delete {p}"));
        let prefix = format!("{p}/");
        state.files.retain(|f| f != &p && !f.starts_with(&prefix));
        state.dirs.retain(|d| d != &p && !d.starts_with(&prefix));
        Ok(())
    }

    fn rename(&self, src: &str, dst: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().expect("fs lock");
        if state.fail_renames {
            bail!("simulated rename failure: {src}");
        }
        let s = norm(src);
        let d = norm(dst);
        state.op_log.push(format!("rename {s} -> {d}"));
        state.files.remove(&s);
        state.files.insert(d);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Environment wiring
// ---------------------------------------------------------------------------

pub struct TestEnv {
    pub cluster: Arc<MockCluster>,
    pub executor: MockExecutor,
    pub stream_mgr: Arc<MockStreamManager>,
    pub fs: Arc<MockFileSystem>,
    pub exec_env: Arc<ExecEnv>,
}

pub fn test_env() -> TestEnv {
    borealis::borealis_logging::init_with_level("warn");
    let cluster = MockCluster::new();
    let executor = MockExecutor::new();
    let stream_mgr = Arc::new(MockStreamManager::default());
    let fs = Arc::new(MockFileSystem::new());
    let executor_for_factory = executor.clone();
    let exec_env = Arc::new(ExecEnv::new(
        coordinator_address(),
        Box::new(MockClusterFactory {
            cluster: Arc::clone(&cluster),
        }),
        Arc::clone(&fs) as Arc<dyn FileSystem>,
        Arc::clone(&stream_mgr) as Arc<dyn DataStreamManager>,
        Box::new(move || Box::new(executor_for_factory.clone())),
    ));
    TestEnv {
        cluster,
        executor,
        stream_mgr,
        fs,
        exec_env,
    }
}

// ---------------------------------------------------------------------------
// Schedule builders
// ---------------------------------------------------------------------------

fn scan_assignment(host: &NetworkAddress, node_id: i32, split_bytes: i64) -> HashMap<NetworkAddress, HashMap<i32, Vec<ScanRangeParams>>> {
    let mut per_node = HashMap::new();
    per_node.insert(
        node_id,
        vec![ScanRangeParams {
            scan_range: ScanRange::FileSplit {
                path: format!("/data/{}.parq", host.hostname),
                offset: 0,
                length: split_bytes,
            },
            volume_id: 0,
        }],
    );
    let mut assignment = HashMap::new();
    assignment.insert(host.clone(), per_node);
    assignment
}

fn remote_fragment_params(
    first_instance: usize,
    num_instances: usize,
    scan_node_id: i32,
) -> FragmentExecParams {
    let mut params = FragmentExecParams::default();
    for i in 0..num_instances {
        let host = worker_address(first_instance + i);
        params
            .instance_ids
            .push(remote_instance_id(first_instance + i));
        params.hosts.push(host.clone());
        params
            .scan_range_assignment
            .extend(scan_assignment(&host, scan_node_id, 1000 * (i as i64 + 1)));
    }
    params
}

fn desc_tbl() -> DescriptorTable {
    DescriptorTable {
        slot_descriptors: vec![SlotDescriptor {
            id: 1,
            tuple_id: 0,
            col_name: "c1".to_string(),
        }],
    }
}

/// One unpartitioned (coordinator) fragment plus one partitioned scan
/// fragment with `num_remote` instances.
pub fn select_schedule(num_remote: usize, scan_ranges_per_instance: i64) -> QuerySchedule {
    let coordinator_fragment = PlanFragment {
        plan: vec![PlanNode {
            node_id: 1,
            kind: PlanNodeKind::Exchange,
        }],
        partition: PartitionType::Unpartitioned,
        output_exprs: vec![ExprSpec::SlotRef { slot_id: 1 }],
    };
    let scan_fragment = PlanFragment {
        plan: vec![PlanNode {
            node_id: 0,
            kind: PlanNodeKind::HdfsScan,
        }],
        partition: PartitionType::HashPartitioned,
        output_exprs: Vec::new(),
    };
    let mut coordinator_params = FragmentExecParams::default();
    coordinator_params.instance_ids.push(local_instance_id());
    coordinator_params.hosts.push(coordinator_address());

    QuerySchedule {
        query_id: query_id(),
        request: QueryExecRequest {
            fragments: vec![coordinator_fragment, scan_fragment],
            desc_tbl: desc_tbl(),
            query_ctx: QueryCtx::default(),
            stmt_type: StmtType::Query,
            finalize_params: None,
        },
        exec_params: vec![coordinator_params, remote_fragment_params(0, num_remote, 0)],
        query_options: QueryOptions::default(),
        request_pool: "default".to_string(),
        reservation: None,
        num_scan_ranges: num_remote as i64 * scan_ranges_per_instance,
    }
}

/// Coordinator fragment plus two remote fragments (2 instances each), for
/// asserting plan-order fan-out.
pub fn three_fragment_schedule() -> QuerySchedule {
    let mut schedule = select_schedule(2, 1);
    schedule.request.fragments.push(PlanFragment {
        plan: vec![PlanNode {
            node_id: 2,
            kind: PlanNodeKind::HdfsScan,
        }],
        partition: PartitionType::HashPartitioned,
        output_exprs: Vec::new(),
    });
    schedule.exec_params.push(remote_fragment_params(2, 2, 2));
    schedule
}

/// Parallel INSERT: every fragment is partitioned (no coordinator
/// fragment); workers report write outputs with their final status.
pub fn insert_schedule(num_remote: usize, is_overwrite: bool) -> QuerySchedule {
    let scan_fragment = PlanFragment {
        plan: vec![PlanNode {
            node_id: 0,
            kind: PlanNodeKind::HdfsScan,
        }],
        partition: PartitionType::HashPartitioned,
        output_exprs: Vec::new(),
    };
    QuerySchedule {
        query_id: query_id(),
        request: QueryExecRequest {
            fragments: vec![scan_fragment],
            desc_tbl: desc_tbl(),
            query_ctx: QueryCtx::default(),
            stmt_type: StmtType::Dml,
            finalize_params: Some(FinalizeParams {
                hdfs_base_dir: "/warehouse/t".to_string(),
                staging_dir: "/staging".to_string(),
                is_overwrite,
            }),
        },
        exec_params: vec![remote_fragment_params(0, num_remote, 0)],
        query_options: QueryOptions::default(),
        request_pool: "default".to_string(),
        reservation: None,
        num_scan_ranges: num_remote as i64,
    }
}

// ---------------------------------------------------------------------------
// Worker report builders
// ---------------------------------------------------------------------------

/// Instance profile as a worker would ship it: a root with TotalTime and
/// peak memory, plus one scan node child carrying the plan node id in its
/// metadata.
pub fn profile_snapshot(
    scan_node_id: i32,
    ranges_complete: i64,
    throughput: i64,
    peak_mem: i64,
    total_time_ns: i64,
) -> ProfileTreeSnapshot {
    ProfileTreeSnapshot {
        nodes: vec![
            ProfileNodeSnapshot {
                name: "Instance".to_string(),
                num_children: 1,
                metadata: INVALID_PLAN_NODE_ID,
                counters: vec![
                    CounterSnapshot {
                        name: TOTAL_TIME_COUNTER.to_string(),
                        unit: CounterUnit::TimeNs,
                        value: total_time_ns,
                    },
                    CounterSnapshot {
                        name: PEAK_MEMORY_COUNTER.to_string(),
                        unit: CounterUnit::Bytes,
                        value: peak_mem,
                    },
                ],
                info_strings: BTreeMap::new(),
            },
            ProfileNodeSnapshot {
                name: format!("HDFS_SCAN_NODE (id={scan_node_id})"),
                num_children: 0,
                metadata: scan_node_id as i64,
                counters: vec![
                    CounterSnapshot {
                        name: SCAN_RANGES_COMPLETE_COUNTER.to_string(),
                        unit: CounterUnit::Unit,
                        value: ranges_complete,
                    },
                    CounterSnapshot {
                        name: TOTAL_THROUGHPUT_COUNTER.to_string(),
                        unit: CounterUnit::BytesPerSecond,
                        value: throughput,
                    },
                ],
                info_strings: BTreeMap::new(),
            },
        ],
    }
}

pub fn done_report(backend_num: usize) -> ReportExecStatusParams {
    ReportExecStatusParams {
        backend_num: backend_num as i32,
        fragment_instance_id: remote_instance_id(backend_num),
        status: Status::ok(),
        done: true,
        profile: profile_snapshot(0, 2, 4096, 64 << 20, 1_000_000 * (backend_num as i64 + 1)),
        error_log: Vec::new(),
        insert_exec_status: None,
    }
}

pub fn error_report(backend_num: usize, msg: &str) -> ReportExecStatusParams {
    ReportExecStatusParams {
        backend_num: backend_num as i32,
        fragment_instance_id: remote_instance_id(backend_num),
        status: Status::runtime_error(msg),
        done: true,
        profile: ProfileTreeSnapshot::default(),
        error_log: vec![msg.to_string()],
        insert_exec_status: None,
    }
}

pub fn insert_done_report(
    backend_num: usize,
    partition_key: &str,
    rows: i64,
    bytes_written: i64,
) -> ReportExecStatusParams {
    let staging = format!("/staging/{}/{}", query_id().to_path_string(), backend_num);
    let mut num_appended_rows = HashMap::new();
    num_appended_rows.insert(partition_key.to_string(), rows);
    let mut files_to_move = HashMap::new();
    let final_dir = if partition_key.is_empty() {
        "/warehouse/t".to_string()
    } else {
        format!("/warehouse/t/{partition_key}")
    };
    files_to_move.insert(
        format!("{staging}/out{backend_num}.parq"),
        format!("{final_dir}/out{backend_num}.parq"),
    );
    files_to_move.insert(staging, String::new());
    let mut insert_stats = HashMap::new();
    insert_stats.insert(
        partition_key.to_string(),
        InsertStats { bytes_written },
    );
    ReportExecStatusParams {
        backend_num: backend_num as i32,
        fragment_instance_id: remote_instance_id(backend_num),
        status: Status::ok(),
        done: true,
        profile: profile_snapshot(0, 1, 1024, 32 << 20, 2_000_000),
        error_log: Vec::new(),
        insert_exec_status: Some(InsertExecStatus {
            num_appended_rows,
            files_to_move,
            insert_stats: Some(insert_stats),
        }),
    }
}

pub fn sample_batch(values: &[i64]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("c1", DataType::Int64, false)]));
    let column: ArrayRef = Arc::new(Int64Array::from(values.to_vec()));
    RecordBatch::try_new(schema, vec![column]).expect("build record batch")
}
