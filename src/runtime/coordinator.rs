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
//! Query coordinator: drives one query's fragment instances across the
//! worker fleet, reconciles their status reports, aggregates profiles, pulls
//! rows from the optional co-located fragment, and finalizes write output.
//!
//! Locking: the coordinator lock (`lock`) protects query-wide state and is
//! always acquired before any per-backend state lock; `wait_lock` only
//! serializes `wait()` itself. The completion condvar pairs with `lock`.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use arrow::record_batch::RecordBatch;

use crate::common::app_config;
use crate::common::logging::{debug, info, trace, warn};
use crate::common::status::Status;
use crate::common::types::UniqueId;
use crate::common::util::{
    pretty_bytes, pretty_rate, pretty_time_ns, MonotonicStopWatch, SummaryStats,
};
use crate::fs::bulk_ops::{FileOp, FileOperationSet};
use crate::fs::is_hidden_file;
use crate::plan::exprs::{self, OutputExpr};
use crate::plan::{
    DescriptorTable, FinalizeParams, NetworkAddress, PerNodeScanRanges, PlanFragment, QueryCtx,
    QueryOptions, QuerySchedule, ScanRange, StmtType,
};
use crate::runtime::exec_env::ExecEnv;
use crate::runtime::fragment_executor::PlanFragmentExecutor;
use crate::runtime::parallel_executor;
use crate::runtime::profile::{
    CounterRef, CounterUnit, RuntimeProfile, ScopedTimer, INVALID_PLAN_NODE_ID,
};
use crate::runtime::progress::ProgressUpdater;
use crate::service::internal_service::{
    output_insert_stats, merge_insert_stats, CancelPlanFragmentParams, CatalogUpdate, DebugAction,
    ExecNodePhase, ExecPlanFragmentParams, InsertStats, PlanFragmentExecParams,
    ReportExecStatusParams, PROTOCOL_VERSION,
};

/// Counter names scan nodes publish in their profiles; discovered by
/// scanning reported profile trees for nodes whose metadata carries a plan
/// node id.
pub const TOTAL_THROUGHPUT_COUNTER: &str = "TotalReadThroughput";
pub const SCAN_RANGES_COMPLETE_COUNTER: &str = "ScanRangesComplete";
pub const PEAK_MEMORY_COUNTER: &str = "PeakMemoryUsage";

/// Debug action parsed from the `debug_action` query option:
/// `node_id:phase:action` applies to all backends,
/// `backend_num:node_id:phase:action` to a single one.
#[derive(Clone, Debug)]
pub struct DebugOptions {
    pub backend_num: i32,
    pub node_id: i32,
    pub phase: ExecNodePhase,
    pub action: DebugAction,
}

fn process_query_options(query_options: &QueryOptions) -> Option<DebugOptions> {
    let raw = query_options.debug_action.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }
    let components: Vec<&str> = raw.split(':').filter(|c| !c.is_empty()).collect();
    if components.len() < 3 || components.len() > 4 {
        return None;
    }
    let options = if components.len() == 3 {
        DebugOptions {
            backend_num: -1,
            node_id: components[0].parse().unwrap_or(0),
            phase: ExecNodePhase::parse(components[1]),
            action: DebugAction::parse(components[2]),
        }
    } else {
        DebugOptions {
            backend_num: components[0].parse().unwrap_or(0),
            node_id: components[1].parse().unwrap_or(0),
            phase: ExecNodePhase::parse(components[2]),
            action: DebugAction::parse(components[3]),
        }
    };
    if options.phase == ExecNodePhase::Invalid {
        return None;
    }
    if options.phase == ExecNodePhase::Close && options.action == DebugAction::Wait {
        // Nodes cannot be cancelled while closing.
        warn!("ignoring CLOSE:WAIT debug action");
        return None;
    }
    Some(options)
}

/// Scan-node counters discovered in one instance's profile, keyed by plan
/// node id.
#[derive(Debug, Default)]
pub(crate) struct FragmentInstanceCounters {
    pub(crate) throughput_counters: HashMap<i32, CounterRef>,
    pub(crate) scan_ranges_complete_counters: HashMap<i32, CounterRef>,
}

/// Execution state of one remote fragment instance.
pub(crate) struct BackendExecState {
    pub(crate) fragment_instance_id: UniqueId,
    pub(crate) backend_address: NetworkAddress,
    pub(crate) fragment_idx: usize,
    pub(crate) backend_num: usize,
    pub(crate) rpc_params: ExecPlanFragmentParams,
    /// Bytes of file splits assigned to this instance.
    pub(crate) total_split_size: i64,
    /// Internally synchronized; updated by each status report.
    pub(crate) profile: RuntimeProfile,
    // Lock ordering: the coordinator lock is always taken before this one.
    pub(crate) inner: Mutex<BackendExecStateInner>,
}

#[derive(Default)]
pub(crate) struct BackendExecStateInner {
    /// Non-OK means the backend aborted (and reported the error) or
    /// cancellation was initiated; either way no further cancel is needed.
    pub(crate) status: Status,
    pub(crate) initiated: bool,
    pub(crate) done: bool,
    pub(crate) profile_created: bool,
    pub(crate) error_log: Vec<String>,
    pub(crate) total_ranges_complete: i64,
    pub(crate) aggregate_counters: FragmentInstanceCounters,
    pub(crate) stopwatch: MonotonicStopWatch,
}

impl BackendExecStateInner {
    /// Returns the delta of completed scan ranges since the previous call.
    fn update_num_scan_ranges_completed(&mut self) -> i64 {
        let total: i64 = self
            .aggregate_counters
            .scan_ranges_complete_counters
            .values()
            .map(|c| c.value())
            .sum();
        let delta = total - self.total_ranges_complete;
        self.total_ranges_complete = total;
        debug_assert!(delta >= 0);
        delta
    }
}

impl BackendExecState {
    fn new(
        schedule: &QuerySchedule,
        plan: &PlanState,
        backend_num: usize,
        fragment_idx: usize,
        instance_idx: usize,
        coord: &NetworkAddress,
        debug_options: Option<&DebugOptions>,
    ) -> Self {
        let params = &schedule.exec_params[fragment_idx];
        let fragment_instance_id = params.instance_ids[instance_idx];
        let backend_address = params.hosts[instance_idx].clone();
        let rpc_params = build_exec_plan_fragment_params(
            schedule,
            plan,
            fragment_idx,
            instance_idx,
            backend_num as i32,
            coord,
            debug_options,
        );
        let total_split_size = compute_total_split_size(&rpc_params.params.per_node_scan_ranges);
        let profile = RuntimeProfile::new(format!(
            "Instance {fragment_instance_id} (host={backend_address})"
        ));
        Self {
            fragment_instance_id,
            backend_address,
            fragment_idx,
            backend_num,
            rpc_params,
            total_split_size,
            profile,
            inner: Mutex::new(BackendExecStateInner::default()),
        }
    }

    /// Value of the throughput counter for `plan_node_id`, 0 if absent.
    /// The counter ref is cloned under the lock and read outside it.
    fn node_throughput(&self, plan_node_id: i32) -> i64 {
        let counter = {
            let inner = self.inner.lock().expect("backend exec state lock");
            inner
                .aggregate_counters
                .throughput_counters
                .get(&plan_node_id)
                .cloned()
        };
        counter.map(|c| c.value()).unwrap_or(0)
    }

    fn num_scan_ranges_completed(&self, plan_node_id: i32) -> i64 {
        let counter = {
            let inner = self.inner.lock().expect("backend exec state lock");
            inner
                .aggregate_counters
                .scan_ranges_complete_counters
                .get(&plan_node_id)
                .cloned()
        };
        counter.map(|c| c.value()).unwrap_or(0)
    }
}

/// Plan-level data captured from the schedule at `exec()`; immutable for
/// the life of the query.
struct PlanState {
    query_id: UniqueId,
    stmt_type: StmtType,
    needs_finalization: bool,
    finalize_params: Option<FinalizeParams>,
    fragments: Vec<PlanFragment>,
    desc_tbl: DescriptorTable,
    query_ctx: QueryCtx,
}

/// Per-fragment profile record: the running average over instances, the
/// grouping profile holding every raw instance profile, and the summary
/// accumulators.
struct PerFragmentProfile {
    averaged_profile: RuntimeProfile,
    /// None for the coordinator fragment (single local instance).
    root_profile: Option<RuntimeProfile>,
    num_instances: usize,
    bytes_assigned: Mutex<SummaryStats>,
    completion_times: Mutex<SummaryStats>,
    rates: Mutex<SummaryStats>,
}

/// Query-wide state protected by the coordinator lock.
#[derive(Default)]
struct QueryExecState {
    /// Overall status; error-sticky, the first non-OK value wins.
    query_status: Status,
    num_remaining_backends: usize,
    partition_row_counts: HashMap<String, i64>,
    files_to_move: HashMap<String, String>,
    partition_insert_stats: HashMap<String, InsertStats>,
}

pub struct Coordinator {
    exec_env: Arc<ExecEnv>,
    plan: OnceLock<PlanState>,
    executor: OnceLock<Box<dyn PlanFragmentExecutor>>,
    backend_exec_states: OnceLock<Vec<Arc<BackendExecState>>>,
    fragment_profiles: OnceLock<Vec<PerFragmentProfile>>,
    query_profile: OnceLock<RuntimeProfile>,
    finalization_timer: OnceLock<CounterRef>,
    progress: OnceLock<ProgressUpdater>,
    /// Scan-node counters of the co-located fragment.
    coordinator_counters: Arc<Mutex<FragmentInstanceCounters>>,
    wait_lock: Mutex<()>,
    has_called_wait: AtomicBool,
    returned_all_results: AtomicBool,
    lock: Mutex<QueryExecState>,
    backend_completion_cv: Condvar,
}

impl Coordinator {
    pub fn new(exec_env: Arc<ExecEnv>) -> Self {
        Self {
            exec_env,
            plan: OnceLock::new(),
            executor: OnceLock::new(),
            backend_exec_states: OnceLock::new(),
            fragment_profiles: OnceLock::new(),
            query_profile: OnceLock::new(),
            finalization_timer: OnceLock::new(),
            progress: OnceLock::new(),
            coordinator_counters: Arc::new(Mutex::new(FragmentInstanceCounters::default())),
            wait_lock: Mutex::new(()),
            has_called_wait: AtomicBool::new(false),
            returned_all_results: AtomicBool::new(false),
            lock: Mutex::new(QueryExecState::default()),
            backend_completion_cv: Condvar::new(),
        }
    }

    /// Start the query: prepare the co-located fragment (if any) before any
    /// remote RPC goes out, then fan out fragment starts left-to-right in
    /// plan order so receivers are registered before their senders start.
    /// Returns the prepared output expressions of the root fragment.
    pub fn exec(&self, schedule: QuerySchedule) -> Result<Vec<OutputExpr>, Status> {
        if schedule.request.fragments.is_empty() {
            return Err(Status::internal_error("query schedule has no fragments"));
        }
        let query_id = schedule.query_id;
        info!("Exec() query_id={}", query_id);

        let plan_state = PlanState {
            query_id,
            stmt_type: schedule.request.stmt_type,
            needs_finalization: schedule.request.finalize_params.is_some(),
            finalize_params: schedule.request.finalize_params.clone(),
            fragments: schedule.request.fragments.clone(),
            desc_tbl: schedule.request.desc_tbl.clone(),
            query_ctx: schedule.request.query_ctx.clone(),
        };
        if self.plan.set(plan_state).is_err() {
            return Err(Status::internal_error("Exec() called more than once"));
        }
        let plan = self.plan.get().expect("plan state");

        let query_profile = RuntimeProfile::new(format!("Execution Profile {query_id}"));
        let _ = self.query_profile.set(query_profile.clone());
        let _total_timer = ScopedTimer::new(query_profile.total_time_counter());

        let coord = self.exec_env.coord_address().clone();

        // Hold the coordinator lock across all of exec() so an async
        // cancel() waits until every instance has been initiated.
        let mut exec_state = self.lock.lock().expect("coordinator lock");

        let has_coordinator_fragment = schedule.has_coordinator_fragment();
        let mut output_exprs = Vec::new();
        if has_coordinator_fragment {
            let mut executor = self.exec_env.create_local_executor();
            let rpc_params =
                build_exec_plan_fragment_params(&schedule, plan, 0, 0, 0, &coord, None);
            // Prepare registers the local exchange receivers with the
            // stream manager; remote senders connect to them immediately
            // after their start RPC, so this must complete first.
            executor.prepare(&rpc_params)?;
            output_exprs = exprs::create_expr_trees(&plan.fragments[0].output_exprs, &plan.desc_tbl)?;
            let _ = self.executor.set(executor);
        }

        let _ = self
            .finalization_timer
            .set(query_profile.add_timer("FinalizationTimer"));

        if let Some(executor) = self.executor.get() {
            let executor_profile = executor.profile();
            executor_profile.set_name("Coordinator Fragment");
            query_profile.add_child(executor_profile.clone());
            let mut counters = self
                .coordinator_counters
                .lock()
                .expect("coordinator counters lock");
            collect_scan_node_counters(&executor_profile, &mut counters);
        }

        let num_fragments = plan.fragments.len();
        let mut fragment_profiles = Vec::with_capacity(num_fragments);
        for i in 0..num_fragments {
            if i == 0 && has_coordinator_fragment {
                fragment_profiles.push(PerFragmentProfile {
                    averaged_profile: self.executor.get().expect("local executor").profile(),
                    root_profile: None,
                    num_instances: 1,
                    bytes_assigned: Mutex::new(SummaryStats::new()),
                    completion_times: Mutex::new(SummaryStats::new()),
                    rates: Mutex::new(SummaryStats::new()),
                });
                continue;
            }
            let averaged = RuntimeProfile::new(format!("Averaged Fragment {i}"));
            query_profile.add_child(averaged.clone());
            let root = RuntimeProfile::new(format!("Fragment {i}"));
            query_profile.add_child(root.clone());
            fragment_profiles.push(PerFragmentProfile {
                averaged_profile: averaged,
                root_profile: Some(root),
                num_instances: schedule
                    .exec_params
                    .get(i)
                    .map(|p| p.hosts.len())
                    .unwrap_or(0),
                bytes_assigned: Mutex::new(SummaryStats::new()),
                completion_times: Mutex::new(SummaryStats::new()),
                rates: Mutex::new(SummaryStats::new()),
            });
        }
        let _ = self.fragment_profiles.set(fragment_profiles);

        let debug_options = process_query_options(&schedule.query_options);

        let first_remote_fragment = if has_coordinator_fragment { 1 } else { 0 };
        let mut states: Vec<Arc<BackendExecState>> = Vec::with_capacity(schedule.num_backends());
        // (start, len) into `states`, one entry per remote fragment.
        let mut fragment_ranges: Vec<(usize, usize)> = Vec::new();
        let mut backend_num: usize = 0;
        for fragment_idx in first_remote_fragment..num_fragments {
            let params = &schedule.exec_params[fragment_idx];
            let num_hosts = params.hosts.len();
            debug_assert!(num_hosts > 0);
            let start = backend_num;
            for instance_idx in 0..num_hosts {
                let backend_debug = debug_options.as_ref().filter(|d| {
                    d.backend_num == -1 || d.backend_num == backend_num as i32
                });
                let state = Arc::new(BackendExecState::new(
                    &schedule,
                    plan,
                    backend_num,
                    fragment_idx,
                    instance_idx,
                    &coord,
                    backend_debug,
                ));
                debug!(
                    "Exec(): starting instance: fragment_idx={} instance_id={}",
                    fragment_idx, state.fragment_instance_id
                );
                states.push(state);
                backend_num += 1;
            }
            fragment_ranges.push((start, num_hosts));
        }
        exec_state.num_remaining_backends = states.len();
        info!("starting {} backends for query {}", states.len(), query_id);
        let _ = self.backend_exec_states.set(states);
        let states = self.backend_exec_states.get().expect("backend exec states");

        self.create_aggregate_counters(&plan.fragments);

        // Start instances fragment by fragment; instances within one
        // fragment start concurrently. Downstream fragments must not start
        // sending to upstream receivers that have not yet registered.
        for (start, len) in fragment_ranges {
            let env = Arc::clone(&self.exec_env);
            let fragments_exec_status = parallel_executor::exec(
                self.exec_env.rpc_pool(),
                &states[start..start + len],
                move |state: &BackendExecState| exec_remote_fragment(&env, query_id, state),
            );
            if !fragments_exec_status.is_ok() {
                debug_assert!(exec_state.query_status.is_ok());
                exec_state.query_status = fragments_exec_status.clone();
                self.cancel_internal(&mut exec_state);
                return Err(fragments_exec_status);
            }
        }

        // The coordinator fragment mostly waits on results from here on;
        // keeping its execution token would underutilize the host.
        if has_coordinator_fragment && num_fragments > 1 {
            self.executor
                .get()
                .expect("local executor")
                .release_thread_token();
        }

        self.print_backend_info();

        let log_interval = app_config::config()
            .ok()
            .map(|cfg| cfg.runtime.progress_log_interval_percent as i64)
            .unwrap_or(1);
        let _ = self.progress.set(ProgressUpdater::new(
            format!("Query {query_id}"),
            schedule.num_scan_ranges,
            log_interval,
        ));

        Ok(output_exprs)
    }

    /// Block until the query is fully started and, for queries without a
    /// local fragment, fully finished. Idempotent; side effects happen on
    /// the first call only, later calls return the sticky query status.
    pub fn wait(&self) -> Result<(), Status> {
        let _wait_guard = self.wait_lock.lock().expect("wait lock");
        let _total_timer = self
            .query_profile
            .get()
            .map(|p| ScopedTimer::new(p.total_time_counter()));
        if self.has_called_wait.swap(true, Ordering::SeqCst) {
            return self.get_status().into_result();
        }
        let plan = self
            .plan
            .get()
            .ok_or_else(|| Status::internal_error("Wait() called before Exec()"))?;

        let mut return_status = Status::ok();
        if let Some(executor) = self.executor.get() {
            let open_status = match executor.open() {
                Ok(()) => Status::ok(),
                Err(e) => e,
            };
            return_status = self.update_status(open_status, None);
            if return_status.is_ok() {
                // The coordinator fragment's sink has finished executing at
                // this point; its write-side outputs are complete. Backends
                // have a sink only if the coordinator does not, so these
                // maps cannot have been touched yet.
                let state = executor.runtime_state();
                let mut guard = self.lock.lock().expect("coordinator lock");
                debug_assert!(guard.files_to_move.is_empty());
                debug_assert!(guard.partition_row_counts.is_empty());
                guard.files_to_move = state.hdfs_files_to_move();
                guard.partition_row_counts = state.num_appended_rows();
                guard.partition_insert_stats = state.insert_stats();
            }
        } else {
            let status = self.wait_for_all_backends();
            if plan.needs_finalization {
                // finalize_query() below surfaces the error after it has
                // scrubbed the staging directory.
                return_status = status;
            } else {
                status.into_result()?;
            }
        }

        if plan.needs_finalization {
            self.finalize_query()?;
        }

        if plan.stmt_type == StmtType::Dml {
            let stats = self
                .lock
                .lock()
                .expect("coordinator lock")
                .partition_insert_stats
                .clone();
            if let Some(query_profile) = self.query_profile.get() {
                query_profile.add_info_string("Insert Stats", output_insert_stats(&stats, "\n"));
            }
            // For DML the query is complete once Wait() is done.
            self.report_query_summary();
        }

        return_status.into_result()
    }

    /// Pull the next row batch from the co-located fragment. Returns
    /// `Ok(None)` only after every backend has terminally reported, so
    /// post-query finalization observes complete state.
    pub fn get_next(&self) -> Result<Option<RecordBatch>, Status> {
        let plan = self
            .plan
            .get()
            .ok_or_else(|| Status::internal_error("GetNext() called before Exec()"))?;
        trace!("GetNext() query_id={}", plan.query_id);
        debug_assert!(self.has_called_wait.load(Ordering::SeqCst));
        let _total_timer = self
            .query_profile
            .get()
            .map(|p| ScopedTimer::new(p.total_time_counter()));

        let Some(executor) = self.executor.get() else {
            // No local fragment: no rows to return, and execution has
            // finished after wait().
            return self.get_status().into_result().map(|()| None);
        };

        // Do not take the coordinator lock around the fetch: a pipeline-
        // bound fetch must not stall an async cancel().
        let (batch, fetch_status) = match executor.get_next() {
            Ok(batch) => (batch, Status::ok()),
            Err(e) => (None, e),
        };
        let instance_id = executor.runtime_state().fragment_instance_id();
        // Surface the query-wide error rather than the executor's status
        // (which may just be CANCELLED as a side effect of the real error).
        self.update_status(fetch_status, Some(instance_id))
            .into_result()?;

        if batch.is_none() {
            self.returned_all_results.store(true, Ordering::SeqCst);
            if executor.reached_limit() {
                // The local exchange node stops consuming at the limit;
                // remote senders must be cancelled explicitly, and so must
                // the streams still feeding the exchange.
                self.cancel_remote_fragments();
                self.exec_env.stream_mgr().cancel(instance_id);
            }
            self.wait_for_all_backends().into_result()?;
            if self.get_status().is_ok() {
                self.report_query_summary();
            }
            return Ok(None);
        }
        Ok(batch)
    }

    /// Idempotent; safe from any thread. A no-op once `query_status` is
    /// already non-OK (cancellation has then already been initiated).
    pub fn cancel(&self, cause: Option<&Status>) {
        let mut guard = self.lock.lock().expect("coordinator lock");
        if !guard.query_status.is_ok() {
            return;
        }
        guard.query_status = match cause {
            Some(c) if !c.is_ok() => c.clone(),
            _ => Status::cancelled(),
        };
        self.cancel_internal(&mut guard);
    }

    pub fn get_status(&self) -> Status {
        self.lock.lock().expect("coordinator lock").query_status.clone()
    }

    pub fn query_id(&self) -> Option<UniqueId> {
        self.plan.get().map(|p| p.query_id)
    }

    pub fn query_profile(&self) -> Option<&RuntimeProfile> {
        self.query_profile.get()
    }

    pub fn progress(&self) -> Option<&ProgressUpdater> {
        self.progress.get()
    }

    pub fn num_remaining_backends(&self) -> usize {
        self.lock.lock().expect("coordinator lock").num_remaining_backends
    }

    /// Status of one backend, for debug pages and tests.
    pub fn backend_status(&self, backend_num: usize) -> Option<Status> {
        let states = self.backend_exec_states.get()?;
        let state = states.get(backend_num)?;
        Some(state.inner.lock().expect("backend exec state lock").status.clone())
    }

    /// Collect the partitions a write query created, for the catalog
    /// update that follows query completion.
    pub fn prepare_catalog_update(&self, update: &mut CatalogUpdate) -> bool {
        debug_assert!(self.has_called_wait.load(Ordering::SeqCst));
        let guard = self.lock.lock().expect("coordinator lock");
        for partition in guard.partition_row_counts.keys() {
            update.created_partitions.insert(partition.clone());
        }
        !update.created_partitions.is_empty()
    }

    /// Concatenated error lines from the local fragment and every backend.
    pub fn get_error_log(&self) -> String {
        let mut out = String::new();
        let _guard = self.lock.lock().expect("coordinator lock");
        if let Some(executor) = self.executor.get() {
            let state = executor.runtime_state();
            if !state.error_log_is_empty() {
                out.push_str(&state.error_log());
                out.push('\n');
            }
        }
        if let Some(states) = self.backend_exec_states.get() {
            for (i, state) in states.iter().enumerate() {
                let inner = state.inner.lock().expect("backend exec state lock");
                if !inner.error_log.is_empty() {
                    out.push_str(&format!("Backend {}:{}\n", i, inner.error_log.join("\n")));
                }
            }
        }
        out
    }

    /// Worker report callback; runs on RPC handler threads.
    pub fn update_fragment_exec_status(
        &self,
        params: ReportExecStatusParams,
    ) -> Result<(), Status> {
        let plan = self
            .plan
            .get()
            .ok_or_else(|| Status::internal_error("report before Exec()"))?;
        debug!(
            "UpdateFragmentExecStatus() query_id={} backend_num={} status={} done={}",
            plan.query_id, params.backend_num, params.status, params.done
        );
        let states = self
            .backend_exec_states
            .get()
            .ok_or_else(|| Status::internal_error("unknown backend number"))?;
        if params.backend_num < 0 || params.backend_num as usize >= states.len() {
            return Err(Status::internal_error("unknown backend number"));
        }
        let state = &states[params.backend_num as usize];
        debug_assert_eq!(state.backend_num, params.backend_num as usize);

        let status = params.status.clone();
        {
            let mut inner = state.inner.lock().expect("backend exec state lock");
            if !status.is_ok() {
                // Cancellation may already have set CANCELLED here while a
                // non-error report from before the cancel was in flight;
                // never go back from error to OK.
                inner.status = status.clone();
            }
            inner.done = params.done;
            if inner.status.is_ok() {
                // Profile updates stop once the state is non-OK; the
                // summary pass sorts children and must not race with
                // concurrent updates. Updates dropped this way are lost.
                state.profile.update(&params.profile);
                state.profile.compute_time_in_profile();
                self.update_average_profile(state);
            }
            if !inner.profile_created {
                collect_scan_node_counters(&state.profile, &mut inner.aggregate_counters);
            }
            inner.profile_created = true;

            if !params.error_log.is_empty() {
                inner.error_log.extend(params.error_log.iter().cloned());
                debug!(
                    "instance_id={} error log: {}",
                    state.fragment_instance_id,
                    inner.error_log.join("\n")
                );
            }
            let delta = inner.update_num_scan_ranges_completed();
            if let Some(progress) = self.progress.get() {
                progress.update(delta);
            }
        }

        if params.done {
            if let Some(insert_exec_status) = &params.insert_exec_status {
                let mut guard = self.lock.lock().expect("coordinator lock");
                for (partition, rows) in &insert_exec_status.num_appended_rows {
                    *guard.partition_row_counts.entry(partition.clone()).or_insert(0) += rows;
                }
                for (src, dst) in &insert_exec_status.files_to_move {
                    guard
                        .files_to_move
                        .entry(src.clone())
                        .or_insert_with(|| dst.clone());
                }
                if let Some(stats) = &insert_exec_status.insert_stats {
                    merge_insert_stats(stats, &mut guard.partition_insert_stats);
                }
            }
        }

        // Any true error aborts the query; a CANCELLED report after the
        // local fragment drained is the expected shutdown path.
        if !(self.returned_all_results.load(Ordering::SeqCst) && status.is_cancelled())
            && !status.is_ok()
        {
            self.update_status(status, Some(state.fragment_instance_id));
            return Ok(());
        }

        if params.done {
            let mut guard = self.lock.lock().expect("coordinator lock");
            {
                let mut inner = state.inner.lock().expect("backend exec state lock");
                inner.stopwatch.stop();
            }
            debug_assert!(guard.num_remaining_backends > 0);
            info!(
                "Backend {} completed, {} remaining: query_id={}",
                state.backend_num,
                guard.num_remaining_backends.saturating_sub(1),
                plan.query_id
            );
            if guard.num_remaining_backends > 1 {
                // Log the first backend still in progress as a debugging
                // aid for backend deadlocks.
                for other in states.iter() {
                    let inner = other.inner.lock().expect("backend exec state lock");
                    if !inner.done {
                        debug!(
                            "query_id={}: first in-progress backend: {}",
                            plan.query_id, other.backend_address
                        );
                        break;
                    }
                }
            }
            guard.num_remaining_backends = guard.num_remaining_backends.saturating_sub(1);
            if guard.num_remaining_backends == 0 {
                self.backend_completion_cv.notify_all();
            }
        }

        Ok(())
    }

    /// Current total of a scan node's completed ranges across every backend
    /// plus the local fragment.
    pub fn compute_total_scan_ranges_complete(&self, node_id: i32) -> i64 {
        let states: &[Arc<BackendExecState>] = self
            .backend_exec_states
            .get()
            .map(|s| s.as_slice())
            .unwrap_or(&[]);
        compute_total_scan_ranges_complete(states, &self.coordinator_counters, node_id)
    }

    pub fn compute_total_throughput(&self, node_id: i32) -> i64 {
        let states: &[Arc<BackendExecState>] = self
            .backend_exec_states
            .get()
            .map(|s| s.as_slice())
            .unwrap_or(&[]);
        compute_total_throughput(states, &self.coordinator_counters, node_id)
    }

    fn create_aggregate_counters(&self, fragments: &[PlanFragment]) {
        let query_profile = self.query_profile.get().expect("query profile");
        let states = self
            .backend_exec_states
            .get()
            .expect("backend exec states")
            .clone();
        for fragment in fragments {
            for node in &fragment.plan {
                if !node.kind.is_scan() {
                    continue;
                }
                let node_id = node.node_id;
                {
                    let states = states.clone();
                    let coordinator_counters = Arc::clone(&self.coordinator_counters);
                    query_profile.add_derived_counter(
                        format!("{} (id={}) Throughput", node.kind.name(), node_id),
                        CounterUnit::BytesPerSecond,
                        Box::new(move || {
                            compute_total_throughput(&states, &coordinator_counters, node_id)
                        }),
                    );
                }
                {
                    let states = states.clone();
                    let coordinator_counters = Arc::clone(&self.coordinator_counters);
                    query_profile.add_derived_counter(
                        format!("{} (id={}) Completed scan ranges", node.kind.name(), node_id),
                        CounterUnit::Unit,
                        Box::new(move || {
                            compute_total_scan_ranges_complete(
                                &states,
                                &coordinator_counters,
                                node_id,
                            )
                        }),
                    );
                }
            }
        }
    }

    /// Fold per-instance byte assignments into each fragment's summary and
    /// attach the split-size balance line to the averaged profile.
    fn print_backend_info(&self) {
        let states = self.backend_exec_states.get().expect("backend exec states");
        let profiles = self.fragment_profiles.get().expect("fragment profiles");
        for state in states.iter() {
            profiles[state.fragment_idx]
                .bytes_assigned
                .lock()
                .expect("bytes assigned lock")
                .observe(state.total_split_size as f64);
        }
        let first = if self.executor.get().is_some() { 1 } else { 0 };
        for data in profiles.iter().skip(first) {
            let acc = data
                .bytes_assigned
                .lock()
                .expect("bytes assigned lock")
                .clone();
            let label = format!(
                " min: {}, max: {}, avg: {}, stddev: {}",
                pretty_bytes(acc.min()),
                pretty_bytes(acc.max()),
                pretty_bytes(acc.mean()),
                pretty_bytes(acc.stddev())
            );
            data.averaged_profile.add_info_string("split sizes", label);
        }
    }

    fn update_average_profile(&self, state: &BackendExecState) {
        let profiles = self.fragment_profiles.get().expect("fragment profiles");
        debug_assert!(state.fragment_idx < profiles.len());
        let data = &profiles[state.fragment_idx];
        data.averaged_profile.update_average(&state.profile);
        if let Some(root) = &data.root_profile {
            root.add_child(state.profile.clone());
        }
    }

    fn compute_fragment_summary_stats(&self, state: &BackendExecState) {
        let profiles = self.fragment_profiles.get().expect("fragment profiles");
        debug_assert!(state.fragment_idx < profiles.len());
        let data = &profiles[state.fragment_idx];

        let completion_time_ns = state
            .inner
            .lock()
            .expect("backend exec state lock")
            .stopwatch
            .elapsed_ns();
        data.completion_times
            .lock()
            .expect("completion times lock")
            .observe(completion_time_ns as f64);
        let seconds = completion_time_ns as f64 / 1e9;
        let rate = if seconds > 0.0 {
            state.total_split_size as f64 / seconds
        } else {
            0.0
        };
        data.rates.lock().expect("rates lock").observe(rate);

        // The instance may never have reported a profile; the grouping
        // child insert is a no-op when it is already present.
        if let Some(root) = &data.root_profile {
            root.add_child(state.profile.clone());
        }
    }

    /// Append summary information to the query profile: averaged remote
    /// fragment profiles, duration and rate summaries, per-host peak
    /// memory. Only meaningful once the query got past startup.
    fn report_query_summary(&self) {
        if !self.has_called_wait.load(Ordering::SeqCst) {
            return;
        }

        if let Some(executor) = self.executor.get() {
            executor.profile().compute_time_in_profile();
        }

        let Some(states) = self.backend_exec_states.get() else { return };
        if states.is_empty() {
            return;
        }

        for state in states.iter() {
            state.profile.compute_time_in_profile();
            self.update_average_profile(state);
            self.compute_fragment_summary_stats(state);
        }

        let profiles = self.fragment_profiles.get().expect("fragment profiles");
        let first = if self.executor.get().is_some() { 1 } else { 0 };
        for data in profiles.iter().skip(first) {
            if let Some(root) = &data.root_profile {
                root.sort_children_by_total_time();
            }
            let completion_times = data
                .completion_times
                .lock()
                .expect("completion times lock")
                .clone();
            let rates = data.rates.lock().expect("rates lock").clone();
            let times_label = format!(
                "min:{}  max:{}  mean: {}  stddev:{}",
                pretty_time_ns(completion_times.min()),
                pretty_time_ns(completion_times.max()),
                pretty_time_ns(completion_times.mean()),
                pretty_time_ns(completion_times.stddev())
            );
            let rates_label = format!(
                "min:{}  max:{}  mean:{}  stddev:{}",
                pretty_rate(rates.min()),
                pretty_rate(rates.max()),
                pretty_rate(rates.mean()),
                pretty_rate(rates.stddev())
            );
            data.averaged_profile
                .add_info_string("completion times", times_label);
            data.averaged_profile
                .add_info_string("execution rates", rates_label);
            data.averaged_profile
                .add_info_string("num instances", data.num_instances.to_string());
        }

        let mut per_node_peak_mem: HashMap<NetworkAddress, i64> = HashMap::new();
        if let Some(executor) = self.executor.get() {
            // The coordinator fragment is not in backend_exec_states.
            if let Some(counter) = executor.profile().get_counter(PEAK_MEMORY_COUNTER) {
                per_node_peak_mem.insert(self.exec_env.coord_address().clone(), counter.value());
            }
        }
        for state in states.iter() {
            let Some(counter) = state.profile.get_counter(PEAK_MEMORY_COUNTER) else {
                continue;
            };
            let entry = per_node_peak_mem
                .entry(state.backend_address.clone())
                .or_insert(0);
            if counter.value() > *entry {
                *entry = counter.value();
            }
        }
        if !per_node_peak_mem.is_empty() {
            let mut entries: Vec<(String, i64)> = per_node_peak_mem
                .into_iter()
                .map(|(addr, v)| (addr.to_string(), v))
                .collect();
            entries.sort();
            let info = entries
                .iter()
                .map(|(addr, v)| format!("{}({}) ", addr, pretty_bytes(*v as f64)))
                .collect::<String>();
            if let Some(query_profile) = self.query_profile.get() {
                query_profile.add_info_string("Per Node Peak Memory Usage", info);
            }
        }
    }

    /// Adopt a non-OK status into `query_status` and initiate cancellation;
    /// returns the (possibly pre-existing) query status. CANCELLED reports
    /// are ignored once all results have been returned.
    fn update_status(&self, status: Status, failed_instance: Option<UniqueId>) -> Status {
        {
            let mut guard = self.lock.lock().expect("coordinator lock");
            if self.returned_all_results.load(Ordering::SeqCst) && status.is_cancelled() {
                return guard.query_status.clone();
            }
            if status.is_ok() {
                return guard.query_status.clone();
            }
            if !guard.query_status.is_ok() {
                return guard.query_status.clone();
            }
            guard.query_status = status.clone();
            self.cancel_internal(&mut guard);
        }
        if let (Some(instance_id), Some(plan)) = (failed_instance, self.plan.get()) {
            info!(
                "Query id={} failed because fragment id={} failed.",
                plan.query_id, instance_id
            );
        }
        status
    }

    fn wait_for_all_backends(&self) -> Status {
        let mut guard = self.lock.lock().expect("coordinator lock");
        while guard.num_remaining_backends > 0 && guard.query_status.is_ok() {
            debug!(
                "Coordinator waiting for backends to finish, {} remaining",
                guard.num_remaining_backends
            );
            guard = self
                .backend_completion_cv
                .wait(guard)
                .expect("coordinator lock");
        }
        if guard.query_status.is_ok() {
            debug!("All backends finished successfully.");
        } else {
            debug!("All backends finished due to one or more errors.");
        }
        guard.query_status.clone()
    }

    // Caller holds the coordinator lock and has set query_status.
    fn cancel_internal(&self, guard: &mut QueryExecState) {
        if let Some(plan) = self.plan.get() {
            info!("Cancel() query_id={}", plan.query_id);
        }
        debug_assert!(!guard.query_status.is_ok());

        if let Some(executor) = self.executor.get() {
            executor.cancel();
        }

        self.cancel_remote_fragments();

        // Report the summary with whatever progress the query made.
        self.report_query_summary();
    }

    /// Best-effort cancel of every initiated, still-running instance; one
    /// transparent reopen-retry per RPC, failures noted on the state.
    fn cancel_remote_fragments(&self) {
        let Some(states) = self.backend_exec_states.get() else { return };
        let Some(plan) = self.plan.get() else { return };
        for state in states.iter() {
            // Per-state locking synchronizes with reports, which do not
            // take the coordinator lock to set their status.
            let mut inner = state.inner.lock().expect("backend exec state lock");

            // Already terminated with an error: nothing left to cancel.
            if !inner.status.is_ok() {
                continue;
            }
            // The start RPC never went out.
            if !inner.initiated {
                continue;
            }
            if inner.done {
                continue;
            }

            // Marks the cancel as issued so it happens only once.
            inner.status = Status::cancelled();

            let mut client = match self
                .exec_env
                .backend_clients()
                .get_client(&state.backend_address)
            {
                Ok(client) => client,
                Err(_) => continue,
            };

            let params = CancelPlanFragmentParams {
                protocol_version: PROTOCOL_VERSION,
                fragment_instance_id: state.fragment_instance_id,
            };
            info!(
                "sending CancelPlanFragment rpc for instance_id={} backend={}",
                state.fragment_instance_id, state.backend_address
            );
            let result = match client.cancel_plan_fragment(&params) {
                Ok(result) => Ok(result),
                Err(e) => {
                    debug!("Retrying CancelPlanFragment: {}", e);
                    match client.reopen() {
                        Ok(()) => client.cancel_plan_fragment(&params),
                        Err(status) => {
                            inner.status.add_error(&status);
                            continue;
                        }
                    }
                }
            };
            match result {
                Ok(result) => {
                    if !result.status.is_ok() {
                        inner
                            .status
                            .add_error_msg(result.status.error_msgs().join("; "));
                    }
                }
                Err(e) => {
                    inner.status.add_error_msg(format!(
                        "CancelPlanFragment rpc query_id={} instance_id={} failed: {}",
                        plan.query_id, state.fragment_instance_id, e
                    ));
                    continue;
                }
            }
        }

        self.backend_completion_cv.notify_all();
    }

    /// Promote staged write output into its final location. Runs even when
    /// the query failed (the staging tree still has to go), surfacing the
    /// earlier error in that case.
    fn finalize_query(&self) -> Result<(), Status> {
        let plan = self.plan.get().expect("plan state");
        debug_assert!(self.has_called_wait.load(Ordering::SeqCst));
        debug_assert!(plan.needs_finalization);
        let finalize_params = plan.finalize_params.as_ref().expect("finalize params");

        info!("Finalizing query: {}", plan.query_id);
        let _finalization_timer = self
            .finalization_timer
            .get()
            .map(|c| ScopedTimer::new(Arc::clone(c)));
        let mut return_status = self.get_status();
        if return_status.is_ok() {
            return_status = match self.finalize_successful_insert(finalize_params) {
                Ok(()) => Status::ok(),
                Err(e) => e,
            };
        }

        let staging_dir = format!(
            "{}/{}/",
            finalize_params.staging_dir,
            plan.query_id.to_path_string()
        );
        info!("Removing staging directory: {}", staging_dir);
        if let Err(e) = self.exec_env.fs().delete(&staging_dir, true) {
            warn!("failed to remove staging directory {}: {:#}", staging_dir, e);
        }

        return_status.into_result()
    }

    fn finalize_successful_insert(&self, finalize_params: &FinalizeParams) -> Result<(), Status> {
        let query_profile = self.query_profile.get().expect("query profile");
        let (partition_row_counts, files_to_move) = {
            let guard = self.lock.lock().expect("coordinator lock");
            (
                guard.partition_row_counts.clone(),
                guard.files_to_move.clone(),
            )
        };
        let fs = Arc::clone(self.exec_env.fs());
        let pool = self.exec_env.fs_op_pool();

        // 1. For OVERWRITE, scrub the target; 2. create partition dirs.
        let mut partition_create_ops = FileOperationSet::new();
        {
            let _t = query_profile.scoped_timer("Overwrite/PartitionCreationTimer");
            for partition_key in partition_row_counts.keys() {
                let part_path =
                    format!("{}/{}", finalize_params.hdfs_base_dir, partition_key);
                if finalize_params.is_overwrite {
                    if partition_key.is_empty() {
                        // Writing the root: the table is not partitioned.
                        debug_assert_eq!(partition_row_counts.len(), 1);
                        // Only regular data files are deleted; directories
                        // in the root may be sink staging trees or
                        // unrelated non-table data.
                        let entries = fs.list_files(&part_path).map_err(|e| {
                            Status::runtime_error(format!(
                                "Could not list directory: {part_path}: {e:#}"
                            ))
                        })?;
                        for entry in entries {
                            if entry.is_file && !is_hidden_file(&entry.name) {
                                partition_create_ops.add(FileOp::Delete(entry.path));
                            }
                        }
                    } else {
                        // TODO: replace the exists/delete pair with an
                        // atomic create once the fs client supports one;
                        // a third party can delete the directory between
                        // the check and the wipe.
                        if fs.exists(&part_path).unwrap_or(false) {
                            partition_create_ops.add(FileOp::DeleteThenCreate(part_path));
                        } else {
                            partition_create_ops.add(FileOp::CreateDir(part_path));
                        }
                    }
                } else {
                    partition_create_ops.add(FileOp::CreateDir(part_path));
                }
            }

            let errors = partition_create_ops.execute(pool, &fs);
            let num_errors = errors.len();
            for (op, msg) in &errors {
                // The directory may have been created concurrently;
                // permission problems will resurface at the move phase.
                if !op.is_create_dir() {
                    return Err(Status::runtime_error(format!(
                        "Error(s) deleting partition directories. First error (of {num_errors}) was: {msg}"
                    )));
                }
            }
        }

        // 3. Rename staged files; the batch completes before any staging
        // directory deletion so no staged file vanishes mid-rename.
        let mut move_ops = FileOperationSet::new();
        let mut dir_deletion_ops = FileOperationSet::new();
        for (src, dst) in &files_to_move {
            if dst.is_empty() {
                // Empty destination marks a staging directory deletion.
                debug!("Deleting file: {}", src);
                dir_deletion_ops.add(FileOp::Delete(src.clone()));
            } else {
                debug!("Moving tmp file: {} to {}", src, dst);
                move_ops.add(FileOp::Rename {
                    src: src.clone(),
                    dst: dst.clone(),
                });
            }
        }
        {
            let _t = query_profile.scoped_timer("FileMoveTimer");
            let errors = move_ops.execute(pool, &fs);
            if !errors.is_empty() {
                return Err(Status::runtime_error(format!(
                    "Error(s) moving partition files. First error (of {}) was: {}",
                    errors.len(),
                    errors[0].1
                )));
            }
        }

        // 4. Delete the staging directories.
        {
            let _t = query_profile.scoped_timer("FileDeletionTimer");
            let errors = dir_deletion_ops.execute(pool, &fs);
            if !errors.is_empty() {
                return Err(Status::runtime_error(format!(
                    "Error(s) deleting staging directories. First error (of {}) was: {}",
                    errors.len(),
                    errors[0].1
                )));
            }
        }

        Ok(())
    }
}

/// Issue one instance's start RPC; holds the state lock for the duration so
/// a concurrent cancel observes either not-initiated or the final outcome.
fn exec_remote_fragment(env: &ExecEnv, query_id: UniqueId, state: &BackendExecState) -> Status {
    debug!(
        "making rpc: ExecPlanFragment query_id={} instance_id={} host={}",
        query_id, state.fragment_instance_id, state.backend_address
    );
    let mut inner = state.inner.lock().expect("backend exec state lock");

    let mut client = match env.backend_clients().get_client(&state.backend_address) {
        Ok(client) => client,
        Err(status) => {
            inner.status = status.clone();
            return status;
        }
    };

    let result = match client.exec_plan_fragment(&state.rpc_params) {
        Ok(result) => Ok(result),
        Err(e) => {
            // A backend that restarted can leave a stale cached connection
            // behind; reopen once and retry before declaring failure.
            debug!("Retrying ExecPlanFragment: {}", e);
            match client.reopen() {
                Ok(()) => client.exec_plan_fragment(&state.rpc_params),
                Err(status) => {
                    inner.status = status.clone();
                    return status;
                }
            }
        }
    };

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            let msg = format!(
                "ExecPlanFragment rpc query_id={} instance_id={} failed: {}",
                query_id, state.fragment_instance_id, e
            );
            info!("{}", msg);
            inner.status = Status::runtime_error(msg);
            return inner.status.clone();
        }
    };

    inner.status = result.status;
    if inner.status.is_ok() {
        inner.initiated = true;
        inner.stopwatch.start();
    }
    inner.status.clone()
}

fn build_exec_plan_fragment_params(
    schedule: &QuerySchedule,
    plan: &PlanState,
    fragment_idx: usize,
    instance_idx: usize,
    backend_num: i32,
    coord: &NetworkAddress,
    debug_options: Option<&DebugOptions>,
) -> ExecPlanFragmentParams {
    let params = &schedule.exec_params[fragment_idx];
    let exec_host = &params.hosts[instance_idx];
    // Scan ranges may not always be assigned to this host.
    let scan_ranges = params
        .scan_range_assignment
        .get(exec_host)
        .cloned()
        .unwrap_or_default();
    let (reserved_resource, local_resource_address) = if schedule.has_reservation() {
        match schedule.resource_hostport(exec_host) {
            Some(resource_hostport) => {
                let allocation = schedule
                    .reservation
                    .as_ref()
                    .and_then(|r| r.allocated_resources.get(&resource_hostport).cloned());
                (allocation, Some(resource_hostport))
            }
            None => (None, None),
        }
    } else {
        (None, None)
    };
    ExecPlanFragmentParams {
        protocol_version: PROTOCOL_VERSION,
        fragment: plan.fragments[fragment_idx].clone(),
        desc_tbl: plan.desc_tbl.clone(),
        params: PlanFragmentExecParams {
            query_id: plan.query_id,
            fragment_instance_id: params.instance_ids[instance_idx],
            per_node_scan_ranges: scan_ranges,
            per_exch_num_senders: params.per_exch_num_senders.clone(),
            destinations: params.destinations.clone(),
            request_pool: schedule.request_pool.clone(),
            debug_node_id: debug_options.map(|d| d.node_id),
            debug_phase: debug_options.map(|d| d.phase),
            debug_action: debug_options.map(|d| d.action),
        },
        coord: coord.clone(),
        backend_num,
        query_ctx: plan.query_ctx.clone(),
        reserved_resource,
        local_resource_address,
    }
}

fn compute_total_split_size(per_node_scan_ranges: &PerNodeScanRanges) -> i64 {
    let mut total = 0;
    for ranges in per_node_scan_ranges.values() {
        for params in ranges {
            if let ScanRange::FileSplit { length, .. } = &params.scan_range {
                total += *length;
            }
        }
    }
    total
}

/// Walk a profile tree and register every exec node's scan counters, keyed
/// by the plan node id carried in the profile metadata.
fn collect_scan_node_counters(profile: &RuntimeProfile, counters: &mut FragmentInstanceCounters) {
    for child in profile.all_children() {
        let id = child.metadata();
        if id == INVALID_PLAN_NODE_ID {
            continue;
        }
        let id = id as i32;
        if let Some(counter) = child.get_counter(TOTAL_THROUGHPUT_COUNTER) {
            counters.throughput_counters.insert(id, counter);
        }
        if let Some(counter) = child.get_counter(SCAN_RANGES_COMPLETE_COUNTER) {
            counters.scan_ranges_complete_counters.insert(id, counter);
        }
    }
}

fn compute_total_throughput(
    states: &[Arc<BackendExecState>],
    coordinator_counters: &Mutex<FragmentInstanceCounters>,
    node_id: i32,
) -> i64 {
    let mut value: i64 = states.iter().map(|s| s.node_throughput(node_id)).sum();
    let local = {
        coordinator_counters
            .lock()
            .expect("coordinator counters lock")
            .throughput_counters
            .get(&node_id)
            .cloned()
    };
    if let Some(counter) = local {
        value += counter.value();
    }
    value
}

fn compute_total_scan_ranges_complete(
    states: &[Arc<BackendExecState>],
    coordinator_counters: &Mutex<FragmentInstanceCounters>,
    node_id: i32,
) -> i64 {
    let mut value: i64 = states
        .iter()
        .map(|s| s.num_scan_ranges_completed(node_id))
        .sum();
    let local = {
        coordinator_counters
            .lock()
            .expect("coordinator counters lock")
            .scan_ranges_complete_counters
            .get(&node_id)
            .cloned()
    };
    if let Some(counter) = local {
        value += counter.value();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ScanRangeParams;

    #[test]
    fn debug_action_triple_applies_to_all_backends() {
        let options = QueryOptions {
            debug_action: Some("2:OPEN:FAIL".to_string()),
            ..Default::default()
        };
        let parsed = process_query_options(&options).expect("parse");
        assert_eq!(parsed.backend_num, -1);
        assert_eq!(parsed.node_id, 2);
        assert_eq!(parsed.phase, ExecNodePhase::Open);
        assert_eq!(parsed.action, DebugAction::Fail);
    }

    #[test]
    fn debug_action_quad_targets_one_backend() {
        let options = QueryOptions {
            debug_action: Some("1:2:prepare:wait".to_string()),
            ..Default::default()
        };
        let parsed = process_query_options(&options).expect("parse");
        assert_eq!(parsed.backend_num, 1);
        assert_eq!(parsed.node_id, 2);
        assert_eq!(parsed.phase, ExecNodePhase::Prepare);
        assert_eq!(parsed.action, DebugAction::Wait);
    }

    #[test]
    fn close_wait_debug_action_is_rejected() {
        let options = QueryOptions {
            debug_action: Some("0:CLOSE:WAIT".to_string()),
            ..Default::default()
        };
        assert!(process_query_options(&options).is_none());
    }

    #[test]
    fn malformed_debug_action_is_ignored() {
        for raw in ["", "OPEN", "1:2:3:4:5", "0:NOT_A_PHASE:WAIT"] {
            let options = QueryOptions {
                debug_action: Some(raw.to_string()),
                ..Default::default()
            };
            assert!(process_query_options(&options).is_none(), "raw={raw}");
        }
    }

    #[test]
    fn total_split_size_counts_only_file_splits() {
        let mut per_node: PerNodeScanRanges = PerNodeScanRanges::new();
        per_node.insert(
            0,
            vec![
                ScanRangeParams {
                    scan_range: ScanRange::FileSplit {
                        path: "/data/a".to_string(),
                        offset: 0,
                        length: 100,
                    },
                    volume_id: 0,
                },
                ScanRangeParams {
                    scan_range: ScanRange::KeyRange {
                        start_key: "a".to_string(),
                        stop_key: "b".to_string(),
                    },
                    volume_id: 0,
                },
            ],
        );
        per_node.insert(
            5,
            vec![ScanRangeParams {
                scan_range: ScanRange::FileSplit {
                    path: "/data/b".to_string(),
                    offset: 100,
                    length: 50,
                },
                volume_id: 1,
            }],
        );
        assert_eq!(compute_total_split_size(&per_node), 150);
    }

    #[test]
    fn scan_node_counters_discovered_by_metadata() {
        let profile = RuntimeProfile::new("Instance");
        let scan = profile.child("HDFS_SCAN_NODE (id=3)");
        scan.set_metadata(3);
        scan.add_counter(SCAN_RANGES_COMPLETE_COUNTER, CounterUnit::Unit)
            .set(7);
        scan.add_counter(TOTAL_THROUGHPUT_COUNTER, CounterUnit::BytesPerSecond)
            .set(1024);
        let other = profile.child("EXCHANGE_NODE (id=4)");
        other.set_metadata(4);

        let mut counters = FragmentInstanceCounters::default();
        collect_scan_node_counters(&profile, &mut counters);
        assert_eq!(
            counters
                .scan_ranges_complete_counters
                .get(&3)
                .map(|c| c.value()),
            Some(7)
        );
        assert_eq!(
            counters.throughput_counters.get(&3).map(|c| c.value()),
            Some(1024)
        );
        assert!(!counters.scan_ranges_complete_counters.contains_key(&4));
    }
}
