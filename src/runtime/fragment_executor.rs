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
use std::sync::Arc;

use arrow::record_batch::RecordBatch;

use crate::common::status::Status;
use crate::runtime::profile::RuntimeProfile;
use crate::runtime::runtime_state::RuntimeState;
use crate::service::internal_service::ExecPlanFragmentParams;

/// Executor for the fragment co-located with the coordinator. The actual
/// pipeline machinery lives with the worker-side execution engine; the
/// coordinator only drives this narrow lifecycle.
///
/// `prepare` must run before any remote fragment is started: it registers
/// the fragment's exchange receivers with the stream manager, and remote
/// senders connect to those receivers as soon as they start.
pub trait PlanFragmentExecutor: Send + Sync {
    fn prepare(&mut self, request: &ExecPlanFragmentParams) -> Result<(), Status>;

    /// Starts execution; may block doing significant work.
    fn open(&self) -> Result<(), Status>;

    /// Pull the next row batch; `None` once the fragment is exhausted.
    fn get_next(&self) -> Result<Option<RecordBatch>, Status>;

    fn cancel(&self);

    /// True when the fragment stopped because it hit its row limit.
    fn reached_limit(&self) -> bool;

    /// Give back the execution thread token; the coordinator fragment is
    /// I/O-bound once remote fragments are running.
    fn release_thread_token(&self);

    fn profile(&self) -> RuntimeProfile;

    fn runtime_state(&self) -> Arc<RuntimeState>;
}
