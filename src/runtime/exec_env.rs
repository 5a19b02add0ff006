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
//! Shared per-process execution environment, threaded explicitly into the
//! coordinator instead of living behind process globals.
use std::sync::Arc;

use threadpool::ThreadPool;

use crate::common::app_config;
use crate::common::types::UniqueId;
use crate::fs::FileSystem;
use crate::plan::NetworkAddress;
use crate::runtime::fragment_executor::PlanFragmentExecutor;
use crate::service::backend_client::{BackendClientCache, BackendConnectionFactory};
use crate::service::internal_service::CoordinatorRegistry;

/// Manager of the exchange streams feeding local exchange nodes. The
/// coordinator only ever cancels a fragment's receivers.
pub trait DataStreamManager: Send + Sync {
    fn cancel(&self, fragment_instance_id: UniqueId);
}

pub type LocalExecutorFactory = Box<dyn Fn() -> Box<dyn PlanFragmentExecutor> + Send + Sync>;

pub struct ExecEnv {
    coord_address: NetworkAddress,
    backend_clients: BackendClientCache,
    fs: Arc<dyn FileSystem>,
    stream_mgr: Arc<dyn DataStreamManager>,
    local_executor_factory: LocalExecutorFactory,
    coordinator_registry: CoordinatorRegistry,
    rpc_pool: ThreadPool,
    fs_op_pool: ThreadPool,
}

impl ExecEnv {
    pub fn new(
        coord_address: NetworkAddress,
        connection_factory: Box<dyn BackendConnectionFactory>,
        fs: Arc<dyn FileSystem>,
        stream_mgr: Arc<dyn DataStreamManager>,
        local_executor_factory: LocalExecutorFactory,
    ) -> Self {
        let (rpc_threads, fs_op_threads) = app_config::config()
            .ok()
            .map(|cfg| {
                (
                    cfg.runtime.rpc_worker_threads,
                    cfg.runtime.fs_op_threads,
                )
            })
            .unwrap_or((8, 8));
        Self {
            coord_address,
            backend_clients: BackendClientCache::new(connection_factory),
            fs,
            stream_mgr,
            local_executor_factory,
            coordinator_registry: CoordinatorRegistry::new(),
            rpc_pool: ThreadPool::with_name("exec-rpc".to_string(), rpc_threads.max(1)),
            fs_op_pool: ThreadPool::with_name("fs-op".to_string(), fs_op_threads.max(1)),
        }
    }

    pub fn coord_address(&self) -> &NetworkAddress {
        &self.coord_address
    }

    pub fn backend_clients(&self) -> &BackendClientCache {
        &self.backend_clients
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn stream_mgr(&self) -> &Arc<dyn DataStreamManager> {
        &self.stream_mgr
    }

    pub fn create_local_executor(&self) -> Box<dyn PlanFragmentExecutor> {
        (self.local_executor_factory)()
    }

    pub fn coordinator_registry(&self) -> &CoordinatorRegistry {
        &self.coordinator_registry
    }

    pub fn rpc_pool(&self) -> &ThreadPool {
        &self.rpc_pool
    }

    pub fn fs_op_pool(&self) -> &ThreadPool {
        &self.fs_op_pool
    }
}
