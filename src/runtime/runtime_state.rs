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
//! Per-fragment-instance execution context for the co-located fragment.
//!
//! The fragment executor populates the write-side outputs (staged files,
//! appended-row counts, insert stats) and the error log while it runs; the
//! coordinator snapshots them after `open()` returns.
use std::collections::HashMap;
use std::sync::Mutex;

use crate::common::types::UniqueId;
use crate::service::internal_service::InsertStats;

#[derive(Debug)]
pub struct RuntimeState {
    fragment_instance_id: UniqueId,
    hdfs_files_to_move: Mutex<HashMap<String, String>>,
    num_appended_rows: Mutex<HashMap<String, i64>>,
    insert_stats: Mutex<HashMap<String, InsertStats>>,
    error_log: Mutex<Vec<String>>,
}

impl RuntimeState {
    pub fn new(fragment_instance_id: UniqueId) -> Self {
        Self {
            fragment_instance_id,
            hdfs_files_to_move: Mutex::new(HashMap::new()),
            num_appended_rows: Mutex::new(HashMap::new()),
            insert_stats: Mutex::new(HashMap::new()),
            error_log: Mutex::new(Vec::new()),
        }
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.fragment_instance_id
    }

    pub fn add_file_to_move(&self, src: impl Into<String>, dst: impl Into<String>) {
        self.hdfs_files_to_move
            .lock()
            .expect("files_to_move lock")
            .insert(src.into(), dst.into());
    }

    pub fn add_appended_rows(&self, partition_key: impl Into<String>, rows: i64) {
        *self
            .num_appended_rows
            .lock()
            .expect("num_appended_rows lock")
            .entry(partition_key.into())
            .or_insert(0) += rows;
    }

    pub fn add_insert_stats(&self, partition_key: impl Into<String>, bytes_written: i64) {
        self.insert_stats
            .lock()
            .expect("insert_stats lock")
            .entry(partition_key.into())
            .or_default()
            .bytes_written += bytes_written;
    }

    pub fn add_error(&self, msg: impl Into<String>) {
        self.error_log.lock().expect("error_log lock").push(msg.into());
    }

    pub fn hdfs_files_to_move(&self) -> HashMap<String, String> {
        self.hdfs_files_to_move
            .lock()
            .expect("files_to_move lock")
            .clone()
    }

    pub fn num_appended_rows(&self) -> HashMap<String, i64> {
        self.num_appended_rows
            .lock()
            .expect("num_appended_rows lock")
            .clone()
    }

    pub fn insert_stats(&self) -> HashMap<String, InsertStats> {
        self.insert_stats.lock().expect("insert_stats lock").clone()
    }

    pub fn error_log_is_empty(&self) -> bool {
        self.error_log.lock().expect("error_log lock").is_empty()
    }

    pub fn error_log(&self) -> String {
        self.error_log.lock().expect("error_log lock").join("\n")
    }
}
