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
//! Batched file-system operations executed on a worker pool.
//!
//! Finalization issues directory preparation, renames and deletions in
//! batches; each batch runs to completion and reports the operations that
//! failed, so the caller can decide which failures are tolerable.
use std::sync::mpsc;
use std::sync::Arc;

use threadpool::ThreadPool;

use crate::common::logging::debug;
use crate::fs::FileSystem;

#[derive(Clone, Debug)]
pub enum FileOp {
    /// Recursive delete of a file or directory tree.
    Delete(String),
    /// Recursive wipe followed by re-creation of the directory.
    DeleteThenCreate(String),
    CreateDir(String),
    Rename { src: String, dst: String },
}

impl FileOp {
    pub fn is_create_dir(&self) -> bool {
        matches!(self, FileOp::CreateDir(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FileOp::Delete(_) => "DELETE",
            FileOp::DeleteThenCreate(_) => "DELETE_THEN_CREATE",
            FileOp::CreateDir(_) => "CREATE_DIR",
            FileOp::Rename { .. } => "RENAME",
        }
    }
}

#[derive(Default)]
pub struct FileOperationSet {
    ops: Vec<FileOp>,
}

impl FileOperationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, op: FileOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Run every operation on the pool and block until the batch drains.
    /// Returns the failed operations with their error messages; the batch is
    /// never aborted early, mirroring bulk semantics on a remote store where
    /// sibling operations are independent.
    pub fn execute(
        self,
        pool: &ThreadPool,
        fs: &Arc<dyn FileSystem>,
    ) -> Vec<(FileOp, String)> {
        let (tx, rx) = mpsc::channel();
        let num_ops = self.ops.len();
        for op in self.ops {
            let fs = Arc::clone(fs);
            let tx = tx.clone();
            pool.execute(move || {
                debug!("bulk fs op: {} {:?}", op.kind_name(), op);
                let outcome = apply_op(fs.as_ref(), &op).err().map(|e| (op, format!("{e:#}")));
                // Receiver hangs up only if the caller panicked.
                let _ = tx.send(outcome);
            });
        }
        drop(tx);
        let mut errors = Vec::new();
        for outcome in rx.iter().take(num_ops) {
            if let Some(err) = outcome {
                errors.push(err);
            }
        }
        errors
    }
}

fn apply_op(fs: &dyn FileSystem, op: &FileOp) -> anyhow::Result<()> {
    match op {
        FileOp::Delete(path) => fs.delete(path, true),
        FileOp::DeleteThenCreate(path) => {
            fs.delete(path, true)?;
            fs.create_dir(path)
        }
        FileOp::CreateDir(path) => fs.create_dir(path),
        FileOp::Rename { src, dst } => fs.rename(src, dst),
    }
}
