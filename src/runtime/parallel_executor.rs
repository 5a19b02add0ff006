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
use std::sync::mpsc;
use std::sync::Arc;

use threadpool::ThreadPool;

use crate::common::status::Status;

/// Run `f` over every item on the pool and block until all tasks finish.
/// Returns the first non-OK status observed (arrival order); every task
/// runs to completion regardless of sibling failures.
pub fn exec<T, F>(pool: &ThreadPool, items: &[Arc<T>], f: F) -> Status
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> Status + Send + Sync + 'static,
{
    if items.is_empty() {
        return Status::ok();
    }
    let f = Arc::new(f);
    let (tx, rx) = mpsc::channel();
    for item in items {
        let item = Arc::clone(item);
        let f = Arc::clone(&f);
        let tx = tx.clone();
        pool.execute(move || {
            let _ = tx.send(f(item.as_ref()));
        });
    }
    drop(tx);

    let mut result = Status::ok();
    for status in rx {
        if result.is_ok() && !status.is_ok() {
            result = status;
        }
    }
    result
}
