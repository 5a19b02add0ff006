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
use std::sync::atomic::{AtomicI64, Ordering};

use crate::common::logging::info;

/// Tracks completion of a known amount of work (scan ranges) and logs a
/// line every `log_interval_percent` of progress.
#[derive(Debug)]
pub struct ProgressUpdater {
    label: String,
    total: i64,
    current: AtomicI64,
    log_interval_percent: i64,
    last_logged_percent: AtomicI64,
}

impl ProgressUpdater {
    pub fn new(label: impl Into<String>, total: i64, log_interval_percent: i64) -> Self {
        Self {
            label: label.into(),
            total,
            current: AtomicI64::new(0),
            log_interval_percent: log_interval_percent.max(1),
            last_logged_percent: AtomicI64::new(0),
        }
    }

    pub fn update(&self, delta: i64) {
        debug_assert!(delta >= 0);
        if delta == 0 || self.total <= 0 {
            return;
        }
        let current = self
            .current
            .fetch_add(delta, Ordering::Relaxed)
            .saturating_add(delta)
            .min(self.total);
        let percent = current * 100 / self.total;
        let last = self.last_logged_percent.load(Ordering::Relaxed);
        if percent - last >= self.log_interval_percent
            && self
                .last_logged_percent
                .compare_exchange(last, percent, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            info!(
                "{}: {} out of {} ({}%) Complete",
                self.label, current, self.total, percent
            );
        }
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn num_complete(&self) -> i64 {
        self.current.load(Ordering::Relaxed).min(self.total.max(0))
    }

    pub fn done(&self) -> bool {
        self.num_complete() >= self.total
    }
}
