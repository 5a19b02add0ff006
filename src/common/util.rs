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
use std::time::{Duration, Instant};

/// Wall-clock timer that can be started and stopped once per phase.
/// Elapsed time keeps accumulating while running; after `stop()` it is
/// frozen at the accumulated value.
#[derive(Debug, Default)]
pub struct MonotonicStopWatch {
    started_at: Option<Instant>,
    accumulated: Duration,
}

impl MonotonicStopWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(started_at) = self.started_at.take() {
            self.accumulated += started_at.elapsed();
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started_at) => self.accumulated + started_at.elapsed(),
            None => self.accumulated,
        }
    }

    pub fn elapsed_ns(&self) -> i64 {
        clamp_u128_to_i64(self.elapsed().as_nanos())
    }
}

pub fn clamp_u128_to_i64(value: u128) -> i64 {
    if value > i64::MAX as u128 {
        i64::MAX
    } else {
        value as i64
    }
}

/// Streaming min/max/mean/stddev accumulator (Welford's recurrence, so a
/// single pass is enough and no sample vector is retained).
#[derive(Clone, Debug, Default)]
pub struct SummaryStats {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl SummaryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population standard deviation.
    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).sqrt()
        }
    }
}

const KILOBYTE: f64 = 1024.0;
const MEGABYTE: f64 = 1024.0 * KILOBYTE;
const GIGABYTE: f64 = 1024.0 * MEGABYTE;

pub fn pretty_bytes(bytes: f64) -> String {
    let magnitude = bytes.abs();
    if magnitude >= GIGABYTE {
        format!("{:.2} GB", bytes / GIGABYTE)
    } else if magnitude >= MEGABYTE {
        format!("{:.2} MB", bytes / MEGABYTE)
    } else if magnitude >= KILOBYTE {
        format!("{:.2} KB", bytes / KILOBYTE)
    } else {
        format!("{:.0} B", bytes)
    }
}

pub fn pretty_time_ns(ns: f64) -> String {
    let magnitude = ns.abs();
    if magnitude >= 1e9 {
        format!("{:.2}s", ns / 1e9)
    } else if magnitude >= 1e6 {
        format!("{:.2}ms", ns / 1e6)
    } else if magnitude >= 1e3 {
        format!("{:.2}us", ns / 1e3)
    } else {
        format!("{:.0}ns", ns)
    }
}

pub fn pretty_rate(bytes_per_sec: f64) -> String {
    format!("{}/sec", pretty_bytes(bytes_per_sec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_stats_single_value() {
        let mut stats = SummaryStats::new();
        stats.observe(7.0);
        assert_eq!(stats.min(), 7.0);
        assert_eq!(stats.max(), 7.0);
        assert_eq!(stats.mean(), 7.0);
        assert_eq!(stats.stddev(), 0.0);
    }

    #[test]
    fn summary_stats_spread() {
        let mut stats = SummaryStats::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.observe(v);
        }
        assert_eq!(stats.min(), 2.0);
        assert_eq!(stats.max(), 9.0);
        assert_eq!(stats.mean(), 5.0);
        assert!((stats.stddev() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_summary_stats_report_zeroes() {
        let stats = SummaryStats::new();
        assert_eq!(stats.min(), 0.0);
        assert_eq!(stats.max(), 0.0);
        assert_eq!(stats.stddev(), 0.0);
    }

    #[test]
    fn pretty_printers_pick_units() {
        assert_eq!(pretty_bytes(512.0), "512 B");
        assert_eq!(pretty_bytes(2.0 * 1024.0 * 1024.0), "2.00 MB");
        assert_eq!(pretty_time_ns(1_500_000.0), "1.50ms");
        assert_eq!(pretty_rate(1024.0), "1.00 KB/sec");
    }

    #[test]
    fn stopwatch_freezes_after_stop() {
        let mut watch = MonotonicStopWatch::new();
        watch.start();
        std::thread::sleep(Duration::from_millis(5));
        watch.stop();
        let frozen = watch.elapsed_ns();
        assert!(frozen > 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(watch.elapsed_ns(), frozen);
    }
}
