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
//! Hierarchical runtime profiles.
//!
//! A profile is a tree of named counters and info strings. Workers ship
//! their instance profiles as flattened snapshots; the coordinator replays
//! them into its own trees, maintains per-fragment running averages over
//! instance profiles, and registers derived counters whose values are
//! computed on demand from live state.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::common::util::{clamp_u128_to_i64, pretty_bytes, pretty_rate, pretty_time_ns};

/// Wall-clock time of the profiled node, nanoseconds.
pub const TOTAL_TIME_COUNTER: &str = "TotalTime";
/// TotalTime minus the children's TotalTime; set by `compute_time_in_profile`.
pub const LOCAL_TIME_COUNTER: &str = "LocalTime";

/// Metadata value meaning "this profile node is not an exec node".
pub const INVALID_PLAN_NODE_ID: i64 = -1;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CounterUnit {
    Unit,
    Bytes,
    TimeNs,
    BytesPerSecond,
}

#[derive(Debug)]
pub struct Counter {
    name: String,
    unit: CounterUnit,
    value: AtomicI64,
}

pub type CounterRef = Arc<Counter>;

impl Counter {
    pub fn new(name: impl Into<String>, unit: CounterUnit) -> Self {
        Self {
            name: name.into(),
            unit,
            value: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> CounterUnit {
        self.unit
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub name: String,
    pub unit: CounterUnit,
    pub value: i64,
}

/// One node of a flattened profile tree; children follow the node in
/// preorder, `num_children` of them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProfileNodeSnapshot {
    pub name: String,
    pub num_children: i32,
    pub metadata: i64,
    pub counters: Vec<CounterSnapshot>,
    pub info_strings: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProfileTreeSnapshot {
    pub nodes: Vec<ProfileNodeSnapshot>,
}

struct DerivedCounter {
    name: String,
    unit: CounterUnit,
    compute: Box<dyn Fn() -> i64 + Send + Sync>,
}

#[derive(Clone)]
pub struct RuntimeProfile {
    inner: Arc<RuntimeProfileInner>,
}

struct RuntimeProfileInner {
    name: RwLock<String>,
    metadata: AtomicI64,
    counters: Mutex<HashMap<String, CounterRef>>,
    derived_counters: Mutex<Vec<DerivedCounter>>,
    info_strings: Mutex<BTreeMap<String, String>>,
    children: Mutex<Vec<RuntimeProfile>>,
    child_map: Mutex<HashMap<String, RuntimeProfile>>,
    // counter name -> (source profile name -> last reported value); repeated
    // updates from the same instance replace rather than skew the mean.
    avg_state: Mutex<HashMap<String, HashMap<String, i64>>>,
}

impl fmt::Debug for RuntimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeProfile")
            .field("name", &self.name())
            .finish()
    }
}

impl RuntimeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RuntimeProfileInner {
                name: RwLock::new(name.into()),
                metadata: AtomicI64::new(INVALID_PLAN_NODE_ID),
                counters: Mutex::new(HashMap::new()),
                derived_counters: Mutex::new(Vec::new()),
                info_strings: Mutex::new(BTreeMap::new()),
                children: Mutex::new(Vec::new()),
                child_map: Mutex::new(HashMap::new()),
                avg_state: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner
            .name
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let mut guard = self.inner.name.write().unwrap_or_else(|e| e.into_inner());
        *guard = name.into();
    }

    pub fn metadata(&self) -> i64 {
        self.inner.metadata.load(Ordering::Relaxed)
    }

    pub fn set_metadata(&self, md: i64) {
        self.inner.metadata.store(md, Ordering::Relaxed);
    }

    pub fn get_child(&self, name: &str) -> Option<RuntimeProfile> {
        self.inner
            .child_map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn children(&self) -> Vec<RuntimeProfile> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// All transitive children, preorder.
    pub fn all_children(&self) -> Vec<RuntimeProfile> {
        let mut out = Vec::new();
        for child in self.children() {
            out.push(child.clone());
            out.extend(child.all_children());
        }
        out
    }

    /// Adding a child whose name is already present is a no-op.
    pub fn add_child(&self, child: RuntimeProfile) {
        let child_name = child.name();
        {
            let mut map = self
                .inner
                .child_map
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if map.contains_key(&child_name) {
                return;
            }
            map.insert(child_name, child.clone());
        }
        self.inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(child);
    }

    /// Get-or-create a direct child by name.
    pub fn child(&self, name: impl Into<String>) -> RuntimeProfile {
        let name = name.into();
        if let Some(existing) = self.get_child(&name) {
            return existing;
        }
        let child = RuntimeProfile::new(name);
        self.add_child(child.clone());
        child
    }

    pub fn add_counter(&self, name: impl Into<String>, unit: CounterUnit) -> CounterRef {
        let name = name.into();
        let mut guard = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(counter) = guard.get(&name) {
            return Arc::clone(counter);
        }
        let counter = Arc::new(Counter::new(name.clone(), unit));
        guard.insert(name, Arc::clone(&counter));
        counter
    }

    pub fn get_counter(&self, name: &str) -> Option<CounterRef> {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn add_timer(&self, name: impl Into<String>) -> CounterRef {
        self.add_counter(name, CounterUnit::TimeNs)
    }

    pub fn total_time_counter(&self) -> CounterRef {
        self.add_timer(TOTAL_TIME_COUNTER)
    }

    pub fn scoped_timer(&self, name: impl Into<String>) -> ScopedTimer {
        ScopedTimer::new(self.add_timer(name))
    }

    /// Register a pull-based counter; its value is computed from the
    /// supplied callback whenever the profile is read.
    pub fn add_derived_counter(
        &self,
        name: impl Into<String>,
        unit: CounterUnit,
        compute: Box<dyn Fn() -> i64 + Send + Sync>,
    ) {
        self.inner
            .derived_counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(DerivedCounter {
                name: name.into(),
                unit,
                compute,
            });
    }

    pub fn derived_counter_value(&self, name: &str) -> Option<i64> {
        let guard = self
            .inner
            .derived_counters
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        guard.iter().find(|d| d.name == name).map(|d| (d.compute)())
    }

    pub fn add_info_string(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value.into());
    }

    pub fn get_info_string(&self, key: &str) -> Option<String> {
        self.inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn counter_snapshots(&self) -> Vec<CounterSnapshot> {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|c| CounterSnapshot {
                name: c.name().to_string(),
                unit: c.unit(),
                value: c.value(),
            })
            .collect()
    }

    /// Replay a reported snapshot into this tree: counters are overwritten
    /// with the cumulative reported values, info strings merged, missing
    /// children created by name.
    pub fn update(&self, tree: &ProfileTreeSnapshot) {
        if tree.nodes.is_empty() {
            return;
        }
        self.apply_node(&tree.nodes, 0);
    }

    fn apply_node(&self, nodes: &[ProfileNodeSnapshot], idx: usize) -> usize {
        let node = &nodes[idx];
        self.set_metadata(node.metadata);
        for c in &node.counters {
            self.add_counter(c.name.clone(), c.unit).set(c.value);
        }
        for (k, v) in &node.info_strings {
            self.add_info_string(k.clone(), v.clone());
        }
        let mut next = idx + 1;
        for _ in 0..node.num_children {
            if next >= nodes.len() {
                break;
            }
            let child = self.child(nodes[next].name.clone());
            next = child.apply_node(nodes, next);
        }
        next
    }

    /// Flatten this tree into wire form; derived counters are evaluated.
    pub fn to_snapshot(&self) -> ProfileTreeSnapshot {
        let mut nodes = Vec::new();
        self.collect_nodes(&mut nodes);
        ProfileTreeSnapshot { nodes }
    }

    fn collect_nodes(&self, out: &mut Vec<ProfileNodeSnapshot>) {
        let mut counters = self.counter_snapshots();
        {
            let derived = self
                .inner
                .derived_counters
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for d in derived.iter() {
                counters.push(CounterSnapshot {
                    name: d.name.clone(),
                    unit: d.unit,
                    value: (d.compute)(),
                });
            }
        }
        let children = self.children();
        out.push(ProfileNodeSnapshot {
            name: self.name(),
            num_children: children.len() as i32,
            metadata: self.metadata(),
            counters,
            info_strings: self
                .inner
                .info_strings
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        });
        for child in children {
            child.collect_nodes(out);
        }
    }

    /// Fold an instance profile into this running average. Every counter
    /// becomes the mean over the instances seen so far, keyed by the source
    /// profile's name so a re-reporting instance replaces its own sample.
    pub fn update_average(&self, source: &RuntimeProfile) {
        let source_key = source.name();
        {
            let mut avg = self
                .inner
                .avg_state
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for snap in source.counter_snapshots() {
                let per_source = avg.entry(snap.name.clone()).or_default();
                per_source.insert(source_key.clone(), snap.value);
                let sum: i64 = per_source.values().fold(0i64, |acc, v| acc.saturating_add(*v));
                let mean = sum / per_source.len() as i64;
                self.add_counter(snap.name.clone(), snap.unit).set(mean);
            }
        }
        for source_child in source.children() {
            let child = self.child(source_child.name());
            child.set_metadata(source_child.metadata());
            child.update_average(&source_child);
        }
    }

    /// Set `LocalTime` on every node: its TotalTime minus the children's.
    pub fn compute_time_in_profile(&self) {
        let total = self
            .get_counter(TOTAL_TIME_COUNTER)
            .map(|c| c.value())
            .unwrap_or(0);
        let children = self.children();
        let child_total: i64 = children
            .iter()
            .map(|c| {
                c.get_counter(TOTAL_TIME_COUNTER)
                    .map(|c| c.value())
                    .unwrap_or(0)
            })
            .sum();
        self.add_counter(LOCAL_TIME_COUNTER, CounterUnit::TimeNs)
            .set((total - child_total).max(0));
        for child in children {
            child.compute_time_in_profile();
        }
    }

    pub fn total_time(&self) -> i64 {
        self.get_counter(TOTAL_TIME_COUNTER)
            .map(|c| c.value())
            .unwrap_or(0)
    }

    /// Reorder direct children by descending total wall-clock time.
    pub fn sort_children_by_total_time(&self) {
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        children.sort_by_key(|c| std::cmp::Reverse(c.total_time()));
    }

    pub fn pretty_print(&self) -> String {
        let mut out = String::new();
        self.pretty_print_node(&mut out, 0);
        out
    }

    fn pretty_print_node(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{}{}:", indent, self.name());
        for (k, v) in self
            .inner
            .info_strings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
        {
            let _ = writeln!(out, "{}   {}: {}", indent, k, v);
        }
        let mut counters = self.counter_snapshots();
        {
            let derived = self
                .inner
                .derived_counters
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for d in derived.iter() {
                counters.push(CounterSnapshot {
                    name: d.name.clone(),
                    unit: d.unit,
                    value: (d.compute)(),
                });
            }
        }
        counters.sort_by(|a, b| a.name.cmp(&b.name));
        for c in counters {
            let _ = writeln!(
                out,
                "{}   - {}: {}",
                indent,
                c.name,
                pretty_counter_value(c.value, c.unit)
            );
        }
        for child in self.children() {
            child.pretty_print_node(out, depth + 1);
        }
    }
}

pub fn pretty_counter_value(value: i64, unit: CounterUnit) -> String {
    match unit {
        CounterUnit::Unit => value.to_string(),
        CounterUnit::Bytes => pretty_bytes(value as f64),
        CounterUnit::TimeNs => pretty_time_ns(value as f64),
        CounterUnit::BytesPerSecond => pretty_rate(value as f64),
    }
}

pub struct ScopedTimer {
    counter: CounterRef,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(counter: CounterRef) -> Self {
        Self {
            counter,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        let elapsed_ns = clamp_u128_to_i64(self.start.elapsed().as_nanos());
        self.counter.add(elapsed_ns);
    }
}
