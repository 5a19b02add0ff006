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
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

static CONFIG: OnceLock<BorealisConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static BorealisConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = BorealisConfig::load_from_file(path.as_ref())?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static BorealisConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = BorealisConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("BOREALIS_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let default = PathBuf::from("borealis.toml");
    if default.exists() {
        return Ok(default);
    }

    Err(anyhow!(
        "missing config file: set $BOREALIS_CONFIG or create ./borealis.toml"
    ))
}

#[derive(Clone, Debug, Deserialize)]
pub struct BorealisConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression; takes precedence over
    /// `log_level` when set.
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl BorealisConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: BorealisConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn log_filter(&self) -> String {
        self.log_filter
            .clone()
            .unwrap_or_else(|| self.log_level.clone())
    }
}

impl Default for BorealisConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            server: ServerConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_be_port")]
    pub be_port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_be_port() -> u16 {
        9060
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            be_port: Self::default_be_port(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads issuing ExecPlanFragment/CancelPlanFragment RPCs.
    #[serde(default = "RuntimeConfig::default_rpc_worker_threads")]
    pub rpc_worker_threads: usize,
    /// Worker threads executing bulk file-system operations.
    #[serde(default = "RuntimeConfig::default_fs_op_threads")]
    pub fs_op_threads: usize,
    /// Progress is logged every N percent of completed scan ranges.
    #[serde(default = "RuntimeConfig::default_progress_log_interval_percent")]
    pub progress_log_interval_percent: i32,
}

impl RuntimeConfig {
    fn default_rpc_worker_threads() -> usize {
        8
    }

    fn default_fs_op_threads() -> usize {
        8
    }

    fn default_progress_log_interval_percent() -> i32 {
        1
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rpc_worker_threads: Self::default_rpc_worker_threads(),
            fs_op_threads: Self::default_fs_op_threads(),
            progress_log_interval_percent: Self::default_progress_log_interval_percent(),
        }
    }
}
