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
use anyhow::{Context, Result};
use opendal::Operator;
use tokio::runtime::Runtime;

use crate::fs::{FileEntry, FileSystem};

pub fn build_fs_operator(root: &str) -> Result<Operator> {
    let builder = opendal::services::Fs::default().root(root);
    let op = Operator::new(builder)
        .context("init opendal fs operator")?
        .finish();
    Ok(op)
}

/// `FileSystem` backed by an opendal `Operator`. opendal's API is async;
/// finalization runs on plain OS threads, so calls are driven through a
/// small dedicated runtime.
pub struct OpendalFileSystem {
    op: Operator,
    rt: Runtime,
}

impl OpendalFileSystem {
    pub fn new(op: Operator) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("build opendal io runtime")?;
        Ok(Self { op, rt })
    }

    /// Local file system rooted at `root`; paths handed to the trait are
    /// interpreted relative to it.
    pub fn for_local_root(root: &str) -> Result<Self> {
        Self::new(build_fs_operator(root)?)
    }

    // opendal paths are root-relative and directories carry a trailing '/'.
    fn file_path(path: &str) -> String {
        path.trim_start_matches('/').to_string()
    }

    fn dir_path(path: &str) -> String {
        let p = path.trim_start_matches('/');
        if p.ends_with('/') {
            p.to_string()
        } else {
            format!("{p}/")
        }
    }
}

impl FileSystem for OpendalFileSystem {
    fn exists(&self, path: &str) -> Result<bool> {
        let as_file = Self::file_path(path);
        let found = self
            .rt
            .block_on(self.op.exists(&as_file))
            .with_context(|| format!("stat {path}"))?;
        if found {
            return Ok(true);
        }
        let as_dir = Self::dir_path(path);
        self.rt
            .block_on(self.op.exists(&as_dir))
            .with_context(|| format!("stat {path}"))
    }

    fn list_files(&self, dir: &str) -> Result<Vec<FileEntry>> {
        let dir_rel = Self::dir_path(dir);
        let entries = self
            .rt
            .block_on(self.op.list(&dir_rel))
            .with_context(|| format!("list {dir}"))?;
        let base = dir.trim_end_matches('/');
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            // Some services yield the listed directory itself.
            if entry.path() == dir_rel {
                continue;
            }
            let name = entry.name().trim_end_matches('/').to_string();
            if name.is_empty() {
                continue;
            }
            out.push(FileEntry {
                path: format!("{base}/{name}"),
                name,
                is_file: entry.metadata().mode().is_file(),
            });
        }
        Ok(out)
    }

    fn create_dir(&self, path: &str) -> Result<()> {
        let dir_rel = Self::dir_path(path);
        self.rt
            .block_on(self.op.create_dir(&dir_rel))
            .with_context(|| format!("create dir {path}"))
    }

    fn delete(&self, path: &str, recursive: bool) -> Result<()> {
        if recursive {
            let rel = Self::file_path(path);
            self.rt
                .block_on(self.op.remove_all(&rel))
                .with_context(|| format!("recursive delete {path}"))
        } else {
            let rel = Self::file_path(path);
            self.rt
                .block_on(self.op.delete(&rel))
                .with_context(|| format!("delete {path}"))
        }
    }

    fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let src_rel = Self::file_path(src);
        let dst_rel = Self::file_path(dst);
        self.rt
            .block_on(self.op.rename(&src_rel, &dst_rel))
            .with_context(|| format!("rename {src} -> {dst}"))
    }
}
