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
use anyhow::Result;

pub mod bulk_ops;
pub mod opendal;

/// Narrow file-system surface needed by query finalization. Production uses
/// the opendal-backed implementation; tests substitute an in-memory one.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &str) -> Result<bool>;

    /// Immediate children of `dir` (non-recursive).
    fn list_files(&self, dir: &str) -> Result<Vec<FileEntry>>;

    fn create_dir(&self, path: &str) -> Result<()>;

    fn delete(&self, path: &str, recursive: bool) -> Result<()>;

    fn rename(&self, src: &str, dst: &str) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct FileEntry {
    /// Full path, suitable to hand back to the file system.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub is_file: bool,
}

/// Hidden files are skipped when scrubbing a table root for overwrite:
/// both Hive and this engine treat dot- and underscore-prefixed names as
/// non-data files.
pub fn is_hidden_file(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}
