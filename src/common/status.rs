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
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Cancelled,
    InternalError,
    RuntimeError,
}

/// Execution status carried across the coordinator, worker reports and RPC
/// results. Statuses only move from OK to non-OK; callers that need the
/// error-sticky behavior enforce it at the point of assignment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Status {
    code: StatusCode,
    error_msgs: Vec<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            error_msgs: Vec::new(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            code: StatusCode::Cancelled,
            error_msgs: Vec::new(),
        }
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self {
            code: StatusCode::InternalError,
            error_msgs: vec![msg.into()],
        }
    }

    pub fn runtime_error(msg: impl Into<String>) -> Self {
        Self {
            code: StatusCode::RuntimeError,
            error_msgs: vec![msg.into()],
        }
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == StatusCode::Cancelled
    }

    pub fn error_msgs(&self) -> &[String] {
        &self.error_msgs
    }

    /// Append a message without overwriting the existing code. An OK status
    /// that gains a message becomes a runtime error.
    pub fn add_error_msg(&mut self, msg: impl Into<String>) {
        if self.code == StatusCode::Ok {
            self.code = StatusCode::RuntimeError;
        }
        self.error_msgs.push(msg.into());
    }

    /// Fold another status's messages into this one, keeping this code.
    pub fn add_error(&mut self, other: &Status) {
        for msg in &other.error_msgs {
            self.add_error_msg(msg.clone());
        }
    }

    pub fn message(&self) -> String {
        self.error_msgs.join("\n")
    }

    pub fn into_result(self) -> Result<(), Status> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            StatusCode::Ok => write!(f, "OK"),
            StatusCode::Cancelled => write!(f, "CANCELLED"),
            StatusCode::InternalError => write!(f, "INTERNAL_ERROR: {}", self.message()),
            StatusCode::RuntimeError => write!(f, "RUNTIME_ERROR: {}", self.message()),
        }
    }
}
