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
//! Client side of the worker-facing internal service.
//!
//! Connections are cached per backend address and checked back in on drop.
//! A backend that restarted can leave a stale cached connection behind; the
//! caller handles that with one `reopen()` followed by a retry of the RPC.
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::common::logging::debug;
use crate::common::status::Status;
use crate::plan::NetworkAddress;
use crate::service::internal_service::{
    CancelPlanFragmentParams, CancelPlanFragmentResult, ExecPlanFragmentParams,
    ExecPlanFragmentResult,
};

/// Failure of the transport itself (connect, send, receive), as opposed to
/// a non-OK application status carried inside a successful response.
#[derive(Debug)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TransportError {}

/// One open connection to a worker's internal service.
pub trait BackendService: Send {
    fn exec_plan_fragment(
        &mut self,
        params: &ExecPlanFragmentParams,
    ) -> Result<ExecPlanFragmentResult, TransportError>;

    fn cancel_plan_fragment(
        &mut self,
        params: &CancelPlanFragmentParams,
    ) -> Result<CancelPlanFragmentResult, TransportError>;
}

pub trait BackendConnectionFactory: Send + Sync {
    fn connect(&self, address: &NetworkAddress) -> Result<Box<dyn BackendService>, TransportError>;
}

pub struct BackendClientCache {
    factory: Box<dyn BackendConnectionFactory>,
    clients: Mutex<HashMap<NetworkAddress, Vec<Box<dyn BackendService>>>>,
}

impl BackendClientCache {
    pub fn new(factory: Box<dyn BackendConnectionFactory>) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Check out a connection for `address`, opening one if the cache is
    /// empty. Connect failures surface as a runtime-error status.
    pub fn get_client(&self, address: &NetworkAddress) -> Result<BackendConnection<'_>, Status> {
        let cached = self
            .clients
            .lock()
            .expect("backend client cache lock")
            .get_mut(address)
            .and_then(|v| v.pop());
        let client = match cached {
            Some(client) => client,
            None => {
                debug!("opening backend connection to {}", address);
                self.connect(address)?
            }
        };
        Ok(BackendConnection {
            cache: self,
            address: address.clone(),
            client: Some(client),
        })
    }

    fn connect(&self, address: &NetworkAddress) -> Result<Box<dyn BackendService>, Status> {
        self.factory.connect(address).map_err(|e| {
            Status::runtime_error(format!("Couldn't open transport for {address}: {e}"))
        })
    }

    fn return_client(&self, address: NetworkAddress, client: Box<dyn BackendService>) {
        self.clients
            .lock()
            .expect("backend client cache lock")
            .entry(address)
            .or_default()
            .push(client);
    }
}

/// Checked-out connection; returns itself to the cache on drop.
pub struct BackendConnection<'a> {
    cache: &'a BackendClientCache,
    address: NetworkAddress,
    client: Option<Box<dyn BackendService>>,
}

impl BackendConnection<'_> {
    pub fn exec_plan_fragment(
        &mut self,
        params: &ExecPlanFragmentParams,
    ) -> Result<ExecPlanFragmentResult, TransportError> {
        self.client
            .as_mut()
            .expect("live backend connection")
            .exec_plan_fragment(params)
    }

    pub fn cancel_plan_fragment(
        &mut self,
        params: &CancelPlanFragmentParams,
    ) -> Result<CancelPlanFragmentResult, TransportError> {
        self.client
            .as_mut()
            .expect("live backend connection")
            .cancel_plan_fragment(params)
    }

    /// Drop the (possibly stale) connection and dial a fresh one.
    pub fn reopen(&mut self) -> Result<(), Status> {
        self.client = None;
        self.client = Some(self.cache.connect(&self.address)?);
        Ok(())
    }
}

impl Drop for BackendConnection<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.cache.return_client(self.address.clone(), client);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::common::status::Status;

    struct CountingService;

    impl BackendService for CountingService {
        fn exec_plan_fragment(
            &mut self,
            _params: &ExecPlanFragmentParams,
        ) -> Result<ExecPlanFragmentResult, TransportError> {
            Ok(ExecPlanFragmentResult { status: Status::ok() })
        }

        fn cancel_plan_fragment(
            &mut self,
            _params: &CancelPlanFragmentParams,
        ) -> Result<CancelPlanFragmentResult, TransportError> {
            Ok(CancelPlanFragmentResult { status: Status::ok() })
        }
    }

    struct CountingFactory {
        connects: Arc<AtomicUsize>,
        fail: bool,
    }

    impl BackendConnectionFactory for CountingFactory {
        fn connect(
            &self,
            _address: &NetworkAddress,
        ) -> Result<Box<dyn BackendService>, TransportError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TransportError("connection refused".to_string()));
            }
            Ok(Box::new(CountingService))
        }
    }

    #[test]
    fn connections_are_reused_after_return() {
        let connects = Arc::new(AtomicUsize::new(0));
        let cache = BackendClientCache::new(Box::new(CountingFactory {
            connects: Arc::clone(&connects),
            fail: false,
        }));
        let addr = NetworkAddress::new("worker-0", 9060);

        drop(cache.get_client(&addr).expect("first checkout"));
        drop(cache.get_client(&addr).expect("second checkout"));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reopen_dials_a_fresh_connection() {
        let connects = Arc::new(AtomicUsize::new(0));
        let cache = BackendClientCache::new(Box::new(CountingFactory {
            connects: Arc::clone(&connects),
            fail: false,
        }));
        let addr = NetworkAddress::new("worker-0", 9060);

        let mut conn = cache.get_client(&addr).expect("checkout");
        conn.reopen().expect("reopen");
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn connect_failure_becomes_runtime_error_status() {
        let cache = BackendClientCache::new(Box::new(CountingFactory {
            connects: Arc::new(AtomicUsize::new(0)),
            fail: true,
        }));
        let addr = NetworkAddress::new("worker-0", 9060);
        let err = cache.get_client(&addr).err().expect("connect fails");
        assert!(err.message().contains("Couldn't open transport"));
    }
}
