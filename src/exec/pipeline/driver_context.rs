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
//! Per-driver execution context and cooperative yield signal.
//!
//! Responsibilities:
//! - Carries the state an operator factory needs to instantiate one operator:
//!   runtime state, the driver's yield signal, and optional snapshot support.
//! - Defines the suspension token the scheduler sets to reclaim control from a
//!   long-running operator loop.
//!
//! Key exported interfaces:
//! - Types: `DriverYieldSignal`, `DriverContext`.
//!
//! Current limitations:
//! - Implements only the execution semantics currently wired by the terradb pipeline
//!   operators.
//! - Unsupported states should be surfaced as explicit runtime errors instead of
//!   fallback behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::exec::pipeline::snapshot::SnapshotContext;
use crate::runtime::runtime_state::RuntimeState;

/// Cooperative suspension request from the scheduler.
///
/// Operators check it voluntarily at safe points inside their processing loops
/// and return control with all cursor state preserved. The signal never blocks;
/// it only asks.
#[derive(Debug, Default)]
pub struct DriverYieldSignal {
    set: AtomicBool,
}

impl DriverYieldSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_yield(&self) {
        self.set.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.set.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }
}

/// Per-driver context handed to operator factories at instantiation time.
#[derive(Clone)]
pub struct DriverContext {
    runtime_state: Arc<RuntimeState>,
    yield_signal: Arc<DriverYieldSignal>,
    driver_id: i32,
    snapshot: Option<SnapshotContext>,
}

impl DriverContext {
    pub fn new(runtime_state: Arc<RuntimeState>, driver_id: i32) -> Self {
        Self {
            runtime_state,
            yield_signal: Arc::new(DriverYieldSignal::new()),
            driver_id,
            snapshot: None,
        }
    }

    /// Enable fault-tolerant execution: operators created under this context
    /// capture/restore state at snapshot marker boundaries.
    pub fn with_snapshot(mut self, snapshot: SnapshotContext) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn runtime_state(&self) -> &Arc<RuntimeState> {
        &self.runtime_state
    }

    pub fn yield_signal(&self) -> &Arc<DriverYieldSignal> {
        &self.yield_signal
    }

    pub fn driver_id(&self) -> i32 {
        self.driver_id
    }

    pub fn snapshot_context(&self) -> Option<&SnapshotContext> {
        self.snapshot.as_ref()
    }
}
