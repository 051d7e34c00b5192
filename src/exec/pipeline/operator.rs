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
//! Core operator traits and blocking semantics.
//!
//! Responsibilities:
//! - Defines the processor execution contract consumed by the external driver
//!   scheduler: input demand, push/pull data movement, finishing, and teardown.
//! - Surfaces precondition dependencies (e.g. build-side index readiness) so the
//!   scheduler can park a driver instead of busy-polling.
//!
//! Key exported interfaces:
//! - Types: `Operator`, `ProcessorOperator`.
//!
//! Current limitations:
//! - Implements only the execution semantics currently wired by the terradb pipeline
//!   operators.
//! - Unsupported states should be surfaced as explicit runtime errors instead of
//!   fallback behavior.

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::dependency::DependencyHandle;
use crate::runtime::runtime_state::RuntimeState;

/// Base operator contract implemented by source/processor/sink operator implementations.
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn prepare(&mut self) -> Result<(), String> {
        Ok(())
    }

    /// Release operator resources. Must be idempotent: the scheduler and an
    /// external cancellation path may both invoke it.
    fn close(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }

    fn as_processor_mut(&mut self) -> Option<&mut dyn ProcessorOperator> {
        None
    }

    fn as_processor_ref(&self) -> Option<&dyn ProcessorOperator> {
        None
    }
}

/// Extended operator contract for processor stages with push/pull semantics.
///
/// The driver repeatedly polls `need_input` / `pull_chunk`; a `pull_chunk`
/// returning `Ok(None)` means no progress was possible in this slice and the
/// driver should poll again later (possibly after the precondition dependency
/// becomes ready or the yield signal is cleared).
pub trait ProcessorOperator: Operator {
    fn need_input(&self) -> bool;

    /// Whether a snapshot marker chunk may be pushed right now. Markers are
    /// accepted under the same backpressure rules as data but do not require
    /// every data precondition (they carry no rows to join).
    fn allow_marker(&self) -> bool {
        self.need_input()
    }

    fn push_chunk(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<(), String>;

    fn pull_chunk(&mut self, state: &RuntimeState) -> Result<Option<Chunk>, String>;

    fn set_finishing(&mut self, state: &RuntimeState) -> Result<(), String>;

    /// Dependency that must be ready before the operator can make progress.
    /// This is used for build-side readiness (join indexes, runtime filters, etc.).
    fn precondition_dependency(&self) -> Option<DependencyHandle> {
        None
    }
}
