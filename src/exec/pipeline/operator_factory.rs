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
//! Operator factory trait definitions.
//!
//! Responsibilities:
//! - Defines factory contracts used by the pipeline builder to instantiate one
//!   operator per driver, duplicate factories across parallel execution lanes,
//!   and signal end-of-creation for shared-resource release.
//! - Separates plan-time operator configuration from runtime operator instances.
//!
//! Key exported interfaces:
//! - Types: `OperatorFactory`.
//!
//! Current limitations:
//! - Implements only the execution semantics currently wired by the terradb pipeline
//!   operators.
//! - Unsupported states should be surfaced as explicit runtime errors instead of
//!   fallback behavior.

use super::driver_context::DriverContext;
use super::operator::Operator;

/// Factory contract for constructing runtime operators from plan-time configuration.
pub trait OperatorFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Create one operator instance for a driver. Creating from a factory that
    /// has already been closed via `no_more_operators` is a caller defect.
    fn create(&self, ctx: &DriverContext) -> Result<Box<dyn Operator>, String>;

    /// Produce an independent factory handle for a parallel execution lane.
    /// Handles share plan-time configuration and any shared build-side state.
    fn duplicate(&self) -> Result<Box<dyn OperatorFactory>, String> {
        Err(format!(
            "operator factory {} does not support duplication",
            self.name()
        ))
    }

    /// Signal that no further operators will be created from this factory
    /// handle. Idempotent.
    fn no_more_operators(&self) {}

    fn is_source(&self) -> bool {
        false
    }

    fn is_sink(&self) -> bool {
        false
    }
}
