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
//! Build-side spatial index contracts consumed by the spatial join probe.
//!
//! Responsibilities:
//! - Defines the query surface the join loop requires from the index: candidate
//!   lookup, eligibility refinement, and build-row materialization.
//! - Publishes one asynchronously built index to all sibling probe operators via
//!   a pending handle backed by a pipeline dependency.
//!
//! Key exported interfaces:
//! - Types: `PendingSpatialIndex`.
//! - Traits: `SpatialIndex`, `SpatialIndexFactory`.
//!
//! Current limitations:
//! - Implements only the execution semantics currently wired by the terradb pipeline
//!   operators.
//! - Unsupported states should be surfaced as explicit runtime errors instead of
//!   fallback behavior.

use std::sync::{Arc, Mutex};

use arrow::datatypes::Fields;

use super::output_builder::ChunkBuilder;
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::dependency::{DependencyHandle, DependencyManager};

/// Immutable, queryable structure over build-side rows. Built once, shared
/// read-only across all sibling probe operators; safe for concurrent queries.
pub trait SpatialIndex: Send + Sync {
    /// Candidate build-side row ids for one probe row, in index order.
    /// Candidates are plausible matches pending eligibility refinement.
    fn find_join_rows(
        &self,
        probe_row: usize,
        probe: &Chunk,
        geometry_column: usize,
        partition_column: Option<usize>,
    ) -> Vec<u32>;

    /// Exact refinement of one candidate against one probe row.
    fn is_join_row_eligible(&self, candidate: u32, probe_row: usize, probe: &Chunk) -> bool;

    /// Append the build-side output columns of one candidate row to the output
    /// builder, starting at `column_offset`.
    fn append_build_row(
        &self,
        candidate: u32,
        builder: &mut ChunkBuilder,
        column_offset: usize,
    ) -> Result<(), String>;
}

/// Owns asynchronous construction and destruction of one spatial index.
pub trait SpatialIndexFactory: Send + Sync {
    /// Pending handle to the shared index. Construction is kicked off on first
    /// demand; callers poll readiness through the handle's dependency.
    fn create_index(&self) -> PendingSpatialIndex;

    /// Build-side columns the index contributes to join output.
    fn output_fields(&self) -> Fields;

    /// Tear down the index. Invoked exactly once, when the last reference to
    /// the join's shared lifecycle is released.
    fn destroy(&self);
}

/// Shared pending handle publishing one spatial index to all probe operators.
#[derive(Clone)]
pub struct PendingSpatialIndex {
    dep: DependencyHandle,
    index: Arc<Mutex<Option<Arc<dyn SpatialIndex>>>>,
}

impl PendingSpatialIndex {
    pub fn new(dep_manager: &DependencyManager, node_id: i32) -> Self {
        let dep = dep_manager.get_or_create(format!("spatial_index_build:{}", node_id));
        Self {
            dep,
            index: Arc::new(Mutex::new(None)),
        }
    }

    pub fn dep(&self) -> DependencyHandle {
        self.dep.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.dep.is_ready()
    }

    /// Publish the built index. Set-once; a second publication is a builder
    /// defect.
    pub fn set(&self, index: Arc<dyn SpatialIndex>) -> Result<(), String> {
        let mut guard = self.index.lock().expect("spatial index lock");
        if guard.is_some() {
            return Err("spatial index already set".to_string());
        }
        *guard = Some(index);
        self.dep.set_ready();
        Ok(())
    }

    pub fn get(&self) -> Option<Arc<dyn SpatialIndex>> {
        let guard = self.index.lock().expect("spatial index lock");
        guard.clone()
    }
}
