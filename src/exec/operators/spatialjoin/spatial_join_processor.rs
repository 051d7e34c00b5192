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
//! Spatial join probe processor.
//!
//! Responsibilities:
//! - Streams probe chunks against the shared build-side spatial index under
//!   INNER/LEFT semantics, suspending cooperatively at row/candidate safe points
//!   with an explicit resumable cursor.
//! - Manages the shared index lifecycle through a manual reference count and
//!   participates in checkpoint capture/restore.
//!
//! Key exported interfaces:
//! - Types: `SpatialJoinType`, `SpatialJoinProcessorFactory`.
//!
//! Current limitations:
//! - Implements only the execution semantics currently wired by the terradb pipeline
//!   operators.
//! - Unsupported states should be surfaced as explicit runtime errors instead of
//!   fallback behavior.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrow::datatypes::{FieldRef, Schema, SchemaRef};
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::output_builder::ChunkBuilder;
use super::reference_count::ReferenceCount;
use super::spatial_index::{PendingSpatialIndex, SpatialIndex, SpatialIndexFactory};
use crate::exec::chunk::Chunk;
use crate::exec::join_type::JoinType;
use crate::exec::pipeline::dependency::DependencyHandle;
use crate::exec::pipeline::driver_context::{DriverContext, DriverYieldSignal};
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::exec::pipeline::snapshot::{Restorable, SingleInputSnapshotState, SnapshotSerde};
use crate::runtime::mem_tracker::{LocalMemoryContext, MemTracker};
use crate::runtime::runtime_state::RuntimeState;
use crate::terradb_logging::warn;

/// Join kinds the spatial join implements. Handled at a single decision point
/// in the probe loop; everything else is rejected at factory construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialJoinType {
    Inner,
    Left,
}

impl TryFrom<JoinType> for SpatialJoinType {
    type Error = String;

    fn try_from(join_type: JoinType) -> Result<Self, Self::Error> {
        match join_type {
            JoinType::Inner => Ok(SpatialJoinType::Inner),
            JoinType::Left => Ok(SpatialJoinType::Left),
            other => Err(format!("unsupported spatial join type: {other:?}")),
        }
    }
}

/// Factory for spatial join probe operators. All operators created from this
/// factory (and from its duplicates) share one spatial index, whose lifetime is
/// governed by a manual reference count: the index factory's `destroy` fires
/// exactly once, when the last factory handle and operator have released.
pub struct SpatialJoinProcessorFactory {
    name: String,
    join_type: SpatialJoinType,
    probe_schema: SchemaRef,
    probe_output_columns: Vec<usize>,
    probe_geometry_column: usize,
    partition_column: Option<usize>,
    index_factory: Arc<dyn SpatialIndexFactory>,
    reference_count: Arc<ReferenceCount>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SpatialJoinProcessorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialJoinProcessorFactory")
            .field("name", &self.name)
            .field("join_type", &self.join_type)
            .finish_non_exhaustive()
    }
}

impl SpatialJoinProcessorFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: i32,
        join_type: JoinType,
        probe_schema: SchemaRef,
        probe_output_columns: Vec<usize>,
        probe_geometry_column: usize,
        partition_column: Option<usize>,
        index_factory: Arc<dyn SpatialIndexFactory>,
    ) -> Result<Self, String> {
        let join_type = SpatialJoinType::try_from(join_type)?;
        let probe_width = probe_schema.fields().len();
        for &column in probe_output_columns
            .iter()
            .chain(std::iter::once(&probe_geometry_column))
            .chain(partition_column.iter())
        {
            if column >= probe_width {
                return Err(format!(
                    "spatial join probe column out of bounds: column={column} width={probe_width}"
                ));
            }
        }
        let name = if node_id >= 0 {
            format!("SpatialJoinProbe (id={node_id})")
        } else {
            "SpatialJoinProbe".to_string()
        };
        let on_free_factory = Arc::clone(&index_factory);
        let reference_count = Arc::new(ReferenceCount::new(1, move || on_free_factory.destroy()));
        Ok(Self {
            name,
            join_type,
            probe_schema,
            probe_output_columns,
            probe_geometry_column,
            partition_column,
            index_factory,
            reference_count,
            closed: AtomicBool::new(false),
        })
    }

    /// Output schema: selected probe columns followed by the index's build-side
    /// columns. Under LEFT semantics build columns are null-padded for
    /// unmatched probe rows, so they must be nullable in the output.
    fn output_schema(&self) -> Result<SchemaRef, String> {
        let mut fields: Vec<FieldRef> = Vec::with_capacity(
            self.probe_output_columns.len() + self.index_factory.output_fields().len(),
        );
        for &column in &self.probe_output_columns {
            fields.push(Arc::clone(&self.probe_schema.fields()[column]));
        }
        for field in self.index_factory.output_fields().iter() {
            if self.join_type == SpatialJoinType::Left && !field.is_nullable() {
                fields.push(Arc::new(field.as_ref().clone().with_nullable(true)));
            } else {
                fields.push(Arc::clone(field));
            }
        }
        Ok(Arc::new(Schema::new(fields)))
    }

    #[cfg(test)]
    pub(crate) fn reference_count(&self) -> &Arc<ReferenceCount> {
        &self.reference_count
    }
}

impl OperatorFactory for SpatialJoinProcessorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, ctx: &DriverContext) -> Result<Box<dyn Operator>, String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(format!("{}: factory is already closed", self.name));
        }
        self.reference_count.retain()?;
        let schema = self.output_schema()?;
        let operator_label = format!("{}#{}", self.name, ctx.driver_id());
        let tracker = MemTracker::new_child(operator_label.clone(), ctx.runtime_state().mem_tracker());
        let snapshot = ctx
            .snapshot_context()
            .map(|sc| SingleInputSnapshotState::new(operator_label, sc.clone()));
        Ok(Box::new(SpatialJoinProcessorOperator {
            name: self.name.clone(),
            join_type: self.join_type,
            probe_output_columns: self.probe_output_columns.clone(),
            probe_geometry_column: self.probe_geometry_column,
            partition_column: self.partition_column,
            build_output_width: self.index_factory.output_fields().len(),
            pending_index: Some(self.index_factory.create_index()),
            index: None,
            yield_signal: Arc::clone(ctx.yield_signal()),
            local_memory: LocalMemoryContext::new(tracker),
            builder: ChunkBuilder::new(schema, ctx.runtime_state().chunk_size()),
            reference_count: Arc::clone(&self.reference_count),
            snapshot,
            probe: None,
            probe_row: 0,
            candidates: None,
            next_candidate: 0,
            match_found: false,
            finishing: false,
            finished: false,
            closed: false,
        }))
    }

    fn duplicate(&self) -> Result<Box<dyn OperatorFactory>, String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(format!("{}: factory is already closed", self.name));
        }
        self.reference_count.retain()?;
        Ok(Box::new(Self {
            name: self.name.clone(),
            join_type: self.join_type,
            probe_schema: Arc::clone(&self.probe_schema),
            probe_output_columns: self.probe_output_columns.clone(),
            probe_geometry_column: self.probe_geometry_column,
            partition_column: self.partition_column,
            index_factory: Arc::clone(&self.index_factory),
            reference_count: Arc::clone(&self.reference_count),
            closed: AtomicBool::new(false),
        }))
    }

    fn no_more_operators(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.reference_count.release() {
            warn!("{}: release on factory close failed: {}", self.name, e);
        }
    }
}

struct SpatialJoinProcessorOperator {
    name: String,
    join_type: SpatialJoinType,
    probe_output_columns: Vec<usize>,
    probe_geometry_column: usize,
    partition_column: Option<usize>,
    build_output_width: usize,

    pending_index: Option<PendingSpatialIndex>,
    index: Option<Arc<dyn SpatialIndex>>,
    yield_signal: Arc<DriverYieldSignal>,
    local_memory: LocalMemoryContext,
    builder: ChunkBuilder,
    reference_count: Arc<ReferenceCount>,
    snapshot: Option<SingleInputSnapshotState>,

    probe: Option<Chunk>,
    // Cursor state preserved across suspensions: the probe loop resumes at
    // exactly this row/candidate after a yield, a full accumulator, or a
    // checkpoint boundary.
    probe_row: usize,
    candidates: Option<Vec<u32>>,
    next_candidate: usize,
    match_found: bool,

    finishing: bool,
    finished: bool,
    closed: bool,
}

impl Operator for SpatialJoinProcessorOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<(), String> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending_index = None;
        self.index = None;
        self.candidates = None;
        self.local_memory.set_bytes(0);
        self.reference_count.release()
    }

    fn is_finished(&self) -> bool {
        // Pending checkpoint markers must be emitted before finishing.
        if let Some(snapshot) = &self.snapshot
            && snapshot.has_marker()
        {
            return false;
        }
        self.finished
    }

    fn as_processor_mut(&mut self) -> Option<&mut dyn ProcessorOperator> {
        Some(self)
    }

    fn as_processor_ref(&self) -> Option<&dyn ProcessorOperator> {
        Some(self)
    }
}

impl ProcessorOperator for SpatialJoinProcessorOperator {
    fn need_input(&self) -> bool {
        self.allow_marker() && !self.finishing && self.index_ready()
    }

    fn allow_marker(&self) -> bool {
        !self.finished && !self.builder.is_full() && self.probe.is_none()
    }

    fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<(), String> {
        if chunk.is_marker() {
            if !self.allow_marker() {
                return Err(format!(
                    "{}: received a marker chunk when markers are not allowed",
                    self.name
                ));
            }
            let Some(mut snapshot) = self.snapshot.take() else {
                return Err(format!(
                    "{}: received a marker chunk without snapshot support",
                    self.name
                ));
            };
            let result = snapshot.process_chunk(self, &chunk);
            self.snapshot = Some(snapshot);
            result?;
            return Ok(());
        }
        if !self.need_input() {
            return Err(format!(
                "{}: received input when it does not need input",
                self.name
            ));
        }
        self.probe = Some(chunk);
        self.probe_row = 0;
        self.candidates = None;
        Ok(())
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>, String> {
        if self.finished {
            return Ok(None);
        }
        if let Some(snapshot) = self.snapshot.as_mut()
            && let Some(marker) = snapshot.next_marker()
        {
            return Ok(Some(marker));
        }

        if !self.builder.is_full() && self.probe.is_some() {
            self.process_probe()?;
        }

        if self.builder.is_full() {
            return Ok(Some(self.builder.build()?));
        }

        if self.finishing && self.probe.is_none() {
            let out = if self.builder.is_empty() {
                None
            } else {
                Some(self.builder.build()?)
            };
            self.finished = true;
            self.close()?;
            return Ok(out);
        }

        Ok(None)
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        self.finishing = true;
        Ok(())
    }

    fn precondition_dependency(&self) -> Option<DependencyHandle> {
        if self.index.is_some() {
            return None;
        }
        self.pending_index.as_ref().map(|pending| pending.dep())
    }
}

impl SpatialJoinProcessorOperator {
    fn index_ready(&self) -> bool {
        if self.index.is_some() {
            return true;
        }
        self.pending_index
            .as_ref()
            .map(|pending| pending.is_ready())
            .unwrap_or(false)
    }

    fn resolve_index(&mut self) -> Result<Arc<dyn SpatialIndex>, String> {
        if let Some(index) = &self.index {
            return Ok(Arc::clone(index));
        }
        let pending = self
            .pending_index
            .as_ref()
            .ok_or_else(|| format!("{}: spatial index handle dropped", self.name))?;
        let index = pending
            .get()
            .ok_or_else(|| format!("{}: spatial index is not ready", self.name))?;
        self.index = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Drive the join loop over the held probe chunk from the stored cursor.
    ///
    /// Suspension points: right after a candidate lookup, after each candidate
    /// processed, and whenever the output accumulator is full. Returning with
    /// `self.probe` still set means the chunk is partially consumed and the
    /// cursor marks the exact resume position.
    fn process_probe(&mut self) -> Result<(), String> {
        let probe = self
            .probe
            .clone()
            .ok_or_else(|| format!("{}: probe chunk missing", self.name))?;
        let index = self.resolve_index()?;

        while self.probe_row < probe.len() {
            if self.candidates.is_none() {
                let candidates = index.find_join_rows(
                    self.probe_row,
                    &probe,
                    self.probe_geometry_column,
                    self.partition_column,
                );
                self.local_memory
                    .set_bytes((candidates.len() * std::mem::size_of::<u32>()) as i64);
                self.candidates = Some(candidates);
                self.next_candidate = 0;
                self.match_found = false;
                if self.yield_signal.is_set() {
                    return Ok(());
                }
            }

            loop {
                let candidate = match self.candidates.as_ref() {
                    Some(list) if self.next_candidate < list.len() => list[self.next_candidate],
                    Some(_) => break,
                    None => {
                        return Err(format!("{}: candidate cache missing", self.name));
                    }
                };

                if self.builder.is_full() {
                    return Ok(());
                }

                if index.is_join_row_eligible(candidate, self.probe_row, &probe) {
                    self.builder.declare_row();
                    self.append_probe(&probe)?;
                    index.append_build_row(
                        candidate,
                        &mut self.builder,
                        self.probe_output_columns.len(),
                    )?;
                    self.match_found = true;
                }

                self.next_candidate += 1;

                if self.yield_signal.is_set() {
                    return Ok(());
                }
            }

            if !self.match_found && self.join_type == SpatialJoinType::Left {
                if self.builder.is_full() {
                    return Ok(());
                }
                self.builder.declare_row();
                self.append_probe(&probe)?;
                for i in 0..self.build_output_width {
                    self.builder
                        .append_null(self.probe_output_columns.len() + i)?;
                }
            }

            self.candidates = None;
            self.local_memory.set_bytes(0);
            self.probe_row += 1;
        }

        self.probe = None;
        self.probe_row = 0;
        Ok(())
    }

    fn append_probe(&mut self, probe: &Chunk) -> Result<(), String> {
        for offset in 0..self.probe_output_columns.len() {
            let column = self.probe_output_columns[offset];
            let source = probe.column(column)?;
            self.builder.append_row_from(offset, source, self.probe_row)?;
        }
        Ok(())
    }
}

const SPATIAL_JOIN_STATE_VERSION: u32 = 1;

/// Versioned checkpoint of the operator's restorable field subset. The held
/// probe chunk and candidate cache are non-reproducible transient state and are
/// excluded: upstream resends whole unconsumed chunks after a restore.
#[derive(Serialize, Deserialize)]
struct SpatialJoinOperatorState {
    version: u32,
    memory_bytes: i64,
    output_builder: Option<String>,
    next_candidate: usize,
    match_found: bool,
}

impl Restorable for SpatialJoinProcessorOperator {
    fn capture(&self, serde: &SnapshotSerde) -> Result<Vec<u8>, String> {
        let output_builder = if self.builder.is_empty() {
            None
        } else {
            let batch = self.builder.contents()?;
            let bytes = serde.encode_record_batch(&batch)?;
            Some(base64::engine::general_purpose::STANDARD.encode(bytes))
        };
        let state = SpatialJoinOperatorState {
            version: SPATIAL_JOIN_STATE_VERSION,
            memory_bytes: self.local_memory.bytes(),
            output_builder,
            next_candidate: self.next_candidate,
            match_found: self.match_found,
        };
        serde_json::to_vec(&state)
            .map_err(|e| format!("{}: snapshot encode failed: {e}", self.name))
    }

    fn restore(&mut self, state: &[u8], serde: &SnapshotSerde) -> Result<(), String> {
        let state: SpatialJoinOperatorState = serde_json::from_slice(state)
            .map_err(|e| format!("{}: snapshot decode failed: {e}", self.name))?;
        if state.version != SPATIAL_JOIN_STATE_VERSION {
            return Err(format!(
                "{}: unsupported snapshot version {}",
                self.name, state.version
            ));
        }
        self.builder.reset();
        if let Some(encoded) = &state.output_builder {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| format!("{}: snapshot payload decode failed: {e}", self.name))?;
            self.builder
                .restore_contents(serde.decode_record_batch(&bytes)?)?;
        }
        self.local_memory.set_bytes(state.memory_bytes);
        self.next_candidate = state.next_candidate;
        self.match_found = state.match_found;
        self.probe = None;
        self.probe_row = 0;
        self.candidates = None;
        Ok(())
    }
}
