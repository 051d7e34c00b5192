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
//! Integration tests for the spatial join operator stack: probe flow, output
//! accumulation, and the marker-driven checkpoint protocol through the public
//! operator surface.

use std::sync::Arc;

use arrow::array::{ArrayRef, Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use terradb::exec::chunk::Chunk;
use terradb::exec::join_type::JoinType;
use terradb::exec::operators::spatialjoin::{
    ChunkBuilder, PendingSpatialIndex, SpatialIndex, SpatialIndexFactory,
    SpatialJoinProcessorFactory,
};
use terradb::exec::pipeline::dependency::DependencyManager;
use terradb::exec::pipeline::driver_context::DriverContext;
use terradb::exec::pipeline::operator::Operator;
use terradb::exec::pipeline::operator_factory::OperatorFactory;
use terradb::exec::pipeline::snapshot::{SnapshotContext, SnapshotStore};
use terradb::runtime::runtime_state::RuntimeState;

/// Index over a fixed build column: candidates are keyed by probe row position
/// within the chunk, and every candidate is eligible.
struct FixtureIndex {
    candidates: Vec<Vec<u32>>,
    build_column: ArrayRef,
}

impl SpatialIndex for FixtureIndex {
    fn find_join_rows(
        &self,
        probe_row: usize,
        _probe: &Chunk,
        _geometry_column: usize,
        _partition_column: Option<usize>,
    ) -> Vec<u32> {
        self.candidates.get(probe_row).cloned().unwrap_or_default()
    }

    fn is_join_row_eligible(&self, _candidate: u32, _probe_row: usize, _probe: &Chunk) -> bool {
        true
    }

    fn append_build_row(
        &self,
        candidate: u32,
        builder: &mut ChunkBuilder,
        column_offset: usize,
    ) -> Result<(), String> {
        builder.append_row_from(column_offset, &self.build_column, candidate as usize)
    }
}

struct FixtureIndexFactory {
    pending: PendingSpatialIndex,
}

impl FixtureIndexFactory {
    fn new(candidates: Vec<Vec<u32>>) -> Arc<Self> {
        let dep_manager = DependencyManager::new();
        let pending = PendingSpatialIndex::new(&dep_manager, 1);
        // Build column holds value row_id * 100 at position row_id.
        let build_column: ArrayRef =
            Arc::new(Int32Array::from((0..16).map(|i| i * 100).collect::<Vec<_>>()));
        pending
            .set(Arc::new(FixtureIndex {
                candidates,
                build_column,
            }))
            .expect("publish fixture index");
        Arc::new(Self { pending })
    }
}

impl SpatialIndexFactory for FixtureIndexFactory {
    fn create_index(&self) -> PendingSpatialIndex {
        self.pending.clone()
    }

    fn output_fields(&self) -> Fields {
        Fields::from(vec![Field::new("build_v", DataType::Int32, true)])
    }

    fn destroy(&self) {}
}

fn probe_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("probe_id", DataType::Int32, false),
        Field::new("geom", DataType::Utf8, false),
    ]))
}

fn probe_chunk(ids: &[i32]) -> Chunk {
    let geoms: Vec<String> = ids.iter().map(|i| format!("POINT({i} {i})")).collect();
    let batch = RecordBatch::try_new(
        probe_schema(),
        vec![
            Arc::new(Int32Array::from(ids.to_vec())),
            Arc::new(StringArray::from(geoms)),
        ],
    )
    .expect("build probe batch");
    Chunk::new(batch)
}

fn make_factory(candidates: Vec<Vec<u32>>) -> SpatialJoinProcessorFactory {
    SpatialJoinProcessorFactory::new(
        1,
        JoinType::Inner,
        probe_schema(),
        vec![0],
        1,
        None,
        FixtureIndexFactory::new(candidates),
    )
    .expect("build factory")
}

fn output_pairs(chunk: &Chunk) -> Vec<(i32, i32)> {
    let probe = chunk
        .batch
        .column(0)
        .as_any()
        .downcast_ref::<Int32Array>()
        .expect("probe column");
    let build = chunk
        .batch
        .column(1)
        .as_any()
        .downcast_ref::<Int32Array>()
        .expect("build column");
    (0..chunk.len())
        .map(|i| (probe.value(i), build.value(i)))
        .collect()
}

#[test]
fn probe_order_is_preserved_across_chunks() {
    let factory = make_factory(vec![vec![3], vec![4]]);
    let state = Arc::new(RuntimeState::default());
    let ctx = DriverContext::new(Arc::clone(&state), 0);
    let mut op = factory.create(&ctx).expect("create operator");
    let p = op.as_processor_mut().expect("processor op");

    p.push_chunk(&state, probe_chunk(&[0, 1])).expect("push chunk 1");
    // Chunk fully consumed, output accumulating below capacity: no chunk yet.
    assert!(p.pull_chunk(&state).expect("pull").is_none());
    assert!(p.need_input());

    p.push_chunk(&state, probe_chunk(&[10, 11])).expect("push chunk 2");
    p.set_finishing(&state).expect("finish");

    let mut rows = Vec::new();
    while let Some(chunk) = p.pull_chunk(&state).expect("pull") {
        rows.extend(output_pairs(&chunk));
    }
    assert_eq!(rows, vec![(0, 300), (1, 400), (10, 300), (11, 400)]);
    assert!(op.is_finished());
}

#[test]
fn full_accumulator_emits_one_chunk_per_pull() {
    let factory = make_factory(vec![vec![1, 2, 3]]);
    let state = Arc::new(RuntimeState::with_chunk_size(2));
    let ctx = DriverContext::new(Arc::clone(&state), 0);
    let mut op = factory.create(&ctx).expect("create operator");
    let p = op.as_processor_mut().expect("processor op");

    p.push_chunk(&state, probe_chunk(&[0])).expect("push probe");
    p.set_finishing(&state).expect("finish");

    let first = p.pull_chunk(&state).expect("pull").expect("full chunk");
    assert_eq!(output_pairs(&first), vec![(0, 100), (0, 200)]);

    let second = p.pull_chunk(&state).expect("pull").expect("remainder chunk");
    assert_eq!(output_pairs(&second), vec![(0, 300)]);

    assert!(p.pull_chunk(&state).expect("pull").is_none());
    assert!(op.is_finished());
}

#[test]
fn marker_is_emitted_before_finishing() {
    let factory = make_factory(vec![vec![0]]);
    let state = Arc::new(RuntimeState::default());
    let snapshot = SnapshotContext::new(SnapshotStore::new());
    let ctx = DriverContext::new(Arc::clone(&state), 0).with_snapshot(snapshot);
    let mut op = factory.create(&ctx).expect("create operator");

    {
        let p = op.as_processor_mut().expect("processor op");
        assert!(p.allow_marker());
        p.push_chunk(&state, Chunk::marker(2, false)).expect("push marker");
        p.set_finishing(&state).expect("finish");
    }
    // The captured marker must flow downstream before the operator finishes.
    assert!(!op.is_finished());

    let p = op.as_processor_mut().expect("processor op");
    let marker = p.pull_chunk(&state).expect("pull").expect("marker chunk");
    assert!(marker.is_marker());
    assert_eq!(marker.chunk_marker().expect("marker meta").snapshot_id, 2);

    assert!(p.pull_chunk(&state).expect("pull").is_none());
    assert!(op.is_finished());
}

#[test]
fn marker_is_rejected_while_probe_is_held() {
    let factory = make_factory(vec![vec![0]]);
    let state = Arc::new(RuntimeState::default());
    let snapshot = SnapshotContext::new(SnapshotStore::new());
    let ctx = DriverContext::new(Arc::clone(&state), 0).with_snapshot(snapshot);
    let mut op = factory.create(&ctx).expect("create operator");
    let p = op.as_processor_mut().expect("processor op");

    p.push_chunk(&state, probe_chunk(&[0])).expect("push probe");
    assert!(!p.allow_marker());
    assert!(p.push_chunk(&state, Chunk::marker(1, false)).is_err());
}

#[test]
fn marker_without_snapshot_support_is_an_error() {
    let factory = make_factory(vec![vec![0]]);
    let state = Arc::new(RuntimeState::default());
    let ctx = DriverContext::new(Arc::clone(&state), 0);
    let mut op = factory.create(&ctx).expect("create operator");
    let p = op.as_processor_mut().expect("processor op");

    let err = p
        .push_chunk(&state, Chunk::marker(1, false))
        .expect_err("marker must be rejected");
    assert!(err.contains("without snapshot support"));
}

#[test]
fn restore_resumes_with_captured_output() {
    // Operator A consumes chunk 1, captures at a marker with two rows buffered,
    // then consumes chunk 2. Operator B restores from the same snapshot and is
    // resent chunk 2; both must produce the identical output sequence.
    let factory = make_factory(vec![vec![3], vec![4]]);
    let state = Arc::new(RuntimeState::default());
    let snapshot = SnapshotContext::new(SnapshotStore::new());

    let rows_a = {
        let ctx = DriverContext::new(Arc::clone(&state), 0).with_snapshot(snapshot.clone());
        let mut op = factory.create(&ctx).expect("create operator a");
        let p = op.as_processor_mut().expect("processor op");

        p.push_chunk(&state, probe_chunk(&[0, 1])).expect("push chunk 1");
        assert!(p.pull_chunk(&state).expect("pull").is_none());

        p.push_chunk(&state, Chunk::marker(9, false)).expect("push marker");
        let marker = p.pull_chunk(&state).expect("pull").expect("marker chunk");
        assert!(marker.is_marker());

        p.push_chunk(&state, probe_chunk(&[10, 11])).expect("push chunk 2");
        p.set_finishing(&state).expect("finish");
        let mut rows = Vec::new();
        while let Some(chunk) = p.pull_chunk(&state).expect("pull") {
            rows.extend(output_pairs(&chunk));
        }
        rows
    };

    let rows_b = {
        // Same driver id: operator B restores operator A's captured state.
        let ctx = DriverContext::new(Arc::clone(&state), 0).with_snapshot(snapshot);
        let mut op = factory.create(&ctx).expect("create operator b");
        let p = op.as_processor_mut().expect("processor op");

        p.push_chunk(&state, Chunk::marker(9, true)).expect("push resuming marker");
        let marker = p.pull_chunk(&state).expect("pull").expect("marker chunk");
        assert!(marker.chunk_marker().expect("marker meta").resuming);

        p.push_chunk(&state, probe_chunk(&[10, 11])).expect("resend chunk 2");
        p.set_finishing(&state).expect("finish");
        let mut rows = Vec::new();
        while let Some(chunk) = p.pull_chunk(&state).expect("pull") {
            rows.extend(output_pairs(&chunk));
        }
        rows
    };

    assert_eq!(rows_a, vec![(0, 300), (1, 400), (10, 300), (11, 400)]);
    assert_eq!(rows_b, rows_a);
}

#[test]
fn factory_trait_object_drives_the_lifecycle() {
    let factory: Box<dyn OperatorFactory> = Box::new(make_factory(vec![vec![0]]));
    assert_eq!(factory.name(), "SpatialJoinProbe (id=1)");

    let state = Arc::new(RuntimeState::default());
    let ctx = DriverContext::new(Arc::clone(&state), 3);
    let dup = factory.duplicate().expect("duplicate factory");
    let mut op = dup.create(&ctx).expect("create operator");
    assert!(!op.is_finished());

    op.close().expect("close operator");
    op.close().expect("idempotent close");
    factory.no_more_operators();
    dup.no_more_operators();
}
