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
//! Checkpoint capture/restore support for fault-tolerant re-execution.
//!
//! Responsibilities:
//! - Defines the `Restorable` contract an operator exposes to the external
//!   fault-tolerance coordinator and the marker-driven bookkeeping around it.
//! - Serializes partially accumulated output via the Arrow IPC stream format and
//!   stores opaque captured state keyed by (operator, snapshot id).
//!
//! Key exported interfaces:
//! - Types: `SnapshotSerde`, `SnapshotStore`, `SnapshotContext`, `SingleInputSnapshotState`.
//! - Traits: `Restorable`.
//!
//! Current limitations:
//! - Implements only the execution semantics currently wired by the terradb pipeline
//!   operators.
//! - Unsupported states should be surfaced as explicit runtime errors instead of
//!   fallback behavior.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;

use crate::exec::chunk::Chunk;
use crate::terradb_logging::debug;

/// Encodes/decodes captured state payloads. Record batches use the Arrow IPC
/// stream format; compression and encryption of spilled state live outside
/// this crate.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSerde;

impl SnapshotSerde {
    pub fn encode_record_batch(&self, batch: &RecordBatch) -> Result<Vec<u8>, String> {
        let mut buf = Vec::new();
        let mut writer = StreamWriter::try_new(&mut buf, batch.schema().as_ref())
            .map_err(|e| format!("snapshot ipc writer failed: {e}"))?;
        writer
            .write(batch)
            .map_err(|e| format!("snapshot ipc write failed: {e}"))?;
        writer
            .finish()
            .map_err(|e| format!("snapshot ipc finish failed: {e}"))?;
        drop(writer);
        Ok(buf)
    }

    pub fn decode_record_batch(&self, bytes: &[u8]) -> Result<RecordBatch, String> {
        let mut reader = StreamReader::try_new(Cursor::new(bytes), None)
            .map_err(|e| format!("snapshot ipc reader failed: {e}"))?;
        match reader.next() {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(e)) => Err(format!("snapshot ipc decode failed: {e}")),
            None => Err("snapshot ipc payload contains no record batch".to_string()),
        }
    }
}

/// Checkpoint provider contract exposed to the fault-tolerance coordinator.
///
/// `capture` returns a versioned opaque payload holding exactly the operator's
/// restorable field subset; `restore` reinstates exactly those fields.
/// Non-reproducible transient state (an in-flight input chunk and any lookup
/// cache derived from it) is excluded; upstream must resend unconsumed chunks
/// after a restore.
pub trait Restorable {
    fn capture(&self, serde: &SnapshotSerde) -> Result<Vec<u8>, String>;

    fn restore(&mut self, state: &[u8], serde: &SnapshotSerde) -> Result<(), String>;
}

/// In-memory store of captured operator state, keyed by operator name and
/// snapshot id. A production deployment would persist this through the
/// coordinator; operators only see the load/save surface.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    states: Mutex<HashMap<(String, u64), Vec<u8>>>,
}

impl SnapshotStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn save(&self, operator: &str, snapshot_id: u64, state: Vec<u8>) {
        let mut guard = self.states.lock().expect("snapshot store lock");
        guard.insert((operator.to_string(), snapshot_id), state);
    }

    pub fn load(&self, operator: &str, snapshot_id: u64) -> Option<Vec<u8>> {
        let guard = self.states.lock().expect("snapshot store lock");
        guard.get(&(operator.to_string(), snapshot_id)).cloned()
    }
}

/// Snapshot wiring shared by all operators of one fault-tolerant query.
#[derive(Clone)]
pub struct SnapshotContext {
    store: Arc<SnapshotStore>,
    serde: SnapshotSerde,
}

impl SnapshotContext {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self {
            store,
            serde: SnapshotSerde,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn serde(&self) -> &SnapshotSerde {
        &self.serde
    }
}

/// Marker handling for an operator with a single input stream.
///
/// A forward marker triggers a capture of the operator's restorable state; a
/// resuming marker reinstates it. Either way the marker itself is queued and
/// must be re-emitted downstream before any further data, and the operator
/// must not report finished while a marker is pending.
pub struct SingleInputSnapshotState {
    operator_name: String,
    context: SnapshotContext,
    pending_marker: Option<Chunk>,
}

impl SingleInputSnapshotState {
    pub fn new(operator_name: impl Into<String>, context: SnapshotContext) -> Self {
        Self {
            operator_name: operator_name.into(),
            context,
            pending_marker: None,
        }
    }

    /// Consume a marker chunk. Returns `Ok(false)` untouched for data chunks.
    pub fn process_chunk(
        &mut self,
        operator: &mut dyn Restorable,
        chunk: &Chunk,
    ) -> Result<bool, String> {
        let Some(marker) = chunk.chunk_marker() else {
            return Ok(false);
        };
        if self.pending_marker.is_some() {
            return Err(format!(
                "{}: received a marker while another marker is pending",
                self.operator_name
            ));
        }
        if marker.resuming {
            let state = self
                .context
                .store()
                .load(&self.operator_name, marker.snapshot_id)
                .ok_or_else(|| {
                    format!(
                        "{}: no captured state for snapshot {}",
                        self.operator_name, marker.snapshot_id
                    )
                })?;
            operator.restore(&state, self.context.serde())?;
            debug!(
                "Snapshot restored: operator={} snapshot_id={}",
                self.operator_name, marker.snapshot_id
            );
        } else {
            let state = operator.capture(self.context.serde())?;
            self.context
                .store()
                .save(&self.operator_name, marker.snapshot_id, state);
            debug!(
                "Snapshot captured: operator={} snapshot_id={}",
                self.operator_name, marker.snapshot_id
            );
        }
        self.pending_marker = Some(chunk.clone());
        Ok(true)
    }

    pub fn has_marker(&self) -> bool {
        self.pending_marker.is_some()
    }

    pub fn next_marker(&mut self) -> Option<Chunk> {
        self.pending_marker.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};

    #[test]
    fn ipc_round_trip_preserves_batch() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![Some(1), None, Some(3)]))],
        )
        .expect("build record batch");

        let serde = SnapshotSerde;
        let bytes = serde.encode_record_batch(&batch).expect("encode");
        let decoded = serde.decode_record_batch(&bytes).expect("decode");
        assert_eq!(decoded, batch);
    }

    #[test]
    fn store_round_trips_state_per_operator() {
        let store = SnapshotStore::new();
        store.save("op-a", 1, vec![1, 2, 3]);
        store.save("op-b", 1, vec![9]);
        assert_eq!(store.load("op-a", 1), Some(vec![1, 2, 3]));
        assert_eq!(store.load("op-b", 1), Some(vec![9]));
        assert_eq!(store.load("op-a", 2), None);
    }

    struct CountingOperator {
        captured: usize,
        restored: Vec<u8>,
    }

    impl Restorable for CountingOperator {
        fn capture(&self, _serde: &SnapshotSerde) -> Result<Vec<u8>, String> {
            Ok(vec![self.captured as u8])
        }

        fn restore(&mut self, state: &[u8], _serde: &SnapshotSerde) -> Result<(), String> {
            self.restored = state.to_vec();
            Ok(())
        }
    }

    #[test]
    fn marker_triggers_capture_then_queues_for_emission() {
        let context = SnapshotContext::new(SnapshotStore::new());
        let mut state = SingleInputSnapshotState::new("join", context.clone());
        let mut op = CountingOperator {
            captured: 42,
            restored: Vec::new(),
        };

        let consumed = state
            .process_chunk(&mut op, &Chunk::marker(5, false))
            .expect("process marker");
        assert!(consumed);
        assert!(state.has_marker());
        assert_eq!(context.store().load("join", 5), Some(vec![42]));

        let marker = state.next_marker().expect("pending marker");
        assert_eq!(marker.chunk_marker().expect("marker meta").snapshot_id, 5);
        assert!(!state.has_marker());
    }

    #[test]
    fn resuming_marker_restores_state() {
        let context = SnapshotContext::new(SnapshotStore::new());
        context.store().save("join", 7, vec![17]);
        let mut state = SingleInputSnapshotState::new("join", context);
        let mut op = CountingOperator {
            captured: 0,
            restored: Vec::new(),
        };

        state
            .process_chunk(&mut op, &Chunk::marker(7, true))
            .expect("process resuming marker");
        assert_eq!(op.restored, vec![17]);
    }
}
