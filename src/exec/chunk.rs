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
//! Columnar chunk flowing between operators.
//!
//! Responsibilities:
//! - Wraps an Arrow RecordBatch as the unit of data exchanged by pipeline operators.
//! - Carries optional snapshot-marker metadata so checkpoint boundaries flow through
//!   the same push/pull surface as data.
//!
//! Key exported interfaces:
//! - Types: `Chunk`, `ChunkMarker`.
//!
//! Current limitations:
//! - Implements only the execution semantics currently wired by the terradb pipeline
//!   operators.
//! - Unsupported states should be surfaced as explicit runtime errors instead of
//!   fallback behavior.

use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

/// Snapshot boundary metadata attached to a marker chunk.
///
/// A resuming marker asks the operator to reinstate previously captured state;
/// a forward marker asks it to capture current state before the marker is
/// forwarded downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkMarker {
    pub snapshot_id: u64,
    pub resuming: bool,
}

/// A chunk of data, consisting of multiple rows over equal-length typed columns.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
    marker: Option<ChunkMarker>,
}

impl Chunk {
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            batch,
            marker: None,
        }
    }

    /// Create a zero-row marker chunk signaling a snapshot boundary.
    pub fn marker(snapshot_id: u64, resuming: bool) -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
            marker: Some(ChunkMarker {
                snapshot_id,
                resuming,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn column(&self, index: usize) -> Result<&ArrayRef, String> {
        self.batch
            .columns()
            .get(index)
            .ok_or_else(|| format!("chunk column index out of bounds: {index}"))
    }

    pub fn is_marker(&self) -> bool {
        self.marker.is_some()
    }

    pub fn chunk_marker(&self) -> Option<ChunkMarker> {
        self.marker
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new(RecordBatch::new_empty(Arc::new(Schema::empty())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field};

    #[test]
    fn chunk_wraps_record_batch() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1, 2, 3]))])
            .expect("build record batch");
        let chunk = Chunk::new(batch);
        assert_eq!(chunk.len(), 3);
        assert!(!chunk.is_marker());
        assert!(chunk.column(1).is_err());
    }

    #[test]
    fn marker_chunk_carries_snapshot_metadata() {
        let marker = Chunk::marker(7, false);
        assert!(marker.is_marker());
        assert!(marker.is_empty());
        let meta = marker.chunk_marker().expect("marker metadata");
        assert_eq!(meta.snapshot_id, 7);
        assert!(!meta.resuming);
    }
}
