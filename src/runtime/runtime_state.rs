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
use std::sync::Arc;

use crate::runtime::mem_tracker::{self, MemTracker};

const DEFAULT_CHUNK_SIZE: usize = 4096;

/// RuntimeState is a per-fragment-instance execution context.
///
/// Today it mainly provides access to frequently used query options (e.g. the
/// output chunk size) and the fragment memory tracker. More execution-time
/// parameters can be migrated here over time.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    chunk_size: usize,
    mem_tracker: Arc<MemTracker>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            mem_tracker: mem_tracker::process_mem_tracker(),
        }
    }
}

impl RuntimeState {
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            ..Self::default()
        }
    }

    pub fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.mem_tracker = tracker;
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }
}
