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
//! Spatial join operator stack.
//!
//! The probe side streams through a precomputed, reference-counted spatial
//! index built from the build side. Index construction and the geometric
//! query algorithm live behind the `spatial_index` traits.

mod output_builder;
mod reference_count;
mod spatial_index;
mod spatial_join_processor;

pub use output_builder::ChunkBuilder;
pub use reference_count::ReferenceCount;
pub use spatial_index::{PendingSpatialIndex, SpatialIndex, SpatialIndexFactory};
pub use spatial_join_processor::{SpatialJoinProcessorFactory, SpatialJoinType};
