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
//! Pipeline dependency primitives.
//!
//! Responsibilities:
//! - Defines dependency handles, readiness flags, and dependency-manager bookkeeping.
//! - Used by the scheduler and operators to coordinate blocking/unblocking transitions
//!   without the operator ever waiting on I/O itself.
//!
//! Key exported interfaces:
//! - Types: `DependencyHandle`, `Dependency`, `DependencyManager`.
//!
//! Current limitations:
//! - Implements only the execution semantics currently wired by the terradb pipeline
//!   operators.
//! - Unsupported states should be surfaced as explicit runtime errors instead of
//!   fallback behavior.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::terradb_logging::debug;

static NEXT_DEP_MANAGER_ID: AtomicUsize = AtomicUsize::new(1);
static NEXT_DEP_ID: AtomicUsize = AtomicUsize::new(1);

/// Reference-counted handle to one pipeline dependency object.
pub type DependencyHandle = Arc<Dependency>;

/// Dependency primitive used to model blocked/unblocked execution conditions.
pub struct Dependency {
    id: usize,
    name: String,
    ready: AtomicBool,
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Dependency {}

impl Dependency {
    fn new(name: String) -> Self {
        Self {
            id: NEXT_DEP_ID.fetch_add(1, Ordering::Relaxed),
            name,
            ready: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self) {
        let prev = self.ready.swap(true, Ordering::AcqRel);
        if !prev {
            debug!("Dependency ready: dep_id={} name={}", self.id, self.name);
        }
    }

    pub fn set_blocked(&self) {
        self.ready.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
/// Registry managing dependency objects for one pipeline build/execution context.
pub struct DependencyManager {
    id: usize,
    deps: Arc<Mutex<HashMap<String, DependencyHandle>>>,
}

impl DependencyManager {
    pub fn new() -> Self {
        Self {
            id: NEXT_DEP_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            deps: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn get_or_create(&self, name: impl Into<String>) -> DependencyHandle {
        let name = name.into();
        let mut guard = self.deps.lock().expect("dependency manager lock");
        guard
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Dependency::new(name)))
            .clone()
    }

    pub fn mark_ready(&self, name: &str) {
        let dep = self.get_or_create(name.to_string());
        dep.set_ready();
    }
}

impl Default for DependencyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_readiness_transitions() {
        let manager = DependencyManager::new();
        let dep = manager.get_or_create("spatial_index_build:1");
        assert!(!dep.is_ready());
        dep.set_ready();
        assert!(dep.is_ready());
        dep.set_blocked();
        assert!(!dep.is_ready());
    }

    #[test]
    fn manager_returns_same_handle_for_same_name() {
        let manager = DependencyManager::new();
        let a = manager.get_or_create("x");
        let b = manager.get_or_create("x");
        assert_eq!(a.as_ref(), b.as_ref());
        manager.mark_ready("x");
        assert!(b.is_ready());
    }
}
