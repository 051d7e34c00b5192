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
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Tracks logical memory usage for a component and its ancestors.
///
/// This is a lightweight accounting utility that only records bytes explicitly
/// reported by the caller. It does NOT reflect real process RSS or allocator
/// statistics.
#[derive(Debug)]
pub struct MemTracker {
    label: String,
    parent: Option<Arc<MemTracker>>,
    current: AtomicI64,
    peak: AtomicI64,
}

impl MemTracker {
    /// Create a root tracker with no parent.
    pub fn new_root(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            parent: None,
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    /// Create a child tracker with the provided parent.
    pub fn new_child(label: impl Into<String>, parent: &Arc<MemTracker>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            parent: Some(Arc::clone(parent)),
            current: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn current(&self) -> i64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }

    /// Increase consumption for this tracker and all ancestors.
    pub fn consume(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            let new_value = current.current.fetch_add(bytes, Ordering::AcqRel) + bytes;
            current.update_peak(new_value);
            tracker = current.parent.as_deref();
        }
    }

    /// Decrease consumption for this tracker and all ancestors.
    pub fn release(&self, bytes: i64) {
        if bytes <= 0 {
            return;
        }
        let mut tracker: Option<&MemTracker> = Some(self);
        while let Some(current) = tracker {
            current.current.fetch_sub(bytes, Ordering::AcqRel);
            tracker = current.parent.as_deref();
        }
    }

    fn update_peak(&self, value: i64) {
        let mut prev = self.peak.load(Ordering::Relaxed);
        while value > prev {
            match self
                .peak
                .compare_exchange(prev, value, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Per-operator memory context with absolute set-bytes semantics.
///
/// Callers report the total size of a transient allocation (e.g. a candidate
/// list held across a yield); the context reconciles the delta against its
/// tracker and releases whatever is still accounted when dropped.
#[derive(Debug)]
pub struct LocalMemoryContext {
    tracker: Arc<MemTracker>,
    bytes: i64,
}

impl LocalMemoryContext {
    pub fn new(tracker: Arc<MemTracker>) -> Self {
        Self { tracker, bytes: 0 }
    }

    pub fn bytes(&self) -> i64 {
        self.bytes
    }

    pub fn set_bytes(&mut self, bytes: i64) {
        let bytes = bytes.max(0);
        if bytes > self.bytes {
            self.tracker.consume(bytes - self.bytes);
        } else {
            self.tracker.release(self.bytes - bytes);
        }
        self.bytes = bytes;
    }
}

impl Drop for LocalMemoryContext {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

static PROCESS_TRACKER: OnceLock<Arc<MemTracker>> = OnceLock::new();

/// Global process-level logical memory tracker.
pub fn process_mem_tracker() -> Arc<MemTracker> {
    Arc::clone(PROCESS_TRACKER.get_or_init(|| MemTracker::new_root("process")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_propagates_to_parent() {
        let root = MemTracker::new_root("root");
        let child = MemTracker::new_child("child", &root);
        child.consume(100);
        assert_eq!(child.current(), 100);
        assert_eq!(root.current(), 100);
        child.release(40);
        assert_eq!(child.current(), 60);
        assert_eq!(root.current(), 60);
        assert_eq!(root.peak(), 100);
    }

    #[test]
    fn local_context_reconciles_deltas() {
        let root = MemTracker::new_root("root");
        let mut ctx = LocalMemoryContext::new(Arc::clone(&root));
        ctx.set_bytes(64);
        assert_eq!(root.current(), 64);
        ctx.set_bytes(16);
        assert_eq!(root.current(), 16);
        ctx.set_bytes(0);
        assert_eq!(root.current(), 0);
    }

    #[test]
    fn local_context_releases_on_drop() {
        let root = MemTracker::new_root("root");
        {
            let mut ctx = LocalMemoryContext::new(Arc::clone(&root));
            ctx.set_bytes(128);
            assert_eq!(root.current(), 128);
        }
        assert_eq!(root.current(), 0);
    }
}
