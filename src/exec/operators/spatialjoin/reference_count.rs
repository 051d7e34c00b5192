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
//! Manual shared-ownership counter for expensive build-side artifacts.
//!
//! Responsibilities:
//! - Tracks how many factories and operators depend on one shared artifact and
//!   fires a one-shot free callback exactly when the count reaches zero.
//!
//! Key exported interfaces:
//! - Types: `ReferenceCount`.
//!
//! Current limitations:
//! - Implements only the execution semantics currently wired by the terradb pipeline
//!   operators.
//! - Unsupported states should be surfaced as explicit runtime errors instead of
//!   fallback behavior.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::terradb_logging::debug;

type FreeCallback = Box<dyn FnOnce() + Send>;

/// Explicit atomic reference count plus a release callback invoked exactly once
/// on the transition to zero. The count is never negative; retain after free
/// and double release are caller defects surfaced as errors.
pub struct ReferenceCount {
    count: AtomicUsize,
    on_free: Mutex<Option<FreeCallback>>,
}

impl ReferenceCount {
    pub fn new(initial: usize, on_free: impl FnOnce() + Send + 'static) -> Self {
        Self {
            count: AtomicUsize::new(initial.max(1)),
            on_free: Mutex::new(Some(Box::new(on_free))),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn retain(&self) -> Result<(), String> {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err("reference count retained after reaching zero".to_string());
            }
            match self.count.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn release(&self) -> Result<(), String> {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err("reference count released below zero".to_string());
            }
            match self.count.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if current == 1 {
            let callback = {
                let mut guard = self.on_free.lock().expect("reference count free callback");
                guard.take()
            };
            if let Some(callback) = callback {
                debug!("ReferenceCount reached zero, invoking free callback");
                callback();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn free_callback_fires_exactly_once_at_zero() {
        let freed = Arc::new(AtomicUsize::new(0));
        let freed_clone = Arc::clone(&freed);
        let count = ReferenceCount::new(1, move || {
            freed_clone.fetch_add(1, Ordering::SeqCst);
        });

        count.retain().expect("retain");
        count.retain().expect("retain");
        count.release().expect("release");
        count.release().expect("release");
        assert_eq!(freed.load(Ordering::SeqCst), 0);
        count.release().expect("final release");
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_below_zero_is_an_error() {
        let count = ReferenceCount::new(1, || {});
        count.release().expect("release");
        assert!(count.release().is_err());
    }

    #[test]
    fn retain_after_free_is_an_error() {
        let count = ReferenceCount::new(1, || {});
        count.release().expect("release");
        assert!(count.retain().is_err());
    }
}
