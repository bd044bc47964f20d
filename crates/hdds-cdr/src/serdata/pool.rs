// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free per-type recycling of serdata allocations.
//!
//! Small payload buffers keep their capacity across reuse, which is what
//! makes minimum-size samples cheap to churn at loopback rates.

use crossbeam::queue::ArrayQueue;

use crate::serdata::SerdataInner;

/// Pool sizing knobs. The defaults match what saturates loopback with
/// minimum-size samples; both are deliberately tunables, not invariants.
#[derive(Debug, Clone, Copy)]
pub struct SerdataPoolConfig {
    /// Maximum pooled entries per type.
    pub max_entries: u32,
    /// Payload capacities above this are freed instead of pooled.
    pub max_pooled_size: u32,
}

impl Default for SerdataPoolConfig {
    fn default() -> Self {
        SerdataPoolConfig {
            max_entries: 8192,
            max_pooled_size: 256,
        }
    }
}

pub(crate) struct SerdataPool {
    queue: ArrayQueue<Box<SerdataInner>>,
    config: SerdataPoolConfig,
}

impl SerdataPool {
    pub(crate) fn new(config: SerdataPoolConfig) -> Self {
        SerdataPool {
            queue: ArrayQueue::new(config.max_entries.max(1) as usize),
            config,
        }
    }

    pub(crate) fn get(&self) -> Option<Box<SerdataInner>> {
        self.queue.pop()
    }

    /// Recycles an inner whose refcount has reached zero; drops it when
    /// it is too large or the pool is full.
    pub(crate) fn put(&self, inner: Box<SerdataInner>) {
        if inner.payload_capacity() > self.config.max_pooled_size {
            return; // Box drop releases the payload
        }
        let _ = self.queue.push(inner);
    }
}
