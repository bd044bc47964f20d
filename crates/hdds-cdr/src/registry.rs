// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide interning of type descriptors.
//!
//! Identical types (bitwise-equal op-streams, size, align and flagset)
//! share one descriptor. Lookup, registration and removal are serialized
//! by one mutex; reference counting in between is the `Arc` strong count
//! and takes no lock. The final release retakes the lock and removes the
//! entry atomically with its last decrement.

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::desc::CdrDesc;

pub struct TypeRegistry {
    /// Buckets keyed by a murmur3 of the op words; entries within a
    /// bucket are distinguished by full bitwise comparison.
    buckets: Mutex<HashMap<u32, Vec<Arc<CdrDesc>>>>,
}

impl TypeRegistry {
    pub fn new() -> Arc<TypeRegistry> {
        Arc::new(TypeRegistry {
            buckets: Mutex::new(HashMap::new()),
        })
    }

    /// The process-wide instance.
    pub fn global() -> &'static Arc<TypeRegistry> {
        static GLOBAL: OnceLock<Arc<TypeRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(TypeRegistry::new)
    }

    fn hash_of(desc: &CdrDesc) -> u32 {
        crate::serdata::ops_hash(desc.ops())
    }

    /// Interns `desc`: returns a handle to the already registered
    /// identical descriptor if one exists, registering `desc` otherwise.
    pub fn register(self: &Arc<Self>, desc: CdrDesc) -> SharedDesc {
        let hash = Self::hash_of(&desc);
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(hash).or_default();
        let arc = match bucket.iter().find(|d| d.same_type(&desc)) {
            Some(existing) => Arc::clone(existing),
            None => {
                let arc = Arc::new(desc);
                bucket.push(Arc::clone(&arc));
                arc
            }
        };
        SharedDesc {
            desc: ManuallyDrop::new(arc),
            registry: Arc::clone(self),
        }
    }

    /// Returns a handle to a registered descriptor with this identity.
    pub fn lookup(self: &Arc<Self>, size: u32, align: u32, ops: &[u32]) -> Option<SharedDesc> {
        let hash = crate::serdata::ops_hash(ops);
        let buckets = self.buckets.lock();
        let bucket = buckets.get(&hash)?;
        let arc = bucket
            .iter()
            .find(|d| d.size == size && d.align == align && d.ops() == ops)?;
        Some(SharedDesc {
            desc: ManuallyDrop::new(Arc::clone(arc)),
            registry: Arc::clone(self),
        })
    }

    #[cfg(test)]
    fn registered_count(&self) -> usize {
        self.buckets.lock().values().map(Vec::len).sum()
    }
}

/// Owning handle to a registered descriptor. Clones share the descriptor
/// without touching the registry; dropping the last handle removes the
/// registration.
pub struct SharedDesc {
    desc: ManuallyDrop<Arc<CdrDesc>>,
    registry: Arc<TypeRegistry>,
}

impl SharedDesc {
    #[inline]
    pub fn get(&self) -> &Arc<CdrDesc> {
        &self.desc
    }
}

impl Deref for SharedDesc {
    type Target = CdrDesc;

    fn deref(&self) -> &CdrDesc {
        &self.desc
    }
}

impl Clone for SharedDesc {
    fn clone(&self) -> Self {
        SharedDesc {
            desc: ManuallyDrop::new(Arc::clone(&self.desc)),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl Drop for SharedDesc {
    fn drop(&mut self) {
        let hash = TypeRegistry::hash_of(&self.desc);
        let mut buckets = self.registry.buckets.lock();
        // drop our reference under the lock so the last-release check
        // cannot race with another handle's drop
        let ptr = Arc::as_ptr(&self.desc);
        unsafe { ManuallyDrop::drop(&mut self.desc) };
        if let Some(bucket) = buckets.get_mut(&hash) {
            if let Some(pos) = bucket
                .iter()
                .position(|d| Arc::as_ptr(d) == ptr && Arc::strong_count(d) == 1)
            {
                bucket.swap_remove(pos);
                if bucket.is_empty() {
                    buckets.remove(&hash);
                }
            }
        }
    }
}
