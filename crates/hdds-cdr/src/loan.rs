// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Loaned samples: buffers whose backing memory is owned by a subsystem
//! other than the heap allocator (typically a shared-memory exchange),
//! plus the per-entity pool tracking outstanding loans.
//!
//! A loan is refcounted through `Arc`; the backend's `free` hook runs when
//! the last reference drops. A serdata holding a loan owns one reference,
//! so the loan always outlives the serdata carrying it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec;
use crate::error::{CdrError, CdrResult};
use crate::serdata::{SerType, SAMPLE_NATIVE};

/// Who owns the memory behind a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanOrigin {
    Heap,
    Psmx,
}

/// What the loan's buffer currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanSampleState {
    Uninitialized,
    RawKey,
    RawData,
    SerializedKey,
    SerializedData,
}

impl LoanSampleState {
    pub fn is_raw(self) -> bool {
        matches!(self, LoanSampleState::RawKey | LoanSampleState::RawData)
    }
}

/// Exchange metadata travelling with a loan.
#[derive(Debug, Clone, Copy)]
pub struct LoanMetadata {
    pub sample_state: LoanSampleState,
    /// CDR encoding identifier of the buffer ([`SAMPLE_NATIVE`] for raw
    /// in-memory samples).
    pub cdr_identifier: u16,
    /// CDR header options (big-endian convention, low 2 bits = padding).
    pub cdr_options: u16,
    pub sample_size: u32,
    pub instance_id: u64,
    pub data_type: u32,
    pub statusinfo: u32,
    pub timestamp: i64,
}

/// Backend vtable: invoked once, when the last reference to the loan
/// drops.
pub trait LoanBackend: Send + Sync {
    fn free(&self, loan: &mut Loan);
}

/// A loaned sample buffer.
pub struct Loan {
    sample_ptr: *mut u8,
    metadata: LoanMetadata,
    origin: LoanOrigin,
    backend: Option<Box<dyn LoanBackend>>,
}

// The sample memory is exclusively described by the loan; concurrent
// access discipline is the caller's (the codec never writes through a
// shared loan).
unsafe impl Send for Loan {}
unsafe impl Sync for Loan {}

impl Loan {
    /// Wraps externally owned memory in a refcounted loan.
    ///
    /// # Safety
    ///
    /// `sample_ptr` must stay valid for `metadata.sample_size` bytes until
    /// the backend's `free` runs.
    pub unsafe fn new(
        sample_ptr: *mut u8,
        metadata: LoanMetadata,
        origin: LoanOrigin,
        backend: Box<dyn LoanBackend>,
    ) -> Arc<Loan> {
        Arc::new(Loan {
            sample_ptr,
            metadata,
            origin,
            backend: Some(backend),
        })
    }

    #[inline]
    pub fn sample_ptr(&self) -> *mut u8 {
        self.sample_ptr
    }

    #[inline]
    pub fn metadata(&self) -> &LoanMetadata {
        &self.metadata
    }

    #[inline]
    pub fn origin(&self) -> LoanOrigin {
        self.origin
    }
}

impl Drop for Loan {
    fn drop(&mut self) {
        if let Some(backend) = self.backend.take() {
            backend.free(self);
        }
    }
}

/// Heap-backed loan: the sample lives on the process heap and is released
/// through the type's ops walk.
struct HeapLoanBackend {
    stype: Arc<SerType>,
}

impl LoanBackend for HeapLoanBackend {
    fn free(&self, loan: &mut Loan) {
        let desc = self.stype.desc();
        unsafe {
            codec::free_sample(loan.sample_ptr, desc);
            crate::sample::raw_box_release(loan.sample_ptr, desc.size, desc.align);
        }
    }
}

/// Allocates a default-initialized heap loan for writer use.
pub fn heap_loan(stype: &Arc<SerType>, sample_state: LoanSampleState) -> CdrResult<Arc<Loan>> {
    if !matches!(
        sample_state,
        LoanSampleState::Uninitialized | LoanSampleState::RawKey | LoanSampleState::RawData
    ) {
        return Err(CdrError::Contract {
            reason: "heap loans hold raw samples".into(),
        });
    }
    let desc = stype.desc();
    let sample_ptr = unsafe {
        let p = crate::sample::raw_box_alloc(desc.size, desc.align);
        if p.is_null() {
            return Err(CdrError::OutOfResources);
        }
        codec::init_sample(p, desc);
        p
    };
    let metadata = LoanMetadata {
        sample_state,
        cdr_identifier: SAMPLE_NATIVE,
        cdr_options: 0,
        sample_size: desc.size,
        instance_id: 0,
        data_type: 0,
        statusinfo: 0,
        timestamp: 0,
    };
    unsafe {
        Ok(Loan::new(
            sample_ptr,
            metadata,
            LoanOrigin::Heap,
            Box::new(HeapLoanBackend {
                stype: Arc::clone(stype),
            }),
        ))
    }
}

/// Re-arms a uniquely held heap loan for the next write: clears the
/// metadata and resets the sample to its default value.
pub fn heap_loan_reset(loan: &mut Loan, stype: &SerType) {
    debug_assert_eq!(loan.origin, LoanOrigin::Heap);
    let desc = stype.desc();
    unsafe {
        codec::free_sample(loan.sample_ptr, desc);
        codec::init_sample(loan.sample_ptr, desc);
    }
    loan.metadata = LoanMetadata {
        sample_state: LoanSampleState::Uninitialized,
        cdr_identifier: SAMPLE_NATIVE,
        cdr_options: 0,
        sample_size: desc.size,
        instance_id: 0,
        data_type: 0,
        statusinfo: 0,
        timestamp: 0,
    };
}

/// Per-entity container of outstanding loans.
///
/// Operations are short linear scans under a single mutex; capacity grows
/// by doubling.
pub struct LoanPool {
    loans: Mutex<Vec<Arc<Loan>>>,
}

impl LoanPool {
    pub fn new(initial_cap: u32) -> Self {
        LoanPool {
            loans: Mutex::new(Vec::with_capacity(initial_cap as usize)),
        }
    }

    /// Takes over one reference to the loan.
    pub fn add(&self, loan: Arc<Loan>) {
        self.loans.lock().push(loan);
    }

    /// Finds the loan backing `sample_ptr` and removes it from the pool,
    /// handing its reference to the caller.
    pub fn find_and_remove(&self, sample_ptr: *const u8) -> Option<Arc<Loan>> {
        let mut loans = self.loans.lock();
        let pos = loans
            .iter()
            .position(|l| l.sample_ptr as *const u8 == sample_ptr)?;
        Some(loans.swap_remove(pos))
    }

    /// Removes and returns any loan (writer-side reuse).
    pub fn pop(&self) -> Option<Arc<Loan>> {
        self.loans.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.loans.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loans.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingBackend(Arc<AtomicU32>);

    impl LoanBackend for CountingBackend {
        fn free(&self, _loan: &mut Loan) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dummy_loan(addr: usize, freed: &Arc<AtomicU32>) -> Arc<Loan> {
        unsafe {
            Loan::new(
                addr as *mut u8,
                LoanMetadata {
                    sample_state: LoanSampleState::RawData,
                    cdr_identifier: SAMPLE_NATIVE,
                    cdr_options: 0,
                    sample_size: 0,
                    instance_id: 0,
                    data_type: 0,
                    statusinfo: 0,
                    timestamp: 0,
                },
                LoanOrigin::Psmx,
                Box::new(CountingBackend(Arc::clone(freed))),
            )
        }
    }

    #[test]
    fn test_backend_free_runs_on_last_release() {
        let freed = Arc::new(AtomicU32::new(0));
        let loan = dummy_loan(0x1000, &freed);
        let loan2 = Arc::clone(&loan);
        drop(loan);
        assert_eq!(freed.load(Ordering::SeqCst), 0);
        drop(loan2);
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pool_find_and_remove_by_sample_ptr() {
        let freed = Arc::new(AtomicU32::new(0));
        let pool = LoanPool::new(1);
        pool.add(dummy_loan(0x1000, &freed));
        pool.add(dummy_loan(0x2000, &freed));
        pool.add(dummy_loan(0x3000, &freed));

        let l = pool
            .find_and_remove(0x2000 as *const u8)
            .expect("loan present");
        assert_eq!(l.sample_ptr() as usize, 0x2000);
        assert!(pool.find_and_remove(0x2000 as *const u8).is_none());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_pool_drop_releases_held_loans() {
        let freed = Arc::new(AtomicU32::new(0));
        {
            let pool = LoanPool::new(0);
            pool.add(dummy_loan(0x1000, &freed));
            pool.add(dummy_loan(0x2000, &freed));
        }
        assert_eq!(freed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_pool_pop_returns_any() {
        let freed = Arc::new(AtomicU32::new(0));
        let pool = LoanPool::new(0);
        assert!(pool.pop().is_none());
        pool.add(dummy_loan(0x1000, &freed));
        assert!(pool.pop().is_some());
        assert!(pool.is_empty());
    }
}
