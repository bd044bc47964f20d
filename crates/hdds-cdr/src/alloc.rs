// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Explicit allocator vtable and the growable raw buffer built on it.
//!
//! Every codec routine that produces bytes takes a `&dyn CdrAllocator`
//! instead of assuming the global allocator, so that stream buffers can
//! live in externally managed memory (shared-memory transports hand out
//! their own allocators). Allocation failure is reported, never aborted.

use std::alloc::{self, Layout};

/// Chunk granularity for growable output buffers.
pub const CHUNK_SIZE: u32 = 128;

/// Allocator vtable for stream and payload buffers.
///
/// All methods deal in raw, 8-byte-aligned blocks. `alloc` and `realloc`
/// signal failure by returning null; callers propagate
/// [`CdrError::OutOfResources`](crate::CdrError::OutOfResources).
///
/// # Safety
///
/// Implementations must return blocks valid for `size` bytes, and
/// `realloc`/`free` must only be called with pointers obtained from the
/// same allocator. Implementations must be usable from multiple threads.
pub unsafe trait CdrAllocator: Send + Sync {
    fn alloc(&self, size: usize) -> *mut u8;
    /// Grows (or shrinks) `ptr` from `old_size` to `new_size`, preserving
    /// contents up to the smaller of the two. `ptr` may be null when
    /// `old_size` is zero.
    fn realloc(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8;
    fn free(&self, ptr: *mut u8, size: usize);
}

const BUF_ALIGN: usize = 8;

/// Default allocator over `std::alloc`.
pub struct HeapAllocator;

/// Shared instance, handy for the common case.
pub static HEAP_ALLOCATOR: HeapAllocator = HeapAllocator;

unsafe impl CdrAllocator for HeapAllocator {
    fn alloc(&self, size: usize) -> *mut u8 {
        if size == 0 {
            return std::ptr::null_mut();
        }
        match Layout::from_size_align(size, BUF_ALIGN) {
            Ok(layout) => unsafe { alloc::alloc(layout) },
            Err(_) => std::ptr::null_mut(),
        }
    }

    fn realloc(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        if ptr.is_null() || old_size == 0 {
            return self.alloc(new_size);
        }
        if new_size == 0 {
            self.free(ptr, old_size);
            return std::ptr::null_mut();
        }
        match Layout::from_size_align(old_size, BUF_ALIGN) {
            Ok(layout) => unsafe { alloc::realloc(ptr, layout, new_size) },
            Err(_) => std::ptr::null_mut(),
        }
    }

    fn free(&self, ptr: *mut u8, size: usize) {
        if ptr.is_null() || size == 0 {
            return;
        }
        if let Ok(layout) = Layout::from_size_align(size, BUF_ALIGN) {
            unsafe { alloc::dealloc(ptr, layout) }
        }
    }
}

/// Raw growable byte buffer backed by a [`CdrAllocator`].
///
/// Growth rounds the requested capacity up to a [`CHUNK_SIZE`] boundary.
/// The buffer does not free itself on drop: whoever created it must call
/// [`RawBuf::release`] with the same allocator (output streams do this in
/// their own `Drop`, serdata payloads in theirs).
#[derive(Debug)]
pub struct RawBuf {
    ptr: *mut u8,
    cap: u32,
}

impl RawBuf {
    pub const fn empty() -> Self {
        RawBuf {
            ptr: std::ptr::null_mut(),
            cap: 0,
        }
    }

    /// Allocates `cap` bytes up front; `cap == 0` yields an empty buffer.
    pub fn with_capacity(allocator: &dyn CdrAllocator, cap: u32) -> Option<Self> {
        if cap == 0 {
            return Some(Self::empty());
        }
        let ptr = allocator.alloc(cap as usize);
        if ptr.is_null() {
            return None;
        }
        Some(RawBuf { ptr, cap })
    }

    pub fn capacity(&self) -> u32 {
        self.cap
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }

    /// Ensures capacity for at least `needed` bytes, reallocating in
    /// [`CHUNK_SIZE`] chunks. Returns false on allocation failure, leaving
    /// the existing contents intact.
    pub fn reserve(&mut self, allocator: &dyn CdrAllocator, needed: u32) -> bool {
        if needed <= self.cap {
            return true;
        }
        let new_cap = needed
            .checked_add(CHUNK_SIZE - 1)
            .map(|n| n & !(CHUNK_SIZE - 1));
        let Some(new_cap) = new_cap else { return false };
        let new_ptr = allocator.realloc(self.ptr, self.cap as usize, new_cap as usize);
        if new_ptr.is_null() {
            return false;
        }
        self.ptr = new_ptr;
        self.cap = new_cap;
        true
    }

    /// Frees the backing store and resets to empty.
    pub fn release(&mut self, allocator: &dyn CdrAllocator) {
        allocator.free(self.ptr, self.cap as usize);
        self.ptr = std::ptr::null_mut();
        self.cap = 0;
    }

    /// View of the first `len` bytes. Caller guarantees `len <= capacity`.
    pub fn slice(&self, len: u32) -> &[u8] {
        debug_assert!(len <= self.cap);
        if len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr, len as usize) }
    }

    pub fn slice_mut(&mut self, len: u32) -> &mut [u8] {
        debug_assert!(len <= self.cap);
        if len == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.ptr, len as usize) }
    }
}

// The buffer is a plain block of bytes; ownership is tracked by the
// containing object (stream or serdata).
unsafe impl Send for RawBuf {}
unsafe impl Sync for RawBuf {}
