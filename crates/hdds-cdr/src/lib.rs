// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CDR serialization, key extraction and serialized-sample core for
//! DDS/RTPS.
//!
//! This crate is the type-driven binary codec at the bottom of the hdds
//! stack: a tagged op-stream interpreter covering XCDR1 and XCDR2 (final,
//! appendable and mutable extensibility, optional and external members),
//! canonical key extraction with keyhash computation, and the refcounted
//! serdata container binding codec output to the RTPS writer and reader
//! history caches.
//!
//! ## Layout
//!
//! - [`ops`] — the op-stream model: a type described as a flat array of
//!   tagged 32-bit instructions, plus static analysis over it.
//! - [`desc`] — the runtime type descriptor: ops bound to size/alignment,
//!   key orderings, fixed-key flags and memcpy-optimization hints.
//! - [`stream`] / [`alloc`] — cursor-bearing byte streams over an
//!   explicit allocator vtable.
//! - [`codec`] — the stateless interpreter: write, read, normalize, key
//!   extraction, sizing, printing, sample init/free.
//! - [`sample`] — the native sample memory model the codec interprets
//!   (including the layout-pinned [`Sequence`] container).
//! - [`serdata`] — the sample container: construction from fragment
//!   chains, scatter lists, user samples, keyhashes and loans; conversion
//!   back out; per-type pooling.
//! - [`loan`] — zero-copy sample loans and the per-entity loan pool.
//! - [`registry`] — process-wide descriptor interning.
//!
//! ## Ingress and egress
//!
//! Outbound: a user sample is serialized through [`codec::write_sample`]
//! into a [`Serdata`], which the writer cache hands to the wire as one
//! contiguous header+payload range. Inbound: received fragments are
//! assembled by [`Serdata::from_ser`], validated and byte-swapped in
//! place by the normalize pass — after which reads cannot fail — and
//! only then deserialized. Every path that produces a key produces the
//! same canonical XCDR2 bytes, so instance identity is stable across
//! encodings, byte orders and member reordering.

pub mod alloc;
pub mod codec;
pub mod desc;
mod error;
pub mod loan;
pub mod ops;
pub mod registry;
pub mod sample;
pub mod serdata;
pub mod stream;

pub use alloc::{CdrAllocator, HeapAllocator, HEAP_ALLOCATOR};
pub use codec::KeySerKind;
pub use desc::{CdrDesc, KeyDescriptor, FIXED_KEY_MAX_SIZE};
pub use error::{CdrError, CdrResult};
pub use loan::{Loan, LoanMetadata, LoanOrigin, LoanPool, LoanSampleState};
pub use registry::{SharedDesc, TypeRegistry};
pub use sample::Sequence;
pub use serdata::{
    CdrHeader, EncodingFormat, Fragment, SerType, Serdata, SerdataKind, SerdataPoolConfig,
};
pub use stream::{Istream, Ostream, OstreamBe, OstreamLe, XcdrVersion};
