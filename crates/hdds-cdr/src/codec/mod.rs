// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The codec engine: a stateless, reentrant interpreter of op-streams
//! against byte streams and raw sample memory.
//!
//! One entry point per operation — write, read, normalize, key
//! extraction, size computation, printing, sample init/free. All state
//! lives in the streams passed in; recursion depth is bounded by the
//! descriptor's nesting depth (checked at construction, at most
//! [`crate::ops::MAX_NESTING_DEPTH`]).
//!
//! # Safety
//!
//! Entry points taking sample memory are `unsafe`: the pointer must
//! reference memory laid out per the descriptor (see [`crate::sample`]),
//! and for read/free targets every field must be initialized.

mod getsize;
mod init;
mod key;
mod normalize;
mod print;
mod read;
mod write;

pub use key::KeySerKind;

use crate::desc::CdrDesc;
use crate::error::{CdrError, CdrResult};
use crate::stream::{BeBo, Istream, LeBo, NativeBo, Ostream, OstreamBe, OstreamLe, XcdrVersion};

// XCDR2 EMHEADER layout.
pub(crate) const EMHEADER_FLAG_MU: u32 = 1 << 31;
pub(crate) const EMHEADER_LC_SHIFT: u32 = 28;
pub(crate) const EMHEADER_LC_MASK: u32 = 0x7 << EMHEADER_LC_SHIFT;
pub(crate) const EMHEADER_ID_MASK: u32 = 0x0fff_ffff;
pub(crate) const LENGTH_CODE_NEXTINT: u32 = 4;

// XCDR1 parameter-list headers.
pub(crate) const XCDR1_PID_MASK: u16 = 0x3fff;
pub(crate) const XCDR1_PID_FLAG_MU: u16 = 0x4000;
pub(crate) const XCDR1_PID_EXTENDED: u16 = 0x3f01;
pub(crate) const XCDR1_PID_SENTINEL: u16 = 0x3f02;
/// Largest member id representable in a short parameter header.
pub(crate) const XCDR1_PID_MAX_SHORT: u32 = 0x3eff;
pub(crate) const XCDR1_EXTENDED_MID_MASK: u32 = 0x0fff_ffff;
pub(crate) const XCDR1_EXTENDED_FLAG_MU: u32 = 1 << 31;

/// Serializes a sample in native byte order (the serdata payload form).
///
/// # Safety
///
/// `sample` must point to a valid sample of the descriptor's type.
pub unsafe fn write_sample(
    os: &mut Ostream<'_>,
    sample: *const u8,
    desc: &CdrDesc,
) -> CdrResult<()> {
    write::write_stream::<NativeBo>(os, desc.ops(), 0, sample)
}

/// Serializes a sample with little-endian primitives.
///
/// # Safety
///
/// As [`write_sample`].
pub unsafe fn write_sample_le(
    os: &mut OstreamLe<'_>,
    sample: *const u8,
    desc: &CdrDesc,
) -> CdrResult<()> {
    write::write_stream::<LeBo>(&mut os.0, desc.ops(), 0, sample)
}

/// Serializes a sample with big-endian primitives.
///
/// # Safety
///
/// As [`write_sample`].
pub unsafe fn write_sample_be(
    os: &mut OstreamBe<'_>,
    sample: *const u8,
    desc: &CdrDesc,
) -> CdrResult<()> {
    write::write_stream::<BeBo>(&mut os.0, desc.ops(), 0, sample)
}

/// Serializes only the key fields of a sample, in the canonical order for
/// the output stream's encoding version.
///
/// # Safety
///
/// As [`write_sample`].
pub unsafe fn write_key(
    os: &mut Ostream<'_>,
    kind: KeySerKind,
    sample: *const u8,
    desc: &CdrDesc,
) -> CdrResult<()> {
    key::write_key_stream::<NativeBo>(os, kind, sample, desc)
}

/// Big-endian variant of [`write_key`] (keyhash computation).
///
/// # Safety
///
/// As [`write_sample`].
pub unsafe fn write_key_be(
    os: &mut OstreamBe<'_>,
    kind: KeySerKind,
    sample: *const u8,
    desc: &CdrDesc,
) -> CdrResult<()> {
    key::write_key_stream::<BeBo>(&mut os.0, kind, sample, desc)
}

/// Deserializes a normalized payload into a sample.
///
/// Cannot fail: normalize has validated every length and value the read
/// path consumes.
///
/// # Safety
///
/// `sample` must point to a valid (fully initialized) sample; replaced
/// heap values are dropped in place.
pub unsafe fn read_sample(is: &mut Istream<'_>, sample: *mut u8, desc: &CdrDesc) {
    read::read_stream(is, desc.ops(), 0, sample);
}

/// Deserializes a normalized key-only payload into the sample's key
/// fields.
///
/// # Safety
///
/// As [`read_sample`].
pub unsafe fn read_key(is: &mut Istream<'_>, sample: *mut u8, desc: &CdrDesc) {
    key::read_key_stream(is, sample, desc);
}

/// Validates a received payload and converts it to native byte order in
/// place. Returns the number of validated bytes (`<= data.len()`); the
/// buffer contents are unspecified after a failure. Idempotent on
/// success (a second pass with `bswap = false` validates the same bytes).
pub fn normalize(
    data: &mut [u8],
    bswap: bool,
    version: XcdrVersion,
    desc: &CdrDesc,
    just_key: bool,
) -> CdrResult<u32> {
    if bswap {
        normalize::normalize_root::<crate::stream::SwapBo>(data, version, desc, just_key)
    } else {
        normalize::normalize_root::<NativeBo>(data, version, desc, just_key)
    }
}

/// Ops-level normalize for callers without a full descriptor (no key
/// form). Same validation and in-place byte swapping as [`normalize`].
pub fn normalize_data(
    data: &mut [u8],
    bswap: bool,
    version: XcdrVersion,
    ops: &[u32],
) -> CdrResult<u32> {
    if bswap {
        normalize::normalize_data_root::<crate::stream::SwapBo>(data, version, ops)
    } else {
        normalize::normalize_data_root::<NativeBo>(data, version, ops)
    }
}

/// Walks a normalized full-sample payload and emits the key fields in
/// XCDR2 canonical (member-id) order.
pub fn extract_key_from_data(
    is: &mut Istream<'_>,
    os: &mut Ostream<'_>,
    desc: &CdrDesc,
) -> CdrResult<()> {
    key::extract_from_data(is, os, desc)
}

/// Converts a serialized key (possibly XCDR1 form) into the output
/// stream's key form.
pub fn extract_key_from_key(
    is: &mut Istream<'_>,
    os: &mut Ostream<'_>,
    kind: KeySerKind,
    desc: &CdrDesc,
) -> CdrResult<()> {
    key::extract_from_key::<NativeBo>(is, os, kind, desc)
}

/// Big-endian variant of [`extract_key_from_key`] (keyhash computation).
pub fn extract_key_from_key_be(
    is: &mut Istream<'_>,
    os: &mut OstreamBe<'_>,
    kind: KeySerKind,
    desc: &CdrDesc,
) -> CdrResult<()> {
    key::extract_from_key::<BeBo>(is, &mut os.0, kind, desc)
}

/// Serialized size of a sample under `version`, without serializing.
///
/// # Safety
///
/// As [`write_sample`].
pub unsafe fn get_size_sample(
    sample: *const u8,
    desc: &CdrDesc,
    version: XcdrVersion,
) -> CdrResult<u32> {
    getsize::size_of_sample(sample, desc, version)
}

/// Serialized size of the key of a sample under `version`.
///
/// # Safety
///
/// As [`write_sample`].
pub unsafe fn get_size_key(
    kind: KeySerKind,
    sample: *const u8,
    desc: &CdrDesc,
    version: XcdrVersion,
) -> CdrResult<u32> {
    getsize::size_of_key(kind, sample, desc, version)
}

/// Renders a normalized payload as a brace-delimited value list for
/// logging, truncated to `max` bytes of output.
pub fn print_sample(is: &mut Istream<'_>, desc: &CdrDesc, max: usize) -> String {
    print::print_sample(is, desc, max)
}

/// Renders a normalized key-only payload for logging.
pub fn print_key(is: &mut Istream<'_>, desc: &CdrDesc, max: usize) -> String {
    print::print_key(is, desc, max)
}

/// Default-constructs a sample in raw memory: zeroed numerics, empty
/// strings and sequences, absent optionals, allocated external members,
/// the default union case. Existing contents are overwritten without
/// being read.
///
/// # Safety
///
/// `sample` must point to `desc.size` bytes of properly aligned memory.
pub unsafe fn init_sample(sample: *mut u8, desc: &CdrDesc) {
    init::init_stream(desc.ops(), 0, sample);
}

/// Releases all heap state owned by a sample, leaving every field empty,
/// absent or null. The outer block itself belongs to the caller.
///
/// # Safety
///
/// `sample` must point to a valid sample of the descriptor's type.
pub unsafe fn free_sample(sample: *mut u8, desc: &CdrDesc) {
    init::free_stream(desc.ops(), 0, sample);
}

/// Primitive byte width of a scalar type code (1/2/4/8-byte integers and
/// floats, booleans).
#[inline]
pub(crate) fn prim_size(type_code: u32) -> u32 {
    use crate::ops::*;
    match type_code {
        TYPE_1BY | TYPE_BLN => 1,
        TYPE_2BY => 2,
        TYPE_4BY => 4,
        TYPE_8BY => 8,
        _ => 0,
    }
}

/// Whether an XCDR2 collection of this element type carries a DHEADER.
#[inline]
pub(crate) fn elem_needs_dheader(subtype: u32, version: XcdrVersion) -> bool {
    version == XcdrVersion::Xcdr2 && prim_size(subtype) == 0
}

/// In-memory width of a union discriminator of the given subtype.
#[inline]
pub(crate) fn disc_mem_size(subtype: u32) -> u32 {
    use crate::ops::*;
    match subtype {
        TYPE_BLN | TYPE_1BY => 1,
        TYPE_2BY => 2,
        // 4-byte integers and enums (enums are u32 in memory)
        _ => 4,
    }
}

/// Validation helper shared by normalize and the parameter-list walkers.
#[inline]
pub(crate) fn validation(offset: u32, reason: &'static str) -> CdrError {
    CdrError::Validation { offset, reason }
}
