// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key serialization and extraction.
//!
//! The canonical key is the XCDR2, native-endian concatenation of the key
//! leaves in member-id order: the same byte sequence for a given logical
//! key value, regardless of the encoding the value arrived in or the
//! order the fields appeared on the wire. XCDR1 key forms use declaration
//! order, as classic RTPS keyhashes did.
//!
//! Keyhash serialization flattens all structure (no DHEADERs) — this is
//! the "XCDR2-keyhash form" the fixed-key flags refer to.

use super::init::init_stream;
use super::read::{read_adr_value, read_enum_value, read_xcdr1_param_header};
use super::write::find_case;
use super::*;
use crate::desc::{CdrDesc, DescKey};
use crate::ops::*;
use crate::sample::{load, raw_box_alloc, store};
use crate::stream::{ByteOrder, Ostream};

/// Which serialized key form to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySerKind {
    /// Structured form: non-primitive array keys keep their DHEADER.
    Sample,
    /// Keyhash form: all structure flattened.
    Keyhash,
}

fn keys_for<'a>(desc: &'a CdrDesc, version: XcdrVersion) -> &'a [DescKey] {
    match version {
        XcdrVersion::Xcdr1 => desc.keys_definition_order(),
        XcdrVersion::Xcdr2 => desc.keys_id_order(),
    }
}

/// Follows a key path down to the leaf's containing aggregate base.
unsafe fn descend_path(
    ops: &[u32],
    path: &[u32],
    mut base: *const u8,
) -> CdrResult<*const u8> {
    for &adr in &path[..path.len() - 1] {
        let idx = adr as usize;
        let insn = ops[idx];
        let off = ops[idx + 1];
        match op_type(insn) {
            TYPE_STU => base = base.add(off as usize),
            TYPE_EXT => {
                let ptr: *const u8 = load(base, off);
                if ptr.is_null() {
                    return Err(CdrError::Encoding {
                        reason: "absent member on a key path".into(),
                    });
                }
                base = ptr;
            }
            _ => {
                return Err(CdrError::Contract {
                    reason: "key path traverses a non-aggregate member".into(),
                })
            }
        }
    }
    Ok(base)
}

/// Mutable variant of [`descend_path`], allocating absent external
/// members on the way down (used when reading keys back into a sample).
unsafe fn descend_path_mut(ops: &[u32], path: &[u32], mut base: *mut u8) -> *mut u8 {
    for &adr in &path[..path.len() - 1] {
        let idx = adr as usize;
        let insn = ops[idx];
        let off = ops[idx + 1];
        match op_type(insn) {
            TYPE_STU => base = base.add(off as usize),
            TYPE_EXT => {
                let extra = idx + adr_extra(insn);
                let mut ptr: *mut u8 = load(base, off);
                if ptr.is_null() {
                    let word = ops[extra];
                    ptr = raw_box_alloc(unpack_size(word), unpack_align(word));
                    init_stream(ops, jump_target(idx, ops[extra + 1] as i32), ptr);
                    store(base, off, ptr);
                }
                base = ptr;
            }
            _ => debug_assert!(false, "key path traverses a non-aggregate member"),
        }
    }
    base
}

/// Serializes the key fields of a sample into `os`, in the canonical
/// order for the stream's encoding version.
pub(crate) unsafe fn write_key_stream<B: ByteOrder>(
    os: &mut Ostream<'_>,
    kind: KeySerKind,
    sample: *const u8,
    desc: &CdrDesc,
) -> CdrResult<()> {
    let ops = desc.ops();
    for key in keys_for(desc, os.version()) {
        let base = descend_path(ops, &key.path, sample)?;
        write_key_leaf::<B>(os, kind, ops, key.leaf() as usize, base)?;
    }
    Ok(())
}

unsafe fn write_key_leaf<B: ByteOrder>(
    os: &mut Ostream<'_>,
    kind: KeySerKind,
    ops: &[u32],
    idx: usize,
    base: *const u8,
) -> CdrResult<()> {
    let insn = ops[idx];
    if kind == KeySerKind::Keyhash && op_type(insn) == TYPE_ARR {
        // flattened form: same elements, no DHEADER
        let extra = idx + adr_extra(insn);
        let off = ops[idx + 1];
        return super::write::write_elems::<B>(
            os,
            ops,
            idx,
            extra + 1,
            op_subtype(insn),
            base.add(off as usize) as *mut u8,
            ops[extra],
        );
    }
    super::write::write_adr_value::<B>(os, ops, idx, base)
}

/// Reads a key-only payload back into the sample's key fields, following
/// the input's canonical order.
pub(crate) unsafe fn read_key_stream(is: &mut Istream<'_>, sample: *mut u8, desc: &CdrDesc) {
    let ops = desc.ops();
    for key in keys_for(desc, is.version()) {
        let base = descend_path_mut(ops, &key.path, sample);
        read_adr_value(is, ops, key.leaf() as usize, base);
    }
}

// Key extraction from serialized data.

struct Extractor<'s, 'i> {
    is: &'s mut Istream<'i>,
    ops: &'s [u32],
    desc: &'s CdrDesc,
    /// ADR-index path of the member currently being walked.
    stack: Vec<u32>,
    /// Transcoded key bytes, indexed by canonical (member-id) position.
    captured: Vec<Option<Vec<u8>>>,
    out_version: XcdrVersion,
    kind: KeySerKind,
}

impl Extractor<'_, '_> {
    /// Position of the key whose path equals the stack plus `idx`, if any.
    fn key_at(&self, idx: u32) -> Option<&DescKey> {
        self.desc.keys_definition_order().iter().find(|k| {
            k.path.len() == self.stack.len() + 1
                && k.path[..self.stack.len()] == self.stack[..]
                && *k.path.last().expect("non-empty path") == idx
        })
    }

    /// True when some key path continues below the member at `idx`.
    fn descends_to_key(&self, idx: u32) -> bool {
        self.desc.keys_definition_order().iter().any(|k| {
            k.path.len() > self.stack.len() + 1
                && k.path[..self.stack.len()] == self.stack[..]
                && k.path[self.stack.len()] == idx
        })
    }
}

/// Walks a normalized full-sample payload and emits the key fields in
/// the canonical order of the output stream's version. Native byte order
/// on both sides; keyhashes go through [`extract_from_key`] instead.
pub(crate) fn extract_from_data(
    is: &mut Istream<'_>,
    os: &mut Ostream<'_>,
    desc: &CdrDesc,
) -> CdrResult<()> {
    let nkeys = desc.nkeys();
    let out_version = os.version();
    let mut ex = Extractor {
        is,
        ops: desc.ops(),
        desc,
        stack: Vec::with_capacity(8),
        captured: (0..nkeys).map(|_| None).collect(),
        out_version,
        kind: KeySerKind::Sample,
    };
    walk_stream(&mut ex, os.allocator(), 0)?;
    emit_captured::<crate::stream::NativeBo>(os, desc, ex.captured)
}

/// Converts a serialized key (either canonical order) into the output
/// stream's form and order.
pub(crate) fn extract_from_key<B: ByteOrder>(
    is: &mut Istream<'_>,
    os: &mut Ostream<'_>,
    kind: KeySerKind,
    desc: &CdrDesc,
) -> CdrResult<()> {
    let in_version = is.version();
    let out_version = os.version();
    let mut captured: Vec<Option<Vec<u8>>> = (0..desc.nkeys()).map(|_| None).collect();
    for key in keys_for(desc, in_version) {
        let bytes = transcode_leaf::<B>(
            is,
            os.allocator(),
            out_version,
            kind,
            desc.ops(),
            key.leaf() as usize,
        )?;
        captured[key.ord as usize] = Some(bytes);
    }
    emit_captured::<B>(os, desc, captured)
}

/// Concatenates captured leaves in the output order, re-aligning each.
fn emit_captured<B: ByteOrder>(
    os: &mut Ostream<'_>,
    desc: &CdrDesc,
    captured: Vec<Option<Vec<u8>>>,
) -> CdrResult<()> {
    let out_keys = keys_for(desc, os.version());
    for key in out_keys {
        let bytes = captured[key.ord as usize].as_ref().ok_or_else(|| {
            CdrError::Validation {
                offset: 0,
                reason: "key member missing from input",
            }
        })?;
        os.align(leaf_align(desc.ops(), key.leaf() as usize, os.version()))?;
        os.put_bytes(bytes)?;
    }
    Ok(())
}

/// Leading alignment requirement of a key leaf under `version`.
fn leaf_align(ops: &[u32], idx: usize, version: XcdrVersion) -> u32 {
    let insn = ops[idx];
    let capped = |n: u32| n.min(version.max_align());
    match op_type(insn) {
        TYPE_1BY | TYPE_BLN => 1,
        TYPE_2BY => 2,
        TYPE_8BY => capped(8),
        TYPE_ENU | TYPE_BMK => capped(op_wire_size(insn)),
        TYPE_ARR => match op_subtype(insn) {
            TYPE_1BY | TYPE_BLN => 1,
            TYPE_2BY => 2,
            TYPE_8BY => capped(8),
            TYPE_ENU | TYPE_BMK => capped(op_wire_size(insn)),
            _ => 4,
        },
        _ => 4,
    }
}

/// Reads one leaf value from `is` and re-encodes it standalone in the
/// output version/byte order; the result starts at its natural alignment.
fn transcode_leaf<B: ByteOrder>(
    is: &mut Istream<'_>,
    allocator: &dyn crate::alloc::CdrAllocator,
    out_version: XcdrVersion,
    kind: KeySerKind,
    ops: &[u32],
    idx: usize,
) -> CdrResult<Vec<u8>> {
    let mut os = Ostream::new(allocator, out_version);
    let insn = ops[idx];
    let extra = idx + adr_extra(insn);
    match op_type(insn) {
        TYPE_1BY | TYPE_BLN => {
            is.align(1);
            os.put1(is.get1())?;
        }
        TYPE_2BY => os.put2::<B>(is.get2())?,
        TYPE_4BY => os.put4::<B>(is.get4())?,
        TYPE_8BY => os.put8::<B>(is.get8())?,
        TYPE_ENU => {
            let v = read_enum_value(is, op_wire_size(insn));
            match op_wire_size(insn) {
                1 => os.put1(v as u8)?,
                2 => os.put2::<B>(v as u16)?,
                _ => os.put4::<B>(v)?,
            }
        }
        TYPE_BMK => match op_wire_size(insn) {
            1 => os.put1(is.get1())?,
            2 => os.put2::<B>(is.get2())?,
            4 => os.put4::<B>(is.get4())?,
            _ => os.put8::<B>(is.get8())?,
        },
        TYPE_STR | TYPE_BST => {
            let n = is.get4();
            os.put4::<B>(n)?;
            os.put_bytes(is.get_bytes(n))?;
        }
        TYPE_WSTR => {
            let bytes = is.get4();
            os.put4::<B>(bytes)?;
            for _ in 0..bytes / 2 {
                os.put2::<B>(is.get2())?;
            }
        }
        TYPE_ARR => {
            let count = ops[extra];
            let subtype = op_subtype(insn);
            let in_dheader = elem_needs_dheader(subtype, is.version());
            let out_dheader =
                kind == KeySerKind::Sample && elem_needs_dheader(subtype, out_version);
            let in_end = if in_dheader {
                let body = is.get4();
                Some(is.index() + body)
            } else {
                None
            };
            let patch_pos = if out_dheader {
                let pos = os.index();
                os.put4::<B>(0)?;
                Some(pos)
            } else {
                None
            };
            transcode_elems::<B>(is, &mut os, ops, idx, extra + 1, subtype, count)?;
            if let Some(pos) = patch_pos {
                os.patch4::<B>(pos, os.index() - pos - 4);
            }
            if let Some(end) = in_end {
                is.seek(end);
            }
        }
        _ => {
            return Err(CdrError::Contract {
                reason: "key leaf is not a scalar, string or array".into(),
            })
        }
    }
    Ok(os.as_slice().to_vec())
}

fn transcode_elems<B: ByteOrder>(
    is: &mut Istream<'_>,
    os: &mut Ostream<'_>,
    ops: &[u32],
    idx: usize,
    extra: usize,
    subtype: u32,
    count: u32,
) -> CdrResult<()> {
    let insn = ops[idx];
    match subtype {
        TYPE_1BY | TYPE_BLN => os.put_bytes(is.get_bytes(count)),
        TYPE_2BY => {
            for _ in 0..count {
                os.put2::<B>(is.get2())?;
            }
            Ok(())
        }
        TYPE_4BY => {
            for _ in 0..count {
                os.put4::<B>(is.get4())?;
            }
            Ok(())
        }
        TYPE_8BY => {
            for _ in 0..count {
                os.put8::<B>(is.get8())?;
            }
            Ok(())
        }
        TYPE_ENU => {
            for _ in 0..count {
                let v = read_enum_value(is, op_wire_size(insn));
                match op_wire_size(insn) {
                    1 => os.put1(v as u8)?,
                    2 => os.put2::<B>(v as u16)?,
                    _ => os.put4::<B>(v)?,
                }
            }
            Ok(())
        }
        TYPE_BMK => {
            for _ in 0..count {
                match op_wire_size(insn) {
                    1 => os.put1(is.get1())?,
                    2 => os.put2::<B>(is.get2())?,
                    4 => os.put4::<B>(is.get4())?,
                    _ => os.put8::<B>(is.get8())?,
                }
            }
            Ok(())
        }
        TYPE_STR | TYPE_BST => {
            for _ in 0..count {
                let n = is.get4();
                os.put4::<B>(n)?;
                os.put_bytes(is.get_bytes(n))?;
            }
            Ok(())
        }
        _ => Err(CdrError::Contract {
            reason: "key array element is not scalar or string".into(),
        }),
    }
}

// The data walk: skip non-key content, capture key leaves.

fn walk_stream(
    ex: &mut Extractor<'_, '_>,
    allocator: &dyn crate::alloc::CdrAllocator,
    start: usize,
) -> CdrResult<()> {
    let ops = ex.ops;
    match opcode(ops[start]) {
        OP_DLC => {
            if ex.is.version() == XcdrVersion::Xcdr1 {
                walk_members(ex, allocator, start + 1, None)
            } else {
                let body = ex.is.get4();
                let end = ex.is.index() + body;
                walk_members(ex, allocator, start + 1, Some(end))?;
                ex.is.seek(end);
                Ok(())
            }
        }
        OP_PLC => walk_pl(ex, allocator, start + 1),
        _ => walk_members(ex, allocator, start, None),
    }
}

fn walk_members(
    ex: &mut Extractor<'_, '_>,
    allocator: &dyn crate::alloc::CdrAllocator,
    start: usize,
    end: Option<u32>,
) -> CdrResult<()> {
    let ops = ex.ops;
    let mut idx = start;
    loop {
        let insn = ops[idx];
        match opcode(insn) {
            OP_RTS => return Ok(()),
            OP_JSR => {
                walk_members(ex, allocator, jump_target(idx, short_jump(insn)), end)?;
                idx += 1;
            }
            OP_ADR => {
                if end.is_some_and(|e| ex.is.index() >= e) {
                    // appendable body ended early; remaining keys (if
                    // any) are absent, which emit_captured reports
                    return Ok(());
                }
                walk_adr(ex, allocator, idx)?;
                idx += insn_len(ops, idx);
            }
            _ => return Ok(()),
        }
    }
}

fn walk_adr(
    ex: &mut Extractor<'_, '_>,
    allocator: &dyn crate::alloc::CdrAllocator,
    idx: usize,
) -> CdrResult<()> {
    let ops = ex.ops;
    let insn = ops[idx];

    if insn & FLAG_OPT != 0 {
        // keys are never optional; handle presence framing and skip or
        // descend accordingly
        match ex.is.version() {
            XcdrVersion::Xcdr2 => {
                let present = ex.is.get1() != 0;
                if !present {
                    return Ok(());
                }
            }
            XcdrVersion::Xcdr1 => {
                ex.is.align(4);
                let (_, len) = read_xcdr1_param_header(ex.is);
                if len == 0 {
                    return Ok(());
                }
                let start = ex.is.index();
                walk_opt_value(ex, allocator, idx)?;
                ex.is.seek(start + len);
                return Ok(());
            }
        }
        return walk_opt_value(ex, allocator, idx);
    }

    if let Some(key) = ex.key_at(idx as u32) {
        let ord = key.ord as usize;
        let bytes = transcode_leaf::<crate::stream::NativeBo>(
            ex.is,
            allocator,
            ex.out_version,
            ex.kind,
            ops,
            idx,
        )?;
        ex.captured[ord] = Some(bytes);
        return Ok(());
    }

    match op_type(insn) {
        TYPE_STU | TYPE_EXT if ex.descends_to_key(idx as u32) => {
            let extra = idx + adr_extra(insn);
            let sub_word = if op_type(insn) == TYPE_STU {
                ops[extra]
            } else {
                ops[extra + 1]
            };
            ex.stack.push(idx as u32);
            let r = walk_stream(ex, allocator, jump_target(idx, sub_word as i32));
            ex.stack.pop();
            r
        }
        _ => skip_adr_value(ex.is, ops, idx),
    }
}

fn walk_opt_value(
    ex: &mut Extractor<'_, '_>,
    allocator: &dyn crate::alloc::CdrAllocator,
    idx: usize,
) -> CdrResult<()> {
    let ops = ex.ops;
    let extra = idx + adr_extra(ops[idx]);
    let sub = jump_target(idx, ops[extra + 1] as i32);
    if ex.descends_to_key(idx as u32) {
        ex.stack.push(idx as u32);
        let r = walk_stream(ex, allocator, sub);
        ex.stack.pop();
        r
    } else {
        skip_stream(ex.is, ops, sub)
    }
}

fn walk_pl(
    ex: &mut Extractor<'_, '_>,
    allocator: &dyn crate::alloc::CdrAllocator,
    first_plm: usize,
) -> CdrResult<()> {
    let ops = ex.ops;
    match ex.is.version() {
        XcdrVersion::Xcdr2 => {
            let body = ex.is.get4();
            let end = ex.is.index() + body;
            while ex.is.index() < end {
                ex.is.align(4);
                if ex.is.index() >= end {
                    break;
                }
                let em = ex.is.get4();
                let lc = (em & EMHEADER_LC_MASK) >> EMHEADER_LC_SHIFT;
                let id = em & EMHEADER_ID_MASK;
                let (body_start, size) = match lc {
                    0..=3 => (ex.is.index(), 1u32 << lc),
                    4 => {
                        let n = ex.is.get4();
                        (ex.is.index(), n)
                    }
                    _ => {
                        let n = ex.is.get4();
                        let mult = [1u32, 4, 8][(lc - 5) as usize];
                        (ex.is.index() - 4, 4 + n * mult)
                    }
                };
                if let Some(target) = super::read::find_plm(ops, first_plm, id) {
                    ex.is.seek(body_start);
                    walk_mutable_member(ex, allocator, target)?;
                }
                ex.is.seek(body_start + size);
            }
            ex.is.seek(end);
            Ok(())
        }
        XcdrVersion::Xcdr1 => loop {
            ex.is.align(4);
            let (id, len) = read_xcdr1_param_header(ex.is);
            if id == u32::MAX {
                return Ok(());
            }
            let body_start = ex.is.index();
            if len > 0 {
                if let Some(target) = super::read::find_plm(ops, first_plm, id) {
                    walk_mutable_member(ex, allocator, target)?;
                }
            }
            ex.is.seek(body_start + len);
        },
    }
}

fn walk_mutable_member(
    ex: &mut Extractor<'_, '_>,
    allocator: &dyn crate::alloc::CdrAllocator,
    idx: usize,
) -> CdrResult<()> {
    let ops = ex.ops;
    let insn = ops[idx];
    if insn & FLAG_OPT != 0 {
        return walk_opt_value(ex, allocator, idx);
    }
    if let Some(key) = ex.key_at(idx as u32) {
        let ord = key.ord as usize;
        let bytes = transcode_leaf::<crate::stream::NativeBo>(
            ex.is,
            allocator,
            ex.out_version,
            ex.kind,
            ops,
            idx,
        )?;
        ex.captured[ord] = Some(bytes);
        return Ok(());
    }
    match op_type(insn) {
        TYPE_STU | TYPE_EXT if ex.descends_to_key(idx as u32) => {
            let extra = idx + adr_extra(insn);
            let sub_word = if op_type(insn) == TYPE_STU {
                ops[extra]
            } else {
                ops[extra + 1]
            };
            ex.stack.push(idx as u32);
            let r = walk_stream(ex, allocator, jump_target(idx, sub_word as i32));
            ex.stack.pop();
            r
        }
        _ => skip_adr_value(ex.is, ops, idx),
    }
}

// Value skipping over a normalized input stream.

pub(crate) fn skip_stream(is: &mut Istream<'_>, ops: &[u32], start: usize) -> CdrResult<()> {
    match opcode(ops[start]) {
        OP_DLC => {
            if is.version() == XcdrVersion::Xcdr1 {
                skip_members(is, ops, start + 1, None)
            } else {
                let body = is.get4();
                is.seek(is.index() + body);
                Ok(())
            }
        }
        OP_PLC => skip_pl(is, ops, start + 1),
        _ => skip_members(is, ops, start, None),
    }
}

fn skip_members(
    is: &mut Istream<'_>,
    ops: &[u32],
    start: usize,
    end: Option<u32>,
) -> CdrResult<()> {
    let mut idx = start;
    loop {
        let insn = ops[idx];
        match opcode(insn) {
            OP_RTS => return Ok(()),
            OP_JSR => {
                skip_members(is, ops, jump_target(idx, short_jump(insn)), end)?;
                idx += 1;
            }
            OP_ADR => {
                if end.is_some_and(|e| is.index() >= e) {
                    return Ok(());
                }
                skip_adr(is, ops, idx)?;
                idx += insn_len(ops, idx);
            }
            _ => return Ok(()),
        }
    }
}

fn skip_adr(is: &mut Istream<'_>, ops: &[u32], idx: usize) -> CdrResult<()> {
    let insn = ops[idx];
    if insn & FLAG_OPT != 0 {
        match is.version() {
            XcdrVersion::Xcdr2 => {
                if is.get1() == 0 {
                    return Ok(());
                }
                let extra = idx + adr_extra(insn);
                return skip_stream(is, ops, jump_target(idx, ops[extra + 1] as i32));
            }
            XcdrVersion::Xcdr1 => {
                is.align(4);
                let (_, len) = read_xcdr1_param_header(is);
                is.seek(is.index() + len);
                return Ok(());
            }
        }
    }
    skip_adr_value(is, ops, idx)
}

pub(crate) fn skip_adr_value(is: &mut Istream<'_>, ops: &[u32], idx: usize) -> CdrResult<()> {
    let insn = ops[idx];
    let extra = idx + adr_extra(insn);
    match op_type(insn) {
        TYPE_1BY | TYPE_BLN => {
            is.skip(1);
            Ok(())
        }
        TYPE_2BY => {
            is.align(2);
            is.skip(2);
            Ok(())
        }
        TYPE_4BY => {
            is.align(4);
            is.skip(4);
            Ok(())
        }
        TYPE_8BY => {
            is.align(8);
            is.skip(8);
            Ok(())
        }
        TYPE_ENU | TYPE_BMK => {
            let n = op_wire_size(insn);
            is.align(n);
            is.skip(n);
            Ok(())
        }
        TYPE_STR | TYPE_BST => {
            let n = is.get4();
            is.skip(n);
            Ok(())
        }
        TYPE_WSTR => {
            let n = is.get4();
            is.skip(n);
            Ok(())
        }
        TYPE_SEQ | TYPE_BSQ => {
            let mut elem_extra = extra;
            if op_type(insn) == TYPE_BSQ {
                elem_extra += 1;
            }
            let subtype = op_subtype(insn);
            if elem_needs_dheader(subtype, is.version()) {
                let body = is.get4();
                is.seek(is.index() + body);
                return Ok(());
            }
            let n = is.get4();
            skip_elems(is, ops, idx, elem_extra, subtype, n)
        }
        TYPE_ARR => {
            let subtype = op_subtype(insn);
            if elem_needs_dheader(subtype, is.version()) {
                let body = is.get4();
                is.seek(is.index() + body);
                return Ok(());
            }
            skip_elems(is, ops, idx, extra + 1, subtype, ops[extra])
        }
        TYPE_UNI => {
            let subtype = op_subtype(insn);
            let disc = match subtype {
                TYPE_BLN | TYPE_1BY => is.get1() as u32,
                TYPE_2BY => is.get2() as u32,
                TYPE_ENU => read_enum_value(is, op_wire_size(insn)),
                _ => is.get4(),
            };
            let ncases = ops[extra] as usize;
            let table = jump_target(idx, ops[extra + 1] as i32);
            if let Some(jeq) = find_case(ops, table, ncases, disc, subtype) {
                skip_case(is, ops, jeq)?;
            }
            Ok(())
        }
        TYPE_STU => skip_stream(is, ops, jump_target(idx, ops[extra] as i32)),
        TYPE_EXT => skip_stream(is, ops, jump_target(idx, ops[extra + 1] as i32)),
        _ => Err(CdrError::Contract {
            reason: "unknown op type in skip".into(),
        }),
    }
}

fn skip_elems(
    is: &mut Istream<'_>,
    ops: &[u32],
    idx: usize,
    extra: usize,
    subtype: u32,
    count: u32,
) -> CdrResult<()> {
    let insn = ops[idx];
    match subtype {
        TYPE_1BY | TYPE_BLN => {
            is.skip(count);
            Ok(())
        }
        TYPE_2BY => {
            if count > 0 {
                is.align(2);
                is.skip(2 * count);
            }
            Ok(())
        }
        TYPE_4BY => {
            if count > 0 {
                is.align(4);
                is.skip(4 * count);
            }
            Ok(())
        }
        TYPE_8BY => {
            if count > 0 {
                is.align(8);
                is.skip(8 * count);
            }
            Ok(())
        }
        TYPE_ENU | TYPE_BMK => {
            let n = op_wire_size(insn);
            if count > 0 {
                is.align(n);
                is.skip(n * count);
            }
            Ok(())
        }
        TYPE_STR | TYPE_BST | TYPE_WSTR => {
            for _ in 0..count {
                let n = is.get4();
                is.skip(n);
            }
            Ok(())
        }
        TYPE_STU | TYPE_EXT => {
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for _ in 0..count {
                skip_stream(is, ops, sub)?;
            }
            Ok(())
        }
        _ => Err(CdrError::Contract {
            reason: "unknown element type in skip".into(),
        }),
    }
}

fn skip_case(is: &mut Istream<'_>, ops: &[u32], jeq: usize) -> CdrResult<()> {
    let case_insn = ops[jeq];
    match op_type(case_insn) {
        TYPE_1BY | TYPE_BLN => {
            is.skip(1);
            Ok(())
        }
        TYPE_2BY => {
            is.align(2);
            is.skip(2);
            Ok(())
        }
        TYPE_4BY => {
            is.align(4);
            is.skip(4);
            Ok(())
        }
        TYPE_8BY => {
            is.align(8);
            is.skip(8);
            Ok(())
        }
        TYPE_ENU => {
            let n = op_wire_size(case_insn);
            is.align(n);
            is.skip(n);
            Ok(())
        }
        TYPE_STR | TYPE_BST => {
            let n = is.get4();
            is.skip(n);
            Ok(())
        }
        _ => skip_stream(is, ops, jump_target(jeq, ops[jeq + 3] as i32)),
    }
}

fn skip_pl(is: &mut Istream<'_>, ops: &[u32], _first_plm: usize) -> CdrResult<()> {
    let _ = ops;
    match is.version() {
        XcdrVersion::Xcdr2 => {
            let body = is.get4();
            is.seek(is.index() + body);
            Ok(())
        }
        XcdrVersion::Xcdr1 => loop {
            is.align(4);
            let (id, len) = read_xcdr1_param_header(is);
            if id == u32::MAX {
                return Ok(());
            }
            is.seek(is.index() + len);
        },
    }
}
