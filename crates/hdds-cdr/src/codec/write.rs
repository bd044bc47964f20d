// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sample serialization: interprets ops against an output stream.
//!
//! Alignment is computed relative to the start of the encapsulation (the
//! stream cursor). Appendable aggregates get a backpatched DHEADER,
//! mutable aggregates get per-member EMHEADERs (XCDR2) or parameter
//! headers closed by a sentinel (XCDR1).

use super::*;
use crate::error::CdrError;
use crate::ops::*;
use crate::sample::{field, load, RawSeq};
use crate::stream::ByteOrder;

fn encoding_err(what: &str) -> CdrError {
    CdrError::Encoding {
        reason: what.to_string(),
    }
}

/// Writes one complete (sub-)stream: DLC/PLC framing plus the member list.
pub(crate) unsafe fn write_stream<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    start: usize,
    base: *const u8,
) -> CdrResult<()> {
    match opcode(ops[start]) {
        OP_DLC => {
            if os.version() == XcdrVersion::Xcdr1 {
                // XCDR1 has no delimited form; appendable serializes plain
                return write_members::<B>(os, ops, start + 1, base);
            }
            os.align(4)?;
            let dheader_pos = os.index();
            os.put4::<B>(0)?;
            write_members::<B>(os, ops, start + 1, base)?;
            os.patch4::<B>(dheader_pos, os.index() - dheader_pos - 4);
            Ok(())
        }
        OP_PLC => write_param_list::<B>(os, ops, start + 1, base),
        _ => write_members::<B>(os, ops, start, base),
    }
}

unsafe fn write_members<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    start: usize,
    base: *const u8,
) -> CdrResult<()> {
    let mut idx = start;
    loop {
        let insn = ops[idx];
        match opcode(insn) {
            OP_RTS => return Ok(()),
            OP_JSR => {
                write_members::<B>(os, ops, jump_target(idx, short_jump(insn)), base)?;
                idx += 1;
            }
            OP_ADR => {
                write_adr::<B>(os, ops, idx, base, false)?;
                idx += insn_len(ops, idx);
            }
            _ => {
                debug_assert!(false, "unexpected opcode in member list");
                return Ok(());
            }
        }
    }
}

/// Writes one member. `plain_value` suppresses the optional-member
/// presence wrapper (the caller already emitted a parameter header).
pub(crate) unsafe fn write_adr<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    idx: usize,
    base: *const u8,
    plain_value: bool,
) -> CdrResult<()> {
    let insn = ops[idx];
    let off = ops[idx + 1];

    if insn & FLAG_OPT != 0 && !plain_value {
        debug_assert_eq!(op_type(insn), TYPE_EXT, "optional members are external");
        let ptr: *const u8 = load(base, off);
        match os.version() {
            XcdrVersion::Xcdr2 => {
                os.put1(u8::from(!ptr.is_null()))?;
                if ptr.is_null() {
                    return Ok(());
                }
                return write_ext_value::<B>(os, ops, idx, ptr);
            }
            XcdrVersion::Xcdr1 => {
                let member_id = ops[idx + 2];
                let patch = write_xcdr1_param_header::<B>(os, member_id, insn & FLAG_MU != 0)?;
                if ptr.is_null() {
                    return Ok(()); // length stays 0
                }
                let value_start = os.index();
                write_ext_value::<B>(os, ops, idx, ptr)?;
                os.align(4)?;
                return finish_xcdr1_param::<B>(os, patch, os.index() - value_start);
            }
        }
    }

    write_adr_value::<B>(os, ops, idx, base)
}

unsafe fn write_ext_value<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    idx: usize,
    pointee: *const u8,
) -> CdrResult<()> {
    let extra = idx + adr_extra(ops[idx]);
    let sub = jump_target(idx, ops[extra + 1] as i32);
    write_stream::<B>(os, ops, sub, pointee)
}

pub(crate) unsafe fn write_adr_value<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    idx: usize,
    base: *const u8,
) -> CdrResult<()> {
    let insn = ops[idx];
    let off = ops[idx + 1];
    let extra = idx + adr_extra(insn);
    match op_type(insn) {
        TYPE_1BY => os.put1(load::<u8>(base, off)),
        TYPE_2BY => os.put2::<B>(load::<u16>(base, off)),
        TYPE_4BY => os.put4::<B>(load::<u32>(base, off)),
        TYPE_8BY => os.put8::<B>(load::<u64>(base, off)),
        TYPE_BLN => os.put1(u8::from(load::<u8>(base, off) != 0)),
        TYPE_ENU => write_enum::<B>(os, load::<u32>(base, off), op_wire_size(insn), ops[extra]),
        TYPE_BMK => {
            let mask = ((ops[extra] as u64) << 32) | ops[extra + 1] as u64;
            let v = load_bitmask(base, off, op_wire_size(insn));
            write_bitmask::<B>(os, v, op_wire_size(insn), mask)
        }
        TYPE_STR => write_string::<B>(os, &*field::<String>(base, off), 0),
        TYPE_BST => write_string::<B>(os, &*field::<String>(base, off), ops[extra]),
        TYPE_WSTR => write_wstring::<B>(os, &*field::<String>(base, off)),
        TYPE_SEQ | TYPE_BSQ => write_seq::<B>(os, ops, idx, base.add(off as usize)),
        TYPE_ARR => write_arr::<B>(os, ops, idx, base.add(off as usize)),
        TYPE_UNI => write_union::<B>(os, ops, idx, base),
        TYPE_STU => {
            let sub = jump_target(idx, ops[extra] as i32);
            write_stream::<B>(os, ops, sub, base.add(off as usize))
        }
        TYPE_EXT => {
            let ptr: *const u8 = load(base, off);
            debug_assert!(!ptr.is_null(), "external member is a non-null Box");
            write_ext_value::<B>(os, ops, idx, ptr)
        }
        _ => {
            debug_assert!(false, "unknown ADR type");
            Ok(())
        }
    }
}

fn write_enum<B: ByteOrder>(
    os: &mut Ostream<'_>,
    v: u32,
    wire_size: u32,
    max: u32,
) -> CdrResult<()> {
    if v > max {
        return Err(encoding_err("enum value out of range"));
    }
    match wire_size {
        1 => os.put1(v as u8),
        2 => os.put2::<B>(v as u16),
        _ => os.put4::<B>(v),
    }
}

unsafe fn load_bitmask(base: *const u8, off: u32, wire_size: u32) -> u64 {
    match wire_size {
        1 => load::<u8>(base, off) as u64,
        2 => load::<u16>(base, off) as u64,
        4 => load::<u32>(base, off) as u64,
        _ => load::<u64>(base, off),
    }
}

fn write_bitmask<B: ByteOrder>(
    os: &mut Ostream<'_>,
    v: u64,
    wire_size: u32,
    mask: u64,
) -> CdrResult<()> {
    if v & !mask != 0 {
        return Err(encoding_err("bitmask value has undefined bits set"));
    }
    match wire_size {
        1 => os.put1(v as u8),
        2 => os.put2::<B>(v as u16),
        4 => os.put4::<B>(v as u32),
        _ => os.put8::<B>(v),
    }
}

/// Emits a string as 32-bit length (including NUL), bytes, NUL. A
/// non-zero `bound` is the maximum length including the NUL.
fn write_string<B: ByteOrder>(os: &mut Ostream<'_>, s: &str, bound: u32) -> CdrResult<()> {
    let n = s.len() as u32 + 1;
    if bound != 0 && n > bound {
        return Err(encoding_err("bounded string exceeds its bound"));
    }
    os.put4::<B>(n)?;
    os.put_bytes(s.as_bytes())?;
    os.put1(0)
}

/// Emits a wide string as 32-bit byte length, UTF-16 code units, no NUL.
fn write_wstring<B: ByteOrder>(os: &mut Ostream<'_>, s: &str) -> CdrResult<()> {
    let units = s.encode_utf16().count() as u32;
    os.put4::<B>(units * 2)?;
    for unit in s.encode_utf16() {
        os.put2::<B>(unit)?;
    }
    Ok(())
}

unsafe fn write_seq<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    idx: usize,
    seq_addr: *const u8,
) -> CdrResult<()> {
    let insn = ops[idx];
    let raw = load::<RawSeq>(seq_addr, 0);
    let mut extra = idx + adr_extra(insn);
    if op_type(insn) == TYPE_BSQ {
        let bound = ops[extra];
        if raw.length > bound {
            return Err(encoding_err("bounded sequence exceeds its bound"));
        }
        extra += 1;
    }
    let subtype = op_subtype(insn);
    let dheader_pos = if elem_needs_dheader(subtype, os.version()) {
        os.align(4)?;
        let pos = os.index();
        os.put4::<B>(0)?;
        Some(pos)
    } else {
        None
    };
    os.put4::<B>(raw.length)?;
    write_elems::<B>(os, ops, idx, extra, subtype, raw.buffer, raw.length)?;
    if let Some(pos) = dheader_pos {
        os.patch4::<B>(pos, os.index() - pos - 4);
    }
    Ok(())
}

unsafe fn write_arr<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    idx: usize,
    elems: *const u8,
) -> CdrResult<()> {
    let insn = ops[idx];
    let extra = idx + adr_extra(insn);
    let count = ops[extra];
    let subtype = op_subtype(insn);
    let dheader_pos = if elem_needs_dheader(subtype, os.version()) {
        os.align(4)?;
        let pos = os.index();
        os.put4::<B>(0)?;
        Some(pos)
    } else {
        None
    };
    write_elems::<B>(os, ops, idx, extra + 1, subtype, elems as *mut u8, count)?;
    if let Some(pos) = dheader_pos {
        os.patch4::<B>(pos, os.index() - pos - 4);
    }
    Ok(())
}

/// Writes `count` elements of `subtype` starting at `elems`; `extra` is
/// the ops index of the element's type-specific operands.
pub(crate) unsafe fn write_elems<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    idx: usize,
    extra: usize,
    subtype: u32,
    elems: *mut u8,
    count: u32,
) -> CdrResult<()> {
    if count == 0 {
        return Ok(());
    }
    let insn = ops[idx];
    match subtype {
        TYPE_1BY => os.put_bytes(std::slice::from_raw_parts(elems, count as usize)),
        TYPE_BLN => {
            for i in 0..count {
                os.put1(u8::from(load::<u8>(elems, i) != 0))?;
            }
            Ok(())
        }
        TYPE_2BY => {
            for i in 0..count {
                os.put2::<B>(load::<u16>(elems, i * 2))?;
            }
            Ok(())
        }
        TYPE_4BY => {
            for i in 0..count {
                os.put4::<B>(load::<u32>(elems, i * 4))?;
            }
            Ok(())
        }
        TYPE_8BY => {
            for i in 0..count {
                os.put8::<B>(load::<u64>(elems, i * 8))?;
            }
            Ok(())
        }
        TYPE_ENU => {
            let max = ops[extra];
            for i in 0..count {
                write_enum::<B>(os, load::<u32>(elems, i * 4), op_wire_size(insn), max)?;
            }
            Ok(())
        }
        TYPE_BMK => {
            let mask = ((ops[extra] as u64) << 32) | ops[extra + 1] as u64;
            let n = op_wire_size(insn);
            for i in 0..count {
                write_bitmask::<B>(os, load_bitmask(elems, i * n, n), n, mask)?;
            }
            Ok(())
        }
        TYPE_STR | TYPE_BST | TYPE_WSTR => {
            let stride = std::mem::size_of::<String>() as u32;
            let bound = if subtype == TYPE_BST { ops[extra] } else { 0 };
            for i in 0..count {
                let s = &*field::<String>(elems, i * stride);
                match subtype {
                    TYPE_WSTR => write_wstring::<B>(os, s)?,
                    _ => write_string::<B>(os, s, bound)?,
                }
            }
            Ok(())
        }
        TYPE_STU => {
            let stride = unpack_size(ops[extra]);
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for i in 0..count {
                write_stream::<B>(os, ops, sub, elems.add((i * stride) as usize))?;
            }
            Ok(())
        }
        TYPE_EXT => {
            let stride = std::mem::size_of::<*const u8>() as u32;
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for i in 0..count {
                let ptr: *const u8 = load(elems, i * stride);
                if ptr.is_null() {
                    return Err(encoding_err("null external element"));
                }
                write_stream::<B>(os, ops, sub, ptr)?;
            }
            Ok(())
        }
        _ => {
            debug_assert!(false, "unknown element type");
            Ok(())
        }
    }
}

unsafe fn write_union<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    idx: usize,
    base: *const u8,
) -> CdrResult<()> {
    let insn = ops[idx];
    let off = ops[idx + 1];
    let extra = idx + adr_extra(insn);
    let subtype = op_subtype(insn);
    let disc = load_disc(base, off, subtype);

    match subtype {
        TYPE_BLN => os.put1(u8::from(disc != 0))?,
        TYPE_1BY => os.put1(disc as u8)?,
        TYPE_2BY => os.put2::<B>(disc as u16)?,
        TYPE_ENU => write_enum::<B>(os, disc, op_wire_size(insn), ops[extra + 2])?,
        _ => os.put4::<B>(disc)?,
    }

    let ncases = ops[extra] as usize;
    let table = jump_target(idx, ops[extra + 1] as i32);
    let Some(jeq) = find_case(ops, table, ncases, disc, subtype) else {
        return Err(encoding_err("union discriminator selects no case"));
    };
    write_case::<B>(os, ops, jeq, base)
}

pub(crate) unsafe fn load_disc(base: *const u8, off: u32, subtype: u32) -> u32 {
    match disc_mem_size(subtype) {
        1 => load::<u8>(base, off) as u32,
        2 => load::<u16>(base, off) as u32,
        _ => load::<u32>(base, off),
    }
}

/// Finds the `JEQ` entry selected by `disc`: an exact match, or the
/// trailing default case.
pub(crate) fn find_case(
    ops: &[u32],
    table: usize,
    ncases: usize,
    disc: u32,
    disc_subtype: u32,
) -> Option<usize> {
    let disc = if disc_subtype == TYPE_BLN {
        u32::from(disc != 0)
    } else {
        disc
    };
    let mut default = None;
    for c in 0..ncases {
        let jeq = table + 4 * c;
        if ops[jeq] & FLAG_DEF != 0 {
            default = Some(jeq);
        } else if ops[jeq + 1] == disc {
            return Some(jeq);
        }
    }
    default
}

unsafe fn write_case<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    jeq: usize,
    base: *const u8,
) -> CdrResult<()> {
    let case_insn = ops[jeq];
    let case_off = ops[jeq + 2];
    match op_type(case_insn) {
        TYPE_1BY => os.put1(load::<u8>(base, case_off)),
        TYPE_2BY => os.put2::<B>(load::<u16>(base, case_off)),
        TYPE_4BY => os.put4::<B>(load::<u32>(base, case_off)),
        TYPE_8BY => os.put8::<B>(load::<u64>(base, case_off)),
        TYPE_BLN => os.put1(u8::from(load::<u8>(base, case_off) != 0)),
        TYPE_ENU => write_enum::<B>(
            os,
            load::<u32>(base, case_off),
            op_wire_size(case_insn),
            ops[jeq + 3],
        ),
        TYPE_STR => write_string::<B>(os, &*field::<String>(base, case_off), 0),
        TYPE_BST => write_string::<B>(os, &*field::<String>(base, case_off), ops[jeq + 3]),
        _ => {
            // non-primitive case: evaluate its sub-stream at the member
            // offset
            let sub = jump_target(jeq, ops[jeq + 3] as i32);
            write_stream::<B>(os, ops, sub, base.add(case_off as usize))
        }
    }
}

// Parameter lists (mutable aggregates).

unsafe fn write_param_list<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    first_plm: usize,
    base: *const u8,
) -> CdrResult<()> {
    if os.version() == XcdrVersion::Xcdr2 {
        os.align(4)?;
        let dheader_pos = os.index();
        os.put4::<B>(0)?;
        write_plm_list::<B>(os, ops, first_plm, base)?;
        os.patch4::<B>(dheader_pos, os.index() - dheader_pos - 4);
        Ok(())
    } else {
        write_plm_list::<B>(os, ops, first_plm, base)?;
        os.align(4)?;
        os.put2::<B>(XCDR1_PID_SENTINEL)?;
        os.put2::<B>(0)?;
        Ok(())
    }
}

unsafe fn write_plm_list<B: ByteOrder>(
    os: &mut Ostream<'_>,
    ops: &[u32],
    first_plm: usize,
    base: *const u8,
) -> CdrResult<()> {
    let mut idx = first_plm;
    while opcode(ops[idx]) == OP_PLM {
        let target = jump_target(idx, short_jump(ops[idx]));
        let member_id = ops[idx + 1];
        let must_understand = ops[idx] & PLM_FLAG_MU != 0;
        let member = ops[target];
        debug_assert_eq!(opcode(member), OP_ADR);

        let absent = member & FLAG_OPT != 0 && load::<*const u8>(base, ops[target + 1]).is_null();
        if os.version() == XcdrVersion::Xcdr2 {
            if !absent {
                os.align(4)?;
                let em_pos = os.index();
                os.put4::<B>(
                    if must_understand { EMHEADER_FLAG_MU } else { 0 }
                        | (LENGTH_CODE_NEXTINT << EMHEADER_LC_SHIFT)
                        | (member_id & EMHEADER_ID_MASK),
                )?;
                os.put4::<B>(0)?; // NEXTINT, patched below
                write_adr::<B>(os, ops, target, base, true)?;
                os.patch4::<B>(em_pos + 4, os.index() - em_pos - 8);
            }
        } else {
            let patch = write_xcdr1_param_header::<B>(os, member_id, must_understand)?;
            if !absent {
                let value_start = os.index();
                write_adr::<B>(os, ops, target, base, true)?;
                os.align(4)?;
                finish_xcdr1_param::<B>(os, patch, os.index() - value_start)?;
            }
        }
        idx += 2;
    }
    Ok(())
}

/// Position of the length field to backpatch, tagged short or extended.
enum ParamPatch {
    Short(u32),
    Extended(u32),
}

fn write_xcdr1_param_header<B: ByteOrder>(
    os: &mut Ostream<'_>,
    member_id: u32,
    must_understand: bool,
) -> CdrResult<ParamPatch> {
    os.align(4)?;
    if member_id <= XCDR1_PID_MAX_SHORT {
        let mut pid = member_id as u16 & XCDR1_PID_MASK;
        if must_understand {
            pid |= XCDR1_PID_FLAG_MU;
        }
        os.put2::<B>(pid)?;
        let pos = os.index();
        os.put2::<B>(0)?;
        Ok(ParamPatch::Short(pos))
    } else {
        // extended header: sentinel pid + 8-byte header extension
        os.put2::<B>(XCDR1_PID_EXTENDED | XCDR1_PID_FLAG_MU)?;
        os.put2::<B>(8)?;
        let mut mid = member_id & XCDR1_EXTENDED_MID_MASK;
        if must_understand {
            mid |= XCDR1_EXTENDED_FLAG_MU;
        }
        os.put4::<B>(mid)?;
        let pos = os.index();
        os.put4::<B>(0)?;
        Ok(ParamPatch::Extended(pos))
    }
}

fn finish_xcdr1_param<B: ByteOrder>(
    os: &mut Ostream<'_>,
    patch: ParamPatch,
    len: u32,
) -> CdrResult<()> {
    match patch {
        ParamPatch::Short(pos) => {
            if len > u16::MAX as u32 {
                return Err(encoding_err("member too large for a short parameter header"));
            }
            os.patch2::<B>(pos, len as u16);
        }
        ParamPatch::Extended(pos) => os.patch4::<B>(pos, len),
    }
    Ok(())
}
