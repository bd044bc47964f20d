// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sample deserialization from a normalized, native-byte-order payload.
//!
//! Reads are infallible by construction: normalize already validated
//! every length, header and value this path consumes. Members the wire
//! does not carry (appendable short bodies, absent mutable members) are
//! default-initialized; surplus trailing bytes are skipped.

use super::init::{free_adr, init_adr, init_case, init_elems, store_disc};
use super::write::find_case;
use super::*;
use crate::ops::*;
use crate::sample::{field_mut, load, raw_seq_alloc, store};
use crate::stream::Istream;

pub(crate) unsafe fn read_stream(is: &mut Istream<'_>, ops: &[u32], start: usize, base: *mut u8) {
    match opcode(ops[start]) {
        OP_DLC => {
            if is.version() == XcdrVersion::Xcdr1 {
                read_members(is, ops, start + 1, base, None);
            } else {
                let body = is.get4();
                let end = is.index() + body;
                read_members(is, ops, start + 1, base, Some(end));
                is.seek(end); // surplus from a newer writer
            }
        }
        OP_PLC => read_param_list(is, ops, start + 1, base),
        _ => read_members(is, ops, start, base, None),
    }
}

/// Reads the member list; with `end` set (appendable body), members at or
/// past the boundary are default-initialized instead of read.
unsafe fn read_members(
    is: &mut Istream<'_>,
    ops: &[u32],
    start: usize,
    base: *mut u8,
    end: Option<u32>,
) {
    let mut idx = start;
    loop {
        let insn = ops[idx];
        match opcode(insn) {
            OP_RTS => return,
            OP_JSR => {
                read_members(is, ops, jump_target(idx, short_jump(insn)), base, end);
                idx += 1;
            }
            OP_ADR => {
                if end.is_some_and(|e| is.index() >= e) {
                    free_adr(ops, idx, base);
                    init_adr(ops, idx, base);
                } else {
                    read_adr(is, ops, idx, base, false);
                }
                idx += insn_len(ops, idx);
            }
            _ => return,
        }
    }
}

pub(crate) unsafe fn read_adr(
    is: &mut Istream<'_>,
    ops: &[u32],
    idx: usize,
    base: *mut u8,
    plain_value: bool,
) {
    let insn = ops[idx];
    let off = ops[idx + 1];

    if insn & FLAG_OPT != 0 && !plain_value {
        debug_assert_eq!(op_type(insn), TYPE_EXT);
        match is.version() {
            XcdrVersion::Xcdr2 => {
                let present = is.get1() != 0;
                if !present {
                    free_adr(ops, idx, base); // resets to None
                    return;
                }
                read_ext_value(is, ops, idx, base, off);
            }
            XcdrVersion::Xcdr1 => {
                is.align(4);
                let (_, len) = read_xcdr1_param_header(is);
                if len == 0 {
                    free_adr(ops, idx, base);
                    return;
                }
                let value_start = is.index();
                read_ext_value(is, ops, idx, base, off);
                is.seek(value_start + len); // length includes padding
            }
        }
        return;
    }

    read_adr_value(is, ops, idx, base);
}

/// Reads into the pointee of an external member, allocating it when the
/// slot is currently absent.
unsafe fn read_ext_value(is: &mut Istream<'_>, ops: &[u32], idx: usize, base: *mut u8, off: u32) {
    let extra = idx + adr_extra(ops[idx]);
    let sub = jump_target(idx, ops[extra + 1] as i32);
    let mut ptr: *mut u8 = load(base, off);
    if ptr.is_null() {
        let word = ops[extra];
        ptr = crate::sample::raw_box_alloc(unpack_size(word), unpack_align(word));
        super::init::init_stream(ops, sub, ptr);
        store(base, off, ptr);
    }
    read_stream(is, ops, sub, ptr);
}

pub(crate) unsafe fn read_adr_value(is: &mut Istream<'_>, ops: &[u32], idx: usize, base: *mut u8) {
    let insn = ops[idx];
    let off = ops[idx + 1];
    let extra = idx + adr_extra(insn);
    match op_type(insn) {
        TYPE_1BY | TYPE_BLN => store(base, off, is.get1()),
        TYPE_2BY => store(base, off, is.get2()),
        TYPE_4BY => store(base, off, is.get4()),
        TYPE_8BY => store(base, off, is.get8()),
        TYPE_ENU => store(base, off, read_enum_value(is, op_wire_size(insn))),
        TYPE_BMK => match op_wire_size(insn) {
            1 => store(base, off, is.get1()),
            2 => store(base, off, is.get2()),
            4 => store(base, off, is.get4()),
            _ => store(base, off, is.get8()),
        },
        TYPE_STR | TYPE_BST => {
            let s = read_string_value(is);
            let p = field_mut::<String>(base, off);
            std::ptr::drop_in_place(p);
            p.write(s);
        }
        TYPE_WSTR => {
            let s = read_wstring_value(is);
            let p = field_mut::<String>(base, off);
            std::ptr::drop_in_place(p);
            p.write(s);
        }
        TYPE_SEQ | TYPE_BSQ => read_seq(is, ops, idx, base.add(off as usize)),
        TYPE_ARR => read_arr(is, ops, idx, base.add(off as usize)),
        TYPE_UNI => read_union(is, ops, idx, base),
        TYPE_STU => {
            let sub = jump_target(idx, ops[extra] as i32);
            read_stream(is, ops, sub, base.add(off as usize));
        }
        TYPE_EXT => {
            read_ext_value(is, ops, idx, base, off);
        }
        _ => debug_assert!(false, "unknown ADR type"),
    }
}

pub(crate) fn read_enum_value(is: &mut Istream<'_>, wire_size: u32) -> u32 {
    match wire_size {
        1 => is.get1() as u32,
        2 => is.get2() as u32,
        _ => is.get4(),
    }
}

fn read_string_value(is: &mut Istream<'_>) -> String {
    let n = is.get4();
    debug_assert!(n >= 1, "normalized strings include the NUL");
    let bytes = is.get_bytes(n);
    // normalize validated UTF-8 and the trailing NUL
    unsafe { std::str::from_utf8_unchecked(&bytes[..bytes.len() - 1]) }.to_owned()
}

fn read_wstring_value(is: &mut Istream<'_>) -> String {
    let bytes = is.get4();
    let mut units = Vec::with_capacity((bytes / 2) as usize);
    for _ in 0..bytes / 2 {
        units.push(is.get2());
    }
    // normalize rejected unpaired surrogates, so this is lossless
    String::from_utf16_lossy(&units)
}

unsafe fn read_seq(is: &mut Istream<'_>, ops: &[u32], idx: usize, seq_addr: *mut u8) {
    let insn = ops[idx];
    let mut elem_extra = idx + adr_extra(insn);
    if op_type(insn) == TYPE_BSQ {
        elem_extra += 1;
    }
    let subtype = op_subtype(insn);
    let elems_end = if elem_needs_dheader(subtype, is.version()) {
        let body = is.get4();
        Some(is.index() + body)
    } else {
        None
    };
    let n = is.get4();

    super::init::free_seq(ops, idx, elem_extra, seq_addr);
    let (elem_size, elem_align) = super::init::elem_layout(ops, insn, elem_extra);
    let buffer = raw_seq_alloc(seq_addr, 0, n, elem_size, elem_align);
    if n > 0 {
        init_elems(ops, idx, elem_extra, subtype, buffer, n);
        read_elems(is, ops, idx, elem_extra, subtype, buffer, n);
    }
    if let Some(end) = elems_end {
        is.seek(end);
    }
}

unsafe fn read_arr(is: &mut Istream<'_>, ops: &[u32], idx: usize, elems: *mut u8) {
    let insn = ops[idx];
    let extra = idx + adr_extra(insn);
    let count = ops[extra];
    let subtype = op_subtype(insn);
    let elems_end = if elem_needs_dheader(subtype, is.version()) {
        let body = is.get4();
        Some(is.index() + body)
    } else {
        None
    };
    read_elems(is, ops, idx, extra + 1, subtype, elems, count);
    if let Some(end) = elems_end {
        is.seek(end);
    }
}

unsafe fn read_elems(
    is: &mut Istream<'_>,
    ops: &[u32],
    idx: usize,
    extra: usize,
    subtype: u32,
    elems: *mut u8,
    count: u32,
) {
    if count == 0 {
        return;
    }
    let insn = ops[idx];
    match subtype {
        TYPE_1BY | TYPE_BLN => {
            let src = is.get_bytes(count);
            std::ptr::copy_nonoverlapping(src.as_ptr(), elems, count as usize);
        }
        TYPE_2BY => {
            for i in 0..count {
                store(elems, i * 2, is.get2());
            }
        }
        TYPE_4BY => {
            for i in 0..count {
                store(elems, i * 4, is.get4());
            }
        }
        TYPE_8BY => {
            for i in 0..count {
                store(elems, i * 8, is.get8());
            }
        }
        TYPE_ENU => {
            for i in 0..count {
                store(elems, i * 4, read_enum_value(is, op_wire_size(insn)));
            }
        }
        TYPE_BMK => {
            let w = op_wire_size(insn);
            for i in 0..count {
                match w {
                    1 => store(elems, i * w, is.get1()),
                    2 => store(elems, i * w, is.get2()),
                    4 => store(elems, i * w, is.get4()),
                    _ => store(elems, i * w, is.get8()),
                }
            }
        }
        TYPE_STR | TYPE_BST | TYPE_WSTR => {
            let stride = std::mem::size_of::<String>() as u32;
            for i in 0..count {
                let s = if subtype == TYPE_WSTR {
                    read_wstring_value(is)
                } else {
                    read_string_value(is)
                };
                let p = field_mut::<String>(elems, i * stride);
                std::ptr::drop_in_place(p);
                p.write(s);
            }
        }
        TYPE_STU => {
            let stride = unpack_size(ops[extra]);
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for i in 0..count {
                read_stream(is, ops, sub, elems.add((i * stride) as usize));
            }
        }
        TYPE_EXT => {
            let word = ops[extra];
            let stride = std::mem::size_of::<*const u8>() as u32;
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for i in 0..count {
                let mut ptr: *mut u8 = load(elems, i * stride);
                if ptr.is_null() {
                    ptr = crate::sample::raw_box_alloc(unpack_size(word), unpack_align(word));
                    super::init::init_stream(ops, sub, ptr);
                    store(elems, i * stride, ptr);
                }
                read_stream(is, ops, sub, ptr);
            }
        }
        _ => debug_assert!(false, "unknown element type"),
    }
}

unsafe fn read_union(is: &mut Istream<'_>, ops: &[u32], idx: usize, base: *mut u8) {
    let insn = ops[idx];
    let off = ops[idx + 1];
    let extra = idx + adr_extra(insn);
    let subtype = op_subtype(insn);

    let disc = match subtype {
        TYPE_BLN | TYPE_1BY => is.get1() as u32,
        TYPE_2BY => is.get2() as u32,
        TYPE_ENU => read_enum_value(is, op_wire_size(insn)),
        _ => is.get4(),
    };

    // release the previously active case before switching
    let old_disc = super::write::load_disc(base, off, subtype);
    let ncases = ops[extra] as usize;
    let table = jump_target(idx, ops[extra + 1] as i32);
    if let Some(old_jeq) = find_case(ops, table, ncases, old_disc, subtype) {
        super::init::free_case(ops, old_jeq, base);
    }
    store_disc(base, off, subtype, disc);

    let Some(jeq) = find_case(ops, table, ncases, disc, subtype) else {
        // normalize guarantees a case; tolerate by leaving storage zeroed
        return;
    };
    init_case(ops, jeq, base);
    read_case(is, ops, jeq, base);
}

pub(crate) unsafe fn read_case(is: &mut Istream<'_>, ops: &[u32], jeq: usize, base: *mut u8) {
    let case_insn = ops[jeq];
    let case_off = ops[jeq + 2];
    match op_type(case_insn) {
        TYPE_1BY | TYPE_BLN => store(base, case_off, is.get1()),
        TYPE_2BY => store(base, case_off, is.get2()),
        TYPE_4BY => store(base, case_off, is.get4()),
        TYPE_8BY => store(base, case_off, is.get8()),
        TYPE_ENU => store(base, case_off, read_enum_value(is, op_wire_size(case_insn))),
        TYPE_STR | TYPE_BST => {
            let s = read_string_value(is);
            let p = field_mut::<String>(base, case_off);
            std::ptr::drop_in_place(p);
            p.write(s);
        }
        _ => {
            let sub = jump_target(jeq, ops[jeq + 3] as i32);
            read_stream(is, ops, sub, base.add(case_off as usize));
        }
    }
}

// Parameter lists (mutable aggregates).

/// Short or extended XCDR1 parameter header; cursor must be 4-aligned.
/// Returns `(member id, length)`; the sentinel maps to id `u32::MAX`.
pub(crate) fn read_xcdr1_param_header(is: &mut Istream<'_>) -> (u32, u32) {
    let pid = is.get2();
    let len = is.get2() as u32;
    if pid & XCDR1_PID_MASK == XCDR1_PID_SENTINEL {
        return (u32::MAX, 0);
    }
    if pid & XCDR1_PID_MASK == XCDR1_PID_EXTENDED {
        let mid = is.get4();
        let len = is.get4();
        return (mid & XCDR1_EXTENDED_MID_MASK, len);
    }
    ((pid & XCDR1_PID_MASK) as u32, len)
}

unsafe fn read_param_list(is: &mut Istream<'_>, ops: &[u32], first_plm: usize, base: *mut u8) {
    // default every member first; present members then overwrite
    let mut idx = first_plm;
    while opcode(ops[idx]) == OP_PLM {
        let target = jump_target(idx, short_jump(ops[idx]));
        free_adr(ops, target, base);
        init_adr(ops, target, base);
        idx += 2;
    }

    match is.version() {
        XcdrVersion::Xcdr2 => {
            let body = is.get4();
            let end = is.index() + body;
            while is.index() < end {
                is.align(4);
                if is.index() >= end {
                    break;
                }
                let em = is.get4();
                let lc = (em & EMHEADER_LC_MASK) >> EMHEADER_LC_SHIFT;
                let id = em & EMHEADER_ID_MASK;
                let (body_start, size) = match lc {
                    0..=3 => (is.index(), 1u32 << lc),
                    4 => {
                        let n = is.get4();
                        (is.index(), n)
                    }
                    _ => {
                        let n = is.get4();
                        // the NEXTINT word doubles as the member's first
                        // word
                        let mult = [1u32, 4, 8][(lc - 5) as usize];
                        (is.index() - 4, 4 + n * mult)
                    }
                };
                if let Some(target) = find_plm(ops, first_plm, id) {
                    is.seek(body_start);
                    read_adr(is, ops, target, base, true);
                }
                is.seek(body_start + size);
            }
            is.seek(end);
        }
        XcdrVersion::Xcdr1 => loop {
            is.align(4);
            let (id, len) = read_xcdr1_param_header(is);
            if id == u32::MAX {
                break;
            }
            let body_start = is.index();
            // zero-length parameters mark absent optionals; the member
            // keeps its default
            if len > 0 {
                if let Some(target) = find_plm(ops, first_plm, id) {
                    read_adr(is, ops, target, base, true);
                }
            }
            is.seek(body_start + len);
        },
    }
}

/// Finds the `PLM` member with the given id; returns its `ADR` index.
pub(crate) fn find_plm(ops: &[u32], first_plm: usize, id: u32) -> Option<usize> {
    let mut idx = first_plm;
    while opcode(ops[idx]) == OP_PLM {
        if ops[idx + 1] == id {
            return Some(jump_target(idx, short_jump(ops[idx])));
        }
        idx += 2;
    }
    None
}
