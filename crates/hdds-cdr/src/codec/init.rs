// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Default construction and destruction of samples through the ops walk.
//!
//! `init_stream` installs default values without reading what is there:
//! zeros for numerics, empty strings and sequences, absent optionals,
//! freshly allocated external members, the default union case. It is safe
//! over arbitrary memory, which is what lets the read path default-init
//! members that a shorter wire representation did not carry (after first
//! releasing their previous heap state with `free_stream`).
//!
//! `free_stream` drops all heap state and resets fields to the
//! empty/absent form, so a double free is harmless.

use super::*;
use crate::ops::*;
use crate::sample::{field_mut, load, raw_box_alloc, raw_box_release, raw_seq_release, store, RawSeq};

pub(crate) unsafe fn init_stream(ops: &[u32], start: usize, base: *mut u8) {
    let mut idx = match opcode(ops[start]) {
        OP_DLC | OP_PLC => start + 1,
        _ => start,
    };
    loop {
        let insn = ops[idx];
        match opcode(insn) {
            OP_RTS => return,
            OP_JSR => {
                init_stream(ops, jump_target(idx, short_jump(insn)), base);
                idx += 1;
            }
            OP_PLM => {
                init_adr(ops, jump_target(idx, short_jump(insn)), base);
                idx += 2;
            }
            OP_ADR => {
                init_adr(ops, idx, base);
                idx += insn_len(ops, idx);
            }
            _ => return,
        }
    }
}

/// Writes the default value of one member over whatever bytes are there.
pub(crate) unsafe fn init_adr(ops: &[u32], idx: usize, base: *mut u8) {
    let insn = ops[idx];
    let off = ops[idx + 1];
    let extra = idx + adr_extra(insn);
    match op_type(insn) {
        TYPE_1BY | TYPE_BLN => store(base, off, 0u8),
        TYPE_2BY => store(base, off, 0u16),
        TYPE_4BY | TYPE_ENU => store(base, off, 0u32),
        TYPE_8BY => store(base, off, 0u64),
        TYPE_BMK => match op_wire_size(insn) {
            1 => store(base, off, 0u8),
            2 => store(base, off, 0u16),
            4 => store(base, off, 0u32),
            _ => store(base, off, 0u64),
        },
        TYPE_STR | TYPE_BST | TYPE_WSTR => store(base, off, String::new()),
        TYPE_SEQ | TYPE_BSQ => store(
            base,
            off,
            RawSeq {
                length: 0,
                maximum: 0,
                buffer: std::ptr::null_mut(),
            },
        ),
        TYPE_ARR => init_elems(
            ops,
            idx,
            extra + 1,
            op_subtype(insn),
            base.add(off as usize),
            ops[extra],
        ),
        TYPE_UNI => init_union(ops, idx, base),
        TYPE_STU => {
            let sub = jump_target(idx, ops[extra] as i32);
            init_stream(ops, sub, base.add(off as usize));
        }
        TYPE_EXT => {
            if insn & FLAG_OPT != 0 {
                store::<*mut u8>(base, off, std::ptr::null_mut());
            } else {
                let word = ops[extra];
                let ptr = raw_box_alloc(unpack_size(word), unpack_align(word));
                init_stream(ops, jump_target(idx, ops[extra + 1] as i32), ptr);
                store(base, off, ptr);
            }
        }
        _ => {}
    }
}

pub(crate) unsafe fn init_elems(
    ops: &[u32],
    idx: usize,
    extra: usize,
    subtype: u32,
    elems: *mut u8,
    count: u32,
) {
    match subtype {
        TYPE_1BY | TYPE_BLN => std::ptr::write_bytes(elems, 0, count as usize),
        TYPE_2BY => std::ptr::write_bytes(elems, 0, 2 * count as usize),
        TYPE_4BY | TYPE_ENU => std::ptr::write_bytes(elems, 0, 4 * count as usize),
        TYPE_8BY => std::ptr::write_bytes(elems, 0, 8 * count as usize),
        TYPE_BMK => {
            std::ptr::write_bytes(elems, 0, (op_wire_size(ops[idx]) * count) as usize);
        }
        TYPE_STR | TYPE_BST | TYPE_WSTR => {
            let stride = std::mem::size_of::<String>() as u32;
            for i in 0..count {
                store(elems, i * stride, String::new());
            }
        }
        TYPE_STU => {
            let stride = unpack_size(ops[extra]);
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for i in 0..count {
                init_stream(ops, sub, elems.add((i * stride) as usize));
            }
        }
        TYPE_EXT => {
            let word = ops[extra];
            let stride = std::mem::size_of::<*const u8>() as u32;
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for i in 0..count {
                let ptr = raw_box_alloc(unpack_size(word), unpack_align(word));
                init_stream(ops, sub, ptr);
                store(elems, i * stride, ptr);
            }
        }
        _ => {}
    }
}

unsafe fn init_union(ops: &[u32], idx: usize, base: *mut u8) {
    let insn = ops[idx];
    let off = ops[idx + 1];
    let extra = idx + adr_extra(insn);
    let subtype = op_subtype(insn);
    let ncases = ops[extra] as usize;
    let table = jump_target(idx, ops[extra + 1] as i32);
    // prefer the case selected by discriminator 0, else the declared
    // default, else the first case
    let jeq = super::write::find_case(ops, table, ncases, 0, subtype).unwrap_or(table);
    let disc = if ops[jeq] & FLAG_DEF != 0 {
        0
    } else {
        ops[jeq + 1]
    };
    store_disc(base, off, subtype, disc);
    init_case(ops, jeq, base);
}

pub(crate) unsafe fn store_disc(base: *mut u8, off: u32, subtype: u32, disc: u32) {
    match disc_mem_size(subtype) {
        1 => store(base, off, disc as u8),
        2 => store(base, off, disc as u16),
        _ => store(base, off, disc),
    }
}

/// Installs the default value of a union case over arbitrary bytes.
pub(crate) unsafe fn init_case(ops: &[u32], jeq: usize, base: *mut u8) {
    let case_insn = ops[jeq];
    let case_off = ops[jeq + 2];
    match op_type(case_insn) {
        TYPE_1BY | TYPE_BLN => store(base, case_off, 0u8),
        TYPE_2BY => store(base, case_off, 0u16),
        TYPE_4BY | TYPE_ENU => store(base, case_off, 0u32),
        TYPE_8BY => store(base, case_off, 0u64),
        TYPE_STR | TYPE_BST => store(base, case_off, String::new()),
        _ => {
            let sub = jump_target(jeq, ops[jeq + 3] as i32);
            init_stream(ops, sub, base.add(case_off as usize));
        }
    }
}

pub(crate) unsafe fn free_stream(ops: &[u32], start: usize, base: *mut u8) {
    let mut idx = match opcode(ops[start]) {
        OP_DLC | OP_PLC => start + 1,
        _ => start,
    };
    loop {
        let insn = ops[idx];
        match opcode(insn) {
            OP_RTS => return,
            OP_JSR => {
                free_stream(ops, jump_target(idx, short_jump(insn)), base);
                idx += 1;
            }
            OP_PLM => {
                free_adr(ops, jump_target(idx, short_jump(insn)), base);
                idx += 2;
            }
            OP_ADR => {
                free_adr(ops, idx, base);
                idx += insn_len(ops, idx);
            }
            _ => return,
        }
    }
}

pub(crate) unsafe fn free_adr(ops: &[u32], idx: usize, base: *mut u8) {
    let insn = ops[idx];
    let off = ops[idx + 1];
    let extra = idx + adr_extra(insn);
    match op_type(insn) {
        TYPE_STR | TYPE_BST | TYPE_WSTR => {
            let p = field_mut::<String>(base, off);
            std::ptr::drop_in_place(p);
            p.write(String::new());
        }
        TYPE_SEQ | TYPE_BSQ => {
            let elem_extra = if op_type(insn) == TYPE_BSQ {
                extra + 1
            } else {
                extra
            };
            free_seq(ops, idx, elem_extra, base.add(off as usize));
        }
        TYPE_ARR => free_elems(
            ops,
            idx,
            extra + 1,
            op_subtype(insn),
            base.add(off as usize),
            ops[extra],
        ),
        TYPE_UNI => free_union(ops, idx, base),
        TYPE_STU => {
            let sub = jump_target(idx, ops[extra] as i32);
            free_stream(ops, sub, base.add(off as usize));
        }
        TYPE_EXT => {
            let ptr: *mut u8 = load(base, off);
            if !ptr.is_null() {
                let word = ops[extra];
                free_stream(ops, jump_target(idx, ops[extra + 1] as i32), ptr);
                raw_box_release(ptr, unpack_size(word), unpack_align(word));
            }
            store::<*mut u8>(base, off, std::ptr::null_mut());
        }
        _ => {}
    }
}

pub(crate) unsafe fn free_seq(ops: &[u32], idx: usize, elem_extra: usize, seq_addr: *mut u8) {
    let insn = ops[idx];
    let raw = load::<RawSeq>(seq_addr, 0);
    if !raw.buffer.is_null() {
        free_elems(ops, idx, elem_extra, op_subtype(insn), raw.buffer, raw.length);
    }
    let (size, align) = elem_layout(ops, insn, elem_extra);
    raw_seq_release(seq_addr, 0, size, align);
}

/// In-memory size/alignment of a collection element.
pub(crate) fn elem_layout(ops: &[u32], insn: u32, elem_extra: usize) -> (u32, u32) {
    match op_subtype(insn) {
        TYPE_1BY | TYPE_BLN => (1, 1),
        TYPE_2BY => (2, 2),
        TYPE_4BY => (4, 4),
        TYPE_8BY => (8, 8),
        TYPE_ENU => (4, 4),
        TYPE_BMK => {
            let w = op_wire_size(insn);
            (w, w)
        }
        TYPE_STR | TYPE_BST | TYPE_WSTR => (
            std::mem::size_of::<String>() as u32,
            std::mem::align_of::<String>() as u32,
        ),
        TYPE_STU => {
            let word = ops[elem_extra];
            (unpack_size(word), unpack_align(word))
        }
        TYPE_EXT => (
            std::mem::size_of::<*const u8>() as u32,
            std::mem::align_of::<*const u8>() as u32,
        ),
        _ => (0, 1),
    }
}

unsafe fn free_elems(
    ops: &[u32],
    idx: usize,
    extra: usize,
    subtype: u32,
    elems: *mut u8,
    count: u32,
) {
    match subtype {
        TYPE_STR | TYPE_BST | TYPE_WSTR => {
            let stride = std::mem::size_of::<String>() as u32;
            for i in 0..count {
                let p = field_mut::<String>(elems, i * stride);
                std::ptr::drop_in_place(p);
                p.write(String::new());
            }
        }
        TYPE_STU => {
            let stride = unpack_size(ops[extra]);
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for i in 0..count {
                free_stream(ops, sub, elems.add((i * stride) as usize));
            }
        }
        TYPE_EXT => {
            let word = ops[extra];
            let stride = std::mem::size_of::<*const u8>() as u32;
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for i in 0..count {
                let ptr: *mut u8 = load(elems, i * stride);
                if !ptr.is_null() {
                    free_stream(ops, sub, ptr);
                    raw_box_release(ptr, unpack_size(word), unpack_align(word));
                    store::<*mut u8>(elems, i * stride, std::ptr::null_mut());
                }
            }
        }
        _ => {}
    }
}

unsafe fn free_union(ops: &[u32], idx: usize, base: *mut u8) {
    let insn = ops[idx];
    let off = ops[idx + 1];
    let extra = idx + adr_extra(insn);
    let subtype = op_subtype(insn);
    let disc = super::write::load_disc(base, off, subtype);
    let ncases = ops[extra] as usize;
    let table = jump_target(idx, ops[extra + 1] as i32);
    if let Some(jeq) = super::write::find_case(ops, table, ncases, disc, subtype) {
        free_case(ops, jeq, base);
    }
}

pub(crate) unsafe fn free_case(ops: &[u32], jeq: usize, base: *mut u8) {
    let case_insn = ops[jeq];
    let case_off = ops[jeq + 2];
    match op_type(case_insn) {
        TYPE_STR | TYPE_BST => {
            let p = field_mut::<String>(base, case_off);
            std::ptr::drop_in_place(p);
            p.write(String::new());
        }
        t if is_prim_case(t) => {}
        _ => {
            let sub = jump_target(jeq, ops[jeq + 3] as i32);
            free_stream(ops, sub, base.add(case_off as usize));
        }
    }
}
