// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serialized-size computation: the write walk without the bytes.

use super::write::{find_case, load_disc};
use super::*;
use crate::desc::CdrDesc;
use crate::error::CdrError;
use crate::ops::*;
use crate::sample::{field, load, RawSeq};
use crate::stream::{align_up, cdr_align};

struct SizeCursor {
    pos: u32,
    version: XcdrVersion,
}

impl SizeCursor {
    fn align(&mut self, n: u32) {
        self.pos = align_up(self.pos, cdr_align(n, self.version));
    }

    fn add(&mut self, n: u32) {
        self.pos += n;
    }

    fn prim(&mut self, n: u32) {
        self.align(n);
        self.add(n);
    }
}

pub(crate) unsafe fn size_of_sample(
    sample: *const u8,
    desc: &CdrDesc,
    version: XcdrVersion,
) -> CdrResult<u32> {
    let mut c = SizeCursor { pos: 0, version };
    size_stream(&mut c, desc.ops(), 0, sample)?;
    Ok(c.pos)
}

pub(crate) unsafe fn size_of_key(
    kind: KeySerKind,
    sample: *const u8,
    desc: &CdrDesc,
    version: XcdrVersion,
) -> CdrResult<u32> {
    let mut c = SizeCursor { pos: 0, version };
    let ops = desc.ops();
    let keys = match version {
        XcdrVersion::Xcdr1 => desc.keys_definition_order(),
        XcdrVersion::Xcdr2 => desc.keys_id_order(),
    };
    for key in keys {
        let mut base = sample;
        for &adr in &key.path[..key.path.len() - 1] {
            let idx = adr as usize;
            match op_type(ops[idx]) {
                TYPE_STU => base = base.add(ops[idx + 1] as usize),
                TYPE_EXT => {
                    let ptr: *const u8 = load(base, ops[idx + 1]);
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
        let leaf = key.leaf() as usize;
        if kind == KeySerKind::Keyhash && op_type(ops[leaf]) == TYPE_ARR {
            let extra = leaf + adr_extra(ops[leaf]);
            size_elems(
                &mut c,
                ops,
                leaf,
                extra + 1,
                op_subtype(ops[leaf]),
                base.add(ops[leaf + 1] as usize),
                ops[extra],
            )?;
        } else {
            size_adr_value(&mut c, ops, leaf, base)?;
        }
    }
    Ok(c.pos)
}

unsafe fn size_stream(
    c: &mut SizeCursor,
    ops: &[u32],
    start: usize,
    base: *const u8,
) -> CdrResult<()> {
    match opcode(ops[start]) {
        OP_DLC => {
            if c.version == XcdrVersion::Xcdr2 {
                c.prim(4); // DHEADER
            }
            size_members(c, ops, start + 1, base)
        }
        OP_PLC => size_param_list(c, ops, start + 1, base),
        _ => size_members(c, ops, start, base),
    }
}

unsafe fn size_members(
    c: &mut SizeCursor,
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
                size_members(c, ops, jump_target(idx, short_jump(insn)), base)?;
                idx += 1;
            }
            OP_ADR => {
                size_adr(c, ops, idx, base, false)?;
                idx += insn_len(ops, idx);
            }
            _ => return Ok(()),
        }
    }
}

unsafe fn size_adr(
    c: &mut SizeCursor,
    ops: &[u32],
    idx: usize,
    base: *const u8,
    plain_value: bool,
) -> CdrResult<()> {
    let insn = ops[idx];
    let off = ops[idx + 1];
    if insn & FLAG_OPT != 0 && !plain_value {
        let ptr: *const u8 = load(base, off);
        match c.version {
            XcdrVersion::Xcdr2 => {
                c.add(1); // presence byte
                if ptr.is_null() {
                    return Ok(());
                }
                return size_ext(c, ops, idx, ptr);
            }
            XcdrVersion::Xcdr1 => {
                c.align(4);
                let member_id = ops[idx + 2];
                c.add(if member_id <= XCDR1_PID_MAX_SHORT { 4 } else { 12 });
                if ptr.is_null() {
                    return Ok(());
                }
                size_ext(c, ops, idx, ptr)?;
                c.align(4); // parameter lengths include padding
                return Ok(());
            }
        }
    }
    size_adr_value(c, ops, idx, base)
}

unsafe fn size_ext(c: &mut SizeCursor, ops: &[u32], idx: usize, pointee: *const u8) -> CdrResult<()> {
    let extra = idx + adr_extra(ops[idx]);
    size_stream(c, ops, jump_target(idx, ops[extra + 1] as i32), pointee)
}

unsafe fn size_adr_value(
    c: &mut SizeCursor,
    ops: &[u32],
    idx: usize,
    base: *const u8,
) -> CdrResult<()> {
    let insn = ops[idx];
    let off = ops[idx + 1];
    let extra = idx + adr_extra(insn);
    match op_type(insn) {
        TYPE_1BY | TYPE_BLN => c.add(1),
        TYPE_2BY => c.prim(2),
        TYPE_4BY => c.prim(4),
        TYPE_8BY => c.prim(8),
        TYPE_ENU | TYPE_BMK => c.prim(op_wire_size(insn)),
        TYPE_STR | TYPE_BST | TYPE_WSTR => {
            size_string(c, op_type(insn), &*field::<String>(base, off));
        }
        TYPE_SEQ | TYPE_BSQ => {
            let seq_addr = base.add(off as usize);
            let raw = load::<RawSeq>(seq_addr, 0);
            let mut elem_extra = extra;
            if op_type(insn) == TYPE_BSQ {
                elem_extra += 1;
            }
            let subtype = op_subtype(insn);
            if elem_needs_dheader(subtype, c.version) {
                c.prim(4);
            }
            c.prim(4); // length
            size_elems(c, ops, idx, elem_extra, subtype, raw.buffer, raw.length)?;
        }
        TYPE_ARR => {
            let subtype = op_subtype(insn);
            if elem_needs_dheader(subtype, c.version) {
                c.prim(4);
            }
            size_elems(c, ops, idx, extra + 1, subtype, base.add(off as usize), ops[extra])?;
        }
        TYPE_UNI => size_union(c, ops, idx, base)?,
        TYPE_STU => size_stream(c, ops, jump_target(idx, ops[extra] as i32), base.add(off as usize))?,
        TYPE_EXT => {
            let ptr: *const u8 = load(base, off);
            if ptr.is_null() {
                return Err(CdrError::Encoding {
                    reason: "null external member".into(),
                });
            }
            size_ext(c, ops, idx, ptr)?;
        }
        _ => {}
    }
    Ok(())
}

fn size_string(c: &mut SizeCursor, type_code: u32, s: &str) {
    c.prim(4);
    if type_code == TYPE_WSTR {
        c.add(2 * s.encode_utf16().count() as u32);
    } else {
        c.add(s.len() as u32 + 1);
    }
}

unsafe fn size_elems(
    c: &mut SizeCursor,
    ops: &[u32],
    idx: usize,
    extra: usize,
    subtype: u32,
    elems: *const u8,
    count: u32,
) -> CdrResult<()> {
    if count == 0 {
        return Ok(());
    }
    let insn = ops[idx];
    match subtype {
        TYPE_1BY | TYPE_BLN => c.add(count),
        TYPE_2BY => {
            c.prim(2);
            c.add((count - 1) * 2);
        }
        TYPE_4BY => {
            c.prim(4);
            c.add((count - 1) * 4);
        }
        TYPE_8BY => {
            c.prim(8);
            c.add((count - 1) * 8);
        }
        TYPE_ENU | TYPE_BMK => {
            let n = op_wire_size(insn);
            c.prim(n);
            c.add((count - 1) * n);
        }
        TYPE_STR | TYPE_BST | TYPE_WSTR => {
            let stride = std::mem::size_of::<String>() as u32;
            for i in 0..count {
                size_string(c, subtype, &*field::<String>(elems, i * stride));
            }
        }
        TYPE_STU => {
            let stride = unpack_size(ops[extra]);
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for i in 0..count {
                size_stream(c, ops, sub, elems.add((i * stride) as usize))?;
            }
        }
        TYPE_EXT => {
            let stride = std::mem::size_of::<*const u8>() as u32;
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for i in 0..count {
                let ptr: *const u8 = load(elems, i * stride);
                if ptr.is_null() {
                    return Err(CdrError::Encoding {
                        reason: "null external element".into(),
                    });
                }
                size_stream(c, ops, sub, ptr)?;
            }
        }
        _ => {}
    }
    Ok(())
}

unsafe fn size_union(c: &mut SizeCursor, ops: &[u32], idx: usize, base: *const u8) -> CdrResult<()> {
    let insn = ops[idx];
    let off = ops[idx + 1];
    let extra = idx + adr_extra(insn);
    let subtype = op_subtype(insn);
    let disc = load_disc(base, off, subtype);
    match subtype {
        TYPE_BLN | TYPE_1BY => c.add(1),
        TYPE_2BY => c.prim(2),
        TYPE_ENU => c.prim(op_wire_size(insn)),
        _ => c.prim(4),
    }
    let ncases = ops[extra] as usize;
    let table = jump_target(idx, ops[extra + 1] as i32);
    let Some(jeq) = find_case(ops, table, ncases, disc, subtype) else {
        return Err(CdrError::Encoding {
            reason: "union discriminator selects no case".into(),
        });
    };
    let case_insn = ops[jeq];
    let case_off = ops[jeq + 2];
    match op_type(case_insn) {
        TYPE_1BY | TYPE_BLN => c.add(1),
        TYPE_2BY => c.prim(2),
        TYPE_4BY => c.prim(4),
        TYPE_8BY => c.prim(8),
        TYPE_ENU => c.prim(op_wire_size(case_insn)),
        TYPE_STR | TYPE_BST => {
            size_string(c, TYPE_STR, &*field::<String>(base, case_off));
        }
        _ => {
            let sub = jump_target(jeq, ops[jeq + 3] as i32);
            size_stream(c, ops, sub, base.add(case_off as usize))?;
        }
    }
    Ok(())
}

unsafe fn size_param_list(
    c: &mut SizeCursor,
    ops: &[u32],
    first_plm: usize,
    base: *const u8,
) -> CdrResult<()> {
    if c.version == XcdrVersion::Xcdr2 {
        c.prim(4); // DHEADER
    }
    let mut idx = first_plm;
    while opcode(ops[idx]) == OP_PLM {
        let target = jump_target(idx, short_jump(ops[idx]));
        let member_id = ops[idx + 1];
        let member = ops[target];
        let absent = member & FLAG_OPT != 0 && load::<*const u8>(base, ops[target + 1]).is_null();
        match c.version {
            XcdrVersion::Xcdr2 => {
                if !absent {
                    c.align(4);
                    c.add(8); // EMHEADER + NEXTINT
                    size_adr(c, ops, target, base, true)?;
                }
            }
            XcdrVersion::Xcdr1 => {
                c.align(4);
                c.add(if member_id <= XCDR1_PID_MAX_SHORT { 4 } else { 12 });
                if !absent {
                    size_adr(c, ops, target, base, true)?;
                    c.align(4);
                }
            }
        }
        idx += 2;
    }
    if c.version == XcdrVersion::Xcdr1 {
        c.align(4);
        c.add(4); // sentinel
    }
    Ok(())
}
