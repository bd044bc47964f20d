// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-place validation and normalization of received CDR.
//!
//! A single pass that byte-swaps primitives to native order and validates
//! every length, header, string, enum, bitmask and discriminator. After a
//! successful pass the read path may consume the buffer without further
//! checks. Idempotent on success: a second pass without swapping
//! revalidates the same bytes.
//!
//! Skipped content (unknown mutable members) is left in its original byte
//! order; readers skip it by the same header lengths.

use super::write::find_case;
use super::*;
use crate::desc::CdrDesc;
use crate::ops::*;
use crate::stream::{align_up, cdr_align, ByteOrder};

struct NormCtx<'a> {
    data: &'a mut [u8],
    pos: u32,
    version: XcdrVersion,
}

impl NormCtx<'_> {
    fn align(&mut self, n: u32, limit: u32) -> CdrResult<()> {
        let target = align_up(self.pos, cdr_align(n, self.version));
        if target > limit {
            return Err(validation(self.pos, "alignment past end of input"));
        }
        self.pos = target;
        Ok(())
    }

    fn need(&self, n: u32, limit: u32) -> CdrResult<()> {
        // n can be an attacker-controlled length word; never wrap
        if self.pos.checked_add(n).map_or(true, |end| end > limit) {
            return Err(validation(self.pos, "input truncated"));
        }
        Ok(())
    }

    fn norm1(&mut self, limit: u32) -> CdrResult<u8> {
        self.need(1, limit)?;
        let v = self.data[self.pos as usize];
        self.pos += 1;
        Ok(v)
    }

    fn norm2<B: ByteOrder>(&mut self, limit: u32) -> CdrResult<u16> {
        self.align(2, limit)?;
        self.need(2, limit)?;
        let p = self.pos as usize;
        if B::SWAP {
            self.data.swap(p, p + 1);
        }
        let v = u16::from_ne_bytes([self.data[p], self.data[p + 1]]);
        self.pos += 2;
        Ok(v)
    }

    fn norm4<B: ByteOrder>(&mut self, limit: u32) -> CdrResult<u32> {
        self.align(4, limit)?;
        self.need(4, limit)?;
        let p = self.pos as usize;
        if B::SWAP {
            self.data[p..p + 4].reverse();
        }
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.data[p..p + 4]);
        self.pos += 4;
        Ok(u32::from_ne_bytes(b))
    }

    fn norm8<B: ByteOrder>(&mut self, limit: u32) -> CdrResult<u64> {
        self.align(8, limit)?;
        self.need(8, limit)?;
        let p = self.pos as usize;
        if B::SWAP {
            self.data[p..p + 8].reverse();
        }
        let mut b = [0u8; 8];
        b.copy_from_slice(&self.data[p..p + 8]);
        self.pos += 8;
        Ok(u64::from_ne_bytes(b))
    }

    /// Reads a 4-byte word in wire order without normalizing it in place
    /// (EMHEADER length codes 5..7, where the word is also member data).
    fn peek4<B: ByteOrder>(&mut self, limit: u32) -> CdrResult<u32> {
        self.align(4, limit)?;
        self.need(4, limit)?;
        let p = self.pos as usize;
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.data[p..p + 4]);
        Ok(B::w32(u32::from_ne_bytes(b)))
    }

    fn put1_back(&mut self, v: u8) {
        self.data[(self.pos - 1) as usize] = v;
    }
}

/// Ops-level entry: normalizes a full-sample body against a bare
/// op-stream (no key form, no descriptor).
pub(crate) fn normalize_data_root<B: ByteOrder>(
    data: &mut [u8],
    version: XcdrVersion,
    ops: &[u32],
) -> CdrResult<u32> {
    if data.len() > (u32::MAX - 8) as usize {
        return Err(validation(0, "input exceeds 32-bit size"));
    }
    let limit = data.len() as u32;
    let mut ctx = NormCtx {
        data,
        pos: 0,
        version,
    };
    normalize_stream::<B>(&mut ctx, limit, ops, 0)?;
    Ok(ctx.pos)
}

pub(crate) fn normalize_root<B: ByteOrder>(
    data: &mut [u8],
    version: XcdrVersion,
    desc: &CdrDesc,
    just_key: bool,
) -> CdrResult<u32> {
    if data.len() > (u32::MAX - 8) as usize {
        return Err(validation(0, "input exceeds 32-bit size"));
    }
    let limit = data.len() as u32;
    let mut ctx = NormCtx {
        data,
        pos: 0,
        version,
    };
    if just_key {
        normalize_key::<B>(&mut ctx, limit, desc)?;
    } else {
        normalize_stream::<B>(&mut ctx, limit, desc.ops(), 0)?;
    }
    Ok(ctx.pos)
}

fn normalize_key<B: ByteOrder>(ctx: &mut NormCtx<'_>, limit: u32, desc: &CdrDesc) -> CdrResult<()> {
    // XCDR2 keys travel in member-id order, XCDR1 keys in declaration
    // order
    let keys = match ctx.version {
        XcdrVersion::Xcdr1 => desc.keys_definition_order(),
        XcdrVersion::Xcdr2 => desc.keys_id_order(),
    };
    for key in keys {
        normalize_adr_value::<B>(ctx, limit, desc.ops(), key.leaf() as usize)?;
    }
    Ok(())
}

fn normalize_stream<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    ops: &[u32],
    start: usize,
) -> CdrResult<()> {
    match opcode(ops[start]) {
        OP_DLC => {
            if ctx.version == XcdrVersion::Xcdr1 {
                return normalize_members::<B>(ctx, limit, ops, start + 1, None);
            }
            let body = ctx.norm4::<B>(limit)?;
            let end = ctx
                .pos
                .checked_add(body)
                .filter(|e| *e <= limit)
                .ok_or_else(|| validation(ctx.pos, "DHEADER exceeds input"))?;
            normalize_members::<B>(ctx, end, ops, start + 1, Some(end))?;
            ctx.pos = end;
            Ok(())
        }
        OP_PLC => normalize_pl::<B>(ctx, limit, ops, start + 1),
        _ => normalize_members::<B>(ctx, limit, ops, start, None),
    }
}

fn normalize_members<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
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
                normalize_members::<B>(ctx, limit, ops, jump_target(idx, short_jump(insn)), end)?;
                idx += 1;
            }
            OP_ADR => {
                // an appendable body may legitimately end before the
                // member list does; readers default the rest
                if end.is_some_and(|e| ctx.pos >= e) {
                    return Ok(());
                }
                normalize_adr::<B>(ctx, limit, ops, idx)?;
                idx += insn_len(ops, idx);
            }
            _ => return Ok(()),
        }
    }
}

fn normalize_adr<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    ops: &[u32],
    idx: usize,
) -> CdrResult<()> {
    let insn = ops[idx];
    if insn & FLAG_OPT != 0 {
        debug_assert_eq!(op_type(insn), TYPE_EXT);
        match ctx.version {
            XcdrVersion::Xcdr2 => {
                let present = ctx.norm1(limit)?;
                ctx.put1_back(u8::from(present != 0));
                if present == 0 {
                    return Ok(());
                }
                return normalize_ext::<B>(ctx, limit, ops, idx);
            }
            XcdrVersion::Xcdr1 => {
                ctx.align(4, limit)?;
                let header_pos = ctx.pos;
                let (id, _mu, len) = normalize_xcdr1_param_header::<B>(ctx, limit)?;
                if id != ops[idx + 2] {
                    return Err(validation(header_pos, "unexpected optional member id"));
                }
                if len == 0 {
                    return Ok(());
                }
                let body_start = ctx.pos;
                let end = body_start
                    .checked_add(len)
                    .filter(|e| *e <= limit)
                    .ok_or_else(|| validation(body_start, "parameter exceeds input"))?;
                normalize_ext::<B>(ctx, end, ops, idx)?;
                if ctx.pos > end {
                    return Err(validation(ctx.pos, "parameter length mismatch"));
                }
                ctx.pos = end;
                return Ok(());
            }
        }
    }
    normalize_adr_value::<B>(ctx, limit, ops, idx)
}

fn normalize_ext<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    ops: &[u32],
    idx: usize,
) -> CdrResult<()> {
    let extra = idx + adr_extra(ops[idx]);
    let sub = jump_target(idx, ops[extra + 1] as i32);
    normalize_stream::<B>(ctx, limit, ops, sub)
}

fn normalize_adr_value<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    ops: &[u32],
    idx: usize,
) -> CdrResult<()> {
    let insn = ops[idx];
    let extra = idx + adr_extra(insn);
    match op_type(insn) {
        TYPE_1BY => ctx.norm1(limit).map(|_| ()),
        TYPE_2BY => ctx.norm2::<B>(limit).map(|_| ()),
        TYPE_4BY => ctx.norm4::<B>(limit).map(|_| ()),
        TYPE_8BY => ctx.norm8::<B>(limit).map(|_| ()),
        TYPE_BLN => {
            let v = ctx.norm1(limit)?;
            ctx.put1_back(u8::from(v != 0));
            Ok(())
        }
        TYPE_ENU => normalize_enum::<B>(ctx, limit, op_wire_size(insn), ops[extra]),
        TYPE_BMK => {
            let mask = ((ops[extra] as u64) << 32) | ops[extra + 1] as u64;
            normalize_bitmask::<B>(ctx, limit, op_wire_size(insn), mask)
        }
        TYPE_STR => normalize_string::<B>(ctx, limit, 0),
        TYPE_BST => normalize_string::<B>(ctx, limit, ops[extra]),
        TYPE_WSTR => normalize_wstring::<B>(ctx, limit),
        TYPE_SEQ | TYPE_BSQ => normalize_seq::<B>(ctx, limit, ops, idx),
        TYPE_ARR => normalize_arr::<B>(ctx, limit, ops, idx),
        TYPE_UNI => normalize_union::<B>(ctx, limit, ops, idx),
        TYPE_STU => {
            let sub = jump_target(idx, ops[extra] as i32);
            normalize_stream::<B>(ctx, limit, ops, sub)
        }
        TYPE_EXT => normalize_ext::<B>(ctx, limit, ops, idx),
        _ => Err(validation(ctx.pos, "unknown op type")),
    }
}

fn normalize_enum<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    wire_size: u32,
    max: u32,
) -> CdrResult<()> {
    let pos = ctx.pos;
    let v = match wire_size {
        1 => ctx.norm1(limit)? as u32,
        2 => ctx.norm2::<B>(limit)? as u32,
        _ => ctx.norm4::<B>(limit)?,
    };
    if v > max {
        return Err(validation(pos, "enum value out of range"));
    }
    Ok(())
}

fn normalize_bitmask<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    wire_size: u32,
    mask: u64,
) -> CdrResult<()> {
    let pos = ctx.pos;
    let v = match wire_size {
        1 => ctx.norm1(limit)? as u64,
        2 => ctx.norm2::<B>(limit)? as u64,
        4 => ctx.norm4::<B>(limit)? as u64,
        _ => ctx.norm8::<B>(limit)?,
    };
    if v & !mask != 0 {
        return Err(validation(pos, "bitmask value has undefined bits set"));
    }
    Ok(())
}

/// Narrow strings: length includes the NUL, contents must be UTF-8 (the
/// native sample representation is `String`, so read must not be able to
/// fail after normalize).
fn normalize_string<B: ByteOrder>(ctx: &mut NormCtx<'_>, limit: u32, bound: u32) -> CdrResult<()> {
    let n = ctx.norm4::<B>(limit)?;
    let pos = ctx.pos;
    if n == 0 {
        return Err(validation(pos, "string length zero"));
    }
    if bound != 0 && n > bound {
        return Err(validation(pos, "bounded string exceeds its bound"));
    }
    ctx.need(n, limit)?;
    let bytes = &ctx.data[pos as usize..(pos + n) as usize];
    if bytes[n as usize - 1] != 0 {
        return Err(validation(pos, "string not NUL terminated"));
    }
    if std::str::from_utf8(&bytes[..n as usize - 1]).is_err() {
        return Err(validation(pos, "string is not valid UTF-8"));
    }
    ctx.pos += n;
    Ok(())
}

/// Wide strings: even byte length, UTF-16 code units, no unpaired
/// surrogates, no terminator.
fn normalize_wstring<B: ByteOrder>(ctx: &mut NormCtx<'_>, limit: u32) -> CdrResult<()> {
    let bytes = ctx.norm4::<B>(limit)?;
    if bytes % 2 != 0 {
        return Err(validation(ctx.pos, "wide string byte length is odd"));
    }
    ctx.need(bytes, limit)?;
    let mut expect_low = false;
    for _ in 0..bytes / 2 {
        let u = ctx.norm2::<B>(limit)?;
        let is_high = (0xd800..0xdc00).contains(&u);
        let is_low = (0xdc00..0xe000).contains(&u);
        if expect_low != is_low {
            return Err(validation(ctx.pos - 2, "unpaired surrogate in wide string"));
        }
        expect_low = is_high;
    }
    if expect_low {
        return Err(validation(ctx.pos, "wide string ends in a high surrogate"));
    }
    Ok(())
}

fn normalize_collection_header<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    subtype: u32,
) -> CdrResult<Option<u32>> {
    if elem_needs_dheader(subtype, ctx.version) {
        let body = ctx.norm4::<B>(limit)?;
        let end = ctx
            .pos
            .checked_add(body)
            .filter(|e| *e <= limit)
            .ok_or_else(|| validation(ctx.pos, "DHEADER exceeds input"))?;
        Ok(Some(end))
    } else {
        Ok(None)
    }
}

fn normalize_seq<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    ops: &[u32],
    idx: usize,
) -> CdrResult<()> {
    let insn = ops[idx];
    let mut extra = idx + adr_extra(insn);
    let bound = if op_type(insn) == TYPE_BSQ {
        extra += 1;
        ops[extra - 1]
    } else {
        0
    };
    let subtype = op_subtype(insn);
    let elems_end = normalize_collection_header::<B>(ctx, limit, subtype)?;
    let inner_limit = elems_end.unwrap_or(limit);
    let n = ctx.norm4::<B>(inner_limit)?;
    if bound != 0 && n > bound {
        return Err(validation(ctx.pos, "bounded sequence exceeds its bound"));
    }
    normalize_elems::<B>(ctx, inner_limit, ops, idx, extra, subtype, n)?;
    if let Some(end) = elems_end {
        if ctx.pos > end {
            return Err(validation(ctx.pos, "collection DHEADER mismatch"));
        }
        ctx.pos = end;
    }
    Ok(())
}

fn normalize_arr<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    ops: &[u32],
    idx: usize,
) -> CdrResult<()> {
    let insn = ops[idx];
    let extra = idx + adr_extra(insn);
    let count = ops[extra];
    let subtype = op_subtype(insn);
    let elems_end = normalize_collection_header::<B>(ctx, limit, subtype)?;
    let inner_limit = elems_end.unwrap_or(limit);
    normalize_elems::<B>(ctx, inner_limit, ops, idx, extra + 1, subtype, count)?;
    if let Some(end) = elems_end {
        if ctx.pos > end {
            return Err(validation(ctx.pos, "collection DHEADER mismatch"));
        }
        ctx.pos = end;
    }
    Ok(())
}

fn normalize_elems<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    ops: &[u32],
    idx: usize,
    extra: usize,
    subtype: u32,
    count: u32,
) -> CdrResult<()> {
    let insn = ops[idx];
    match subtype {
        TYPE_1BY => {
            ctx.need(count, limit)?;
            ctx.pos += count;
            Ok(())
        }
        TYPE_BLN => {
            for _ in 0..count {
                let v = ctx.norm1(limit)?;
                ctx.put1_back(u8::from(v != 0));
            }
            Ok(())
        }
        TYPE_2BY => {
            for _ in 0..count {
                ctx.norm2::<B>(limit)?;
            }
            Ok(())
        }
        TYPE_4BY => {
            for _ in 0..count {
                ctx.norm4::<B>(limit)?;
            }
            Ok(())
        }
        TYPE_8BY => {
            for _ in 0..count {
                ctx.norm8::<B>(limit)?;
            }
            Ok(())
        }
        TYPE_ENU => {
            for _ in 0..count {
                normalize_enum::<B>(ctx, limit, op_wire_size(insn), ops[extra])?;
            }
            Ok(())
        }
        TYPE_BMK => {
            let mask = ((ops[extra] as u64) << 32) | ops[extra + 1] as u64;
            for _ in 0..count {
                normalize_bitmask::<B>(ctx, limit, op_wire_size(insn), mask)?;
            }
            Ok(())
        }
        TYPE_STR => {
            for _ in 0..count {
                normalize_string::<B>(ctx, limit, 0)?;
            }
            Ok(())
        }
        TYPE_BST => {
            for _ in 0..count {
                normalize_string::<B>(ctx, limit, ops[extra])?;
            }
            Ok(())
        }
        TYPE_WSTR => {
            for _ in 0..count {
                normalize_wstring::<B>(ctx, limit)?;
            }
            Ok(())
        }
        TYPE_STU | TYPE_EXT => {
            let sub = jump_target(idx, ops[extra + 1] as i32);
            for _ in 0..count {
                normalize_stream::<B>(ctx, limit, ops, sub)?;
            }
            Ok(())
        }
        _ => Err(validation(ctx.pos, "unknown element type")),
    }
}

fn normalize_union<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    ops: &[u32],
    idx: usize,
) -> CdrResult<()> {
    let insn = ops[idx];
    let extra = idx + adr_extra(insn);
    let subtype = op_subtype(insn);
    let disc_pos = ctx.pos;
    let disc = match subtype {
        TYPE_BLN => {
            let v = ctx.norm1(limit)?;
            ctx.put1_back(u8::from(v != 0));
            u32::from(v != 0)
        }
        TYPE_1BY => ctx.norm1(limit)? as u32,
        TYPE_2BY => ctx.norm2::<B>(limit)? as u32,
        TYPE_ENU => {
            let pos = ctx.pos;
            let v = match op_wire_size(insn) {
                1 => ctx.norm1(limit)? as u32,
                2 => ctx.norm2::<B>(limit)? as u32,
                _ => ctx.norm4::<B>(limit)?,
            };
            if v > ops[extra + 2] {
                return Err(validation(pos, "enum discriminator out of range"));
            }
            v
        }
        _ => ctx.norm4::<B>(limit)?,
    };

    let ncases = ops[extra] as usize;
    let table = jump_target(idx, ops[extra + 1] as i32);
    let Some(jeq) = find_case(ops, table, ncases, disc, subtype) else {
        return Err(validation(disc_pos, "union discriminator selects no case"));
    };
    normalize_case::<B>(ctx, limit, ops, jeq)
}

fn normalize_case<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    ops: &[u32],
    jeq: usize,
) -> CdrResult<()> {
    let case_insn = ops[jeq];
    match op_type(case_insn) {
        TYPE_1BY => ctx.norm1(limit).map(|_| ()),
        TYPE_2BY => ctx.norm2::<B>(limit).map(|_| ()),
        TYPE_4BY => ctx.norm4::<B>(limit).map(|_| ()),
        TYPE_8BY => ctx.norm8::<B>(limit).map(|_| ()),
        TYPE_BLN => {
            let v = ctx.norm1(limit)?;
            ctx.put1_back(u8::from(v != 0));
            Ok(())
        }
        TYPE_ENU => normalize_enum::<B>(ctx, limit, op_wire_size(case_insn), ops[jeq + 3]),
        TYPE_STR => normalize_string::<B>(ctx, limit, 0),
        TYPE_BST => normalize_string::<B>(ctx, limit, ops[jeq + 3]),
        _ => {
            let sub = jump_target(jeq, ops[jeq + 3] as i32);
            normalize_stream::<B>(ctx, limit, ops, sub)
        }
    }
}

// Parameter lists.

/// Normalizes an XCDR1 parameter header in place; returns
/// `(member id, must-understand, length)` with the sentinel mapped to id
/// `u32::MAX`.
fn normalize_xcdr1_param_header<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
) -> CdrResult<(u32, bool, u32)> {
    let pid = ctx.norm2::<B>(limit)?;
    let len = ctx.norm2::<B>(limit)? as u32;
    let id = pid & XCDR1_PID_MASK;
    if id == XCDR1_PID_SENTINEL {
        return Ok((u32::MAX, false, 0));
    }
    if id == XCDR1_PID_EXTENDED {
        if len != 8 {
            return Err(validation(ctx.pos, "extended parameter header length"));
        }
        let mid = ctx.norm4::<B>(limit)?;
        let xlen = ctx.norm4::<B>(limit)?;
        return Ok((
            mid & XCDR1_EXTENDED_MID_MASK,
            mid & XCDR1_EXTENDED_FLAG_MU != 0,
            xlen,
        ));
    }
    Ok((id as u32, pid & XCDR1_PID_FLAG_MU != 0, len))
}

fn normalize_pl<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    ops: &[u32],
    first_plm: usize,
) -> CdrResult<()> {
    match ctx.version {
        XcdrVersion::Xcdr2 => {
            let body = ctx.norm4::<B>(limit)?;
            let end = ctx
                .pos
                .checked_add(body)
                .filter(|e| *e <= limit)
                .ok_or_else(|| validation(ctx.pos, "DHEADER exceeds input"))?;
            while ctx.pos < end {
                ctx.align(4, end)?;
                if ctx.pos >= end {
                    break;
                }
                let em_pos = ctx.pos;
                let em = ctx.norm4::<B>(end)?;
                let lc = (em & EMHEADER_LC_MASK) >> EMHEADER_LC_SHIFT;
                let id = em & EMHEADER_ID_MASK;
                let (body_start, size) = match lc {
                    0..=3 => (ctx.pos, 1u32 << lc),
                    4 => {
                        let n = ctx.norm4::<B>(end)?;
                        (ctx.pos, n)
                    }
                    _ => {
                        let n = ctx.peek4::<B>(end)?;
                        let mult = [1u32, 4, 8][(lc - 5) as usize];
                        (ctx.pos, 4 + n * mult)
                    }
                };
                let body_end = body_start
                    .checked_add(size)
                    .filter(|e| *e <= end)
                    .ok_or_else(|| validation(body_start, "member length exceeds body"))?;
                if let Some(target) = super::read::find_plm(ops, first_plm, id) {
                    ctx.pos = body_start;
                    normalize_member::<B>(ctx, body_end, ops, target)?;
                    if ctx.pos > body_end {
                        return Err(validation(ctx.pos, "member overruns its length"));
                    }
                } else if em & EMHEADER_FLAG_MU != 0 {
                    return Err(validation(em_pos, "unknown member with must-understand"));
                }
                ctx.pos = body_end;
            }
            ctx.pos = end;
            Ok(())
        }
        XcdrVersion::Xcdr1 => loop {
            ctx.align(4, limit)?;
            let header_pos = ctx.pos;
            let (id, mu, len) = normalize_xcdr1_param_header::<B>(ctx, limit)?;
            if id == u32::MAX {
                return Ok(());
            }
            let body_start = ctx.pos;
            let body_end = body_start
                .checked_add(len)
                .filter(|e| *e <= limit)
                .ok_or_else(|| validation(body_start, "parameter exceeds input"))?;
            if let Some(target) = super::read::find_plm(ops, first_plm, id) {
                if len > 0 {
                    normalize_member::<B>(ctx, body_end, ops, target)?;
                    if ctx.pos > body_end {
                        return Err(validation(ctx.pos, "member overruns its length"));
                    }
                }
            } else if mu {
                return Err(validation(header_pos, "unknown member with must-understand"));
            }
            ctx.pos = body_end;
        },
    }
}

/// Normalizes one mutable member's value (the caller framed it with a
/// header, so the optional-member wrapper does not apply).
fn normalize_member<B: ByteOrder>(
    ctx: &mut NormCtx<'_>,
    limit: u32,
    ops: &[u32],
    idx: usize,
) -> CdrResult<()> {
    let insn = ops[idx];
    if insn & FLAG_OPT != 0 {
        return normalize_ext::<B>(ctx, limit, ops, idx);
    }
    normalize_adr_value::<B>(ctx, limit, ops, idx)
}
