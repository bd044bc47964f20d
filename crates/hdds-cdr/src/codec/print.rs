// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Truncating value printer for normalized payloads, used by the serdata
//! log hooks. Output is a brace-delimited value list; the ops carry no
//! member names, so none are printed.

use super::read::{read_enum_value, read_xcdr1_param_header};
use super::write::find_case;
use super::*;
use crate::desc::CdrDesc;
use crate::ops::*;
use crate::stream::Istream;
use std::fmt::Write as _;

struct Printer {
    out: String,
    max: usize,
    truncated: bool,
}

impl Printer {
    fn push(&mut self, args: std::fmt::Arguments<'_>) {
        if self.truncated {
            return;
        }
        let _ = self.out.write_fmt(args);
        if self.out.len() > self.max {
            self.out.truncate(self.max.saturating_sub(3));
            self.out.push_str("...");
            self.truncated = true;
        }
    }
}

pub(crate) fn print_sample(is: &mut Istream<'_>, desc: &CdrDesc, max: usize) -> String {
    let mut p = Printer {
        out: String::new(),
        max,
        truncated: false,
    };
    print_stream(&mut p, is, desc.ops(), 0);
    p.out
}

pub(crate) fn print_key(is: &mut Istream<'_>, desc: &CdrDesc, max: usize) -> String {
    let mut p = Printer {
        out: String::new(),
        max,
        truncated: false,
    };
    let keys = match is.version() {
        XcdrVersion::Xcdr1 => desc.keys_definition_order(),
        XcdrVersion::Xcdr2 => desc.keys_id_order(),
    };
    p.push(format_args!(":k:{{"));
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            p.push(format_args!(","));
        }
        print_adr_value(&mut p, is, desc.ops(), key.leaf() as usize);
    }
    p.push(format_args!("}}"));
    p.out
}

fn print_stream(p: &mut Printer, is: &mut Istream<'_>, ops: &[u32], start: usize) {
    p.push(format_args!("{{"));
    match opcode(ops[start]) {
        OP_DLC => {
            if is.version() == XcdrVersion::Xcdr1 {
                print_members(p, is, ops, start + 1, None);
            } else {
                let body = is.get4();
                let end = is.index() + body;
                print_members(p, is, ops, start + 1, Some(end));
                is.seek(end);
            }
        }
        OP_PLC => print_pl(p, is, ops, start + 1),
        _ => print_members(p, is, ops, start, None),
    }
    p.push(format_args!("}}"));
}

fn print_members(
    p: &mut Printer,
    is: &mut Istream<'_>,
    ops: &[u32],
    start: usize,
    end: Option<u32>,
) {
    let mut idx = start;
    let mut first = true;
    loop {
        let insn = ops[idx];
        match opcode(insn) {
            OP_RTS => return,
            OP_JSR => {
                print_members(p, is, ops, jump_target(idx, short_jump(insn)), end);
                idx += 1;
            }
            OP_ADR => {
                if end.is_some_and(|e| is.index() >= e) {
                    return;
                }
                if !first {
                    p.push(format_args!(","));
                }
                first = false;
                print_adr(p, is, ops, idx);
                idx += insn_len(ops, idx);
            }
            _ => return,
        }
    }
}

fn print_adr(p: &mut Printer, is: &mut Istream<'_>, ops: &[u32], idx: usize) {
    let insn = ops[idx];
    if insn & FLAG_OPT != 0 {
        match is.version() {
            XcdrVersion::Xcdr2 => {
                if is.get1() == 0 {
                    p.push(format_args!("nil"));
                    return;
                }
            }
            XcdrVersion::Xcdr1 => {
                is.align(4);
                let (_, len) = read_xcdr1_param_header(is);
                if len == 0 {
                    p.push(format_args!("nil"));
                    return;
                }
                let start = is.index();
                let extra = idx + adr_extra(insn);
                print_stream(p, is, ops, jump_target(idx, ops[extra + 1] as i32));
                is.seek(start + len);
                return;
            }
        }
        let extra = idx + adr_extra(insn);
        print_stream(p, is, ops, jump_target(idx, ops[extra + 1] as i32));
        return;
    }
    print_adr_value(p, is, ops, idx);
}

fn print_adr_value(p: &mut Printer, is: &mut Istream<'_>, ops: &[u32], idx: usize) {
    let insn = ops[idx];
    let extra = idx + adr_extra(insn);
    let signed = insn & FLAG_SGN != 0;
    let float = insn & FLAG_FP != 0;
    match op_type(insn) {
        TYPE_1BY => {
            let v = is.get1();
            if signed {
                p.push(format_args!("{}", v as i8));
            } else {
                p.push(format_args!("{}", v));
            }
        }
        TYPE_BLN => p.push(format_args!("{}", is.get1() != 0)),
        TYPE_2BY => {
            let v = is.get2();
            if signed {
                p.push(format_args!("{}", v as i16));
            } else {
                p.push(format_args!("{}", v));
            }
        }
        TYPE_4BY => {
            let v = is.get4();
            if float {
                p.push(format_args!("{}", f32::from_bits(v)));
            } else if signed {
                p.push(format_args!("{}", v as i32));
            } else {
                p.push(format_args!("{}", v));
            }
        }
        TYPE_8BY => {
            let v = is.get8();
            if float {
                p.push(format_args!("{}", f64::from_bits(v)));
            } else if signed {
                p.push(format_args!("{}", v as i64));
            } else {
                p.push(format_args!("{}", v));
            }
        }
        TYPE_ENU => p.push(format_args!("{}", read_enum_value(is, op_wire_size(insn)))),
        TYPE_BMK => {
            let v = match op_wire_size(insn) {
                1 => is.get1() as u64,
                2 => is.get2() as u64,
                4 => is.get4() as u64,
                _ => is.get8(),
            };
            p.push(format_args!("{:#x}", v));
        }
        TYPE_STR | TYPE_BST => {
            let n = is.get4();
            let bytes = is.get_bytes(n);
            let s = String::from_utf8_lossy(&bytes[..bytes.len().saturating_sub(1)]);
            p.push(format_args!("\"{}\"", s));
        }
        TYPE_WSTR => {
            let bytes = is.get4();
            let mut units = Vec::with_capacity((bytes / 2) as usize);
            for _ in 0..bytes / 2 {
                units.push(is.get2());
            }
            p.push(format_args!("\"{}\"", String::from_utf16_lossy(&units)));
        }
        TYPE_SEQ | TYPE_BSQ => {
            let mut elem_extra = extra;
            if op_type(insn) == TYPE_BSQ {
                elem_extra += 1;
            }
            let subtype = op_subtype(insn);
            if elem_needs_dheader(subtype, is.version()) {
                let _ = is.get4();
            }
            let n = is.get4();
            print_elems(p, is, ops, idx, elem_extra, subtype, n);
        }
        TYPE_ARR => {
            let subtype = op_subtype(insn);
            if elem_needs_dheader(subtype, is.version()) {
                let _ = is.get4();
            }
            print_elems(p, is, ops, idx, extra + 1, subtype, ops[extra]);
        }
        TYPE_UNI => print_union(p, is, ops, idx),
        TYPE_STU => print_stream(p, is, ops, jump_target(idx, ops[extra] as i32)),
        TYPE_EXT => print_stream(p, is, ops, jump_target(idx, ops[extra + 1] as i32)),
        _ => p.push(format_args!("?")),
    }
}

fn print_elems(
    p: &mut Printer,
    is: &mut Istream<'_>,
    ops: &[u32],
    idx: usize,
    extra: usize,
    subtype: u32,
    count: u32,
) {
    let insn = ops[idx];
    p.push(format_args!("["));
    for i in 0..count {
        if i > 0 {
            p.push(format_args!(","));
        }
        match subtype {
            TYPE_1BY => p.push(format_args!("{}", is.get1())),
            TYPE_BLN => p.push(format_args!("{}", is.get1() != 0)),
            TYPE_2BY => p.push(format_args!("{}", is.get2())),
            TYPE_4BY => p.push(format_args!("{}", is.get4())),
            TYPE_8BY => p.push(format_args!("{}", is.get8())),
            TYPE_ENU => p.push(format_args!("{}", read_enum_value(is, op_wire_size(insn)))),
            TYPE_BMK => {
                let v = match op_wire_size(insn) {
                    1 => is.get1() as u64,
                    2 => is.get2() as u64,
                    4 => is.get4() as u64,
                    _ => is.get8(),
                };
                p.push(format_args!("{:#x}", v));
            }
            TYPE_STR | TYPE_BST => {
                let n = is.get4();
                let bytes = is.get_bytes(n);
                let s = String::from_utf8_lossy(&bytes[..bytes.len().saturating_sub(1)]);
                p.push(format_args!("\"{}\"", s));
            }
            TYPE_WSTR => {
                let bytes = is.get4();
                let mut units = Vec::with_capacity((bytes / 2) as usize);
                for _ in 0..bytes / 2 {
                    units.push(is.get2());
                }
                p.push(format_args!("\"{}\"", String::from_utf16_lossy(&units)));
            }
            TYPE_STU | TYPE_EXT => {
                print_stream(p, is, ops, jump_target(idx, ops[extra + 1] as i32));
            }
            _ => p.push(format_args!("?")),
        }
        if p.truncated {
            break;
        }
    }
    p.push(format_args!("]"));
}

fn print_union(p: &mut Printer, is: &mut Istream<'_>, ops: &[u32], idx: usize) {
    let insn = ops[idx];
    let extra = idx + adr_extra(insn);
    let subtype = op_subtype(insn);
    let disc = match subtype {
        TYPE_BLN | TYPE_1BY => is.get1() as u32,
        TYPE_2BY => is.get2() as u32,
        TYPE_ENU => read_enum_value(is, op_wire_size(insn)),
        _ => is.get4(),
    };
    p.push(format_args!("{}:", disc));
    let ncases = ops[extra] as usize;
    let table = jump_target(idx, ops[extra + 1] as i32);
    let Some(jeq) = find_case(ops, table, ncases, disc, subtype) else {
        p.push(format_args!("?"));
        return;
    };
    let case_insn = ops[jeq];
    match op_type(case_insn) {
        TYPE_1BY => p.push(format_args!("{}", is.get1())),
        TYPE_BLN => p.push(format_args!("{}", is.get1() != 0)),
        TYPE_2BY => p.push(format_args!("{}", is.get2())),
        TYPE_4BY => p.push(format_args!("{}", is.get4())),
        TYPE_8BY => p.push(format_args!("{}", is.get8())),
        TYPE_ENU => p.push(format_args!(
            "{}",
            read_enum_value(is, op_wire_size(case_insn))
        )),
        TYPE_STR | TYPE_BST => {
            let n = is.get4();
            let bytes = is.get_bytes(n);
            let s = String::from_utf8_lossy(&bytes[..bytes.len().saturating_sub(1)]);
            p.push(format_args!("\"{}\"", s));
        }
        _ => print_stream(p, is, ops, jump_target(jeq, ops[jeq + 3] as i32)),
    }
}

fn print_pl(p: &mut Printer, is: &mut Istream<'_>, ops: &[u32], first_plm: usize) {
    match is.version() {
        XcdrVersion::Xcdr2 => {
            let body = is.get4();
            let end = is.index() + body;
            let mut first = true;
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
                        let mult = [1u32, 4, 8][(lc - 5) as usize];
                        (is.index() - 4, 4 + n * mult)
                    }
                };
                if !first {
                    p.push(format_args!(","));
                }
                first = false;
                if let Some(target) = super::read::find_plm(ops, first_plm, id) {
                    is.seek(body_start);
                    p.push(format_args!("@{}:", id));
                    print_mutable_member(p, is, ops, target);
                } else {
                    p.push(format_args!("@{}:?", id));
                }
                is.seek(body_start + size);
            }
            is.seek(end);
        }
        XcdrVersion::Xcdr1 => {
            let mut first = true;
            loop {
                is.align(4);
                let (id, len) = read_xcdr1_param_header(is);
                if id == u32::MAX {
                    return;
                }
                let body_start = is.index();
                if !first {
                    p.push(format_args!(","));
                }
                first = false;
                if len > 0 {
                    if let Some(target) = super::read::find_plm(ops, first_plm, id) {
                        p.push(format_args!("@{}:", id));
                        print_mutable_member(p, is, ops, target);
                    } else {
                        p.push(format_args!("@{}:?", id));
                    }
                } else {
                    p.push(format_args!("@{}:nil", id));
                }
                is.seek(body_start + len);
            }
        }
    }
}

fn print_mutable_member(p: &mut Printer, is: &mut Istream<'_>, ops: &[u32], idx: usize) {
    let insn = ops[idx];
    if insn & FLAG_OPT != 0 {
        let extra = idx + adr_extra(insn);
        print_stream(p, is, ops, jump_target(idx, ops[extra + 1] as i32));
        return;
    }
    print_adr_value(p, is, ops, idx);
}
