// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Codec round-trip and wire-format tests: every op family through
// write -> normalize -> read, both encoding versions, both byte orders,
// plus the forward/backward compatibility behavior of appendable and
// mutable types.

#![allow(clippy::unreadable_literal)]

use hdds_cdr::codec;
use hdds_cdr::ops::*;
use hdds_cdr::{CdrDesc, CdrError, KeyDescriptor, Ostream, OstreamBe, Sequence, XcdrVersion};
use hdds_cdr::{Istream, HEAP_ALLOCATOR};
use std::mem::offset_of;

const XCDR1: XcdrVersion = XcdrVersion::Xcdr1;
const XCDR2: XcdrVersion = XcdrVersion::Xcdr2;

fn mkdesc(size: usize, align: usize, ops: &[u32]) -> CdrDesc {
    CdrDesc::new(size as u32, align as u32, ops, &[]).expect("descriptor")
}

fn mkdesc_keys(size: usize, align: usize, ops: &[u32], keys: &[KeyDescriptor]) -> CdrDesc {
    CdrDesc::new(size as u32, align as u32, ops, keys).expect("descriptor")
}

fn write_native<T>(desc: &CdrDesc, sample: &T, version: XcdrVersion) -> Vec<u8> {
    let mut os = Ostream::new(&HEAP_ALLOCATOR, version);
    unsafe {
        codec::write_sample(&mut os, sample as *const T as *const u8, desc)
            .expect("write should succeed");
    }
    os.as_slice().to_vec()
}

fn write_be<T>(desc: &CdrDesc, sample: &T, version: XcdrVersion) -> Vec<u8> {
    let mut os = OstreamBe::new(&HEAP_ALLOCATOR, version);
    unsafe {
        codec::write_sample_be(&mut os, sample as *const T as *const u8, desc)
            .expect("write should succeed");
    }
    os.0.as_slice().to_vec()
}

/// Normalize (native input) + read into a default-constructed sample.
fn decode<T: Default>(desc: &CdrDesc, bytes: &mut [u8], version: XcdrVersion) -> T {
    let actual =
        codec::normalize(bytes, false, version, desc, false).expect("normalize should succeed");
    let mut out = T::default();
    let mut is = Istream::new(&bytes[..actual as usize], version);
    unsafe { codec::read_sample(&mut is, &mut out as *mut T as *mut u8, desc) };
    out
}

fn roundtrip<T: Default + PartialEq + std::fmt::Debug>(
    desc: &CdrDesc,
    sample: &T,
    version: XcdrVersion,
) {
    let mut bytes = write_native(desc, sample, version);
    let out: T = decode(desc, &mut bytes, version);
    assert_eq!(&out, sample, "round-trip mismatch ({:?})", version);

    // byte-order coverage: big-endian wire, swapped back on (LE) hosts
    let mut be = write_be(desc, sample, version);
    let actual = codec::normalize(&mut be, cfg!(target_endian = "little"), version, desc, false)
        .expect("normalize BE should succeed");
    let mut out2 = T::default();
    let mut is = Istream::new(&be[..actual as usize], version);
    unsafe { codec::read_sample(&mut is, &mut out2 as *mut T as *mut u8, desc) };
    assert_eq!(&out2, sample, "BE round-trip mismatch ({:?})", version);
}

/**********************************************
 * Primitives (scenario S1)
 **********************************************/

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq)]
struct PrimMsg {
    a: i64,
    b: u32,
}

fn prim_ops() -> Vec<u32> {
    vec![
        OP_ADR | TYPE_8BY | FLAG_SGN,
        offset_of!(PrimMsg, a) as u32,
        OP_ADR | TYPE_4BY,
        offset_of!(PrimMsg, b) as u32,
        OP_RTS,
    ]
}

#[test]
fn test_primitive_wire_bytes_xcdr2_be() {
    let desc = mkdesc(std::mem::size_of::<PrimMsg>(), 8, &prim_ops());
    let msg = PrimMsg {
        a: 0x0123456789abcdef,
        b: 42,
    };
    let bytes = write_be(&desc, &msg, XCDR2);
    assert_eq!(
        bytes,
        [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x00, 0x00, 0x00, 0x2a]
    );
}

#[test]
fn test_primitive_roundtrip_both_versions() {
    let desc = mkdesc(std::mem::size_of::<PrimMsg>(), 8, &prim_ops());
    let msg = PrimMsg {
        a: -987654321012345,
        b: 0xdeadbeef,
    };
    roundtrip(&desc, &msg, XCDR1);
    roundtrip(&desc, &msg, XCDR2);
}

#[test]
fn test_xcdr1_vs_xcdr2_alignment_of_u64() {
    // XCDR1 aligns the i64 naturally; XCDR2 caps at 4
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct M {
        a: u32,
        b: u64,
    }
    let ops = [
        OP_ADR | TYPE_4BY,
        offset_of!(M, a) as u32,
        OP_ADR | TYPE_8BY,
        offset_of!(M, b) as u32,
        OP_RTS,
    ];
    let desc = mkdesc(std::mem::size_of::<M>(), 8, &ops);
    let m = M { a: 1, b: 2 };
    assert_eq!(write_native(&desc, &m, XCDR1).len(), 16);
    assert_eq!(write_native(&desc, &m, XCDR2).len(), 12);
    roundtrip(&desc, &m, XCDR1);
    roundtrip(&desc, &m, XCDR2);
}

#[test]
fn test_get_size_matches_written_length() {
    let desc = mkdesc(std::mem::size_of::<PrimMsg>(), 8, &prim_ops());
    let msg = PrimMsg { a: 7, b: 8 };
    for version in [XCDR1, XCDR2] {
        let bytes = write_native(&desc, &msg, version);
        let size = unsafe {
            codec::get_size_sample(&msg as *const PrimMsg as *const u8, &desc, version)
                .expect("size")
        };
        assert_eq!(size as usize, bytes.len());
    }
}

/**********************************************
 * Strings (scenario S2, UTF-8 validation)
 **********************************************/

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq)]
struct StrMsg {
    s: String,
    n: u32,
}

fn str_ops() -> Vec<u32> {
    vec![
        OP_ADR | TYPE_STR,
        offset_of!(StrMsg, s) as u32,
        OP_ADR | TYPE_4BY,
        offset_of!(StrMsg, n) as u32,
        OP_RTS,
    ]
}

#[test]
fn test_string_roundtrip() {
    let desc = mkdesc(std::mem::size_of::<StrMsg>(), 8, &str_ops());
    for s in ["", "x", "hello world", "töst中"] {
        let msg = StrMsg {
            s: s.to_string(),
            n: 17,
        };
        roundtrip(&desc, &msg, XCDR1);
        roundtrip(&desc, &msg, XCDR2);
    }
}

#[test]
fn test_bounded_string_rejected_on_write() {
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct B {
        s: String,
    }
    // string<3>: bound operand includes the NUL
    let ops = [OP_ADR | TYPE_BST, 0, 4, OP_RTS];
    let desc = mkdesc(std::mem::size_of::<B>(), 8, &ops);
    let b = B {
        s: "abcd".to_string(),
    };
    let mut os = Ostream::new(&HEAP_ALLOCATOR, XCDR2);
    let err = unsafe { codec::write_sample(&mut os, &b as *const B as *const u8, &desc) };
    assert!(matches!(err, Err(CdrError::Encoding { .. })));

    let ok = B {
        s: "abc".to_string(),
    };
    roundtrip(&desc, &ok, XCDR2);
}

#[test]
fn test_normalize_rejects_untermination_and_bad_utf8() {
    let desc = mkdesc(std::mem::size_of::<StrMsg>(), 8, &str_ops());
    let msg = StrMsg {
        s: "abc".to_string(),
        n: 1,
    };
    let good = write_native(&desc, &msg, XCDR2);

    // clobber the NUL terminator
    let mut bad = good.clone();
    bad[4 + 3] = b'x';
    assert!(codec::normalize(&mut bad, false, XCDR2, &desc, false).is_err());

    // invalid UTF-8 byte inside the string
    let mut bad = good.clone();
    bad[4] = 0xff;
    assert!(codec::normalize(&mut bad, false, XCDR2, &desc, false).is_err());

    // truncated length
    let mut bad = good;
    bad[0] = 0xf0; // huge little-endian length on LE hosts, garbage on BE
    assert!(codec::normalize(&mut bad, false, XCDR2, &desc, false).is_err());
}

#[test]
fn test_wide_string_roundtrip_and_validation() {
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct W {
        w: String,
    }
    let ops = [OP_ADR | TYPE_WSTR, 0, OP_RTS];
    let desc = mkdesc(std::mem::size_of::<W>(), 8, &ops);
    for s in ["", "wide", "päärynä", "emoji \u{1f980} pair"] {
        let w = W { w: s.to_string() };
        roundtrip(&desc, &w, XCDR1);
        roundtrip(&desc, &w, XCDR2);
    }

    // odd byte length fails validation
    let mut bad = write_native(
        &desc,
        &W {
            w: "ab".to_string(),
        },
        XCDR2,
    );
    bad[0..4].copy_from_slice(&3u32.to_ne_bytes());
    assert!(codec::normalize(&mut bad, false, XCDR2, &desc, false).is_err());

    // unpaired high surrogate fails validation
    let mut lone = Vec::new();
    lone.extend_from_slice(&2u32.to_ne_bytes());
    lone.extend_from_slice(&0xd800u16.to_ne_bytes());
    assert!(codec::normalize(&mut lone, false, XCDR2, &desc, false).is_err());
}

/**********************************************
 * Booleans (scenario S3)
 **********************************************/

#[test]
fn test_boolean_normalization_clamps() {
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct B {
        b: bool,
    }
    let ops = [OP_ADR | TYPE_BLN, 0, OP_RTS];
    let desc = mkdesc(1, 1, &ops);
    let mut wire = vec![0xffu8];
    let actual = codec::normalize(&mut wire, false, XCDR2, &desc, false).expect("normalize");
    assert_eq!(actual, 1);
    assert_eq!(wire[0], 0x01);
    let mut is = Istream::new(&wire, XCDR2);
    let mut out = B::default();
    unsafe { codec::read_sample(&mut is, &mut out as *mut B as *mut u8, &desc) };
    assert!(out.b);
}

/**********************************************
 * Enums and bitmasks
 **********************************************/

#[test]
fn test_enum_range_checks() {
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct E {
        e: u32,
    }
    let ops = [OP_ADR | TYPE_ENU | op_sz(4), 0, 3, OP_RTS];
    let desc = mkdesc(4, 4, &ops);
    roundtrip(&desc, &E { e: 3 }, XCDR2);

    let bad = E { e: 4 };
    let mut os = Ostream::new(&HEAP_ALLOCATOR, XCDR2);
    let err = unsafe { codec::write_sample(&mut os, &bad as *const E as *const u8, &desc) };
    assert!(matches!(err, Err(CdrError::Encoding { .. })));

    let mut wire = 4u32.to_ne_bytes().to_vec();
    assert!(codec::normalize(&mut wire, false, XCDR2, &desc, false).is_err());
}

#[test]
fn test_small_enum_wire_width() {
    // 2-byte wire representation of a u32-in-memory enum
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct E {
        e: u32,
        x: u8,
    }
    let ops = [
        OP_ADR | TYPE_ENU | op_sz(2),
        offset_of!(E, e) as u32,
        300,
        OP_ADR | TYPE_1BY,
        offset_of!(E, x) as u32,
        OP_RTS,
    ];
    let desc = mkdesc(std::mem::size_of::<E>(), 4, &ops);
    let e = E { e: 260, x: 9 };
    let bytes = write_native(&desc, &e, XCDR2);
    assert_eq!(bytes.len(), 3);
    roundtrip(&desc, &e, XCDR2);
}

#[test]
fn test_bitmask_checks_undefined_bits() {
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct M {
        m: u8,
    }
    let ops = [OP_ADR | TYPE_BMK | op_sz(1), 0, 0, 0x0b, OP_RTS];
    let desc = mkdesc(1, 1, &ops);
    roundtrip(&desc, &M { m: 0x0a }, XCDR2);

    let bad = M { m: 0x04 };
    let mut os = Ostream::new(&HEAP_ALLOCATOR, XCDR2);
    let err = unsafe { codec::write_sample(&mut os, &bad as *const M as *const u8, &desc) };
    assert!(matches!(err, Err(CdrError::Encoding { .. })));

    let mut wire = vec![0x04u8];
    assert!(codec::normalize(&mut wire, false, XCDR2, &desc, false).is_err());
}

/**********************************************
 * Sequences and arrays
 **********************************************/

#[repr(C)]
#[derive(Debug, Default, PartialEq)]
struct SeqMsg {
    xs: Sequence<u32>,
    ss: Sequence<String>,
}

fn seq_ops() -> Vec<u32> {
    vec![
        OP_ADR | TYPE_SEQ | as_subtype(TYPE_4BY),
        offset_of!(SeqMsg, xs) as u32,
        OP_ADR | TYPE_SEQ | as_subtype(TYPE_STR),
        offset_of!(SeqMsg, ss) as u32,
        OP_RTS,
    ]
}

#[test]
fn test_sequence_roundtrip() {
    let desc = mkdesc(std::mem::size_of::<SeqMsg>(), 8, &seq_ops());
    let msg = SeqMsg {
        xs: vec![1, 2, 3, 0xffffffff].into(),
        ss: vec!["a".to_string(), String::new(), "ccc".to_string()].into(),
    };
    roundtrip(&desc, &msg, XCDR1);
    roundtrip(&desc, &msg, XCDR2);

    let empty = SeqMsg::default();
    roundtrip(&desc, &empty, XCDR1);
    roundtrip(&desc, &empty, XCDR2);
}

#[test]
fn test_string_sequence_has_dheader_in_xcdr2() {
    let desc = mkdesc(std::mem::size_of::<SeqMsg>(), 8, &seq_ops());
    let msg = SeqMsg {
        xs: vec![5].into(),
        ss: vec!["hi".to_string()].into(),
    };
    let v2 = write_native(&desc, &msg, XCDR2);
    let v1 = write_native(&desc, &msg, XCDR1);
    // the string sequence carries a DHEADER only under XCDR2
    assert_eq!(v2.len(), v1.len() + 4);
}

#[test]
fn test_bounded_sequence_bound_enforced() {
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct B {
        xs: Sequence<u32>,
    }
    let ops = [OP_ADR | TYPE_BSQ | as_subtype(TYPE_4BY), 0, 3, OP_RTS];
    let desc = mkdesc(std::mem::size_of::<B>(), 8, &ops);
    roundtrip(&desc, &B { xs: vec![1, 2, 3].into() }, XCDR2);

    let over = B {
        xs: vec![1, 2, 3, 4].into(),
    };
    let mut os = Ostream::new(&HEAP_ALLOCATOR, XCDR2);
    let err = unsafe { codec::write_sample(&mut os, &over as *const B as *const u8, &desc) };
    assert!(matches!(err, Err(CdrError::Encoding { .. })));

    // received over-bound sequence fails validation
    let mut wire = Vec::new();
    wire.extend_from_slice(&4u32.to_ne_bytes());
    for v in [1u32, 2, 3, 4] {
        wire.extend_from_slice(&v.to_ne_bytes());
    }
    assert!(codec::normalize(&mut wire, false, XCDR1, &desc, false).is_err());
}

#[test]
fn test_array_roundtrip() {
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct A {
        a: [u16; 4],
        s: [String; 2],
    }
    let ops = [
        OP_ADR | TYPE_ARR | as_subtype(TYPE_2BY),
        offset_of!(A, a) as u32,
        4,
        OP_ADR | TYPE_ARR | as_subtype(TYPE_STR),
        offset_of!(A, s) as u32,
        2,
        OP_RTS,
    ];
    let desc = mkdesc(std::mem::size_of::<A>(), 8, &ops);
    let a = A {
        a: [10, 20, 30, 40],
        s: ["x".to_string(), "yy".to_string()],
    };
    roundtrip(&desc, &a, XCDR1);
    roundtrip(&desc, &a, XCDR2);
}

#[test]
fn test_sequence_of_nested_structs() {
    #[repr(C)]
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Inner {
        x: u16,
        y: u64,
    }
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct M {
        items: Sequence<Inner>,
    }
    let ops = [
        OP_ADR | TYPE_SEQ | as_subtype(TYPE_STU),
        offset_of!(M, items) as u32,
        pack_size_align(
            std::mem::size_of::<Inner>() as u32,
            std::mem::align_of::<Inner>() as u32,
        ),
        5, // element sub-stream at index 5
        OP_RTS,
        OP_ADR | TYPE_2BY,
        offset_of!(Inner, x) as u32,
        OP_ADR | TYPE_8BY,
        offset_of!(Inner, y) as u32,
        OP_RTS,
    ];
    let desc = mkdesc(std::mem::size_of::<M>(), 8, &ops);
    let m = M {
        items: vec![
            Inner { x: 1, y: 100 },
            Inner { x: 2, y: 200 },
            Inner { x: 3, y: 300 },
        ]
        .into(),
    };
    roundtrip(&desc, &m, XCDR1);
    roundtrip(&desc, &m, XCDR2);
}

/**********************************************
 * Nested structs
 **********************************************/

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq)]
struct Inner {
    x: u16,
    y: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq)]
struct NestedMsg {
    inner: Inner,
    n: u32,
}

fn nested_ops() -> Vec<u32> {
    vec![
        OP_ADR | TYPE_STU,
        offset_of!(NestedMsg, inner) as u32,
        6, // Inner's sub-stream at index 6
        OP_ADR | TYPE_4BY,
        offset_of!(NestedMsg, n) as u32,
        OP_RTS,
        OP_ADR | TYPE_2BY,
        offset_of!(Inner, x) as u32,
        OP_ADR | TYPE_8BY,
        offset_of!(Inner, y) as u32,
        OP_RTS,
    ]
}

#[test]
fn test_nested_struct_roundtrip() {
    let desc = mkdesc(std::mem::size_of::<NestedMsg>(), 8, &nested_ops());
    let msg = NestedMsg {
        inner: Inner { x: 7, y: u64::MAX },
        n: 3,
    };
    roundtrip(&desc, &msg, XCDR1);
    roundtrip(&desc, &msg, XCDR2);
}

#[test]
fn test_external_member_roundtrip() {
    #[repr(C)]
    #[derive(Debug, PartialEq)]
    struct M {
        boxed: Box<Inner>,
        n: u32,
    }
    impl Default for M {
        fn default() -> Self {
            M {
                boxed: Box::default(),
                n: 0,
            }
        }
    }
    let ops = [
        OP_ADR | TYPE_EXT,
        offset_of!(M, boxed) as u32,
        pack_size_align(
            std::mem::size_of::<Inner>() as u32,
            std::mem::align_of::<Inner>() as u32,
        ),
        7, // pointee sub-stream at index 7
        OP_ADR | TYPE_4BY,
        offset_of!(M, n) as u32,
        OP_RTS,
        OP_ADR | TYPE_2BY,
        offset_of!(Inner, x) as u32,
        OP_ADR | TYPE_8BY,
        offset_of!(Inner, y) as u32,
        OP_RTS,
    ];
    let desc = mkdesc(std::mem::size_of::<M>(), 8, &ops);
    let m = M {
        boxed: Box::new(Inner { x: 9, y: 10 }),
        n: 11,
    };
    roundtrip(&desc, &m, XCDR1);
    roundtrip(&desc, &m, XCDR2);
}

/**********************************************
 * Unions
 **********************************************/

#[repr(C)]
#[derive(Debug, Default, PartialEq)]
struct UMsg {
    d: u32,
    val: u64,
}

impl UMsg {
    fn with_i32(v: i32) -> UMsg {
        let mut m = UMsg { d: 1, val: 0 };
        unsafe { *(std::ptr::addr_of_mut!(m.val) as *mut i32) = v };
        m
    }
}

fn union_ops() -> Vec<u32> {
    let val_off = offset_of!(UMsg, val) as u32;
    vec![
        OP_ADR | TYPE_UNI | as_subtype(TYPE_4BY),
        offset_of!(UMsg, d) as u32,
        3, // cases
        5, // case table at index 5
        OP_RTS,
        OP_JEQ | TYPE_4BY | FLAG_SGN,
        1,
        val_off,
        0,
        OP_JEQ | TYPE_8BY,
        2,
        val_off,
        0,
        OP_JEQ | TYPE_4BY | FLAG_DEF,
        0,
        val_off,
        0,
    ]
}

#[test]
fn test_union_case_selection_roundtrip() {
    let desc = mkdesc(std::mem::size_of::<UMsg>(), 8, &union_ops());
    roundtrip(&desc, &UMsg::with_i32(-55), XCDR1);
    roundtrip(&desc, &UMsg::with_i32(-55), XCDR2);
    roundtrip(&desc, &UMsg { d: 2, val: u64::MAX / 3 }, XCDR2);
    // unlisted discriminator takes the default case
    roundtrip(&desc, &UMsg::with_i32(123).tap_disc(77), XCDR2);
}

trait TapDisc {
    fn tap_disc(self, d: u32) -> Self;
}
impl TapDisc for UMsg {
    fn tap_disc(mut self, d: u32) -> Self {
        self.d = d;
        self
    }
}

#[test]
fn test_union_without_matching_case_rejected() {
    // same union, no default case
    let val_off = offset_of!(UMsg, val) as u32;
    let ops = [
        OP_ADR | TYPE_UNI | as_subtype(TYPE_4BY),
        offset_of!(UMsg, d) as u32,
        1,
        5,
        OP_RTS,
        OP_JEQ | TYPE_4BY,
        1,
        val_off,
        0,
    ];
    let desc = mkdesc(std::mem::size_of::<UMsg>(), 8, &ops);
    let bad = UMsg { d: 9, val: 0 };
    let mut os = Ostream::new(&HEAP_ALLOCATOR, XCDR2);
    let err = unsafe { codec::write_sample(&mut os, &bad as *const UMsg as *const u8, &desc) };
    assert!(matches!(err, Err(CdrError::Encoding { .. })));

    let mut wire = Vec::new();
    wire.extend_from_slice(&9u32.to_ne_bytes());
    wire.extend_from_slice(&0u32.to_ne_bytes());
    assert!(codec::normalize(&mut wire, false, XCDR2, &desc, false).is_err());
}

/**********************************************
 * Appendable types (scenario S4)
 **********************************************/

#[repr(C)]
#[derive(Debug, Default, PartialEq)]
struct App1 {
    a: i32,
}

#[repr(C)]
#[derive(Debug, Default, PartialEq)]
struct App2 {
    a: i32,
    b: i32,
}

fn app1_ops() -> Vec<u32> {
    vec![OP_DLC, OP_ADR | TYPE_4BY | FLAG_SGN, 0, OP_RTS]
}

fn app2_ops() -> Vec<u32> {
    vec![
        OP_DLC,
        OP_ADR | TYPE_4BY | FLAG_SGN,
        offset_of!(App2, a) as u32,
        OP_ADR | TYPE_4BY | FLAG_SGN,
        offset_of!(App2, b) as u32,
        OP_RTS,
    ]
}

#[test]
fn test_appendable_wire_has_dheader() {
    let desc = mkdesc(4, 4, &app1_ops());
    let bytes = write_be(&desc, &App1 { a: 7 }, XCDR2);
    assert_eq!(bytes, [0, 0, 0, 4, 0, 0, 0, 7]);
}

#[test]
fn test_appendable_trailing_member_default() {
    // old writer, new reader: missing trailing member defaults to zero
    let w = mkdesc(4, 4, &app1_ops());
    let r = mkdesc(std::mem::size_of::<App2>(), 4, &app2_ops());
    let mut bytes = write_native(&w, &App1 { a: 7 }, XCDR2);
    let out: App2 = decode(&r, &mut bytes, XCDR2);
    assert_eq!(out, App2 { a: 7, b: 0 });
}

#[test]
fn test_appendable_surplus_skipped() {
    // new writer, old reader: surplus trailing bytes ignored
    let w = mkdesc(std::mem::size_of::<App2>(), 4, &app2_ops());
    let r = mkdesc(4, 4, &app1_ops());
    let mut bytes = write_native(&w, &App2 { a: 5, b: 13 }, XCDR2);
    let out: App1 = decode(&r, &mut bytes, XCDR2);
    assert_eq!(out, App1 { a: 5 });
}

#[test]
fn test_appendable_nested_in_final() {
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct M {
        pre: u8,
        app: App1,
    }
    let ops = [
        OP_ADR | TYPE_1BY,
        offset_of!(M, pre) as u32,
        OP_ADR | TYPE_STU,
        offset_of!(M, app) as u32,
        4, // sub-stream at index 2 + 4 = 6
        OP_RTS,
        OP_DLC,
        OP_ADR | TYPE_4BY | FLAG_SGN,
        0,
        OP_RTS,
    ];
    let desc = mkdesc(std::mem::size_of::<M>(), 4, &ops);
    let m = M {
        pre: 3,
        app: App1 { a: -4 },
    };
    roundtrip(&desc, &m, XCDR2);
}

/**********************************************
 * Mutable types (scenario S5)
 **********************************************/

#[repr(C)]
#[derive(Debug, Default, PartialEq)]
struct Mut1 {
    a: i32,
    u: i32,
}

#[repr(C)]
#[derive(Debug, Default, PartialEq)]
struct Mut2 {
    a: i32,
}

fn mut1_ops() -> Vec<u32> {
    vec![
        OP_PLC,
        OP_PLM | 5, // member ops at index 6
        1,
        OP_PLM | 6, // member ops at index 9
        99,
        OP_RTS,
        OP_ADR | TYPE_4BY | FLAG_SGN,
        offset_of!(Mut1, a) as u32,
        OP_RTS,
        OP_ADR | TYPE_4BY | FLAG_SGN,
        offset_of!(Mut1, u) as u32,
        OP_RTS,
    ]
}

fn mut2_ops() -> Vec<u32> {
    vec![
        OP_PLC,
        OP_PLM | 3, // member ops at index 4
        1,
        OP_RTS,
        OP_ADR | TYPE_4BY | FLAG_SGN,
        offset_of!(Mut2, a) as u32,
        OP_RTS,
    ]
}

#[test]
fn test_mutable_unknown_member_skipped() {
    let w = mkdesc(std::mem::size_of::<Mut1>(), 4, &mut1_ops());
    let r = mkdesc(std::mem::size_of::<Mut2>(), 4, &mut2_ops());
    for version in [XCDR1, XCDR2] {
        let mut bytes = write_native(&w, &Mut1 { a: 5, u: 13 }, version);
        let actual =
            codec::normalize(&mut bytes, false, version, &r, false).expect("skip unknown id 99");
        let mut out = Mut2::default();
        let mut is = Istream::new(&bytes[..actual as usize], version);
        unsafe { codec::read_sample(&mut is, &mut out as *mut Mut2 as *mut u8, &r) };
        assert_eq!(out, Mut2 { a: 5 });
    }
}

#[test]
fn test_mutable_missing_member_defaulted() {
    let w = mkdesc(std::mem::size_of::<Mut2>(), 4, &mut2_ops());
    let r = mkdesc(std::mem::size_of::<Mut1>(), 4, &mut1_ops());
    for version in [XCDR1, XCDR2] {
        let mut bytes = write_native(&w, &Mut2 { a: 21 }, version);
        let out: Mut1 = decode(&r, &mut bytes, version);
        assert_eq!(out, Mut1 { a: 21, u: 0 });
    }
}

#[test]
fn test_mutable_unknown_must_understand_rejected() {
    // writer marks id 99 must-understand; the narrow reader must reject
    let mut w_ops = mut1_ops();
    w_ops[3] |= PLM_FLAG_MU;
    let w = mkdesc(std::mem::size_of::<Mut1>(), 4, &w_ops);
    let r = mkdesc(std::mem::size_of::<Mut2>(), 4, &mut2_ops());
    for version in [XCDR1, XCDR2] {
        let mut bytes = write_native(&w, &Mut1 { a: 5, u: 13 }, version);
        assert!(codec::normalize(&mut bytes, false, version, &r, false).is_err());
    }
}

#[test]
fn test_mutable_roundtrip_with_string_member() {
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct M {
        a: i32,
        s: String,
    }
    let ops = [
        OP_PLC,
        OP_PLM | 5, // index 6
        1,
        OP_PLM | 6, // index 9
        2,
        OP_RTS,
        OP_ADR | TYPE_4BY | FLAG_SGN,
        offset_of!(M, a) as u32,
        OP_RTS,
        OP_ADR | TYPE_STR,
        offset_of!(M, s) as u32,
        OP_RTS,
    ];
    let desc = mkdesc(std::mem::size_of::<M>(), 8, &ops);
    let m = M {
        a: -1,
        s: "mutable".to_string(),
    };
    roundtrip(&desc, &m, XCDR1);
    roundtrip(&desc, &m, XCDR2);
}

#[test]
fn test_emheader_short_length_codes_accepted() {
    // hand-built XCDR2 parameter list using LC 2 (4 bytes) instead of the
    // NEXTINT form the writer emits
    let r = mkdesc(std::mem::size_of::<Mut2>(), 4, &mut2_ops());
    let em: u32 = (2 << 28) | 1; // LC 2, id 1
    let mut wire = Vec::new();
    wire.extend_from_slice(&8u32.to_ne_bytes()); // DHEADER
    wire.extend_from_slice(&em.to_ne_bytes());
    wire.extend_from_slice(&42i32.to_ne_bytes());
    let out: Mut2 = decode(&r, &mut wire, XCDR2);
    assert_eq!(out, Mut2 { a: 42 });
}

#[test]
fn test_emheader_length_code_5_shares_nextint() {
    // LC 5: the NEXTINT is the member's own length word (member size is
    // 4 + NEXTINT * 1); hand-built for a string member
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct M {
        s: String,
    }
    let ops = [
        OP_PLC,
        OP_PLM | 3, // member ops at index 4
        2,
        OP_RTS,
        OP_ADR | TYPE_STR,
        offset_of!(M, s) as u32,
        OP_RTS,
    ];
    let desc = mkdesc(std::mem::size_of::<M>(), 8, &ops);

    let em: u32 = (5 << 28) | 2; // LC 5, id 2
    let strlen = 3u32; // "hi\0"
    let mut wire = Vec::new();
    wire.extend_from_slice(&12u32.to_ne_bytes()); // DHEADER: em + len + "hi\0" + pad
    wire.extend_from_slice(&em.to_ne_bytes());
    wire.extend_from_slice(&strlen.to_ne_bytes());
    wire.extend_from_slice(b"hi\0\0"); // member bytes + 1 pad byte
    let out: M = decode(&desc, &mut wire, XCDR2);
    assert_eq!(out.s, "hi");
}

/**********************************************
 * Optional members
 **********************************************/

#[repr(C)]
#[derive(Debug, Default, PartialEq)]
struct OptMsg {
    o: Option<Box<u32>>,
    n: u32,
}

fn opt_ops() -> Vec<u32> {
    vec![
        OP_ADR | TYPE_EXT | FLAG_OPT,
        offset_of!(OptMsg, o) as u32,
        5, // member id
        pack_size_align(4, 4),
        8, // pointee sub-stream at index 8
        OP_ADR | TYPE_4BY,
        offset_of!(OptMsg, n) as u32,
        OP_RTS,
        OP_ADR | TYPE_4BY,
        0,
        OP_RTS,
    ]
}

#[test]
fn test_optional_present_and_absent_xcdr2() {
    let desc = mkdesc(std::mem::size_of::<OptMsg>(), 8, &opt_ops());
    let present = OptMsg {
        o: Some(Box::new(77)),
        n: 1,
    };
    let absent = OptMsg { o: None, n: 2 };
    roundtrip(&desc, &present, XCDR2);
    roundtrip(&desc, &absent, XCDR2);

    // absent members cost exactly the presence byte
    let b_abs = write_native(&desc, &absent, XCDR2);
    assert_eq!(b_abs.len(), 8); // presence + pad + n
}

#[test]
fn test_optional_xcdr1_parameter_header() {
    let desc = mkdesc(std::mem::size_of::<OptMsg>(), 8, &opt_ops());
    let present = OptMsg {
        o: Some(Box::new(0x01020304)),
        n: 9,
    };
    let absent = OptMsg { o: None, n: 10 };
    roundtrip(&desc, &present, XCDR1);
    roundtrip(&desc, &absent, XCDR1);

    // short parameter header: pid 5, length 4, then the value
    let bytes = write_be(&desc, &present, XCDR1);
    assert_eq!(&bytes[0..4], &[0x00, 0x05, 0x00, 0x04]);
    assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);

    // absent: header with length 0
    let bytes = write_be(&desc, &absent, XCDR1);
    assert_eq!(&bytes[0..4], &[0x00, 0x05, 0x00, 0x00]);
}

/**********************************************
 * Key extraction
 **********************************************/

#[repr(C)]
#[derive(Debug, Default, PartialEq)]
struct Keyed2 {
    a: u32,
    b: u16,
    payload: u64,
}

fn keyed2_desc() -> CdrDesc {
    // declaration order a, b; member ids reversed so the canonical key
    // order is b, a
    let ops = [
        OP_ADR | TYPE_4BY | FLAG_KEY,
        offset_of!(Keyed2, a) as u32,
        OP_ADR | TYPE_2BY | FLAG_KEY,
        offset_of!(Keyed2, b) as u32,
        OP_ADR | TYPE_8BY,
        offset_of!(Keyed2, payload) as u32,
        OP_RTS,
        OP_KOF | 1,
        0,
        OP_KOF | 1,
        2,
    ];
    mkdesc_keys(
        std::mem::size_of::<Keyed2>(),
        8,
        &ops,
        &[
            KeyDescriptor {
                name: "a",
                ops_offs: 7,
                member_id: 7,
            },
            KeyDescriptor {
                name: "b",
                ops_offs: 9,
                member_id: 3,
            },
        ],
    )
}

fn extract_key(desc: &CdrDesc, bytes: &[u8], version: XcdrVersion) -> Vec<u8> {
    let mut is = Istream::new(bytes, version);
    let mut os = Ostream::new(&HEAP_ALLOCATOR, XCDR2);
    codec::extract_key_from_data(&mut is, &mut os, desc).expect("extract key");
    os.as_slice().to_vec()
}

#[test]
fn test_key_canonical_order_is_member_id_order() {
    let desc = keyed2_desc();
    let sample = Keyed2 {
        a: 0xaabbccdd,
        b: 0x1122,
        payload: 5,
    };
    let mut os = Ostream::new(&HEAP_ALLOCATOR, XCDR2);
    unsafe {
        codec::write_key(
            &mut os,
            hdds_cdr::KeySerKind::Sample,
            &sample as *const Keyed2 as *const u8,
            &desc,
        )
        .expect("write key");
    }
    let key = os.as_slice();
    // b (id 3) first: 2 bytes, pad to 4, then a (id 7)
    assert_eq!(key.len(), 8);
    assert_eq!(&key[0..2], &0x1122u16.to_ne_bytes());
    assert_eq!(&key[4..8], &0xaabbccddu32.to_ne_bytes());
}

#[test]
fn test_key_extraction_canonicity_across_versions() {
    let desc = keyed2_desc();
    let sample = Keyed2 {
        a: 1,
        b: 2,
        payload: 99,
    };
    let mut os = Ostream::new(&HEAP_ALLOCATOR, XCDR2);
    unsafe {
        codec::write_key(
            &mut os,
            hdds_cdr::KeySerKind::Sample,
            &sample as *const Keyed2 as *const u8,
            &desc,
        )
        .expect("write key");
    }
    let from_sample = os.as_slice().to_vec();

    let v1 = write_native(&desc, &sample, XCDR1);
    let v2 = write_native(&desc, &sample, XCDR2);
    assert_eq!(extract_key(&desc, &v1, XCDR1), from_sample);
    assert_eq!(extract_key(&desc, &v2, XCDR2), from_sample);
}

#[test]
fn test_key_roundtrip_through_key_form() {
    let desc = keyed2_desc();
    let sample = Keyed2 {
        a: 41,
        b: 42,
        payload: 43,
    };
    let mut os = Ostream::new(&HEAP_ALLOCATOR, XCDR2);
    unsafe {
        codec::write_key(
            &mut os,
            hdds_cdr::KeySerKind::Sample,
            &sample as *const Keyed2 as *const u8,
            &desc,
        )
        .expect("write key");
    }
    let mut out = Keyed2::default();
    let mut is = Istream::new(os.as_slice(), XCDR2);
    unsafe { codec::read_key(&mut is, &mut out as *mut Keyed2 as *mut u8, &desc) };
    assert_eq!(out.a, 41);
    assert_eq!(out.b, 42);
    assert_eq!(out.payload, 0); // non-key members untouched
}

#[test]
fn test_key_flags_and_sizes() {
    let desc = keyed2_desc();
    assert_eq!(desc.keysize_xcdr2, 8);
    assert!(desc.is_fixed_key(XCDR2, false));
    assert!(desc.is_fixed_key(XCDR2, true));
}

/**********************************************
 * Normalize properties
 **********************************************/

#[test]
fn test_optimization_coherence() {
    // a non-zero check_optimize result licenses memcpy: the in-memory
    // bytes must equal the wire bytes
    #[repr(C)]
    #[derive(Debug, Default, PartialEq)]
    struct M {
        a: u32,
        b: u32,
        c: [u16; 2],
    }
    let ops = [
        OP_ADR | TYPE_4BY,
        offset_of!(M, a) as u32,
        OP_ADR | TYPE_4BY,
        offset_of!(M, b) as u32,
        OP_ADR | TYPE_ARR | as_subtype(TYPE_2BY),
        offset_of!(M, c) as u32,
        2,
        OP_RTS,
    ];
    let desc = mkdesc(std::mem::size_of::<M>(), 4, &ops);
    assert_eq!(desc.opt_size_xcdr1 as usize, std::mem::size_of::<M>());
    assert_eq!(desc.opt_size_xcdr2 as usize, std::mem::size_of::<M>());

    let m = M {
        a: 0x01020304,
        b: 0x0a0b0c0d,
        c: [0x1111, 0x2222],
    };
    for version in [XCDR1, XCDR2] {
        let wire = write_native(&desc, &m, version);
        let raw = unsafe {
            std::slice::from_raw_parts(&m as *const M as *const u8, std::mem::size_of::<M>())
        };
        assert_eq!(wire, raw);
    }
}

#[test]
fn test_normalize_is_idempotent() {
    let desc = mkdesc(std::mem::size_of::<NestedMsg>(), 8, &nested_ops());
    let msg = NestedMsg {
        inner: Inner { x: 0x1234, y: 0x0102030405060708 },
        n: 0xcafebabe,
    };
    let mut bytes = write_be(&desc, &msg, XCDR2);
    let n1 = codec::normalize(
        &mut bytes,
        cfg!(target_endian = "little"),
        XCDR2,
        &desc,
        false,
    )
    .expect("first normalize");
    let snapshot = bytes.clone();
    let n2 = codec::normalize(&mut bytes, false, XCDR2, &desc, false).expect("second normalize");
    assert_eq!(n1, n2);
    assert_eq!(snapshot, bytes);
}

#[test]
fn test_normalize_rejects_truncation() {
    let desc = mkdesc(std::mem::size_of::<PrimMsg>(), 8, &prim_ops());
    let bytes = write_native(&desc, &PrimMsg { a: 1, b: 2 }, XCDR2);
    for cut in [1, 4, 11] {
        let mut short = bytes[..cut].to_vec();
        assert!(codec::normalize(&mut short, false, XCDR2, &desc, false).is_err());
    }
}

#[test]
fn test_normalize_data_ops_level_entry() {
    let desc = mkdesc(std::mem::size_of::<PrimMsg>(), 8, &prim_ops());
    let mut bytes = write_native(&desc, &PrimMsg { a: 3, b: 4 }, XCDR2);
    let n = codec::normalize_data(&mut bytes, false, XCDR2, desc.ops()).expect("normalize_data");
    assert_eq!(n as usize, bytes.len());
}

/**********************************************
 * Printing, init/free
 **********************************************/

#[test]
fn test_print_sample_values() {
    let desc = mkdesc(std::mem::size_of::<StrMsg>(), 8, &str_ops());
    let msg = StrMsg {
        s: "log me".to_string(),
        n: 42,
    };
    let bytes = write_native(&desc, &msg, XCDR2);
    let mut is = Istream::new(&bytes, XCDR2);
    let text = codec::print_sample(&mut is, &desc, 256);
    assert_eq!(text, "{\"log me\",42}");

    let mut is = Istream::new(&bytes, XCDR2);
    let truncated = codec::print_sample(&mut is, &desc, 6);
    assert!(truncated.len() <= 9);
    assert!(truncated.ends_with("..."));
}

#[test]
fn test_init_and_free_sample() {
    let desc = mkdesc(std::mem::size_of::<SeqMsg>(), 8, &seq_ops());
    let mut block = vec![0u8; std::mem::size_of::<SeqMsg>()];
    unsafe {
        codec::init_sample(block.as_mut_ptr(), &desc);
        let msg = &mut *(block.as_mut_ptr() as *mut SeqMsg);
        assert!(msg.xs.is_empty());
        assert!(msg.ss.is_empty());
        msg.xs = vec![1, 2].into();
        msg.ss = vec!["leakcheck".to_string()].into();
        codec::free_sample(block.as_mut_ptr(), &desc);
        let msg = &*(block.as_ptr() as *const SeqMsg);
        assert!(msg.xs.is_empty());
        assert!(msg.ss.is_empty());
    }
}

/**********************************************
 * Randomized round-trips
 **********************************************/

#[test]
fn test_randomized_roundtrips() {
    let desc = mkdesc(std::mem::size_of::<SeqMsg>(), 8, &seq_ops());
    let strdesc = mkdesc(std::mem::size_of::<StrMsg>(), 8, &str_ops());
    fastrand::seed(0x5eed);
    for _ in 0..50 {
        let xs: Vec<u32> = (0..fastrand::usize(0..9)).map(|_| fastrand::u32(..)).collect();
        let ss: Vec<String> = (0..fastrand::usize(0..5))
            .map(|_| {
                (0..fastrand::usize(0..12))
                    .map(|_| fastrand::alphanumeric())
                    .collect()
            })
            .collect();
        let msg = SeqMsg {
            xs: xs.into(),
            ss: ss.into(),
        };
        roundtrip(&desc, &msg, XCDR1);
        roundtrip(&desc, &msg, XCDR2);

        let msg = StrMsg {
            s: (0..fastrand::usize(0..40)).map(|_| fastrand::char(..)).collect(),
            n: fastrand::u32(..),
        };
        roundtrip(&strdesc, &msg, XCDR1);
        roundtrip(&strdesc, &msg, XCDR2);
    }
}
