// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key flag and worst-case key size computation.
//!
//! "Fixed key" means the worst-case serialized key (ignoring actual string
//! contents — bounded strings count as variable) fits the 16-byte keyhash,
//! so the keyhash can carry the raw key bytes instead of their MD5.

use crate::desc::CdrDesc;
use crate::ops::*;
use crate::stream::{align_up, cdr_align, XcdrVersion};

/// Keyhash capacity: keys at most this large travel un-hashed.
pub const FIXED_KEY_MAX_SIZE: u32 = 16;

pub const DESC_FLAG_FIXED_KEY_XCDR1: u32 = 1 << 0;
pub const DESC_FLAG_FIXED_KEY_XCDR2: u32 = 1 << 1;
pub const DESC_FLAG_FIXED_KEY_XCDR2_KEYHASH: u32 = 1 << 2;
pub const DESC_FLAG_KEY_APPENDABLE: u32 = 1 << 3;
pub const DESC_FLAG_KEY_MUTABLE: u32 = 1 << 4;
pub const DESC_FLAG_KEY_NONPRIM_ARRAY: u32 = 1 << 5;

pub(crate) struct KeyFlags {
    pub flags: u32,
    pub keysize_xcdr1: u32,
    pub keysize_xcdr2: u32,
}

pub(crate) fn key_flags(desc: &CdrDesc) -> KeyFlags {
    let ops = desc.ops();
    let mut flags = 0u32;

    if desc.nkeys() == 0 {
        // Keyless types trivially fit every form.
        return KeyFlags {
            flags: DESC_FLAG_FIXED_KEY_XCDR1
                | DESC_FLAG_FIXED_KEY_XCDR2
                | DESC_FLAG_FIXED_KEY_XCDR2_KEYHASH,
            keysize_xcdr1: 0,
            keysize_xcdr2: 0,
        };
    }

    // Extensibility anywhere on a key path (including the outermost
    // aggregate) taints the structured key forms.
    match opcode(ops[0]) {
        OP_DLC => flags |= DESC_FLAG_KEY_APPENDABLE,
        OP_PLC => flags |= DESC_FLAG_KEY_MUTABLE,
        _ => {}
    }
    for key in desc.keys_definition_order() {
        for &adr in &key.path[..key.path.len() - 1] {
            for (base, rel) in sub_stream_offsets(ops, adr as usize) {
                let sub = jump_target(base, rel);
                match ops.get(sub).map(|w| opcode(*w)) {
                    Some(OP_DLC) => flags |= DESC_FLAG_KEY_APPENDABLE,
                    Some(OP_PLC) => flags |= DESC_FLAG_KEY_MUTABLE,
                    _ => {}
                }
            }
        }
        let leaf = key.leaf() as usize;
        if op_type(ops[leaf]) == TYPE_ARR && !is_prim_elem(op_subtype(ops[leaf])) {
            flags |= DESC_FLAG_KEY_NONPRIM_ARRAY;
        }
    }

    // Worst-case sizes per serialized order: XCDR1 keys go in declaration
    // order, XCDR2 keys in member-id order.
    let sz1 = worst_size(desc, XcdrVersion::Xcdr1, false);
    let sz2 = worst_size(desc, XcdrVersion::Xcdr2, false);
    let szkh = worst_size(desc, XcdrVersion::Xcdr2, true);

    if let Some(s) = sz1 {
        if s <= FIXED_KEY_MAX_SIZE {
            flags |= DESC_FLAG_FIXED_KEY_XCDR1;
        }
    }
    if let Some(s) = sz2 {
        if s <= FIXED_KEY_MAX_SIZE
            && flags & (DESC_FLAG_KEY_APPENDABLE | DESC_FLAG_KEY_MUTABLE) == 0
        {
            flags |= DESC_FLAG_FIXED_KEY_XCDR2;
        }
    }
    if let Some(s) = szkh {
        if s <= FIXED_KEY_MAX_SIZE {
            flags |= DESC_FLAG_FIXED_KEY_XCDR2_KEYHASH;
        }
    }

    KeyFlags {
        flags,
        keysize_xcdr1: sz1.unwrap_or(0),
        keysize_xcdr2: sz2.unwrap_or(0),
    }
}

fn is_prim_elem(subtype: u32) -> bool {
    matches!(
        subtype,
        TYPE_1BY | TYPE_2BY | TYPE_4BY | TYPE_8BY | TYPE_BLN
    )
}

fn worst_size(desc: &CdrDesc, version: XcdrVersion, _keyhash: bool) -> Option<u32> {
    let ops = desc.ops();
    let keys = match version {
        XcdrVersion::Xcdr1 => desc.keys_definition_order(),
        XcdrVersion::Xcdr2 => desc.keys_id_order(),
    };
    let mut off = 0u32;
    for key in keys {
        off = leaf_size(ops, key.leaf() as usize, off, version)?;
    }
    Some(off)
}

/// Worst-case serialized size contribution of one key leaf, `None` when
/// variable (strings, non-primitive arrays).
fn leaf_size(ops: &[u32], idx: usize, off: u32, version: XcdrVersion) -> Option<u32> {
    let insn = ops[idx];
    let fixed = |off: u32, n: u32| Some(align_up(off, cdr_align(n, version)) + n);
    match op_type(insn) {
        TYPE_1BY | TYPE_BLN => fixed(off, 1),
        TYPE_2BY => fixed(off, 2),
        TYPE_4BY => fixed(off, 4),
        TYPE_8BY => fixed(off, 8),
        TYPE_ENU | TYPE_BMK => fixed(off, op_wire_size(insn)),
        TYPE_ARR => {
            let count = ops[idx + adr_extra(insn)];
            match op_subtype(insn) {
                TYPE_1BY | TYPE_BLN => fixed(off, 1).map(|o| o + (count - 1)),
                TYPE_2BY => fixed(off, 2).map(|o| o + (count - 1) * 2),
                TYPE_4BY => fixed(off, 4).map(|o| o + (count - 1) * 4),
                TYPE_8BY => {
                    fixed(off, 8).map(|o| o + (count - 1) * 8)
                }
                TYPE_ENU | TYPE_BMK => {
                    let n = op_wire_size(insn);
                    fixed(off, n).map(|o| o + (count - 1) * n)
                }
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{CdrDesc, KeyDescriptor};

    fn one_key(ops: &[u32], ops_offs: u32, size: u32, align: u32) -> CdrDesc {
        CdrDesc::new(
            size,
            align,
            ops,
            &[KeyDescriptor {
                name: "k",
                ops_offs,
                member_id: 0,
            }],
        )
        .expect("descriptor")
    }

    #[test]
    fn test_u32_key_is_fixed_everywhere() {
        let ops = [
            OP_ADR | TYPE_4BY | FLAG_KEY,
            0,
            OP_RTS,
            OP_KOF | 1,
            0,
        ];
        let d = one_key(&ops, 3, 4, 4);
        assert!(d.flagset & DESC_FLAG_FIXED_KEY_XCDR1 != 0);
        assert!(d.flagset & DESC_FLAG_FIXED_KEY_XCDR2 != 0);
        assert!(d.flagset & DESC_FLAG_FIXED_KEY_XCDR2_KEYHASH != 0);
        assert_eq!(d.keysize_xcdr2, 4);
    }

    #[test]
    fn test_string_key_is_variable() {
        let ops = [
            OP_ADR | TYPE_STR | FLAG_KEY,
            0,
            OP_RTS,
            OP_KOF | 1,
            0,
        ];
        let d = one_key(&ops, 3, 24, 8, );
        assert_eq!(d.flagset & DESC_FLAG_FIXED_KEY_XCDR2, 0);
        assert_eq!(d.keysize_xcdr2, 0);
    }

    #[test]
    fn test_bounded_string_key_counts_as_variable() {
        let ops = [
            OP_ADR | TYPE_BST | FLAG_KEY,
            0,
            4, // bound incl NUL: worst case would fit 16, still variable
            OP_RTS,
            OP_KOF | 1,
            0,
        ];
        let d = one_key(&ops, 4, 24, 8);
        assert_eq!(d.flagset & DESC_FLAG_FIXED_KEY_XCDR2_KEYHASH, 0);
    }

    #[test]
    fn test_oversize_key_not_fixed() {
        // three u64 keys: 24 bytes worst case
        let ops = [
            OP_ADR | TYPE_8BY | FLAG_KEY,
            0,
            OP_ADR | TYPE_8BY | FLAG_KEY,
            8,
            OP_ADR | TYPE_8BY | FLAG_KEY,
            16,
            OP_RTS,
            OP_KOF | 1,
            0,
            OP_KOF | 1,
            2,
            OP_KOF | 1,
            4,
        ];
        let keys = [
            KeyDescriptor { name: "a", ops_offs: 7, member_id: 0 },
            KeyDescriptor { name: "b", ops_offs: 9, member_id: 1 },
            KeyDescriptor { name: "c", ops_offs: 11, member_id: 2 },
        ];
        let d = CdrDesc::new(24, 8, &ops, &keys).expect("descriptor");
        assert_eq!(d.flagset & DESC_FLAG_FIXED_KEY_XCDR2, 0);
        assert_eq!(d.keysize_xcdr2, 24);
    }

    #[test]
    fn test_xcdr1_alignment_affects_key_size() {
        // u32 then u64: XCDR1 pads to 8, XCDR2 packs at 4
        let ops = [
            OP_ADR | TYPE_4BY | FLAG_KEY,
            0,
            OP_ADR | TYPE_8BY | FLAG_KEY,
            8,
            OP_RTS,
            OP_KOF | 1,
            0,
            OP_KOF | 1,
            2,
        ];
        let keys = [
            KeyDescriptor { name: "a", ops_offs: 5, member_id: 0 },
            KeyDescriptor { name: "b", ops_offs: 7, member_id: 1 },
        ];
        let d = CdrDesc::new(16, 8, &ops, &keys).expect("descriptor");
        assert_eq!(d.keysize_xcdr1, 16);
        assert_eq!(d.keysize_xcdr2, 12);
        assert!(d.flagset & DESC_FLAG_FIXED_KEY_XCDR1 != 0);
        assert!(d.flagset & DESC_FLAG_FIXED_KEY_XCDR2 != 0);
    }

    #[test]
    fn test_key_in_appendable_scope_clears_sample_form_fixed() {
        let ops = [
            OP_DLC,
            OP_ADR | TYPE_4BY | FLAG_KEY,
            0,
            OP_RTS,
            OP_KOF | 1,
            1,
        ];
        let d = one_key(&ops, 4, 4, 4);
        assert!(d.flagset & DESC_FLAG_KEY_APPENDABLE != 0);
        assert_eq!(d.flagset & DESC_FLAG_FIXED_KEY_XCDR2, 0);
        // keyhash form flattens structure, stays fixed
        assert!(d.flagset & DESC_FLAG_FIXED_KEY_XCDR2_KEYHASH != 0);
    }
}
