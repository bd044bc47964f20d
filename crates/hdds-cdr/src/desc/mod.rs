// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type descriptor: binds an op-stream to size/alignment, the key list,
//! computed flags and optimization hints. Immutable after construction.

mod keyflags;
mod optimize;

pub use keyflags::{
    DESC_FLAG_FIXED_KEY_XCDR1, DESC_FLAG_FIXED_KEY_XCDR2, DESC_FLAG_FIXED_KEY_XCDR2_KEYHASH,
    DESC_FLAG_KEY_APPENDABLE, DESC_FLAG_KEY_MUTABLE, DESC_FLAG_KEY_NONPRIM_ARRAY,
    FIXED_KEY_MAX_SIZE,
};

use crate::error::{CdrError, CdrResult};
use crate::ops::inspect::{self, DataTypeProps, Extensibility};
use crate::ops::{self, MAX_NESTING_DEPTH, OP_ADR, OP_KOF};
use crate::stream::XcdrVersion;

/// Key member as provided by generated code: a name, the index of the
/// member's `KOF` path in the ops, and the member id that orders the
/// XCDR2 canonical key.
#[derive(Debug, Clone, Copy)]
pub struct KeyDescriptor {
    pub name: &'static str,
    pub ops_offs: u32,
    pub member_id: u32,
}

/// Resolved key entry. `path` holds the `ADR` indices from the `KOF`
/// record (intermediate aggregate members, then the key leaf); `ord` is
/// the entry's position in member-id order.
#[derive(Debug, Clone)]
pub struct DescKey {
    pub name: &'static str,
    pub member_id: u32,
    pub(crate) path: Vec<u32>,
    pub(crate) ord: u32,
}

impl DescKey {
    /// Ops index of the key leaf's `ADR`.
    #[inline]
    pub(crate) fn leaf(&self) -> u32 {
        *self.path.last().expect("key path is never empty")
    }
}

/// Immutable runtime type descriptor.
#[derive(Debug)]
pub struct CdrDesc {
    /// In-memory size of the outermost aggregate.
    pub size: u32,
    /// In-memory alignment of the outermost aggregate.
    pub align: u32,
    /// `DESC_FLAG_*` bits.
    pub flagset: u32,
    ops: Vec<u32>,
    keys_definition_order: Vec<DescKey>,
    keys_id_order: Vec<DescKey>,
    /// Non-zero iff the in-memory bytes equal the XCDR1 wire bytes.
    pub opt_size_xcdr1: u32,
    /// Non-zero iff the in-memory bytes equal the XCDR2 wire bytes.
    pub opt_size_xcdr2: u32,
    /// Worst-case key sizes; zero when the key is variable-sized.
    pub keysize_xcdr1: u32,
    pub keysize_xcdr2: u32,
    props: DataTypeProps,
    extensibility: Extensibility,
    min_xcdr_version: XcdrVersion,
    nesting_depth: u32,
}

impl CdrDesc {
    /// Builds a descriptor from generated metadata, copying the op words.
    ///
    /// Fails when the static nesting depth exceeds
    /// [`MAX_NESTING_DEPTH`] (including unboundedly recursive types) or
    /// when a key path does not resolve to `ADR` instructions; both are
    /// fatal to topic creation.
    pub fn new(size: u32, align: u32, ops: &[u32], keys: &[KeyDescriptor]) -> CdrResult<Self> {
        let nesting_depth = inspect::type_nesting_depth(ops);
        if nesting_depth > MAX_NESTING_DEPTH {
            return Err(CdrError::Contract {
                reason: format!(
                    "type nesting depth exceeds {} levels",
                    MAX_NESTING_DEPTH
                ),
            });
        }

        let mut keys_definition_order = Vec::with_capacity(keys.len());
        for kd in keys {
            keys_definition_order.push(DescKey {
                name: kd.name,
                member_id: kd.member_id,
                path: resolve_key_path(ops, kd.ops_offs)?,
                ord: 0,
            });
        }

        // Member-id order view over the same entries; `ord` backlinks the
        // definition-order entries to their canonical position.
        let mut by_id: Vec<usize> = (0..keys_definition_order.len()).collect();
        by_id.sort_by_key(|&i| keys_definition_order[i].member_id);
        for (ord, &i) in by_id.iter().enumerate() {
            keys_definition_order[i].ord = ord as u32;
        }
        let keys_id_order: Vec<DescKey> = by_id
            .iter()
            .map(|&i| keys_definition_order[i].clone())
            .collect();

        let props = inspect::data_types(ops);
        let extensibility = inspect::extensibility(ops);
        let min_xcdr_version = inspect::minimum_xcdr_version(ops);

        let mut desc = CdrDesc {
            size,
            align,
            flagset: 0,
            ops: ops.to_vec(),
            keys_definition_order,
            keys_id_order,
            opt_size_xcdr1: 0,
            opt_size_xcdr2: 0,
            keysize_xcdr1: 0,
            keysize_xcdr2: 0,
            props,
            extensibility,
            min_xcdr_version,
            nesting_depth,
        };

        desc.opt_size_xcdr1 = optimize::check_optimize(&desc, XcdrVersion::Xcdr1);
        desc.opt_size_xcdr2 = optimize::check_optimize(&desc, XcdrVersion::Xcdr2);
        let kf = keyflags::key_flags(&desc);
        desc.flagset = kf.flags;
        desc.keysize_xcdr1 = kf.keysize_xcdr1;
        desc.keysize_xcdr2 = kf.keysize_xcdr2;
        Ok(desc)
    }

    #[inline]
    pub fn ops(&self) -> &[u32] {
        &self.ops
    }

    /// Keys in declaration order (the XCDR1 key serialization order).
    #[inline]
    pub fn keys_definition_order(&self) -> &[DescKey] {
        &self.keys_definition_order
    }

    /// Keys in member-id order (the XCDR2 canonical key order).
    #[inline]
    pub fn keys_id_order(&self) -> &[DescKey] {
        &self.keys_id_order
    }

    #[inline]
    pub fn nkeys(&self) -> usize {
        self.keys_id_order.len()
    }

    #[inline]
    pub fn props(&self) -> DataTypeProps {
        self.props
    }

    #[inline]
    pub fn extensibility(&self) -> Extensibility {
        self.extensibility
    }

    #[inline]
    pub fn min_xcdr_version(&self) -> XcdrVersion {
        self.min_xcdr_version
    }

    #[inline]
    pub fn nesting_depth(&self) -> u32 {
        self.nesting_depth
    }

    /// Whether the worst-case key fits the 16-byte keyhash without MD5
    /// under the given version/form.
    pub fn is_fixed_key(&self, version: XcdrVersion, keyhash: bool) -> bool {
        let flag = match (version, keyhash) {
            (XcdrVersion::Xcdr1, _) => DESC_FLAG_FIXED_KEY_XCDR1,
            (XcdrVersion::Xcdr2, false) => DESC_FLAG_FIXED_KEY_XCDR2,
            (XcdrVersion::Xcdr2, true) => DESC_FLAG_FIXED_KEY_XCDR2_KEYHASH,
        };
        self.flagset & flag != 0
    }

    /// Registry identity: op-streams, size, align and flagset compare
    /// bitwise.
    pub fn same_type(&self, other: &CdrDesc) -> bool {
        self.size == other.size
            && self.align == other.align
            && self.flagset == other.flagset
            && self.ops == other.ops
    }
}

/// Reads a `KOF` record and checks every path element is an `ADR`.
fn resolve_key_path(ops: &[u32], ops_offs: u32) -> CdrResult<Vec<u32>> {
    let at = ops_offs as usize;
    let bad = |reason: &str| CdrError::Contract {
        reason: format!("key path at ops[{}]: {}", ops_offs, reason),
    };
    let insn = *ops.get(at).ok_or_else(|| bad("out of range"))?;
    if ops::opcode(insn) != OP_KOF {
        return Err(bad("expected KOF"));
    }
    let n = ops::kof_count(insn) as usize;
    if n == 0 || at + n >= ops.len() {
        return Err(bad("empty or truncated KOF"));
    }
    let mut path = Vec::with_capacity(n);
    for i in 0..n {
        let adr = ops[at + 1 + i];
        let target = *ops.get(adr as usize).ok_or_else(|| bad("ADR out of range"))?;
        if ops::opcode(target) != OP_ADR {
            return Err(bad("path element is not an ADR"));
        }
        path.push(adr);
    }
    Ok(path)
}
