// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-topic type binding: the registered descriptor plus everything the
//! serdata operations derive from it once, up front.
//!
//! What the original expressed as four serdata vtables ({plain CDR,
//! XCDR2} × {keyed, keyless}) is carried here as data: the preferred
//! write encoding and `has_key` drive the same behavioral differences.

use std::sync::Arc;

use crate::alloc::CdrAllocator;
use crate::ops::inspect::Extensibility;
use crate::registry::SharedDesc;
use crate::serdata::pool::{SerdataPool, SerdataPoolConfig};
use crate::serdata::{native_identifier, ops_hash, EncodingFormat};
use crate::stream::XcdrVersion;

pub struct SerType {
    type_name: String,
    desc: SharedDesc,
    encoding_format: EncodingFormat,
    write_version: XcdrVersion,
    has_key: bool,
    basehash: u32,
    pub(crate) pool: SerdataPool,
    pub(crate) allocator: Arc<dyn CdrAllocator>,
}

impl SerType {
    /// Binds a registered descriptor. `preferred_version` is raised to the
    /// descriptor's minimum encoding version when necessary.
    pub fn new(
        type_name: impl Into<String>,
        desc: SharedDesc,
        preferred_version: XcdrVersion,
        pool_config: SerdataPoolConfig,
        allocator: Arc<dyn CdrAllocator>,
    ) -> Arc<SerType> {
        let encoding_format = match desc.extensibility() {
            Extensibility::Final => EncodingFormat::Plain,
            Extensibility::Appendable => EncodingFormat::Delimited,
            Extensibility::Mutable => EncodingFormat::ParamList,
        };
        let write_version = if desc.min_xcdr_version() == XcdrVersion::Xcdr2 {
            XcdrVersion::Xcdr2
        } else {
            preferred_version
        };
        let has_key = desc.nkeys() > 0;
        let basehash = ops_hash(desc.ops());
        Arc::new(SerType {
            type_name: type_name.into(),
            desc,
            encoding_format,
            write_version,
            has_key,
            basehash,
            pool: SerdataPool::new(pool_config),
            allocator,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.type_name
    }

    #[inline]
    pub fn desc(&self) -> &crate::desc::CdrDesc {
        &self.desc
    }

    #[inline]
    pub fn encoding_format(&self) -> EncodingFormat {
        self.encoding_format
    }

    #[inline]
    pub fn write_version(&self) -> XcdrVersion {
        self.write_version
    }

    #[inline]
    pub fn has_key(&self) -> bool {
        self.has_key
    }

    #[inline]
    pub fn basehash(&self) -> u32 {
        self.basehash
    }

    /// Raw byte copies of samples of this type are valid samples (no
    /// pointers, booleans or enums): the shared-memory fast path.
    #[inline]
    pub fn is_memcpy_safe(&self) -> bool {
        self.desc.props().memcpy_safe
    }

    pub(crate) fn native_encoding_identifier(&self, version: XcdrVersion) -> u16 {
        native_identifier(version, self.encoding_format)
    }
}
