// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The serialized-sample container ("serdata").
//!
//! A serdata ordinarily owns the guaranteed well-formed, native-endian
//! serialized representation of one sample, contiguous with its 4-byte
//! CDR header so the writer path can hand out one flat byte range. The
//! key always holds the actual key value in XCDR2 native-endian form with
//! fields in member-id order, protecting instance identity against member
//! reordering in mutable types. Zero-copy (loan) construction can leave
//! the payload empty, in which case the loan pointer carries the sample.
//!
//! Refcounting is an intrusive atomic counter behind an owning handle;
//! the last release returns small allocations to the type's pool.

mod pool;
mod sertype;

pub use pool::SerdataPoolConfig;
pub use sertype::SerType;

use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::Arc;

use md5::{Digest, Md5};

use crate::alloc::{CdrAllocator, RawBuf};
use crate::codec::{self, KeySerKind};
use crate::desc::FIXED_KEY_MAX_SIZE;
use crate::error::{CdrError, CdrResult};
use crate::loan::{Loan, LoanSampleState};
use crate::stream::{Istream, Ostream, OstreamBe, XcdrVersion};

// RTPS encapsulation identifiers (wire order: big-endian u16).
pub const CDR_BE: u16 = 0x0000;
pub const CDR_LE: u16 = 0x0001;
pub const PL_CDR_BE: u16 = 0x0002;
pub const PL_CDR_LE: u16 = 0x0003;
pub const CDR2_BE: u16 = 0x0010;
pub const CDR2_LE: u16 = 0x0011;
pub const D_CDR2_BE: u16 = 0x0012;
pub const D_CDR2_LE: u16 = 0x0013;
pub const PL_CDR2_BE: u16 = 0x0014;
pub const PL_CDR2_LE: u16 = 0x0015;
/// Pseudo-identifier for raw native samples carried by loans; never put
/// on the wire.
pub const SAMPLE_NATIVE: u16 = 0x00ff;

/// Low 2 bits of the options field: padding after the serialized payload
/// up to the next 4-byte boundary. The options field is parsed big-endian
/// regardless of the payload's byte order.
pub const CDR_HDR_PADDING_MASK: u16 = 0x3;

/// 4-byte CDR encapsulation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdrHeader {
    pub identifier: u16,
    pub options: u16,
}

impl CdrHeader {
    pub fn from_bytes(b: [u8; 4]) -> Self {
        CdrHeader {
            identifier: u16::from_be_bytes([b[0], b[1]]),
            options: u16::from_be_bytes([b[2], b[3]]),
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        let id = self.identifier.to_be_bytes();
        let opt = self.options.to_be_bytes();
        [id[0], id[1], opt[0], opt[1]]
    }

    #[inline]
    pub fn padding(self) -> u32 {
        (self.options & CDR_HDR_PADDING_MASK) as u32
    }
}

/// Serialization format implied by the type's outermost extensibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingFormat {
    Plain,
    Delimited,
    ParamList,
}

pub fn is_valid_xcdr1_id(id: u16) -> bool {
    matches!(id, CDR_BE | CDR_LE | PL_CDR_BE | PL_CDR_LE)
}

pub fn is_valid_xcdr2_id(id: u16) -> bool {
    matches!(
        id,
        CDR2_BE | CDR2_LE | D_CDR2_BE | D_CDR2_LE | PL_CDR2_BE | PL_CDR2_LE
    )
}

pub fn is_valid_xcdr_id(id: u16) -> bool {
    is_valid_xcdr1_id(id) || is_valid_xcdr2_id(id)
}

pub fn enc_version(id: u16) -> Option<XcdrVersion> {
    if is_valid_xcdr1_id(id) {
        Some(XcdrVersion::Xcdr1)
    } else if is_valid_xcdr2_id(id) {
        Some(XcdrVersion::Xcdr2)
    } else {
        None
    }
}

pub fn enc_format(id: u16) -> Option<EncodingFormat> {
    match id {
        CDR_BE | CDR_LE | CDR2_BE | CDR2_LE => Some(EncodingFormat::Plain),
        D_CDR2_BE | D_CDR2_LE => Some(EncodingFormat::Delimited),
        PL_CDR_BE | PL_CDR_LE | PL_CDR2_BE | PL_CDR2_LE => Some(EncodingFormat::ParamList),
        _ => None,
    }
}

#[inline]
fn host_is_le() -> bool {
    cfg!(target_endian = "little")
}

/// Payload bytes are in host order iff the LE bit matches the host.
pub fn enc_is_native(id: u16) -> bool {
    (id & 1 == 1) == host_is_le()
}

/// Same encoding, byte order flipped to the host's.
pub fn enc_to_native(id: u16) -> u16 {
    if host_is_le() {
        id | 1
    } else {
        id & !1
    }
}

/// Native-order identifier for a version/format pair. XCDR1 has no
/// delimited form; appendable types serialize plain there.
pub fn native_identifier(version: XcdrVersion, format: EncodingFormat) -> u16 {
    let be = match (version, format) {
        (XcdrVersion::Xcdr1, EncodingFormat::ParamList) => PL_CDR_BE,
        (XcdrVersion::Xcdr1, _) => CDR_BE,
        (XcdrVersion::Xcdr2, EncodingFormat::Plain) => CDR2_BE,
        (XcdrVersion::Xcdr2, EncodingFormat::Delimited) => D_CDR2_BE,
        (XcdrVersion::Xcdr2, EncodingFormat::ParamList) => PL_CDR2_BE,
    };
    if host_is_le() {
        be | 1
    } else {
        be
    }
}

/// 32-bit MurmurHash3; the in-memory cursor read cannot fail.
pub(crate) fn mh3(bytes: &[u8], seed: u32) -> u32 {
    murmur3::murmur3_32(&mut std::io::Cursor::new(bytes), seed)
        .expect("reading from an in-memory cursor")
}

/// Type base hash over the op words.
pub(crate) fn ops_hash(ops: &[u32]) -> u32 {
    let mut bytes = Vec::with_capacity(ops.len() * 4);
    for w in ops {
        bytes.extend_from_slice(&w.to_le_bytes());
    }
    mh3(&bytes, 0)
}

/// What the serdata carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerdataKind {
    Empty,
    Key,
    Data,
}

/// One fragment of a received RTPS payload, covering byte range
/// `[min, maxp1)` of the full serialized sample (header included).
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    pub min: u32,
    pub maxp1: u32,
    pub payload: &'a [u8],
}

/// Where the canonical key bytes live.
enum KeyBuf {
    Unset,
    /// Small keys inline; `len <= FIXED_KEY_MAX_SIZE`.
    Static {
        len: u32,
        buf: [u8; FIXED_KEY_MAX_SIZE as usize],
    },
    /// Separately allocated key.
    Dynalloc(Box<[u8]>),
    /// Aliases `[off, off+len)` of the payload body. Offsets (not
    /// pointers) keep the alias valid across payload reallocation.
    Dynalias { off: u32, len: u32 },
}

pub(crate) struct SerdataInner {
    refc: AtomicU32,
    /// Cleared while the allocation rests in the pool so pooled entries
    /// do not keep the type alive.
    stype: Option<Arc<SerType>>,
    /// False for the type-stripped form produced by `to_untyped`.
    typed: bool,
    kind: SerdataKind,
    hdr: CdrHeader,
    /// `[0..4)` CDR header bytes, `[4..4+pos)` encapsulation body.
    payload: RawBuf,
    pos: u32,
    key: KeyBuf,
    hash: u32,
    timestamp: i64,
    statusinfo: u32,
    loan: Option<Arc<Loan>>,
    allocator: Arc<dyn CdrAllocator>,
}

impl SerdataInner {
    fn empty(allocator: Arc<dyn CdrAllocator>) -> Self {
        SerdataInner {
            refc: AtomicU32::new(0),
            stype: None,
            typed: true,
            kind: SerdataKind::Empty,
            hdr: CdrHeader {
                identifier: 0,
                options: 0,
            },
            payload: RawBuf::empty(),
            pos: 0,
            key: KeyBuf::Unset,
            hash: 0,
            timestamp: 0,
            statusinfo: 0,
            loan: None,
            allocator,
        }
    }

    pub(crate) fn payload_capacity(&self) -> u32 {
        self.payload.capacity()
    }

    fn stype(&self) -> &Arc<SerType> {
        self.stype.as_ref().expect("live serdata has a type")
    }

    fn body(&self) -> &[u8] {
        if self.pos == 0 {
            &[]
        } else {
            &self.payload.slice(4 + self.pos)[4..]
        }
    }

    fn body_mut(&mut self) -> &mut [u8] {
        if self.pos == 0 {
            &mut []
        } else {
            &mut self.payload.slice_mut(4 + self.pos)[4..]
        }
    }

    /// Header plus body as one contiguous range.
    fn cdr(&self) -> &[u8] {
        self.payload.slice(4 + self.pos)
    }

    fn key_bytes(&self) -> &[u8] {
        match &self.key {
            KeyBuf::Unset => &[],
            KeyBuf::Static { len, buf } => &buf[..*len as usize],
            KeyBuf::Dynalloc(b) => b,
            KeyBuf::Dynalias { off, len } => {
                &self.payload.slice(4 + off + len)[(4 + off) as usize..]
            }
        }
    }

    fn append(&mut self, bytes: &[u8]) -> CdrResult<()> {
        let n = bytes.len() as u32;
        let needed = 4 + self.pos + n;
        let allocator = Arc::clone(&self.allocator);
        if !self.payload.reserve(&*allocator, needed) {
            return Err(CdrError::OutOfResources);
        }
        let at = (4 + self.pos) as usize;
        self.payload.slice_mut(needed)[at..].copy_from_slice(bytes);
        self.pos += n;
        Ok(())
    }

    /// Writes the header bytes into the payload prefix.
    fn store_header(&mut self) -> CdrResult<()> {
        let allocator = Arc::clone(&self.allocator);
        if !self.payload.reserve(&*allocator, 4 + self.pos) {
            return Err(CdrError::OutOfResources);
        }
        let bytes = self.hdr.to_bytes();
        self.payload.slice_mut(4)[..4].copy_from_slice(&bytes);
        Ok(())
    }

    /// Computes the instance hash once the key is in place.
    fn fix(&mut self) {
        let stype = self.stype();
        self.hash = if stype.has_key() {
            mh3(self.key_bytes(), stype.basehash())
        } else {
            stype.basehash()
        };
    }
}

impl Drop for SerdataInner {
    fn drop(&mut self) {
        let allocator = Arc::clone(&self.allocator);
        self.payload.release(&*allocator);
    }
}

/// Owning, refcounted handle to a serialized sample.
pub struct Serdata {
    inner: std::ptr::NonNull<SerdataInner>,
}

// All mutation happens before the handle is shared (or behind the
// refc == 1 check); afterwards the inner is immutable apart from the
// atomic counter.
unsafe impl Send for Serdata {}
unsafe impl Sync for Serdata {}

impl Clone for Serdata {
    fn clone(&self) -> Self {
        self.inner().refc.fetch_add(1, Ordering::Relaxed);
        Serdata { inner: self.inner }
    }
}

impl Drop for Serdata {
    fn drop(&mut self) {
        if self.inner().refc.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        let mut b = unsafe { Box::from_raw(self.inner.as_ptr()) };
        // detach everything that must not survive in the pool
        b.loan = None;
        b.key = KeyBuf::Unset;
        if let Some(stype) = b.stype.take() {
            stype.pool.put(b);
        }
    }
}

impl Serdata {
    fn from_box(b: Box<SerdataInner>) -> Serdata {
        debug_assert_eq!(b.refc.load(Ordering::Relaxed), 1);
        Serdata {
            inner: std::ptr::NonNull::from(Box::leak(b)),
        }
    }

    fn inner(&self) -> &SerdataInner {
        unsafe { self.inner.as_ref() }
    }

    fn inner_mut(&mut self) -> &mut SerdataInner {
        debug_assert_eq!(self.refcount(), 1, "serdata is uniquely held");
        unsafe { self.inner.as_mut() }
    }

    fn new_inner(
        stype: &Arc<SerType>,
        kind: SerdataKind,
        version: Option<XcdrVersion>,
    ) -> Box<SerdataInner> {
        let mut b = stype
            .pool
            .get()
            .unwrap_or_else(|| Box::new(SerdataInner::empty(Arc::clone(&stype.allocator))));
        b.refc.store(1, Ordering::Relaxed);
        b.stype = Some(Arc::clone(stype));
        b.typed = true;
        b.kind = kind;
        b.hdr = CdrHeader {
            identifier: version.map_or(0, |v| stype.native_encoding_identifier(v)),
            options: 0,
        };
        b.pos = 0;
        b.key = KeyBuf::Unset;
        b.hash = 0;
        b.timestamp = 0;
        b.statusinfo = 0;
        b.loan = None;
        b
    }

    // Construction.

    /// Serializes a user sample.
    ///
    /// # Safety
    ///
    /// `sample` must point to a valid sample of the type's descriptor.
    pub unsafe fn from_sample(
        stype: &Arc<SerType>,
        kind: SerdataKind,
        sample: *const u8,
    ) -> CdrResult<Serdata> {
        let version = stype.write_version();
        let mut inner = Self::new_inner(stype, kind, Some(version));
        let desc = stype.desc();

        let buf = std::mem::replace(&mut inner.payload, RawBuf::empty());
        let mut os = Ostream::from_raw(&*stype.allocator, buf, version, 4);
        let write_result = match kind {
            SerdataKind::Empty => Ok(()),
            SerdataKind::Key => codec::write_key(&mut os, KeySerKind::Sample, sample, desc),
            SerdataKind::Data => codec::write_sample(&mut os, sample, desc),
        };
        // the stream owns the buffer on the error path and frees it
        write_result?;
        let pad = os.align4_clear_resize()?;
        let (buf, body) = os.into_raw();
        inner.payload = buf;
        inner.pos = body;
        inner.hdr.options = pad as u16;
        inner.store_header()?;

        match kind {
            SerdataKind::Empty => {
                inner.key = KeyBuf::Static {
                    len: 0,
                    buf: [0; FIXED_KEY_MAX_SIZE as usize],
                };
            }
            SerdataKind::Key if version == XcdrVersion::Xcdr2 => {
                // the payload already is the XCDR2 canonical key; the
                // trailing padding is not part of it
                inner.key = KeyBuf::Dynalias {
                    off: 0,
                    len: inner.pos - pad,
                };
            }
            _ => gen_key_from_sample(stype, &mut inner, sample)?,
        }
        inner.fix();
        Ok(Serdata::from_box(inner))
    }

    /// Assembles a serdata from a received fragment chain. Fragments may
    /// overlap but must cover `[0, size)` without gaps, with the CDR
    /// header inside the first fragment.
    pub fn from_ser(
        stype: &Arc<SerType>,
        kind: SerdataKind,
        fragchain: &[Fragment<'_>],
        size: u32,
    ) -> CdrResult<Serdata> {
        let first = fragchain.first().ok_or(CdrError::Validation {
            offset: 0,
            reason: "empty fragment chain",
        })?;
        if size < 4 || first.min != 0 || first.maxp1 < 4 {
            return Err(CdrError::Validation {
                offset: 0,
                reason: "CDR header not in first fragment",
            });
        }
        let hdr = CdrHeader::from_bytes([
            first.payload[0],
            first.payload[1],
            first.payload[2],
            first.payload[3],
        ]);
        if !is_valid_xcdr_id(hdr.identifier) {
            return Err(CdrError::Contract {
                reason: format!("unknown encoding identifier {:#06x}", hdr.identifier),
            });
        }

        let mut inner = Self::new_inner(stype, kind, None);
        inner.hdr = hdr;
        let mut off = 4u32;
        for frag in fragchain {
            if frag.min > off || frag.maxp1 > size {
                return Err(CdrError::Validation {
                    offset: off,
                    reason: "fragment chain leaves a gap",
                });
            }
            if frag.maxp1 > off {
                let lo = (off - frag.min) as usize;
                let hi = (frag.maxp1 - frag.min) as usize;
                inner.append(&frag.payload[lo..hi])?;
                off = frag.maxp1;
            }
        }
        if off != size {
            return Err(CdrError::Validation {
                offset: off,
                reason: "fragment chain is incomplete",
            });
        }
        finish_from_ser(stype, inner, kind)
    }

    /// As [`Serdata::from_ser`], from a non-overlapping scatter list whose
    /// first entry starts with the CDR header.
    pub fn from_ser_iov(
        stype: &Arc<SerType>,
        kind: SerdataKind,
        iov: &[&[u8]],
        size: u32,
    ) -> CdrResult<Serdata> {
        let first = iov.first().ok_or(CdrError::Validation {
            offset: 0,
            reason: "empty scatter list",
        })?;
        if first.len() < 4 {
            return Err(CdrError::Validation {
                offset: 0,
                reason: "CDR header not in first iovec",
            });
        }
        let hdr = CdrHeader::from_bytes([first[0], first[1], first[2], first[3]]);
        if !is_valid_xcdr_id(hdr.identifier) {
            return Err(CdrError::Contract {
                reason: format!("unknown encoding identifier {:#06x}", hdr.identifier),
            });
        }
        let mut inner = Self::new_inner(stype, kind, None);
        inner.hdr = hdr;
        inner.append(&first[4..])?;
        for chunk in &iov[1..] {
            inner.append(chunk)?;
        }
        if inner.pos + 4 != size {
            return Err(CdrError::Validation {
                offset: inner.pos + 4,
                reason: "scatter list size mismatch",
            });
        }
        finish_from_ser(stype, inner, kind)
    }

    /// Reconstructs a key-only serdata from a 16-byte keyhash. Only
    /// possible when the type's worst-case keyhash is the raw key (an MD5
    /// keyhash is not invertible).
    pub fn from_keyhash(stype: &Arc<SerType>, keyhash: &[u8; 16]) -> CdrResult<Serdata> {
        if !stype.desc().is_fixed_key(XcdrVersion::Xcdr2, true) {
            return Err(CdrError::Contract {
                reason: "keyhash of a variable-size key is an MD5".into(),
            });
        }
        // big-endian XCDR1 encapsulation, zero options
        let hdr = [0u8, 0, 0, 0];
        Self::from_ser_iov(
            stype,
            SerdataKind::Key,
            &[&hdr, keyhash.as_slice()],
            4 + FIXED_KEY_MAX_SIZE,
        )
    }

    /// Builds a serdata around a writer loan. When no serialized
    /// representation will be needed (all peers reachable through shared
    /// memory and the type memcpy-safe), only the key is extracted.
    /// Takes over the caller's loan reference.
    ///
    /// # Safety
    ///
    /// `sample` must be the loan's sample pointer, valid for the type.
    pub unsafe fn from_loaned_sample(
        stype: &Arc<SerType>,
        kind: SerdataKind,
        sample: *const u8,
        loan: Arc<Loan>,
        will_require_cdr: bool,
    ) -> CdrResult<Serdata> {
        debug_assert_eq!(loan.sample_ptr() as *const u8, sample);
        debug_assert_eq!(loan.metadata().cdr_identifier, SAMPLE_NATIVE);

        let mut sd = if will_require_cdr {
            Self::from_sample(stype, kind, sample)?
        } else {
            let mut inner = Self::new_inner(stype, kind, Some(stype.write_version()));
            inner.store_header()?; // empty CDR stream
            gen_key_from_sample(stype, &mut inner, sample)?;
            inner.fix();
            Serdata::from_box(inner)
        };
        sd.inner_mut().loan = Some(loan);
        Ok(sd)
    }

    /// Builds a serdata from a shared-memory loan: raw layouts are
    /// borrowed through the loan, serialized layouts are copied and
    /// normalized.
    pub fn from_psmx(stype: &Arc<SerType>, loan: &Arc<Loan>) -> CdrResult<Serdata> {
        let md = *loan.metadata();
        let kind = match md.sample_state {
            LoanSampleState::RawKey | LoanSampleState::SerializedKey => SerdataKind::Key,
            LoanSampleState::RawData | LoanSampleState::SerializedData => SerdataKind::Data,
            LoanSampleState::Uninitialized => {
                return Err(CdrError::Validation {
                    offset: 0,
                    reason: "loan sample state uninitialized",
                })
            }
        };
        let version = if md.cdr_identifier == SAMPLE_NATIVE {
            None
        } else {
            Some(enc_version(md.cdr_identifier).ok_or(CdrError::Validation {
                offset: 0,
                reason: "loan carries an unknown encoding identifier",
            })?)
        };

        let mut inner = Self::new_inner(stype, kind, version);
        inner.statusinfo = md.statusinfo;
        inner.timestamp = md.timestamp;
        inner.hdr.options = md.cdr_options;

        match md.sample_state {
            LoanSampleState::RawKey | LoanSampleState::RawData => {
                if md.cdr_identifier != SAMPLE_NATIVE {
                    return Err(CdrError::Validation {
                        offset: 0,
                        reason: "raw loan with a serialized identifier",
                    });
                }
                inner.hdr.identifier = SAMPLE_NATIVE;
                inner.store_header()?;
                inner.loan = Some(Arc::clone(loan));
                // the loan contract guarantees the sample memory
                unsafe { gen_key_from_sample(stype, &mut inner, loan.sample_ptr())? };
            }
            LoanSampleState::SerializedKey | LoanSampleState::SerializedData => {
                let Some(version) = version else {
                    return Err(CdrError::Validation {
                        offset: 0,
                        reason: "serialized loan without an encoding version",
                    });
                };
                let just_key = md.sample_state == LoanSampleState::SerializedKey;
                let bytes = unsafe {
                    std::slice::from_raw_parts(loan.sample_ptr(), md.sample_size as usize)
                };
                inner.append(bytes)?;
                inner.hdr.identifier = enc_to_native(md.cdr_identifier);
                inner.store_header()?;
                let actual = codec::normalize(
                    inner.body_mut(),
                    !enc_is_native(md.cdr_identifier),
                    version,
                    stype.desc(),
                    just_key,
                )?;
                gen_key_from_cdr(stype, &mut inner, just_key, actual, version)?;
            }
            LoanSampleState::Uninitialized => unreachable!(),
        }
        inner.fix();
        Ok(Serdata::from_box(inner))
    }

    // Accessors.

    #[inline]
    pub fn kind(&self) -> SerdataKind {
        self.inner().kind
    }

    #[inline]
    pub fn stype(&self) -> &Arc<SerType> {
        self.inner().stype()
    }

    /// False for the type-stripped form produced by [`Serdata::to_untyped`].
    #[inline]
    pub fn is_typed(&self) -> bool {
        self.inner().typed
    }

    #[inline]
    pub fn header(&self) -> CdrHeader {
        self.inner().hdr
    }

    /// Stable instance hash: murmur3 of the canonical key bytes seeded
    /// with the type base hash (the base hash alone for keyless types).
    #[inline]
    pub fn hash(&self) -> u32 {
        self.inner().hash
    }

    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.inner().timestamp
    }

    #[inline]
    pub fn statusinfo(&self) -> u32 {
        self.inner().statusinfo
    }

    pub fn set_timestamp(&mut self, t: i64) {
        self.inner_mut().timestamp = t;
    }

    pub fn set_statusinfo(&mut self, si: u32) {
        self.inner_mut().statusinfo = si;
    }

    #[inline]
    pub fn loan(&self) -> Option<&Arc<Loan>> {
        self.inner().loan.as_ref()
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        self.inner().refc.load(Ordering::Relaxed)
    }

    /// Canonical XCDR2 key bytes.
    pub fn key_bytes(&self) -> &[u8] {
        self.inner().key_bytes()
    }

    /// Serialized size: CDR header plus payload (including its padding).
    pub fn get_size(&self) -> u32 {
        4 + self.inner().pos
    }

    /// Key equality; keyless types compare equal by definition.
    pub fn eqkey(&self, other: &Serdata) -> bool {
        if !self.inner().stype().has_key() {
            return true;
        }
        self.key_bytes() == other.key_bytes()
    }

    // Conversion.

    /// Copies serialized bytes `[off, off+buf.len())` of header+payload.
    pub fn to_ser(&self, off: u32, buf: &mut [u8]) {
        let cdr = self.inner().cdr();
        let lo = off as usize;
        buf.copy_from_slice(&cdr[lo..lo + buf.len()]);
    }

    /// Borrows serialized bytes without copying; the returned guard keeps
    /// this serdata alive (release it by dropping — `to_ser_unref`).
    pub fn to_ser_ref(&self, off: u32, size: u32) -> SerdataCdrRef {
        debug_assert!(off + size <= self.get_size());
        SerdataCdrRef {
            serdata: self.clone(),
            off,
            len: size,
        }
    }

    /// Deserializes into a user sample; memcpy-safe raw loans skip the
    /// codec entirely.
    ///
    /// # Safety
    ///
    /// `sample` must point to a valid (initialized) sample of the type.
    pub unsafe fn to_sample(&self, sample: *mut u8) -> CdrResult<()> {
        let inner = self.inner();
        let stype = inner.stype();
        let desc = stype.desc();

        if let Some(loan) = &inner.loan {
            if stype.is_memcpy_safe() && loan.metadata().sample_state.is_raw() {
                debug_assert_eq!(loan.metadata().cdr_identifier, SAMPLE_NATIVE);
                std::ptr::copy_nonoverlapping(
                    loan.sample_ptr(),
                    sample,
                    loan.metadata().sample_size as usize,
                );
                return Ok(());
            }
        }

        let Some(version) = enc_version(inner.hdr.identifier) else {
            return Err(CdrError::Contract {
                reason: "serdata holds no serialized representation".into(),
            });
        };
        debug_assert!(enc_is_native(inner.hdr.identifier));
        let mut is = Istream::new(inner.body(), version);
        match inner.kind {
            SerdataKind::Key => codec::read_key(&mut is, sample, desc),
            SerdataKind::Data => codec::read_sample(&mut is, sample, desc),
            SerdataKind::Empty => {
                return Err(CdrError::Contract {
                    reason: "cannot convert an empty serdata to a sample".into(),
                })
            }
        }
        Ok(())
    }

    /// Type-stripped key-only serdata for instance-handle tables: carries
    /// only the canonical key bytes and the instance hash.
    pub fn to_untyped(&self) -> CdrResult<Serdata> {
        let inner = self.inner();
        let stype = inner.stype();
        let mut nt = Self::new_inner(stype, SerdataKind::Key, Some(XcdrVersion::Xcdr2));
        nt.typed = false;
        nt.hash = inner.hash;
        nt.timestamp = i64::MIN;
        if stype.has_key() {
            let key = inner.key_bytes().to_vec();
            nt.append(&key)?;
            nt.key = KeyBuf::Dynalias {
                off: 0,
                len: key.len() as u32,
            };
        } else {
            nt.key = KeyBuf::Static {
                len: 0,
                buf: [0; FIXED_KEY_MAX_SIZE as usize],
            };
        }
        nt.store_header()?;
        Ok(Serdata::from_box(nt))
    }

    /// 16-byte instance keyhash: the raw big-endian key zero-padded when
    /// the worst-case key fits, its MD5 otherwise (or when forced).
    pub fn get_keyhash(&self, force_md5: bool) -> CdrResult<[u8; 16]> {
        let inner = self.inner();
        let stype = inner.stype();
        let desc = stype.desc();
        // keyhash form follows the data's encoding version (XTypes 7.6.8)
        let xcdrv = enc_version(inner.hdr.identifier).unwrap_or(XcdrVersion::Xcdr2);

        let mut is = Istream::new(inner.key_bytes(), XcdrVersion::Xcdr2);
        let mut os = OstreamBe::new(&*stype.allocator, xcdrv);
        codec::extract_key_from_key_be(&mut is, &mut os, KeySerKind::Keyhash, desc)?;
        let bytes = os.0.as_slice();

        let mut out = [0u8; 16];
        if force_md5 || !desc.is_fixed_key(xcdrv, true) {
            let mut md5 = Md5::new();
            md5.update(bytes);
            out.copy_from_slice(&md5.finalize());
        } else {
            out[..bytes.len()].copy_from_slice(bytes);
        }
        Ok(out)
    }

    /// Truncating pretty-printer for logs.
    pub fn print(&self, max: usize) -> String {
        let inner = self.inner();
        if let Some(loan) = &inner.loan {
            if loan.metadata().sample_state.is_raw() {
                return "[RAW]".to_string();
            }
        }
        let stype = inner.stype();
        let Some(version) = enc_version(inner.hdr.identifier) else {
            return "[RAW]".to_string();
        };
        let mut is = Istream::new(inner.body(), version);
        match inner.kind {
            SerdataKind::Key => codec::print_key(&mut is, stype.desc(), max),
            SerdataKind::Data => codec::print_sample(&mut is, stype.desc(), max),
            SerdataKind::Empty => "{}".to_string(),
        }
    }
}

/// Borrowed view of the serialized bytes; dropping releases the
/// reference taken by `to_ser_ref`.
pub struct SerdataCdrRef {
    serdata: Serdata,
    off: u32,
    len: u32,
}

impl SerdataCdrRef {
    pub fn as_bytes(&self) -> &[u8] {
        let lo = self.off as usize;
        &self.serdata.inner().cdr()[lo..lo + self.len as usize]
    }
}

// Key generation helpers.

/// Serializes the key fields of `sample` into the serdata's key buffer
/// (XCDR2 canonical form; inline when the type has a fixed key).
unsafe fn gen_key_from_sample(
    stype: &Arc<SerType>,
    inner: &mut SerdataInner,
    sample: *const u8,
) -> CdrResult<()> {
    let desc = stype.desc();
    if desc.nkeys() == 0 {
        inner.key = KeyBuf::Static {
            len: 0,
            buf: [0; FIXED_KEY_MAX_SIZE as usize],
        };
        return Ok(());
    }
    let mut os = Ostream::new(&*stype.allocator, XcdrVersion::Xcdr2);
    codec::write_key(&mut os, KeySerKind::Sample, sample, desc)?;
    set_key_from_stream(desc, inner, &os);
    Ok(())
}

/// Extracts the key from the (already normalized) payload body.
fn gen_key_from_cdr(
    stype: &Arc<SerType>,
    inner: &mut SerdataInner,
    just_key: bool,
    actual_size: u32,
    version: XcdrVersion,
) -> CdrResult<()> {
    let desc = stype.desc();
    if desc.nkeys() == 0 {
        inner.key = KeyBuf::Static {
            len: 0,
            buf: [0; FIXED_KEY_MAX_SIZE as usize],
        };
        return Ok(());
    }
    if just_key && version == XcdrVersion::Xcdr2 {
        // the body already is the canonical key
        inner.key = KeyBuf::Dynalias {
            off: 0,
            len: actual_size,
        };
        return Ok(());
    }
    let mut os = Ostream::new(&*stype.allocator, XcdrVersion::Xcdr2);
    {
        let body = inner.body();
        let mut is = Istream::new(&body[..actual_size as usize], version);
        if just_key {
            codec::extract_key_from_key(&mut is, &mut os, KeySerKind::Sample, desc)?;
        } else {
            codec::extract_key_from_data(&mut is, &mut os, desc)?;
        }
    }
    set_key_from_stream(desc, inner, &os);
    Ok(())
}

fn set_key_from_stream(desc: &crate::desc::CdrDesc, inner: &mut SerdataInner, os: &Ostream<'_>) {
    let bytes = os.as_slice();
    if desc.is_fixed_key(XcdrVersion::Xcdr2, false) && bytes.len() as u32 <= FIXED_KEY_MAX_SIZE {
        let mut buf = [0u8; FIXED_KEY_MAX_SIZE as usize];
        buf[..bytes.len()].copy_from_slice(bytes);
        inner.key = KeyBuf::Static {
            len: bytes.len() as u32,
            buf,
        };
    } else {
        inner.key = KeyBuf::Dynalloc(bytes.to_vec().into_boxed_slice());
    }
}

/// Common tail of the `from_ser` constructions: validate the header
/// against the type, normalize in place, extract the key.
fn finish_from_ser(
    stype: &Arc<SerType>,
    mut inner: Box<SerdataInner>,
    kind: SerdataKind,
) -> CdrResult<Serdata> {
    let id = inner.hdr.identifier;
    if enc_format(id) != Some(stype.encoding_format()) {
        return Err(CdrError::Contract {
            reason: "encoding format does not match the type".into(),
        });
    }
    let version = enc_version(id).ok_or(CdrError::Contract {
        reason: "unknown encoding identifier".into(),
    })?;
    let needs_bswap = !enc_is_native(id);
    inner.hdr.identifier = enc_to_native(id);
    inner.store_header()?;

    let pad = inner.hdr.padding();
    if inner.pos < pad {
        return Err(CdrError::Validation {
            offset: inner.pos,
            reason: "padding exceeds payload",
        });
    }
    let body_len = inner.pos - pad;
    let actual = {
        let body = inner.body_mut();
        codec::normalize(
            &mut body[..body_len as usize],
            needs_bswap,
            version,
            stype.desc(),
            kind == SerdataKind::Key,
        )?
    };
    if let Err(e) = gen_key_from_cdr(stype, &mut inner, kind == SerdataKind::Key, actual, version)
    {
        log::debug!("[serdata] key extraction failed: {}", e);
        return Err(e);
    }
    inner.fix();
    Ok(Serdata::from_box(inner))
}
