//! # Extension Protocol
//!
//! Negotiated, optional capabilities that stay out of the core
//! [`FileEngine`](crate::FileEngine) surface.
//!
//! ## Overview
//!
//! A caller asks [`supports_extension`](crate::FileEngine::supports_extension)
//! and then sends an [`ExtensionRequest`] through
//! [`extension`](crate::FileEngine::extension). Engines that do not handle a
//! request return `None`, so a minimal engine implements nothing here.
//!
//! | Extension | Request | Response |
//! |-----------|---------|----------|
//! | [`Extension::AtEnd`] | `AtEnd` | `AtEnd(bool)` |
//! | [`Extension::FastReadLine`] | `FastReadLine` | `Done` |
//! | [`Extension::Map`] | `Map(MapOptions)` | `Map(MappedRegion)` |
//! | [`Extension::UnMap`] | `UnMap(&MappedRegion)` | `Done` |
//!
//! `FastReadLine` is advertise-only: an engine that reports it overrides
//! [`read_line`](crate::FileEngine::read_line) with something faster than the
//! byte-at-a-time default.

use std::ops::Range;
use std::sync::Arc;

/// Identifier of an optional engine capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    /// Probe whether a sequential source has reached its end.
    AtEnd,
    /// `read_line` is overridden with a fast implementation.
    FastReadLine,
    /// Map a byte range into memory.
    Map,
    /// Release a mapped region.
    UnMap,
}

bitflags::bitflags! {
    /// Options for [`Extension::Map`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemoryMapFlags: u32 {
        /// Writes to the mapping must not reach the file.
        const MAP_PRIVATE = 0x0001;
    }
}

/// Payload of a [`Extension::Map`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapOptions {
    /// Byte offset of the first mapped byte.
    pub offset: u64,
    /// Number of bytes to map.
    pub size: u64,
    /// Mapping options.
    pub flags: MemoryMapFlags,
}

/// A read-only view of engine memory returned by [`Extension::Map`].
///
/// Regions keep the backing buffer alive, so they stay valid even after the
/// engine is dropped. Unmapping only tells the engine the caller is done.
#[derive(Debug, Clone)]
pub struct MappedRegion {
    data: Arc<[u8]>,
    range: Range<usize>,
}

impl MappedRegion {
    /// Create a region over `range` of `data`.
    ///
    /// Returns `None` when the range falls outside the buffer.
    pub fn new(data: Arc<[u8]>, range: Range<usize>) -> Option<Self> {
        if range.start > range.end || range.end > data.len() {
            return None;
        }
        Some(Self { data, range })
    }

    /// The mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.range.clone()]
    }

    /// Length of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// Returns `true` for a zero-length mapping.
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Byte offset of the mapping within its source.
    pub fn offset(&self) -> usize {
        self.range.start
    }

    /// Returns `true` if both regions view the same bytes of the same buffer.
    pub fn same_region(&self, other: &MappedRegion) -> bool {
        Arc::ptr_eq(&self.data, &other.data) && self.range == other.range
    }
}

/// A request sent through [`FileEngine::extension`](crate::FileEngine::extension).
#[derive(Debug, Clone)]
pub enum ExtensionRequest<'a> {
    /// See [`Extension::AtEnd`].
    AtEnd,
    /// See [`Extension::FastReadLine`].
    FastReadLine,
    /// See [`Extension::Map`].
    Map(MapOptions),
    /// See [`Extension::UnMap`].
    UnMap(&'a MappedRegion),
}

impl ExtensionRequest<'_> {
    /// The extension this request belongs to.
    pub fn extension(&self) -> Extension {
        match self {
            ExtensionRequest::AtEnd => Extension::AtEnd,
            ExtensionRequest::FastReadLine => Extension::FastReadLine,
            ExtensionRequest::Map(_) => Extension::Map,
            ExtensionRequest::UnMap(_) => Extension::UnMap,
        }
    }
}

/// The answer to a handled [`ExtensionRequest`].
#[derive(Debug, Clone)]
pub enum ExtensionResponse {
    /// The request was handled and carries no data.
    Done,
    /// Answer to [`ExtensionRequest::AtEnd`].
    AtEnd(bool),
    /// Answer to [`ExtensionRequest::Map`].
    Map(MappedRegion),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_rejects_out_of_bounds() {
        let data: Arc<[u8]> = Arc::from(&b"hello"[..]);
        assert!(MappedRegion::new(data.clone(), 0..6).is_none());
        assert!(MappedRegion::new(data, 0..5).is_some());
    }

    #[test]
    fn region_slices_its_range() {
        let data: Arc<[u8]> = Arc::from(&b"hello world"[..]);
        let region = MappedRegion::new(data, 6..11).unwrap();
        assert_eq!(region.as_slice(), b"world");
        assert_eq!(region.len(), 5);
        assert_eq!(region.offset(), 6);
    }

    #[test]
    fn same_region_needs_same_buffer() {
        let a: Arc<[u8]> = Arc::from(&b"abc"[..]);
        let b: Arc<[u8]> = Arc::from(&b"abc"[..]);
        let ra = MappedRegion::new(a.clone(), 0..3).unwrap();
        let ra2 = MappedRegion::new(a, 0..3).unwrap();
        let rb = MappedRegion::new(b, 0..3).unwrap();
        assert!(ra.same_region(&ra2));
        assert!(!ra.same_region(&rb));
    }

    #[test]
    fn request_reports_its_extension() {
        let opts = MapOptions {
            offset: 0,
            size: 1,
            flags: MemoryMapFlags::empty(),
        };
        assert_eq!(ExtensionRequest::Map(opts).extension(), Extension::Map);
        assert_eq!(ExtensionRequest::AtEnd.extension(), Extension::AtEnd);
    }
}
