//! Per-frame merge target with a bump-pointer offset allocator.
//!
//! Samples are stored as `AtomicU32` bit patterns so that many workers can
//! write their disjoint ranges through a shared reference. The only critical
//! section is the offset counter; the writes themselves take no lock.

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use contracts::{FrameId, MergeTarget};
use parking_lot::Mutex;

use crate::{CoordinatorError, Result};

pub struct MergeBuffer {
    frame_id: FrameId,
    data: Box<[AtomicU32]>,
    offset: Mutex<usize>,
}

impl fmt::Debug for MergeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeBuffer")
            .field("frame_id", &self.frame_id)
            .field("capacity", &self.data.len())
            .field("offset", &self.offset())
            .finish()
    }
}

impl MergeBuffer {
    /// Zero-filled buffer holding `capacity` floats
    pub fn with_capacity(frame_id: FrameId, capacity: usize) -> Self {
        Self {
            frame_id,
            data: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            offset: Mutex::new(0),
        }
    }

    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Floats handed out so far
    #[inline]
    pub fn offset(&self) -> usize {
        *self.offset.lock()
    }

    /// Reserve `[offset, offset + size)`.
    ///
    /// A request that does not fit is rejected without moving the counter.
    pub fn allocate(&self, size: usize) -> Result<Range<usize>> {
        let mut offset = self.offset.lock();
        let start = *offset;
        let end = start
            .checked_add(size)
            .filter(|end| *end <= self.data.len())
            .ok_or(CoordinatorError::BufferOverflow {
                frame_id: self.frame_id,
                offset: start,
                requested: size,
                capacity: self.data.len(),
            })?;
        *offset = end;
        Ok(start..end)
    }

    /// Reserve a range and wrap it as a writable region
    pub fn allocate_region(self: &Arc<Self>, size: usize) -> Result<MergeRegion> {
        let range = self.allocate(size)?;
        Ok(MergeRegion {
            buffer: Arc::clone(self),
            range,
        })
    }

    /// Copy of everything written below the current offset
    pub fn snapshot(&self) -> Vec<f32> {
        let end = self.offset();
        self.data[..end]
            .iter()
            .map(|bits| f32::from_bits(bits.load(Ordering::Relaxed)))
            .collect()
    }

    fn store(&self, index: usize, value: f32) {
        self.data[index].store(value.to_bits(), Ordering::Relaxed);
    }
}

/// A reserved, exclusively owned range of a [`MergeBuffer`]
#[derive(Debug)]
pub struct MergeRegion {
    buffer: Arc<MergeBuffer>,
    range: Range<usize>,
}

impl MergeRegion {
    #[inline]
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Straight copy with no transform (primary vehicle samples)
    pub fn copy_from(&self, values: &[f32]) {
        self.write_slice(0, values);
    }
}

impl MergeTarget for MergeRegion {
    fn len(&self) -> usize {
        self.range.len()
    }

    fn write_slice(&self, start: usize, values: &[f32]) {
        let len = self.range.len();
        let end = start.saturating_add(values.len()).min(len);
        debug_assert_eq!(end - start.min(end), values.len(), "write past reserved range");
        for (i, value) in (start..end).zip(values) {
            self.buffer.store(self.range.start + i, *value);
        }
    }
}
