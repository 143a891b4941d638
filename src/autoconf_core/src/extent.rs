//! Extent maps: allocation of ranges of a numeric resource space (bus
//! addresses, port numbers).
//!
//! An extent is usable before the heap is. Until [`Extent::enable_heap`]
//! is called, region descriptors come from a fixed arena of
//! [`BOOT_REGIONS`] entries, and an allocation that would need another
//! descriptor fails with `NoSpace` instead of allocating.
use arrayvec::ArrayVec;
use core::{fmt, ops::Range};

use crate::error::{ExtentAllocError, ExtentFreeError};

/// The number of region descriptors available before the heap is.
pub const BOOT_REGIONS: usize = 16;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExtentFlags: u32 {
        /// Don't merge adjacent allocations into a single region.
        const NOCOALESCE = 1 << 0;
        /// Region descriptors may be allocated from the heap.
        const MALLOCOK = 1 << 1;
    }
}

/// An allocated range `start..end`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExRegion {
    pub start: u64,
    pub end: u64,
}

impl fmt::Debug for ExRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..{:#x}", self.start, self.end)
    }
}

#[derive(Debug)]
enum Storage {
    Boot(ArrayVec<ExRegion, BOOT_REGIONS>),
    Heap(Vec<ExRegion>),
}

impl Storage {
    fn as_slice(&self) -> &[ExRegion] {
        match self {
            Self::Boot(v) => v,
            Self::Heap(v) => v,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [ExRegion] {
        match self {
            Self::Boot(v) => v,
            Self::Heap(v) => v,
        }
    }

    /// Returns `false` if the boot arena is full.
    fn insert(&mut self, i: usize, region: ExRegion) -> bool {
        match self {
            Self::Boot(v) => v.try_insert(i, region).is_ok(),
            Self::Heap(v) => {
                v.insert(i, region);
                true
            }
        }
    }

    fn remove(&mut self, i: usize) -> ExRegion {
        match self {
            Self::Boot(v) => v.remove(i),
            Self::Heap(v) => v.remove(i),
        }
    }
}

/// An extent map.
///
/// Allocated regions are kept sorted and never overlap. Unless
/// [`ExtentFlags::NOCOALESCE`] is set, adjacent allocations are merged.
#[derive(Debug)]
pub struct Extent {
    name: &'static str,
    range: Range<u64>,
    flags: ExtentFlags,
    regions: Storage,
}

impl Extent {
    /// Construct an extent managing `range`.
    ///
    /// If `flags` contains [`ExtentFlags::MALLOCOK`], the extent uses the
    /// heap from the start.
    pub fn new(name: &'static str, range: Range<u64>, flags: ExtentFlags) -> Self {
        let regions = if flags.contains(ExtentFlags::MALLOCOK) {
            Storage::Heap(Vec::new())
        } else {
            Storage::Boot(ArrayVec::new())
        };
        Self {
            name,
            range,
            flags,
            regions,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    pub fn flags(&self) -> ExtentFlags {
        self.flags
    }

    /// The allocated regions in ascending order.
    pub fn regions(&self) -> &[ExRegion] {
        self.regions.as_slice()
    }

    /// Get a flag indicating whether `start..start + size` is entirely
    /// allocated.
    pub fn is_allocated(&self, start: u64, size: u64) -> bool {
        let Some(end) = start.checked_add(size) else {
            return false;
        };
        let regions = self.regions();
        let i = regions.partition_point(|r| r.end <= start);
        regions
            .get(i)
            .map_or(false, |r| r.start <= start && end <= r.end)
    }

    /// Switch to heap storage. Called once the kernel heap is up.
    pub fn enable_heap(&mut self) {
        if let Storage::Boot(boot) = &mut self.regions {
            let heap: Vec<ExRegion> = boot.drain(..).collect();
            self.regions = Storage::Heap(heap);
            log::debug!(
                "extent {}: switched to heap storage with {} regions",
                self.name,
                self.regions().len()
            );
        }
        self.flags.insert(ExtentFlags::MALLOCOK);
    }

    /// Allocate the specific range `start..start + size`.
    pub fn alloc_region(&mut self, start: u64, size: u64) -> Result<(), ExtentAllocError> {
        if size == 0 {
            return Err(ExtentAllocError::BadParam);
        }
        let end = start.checked_add(size).ok_or(ExtentAllocError::BadParam)?;
        if start < self.range.start || end > self.range.end {
            return Err(ExtentAllocError::OutOfRange);
        }

        let regions = self.regions();
        let i = regions.partition_point(|r| r.end <= start);
        if regions.get(i).map_or(false, |r| r.start < end) {
            return Err(ExtentAllocError::Busy);
        }

        self.insert_at(i, ExRegion { start, end })
    }

    /// Allocate `size` units aligned to `align` that don't cross a multiple
    /// of `boundary` (`0` means no boundary). The lowest fitting address is
    /// chosen and returned.
    pub fn alloc(&mut self, size: u64, align: u64, boundary: u64) -> Result<u64, ExtentAllocError> {
        if size == 0 || !align.is_power_of_two() {
            return Err(ExtentAllocError::BadParam);
        }
        if boundary != 0 && (!boundary.is_power_of_two() || boundary < size) {
            return Err(ExtentAllocError::BadParam);
        }

        let mut cursor = self.range.start;
        let gap_ends = self
            .regions()
            .iter()
            .map(|r| (r.start, r.end))
            .chain([(self.range.end, self.range.end)]);

        let mut found = None;
        for (gap_end, next_cursor) in gap_ends {
            if let Some(start) = Self::fit(cursor, gap_end, size, align, boundary) {
                found = Some(start);
                break;
            }
            cursor = next_cursor;
        }

        let start = found.ok_or(ExtentAllocError::Busy)?;
        self.alloc_region(start, size)?;
        Ok(start)
    }

    /// Find the lowest start in `lo..hi` for an allocation of the given
    /// shape.
    fn fit(lo: u64, hi: u64, size: u64, align: u64, boundary: u64) -> Option<u64> {
        let align_up = |x: u64, a: u64| x.checked_add(a - 1).map(|x| x & !(a - 1));

        let mut start = align_up(lo, align)?;
        if boundary != 0 && start / boundary != start.checked_add(size - 1)? / boundary {
            start = align_up(align_up(start + 1, boundary)?, align)?;
        }
        (start.checked_add(size)? <= hi).then_some(start)
    }

    /// Release `start..start + size`. The range may be part of a larger
    /// region, in which case the region is trimmed or split.
    pub fn free(&mut self, start: u64, size: u64) -> Result<(), ExtentFreeError> {
        if size == 0 {
            return Err(ExtentFreeError::BadParam);
        }
        let end = start.checked_add(size).ok_or(ExtentFreeError::BadParam)?;

        let regions = self.regions.as_mut_slice();
        let i = regions.partition_point(|r| r.end <= start);
        let Some(r) = regions.get_mut(i) else {
            return Err(ExtentFreeError::BadId);
        };
        if !(r.start <= start && end <= r.end) {
            return Err(ExtentFreeError::BadId);
        }

        match (r.start == start, r.end == end) {
            (true, true) => {
                self.regions.remove(i);
            }
            (true, false) => r.start = end,
            (false, true) => r.end = start,
            (false, false) => {
                let tail = ExRegion { start: end, end: r.end };
                r.end = start;
                if !self.regions.insert(i + 1, tail) {
                    self.regions.as_mut_slice()[i].end = tail.end;
                    return Err(ExtentFreeError::NoSpace);
                }
            }
        }
        Ok(())
    }

    /// Insert a region at index `i`, which must not overlap its neighbors.
    fn insert_at(&mut self, i: usize, new: ExRegion) -> Result<(), ExtentAllocError> {
        if !self.flags.contains(ExtentFlags::NOCOALESCE) {
            let regions = self.regions.as_mut_slice();
            let joins_prev = i > 0 && regions[i - 1].end == new.start;
            let joins_next = regions.get(i).map_or(false, |r| r.start == new.end);
            match (joins_prev, joins_next) {
                (true, true) => {
                    regions[i - 1].end = regions[i].end;
                    self.regions.remove(i);
                    return Ok(());
                }
                (true, false) => {
                    regions[i - 1].end = new.end;
                    return Ok(());
                }
                (false, true) => {
                    regions[i].start = new.start;
                    return Ok(());
                }
                (false, false) => {}
            }
        }

        if self.regions.insert(i, new) {
            Ok(())
        } else {
            log::warn!(
                "extent {}: out of boot region descriptors allocating {new:?}",
                self.name
            );
            Err(ExtentAllocError::NoSpace)
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "extent `{}' ({:#x} - {:#x}), flags = {:?}",
            self.name, self.range.start, self.range.end, self.flags
        )?;
        for r in self.regions() {
            writeln!(f, "     {:#x} - {:#x}", r.start, r.end)?;
        }
        Ok(())
    }
}
