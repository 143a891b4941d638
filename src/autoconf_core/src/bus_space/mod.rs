//! The bus-space indirection layer.
//!
//! Drivers never dereference device addresses. They `map` a window of a
//! [`BusSpace`] and go through the returned [`BusSpaceHandle`] for every
//! access, so the same driver body works over memory-mapped, port-mapped,
//! strided, byte-swapped, or swizzled address spaces.
use core::{fmt, sync::atomic};
use std::sync::Arc;

use crate::error::{MapError, SubregionError, UnmapError};

pub mod chipdep;

/// An address on a bus.
pub type BusAddr = u64;

/// A size or offset on a bus.
pub type BusSize = u64;

/// A shared reference to a bus space. Parents own the space and hand out
/// clones of the tag to their children.
pub type BusSpaceTag = Arc<dyn BusSpace>;

/// The width of a single bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
    W1 = 1,
    W2 = 2,
    W4 = 4,
    W8 = 8,
}

impl Width {
    /// All widths, narrowest first.
    pub const ALL: [Self; 4] = [Self::W1, Self::W2, Self::W4, Self::W8];

    /// The number of bytes moved by a transaction of this width.
    #[inline]
    pub const fn bytes(self) -> u64 {
        self as u64
    }

    /// The mask selecting the bits a transaction of this width carries.
    #[inline]
    pub const fn mask(self) -> u64 {
        match self {
            Self::W8 => u64::MAX,
            _ => (1u64 << (self.bytes() * 8)) - 1,
        }
    }
}

/// A mapped window of a bus space.
///
/// A handle is only meaningful together with the [`BusSpace`] that issued
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusSpaceHandle {
    addr: BusAddr,
    size: BusSize,
}

impl BusSpaceHandle {
    /// Construct a handle. Meant to be called by [`BusSpace`]
    /// implementations.
    #[inline]
    pub const fn new(addr: BusAddr, size: BusSize) -> Self {
        Self { addr, size }
    }

    /// The bus address of the first byte of the window.
    #[inline]
    pub const fn addr(&self) -> BusAddr {
        self.addr
    }

    /// The size of the window.
    #[inline]
    pub const fn size(&self) -> BusSize {
        self.size
    }

    /// Validate an access of `width` at `offset` and return the bus address
    /// it targets.
    ///
    /// Alignment is checked against the bus address, not the offset, so a
    /// window mapped at an odd base only admits the accesses the bus can
    /// carry.
    ///
    /// # Panics
    ///
    /// Panics if the access is misaligned for its width or leaves the
    /// window. Either is a driver bug.
    #[inline]
    #[track_caller]
    pub fn access(&self, offset: BusSize, width: Width) -> BusAddr {
        assert!(
            offset
                .checked_add(width.bytes())
                .map_or(false, |end| end <= self.size),
            "bus access at offset {offset:#x} leaves the {:#x}-byte window",
            self.size,
        );
        let addr = self.addr + offset;
        assert!(
            addr % width.bytes() == 0,
            "misaligned {}-byte bus access at {addr:#x}",
            width.bytes(),
        );
        addr
    }
}

bitflags::bitflags! {
    /// Flags for [`BusSpace::map`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        /// The window may be cached.
        const CACHEABLE = 1 << 0;
        /// The caller wants a linear (dense) mapping, one the CPU could
        /// access directly. Sparse spaces refuse it.
        const LINEAR = 1 << 1;
        /// Reads have no side effects and may be merged.
        const PREFETCHABLE = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Flags for [`BusSpace::barrier`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BarrierFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// A bus space.
///
/// The method table of a bus space never changes after construction. The
/// mutable context an implementation needs (e.g., the extent map tracking
/// live mappings) must be kept behind interior mutability.
///
/// Every access is width-exact: `read_4` issues exactly one 4-byte
/// transaction. Accesses are not cached or reordered across calls.
pub trait BusSpace: fmt::Debug + Send + Sync {
    /// The name of the space, used in diagnostics.
    fn name(&self) -> &str;

    /// Reserve the window `addr..addr + size` and return a handle for it.
    fn map(&self, addr: BusAddr, size: BusSize, flags: MapFlags)
        -> Result<BusSpaceHandle, MapError>;

    /// Release a window obtained by [`Self::map`].
    fn unmap(&self, handle: BusSpaceHandle) -> Result<(), UnmapError>;

    /// Perform a single transaction of `width` reading at `offset`.
    fn read(&self, handle: &BusSpaceHandle, offset: BusSize, width: Width) -> u64;

    /// Perform a single transaction of `width` writing `value` at `offset`.
    /// The bits of `value` above `width` are ignored.
    fn write(&self, handle: &BusSpaceHandle, offset: BusSize, width: Width, value: u64);

    /// Derive a handle for a part of an existing mapping. The result shares
    /// the parent's reservation and must not be passed to [`Self::unmap`].
    fn subregion(
        &self,
        handle: &BusSpaceHandle,
        offset: BusSize,
        size: BusSize,
    ) -> Result<BusSpaceHandle, SubregionError> {
        if size == 0 {
            return Err(SubregionError::BadParam);
        }
        match offset.checked_add(size) {
            Some(end) if end <= handle.size() => {
                Ok(BusSpaceHandle::new(handle.addr() + offset, size))
            }
            _ => Err(SubregionError::OutOfRange),
        }
    }

    /// Order the accesses before the barrier against the ones after it.
    fn barrier(&self, _handle: &BusSpaceHandle, _offset: BusSize, _len: BusSize, _flags: BarrierFlags) {
        atomic::fence(atomic::Ordering::SeqCst);
    }

    #[inline]
    fn read_1(&self, handle: &BusSpaceHandle, offset: BusSize) -> u8 {
        self.read(handle, offset, Width::W1) as u8
    }

    #[inline]
    fn read_2(&self, handle: &BusSpaceHandle, offset: BusSize) -> u16 {
        self.read(handle, offset, Width::W2) as u16
    }

    #[inline]
    fn read_4(&self, handle: &BusSpaceHandle, offset: BusSize) -> u32 {
        self.read(handle, offset, Width::W4) as u32
    }

    #[inline]
    fn read_8(&self, handle: &BusSpaceHandle, offset: BusSize) -> u64 {
        self.read(handle, offset, Width::W8)
    }

    #[inline]
    fn write_1(&self, handle: &BusSpaceHandle, offset: BusSize, value: u8) {
        self.write(handle, offset, Width::W1, value.into())
    }

    #[inline]
    fn write_2(&self, handle: &BusSpaceHandle, offset: BusSize, value: u16) {
        self.write(handle, offset, Width::W2, value.into())
    }

    #[inline]
    fn write_4(&self, handle: &BusSpaceHandle, offset: BusSize, value: u32) {
        self.write(handle, offset, Width::W4, value.into())
    }

    #[inline]
    fn write_8(&self, handle: &BusSpaceHandle, offset: BusSize, value: u64) {
        self.write(handle, offset, Width::W8, value)
    }

    /// Read consecutive bytes starting at `offset`, one 1-byte transaction
    /// each.
    fn read_region_1(&self, handle: &BusSpaceHandle, offset: BusSize, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_1(handle, offset + i as BusSize);
        }
    }

    /// Write consecutive bytes starting at `offset`, one 1-byte transaction
    /// each.
    fn write_region_1(&self, handle: &BusSpaceHandle, offset: BusSize, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.write_1(handle, offset + i as BusSize, byte);
        }
    }
}
