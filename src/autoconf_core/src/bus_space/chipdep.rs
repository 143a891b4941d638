//! Chip-dependent bus-space templates.
//!
//! A host bridge decides how a bus address turns into a physical address
//! and which byte lanes carry the data. [`ChipBusSpace`] implements
//! [`BusSpace`] once; the per-chip arithmetic is supplied by a [`Chipdep`].
use core::fmt;
use std::sync::Arc;

use super::{BusAddr, BusSize, BusSpace, BusSpaceHandle, MapFlags, Width};
use crate::{
    error::{MapError, UnmapError},
    extent::{Extent, ExtentFlags},
};

/// The physical memory behind a host bridge.
///
/// Implementations decide what an access to an unpopulated address does.
pub trait PhysMemory: fmt::Debug + Send + Sync {
    fn read(&self, pa: u64, buf: &mut [u8]);
    fn write(&self, pa: u64, data: &[u8]);
}

/// Address and lane translation of a host bridge.
pub trait Chipdep: fmt::Debug + Send + Sync + 'static {
    /// Read a `width`-sized value at bus address `addr` of a bus whose
    /// window starts at physical address `window`.
    fn read(&self, mem: &dyn PhysMemory, window: u64, addr: BusAddr, width: Width) -> u64;

    /// Write the low `width` bytes of `value` at bus address `addr`.
    fn write(&self, mem: &dyn PhysMemory, window: u64, addr: BusAddr, width: Width, value: u64);

    /// Whether consecutive bus addresses are consecutive in the window, so
    /// that [`MapFlags::LINEAR`] mappings can be honoured.
    fn is_dense(&self) -> bool {
        true
    }
}

fn read_le(mem: &dyn PhysMemory, pa: u64, width: Width) -> u64 {
    let mut buf = [0u8; 8];
    mem.read(pa, &mut buf[..width.bytes() as usize]);
    u64::from_le_bytes(buf)
}

fn write_le(mem: &dyn PhysMemory, pa: u64, width: Width, value: u64) {
    mem.write(pa, &value.to_le_bytes()[..width.bytes() as usize]);
}

/// Bus addresses map one-to-one onto the window.
#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

impl Chipdep for Linear {
    #[inline]
    fn read(&self, mem: &dyn PhysMemory, window: u64, addr: BusAddr, width: Width) -> u64 {
        read_le(mem, window + addr, width)
    }

    #[inline]
    fn write(&self, mem: &dyn PhysMemory, window: u64, addr: BusAddr, width: Width, value: u64) {
        write_le(mem, window + addr, width, value)
    }
}

/// Each bus address occupies `1 << shift` bytes of the window, as on
/// bridges that wire the device's address lines above the CPU's low ones.
#[derive(Debug, Clone, Copy)]
pub struct AlignStride {
    pub shift: u32,
}

impl Chipdep for AlignStride {
    fn is_dense(&self) -> bool {
        self.shift == 0
    }

    #[inline]
    fn read(&self, mem: &dyn PhysMemory, window: u64, addr: BusAddr, width: Width) -> u64 {
        read_le(mem, window + (addr << self.shift), width)
    }

    #[inline]
    fn write(&self, mem: &dyn PhysMemory, window: u64, addr: BusAddr, width: Width, value: u64) {
        write_le(mem, window + (addr << self.shift), width, value)
    }
}

/// Sparse space of the Alpha host bridges.
///
/// The bus address is shifted left by five, the transfer length minus one
/// is encoded in bits 3..5, and the data travels in the byte lanes of a
/// 32-bit longword selected by `addr & 3`.
///
/// The hardware has no 8-byte sparse transfers; attempting one panics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Swizzled;

impl Swizzled {
    /// The physical address a transfer of `width` at `addr` is issued to.
    #[inline]
    pub fn sparse_addr(window: u64, addr: BusAddr, width: Width) -> u64 {
        window + ((addr << 5) | ((width.bytes() - 1) << 3))
    }

    #[track_caller]
    fn lane_shift(addr: BusAddr, width: Width) -> u32 {
        assert!(
            width != Width::W8,
            "sparse space does not support 8-byte transfers"
        );
        (addr & 3) as u32 * 8
    }
}

impl Chipdep for Swizzled {
    fn is_dense(&self) -> bool {
        false
    }

    fn read(&self, mem: &dyn PhysMemory, window: u64, addr: BusAddr, width: Width) -> u64 {
        let shift = Self::lane_shift(addr, width);
        let longword = read_le(mem, Self::sparse_addr(window, addr, width), Width::W4);
        (longword >> shift) & width.mask()
    }

    fn write(&self, mem: &dyn PhysMemory, window: u64, addr: BusAddr, width: Width, value: u64) {
        let shift = Self::lane_shift(addr, width);
        let longword = (value & width.mask()) << shift;
        write_le(mem, Self::sparse_addr(window, addr, width), Width::W4, longword)
    }
}

/// A big-endian device behind a little-endian bridge. Values are stored
/// most significant byte first.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteSwapped;

impl Chipdep for ByteSwapped {
    fn read(&self, mem: &dyn PhysMemory, window: u64, addr: BusAddr, width: Width) -> u64 {
        let mut buf = [0u8; 8];
        let n = width.bytes() as usize;
        mem.read(window + addr, &mut buf[..n]);
        buf[..n].iter().fold(0, |acc, &b| (acc << 8) | u64::from(b))
    }

    fn write(&self, mem: &dyn PhysMemory, window: u64, addr: BusAddr, width: Width, value: u64) {
        let n = width.bytes() as usize;
        mem.write(window + addr, &value.to_be_bytes()[8 - n..]);
    }
}

/// A [`BusSpace`] built from a [`Chipdep`] and a [`PhysMemory`].
///
/// Live mappings are tracked by an [`Extent`] covering the bus addresses
/// the bridge decodes. The extent starts in boot mode and switches to heap
/// storage when [`Self::mallocok`] is called.
pub struct ChipBusSpace<C> {
    name: &'static str,
    chip: C,
    mem: Arc<dyn PhysMemory>,
    window: u64,
    extent: spin::Mutex<Extent>,
}

impl<C: Chipdep> ChipBusSpace<C> {
    /// Construct a bus space decoding the bus addresses `range`, whose
    /// window starts at physical address `window`.
    pub fn new(
        name: &'static str,
        chip: C,
        mem: Arc<dyn PhysMemory>,
        window: u64,
        range: core::ops::Range<BusAddr>,
    ) -> Self {
        Self {
            name,
            chip,
            mem,
            window,
            extent: spin::Mutex::new(Extent::new(name, range, ExtentFlags::empty())),
        }
    }

    /// Allow the extent map to use the heap from now on.
    pub fn mallocok(&self) {
        self.extent.lock().enable_heap();
    }

    /// Lock and return the extent map tracking the live mappings.
    pub fn extent(&self) -> spin::MutexGuard<'_, Extent> {
        self.extent.lock()
    }

    pub fn chip(&self) -> &C {
        &self.chip
    }
}

impl<C: Chipdep> fmt::Debug for ChipBusSpace<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChipBusSpace")
            .field("name", &self.name)
            .field("chip", &self.chip)
            .field("window", &format_args!("{:#x}", self.window))
            .finish_non_exhaustive()
    }
}

impl<C: Chipdep> BusSpace for ChipBusSpace<C> {
    fn name(&self) -> &str {
        self.name
    }

    fn map(
        &self,
        addr: BusAddr,
        size: BusSize,
        flags: MapFlags,
    ) -> Result<BusSpaceHandle, MapError> {
        if flags.contains(MapFlags::LINEAR) && !self.chip.is_dense() {
            log::debug!("{}: no linear mapping of {addr:#x}+{size:#x}", self.name);
            return Err(MapError::NotSupported);
        }
        self.extent.lock().alloc_region(addr, size)?;
        log::trace!(
            "{}: mapped {addr:#x}+{size:#x} ({flags:?})",
            self.name
        );
        Ok(BusSpaceHandle::new(addr, size))
    }

    fn unmap(&self, handle: BusSpaceHandle) -> Result<(), UnmapError> {
        self.extent
            .lock()
            .free(handle.addr(), handle.size())
            .map_err(|_| UnmapError::BadId)?;
        log::trace!(
            "{}: unmapped {:#x}+{:#x}",
            self.name,
            handle.addr(),
            handle.size()
        );
        Ok(())
    }

    fn read(&self, handle: &BusSpaceHandle, offset: BusSize, width: Width) -> u64 {
        let addr = handle.access(offset, width);
        self.chip.read(&*self.mem, self.window, addr, width)
    }

    fn write(&self, handle: &BusSpaceHandle, offset: BusSize, width: Width, value: u64) {
        let addr = handle.access(offset, width);
        self.chip
            .write(&*self.mem, self.window, addr, width, value & width.mask())
    }
}
