//! Simulated physical memory.
use autoconf_core::bus_space::chipdep::PhysMemory;
use core::{fmt, ops::Range};
use spin::Mutex as SpinMutex;

/// The value an unpopulated address reads as. Nothing drives the data
/// lines, so they float high.
pub const OPEN_BUS: u8 = 0xff;

/// A sparse physical address space made of populated, zero-initialized
/// ranges. Reads from anywhere else return [`OPEN_BUS`]; writes there are
/// dropped.
///
/// A device "exists" for a probe routine exactly when its registers are
/// populated.
#[derive(Default)]
pub struct SimMemory {
    regions: SpinMutex<Vec<Region>>,
}

struct Region {
    base: u64,
    bytes: Vec<u8>,
}

impl Region {
    fn end(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }
}

impl SimMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Back `range` with zero-initialized storage.
    ///
    /// # Panics
    ///
    /// Panics if `range` overlaps a populated range.
    pub fn populate(&self, range: Range<u64>) {
        let mut regions = self.regions.lock();
        assert!(
            regions
                .iter()
                .all(|r| range.end <= r.base || r.end() <= range.start),
            "{range:#x?} is already populated"
        );
        log::trace!("populating {range:#x?}");
        let i = regions.partition_point(|r| r.base < range.start);
        regions.insert(
            i,
            Region {
                base: range.start,
                bytes: vec![0; (range.end - range.start) as usize],
            },
        );
    }

    pub fn is_populated(&self, pa: u64) -> bool {
        self.regions
            .lock()
            .iter()
            .any(|r| (r.base..r.end()).contains(&pa))
    }

    fn for_each_byte(&self, pa: u64, len: usize, mut f: impl FnMut(usize, Option<&mut u8>)) {
        let mut regions = self.regions.lock();
        for i in 0..len {
            let addr = pa + i as u64;
            let i_region = regions.partition_point(|r| r.end() <= addr);
            let byte = regions
                .get_mut(i_region)
                .filter(|r| r.base <= addr)
                .map(|r| &mut r.bytes[(addr - r.base) as usize]);
            f(i, byte);
        }
    }
}

impl PhysMemory for SimMemory {
    fn read(&self, pa: u64, buf: &mut [u8]) {
        self.for_each_byte(pa, buf.len(), |i, byte| {
            buf[i] = byte.map_or(OPEN_BUS, |b| *b);
        });
    }

    fn write(&self, pa: u64, data: &[u8]) {
        self.for_each_byte(pa, data.len(), |i, byte| {
            if let Some(b) = byte {
                *b = data[i];
            }
        });
    }
}

impl fmt::Debug for SimMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for r in self.regions.lock().iter() {
            list.entry(&format_args!("{:#x}..{:#x}", r.base, r.end()));
        }
        list.finish()
    }
}
