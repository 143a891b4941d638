//! The simulated machine.
//!
//! A [`SimBoard`] is a PC-like system: CPUs and two expansion busses on the
//! main bus, an ISA bus whose UARTs exist where their registers are
//! populated, and a PCI bus enumerating the functions the board was
//! configured with. The drivers in this module configure it.
use autoconf_core::{
    attach_args::{MainbusAttachArgs, PciAttachArgs, PciId, PlatformData, RootAttachArgs},
    bus_space::{
        chipdep::{ByteSwapped, ChipBusSpace, Chipdep, Linear, Swizzled},
        BusAddr, BusSize, BusSpaceTag,
    },
    intr::InterruptTag,
};
use autoconf_kernel::cfdata::CfAttach;
use core::{fmt, ops::Range, str::FromStr};
use std::sync::Arc;

use crate::{intc::SimIntc, memory::SimMemory};

mod com;
mod cpu;
mod isa;
mod mainbus;
mod nic;
mod pci;

pub use self::{
    com::Com,
    cpu::Cpu,
    isa::Isa,
    mainbus::Mainbus,
    nic::{Ne, Wm},
    pci::Pci,
};

/// The drivers of the simulated machine.
pub static ATTACHMENTS: &[CfAttach] = &[
    CfAttach::of::<Mainbus>(),
    CfAttach::of::<Cpu>(),
    CfAttach::of::<Isa>(),
    CfAttach::of::<Pci>(),
    CfAttach::of::<Com>(),
    CfAttach::of::<Wm>(),
    CfAttach::of::<Ne>(),
];

/// A kernel configuration covering everything [`BoardConfig::default`]
/// has.
pub const GENERIC: &str = "\
mainbus0 at root

cpu*     at mainbus?
isa0     at mainbus?
pci0     at mainbus?

com0     at isa? port 0x3f8 irq 4
com1     at isa? port 0x2f8 irq 3
com*     at isa? port 0x3e8 irq 5 flags 0x1

wm*      at pci? dev ? function ?
ne*      at pci? dev ? function ?
";

/// The number of lines of the interrupt controller.
pub const NUM_IRQS: u32 = 16;

/// Where ISA I/O space appears in the physical address space.
pub const ISA_IO_WINDOW: u64 = 0x1_0000_0000;
pub const ISA_IO_RANGE: Range<BusAddr> = 0..0x1_0000;
pub const ISA_MEM_WINDOW: u64 = 0x2_0000_0000;
pub const ISA_MEM_RANGE: Range<BusAddr> = 0..0x100_0000;
/// PCI memory space is identity-mapped.
pub const PCI_MEM_WINDOW: u64 = 0;
pub const PCI_MEM_RANGE: Range<BusAddr> = 0x8000_0000..0xc000_0000;

/// How the host bridge presents ISA I/O space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Chipset {
    /// Dense, little-endian.
    #[default]
    Linear,
    /// Alpha-style sparse space.
    Sparse,
    /// Big-endian host, byte lanes swapped by the bridge.
    ByteSwapped,
}

impl Chipset {
    pub const ALL: [Self; 3] = [Self::Linear, Self::Sparse, Self::ByteSwapped];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Sparse => "sparse",
            Self::ByteSwapped => "byteswapped",
        }
    }

    /// The physical addresses that the bus addresses `range` of a space
    /// with window `window` are spread over.
    pub fn footprint(self, window: u64, range: Range<BusAddr>) -> Range<u64> {
        match self {
            Self::Linear | Self::ByteSwapped => window + range.start..window + range.end,
            Self::Sparse => window + (range.start << 5)..window + (range.end << 5),
        }
    }
}

impl fmt::Display for Chipset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chipset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown chipset '{s}'"))
    }
}

/// A function on the simulated PCI bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciFunction {
    pub device: u32,
    pub function: u32,
    pub id: PciId,
    pub class: u8,
    pub subclass: u8,
    pub mem_bar: Option<(BusAddr, BusSize)>,
    pub intr_line: Option<u32>,
}

/// What a [`SimBoard`] is populated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    pub cpus: u32,
    pub chipset: Chipset,
    pub isa: bool,
    /// The I/O port bases of the UARTs present on the ISA bus.
    pub com_ports: Vec<BusAddr>,
    pub pci: Vec<PciFunction>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            cpus: 2,
            chipset: Chipset::Linear,
            isa: true,
            com_ports: vec![0x3f8, 0x2f8],
            pci: vec![
                PciFunction {
                    device: 3,
                    function: 0,
                    id: nic::I82540EM,
                    class: nic::PCI_CLASS_NETWORK,
                    subclass: nic::PCI_SUBCLASS_NETWORK_ETHERNET,
                    mem_bar: Some((0x8000_0000, 0x2_0000)),
                    intr_line: Some(11),
                },
                PciFunction {
                    device: 4,
                    function: 0,
                    id: PciId {
                        vendor: 0x10ec,
                        product: 0x8029,
                    },
                    class: nic::PCI_CLASS_NETWORK,
                    subclass: nic::PCI_SUBCLASS_NETWORK_ETHERNET,
                    mem_bar: Some((0x8002_0000, 0x1000)),
                    intr_line: Some(10),
                },
                PciFunction {
                    device: 5,
                    function: 0,
                    id: PciId {
                        vendor: 0x1234,
                        product: 0x1111,
                    },
                    class: 0x03,
                    subclass: 0x00,
                    mem_bar: None,
                    intr_line: None,
                },
            ],
        }
    }
}

/// Error type for [`SimBoard::new`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("UART at port {0:#x} lies outside ISA I/O space")]
    ComOutOfRange(BusAddr),
    #[error("UARTs at ports {0:#x} and {1:#x} overlap")]
    ComOverlap(BusAddr, BusAddr),
    #[error("BAR of PCI function {device}.{function} lies outside PCI memory space")]
    BarOutOfRange { device: u32, function: u32 },
    #[error("BARs of PCI functions {0}.{1} and {2}.{3} overlap")]
    BarOverlap(u32, u32, u32, u32),
}

impl BoardConfig {
    /// Check that every UART and BAR fits its space and that none of them
    /// share addresses.
    pub fn validate(&self) -> Result<(), BoardError> {
        let mut ports: Vec<(BusAddr, Range<BusAddr>)> = Vec::new();
        for &port in &self.com_ports {
            let range = fit(port, com::COM_NPORTS, &ISA_IO_RANGE)
                .ok_or(BoardError::ComOutOfRange(port))?;
            if let Some(&(other, _)) = ports.iter().find(|(_, r)| overlaps(r, &range)) {
                return Err(BoardError::ComOverlap(other, port));
            }
            ports.push((port, range));
        }

        let mut bars: Vec<(&PciFunction, Range<BusAddr>)> = Vec::new();
        for f in &self.pci {
            let Some((base, size)) = f.mem_bar else {
                continue;
            };
            let range = fit(base, size, &PCI_MEM_RANGE).ok_or(BoardError::BarOutOfRange {
                device: f.device,
                function: f.function,
            })?;
            if let Some((other, _)) = bars.iter().find(|(_, r)| overlaps(r, &range)) {
                return Err(BoardError::BarOverlap(
                    other.device,
                    other.function,
                    f.device,
                    f.function,
                ));
            }
            bars.push((f, range));
        }
        Ok(())
    }
}

/// `base..base + size` if it's non-empty and within `space`.
fn fit(base: BusAddr, size: BusSize, space: &Range<BusAddr>) -> Option<Range<BusAddr>> {
    let end = base.checked_add(size)?;
    (size > 0 && space.start <= base && end <= space.end).then_some(base..end)
}

fn overlaps(a: &Range<BusAddr>, b: &Range<BusAddr>) -> bool {
    a.start < b.end && b.start < a.end
}

/// A bus space whose extent map can be moved to the heap.
trait HeapSwitch: Send + Sync {
    fn mallocok(&self);
}

impl<C: Chipdep> HeapSwitch for ChipBusSpace<C> {
    fn mallocok(&self) {
        ChipBusSpace::mallocok(self)
    }
}

/// The simulated hardware.
pub struct SimBoard {
    config: BoardConfig,
    mem: Arc<SimMemory>,
    iot: BusSpaceTag,
    memt: BusSpaceTag,
    pci_memt: BusSpaceTag,
    ic: Arc<SimIntc>,
    spaces: Vec<Arc<dyn HeapSwitch>>,
}

impl SimBoard {
    /// Build the board `config` describes.
    pub fn new(config: BoardConfig) -> Result<Arc<Self>, BoardError> {
        config.validate()?;

        let mem = Arc::new(SimMemory::new());
        let mut spaces = Vec::new();

        let iot = match config.chipset {
            Chipset::Linear => bus_space(&mut spaces, "isa_io", Linear, &mem, ISA_IO_WINDOW, ISA_IO_RANGE),
            Chipset::Sparse => {
                bus_space(&mut spaces, "isa_io", Swizzled, &mem, ISA_IO_WINDOW, ISA_IO_RANGE)
            }
            Chipset::ByteSwapped => {
                bus_space(&mut spaces, "isa_io", ByteSwapped, &mem, ISA_IO_WINDOW, ISA_IO_RANGE)
            }
        };
        let memt = bus_space(&mut spaces, "isa_mem", Linear, &mem, ISA_MEM_WINDOW, ISA_MEM_RANGE);
        let pci_memt =
            bus_space(&mut spaces, "pci_mem", Linear, &mem, PCI_MEM_WINDOW, PCI_MEM_RANGE);

        for &port in &config.com_ports {
            mem.populate(
                config
                    .chipset
                    .footprint(ISA_IO_WINDOW, port..port + com::COM_NPORTS),
            );
        }
        for (base, size) in config.pci.iter().filter_map(|f| f.mem_bar) {
            mem.populate(PCI_MEM_WINDOW + base..PCI_MEM_WINDOW + base + size);
        }

        log::debug!("board: {config:?}");
        Ok(Arc::new(Self {
            config,
            mem,
            iot,
            memt,
            pci_memt,
            ic: Arc::new(SimIntc::new("pic", NUM_IRQS)),
            spaces,
        }))
    }

    /// Recover the board from the platform data handed to the root device.
    pub fn from_platform(platform: Option<&PlatformData>) -> Option<Arc<Self>> {
        platform?.clone().downcast().ok()
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<SimMemory> {
        &self.mem
    }

    pub fn iot(&self) -> &BusSpaceTag {
        &self.iot
    }

    pub fn memt(&self) -> &BusSpaceTag {
        &self.memt
    }

    pub fn pci_memt(&self) -> &BusSpaceTag {
        &self.pci_memt
    }

    pub fn intc(&self) -> &Arc<SimIntc> {
        &self.ic
    }

    /// Assert an interrupt line.
    ///
    /// # Panics
    ///
    /// Panics if the line doesn't exist.
    pub fn raise_irq(&self, irq: u32) {
        if self.ic.assert_line(irq).is_err() {
            panic!("irq {irq} is out of range");
        }
    }

    /// Let the bus spaces' extent maps grow on the heap.
    pub fn mallocok(&self) {
        log::debug!("board: extent maps may use the heap now");
        for space in &self.spaces {
            space.mallocok();
        }
    }

    pub fn root_args(self: &Arc<Self>) -> RootAttachArgs {
        RootAttachArgs {
            platform: Some(self.clone()),
        }
    }

    fn mainbus_args(self: &Arc<Self>, name: &'static str, slot: u32) -> MainbusAttachArgs {
        MainbusAttachArgs {
            iot: Some(self.iot.clone()),
            memt: Some(self.memt.clone()),
            ic: Some(self.ic.clone()),
            platform: Some(self.clone()),
            ..MainbusAttachArgs::new(name, slot)
        }
    }

    fn pci_args(&self, bus: u32, f: &PciFunction) -> PciAttachArgs {
        let ic: InterruptTag = self.ic.clone();
        PciAttachArgs {
            iot: self.iot.clone(),
            memt: self.pci_memt.clone(),
            ic,
            bus,
            device: f.device,
            function: f.function,
            id: f.id,
            class: f.class,
            subclass: f.subclass,
            mem_bar: f.mem_bar,
            intr_line: f.intr_line,
        }
    }
}

impl fmt::Debug for SimBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimBoard")
            .field("config", &self.config)
            .field("mem", &self.mem)
            .field("ic", &self.ic)
            .finish_non_exhaustive()
    }
}

fn bus_space<C: Chipdep>(
    spaces: &mut Vec<Arc<dyn HeapSwitch>>,
    name: &'static str,
    chip: C,
    mem: &Arc<SimMemory>,
    window: u64,
    range: Range<BusAddr>,
) -> BusSpaceTag {
    let space = Arc::new(ChipBusSpace::new(name, chip, mem.clone(), window, range));
    spaces.push(space.clone());
    space
}
