//! Attach arguments: what a parent tells a prospective child about where it
//! lives.
//!
//! Every bus class has its own payload struct. [`AttachArgs`] is the sum
//! of them, and [`BusArgs`] recovers the concrete payload in a typed way.
use core::{any::Any, fmt, str::FromStr};
use std::sync::Arc;

use crate::{
    bus_space::{BusAddr, BusSize, BusSpaceTag},
    intr::InterruptTag,
};

/// The class of bus a device attaches at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BusClass {
    /// The pseudo bus the root device attaches at.
    Root,
    Mainbus,
    Isa,
    Pci,
}

impl BusClass {
    pub const ALL: [Self; 4] = [Self::Root, Self::Mainbus, Self::Isa, Self::Pci];

    /// The locators a configuration row attaching at this bus class may
    /// carry.
    pub const fn locator_names(self) -> &'static [&'static str] {
        match self {
            Self::Root => &[],
            Self::Mainbus => &["slot"],
            Self::Isa => &IsaAttachArgs::LOCATORS,
            Self::Pci => &["bus", "dev", "function"],
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Mainbus => "mainbus",
            Self::Isa => "isa",
            Self::Pci => "pci",
        }
    }
}

impl fmt::Display for BusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for parsing [`BusClass`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBusClass(pub String);

impl fmt::Display for UnknownBusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown bus class '{}'", self.0)
    }
}

impl std::error::Error for UnknownBusClass {}

impl FromStr for BusClass {
    type Err = UnknownBusClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| UnknownBusClass(s.to_owned()))
    }
}

/// The value of a locator.
pub type LocValue = i64;

/// A locator value meaning "unspecified".
pub const LOC_WILDCARD: LocValue = -1;

/// A named locator value, e.g., `port 0x3f8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator {
    pub name: &'static str,
    pub value: LocValue,
}

impl Locator {
    pub const fn new(name: &'static str, value: LocValue) -> Self {
        Self { name, value }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            LOC_WILDCARD => write!(f, "{} ?", self.name),
            v if v < 0 => write!(f, "{} {v}", self.name),
            v => write!(f, "{} {v:#x}", self.name),
        }
    }
}

/// Platform data handed to the root device.
pub type PlatformData = Arc<dyn Any + Send + Sync>;

/// The payload passed to the root device.
#[derive(Debug, Clone)]
pub struct RootAttachArgs {
    pub platform: Option<PlatformData>,
}

/// A device directly on the system bus.
#[derive(Debug, Clone)]
pub struct MainbusAttachArgs {
    /// The driver the slot is meant for. Matches on `mainbus` compare this
    /// against their own name.
    pub name: &'static str,
    pub slot: u32,
    pub addr: Option<BusAddr>,
    pub irq: Option<u32>,
    pub iot: Option<BusSpaceTag>,
    pub memt: Option<BusSpaceTag>,
    pub ic: Option<InterruptTag>,
    pub platform: Option<PlatformData>,
}

impl MainbusAttachArgs {
    pub fn new(name: &'static str, slot: u32) -> Self {
        Self {
            name,
            slot,
            addr: None,
            irq: None,
            iot: None,
            memt: None,
            ic: None,
            platform: None,
        }
    }
}

/// A device on an ISA bus. Resources are [`LOC_WILDCARD`] until filled in
/// from the configuration row.
#[derive(Debug, Clone)]
pub struct IsaAttachArgs {
    pub iot: BusSpaceTag,
    pub memt: BusSpaceTag,
    pub ic: InterruptTag,
    pub iobase: LocValue,
    pub iosize: LocValue,
    pub maddr: LocValue,
    pub msize: LocValue,
    pub irq: LocValue,
    pub drq: LocValue,
}

impl IsaAttachArgs {
    /// The locator names an ISA configuration row may carry.
    pub const LOCATORS: [&'static str; 6] = ["port", "size", "iomem", "iosiz", "irq", "drq"];

    pub fn new(iot: BusSpaceTag, memt: BusSpaceTag, ic: InterruptTag) -> Self {
        Self {
            iot,
            memt,
            ic,
            iobase: LOC_WILDCARD,
            iosize: LOC_WILDCARD,
            maddr: LOC_WILDCARD,
            msize: LOC_WILDCARD,
            irq: LOC_WILDCARD,
            drq: LOC_WILDCARD,
        }
    }

    fn field(&self, name: &str) -> Option<LocValue> {
        Some(match name {
            "port" => self.iobase,
            "size" => self.iosize,
            "iomem" => self.maddr,
            "iosiz" => self.msize,
            "irq" => self.irq,
            "drq" => self.drq,
            _ => return None,
        })
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut LocValue> {
        Some(match name {
            "port" => &mut self.iobase,
            "size" => &mut self.iosize,
            "iomem" => &mut self.maddr,
            "iosiz" => &mut self.msize,
            "irq" => &mut self.irq,
            "drq" => &mut self.drq,
            _ => return None,
        })
    }
}

/// PCI vendor and product IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciId {
    pub vendor: u16,
    pub product: u16,
}

/// A function on a PCI bus.
#[derive(Debug, Clone)]
pub struct PciAttachArgs {
    pub iot: BusSpaceTag,
    pub memt: BusSpaceTag,
    pub ic: InterruptTag,
    pub bus: u32,
    pub device: u32,
    pub function: u32,
    pub id: PciId,
    pub class: u8,
    pub subclass: u8,
    /// The memory window decoded by the function's first BAR.
    pub mem_bar: Option<(BusAddr, BusSize)>,
    pub intr_line: Option<u32>,
}

/// The attach arguments of any bus class.
#[derive(Debug, Clone)]
pub enum AttachArgs {
    Root(RootAttachArgs),
    Mainbus(MainbusAttachArgs),
    Isa(IsaAttachArgs),
    Pci(PciAttachArgs),
}

impl AttachArgs {
    pub fn bus_class(&self) -> BusClass {
        match self {
            Self::Root(_) => BusClass::Root,
            Self::Mainbus(_) => BusClass::Mainbus,
            Self::Isa(_) => BusClass::Isa,
            Self::Pci(_) => BusClass::Pci,
        }
    }

    /// Look up a locator by name. Returns `None` if the bus class has no
    /// such locator.
    pub fn locator(&self, name: &str) -> Option<LocValue> {
        match self {
            Self::Root(a) => a.locator(name),
            Self::Mainbus(a) => a.locator(name),
            Self::Isa(a) => a.locator(name),
            Self::Pci(a) => a.locator(name),
        }
    }

    /// Fill the unspecified locators from `locs`.
    pub fn apply_locators(&mut self, locs: &[Locator]) {
        match self {
            Self::Root(a) => a.apply_locators(locs),
            Self::Mainbus(a) => a.apply_locators(locs),
            Self::Isa(a) => a.apply_locators(locs),
            Self::Pci(a) => a.apply_locators(locs),
        }
    }

    /// Name what sits at the location, for reporting a device no driver
    /// claimed. Busses that configure indirectly have nothing to report.
    pub fn describe_device(&self) -> Option<String> {
        match self {
            Self::Root(_) | Self::Isa(_) => None,
            Self::Mainbus(a) => Some(a.name.to_owned()),
            Self::Pci(a) => Some(format!(
                "vendor {:#06x} product {:#06x} (class {:#04x}, subclass {:#04x})",
                a.id.vendor, a.id.product, a.class, a.subclass
            )),
        }
    }

    /// Describe the location for the boot log, e.g., `"port 0x3f8 irq 4"`.
    pub fn describe(&self) -> String {
        match self {
            Self::Root(a) => a.describe(),
            Self::Mainbus(a) => a.describe(),
            Self::Isa(a) => a.describe(),
            Self::Pci(a) => a.describe(),
        }
    }
}

/// Implemented by the payload of each bus class.
pub trait BusArgs: fmt::Debug + Clone + Send + Sync + 'static {
    const BUS: BusClass;

    /// Borrow the payload out of `args` if it is of this bus class.
    fn from_args(args: &AttachArgs) -> Option<&Self>;

    fn into_args(self) -> AttachArgs;

    /// Look up a locator by name. `Some(LOC_WILDCARD)` means the bus has
    /// the locator but the location doesn't specify it.
    fn locator(&self, _name: &str) -> Option<LocValue> {
        None
    }

    /// Fill the unspecified locators from a configuration row. Only busses
    /// that configure indirectly need to do anything here.
    fn apply_locators(&mut self, _locs: &[Locator]) {}

    fn describe(&self) -> String {
        String::new()
    }
}

macro_rules! impl_bus_args_conv {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for AttachArgs {
            #[inline]
            fn from(x: $ty) -> Self {
                Self::$variant(x)
            }
        }
    };
}

impl_bus_args_conv!(RootAttachArgs, Root);
impl_bus_args_conv!(MainbusAttachArgs, Mainbus);
impl_bus_args_conv!(IsaAttachArgs, Isa);
impl_bus_args_conv!(PciAttachArgs, Pci);

impl BusArgs for RootAttachArgs {
    const BUS: BusClass = BusClass::Root;

    fn from_args(args: &AttachArgs) -> Option<&Self> {
        match args {
            AttachArgs::Root(a) => Some(a),
            _ => None,
        }
    }

    fn into_args(self) -> AttachArgs {
        self.into()
    }
}

impl BusArgs for MainbusAttachArgs {
    const BUS: BusClass = BusClass::Mainbus;

    fn from_args(args: &AttachArgs) -> Option<&Self> {
        match args {
            AttachArgs::Mainbus(a) => Some(a),
            _ => None,
        }
    }

    fn into_args(self) -> AttachArgs {
        self.into()
    }

    fn locator(&self, name: &str) -> Option<LocValue> {
        match name {
            "slot" => Some(self.slot.into()),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        let mut s = format!("slot {}", self.slot);
        if let Some(addr) = self.addr {
            s += &format!(" addr {addr:#x}");
        }
        if let Some(irq) = self.irq {
            s += &format!(" irq {irq}");
        }
        s
    }
}

impl BusArgs for IsaAttachArgs {
    const BUS: BusClass = BusClass::Isa;

    fn from_args(args: &AttachArgs) -> Option<&Self> {
        match args {
            AttachArgs::Isa(a) => Some(a),
            _ => None,
        }
    }

    fn into_args(self) -> AttachArgs {
        self.into()
    }

    fn locator(&self, name: &str) -> Option<LocValue> {
        self.field(name)
    }

    fn apply_locators(&mut self, locs: &[Locator]) {
        for loc in locs {
            if let Some(field) = self.field_mut(loc.name) {
                if *field == LOC_WILDCARD {
                    *field = loc.value;
                }
            }
        }
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.iobase != LOC_WILDCARD {
            if self.iosize > 1 {
                parts.push(format!(
                    "port {:#x}-{:#x}",
                    self.iobase,
                    self.iobase + self.iosize - 1
                ));
            } else {
                parts.push(format!("port {:#x}", self.iobase));
            }
        }
        if self.maddr != LOC_WILDCARD {
            if self.msize > 1 {
                parts.push(format!(
                    "iomem {:#x}-{:#x}",
                    self.maddr,
                    self.maddr + self.msize - 1
                ));
            } else {
                parts.push(format!("iomem {:#x}", self.maddr));
            }
        }
        if self.irq != LOC_WILDCARD {
            parts.push(format!("irq {}", self.irq));
        }
        if self.drq != LOC_WILDCARD {
            parts.push(format!("drq {}", self.drq));
        }
        parts.join(" ")
    }
}

impl BusArgs for PciAttachArgs {
    const BUS: BusClass = BusClass::Pci;

    fn from_args(args: &AttachArgs) -> Option<&Self> {
        match args {
            AttachArgs::Pci(a) => Some(a),
            _ => None,
        }
    }

    fn into_args(self) -> AttachArgs {
        self.into()
    }

    fn locator(&self, name: &str) -> Option<LocValue> {
        match name {
            "bus" => Some(self.bus.into()),
            "dev" => Some(self.device.into()),
            "function" => Some(self.function.into()),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        format!("dev {} function {}", self.device, self.function)
    }
}
