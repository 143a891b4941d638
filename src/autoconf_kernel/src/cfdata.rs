//! The configuration table.
//!
//! A table is made of two parts. [`CfAttach`] binds a driver to the bus
//! class it attaches at. [`CfData`] rows list the potential locations of
//! devices, one row per location. Both are plain `Copy` data with `const`
//! constructors, so a kernel configuration can be a pair of `static`
//! arrays:
//!
//! ```
//! use autoconf_core::attach_args::{BusClass, Locator};
//! use autoconf_kernel::cfdata::{CfData, CfUnit};
//!
//! static CFDATA: &[CfData] = &[
//!     CfData::new("mainbus", BusClass::Root, CfUnit::Fixed(0)),
//!     CfData::new("isa", BusClass::Mainbus, CfUnit::Fixed(0)).parent("mainbus", None),
//!     CfData::new("com", BusClass::Isa, CfUnit::Fixed(0))
//!         .parent("isa", None)
//!         .locators(&[Locator::new("port", 0x3f8), Locator::new("irq", 4)]),
//!     CfData::new("com", BusClass::Isa, CfUnit::Star).parent("isa", None),
//! ];
//! # assert_eq!(CFDATA.len(), 4);
//! ```
use autoconf_core::{
    attach_args::{AttachArgs, BusArgs, BusClass, Locator},
    error::AttachError,
};
use core::{any::Any, fmt, mem::size_of};
use std::collections::BTreeMap;

use crate::{
    autoconf::{AttachContext, ProbeContext},
    driver::Driver,
    error::ConfigTableError,
};

/// A match function. Returns a score; `0` rejects the location.
pub type MatchFn = fn(&ProbeContext<'_>, &CfData, &AttachArgs) -> u32;

/// An attach function. Returns the driver's private state.
pub type AttachFn = fn(&mut AttachContext<'_>, &AttachArgs) -> Result<Box<dyn Any + Send>, AttachError>;

/// A detach function. Consumes the private state returned by the attach
/// function.
pub type DetachFn = fn(Box<dyn Any + Send>);

/// The highest unit number a device can have.
pub const MAX_UNIT: u32 = 0xffff;

/// Binds a driver to a bus class.
#[derive(Clone, Copy)]
pub struct CfAttach {
    pub name: &'static str,
    pub bus: BusClass,
    pub match_fn: MatchFn,
    pub attach_fn: AttachFn,
    pub detach_fn: Option<DetachFn>,
    /// The size of the private state, for diagnostics.
    pub priv_size: usize,
    /// The bus class instances offer to their children besides the one
    /// named like the driver.
    pub provides: Option<BusClass>,
}

impl CfAttach {
    /// Construct an attachment from untyped functions.
    pub const fn register(
        name: &'static str,
        bus: BusClass,
        match_fn: MatchFn,
        attach_fn: AttachFn,
        priv_size: usize,
    ) -> Self {
        Self {
            name,
            bus,
            match_fn,
            attach_fn,
            detach_fn: None,
            priv_size,
            provides: None,
        }
    }

    pub const fn with_detach(self, detach_fn: DetachFn) -> Self {
        Self {
            detach_fn: Some(detach_fn),
            ..self
        }
    }

    pub const fn providing(self, bus: BusClass) -> Self {
        Self {
            provides: Some(bus),
            ..self
        }
    }

    /// Get a flag indicating whether an instance can be the parent of a
    /// device attaching at `bus`.
    pub fn provides(&self, bus: BusClass) -> bool {
        self.name == bus.as_str() || self.provides == Some(bus)
    }

    /// Construct an attachment for a [`Driver`]. The bus class is derived
    /// from `D::Args`, so a driver can't be bound to a bus whose attach
    /// arguments it doesn't understand.
    pub const fn of<D: Driver>() -> Self {
        Self {
            provides: D::PROVIDES,
            ..Self::register(
                D::NAME,
                <D::Args as BusArgs>::BUS,
                match_shim::<D>,
                attach_shim::<D>,
                size_of::<D>(),
            )
            .with_detach(detach_shim::<D>)
        }
    }
}

fn match_shim<D: Driver>(ctx: &ProbeContext<'_>, cf: &CfData, args: &AttachArgs) -> u32 {
    match D::Args::from_args(args) {
        Some(args) => D::probe(ctx, cf, args),
        None => {
            log::warn!(
                "{}: offered {} attach args, expected {}",
                D::NAME,
                args.bus_class(),
                <D::Args as BusArgs>::BUS
            );
            0
        }
    }
}

fn attach_shim<D: Driver>(
    ctx: &mut AttachContext<'_>,
    args: &AttachArgs,
) -> Result<Box<dyn Any + Send>, AttachError> {
    let args = D::Args::from_args(args).ok_or(AttachError::BadParam)?;
    Ok(Box::new(D::attach(ctx, args)?))
}

fn detach_shim<D: Driver>(private: Box<dyn Any + Send>) {
    match private.downcast::<D>() {
        Ok(driver) => driver.detach(),
        Err(_) => log::warn!("{}: private state of another driver", D::NAME),
    }
}

impl fmt::Debug for CfAttach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CfAttach")
            .field("name", &self.name)
            .field("bus", &self.bus)
            .field("priv_size", &self.priv_size)
            .field("provides", &self.provides)
            .finish_non_exhaustive()
    }
}

/// The unit number of a configuration row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfUnit {
    /// Exactly this unit. The row is used at most once.
    Fixed(u32),
    /// The next free unit after the highest fixed unit of the same driver.
    /// The row can be used any number of times.
    Star,
}

impl fmt::Display for CfUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Star => f.write_str("*"),
        }
    }
}

/// A potential device location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfData {
    pub name: &'static str,
    /// The bus class the device attaches at.
    pub at: BusClass,
    /// The driver name the parent must have. `None` accepts any parent on
    /// the bus class.
    pub parent: Option<&'static str>,
    /// The unit the parent must have. `None` accepts any.
    pub parent_unit: Option<u32>,
    pub unit: CfUnit,
    pub locators: &'static [Locator],
    /// Driver-specific flags.
    pub flags: u32,
    pub disabled: bool,
}

impl CfData {
    pub const fn new(name: &'static str, at: BusClass, unit: CfUnit) -> Self {
        Self {
            name,
            at,
            parent: None,
            parent_unit: None,
            unit,
            locators: &[],
            flags: 0,
            disabled: false,
        }
    }

    pub const fn parent(self, name: &'static str, unit: Option<u32>) -> Self {
        Self {
            parent: Some(name),
            parent_unit: unit,
            ..self
        }
    }

    pub const fn locators(self, locators: &'static [Locator]) -> Self {
        Self { locators, ..self }
    }

    pub const fn flags(self, flags: u32) -> Self {
        Self { flags, ..self }
    }

    pub const fn disabled(self) -> Self {
        Self {
            disabled: true,
            ..self
        }
    }

    /// Find the value of the locator `name`.
    pub fn locator(&self, name: &str) -> Option<i64> {
        self.locators
            .iter()
            .find(|loc| loc.name == name)
            .map(|loc| loc.value)
    }
}

impl fmt::Display for CfData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} at ", self.name, self.unit)?;
        match (self.parent, self.parent_unit) {
            (_, _) if self.at == BusClass::Root => f.write_str("root")?,
            (Some(p), Some(u)) => write!(f, "{p}{u}")?,
            (Some(p), None) => write!(f, "{p}?")?,
            (None, _) => write!(f, "{}?", self.at)?,
        }
        for loc in self.locators {
            write!(f, " {loc}")?;
        }
        if self.flags != 0 {
            write!(f, " flags {:#x}", self.flags)?;
        }
        if self.disabled {
            f.write_str(" disable")?;
        }
        Ok(())
    }
}

/// A configuration row resolved against its attachment.
#[derive(Debug, Clone, Copy)]
pub struct ConfigEntry {
    index: usize,
    cf: CfData,
    ca: CfAttach,
}

impl ConfigEntry {
    /// The position of the row in the table.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &'static str {
        self.cf.name
    }

    pub fn bus(&self) -> BusClass {
        self.cf.at
    }

    pub fn unit(&self) -> CfUnit {
        self.cf.unit
    }

    pub fn locators(&self) -> &'static [Locator] {
        self.cf.locators
    }

    pub fn flags(&self) -> u32 {
        self.cf.flags
    }

    pub fn priv_size(&self) -> usize {
        self.ca.priv_size
    }

    pub fn cfdata(&self) -> &CfData {
        &self.cf
    }

    pub fn attachment(&self) -> &CfAttach {
        &self.ca
    }

    pub(crate) fn probe(&self, ctx: &ProbeContext<'_>, args: &AttachArgs) -> u32 {
        (self.ca.match_fn)(ctx, &self.cf, args)
    }

    pub(crate) fn attach(
        &self,
        ctx: &mut AttachContext<'_>,
        args: &AttachArgs,
    ) -> Result<Box<dyn Any + Send>, AttachError> {
        (self.ca.attach_fn)(ctx, args)
    }
}

/// A validated configuration table.
#[derive(Debug, Clone)]
pub struct ConfigTable {
    attachments: Vec<CfAttach>,
    data: Vec<CfData>,
    /// `attach_of[i]` is the index of the attachment of `data[i]`.
    attach_of: Vec<usize>,
    /// The first unit a star row of each driver allocates.
    star_base: BTreeMap<&'static str, u32>,
}

impl ConfigTable {
    /// Validate and construct a table.
    pub fn new(attachments: &[CfAttach], data: &[CfData]) -> Result<Self, ConfigTableError> {
        for (i, ca) in attachments.iter().enumerate() {
            if attachments[..i]
                .iter()
                .any(|other| other.name == ca.name && other.bus == ca.bus)
            {
                return Err(ConfigTableError::DuplicateAttachment {
                    name: ca.name,
                    bus: ca.bus,
                });
            }
        }

        let mut attach_of = Vec::with_capacity(data.len());
        let mut star_base = BTreeMap::new();
        for (i, cf) in data.iter().enumerate() {
            let ca = attachments
                .iter()
                .position(|ca| ca.name == cf.name && ca.bus == cf.at)
                .ok_or(ConfigTableError::UnknownAttachment {
                    name: cf.name,
                    bus: cf.at,
                })?;
            attach_of.push(ca);

            if let Some(parent) = cf.parent {
                let mut parents = attachments.iter().filter(|ca| ca.name == parent).peekable();
                if parents.peek().is_none() {
                    return Err(ConfigTableError::UnknownParent {
                        name: cf.name,
                        parent,
                    });
                }
                if !parents.any(|ca| ca.provides(cf.at)) {
                    return Err(ConfigTableError::ParentBusMismatch {
                        name: cf.name,
                        parent,
                        bus: cf.at,
                    });
                }
            }

            if let Some((_, loc)) = cf
                .locators
                .iter()
                .enumerate()
                .find(|&(j, loc)| cf.locators[..j].iter().any(|l| l.name == loc.name))
            {
                return Err(ConfigTableError::DuplicateLocator {
                    name: cf.name,
                    locator: loc.name,
                });
            }

            if let Some(loc) = cf
                .locators
                .iter()
                .find(|loc| !cf.at.locator_names().contains(&loc.name))
            {
                return Err(ConfigTableError::UnknownLocator {
                    name: cf.name,
                    bus: cf.at,
                    locator: loc.name,
                });
            }

            let base = star_base.entry(cf.name).or_insert(0);
            if let CfUnit::Fixed(unit) = cf.unit {
                if unit > MAX_UNIT {
                    return Err(ConfigTableError::UnitOutOfRange {
                        name: cf.name,
                        unit,
                    });
                }
                if data[..i]
                    .iter()
                    .any(|other| other.name == cf.name && other.unit == cf.unit)
                {
                    return Err(ConfigTableError::DuplicateUnit {
                        name: cf.name,
                        unit,
                    });
                }
                *base = (*base).max(unit + 1);
            }
        }

        log::trace!(
            "configuration table: {} attachments, {} rows",
            attachments.len(),
            data.len()
        );

        Ok(Self {
            attachments: attachments.to_vec(),
            data: data.to_vec(),
            attach_of,
            star_base,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the row at `index`.
    pub fn entry(&self, index: usize) -> Option<ConfigEntry> {
        Some(ConfigEntry {
            index,
            cf: *self.data.get(index)?,
            ca: self.attachments[self.attach_of[index]],
        })
    }

    /// Iterate over every row in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = ConfigEntry> + Clone + '_ {
        self.data
            .iter()
            .zip(&self.attach_of)
            .enumerate()
            .map(move |(index, (&cf, &ca))| ConfigEntry {
                index,
                cf,
                ca: self.attachments[ca],
            })
    }

    /// Iterate over the rows attaching at `bus` in declaration order.
    pub fn find_all(&self, bus: BusClass) -> impl Iterator<Item = ConfigEntry> + Clone + '_ {
        self.entries().filter(move |e| e.bus() == bus)
    }

    /// The first unit number a star row of driver `name` allocates.
    pub fn star_base(&self, name: &str) -> u32 {
        self.star_base.get(name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn never(_: &ProbeContext<'_>, _: &CfData, _: &AttachArgs) -> u32 {
        0
    }

    fn fail(_: &mut AttachContext<'_>, _: &AttachArgs) -> Result<Box<dyn Any + Send>, AttachError> {
        Err(AttachError::NotSupported)
    }

    const fn ca(name: &'static str, bus: BusClass) -> CfAttach {
        CfAttach::register(name, bus, never, fail, 0)
    }

    static ATTACH: &[CfAttach] = &[
        ca("mainbus", BusClass::Root),
        ca("isa", BusClass::Mainbus),
        ca("com", BusClass::Isa),
        ca("com", BusClass::Pci),
        ca("pci", BusClass::Mainbus),
    ];

    #[test]
    fn star_units_follow_fixed() {
        let table = ConfigTable::new(
            ATTACH,
            &[
                CfData::new("com", BusClass::Isa, CfUnit::Fixed(0)),
                CfData::new("com", BusClass::Pci, CfUnit::Star),
                CfData::new("com", BusClass::Isa, CfUnit::Fixed(1)),
                CfData::new("isa", BusClass::Mainbus, CfUnit::Star),
            ],
        )
        .unwrap();
        assert_eq!(table.star_base("com"), 2);
        assert_eq!(table.star_base("isa"), 0);
        assert_eq!(table.star_base("pci"), 0);
    }

    #[test]
    fn find_all_is_ordered_and_restartable() {
        let table = ConfigTable::new(
            ATTACH,
            &[
                CfData::new("mainbus", BusClass::Root, CfUnit::Fixed(0)),
                CfData::new("pci", BusClass::Mainbus, CfUnit::Star),
                CfData::new("com", BusClass::Isa, CfUnit::Fixed(0)),
                CfData::new("isa", BusClass::Mainbus, CfUnit::Fixed(0)),
            ],
        )
        .unwrap();
        let it = table.find_all(BusClass::Mainbus);
        let first: Vec<_> = it.clone().map(|e| (e.index(), e.name())).collect();
        let second: Vec<_> = it.map(|e| (e.index(), e.name())).collect();
        assert_eq!(first, [(1, "pci"), (3, "isa")]);
        assert_eq!(first, second);
        assert_eq!(table.find_all(BusClass::Pci).count(), 0);
    }

    #[test]
    fn validation() {
        static SLOT_LOCS: [Locator; 1] = [Locator::new("slot", 1)];
        assert_matches!(
            ConfigTable::new(&[ca("isa", BusClass::Mainbus), ca("isa", BusClass::Mainbus)], &[]),
            Err(ConfigTableError::DuplicateAttachment { name: "isa", .. })
        );
        assert_matches!(
            ConfigTable::new(ATTACH, &[CfData::new("com", BusClass::Mainbus, CfUnit::Star)]),
            Err(ConfigTableError::UnknownAttachment { name: "com", bus: BusClass::Mainbus })
        );
        assert_matches!(
            ConfigTable::new(
                ATTACH,
                &[
                    CfData::new("com", BusClass::Isa, CfUnit::Fixed(1)),
                    CfData::new("com", BusClass::Pci, CfUnit::Fixed(1)),
                ]
            ),
            Err(ConfigTableError::DuplicateUnit { name: "com", unit: 1 })
        );
        assert_matches!(
            ConfigTable::new(
                ATTACH,
                &[CfData::new("com", BusClass::Isa, CfUnit::Star).parent("eisa", None)]
            ),
            Err(ConfigTableError::UnknownParent { parent: "eisa", .. })
        );
        assert_matches!(
            ConfigTable::new(
                ATTACH,
                &[CfData::new("com", BusClass::Isa, CfUnit::Star)
                    .locators(&SLOT_LOCS)]
            ),
            Err(ConfigTableError::UnknownLocator { locator: "slot", .. })
        );
    }

    #[test]
    fn parent_must_provide_the_bus() {
        assert_matches!(
            ConfigTable::new(
                ATTACH,
                &[CfData::new("com", BusClass::Isa, CfUnit::Star).parent("pci", None)]
            ),
            Err(ConfigTableError::ParentBusMismatch {
                name: "com",
                parent: "pci",
                bus: BusClass::Isa
            })
        );

        // A bridge named differently from the bus it provides
        let attach = [ca("ppb", BusClass::Pci).providing(BusClass::Pci), ca("com", BusClass::Pci)];
        let table = ConfigTable::new(
            &attach,
            &[CfData::new("com", BusClass::Pci, CfUnit::Star).parent("ppb", Some(0))],
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert!(attach[0].provides(BusClass::Pci));
        assert!(!attach[0].provides(BusClass::Isa));
        assert!(!attach[1].provides(BusClass::Isa));
    }

    #[test]
    fn duplicate_locator() {
        static LOCS: [Locator; 3] = [
            Locator::new("port", 0x3f8),
            Locator::new("irq", 4),
            Locator::new("port", 0x2f8),
        ];
        assert_matches!(
            ConfigTable::new(ATTACH, &[CfData::new("com", BusClass::Isa, CfUnit::Star).locators(&LOCS)]),
            Err(ConfigTableError::DuplicateLocator { name: "com", locator: "port" })
        );
    }

    #[test]
    fn unit_range() {
        for unit in [MAX_UNIT + 1, 4_000_000_000, u32::MAX] {
            assert_matches!(
                ConfigTable::new(ATTACH, &[CfData::new("isa", BusClass::Mainbus, CfUnit::Fixed(unit))]),
                Err(ConfigTableError::UnitOutOfRange { name: "isa", unit: u }) if u == unit
            );
        }
        let table = ConfigTable::new(
            ATTACH,
            &[CfData::new("isa", BusClass::Mainbus, CfUnit::Fixed(MAX_UNIT))],
        )
        .unwrap();
        assert_eq!(table.star_base("isa"), MAX_UNIT + 1);
    }

    #[test]
    fn display_row() {
        static LOCS: [Locator; 2] = [Locator::new("port", 0x3f8), Locator::new("irq", 4)];
        let cf = CfData::new("com", BusClass::Isa, CfUnit::Fixed(0))
            .parent("isa", None)
            .locators(&LOCS)
            .flags(0x10)
            .disabled();
        assert_eq!(cf.to_string(), "com0 at isa? port 0x3f8 irq 0x4 flags 0x10 disable");
        assert_eq!(cf.locator("irq"), Some(4));
        assert_eq!(cf.locator("drq"), None);
    }
}
