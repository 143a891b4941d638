//! The match/probe dispatcher and the attach instantiator.
use autoconf_core::{
    attach_args::{AttachArgs, BusClass, LOC_WILDCARD},
    error::{AttachError, ProbeError},
    intr,
};
use core::{any::Any, fmt};
use slab::Slab;
use std::collections::{BTreeMap, VecDeque};

use crate::{
    cfdata::{CfUnit, ConfigEntry, ConfigTable, MAX_UNIT},
    device::{Device, DeviceHandle, DeviceState},
    error::{ConfigError, FatalError},
};

/// A function deferred by [`AttachContext::defer`] or
/// [`AttachContext::defer_until_interrupts`].
pub type DeferFn = Box<dyn FnOnce(&mut AttachContext<'_>) + Send>;

struct Deferred {
    dev: DeviceHandle,
    func: DeferFn,
}

/// The autoconfiguration state of a machine: the configuration table, the
/// per-row state, and the device tree.
pub struct Autoconf {
    table: ConfigTable,
    /// `found[i]` is set once the fixed-unit row `i` was used.
    found: Vec<bool>,
    devices: Slab<Device>,
    next_generation: u64,
    root: Option<DeviceHandle>,
    /// Unit number allocation per driver name.
    units: BTreeMap<&'static str, Vec<Option<DeviceHandle>>>,
    deferred: VecDeque<Deferred>,
    deferred_intr: VecDeque<Deferred>,
    errors: Vec<ConfigError>,
    cold: bool,
}

impl fmt::Debug for Autoconf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Autoconf")
            .field("root", &self.root)
            .field("devices", &self.devices.len())
            .field("deferred", &self.deferred.len())
            .field("deferred_intr", &self.deferred_intr.len())
            .field("errors", &self.errors)
            .field("cold", &self.cold)
            .finish_non_exhaustive()
    }
}

impl Autoconf {
    pub fn new(table: ConfigTable) -> Self {
        Self {
            found: vec![false; table.len()],
            table,
            devices: Slab::new(),
            next_generation: 0,
            root: None,
            units: BTreeMap::new(),
            deferred: VecDeque::new(),
            deferred_intr: VecDeque::new(),
            errors: Vec::new(),
            cold: true,
        }
    }

    pub fn table(&self) -> &ConfigTable {
        &self.table
    }

    /// Get a flag indicating whether interrupts are still disabled, i.e.,
    /// [`Self::configure`] hasn't finished yet.
    pub fn is_cold(&self) -> bool {
        self.cold
    }

    pub fn root(&self) -> Option<DeviceHandle> {
        self.root
    }

    /// The failures recorded so far.
    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    /// Get a flag indicating whether the fixed-unit row `cf_index` has been
    /// used.
    pub fn is_found(&self, cf_index: usize) -> bool {
        self.found.get(cf_index).copied().unwrap_or(false)
    }

    pub fn device(&self, handle: DeviceHandle) -> Option<&Device> {
        self.devices
            .get(handle.key)
            .filter(|dev| dev.generation == handle.generation)
    }

    fn device_mut(&mut self, handle: DeviceHandle) -> Option<&mut Device> {
        self.devices
            .get_mut(handle.key)
            .filter(|dev| dev.generation == handle.generation)
    }

    /// Get the private state of an attached device if it is of type `T`.
    pub fn device_private<T: Any>(&self, handle: DeviceHandle) -> Option<&T> {
        self.device(handle)?.private()
    }

    pub fn device_private_mut<T: Any>(&mut self, handle: DeviceHandle) -> Option<&mut T> {
        self.device_mut(handle)?.private.as_deref_mut()?.downcast_mut()
    }

    /// Find the device `name` with unit number `unit`.
    pub fn device_lookup(&self, name: &str, unit: u32) -> Option<DeviceHandle> {
        *self.units.get(name)?.get(unit as usize)?
    }

    /// Find a device by its external name, e.g., `com0`.
    pub fn find_by_xname(&self, xname: &str) -> Option<DeviceHandle> {
        let digits = xname.len() - xname.trim_end_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return None;
        }
        let (name, unit) = xname.split_at(xname.len() - digits);
        self.device_lookup(name, unit.parse().ok()?)
    }

    /// Evaluate every row that could attach `args` under `parent` and
    /// return the scores in declaration order. Rows excluded by the row
    /// state or by their locators aren't included.
    pub fn match_scores(
        &self,
        parent: Option<DeviceHandle>,
        args: &AttachArgs,
    ) -> Result<Vec<(ConfigEntry, u32)>, ProbeError> {
        if intr::in_interrupt() {
            return Err(ProbeError::BadContext);
        }

        let ctx = ProbeContext { ac: self, parent };
        Ok(self
            .table
            .find_all(args.bus_class())
            .filter(|entry| self.submatch(parent, entry, args))
            .map(|entry| {
                let score = entry.probe(&ctx, args);
                log::trace!("{}{}: match score {score}", entry.name(), entry.unit());
                (entry, score)
            })
            .collect())
    }

    /// Find the row that attaches `args` under `parent`.
    ///
    /// The row with the highest score wins. Among rows with the same score,
    /// the one declared first wins.
    pub fn probe(
        &self,
        parent: Option<DeviceHandle>,
        args: &AttachArgs,
    ) -> Result<Option<(ConfigEntry, u32)>, ProbeError> {
        let mut best: Option<(ConfigEntry, u32)> = None;
        for (entry, score) in self.match_scores(parent, args)? {
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((entry, score));
            }
        }
        Ok(best)
    }

    /// Decide whether the row `entry` may be offered `args` under `parent`
    /// without consulting the driver.
    fn submatch(&self, parent: Option<DeviceHandle>, entry: &ConfigEntry, args: &AttachArgs) -> bool {
        let cf = entry.cfdata();
        if cf.disabled {
            return false;
        }
        if matches!(cf.unit, CfUnit::Fixed(_)) && self.is_found(entry.index()) {
            return false;
        }

        if let Some(parent_name) = cf.parent {
            let Some(p) = parent.and_then(|p| self.device(p)) else {
                return false;
            };
            if p.name() != parent_name || cf.parent_unit.map_or(false, |u| u != p.unit()) {
                return false;
            }
        }

        cf.locators.iter().all(|loc| {
            loc.value == LOC_WILDCARD
                || match args.locator(loc.name) {
                    Some(v) => v == LOC_WILDCARD || v == loc.value,
                    None => true,
                }
        })
    }

    fn alloc_unit(&self, entry: &ConfigEntry) -> Result<u32, AttachError> {
        let slots = self.units.get(entry.name()).map_or(&[][..], Vec::as_slice);
        let used = |unit: u32| slots.get(unit as usize).map_or(false, Option::is_some);
        match entry.unit() {
            CfUnit::Fixed(unit) if used(unit) => Err(AttachError::BadObjectState),
            CfUnit::Fixed(unit) => Ok(unit),
            CfUnit::Star => {
                let mut unit = self.table.star_base(entry.name());
                while used(unit) {
                    unit += 1;
                }
                if unit > MAX_UNIT {
                    log::warn!("{}: out of unit numbers", entry.name());
                    return Err(AttachError::NoSpace);
                }
                Ok(unit)
            }
        }
    }

    fn set_unit(&mut self, name: &'static str, unit: u32, dev: Option<DeviceHandle>) {
        let slots = self.units.entry(name).or_default();
        let i = unit as usize;
        if slots.len() <= i {
            slots.resize(i + 1, None);
        }
        slots[i] = dev;
    }

    /// Instantiate the row `entry` under `parent` and run the driver's
    /// attach function.
    ///
    /// If the driver fails, the node and everything it attached are removed
    /// and the failure is recorded in [`Self::errors`]. The row stays used;
    /// it won't be offered again.
    pub fn attach(
        &mut self,
        parent: Option<DeviceHandle>,
        entry: ConfigEntry,
        args: &AttachArgs,
    ) -> Result<DeviceHandle, AttachError> {
        if intr::in_interrupt() {
            return Err(AttachError::BadContext);
        }
        if matches!(entry.unit(), CfUnit::Fixed(_)) && self.is_found(entry.index()) {
            return Err(AttachError::BadObjectState);
        }
        let parent_xname = match parent {
            Some(p) => Some(self.device(p).ok_or(AttachError::NotFound)?.xname.clone()),
            None => None,
        };

        let unit = self.alloc_unit(&entry)?;
        let xname = format!("{}{unit}", entry.name());
        let location = args.describe();

        let generation = self.next_generation;
        self.next_generation += 1;
        let key = self.devices.insert(Device {
            generation,
            name: entry.name(),
            unit,
            xname: xname.clone(),
            parent,
            children: Vec::new(),
            bus: entry.bus(),
            cf_index: entry.index(),
            flags: entry.flags(),
            location,
            state: DeviceState::Attaching,
            private: None,
            claims: Vec::new(),
        });
        let handle = DeviceHandle { key, generation };
        self.set_unit(entry.name(), unit, Some(handle));
        if let Some(p) = parent.and_then(|p| self.device_mut(p)) {
            p.children.push(handle);
        }
        if let CfUnit::Fixed(_) = entry.unit() {
            self.found[entry.index()] = true;
        }

        match (&parent_xname, self.devices[key].location.as_str()) {
            (None, _) => log::info!("{xname} (root)"),
            (Some(p), "") => log::info!("{xname} at {p}"),
            (Some(p), location) => log::info!("{xname} at {p} {location}"),
        }

        let result = entry.attach(&mut AttachContext { ac: self, dev: handle }, args);

        match result {
            Ok(private) => {
                let dev = &mut self.devices[key];
                dev.private = Some(private);
                dev.state = DeviceState::Attached;
                Ok(handle)
            }
            Err(error) => {
                log::error!("{xname}: attach failed: {error}");
                self.remove_subtree(handle);
                self.errors.push(ConfigError::Recoverable { xname, error });
                Err(error)
            }
        }
    }

    /// Remove `handle` and its descendants, releasing their units, claims,
    /// and deferred work. Descendants that finished attaching are detached,
    /// children before their parents.
    fn remove_subtree(&mut self, handle: DeviceHandle) {
        if let Some(parent) = self.device(handle).and_then(|dev| dev.parent) {
            if let Some(p) = self.device_mut(parent) {
                p.children.retain(|&c| c != handle);
                p.claims.retain(|&(_, c)| c != handle);
            }
        }

        let mut removed = Vec::new();
        let mut stack = vec![handle];
        while let Some(h) = stack.pop() {
            if self.device(h).is_none() {
                continue;
            }
            let dev = self.devices.remove(h.key);
            stack.extend_from_slice(&dev.children);
            self.set_unit(dev.name, dev.unit, None);
            removed.push((h, dev));
        }

        let is_removed = |dev: DeviceHandle| removed.iter().any(|&(h, _)| h == dev);
        self.deferred.retain(|d| !is_removed(d.dev));
        self.deferred_intr.retain(|d| !is_removed(d.dev));

        // Every node precedes its descendants in `removed`
        for (_, dev) in removed.into_iter().rev() {
            let detach = self
                .table
                .entry(dev.cf_index)
                .and_then(|entry| entry.attachment().detach_fn);
            match (dev.private, detach) {
                (Some(private), Some(detach)) => {
                    detach(private);
                    log::info!("{} detached", dev.xname);
                }
                _ => log::debug!("{}: removed", dev.xname),
            }
        }
    }

    /// Direct configuration: attach the best driver for `args` under
    /// `parent`.
    ///
    /// Returns `Ok(None)` if no driver matched or the winner failed to
    /// attach.
    pub fn config_found(
        &mut self,
        parent: DeviceHandle,
        args: AttachArgs,
    ) -> Result<Option<DeviceHandle>, ProbeError> {
        match self.probe(Some(parent), &args)? {
            Some((entry, score)) => {
                log::debug!(
                    "{}{}: won with score {score}",
                    entry.name(),
                    entry.unit()
                );
                Ok(self.attach(Some(parent), entry, &args).ok())
            }
            None => {
                self.report_unconfigured(parent, &args);
                Ok(None)
            }
        }
    }

    fn report_unconfigured(&self, parent: DeviceHandle, args: &AttachArgs) {
        let what = args
            .describe_device()
            .unwrap_or_else(|| "device".to_owned());
        let parent = self.device(parent).map_or("?", |p| p.xname());
        match args.describe() {
            location if location.is_empty() => {
                log::info!("{what} at {parent} not configured")
            }
            location => log::info!("{what} at {parent} {location} not configured"),
        }
    }

    /// Indirect configuration: offer every candidate row its own copy of
    /// `args` with the row's locators filled in, and attach each row whose
    /// driver accepts. A star row is offered again after each successful
    /// attach until its driver declines.
    pub fn config_search(
        &mut self,
        parent: DeviceHandle,
        args: AttachArgs,
    ) -> Result<Vec<DeviceHandle>, ProbeError> {
        if intr::in_interrupt() {
            return Err(ProbeError::BadContext);
        }

        let candidates: Vec<ConfigEntry> = self.table.find_all(args.bus_class()).collect();
        let mut attached = Vec::new();
        for entry in candidates {
            while self.submatch(Some(parent), &entry, &args) {
                let mut located = args.clone();
                located.apply_locators(entry.locators());

                let ctx = ProbeContext {
                    ac: self,
                    parent: Some(parent),
                };
                let score = entry.probe(&ctx, &located);
                log::trace!("{}{}: search score {score}", entry.name(), entry.unit());
                if score == 0 {
                    break;
                }

                match self.attach(Some(parent), entry, &located) {
                    Ok(dev) => attached.push(dev),
                    Err(_) => break,
                }
                if entry.unit() != CfUnit::Star {
                    break;
                }
            }
        }
        Ok(attached)
    }

    /// Attach the root device `name`. There is no way to continue without
    /// one, so every failure is fatal.
    pub fn config_rootfound(
        &mut self,
        name: &str,
        args: AttachArgs,
    ) -> Result<DeviceHandle, FatalError> {
        if intr::in_interrupt() {
            return Err(FatalError::BadContext);
        }
        if self.root.is_some() {
            return Err(FatalError::RootAlreadyConfigured);
        }

        let ctx = ProbeContext {
            ac: self,
            parent: None,
        };
        let entry = self.table.find_all(BusClass::Root).find(|entry| {
            entry.name() == name && self.submatch(None, entry, &args) && entry.probe(&ctx, &args) > 0
        });
        let Some(entry) = entry else {
            log::error!("configure: no root device '{name}'");
            return Err(FatalError::RootNotFound(name.to_owned()));
        };

        let root = self.attach(None, entry, &args).map_err(|error| {
            FatalError::RootAttachFailed {
                name: name.to_owned(),
                error,
            }
        })?;
        self.root = Some(root);
        Ok(root)
    }

    /// Run `func` after the current configuration pass.
    pub fn config_defer(&mut self, dev: DeviceHandle, func: DeferFn) {
        self.deferred.push_back(Deferred { dev, func });
    }

    /// Run `func` once interrupts are enabled.
    pub fn config_interrupts(&mut self, dev: DeviceHandle, func: DeferFn) {
        self.deferred_intr.push_back(Deferred { dev, func });
    }

    /// Run the deferred work that is due, in the order it was queued. Work
    /// waiting for interrupts is only run when the system isn't cold.
    pub fn run_deferred(&mut self) {
        loop {
            let next = match self.deferred.pop_front() {
                Some(d) => d,
                None if self.cold => break,
                None => match self.deferred_intr.pop_front() {
                    Some(d) => d,
                    None => break,
                },
            };
            if self.device(next.dev).is_none() {
                continue;
            }
            (next.func)(&mut AttachContext {
                ac: self,
                dev: next.dev,
            });
        }
    }

    /// Configure the whole machine: attach the root device `root_name` and,
    /// transitively, everything below it, then run the deferred work and
    /// enable interrupts.
    pub fn configure(
        &mut self,
        root_name: &str,
        args: AttachArgs,
    ) -> Result<DeviceHandle, FatalError> {
        let root = self.config_rootfound(root_name, args).map_err(|e| {
            self.errors.push(e.clone().into());
            e
        })?;
        self.run_deferred();

        self.cold = false;
        log::debug!("configure: interrupts enabled");
        self.run_deferred();

        log::info!(
            "configure: {} devices, {} failed",
            self.devices.len(),
            self.errors.len()
        );
        Ok(root)
    }

    /// Render the device tree, one device per line, children indented
    /// below their parent in attach order.
    pub fn dump(&self) -> String {
        TreeDump(self).to_string()
    }
}

struct TreeDump<'a>(&'a Autoconf);

impl TreeDump<'_> {
    fn node(&self, f: &mut fmt::Formatter<'_>, handle: DeviceHandle, depth: usize) -> fmt::Result {
        let Some(dev) = self.0.device(handle) else {
            return Ok(());
        };
        write!(f, "{:indent$}{}", "", dev.xname(), indent = depth * 2)?;
        if !dev.location().is_empty() {
            write!(f, " ({})", dev.location())?;
        }
        if !dev.is_attached() {
            f.write_str(" [attaching]")?;
        }
        writeln!(f)?;
        dev.children()
            .iter()
            .try_for_each(|&child| self.node(f, child, depth + 1))
    }
}

impl fmt::Display for TreeDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.root {
            Some(root) => self.node(f, root, 0),
            None => Ok(()),
        }
    }
}

/// What a match function may look at.
pub struct ProbeContext<'a> {
    ac: &'a Autoconf,
    parent: Option<DeviceHandle>,
}

impl<'a> ProbeContext<'a> {
    pub fn autoconf(&self) -> &'a Autoconf {
        self.ac
    }

    pub fn parent_handle(&self) -> Option<DeviceHandle> {
        self.parent
    }

    /// The would-be parent. `None` when probing for the root.
    pub fn parent(&self) -> Option<&'a Device> {
        self.ac.device(self.parent?)
    }

    /// Get a flag indicating whether a sibling has claimed `resource` on
    /// the parent.
    pub fn is_claimed(&self, resource: &str) -> bool {
        self.parent().map_or(false, |p| p.is_claimed(resource))
    }

    pub fn is_cold(&self) -> bool {
        self.ac.cold
    }
}

/// The interface between an attaching driver and the autoconfiguration
/// state.
pub struct AttachContext<'a> {
    ac: &'a mut Autoconf,
    dev: DeviceHandle,
}

impl AttachContext<'_> {
    pub fn autoconf(&self) -> &Autoconf {
        self.ac
    }

    pub fn handle(&self) -> DeviceHandle {
        self.dev
    }

    /// The device being attached.
    pub fn device(&self) -> &Device {
        // Nodes aren't removed while their attach function or deferred work
        // runs.
        &self.ac.devices[self.dev.key]
    }

    pub fn xname(&self) -> &str {
        self.device().xname()
    }

    pub fn unit(&self) -> u32 {
        self.device().unit()
    }

    /// The flags of the configuration row.
    pub fn flags(&self) -> u32 {
        self.device().flags()
    }

    pub fn parent(&self) -> Option<DeviceHandle> {
        self.device().parent()
    }

    pub fn is_cold(&self) -> bool {
        self.ac.cold
    }

    /// Attach a child by direct configuration. See [`Autoconf::config_found`].
    pub fn config_found(
        &mut self,
        args: impl Into<AttachArgs>,
    ) -> Result<Option<DeviceHandle>, ProbeError> {
        self.ac.config_found(self.dev, args.into())
    }

    /// Attach children by indirect configuration. See
    /// [`Autoconf::config_search`].
    pub fn config_search(
        &mut self,
        args: impl Into<AttachArgs>,
    ) -> Result<Vec<DeviceHandle>, ProbeError> {
        self.ac.config_search(self.dev, args.into())
    }

    /// Mark `resource` as taken on the parent, failing if a sibling got
    /// there first. The claim is dropped if this device is removed.
    pub fn claim_on_parent(&mut self, resource: &'static str) -> Result<(), AttachError> {
        let dev = self.dev;
        let parent = self.parent().ok_or(AttachError::NotFound)?;
        let p = self.ac.device_mut(parent).ok_or(AttachError::NotFound)?;
        if p.is_claimed(resource) {
            return Err(AttachError::BadObjectState);
        }
        p.claims.push((resource, dev));
        Ok(())
    }

    /// Run `func` for this device after the current configuration pass.
    pub fn defer(&mut self, func: impl FnOnce(&mut AttachContext<'_>) + Send + 'static) {
        self.ac.config_defer(self.dev, Box::new(func));
    }

    /// Run `func` for this device once interrupts are enabled.
    pub fn defer_until_interrupts(
        &mut self,
        func: impl FnOnce(&mut AttachContext<'_>) + Send + 'static,
    ) {
        self.ac.config_interrupts(self.dev, Box::new(func));
    }

    /// The private state of this device. Only available to deferred work;
    /// during attach the state doesn't exist yet.
    pub fn private<T: Any>(&self) -> Option<&T> {
        self.device().private()
    }

    pub fn private_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.ac.device_private_mut(self.dev)
    }
}
