//! Device tree nodes.
use autoconf_core::attach_args::BusClass;
use core::{any::Any, fmt};

/// Refers to a node of the device tree.
///
/// A handle of a node that was removed (after a failed attach) never
/// resolves again, even if its storage is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle {
    pub(crate) key: usize,
    pub(crate) generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeviceState {
    /// The driver's attach function is running.
    Attaching,
    Attached,
}

/// A node of the device tree.
pub struct Device {
    pub(crate) generation: u64,
    pub(crate) name: &'static str,
    pub(crate) unit: u32,
    pub(crate) xname: String,
    pub(crate) parent: Option<DeviceHandle>,
    pub(crate) children: Vec<DeviceHandle>,
    pub(crate) bus: BusClass,
    pub(crate) cf_index: usize,
    pub(crate) flags: u32,
    pub(crate) location: String,
    pub(crate) state: DeviceState,
    /// Set once, when attach succeeds. Never moved afterwards.
    pub(crate) private: Option<Box<dyn Any + Send>>,
    /// Singleton resources claimed on this node, and the children holding
    /// them.
    pub(crate) claims: Vec<(&'static str, DeviceHandle)>,
}

impl Device {
    /// The driver name, e.g., `com`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn unit(&self) -> u32 {
        self.unit
    }

    /// The external name, e.g., `com0`.
    pub fn xname(&self) -> &str {
        &self.xname
    }

    pub fn parent(&self) -> Option<DeviceHandle> {
        self.parent
    }

    /// The children in attach order.
    pub fn children(&self) -> &[DeviceHandle] {
        &self.children
    }

    /// The bus class the device attached at.
    pub fn bus(&self) -> BusClass {
        self.bus
    }

    /// The index of the configuration row the device came from.
    pub fn cf_index(&self) -> usize {
        self.cf_index
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// The location as printed in the attach line.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_attached(&self) -> bool {
        self.state == DeviceState::Attached
    }

    pub fn is_claimed(&self, resource: &str) -> bool {
        self.claimant(resource).is_some()
    }

    /// Get the child holding the claim on `resource`.
    pub fn claimant(&self, resource: &str) -> Option<DeviceHandle> {
        self.claims
            .iter()
            .find(|&&(r, _)| r == resource)
            .map(|&(_, child)| child)
    }

    /// Get the private state if it is of type `T`.
    pub fn private<T: Any>(&self) -> Option<&T> {
        self.private.as_deref()?.downcast_ref()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("xname", &self.xname)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("bus", &self.bus)
            .field("state", &self.state)
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}
