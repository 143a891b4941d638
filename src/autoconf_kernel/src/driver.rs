//! The typed driver interface.
use autoconf_core::{
    attach_args::{BusArgs, BusClass},
    error::AttachError,
};
use core::any::Any;

use crate::{
    autoconf::{AttachContext, ProbeContext},
    cfdata::CfData,
};

/// A device driver.
///
/// The driver value itself is the private state of an attached instance.
/// Register a driver with [`CfAttach::of`].
///
/// [`CfAttach::of`]: crate::cfdata::CfAttach::of
pub trait Driver: Any + Send + Sized {
    /// The driver name, which is also the prefix of its instances' names.
    const NAME: &'static str;

    /// The attach arguments the driver understands. This determines the
    /// bus class the driver attaches at.
    type Args: BusArgs;

    /// The bus class the driver's instances offer to their children, if
    /// it isn't the one named like the driver.
    const PROVIDES: Option<BusClass> = None;

    /// Decide whether the driver handles the device at `args`.
    ///
    /// Returns `0` to reject; among the accepting drivers, the highest
    /// score wins. Must not change hardware state in a way attach depends
    /// on.
    fn probe(ctx: &ProbeContext<'_>, cf: &CfData, args: &Self::Args) -> u32;

    /// Initialize the device. `args` is only borrowed for the call;
    /// anything needed later must be copied into the returned value.
    fn attach(ctx: &mut AttachContext<'_>, args: &Self::Args) -> Result<Self, AttachError>;

    /// Release what [`Self::attach`] acquired. Called when the instance is
    /// removed from the tree because an ancestor failed to attach; its
    /// children have been detached already.
    fn detach(self) {}
}
