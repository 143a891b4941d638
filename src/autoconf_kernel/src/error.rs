//! Boot-level errors.
use autoconf_core::{attach_args::BusClass, error::AttachError};
use thiserror::Error;

/// An error that leaves the system without a device tree. The port is
/// expected to halt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    #[error("no configuration row matches root device '{0}'")]
    RootNotFound(String),
    #[error("the root device is already configured")]
    RootAlreadyConfigured,
    #[error("root device '{name}' failed to attach: {error}")]
    RootAttachFailed { name: String, error: AttachError },
    #[error("configuration attempted from interrupt context")]
    BadContext,
}

/// A configuration failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A device failed to attach. It was removed from the tree and the
    /// rest of the configuration went on.
    #[error("{xname}: attach failed: {error}")]
    Recoverable { xname: String, error: AttachError },
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl ConfigError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// A malformed configuration table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigTableError {
    #[error("driver '{name}' has more than one attachment at '{bus}'")]
    DuplicateAttachment { name: &'static str, bus: BusClass },
    #[error("driver '{name}' has no attachment at '{bus}'")]
    UnknownAttachment { name: &'static str, bus: BusClass },
    #[error("'{name}{unit}' is declared more than once")]
    DuplicateUnit { name: &'static str, unit: u32 },
    #[error("'{name}' attaches at unknown driver '{parent}'")]
    UnknownParent {
        name: &'static str,
        parent: &'static str,
    },
    #[error("'{name}' attaches at '{bus}', which '{parent}' doesn't provide")]
    ParentBusMismatch {
        name: &'static str,
        parent: &'static str,
        bus: BusClass,
    },
    #[error("'{name}' gives locator '{locator}' more than once")]
    DuplicateLocator {
        name: &'static str,
        locator: &'static str,
    },
    #[error("'{name}{unit}' exceeds the highest unit number")]
    UnitOutOfRange { name: &'static str, unit: u32 },
    #[error("'{name}' uses locator '{locator}', which '{bus}' doesn't have")]
    UnknownLocator {
        name: &'static str,
        bus: BusClass,
        locator: &'static str,
    },
}
