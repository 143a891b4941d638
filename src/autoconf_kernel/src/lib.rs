//! Device autoconfiguration.
//!
//! Drivers are bound to bus locations through a [configuration
//! table](cfdata). Starting from the root device, every bus driver offers
//! each location it finds to the [match/probe dispatcher](Autoconf::probe),
//! which asks the candidate drivers for a score and attaches the best one.
//! Attached devices form a [device tree](device) that owns each driver's
//! private state.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod autoconf;
pub mod cfdata;
pub mod device;
pub mod driver;
pub mod error;
pub mod ioconf;

#[doc(no_inline)]
pub use crate::{
    autoconf::{AttachContext, Autoconf, ProbeContext},
    cfdata::{CfAttach, CfData, CfUnit, ConfigEntry, ConfigTable},
    device::{Device, DeviceHandle},
    driver::Driver,
    error::{ConfigError, FatalError},
};
