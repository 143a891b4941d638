//! The vocabulary shared by device drivers, bus drivers, and ports.
//!
//! - [`attach_args`]: what a parent tells a child about its location.
//! - [`bus_space`]: width-explicit, chip-independent device register access.
//! - [`extent`]: allocation of address ranges, usable before the heap is.
//! - [`intr`]: interrupt priority levels, trigger types, and the interrupt
//!   controller interface.
//! - [`error`]: result codes and per-operation error types.
#![deny(unsafe_op_in_unsafe_fn)]

#[macro_use]
pub mod error;
pub mod attach_args;
pub mod bus_space;
pub mod extent;
pub mod intr;

/// The prelude module.
pub mod prelude {
    #[doc(no_inline)]
    pub use crate::{
        attach_args::{AttachArgs, BusArgs, BusClass, LocValue, Locator, LOC_WILDCARD},
        bus_space::{BusSpace, BusSpaceHandle, BusSpaceTag, MapFlags},
        error::AttachError,
        intr::{InterruptController, InterruptTag, Ipl, Ist},
    };
}
