//! Simulation environment for running autoconfiguration on a hosted
//! environment.
//!
//! The [simulated machine](machine) is backed by [simulated physical
//! memory](memory) and a [simulated interrupt controller](intc). [`boot`]
//! configures it from a kernel configuration the way a kernel would at
//! startup.
#![deny(unsafe_op_in_unsafe_fn)]
use autoconf_kernel::{
    autoconf::Autoconf,
    cfdata::{CfAttach, ConfigTable},
    error::ConfigTableError,
    ioconf::{self, ParseError},
};
use std::sync::Arc;

pub mod intc;
pub mod machine;
pub mod memory;

use machine::SimBoard;

/// Used by the front end and the tests
#[doc(hidden)]
pub extern crate env_logger;

/// The name of the root device of the simulated machine.
pub const ROOT_DEVICE: &str = "mainbus";

/// Error type for [`load_table`].
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Table(#[from] ConfigTableError),
}

/// Initialize the logger. Honors `RUST_LOG`; logs attach lines by default.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Build a configuration table from the device lines in `src`, resolving
/// driver names against `attachments`.
pub fn load_table(src: &str, attachments: &[CfAttach]) -> Result<ConfigTable, LoadError> {
    let data = ioconf::parse(src, attachments)?;
    Ok(ConfigTable::new(attachments, &data)?)
}

/// Configure `board` according to `table`.
///
/// # Panics
///
/// Panics if the root device can't be configured. A kernel can't continue
/// without one.
pub fn boot(board: &Arc<SimBoard>, table: ConfigTable) -> Autoconf {
    let mut ac = Autoconf::new(table);
    if let Err(e) = ac.configure(ROOT_DEVICE, board.root_args().into()) {
        panic!("configure: {e}");
    }
    ac
}
