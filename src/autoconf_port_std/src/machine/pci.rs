use autoconf_core::{attach_args::MainbusAttachArgs, error::AttachError};
use autoconf_kernel::{
    autoconf::{AttachContext, ProbeContext},
    cfdata::CfData,
    driver::Driver,
};

use super::SimBoard;

/// A PCI bus. Every function present is offered to the drivers; the most
/// specific driver wins.
#[derive(Debug)]
pub struct Pci {
    bus: u32,
    functions: usize,
}

impl Pci {
    pub fn bus(&self) -> u32 {
        self.bus
    }

    /// The number of functions found on the bus, configured or not.
    pub fn functions(&self) -> usize {
        self.functions
    }
}

impl Driver for Pci {
    const NAME: &'static str = "pci";
    type Args = MainbusAttachArgs;

    fn probe(_: &ProbeContext<'_>, _: &CfData, args: &MainbusAttachArgs) -> u32 {
        (args.name == "pci" && SimBoard::from_platform(args.platform.as_ref()).is_some()) as u32
    }

    fn attach(ctx: &mut AttachContext<'_>, args: &MainbusAttachArgs) -> Result<Self, AttachError> {
        let board = SimBoard::from_platform(args.platform.as_ref()).ok_or(AttachError::BadParam)?;
        let bus = ctx.unit();

        let functions = &board.config().pci;
        for f in functions {
            log::trace!(
                "{}: dev {} function {}: {:04x}:{:04x}",
                ctx.xname(),
                f.device,
                f.function,
                f.id.vendor,
                f.id.product
            );
            ctx.config_found(board.pci_args(bus, f))?;
        }

        Ok(Self {
            bus,
            functions: functions.len(),
        })
    }
}
