use autoconf_core::{attach_args::MainbusAttachArgs, error::AttachError};
use autoconf_kernel::{
    autoconf::{AttachContext, ProbeContext},
    cfdata::CfData,
    driver::Driver,
};

/// The resource the first CPU to attach claims on the main bus.
const PRIMARY: &str = "primary-cpu";

#[derive(Debug)]
pub struct Cpu {
    slot: u32,
    primary: bool,
}

impl Cpu {
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Get a flag indicating whether this is the CPU the system booted on.
    pub fn is_primary(&self) -> bool {
        self.primary
    }
}

impl Driver for Cpu {
    const NAME: &'static str = "cpu";
    type Args = MainbusAttachArgs;

    fn probe(_: &ProbeContext<'_>, _: &CfData, args: &MainbusAttachArgs) -> u32 {
        (args.name == "cpu") as u32
    }

    fn attach(ctx: &mut AttachContext<'_>, args: &MainbusAttachArgs) -> Result<Self, AttachError> {
        let taken = ctx
            .parent()
            .and_then(|p| ctx.autoconf().device(p))
            .map_or(false, |p| p.is_claimed(PRIMARY));
        let primary = !taken;
        if primary {
            ctx.claim_on_parent(PRIMARY)?;
            log::info!("{}: primary cpu", ctx.xname());
        }
        Ok(Self {
            slot: args.slot,
            primary,
        })
    }
}
