use autoconf_core::{
    attach_args::{IsaAttachArgs, MainbusAttachArgs},
    bus_space::BusSpaceTag,
    error::AttachError,
    intr::InterruptTag,
};
use autoconf_kernel::{
    autoconf::{AttachContext, ProbeContext},
    cfdata::CfData,
    device::DeviceHandle,
    driver::Driver,
};

/// The ISA bus. ISA devices can't be enumerated, so every configuration
/// row is given a chance to probe the location it names.
#[derive(Debug)]
pub struct Isa {
    iot: BusSpaceTag,
    memt: BusSpaceTag,
    ic: InterruptTag,
    children: Vec<DeviceHandle>,
}

impl Isa {
    pub fn iot(&self) -> &BusSpaceTag {
        &self.iot
    }

    pub fn memt(&self) -> &BusSpaceTag {
        &self.memt
    }

    pub fn ic(&self) -> &InterruptTag {
        &self.ic
    }

    /// The devices found by the search, in attach order.
    pub fn children(&self) -> &[DeviceHandle] {
        &self.children
    }
}

impl Driver for Isa {
    const NAME: &'static str = "isa";
    type Args = MainbusAttachArgs;

    fn probe(_: &ProbeContext<'_>, _: &CfData, args: &MainbusAttachArgs) -> u32 {
        (args.name == "isa" && args.iot.is_some() && args.memt.is_some() && args.ic.is_some())
            as u32
    }

    fn attach(ctx: &mut AttachContext<'_>, args: &MainbusAttachArgs) -> Result<Self, AttachError> {
        let (Some(iot), Some(memt), Some(ic)) = (&args.iot, &args.memt, &args.ic) else {
            return Err(AttachError::NotSupported);
        };

        let children =
            ctx.config_search(IsaAttachArgs::new(iot.clone(), memt.clone(), ic.clone()))?;
        log::debug!("{}: {} device(s) found", ctx.xname(), children.len());

        Ok(Self {
            iot: iot.clone(),
            memt: memt.clone(),
            ic: ic.clone(),
            children,
        })
    }
}
