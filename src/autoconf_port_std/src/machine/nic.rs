//! Network interfaces on PCI.
//!
//! `wm` only matches the exact chip it drives and outbids `ne`, which
//! matches any Ethernet function and drives it through the NE2000 register
//! subset.
use autoconf_core::{
    attach_args::{PciAttachArgs, PciId},
    bus_space::{BusSize, BusSpace, BusSpaceHandle, BusSpaceTag, MapFlags},
    error::AttachError,
    intr::{InterruptTag, IntrHandle, Ipl, Ist},
};
use autoconf_kernel::{
    autoconf::{AttachContext, ProbeContext},
    cfdata::CfData,
    driver::Driver,
};
use std::sync::Arc;

pub(super) const PCI_CLASS_NETWORK: u8 = 0x02;
pub(super) const PCI_SUBCLASS_NETWORK_ETHERNET: u8 = 0x00;

/// Intel 82540EM Gigabit Ethernet.
pub(super) const I82540EM: PciId = PciId {
    vendor: 0x8086,
    product: 0x100e,
};

const WM_STATUS: BusSize = 0x08;
const WM_ICR: BusSize = 0xc0;
const NE_ISR: BusSize = 0x07;

/// The state shared by the NIC drivers: the register window and the
/// interrupt.
#[derive(Debug)]
struct NicRegs {
    memt: BusSpaceTag,
    memh: BusSpaceHandle,
    ic: InterruptTag,
    ih: Option<IntrHandle>,
}

impl NicRegs {
    /// Map the register BAR and hook up the interrupt, which is handled by
    /// `isr`. Nothing is left mapped on failure.
    fn attach(
        ctx: &AttachContext<'_>,
        args: &PciAttachArgs,
        isr: fn(&dyn BusSpace, &BusSpaceHandle) -> bool,
    ) -> Result<Self, AttachError> {
        let (base, size) = args.mem_bar.ok_or(AttachError::NotSupported)?;
        let memt = args.memt.clone();
        let memh = memt.map(base, size, MapFlags::empty())?;

        let ih = match args.intr_line {
            None => {
                log::warn!("{}: no interrupt line", ctx.xname());
                None
            }
            Some(irq) => {
                let (t, h) = (memt.clone(), memh);
                match args
                    .ic
                    .establish(irq, Ipl::Net, Ist::Level, Arc::new(move || isr(&*t, &h)))
                {
                    Ok(ih) => {
                        log::info!(
                            "{}: interrupting at {}",
                            ctx.xname(),
                            args.ic.intr_string(irq)
                        );
                        Some(ih)
                    }
                    Err(e) => {
                        log::error!("{}: couldn't establish interrupt: {e}", ctx.xname());
                        if let Err(e) = memt.unmap(memh) {
                            log::warn!("{}: unmap failed: {e}", ctx.xname());
                        }
                        return Err(e.into());
                    }
                }
            }
        };

        Ok(Self {
            memt,
            memh,
            ic: args.ic.clone(),
            ih,
        })
    }

    fn intr_string(&self) -> Option<String> {
        let ih = self.ih.as_ref()?;
        Some(self.ic.intr_string(ih.irq()))
    }

    /// Undo [`Self::attach`].
    fn detach(self) {
        if let Some(ih) = &self.ih {
            if let Err(e) = self.ic.disestablish(ih) {
                log::warn!("couldn't disestablish interrupt: {e}");
            }
        }
        if let Err(e) = self.memt.unmap(self.memh) {
            log::warn!("unmap failed: {e}");
        }
    }
}

/// Intel PRO/1000.
#[derive(Debug)]
pub struct Wm {
    regs: NicRegs,
    status: u32,
}

impl Wm {
    /// The device status register as read during attach.
    pub fn status(&self) -> u32 {
        self.status
    }

    pub fn intr_string(&self) -> Option<String> {
        self.regs.intr_string()
    }

    fn intr(memt: &dyn BusSpace, memh: &BusSpaceHandle) -> bool {
        // Reading ICR acknowledges everything it reports
        memt.read_4(memh, WM_ICR) != 0
    }
}

impl Driver for Wm {
    const NAME: &'static str = "wm";
    type Args = PciAttachArgs;

    fn probe(_: &ProbeContext<'_>, _: &CfData, args: &PciAttachArgs) -> u32 {
        if args.id == I82540EM {
            10
        } else {
            0
        }
    }

    fn attach(ctx: &mut AttachContext<'_>, args: &PciAttachArgs) -> Result<Self, AttachError> {
        log::info!("{}: Intel i82540EM 1000BASE-T Ethernet", ctx.xname());
        let regs = NicRegs::attach(ctx, args, Self::intr)?;
        let status = regs.memt.read_4(&regs.memh, WM_STATUS);
        Ok(Self { regs, status })
    }

    fn detach(self) {
        self.regs.detach();
    }
}

/// NE2000-compatible Ethernet.
#[derive(Debug)]
pub struct Ne {
    regs: NicRegs,
}

impl Ne {
    pub fn intr_string(&self) -> Option<String> {
        self.regs.intr_string()
    }

    fn intr(memt: &dyn BusSpace, memh: &BusSpaceHandle) -> bool {
        memt.read_1(memh, NE_ISR) != 0
    }
}

impl Driver for Ne {
    const NAME: &'static str = "ne";
    type Args = PciAttachArgs;

    fn probe(_: &ProbeContext<'_>, _: &CfData, args: &PciAttachArgs) -> u32 {
        (args.class == PCI_CLASS_NETWORK && args.subclass == PCI_SUBCLASS_NETWORK_ETHERNET) as u32
    }

    fn attach(ctx: &mut AttachContext<'_>, args: &PciAttachArgs) -> Result<Self, AttachError> {
        log::info!(
            "{}: NE2000-compatible Ethernet ({:04x}:{:04x})",
            ctx.xname(),
            args.id.vendor,
            args.id.product
        );
        Ok(Self {
            regs: NicRegs::attach(ctx, args, Self::intr)?,
        })
    }

    fn detach(self) {
        self.regs.detach();
    }
}
