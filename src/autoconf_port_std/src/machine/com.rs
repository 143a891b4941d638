use autoconf_core::{
    attach_args::{IsaAttachArgs, LOC_WILDCARD},
    bus_space::{BusSize, BusSpace, BusSpaceHandle, BusSpaceTag, MapFlags},
    error::AttachError,
    intr::{InterruptTag, IntrHandle, Ipl, Ist},
};
use autoconf_kernel::{
    autoconf::{AttachContext, ProbeContext},
    cfdata::CfData,
    driver::Driver,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// The number of I/O ports a 16550 decodes.
pub(super) const COM_NPORTS: BusSize = 8;

const COM_IER: BusSize = 1;
const COM_IIR: BusSize = 2;
const COM_LCR: BusSize = 3;
const COM_MCR: BusSize = 4;
const COM_SCRATCH: BusSize = 7;

const IER_ERXRDY: u8 = 0x01;
const IIR_NOPEND: u8 = 0x01;
const LCR_8BITS: u8 = 0x03;
const MCR_DTR: u8 = 0x01;
const MCR_RTS: u8 = 0x02;

/// Row flag: don't use interrupts.
pub const COM_HW_NOIEN: u32 = 0x01;

/// A 16550-compatible UART on the ISA bus.
#[derive(Debug)]
pub struct Com {
    iot: BusSpaceTag,
    ioh: BusSpaceHandle,
    ic: InterruptTag,
    ih: Option<IntrHandle>,
    intrs: Arc<AtomicU64>,
}

impl Com {
    pub fn ioh(&self) -> &BusSpaceHandle {
        &self.ioh
    }

    /// Get a flag indicating whether the UART is serviced by polling.
    pub fn is_polled(&self) -> bool {
        self.ih.is_none()
    }

    /// Describe the interrupt line, e.g., `"irq 4"`.
    pub fn intr_string(&self) -> Option<String> {
        let ih = self.ih.as_ref()?;
        Some(self.ic.intr_string(ih.irq()))
    }

    pub fn interrupt_enable(&self) -> u8 {
        self.iot.read_1(&self.ioh, COM_IER)
    }

    /// The number of interrupts the UART has serviced.
    pub fn intr_count(&self) -> u64 {
        self.intrs.load(Ordering::Relaxed)
    }

    /// Check for a UART by storing patterns to the scratch register.
    fn probe_subr(iot: &dyn BusSpace, ioh: &BusSpaceHandle) -> bool {
        [0x5a, 0xa5].into_iter().all(|pattern| {
            iot.write_1(ioh, COM_SCRATCH, pattern);
            iot.read_1(ioh, COM_SCRATCH) == pattern
        })
    }

    fn establish(
        args: &IsaAttachArgs,
        iot: &BusSpaceTag,
        ioh: BusSpaceHandle,
        intrs: &Arc<AtomicU64>,
    ) -> Result<IntrHandle, AttachError> {
        let irq = u32::try_from(args.irq).map_err(|_| AttachError::BadParam)?;
        let (iot, intrs) = (iot.clone(), intrs.clone());
        let ih = args.ic.establish(
            irq,
            Ipl::Serial,
            Ist::Edge,
            Arc::new(move || {
                if iot.read_1(&ioh, COM_IIR) & IIR_NOPEND != 0 {
                    return false;
                }
                intrs.fetch_add(1, Ordering::Relaxed);
                true
            }),
        )?;
        Ok(ih)
    }
}

impl Driver for Com {
    const NAME: &'static str = "com";
    type Args = IsaAttachArgs;

    fn probe(_: &ProbeContext<'_>, _: &CfData, args: &IsaAttachArgs) -> u32 {
        if args.iobase == LOC_WILDCARD {
            return 0;
        }
        let Ok(iobase) = u64::try_from(args.iobase) else {
            return 0;
        };
        // Someone else owns the ports
        let Ok(ioh) = args.iot.map(iobase, COM_NPORTS, MapFlags::empty()) else {
            return 0;
        };

        let found = Self::probe_subr(&*args.iot, &ioh);

        if let Err(e) = args.iot.unmap(ioh) {
            log::warn!("com: probe: unmap failed: {e}");
        }
        found as u32
    }

    fn attach(ctx: &mut AttachContext<'_>, args: &IsaAttachArgs) -> Result<Self, AttachError> {
        let iobase = u64::try_from(args.iobase).map_err(|_| AttachError::BadParam)?;
        let iot = args.iot.clone();
        let ioh = iot.map(iobase, COM_NPORTS, MapFlags::empty())?;

        iot.write_1(&ioh, COM_IER, 0);
        iot.write_1(&ioh, COM_LCR, LCR_8BITS);
        iot.write_1(&ioh, COM_MCR, MCR_DTR | MCR_RTS);

        let intrs = Arc::new(AtomicU64::new(0));
        let ih = if ctx.flags() & COM_HW_NOIEN != 0 {
            log::info!("{}: ns16550a, polled", ctx.xname());
            None
        } else {
            match Self::establish(args, &iot, ioh, &intrs) {
                Ok(ih) => {
                    log::info!(
                        "{}: ns16550a, interrupting at {}",
                        ctx.xname(),
                        args.ic.intr_string(ih.irq())
                    );
                    Some(ih)
                }
                Err(e) => {
                    log::error!("{}: couldn't establish interrupt: {e}", ctx.xname());
                    if let Err(e) = iot.unmap(ioh) {
                        log::warn!("{}: unmap failed: {e}", ctx.xname());
                    }
                    return Err(e);
                }
            }
        };

        if ih.is_some() {
            // Receiver interrupts are only wanted once something can take
            // them
            ctx.defer_until_interrupts(|ctx| {
                if let Some(com) = ctx.private::<Com>() {
                    com.iot.write_1(&com.ioh, COM_IER, IER_ERXRDY);
                    log::debug!("{}: receiver interrupts enabled", ctx.xname());
                }
            });
        }

        Ok(Self {
            iot,
            ioh,
            ic: args.ic.clone(),
            ih,
            intrs,
        })
    }

    fn detach(self) {
        self.iot.write_1(&self.ioh, COM_IER, 0);
        if let Some(ih) = &self.ih {
            if let Err(e) = self.ic.disestablish(ih) {
                log::warn!("com: couldn't disestablish interrupt: {e}");
            }
        }
        if let Err(e) = self.iot.unmap(self.ioh) {
            log::warn!("com: unmap failed: {e}");
        }
    }
}
