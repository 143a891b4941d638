//! Interrupt establishment by the simulated drivers.
use assert_matches::assert_matches;
use autoconf_core::{
    attach_args::{IsaAttachArgs, MainbusAttachArgs, PciId},
    bus_space::{chipdep::PhysMemory, MapFlags},
    error::AttachError,
    intr::Ist,
};
use autoconf_kernel::{
    autoconf::{AttachContext, ProbeContext},
    cfdata::{CfAttach, CfData},
    driver::Driver,
    error::ConfigError,
};
use autoconf_port_std::machine::{
    BoardConfig, Com, Cpu, Mainbus, Ne, Pci, PciFunction, SimBoard, GENERIC, PCI_MEM_WINDOW,
};

use crate::{boot, device, init_logger, BUSSES};

#[test]
fn uart_interrupt_reaches_its_driver() {
    let (board, ac) = boot(BoardConfig::default(), GENERIC);
    let com0 = ac.device_private::<Com>(device(&ac, "com0")).unwrap();

    // Enabled by work deferred until interrupts are on
    assert_eq!(com0.interrupt_enable(), 0x01);
    assert_eq!(com0.intr_string().as_deref(), Some("irq 4"));
    assert_eq!(board.intc().line_ist(4), Ok(Ist::Edge));

    board.raise_irq(4);
    board.raise_irq(4);
    assert_eq!(com0.intr_count(), 2);
    assert_eq!(board.intc().event_count(4), Ok(2));
    assert_eq!(board.intc().stray_count(), 0);
}

#[test]
fn polled_uart() {
    let ioconf = format!("{BUSSES}com0 at isa? port 0x3f8 irq 4 flags 0x1\n");
    let (board, ac) = boot(BoardConfig::default(), &ioconf);
    let com0 = ac.device_private::<Com>(device(&ac, "com0")).unwrap();

    assert!(com0.is_polled());
    assert_eq!(com0.interrupt_enable(), 0);
    assert_eq!(board.intc().handler_count(4), Ok(0));

    board.raise_irq(4);
    assert_eq!(com0.intr_count(), 0);
    assert_eq!(board.intc().stray_count(), 1);
}

fn ne2000(device: u32, bar: u64) -> PciFunction {
    PciFunction {
        device,
        function: 0,
        id: PciId {
            vendor: 0x10ec,
            product: 0x8029,
        },
        class: 0x02,
        subclass: 0x00,
        mem_bar: Some((bar, 0x1000)),
        intr_line: Some(9),
    }
}

#[test]
fn shared_level_triggered_line() {
    let config = BoardConfig {
        pci: vec![ne2000(1, 0x8000_0000), ne2000(2, 0x8000_1000)],
        ..BoardConfig::default()
    };
    let (board, ac) = boot(config, &format!("{BUSSES}ne* at pci? dev ? function ?\n"));

    device(&ac, "ne0");
    device(&ac, "ne1");
    assert_eq!(board.intc().handler_count(9), Ok(2));
    assert_eq!(board.intc().line_ist(9), Ok(Ist::Level));

    // Neither card reports a cause
    board.raise_irq(9);
    assert_eq!(board.intc().stray_count(), 1);

    // The second card does
    board.memory().write(PCI_MEM_WINDOW + 0x8000_1007, &[0x01]);
    board.raise_irq(9);
    assert_eq!(board.intc().stray_count(), 1);
    assert_eq!(board.intc().event_count(9), Ok(2));
}

#[test]
fn trigger_type_conflict_fails_the_later_device() {
    let mut config = BoardConfig::default();
    config.pci.truncate(1);
    let ioconf = format!(
        "{BUSSES}\
         com0 at isa? port 0x3f8 irq 11\n\
         wm*  at pci? dev ? function ?\n\
         ne*  at pci? dev ? function ?\n"
    );
    let (board, ac) = boot(config, &ioconf);

    device(&ac, "com0");
    assert_eq!(ac.find_by_xname("wm0"), None);
    // `ne` lost the match; it doesn't get a second chance
    assert_eq!(ac.find_by_xname("ne0"), None);
    assert_matches!(
        ac.errors(),
        [ConfigError::Recoverable {
            xname,
            error: AttachError::Busy,
        }] if xname == "wm0"
    );
    assert_eq!(board.intc().line_ist(11), Ok(Ist::Edge));

    // The BAR was released
    let memh = board
        .pci_memt()
        .map(0x8000_0000, 0x2_0000, MapFlags::empty())
        .unwrap();
    board.pci_memt().unmap(memh).unwrap();

    // Not even a failed node takes a unit
    assert_eq!(ac.device_lookup("wm", 0), None);
    assert!(ac.device_private::<Ne>(device(&ac, "com0")).is_none());
}

/// An ISA bus that runs out of resources after configuring its children.
struct FailingIsa;

impl Driver for FailingIsa {
    const NAME: &'static str = "isa";
    type Args = MainbusAttachArgs;

    fn probe(_: &ProbeContext<'_>, _: &CfData, args: &MainbusAttachArgs) -> u32 {
        (args.name == "isa") as u32
    }

    fn attach(ctx: &mut AttachContext<'_>, args: &MainbusAttachArgs) -> Result<Self, AttachError> {
        let (Some(iot), Some(memt), Some(ic)) = (&args.iot, &args.memt, &args.ic) else {
            return Err(AttachError::NotSupported);
        };
        let children =
            ctx.config_search(IsaAttachArgs::new(iot.clone(), memt.clone(), ic.clone()))?;
        assert_eq!(children.len(), 1);
        Err(AttachError::NoSpace)
    }
}

static FAILING_ISA: &[CfAttach] = &[
    CfAttach::of::<Mainbus>(),
    CfAttach::of::<Cpu>(),
    CfAttach::of::<FailingIsa>(),
    CfAttach::of::<Pci>(),
    CfAttach::of::<Com>(),
];

#[test]
fn failed_bus_releases_its_children() {
    init_logger();
    let board = SimBoard::new(BoardConfig::default()).unwrap();
    let ioconf = format!("{BUSSES}com0 at isa? port 0x3f8 irq 4\n");
    let table = autoconf_port_std::load_table(&ioconf, FAILING_ISA).unwrap();
    let ac = autoconf_port_std::boot(&board, table);

    assert_matches!(
        ac.errors(),
        [ConfigError::Recoverable {
            xname,
            error: AttachError::NoSpace,
        }] if xname == "isa0"
    );
    assert_eq!(ac.find_by_xname("com0"), None);

    // The UART's ports are free again
    let ioh = board.iot().map(0x3f8, 8, MapFlags::empty()).unwrap();
    board.iot().unmap(ioh).unwrap();

    // So is its interrupt line
    assert_eq!(board.intc().handler_count(4), Ok(0));
    board.raise_irq(4);
    assert_eq!(board.intc().stray_count(), 1);
}
