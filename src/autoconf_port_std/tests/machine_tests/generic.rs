//! The default board with the generic configuration.
use autoconf_core::{bus_space::MapFlags, error::MapError};
use autoconf_port_std::machine::{BoardConfig, Com, Cpu, Mainbus, Ne, Pci, Wm, GENERIC};

use crate::{boot, device};

#[test]
fn device_tree() {
    let (_, ac) = boot(BoardConfig::default(), GENERIC);
    assert_eq!(
        ac.dump(),
        "mainbus0\n\
         \x20 cpu0 (slot 0)\n\
         \x20 cpu1 (slot 1)\n\
         \x20 isa0 (slot 2)\n\
         \x20   com0 (port 0x3f8 irq 4)\n\
         \x20   com1 (port 0x2f8 irq 3)\n\
         \x20 pci0 (slot 3)\n\
         \x20   wm0 (dev 3 function 0)\n\
         \x20   ne0 (dev 4 function 0)\n"
    );
    assert!(ac.errors().is_empty(), "{:?}", ac.errors());
    assert!(!ac.is_cold());
}

#[test]
fn one_primary_cpu() {
    let (_, ac) = boot(BoardConfig::default(), GENERIC);
    let (cpu0, cpu1) = (device(&ac, "cpu0"), device(&ac, "cpu1"));

    assert!(ac.device_private::<Cpu>(cpu0).unwrap().is_primary());
    assert!(!ac.device_private::<Cpu>(cpu1).unwrap().is_primary());
    assert_eq!(ac.device_private::<Cpu>(cpu1).unwrap().slot(), 1);

    let mainbus = ac.device(device(&ac, "mainbus0")).unwrap();
    assert_eq!(mainbus.claimant("primary-cpu"), Some(cpu0));
    assert_eq!(ac.device_private::<Mainbus>(ac.root().unwrap()).unwrap().slots(), 4);
}

#[test]
fn specific_nic_driver_wins() {
    let (_, ac) = boot(BoardConfig::default(), GENERIC);

    let wm0 = device(&ac, "wm0");
    assert_eq!(ac.device(wm0).unwrap().location(), "dev 3 function 0");
    assert_eq!(
        ac.device_private::<Wm>(wm0).unwrap().intr_string().as_deref(),
        Some("irq 11")
    );

    // The generic driver only got the function `wm` doesn't know
    let ne0 = device(&ac, "ne0");
    assert_eq!(ac.device(ne0).unwrap().location(), "dev 4 function 0");
    assert_eq!(
        ac.device_private::<Ne>(ne0).unwrap().intr_string().as_deref(),
        Some("irq 10")
    );
    assert_eq!(ac.find_by_xname("ne1"), None);

    let pci = ac.device_private::<Pci>(device(&ac, "pci0")).unwrap();
    assert_eq!(pci.functions(), 3);
    assert_eq!(ac.device(device(&ac, "pci0")).unwrap().children().len(), 2);
}

#[test]
fn attached_uarts_hold_their_ports() {
    let (board, ac) = boot(BoardConfig::default(), GENERIC);

    let com0 = ac.device_private::<Com>(device(&ac, "com0")).unwrap();
    assert_eq!(com0.ioh().addr(), 0x3f8);
    assert!(!com0.is_polled());

    assert_eq!(
        board.iot().map(0x3f8, 8, MapFlags::empty()),
        Err(MapError::Busy)
    );
    assert_eq!(
        board.iot().map(0x2fc, 1, MapFlags::empty()),
        Err(MapError::Busy)
    );

    // The probe of the absent third UART released its ports
    let ioh = board.iot().map(0x3e8, 8, MapFlags::empty()).unwrap();
    board.iot().unmap(ioh).unwrap();
}

#[test]
fn unit_lookup() {
    let (_, ac) = boot(BoardConfig::default(), GENERIC);

    let com1 = device(&ac, "com1");
    assert_eq!(ac.device_lookup("com", 1), Some(com1));
    let dev = ac.device(com1).unwrap();
    assert_eq!((dev.name(), dev.unit(), dev.xname()), ("com", 1, "com1"));
    assert_eq!(ac.device(dev.parent().unwrap()).unwrap().xname(), "isa0");
    assert_eq!(ac.device_lookup("com", 2), None);
}
