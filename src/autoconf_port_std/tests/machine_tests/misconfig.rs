//! Configurations that don't match the hardware.
use assert_matches::assert_matches;
use autoconf_kernel::{error::ConfigTableError, ioconf::ParseErrorKind};
use autoconf_port_std::{
    load_table,
    machine::{BoardConfig, BoardError, SimBoard, ATTACHMENTS},
    LoadError,
};

use crate::{boot, device, BUSSES};

#[test]
#[should_panic = "configure: no configuration row matches root device 'mainbus'"]
fn disabled_root_is_fatal() {
    boot(BoardConfig::default(), "mainbus0 at root disable\n");
}

#[test]
fn missing_bus_leaves_children_unconfigured() {
    let config = BoardConfig {
        isa: false,
        ..BoardConfig::default()
    };
    let (_, ac) = boot(config, &format!("{BUSSES}com0 at isa? port 0x3f8 irq 4\n"));
    assert_eq!(ac.find_by_xname("isa0"), None);
    assert_eq!(ac.find_by_xname("com0"), None);
    device(&ac, "pci0");
    assert!(ac.errors().is_empty());
}

#[test]
fn absent_uart_is_not_attached() {
    let ioconf = format!(
        "{BUSSES}\
         com0 at isa? port 0x3f8 irq 4\n\
         com1 at isa? port 0x2e8 irq 3\n"
    );
    let (_, ac) = boot(BoardConfig::default(), &ioconf);
    device(&ac, "com0");
    assert_eq!(ac.find_by_xname("com1"), None);
    assert!(ac.errors().is_empty());
}

#[test]
fn disabled_row_is_skipped() {
    let ioconf = format!(
        "{BUSSES}\
         com0 at isa? port 0x3f8 irq 4\n\
         com1 at isa? port 0x2f8 irq 3 disable\n"
    );
    let (_, ac) = boot(BoardConfig::default(), &ioconf);
    device(&ac, "com0");
    assert_eq!(ac.find_by_xname("com1"), None);
}

#[test]
fn star_rows_number_after_fixed_units() {
    let ioconf = format!(
        "{BUSSES}\
         com* at isa? port 0x2f8 irq 3\n\
         com0 at isa? port 0x3f8 irq 4\n"
    );
    let (_, ac) = boot(BoardConfig::default(), &ioconf);
    assert_eq!(ac.device(device(&ac, "com1")).unwrap().location(), "port 0x2f8 irq 3");
    assert_eq!(ac.device(device(&ac, "com0")).unwrap().location(), "port 0x3f8 irq 4");

    // Searched in table order, so the star row attached first
    let isa0 = ac.device(device(&ac, "isa0")).unwrap();
    let names: Vec<_> = isa0
        .children()
        .iter()
        .map(|&c| ac.device(c).unwrap().xname())
        .collect();
    assert_eq!(names, ["com1", "com0"]);
}

#[test]
fn star_row_is_offered_until_it_declines() {
    // The second offer finds the ports taken
    let (_, ac) = boot(
        BoardConfig::default(),
        &format!("{BUSSES}com* at isa? port 0x3f8 irq 4\n"),
    );
    device(&ac, "com0");
    assert_eq!(ac.find_by_xname("com1"), None);
    assert!(ac.errors().is_empty());
}

#[test]
fn wildcard_port_is_never_probed() {
    let (_, ac) = boot(
        BoardConfig::default(),
        &format!("{BUSSES}com* at isa? port ? irq ?\n"),
    );
    assert_eq!(ac.device_lookup("com", 0), None);
}

#[test]
fn load_errors() {
    assert_matches!(
        load_table("com0 at eisa?", ATTACHMENTS),
        Err(LoadError::Parse(e)) if e.line == 1 && matches!(e.kind, ParseErrorKind::UnknownBus(_))
    );
    assert_matches!(
        load_table("mainbus0 at root\nmainbus0 at root\n", ATTACHMENTS),
        Err(LoadError::Table(ConfigTableError::DuplicateUnit { name: "mainbus", unit: 0 }))
    );
    assert_matches!(
        load_table("lpt0 at isa? port 0x378", ATTACHMENTS),
        Err(LoadError::Parse(e)) if matches!(e.kind, ParseErrorKind::UnknownAttachment { .. })
    );
    assert_matches!(
        load_table("com0 at isa? port 0x3f8 port 0x2f8", ATTACHMENTS),
        Err(LoadError::Parse(e)) if e.kind == ParseErrorKind::DuplicateLocator("port")
    );
    assert_matches!(
        load_table("mainbus0 at root\ncpu4294967295 at mainbus?\n", ATTACHMENTS),
        Err(LoadError::Table(ConfigTableError::UnitOutOfRange { name: "cpu", unit: u32::MAX }))
    );
    assert_matches!(
        load_table("mainbus0 at root\ncpu4000000000 at mainbus?\n", ATTACHMENTS),
        Err(LoadError::Table(ConfigTableError::UnitOutOfRange { name: "cpu", .. }))
    );
}

fn board_with_ports(com_ports: Vec<u64>) -> Result<(), BoardError> {
    let config = BoardConfig {
        com_ports,
        ..BoardConfig::default()
    };
    SimBoard::new(config).map(drop)
}

#[test]
fn bad_uart_ports() {
    assert_eq!(board_with_ports(vec![]), Ok(()));
    assert_eq!(board_with_ports(vec![0x3f8, 0x400]), Ok(()));
    assert_eq!(
        board_with_ports(vec![0x3f8, 0x3f8]),
        Err(BoardError::ComOverlap(0x3f8, 0x3f8))
    );
    assert_eq!(
        board_with_ports(vec![0x2f8, 0x3f8, 0x3fc]),
        Err(BoardError::ComOverlap(0x3f8, 0x3fc))
    );
    assert_eq!(
        board_with_ports(vec![0xfffc]),
        Err(BoardError::ComOutOfRange(0xfffc))
    );
    assert_eq!(
        board_with_ports(vec![u64::MAX - 3]),
        Err(BoardError::ComOutOfRange(u64::MAX - 3))
    );
}

#[test]
fn bad_pci_bars() {
    let mut config = BoardConfig::default();
    config.pci[1].mem_bar = Some((0x8001_f000, 0x1000));
    assert_eq!(
        SimBoard::new(config).map(drop),
        Err(BoardError::BarOverlap(3, 0, 4, 0))
    );

    let mut config = BoardConfig::default();
    config.pci[0].mem_bar = Some((0xbfff_f000, 0x2000));
    assert_eq!(
        SimBoard::new(config.clone()).map(drop),
        Err(BoardError::BarOutOfRange {
            device: 3,
            function: 0
        })
    );
    config.pci[0].mem_bar = Some((u64::MAX, 0x2_0000));
    assert_matches!(
        SimBoard::new(config).map(drop),
        Err(BoardError::BarOutOfRange { device: 3, .. })
    );
}
