//! The same configuration on host bridges with different I/O space
//! layouts.
use autoconf_core::bus_space::{
    chipdep::{PhysMemory, Swizzled},
    Width,
};
use autoconf_port_std::machine::{BoardConfig, Chipset, Com, GENERIC, ISA_IO_WINDOW};

use crate::{boot, device};

#[test]
fn every_chipset_finds_the_same_devices() {
    let (_, reference) = boot(BoardConfig::default(), GENERIC);
    for chipset in Chipset::ALL {
        let config = BoardConfig {
            chipset,
            ..BoardConfig::default()
        };
        let (_, ac) = boot(config, GENERIC);
        assert_eq!(ac.dump(), reference.dump(), "{chipset}");
        assert!(ac.errors().is_empty(), "{chipset}: {:?}", ac.errors());
    }
}

#[test]
fn sparse_registers_use_byte_lanes() {
    let config = BoardConfig {
        chipset: Chipset::Sparse,
        ..BoardConfig::default()
    };
    let (board, ac) = boot(config, GENERIC);
    let com0 = ac.device_private::<Com>(device(&ac, "com0")).unwrap();
    assert_eq!(com0.interrupt_enable(), 0x01);

    // LCR is at 0x3fb, lane 3 of its longword
    let mut longword = [0; 4];
    board
        .memory()
        .read(Swizzled::sparse_addr(ISA_IO_WINDOW, 0x3fb, Width::W1), &mut longword);
    assert_eq!(longword, [0, 0, 0, 0x03]);

    // The dense address of the same register is unpopulated
    assert!(!board.memory().is_populated(ISA_IO_WINDOW + 0x3fb));
}

#[test]
fn chipset_names() {
    for chipset in Chipset::ALL {
        assert_eq!(chipset.to_string().parse::<Chipset>(), Ok(chipset));
    }
    assert!("dense".parse::<Chipset>().is_err());
}
