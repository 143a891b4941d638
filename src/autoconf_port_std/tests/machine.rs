//! Boots the simulated machine under various configurations.
use autoconf_kernel::{autoconf::Autoconf, device::DeviceHandle};
use autoconf_port_std::machine::{BoardConfig, SimBoard, ATTACHMENTS};
use std::sync::Arc;

mod machine_tests {
    pub mod chipsets;
    pub mod generic;
    pub mod interrupts;
    pub mod misconfig;
}

/// The bus rows every test configuration starts with.
const BUSSES: &str = "\
mainbus0 at root
cpu*     at mainbus?
isa0     at mainbus?
pci0     at mainbus?
";

fn init_logger() {
    let _ = autoconf_port_std::env_logger::builder()
        .is_test(true)
        .try_init();
}

fn boot(config: BoardConfig, ioconf: &str) -> (Arc<SimBoard>, Autoconf) {
    init_logger();
    let board = SimBoard::new(config).unwrap();
    let table = autoconf_port_std::load_table(ioconf, ATTACHMENTS).unwrap();
    let ac = autoconf_port_std::boot(&board, table);
    (board, ac)
}

fn device(ac: &Autoconf, xname: &str) -> DeviceHandle {
    ac.find_by_xname(xname)
        .unwrap_or_else(|| panic!("{xname} is not configured:\n{}", ac.dump()))
}
