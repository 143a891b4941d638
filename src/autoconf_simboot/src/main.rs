use autoconf_kernel::{autoconf::Autoconf, error::FatalError};
use autoconf_port_std::{
    machine::{BoardConfig, BoardError, Chipset, SimBoard, ATTACHMENTS, GENERIC, NUM_IRQS},
    LoadError, ROOT_DEVICE,
};
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = main_inner() {
        log::error!("Command failed.\n{:?}", e);
        std::process::exit(1);
    }
}

#[derive(Error, Debug)]
enum MainError {
    #[error("Could not read the kernel configuration '{0}'.")]
    ReadConfig(PathBuf, #[source] std::io::Error),
    #[error("Invalid kernel configuration.")]
    LoadConfig(#[source] LoadError),
    #[error("Invalid board configuration.")]
    Board(#[source] BoardError),
    #[error("Could not configure the root device.")]
    Configure(#[source] FatalError),
    #[error("{0} device(s) failed to attach.")]
    AttachFailed(usize),
    #[error("Interrupt line {0} does not exist.")]
    BadIrq(u32),
}

/// Boots a simulated machine and prints the devices it found
#[derive(Parser)]
struct Opt {
    /// Kernel configuration to boot with. The built-in generic configuration
    /// is used if omitted
    ioconf: Option<PathBuf>,
    /// Print the built-in generic configuration and exit
    #[arg(long)]
    print_generic: bool,
    /// Number of CPUs
    #[arg(long, default_value_t = 2)]
    cpus: u32,
    /// How the host bridge lays out ISA I/O space
    #[arg(long, default_value_t = Chipset::Linear)]
    chipset: Chipset,
    /// Leave the ISA bus off the board
    #[arg(long)]
    no_isa: bool,
    /// Leave the PCI bus off the board
    #[arg(long)]
    no_pci: bool,
    /// I/O port base of a UART on the ISA bus (may be repeated)
    #[arg(long = "com", value_parser = parse_port, default_values = ["0x3f8", "0x2f8"])]
    com_ports: Vec<u64>,
    /// Assert this interrupt line after booting (may be repeated)
    #[arg(long = "irq")]
    irqs: Vec<u32>,
    /// Fail if any device fails to attach
    #[arg(long)]
    strict: bool,
}

fn parse_port(s: &str) -> Result<u64, String> {
    match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("invalid port '{s}': {e}"))
}

fn main_inner() -> anyhow::Result<()> {
    let opt = Opt::parse();

    if opt.print_generic {
        print!("{GENERIC}");
        return Ok(());
    }

    let ioconf = match &opt.ioconf {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| MainError::ReadConfig(path.clone(), e))?,
        None => GENERIC.to_owned(),
    };
    let table = autoconf_port_std::load_table(&ioconf, ATTACHMENTS).map_err(MainError::LoadConfig)?;
    log::debug!("{} configuration row(s)", table.len());

    let mut config = BoardConfig {
        cpus: opt.cpus,
        chipset: opt.chipset,
        isa: !opt.no_isa,
        com_ports: opt.com_ports.clone(),
        ..BoardConfig::default()
    };
    if opt.no_pci {
        config.pci.clear();
    }
    let board = SimBoard::new(config).map_err(MainError::Board)?;

    // Reported here instead of through the port's panic
    let mut ac = Autoconf::new(table);
    ac.configure(ROOT_DEVICE, board.root_args().into())
        .map_err(MainError::Configure)?;

    print!("{}", ac.dump());

    for &irq in &opt.irqs {
        if irq >= NUM_IRQS {
            return Err(MainError::BadIrq(irq).into());
        }
        board.raise_irq(irq);
        log::info!(
            "irq {irq}: {} event(s), {} stray interrupt(s) so far",
            board.intc().event_count(irq).unwrap_or(0),
            board.intc().stray_count()
        );
    }

    let failed = ac.errors().len();
    if failed > 0 {
        for e in ac.errors() {
            log::warn!(" - {e}");
        }
        if opt.strict {
            return Err(MainError::AttachFailed(failed).into());
        }
    }

    Ok(())
}
