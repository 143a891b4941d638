use autoconf_core::{attach_args::RootAttachArgs, error::AttachError};
use autoconf_kernel::{
    autoconf::{AttachContext, ProbeContext},
    cfdata::CfData,
    driver::Driver,
};
use std::sync::Arc;

use super::SimBoard;

/// The root device. Offers a slot to every CPU, then to the expansion
/// busses.
#[derive(Debug)]
pub struct Mainbus {
    board: Arc<SimBoard>,
    slots: u32,
}

impl Mainbus {
    pub fn board(&self) -> &Arc<SimBoard> {
        &self.board
    }

    /// The number of slots offered to children.
    pub fn slots(&self) -> u32 {
        self.slots
    }
}

impl Driver for Mainbus {
    const NAME: &'static str = "mainbus";
    type Args = RootAttachArgs;

    fn probe(_: &ProbeContext<'_>, _: &CfData, args: &RootAttachArgs) -> u32 {
        SimBoard::from_platform(args.platform.as_ref()).is_some() as u32
    }

    fn attach(ctx: &mut AttachContext<'_>, args: &RootAttachArgs) -> Result<Self, AttachError> {
        let board = SimBoard::from_platform(args.platform.as_ref()).ok_or(AttachError::BadParam)?;
        let config = board.config();

        let mut names = vec!["cpu"; config.cpus as usize];
        if config.isa {
            names.push("isa");
        }
        if !config.pci.is_empty() {
            names.push("pci");
        }

        for (slot, &name) in (0..).zip(&names) {
            ctx.config_found(board.mainbus_args(name, slot))?;
        }

        // Extent maps need fixed-size storage until the first pass is over
        let b = board.clone();
        ctx.defer(move |_| b.mallocok());

        Ok(Self {
            slots: names.len() as u32,
            board,
        })
    }
}
