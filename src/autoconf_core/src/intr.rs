//! Interrupt priority levels, trigger types, and the interrupt controller
//! interface.
use core::{cell::Cell, fmt, marker::PhantomData};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::error::{DisestablishError, EstablishError};

/// Interrupt priority level. Levels are totally ordered; blocking a level
/// blocks every level below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ipl {
    None,
    SoftClock,
    SoftNet,
    SoftSerial,
    Bio,
    Net,
    Tty,
    Vm,
    Audio,
    Clock,
    Serial,
    Sched,
    High,
}

impl Ipl {
    pub const ALL: [Self; 13] = [
        Self::None,
        Self::SoftClock,
        Self::SoftNet,
        Self::SoftSerial,
        Self::Bio,
        Self::Net,
        Self::Tty,
        Self::Vm,
        Self::Audio,
        Self::Clock,
        Self::Serial,
        Self::Sched,
        Self::High,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SoftClock => "softclock",
            Self::SoftNet => "softnet",
            Self::SoftSerial => "softserial",
            Self::Bio => "bio",
            Self::Net => "net",
            Self::Tty => "tty",
            Self::Vm => "vm",
            Self::Audio => "audio",
            Self::Clock => "clock",
            Self::Serial => "serial",
            Self::Sched => "sched",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Ipl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interrupt sharing/trigger type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ist {
    /// The caller doesn't care; adopt whatever the line uses.
    None,
    /// Pulsed edge. A pulsed line can't be shared.
    Pulse,
    Edge,
    Level,
}

impl Ist {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pulse => "pulse",
            Self::Edge => "edge",
            Self::Level => "level",
        }
    }

    /// The capability bit for this type. [`Ist::None`] needs no capability.
    pub const fn bit(self) -> IstSet {
        match self {
            Self::None => IstSet::empty(),
            Self::Pulse => IstSet::PULSE,
            Self::Edge => IstSet::EDGE,
            Self::Level => IstSet::LEVEL,
        }
    }

    /// Determine the type of a line currently of type `self` after a
    /// handler of type `new` joins it. Returns `None` if the two can't
    /// share.
    pub const fn join(self, new: Ist) -> Option<Ist> {
        match (self, new) {
            (Self::None, new) => Some(new),
            (current, Self::None) => Some(current),
            (Self::Edge, Self::Edge) => Some(Self::Edge),
            (Self::Level, Self::Level) => Some(Self::Level),
            _ => None,
        }
    }
}

impl fmt::Display for Ist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags::bitflags! {
    /// A set of trigger types a controller supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IstSet: u8 {
        const PULSE = 1 << 0;
        const EDGE = 1 << 1;
        const LEVEL = 1 << 2;
    }
}

/// An interrupt handler. Returns `true` if it recognized the interrupt as
/// its own.
pub type IntrFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Identifies an [`InterruptController`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId(u64);

impl ControllerId {
    /// Allocate an identifier distinct from every previously allocated one.
    pub fn allocate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A token for an established handler.
///
/// The generation number makes a handle go stale once its handler is
/// disestablished, even if the slot is later reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntrHandle {
    controller: ControllerId,
    irq: u32,
    key: usize,
    generation: u64,
}

impl IntrHandle {
    /// Construct a handle. Meant to be called by [`InterruptController`]
    /// implementations.
    pub const fn new(controller: ControllerId, irq: u32, key: usize, generation: u64) -> Self {
        Self {
            controller,
            irq,
            key,
            generation,
        }
    }

    pub const fn controller(&self) -> ControllerId {
        self.controller
    }

    pub const fn irq(&self) -> u32 {
        self.irq
    }

    pub const fn key(&self) -> usize {
        self.key
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// An interrupt controller.
pub trait InterruptController: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Connect `handler` to line `irq`.
    fn establish(
        &self,
        irq: u32,
        ipl: Ipl,
        ist: Ist,
        handler: IntrFn,
    ) -> Result<IntrHandle, EstablishError>;

    /// Disconnect a handler. The handle is invalid afterwards.
    fn disestablish(&self, handle: &IntrHandle) -> Result<(), DisestablishError>;

    /// A human-readable name of line `irq`, e.g., `"irq 4"`.
    fn intr_string(&self, irq: u32) -> String {
        format!("irq {irq}")
    }
}

/// A shared reference to an interrupt controller.
pub type InterruptTag = Arc<dyn InterruptController>;

thread_local! {
    static INTR_DEPTH: Cell<u32> = Cell::new(0);
}

/// Get a flag indicating whether the current thread is running an
/// interrupt handler.
pub fn in_interrupt() -> bool {
    INTR_DEPTH.with(|d| d.get() > 0)
}

/// Marks the current thread as running in interrupt context until
/// dropped. Nests.
#[must_use]
pub struct InterruptContext {
    _no_send: PhantomData<*const ()>,
}

impl InterruptContext {
    pub fn enter() -> Self {
        INTR_DEPTH.with(|d| d.set(d.get() + 1));
        Self {
            _no_send: PhantomData,
        }
    }
}

impl Drop for InterruptContext {
    fn drop(&mut self) {
        INTR_DEPTH.with(|d| d.set(d.get() - 1));
    }
}
