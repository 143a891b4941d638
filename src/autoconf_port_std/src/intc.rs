//! A simulated interrupt controller.
//!
//! Lines are asserted by calling [`SimIntc::assert_line`] (from a device
//! model, a test, or another thread). A line whose priority level is not
//! above the current level stays pending until [`SimIntc::splx`] lowers the
//! level far enough. Handlers run on the thread that delivers the
//! interrupt, inside an [`InterruptContext`].
use autoconf_core::{
    error::{DisestablishError, EstablishError},
    intr::{
        ControllerId, InterruptContext, InterruptController, IntrFn, IntrHandle, Ipl, Ist, IstSet,
    },
};
use core::{fmt, ops::RangeInclusive};
use slab::Slab;
use spin::Mutex as SpinMutex;

/// The default number of handlers a line can be shared by.
pub const DEFAULT_MAX_HANDLERS: usize = 4;

/// The interrupt line does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadLineError;

pub struct SimIntc {
    id: ControllerId,
    name: &'static str,
    ipls: RangeInclusive<Ipl>,
    ists: IstSet,
    max_handlers: usize,
    state: SpinMutex<IntcState>,
}

struct IntcState {
    lines: Vec<Line>,
    handlers: Slab<Handler>,
    next_generation: u64,
    /// The current interrupt priority level. Lines at or below it are
    /// blocked.
    spl: Ipl,
    stray: u64,
}

struct Line {
    /// The trigger type the line is configured for. Reverts to
    /// [`Ist::None`] when the last handler leaves.
    ist: Ist,
    /// Keys into `IntcState::handlers`, in the order of establishment.
    handlers: Vec<usize>,
    pending: bool,
    events: u64,
}

struct Handler {
    irq: u32,
    ipl: Ipl,
    generation: u64,
    func: IntrFn,
}

impl IntcState {
    fn line(&self, irq: u32) -> Result<&Line, BadLineError> {
        self.lines.get(irq as usize).ok_or(BadLineError)
    }

    /// The level a line is delivered at: the highest level among its
    /// handlers.
    fn line_ipl(&self, line: &Line) -> Ipl {
        line.handlers
            .iter()
            .map(|&key| self.handlers[key].ipl)
            .max()
            .unwrap_or(Ipl::None)
    }

    /// Choose the next pending line to deliver: the highest level above
    /// `spl`, the lowest line number among equals.
    fn next_deliverable(&self) -> Option<(u32, Ipl)> {
        let mut best: Option<(u32, Ipl)> = None;
        for (irq, line) in self.lines.iter().enumerate() {
            if !line.pending {
                continue;
            }
            let ipl = self.line_ipl(line);
            if line.handlers.is_empty() {
                // Nothing can block an unowned line
                return Some((irq as u32, ipl));
            }
            if ipl > self.spl && best.map_or(true, |(_, b)| ipl > b) {
                best = Some((irq as u32, ipl));
            }
        }
        best
    }
}

impl SimIntc {
    /// Construct a controller with `num_lines` lines, accepting every
    /// trigger type and every level above [`Ipl::None`].
    pub fn new(name: &'static str, num_lines: u32) -> Self {
        Self {
            id: ControllerId::allocate(),
            name,
            ipls: Ipl::SoftClock..=Ipl::High,
            ists: IstSet::all(),
            max_handlers: DEFAULT_MAX_HANDLERS,
            state: SpinMutex::new(IntcState {
                lines: (0..num_lines)
                    .map(|_| Line {
                        ist: Ist::None,
                        handlers: Vec::new(),
                        pending: false,
                        events: 0,
                    })
                    .collect(),
                handlers: Slab::new(),
                next_generation: 0,
                spl: Ipl::None,
                stray: 0,
            }),
        }
    }

    /// Restrict the levels handlers may be established at.
    pub fn with_ipls(self, ipls: RangeInclusive<Ipl>) -> Self {
        Self { ipls, ..self }
    }

    /// Restrict the trigger types the controller can be programmed for.
    pub fn with_ists(self, ists: IstSet) -> Self {
        Self { ists, ..self }
    }

    pub fn with_max_handlers(self, max_handlers: usize) -> Self {
        Self {
            max_handlers,
            ..self
        }
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn num_lines(&self) -> u32 {
        self.state.lock().lines.len() as u32
    }

    /// The current interrupt priority level.
    pub fn spl(&self) -> Ipl {
        self.state.lock().spl
    }

    /// Raise the interrupt priority level to `ipl` and return the previous
    /// level. Never lowers the level.
    pub fn splraise(&self, ipl: Ipl) -> Ipl {
        let mut state = self.state.lock();
        let old = state.spl;
        if ipl > old {
            log::trace!("{}: spl {old} -> {ipl}", self.name);
            state.spl = ipl;
        }
        old
    }

    /// Set the interrupt priority level to `ipl`, usually a value returned
    /// by [`Self::splraise`], and deliver whatever became unblocked.
    pub fn splx(&self, ipl: Ipl) {
        {
            let mut state = self.state.lock();
            log::trace!("{}: spl {} -> {ipl}", self.name, state.spl);
            state.spl = ipl;
        }
        self.deliver_pending();
    }

    /// Assert line `irq`. The handlers run before this method returns
    /// unless the line is blocked by the current level.
    pub fn assert_line(&self, irq: u32) -> Result<(), BadLineError> {
        log::trace!("{}: assert irq {irq}", self.name);
        {
            let mut state = self.state.lock();
            state.line(irq)?;
            state.lines[irq as usize].pending = true;
        }
        self.deliver_pending();
        Ok(())
    }

    pub fn is_pending(&self, irq: u32) -> Result<bool, BadLineError> {
        Ok(self.state.lock().line(irq)?.pending)
    }

    /// The number of times line `irq` was delivered to its handlers.
    pub fn event_count(&self, irq: u32) -> Result<u64, BadLineError> {
        Ok(self.state.lock().line(irq)?.events)
    }

    /// The number of interrupts no handler claimed.
    pub fn stray_count(&self) -> u64 {
        self.state.lock().stray
    }

    pub fn handler_count(&self, irq: u32) -> Result<usize, BadLineError> {
        Ok(self.state.lock().line(irq)?.handlers.len())
    }

    /// The trigger type line `irq` is currently configured for.
    pub fn line_ist(&self, irq: u32) -> Result<Ist, BadLineError> {
        Ok(self.state.lock().line(irq)?.ist)
    }

    fn deliver_pending(&self) {
        loop {
            let mut state = self.state.lock();
            let Some((irq, ipl)) = state.next_deliverable() else {
                return;
            };

            let line = &mut state.lines[irq as usize];
            line.pending = false;
            if line.handlers.is_empty() {
                state.stray += 1;
                drop(state);
                log::warn!("{}: stray interrupt on irq {irq}", self.name);
                continue;
            }
            line.events += 1;
            let keys = line.handlers.clone();
            let funcs: Vec<IntrFn> = keys
                .iter()
                .map(|&key| state.handlers[key].func.clone())
                .collect();
            let saved_spl = core::mem::replace(&mut state.spl, ipl);
            drop(state);

            log::trace!("{}: delivering irq {irq} at {ipl}", self.name);
            let claimed = {
                let _cx = InterruptContext::enter();
                // Every handler of a shared line is called, even after one
                // claims the interrupt.
                funcs.iter().fold(false, |claimed, func| func() | claimed)
            };

            let mut state = self.state.lock();
            state.spl = saved_spl;
            if !claimed {
                state.stray += 1;
                drop(state);
                log::warn!("{}: irq {irq} not claimed by any handler", self.name);
            }
        }
    }
}

impl fmt::Debug for SimIntc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimIntc")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("ipls", &self.ipls)
            .field("ists", &self.ists)
            .finish_non_exhaustive()
    }
}

impl InterruptController for SimIntc {
    fn name(&self) -> &str {
        self.name
    }

    fn establish(
        &self,
        irq: u32,
        ipl: Ipl,
        ist: Ist,
        handler: IntrFn,
    ) -> Result<IntrHandle, EstablishError> {
        if !self.ipls.contains(&ipl) || !self.ists.contains(ist.bit()) {
            return Err(EstablishError::NotSupported);
        }

        let mut state = self.state.lock();
        let line = state.line(irq).map_err(|BadLineError| EstablishError::BadParam)?;
        let new_ist = line.ist.join(ist).ok_or(EstablishError::Busy)?;
        if line.handlers.len() >= self.max_handlers {
            return Err(EstablishError::NoSpace);
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        let key = state.handlers.insert(Handler {
            irq,
            ipl,
            generation,
            func: handler,
        });
        let line = &mut state.lines[irq as usize];
        line.ist = new_ist;
        line.handlers.push(key);
        let shared = line.handlers.len();
        drop(state);

        log::debug!(
            "{}: {} established at {ipl} ({new_ist}, {shared} handler(s))",
            self.name,
            self.intr_string(irq),
        );
        Ok(IntrHandle::new(self.id, irq, key, generation))
    }

    fn disestablish(&self, handle: &IntrHandle) -> Result<(), DisestablishError> {
        if handle.controller() != self.id {
            return Err(DisestablishError::BadId);
        }

        let mut state = self.state.lock();
        match state.handlers.get(handle.key()) {
            Some(h) if h.generation == handle.generation() && h.irq == handle.irq() => {}
            _ => return Err(DisestablishError::BadId),
        }
        state.handlers.remove(handle.key());

        let line = &mut state.lines[handle.irq() as usize];
        line.handlers.retain(|&key| key != handle.key());
        if line.handlers.is_empty() {
            line.ist = Ist::None;
            line.pending = false;
        }
        drop(state);

        log::debug!(
            "{}: {} disestablished",
            self.name,
            self.intr_string(handle.irq())
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use autoconf_core::intr::in_interrupt;
    use quickcheck_macros::quickcheck;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn counter() -> (Arc<AtomicUsize>, IntrFn) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (
            count,
            Arc::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
                true
            }),
        )
    }

    fn nop() -> IntrFn {
        Arc::new(|| true)
    }

    #[test]
    fn establish_errors() {
        let intc = SimIntc::new("intc", 4)
            .with_ists(IstSet::EDGE | IstSet::LEVEL | IstSet::PULSE)
            .with_max_handlers(2);

        assert_matches!(
            intc.establish(4, Ipl::Tty, Ist::Edge, nop()),
            Err(EstablishError::BadParam)
        );
        assert_matches!(
            intc.establish(0, Ipl::None, Ist::Edge, nop()),
            Err(EstablishError::NotSupported)
        );

        intc.establish(0, Ipl::Tty, Ist::Edge, nop()).unwrap();
        assert_matches!(
            intc.establish(0, Ipl::Tty, Ist::Level, nop()),
            Err(EstablishError::Busy)
        );
        intc.establish(0, Ipl::Net, Ist::None, nop()).unwrap();
        assert_matches!(
            intc.establish(0, Ipl::Tty, Ist::Edge, nop()),
            Err(EstablishError::NoSpace)
        );

        intc.establish(1, Ipl::Clock, Ist::Pulse, nop()).unwrap();
        assert_matches!(
            intc.establish(1, Ipl::Clock, Ist::Pulse, nop()),
            Err(EstablishError::Busy)
        );
    }

    #[test]
    fn unsupported_trigger_type() {
        let intc = SimIntc::new("intc", 1).with_ists(IstSet::LEVEL);
        assert_matches!(
            intc.establish(0, Ipl::Bio, Ist::Edge, nop()),
            Err(EstablishError::NotSupported)
        );
        intc.establish(0, Ipl::Bio, Ist::None, nop()).unwrap();
        assert_eq!(intc.line_ist(0), Ok(Ist::None));
        intc.establish(0, Ipl::Bio, Ist::Level, nop()).unwrap();
        assert_eq!(intc.line_ist(0), Ok(Ist::Level));
    }

    #[test]
    fn stale_foreign_and_forged_handles() {
        let intc = SimIntc::new("intc", 2);
        let other = SimIntc::new("other", 2);

        let h = intc.establish(1, Ipl::Tty, Ist::Edge, nop()).unwrap();
        let foreign = other.establish(1, Ipl::Tty, Ist::Edge, nop()).unwrap();
        assert_eq!(intc.disestablish(&foreign), Err(DisestablishError::BadId));

        let forged = IntrHandle::new(intc.id(), 1, h.key(), h.generation() + 100);
        assert_eq!(intc.disestablish(&forged), Err(DisestablishError::BadId));
        let wrong_line = IntrHandle::new(intc.id(), 0, h.key(), h.generation());
        assert_eq!(intc.disestablish(&wrong_line), Err(DisestablishError::BadId));

        intc.disestablish(&h).unwrap();
        assert_eq!(intc.disestablish(&h), Err(DisestablishError::BadId));
        assert_eq!(intc.line_ist(1), Ok(Ist::None));

        // The slot is reused, but the old handle still doesn't resolve
        let h2 = intc.establish(1, Ipl::Tty, Ist::Level, nop()).unwrap();
        assert_eq!(h2.key(), h.key());
        assert_eq!(intc.disestablish(&h), Err(DisestablishError::BadId));
        assert_eq!(intc.handler_count(1), Ok(1));
        intc.disestablish(&h2).unwrap();
    }

    #[test]
    fn handlers_run_in_interrupt_context() {
        let intc = SimIntc::new("intc", 1);
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        intc.establish(
            0,
            Ipl::Serial,
            Ist::Edge,
            Arc::new(move || {
                assert!(in_interrupt());
                s.fetch_add(1, Ordering::Relaxed);
                true
            }),
        )
        .unwrap();

        intc.assert_line(0).unwrap();
        assert!(!in_interrupt());
        assert_eq!(seen.load(Ordering::Relaxed), 1);
        assert_eq!(intc.event_count(0), Ok(1));
        assert_eq!(intc.assert_line(1), Err(BadLineError));
    }

    #[test]
    fn shared_line_calls_every_handler() {
        let intc = SimIntc::new("intc", 1);
        let (a, fa) = counter();
        let (b, fb) = counter();
        intc.establish(0, Ipl::Net, Ist::Level, fa).unwrap();
        intc.establish(0, Ipl::Bio, Ist::Level, fb).unwrap();

        intc.assert_line(0).unwrap();
        assert_eq!(a.load(Ordering::Relaxed), 1);
        assert_eq!(b.load(Ordering::Relaxed), 1);
        assert_eq!(intc.event_count(0), Ok(1));
        assert_eq!(intc.stray_count(), 0);
    }

    #[test]
    fn spl_blocks_and_splx_delivers() {
        let intc = SimIntc::new("intc", 2);
        let (net, fnet) = counter();
        let (serial, fserial) = counter();
        intc.establish(0, Ipl::Net, Ist::Edge, fnet).unwrap();
        intc.establish(1, Ipl::Serial, Ist::Edge, fserial).unwrap();

        let s = intc.splraise(Ipl::Tty);
        assert_eq!(s, Ipl::None);
        assert_eq!(intc.splraise(Ipl::Bio), Ipl::Tty);
        assert_eq!(intc.spl(), Ipl::Tty);

        intc.assert_line(0).unwrap();
        intc.assert_line(1).unwrap();
        assert_eq!(net.load(Ordering::Relaxed), 0);
        assert_eq!(intc.is_pending(0), Ok(true));
        assert_eq!(serial.load(Ordering::Relaxed), 1);

        intc.splx(s);
        assert_eq!(net.load(Ordering::Relaxed), 1);
        assert_eq!(intc.is_pending(0), Ok(false));
        assert_eq!(intc.spl(), Ipl::None);
    }

    #[test]
    fn handler_runs_at_line_level() {
        let intc = Arc::new(SimIntc::new("intc", 1));
        let seen = Arc::new(SpinMutex::new(None));
        let (i, s) = (intc.clone(), seen.clone());
        intc.establish(
            0,
            Ipl::Audio,
            Ist::Edge,
            Arc::new(move || {
                *s.lock() = Some(i.spl());
                true
            }),
        )
        .unwrap();

        intc.assert_line(0).unwrap();
        assert_eq!(*seen.lock(), Some(Ipl::Audio));
        assert_eq!(intc.spl(), Ipl::None);
    }

    #[test]
    fn stray_interrupts() {
        let intc = SimIntc::new("intc", 2);
        intc.assert_line(0).unwrap();
        assert_eq!(intc.stray_count(), 1);
        assert_eq!(intc.is_pending(0), Ok(false));

        intc.establish(1, Ipl::Tty, Ist::Level, Arc::new(|| false))
            .unwrap();
        intc.assert_line(1).unwrap();
        assert_eq!(intc.stray_count(), 2);
        assert_eq!(intc.event_count(1), Ok(1));
    }

    /// Handles of live handlers always disestablish exactly once, whatever
    /// the order.
    #[quickcheck]
    fn establish_disestablish(ops: Vec<(bool, u8)>) -> bool {
        let intc = SimIntc::new("intc", 4).with_max_handlers(usize::MAX);
        let mut live = Vec::new();
        for (establish, n) in ops {
            if establish {
                let irq = u32::from(n % 4);
                live.push(intc.establish(irq, Ipl::Net, Ist::Edge, nop()).unwrap());
            } else if !live.is_empty() {
                let h = live.swap_remove(usize::from(n) % live.len());
                if intc.disestablish(&h).is_err() || intc.disestablish(&h).is_ok() {
                    return false;
                }
            }
        }
        let total: usize = (0..4).map(|irq| intc.handler_count(irq).unwrap()).sum();
        total == live.len()
    }
}
