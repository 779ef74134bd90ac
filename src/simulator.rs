// The interpreter loop: fetch the statement at PC, handle the delayed
// branch bookkeeping, dispatch the semantics function, route exceptions
// through the Coprocessor 0 vector, and honor control requests (stop,
// pause, external interrupt) at the loop-top safe point. The loop is
// designed to run on a dedicated worker thread with the controls shared
// across threads.

use crate::backstep::{BackStep, BackStepAction};
use crate::errors::{ExceptionCause, SimException};
use crate::instructions::{ExecInterrupt, InstructionSet};
use crate::registers::{BAD_V_ADDR, CAUSE, EPC, STATUS, STATUS_EXL_BIT};
use crate::Machine;
use log::{debug, info};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Terminated,
}

/// Why a run(...) call returned.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Breakpoint(u32),
    StepLimit,
    Paused,
    Stopped,
    Terminated(i32),
    RuntimeError(SimException),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunSpeed {
    Unlimited,
    InstructionsPerSecond(f64),
}

type StateChange = Box<dyn FnOnce(&mut Machine) + Send>;

/// Cross-thread control surface. Any thread may request stop or pause or
/// flag an interrupting device; the worker observes the requests at safe
/// points with acquire ordering.
pub struct SimControls {
    stop: AtomicBool,
    pause: AtomicBool,
    pending_device: AtomicI64,
    changes: Mutex<Vec<StateChange>>,
}

impl SimControls {
    pub fn new() -> Arc<Self> {
        Arc::new(SimControls {
            stop: AtomicBool::new(false),
            pause: AtomicBool::new(false),
            pending_device: AtomicI64::new(-1),
            changes: Mutex::new(Vec::new()),
        })
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::Release);
    }

    /// Single-slot pending-interrupt cell; the cause bits of the last
    /// writer win until the worker consumes them.
    pub fn raise_interrupt(&self, cause_bits: u32) {
        self.pending_device.store(cause_bits as i64, Ordering::Release);
    }

    fn take_interrupt(&self) -> Option<u32> {
        let bits = self.pending_device.swap(-1, Ordering::AcqRel);
        if bits < 0 {
            None
        } else {
            Some(bits as u32)
        }
    }

    /// Queue a mutation to apply at the end of the current step instead
    /// of racing the worker for the machine.
    pub fn queue_change(&self, change: StateChange) {
        self.changes.lock().unwrap().push(change);
    }
}

/// Observers of simulator progress, called synchronously on the worker.
pub trait SimListener: Send {
    fn started(&mut self, _max_steps: i64) {}
    fn stepped(&mut self, _pc: u32) {}
    fn finished(&mut self, _event: &RunEvent) {}
}

/// Events forwarded to another thread (a UI), coalescing step events so a
/// slow consumer never accumulates a backlog.
#[derive(Debug, Clone)]
pub enum SimEvent {
    Started,
    Stepped(u32),
    Finished(String),
}

pub struct DeferredEvents {
    receiver: Receiver<SimEvent>,
    step_in_flight: Arc<AtomicBool>,
}

impl DeferredEvents {
    pub fn poll(&self) -> Option<SimEvent> {
        match self.receiver.try_recv() {
            Ok(event) => {
                if let SimEvent::Stepped(_) = event {
                    self.step_in_flight.store(false, Ordering::Release);
                }
                Some(event)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

pub struct Simulator<'a> {
    set: &'a InstructionSet,
    pub breakpoints: HashSet<u32>,
    pub speed: RunSpeed,
    controls: Arc<SimControls>,
    listeners: Vec<Box<dyn SimListener>>,
    deferred: Option<(Sender<SimEvent>, Arc<AtomicBool>)>,
    state: RunState,
    /// Jump scheduled by the previous instruction, to be taken after the
    /// current (delay-slot) instruction under delayed branching.
    scheduled: Option<u32>,
}

impl<'a> Simulator<'a> {
    pub fn new(set: &'a InstructionSet) -> Self {
        Simulator {
            set,
            breakpoints: HashSet::new(),
            speed: RunSpeed::Unlimited,
            controls: SimControls::new(),
            listeners: Vec::new(),
            deferred: None,
            state: RunState::Idle,
            scheduled: None,
        }
    }

    pub fn controls(&self) -> Arc<SimControls> {
        Arc::clone(&self.controls)
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn add_listener(&mut self, listener: Box<dyn SimListener>) {
        self.listeners.push(listener);
    }

    /// Create the queue a UI thread drains with poll().
    pub fn deferred_events(&mut self) -> DeferredEvents {
        let (sender, receiver) = channel();
        let flag = Arc::new(AtomicBool::new(false));
        self.deferred = Some((sender, Arc::clone(&flag)));
        DeferredEvents { receiver, step_in_flight: flag }
    }

    fn notify_step(&mut self, pc: u32) {
        for listener in self.listeners.iter_mut() {
            listener.stepped(pc);
        }
        // At unlimited speed the UI refreshes on pause/finish only.
        if self.speed == RunSpeed::Unlimited {
            return;
        }
        if let Some((sender, in_flight)) = &self.deferred {
            if !in_flight.swap(true, Ordering::AcqRel) {
                let _ = sender.send(SimEvent::Stepped(pc));
            }
        }
    }

    fn notify_finished(&mut self, event: &RunEvent) {
        for listener in self.listeners.iter_mut() {
            listener.finished(event);
        }
        if let Some((sender, _)) = &self.deferred {
            let _ = sender.send(SimEvent::Finished(format!("{:?}", event)));
        }
    }

    /// Run until a terminal event, a pause, a breakpoint, or `max_steps`
    /// executed instructions (negative means unlimited).
    pub fn run(&mut self, machine: &mut Machine, max_steps: i64) -> RunEvent {
        if self.state == RunState::Running {
            // Run-during-running is rejected, not queued.
            return RunEvent::Paused;
        }
        self.state = RunState::Running;
        for listener in self.listeners.iter_mut() {
            listener.started(max_steps);
        }
        if let Some((sender, _)) = &self.deferred {
            let _ = sender.send(SimEvent::Started);
        }
        let mut steps: i64 = 0;
        let event = loop {
            // Safe point: control requests are honored between steps.
            if self.controls.stop.swap(false, Ordering::AcqRel) {
                self.state = RunState::Terminated;
                break RunEvent::Stopped;
            }
            if self.controls.pause.swap(false, Ordering::AcqRel) {
                self.state = RunState::Paused;
                break RunEvent::Paused;
            }
            if let Some(event) = self.step_once(machine) {
                break event;
            }
            steps += 1;
            self.notify_step(machine.registers.pc);
            if self.breakpoints.contains(&machine.registers.pc) {
                self.state = RunState::Paused;
                break RunEvent::Breakpoint(machine.registers.pc);
            }
            if max_steps >= 0 && steps >= max_steps {
                self.state = RunState::Paused;
                break RunEvent::StepLimit;
            }
            if let RunSpeed::InstructionsPerSecond(ips) = self.speed {
                thread::sleep(Duration::from_secs_f64(1.0 / ips.max(0.001)));
            }
        };
        self.notify_finished(&event);
        event
    }

    /// One instruction. Returns Some(event) when the run is over.
    fn step_once(&mut self, machine: &mut Machine) -> Option<RunEvent> {
        // 1. External interrupt dispatch, one device per step.
        let interrupt = self
            .controls
            .take_interrupt()
            .or_else(|| machine.memory.poll_interrupts());
        if let Some(cause_bits) = interrupt {
            self.enter_interrupt(machine, cause_bits);
        }
        let pc = machine.registers.pc;
        // A jump to address zero is the conventional clean exit.
        if pc == 0 && !machine.layout().in_text_segment(0) {
            self.state = RunState::Terminated;
            return Some(RunEvent::Terminated(0));
        }
        // 2. Fetch.
        let statement = match machine.memory.fetch_statement(pc, self.set) {
            Err(e) => return self.raise(machine, e, pc),
            Ok(None) => {
                info!("execution ran past the end of the program at 0x{:08x}", pc);
                self.state = RunState::Terminated;
                return Some(RunEvent::Terminated(0));
            }
            Ok(Some(s)) => s,
        };
        // 3. PC points at the following instruction during execution.
        let scheduled = self.scheduled.take();
        machine.begin_statement(pc, scheduled.is_some());
        machine.registers.pc = pc.wrapping_add(4);
        machine.pending_jump = None;
        debug!("0x{:08x}: {}", pc, statement.source.text.trim());
        // 4. Execute.
        let exec = self.set.basics[statement.instruction].exec;
        match exec(machine, &statement) {
            Ok(()) => {}
            Err(ExecInterrupt::Halt(code)) => {
                machine.end_statement();
                self.state = RunState::Terminated;
                return Some(RunEvent::Terminated(code));
            }
            Err(ExecInterrupt::Exception(e)) => return self.raise(machine, e, pc),
        }
        machine.end_statement();
        // A jump scheduled by the previous instruction lands after its
        // delay slot (the statement just executed).
        if let Some(target) = scheduled {
            machine.registers.pc = target;
        }
        if let Some(target) = machine.pending_jump.take() {
            if machine.settings.delayed_branching {
                self.scheduled = Some(target);
            } else {
                machine.registers.pc = target;
            }
        }
        // 5. Apply queued external mutations at a consistent point.
        let changes: Vec<StateChange> =
            self.controls.changes.lock().unwrap().drain(..).collect();
        for change in changes {
            change(machine);
        }
        None
    }

    fn enter_interrupt(&mut self, machine: &mut Machine, cause_bits: u32) {
        let handler = machine.layout().exception_handler;
        if machine.memory.statement_at(handler).is_none() {
            // No handler installed: the interrupt is dropped.
            return;
        }
        let pc = machine.registers.pc;
        machine.begin_statement(pc, false);
        let cause = (machine.cop0_value(CAUSE) & !0x7c) | (cause_bits as i32);
        machine.set_cop0_raw(CAUSE, cause);
        let status = machine.cop0_value(STATUS) | STATUS_EXL_BIT;
        machine.set_cop0_raw(STATUS, status);
        machine.set_cop0_raw(EPC, pc as i32);
        machine.registers.pc = handler;
        info!("external interrupt (cause bits 0x{:x}) dispatched to 0x{:08x}", cause_bits, handler);
    }

    /// Route a runtime exception: install the cause code and EPC, then
    /// continue at the vector if a handler is present, else terminate.
    fn raise(&mut self, machine: &mut Machine, e: SimException, epc: u32) -> Option<RunEvent> {
        machine.begin_statement(epc, false);
        let cause = (machine.cop0_value(CAUSE) & !0x7c) | ((e.cause as i32) << 2);
        machine.set_cop0_raw(CAUSE, cause);
        let status = machine.cop0_value(STATUS) | STATUS_EXL_BIT;
        machine.set_cop0_raw(STATUS, status);
        machine.set_cop0_raw(EPC, epc as i32);
        if let Some(address) = e.bad_address {
            machine.set_cop0_raw(BAD_V_ADDR, address as i32);
        }
        let handler = machine.layout().exception_handler;
        if machine.memory.statement_at(handler).is_some() {
            machine.registers.pc = handler;
            self.scheduled = None;
            return None;
        }
        self.state = RunState::Terminated;
        let message = format!("{} [pc=0x{:08x}]", e, epc);
        Some(RunEvent::RuntimeError(SimException {
            cause: e.cause,
            bad_address: e.bad_address,
            message,
        }))
    }

    /// Undo one logical statement using the back-step log. Multi-effect
    /// instructions reverse atomically; reversal itself records nothing.
    pub fn step_back(&mut self, machine: &mut Machine) -> bool {
        self.scheduled = None;
        let records = machine.backstep.take_step();
        if records.is_empty() {
            return false;
        }
        for record in &records {
            apply_inverse(machine, record);
        }
        machine.registers.pc = records.last().map(|r| r.pc).unwrap_or(machine.registers.pc);
        if self.state == RunState::Terminated {
            self.state = RunState::Paused;
        }
        true
    }
}

fn apply_inverse(machine: &mut Machine, record: &BackStep) {
    match record.action {
        BackStepAction::MemoryWord { address, previous } => {
            let _ = machine.memory.store_word(address, previous, false);
        }
        BackStepAction::MemoryHalf { address, previous } => {
            let _ = machine.memory.store_halfword(address, previous, false);
        }
        BackStepAction::MemoryByte { address, previous } => {
            let _ = machine.memory.store_byte(address, previous, false);
        }
        BackStepAction::Register { number, previous } => {
            machine.registers.set(number, previous);
        }
        BackStepAction::HiRegister { previous } => {
            machine.registers.set_hi(previous);
        }
        BackStepAction::LoRegister { previous } => {
            machine.registers.set_lo(previous);
        }
        BackStepAction::Cop0Register { number, previous } => {
            machine.cop0.set(number, previous);
        }
        BackStepAction::Cop1Register { number, previous } => {
            machine.cop1.set_bits(number, previous);
        }
        BackStepAction::Cop1ConditionSet { flag } => {
            machine.cop1.set_condition(flag, true);
        }
        BackStepAction::Cop1ConditionClear { flag } => {
            machine.cop1.set_condition(flag, false);
        }
        BackStepAction::DoNothing => {}
    }
}
