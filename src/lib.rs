pub mod assembler;
pub mod backstep;
pub mod bits;
pub mod debugger;
pub mod devices;
pub mod directives;
pub mod dump;
pub mod errors;
pub mod instructions;
pub mod lexer;
pub mod macros;
pub mod memory;
pub mod registers;
pub mod simulator;
pub mod symbols;
pub mod syscalls;
pub mod tokens;

use backstep::{BackStepAction, BackStepper};
use errors::{ErrorList, ExceptionCause, SimException};
use instructions::{ExecInterrupt, ExecResult, InstructionSet};
use memory::{Endian, LayoutKind, Memory, MemoryLayout};
use registers::{Cop0, Cop1, Registers};
use syscalls::SystemIo;

/// Assembly and simulation options, fixed for the lifetime of a Machine.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub delayed_branching: bool,
    pub extended_pseudo: bool,
    pub big_endian: bool,
    pub self_modifying: bool,
    pub warnings_are_errors: bool,
    pub layout: LayoutKind,
    pub max_errors: usize,
    pub backstep_enabled: bool,
    pub start_at_main: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            delayed_branching: false,
            extended_pseudo: true,
            big_endian: false,
            self_modifying: false,
            warnings_are_errors: false,
            layout: LayoutKind::Default,
            max_errors: errors::DEFAULT_ERROR_LIMIT,
            backstep_enabled: true,
            start_at_main: true,
        }
    }
}

/// The complete modeled processor: memory, register files, undo log and
/// host-side I/O state. There are no global singletons; every assembler
/// and simulator entry point takes the machine it operates on.
pub struct Machine {
    pub settings: Settings,
    pub memory: Memory,
    pub registers: Registers,
    pub cop0: Cop0,
    pub cop1: Cop1,
    pub backstep: BackStepper,
    pub io: SystemIo,
    pub heap_cursor: u32,
    /// Jump requested by the executing instruction, consumed by the
    /// simulator according to the delayed-branching setting.
    pub pending_jump: Option<u32>,
    /// Address of a global `main` label, when one was assembled.
    pub entry_point: Option<u32>,
    current_statement: u32,
    in_delay_slot: bool,
    recorded: bool,
}

impl Machine {
    pub fn new(settings: Settings) -> Self {
        let layout = MemoryLayout::for_kind(settings.layout);
        let endian = if settings.big_endian { Endian::Big } else { Endian::Little };
        Machine {
            settings,
            memory: Memory::new(layout, endian, settings.self_modifying),
            registers: Registers::new(&layout),
            cop0: Cop0::new(),
            cop1: Cop1::new(),
            backstep: BackStepper::new(settings.backstep_enabled),
            io: SystemIo::new(),
            heap_cursor: layout.heap_base,
            pending_jump: None,
            entry_point: None,
            current_statement: 0,
            in_delay_slot: false,
            recorded: false,
        }
    }

    pub fn layout(&self) -> MemoryLayout {
        self.memory.layout
    }

    /// Reinitialize everything that one assembly-and-run cycle dirties.
    pub fn reset(&mut self) {
        let layout = self.memory.layout;
        self.memory.reset();
        self.registers.reset(&layout);
        self.cop0.reset();
        self.cop1.reset();
        self.backstep.reset();
        self.io.reset_files();
        self.heap_cursor = layout.heap_base;
        self.pending_jump = None;
        self.entry_point = None;
    }

    /// Called by the simulator before dispatching each statement; tags
    /// every back-step record produced during its execution.
    pub fn begin_statement(&mut self, address: u32, in_delay_slot: bool) {
        self.current_statement = address;
        self.in_delay_slot = in_delay_slot;
        self.recorded = false;
    }

    /// Guarantees even a side-effect-free statement leaves one record, so
    /// stepping back always has something to pop.
    pub fn end_statement(&mut self) {
        if !self.recorded {
            self.push_backstep(BackStepAction::DoNothing);
        }
    }

    fn push_backstep(&mut self, action: BackStepAction) {
        self.backstep.push(action, self.current_statement, self.current_statement, self.in_delay_slot);
        self.recorded = true;
    }

    // --- general registers ---

    pub fn gpr(&self, n: i32) -> i32 {
        self.registers.get(n as u32)
    }

    pub fn set_gpr(&mut self, n: i32, value: i32) {
        let previous = self.registers.set(n as u32, value);
        if n != 0 {
            self.push_backstep(BackStepAction::Register { number: n as u32, previous });
        }
    }

    pub fn hi(&self) -> i32 {
        self.registers.hi()
    }

    pub fn lo(&self) -> i32 {
        self.registers.lo()
    }

    pub fn set_hi(&mut self, value: i32) {
        let previous = self.registers.set_hi(value);
        self.push_backstep(BackStepAction::HiRegister { previous });
    }

    pub fn set_lo(&mut self, value: i32) {
        let previous = self.registers.set_lo(value);
        self.push_backstep(BackStepAction::LoRegister { previous });
    }

    // --- coprocessor 0 ---

    pub fn cop0_value(&self, n: u32) -> i32 {
        self.cop0.get(n)
    }

    /// The mtc0 path: honors the register's writable mask.
    pub fn set_cop0(&mut self, n: u32, value: i32) {
        let previous = self.cop0.set_masked(n, value);
        self.push_backstep(BackStepAction::Cop0Register { number: n, previous });
    }

    /// The exception-machinery path: unmasked.
    pub fn set_cop0_raw(&mut self, n: u32, value: i32) {
        let previous = self.cop0.set(n, value);
        self.push_backstep(BackStepAction::Cop0Register { number: n, previous });
    }

    pub fn clear_exception_level(&mut self) {
        let status = self.cop0.get(registers::STATUS) & !registers::STATUS_EXL_BIT;
        self.set_cop0_raw(registers::STATUS, status);
    }

    // --- coprocessor 1 ---

    pub fn fpr_bits(&self, n: i32) -> u32 {
        self.cop1.get_bits(n as u32)
    }

    pub fn set_fpr_bits(&mut self, n: i32, bits: u32) {
        let previous = self.cop1.set_bits(n as u32, bits);
        self.push_backstep(BackStepAction::Cop1Register { number: n as u32, previous });
    }

    pub fn fpr_single(&self, n: i32) -> f32 {
        self.cop1.get_single(n as u32)
    }

    pub fn set_fpr_single(&mut self, n: i32, value: f32) {
        self.set_fpr_bits(n, value.to_bits());
    }

    fn odd_double(n: i32) -> ExecInterrupt {
        SimException::new(
            ExceptionCause::ReservedInstruction,
            format!("double-precision access requires an even register, got $f{}", n),
        )
        .into()
    }

    pub fn fpr_double(&self, n: i32) -> Result<f64, ExecInterrupt> {
        self.cop1.get_double(n as u32).map_err(|_| Self::odd_double(n))
    }

    pub fn fpr_double_bits(&self, n: i32) -> Result<i64, ExecInterrupt> {
        self.cop1.get_double_bits(n as u32).map_err(|_| Self::odd_double(n))
    }

    pub fn set_fpr_double(&mut self, n: i32, value: f64) -> ExecResult {
        let (prev_lo, prev_hi) =
            self.cop1.set_double(n as u32, value).map_err(|_| Self::odd_double(n))?;
        self.push_backstep(BackStepAction::Cop1Register { number: n as u32, previous: prev_lo });
        self.push_backstep(BackStepAction::Cop1Register { number: n as u32 + 1, previous: prev_hi });
        Ok(())
    }

    pub fn set_fpr_double_bits(&mut self, n: i32, bits: i64) -> ExecResult {
        self.set_fpr_double(n, f64::from_bits(bits as u64))
    }

    pub fn condition_flag(&self, flag: i32) -> bool {
        self.cop1.condition(flag as u32)
    }

    pub fn set_condition_flag(&mut self, flag: i32, value: bool) {
        let previous = self.cop1.set_condition(flag as u32, value);
        let action = if previous {
            BackStepAction::Cop1ConditionSet { flag: flag as u32 }
        } else {
            BackStepAction::Cop1ConditionClear { flag: flag as u32 }
        };
        self.push_backstep(action);
    }

    // --- memory, with undo records ---

    pub fn load_word(&mut self, address: u32) -> Result<i32, ExecInterrupt> {
        self.memory.get_word(address, true).map_err(Into::into)
    }

    pub fn load_half(&mut self, address: u32) -> Result<i32, ExecInterrupt> {
        self.memory.get_halfword(address, true).map_err(Into::into)
    }

    pub fn load_byte(&mut self, address: u32) -> Result<i32, ExecInterrupt> {
        self.memory.get_byte(address, true).map_err(Into::into)
    }

    pub fn load_double(&mut self, address: u32) -> Result<i64, ExecInterrupt> {
        self.memory.get_doubleword(address).map_err(Into::into)
    }

    pub fn store_word_checked(&mut self, address: u32, value: i32) -> ExecResult {
        let previous = self.memory.store_word(address, value, true)?;
        self.push_backstep(BackStepAction::MemoryWord { address, previous });
        Ok(())
    }

    pub fn store_half_checked(&mut self, address: u32, value: i32) -> ExecResult {
        let previous = self.memory.store_halfword(address, value, true)?;
        self.push_backstep(BackStepAction::MemoryHalf { address, previous });
        Ok(())
    }

    pub fn store_byte_checked(&mut self, address: u32, value: i32) -> ExecResult {
        let previous = self.memory.store_byte(address, value, true)?;
        self.push_backstep(BackStepAction::MemoryByte { address, previous });
        Ok(())
    }

    pub fn store_double_checked(&mut self, address: u32, bits: i64) -> ExecResult {
        let (hi, lo) = bits::long_to_words(bits);
        let (first, second) = match self.memory.endian() {
            Endian::Little => (lo, hi),
            Endian::Big => (hi, lo),
        };
        self.store_word_checked(address, first)?;
        self.store_word_checked(address + 4, second)
    }

    // --- control transfers ---

    /// Branch relative to the next instruction; `offset` is in words.
    pub fn process_branch(&mut self, offset: i32) {
        let target = self.registers.pc.wrapping_add((offset as u32) << 2);
        self.process_jump(target);
    }

    /// Request a jump; the simulator applies it immediately or after the
    /// delay slot depending on the delayed-branching setting.
    pub fn process_jump(&mut self, target: u32) {
        self.push_backstep(BackStepAction::DoNothing);
        self.pending_jump = Some(target);
    }

    /// Link register value: the instruction after the delay slot when
    /// delayed branching is on, else the next instruction.
    pub fn process_return_address(&mut self, reg: i32) {
        let value = self
            .registers
            .pc
            .wrapping_add(if self.settings.delayed_branching { 4 } else { 0 });
        self.set_gpr(reg, value as i32);
    }

    /// Unconditional immediate PC change (eret); never delayed.
    pub fn jump_now(&mut self, target: u32) {
        self.push_backstep(BackStepAction::DoNothing);
        self.registers.pc = target;
    }
}

/// Assemble source files into `machine` and leave the PC at the entry
/// point. Convenience wrapper used by the CLI and the tests.
pub fn assemble_files(
    machine: &mut Machine,
    set: &InstructionSet,
    paths: &[std::path::PathBuf],
) -> Result<(), ErrorList> {
    let mut errors = ErrorList::new(machine.settings.warnings_are_errors)
        .with_limit(machine.settings.max_errors);
    let mut units = Vec::new();
    for path in paths {
        // .eqv substitutions are scoped to their defining file.
        units.push(lexer::Lexer::new(set).tokenize_file(path, &mut errors));
    }
    assemble_units(machine, set, units, errors)
}

/// Assemble in-memory source text under the file name `name`.
pub fn assemble_source(
    machine: &mut Machine,
    set: &InstructionSet,
    name: &str,
    source: &str,
) -> Result<(), ErrorList> {
    let mut errors = ErrorList::new(machine.settings.warnings_are_errors)
        .with_limit(machine.settings.max_errors);
    let file = errors.add_file(name);
    let unit = lexer::Lexer::new(set).tokenize_source(source, file, None, &mut errors);
    assemble_units(machine, set, vec![unit], errors)
}

fn assemble_units(
    machine: &mut Machine,
    set: &InstructionSet,
    units: Vec<Vec<lexer::SourceLine>>,
    errors: ErrorList,
) -> Result<(), ErrorList> {
    // Values persist across assemblies only when the undo log is off.
    if machine.settings.backstep_enabled {
        machine.reset();
    }
    let mut asm = assembler::Assembler::new(set, machine.settings, errors);
    let ok = asm.assemble(machine, units);
    let errors = asm.into_errors();
    if !ok {
        return Err(errors);
    }
    if machine.settings.start_at_main {
        if let Some(main) = machine.entry_point {
            machine.registers.pc = main;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_register_ignores_exec_writes() {
        let mut m = Machine::new(Settings::default());
        m.set_gpr(0, 99);
        assert_eq!(m.gpr(0), 0);
        m.set_gpr(8, 99);
        assert_eq!(m.gpr(8), 99);
    }

    #[test]
    fn branch_target_is_relative_to_next() {
        let mut m = Machine::new(Settings::default());
        m.registers.pc = 0x0040_0004; // as during execution of 0x400000
        m.process_branch(3);
        assert_eq!(m.pending_jump, Some(0x0040_0010));
    }
}
