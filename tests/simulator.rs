use emips::instructions::InstructionSet;
use emips::memory::LayoutKind;
use emips::registers::{CAUSE, EPC};
use emips::simulator::{RunEvent, Simulator};
use emips::{assemble_source, Machine, Settings};

fn machine_for(settings: Settings, source: &str, set: &InstructionSet) -> Machine {
    let mut machine = Machine::new(settings);
    if let Err(errors) = assemble_source(&mut machine, set, "test.asm", source) {
        panic!("assembly failed:\n{}", errors.report());
    }
    machine
}

fn run_to_end(settings: Settings, source: &str) -> (Machine, RunEvent) {
    let set = InstructionSet::new();
    let mut machine = machine_for(settings, source, &set);
    let mut sim = Simulator::new(&set);
    let event = sim.run(&mut machine, -1);
    (machine, event)
}

#[test]
fn arithmetic_and_clean_termination() {
    let (m, event) = run_to_end(
        Settings::default(),
        ".text
li $t0,6
li $t1,7
mul $t2,$t0,$t1
",
    );
    assert!(matches!(event, RunEvent::Terminated(0)));
    assert_eq!(m.registers.get(10), 42);
}

#[test]
fn exit_syscall_reports_code() {
    let (_, event) = run_to_end(
        Settings::default(),
        ".text
li $a0,7
li $v0,17
syscall
",
    );
    assert!(matches!(event, RunEvent::Terminated(7)));
}

#[test]
fn zero_register_is_immutable_at_runtime() {
    let (m, _) = run_to_end(
        Settings::default(),
        ".text
li $zero,5
addi $zero,$zero,3
",
    );
    assert_eq!(m.registers.get(0), 0);
}

#[test]
fn overflow_without_handler_terminates_with_cause() {
    let (m, event) = run_to_end(
        Settings::default(),
        ".text
addi $t0,$zero,0x7fffffff
addi $t0,$t0,1
teqi $t0,0
",
    );
    match event {
        RunEvent::RuntimeError(e) => {
            assert_eq!(e.cause, emips::errors::ExceptionCause::ArithmeticOverflow);
            // The faulting addi is the fourth word (li32 takes three).
            assert!(e.message.contains("0x0040000c"), "message: {}", e.message);
        }
        other => panic!("expected a runtime error, got {:?}", other),
    }
    assert_eq!(m.cop0.get(EPC), 0x0040_000c);
    assert_eq!((m.cop0.get(CAUSE) >> 2) & 0x1f, 12);
}

#[test]
fn overflow_with_handler_resumes_past_fault() {
    let (m, event) = run_to_end(
        Settings::default(),
        ".text
addi $t0,$zero,0x7fffffff
addi $t0,$t0,1
teqi $t0,0
.ktext 0x80000180
mfc0 $k0,$14
addi $k0,$k0,4
mtc0 $k0,$14
eret
",
    );
    assert!(matches!(event, RunEvent::Terminated(0)), "got {:?}", event);
    assert_eq!(m.registers.get(8), 0x7fff_ffff);
}

#[test]
fn delayed_branching_changes_delay_slot_semantics() {
    let source = ".text
li $t0,1
beq $t0,$t0,skip
addi $t0,$t0,9
skip: nop
";
    let (m, _) = run_to_end(Settings::default(), source);
    assert_eq!(m.registers.get(8), 1);
    let mut delayed = Settings::default();
    delayed.delayed_branching = true;
    let (m, _) = run_to_end(delayed, source);
    assert_eq!(m.registers.get(8), 10);
}

#[test]
fn backstep_reverses_multi_effect_instructions() {
    let set = InstructionSet::new();
    let mut machine = machine_for(
        Settings::default(),
        ".text
li $t0,6
li $t1,7
mult $t0,$t1
mflo $t2
",
        &set,
    );
    let mut sim = Simulator::new(&set);
    sim.run(&mut machine, -1);
    assert_eq!(machine.registers.get(10), 42);
    assert_eq!(machine.registers.lo(), 42);
    // First undo removes only the mflo write.
    assert!(sim.step_back(&mut machine));
    assert_eq!(machine.registers.get(10), 0);
    assert_eq!(machine.registers.lo(), 42);
    // Second undo reverses HI and LO together.
    assert!(sim.step_back(&mut machine));
    assert_eq!(machine.registers.lo(), 0);
    assert_eq!(machine.registers.hi(), 0);
    assert_eq!(machine.registers.pc, 0x0040_0008);
}

#[test]
fn backstep_restores_initial_state() {
    let set = InstructionSet::new();
    let source = ".text
li $t0,3
sll $t1,$t0,4
.data
cell: .word 0
.text
la $t3,cell
sw $t1,($t3)
";
    let mut machine = machine_for(Settings::default(), source, &set);
    let sp0 = machine.registers.get(29);
    let mut sim = Simulator::new(&set);
    sim.run(&mut machine, -1);
    assert_eq!(machine.memory.get_word(0x1001_0000, false).unwrap(), 48);
    while sim.step_back(&mut machine) {}
    assert_eq!(machine.registers.get(8), 0);
    assert_eq!(machine.registers.get(9), 0);
    assert_eq!(machine.registers.get(11), 0);
    assert_eq!(machine.registers.get(29), sp0);
    assert_eq!(machine.memory.get_word(0x1001_0000, false).unwrap(), 0);
    assert_eq!(machine.registers.pc, 0x0040_0000);
}

#[test]
fn breakpoints_pause_and_resume() {
    let set = InstructionSet::new();
    let mut machine = machine_for(
        Settings::default(),
        ".text
li $t0,1
li $t1,2
li $t2,3
",
        &set,
    );
    let mut sim = Simulator::new(&set);
    sim.breakpoints.insert(0x0040_0008);
    match sim.run(&mut machine, -1) {
        RunEvent::Breakpoint(a) => assert_eq!(a, 0x0040_0008),
        other => panic!("expected breakpoint, got {:?}", other),
    }
    assert_eq!(machine.registers.get(9), 2);
    assert_eq!(machine.registers.get(10), 0);
    assert!(matches!(sim.run(&mut machine, -1), RunEvent::Terminated(0)));
    assert_eq!(machine.registers.get(10), 3);
}

#[test]
fn step_limit_pauses() {
    let set = InstructionSet::new();
    let mut machine = machine_for(
        Settings::default(),
        ".text
li $t0,1
li $t1,2
li $t2,3
",
        &set,
    );
    let mut sim = Simulator::new(&set);
    assert!(matches!(sim.run(&mut machine, 2), RunEvent::StepLimit));
    assert_eq!(machine.registers.pc, 0x0040_0008);
    assert!(matches!(sim.run(&mut machine, -1), RunEvent::Terminated(0)));
}

#[test]
fn sbrk_returns_heap_chunks() {
    let (m, event) = run_to_end(
        Settings::default(),
        ".text
li $a0,16
li $v0,9
syscall
move $s0,$v0
li $a0,8
li $v0,9
syscall
move $s1,$v0
",
    );
    assert!(matches!(event, RunEvent::Terminated(0)));
    assert_eq!(m.registers.get(16) as u32, 0x1004_0000);
    assert_eq!(m.registers.get(17) as u32, 0x1004_0010);
}

#[test]
fn trap_instruction_raises_trap_cause() {
    let (_, event) = run_to_end(
        Settings::default(),
        ".text
li $t0,5
teqi $t0,5
",
    );
    match event {
        RunEvent::RuntimeError(e) => {
            assert_eq!(e.cause, emips::errors::ExceptionCause::Trap);
        }
        other => panic!("expected trap, got {:?}", other),
    }
}

#[test]
fn unknown_syscall_raises_exception() {
    let (_, event) = run_to_end(
        Settings::default(),
        ".text
li $v0,99
syscall
",
    );
    match event {
        RunEvent::RuntimeError(e) => {
            assert_eq!(e.cause, emips::errors::ExceptionCause::Syscall);
        }
        other => panic!("expected syscall exception, got {:?}", other),
    }
}

#[test]
fn misaligned_load_reports_bad_address() {
    let (m, event) = run_to_end(
        Settings::default(),
        ".text
li $t1,0x10010001
lw $t0,0($t1)
",
    );
    match event {
        RunEvent::RuntimeError(e) => {
            assert_eq!(e.cause, emips::errors::ExceptionCause::AddressFetch);
            assert_eq!(e.bad_address, Some(0x1001_0001));
        }
        other => panic!("expected address error, got {:?}", other),
    }
    assert_eq!(m.cop0.get(emips::registers::BAD_V_ADDR) as u32, 0x1001_0001);
}

#[test]
fn self_modified_text_is_refetched() {
    let mut settings = Settings::default();
    settings.self_modifying = true;
    let set = InstructionSet::new();
    let mut machine = machine_for(
        settings,
        ".text
nop
nop
",
        &set,
    );
    // Overwrite the second nop with `ori $t0,$0,5`.
    machine.memory.store_word(0x0040_0004, 0x3408_0005, true).unwrap();
    let fetched = machine.memory.fetch_statement(0x0040_0004, &set).unwrap().unwrap();
    assert_eq!(set.basics[fetched.instruction].mnemonic, "ori");
    assert_eq!(fetched.operands, vec![8, 0, 5]);
    let mut sim = Simulator::new(&set);
    assert!(matches!(sim.run(&mut machine, -1), RunEvent::Terminated(0)));
    assert_eq!(machine.registers.get(8), 5);
}

#[test]
fn text_write_rejected_without_self_modifying() {
    let (_, event) = run_to_end(
        Settings::default(),
        ".text
li $t1,0x00400000
sw $t0,0($t1)
",
    );
    match event {
        RunEvent::RuntimeError(e) => {
            assert_eq!(e.cause, emips::errors::ExceptionCause::AddressStore);
        }
        other => panic!("expected store error, got {:?}", other),
    }
}

#[test]
fn external_interrupt_dispatches_to_handler() {
    let set = InstructionSet::new();
    let mut machine = machine_for(
        Settings::default(),
        ".text
li $t0,1
li $t1,2
.ktext 0x80000180
eret
",
        &set,
    );
    let mut sim = Simulator::new(&set);
    sim.controls().raise_interrupt(0x100);
    assert!(matches!(sim.run(&mut machine, -1), RunEvent::Terminated(0)));
    assert_ne!(machine.cop0.get(CAUSE) & 0x100, 0);
    assert_eq!(machine.cop0.get(EPC) as u32, 0x0040_0000);
}

#[test]
fn compact_layout_runs() {
    let mut settings = Settings::default();
    settings.layout = LayoutKind::CompactData;
    let (m, event) = run_to_end(
        settings,
        ".data
value: .word 1234
.text
lw $t0,value
",
    );
    assert!(matches!(event, RunEvent::Terminated(0)));
    assert_eq!(m.registers.get(8), 1234);
}

#[test]
fn listeners_observe_run_lifecycle() {
    use emips::simulator::{RunEvent as Ev, SimListener};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter {
        steps: Arc<AtomicUsize>,
        finishes: Arc<AtomicUsize>,
    }
    impl SimListener for Counter {
        fn stepped(&mut self, _pc: u32) {
            self.steps.fetch_add(1, Ordering::Relaxed);
        }
        fn finished(&mut self, _event: &Ev) {
            self.finishes.fetch_add(1, Ordering::Relaxed);
        }
    }
    let set = InstructionSet::new();
    let mut machine = machine_for(
        Settings::default(),
        ".text
li $t0,1
li $t1,2
",
        &set,
    );
    let steps = Arc::new(AtomicUsize::new(0));
    let finishes = Arc::new(AtomicUsize::new(0));
    let mut sim = Simulator::new(&set);
    sim.add_listener(Box::new(Counter { steps: Arc::clone(&steps), finishes: Arc::clone(&finishes) }));
    sim.run(&mut machine, -1);
    assert_eq!(steps.load(Ordering::Relaxed), 2);
    assert_eq!(finishes.load(Ordering::Relaxed), 1);
}

#[test]
fn stop_request_terminates_at_safe_point() {
    let set = InstructionSet::new();
    let mut machine = machine_for(
        Settings::default(),
        ".text
li $t0,1
li $t1,2
",
        &set,
    );
    let mut sim = Simulator::new(&set);
    sim.controls().request_stop();
    assert!(matches!(sim.run(&mut machine, -1), RunEvent::Stopped));
    // Nothing executed before the first safe point observed the stop...
    assert_eq!(machine.registers.get(8), 0);
}

#[test]
fn rotate_pseudo_semantics() {
    let (m, _) = run_to_end(
        Settings::default(),
        ".text
li $t0,0x12345678
rol $t1,$t0,8
ror $t2,$t0,8
",
    );
    assert_eq!(m.registers.get(9) as u32, 0x3456_7812);
    assert_eq!(m.registers.get(10) as u32, 0x7812_3456);
}

#[test]
fn set_family_semantics() {
    let (m, _) = run_to_end(
        Settings::default(),
        ".text
li $t0,5
li $t1,9
seq $s0,$t0,$t1
sne $s1,$t0,$t1
slt $s2,$t0,$t1
sge $s3,$t0,$t1
sgt $s4,$t1,$t0
sle $s5,$t1,$t0
",
    );
    assert_eq!(m.registers.get(16), 0);
    assert_eq!(m.registers.get(17), 1);
    assert_eq!(m.registers.get(18), 1);
    assert_eq!(m.registers.get(19), 0);
    assert_eq!(m.registers.get(20), 1);
    assert_eq!(m.registers.get(21), 0);
}

#[test]
fn jal_links_and_jr_returns() {
    let (m, event) = run_to_end(
        Settings::default(),
        ".text
main: jal helper
li $t1,7
li $v0,10
syscall
helper: li $t0,3
jr $ra
",
    );
    assert!(matches!(event, RunEvent::Terminated(0)));
    assert_eq!(m.registers.get(8), 3);
    assert_eq!(m.registers.get(9), 7);
    assert_eq!(m.registers.get(31) as u32, 0x0040_0004);
}

#[test]
fn fp_arithmetic_and_compare() {
    let (m, _) = run_to_end(
        Settings::default(),
        ".data
a: .float 1.5
b: .float 2.5
.text
lwc1 $f0,a
lwc1 $f1,b
add.s $f2,$f0,$f1
c.lt.s $f0,$f1
",
    );
    assert_eq!(m.cop1.get_single(2), 4.0);
    assert!(m.cop1.condition(0));
}

#[test]
fn pseudo_expansion_matches_sequential_semantics() {
    // blt expands to slt+bne; the composite behaves like the comparison.
    let source = ".text
li $t0,3
li $t1,5
blt $t0,$t1,less
li $t2,7
less: li $t3,1
";
    let (m, _) = run_to_end(Settings::default(), source);
    assert_eq!(m.registers.get(10), 0); // the fall-through li was skipped
    assert_eq!(m.registers.get(11), 1);
}
