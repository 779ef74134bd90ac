use emips::instructions::InstructionSet;
use emips::memory::LayoutKind;
use emips::{assemble_source, Machine, Settings};
use std::io::Write;

fn assemble(source: &str) -> Machine {
    assemble_with(Settings::default(), source)
}

fn assemble_with(settings: Settings, source: &str) -> Machine {
    let set = InstructionSet::new();
    let mut machine = Machine::new(settings);
    if let Err(errors) = assemble_source(&mut machine, &set, "test.asm", source) {
        panic!("assembly failed:\n{}", errors.report());
    }
    machine
}

fn assemble_err(settings: Settings, source: &str) -> String {
    let set = InstructionSet::new();
    let mut machine = Machine::new(settings);
    match assemble_source(&mut machine, &set, "test.asm", source) {
        Ok(()) => panic!("assembly unexpectedly succeeded"),
        Err(errors) => errors.report(),
    }
}

const HELLO: &str = "\
.data
msg: .asciiz \"hi\"
.text
main: li $v0,4
la $a0,msg
syscall
li $v0,10
syscall
";

#[test]
fn hello_image_layout() {
    let mut m = assemble(HELLO);
    // String bytes at the start of .data.
    assert_eq!(m.memory.get_byte(0x1001_0000, false).unwrap(), 0x68);
    assert_eq!(m.memory.get_byte(0x1001_0001, false).unwrap(), 0x69);
    assert_eq!(m.memory.get_byte(0x1001_0002, false).unwrap(), 0x00);
    // li -> ori, la -> lui+ori, syscall, li -> ori, syscall.
    let set = InstructionSet::new();
    let mnemonics: Vec<&str> = (0..6)
        .map(|i| {
            let s = m.memory.statement_at(0x0040_0000 + 4 * i).expect("statement");
            set.basics[s.instruction].mnemonic
        })
        .collect();
    assert_eq!(mnemonics, vec!["ori", "lui", "ori", "syscall", "ori", "syscall"]);
    assert!(m.memory.statement_at(0x0040_0018).is_none());
}

#[test]
fn forward_label_in_data() {
    let mut m = assemble(
        ".data
ptr: .word target
.text
target: nop
",
    );
    assert_eq!(m.memory.get_word(0x1001_0000, false).unwrap(), 0x0040_0000);
}

#[test]
fn data_reference_is_label_address() {
    let mut m = assemble(
        ".data
a: .word 1
b: .word a
c: .half a
",
    );
    assert_eq!(m.memory.get_word(0x1001_0004, false).unwrap(), 0x1001_0000);
    assert_eq!(m.memory.get_halfword(0x1001_0008, false).unwrap(), 0x0000);
}

#[test]
fn word_replication_and_alignment() {
    let mut m = assemble(
        ".data
fill: .word 7 : 3
odd: .byte 1
aligned: .word 9
",
    );
    for i in 0..3 {
        assert_eq!(m.memory.get_word(0x1001_0000 + 4 * i, false).unwrap(), 7);
    }
    assert_eq!(m.memory.get_byte(0x1001_000c, false).unwrap(), 1);
    // The word after the byte is aligned up to the next boundary.
    assert_eq!(m.memory.get_word(0x1001_0010, false).unwrap(), 9);
}

#[test]
fn align_directive_moves_labels() {
    let mut m = assemble(
        ".data
.byte 1
.align 3
target: .word 5
.text
la $t0,target
",
    );
    // target stuck to the aligned address 0x10010008.
    assert_eq!(m.memory.get_word(0x1001_0008, false).unwrap(), 5);
    let ori = m.memory.statement_at(0x0040_0004).unwrap();
    assert_eq!(ori.operands[2] & 0xffff, 0x0008);
}

#[test]
fn eqv_substitution_assembles() {
    let m = assemble(
        ".eqv LIMIT 12
.text
li $t0, LIMIT
",
    );
    let s = m.memory.statement_at(0x0040_0000).unwrap();
    assert_eq!(s.operands[2], 12);
}

#[test]
fn include_splices_lines() {
    let dir = tempfile::tempdir().unwrap();
    let library = dir.path().join("library.asm");
    writeln!(std::fs::File::create(&library).unwrap(), ".data\nshared: .word 42").unwrap();
    let main_path = dir.path().join("main.asm");
    writeln!(
        std::fs::File::create(&main_path).unwrap(),
        ".include \"library.asm\"\n.text\nlw $t0,shared"
    )
    .unwrap();
    let set = InstructionSet::new();
    let mut machine = Machine::new(Settings::default());
    emips::assemble_files(&mut machine, &set, &[main_path]).expect("assembly should succeed");
    assert_eq!(machine.memory.get_word(0x1001_0000, false).unwrap(), 42);
}

#[test]
fn macro_expansion_per_invocation_labels() {
    let m = assemble(
        ".macro push %r
subiu $sp,$sp,4
sw %r,($sp)
.end_macro
.text
push $t0
push $t1
",
    );
    // Two expansions of two basic instructions each.
    for i in 0..4 {
        assert!(m.memory.statement_at(0x0040_0000 + 4 * i).is_some());
    }
    assert!(m.memory.statement_at(0x0040_0010).is_none());
}

#[test]
fn macro_recursion_is_reported() {
    let report = assemble_err(
        Settings::default(),
        ".macro A
A
.end_macro
.text
A
",
    );
    assert!(report.contains("recursive"), "report was: {}", report);
}

#[test]
fn duplicate_emit_address_names_prior() {
    let report = assemble_err(
        Settings::default(),
        ".text
nop
.text 0x00400000
add $t0,$t0,$t0
",
    );
    assert!(report.contains("already occupied"), "report was: {}", report);
    assert!(report.contains("nop"), "report was: {}", report);
}

#[test]
fn globl_promotes_and_conflicts() {
    let m = assemble(
        ".globl main
.text
main: nop
",
    );
    assert_eq!(m.entry_point, Some(0x0040_0000));
    let report = assemble_err(
        Settings::default(),
        ".globl missing
.text
nop
",
    );
    assert!(report.contains("not defined"), "report was: {}", report);
}

#[test]
fn extern_allocates_globally() {
    let mut m = assemble(
        ".extern buffer 8
.text
la $t0,buffer
",
    );
    // First extern allocation lands at the extern segment base.
    let lui = m.memory.statement_at(0x0040_0000).unwrap();
    assert_eq!(lui.operands[1], 0x1000);
    let ori = m.memory.statement_at(0x0040_0004).unwrap();
    assert_eq!(ori.operands[2], 0);
    assert_eq!(m.memory.get_word(0x1000_0000, false).unwrap(), 0);
}

#[test]
fn out_of_range_data_warns_and_truncates() {
    let mut m = assemble(
        ".data
x: .byte 300
",
    );
    assert_eq!(m.memory.get_byte(0x1001_0000, false).unwrap(), 300 & 0xff);
    // Promoted to an error under warnings-are-errors.
    let mut strict = Settings::default();
    strict.warnings_are_errors = true;
    let report = assemble_err(strict, ".data\nx: .byte 300\n");
    assert!(report.contains("truncated"), "report was: {}", report);
}

#[test]
fn pseudo_rejected_when_disabled() {
    let mut settings = Settings::default();
    settings.extended_pseudo = false;
    let report = assemble_err(settings, ".text\nli $t0,100000\n");
    assert!(report.contains("do not match"), "report was: {}", report);
}

#[test]
fn hex_literal_is_not_sign_extended() {
    let m = assemble(".text\nori $t0,$0,0xffff\n");
    let s = m.memory.statement_at(0x0040_0000).unwrap();
    assert_eq!(s.operands[2], 0xffff);
}

#[test]
fn label_offset_operand() {
    let mut m = assemble(
        ".data
table: .word 1,2,3
.text
lw $t0,table+8
",
    );
    let lui = m.memory.statement_at(0x0040_0000).unwrap();
    let lw = m.memory.statement_at(0x0040_0004).unwrap();
    let address = ((lui.operands[1] as u32) << 16).wrapping_add(lw.operands[1] as u32);
    assert_eq!(address, 0x1001_0008);
    assert_eq!(m.memory.get_word(0x1001_0008, false).unwrap(), 3);
}

#[test]
fn big_endian_data_layout() {
    let mut settings = Settings::default();
    settings.big_endian = true;
    let mut m = assemble_with(settings, ".data\nx: .word 0x11223344\n");
    assert_eq!(m.memory.get_byte(0x1001_0000, false).unwrap(), 0x11);
    assert_eq!(m.memory.get_byte(0x1001_0003, false).unwrap(), 0x44);
}

#[test]
fn compact_layout_uses_compact_templates() {
    let mut settings = Settings::default();
    settings.layout = LayoutKind::CompactData;
    let m = assemble_with(
        settings,
        ".data
msg: .word 1
.text
la $t0,msg
nop
",
    );
    // la is a single ori under the 16-bit layout.
    let set = InstructionSet::new();
    let la = m.memory.statement_at(0x3000).unwrap();
    assert_eq!(set.basics[la.instruction].mnemonic, "ori");
    let nop = m.memory.statement_at(0x3004).unwrap();
    assert_eq!(set.basics[nop.instruction].mnemonic, "nop");
}

#[test]
fn assembly_is_deterministic() {
    let mut first = assemble(HELLO);
    let mut second = assemble(HELLO);
    for address in (0x0040_0000u32..0x0040_0018).step_by(4) {
        assert_eq!(
            first.memory.get_word(address, false).unwrap(),
            second.memory.get_word(address, false).unwrap()
        );
    }
}

#[test]
fn assembly_is_idempotent_under_reset() {
    let set = InstructionSet::new();
    let mut machine = Machine::new(Settings::default());
    assemble_source(&mut machine, &set, "test.asm", HELLO).unwrap();
    let words: Vec<i32> = (0..6)
        .map(|i| machine.memory.get_word(0x0040_0000 + 4 * i, false).unwrap())
        .collect();
    // assemble() resets the machine before the second pass over HELLO.
    assemble_source(&mut machine, &set, "test.asm", HELLO).unwrap();
    let again: Vec<i32> = (0..6)
        .map(|i| machine.memory.get_word(0x0040_0000 + 4 * i, false).unwrap())
        .collect();
    assert_eq!(words, again);
}

#[test]
fn globals_link_across_files() {
    let dir = tempfile::tempdir().unwrap();
    let library = dir.path().join("library.asm");
    writeln!(
        std::fs::File::create(&library).unwrap(),
        ".globl counter\n.data\ncounter: .word 99"
    )
    .unwrap();
    let client = dir.path().join("client.asm");
    writeln!(
        std::fs::File::create(&client).unwrap(),
        ".data\nhandle: .word counter\n.text\nlw $t0,counter"
    )
    .unwrap();
    let set = InstructionSet::new();
    let mut machine = Machine::new(Settings::default());
    emips::assemble_files(&mut machine, &set, &[library, client])
        .expect("cross-file reference should resolve");
    // library's .data lands first; client's word follows it.
    assert_eq!(machine.memory.get_word(0x1001_0000, false).unwrap(), 99);
    assert_eq!(machine.memory.get_word(0x1001_0004, false).unwrap(), 0x1001_0000);
}

#[test]
fn kernel_segments_assemble_alongside_user() {
    let mut m = assemble(
        ".kdata
kmsg: .asciiz \"k\"
.ktext 0x80000180
eret
.text
nop
",
    );
    assert_eq!(m.memory.get_byte(0x9000_0000, false).unwrap(), 'k' as i32);
    assert!(m.memory.statement_at(0x8000_0180).is_some());
    assert!(m.memory.statement_at(0x0040_0000).is_some());
}

#[test]
fn space_advances_without_writing() {
    let mut m = assemble(
        ".data
gap: .space 6
after: .word 1
",
    );
    // Cursor advanced 6 then aligned to the next word boundary.
    assert_eq!(m.memory.get_word(0x1001_0008, false).unwrap(), 1);
    assert_eq!(m.memory.get_word(0x1001_0000, false).unwrap(), 0);
}

#[test]
fn float_and_double_bit_patterns() {
    let mut m = assemble(
        ".data
f: .float 1.5
d: .double -2.25
",
    );
    assert_eq!(
        m.memory.get_word(0x1001_0000, false).unwrap() as u32,
        1.5f32.to_bits()
    );
    assert_eq!(
        m.memory.get_doubleword(0x1001_0008).unwrap() as u64,
        (-2.25f64).to_bits()
    );
}

#[test]
fn instructions_in_data_segment_are_errors() {
    let report = assemble_err(Settings::default(), ".data\nadd $t0,$t0,$t0\n");
    assert!(report.contains("text segment"), "report was: {}", report);
}

#[test]
fn undefined_symbol_reported_after_all_files() {
    let report = assemble_err(Settings::default(), ".data\nptr: .word nowhere\n");
    assert!(report.contains("not defined"), "report was: {}", report);
}
