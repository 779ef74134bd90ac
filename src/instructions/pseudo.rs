// Extended (pseudo) instructions. Each entry carries an ordered list of
// template lines that expand to basic instructions in the second pass,
// plus an optional compact variant used under a 16-bit memory layout.
//
// Template markers, substituted against the resolved operand vector:
//   {N}      operand N: registers render as $n / $fn, numbers in decimal
//   {N:hi}   upper 16 bits of operand N (pairs with an ori low half)
//   {N:lo}   lower 16 bits of operand N
//   {N:hic}  upper 16 bits adjusted for a sign-extended low half
//   {N:los}  lower 16 bits, sign-extended (pairs with hic)
//   {N:neg}  arithmetic negation of operand N
//   {N:ror}  32 minus operand N, for the complementary rotate shift
//   {N:br}   PC-relative word offset from the expanded line to operand N
//
// A template line that is exactly `nop` exists to fill a delay slot and
// is elided when delayed branching is disabled.

use super::OperandKind::{self, *};
use super::ExtendedInstruction;
use crate::bits;

fn x(
    mnemonic: &'static str,
    example: &'static str,
    operands: &[OperandKind],
    template: &[&'static str],
) -> ExtendedInstruction {
    ExtendedInstruction {
        mnemonic,
        example,
        operands: operands.to_vec(),
        template: template.to_vec(),
        compact: None,
    }
}

fn xc(
    mnemonic: &'static str,
    example: &'static str,
    operands: &[OperandKind],
    template: &[&'static str],
    compact: &[&'static str],
) -> ExtendedInstruction {
    ExtendedInstruction {
        mnemonic,
        example,
        operands: operands.to_vec(),
        template: template.to_vec(),
        compact: Some(compact.to_vec()),
    }
}

pub fn table() -> Vec<ExtendedInstruction> {
    vec![
        // Loads of immediates and addresses.
        x("li", "li $t1,100", &[Reg, Imm16U], &["ori {0},$0,{1}"]),
        x("li", "li $t1,-100", &[Reg, Imm16], &["addiu {0},$0,{1}"]),
        x("li", "li $t1,100000", &[Reg, Imm32], &["lui $1,{1:hi}", "ori {0},$1,{1:lo}"]),
        xc(
            "la",
            "la $t1,label",
            &[Reg, Label],
            &["lui $1,{1:hi}", "ori {0},$1,{1:lo}"],
            &["ori {0},$0,{1}"],
        ),
        // Register moves and one-operand arithmetic.
        x("move", "move $t1,$t2", &[Reg, Reg], &["addu {0},$0,{1}"]),
        x("neg", "neg $t1,$t2", &[Reg, Reg], &["sub {0},$0,{1}"]),
        x("negu", "negu $t1,$t2", &[Reg, Reg], &["subu {0},$0,{1}"]),
        x("not", "not $t1,$t2", &[Reg, Reg], &["nor {0},{1},$0"]),
        x(
            "abs",
            "abs $t1,$t2",
            &[Reg, Reg],
            &["sra $1,{1},31", "xor {0},{1},$1", "subu {0},{0},$1"],
        ),
        // Arithmetic with immediates too wide for the basic form.
        x("add", "add $t1,$t2,-100", &[Reg, Reg, Imm16], &["addi {0},{1},{2}"]),
        x(
            "add",
            "add $t1,$t2,100000",
            &[Reg, Reg, Imm32],
            &["lui $1,{2:hi}", "ori $1,$1,{2:lo}", "add {0},{1},$1"],
        ),
        x("addi", "addi $t1,$t2,100000", &[Reg, Reg, Imm32], &[
            "lui $1,{2:hi}",
            "ori $1,$1,{2:lo}",
            "add {0},{1},$1",
        ]),
        x("addu", "addu $t1,$t2,-100", &[Reg, Reg, Imm16], &["addiu {0},{1},{2}"]),
        x(
            "addiu",
            "addiu $t1,$t2,100000",
            &[Reg, Reg, Imm32],
            &["lui $1,{2:hi}", "ori $1,$1,{2:lo}", "addu {0},{1},$1"],
        ),
        x("sub", "sub $t1,$t2,-100", &[Reg, Reg, Imm16], &["addi {0},{1},{2:neg}"]),
        x("subu", "subu $t1,$t2,-100", &[Reg, Reg, Imm16], &["addiu {0},{1},{2:neg}"]),
        x("subi", "subi $t1,$t2,-100", &[Reg, Reg, Imm16], &["addi {0},{1},{2:neg}"]),
        x("subiu", "subiu $t1,$t2,-100", &[Reg, Reg, Imm16], &["addiu {0},{1},{2:neg}"]),
        x(
            "mul",
            "mul $t1,$t2,-100",
            &[Reg, Reg, Imm16],
            &["addiu $1,$0,{2}", "mul {0},{1},$1"],
        ),
        x(
            "mul",
            "mul $t1,$t2,100000",
            &[Reg, Reg, Imm32],
            &["lui $1,{2:hi}", "ori $1,$1,{2:lo}", "mul {0},{1},$1"],
        ),
        x("div", "div $t1,$t2,$t3", &[Reg, Reg, Reg], &["div {1},{2}", "mflo {0}"]),
        x("rem", "rem $t1,$t2,$t3", &[Reg, Reg, Reg], &["div {1},{2}", "mfhi {0}"]),
        x("divu", "divu $t1,$t2,$t3", &[Reg, Reg, Reg], &["divu {1},{2}", "mflo {0}"]),
        x("remu", "remu $t1,$t2,$t3", &[Reg, Reg, Reg], &["divu {1},{2}", "mfhi {0}"]),
        // Set-on-comparison family.
        x(
            "seq",
            "seq $t1,$t2,$t3",
            &[Reg, Reg, Reg],
            &["subu {0},{1},{2}", "ori $1,$0,1", "sltu {0},{0},$1"],
        ),
        x("sne", "sne $t1,$t2,$t3", &[Reg, Reg, Reg], &["subu {0},{1},{2}", "sltu {0},$0,{0}"]),
        x("sge", "sge $t1,$t2,$t3", &[Reg, Reg, Reg], &["slt {0},{1},{2}", "xori {0},{0},1"]),
        x("sgeu", "sgeu $t1,$t2,$t3", &[Reg, Reg, Reg], &["sltu {0},{1},{2}", "xori {0},{0},1"]),
        x("sgt", "sgt $t1,$t2,$t3", &[Reg, Reg, Reg], &["slt {0},{2},{1}"]),
        x("sgtu", "sgtu $t1,$t2,$t3", &[Reg, Reg, Reg], &["sltu {0},{2},{1}"]),
        x("sle", "sle $t1,$t2,$t3", &[Reg, Reg, Reg], &["slt {0},{2},{1}", "xori {0},{0},1"]),
        x("sleu", "sleu $t1,$t2,$t3", &[Reg, Reg, Reg], &["sltu {0},{2},{1}", "xori {0},{0},1"]),
        // Branch shorthands. The branch is always the last template line,
        // so the caller's delay slot behaves as written.
        x("b", "b label", &[BranchOffset], &["beq $0,$0,{0}"]),
        x("beqz", "beqz $t1,label", &[Reg, BranchOffset], &["beq {0},$0,{1}"]),
        x("bnez", "bnez $t1,label", &[Reg, BranchOffset], &["bne {0},$0,{1}"]),
        x(
            "bge",
            "bge $t1,$t2,label",
            &[Reg, Reg, Label],
            &["slt $1,{0},{1}", "beq $1,$0,{2:br}"],
        ),
        x(
            "bgeu",
            "bgeu $t1,$t2,label",
            &[Reg, Reg, Label],
            &["sltu $1,{0},{1}", "beq $1,$0,{2:br}"],
        ),
        x(
            "bgt",
            "bgt $t1,$t2,label",
            &[Reg, Reg, Label],
            &["slt $1,{1},{0}", "bne $1,$0,{2:br}"],
        ),
        x(
            "bgtu",
            "bgtu $t1,$t2,label",
            &[Reg, Reg, Label],
            &["sltu $1,{1},{0}", "bne $1,$0,{2:br}"],
        ),
        x(
            "ble",
            "ble $t1,$t2,label",
            &[Reg, Reg, Label],
            &["slt $1,{1},{0}", "beq $1,$0,{2:br}"],
        ),
        x(
            "bleu",
            "bleu $t1,$t2,label",
            &[Reg, Reg, Label],
            &["sltu $1,{1},{0}", "beq $1,$0,{2:br}"],
        ),
        x(
            "blt",
            "blt $t1,$t2,label",
            &[Reg, Reg, Label],
            &["slt $1,{0},{1}", "bne $1,$0,{2:br}"],
        ),
        x(
            "bltu",
            "bltu $t1,$t2,label",
            &[Reg, Reg, Label],
            &["sltu $1,{0},{1}", "bne $1,$0,{2:br}"],
        ),
        x(
            "beq",
            "beq $t1,-100,label",
            &[Reg, Imm16, Label],
            &["addiu $1,$0,{1}", "beq {0},$1,{2:br}"],
        ),
        x(
            "bne",
            "bne $t1,-100,label",
            &[Reg, Imm16, Label],
            &["addiu $1,$0,{1}", "bne {0},$1,{2:br}"],
        ),
        x(
            "blt",
            "blt $t1,-100,label",
            &[Reg, Imm16, Label],
            &["addiu $1,$0,{1}", "slt $1,{0},$1", "bne $1,$0,{2:br}"],
        ),
        x(
            "ble",
            "ble $t1,-100,label",
            &[Reg, Imm16, Label],
            &["addiu $1,$0,{1}", "slt $1,$1,{0}", "beq $1,$0,{2:br}"],
        ),
        x(
            "bgt",
            "bgt $t1,-100,label",
            &[Reg, Imm16, Label],
            &["addiu $1,$0,{1}", "slt $1,$1,{0}", "bne $1,$0,{2:br}"],
        ),
        x(
            "bge",
            "bge $t1,-100,label",
            &[Reg, Imm16, Label],
            &["addiu $1,$0,{1}", "slt $1,{0},$1", "beq $1,$0,{2:br}"],
        ),
        x("bal", "bal label", &[BranchOffset], &["bgezal $0,{0}"]),
        // Set-on-comparison against an immediate.
        x("seq", "seq $t1,$t2,-100", &[Reg, Reg, Imm16], &[
            "addiu $1,$0,{2}",
            "subu {0},{1},$1",
            "ori $1,$0,1",
            "sltu {0},{0},$1",
        ]),
        x("sne", "sne $t1,$t2,-100", &[Reg, Reg, Imm16], &[
            "addiu $1,$0,{2}",
            "subu {0},{1},$1",
            "sltu {0},$0,{0}",
        ]),
        x("sge", "sge $t1,$t2,-100", &[Reg, Reg, Imm16], &[
            "slti {0},{1},{2}",
            "xori {0},{0},1",
        ]),
        x("sgt", "sgt $t1,$t2,-100", &[Reg, Reg, Imm16], &[
            "addiu $1,$0,{2}",
            "slt {0},$1,{1}",
        ]),
        x("sle", "sle $t1,$t2,-100", &[Reg, Reg, Imm16], &[
            "addiu $1,$0,{2}",
            "slt {0},$1,{1}",
            "xori {0},{0},1",
        ]),
        x("slt", "slt $t1,$t2,-100", &[Reg, Reg, Imm16], &["slti {0},{1},{2}"]),
        x("sltu", "sltu $t1,$t2,-100", &[Reg, Reg, Imm16], &["sltiu {0},{1},{2}"]),
        // Rotates via shift pairs.
        x("rol", "rol $t1,$t2,10", &[Reg, Reg, Imm5], &[
            "srl $1,{1},{2:ror}",
            "sll {0},{1},{2}",
            "or {0},{0},$1",
        ]),
        x("ror", "ror $t1,$t2,10", &[Reg, Reg, Imm5], &[
            "sll $1,{1},{2:ror}",
            "srl {0},{1},{2}",
            "or {0},{0},$1",
        ]),
        // Memory access by label, with compact single-instruction forms.
        xc(
            "lw",
            "lw $t1,label",
            &[Reg, Label],
            &["lui $1,{1:hic}", "lw {0},{1:los}($1)"],
            &["lw {0},{1}($0)"],
        ),
        xc(
            "sw",
            "sw $t1,label",
            &[Reg, Label],
            &["lui $1,{1:hic}", "sw {0},{1:los}($1)"],
            &["sw {0},{1}($0)"],
        ),
        xc(
            "lh",
            "lh $t1,label",
            &[Reg, Label],
            &["lui $1,{1:hic}", "lh {0},{1:los}($1)"],
            &["lh {0},{1}($0)"],
        ),
        xc(
            "lhu",
            "lhu $t1,label",
            &[Reg, Label],
            &["lui $1,{1:hic}", "lhu {0},{1:los}($1)"],
            &["lhu {0},{1}($0)"],
        ),
        xc(
            "sh",
            "sh $t1,label",
            &[Reg, Label],
            &["lui $1,{1:hic}", "sh {0},{1:los}($1)"],
            &["sh {0},{1}($0)"],
        ),
        xc(
            "lb",
            "lb $t1,label",
            &[Reg, Label],
            &["lui $1,{1:hic}", "lb {0},{1:los}($1)"],
            &["lb {0},{1}($0)"],
        ),
        xc(
            "lbu",
            "lbu $t1,label",
            &[Reg, Label],
            &["lui $1,{1:hic}", "lbu {0},{1:los}($1)"],
            &["lbu {0},{1}($0)"],
        ),
        xc(
            "sb",
            "sb $t1,label",
            &[Reg, Label],
            &["lui $1,{1:hic}", "sb {0},{1:los}($1)"],
            &["sb {0},{1}($0)"],
        ),
        xc(
            "lwc1",
            "lwc1 $f1,label",
            &[FReg, Label],
            &["lui $1,{1:hic}", "lwc1 {0},{1:los}($1)"],
            &["lwc1 {0},{1}($0)"],
        ),
        xc(
            "swc1",
            "swc1 $f1,label",
            &[FReg, Label],
            &["lui $1,{1:hic}", "swc1 {0},{1:los}($1)"],
            &["swc1 {0},{1}($0)"],
        ),
        xc(
            "ldc1",
            "ldc1 $f2,label",
            &[FReg, Label],
            &["lui $1,{1:hic}", "ldc1 {0},{1:los}($1)"],
            &["ldc1 {0},{1}($0)"],
        ),
        xc(
            "sdc1",
            "sdc1 $f2,label",
            &[FReg, Label],
            &["lui $1,{1:hic}", "sdc1 {0},{1:los}($1)"],
            &["sdc1 {0},{1}($0)"],
        ),
        // Traditional aliases for the coprocessor 1 loads and stores.
        x(
            "l.s",
            "l.s $f1,-100($t2)",
            &[FReg, Imm16, LParen, Reg, RParen],
            &["lwc1 {0},{1}({2})"],
        ),
        x(
            "s.s",
            "s.s $f1,-100($t2)",
            &[FReg, Imm16, LParen, Reg, RParen],
            &["swc1 {0},{1}({2})"],
        ),
        x(
            "l.d",
            "l.d $f2,-100($t2)",
            &[FReg, Imm16, LParen, Reg, RParen],
            &["ldc1 {0},{1}({2})"],
        ),
        x(
            "s.d",
            "s.d $f2,-100($t2)",
            &[FReg, Imm16, LParen, Reg, RParen],
            &["sdc1 {0},{1}({2})"],
        ),
        // Bare-parenthesis address forms.
        x("lw", "lw $t1,($t2)", &[Reg, LParen, Reg, RParen], &["lw {0},0({1})"]),
        x("sw", "sw $t1,($t2)", &[Reg, LParen, Reg, RParen], &["sw {0},0({1})"]),
        x("lb", "lb $t1,($t2)", &[Reg, LParen, Reg, RParen], &["lb {0},0({1})"]),
        x("sb", "sb $t1,($t2)", &[Reg, LParen, Reg, RParen], &["sb {0},0({1})"]),
    ]
}

/// Substitute the markers of one template line. `line_address` is the
/// address the expanded line will occupy, used for `{N:br}`.
pub fn render_line(
    line: &str,
    kinds: &[OperandKind],
    operands: &[i32],
    line_address: u32,
) -> String {
    let mut out = String::with_capacity(line.len() + 8);
    let mut rest = line;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let close = match rest[open..].find('}') {
            Some(c) => open + c,
            None => break,
        };
        let marker = &rest[open + 1..close];
        let (index_str, modifier) = match marker.find(':') {
            Some(colon) => (&marker[..colon], &marker[colon + 1..]),
            None => (marker, ""),
        };
        let index: usize = index_str.parse().expect("bad template marker index");
        let value = operands[index];
        match modifier {
            "" => match kinds[index] {
                Reg => out.push_str(&format!("${}", value)),
                FReg => out.push_str(&format!("$f{}", value)),
                _ => out.push_str(&value.to_string()),
            },
            "hi" => out.push_str(&bits::hi_half(value).to_string()),
            "lo" => out.push_str(&bits::lo_half(value).to_string()),
            "los" => out.push_str(&bits::sign_extend(bits::lo_half(value), 16).to_string()),
            "hic" => out.push_str(&bits::hi_half_adjusted(value).to_string()),
            "neg" => out.push_str(&value.wrapping_neg().to_string()),
            "ror" => out.push_str(&((32 - value) & 0x1f).to_string()),
            "br" => {
                let offset = ((value as i64 - (line_address as i64 + 4)) >> 2) as i32;
                out.push_str(&offset.to_string());
            }
            other => panic!("unknown template modifier {:?}", other),
        }
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    out
}
