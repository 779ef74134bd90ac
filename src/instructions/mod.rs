// The instruction table: declarative descriptions of every basic machine
// instruction (operand pattern, encoding, semantics function) and every
// extended instruction (expansion templates). Operand matching picks the
// best candidate for a token list by minimizing widening cost; the decode
// index maps machine words back to instructions for self-modifying code.

pub mod basic;
pub mod encoding;
pub mod pseudo;

use crate::errors::SimException;
use crate::tokens::{Token, TokenKind};
use crate::Machine;
use encoding::Encoding;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Reg,
    FReg,
    Imm5,
    Imm16,
    Imm16U,
    Imm32,
    BranchOffset,
    JumpTarget,
    Label,
    LParen,
    RParen,
}

impl OperandKind {
    pub fn is_value(self) -> bool {
        !matches!(self, OperandKind::LParen | OperandKind::RParen)
    }
}

/// Non-exception outcomes that still abort the current step.
#[derive(Debug, Clone)]
pub enum ExecInterrupt {
    Exception(SimException),
    Halt(i32),
}

impl From<SimException> for ExecInterrupt {
    fn from(e: SimException) -> Self {
        ExecInterrupt::Exception(e)
    }
}

impl From<crate::errors::AddressError> for ExecInterrupt {
    fn from(e: crate::errors::AddressError) -> Self {
        ExecInterrupt::Exception(e.into())
    }
}

pub type ExecResult = Result<(), ExecInterrupt>;
pub type ExecFn = fn(&mut Machine, &BasicStatement) -> ExecResult;

/// Where a statement came from, for diagnostics and the debugger listing.
#[derive(Debug, Clone)]
pub struct StatementSource {
    pub file: usize,
    pub line: usize,
    pub text: String,
}

impl StatementSource {
    pub fn synthetic(text: impl Into<String>) -> Arc<Self> {
        Arc::new(StatementSource { file: usize::max_value(), line: 0, text: text.into() })
    }
}

/// One assembled machine instruction: the table entry it instantiates,
/// its resolved operand values, and its binary form at a text address.
#[derive(Debug, Clone)]
pub struct BasicStatement {
    pub instruction: usize,
    pub operands: Vec<i32>,
    pub binary: u32,
    pub address: u32,
    pub source: Arc<StatementSource>,
}

impl fmt::Display for BasicStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}  0x{:08x}  {}", self.address, self.binary, self.source.text.trim())
    }
}

pub struct BasicInstruction {
    pub mnemonic: &'static str,
    pub example: &'static str,
    pub operands: Vec<OperandKind>,
    pub encoding: Encoding,
    pub exec: ExecFn,
}

impl BasicInstruction {
    pub fn new(
        mnemonic: &'static str,
        example: &'static str,
        operands: &[OperandKind],
        pattern: &'static str,
        exec: ExecFn,
    ) -> Self {
        let encoding = Encoding::parse(pattern);
        let instruction = BasicInstruction {
            mnemonic,
            example,
            operands: operands.to_vec(),
            encoding,
            exec,
        };
        let value_count = instruction.value_kinds().len();
        for field in &instruction.encoding.fields {
            if field.operand >= value_count {
                panic!("encoding of {} names operand {} but only {} exist", mnemonic, field.operand, value_count);
            }
        }
        instruction
    }

    /// Operand kinds excluding the structural parentheses; this is what
    /// the resolved operand vector is indexed by.
    pub fn value_kinds(&self) -> Vec<OperandKind> {
        self.operands.iter().copied().filter(|k| k.is_value()).collect()
    }
}

pub struct ExtendedInstruction {
    pub mnemonic: &'static str,
    pub example: &'static str,
    pub operands: Vec<OperandKind>,
    pub template: Vec<&'static str>,
    pub compact: Option<Vec<&'static str>>,
}

impl ExtendedInstruction {
    /// Number of machine words this pseudo expands to under the given
    /// settings. Template lines reading exactly `nop` exist only to fill
    /// delay slots and are elided when delayed branching is off.
    pub fn size_words(&self, delayed_branching: bool, compact: bool) -> u32 {
        self.effective_template(compact)
            .iter()
            .filter(|line| delayed_branching || line.trim() != "nop")
            .count() as u32
    }

    pub fn effective_template(&self, compact: bool) -> &[&'static str] {
        match (&self.compact, compact) {
            (Some(lines), true) => lines,
            _ => &self.template,
        }
    }

    pub fn value_kinds(&self) -> Vec<OperandKind> {
        self.operands.iter().copied().filter(|k| k.is_value()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrRef {
    Basic(usize),
    Extended(usize),
}

pub struct InstructionSet {
    pub basics: Vec<BasicInstruction>,
    pub extendeds: Vec<ExtendedInstruction>,
    by_mnemonic: HashMap<&'static str, Vec<InstrRef>>,
    decode_order: Vec<usize>,
}

impl InstructionSet {
    pub fn new() -> Self {
        let basics = basic::table();
        let extendeds = pseudo::table();
        let mut by_mnemonic: HashMap<&'static str, Vec<InstrRef>> = HashMap::new();
        for (i, ins) in basics.iter().enumerate() {
            by_mnemonic.entry(ins.mnemonic).or_default().push(InstrRef::Basic(i));
        }
        for (i, ins) in extendeds.iter().enumerate() {
            by_mnemonic.entry(ins.mnemonic).or_default().push(InstrRef::Extended(i));
        }
        let mut decode_order: Vec<usize> = (0..basics.len()).collect();
        decode_order.sort_by_key(|&i| std::cmp::Reverse(basics[i].encoding.specificity()));
        InstructionSet { basics, extendeds, by_mnemonic, decode_order }
    }

    pub fn is_mnemonic(&self, name: &str) -> bool {
        self.by_mnemonic.contains_key(name)
    }

    pub fn candidates(&self, name: &str) -> &[InstrRef] {
        self.by_mnemonic.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn operand_kinds(&self, r: InstrRef) -> &[OperandKind] {
        match r {
            InstrRef::Basic(i) => &self.basics[i].operands,
            InstrRef::Extended(i) => &self.extendeds[i].operands,
        }
    }

    /// Pick the candidate whose operand pattern best matches the token
    /// list. Lower cost wins; a tie keeps the earlier declaration.
    pub fn find_match(
        &self,
        mnemonic: &str,
        tokens: &[Token],
        allow_extended: bool,
    ) -> Option<InstrRef> {
        let mut best: Option<(InstrRef, u32)> = None;
        for &candidate in self.candidates(mnemonic) {
            if !allow_extended {
                if let InstrRef::Extended(_) = candidate {
                    continue;
                }
            }
            if let Some(cost) = pattern_cost(self.operand_kinds(candidate), tokens) {
                match best {
                    Some((_, c)) if c <= cost => {}
                    _ => best = Some((candidate, cost)),
                }
            }
        }
        best.map(|(r, _)| r)
    }

    pub fn encode(&self, index: usize, operands: &[i32], address: u32) -> u32 {
        let ins = &self.basics[index];
        ins.encoding.encode(&ins.value_kinds(), operands, address)
    }

    /// Binary-match index lookup: decode a machine word back into a
    /// statement. Most-specific opcode mask wins.
    pub fn decode(&self, word: u32, address: u32) -> Option<BasicStatement> {
        for &i in &self.decode_order {
            let ins = &self.basics[i];
            if ins.encoding.matches(word) {
                let kinds = ins.value_kinds();
                let operands = ins.encoding.decode(&kinds, word, address);
                let text = render_statement(ins.mnemonic, &kinds, &operands);
                return Some(BasicStatement {
                    instruction: i,
                    operands,
                    binary: word,
                    address,
                    source: StatementSource::synthetic(text),
                });
            }
        }
        None
    }

    pub fn basic_index(&self, mnemonic: &str) -> Option<usize> {
        self.candidates(mnemonic).iter().find_map(|r| match r {
            InstrRef::Basic(i) => Some(*i),
            _ => None,
        })
    }
}

/// Assembly-style rendering of a decoded statement, register operands in
/// numeric form.
pub fn render_statement(mnemonic: &str, kinds: &[OperandKind], operands: &[i32]) -> String {
    let mut text = mnemonic.to_string();
    for (i, (&kind, value)) in kinds.iter().zip(operands.iter()).enumerate() {
        text.push(if i == 0 { ' ' } else { ',' });
        match kind {
            OperandKind::Reg => text.push_str(&format!("${}", value)),
            OperandKind::FReg => text.push_str(&format!("$f{}", value)),
            OperandKind::JumpTarget => text.push_str(&format!("0x{:08x}", *value as u32)),
            _ => text.push_str(&value.to_string()),
        }
    }
    text
}

/// Cost of matching one token against one operand kind; None if the pair
/// is unacceptable. Exact kinds cost 0, widening costs more.
fn operand_cost(token: &Token, kind: OperandKind) -> Option<u32> {
    use OperandKind::*;
    use TokenKind::*;
    match kind {
        Reg => matches!(token.kind, RegisterName | RegisterNumber).then(|| 0),
        FReg => (token.kind == FpRegisterName).then(|| 0),
        LParen => (token.kind == LeftParen).then(|| 0),
        RParen => (token.kind == RightParen).then(|| 0),
        Imm5 => (token.kind == Int5).then(|| 0),
        Imm16 => match token.kind {
            Int5 => Some(1),
            Int16 => Some(0),
            _ => None,
        },
        Imm16U => match token.kind {
            Int5 => Some(1),
            Int16 => Some(1), // reinterpreted as a 16-bit pattern
            Int16U => Some(0),
            _ => None,
        },
        Imm32 => match token.kind {
            Int5 => Some(3),
            Int16 => Some(2),
            Int16U => Some(1),
            Int32 => Some(0),
            _ => None,
        },
        BranchOffset => match token.kind {
            Identifier | Operator => Some(0),
            Int5 | Int16 => Some(0),
            _ => None,
        },
        JumpTarget => match token.kind {
            Identifier | Operator => Some(0),
            Int5 | Int16 | Int16U | Int32 => Some(0),
            _ => None,
        },
        Label => match token.kind {
            Identifier | Operator => Some(0),
            Int5 => Some(3),
            Int16 => Some(2),
            Int16U => Some(1),
            Int32 => Some(0),
            _ => None,
        },
    }
}

fn pattern_cost(kinds: &[OperandKind], tokens: &[Token]) -> Option<u32> {
    if kinds.len() != tokens.len() {
        return None;
    }
    let mut total = 0;
    for (token, &kind) in tokens.iter().zip(kinds.iter()) {
        total += operand_cost(token, kind)?;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Location;

    fn tok(kind: TokenKind, text: &str) -> Token {
        Token::new(kind, text, Location::new(0, 1, 1))
    }

    #[test]
    fn narrow_immediate_prefers_basic_addi() {
        let set = InstructionSet::new();
        let tokens = vec![
            tok(TokenKind::RegisterName, "$t0"),
            tok(TokenKind::RegisterName, "$t1"),
            tok(TokenKind::Int16, "-100"),
        ];
        match set.find_match("addi", &tokens, true) {
            Some(InstrRef::Basic(i)) => assert_eq!(set.basics[i].mnemonic, "addi"),
            other => panic!("unexpected match {:?}", other),
        }
    }

    #[test]
    fn wide_immediate_falls_to_pseudo() {
        let set = InstructionSet::new();
        let tokens = vec![
            tok(TokenKind::RegisterName, "$t0"),
            tok(TokenKind::RegisterName, "$t1"),
            tok(TokenKind::Int32, "100000"),
        ];
        match set.find_match("addi", &tokens, true) {
            Some(InstrRef::Extended(_)) => {}
            other => panic!("unexpected match {:?}", other),
        }
        assert_eq!(set.find_match("addi", &tokens, false), None);
    }

    #[test]
    fn every_basic_encoding_round_trips() {
        let set = InstructionSet::new();
        for (i, ins) in set.basics.iter().enumerate() {
            let kinds = ins.value_kinds();
            let operands: Vec<i32> = kinds
                .iter()
                .map(|k| match k {
                    OperandKind::Reg | OperandKind::FReg => 2,
                    OperandKind::Imm5 => 3,
                    OperandKind::Imm16 => -4,
                    OperandKind::Imm16U => 5,
                    OperandKind::BranchOffset => -1,
                    OperandKind::JumpTarget => 0x0040_0040,
                    _ => 0,
                })
                .collect();
            let word = set.encode(i, &operands, 0x0040_0000);
            let decoded = set.decode(word, 0x0040_0000).unwrap_or_else(|| {
                panic!("{} did not decode", ins.mnemonic)
            });
            // The decoded entry must agree on operands; aliases that
            // encode identically (e.g. nop vs sll) may win on specificity.
            if decoded.instruction == i {
                assert_eq!(decoded.operands, operands, "operand mismatch for {}", ins.mnemonic);
            } else {
                assert_eq!(decoded.binary, word);
            }
        }
    }
}
