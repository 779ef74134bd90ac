// Two-pass assembler. Pass one tokenizes, handles directives and macros,
// assigns every statement its emit address, and defines symbols; pass two
// resolves operands, expands pseudo-instructions through their templates,
// and writes machine words into memory. All diagnostics accumulate in the
// ErrorList so a broken build reports more than its first problem.

use crate::directives::Directive;
use crate::errors::ErrorList;
use crate::instructions::{
    pseudo, BasicStatement, InstrRef, InstructionSet, OperandKind, StatementSource,
};
use crate::lexer::{Lexer, SourceLine};
use crate::macros::{call_arguments, MacroDef, MacroPool};
use crate::memory::MemoryLayout;
use crate::symbols::{ForwardRefPool, SymbolTable};
use crate::tokens::{fpr_by_name, gpr_of_token, Token, TokenKind};
use crate::{Machine, Settings};
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named contiguous address range with its emission cursor.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub name: &'static str,
    pub is_data: bool,
    pub first: u32,
    pub last: u32,
    pub cursor: u32,
}

impl Segment {
    fn new(name: &'static str, is_data: bool, first: u32, last: u32) -> Self {
        Segment { name, is_data, first, last, cursor: first }
    }

    pub(crate) fn fits(&self, address: u32, size: u32) -> bool {
        address >= self.first && address.wrapping_add(size.saturating_sub(1)) <= self.last
    }
}

/// The five emission segments; one text and one data segment are active
/// at any point of the first pass.
pub struct Segments {
    pub text: Segment,
    pub data: Segment,
    pub ktext: Segment,
    pub kdata: Segment,
    pub extern_: Segment,
    kernel_text_active: bool,
    kernel_data_active: bool,
    pub in_data: bool,
}

impl Segments {
    pub fn new(layout: &MemoryLayout) -> Self {
        Segments {
            text: Segment::new(".text", false, layout.text_base, layout.text_limit),
            data: Segment::new(".data", true, layout.data_base, layout.data_limit),
            ktext: Segment::new(".ktext", false, layout.ktext_base, layout.ktext_limit),
            kdata: Segment::new(".kdata", true, layout.kdata_base, layout.kdata_limit),
            extern_: Segment::new(".extern", true, layout.extern_base, layout.extern_limit),
            kernel_text_active: false,
            kernel_data_active: false,
            in_data: false,
        }
    }

    pub fn active_text(&mut self) -> &mut Segment {
        if self.kernel_text_active {
            &mut self.ktext
        } else {
            &mut self.text
        }
    }

    pub fn active_data(&mut self) -> &mut Segment {
        if self.kernel_data_active {
            &mut self.kdata
        } else {
            &mut self.data
        }
    }

    /// Cursor a label defined right now would receive.
    pub fn label_address(&mut self) -> u32 {
        if self.in_data {
            self.active_data().cursor
        } else {
            self.active_text().cursor
        }
    }

    pub fn select_text(&mut self, kernel: bool, address: Option<u32>) {
        self.kernel_text_active = kernel;
        self.in_data = false;
        if let Some(a) = address {
            self.active_text().cursor = a;
        }
    }

    pub fn select_data(&mut self, kernel: bool, address: Option<u32>) {
        self.kernel_data_active = kernel;
        self.in_data = true;
        if let Some(a) = address {
            self.active_data().cursor = a;
        }
    }
}

/// First-pass product: a source statement bound to its emit address.
pub struct ParsedStatement {
    pub line: SourceLine,
    pub mnemonic: Token,
    pub operands: Vec<Token>,
    pub instruction: InstrRef,
    pub address: u32,
    pub size: u32,
    pub unit: usize,
}

pub struct Assembler<'a> {
    set: &'a InstructionSet,
    settings: Settings,
    pub(crate) errors: ErrorList,
    pub(crate) segments: Segments,
    pub(crate) auto_align: bool,
    macros: MacroPool,
    pub(crate) current_macro: Option<MacroDef>,
    pub(crate) locals: Vec<SymbolTable>,
    pub(crate) globals: SymbolTable,
    pub(crate) globl_names: Vec<Token>,
    pub(crate) forward_refs: ForwardRefPool,
    accumulated_refs: ForwardRefPool,
    parsed: BTreeMap<u32, ParsedStatement>,
    pub(crate) current_unit: usize,
}

impl<'a> Assembler<'a> {
    pub fn new(set: &'a InstructionSet, settings: Settings, errors: ErrorList) -> Self {
        let layout = MemoryLayout::for_kind(settings.layout);
        Assembler {
            set,
            settings,
            errors,
            segments: Segments::new(&layout),
            auto_align: true,
            macros: MacroPool::new(),
            current_macro: None,
            locals: Vec::new(),
            globals: SymbolTable::new(),
            globl_names: Vec::new(),
            forward_refs: ForwardRefPool::new(),
            accumulated_refs: ForwardRefPool::new(),
            parsed: BTreeMap::new(),
            current_unit: 0,
        }
    }

    pub fn into_errors(self) -> ErrorList {
        self.errors
    }

    pub fn errors(&self) -> &ErrorList {
        &self.errors
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub(crate) fn report(&mut self, token: &Token, message: String) {
        self.errors.error(Some(token.location), message);
    }

    /// Run both passes over the given source units. Returns success.
    pub fn assemble(&mut self, machine: &mut Machine, units: Vec<Vec<SourceLine>>) -> bool {
        for (u, unit) in units.into_iter().enumerate() {
            self.current_unit = u;
            self.locals.push(SymbolTable::new());
            self.globl_names.clear();
            self.first_pass(machine, unit);
            self.finish_unit(machine);
            if self.errors.over_limit() {
                break;
            }
        }
        // Whatever no file could resolve gets one last chance against the
        // global table, then becomes an undefined-symbol error.
        let mut pool = std::mem::replace(&mut self.accumulated_refs, ForwardRefPool::new());
        let leftover = pool.resolve(&self.globals, &mut machine.memory);
        for entry in leftover.entries() {
            self.errors.error(
                Some(entry.token.location),
                format!("symbol \"{}\" is not defined", entry.token.text),
            );
        }
        if !self.errors.has_errors() {
            self.second_pass(machine);
        }
        if let Some(main) = self.globals.get("main") {
            if !main.is_data {
                machine.entry_point = Some(main.address);
            }
        }
        info!(
            "assembly finished: {} statements, {} errors, {} warnings",
            self.parsed.len(),
            self.errors.error_count(),
            self.errors.warning_count()
        );
        !self.errors.has_errors()
    }

    fn first_pass(&mut self, machine: &mut Machine, unit: Vec<SourceLine>) {
        for line in &unit {
            if self.errors.over_limit() {
                return;
            }
            self.process_line(machine, line);
        }
        if let Some(def) = self.current_macro.take() {
            self.errors.error(
                Some(def.location),
                format!("macro \"{}\" has no matching .end_macro", def.name),
            );
        }
    }

    /// End-of-file forward-reference flow: local table first, then the
    /// global table; what remains is pooled for the end of all files.
    fn finish_unit(&mut self, machine: &mut Machine) {
        self.transfer_globals();
        let mut pool = std::mem::replace(&mut self.forward_refs, ForwardRefPool::new());
        let mut leftover = pool.resolve(&self.locals[self.current_unit], &mut machine.memory);
        let leftover = leftover.resolve(&self.globals, &mut machine.memory);
        self.accumulated_refs.absorb(leftover);
    }

    fn transfer_globals(&mut self) {
        let names = std::mem::replace(&mut self.globl_names, Vec::new());
        for token in names {
            match self.locals[self.current_unit].remove(&token.text) {
                Some(symbol) => {
                    if let Err(prior) = self.globals.define(
                        &symbol.name,
                        symbol.address,
                        symbol.is_data,
                        symbol.location,
                    ) {
                        self.report(
                            &token,
                            format!(
                                "\"{}\" is already defined globally (at {} line {})",
                                token.text,
                                prior.location.file,
                                prior.location.line
                            ),
                        );
                    }
                }
                None => {
                    self.report(
                        &token,
                        format!(".globl names \"{}\" but it is not defined in this file", token.text),
                    );
                }
            }
        }
    }

    pub(crate) fn process_line(&mut self, machine: &mut Machine, line: &SourceLine) {
        let mut tokens: Vec<Token> = line
            .tokens
            .iter()
            .filter(|t| !matches!(t.kind, TokenKind::Comment | TokenKind::Delimiter | TokenKind::Error))
            .cloned()
            .collect();
        if tokens.is_empty() {
            return;
        }
        // Inside a macro definition everything is body until .end_macro.
        if self.current_macro.is_some() {
            if tokens[0].kind == TokenKind::Directive {
                match Directive::from_name(&tokens[0].text) {
                    Some(Directive::EndMacro) => {
                        let def = self.current_macro.take().unwrap();
                        self.macros.define(def);
                        return;
                    }
                    Some(Directive::Macro) => {
                        self.report(&tokens[0], "macro definitions cannot nest".to_string());
                        return;
                    }
                    _ => {}
                }
            }
            let mut body_line = line.clone();
            body_line.tokens = tokens;
            self.current_macro.as_mut().unwrap().body.push(body_line);
            return;
        }
        // Leading labels: IDENTIFIER (or mnemonic-named) followed by colon.
        let mut index = 0;
        while tokens.len() >= index + 2
            && matches!(tokens[index].kind, TokenKind::Identifier | TokenKind::Operator)
            && tokens[index + 1].kind == TokenKind::Colon
        {
            self.define_label(&tokens[index]);
            index += 2;
        }
        let rest = &tokens[index..];
        if rest.is_empty() {
            return;
        }
        match rest[0].kind {
            TokenKind::Directive => {
                let directive = Directive::from_name(&rest[0].text);
                match directive {
                    Some(d) => self.execute_directive(machine, d, rest),
                    None => self.report(&rest[0], format!("unrecognized directive {}", rest[0].text)),
                }
            }
            TokenKind::Operator => self.parse_statement(rest, line),
            TokenKind::Identifier if self.macros.is_macro_name(&rest[0].text) => {
                self.expand_macro_call(machine, rest);
            }
            _ => {
                self.report(
                    &rest[0],
                    format!("\"{}\" is not a recognized instruction, directive or macro", rest[0].text),
                );
            }
        }
    }

    fn define_label(&mut self, token: &Token) {
        let address = self.segments.label_address();
        let is_data = self.segments.in_data;
        let unit = self.current_unit;
        if let Err(prior) =
            self.locals[unit].define(&token.text, address, is_data, token.location)
        {
            self.report(
                token,
                format!(
                    "label \"{}\" already defined at line {}",
                    token.text, prior.location.line
                ),
            );
        }
    }

    /// Collapse IDENTIFIER +/- INTEGER into a single composite label
    /// token, so `label+4` can be one operand.
    fn fold_label_offsets(tokens: &[Token]) -> Vec<Token> {
        let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            let composite = i + 2 < tokens.len()
                && matches!(tokens[i].kind, TokenKind::Identifier)
                && matches!(tokens[i + 1].kind, TokenKind::Plus | TokenKind::Minus)
                && tokens[i + 2].kind.is_integer();
            if composite {
                let text = format!("{}{}{}", tokens[i].text, tokens[i + 1].text, tokens[i + 2].text);
                out.push(Token::new(TokenKind::Identifier, text, tokens[i].location));
                i += 3;
            } else {
                out.push(tokens[i].clone());
                i += 1;
            }
        }
        out
    }

    fn parse_statement(&mut self, rest: &[Token], origin: &SourceLine) {
        let mnemonic = rest[0].clone();
        let operands = Self::fold_label_offsets(&rest[1..]);
        let instruction =
            match self.set.find_match(&mnemonic.text, &operands, self.settings.extended_pseudo) {
                Some(r) => r,
                None => {
                    let example = self
                        .set
                        .candidates(&mnemonic.text)
                        .first()
                        .map(|&r| match r {
                            InstrRef::Basic(i) => self.set.basics[i].example,
                            InstrRef::Extended(i) => self.set.extendeds[i].example,
                        })
                        .unwrap_or("");
                    self.report(
                        &mnemonic,
                        format!(
                            "operands of \"{}\" do not match any instruction format (e.g. \"{}\")",
                            mnemonic.text, example
                        ),
                    );
                    return;
                }
            };
        if self.segments.in_data {
            self.report(&mnemonic, "instructions must be in a text segment".to_string());
            return;
        }
        let compact = MemoryLayout::for_kind(self.settings.layout).uses_compact_space();
        let size = match instruction {
            InstrRef::Basic(_) => 4,
            InstrRef::Extended(i) => {
                4 * self.set.extendeds[i].size_words(self.settings.delayed_branching, compact)
            }
        };
        let segment = self.segments.active_text();
        let address = segment.cursor;
        if !segment.fits(address, size) {
            let name = segment.name;
            self.report(&mnemonic, format!("statement exceeds the {} segment", name));
            return;
        }
        segment.cursor += size;
        if let Some(prior) = self.parsed.get(&address) {
            let message = format!(
                "address 0x{:08x} is already occupied by \"{}\" (line {})",
                address,
                prior.line.text.trim(),
                prior.line.line
            );
            self.report(&mnemonic, message);
            return;
        }
        debug!("0x{:08x} {}", address, mnemonic.text);
        self.parsed.insert(
            address,
            ParsedStatement {
                line: SourceLine {
                    file: origin.file,
                    line: rest[0].location.line,
                    text: origin.text.clone(),
                    tokens: Vec::new(),
                },
                mnemonic,
                operands,
                instruction,
                address,
                size,
                unit: self.current_unit,
            },
        );
    }

    fn expand_macro_call(&mut self, machine: &mut Machine, rest: &[Token]) {
        let name_token = rest[0].clone();
        let arguments = call_arguments(&rest[1..]);
        if self.macros.in_expansion_of(&name_token.text) {
            self.report(&name_token, format!("recursive call of macro \"{}\"", name_token.text));
            return;
        }
        let def = match self.macros.lookup(&name_token.text, arguments.len()) {
            Some(d) => d.clone(),
            None => {
                self.report(
                    &name_token,
                    format!(
                        "no macro \"{}\" accepts {} argument(s)",
                        name_token.text,
                        arguments.len()
                    ),
                );
                return;
            }
        };
        self.macros.push_call(&name_token.text);
        let lines = self.macros.expand(&def, &arguments, &mut self.errors);
        for text in lines {
            let tokens = Lexer::new(self.set).tokenize_snippet(
                &text,
                name_token.location.file,
                name_token.location.line,
                &mut self.errors,
            );
            let synthetic = SourceLine {
                file: name_token.location.file,
                line: name_token.location.line,
                text,
                tokens,
            };
            self.process_line(machine, &synthetic);
        }
        self.macros.pop_call();
    }

    // ------------------------------------------------------------------
    // Second pass.

    fn second_pass(&mut self, machine: &mut Machine) {
        let statements = std::mem::take(&mut self.parsed);
        let compact = machine.layout().uses_compact_space();
        let mut emitted: Vec<BasicStatement> = Vec::new();
        for parsed in statements.values() {
            match parsed.instruction {
                InstrRef::Basic(index) => {
                    let kinds = self.set.basics[index].value_kinds();
                    if let Some(operands) = self.resolve_operands(parsed, &kinds) {
                        let binary = self.set.encode(index, &operands, parsed.address);
                        emitted.push(BasicStatement {
                            instruction: index,
                            operands,
                            binary,
                            address: parsed.address,
                            source: Arc::new(StatementSource {
                                file: parsed.line.file,
                                line: parsed.line.line,
                                text: statement_text(parsed),
                            }),
                        });
                    }
                }
                InstrRef::Extended(index) => {
                    let ext = &self.set.extendeds[index];
                    let kinds = ext.value_kinds();
                    let operands = match self.resolve_operands(parsed, &kinds) {
                        Some(v) => v,
                        None => continue,
                    };
                    let mut address = parsed.address;
                    for line in ext.effective_template(compact) {
                        if !self.settings.delayed_branching && line.trim() == "nop" {
                            continue;
                        }
                        let rendered = pseudo::render_line(line, &kinds, &operands, address);
                        let statement =
                            self.assemble_template_line(&rendered, parsed, address);
                        emitted.push(statement);
                        address += 4;
                    }
                }
            }
        }
        for statement in emitted {
            let address = statement.address;
            if machine.memory.store_statement(address, statement).is_err() {
                self.errors.error(
                    None,
                    format!("cannot emit statement at 0x{:08x}", address),
                );
            }
        }
        self.parsed = statements;
    }

    /// One rendered template line to one BasicStatement. Template output
    /// failing to match a basic instruction is a bug in the table.
    fn assemble_template_line(
        &mut self,
        rendered: &str,
        parsed: &ParsedStatement,
        address: u32,
    ) -> BasicStatement {
        let tokens = Lexer::new(self.set).tokenize_snippet(
            rendered,
            parsed.line.file,
            parsed.line.line,
            &mut self.errors,
        );
        let tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|t| !matches!(t.kind, TokenKind::Comment | TokenKind::Delimiter))
            .collect();
        let index = match self.set.find_match(&tokens[0].text, &tokens[1..], false) {
            Some(InstrRef::Basic(i)) => i,
            _ => panic!("pseudo template line {:?} does not assemble to a basic instruction", rendered),
        };
        let kinds = self.set.basics[index].value_kinds();
        let mut operands = Vec::with_capacity(kinds.len());
        for token in tokens[1..].iter().filter(|t| !matches!(t.kind, TokenKind::LeftParen | TokenKind::RightParen)) {
            let value = match token.kind {
                TokenKind::RegisterName | TokenKind::RegisterNumber => {
                    gpr_of_token(token).unwrap() as i32
                }
                TokenKind::FpRegisterName => fpr_by_name(&token.text).unwrap() as i32,
                _ => token.int_value().unwrap_or_else(|| {
                    panic!("pseudo template operand {:?} in {:?} is not numeric", token.text, rendered)
                }),
            };
            operands.push(value);
        }
        let binary = self.set.encode(index, &operands, address);
        BasicStatement {
            instruction: index,
            operands,
            binary,
            address,
            source: Arc::new(StatementSource {
                file: parsed.line.file,
                line: parsed.line.line,
                text: rendered.to_string(),
            }),
        }
    }

    fn resolve_operands(
        &mut self,
        parsed: &ParsedStatement,
        kinds: &[OperandKind],
    ) -> Option<Vec<i32>> {
        let mut values = Vec::with_capacity(kinds.len());
        let value_tokens = parsed
            .operands
            .iter()
            .filter(|t| !matches!(t.kind, TokenKind::LeftParen | TokenKind::RightParen));
        for (token, &kind) in value_tokens.zip(kinds.iter()) {
            let value = match kind {
                OperandKind::Reg => gpr_of_token(token).map(|n| n as i32),
                OperandKind::FReg => fpr_by_name(&token.text).map(|n| n as i32),
                OperandKind::Imm5
                | OperandKind::Imm16
                | OperandKind::Imm16U
                | OperandKind::Imm32 => token.int_value(),
                OperandKind::BranchOffset => {
                    if token.kind.is_integer() {
                        token.int_value()
                    } else {
                        self.lookup_symbol(token, parsed.unit).map(|target| {
                            ((target as i64 - (parsed.address as i64 + 4)) >> 2) as i32
                        })
                    }
                }
                OperandKind::JumpTarget | OperandKind::Label => {
                    if token.kind.is_integer() {
                        token.int_value()
                    } else {
                        self.lookup_symbol(token, parsed.unit).map(|a| a as i32)
                    }
                }
                OperandKind::LParen | OperandKind::RParen => unreachable!(),
            };
            match value {
                Some(v) => values.push(v),
                None => {
                    let text = token.text.clone();
                    self.report(token, format!("cannot resolve operand \"{}\"", text));
                    return None;
                }
            }
        }
        Some(values)
    }

    /// Local-then-global symbol lookup, honoring a folded `name±offset`.
    fn lookup_symbol(&self, token: &Token, unit: usize) -> Option<u32> {
        let text = &token.text;
        let split = text
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '+' || *c == '-')
            .map(|(i, _)| i);
        let (name, offset) = match split {
            Some(i) => {
                let offset: i64 = text[i..].parse().ok()?;
                (&text[..i], offset)
            }
            None => (text.as_str(), 0),
        };
        let symbol = self.locals[unit].get(name).or_else(|| self.globals.get(name))?;
        Some((symbol.address as i64 + offset) as u32)
    }

    /// Final extent of the named segment, for dumps.
    pub fn segment_extent(&self, name: &str) -> Option<(u32, u32)> {
        let segment = match name {
            ".text" => &self.segments.text,
            ".data" => &self.segments.data,
            ".ktext" => &self.segments.ktext,
            ".kdata" => &self.segments.kdata,
            ".extern" => &self.segments.extern_,
            _ => return None,
        };
        Some((segment.first, segment.cursor))
    }
}

fn statement_text(parsed: &ParsedStatement) -> String {
    let mut text = parsed.mnemonic.text.clone();
    for (i, op) in parsed.operands.iter().enumerate() {
        if i == 0 {
            text.push(' ');
        } else if !matches!(op.kind, TokenKind::LeftParen | TokenKind::RightParen)
            && !text.ends_with('(')
        {
            text.push(',');
        }
        text.push_str(&op.text);
    }
    text
}
