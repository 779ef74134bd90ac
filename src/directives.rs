// Assembler directives and their first-pass effects. The enum is the
// recognizer used by the tokenizer; the processing lives in an Assembler
// impl block because every effect mutates assembly state (segments,
// symbols, forward references) or emits into machine memory.

use crate::assembler::Assembler;
use crate::macros::MacroDef;
use crate::memory::align_to_next;
use crate::tokens::{Token, TokenKind};
use crate::Machine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Data,
    Text,
    KData,
    KText,
    Word,
    Half,
    Byte,
    Float,
    Double,
    Ascii,
    Asciiz,
    Align,
    Space,
    Globl,
    Extern,
    Macro,
    EndMacro,
    Include,
    Eqv,
    Set,
}

impl Directive {
    pub fn from_name(name: &str) -> Option<Directive> {
        match name.to_ascii_lowercase().as_str() {
            ".data" => Some(Directive::Data),
            ".text" => Some(Directive::Text),
            ".kdata" => Some(Directive::KData),
            ".ktext" => Some(Directive::KText),
            ".word" => Some(Directive::Word),
            ".half" => Some(Directive::Half),
            ".byte" => Some(Directive::Byte),
            ".float" => Some(Directive::Float),
            ".double" => Some(Directive::Double),
            ".ascii" => Some(Directive::Ascii),
            ".asciiz" => Some(Directive::Asciiz),
            ".align" => Some(Directive::Align),
            ".space" => Some(Directive::Space),
            ".globl" | ".global" => Some(Directive::Globl),
            ".extern" => Some(Directive::Extern),
            ".macro" => Some(Directive::Macro),
            ".end_macro" => Some(Directive::EndMacro),
            ".include" => Some(Directive::Include),
            ".eqv" => Some(Directive::Eqv),
            ".set" => Some(Directive::Set),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Directive::Data => ".data",
            Directive::Text => ".text",
            Directive::KData => ".kdata",
            Directive::KText => ".ktext",
            Directive::Word => ".word",
            Directive::Half => ".half",
            Directive::Byte => ".byte",
            Directive::Float => ".float",
            Directive::Double => ".double",
            Directive::Ascii => ".ascii",
            Directive::Asciiz => ".asciiz",
            Directive::Align => ".align",
            Directive::Space => ".space",
            Directive::Globl => ".globl",
            Directive::Extern => ".extern",
            Directive::Macro => ".macro",
            Directive::EndMacro => ".end_macro",
            Directive::Include => ".include",
            Directive::Eqv => ".eqv",
            Directive::Set => ".set",
        }
    }

    /// Emission width in bytes, for the data-emitting directives.
    fn width(self) -> u32 {
        match self {
            Directive::Byte => 1,
            Directive::Half => 2,
            Directive::Word | Directive::Float => 4,
            Directive::Double => 8,
            _ => 0,
        }
    }
}

impl<'a> Assembler<'a> {
    pub(crate) fn execute_directive(
        &mut self,
        machine: &mut Machine,
        directive: Directive,
        rest: &[Token],
    ) {
        let token = rest[0].clone();
        match directive {
            Directive::Data | Directive::KData => {
                let address = rest.get(1).and_then(|t| t.int_value()).map(|v| v as u32);
                self.segments.select_data(directive == Directive::KData, address);
            }
            Directive::Text | Directive::KText => {
                let address = rest.get(1).and_then(|t| t.int_value()).map(|v| v as u32);
                self.segments.select_text(directive == Directive::KText, address);
            }
            Directive::Word | Directive::Half | Directive::Byte => {
                self.emit_integers(machine, directive, rest);
            }
            Directive::Float | Directive::Double => {
                self.emit_reals(machine, directive, rest);
            }
            Directive::Ascii | Directive::Asciiz => {
                self.emit_strings(machine, directive, rest);
            }
            Directive::Align => self.do_align(rest),
            Directive::Space => self.do_space(rest),
            Directive::Globl => {
                for name in &rest[1..] {
                    match name.kind {
                        TokenKind::Identifier | TokenKind::Operator => {
                            self.globl_names.push(name.clone());
                        }
                        _ => self.report(name, format!("{} is not a label name", name.text)),
                    }
                }
            }
            Directive::Extern => self.do_extern(rest),
            Directive::Macro => self.begin_macro(rest),
            Directive::EndMacro => {
                self.report(&token, ".end_macro without a matching .macro".to_string());
            }
            Directive::Include => {
                // Well-formed includes are spliced during tokenization.
                self.report(&token, ".include requires a quoted file name".to_string());
            }
            Directive::Eqv => {}
            Directive::Set => {
                self.warn(&token, ".set is recognized but has no effect here".to_string());
            }
        }
    }

    /// Align the data cursor, dragging along any label just defined at
    /// the pre-alignment address.
    fn align_data_cursor(&mut self, bytes: u32) {
        if !self.auto_align {
            return;
        }
        let unit = self.current_unit;
        let segment = self.segments.active_data();
        let old = segment.cursor;
        let new = align_to_next(old, bytes);
        if new != old {
            segment.cursor = new;
            self.locals[unit].realign(old, new);
        }
    }

    fn require_data_segment(&mut self, token: &Token, directive: Directive) -> bool {
        if !self.segments.in_data {
            self.report(
                token,
                format!("{} must appear in a data segment", directive.name()),
            );
            return false;
        }
        true
    }

    /// Operand walk shared by the value-emitting directives: yields each
    /// value token with its replication count (the `v : n` form).
    fn replicated<'t>(operands: &'t [Token]) -> Vec<(&'t Token, u32, Option<&'t Token>)> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < operands.len() {
            let value = &operands[i];
            if operands.get(i + 1).map(|t| t.kind) == Some(TokenKind::Colon)
                && operands.get(i + 2).map(|t| t.kind.is_integer()).unwrap_or(false)
            {
                out.push((value, 0, Some(&operands[i + 2])));
                i += 3;
            } else {
                out.push((value, 1, None));
                i += 1;
            }
        }
        out
    }

    fn emit_integers(&mut self, machine: &mut Machine, directive: Directive, rest: &[Token]) {
        if !self.require_data_segment(&rest[0], directive) {
            return;
        }
        let width = directive.width();
        for (token, count, count_token) in Self::replicated(&rest[1..]) {
            let count = match count_token {
                Some(t) => t.int_value().unwrap_or(0).max(0) as u32,
                None => count,
            };
            match token.kind {
                k if k.is_integer() => {
                    let value = token.int_value().unwrap();
                    self.check_range(token, directive, value);
                    for _ in 0..count {
                        self.emit_scalar(machine, token, width, value as i64);
                    }
                }
                TokenKind::Identifier | TokenKind::Operator => {
                    // Label operand: emit zero now, patch at end of pass.
                    for _ in 0..count {
                        if let Some(address) = self.emit_scalar(machine, token, width, 0) {
                            self.forward_refs.add(address, width, token.clone());
                        }
                    }
                }
                _ => {
                    self.report(
                        token,
                        format!("{} cannot store \"{}\"", directive.name(), token.text),
                    );
                }
            }
        }
    }

    fn emit_reals(&mut self, machine: &mut Machine, directive: Directive, rest: &[Token]) {
        if !self.require_data_segment(&rest[0], directive) {
            return;
        }
        let width = directive.width();
        for (token, count, count_token) in Self::replicated(&rest[1..]) {
            let count = match count_token {
                Some(t) => t.int_value().unwrap_or(0).max(0) as u32,
                None => count,
            };
            let value = match token.real_value() {
                Some(v) => v,
                None => {
                    self.report(
                        token,
                        format!("{} requires a numeric operand, got \"{}\"", directive.name(), token.text),
                    );
                    continue;
                }
            };
            let bits: i64 = if directive == Directive::Float {
                (value as f32).to_bits() as i64
            } else {
                value.to_bits() as i64
            };
            for _ in 0..count {
                self.emit_scalar(machine, token, width, bits);
            }
        }
    }

    /// Write one value of `width` bytes at the (aligned) data cursor.
    /// Returns the address written, or None when out of segment bounds.
    fn emit_scalar(
        &mut self,
        machine: &mut Machine,
        token: &Token,
        width: u32,
        value: i64,
    ) -> Option<u32> {
        self.align_data_cursor(width.min(8));
        let segment = self.segments.active_data();
        let address = segment.cursor;
        if !segment.fits(address, width) {
            let name = segment.name;
            self.report(token, format!("storage exceeds the {} segment", name));
            return None;
        }
        segment.cursor += width;
        let result = match width {
            1 => machine.memory.store_byte(address, value as i32, false).map(|_| ()),
            2 => machine.memory.store_halfword(address, value as i32, false).map(|_| ()),
            4 => machine.memory.store_word(address, value as i32, false).map(|_| ()),
            _ => machine.memory.store_doubleword(address, value, false),
        };
        if result.is_err() {
            self.report(token, format!("cannot write at 0x{:08x}", address));
            return None;
        }
        Some(address)
    }

    fn emit_strings(&mut self, machine: &mut Machine, directive: Directive, rest: &[Token]) {
        if !self.require_data_segment(&rest[0], directive) {
            return;
        }
        for token in &rest[1..] {
            if token.kind != TokenKind::Str {
                self.report(
                    token,
                    format!("{} requires string operands", directive.name()),
                );
                continue;
            }
            let mut bytes: Vec<u8> = token.text.bytes().collect();
            if directive == Directive::Asciiz {
                bytes.push(0);
            }
            for byte in bytes {
                self.emit_scalar(machine, token, 1, byte as i64);
            }
        }
    }

    fn do_align(&mut self, rest: &[Token]) {
        let token = &rest[0];
        if !self.segments.in_data {
            self.report(token, ".align must appear in a data segment".to_string());
            return;
        }
        let k = match rest.get(1).and_then(|t| t.int_value()) {
            Some(k) if (0..=31).contains(&k) => k as u32,
            _ => {
                let t = rest.get(1).unwrap_or(token).clone();
                self.report(&t, ".align requires an exponent between 0 and 31".to_string());
                return;
            }
        };
        if k == 0 {
            // Suppress automatic alignment until the next .align.
            self.auto_align = false;
            return;
        }
        self.auto_align = true;
        let unit = self.current_unit;
        let segment = self.segments.active_data();
        let old = segment.cursor;
        let new = align_to_next(old, 1 << k);
        if new != old {
            segment.cursor = new;
            self.locals[unit].realign(old, new);
        }
    }

    fn do_space(&mut self, rest: &[Token]) {
        let token = &rest[0];
        if !self.segments.in_data {
            self.report(token, ".space must appear in a data segment".to_string());
            return;
        }
        let bytes = match rest.get(1).and_then(|t| t.int_value()) {
            Some(n) if n >= 0 => n as u32,
            _ => {
                self.report(token, ".space requires a non-negative byte count".to_string());
                return;
            }
        };
        let segment = self.segments.active_data();
        if !segment.fits(segment.cursor, bytes.max(1)) {
            let name = segment.name;
            self.report(token, format!(".space exceeds the {} segment", name));
            return;
        }
        segment.cursor += bytes;
    }

    fn do_extern(&mut self, rest: &[Token]) {
        let token = &rest[0];
        let name = match rest.get(1) {
            Some(t) if matches!(t.kind, TokenKind::Identifier | TokenKind::Operator) => t.clone(),
            _ => {
                self.report(token, ".extern requires a symbol name and a size".to_string());
                return;
            }
        };
        let size = match rest.get(2).and_then(|t| t.int_value()) {
            Some(n) if n > 0 => n as u32,
            _ => {
                self.report(token, ".extern requires a positive byte size".to_string());
                return;
            }
        };
        // Already defined globally: silently keep the first definition.
        if self.globals.get(&name.text).is_some() {
            return;
        }
        let segment = &mut self.segments.extern_;
        if !segment.fits(segment.cursor, size) {
            self.report(&name, "no room left in the .extern segment".to_string());
            return;
        }
        let address = segment.cursor;
        segment.cursor += size;
        let _ = self.globals.define(&name.text, address, true, name.location);
    }

    fn begin_macro(&mut self, rest: &[Token]) {
        let token = &rest[0];
        let name = match rest.get(1) {
            Some(t) if matches!(t.kind, TokenKind::Identifier | TokenKind::Operator) => t.text.clone(),
            _ => {
                self.report(token, ".macro requires a macro name".to_string());
                return;
            }
        };
        let mut params = Vec::new();
        for t in &rest[2..] {
            match t.kind {
                TokenKind::MacroParameter => params.push(t.text.clone()),
                TokenKind::LeftParen | TokenKind::RightParen => {}
                _ => {
                    self.report(t, format!("\"{}\" is not a macro parameter (use %name)", t.text));
                }
            }
        }
        self.current_macro = Some(MacroDef {
            name,
            params,
            body: Vec::new(),
            location: token.location,
        });
    }

    fn check_range(&mut self, token: &Token, directive: Directive, value: i32) {
        let out_of_range = match directive {
            Directive::Half => !(-32768..=65535).contains(&value),
            Directive::Byte => !(-128..=255).contains(&value),
            _ => false,
        };
        if out_of_range {
            self.warn(
                token,
                format!("value {} truncated to {} bits", value, directive.width() * 8),
            );
        }
    }

    pub(crate) fn warn(&mut self, token: &Token, message: String) {
        self.errors.warning(Some(token.location), message);
    }
}
