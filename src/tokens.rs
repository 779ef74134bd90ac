// Token kinds and the register name tables. Literal values are kept as the
// original text; the numeric value of an integer token is re-derived from
// that text on demand, which keeps Token a plain (kind, text, location)
// triple.

use crate::bits;
use crate::errors::Location;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Error,
    Comment,
    Directive,
    Operator,
    Delimiter,
    RegisterName,
    RegisterNumber,
    FpRegisterName,
    Identifier,
    LeftParen,
    RightParen,
    Int5,
    Int16,
    Int16U,
    Int32,
    Real,
    Character,
    Str,
    Plus,
    Minus,
    Colon,
    MacroParameter,
}

impl TokenKind {
    pub fn is_integer(self) -> bool {
        matches!(self, TokenKind::Int5 | TokenKind::Int16 | TokenKind::Int16U | TokenKind::Int32)
    }

    /// The narrowest kind whose range contains `value`, per the SPIM rule
    /// that a hex literal already is the 32-bit pattern.
    pub fn for_integer(value: i32) -> TokenKind {
        if bits::fits_5(value) {
            TokenKind::Int5
        } else if bits::fits_signed_16(value) {
            TokenKind::Int16
        } else if bits::fits_unsigned_16(value) {
            TokenKind::Int16U
        } else {
            TokenKind::Int32
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub location: Location,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, location: Location) -> Self {
        Token { kind, text: text.into(), location }
    }

    /// Numeric value for integer-kind tokens.
    pub fn int_value(&self) -> Option<i32> {
        if self.kind.is_integer() {
            bits::parse_int(&self.text)
        } else {
            None
        }
    }

    pub fn real_value(&self) -> Option<f64> {
        match self.kind {
            TokenKind::Real => bits::parse_real(&self.text),
            _ => self.int_value().map(|v| v as f64),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

// Symbolic general-purpose register names, in register order.
pub const GPR_NAMES: [&str; 32] = [
    "$zero", "$at", "$v0", "$v1", "$a0", "$a1", "$a2", "$a3", "$t0", "$t1", "$t2", "$t3", "$t4",
    "$t5", "$t6", "$t7", "$s0", "$s1", "$s2", "$s3", "$s4", "$s5", "$s6", "$s7", "$t8", "$t9",
    "$k0", "$k1", "$gp", "$sp", "$fp", "$ra",
];

/// Register number for a symbolic name such as `$t0`.
pub fn gpr_by_name(name: &str) -> Option<u32> {
    GPR_NAMES.iter().position(|&n| n == name).map(|i| i as u32)
}

/// Register number for the numeric form `$0`..`$31`.
pub fn gpr_by_number(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('$')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u32 = digits.parse().ok()?;
    if n < 32 {
        Some(n)
    } else {
        None
    }
}

/// Register number for a floating-point register `$f0`..`$f31`.
pub fn fpr_by_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("$f")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u32 = digits.parse().ok()?;
    if n < 32 {
        Some(n)
    } else {
        None
    }
}

/// Register number of any GPR token, symbolic or numeric.
pub fn gpr_of_token(token: &Token) -> Option<u32> {
    match token.kind {
        TokenKind::RegisterName => gpr_by_name(&token.text),
        TokenKind::RegisterNumber => gpr_by_number(&token.text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lookup() {
        assert_eq!(gpr_by_name("$t0"), Some(8));
        assert_eq!(gpr_by_name("$ra"), Some(31));
        assert_eq!(gpr_by_number("$31"), Some(31));
        assert_eq!(gpr_by_number("$32"), None);
        assert_eq!(fpr_by_name("$f12"), Some(12));
        assert_eq!(fpr_by_name("$t0"), None);
    }

    #[test]
    fn integer_classification() {
        assert_eq!(TokenKind::for_integer(12), TokenKind::Int5);
        assert_eq!(TokenKind::for_integer(-1), TokenKind::Int16);
        assert_eq!(TokenKind::for_integer(40000), TokenKind::Int16U);
        assert_eq!(TokenKind::for_integer(100000), TokenKind::Int32);
    }
}
