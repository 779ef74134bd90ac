// Parameterized text macros. A definition stores its body lines verbatim;
// a call substitutes arguments for `%name` parameters, renames `__`
// prefixed labels with a per-invocation counter, and feeds the result back
// through the normal first-pass pipeline. A call stack guards against
// recursive expansion.

use crate::errors::{ErrorList, Location};
use crate::lexer::SourceLine;
use crate::tokens::{Token, TokenKind};
use log::trace;

#[derive(Debug, Clone)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<SourceLine>,
    pub location: Location,
}

pub struct MacroPool {
    macros: Vec<MacroDef>,
    counter: u32,
    call_stack: Vec<String>,
}

impl MacroPool {
    pub fn new() -> Self {
        MacroPool { macros: Vec::new(), counter: 0, call_stack: Vec::new() }
    }

    pub fn define(&mut self, def: MacroDef) {
        trace!("macro {} defined with {} parameters", def.name, def.params.len());
        self.macros.push(def);
    }

    /// Match by name and argument count, later definitions shadowing
    /// earlier ones.
    pub fn lookup(&self, name: &str, argc: usize) -> Option<&MacroDef> {
        self.macros.iter().rev().find(|m| m.name == name && m.params.len() == argc)
    }

    pub fn is_macro_name(&self, name: &str) -> bool {
        self.macros.iter().any(|m| m.name == name)
    }

    pub fn in_expansion_of(&self, name: &str) -> bool {
        self.call_stack.iter().any(|n| n == name)
    }

    pub fn push_call(&mut self, name: &str) {
        self.call_stack.push(name.to_string());
    }

    pub fn pop_call(&mut self) {
        self.call_stack.pop();
    }

    /// Produce the expansion of one call as raw source lines. Each
    /// invocation gets a fresh counter so `__`-prefixed labels stay
    /// unique across expansions.
    pub fn expand(
        &mut self,
        def: &MacroDef,
        arguments: &[Token],
        errors: &mut ErrorList,
    ) -> Vec<String> {
        self.counter += 1;
        let counter = self.counter;
        let mut lines = Vec::with_capacity(def.body.len());
        for line in &def.body {
            let mut out = String::new();
            for token in &line.tokens {
                if token.kind == TokenKind::Comment {
                    continue;
                }
                if !out.is_empty() {
                    out.push(' ');
                }
                match token.kind {
                    TokenKind::MacroParameter => {
                        match def.params.iter().position(|p| p == &token.text) {
                            Some(i) => out.push_str(&render(&arguments[i])),
                            None => {
                                errors.error(
                                    Some(token.location),
                                    format!("undefined macro parameter {}", token.text),
                                );
                            }
                        }
                    }
                    TokenKind::Identifier | TokenKind::Operator if token.text.starts_with("__") => {
                        out.push_str(&format!("{}_M{}", token.text, counter));
                    }
                    _ => out.push_str(&render(token)),
                }
            }
            lines.push(out);
        }
        lines
    }
}

/// Token back to source text; strings get their quotes and escapes back.
fn render(token: &Token) -> String {
    match token.kind {
        TokenKind::Str => {
            let mut out = String::from("\"");
            for c in token.text.chars() {
                match c {
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    '\r' => out.push_str("\\r"),
                    '\\' => out.push_str("\\\\"),
                    '"' => out.push_str("\\\""),
                    '\0' => out.push_str("\\0"),
                    c => out.push(c),
                }
            }
            out.push('"');
            out
        }
        _ => token.text.clone(),
    }
}

/// Split a call's argument tokens, accepting the SPIM-style parenthesized
/// form by stripping one outer pair of parentheses.
pub fn call_arguments(tokens: &[Token]) -> Vec<Token> {
    let mut args: Vec<Token> = tokens
        .iter()
        .filter(|t| !matches!(t.kind, TokenKind::Comment | TokenKind::Delimiter))
        .cloned()
        .collect();
    if args.len() >= 2
        && args.first().map(|t| t.kind) == Some(TokenKind::LeftParen)
        && args.last().map(|t| t.kind) == Some(TokenKind::RightParen)
    {
        args.remove(0);
        args.pop();
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorList, Location};
    use crate::lexer::SourceLine;

    fn line(tokens: Vec<Token>) -> SourceLine {
        SourceLine { file: 0, line: 1, text: String::new(), tokens }
    }

    fn tok(kind: TokenKind, text: &str) -> Token {
        Token::new(kind, text, Location::new(0, 1, 1))
    }

    #[test]
    fn parameters_substituted_and_labels_renamed() {
        let mut pool = MacroPool::new();
        let def = MacroDef {
            name: "inc".into(),
            params: vec!["%r".into()],
            body: vec![
                line(vec![tok(TokenKind::Identifier, "__top"), tok(TokenKind::Colon, ":")]),
                line(vec![
                    tok(TokenKind::Operator, "addi"),
                    tok(TokenKind::MacroParameter, "%r"),
                    tok(TokenKind::MacroParameter, "%r"),
                    tok(TokenKind::Int5, "1"),
                ]),
            ],
            location: Location::new(0, 1, 1),
        };
        let mut errors = ErrorList::new(false);
        let args = vec![tok(TokenKind::RegisterName, "$t0")];
        let lines = pool.expand(&def, &args, &mut errors);
        assert_eq!(lines[0], "__top_M1 :");
        assert_eq!(lines[1], "addi $t0 $t0 1");
        let again = pool.expand(&def, &args, &mut errors);
        assert_eq!(again[0], "__top_M2 :");
    }

    #[test]
    fn parenthesized_call_arguments() {
        let tokens = vec![
            tok(TokenKind::LeftParen, "("),
            tok(TokenKind::RegisterName, "$t0"),
            tok(TokenKind::RegisterName, "$t1"),
            tok(TokenKind::RightParen, ")"),
        ];
        let args = call_arguments(&tokens);
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].text, "$t0");
    }
}
