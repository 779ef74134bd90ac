// Line-oriented tokenizer. One source file in, one token list per line
// out, with `.eqv` substitution applied and `.include` files spliced in
// place. Classification order follows the SPIM-compatible rules: character
// literal, comment, delimiters, macro parameter, register, integer, real,
// instruction mnemonic, directive, string, identifier, error.

use crate::bits;
use crate::directives::Directive;
use crate::errors::{ErrorList, Location};
use crate::instructions::InstructionSet;
use crate::tokens::{fpr_by_name, gpr_by_name, gpr_by_number, Token, TokenKind};
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One tokenized line of a source file, as fed to the assembler.
#[derive(Debug, Clone)]
pub struct SourceLine {
    pub file: usize,
    pub line: usize,
    pub text: String,
    pub tokens: Vec<Token>,
}

impl SourceLine {
    pub fn is_blank(&self) -> bool {
        self.tokens.is_empty()
    }
}

pub struct Lexer<'a> {
    set: &'a InstructionSet,
    eqv: HashMap<String, Vec<Token>>,
    include_stack: Vec<PathBuf>,
}

impl<'a> Lexer<'a> {
    pub fn new(set: &'a InstructionSet) -> Self {
        Lexer { set, eqv: HashMap::new(), include_stack: Vec::new() }
    }

    /// Tokenize a file from disk, splicing `.include`d files in place.
    pub fn tokenize_file(&mut self, path: &Path, errors: &mut ErrorList) -> Vec<SourceLine> {
        let file_id = errors.add_file(&path.to_string_lossy());
        let source = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                errors.error(None, format!("cannot open {}: {}", path.display(), e));
                return Vec::new();
            }
        };
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.include_stack.push(canonical);
        let lines = self.tokenize_source(&source, file_id, path.parent(), errors);
        self.include_stack.pop();
        lines
    }

    /// Tokenize in-memory source. Used directly by macro expansion and the
    /// tests; `.include` is resolved relative to `dir` when given.
    pub fn tokenize_source(
        &mut self,
        source: &str,
        file_id: usize,
        dir: Option<&Path>,
        errors: &mut ErrorList,
    ) -> Vec<SourceLine> {
        let mut out = Vec::new();
        for (index, raw) in source.lines().enumerate() {
            let line_no = index + 1;
            let mut tokens = self.tokenize_line(raw, file_id, line_no, errors);
            self.apply_eqv(&mut tokens);
            if let Some(rest) = self.eqv_definition(&tokens, errors) {
                // Definition lines contribute no statement of their own.
                self.eqv.insert(rest.0, rest.1);
                out.push(SourceLine { file: file_id, line: line_no, text: raw.to_string(), tokens: Vec::new() });
                continue;
            }
            if let Some(path) = include_target(&tokens) {
                let resolved = match dir {
                    Some(d) => d.join(&path),
                    None => PathBuf::from(&path),
                };
                let canonical = resolved.canonicalize().unwrap_or_else(|_| resolved.clone());
                if self.include_stack.contains(&canonical) {
                    errors.error(
                        Some(tokens[0].location),
                        format!("recursive include of {}", resolved.display()),
                    );
                } else {
                    debug!("including {}", resolved.display());
                    out.extend(self.tokenize_file(&resolved, errors));
                }
                continue;
            }
            out.push(SourceLine { file: file_id, line: line_no, text: raw.to_string(), tokens });
        }
        out
    }

    /// Tokenize one synthetic line (macro expansion, pseudo template)
    /// attributed to an existing source position.
    pub fn tokenize_snippet(
        &self,
        text: &str,
        file: usize,
        line: usize,
        errors: &mut ErrorList,
    ) -> Vec<Token> {
        self.tokenize_line(text, file, line, errors)
    }

    fn eqv_definition(&self, tokens: &[Token], errors: &mut ErrorList) -> Option<(String, Vec<Token>)> {
        let first = tokens.first()?;
        if first.kind != TokenKind::Directive || Directive::from_name(&first.text) != Some(Directive::Eqv) {
            return None;
        }
        match tokens.get(1) {
            Some(name) if name.kind == TokenKind::Identifier => {
                let body: Vec<Token> =
                    tokens[2..].iter().filter(|t| t.kind != TokenKind::Comment).cloned().collect();
                Some((name.text.clone(), body))
            }
            _ => {
                errors.error(Some(first.location), ".eqv requires an identifier to define");
                Some((String::new(), Vec::new()))
            }
        }
    }

    fn apply_eqv(&self, tokens: &mut Vec<Token>) {
        if self.eqv.is_empty() {
            return;
        }
        // Skip substitution inside a definition line itself.
        if let Some(first) = tokens.first() {
            if first.kind == TokenKind::Directive && Directive::from_name(&first.text) == Some(Directive::Eqv) {
                return;
            }
        }
        let mut replaced = Vec::with_capacity(tokens.len());
        for token in tokens.drain(..) {
            match self.eqv.get(&token.text) {
                Some(body) if token.kind == TokenKind::Identifier => {
                    for t in body {
                        replaced.push(Token::new(t.kind, t.text.clone(), token.location));
                    }
                }
                _ => replaced.push(token),
            }
        }
        *tokens = replaced;
    }

    fn tokenize_line(
        &self,
        raw: &str,
        file: usize,
        line: usize,
        errors: &mut ErrorList,
    ) -> Vec<Token> {
        let mut tokens: Vec<Token> = Vec::new();
        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let column = i + 1;
            let at = Location::new(file, line, column);
            if c.is_whitespace() {
                i += 1;
                continue;
            }
            match c {
                '#' => {
                    tokens.push(Token::new(TokenKind::Comment, raw[char_offset(raw, i)..].to_string(), at));
                    break;
                }
                '(' => {
                    tokens.push(Token::new(TokenKind::LeftParen, "(", at));
                    i += 1;
                }
                ')' => {
                    tokens.push(Token::new(TokenKind::RightParen, ")", at));
                    i += 1;
                }
                ':' => {
                    tokens.push(Token::new(TokenKind::Colon, ":", at));
                    i += 1;
                }
                ',' => {
                    tokens.push(Token::new(TokenKind::Delimiter, ",", at));
                    i += 1;
                }
                '+' | '-' => {
                    // A sign glues onto a following digit unless the token
                    // before it could end an expression.
                    let glues = i + 1 < chars.len()
                        && chars[i + 1].is_ascii_digit()
                        && !matches!(
                            tokens.last().map(|t| t.kind),
                            Some(TokenKind::Identifier)
                                | Some(TokenKind::Int5)
                                | Some(TokenKind::Int16)
                                | Some(TokenKind::Int16U)
                                | Some(TokenKind::Int32)
                                | Some(TokenKind::Real)
                                | Some(TokenKind::RightParen)
                        );
                    if glues {
                        let (chunk, next) = read_word(&chars, i + 1);
                        let literal: String = std::iter::once(c).chain(chunk.chars()).collect();
                        tokens.push(self.classify(&literal, at, errors));
                        i = next;
                    } else {
                        let kind = if c == '+' { TokenKind::Plus } else { TokenKind::Minus };
                        tokens.push(Token::new(kind, c.to_string(), at));
                        i += 1;
                    }
                }
                '"' => {
                    let (token, next) = read_string(&chars, i, at, errors);
                    tokens.push(token);
                    i = next;
                }
                '\'' => {
                    let (token, next) = read_char_literal(&chars, i, at, errors);
                    tokens.push(token);
                    i = next;
                }
                _ => {
                    let (chunk, next) = read_word(&chars, i);
                    if chunk.is_empty() {
                        errors.error(Some(at), format!("unexpected character '{}'", c));
                        tokens.push(Token::new(TokenKind::Error, c.to_string(), at));
                        i += 1;
                    } else {
                        tokens.push(self.classify(&chunk, at, errors));
                        i = next;
                    }
                }
            }
        }
        tokens
    }

    /// Word classification, tried in fixed order, first match wins.
    fn classify(&self, chunk: &str, at: Location, errors: &mut ErrorList) -> Token {
        if chunk.starts_with('%') && chunk.len() > 1 && is_identifier(&chunk[1..]) {
            return Token::new(TokenKind::MacroParameter, chunk, at);
        }
        if gpr_by_name(chunk).is_some() {
            return Token::new(TokenKind::RegisterName, chunk, at);
        }
        if gpr_by_number(chunk).is_some() {
            return Token::new(TokenKind::RegisterNumber, chunk, at);
        }
        if fpr_by_name(chunk).is_some() {
            return Token::new(TokenKind::FpRegisterName, chunk, at);
        }
        if let Some(value) = bits::parse_int(chunk) {
            return Token::new(TokenKind::for_integer(value), chunk, at);
        }
        if looks_numeric(chunk) {
            if bits::parse_real(chunk).is_some() {
                return Token::new(TokenKind::Real, chunk, at);
            }
            errors.error(Some(at), format!("malformed number \"{}\"", chunk));
            return Token::new(TokenKind::Error, chunk, at);
        }
        if self.set.is_mnemonic(chunk) {
            return Token::new(TokenKind::Operator, chunk, at);
        }
        if chunk.starts_with('.') {
            if Directive::from_name(chunk).is_some() {
                return Token::new(TokenKind::Directive, chunk, at);
            }
        }
        if is_identifier(chunk) {
            return Token::new(TokenKind::Identifier, chunk, at);
        }
        errors.error(Some(at), format!("cannot recognize \"{}\"", chunk));
        Token::new(TokenKind::Error, chunk, at)
    }
}

fn char_offset(s: &str, nth: usize) -> usize {
    s.char_indices().nth(nth).map(|(o, _)| o).unwrap_or_else(|| s.len())
}

fn read_word(chars: &[char], start: usize) -> (String, usize) {
    let mut out = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' || c == '%' {
            out.push(c);
            i += 1;
        } else {
            break;
        }
    }
    (out, i)
}

fn read_string(
    chars: &[char],
    start: usize,
    at: Location,
    errors: &mut ErrorList,
) -> (Token, usize) {
    let mut value = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '"' => return (Token::new(TokenKind::Str, value, at), i + 1),
            '\\' => {
                match chars.get(i + 1).copied().and_then(bits::escape_value) {
                    Some(v) => value.push(v as u8 as char),
                    None => {
                        errors.error(
                            Some(at),
                            format!("unrecognized escape \\{}", chars.get(i + 1).copied().unwrap_or(' ')),
                        );
                    }
                }
                i += 2;
            }
            c => {
                value.push(c);
                i += 1;
            }
        }
    }
    errors.error(Some(at), "unterminated string literal");
    (Token::new(TokenKind::Error, value, at), chars.len())
}

fn read_char_literal(
    chars: &[char],
    start: usize,
    at: Location,
    errors: &mut ErrorList,
) -> (Token, usize) {
    // Find the closing quote, honoring an escaped one.
    let mut end = start + 1;
    if chars.get(end) == Some(&'\\') {
        end += 1;
    }
    end += 1;
    let literal: String = chars.get(start..=end.min(chars.len() - 1)).unwrap_or(&[]).iter().collect();
    if chars.get(end) == Some(&'\'') {
        if let Some(value) = bits::char_literal_value(&literal) {
            let text = value.to_string();
            return (Token::new(TokenKind::for_integer(value), text, at), end + 1);
        }
    }
    errors.error(Some(at), format!("malformed character literal {}", literal));
    (Token::new(TokenKind::Error, literal, at), end + 1)
}

fn is_identifier(chunk: &str) -> bool {
    let mut chars = chunk.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '.' || c == '$' => {}
        _ => return false,
    }
    chunk.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '$')
}

fn looks_numeric(chunk: &str) -> bool {
    let body = chunk.strip_prefix('-').or_else(|| chunk.strip_prefix('+')).unwrap_or(chunk);
    body.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false)
}

fn include_target(tokens: &[Token]) -> Option<String> {
    let first = tokens.first()?;
    if first.kind == TokenKind::Directive && Directive::from_name(&first.text) == Some(Directive::Include) {
        match tokens.get(1) {
            Some(t) if t.kind == TokenKind::Str => return Some(t.text.clone()),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::InstructionSet;

    fn lex(line: &str) -> Vec<Token> {
        let set = InstructionSet::new();
        let mut errors = ErrorList::new(false);
        let file = errors.add_file("test.asm");
        let mut lexer = Lexer::new(&set);
        let mut lines = lexer.tokenize_source(line, file, None, &mut errors);
        lines.remove(0).tokens
    }

    #[test]
    fn classifies_statement() {
        let tokens = lex("loop: addi $t0, $t0, -1  # countdown");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Identifier,
                TokenKind::Colon,
                TokenKind::Operator,
                TokenKind::RegisterName,
                TokenKind::Delimiter,
                TokenKind::RegisterName,
                TokenKind::Delimiter,
                TokenKind::Int16,
                TokenKind::Comment,
            ]
        );
    }

    #[test]
    fn hex_not_sign_extended() {
        let tokens = lex("li $t0, 0xffff");
        assert_eq!(tokens[3].kind, TokenKind::Int16U);
        assert_eq!(tokens[3].int_value(), Some(65535));
    }

    #[test]
    fn char_literal_becomes_integer() {
        let tokens = lex(".byte 'A'");
        assert_eq!(tokens[1].kind, TokenKind::Int16);
        assert_eq!(tokens[1].int_value(), Some(65));
    }

    #[test]
    fn displacement_with_sign() {
        let tokens = lex("lw $t0, -4($sp)");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Operator,
                TokenKind::RegisterName,
                TokenKind::Delimiter,
                TokenKind::Int16,
                TokenKind::LeftParen,
                TokenKind::RegisterName,
                TokenKind::RightParen,
            ]
        );
        assert_eq!(tokens[3].int_value(), Some(-4));
    }

    #[test]
    fn eqv_substitution() {
        let set = InstructionSet::new();
        let mut errors = ErrorList::new(false);
        let file = errors.add_file("test.asm");
        let mut lexer = Lexer::new(&set);
        let lines = lexer.tokenize_source(".eqv LIMIT 32\nli $t0, LIMIT\n", file, None, &mut errors);
        let kinds: Vec<TokenKind> = lines[1].tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Operator, TokenKind::RegisterName, TokenKind::Delimiter, TokenKind::Int16]
        );
        assert_eq!(lines[1].tokens[3].int_value(), Some(32));
    }

    #[test]
    fn label_sharing_mnemonic_name() {
        let tokens = lex("b: nop");
        assert_eq!(tokens[0].kind, TokenKind::Operator);
        assert_eq!(tokens[1].kind, TokenKind::Colon);
    }
}
