// Diagnostics for the assembler and the runtime. The assembler accumulates
// errors and warnings into an ErrorList instead of bailing on the first
// problem; the simulator reports faults through SimException so they can be
// routed through the exception vector.

use std::fmt;
use thiserror::Error;

pub const DEFAULT_ERROR_LIMIT: usize = 200;

/// Position of a token or diagnostic in the original source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub file: usize,
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(file: usize, line: usize, column: usize) -> Self {
        Location { file, line, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: Option<Location>,
    pub message: String,
}

/// Ordered collection of diagnostics for one assembly run. Also owns the
/// mapping from file ids to file names, so every Location can be printed.
#[derive(Debug)]
pub struct ErrorList {
    files: Vec<String>,
    diagnostics: Vec<Diagnostic>,
    limit: usize,
    pub warnings_are_errors: bool,
}

impl ErrorList {
    pub fn new(warnings_are_errors: bool) -> Self {
        ErrorList {
            files: Vec::new(),
            diagnostics: Vec::new(),
            limit: DEFAULT_ERROR_LIMIT,
            warnings_are_errors,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn add_file(&mut self, name: &str) -> usize {
        self.files.push(name.to_string());
        self.files.len() - 1
    }

    pub fn file_name(&self, id: usize) -> &str {
        self.files.get(id).map(|s| s.as_str()).unwrap_or("<unknown>")
    }

    pub fn error(&mut self, location: Option<Location>, message: impl Into<String>) {
        self.push(Severity::Error, location, message.into());
    }

    pub fn warning(&mut self, location: Option<Location>, message: impl Into<String>) {
        self.push(Severity::Warning, location, message.into());
    }

    fn push(&mut self, severity: Severity, location: Option<Location>, message: String) {
        if self.diagnostics.len() < self.limit {
            self.diagnostics.push(Diagnostic { severity, location, message });
        }
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error || self.warnings_are_errors)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics.len() - self.diagnostics.iter().filter(|d| d.severity == Severity::Error).count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn over_limit(&self) -> bool {
        self.diagnostics.len() >= self.limit
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Multi-line report in "file line column: message" form.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for d in &self.diagnostics {
            let tag = match d.severity {
                Severity::Error => "error",
                Severity::Warning if self.warnings_are_errors => "error (promoted warning)",
                Severity::Warning => "warning",
            };
            match d.location {
                Some(loc) => out.push_str(&format!(
                    "{}: {} line {} column {}: {}\n",
                    tag,
                    self.file_name(loc.file),
                    loc.line,
                    loc.column,
                    d.message
                )),
                None => out.push_str(&format!("{}: {}\n", tag, d.message)),
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Fetch,
    Store,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Fetch => write!(f, "fetch/load"),
            AccessKind::Store => write!(f, "store"),
        }
    }
}

/// Raised by the memory model for unmapped, misaligned or rejected accesses.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid {kind} at address 0x{address:08x}")]
pub struct AddressError {
    pub kind: AccessKind,
    pub address: u32,
}

/// MIPS exception cause codes, as written into Coprocessor 0 Cause bits 2..6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCause {
    AddressFetch = 4,
    AddressStore = 5,
    Syscall = 8,
    Breakpoint = 9,
    ReservedInstruction = 10,
    ArithmeticOverflow = 12,
    Trap = 13,
}

impl fmt::Display for ExceptionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionCause::AddressFetch => "address error (fetch/load)",
            ExceptionCause::AddressStore => "address error (store)",
            ExceptionCause::Syscall => "syscall exception",
            ExceptionCause::Breakpoint => "breakpoint",
            ExceptionCause::ReservedInstruction => "reserved instruction",
            ExceptionCause::ArithmeticOverflow => "arithmetic overflow",
            ExceptionCause::Trap => "trap",
        };
        write!(f, "{}", name)
    }
}

/// A runtime fault raised while executing one instruction.
#[derive(Debug, Clone, Error)]
pub struct SimException {
    pub cause: ExceptionCause,
    pub bad_address: Option<u32>,
    pub message: String,
}

impl SimException {
    pub fn new(cause: ExceptionCause, message: impl Into<String>) -> Self {
        SimException { cause, bad_address: None, message: message.into() }
    }

    pub fn at_address(cause: ExceptionCause, address: u32) -> Self {
        SimException {
            cause,
            bad_address: Some(address),
            message: format!("{} at 0x{:08x}", cause, address),
        }
    }
}

impl fmt::Display for SimException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<AddressError> for SimException {
    fn from(e: AddressError) -> Self {
        let cause = match e.kind {
            AccessKind::Fetch => ExceptionCause::AddressFetch,
            AccessKind::Store => ExceptionCause::AddressStore,
        };
        SimException::at_address(cause, e.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_counts_warnings() {
        let mut list = ErrorList::new(false);
        let f = list.add_file("a.asm");
        list.warning(Some(Location::new(f, 3, 1)), "odd alignment");
        assert!(!list.has_errors());
        let mut strict = ErrorList::new(true);
        let f = strict.add_file("a.asm");
        strict.warning(Some(Location::new(f, 3, 1)), "odd alignment");
        assert!(strict.has_errors());
    }

    #[test]
    fn limit_truncates() {
        let mut list = ErrorList::new(false).with_limit(2);
        list.error(None, "one");
        list.error(None, "two");
        list.error(None, "three");
        assert_eq!(list.diagnostics().len(), 2);
        assert!(list.over_limit());
    }
}
