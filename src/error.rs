//! Error taxonomy (SPEC_FULL.md §4.6): compile-time and runtime errors get
//! distinct types, both implementing `std::error::Error` via `thiserror`
//! rather than the teacher's hand-rolled `Display` (`reporter.rs`) — the
//! same shape, the idiom the rest of the example pack reaches for.

use thiserror::Error;

/// One reported compile error, formatted as spec.md §7 mandates:
/// `[line L] Error at TOKEN: message`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("[line {line}] Error{at}: {message}")]
pub struct CompileError {
    pub line: u32,
    /// Pre-formatted as `" at 'lexeme'"`, `" at end"`, or `""` for a
    /// scanner-reported error token (whose own message is already final).
    pub at: String,
    pub message: String,
}

impl CompileError {
    pub fn new(line: u32, at: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line,
            at: at.into(),
            message: message.into(),
        }
    }
}

/// A runtime error, carrying the message plus the call-frame trace
/// captured at the moment it was raised (spec.md §4.4 "Error reporting").
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<String>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Renders the message followed by the frame trace, most recent first,
    /// one `[line L] in NAME` entry per frame.
    pub fn render(&self) -> String {
        let mut out = self.message.clone();
        for line in &self.trace {
            out.push('\n');
            out.push_str(line);
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("compile error")]
    Compile(Vec<CompileError>),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
