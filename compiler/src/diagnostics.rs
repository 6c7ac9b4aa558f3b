//! The single fatal-error reporting path every phase funnels through.
//!
//! There is no recovery anywhere in this crate: the first `CompileError`
//! returned by the lexer, parser, or code generator aborts the whole
//! pipeline. `Phase` exists only so `--format json` can classify the error
//! the way spec's error taxonomy does; the human-readable message is the
//! same either way.

use std::fmt;

/// Which stage of the pipeline raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Io,
    Lexical,
    Syntax,
    Semantic,
    Runtime,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Io => "io",
            Phase::Lexical => "lexical",
            Phase::Syntax => "syntax",
            Phase::Semantic => "semantic",
            Phase::Runtime => "runtime",
        }
    }
}

/// A single fatal diagnostic. `line` is `None` for phases (I/O, some runtime
/// faults) that have no source position to report.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub phase: Phase,
    pub line: Option<u32>,
    pub message: String,
}

impl CompileError {
    pub fn new(phase: Phase, line: Option<u32>, message: impl Into<String>) -> Self {
        CompileError {
            phase,
            line,
            message: message.into(),
        }
    }

    pub fn lexical(line: u32, message: impl Into<String>) -> Self {
        Self::new(Phase::Lexical, Some(line), message)
    }

    pub fn syntax(line: u32, message: impl Into<String>) -> Self {
        Self::new(Phase::Syntax, Some(line), message)
    }

    pub fn semantic(line: u32, message: impl Into<String>) -> Self {
        Self::new(Phase::Semantic, Some(line), message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(Phase::Io, None, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(Phase::Runtime, None, message)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "Error at line {line}: {}", self.message),
            None => write!(f, "Error: {}", self.message),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<std::io::Error> for CompileError {
    fn from(e: std::io::Error) -> Self {
        CompileError::io(e.to_string())
    }
}

impl From<atomc_runtime::VmError> for CompileError {
    fn from(e: atomc_runtime::VmError) -> Self {
        CompileError::runtime(e.to_string())
    }
}
