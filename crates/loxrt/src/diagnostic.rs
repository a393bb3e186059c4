//! Diagnostic system for compile-time and runtime errors.
//!
//! All errors flow through the unified [`Diagnostic`] type, so the scanner,
//! compiler, and VM report failures the same way regardless of where they
//! originate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Error => write!(f, "Error"),
            DiagnosticLevel::Warning => write!(f, "Warning"),
        }
    }
}

/// Where in the token stream a compile-time diagnostic anchors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticAt {
    /// At a specific lexeme.
    Lexeme(String),
    /// At the end of the token stream.
    End,
    /// The scanner already produced a message; don't repeat "at '...'".
    ScanError,
}

/// A single error or warning, carrying enough context to be rendered either
/// as the book's plain-text line or as JSON for tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub line: u32,
    pub at: DiagnosticAt,
    pub message: String,
}

impl Diagnostic {
    pub fn compile_error(line: u32, at: DiagnosticAt, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            line,
            at,
            message: message.into(),
        }
    }

    pub fn runtime_error(line: u32, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            line,
            at: DiagnosticAt::End,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] {}", self.line, self.level)?;
        match &self.at {
            DiagnosticAt::Lexeme(lexeme) => write!(f, " at '{lexeme}'")?,
            DiagnosticAt::End => write!(f, " at end")?,
            DiagnosticAt::ScanError => {}
        }
        write!(f, ": {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_lexeme_diagnostic() {
        let d = Diagnostic::compile_error(
            3,
            DiagnosticAt::Lexeme("+".to_string()),
            "Expected expression.",
        );
        assert_eq!(d.to_string(), "[line 3] Error at '+': Expected expression.");
    }

    #[test]
    fn formats_end_diagnostic() {
        let d = Diagnostic::compile_error(5, DiagnosticAt::End, "Expect expression.");
        assert_eq!(d.to_string(), "[line 5] Error at end: Expect expression.");
    }

    #[test]
    fn round_trips_through_json() {
        let d = Diagnostic::runtime_error(1, "Division by zero.");
        let json = serde_json::to_string(&d).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
