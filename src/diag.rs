// ABOUTME: Shared diagnostic representation for all pipeline stages

use serde::Serialize;
use std::fmt;

/// Which stage produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagKind {
    Lex,
    Parse,
    Runtime,
    Type,
}

impl fmt::Display for DiagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagKind::Lex => "Lex",
            DiagKind::Parse => "Parse",
            DiagKind::Runtime => "Runtime",
            DiagKind::Type => "Type",
        };
        f.write_str(name)
    }
}

/// A single positioned diagnostic. Lines and columns are 1-based.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    /// Secondary notes (e.g. a rejection's origin) attached by the host.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<Diagnostic>,
}

impl Diagnostic {
    pub fn lex(message: impl Into<String>, line: usize, column: usize) -> Self {
        Diagnostic {
            kind: DiagKind::Lex,
            message: message.into(),
            line,
            column,
            code: None,
            related: Vec::new(),
        }
    }

    pub fn parse(message: impl Into<String>, line: usize, column: usize) -> Self {
        Diagnostic {
            kind: DiagKind::Parse,
            message: message.into(),
            line,
            column,
            code: None,
            related: Vec::new(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at line {}, column {}: {}",
            self.kind, self.line, self.column, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_format() {
        let d = Diagnostic::parse("unexpected token `)`", 3, 14);
        assert_eq!(
            format!("{}", d),
            "Parse at line 3, column 14: unexpected token `)`"
        );
    }
}
