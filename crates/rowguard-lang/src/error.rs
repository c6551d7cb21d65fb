//! Error types for lexing and parsing.

use crate::span::{offset_to_line_col, Span};
use thiserror::Error;

/// Error raised while tokenizing or parsing a query or access rule.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl ParseError {
    /// Create a new parse error.
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            hint: None,
        }
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let mut result = format!("error: {}\n", self.message);
        result.push_str(&format!("  --> line {}:{}\n", line, col));

        if let Some(source_line) = source.lines().nth(line - 1) {
            result.push_str(&format!("   |\n{:3}| {}\n   |", line, source_line));

            for _ in 0..col {
                result.push(' ');
            }
            result.push('^');

            let span_len = self.span.len();
            if span_len > 1 {
                let remaining = source_line.len().saturating_sub(col) + 1;
                for _ in 1..span_len.min(remaining) {
                    result.push('~');
                }
            }
            result.push('\n');
        }

        if let Some(hint) = &self.hint {
            result.push_str(&format!("   = hint: {}\n", hint));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting() {
        let source = "SELECT bean FROM Parent bean WHERE bean.name == 'x'";
        let err = ParseError::new("expected expression, found '='", Span::new(46, 47))
            .with_hint("use '=' for equality comparison");

        let formatted = err.format_with_source(source);
        assert!(formatted.contains("line 1:47"));
        assert!(formatted.contains("expected expression"));
        assert!(formatted.contains("hint: use '=' for equality"));
    }

    #[test]
    fn test_error_display_is_message() {
        let err = ParseError::new("unexpected end of input", Span::at(4));
        assert_eq!(err.to_string(), "unexpected end of input");
    }
}
