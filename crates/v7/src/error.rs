use std::fmt;

use strum::IntoStaticStr;

/// Result type alias for operations that can fail with an engine-level error.
pub type ExecResult<T> = Result<T, ExecError>;

/// Top-level result taxonomy of the engine.
///
/// Every public entry point (`exec`, `compile`, `apply`, the host property
/// API) reports failure through this enum. `ExecException` means a JS value
/// was thrown and nothing caught it; the value itself stays in the engine's
/// thrown slot and can be read with [`crate::Engine::thrown_value`].
#[derive(Debug, Clone, PartialEq, IntoStaticStr)]
pub enum ExecError {
    /// The source text failed to lex, parse, or compile.
    Syntax(SyntaxError),
    /// A JS exception escaped to the top level. The stringified thrown value
    /// is carried for display; the raw value is in the engine's thrown slot.
    Exception(String),
    /// Parser frame stack or VM call stack exceeded its configured limit.
    StackOverflow,
    /// An AST skip offset did not fit the configured skip width.
    AstTooLarge,
    /// A host-facing API was called with an argument of the wrong kind.
    InvalidArg(&'static str),
    /// Internal inconsistency (corrupt bytecode, stale string reference, ...).
    Internal(String),
}

impl ExecError {
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(e) => write!(f, "{e}"),
            Self::Exception(v) => write!(f, "Exec error: {v}"),
            Self::StackOverflow => write!(f, "stack overflow"),
            Self::AstTooLarge => write!(f, "script too large"),
            Self::InvalidArg(what) => write!(f, "invalid argument: {what}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ExecError {}

/// A syntax error with source coordinates and a caret excerpt.
///
/// Line numbers are 1-based; columns are 1-based byte offsets from the start
/// of the offending line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub col: usize,
    /// The offending source line plus a caret line pointing at `col`.
    pub excerpt: String,
}

impl SyntaxError {
    /// Builds a syntax error at byte offset `pos` of `src`, computing the
    /// line, the column, and the caret excerpt by scanning back to the
    /// previous newline.
    pub(crate) fn at(src: &str, pos: usize, message: impl Into<String>) -> Self {
        let pos = pos.min(src.len());
        let line_start = src[..pos].rfind('\n').map_or(0, |i| i + 1);
        let line_end = src[pos..].find('\n').map_or(src.len(), |i| pos + i);
        let line = src[..pos].bytes().filter(|&b| b == b'\n').count() + 1;
        let col = pos - line_start + 1;
        let src_line = &src[line_start..line_end];
        let mut excerpt = String::with_capacity(src_line.len() + col + 2);
        excerpt.push_str(src_line);
        excerpt.push('\n');
        for _ in 1..col {
            excerpt.push(' ');
        }
        excerpt.push('^');
        Self {
            message: message.into(),
            line,
            col,
            excerpt,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "syntax error: {} at line {}, col {}\n{}",
            self.message, self.line, self.col, self.excerpt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_points_at_column() {
        let err = SyntaxError::at("var x =\nfoo @ bar", 12, "unexpected token");
        assert_eq!(err.line, 2);
        assert_eq!(err.col, 5);
        assert_eq!(err.excerpt, "foo @ bar\n    ^");
    }

    #[test]
    fn position_past_end_is_clamped() {
        let err = SyntaxError::at("x", 99, "unexpected end of input");
        assert_eq!(err.line, 1);
        assert_eq!(err.col, 2);
    }
}
