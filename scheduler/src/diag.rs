// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by the listing front-end, the
// scheduling passes and the driver.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use chumsky::span::SimpleSpan;

/// Byte-offset span in listing source (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// Span used for diagnostics that have no source location (e.g. kernels
/// built through the library API).
pub fn no_span() -> Span {
    use chumsky::span::Span as _;
    Span::new((), 0..0)
}

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `E0500`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // ── Listing front-end (E01xx) ──
    pub const E0100: DiagCode = DiagCode("E0100"); // syntax error
    pub const E0101: DiagCode = DiagCode("E0101"); // unknown opcode
    pub const E0102: DiagCode = DiagCode("E0102"); // invalid SIMD width
    pub const E0103: DiagCode = DiagCode("E0103"); // operand out of range
    pub const E0104: DiagCode = DiagCode("E0104"); // too many operands

    // ── Scheduling (E05xx) ──
    pub const E0500: DiagCode = DiagCode("E0500"); // dependency cycle (ICE)
    pub const E0501: DiagCode = DiagCode("E0501"); // post-alloc without allocation
    pub const E0502: DiagCode = DiagCode("E0502"); // schedule certificate failed
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by the front-end, a pass or the driver.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code or hint.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
        }
    }

    /// Shorthand for an error with a code and no source location.
    pub fn error(code: DiagCode, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, no_span(), message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// 1-based line and column of byte `offset` in `source`.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let col = before.rfind('\n').map_or(before.len(), |nl| before.len() - nl - 1) + 1;
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_counts_from_one() {
        let src = "kernel k\n  simd 4";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 11), (2, 3));
        assert_eq!(line_col(src, 999), (2, 9));
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, no_span(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_hint() {
        let d = Diagnostic::error(codes::E0501, "no register allocation")
            .with_hint("add an `alloc` line to the kernel");
        assert_eq!(
            format!("{d}"),
            "error[E0501]: no register allocation\n  hint: add an `alloc` line to the kernel"
        );
        assert!(d.is_error());
    }

    #[test]
    fn warning_is_not_error() {
        let d = Diagnostic::new(DiagLevel::Warning, no_span(), "empty kernel");
        assert!(!d.is_error());
        assert_eq!(d.code, None);
    }
}
