// diag.rs — Unified diagnostics model and the reporting collaborator
//
// Provides the shared diagnostic types used by graph construction and the
// rewrite driver. User diagnostics are accumulated through a `Reporter`;
// they never abort by themselves. The caller decides what an error-level
// diagnostic means for the compilation unit.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: reporters accumulate diagnostics, nothing else.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0301`, `W0401`).
///
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

    /// A graph description entry was rejected before construction.
    pub const E0201: DiagCode = DiagCode("E0201");
    /// A native module's prepare hook reported failure.
    pub const E0301: DiagCode = DiagCode("E0301");
    /// An argument's type does not match the declared parameter.
    pub const E0302: DiagCode = DiagCode("E0302");
    /// Argument latencies cannot be aligned to the call's upsample factor.
    pub const E0303: DiagCode = DiagCode("E0303");
    /// The rewrite driver hit its rewrite limit before reaching a fixpoint.
    pub const E0401: DiagCode = DiagCode("E0401");
    /// A rule matched but none of its replacements preserved the anchor's
    /// type and latency.
    pub const W0401: DiagCode = DiagCode("W0401");
    /// The graph failed structural verification.
    pub const E0402: DiagCode = DiagCode("E0402");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Source location ──────────────────────────────────────────────────────

/// Position of a construct in the source program, as reported by the
/// front end. Only carried through for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        SourceLocation {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

// ── Related location ─────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedLocation {
    pub location: SourceLocation,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub location: Option<SourceLocation>,
    pub message: String,
    pub hint: Option<String>,
    pub related: Vec<RelatedLocation>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related locations.
    pub fn new(
        level: DiagLevel,
        location: Option<SourceLocation>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: None,
            level,
            location,
            message: message.into(),
            hint: None,
            related: Vec::new(),
        }
    }

    pub fn error(location: Option<SourceLocation>, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, location, message)
    }

    pub fn warning(location: Option<SourceLocation>, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, location, message)
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

    /// Attach a related location.
    pub fn with_related(mut self, location: SourceLocation, label: impl Into<String>) -> Self {
        self.related.push(RelatedLocation {
            location,
            label: label.into(),
        });
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
        if let Some(location) = &self.location {
            write!(f, "{}: ", location)?;
        }
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

// ── Reporter ─────────────────────────────────────────────────────────────

/// Sink for user diagnostics. Implementations must only accumulate.
pub trait Reporter {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl Reporter for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// Accumulating reporter that keeps an error count.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
    error_count: usize,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

impl Reporter for DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        if diagnostic.is_error() {
            self.error_count += 1;
        }
        self.diagnostics.push(diagnostic);
    }
}

/// Forwards to an inner reporter while counting errors. Used to detect
/// whether an external hook reported failure.
pub(crate) struct CountingReporter<'a> {
    inner: &'a mut dyn Reporter,
    errors: usize,
}

impl<'a> CountingReporter<'a> {
    pub(crate) fn new(inner: &'a mut dyn Reporter) -> Self {
        CountingReporter { inner, errors: 0 }
    }

    pub(crate) fn errors(&self) -> usize {
        self.errors
    }
}

impl Reporter for CountingReporter<'_> {
    fn report(&mut self, diagnostic: Diagnostic) {
        if diagnostic.is_error() {
            self.errors += 1;
        }
        self.inner.report(diagnostic);
    }
}
