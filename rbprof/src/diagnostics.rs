//! Recoverable problems found in the analyzed program.
//!
//! A diagnostic never stops the analysis: the operation that triggered it
//! yields `untyped` and interpretation continues. The collector deduplicates,
//! because the same instruction is usually interpreted many times before the
//! fixpoint is reached.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Method, constant or global not found.
    UndefinedReference,
    /// Argument count or keyword set rejected by every candidate.
    Arity,
    /// Argument types rejected by every declared overload.
    ArgumentType,
    /// Block required but absent, or given where none is accepted.
    BlockContract,
    /// Module inclusion would make the ancestor graph cyclic.
    AncestorCycle,
    /// Assignment to a declared location with an incompatible type.
    TypeInconsistency,
}

/// One diagnostic, attributed to a source line and the call path it was
/// found on (`Foo#bar`, `<main>`, `block in Foo#bar`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Diagnostic {
    pub path: String,
    pub line: u32,
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub context: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            path: String::new(),
            line: 0,
            severity,
            kind,
            message: message.into(),
            context: String::new(),
        }
    }

    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Error, message)
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Warning, message)
    }

    pub fn with_location(mut self, path: impl Into<String>, line: u32) -> Self {
        self.path = path.into();
        self.line = line;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: [{}] {}", self.path, self.line, self.severity, self.message)?;
        if !self.context.is_empty() {
            write!(f, " (in {})", self.context)?;
        }
        Ok(())
    }
}

/// Deduplicating sink for diagnostics, owned by the analyzer.
#[derive(Debug, Default)]
pub struct DiagnosticsCollector {
    diagnostics: Vec<Diagnostic>,
    seen: HashSet<Diagnostic>,
}

impl DiagnosticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `diag` unless an identical one was already recorded.
    /// Returns whether it was new.
    pub fn emit(&mut self, diag: Diagnostic) -> bool {
        if self.seen.contains(&diag) {
            return false;
        }
        tracing::debug!(kind = ?diag.kind, line = diag.line, "{}", diag.message);
        self.seen.insert(diag.clone());
        self.diagnostics.push(diag);
        true
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Diagnostics in emission order, leaving the collector empty.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        self.seen.clear();
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_dedups() {
        let mut collector = DiagnosticsCollector::new();
        let diag = Diagnostic::error(DiagnosticKind::UndefinedReference, "undefined method: Foo#bar")
            .with_location("foo.rb", 3);
        assert!(collector.emit(diag.clone()));
        assert!(!collector.emit(diag));
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn test_display() {
        let diag = Diagnostic::warning(DiagnosticKind::BlockContract, "no block given (yield)")
            .with_location("a.rb", 7)
            .with_context("Foo#each");
        assert_eq!(diag.to_string(), "a.rb:7: [warning] no block given (yield) (in Foo#each)");
    }

    #[test]
    fn test_take_resets() {
        let mut collector = DiagnosticsCollector::new();
        collector.emit(Diagnostic::error(DiagnosticKind::Arity, "x"));
        assert_eq!(collector.take().len(), 1);
        assert!(collector.is_empty());
        assert!(collector.emit(Diagnostic::error(DiagnosticKind::Arity, "x")));
    }
}
