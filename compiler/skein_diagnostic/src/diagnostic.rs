use std::fmt;

use skein_ir::LineInfo;

/// Severity level for diagnostics.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A non-fatal, location-tagged message.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[must_use = "diagnostics should be pushed into a sink, not silently dropped"]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub line: LineInfo,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>, line: LineInfo) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            line,
        }
    }

    pub fn error(message: impl Into<String>, line: LineInfo) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {} in {}", self.severity, self.message, self.line)
    }
}

/// Ordered collector for the diagnostics a trace produces.
///
/// Every message is also forwarded to `tracing` so hosts that install a
/// subscriber see warnings as they happen.
#[derive(Default, Debug)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning.
    pub fn warn(&mut self, message: impl Into<String>, line: LineInfo) {
        let diagnostic = Diagnostic::warning(message, line);
        tracing::warn!(line = diagnostic.line.line, "{}", diagnostic.message);
        self.diagnostics.push(diagnostic);
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(line = diagnostic.line.line, "{}", diagnostic.message);
        self.diagnostics.push(diagnostic);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// True if any diagnostic message contains `needle`. Test helper.
    pub fn contains(&self, needle: &str) -> bool {
        self.diagnostics.iter().any(|d| d.message.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_preserves_order() {
        let mut sink = DiagnosticSink::new();
        sink.warn("first", LineInfo::new(1));
        sink.warn("second", LineInfo::new(2));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.diagnostics()[0].message, "first");
        assert_eq!(sink.diagnostics()[1].message, "second");
    }

    #[test]
    fn diagnostic_display_includes_location() {
        let d = Diagnostic::warning("unknown attribute", LineInfo::new(7));
        assert_eq!(d.to_string(), "warning : unknown attribute in L.7");
    }

    #[test]
    fn contains_matches_substring() {
        let mut sink = DiagnosticSink::new();
        sink.warn("Unknown function \"foo\" is called", LineInfo::new(3));
        assert!(sink.contains("Unknown function"));
        assert!(!sink.contains("type mismatch"));
    }
}
