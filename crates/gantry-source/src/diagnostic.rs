use std::fmt;
use std::sync::Arc;

use url::Url;

/// Zero-based line and character offset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

/// Where a diagnostic came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticSource {
    Unknown,
    /// The toolchain's package listing.
    List,
    Parse,
    Type,
    /// A module or multi-module manifest.
    Workspace,
    /// Transient I/O trouble reading a file.
    Io,
}

impl fmt::Display for DiagnosticSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticSource::Unknown => "<unknown source>",
            DiagnosticSource::List => "list",
            DiagnosticSource::Parse => "syntax",
            DiagnosticSource::Type => "compiler",
            DiagnosticSource::Workspace => "workspace",
            DiagnosticSource::Io => "io",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub uri: Url,
    pub range: Range,
    pub severity: Severity,
    pub source: DiagnosticSource,
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn error(uri: Url, source: DiagnosticSource, message: impl Into<String>) -> Self {
        Self {
            uri,
            range: Range::default(),
            severity: Severity::Error,
            source,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.uri,
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.message
        )
    }
}

/// A workspace-wide error that prevents the workspace from working correctly.
///
/// While a critical error is present, finer-grained diagnostics may not make
/// sense and should be suppressed by the consumer.
#[derive(Clone, Debug)]
pub struct CriticalError {
    /// The primary error message.
    pub main: Arc<str>,
    /// Supplemental, located diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

impl CriticalError {
    #[must_use]
    pub fn new(main: impl fmt::Display) -> Self {
        Self {
            main: Arc::from(main.to_string()),
            diagnostics: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }
}

impl fmt::Display for CriticalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.main)
    }
}
