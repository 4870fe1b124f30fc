//! Diagnostic reporting infrastructure.
//!
//! This module provides error reporting with source locations,
//! suggestions, and pretty-printed output.
//!
//! # Error Codes
//!
//! Effect-generic diagnostics live in the effect range of the compiler's
//! error codes:
//!
//! - **E0401-E0402**: Registry errors (duplicate or unknown modifiers)
//! - **E0403-E0404**: Classification errors (conflicts, illegal narrowing)
//! - **E0405-E0407**: Call checking, inference and exclusion errors
//! - **E0408-E0413**: Inheritance cycles, effect variables, metadata, manifests

use crate::span::Span;
use ariadne::{Color, Config, Label, Report, ReportKind, Source};

/// Compiler error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    /// A modifier name registered twice.
    DuplicateModifier = 401,
    /// A modifier name that is not in the registry.
    UnknownModifier = 402,
    /// Two different effect states declared for one modifier.
    ConflictingClassification = 403,
    /// Inherited effect state widened or contradicted.
    IllegalNarrowing = 404,
    /// Caller and callee effect states are incompatible.
    RejectedCall = 405,
    /// The effect variant of a call site cannot be inferred.
    AmbiguousInference = 406,
    /// Two mutually exclusive modifiers requested for one effect variable.
    ExclusionViolation = 407,
    /// Traits inherit from themselves.
    InheritanceCycle = 408,
    /// Malformed effect variable declaration.
    InvalidEffectVar = 409,
    /// A call names a declaration that does not exist.
    UnknownDeclaration = 410,
    /// A new revision changes an effect state incompatibly.
    IncompatibleRevision = 411,
    /// Artifact metadata could not be decoded.
    InvalidMetadata = 412,
    /// A registry manifest is malformed.
    InvalidManifest = 413,
}

impl ErrorCode {
    /// Get the formatted error code string (e.g., "E0405").
    pub fn as_str(&self) -> String {
        format!("E{:04}", *self as u16)
    }

    /// Get a human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::DuplicateModifier => "modifier is already registered",
            ErrorCode::UnknownModifier => "unknown modifier",
            ErrorCode::ConflictingClassification => "conflicting effect classification",
            ErrorCode::IllegalNarrowing => "effect state violates inheritance",
            ErrorCode::RejectedCall => "incompatible effect states at call",
            ErrorCode::AmbiguousInference => "cannot infer effect variant of call",
            ErrorCode::ExclusionViolation => "mutually exclusive modifiers requested together",
            ErrorCode::InheritanceCycle => "cyclic trait inheritance",
            ErrorCode::InvalidEffectVar => "invalid effect variable",
            ErrorCode::UnknownDeclaration => "unknown declaration",
            ErrorCode::IncompatibleRevision => "incompatible change to a published effect state",
            ErrorCode::InvalidMetadata => "invalid effect metadata",
            ErrorCode::InvalidManifest => "invalid registry manifest",
        }
    }

    /// Get a help message suggesting how to fix the error.
    pub fn help(&self) -> Option<&'static str> {
        match self {
            ErrorCode::DuplicateModifier => Some("modifier names must be unique within a registry"),
            ErrorCode::UnknownModifier => Some("register the modifier before classifying declarations"),
            ErrorCode::AmbiguousInference => {
                Some("specify the effect argument explicitly at the call site")
            }
            ErrorCode::IncompatibleRevision => {
                Some("introduce a declaration under a new name instead of changing this one")
            }
            _ => None,
        }
    }
}

/// The kind of diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// An error that prevents compilation.
    Error,
    /// A warning that doesn't prevent compilation.
    Warning,
    /// An informational note.
    Note,
    /// A hint for fixing the issue.
    Help,
}

impl DiagnosticKind {
    fn to_report_kind(self) -> ReportKind<'static> {
        match self {
            DiagnosticKind::Error => ReportKind::Error,
            DiagnosticKind::Warning => ReportKind::Warning,
            DiagnosticKind::Note => ReportKind::Advice,
            DiagnosticKind::Help => ReportKind::Advice,
        }
    }

    fn color(self) -> Color {
        match self {
            DiagnosticKind::Error => Color::Red,
            DiagnosticKind::Warning => Color::Yellow,
            DiagnosticKind::Note => Color::Cyan,
            DiagnosticKind::Help => Color::Green,
        }
    }
}

/// A compiler diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// The kind of diagnostic.
    pub kind: DiagnosticKind,
    /// The error code (e.g., "E0405").
    pub code: Option<String>,
    /// The main error message.
    pub message: String,
    /// The primary span where the error occurred.
    pub span: Span,
    /// Additional labels pointing to relevant code.
    pub labels: Vec<DiagnosticLabel>,
    /// Suggestions for fixing the error.
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            code: None,
            message: message.into(),
            span,
            labels: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Set the error code from a string.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the error code from an ErrorCode enum.
    /// Automatically adds the help message if available.
    pub fn with_error_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code.as_str());
        if let Some(help) = code.help() {
            self.suggestions.push(help.to_string());
        }
        self
    }

    /// Create an error diagnostic from an ErrorCode with automatic message and help.
    pub fn from_error_code(code: ErrorCode, span: Span) -> Self {
        Self::error(code.description(), span).with_error_code(code)
    }

    /// Add a note to help explain the error.
    pub fn with_note(mut self, span: Span, message: impl Into<String>) -> Self {
        self.labels.push(DiagnosticLabel::secondary(span, message));
        self
    }

    /// Add a label.
    pub fn with_label(mut self, label: DiagnosticLabel) -> Self {
        self.labels.push(label);
        self
    }

    /// Add a suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// A secondary label in a diagnostic.
#[derive(Debug, Clone)]
pub struct DiagnosticLabel {
    /// The span this label points to.
    pub span: Span,
    /// The label message.
    pub message: String,
    /// Whether this is the primary label.
    pub primary: bool,
}

impl DiagnosticLabel {
    pub fn primary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            primary: true,
        }
    }

    pub fn secondary(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            primary: false,
        }
    }
}

/// Diagnostic emitter that renders diagnostics against one source file.
pub struct DiagnosticEmitter<'a> {
    filename: &'a str,
    source: &'a str,
    color: bool,
}

impl<'a> DiagnosticEmitter<'a> {
    pub fn new(filename: &'a str, source: &'a str) -> Self {
        Self {
            filename,
            source,
            color: true,
        }
    }

    /// Disable ANSI colors (for logs and snapshot tests).
    pub fn without_color(mut self) -> Self {
        self.color = false;
        self
    }

    fn build(&self, diagnostic: &Diagnostic) -> Report<'a, (&'a str, std::ops::Range<usize>)> {
        let mut builder = Report::build(
            diagnostic.kind.to_report_kind(),
            self.filename,
            diagnostic.span.start,
        )
        .with_config(Config::default().with_color(self.color));

        let message = if let Some(code) = &diagnostic.code {
            format!("[{}] {}", code, diagnostic.message)
        } else {
            diagnostic.message.clone()
        };
        builder = builder.with_message(&message);

        builder = builder.with_label(
            Label::new((self.filename, diagnostic.span.start..diagnostic.span.end))
                .with_color(diagnostic.kind.color())
                .with_message(&diagnostic.message),
        );

        for label in &diagnostic.labels {
            let color = if label.primary {
                diagnostic.kind.color()
            } else {
                Color::Blue
            };
            builder = builder.with_label(
                Label::new((self.filename, label.span.start..label.span.end))
                    .with_color(color)
                    .with_message(&label.message),
            );
        }

        if !diagnostic.suggestions.is_empty() {
            builder = builder.with_help(diagnostic.suggestions.join("\n"));
        }

        builder.finish()
    }

    /// Emit a diagnostic to stderr.
    pub fn emit(&self, diagnostic: &Diagnostic) -> std::io::Result<()> {
        self.build(diagnostic)
            .eprint((self.filename, Source::from(self.source)))
    }

    /// Render a diagnostic to a string.
    pub fn render(&self, diagnostic: &Diagnostic) -> std::io::Result<String> {
        let mut out = Vec::new();
        self.build(diagnostic)
            .write((self.filename, Source::from(self.source)), &mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::DuplicateModifier.as_str(), "E0401");
        assert_eq!(ErrorCode::RejectedCall.as_str(), "E0405");
        assert_eq!(ErrorCode::InvalidMetadata.as_str(), "E0412");
    }

    #[test]
    fn test_from_error_code_adds_help() {
        let diag = Diagnostic::from_error_code(ErrorCode::AmbiguousInference, Span::dummy());
        assert_eq!(diag.code.as_deref(), Some("E0406"));
        assert_eq!(diag.suggestions.len(), 1);
    }

    #[test]
    fn test_render_without_color() {
        let source = "fn sync_caller() { fetch().await }";
        let diag = Diagnostic::error("call rejected", Span::new(19, 32, 1, 20))
            .with_code("E0405")
            .with_suggestion("mark `sync_caller` as always `async`");
        let rendered = DiagnosticEmitter::new("lib.src", source)
            .without_color()
            .render(&diag)
            .expect("render");
        assert!(rendered.contains("[E0405] call rejected"));
        assert!(rendered.contains("mark `sync_caller` as always `async`"));
    }
}
