//! Effect-generic errors.
//!
//! Every phase reports problems as [`EffectError`]s. They are compile-time
//! errors: nothing is retried and nothing is defaulted in their place.

use std::fmt;

use super::check::RejectReason;
use super::state::EffectState;
use crate::diagnostics::{Diagnostic, ErrorCode};
use crate::hir::{DefId, OverrideArg};
use crate::span::Span;

/// Result type alias for effect phases that stop at the first error.
pub type EffectResult<T> = Result<T, Box<EffectError>>;

/// An effect error.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectError {
    pub kind: EffectErrorKind,
    pub span: Span,
    /// Optional help message.
    pub help: Option<String>,
    /// Suggested fix, when one mechanical change resolves the error.
    pub fix: Option<Fix>,
    /// Secondary locations, e.g. the declaration a state was inherited from.
    pub notes: Vec<(Span, String)>,
}

impl EffectError {
    pub fn new(kind: EffectErrorKind, span: Span) -> Self {
        Self {
            kind,
            span,
            help: None,
            fix: None,
            notes: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.fix = Some(fix);
        self
    }

    pub fn with_note(mut self, span: Span, message: impl Into<String>) -> Self {
        self.notes.push((span, message.into()));
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.kind.code()
    }

    /// Convert to a diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::error(self.kind.to_string(), self.span)
            .with_code(self.code().as_str());

        for (span, message) in &self.notes {
            diag = diag.with_note(*span, message.clone());
        }
        if let Some(fix) = &self.fix {
            diag = diag.with_suggestion(fix.to_string());
        }
        match &self.help {
            Some(help) => diag = diag.with_suggestion(help.clone()),
            None => {
                if let Some(help) = self.code().help() {
                    diag = diag.with_suggestion(help);
                }
            }
        }
        diag
    }
}

impl fmt::Display for EffectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for EffectError {}

/// The kind of effect error.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectErrorKind {
    DuplicateModifier {
        name: String,
    },
    UnknownModifier {
        name: String,
    },
    /// Two different annotations for one (declaration, modifier) pair.
    ConflictingClassification {
        decl: String,
        modifier: String,
        first: EffectState,
        second: EffectState,
    },
    /// A declaration's state is not permitted by the one it inherits from.
    IllegalNarrowing {
        decl: String,
        parent: String,
        modifier: String,
        parent_state: EffectState,
        state: EffectState,
    },
    /// A call edge is incompatible.
    Rejected {
        modifier: String,
        caller: String,
        callee: String,
        caller_state: EffectState,
        callee_state: EffectState,
        reason: RejectReason,
    },
    /// The variant of a call site cannot be determined.
    Ambiguous {
        modifier: String,
        caller: String,
        callee: String,
        caller_state: EffectState,
        callee_state: EffectState,
    },
    /// Mutually exclusive modifiers active for one effect variable.
    ExclusionViolation {
        decl: String,
        /// `None` when the modifiers are fixed `always` rather than generic.
        var: Option<String>,
        modifiers: Vec<String>,
    },
    InheritanceCycle {
        decl: String,
    },
    InvalidEffectVar {
        decl: String,
        var: String,
        reason: String,
    },
    UnknownDeclaration {
        def_id: DefId,
    },
    /// A published state moved in a breaking direction.
    IncompatibleRevision {
        decl: String,
        modifier: String,
        from: EffectState,
        to: EffectState,
    },
    InvalidMetadata {
        message: String,
    },
    InvalidManifest {
        message: String,
    },
}

impl EffectErrorKind {
    pub fn code(&self) -> ErrorCode {
        match self {
            EffectErrorKind::DuplicateModifier { .. } => ErrorCode::DuplicateModifier,
            EffectErrorKind::UnknownModifier { .. } => ErrorCode::UnknownModifier,
            EffectErrorKind::ConflictingClassification { .. } => {
                ErrorCode::ConflictingClassification
            }
            EffectErrorKind::IllegalNarrowing { .. } => ErrorCode::IllegalNarrowing,
            EffectErrorKind::Rejected { .. } => ErrorCode::RejectedCall,
            EffectErrorKind::Ambiguous { .. } => ErrorCode::AmbiguousInference,
            EffectErrorKind::ExclusionViolation { .. } => ErrorCode::ExclusionViolation,
            EffectErrorKind::InheritanceCycle { .. } => ErrorCode::InheritanceCycle,
            EffectErrorKind::InvalidEffectVar { .. } => ErrorCode::InvalidEffectVar,
            EffectErrorKind::UnknownDeclaration { .. } => ErrorCode::UnknownDeclaration,
            EffectErrorKind::IncompatibleRevision { .. } => ErrorCode::IncompatibleRevision,
            EffectErrorKind::InvalidMetadata { .. } => ErrorCode::InvalidMetadata,
            EffectErrorKind::InvalidManifest { .. } => ErrorCode::InvalidManifest,
        }
    }
}

impl fmt::Display for EffectErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectErrorKind::DuplicateModifier { name } => {
                write!(f, "modifier `{name}` is already registered")
            }
            EffectErrorKind::UnknownModifier { name } => write!(f, "unknown modifier `{name}`"),
            EffectErrorKind::ConflictingClassification {
                decl,
                modifier,
                first,
                second,
            } => write!(
                f,
                "`{decl}` is declared both `{first}` and `{second}` for `{modifier}`"
            ),
            EffectErrorKind::IllegalNarrowing {
                decl,
                parent,
                modifier,
                parent_state,
                state,
            } => write!(
                f,
                "`{decl}` is `{state}` for `{modifier}`, but `{parent}` is `{parent_state}`"
            ),
            EffectErrorKind::Rejected {
                modifier,
                caller,
                callee,
                caller_state,
                callee_state,
                reason,
            } => write!(
                f,
                "`{caller}` ({caller_state} `{modifier}`) cannot call `{callee}` \
                 ({callee_state} `{modifier}`): {reason}"
            ),
            EffectErrorKind::Ambiguous {
                modifier,
                caller,
                callee,
                caller_state,
                callee_state,
            } => write!(
                f,
                "cannot infer whether the call to `{callee}` ({callee_state} `{modifier}`) \
                 in `{caller}` ({caller_state} `{modifier}`) is `{modifier}`"
            ),
            EffectErrorKind::ExclusionViolation {
                decl,
                var,
                modifiers,
            } => {
                write!(
                    f,
                    "`{decl}` activates mutually exclusive modifiers {}",
                    quoted_list(modifiers)
                )?;
                if let Some(var) = var {
                    write!(f, " for effect variable `{var}`")?;
                }
                Ok(())
            }
            EffectErrorKind::InheritanceCycle { decl } => {
                write!(f, "trait `{decl}` inherits from itself")
            }
            EffectErrorKind::InvalidEffectVar { decl, var, reason } => {
                write!(f, "invalid effect variable `{var}` on `{decl}`: {reason}")
            }
            EffectErrorKind::UnknownDeclaration { def_id } => {
                write!(f, "unknown declaration `{def_id}`")
            }
            EffectErrorKind::IncompatibleRevision {
                decl,
                modifier,
                from,
                to,
            } => write!(
                f,
                "`{decl}` changed from `{from}` to `{to}` for `{modifier}`, breaking existing callers"
            ),
            EffectErrorKind::InvalidMetadata { message } => {
                write!(f, "invalid effect metadata: {message}")
            }
            EffectErrorKind::InvalidManifest { message } => {
                write!(f, "invalid registry manifest: {message}")
            }
        }
    }
}

fn quoted_list(items: &[String]) -> String {
    items
        .iter()
        .map(|m| format!("`{m}`"))
        .collect::<Vec<_>>()
        .join(" and ")
}

/// A mechanical change that resolves an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fix {
    /// Annotate `decl` with a narrower state.
    Narrow {
        decl: String,
        modifier: String,
        to: EffectState,
    },
    /// Annotate `decl` with a broader state.
    Widen {
        decl: String,
        modifier: String,
        to: EffectState,
    },
    RemoveForwardingToken {
        modifier: String,
        token: String,
    },
    AddOverride {
        modifier: String,
        arg: OverrideArg,
    },
    RemoveOverride {
        modifier: String,
    },
    RemoveAnnotation {
        decl: String,
        modifier: String,
    },
    /// Publish the changed declaration under a new name.
    Rename {
        decl: String,
    },
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fix::Narrow { decl, modifier, to } => {
                write!(f, "narrow `{decl}` to `{to}` for `{modifier}`")
            }
            Fix::Widen { decl, modifier, to } => {
                write!(f, "mark `{decl}` as `{to}` for `{modifier}`")
            }
            Fix::RemoveForwardingToken { modifier, token } => {
                write!(f, "remove `{token}`: there is no `{modifier}` result to consume")
            }
            Fix::AddOverride { modifier, arg } => {
                write!(f, "spell out the effect argument: `{modifier} = {arg}`")
            }
            Fix::RemoveOverride { modifier } => {
                write!(f, "remove the `{modifier}` effect argument")
            }
            Fix::RemoveAnnotation { decl, modifier } => {
                write!(f, "remove the `{modifier}` annotation from `{decl}`")
            }
            Fix::Rename { decl } => {
                write!(f, "publish the new behavior under a name other than `{decl}`")
            }
        }
    }
}
