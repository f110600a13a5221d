//! Error types and reporting
//!
//! Load-time problems (`StubError`) abort loading of the stub file they occur
//! in. Evaluation-time problems (`EvalError`) are per-call-site findings handed
//! back to the analysis engine.

use crate::ast::Span;
use crate::resource::ResourceHandle;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, StubError>;

/// How an error must be handled by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Defective stub text; the file is skipped
    LoadTime,
    /// Defective stub semantics (arity, unknown kinds); the file is skipped
    Internal,
    /// Unsafe call in the analyzed program
    CallerError,
    /// The contract itself cannot describe this call
    ContractError,
}

/// Error raised while loading a stub file
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StubError {
    #[error("Lexer error at {span}: {message}")]
    Lexer { message: String, span: Span },

    #[error("Parse error at {span}: {message}")]
    Parse { message: String, span: Span },

    #[error("Unresolved reference `{name}` at {span}{hint}")]
    UnresolvedReference { name: String, span: Span, hint: String },

    #[error("Ill-formed contract at {span}: {message}")]
    IllFormedContract { message: String, span: Span },

    #[error("Duplicate definition of `{name}` at {span} (first defined at {previous})")]
    DuplicateDefinition { name: String, span: Span, previous: Span },

    #[error("Recursive predicate at {span}: {}", .cycle.join(" -> "))]
    RecursivePredicate { cycle: Vec<String>, span: Span },

    #[error("Arity mismatch at {span}: `{name}` expects {expected} argument(s), got {got}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
        span: Span,
    },

    #[error("Unknown resource kind `{name}` at {span}{hint}")]
    UnknownResourceKind { name: String, span: Span, hint: String },

    #[error("IO error: {message}")]
    Io { message: String },
}

impl StubError {
    pub fn lexer(message: impl Into<String>, span: Span) -> Self {
        Self::Lexer {
            message: message.into(),
            span,
        }
    }

    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        Self::Parse {
            message: message.into(),
            span,
        }
    }

    pub fn unresolved(name: impl Into<String>, span: Span, suggestion: Option<&str>) -> Self {
        Self::UnresolvedReference {
            name: name.into(),
            span,
            hint: crate::util::format_suggestion_hint(suggestion),
        }
    }

    pub fn ill_formed(message: impl Into<String>, span: Span) -> Self {
        Self::IllFormedContract {
            message: message.into(),
            span,
        }
    }

    pub fn duplicate(name: impl Into<String>, span: Span, previous: Span) -> Self {
        Self::DuplicateDefinition {
            name: name.into(),
            span,
            previous,
        }
    }

    pub fn recursive(cycle: Vec<String>, span: Span) -> Self {
        Self::RecursivePredicate { cycle, span }
    }

    pub fn arity(name: impl Into<String>, expected: usize, got: usize, span: Span) -> Self {
        Self::ArityMismatch {
            name: name.into(),
            expected,
            got,
            span,
        }
    }

    pub fn unknown_kind(name: impl Into<String>, span: Span, suggestion: Option<&str>) -> Self {
        Self::UnknownResourceKind {
            name: name.into(),
            span,
            hint: crate::util::format_suggestion_hint(suggestion),
        }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Lexer { span, .. }
            | Self::Parse { span, .. }
            | Self::UnresolvedReference { span, .. }
            | Self::IllFormedContract { span, .. }
            | Self::DuplicateDefinition { span, .. }
            | Self::RecursivePredicate { span, .. }
            | Self::ArityMismatch { span, .. }
            | Self::UnknownResourceKind { span, .. } => Some(*span),
            Self::Io { .. } => None,
        }
    }

    /// Message without the location prefix, for labels
    pub fn message(&self) -> String {
        match self {
            Self::Lexer { message, .. }
            | Self::Parse { message, .. }
            | Self::IllFormedContract { message, .. }
            | Self::Io { message } => message.clone(),
            Self::UnresolvedReference { name, hint, .. } => {
                format!("unresolved reference `{name}`{hint}")
            }
            Self::DuplicateDefinition { name, .. } => format!("`{name}` is already defined"),
            Self::RecursivePredicate { cycle, .. } => {
                format!("predicate cycle: {}", cycle.join(" -> "))
            }
            Self::ArityMismatch {
                name, expected, got, ..
            } => format!("`{name}` expects {expected} argument(s), got {got}"),
            Self::UnknownResourceKind { name, hint, .. } => {
                format!("unknown resource kind `{name}`{hint}")
            }
        }
    }

    /// Short name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lexer { .. } => "Lexer",
            Self::Parse { .. } => "Parse",
            Self::UnresolvedReference { .. } => "UnresolvedReference",
            Self::IllFormedContract { .. } => "IllFormedContract",
            Self::DuplicateDefinition { .. } => "DuplicateDefinition",
            Self::RecursivePredicate { .. } => "RecursivePredicate",
            Self::ArityMismatch { .. } => "ArityMismatch",
            Self::UnknownResourceKind { .. } => "UnknownResourceKind",
            Self::Io { .. } => "IO",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ArityMismatch { .. } | Self::UnknownResourceKind { .. } => ErrorCategory::Internal,
            _ => ErrorCategory::LoadTime,
        }
    }
}

/// Finding produced while evaluating a contract at one call site
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("precondition of `{function}` violated: {clause} (at {span})")]
    PreconditionViolation {
        function: String,
        clause: String,
        span: Span,
    },

    #[error("no case of `{function}` covers this call (cases: {})", .cases.join(", "))]
    UnreachableCall { function: String, cases: Vec<String> },

    #[error("double free: {handle} was already released")]
    DoubleFree { handle: ResourceHandle },

    #[error("use after free: {handle} was never live")]
    UseAfterFree { handle: ResourceHandle },
}

impl EvalError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::PreconditionViolation { .. } => ErrorCategory::CallerError,
            Self::UnreachableCall { .. } | Self::DoubleFree { .. } | Self::UseAfterFree { .. } => {
                ErrorCategory::ContractError
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PreconditionViolation { .. } => "PreconditionViolation",
            Self::UnreachableCall { .. } => "UnreachableCall",
            Self::DoubleFree { .. } => "DoubleFreeContractViolation",
            Self::UseAfterFree { .. } => "UseAfterFreeContractViolation",
        }
    }
}

/// Report a load error with ariadne
pub fn report_error(filename: &str, source: &str, error: &StubError) -> std::io::Result<()> {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let span = error.span().unwrap_or(Span::SYNTHETIC);
    let range = span.start.min(source.len())..span.end.min(source.len());
    let mut report = Report::build(ReportKind::Error, (filename, range.clone()))
        .with_message(format!("{} error", error.kind()));
    if error.span().is_some() {
        report = report.with_label(
            Label::new((filename, range))
                .with_message(error.message())
                .with_color(Color::Red),
        );
    } else {
        report = report.with_note(error.message());
    }
    report.finish().eprint((filename, Source::from(source)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_includes_hint() {
        let err = StubError::unresolved("valid_fdd", Span::new(3, 12), Some("valid_fd"));
        assert!(err.to_string().contains("did you mean `valid_fd`?"));
        assert_eq!(err.span(), Some(Span::new(3, 12)));
    }

    #[test]
    fn test_recursive_lists_cycle() {
        let err = StubError::recursive(
            vec!["p".to_string(), "q".to_string(), "p".to_string()],
            Span::new(0, 1),
        );
        assert_eq!(err.message(), "predicate cycle: p -> q -> p");
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            StubError::arity("p", 1, 2, Span::SYNTHETIC).category(),
            ErrorCategory::Internal
        );
        assert_eq!(
            StubError::ill_formed("primed", Span::SYNTHETIC).category(),
            ErrorCategory::LoadTime
        );
        let violation = EvalError::PreconditionViolation {
            function: "close".to_string(),
            clause: "(fd in FileDescriptor)".to_string(),
            span: Span::SYNTHETIC,
        };
        assert_eq!(violation.category(), ErrorCategory::CallerError);
        let unreachable = EvalError::UnreachableCall {
            function: "strlen".to_string(),
            cases: vec!["empty".to_string()],
        };
        assert_eq!(unreachable.category(), ErrorCategory::ContractError);
    }

    #[test]
    fn test_io_error_has_no_span() {
        let err = StubError::io_error("missing.stub");
        assert_eq!(err.span(), None);
        assert_eq!(err.kind(), "IO");
    }
}
