//! Compile-time errors.

use relay_core::Span;
use std::sync::Arc;
use thiserror::Error;

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// What went wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Suspension inside an `except` body: the handled-exception stack
    /// is not part of the saved frame.
    #[error("'{keyword}' inside an 'except' handler cannot be resumed")]
    SuspendInExceptHandler {
        /// `yield` or `yield from`.
        keyword: &'static str,
    },

    /// Suspension inside a `finally` body.
    #[error("'{keyword}' inside a 'finally' block cannot be resumed")]
    SuspendInFinally {
        /// `yield` or `yield from`.
        keyword: &'static str,
    },

    /// `break` with no enclosing loop.
    #[error("'break' outside loop")]
    BreakOutsideLoop,

    /// `continue` with no enclosing loop.
    #[error("'continue' not properly in loop")]
    ContinueOutsideLoop,

    /// Register file exhausted.
    #[error("function needs more than {limit} registers")]
    TooManyRegisters {
        /// Configured limit.
        limit: usize,
    },

    /// Resume index space exhausted.
    #[error("function has more than {limit} suspension points")]
    TooManyResumePoints {
        /// Configured limit.
        limit: u32,
    },

    /// Assignment to something that is not a name.
    #[error("can't assign to {target}")]
    InvalidAssignTarget {
        /// Description of the target node.
        target: &'static str,
    },

    /// Too many arguments or list items for one instruction.
    #[error("more than 255 {what}")]
    TooManyOperands {
        /// `arguments` or `list items`.
        what: &'static str,
    },

    /// Broken compiler invariant.
    #[error("internal compiler error: {0}")]
    Internal(String),
}

/// A compile error with its location.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} (in '{function}' at {span})")]
pub struct CompileError {
    /// Error kind.
    pub kind: CompileErrorKind,
    /// Function being compiled.
    pub function: Arc<str>,
    /// Offending node.
    pub span: Span,
}

impl CompileError {
    /// Create a compile error.
    #[must_use]
    pub fn new(kind: CompileErrorKind, function: impl Into<Arc<str>>, span: Span) -> Self {
        Self {
            kind,
            function: function.into(),
            span,
        }
    }
}
