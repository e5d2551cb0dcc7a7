//! Runtime error types.
//!
//! Two layers: [`GeneratorError`] is what the generator protocol reports
//! (usage errors are distinguishable from guest failures), and [`VmError`]
//! is what the host-facing [`VirtualMachine`](crate::VirtualMachine) API
//! returns.

use relay_compiler::CompileError;
use relay_core::Exception;
use thiserror::Error;

/// Result type for host-facing VM operations.
pub type VmResult<T> = Result<T, VmError>;

/// Failure of a generator protocol call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
    /// A resume call arrived while the body was executing.
    #[error("generator already executing")]
    AlreadyRunning,

    /// `send(non-None)` before the first suspension.
    #[error("can't send non-None value to a just-started generator")]
    CantSendNonNone,

    /// `close()` delivered `GeneratorExit` and the body yielded again.
    #[error("generator ignored GeneratorExit")]
    IgnoredGeneratorExit,

    /// The body (or a delegate) raised.
    #[error(transparent)]
    Raised(#[from] Exception),
}

impl GeneratorError {
    /// The guest exception this error becomes when it crosses into guest
    /// code.
    #[must_use]
    pub fn into_exception(self) -> Exception {
        match self {
            Self::AlreadyRunning => Exception::value_error("generator already executing"),
            Self::CantSendNonNone => {
                Exception::type_error("can't send non-None value to a just-started generator")
            }
            Self::IgnoredGeneratorExit => Exception::runtime_error("generator ignored GeneratorExit"),
            Self::Raised(exc) => exc,
        }
    }

    /// The raised exception, if this is a guest failure.
    #[inline]
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Self::Raised(exc) => Some(exc),
            _ => None,
        }
    }
}

impl From<GeneratorError> for Exception {
    fn from(err: GeneratorError) -> Self {
        err.into_exception()
    }
}

/// Host-facing VM error.
#[derive(Error, Debug, Clone)]
pub enum VmError {
    /// A function failed to compile.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// Guest code raised.
    #[error("{0}")]
    Raised(#[from] Exception),

    /// A generator protocol call failed.
    #[error("generator error: {0}")]
    Generator(#[from] GeneratorError),

    /// A global looked up by the host does not exist.
    #[error("name '{0}' is not defined")]
    UndefinedGlobal(String),

    /// The named global is not a generator function.
    #[error("'{0}' is not a generator function")]
    NotAGenerator(String),
}

impl VmError {
    /// The guest exception, if guest code raised.
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Self::Raised(exc) => Some(exc),
            Self::Generator(err) => err.exception(),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
