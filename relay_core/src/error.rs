//! Guest exception types.
//!
//! Every failure that guest code can observe, catch or re-raise is an
//! [`Exception`]. Host-side failures (compile errors, protocol violations)
//! live in the compiler and VM crates and convert into an `Exception` only
//! when they cross into guest code.
//!
//! # Hierarchy
//!
//! ```text
//! BaseException
//! ├── GeneratorExit
//! └── Exception
//!     ├── StopIteration
//!     ├── TypeError
//!     ├── ValueError
//!     ├── RuntimeError
//!     │   └── RecursionError
//!     ├── AttributeError
//!     ├── NameError
//!     │   └── UnboundLocalError
//!     ├── ArithmeticError
//!     │   ├── ZeroDivisionError
//!     │   └── OverflowError
//!     └── <custom kinds>
//! ```

use crate::value::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Exception Kind
// ============================================================================

/// The class of a guest exception.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// Root of the hierarchy.
    BaseException,
    /// Raised into a generator by `close()`.
    GeneratorExit,
    /// Base of all ordinary exceptions.
    Exception,
    /// Iterator exhaustion; the payload carries the final value.
    StopIteration,
    /// Operation applied to a value of the wrong type.
    TypeError,
    /// Right type, wrong value.
    ValueError,
    /// Generic runtime failure.
    RuntimeError,
    /// Call depth exceeded the configured limit.
    RecursionError,
    /// Missing attribute or capability.
    AttributeError,
    /// Unknown global name.
    NameError,
    /// Local read before assignment.
    UnboundLocalError,
    /// Base of arithmetic failures.
    ArithmeticError,
    /// Division or modulo by zero.
    ZeroDivisionError,
    /// Integer overflow.
    OverflowError,
    /// A user-defined kind deriving from `Exception`.
    Custom(Arc<str>),
}

impl ExceptionKind {
    /// All builtin kinds, in hierarchy order.
    pub const BUILTINS: [ExceptionKind; 14] = [
        Self::BaseException,
        Self::GeneratorExit,
        Self::Exception,
        Self::StopIteration,
        Self::TypeError,
        Self::ValueError,
        Self::RuntimeError,
        Self::RecursionError,
        Self::AttributeError,
        Self::NameError,
        Self::UnboundLocalError,
        Self::ArithmeticError,
        Self::ZeroDivisionError,
        Self::OverflowError,
    ];

    /// Returns the guest-visible class name.
    pub fn name(&self) -> &str {
        match self {
            Self::BaseException => "BaseException",
            Self::GeneratorExit => "GeneratorExit",
            Self::Exception => "Exception",
            Self::StopIteration => "StopIteration",
            Self::TypeError => "TypeError",
            Self::ValueError => "ValueError",
            Self::RuntimeError => "RuntimeError",
            Self::RecursionError => "RecursionError",
            Self::AttributeError => "AttributeError",
            Self::NameError => "NameError",
            Self::UnboundLocalError => "UnboundLocalError",
            Self::ArithmeticError => "ArithmeticError",
            Self::ZeroDivisionError => "ZeroDivisionError",
            Self::OverflowError => "OverflowError",
            Self::Custom(name) => name,
        }
    }

    /// Looks up a builtin kind by class name.
    pub fn builtin(name: &str) -> Option<Self> {
        Self::BUILTINS.into_iter().find(|kind| kind.name() == name)
    }

    /// Returns the direct base class, or `None` for `BaseException`.
    pub fn parent(&self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::GeneratorExit | Self::Exception => Some(Self::BaseException),
            Self::RecursionError => Some(Self::RuntimeError),
            Self::UnboundLocalError => Some(Self::NameError),
            Self::ZeroDivisionError | Self::OverflowError => Some(Self::ArithmeticError),
            Self::StopIteration
            | Self::TypeError
            | Self::ValueError
            | Self::RuntimeError
            | Self::AttributeError
            | Self::NameError
            | Self::ArithmeticError
            | Self::Custom(_) => Some(Self::Exception),
        }
    }

    /// Returns true if `self` is `base` or derives from it.
    pub fn is_subclass_of(&self, base: &ExceptionKind) -> bool {
        let mut current = Some(self.clone());
        while let Some(kind) = current {
            if &kind == base {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Exception
// ============================================================================

/// A raised guest exception.
#[derive(Error, Debug, Clone)]
#[error("{}", render(.kind, .message))]
pub struct Exception {
    /// Exception class.
    pub kind: ExceptionKind,
    /// Human-readable message (may be empty).
    pub message: Arc<str>,
    /// Attached value; `StopIteration` keeps the iterator's final value here.
    pub payload: Value,
}

fn render(kind: &ExceptionKind, message: &str) -> String {
    if message.is_empty() {
        kind.name().to_string()
    } else {
        format!("{}: {}", kind, message)
    }
}

impl Exception {
    /// Create an exception with a message and no payload.
    #[must_use]
    pub fn new(kind: ExceptionKind, message: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            message: message.into(),
            payload: Value::None,
        }
    }

    /// Attach a payload value.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Exact class check.
    #[inline]
    pub fn is(&self, kind: &ExceptionKind) -> bool {
        &self.kind == kind
    }

    /// Subclass-aware match, as used by `except Kind:`.
    #[inline]
    pub fn matches(&self, kind: &ExceptionKind) -> bool {
        self.kind.is_subclass_of(kind)
    }

    // =========================================================================
    // Convenience Constructors
    // =========================================================================

    /// `TypeError: message`.
    #[must_use]
    pub fn type_error(message: impl Into<Arc<str>>) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    /// `ValueError: message`.
    #[must_use]
    pub fn value_error(message: impl Into<Arc<str>>) -> Self {
        Self::new(ExceptionKind::ValueError, message)
    }

    /// `RuntimeError: message`.
    #[must_use]
    pub fn runtime_error(message: impl Into<Arc<str>>) -> Self {
        Self::new(ExceptionKind::RuntimeError, message)
    }

    /// `AttributeError: 'type' object has no attribute 'attr'`.
    #[must_use]
    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            ExceptionKind::AttributeError,
            format!("'{}' object has no attribute '{}'", type_name, attr),
        )
    }

    /// `TypeError: 'type' object is not an iterator`.
    #[must_use]
    pub fn not_an_iterator(type_name: &str) -> Self {
        Self::type_error(format!("'{}' object is not an iterator", type_name))
    }

    /// `TypeError: 'type' object is not iterable`.
    #[must_use]
    pub fn not_iterable(type_name: &str) -> Self {
        Self::type_error(format!("'{}' object is not iterable", type_name))
    }

    /// `TypeError: 'type' object is not callable`.
    #[must_use]
    pub fn not_callable(type_name: &str) -> Self {
        Self::type_error(format!("'{}' object is not callable", type_name))
    }

    /// `NameError: name 'x' is not defined`.
    #[must_use]
    pub fn name_error(name: &str) -> Self {
        Self::new(
            ExceptionKind::NameError,
            format!("name '{}' is not defined", name),
        )
    }

    /// `UnboundLocalError` for a local read before assignment.
    #[must_use]
    pub fn unbound_local(name: &str) -> Self {
        Self::new(
            ExceptionKind::UnboundLocalError,
            format!(
                "cannot access local variable '{}' where it is not associated with a value",
                name
            ),
        )
    }

    /// `ZeroDivisionError`.
    #[must_use]
    pub fn zero_division(message: &str) -> Self {
        Self::new(ExceptionKind::ZeroDivisionError, message)
    }

    /// `OverflowError` for integer arithmetic.
    #[must_use]
    pub fn overflow() -> Self {
        Self::new(ExceptionKind::OverflowError, "integer overflow")
    }

    /// `RecursionError` when the call depth limit is exceeded.
    #[must_use]
    pub fn recursion(limit: usize) -> Self {
        Self::new(
            ExceptionKind::RecursionError,
            format!("maximum recursion depth exceeded (limit {})", limit),
        )
    }

    /// `StopIteration` carrying an iterator's final value.
    #[must_use]
    pub fn stop_iteration(value: Value) -> Self {
        Self::new(ExceptionKind::StopIteration, "").with_payload(value)
    }

    /// `GeneratorExit`, injected by `close()`.
    #[must_use]
    pub fn generator_exit() -> Self {
        Self::new(ExceptionKind::GeneratorExit, "")
    }

    /// A broken interpreter invariant, surfaced as a guest `RuntimeError`.
    #[must_use]
    pub fn internal(message: impl fmt::Display) -> Self {
        Self::runtime_error(format!("internal error: {}", message))
    }
}

impl PartialEq for Exception {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.message == other.message && self.payload == other.payload
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_roundtrip() {
        for kind in ExceptionKind::BUILTINS {
            assert_eq!(ExceptionKind::builtin(kind.name()), Some(kind.clone()));
        }
        assert_eq!(ExceptionKind::builtin("Nope"), None);
    }

    #[test]
    fn test_generator_exit_is_not_an_exception() {
        let exit = Exception::generator_exit();
        assert!(exit.matches(&ExceptionKind::BaseException));
        assert!(!exit.matches(&ExceptionKind::Exception));
    }

    #[test]
    fn test_subclass_matching() {
        let err = Exception::unbound_local("x");
        assert!(err.matches(&ExceptionKind::NameError));
        assert!(err.matches(&ExceptionKind::Exception));
        assert!(!err.matches(&ExceptionKind::TypeError));

        let custom = Exception::new(ExceptionKind::Custom("Boom".into()), "bang");
        assert!(custom.matches(&ExceptionKind::Exception));
        assert!(custom.is(&ExceptionKind::Custom("Boom".into())));
    }

    #[test]
    fn test_display() {
        assert_eq!(Exception::value_error("bad").to_string(), "ValueError: bad");
        assert_eq!(Exception::generator_exit().to_string(), "GeneratorExit");
        assert_eq!(
            Exception::attribute_error("list_iterator", "send").to_string(),
            "AttributeError: 'list_iterator' object has no attribute 'send'"
        );
    }

    #[test]
    fn test_stop_iteration_payload() {
        let stop = Exception::stop_iteration(Value::Int(10));
        assert_eq!(stop.payload, Value::Int(10));
        assert!(stop.is(&ExceptionKind::StopIteration));
    }
}
