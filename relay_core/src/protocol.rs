//! The iteration capability interface.
//!
//! Heap objects expose what they can do through optional capabilities.
//! A capability the object does not support returns `None` (an empty slot),
//! which lets callers distinguish "not supported" from "supported but
//! failed". The delegation driver depends on that distinction: an iterator
//! without `throw` gets the exception raised in the outer body instead.

use crate::error::Exception;
use crate::value::Value;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Outcome of one successful iteration step.
#[derive(Debug, Clone, PartialEq)]
pub enum IterResult {
    /// The iterator produced a value and can be resumed.
    Yielded(Value),
    /// The iterator is exhausted; carries its final value.
    Returned(Value),
}

impl IterResult {
    /// Returns the yielded value if present.
    #[inline]
    pub fn yielded(&self) -> Option<&Value> {
        match self {
            Self::Yielded(v) => Some(v),
            Self::Returned(_) => None,
        }
    }

    /// Returns the final value if the iterator is exhausted.
    #[inline]
    pub fn returned(&self) -> Option<&Value> {
        match self {
            Self::Returned(v) => Some(v),
            Self::Yielded(_) => None,
        }
    }

    /// Returns true if the iterator is exhausted.
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Returned(_))
    }
}

/// An optional capability: `None` means the object lacks it.
pub type Slot<T> = Option<Result<T, Exception>>;

/// Capability interface implemented by every heap object.
///
/// All capability methods default to an empty slot.
pub trait Object: fmt::Debug {
    /// Guest type name used in error messages.
    fn type_name(&self) -> &str;

    /// Downcasting hook.
    fn as_any(&self) -> &dyn Any;

    /// Guest `repr`.
    fn repr(&self) -> String {
        format!("<{} object>", self.type_name())
    }

    /// Obtain an iterator over this object.
    fn get_iter(self: Rc<Self>) -> Slot<Value> {
        None
    }

    /// Advance the iterator.
    fn next(&self) -> Slot<IterResult> {
        None
    }

    /// Resume the iterator with a value.
    fn send(&self, _value: Value) -> Slot<IterResult> {
        None
    }

    /// Inject an exception into the iterator.
    fn throw(&self, _exception: Exception) -> Slot<IterResult> {
        None
    }

    /// Ask the iterator to finish.
    fn close(&self) -> Slot<()> {
        None
    }

    /// Invoke the object.
    fn call(&self, _args: Vec<Value>) -> Slot<Value> {
        None
    }

    /// Number of items, for sized containers.
    fn len(&self) -> Option<usize> {
        None
    }
}

// ============================================================================
// Protocol Helpers
// ============================================================================

/// Treat a raised `StopIteration` as exhaustion carrying its payload.
#[inline]
pub fn normalize_exhaustion(result: Result<IterResult, Exception>) -> Result<IterResult, Exception> {
    match result {
        Err(exc) if exc.is(&crate::error::ExceptionKind::StopIteration) => {
            Ok(IterResult::Returned(exc.payload))
        }
        other => other,
    }
}

/// `iter(value)`.
pub fn get_iter(value: &Value) -> Result<Value, Exception> {
    match value {
        Value::Object(obj) => Rc::clone(obj)
            .get_iter()
            .unwrap_or_else(|| Err(Exception::not_iterable(obj.type_name()))),
        other => Err(Exception::not_iterable(other.type_name())),
    }
}

/// `next(iterator)`, with `StopIteration` folded into `Returned`.
pub fn iter_next(iterator: &Value) -> Result<IterResult, Exception> {
    let obj = iterator
        .as_object()
        .ok_or_else(|| Exception::not_an_iterator(iterator.type_name()))?;
    let result = obj
        .next()
        .unwrap_or_else(|| Err(Exception::not_an_iterator(obj.type_name())));
    normalize_exhaustion(result)
}

/// Call a value with positional arguments.
pub fn call(callee: &Value, args: Vec<Value>) -> Result<Value, Exception> {
    match callee {
        Value::Object(obj) => obj
            .call(args)
            .unwrap_or_else(|| Err(Exception::not_callable(obj.type_name()))),
        other => Err(Exception::not_callable(other.type_name())),
    }
}

// ============================================================================
// Tests
// ============================================================================
