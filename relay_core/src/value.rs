//! Dynamically typed guest values.
//!
//! Scalars are stored inline; everything with identity lives behind an `Rc`
//! and is reached through the [`Object`] capability trait. Values are
//! deliberately `!Send`: a generator and everything it references stays on
//! the thread that created it.

use crate::error::Exception;
use crate::protocol::Object;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A guest value.
#[derive(Clone, Default)]
pub enum Value {
    /// The `None` singleton.
    #[default]
    None,
    /// `True` / `False`.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// Immutable string.
    Str(Arc<str>),
    /// An exception instance (raised or merely held).
    Exception(Rc<Exception>),
    /// Any heap object: functions, generators, lists, iterators.
    Object(Rc<dyn Object>),
}

impl Value {
    /// Wrap a heap object.
    #[inline]
    pub fn object<T: Object + 'static>(obj: T) -> Self {
        Value::Object(Rc::new(obj))
    }

    /// Returns the guest type name.
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Exception(exc) => exc.kind.name(),
            Value::Object(obj) => obj.type_name(),
        }
    }

    /// Returns true for `None`.
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Integer view; `bool` participates as 0/1.
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// String view.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Heap object view.
    #[inline]
    pub fn as_object(&self) -> Option<&Rc<dyn Object>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Exception view.
    #[inline]
    pub fn as_exception(&self) -> Option<&Exception> {
        match self {
            Value::Exception(exc) => Some(exc),
            _ => None,
        }
    }

    /// Downcast a heap object to a concrete type.
    pub fn downcast_ref<T: Object + 'static>(&self) -> Option<&T> {
        self.as_object()?.as_any().downcast_ref::<T>()
    }

    /// Guest truthiness.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Exception(_) => true,
            Value::Object(obj) => obj.len().is_none_or(|len| len > 0),
        }
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    /// `self + other` (ints and string concatenation).
    pub fn add(&self, other: &Value) -> Result<Value, Exception> {
        if let (Value::Str(a), Value::Str(b)) = (self, other) {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            return Ok(Value::Str(joined.into()));
        }
        self.int_op("+", other, i64::checked_add)
    }

    /// `self - other`.
    pub fn sub(&self, other: &Value) -> Result<Value, Exception> {
        self.int_op("-", other, i64::checked_sub)
    }

    /// `self * other`.
    pub fn mul(&self, other: &Value) -> Result<Value, Exception> {
        self.int_op("*", other, i64::checked_mul)
    }

    /// `self // other` with floor semantics.
    pub fn floor_div(&self, other: &Value) -> Result<Value, Exception> {
        let (a, b) = self.int_operands("//", other)?;
        if b == 0 {
            return Err(Exception::zero_division("integer division or modulo by zero"));
        }
        let q = a.checked_div(b).ok_or_else(Exception::overflow)?;
        let adjust = a % b != 0 && ((a < 0) != (b < 0));
        Ok(Value::Int(if adjust { q - 1 } else { q }))
    }

    /// `self % other` with the sign of the divisor.
    pub fn modulo(&self, other: &Value) -> Result<Value, Exception> {
        let (a, b) = self.int_operands("%", other)?;
        if b == 0 {
            return Err(Exception::zero_division("integer modulo by zero"));
        }
        let r = a.checked_rem(b).ok_or_else(Exception::overflow)?;
        let adjust = r != 0 && ((r < 0) != (b < 0));
        Ok(Value::Int(if adjust { r + b } else { r }))
    }

    fn int_operands(&self, op: &str, other: &Value) -> Result<(i64, i64), Exception> {
        match (self.as_int(), other.as_int()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(unsupported(op, self, other)),
        }
    }

    fn int_op(
        &self,
        op: &str,
        other: &Value,
        f: fn(i64, i64) -> Option<i64>,
    ) -> Result<Value, Exception> {
        let (a, b) = self.int_operands(op, other)?;
        f(a, b).map(Value::Int).ok_or_else(Exception::overflow)
    }

    // =========================================================================
    // Comparison
    // =========================================================================

    /// Guest `==`. Ints and bools compare numerically, objects by identity.
    pub fn guest_eq(&self, other: &Value) -> bool {
        match (self.as_int(), other.as_int()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`.
    pub fn compare(&self, op: &str, other: &Value) -> Result<std::cmp::Ordering, Exception> {
        if let (Some(a), Some(b)) = (self.as_int(), other.as_int()) {
            return Ok(a.cmp(&b));
        }
        if let (Value::Str(a), Value::Str(b)) = (self, other) {
            return Ok(a.cmp(b));
        }
        Err(Exception::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op,
            self.type_name(),
            other.type_name()
        )))
    }
}

fn unsupported(op: &str, left: &Value, right: &Value) -> Exception {
    Exception::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "'{}'", s),
            Value::Exception(exc) => write!(f, "{}('{}')", exc.kind, exc.message),
            Value::Object(obj) => f.write_str(&obj.repr()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<Exception> for Value {
    fn from(exc: Exception) -> Self {
        Value::Exception(Rc::new(exc))
    }
}

// ============================================================================
// Tests
// ============================================================================
