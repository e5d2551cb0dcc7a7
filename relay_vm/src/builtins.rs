//! Builtin functions and types.
//!
//! Only what generator programs need: `range`, `iter`, `next`, `list`,
//! `len`, the list type and one class object per exception kind.

use crate::context::VmContext;
use relay_core::protocol;
use relay_core::{Exception, ExceptionKind, IterResult, Object, Slot, Value};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Signature of a native builtin.
pub type BuiltinFn = fn(&[Value]) -> Result<Value, Exception>;

/// A native function.
pub struct BuiltinFunction {
    name: &'static str,
    func: BuiltinFn,
}

impl BuiltinFunction {
    /// Wrap `func` under `name`.
    pub const fn new(name: &'static str, func: BuiltinFn) -> Self {
        Self { name, func }
    }
}

impl fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuiltinFunction({})", self.name)
    }
}

impl Object for BuiltinFunction {
    fn type_name(&self) -> &str {
        "builtin_function_or_method"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        format!("<built-in function {}>", self.name)
    }

    fn call(&self, args: Vec<Value>) -> Slot<Value> {
        Some((self.func)(&args))
    }
}

/// Bind every builtin into `ctx`'s globals.
pub fn install(ctx: &VmContext) {
    const FUNCTIONS: [(&str, BuiltinFn); 5] = [
        ("range", builtin_range),
        ("iter", builtin_iter),
        ("next", builtin_next),
        ("list", builtin_list),
        ("len", builtin_len),
    ];
    for (name, func) in FUNCTIONS {
        ctx.set_global(name, Value::object(BuiltinFunction::new(name, func)));
    }
    for kind in ExceptionKind::BUILTINS {
        let name = kind.name().to_owned();
        ctx.set_global(name, Value::object(ExceptionClass::new(kind)));
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), Exception> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        format!("exactly {}", min)
    } else {
        format!("{} to {}", min, max)
    };
    Err(Exception::type_error(format!(
        "{}() expected {} arguments, got {}",
        name,
        expected,
        args.len()
    )))
}

fn int_arg(name: &str, what: &str, value: &Value) -> Result<i64, Exception> {
    value
        .as_int()
        .ok_or_else(|| Exception::type_error(format!("{}() integer {} argument expected", name, what)))
}

// =============================================================================
// range
// =============================================================================

/// `range(stop)` / `range(start, stop)`.
pub fn builtin_range(args: &[Value]) -> Result<Value, Exception> {
    arity("range", args, 1, 2)?;
    let (start, stop) = match args {
        [stop] => (0, int_arg("range", "end", stop)?),
        [start, stop] => (int_arg("range", "start", start)?, int_arg("range", "end", stop)?),
        _ => unreachable!("arity checked"),
    };
    Ok(Value::object(RangeObject { start, stop }))
}

/// An immutable `[start, stop)` integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeObject {
    start: i64,
    stop: i64,
}

impl Object for RangeObject {
    fn type_name(&self) -> &str {
        "range"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        format!("range({}, {})", self.start, self.stop)
    }

    fn get_iter(self: Rc<Self>) -> Slot<Value> {
        Some(Ok(Value::object(RangeIter {
            next: Cell::new(self.start),
            stop: self.stop,
        })))
    }

    fn len(&self) -> Option<usize> {
        Some(usize::try_from(self.stop.saturating_sub(self.start)).unwrap_or(0))
    }
}

/// Iterator over a [`RangeObject`].
#[derive(Debug)]
pub struct RangeIter {
    next: Cell<i64>,
    stop: i64,
}

impl Object for RangeIter {
    fn type_name(&self) -> &str {
        "range_iterator"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_iter(self: Rc<Self>) -> Slot<Value> {
        Some(Ok(Value::Object(self)))
    }

    fn next(&self) -> Slot<IterResult> {
        let current = self.next.get();
        if current >= self.stop {
            return Some(Ok(IterResult::Returned(Value::None)));
        }
        self.next.set(current + 1);
        Some(Ok(IterResult::Yielded(Value::Int(current))))
    }
}

// =============================================================================
// iter / next
// =============================================================================

/// `iter(iterable)`.
pub fn builtin_iter(args: &[Value]) -> Result<Value, Exception> {
    arity("iter", args, 1, 1)?;
    protocol::get_iter(&args[0])
}

/// `next(iterator[, default])`.
///
/// Exhaustion raises `StopIteration` carrying the iterator's return value,
/// unless a default is given.
pub fn builtin_next(args: &[Value]) -> Result<Value, Exception> {
    arity("next", args, 1, 2)?;
    match protocol::iter_next(&args[0])? {
        IterResult::Yielded(value) => Ok(value),
        IterResult::Returned(value) => match args.get(1) {
            Some(default) => Ok(default.clone()),
            None => Err(Exception::stop_iteration(value)),
        },
    }
}

// =============================================================================
// list / len
// =============================================================================

/// `list(iterable)`: drain an iterator into a new list.
pub fn builtin_list(args: &[Value]) -> Result<Value, Exception> {
    arity("list", args, 0, 1)?;
    let Some(iterable) = args.first() else {
        return Ok(Value::object(ListObject::new(Vec::new())));
    };
    let iterator = protocol::get_iter(iterable)?;
    let mut items = Vec::new();
    while let IterResult::Yielded(value) = protocol::iter_next(&iterator)? {
        items.push(value);
    }
    Ok(Value::object(ListObject::new(items)))
}

/// `len(obj)`.
pub fn builtin_len(args: &[Value]) -> Result<Value, Exception> {
    arity("len", args, 1, 1)?;
    let len = match &args[0] {
        Value::Str(s) => Some(s.chars().count()),
        Value::Object(obj) => obj.len(),
        _ => None,
    };
    let len = len.ok_or_else(|| {
        Exception::type_error(format!("object of type '{}' has no len()", args[0].type_name()))
    })?;
    i64::try_from(len).map(Value::Int).map_err(|_| Exception::overflow())
}

// =============================================================================
// List
// =============================================================================

/// A mutable list.
#[derive(Debug, Default)]
pub struct ListObject {
    items: RefCell<Vec<Value>>,
}

impl ListObject {
    /// A list holding `items`.
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: RefCell::new(items),
        }
    }

    /// Snapshot of the items.
    pub fn items(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    /// Append an item.
    pub fn push(&self, value: Value) {
        self.items.borrow_mut().push(value);
    }
}

impl Object for ListObject {
    fn type_name(&self) -> &str {
        "list"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        let items: Vec<String> = self.items.borrow().iter().map(ToString::to_string).collect();
        format!("[{}]", items.join(", "))
    }

    fn get_iter(self: Rc<Self>) -> Slot<Value> {
        Some(Ok(Value::object(ListIter {
            list: self,
            index: Cell::new(0),
        })))
    }

    fn len(&self) -> Option<usize> {
        Some(self.items.borrow().len())
    }
}

/// Iterator over a [`ListObject`]. Supports `next` only, so a delegating
/// generator cannot forward `send` or `throw` into it.
#[derive(Debug)]
pub struct ListIter {
    list: Rc<ListObject>,
    index: Cell<usize>,
}

impl Object for ListIter {
    fn type_name(&self) -> &str {
        "list_iterator"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_iter(self: Rc<Self>) -> Slot<Value> {
        Some(Ok(Value::Object(self)))
    }

    fn next(&self) -> Slot<IterResult> {
        let index = self.index.get();
        let item = self.list.items.borrow().get(index).cloned();
        Some(Ok(match item {
            Some(value) => {
                self.index.set(index + 1);
                IterResult::Yielded(value)
            }
            None => IterResult::Returned(Value::None),
        }))
    }
}

// =============================================================================
// Exception Classes
// =============================================================================

/// The class object for one exception kind. Calling it builds an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionClass {
    kind: ExceptionKind,
}

impl ExceptionClass {
    /// Class object for `kind`.
    pub fn new(kind: ExceptionKind) -> Self {
        Self { kind }
    }

    /// The kind instances of this class carry.
    #[inline]
    pub fn kind(&self) -> &ExceptionKind {
        &self.kind
    }

    /// `Kind(args...)`: the first argument is the message; `StopIteration`
    /// also keeps it as its payload.
    pub fn instantiate(&self, args: &[Value]) -> Exception {
        let message = match args.first() {
            None => String::new(),
            Some(Value::Str(s)) => s.to_string(),
            Some(other) => other.to_string(),
        };
        let exc = Exception::new(self.kind.clone(), message);
        match (&self.kind, args.first()) {
            (ExceptionKind::StopIteration, Some(value)) => exc.with_payload(value.clone()),
            _ => exc,
        }
    }
}

impl Object for ExceptionClass {
    fn type_name(&self) -> &str {
        "type"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        format!("<class '{}'>", self.kind.name())
    }

    fn call(&self, args: Vec<Value>) -> Slot<Value> {
        Some(Ok(Value::from(self.instantiate(&args))))
    }
}

// =============================================================================
// Tests
// =============================================================================
