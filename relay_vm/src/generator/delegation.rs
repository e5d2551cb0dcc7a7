//! The delegation driver behind `yield from`.
//!
//! The lowered loop is
//!
//! ```text
//!     BeginDelegate s          begin(): iter(s) once, into the delegate slot
//! L:  DelegateStep v, d        step(): forward the pending resumption
//!     JumpIfTrue d, END
//!     YieldDelegated v         suspend; the next resumption becomes pending
//!     Jump L
//! END:
//! ```
//!
//! # Routing
//!
//! | pending                 | delegate call                  | outer body sees             |
//! |-------------------------|--------------------------------|-----------------------------|
//! | `Value(None)`           | `next()`                       | yielded value / final value |
//! | `Value(v)`              | `send(v)`                      | yielded value / final value |
//! | `Throw(e)`              | `throw(e)`                     | yielded value / final value |
//! | `Throw(e)`, no `throw`  | none, delegate released        | `e` raised                  |
//! | `Throw(GeneratorExit)`  | `close()`                      | `GeneratorExit` raised      |
//! | `Close`                 | `close()` if supported         | `GeneratorExit` raised      |
//!
//! Exhaustion arrives as `Returned(v)` or as a raised `StopIteration`
//! carrying `v`; both end the loop with `v`. Any other failure propagates.
//! The caller owns the frame for the duration of a step, so nothing is
//! borrowed while the delegate runs.
//!
//! A delegate that is itself a generator follows the same routing, but is
//! not called through [`DelegationFrame::step`]: the interpreter parks the
//! step and the generator driver stack runs the nested body.

use super::object::GeneratorObject;
use super::suspend::Resumption;
use relay_core::protocol::{self, normalize_exhaustion};
use relay_core::{Exception, ExceptionKind, IterResult, Object, Value};
use std::mem;
use std::rc::Rc;
use tracing::debug;

/// One active `yield from`.
#[derive(Debug)]
pub struct DelegationFrame {
    /// The nested iterator being driven.
    pub iterator: Value,
    /// Resumption to forward on the next step.
    pub pending: Resumption,
}

/// Result of one driver step.
#[derive(Debug, Clone, PartialEq)]
pub enum DelegateStep {
    /// The delegate produced a value; the outer generator suspends with it.
    Yielded(Value),
    /// The delegate is exhausted; the value of the `yield from` expression.
    Finished(Value),
}

impl DelegationFrame {
    /// Start delegating to `iterable`: apply get-iterator exactly once.
    pub fn begin(iterable: &Value) -> Result<Self, Exception> {
        let iterator = protocol::get_iter(iterable)?;
        debug!(delegate = iterator.type_name(), "delegation started");
        Ok(Self {
            iterator,
            pending: Resumption::next(),
        })
    }

    /// The delegate, when it is a generator the driver stack can run
    /// directly.
    pub fn nested_generator(&self) -> Option<&GeneratorObject> {
        self.iterator.downcast_ref::<GeneratorObject>()
    }

    /// Forward the pending resumption into the delegate.
    ///
    /// On `Err` the delegation is over and the error is raised in the outer
    /// body; the caller drops the frame.
    pub fn step(&mut self) -> Result<DelegateStep, Exception> {
        let pending = mem::take(&mut self.pending);
        let delegate = match &self.iterator {
            Value::Object(obj) => Rc::clone(obj),
            other => return Err(Exception::not_an_iterator(other.type_name())),
        };

        let result = match pending {
            Resumption::Throw(exc) if exc.is(&ExceptionKind::GeneratorExit) => {
                debug!(delegate = delegate.type_name(), "closing delegate for thrown GeneratorExit");
                close_delegate(&*delegate)?;
                return Err(exc);
            }
            Resumption::Throw(exc) => match delegate.throw(exc.clone()) {
                Some(result) => {
                    debug!(delegate = delegate.type_name(), "forwarded throw to delegate");
                    result
                }
                None => {
                    debug!(
                        delegate = delegate.type_name(),
                        "delegate has no throw; raising in outer body"
                    );
                    return Err(exc);
                }
            },
            Resumption::Close => {
                debug!(delegate = delegate.type_name(), "closing delegate");
                close_delegate(&*delegate)?;
                return Err(Exception::generator_exit());
            }
            Resumption::Value(Value::None) => delegate
                .next()
                .unwrap_or_else(|| Err(Exception::not_an_iterator(delegate.type_name()))),
            Resumption::Value(value) => delegate
                .send(value)
                .unwrap_or_else(|| Err(Exception::attribute_error(delegate.type_name(), "send"))),
        };

        match normalize_exhaustion(result)? {
            IterResult::Yielded(value) => Ok(DelegateStep::Yielded(value)),
            IterResult::Returned(value) => {
                debug!(delegate = delegate.type_name(), result = %value, "delegation finished");
                Ok(DelegateStep::Finished(value))
            }
        }
    }
}

/// Close a delegate if it supports closing; one without `close` is simply
/// released.
fn close_delegate(delegate: &dyn Object) -> Result<(), Exception> {
    delegate.close().unwrap_or(Ok(()))
}

// ============================================================================
// Tests
// ============================================================================
