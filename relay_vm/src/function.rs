//! Guest function objects.

use crate::context::{self, VmContext};
use crate::frame::Frame;
use crate::generator::GeneratorObject;
use crate::interpreter::{self, Exit};
use relay_compiler::CodeObject;
use relay_core::{Exception, Object, Slot, Value};
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// A compiled function bound to the VM it was loaded into.
///
/// Calling a generator function does not run its body; it returns a new
/// [`GeneratorObject`] with the arguments bound.
pub struct Function {
    code: Rc<CodeObject>,
    ctx: Rc<VmContext>,
}

impl Function {
    /// Bind `code` to `ctx`.
    pub fn new(code: Rc<CodeObject>, ctx: Rc<VmContext>) -> Self {
        Self { code, ctx }
    }

    /// Compiled body.
    #[inline]
    pub fn code(&self) -> &Rc<CodeObject> {
        &self.code
    }

    /// Returns true for generator functions.
    #[inline]
    pub fn is_generator(&self) -> bool {
        self.code.is_generator()
    }

    fn check_arity(&self, args: &[Value]) -> Result<(), Exception> {
        let expected = self.code.arg_count as usize;
        if args.len() == expected {
            return Ok(());
        }
        Err(Exception::type_error(format!(
            "{}() takes {} positional arguments but {} were given",
            self.code.name,
            expected,
            args.len()
        )))
    }

    /// Create a generator object with `args` bound. The body does not run.
    pub fn spawn(&self, args: Vec<Value>) -> Result<Rc<GeneratorObject>, Exception> {
        if !self.is_generator() {
            return Err(Exception::type_error(format!(
                "'{}' is not a generator function",
                self.code.name
            )));
        }
        self.check_arity(&args)?;
        Ok(GeneratorObject::new(Rc::clone(&self.code), Rc::clone(&self.ctx), args))
    }

    /// Call with positional arguments.
    pub fn invoke(&self, args: Vec<Value>) -> Result<Value, Exception> {
        if self.is_generator() {
            return Ok(Value::Object(self.spawn(args)?));
        }
        self.check_arity(&args)?;

        let _depth = self.ctx.enter()?;
        trace!(function = %self.code.name, depth = self.ctx.depth(), "call");
        let mut frame = Frame::new(self.code.register_count as usize);
        frame.load_args(args);
        match context::with_stack(|| interpreter::execute(&self.ctx, &self.code, &mut frame, None, None))? {
            Exit::Return(value) => Ok(value),
            Exit::Yield(..) | Exit::Delegate(_) => Err(Exception::internal(format_args!(
                "'{}' suspended outside a generator",
                self.code.name
            ))),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.code.name)
            .field("generator", &self.is_generator())
            .finish_non_exhaustive()
    }
}

impl Object for Function {
    fn type_name(&self) -> &str {
        "function"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        format!("<function {}>", self.code.name)
    }

    fn call(&self, args: Vec<Value>) -> Slot<Value> {
        Some(self.invoke(args))
    }
}
