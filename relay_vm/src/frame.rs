//! Activation frames.
//!
//! A `Frame` is the state of one running activation: its register file,
//! instruction pointer and the stack of exceptions currently being handled.
//! Frames are never kept across a suspension; a generator saves only the
//! live registers (see [`FrameStorage`](crate::generator::FrameStorage))
//! and rebuilds a fresh frame on resume.

use relay_compiler::{CodeObject, Register};
use relay_core::{Exception, Value};
use smallvec::SmallVec;

/// One activation.
#[derive(Debug)]
pub struct Frame {
    /// Register file; `None` is an unbound register.
    pub registers: Vec<Option<Value>>,
    /// Index of the next instruction.
    pub ip: u32,
    /// Exceptions being handled by enclosing `except`/`finally` bodies.
    handled: SmallVec<[Exception; 2]>,
    /// Exception travelling to a handler, consumed by `PushExcInfo`.
    in_flight: Option<Exception>,
}

impl Frame {
    /// A frame with `register_count` unbound registers.
    pub fn new(register_count: usize) -> Self {
        Self {
            registers: vec![None; register_count],
            ip: 0,
            handled: SmallVec::new(),
            in_flight: None,
        }
    }

    /// Bind positional arguments to the parameter registers.
    pub fn load_args(&mut self, args: Vec<Value>) {
        for (slot, arg) in self.registers.iter_mut().zip(args) {
            *slot = Some(arg);
        }
    }

    /// Read a register.
    ///
    /// An unbound local raises `UnboundLocalError`; an unbound temporary is
    /// a compiler bug and surfaces as an internal error.
    #[inline]
    pub fn get(&self, code: &CodeObject, reg: Register) -> Result<&Value, Exception> {
        match self.registers.get(reg.0 as usize) {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(match code.local_name(reg) {
                Some(name) => Exception::unbound_local(name),
                None => Exception::internal(format_args!("read of unset register {}", reg)),
            }),
            None => Err(Exception::internal(format_args!(
                "register {} outside a file of {}",
                reg,
                self.registers.len()
            ))),
        }
    }

    /// Write a register.
    #[inline]
    pub fn set(&mut self, reg: Register, value: Value) -> Result<(), Exception> {
        let len = self.registers.len();
        match self.registers.get_mut(reg.0 as usize) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(Exception::internal(format_args!(
                "write to register {} outside a file of {}",
                reg, len
            ))),
        }
    }

    // =========================================================================
    // Exception State
    // =========================================================================

    /// Route `exc` to a handler: drop handled entries above `depth` and
    /// park the exception for `PushExcInfo`.
    pub fn enter_handler(&mut self, exc: Exception, depth: u16, handler_pc: u32) {
        self.handled.truncate(depth as usize);
        self.in_flight = Some(exc);
        self.ip = handler_pc;
    }

    /// `PushExcInfo`: the in-flight exception becomes the handled one.
    pub fn push_handled(&mut self) -> Result<(), Exception> {
        let exc = self
            .in_flight
            .take()
            .ok_or_else(|| Exception::internal("PushExcInfo with no exception in flight"))?;
        self.handled.push(exc);
        Ok(())
    }

    /// `PopExcInfo`.
    pub fn pop_handled(&mut self) -> Option<Exception> {
        self.handled.pop()
    }

    /// The exception handled by the innermost `except`/`finally`.
    pub fn current_handled(&self) -> Option<&Exception> {
        self.handled.last()
    }

    /// Number of exceptions being handled.
    #[inline]
    pub fn handled_depth(&self) -> usize {
        self.handled.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use relay_compiler::ast::{Expr, FunctionDef, Stmt};
    use relay_compiler::{CompilerConfig, lower_function};
    use relay_core::ExceptionKind;

    fn code_with_local() -> CodeObject {
        let def = FunctionDef::new("f", &[], vec![Stmt::assign("x", Expr::int(1))]);
        lower_function(&def, &CompilerConfig::default()).unwrap()
    }

    #[test]
    fn test_unbound_local_names_the_variable() {
        let code = code_with_local();
        let frame = Frame::new(code.register_count as usize);
        let err = frame.get(&code, Register(0)).unwrap_err();
        assert!(err.is(&ExceptionKind::UnboundLocalError));
        assert!(err.message.contains("'x'"));
    }

    #[test]
    fn test_unbound_temporary_is_internal() {
        let code = code_with_local();
        let frame = Frame::new(4);
        let err = frame.get(&code, Register(3)).unwrap_err();
        assert!(err.message.starts_with("internal error"));
    }

    #[test]
    fn test_out_of_range_write_is_internal() {
        let mut frame = Frame::new(2);
        frame.set(Register(1), Value::Int(4)).unwrap();
        assert_eq!(frame.registers[1], Some(Value::Int(4)));

        let err = frame.set(Register(2), Value::Int(5)).unwrap_err();
        assert!(err.is(&ExceptionKind::RuntimeError));
        assert!(err.message.starts_with("internal error"));
        assert_eq!(frame.registers.len(), 2);
    }

    #[test]
    fn test_handled_stack() {
        let mut frame = Frame::new(1);
        frame.enter_handler(Exception::value_error("a"), 0, 5);
        assert_eq!(frame.ip, 5);
        frame.push_handled().unwrap();
        frame.enter_handler(Exception::type_error("b"), 1, 9);
        frame.push_handled().unwrap();
        assert_eq!(frame.handled_depth(), 2);
        assert!(frame.current_handled().unwrap().is(&ExceptionKind::TypeError));

        // Dispatch to an outer handler drops the inner handled exception.
        frame.enter_handler(Exception::runtime_error("c"), 1, 12);
        assert_eq!(frame.handled_depth(), 1);
        assert!(frame.push_handled().is_ok());
        assert!(frame.push_handled().is_err());
    }
}
