//! The bytecode interpreter.
//!
//! `execute` runs one activation from its current instruction pointer until
//! it returns, suspends, raises out or hands a `yield from` step to a nested
//! generator. Calls into functions and non-generator iterators recurse
//! through the [`Object`] capabilities, so one host stack frame backs each
//! such activation. Generator-to-generator delegation does not recurse: the
//! activation exits with [`Exit::Delegate`] and the generator driver runs
//! the nested body on its own stack.
//!
//! Exceptions are dispatched through the code object's exception table:
//! the first entry covering the faulting instruction wins, the handled
//! stack is cut back to the entry's depth and control moves to the handler.

use crate::builtins::{ExceptionClass, ListObject};
use crate::context::VmContext;
use crate::frame::Frame;
use crate::generator::{DelegateStep, DelegationFrame, GeneratorObject};
use relay_compiler::ast::{BinOp, CmpOp};
use relay_compiler::{CodeObject, Instruction, NameIndex, Register};
use relay_core::protocol;
use relay_core::{Exception, ExceptionKind, IterResult, Value};
use std::cmp::Ordering;
use std::rc::Rc;

/// How an activation left the interpreter.
#[derive(Debug)]
pub enum Exit {
    /// `return value`.
    Return(Value),
    /// Suspended with a value at a resume index.
    Yield(Value, u32),
    /// Paused at a `DelegateStep` whose delegate is a generator. The frame's
    /// ip still addresses the step; the driver completes it with the nested
    /// generator's outcome.
    Delegate(DelegationFrame),
}

/// Outcome of one instruction.
enum ControlFlow {
    /// Continue at `frame.ip`.
    Continue,
    /// Leave the activation.
    Exit(Exit),
}

/// Run `frame` until it exits.
///
/// `pending` is raised at the current instruction before anything executes;
/// this is how a resumption injects an exception at a suspension point.
pub fn execute(
    ctx: &Rc<VmContext>,
    code: &CodeObject,
    frame: &mut Frame,
    generator: Option<&GeneratorObject>,
    mut pending: Option<Exception>,
) -> Result<Exit, Exception> {
    loop {
        let pc = frame.ip;
        let result = match pending.take() {
            Some(exc) => Err(exc),
            None => step(ctx, code, frame, generator),
        };
        match result {
            Ok(ControlFlow::Continue) => {}
            Ok(ControlFlow::Exit(exit)) => return Ok(exit),
            Err(exc) => match code.handler_for(pc) {
                Some(entry) => frame.enter_handler(exc, entry.depth, entry.handler_pc),
                None => return Err(exc),
            },
        }
    }
}

fn step(
    ctx: &Rc<VmContext>,
    code: &CodeObject,
    frame: &mut Frame,
    generator: Option<&GeneratorObject>,
) -> Result<ControlFlow, Exception> {
    let inst = *code
        .instructions
        .get(frame.ip as usize)
        .ok_or_else(|| Exception::internal(format_args!("'{}' ran off the end at {}", code.name, frame.ip)))?;
    frame.ip += 1;

    match inst {
        Instruction::Nop => {}

        // =====================================================================
        // Data
        // =====================================================================
        Instruction::LoadConst { dst, idx } => {
            let value = code
                .constants
                .get(idx.0 as usize)
                .cloned()
                .ok_or_else(|| Exception::internal(format_args!("constant #{} out of range", idx.0)))?;
            frame.set(dst, value)?;
        }
        Instruction::LoadGlobal { dst, name } => {
            let name = name_at(code, name)?;
            let value = ctx.global(name).ok_or_else(|| Exception::name_error(name))?;
            frame.set(dst, value)?;
        }
        Instruction::Move { dst, src } => {
            let value = frame.get(code, src)?.clone();
            frame.set(dst, value)?;
        }
        Instruction::Binary { op, dst, lhs, rhs } => {
            let (a, b) = (frame.get(code, lhs)?, frame.get(code, rhs)?);
            let value = match op {
                BinOp::Add => a.add(b),
                BinOp::Sub => a.sub(b),
                BinOp::Mul => a.mul(b),
                BinOp::FloorDiv => a.floor_div(b),
                BinOp::Mod => a.modulo(b),
            }?;
            frame.set(dst, value)?;
        }
        Instruction::Compare { op, dst, lhs, rhs } => {
            let (a, b) = (frame.get(code, lhs)?, frame.get(code, rhs)?);
            let result = match op {
                CmpOp::Eq => a.guest_eq(b),
                CmpOp::Ne => !a.guest_eq(b),
                CmpOp::Lt => a.compare(op.symbol(), b)? == Ordering::Less,
                CmpOp::Le => a.compare(op.symbol(), b)? != Ordering::Greater,
                CmpOp::Gt => a.compare(op.symbol(), b)? == Ordering::Greater,
                CmpOp::Ge => a.compare(op.symbol(), b)? != Ordering::Less,
            };
            frame.set(dst, Value::Bool(result))?;
        }
        Instruction::Not { dst, src } => {
            let value = Value::Bool(!frame.get(code, src)?.is_truthy());
            frame.set(dst, value)?;
        }
        Instruction::BuildList { dst, base, count } => {
            let items = read_block(code, frame, base, count)?;
            frame.set(dst, Value::object(ListObject::new(items)))?;
        }
        Instruction::Call { dst, func, base, argc } => {
            let callee = frame.get(code, func)?.clone();
            let args = read_block(code, frame, base, argc)?;
            let value = protocol::call(&callee, args)?;
            frame.set(dst, value)?;
        }

        // =====================================================================
        // Iteration & Control
        // =====================================================================
        Instruction::GetIter { dst, src } => {
            let iterator = protocol::get_iter(frame.get(code, src)?)?;
            frame.set(dst, iterator)?;
        }
        Instruction::ForIter { dst, iter, exit } => {
            let iterator = frame.get(code, iter)?.clone();
            match protocol::iter_next(&iterator)? {
                IterResult::Yielded(value) => frame.set(dst, value)?,
                IterResult::Returned(_) => frame.ip = exit,
            }
        }
        Instruction::Jump { target } => frame.ip = target,
        Instruction::JumpIfFalse { cond, target } => {
            if !frame.get(code, cond)?.is_truthy() {
                frame.ip = target;
            }
        }
        Instruction::JumpIfTrue { cond, target } => {
            if frame.get(code, cond)?.is_truthy() {
                frame.ip = target;
            }
        }
        Instruction::Return { src } => {
            return Ok(ControlFlow::Exit(Exit::Return(frame.get(code, src)?.clone())));
        }

        // =====================================================================
        // Exceptions
        // =====================================================================
        Instruction::Raise { src } => return Err(to_exception(frame.get(code, src)?)),
        Instruction::Reraise => {
            return Err(frame
                .pop_handled()
                .unwrap_or_else(|| Exception::runtime_error("No active exception to reraise")));
        }
        Instruction::PushExcInfo => frame.push_handled()?,
        Instruction::PopExcInfo => {
            frame.pop_handled();
        }
        Instruction::LoadException { dst } => {
            let exc = frame
                .current_handled()
                .cloned()
                .ok_or_else(|| Exception::internal("LoadException outside a handler"))?;
            frame.set(dst, Value::Exception(Rc::new(exc)))?;
        }
        Instruction::MatchException { dst, kind } => {
            let kind = exception_kind(ctx, name_at(code, kind)?)?;
            let matched = frame
                .current_handled()
                .is_some_and(|exc| exc.matches(&kind));
            frame.set(dst, Value::Bool(matched))?;
        }

        // =====================================================================
        // Suspension
        // =====================================================================
        Instruction::Yield { src, resume, .. } | Instruction::YieldDelegated { src, resume } => {
            let value = frame.get(code, src)?.clone();
            return Ok(ControlFlow::Exit(Exit::Yield(value, resume)));
        }
        Instruction::BeginDelegate { src } => {
            let generator = require_generator(code, generator)?;
            let delegate = DelegationFrame::begin(frame.get(code, src)?)?;
            generator.begin_delegate(delegate);
        }
        Instruction::DelegateStep { value, done } => {
            let generator = require_generator(code, generator)?;
            let mut delegate = generator
                .take_delegate()
                .ok_or_else(|| Exception::internal("DelegateStep without an active delegate"))?;
            if delegate.nested_generator().is_some() {
                frame.ip -= 1;
                return Ok(ControlFlow::Exit(Exit::Delegate(delegate)));
            }
            match delegate.step()? {
                DelegateStep::Yielded(v) => {
                    generator.restore_delegate(delegate);
                    frame.set(value, v)?;
                    frame.set(done, Value::Bool(false))?;
                }
                DelegateStep::Finished(v) => {
                    drop(delegate);
                    frame.set(value, v)?;
                    frame.set(done, Value::Bool(true))?;
                }
            }
        }
    }
    Ok(ControlFlow::Continue)
}

// =============================================================================
// Helpers
// =============================================================================

fn name_at(code: &CodeObject, idx: NameIndex) -> Result<&str, Exception> {
    code.names
        .get(idx.0 as usize)
        .map(|name| name.as_ref())
        .ok_or_else(|| Exception::internal(format_args!("name @{} out of range", idx.0)))
}

fn read_block(code: &CodeObject, frame: &Frame, base: Register, count: u8) -> Result<Vec<Value>, Exception> {
    (0..count)
        .map(|i| frame.get(code, Register(base.0 + i)).cloned())
        .collect()
}

fn require_generator<'g>(
    code: &CodeObject,
    generator: Option<&'g GeneratorObject>,
) -> Result<&'g GeneratorObject, Exception> {
    generator.ok_or_else(|| {
        Exception::internal(format_args!("'{}' delegates outside a generator", code.name))
    })
}

/// `raise value`: an exception instance, or a class to instantiate.
fn to_exception(value: &Value) -> Exception {
    match value {
        Value::Exception(exc) => (**exc).clone(),
        other => match other.downcast_ref::<ExceptionClass>() {
            Some(class) => Exception::new(class.kind().clone(), ""),
            None => Exception::type_error("exceptions must derive from BaseException"),
        },
    }
}

/// Resolve the class named in `except Name:`.
fn exception_kind(ctx: &VmContext, name: &str) -> Result<ExceptionKind, Exception> {
    let value = ctx.global(name).ok_or_else(|| Exception::name_error(name))?;
    value
        .downcast_ref::<ExceptionClass>()
        .map(|class| class.kind().clone())
        .ok_or_else(|| {
            Exception::type_error("catching classes that do not inherit from BaseException is not allowed")
        })
}

// ============================================================================
// Tests
// ============================================================================
