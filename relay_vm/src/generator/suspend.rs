//! The suspension primitive.
//!
//! Suspending saves the registers live across the resume point into the
//! generator's frame storage; resuming rebuilds a register file from it and
//! delivers the caller's [`Resumption`] at that point:
//!
//! ```text
//!                 Value(v)              Throw(e)            Close
//! Yield           dst = v, ip + 1       raise e at ip       raise GeneratorExit at ip
//! YieldDelegated  delegate.pending = resumption, ip + 1 (the driver interprets it)
//! ```

use super::delegation::DelegationFrame;
use super::storage::FrameStorage;
use crate::frame::Frame;
use relay_compiler::{CodeObject, Instruction, ResumePoint};
use relay_core::{Exception, Value};

/// What a resume call delivers at the suspension point.
#[derive(Debug, Clone, PartialEq)]
pub enum Resumption {
    /// `advance()` (with `None`) or `send(value)`.
    Value(Value),
    /// `throw(exception)`.
    Throw(Exception),
    /// `close()`.
    Close,
}

impl Resumption {
    /// The resumption of a plain `advance()`.
    #[inline]
    pub fn next() -> Self {
        Self::Value(Value::None)
    }

    /// The value delivered at a plain yield, or the exception raised there.
    pub fn into_value(self) -> Result<Value, Exception> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Throw(exc) => Err(exc),
            Self::Close => Err(Exception::generator_exit()),
        }
    }
}

impl Default for Resumption {
    fn default() -> Self {
        Self::next()
    }
}

fn resume_point(code: &CodeObject, index: u32) -> Result<&ResumePoint, Exception> {
    code.resume_table.get(index).ok_or_else(|| {
        Exception::internal(format_args!(
            "'{}' has no resume point {} ({} recorded)",
            code.name,
            index,
            code.resume_table.len()
        ))
    })
}

/// Save the registers live across resume point `index`.
pub(crate) fn save(
    code: &CodeObject,
    index: u32,
    storage: &mut FrameStorage,
    frame: &Frame,
) -> Result<(), Exception> {
    let point = resume_point(code, index)?;
    storage.capture(&frame.registers, point.liveness);
    Ok(())
}

/// Rebuild `frame` at resume point `index` and deliver `resumption`.
///
/// Returns the exception to raise at the suspension point, if the
/// resumption is one.
pub(crate) fn restore(
    code: &CodeObject,
    index: u32,
    storage: &mut FrameStorage,
    delegate: Option<&mut DelegationFrame>,
    frame: &mut Frame,
    resumption: Resumption,
) -> Result<Option<Exception>, Exception> {
    let point = resume_point(code, index)?;
    storage.restore(&mut frame.registers, point.liveness);

    match code.instructions.get(point.ip as usize) {
        Some(Instruction::Yield { dst, .. }) => match resumption.into_value() {
            Ok(value) => {
                frame.set(*dst, value)?;
                frame.ip = point.ip + 1;
                Ok(None)
            }
            Err(exc) => {
                frame.ip = point.ip;
                Ok(Some(exc))
            }
        },
        Some(Instruction::YieldDelegated { .. }) => {
            let delegate = delegate.ok_or_else(|| {
                Exception::internal(format_args!(
                    "delegation point {} resumed without an active delegate",
                    index
                ))
            })?;
            delegate.pending = resumption;
            frame.ip = point.ip + 1;
            Ok(None)
        }
        _ => Err(Exception::internal(format_args!(
            "resume point {} does not address a suspension",
            index
        ))),
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

    /// `def g(a): x = yield a; yield x`
    fn echo() -> CodeObject {
        let def = FunctionDef::new(
            "g",
            &["a"],
            vec![
                Stmt::assign("x", Expr::yield_value(Expr::name("a"))),
                Stmt::expr(Expr::yield_value(Expr::name("x"))),
            ],
        );
        lower_function(&def, &CompilerConfig::default()).unwrap()
    }

    #[test]
    fn test_value_lands_in_destination() {
        let code = echo();
        let mut storage = FrameStorage::new();
        let frame = Frame::new(code.register_count as usize);
        save(&code, 0, &mut storage, &frame).unwrap();

        let mut fresh = Frame::new(code.register_count as usize);
        let pending = restore(
            &code,
            0,
            &mut storage,
            None,
            &mut fresh,
            Resumption::Value(Value::Int(7)),
        )
        .unwrap();
        assert!(pending.is_none());
        let point = code.resume_table.get(0).unwrap();
        assert_eq!(fresh.ip, point.ip + 1);
        let Instruction::Yield { dst, .. } = code.instructions[point.ip as usize] else {
            panic!("resume point 0 is not a yield");
        };
        assert_eq!(fresh.get(&code, dst).unwrap(), &Value::Int(7));
    }

    #[test]
    fn test_throw_and_close_raise_at_yield() {
        let code = echo();
        let point = code.resume_table.get(0).unwrap().ip;

        let mut storage = FrameStorage::new();
        let mut frame = Frame::new(code.register_count as usize);
        let exc = restore(
            &code,
            0,
            &mut storage,
            None,
            &mut frame,
            Resumption::Throw(Exception::value_error("x")),
        )
        .unwrap()
        .unwrap();
        assert!(exc.is(&ExceptionKind::ValueError));
        assert_eq!(frame.ip, point);

        let mut frame = Frame::new(code.register_count as usize);
        let exc = restore(&code, 0, &mut storage, None, &mut frame, Resumption::Close)
            .unwrap()
            .unwrap();
        assert!(exc.is(&ExceptionKind::GeneratorExit));
    }

    #[test]
    fn test_missing_resume_point_is_internal_error() {
        let code = echo();
        let mut storage = FrameStorage::new();
        let mut frame = Frame::new(code.register_count as usize);
        let err = restore(&code, 9, &mut storage, None, &mut frame, Resumption::next()).unwrap_err();
        assert!(err.is(&ExceptionKind::RuntimeError));
        assert!(err.message.starts_with("internal error"));
    }
}
