//! Register-based bytecode instructions.
//!
//! Every instruction names its operands explicitly so the liveness pass
//! can read uses and definitions without decoding. Jump targets are
//! absolute instruction indices, patched from labels by the builder.
//!
//! # Suspension Instructions
//!
//! ```text
//! Yield          dst, src, #k    suspend with src; resumption lands in dst
//! BeginDelegate  src             get-iter(src) into the active delegate slot
//! DelegateStep   value, done     forward the pending resumption to the delegate
//! YieldDelegated src, #k         suspend with the delegate's value
//! ```

use crate::ast::{BinOp, CmpOp};
use smallvec::SmallVec;
use std::fmt;

/// A register index (0-255).
///
/// Locals occupy the low registers; temporaries are allocated above them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Register(pub u8);

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A constant pool index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ConstIndex(pub u16);

/// A name table index (globals, exception class names).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct NameIndex(pub u16);

/// Register operands of one instruction.
pub type RegisterList = SmallVec<[Register; 4]>;

/// A bytecode instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// No operation.
    Nop,
    /// `dst = constants[idx]`
    LoadConst {
        /// Destination.
        dst: Register,
        /// Constant index.
        idx: ConstIndex,
    },
    /// `dst = globals[names[name]]`
    LoadGlobal {
        /// Destination.
        dst: Register,
        /// Name index.
        name: NameIndex,
    },
    /// `dst = src`
    Move {
        /// Destination.
        dst: Register,
        /// Source.
        src: Register,
    },
    /// `dst = lhs op rhs`
    Binary {
        /// Operator.
        op: BinOp,
        /// Destination.
        dst: Register,
        /// Left operand.
        lhs: Register,
        /// Right operand.
        rhs: Register,
    },
    /// `dst = lhs op rhs` (comparison)
    Compare {
        /// Operator.
        op: CmpOp,
        /// Destination.
        dst: Register,
        /// Left operand.
        lhs: Register,
        /// Right operand.
        rhs: Register,
    },
    /// `dst = not src`
    Not {
        /// Destination.
        dst: Register,
        /// Operand.
        src: Register,
    },
    /// `dst = [base, base+1, ..., base+count-1]`
    BuildList {
        /// Destination.
        dst: Register,
        /// First item register.
        base: Register,
        /// Item count.
        count: u8,
    },
    /// `dst = func(base, ..., base+argc-1)`
    Call {
        /// Destination.
        dst: Register,
        /// Callee.
        func: Register,
        /// First argument register.
        base: Register,
        /// Argument count.
        argc: u8,
    },
    /// `dst = iter(src)`
    GetIter {
        /// Destination.
        dst: Register,
        /// Iterable.
        src: Register,
    },
    /// `dst = next(iter)`, or jump to `exit` when exhausted.
    ForIter {
        /// Destination for the next item.
        dst: Register,
        /// Iterator.
        iter: Register,
        /// Exit target.
        exit: u32,
    },
    /// Unconditional jump.
    Jump {
        /// Target.
        target: u32,
    },
    /// Jump when `cond` is falsy.
    JumpIfFalse {
        /// Condition.
        cond: Register,
        /// Target.
        target: u32,
    },
    /// Jump when `cond` is truthy.
    JumpIfTrue {
        /// Condition.
        cond: Register,
        /// Target.
        target: u32,
    },
    /// Return `src` to the caller (completes a generator).
    Return {
        /// Returned value.
        src: Register,
    },
    /// Raise the exception held in `src`.
    Raise {
        /// Exception value.
        src: Register,
    },
    /// Pop the innermost handled exception and raise it again.
    Reraise,
    /// Push the in-flight exception onto the handled stack.
    PushExcInfo,
    /// Pop the handled stack.
    PopExcInfo,
    /// `dst = innermost handled exception`
    LoadException {
        /// Destination.
        dst: Register,
    },
    /// `dst = innermost handled exception matches names[kind]`
    MatchException {
        /// Destination.
        dst: Register,
        /// Exception class name.
        kind: NameIndex,
    },
    /// Suspension primitive: emit `src`, receive the resumption into `dst`.
    Yield {
        /// Resumption value destination.
        dst: Register,
        /// Yielded value.
        src: Register,
        /// Resume point index.
        resume: u32,
    },
    /// Start delegating to `iter(src)`.
    BeginDelegate {
        /// Iterable.
        src: Register,
    },
    /// Drive the active delegate one step.
    DelegateStep {
        /// Yielded or final value.
        value: Register,
        /// Set to `True` once the delegate is exhausted.
        done: Register,
    },
    /// Suspend with a delegate-produced value; resumption goes to the delegate.
    YieldDelegated {
        /// Value produced by the delegate.
        src: Register,
        /// Resume point index.
        resume: u32,
    },
}

impl Instruction {
    /// Registers read by this instruction.
    pub fn uses(&self) -> RegisterList {
        let mut regs = RegisterList::new();
        match *self {
            Self::Move { src, .. }
            | Self::Not { src, .. }
            | Self::GetIter { src, .. }
            | Self::Return { src }
            | Self::Raise { src }
            | Self::Yield { src, .. }
            | Self::BeginDelegate { src }
            | Self::YieldDelegated { src, .. } => regs.push(src),
            Self::Binary { lhs, rhs, .. } | Self::Compare { lhs, rhs, .. } => {
                regs.push(lhs);
                regs.push(rhs);
            }
            Self::BuildList { base, count, .. } => {
                regs.extend((0..count).map(|i| Register(base.0 + i)));
            }
            Self::Call {
                func, base, argc, ..
            } => {
                regs.push(func);
                regs.extend((0..argc).map(|i| Register(base.0 + i)));
            }
            Self::ForIter { iter, .. } => regs.push(iter),
            Self::JumpIfFalse { cond, .. } | Self::JumpIfTrue { cond, .. } => regs.push(cond),
            Self::Nop
            | Self::LoadConst { .. }
            | Self::LoadGlobal { .. }
            | Self::Jump { .. }
            | Self::Reraise
            | Self::PushExcInfo
            | Self::PopExcInfo
            | Self::LoadException { .. }
            | Self::MatchException { .. }
            | Self::DelegateStep { .. } => {}
        }
        regs
    }

    /// Registers written when the instruction completes normally.
    pub fn defs(&self) -> RegisterList {
        let mut regs = RegisterList::new();
        match *self {
            Self::LoadConst { dst, .. }
            | Self::LoadGlobal { dst, .. }
            | Self::Move { dst, .. }
            | Self::Binary { dst, .. }
            | Self::Compare { dst, .. }
            | Self::Not { dst, .. }
            | Self::BuildList { dst, .. }
            | Self::Call { dst, .. }
            | Self::GetIter { dst, .. }
            | Self::ForIter { dst, .. }
            | Self::LoadException { dst }
            | Self::MatchException { dst, .. }
            | Self::Yield { dst, .. } => regs.push(dst),
            Self::DelegateStep { value, done } => {
                regs.push(value);
                regs.push(done);
            }
            Self::Nop
            | Self::Jump { .. }
            | Self::JumpIfFalse { .. }
            | Self::JumpIfTrue { .. }
            | Self::Return { .. }
            | Self::Raise { .. }
            | Self::Reraise
            | Self::PushExcInfo
            | Self::PopExcInfo
            | Self::BeginDelegate { .. }
            | Self::YieldDelegated { .. } => {}
        }
        regs
    }

    /// Branch target, if the instruction can jump.
    #[inline]
    pub fn jump_target(&self) -> Option<u32> {
        match *self {
            Self::Jump { target }
            | Self::JumpIfFalse { target, .. }
            | Self::JumpIfTrue { target, .. } => Some(target),
            Self::ForIter { exit, .. } => Some(exit),
            _ => None,
        }
    }

    /// Mutable branch target, used by label patching.
    #[inline]
    pub(crate) fn jump_target_mut(&mut self) -> Option<&mut u32> {
        match self {
            Self::Jump { target }
            | Self::JumpIfFalse { target, .. }
            | Self::JumpIfTrue { target, .. } => Some(target),
            Self::ForIter { exit, .. } => Some(exit),
            _ => None,
        }
    }

    /// Whether execution can continue at the next instruction.
    #[inline]
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Self::Jump { .. } | Self::Return { .. } | Self::Raise { .. } | Self::Reraise
        )
    }

    /// Resume point index for suspension instructions.
    #[inline]
    pub fn resume_index(&self) -> Option<u32> {
        match *self {
            Self::Yield { resume, .. } | Self::YieldDelegated { resume, .. } => Some(resume),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Nop => write!(f, "Nop"),
            Self::LoadConst { dst, idx } => write!(f, "LoadConst {}, #{}", dst, idx.0),
            Self::LoadGlobal { dst, name } => write!(f, "LoadGlobal {}, @{}", dst, name.0),
            Self::Move { dst, src } => write!(f, "Move {}, {}", dst, src),
            Self::Binary { op, dst, lhs, rhs } => {
                write!(f, "Binary {} {}, {}, {}", op.symbol(), dst, lhs, rhs)
            }
            Self::Compare { op, dst, lhs, rhs } => {
                write!(f, "Compare {} {}, {}, {}", op.symbol(), dst, lhs, rhs)
            }
            Self::Not { dst, src } => write!(f, "Not {}, {}", dst, src),
            Self::BuildList { dst, base, count } => {
                write!(f, "BuildList {}, {}..+{}", dst, base, count)
            }
            Self::Call {
                dst,
                func,
                base,
                argc,
            } => write!(f, "Call {}, {}({}..+{})", dst, func, base, argc),
            Self::GetIter { dst, src } => write!(f, "GetIter {}, {}", dst, src),
            Self::ForIter { dst, iter, exit } => write!(f, "ForIter {}, {} -> {}", dst, iter, exit),
            Self::Jump { target } => write!(f, "Jump -> {}", target),
            Self::JumpIfFalse { cond, target } => write!(f, "JumpIfFalse {} -> {}", cond, target),
            Self::JumpIfTrue { cond, target } => write!(f, "JumpIfTrue {} -> {}", cond, target),
            Self::Return { src } => write!(f, "Return {}", src),
            Self::Raise { src } => write!(f, "Raise {}", src),
            Self::Reraise => write!(f, "Reraise"),
            Self::PushExcInfo => write!(f, "PushExcInfo"),
            Self::PopExcInfo => write!(f, "PopExcInfo"),
            Self::LoadException { dst } => write!(f, "LoadException {}", dst),
            Self::MatchException { dst, kind } => write!(f, "MatchException {}, @{}", dst, kind.0),
            Self::Yield { dst, src, resume } => write!(f, "Yield {}, {} #{}", dst, src, resume),
            Self::BeginDelegate { src } => write!(f, "BeginDelegate {}", src),
            Self::DelegateStep { value, done } => write!(f, "DelegateStep {}, {}", value, done),
            Self::YieldDelegated { src, resume } => {
                write!(f, "YieldDelegated {} #{}", src, resume)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_uses_argument_block() {
        let call = Instruction::Call {
            dst: Register(9),
            func: Register(4),
            base: Register(5),
            argc: 3,
        };
        assert_eq!(
            call.uses().as_slice(),
            &[Register(4), Register(5), Register(6), Register(7)]
        );
        assert_eq!(call.defs().as_slice(), &[Register(9)]);
    }

    #[test]
    fn test_suspension_operands() {
        let y = Instruction::Yield {
            dst: Register(2),
            src: Register(1),
            resume: 0,
        };
        assert_eq!(y.uses().as_slice(), &[Register(1)]);
        assert_eq!(y.defs().as_slice(), &[Register(2)]);
        assert_eq!(y.resume_index(), Some(0));

        let step = Instruction::DelegateStep {
            value: Register(3),
            done: Register(4),
        };
        assert!(step.uses().is_empty());
        assert_eq!(step.defs().len(), 2);
    }

    #[test]
    fn test_control_flow_shape() {
        assert!(!Instruction::Return { src: Register(0) }.falls_through());
        assert!(!Instruction::Reraise.falls_through());
        assert!(Instruction::JumpIfTrue {
            cond: Register(0),
            target: 7
        }
        .falls_through());
        assert_eq!(Instruction::Jump { target: 3 }.jump_target(), Some(3));
    }

    #[test]
    fn test_display() {
        let inst = Instruction::Binary {
            op: BinOp::Add,
            dst: Register(2),
            lhs: Register(0),
            rhs: Register(1),
        };
        assert_eq!(inst.to_string(), "Binary + r2, r0, r1");
    }
}
