//! Bytecode compiler and generator lowering for relay.
//!
//! # Architecture
//!
//! ```text
//! AST → Suspension Checks → Scope Analysis → Bytecode Emission
//!     → Liveness → Resume Table + Frame Layout → CodeObject
//! ```
//!
//! A function whose body contains `yield` or `yield from` is lowered into a
//! resumable state machine. Its [`CodeObject`] carries a [`ResumeTable`]
//! mapping each dense resume index to the instruction it re-enters and the
//! registers saved across it.
//!
//! # Example
//!
//! ```
//! use relay_compiler::ast::{Expr, FunctionDef, Stmt};
//! use relay_compiler::{CompilerConfig, lower_function};
//!
//! let def = FunctionDef::new(
//!     "count",
//!     &["n"],
//!     vec![
//!         Stmt::expr(Expr::yield_value(Expr::name("n"))),
//!         Stmt::expr(Expr::yield_value(Expr::add(Expr::name("n"), Expr::int(1)))),
//!     ],
//! );
//! let code = lower_function(&def, &CompilerConfig::default()).unwrap();
//! assert!(code.is_generator());
//! assert_eq!(code.resume_table.len(), 2);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod bytecode;
mod compiler;
pub mod config;
pub mod error;
pub mod liveness;
pub mod lower;
pub mod scope;

pub use bytecode::{
    CodeFlags, CodeObject, ConstIndex, ExceptionEntry, FrameLayout, FunctionBuilder, Instruction, Label,
    NameIndex, Register, ResumePoint, ResumeTable,
};
pub use config::CompilerConfig;
pub use error::{CompileError, CompileErrorKind, CompileResult};
pub use liveness::{LivenessAnalysis, LivenessMap};
pub use lower::{compile_module, lower_function};
pub use scope::FunctionScope;
