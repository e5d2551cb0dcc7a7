//! # Relay VM
//!
//! Register-based interpreter and generator runtime for relay.
//!
//! ## Architecture
//!
//! - **VirtualMachine**: loads compiled modules and exposes globals to the host
//! - **Interpreter**: one dispatch loop per activation, table-driven exception handling
//! - **Generators**: resumable objects driven by `advance`/`send`/`throw`/`close`
//! - **Delegation**: `yield from` forwarding into nested iterators
//!
//! ## Example
//!
//! ```
//! use relay_compiler::ast::{Expr, FunctionDef, Module, Stmt};
//! use relay_core::{IterResult, Value};
//! use relay_vm::VirtualMachine;
//!
//! let mut vm = VirtualMachine::default();
//! vm.load(&Module::new(vec![FunctionDef::new(
//!     "pair",
//!     &[],
//!     vec![
//!         Stmt::expr(Expr::yield_value(Expr::int(1))),
//!         Stmt::expr(Expr::yield_value(Expr::int(2))),
//!     ],
//! )]))
//! .unwrap();
//!
//! let g = vm.generator("pair", vec![]).unwrap();
//! assert_eq!(g.advance().unwrap(), IterResult::Yielded(Value::Int(1)));
//! assert_eq!(g.advance().unwrap(), IterResult::Yielded(Value::Int(2)));
//! assert_eq!(g.advance().unwrap(), IterResult::Returned(Value::None));
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builtins;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod function;
pub mod generator;
mod interpreter;
pub mod tracing_config;
pub mod vm;

pub use config::VmConfig;
pub use context::VmContext;
pub use error::{GeneratorError, VmError, VmResult};
pub use function::Function;
pub use generator::{GeneratorObject, GeneratorState, Resumption};
pub use tracing_config::init_tracing;
pub use vm::VirtualMachine;
