//! # Relay Core
//!
//! Shared building blocks for the relay generator engine:
//!
//! - **Value System**: dynamically typed guest values ([`Value`])
//! - **Exceptions**: the guest exception hierarchy ([`Exception`], [`ExceptionKind`])
//! - **Capabilities**: the optional get-iter/next/send/throw/close/call
//!   interface every heap object implements ([`Object`])
//! - **Spans**: source locations carried into diagnostics

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod protocol;
pub mod span;
pub mod value;

pub use error::{Exception, ExceptionKind};
pub use protocol::{IterResult, Object, Slot};
pub use span::Span;
pub use value::Value;

/// Relay runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
