//! Bytecode definitions: instructions, code objects, resume tables and the
//! function builder.

mod builder;
mod code_object;
mod instruction;
mod resume;

pub use builder::{FunctionBuilder, Label};
pub use code_object::{CodeFlags, CodeObject, ExceptionEntry};
pub use instruction::{ConstIndex, Instruction, NameIndex, Register, RegisterList};
pub use resume::{
    FrameLayout, MAX_RESUME_POINTS, ResumePoint, ResumeTable, ResumeTableBuilder,
};
