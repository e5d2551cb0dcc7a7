//! Compiled functions.

use super::instruction::{Instruction, Register};
use super::resume::{FrameLayout, ResumeTable};
use relay_core::{Span, Value};
use std::fmt::Write as _;
use std::sync::Arc;

/// Code object flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CodeFlags(u32);

impl CodeFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Body contains suspension points; calling it creates a generator.
    pub const GENERATOR: Self = Self(1 << 0);
    /// Body contains at least one `yield from`.
    pub const DELEGATES: Self = Self(1 << 1);

    /// Returns true if every bit of `other` is set.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    #[inline]
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// One protected range of the exception table.
///
/// Entries are ordered innermost first; the first entry covering a pc wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// First protected instruction.
    pub start_pc: u32,
    /// One past the last protected instruction.
    pub end_pc: u32,
    /// Handler entry point.
    pub handler_pc: u32,
    /// Handled-exception stack depth to restore before entering the handler.
    pub depth: u16,
}

impl ExceptionEntry {
    /// Returns true if `pc` is protected by this entry.
    #[inline]
    pub const fn covers(&self, pc: u32) -> bool {
        self.start_pc <= pc && pc < self.end_pc
    }
}

/// A compiled function.
#[derive(Debug, Clone)]
pub struct CodeObject {
    /// Function name.
    pub name: Arc<str>,
    /// Source file name.
    pub filename: Arc<str>,
    /// Number of positional parameters (bound to `r0..`).
    pub arg_count: u16,
    /// Size of the register file.
    pub register_count: u16,
    /// Bytecode.
    pub instructions: Box<[Instruction]>,
    /// Source span per instruction.
    pub spans: Box<[Span]>,
    /// Constant pool.
    pub constants: Box<[Value]>,
    /// Global and exception class names.
    pub names: Box<[Arc<str>]>,
    /// Local names; index is the register.
    pub locals: Box<[Arc<str>]>,
    /// Protected ranges.
    pub exception_table: Box<[ExceptionEntry]>,
    /// Code flags.
    pub flags: CodeFlags,
    /// Suspension points, by resume index.
    pub resume_table: ResumeTable,
    /// Saved-frame shape.
    pub frame_layout: FrameLayout,
}

impl CodeObject {
    /// Whether calling this code creates a generator.
    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    /// Innermost exception entry covering `pc`.
    #[inline]
    pub fn handler_for(&self, pc: u32) -> Option<&ExceptionEntry> {
        self.exception_table.iter().find(|entry| entry.covers(pc))
    }

    /// Name of a local register, if it is one.
    #[inline]
    pub fn local_name(&self, reg: Register) -> Option<&str> {
        self.locals.get(reg.0 as usize).map(|name| name.as_ref())
    }

    /// Source span of an instruction.
    #[inline]
    pub fn span_at(&self, pc: u32) -> relay_core::Span {
        self.spans.get(pc as usize).copied().unwrap_or_default()
    }

    /// Human-readable listing.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "code {} (args={}, registers={}, resume_points={})",
            self.name,
            self.arg_count,
            self.register_count,
            self.resume_table.len()
        );
        for (pc, inst) in self.instructions.iter().enumerate() {
            let _ = writeln!(out, "{:>4}  {}", pc, inst);
        }
        for entry in self.exception_table.iter() {
            let _ = writeln!(
                out,
                "  try [{}, {}) -> {} depth={}",
                entry.start_pc, entry.end_pc, entry.handler_pc, entry.depth
            );
        }
        for (k, point) in self.resume_table.iter().enumerate() {
            let _ = writeln!(out, "  resume #{} @{} saves {:?}", k, point.ip, point.liveness);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = CodeFlags::GENERATOR.with(CodeFlags::DELEGATES);
        assert!(flags.contains(CodeFlags::GENERATOR));
        assert!(flags.contains(CodeFlags::DELEGATES));
        assert!(!CodeFlags::NONE.contains(CodeFlags::GENERATOR));
    }

    #[test]
    fn test_entry_covers_half_open() {
        let entry = ExceptionEntry {
            start_pc: 2,
            end_pc: 5,
            handler_pc: 9,
            depth: 0,
        };
        assert!(!entry.covers(1));
        assert!(entry.covers(2));
        assert!(entry.covers(4));
        assert!(!entry.covers(5));
    }
}
