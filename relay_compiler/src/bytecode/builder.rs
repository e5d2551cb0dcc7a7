//! Function builder for bytecode emission.
//!
//! The `FunctionBuilder` provides a high-level API for constructing bytecode
//! with register allocation, label resolution and resume-index numbering.
//! Liveness and the resume table are attached afterwards by the lowering
//! pass; `finish` leaves them empty.

use super::code_object::{CodeFlags, CodeObject, ExceptionEntry};
use super::instruction::{ConstIndex, Instruction, NameIndex, Register};
use super::resume::{FrameLayout, ResumeTable};
use crate::ast::{BinOp, CmpOp};
use crate::error::CompileErrorKind;
use relay_core::{Span, Value};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A label for jump targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// A forward reference to a label that needs patching.
#[derive(Debug)]
struct ForwardRef {
    /// Instruction index containing the jump.
    instruction_index: usize,
    /// The label being jumped to.
    label: Label,
}

/// Key type for constant deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    None,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
}

impl ConstantKey {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::None => Some(Self::None),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Str(s) => Some(Self::Str(s.clone())),
            // Identity-bearing values are never pooled.
            Value::Exception(_) | Value::Object(_) => None,
        }
    }
}

/// Builder for constructing code objects.
///
/// # Example
/// ```
/// use relay_compiler::bytecode::FunctionBuilder;
/// use relay_core::Value;
///
/// let mut builder = FunctionBuilder::new("answer");
/// let r0 = builder.alloc_register().unwrap();
/// let idx = builder.add_constant(Value::Int(42));
/// builder.emit_load_const(r0, idx);
/// builder.emit_return(r0);
///
/// let code = builder.finish().unwrap();
/// assert_eq!(code.instructions.len(), 2);
/// ```
pub struct FunctionBuilder {
    /// Function name.
    name: Arc<str>,
    /// Filename.
    filename: Arc<str>,
    /// Number of parameters.
    arg_count: u16,

    /// Emitted instructions.
    instructions: Vec<Instruction>,
    /// Span per instruction.
    spans: Vec<Span>,
    /// Span attached to the next emitted instruction.
    current_span: Span,

    /// Constant pool.
    constants: Vec<Value>,
    /// Constant deduplication map.
    constant_map: FxHashMap<ConstantKey, ConstIndex>,

    /// Global names.
    names: Vec<Arc<str>>,
    /// Name to index map.
    name_map: FxHashMap<Arc<str>, NameIndex>,

    /// Local names (registers `0..locals.len()`).
    locals: Vec<Arc<str>>,

    /// Code flags.
    flags: CodeFlags,

    /// Next register to allocate.
    next_register: u16,
    /// Maximum registers used (high water mark).
    max_registers: u16,
    /// Hard register limit.
    register_limit: u16,
    /// Register free list for reuse.
    free_registers: Vec<Register>,

    /// Label counter.
    next_label: u32,
    /// Label to instruction index map.
    labels: FxHashMap<Label, u32>,
    /// Forward references that need patching.
    forward_refs: Vec<ForwardRef>,

    /// Exception table entries.
    exception_entries: Vec<ExceptionEntry>,
    /// Next resume index.
    next_resume: u32,
}

impl FunctionBuilder {
    /// Create a new function builder.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            filename: "<unknown>".into(),
            arg_count: 0,
            instructions: Vec::new(),
            spans: Vec::new(),
            current_span: Span::dummy(),
            constants: Vec::new(),
            constant_map: FxHashMap::default(),
            names: Vec::new(),
            name_map: FxHashMap::default(),
            locals: Vec::new(),
            flags: CodeFlags::NONE,
            next_register: 0,
            max_registers: 0,
            register_limit: 256,
            free_registers: Vec::new(),
            next_label: 0,
            labels: FxHashMap::default(),
            forward_refs: Vec::new(),
            exception_entries: Vec::new(),
            next_resume: 0,
        }
    }

    /// Set the filename.
    pub fn set_filename(&mut self, filename: impl Into<Arc<str>>) {
        self.filename = filename.into();
    }

    /// Set the argument count.
    pub fn set_arg_count(&mut self, count: u16) {
        self.arg_count = count;
    }

    /// Lower the register limit (never above 256).
    pub fn set_register_limit(&mut self, limit: u16) {
        self.register_limit = limit.min(256);
    }

    /// Span attached to subsequently emitted instructions.
    pub fn set_span(&mut self, span: Span) {
        self.current_span = span;
    }

    /// Current span.
    #[inline]
    pub fn span(&self) -> Span {
        self.current_span
    }

    // --- Registers ---

    /// Reserve registers `0..locals.len()` for named locals.
    pub fn reserve_locals(&mut self, locals: &[Arc<str>]) -> Option<()> {
        if locals.len() > self.register_limit as usize {
            return None;
        }
        self.locals = locals.to_vec();
        self.next_register = locals.len() as u16;
        self.max_registers = self.max_registers.max(self.next_register);
        Some(())
    }

    /// Number of reserved local registers.
    #[inline]
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Allocate a temporary register.
    pub fn alloc_register(&mut self) -> Option<Register> {
        if let Some(reg) = self.free_registers.pop() {
            return Some(reg);
        }
        if self.next_register >= self.register_limit {
            return None;
        }
        let reg = Register(self.next_register as u8);
        self.next_register += 1;
        self.max_registers = self.max_registers.max(self.next_register);
        Some(reg)
    }

    /// Allocate `count` consecutive registers (never from the free list).
    pub fn alloc_register_block(&mut self, count: u8) -> Option<Register> {
        if self.next_register + u16::from(count) > self.register_limit {
            return None;
        }
        let base = Register(self.next_register.min(255) as u8);
        self.next_register += u16::from(count);
        self.max_registers = self.max_registers.max(self.next_register);
        Some(base)
    }

    /// Return a temporary register for reuse. Local registers are ignored.
    pub fn free_register(&mut self, reg: Register) {
        if (reg.0 as usize) < self.locals.len() {
            return;
        }
        debug_assert!(!self.free_registers.contains(&reg), "double free of {}", reg);
        self.free_registers.push(reg);
    }

    /// Release a block allocated by `alloc_register_block`.
    pub fn free_register_block(&mut self, base: Register, count: u8) {
        for i in 0..count {
            self.free_register(Register(base.0 + i));
        }
    }

    // --- Pools ---

    /// Add a constant, deduplicating scalars.
    pub fn add_constant(&mut self, value: Value) -> ConstIndex {
        let key = ConstantKey::from_value(&value);
        if let Some(idx) = key.as_ref().and_then(|k| self.constant_map.get(k)) {
            return *idx;
        }
        let idx = ConstIndex(self.constants.len() as u16);
        self.constants.push(value);
        if let Some(key) = key {
            self.constant_map.insert(key, idx);
        }
        idx
    }

    /// Add a name to the name table.
    pub fn add_name(&mut self, name: impl Into<Arc<str>>) -> NameIndex {
        let name = name.into();
        if let Some(idx) = self.name_map.get(&name) {
            return *idx;
        }
        let idx = NameIndex(self.names.len() as u16);
        self.names.push(name.clone());
        self.name_map.insert(name, idx);
        idx
    }

    // --- Labels ---

    /// Create a new label.
    pub fn create_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind a label to the current position.
    pub fn bind_label(&mut self, label: Label) {
        self.labels.insert(label, self.current_pc());
    }

    /// Index of the next instruction.
    #[inline]
    pub fn current_pc(&self) -> u32 {
        self.instructions.len() as u32
    }

    // --- Emission ---

    /// Emit an instruction; returns its index.
    pub fn emit(&mut self, inst: Instruction) -> u32 {
        let pc = self.current_pc();
        self.instructions.push(inst);
        self.spans.push(self.current_span);
        pc
    }

    fn emit_branch(&mut self, inst: Instruction, label: Label) {
        let instruction_index = self.instructions.len();
        self.emit(inst);
        self.forward_refs.push(ForwardRef {
            instruction_index,
            label,
        });
    }

    /// `dst = constants[idx]`
    pub fn emit_load_const(&mut self, dst: Register, idx: ConstIndex) {
        self.emit(Instruction::LoadConst { dst, idx });
    }

    /// `dst = None`
    pub fn emit_load_none(&mut self, dst: Register) {
        let idx = self.add_constant(Value::None);
        self.emit_load_const(dst, idx);
    }

    /// `dst = globals[name]`
    pub fn emit_load_global(&mut self, dst: Register, name: NameIndex) {
        self.emit(Instruction::LoadGlobal { dst, name });
    }

    /// `dst = src`
    pub fn emit_move(&mut self, dst: Register, src: Register) {
        if dst != src {
            self.emit(Instruction::Move { dst, src });
        }
    }

    /// `dst = lhs op rhs`
    pub fn emit_binary(&mut self, op: BinOp, dst: Register, lhs: Register, rhs: Register) {
        self.emit(Instruction::Binary { op, dst, lhs, rhs });
    }

    /// `dst = lhs op rhs` (comparison)
    pub fn emit_compare(&mut self, op: CmpOp, dst: Register, lhs: Register, rhs: Register) {
        self.emit(Instruction::Compare { op, dst, lhs, rhs });
    }

    /// `dst = not src`
    pub fn emit_not(&mut self, dst: Register, src: Register) {
        self.emit(Instruction::Not { dst, src });
    }

    /// Build a list from a register block.
    pub fn emit_build_list(&mut self, dst: Register, base: Register, count: u8) {
        self.emit(Instruction::BuildList { dst, base, count });
    }

    /// Call with arguments in a register block.
    pub fn emit_call(&mut self, dst: Register, func: Register, base: Register, argc: u8) {
        self.emit(Instruction::Call {
            dst,
            func,
            base,
            argc,
        });
    }

    /// `dst = iter(src)`
    pub fn emit_get_iter(&mut self, dst: Register, src: Register) {
        self.emit(Instruction::GetIter { dst, src });
    }

    /// Advance `iter` into `dst` or jump to `exit`.
    pub fn emit_for_iter(&mut self, dst: Register, iter: Register, exit: Label) {
        self.emit_branch(
            Instruction::ForIter {
                dst,
                iter,
                exit: u32::MAX,
            },
            exit,
        );
    }

    /// Unconditional jump to label.
    pub fn emit_jump(&mut self, label: Label) {
        self.emit_branch(Instruction::Jump { target: u32::MAX }, label);
    }

    /// Jump if register is falsy.
    pub fn emit_jump_if_false(&mut self, cond: Register, label: Label) {
        self.emit_branch(
            Instruction::JumpIfFalse {
                cond,
                target: u32::MAX,
            },
            label,
        );
    }

    /// Jump if register is truthy.
    pub fn emit_jump_if_true(&mut self, cond: Register, label: Label) {
        self.emit_branch(
            Instruction::JumpIfTrue {
                cond,
                target: u32::MAX,
            },
            label,
        );
    }

    /// Return from the function.
    pub fn emit_return(&mut self, src: Register) {
        self.emit(Instruction::Return { src });
    }

    /// Raise the exception in `src`.
    pub fn emit_raise(&mut self, src: Register) {
        self.emit(Instruction::Raise { src });
    }

    /// Plain suspension point; returns the resume index.
    pub fn emit_yield(&mut self, dst: Register, src: Register) -> u32 {
        let resume = self.next_resume_index();
        self.emit(Instruction::Yield { dst, src, resume });
        resume
    }

    /// Suspension inside a delegation loop; returns the resume index.
    pub fn emit_yield_delegated(&mut self, src: Register) -> u32 {
        let resume = self.next_resume_index();
        self.flags = self.flags.with(CodeFlags::DELEGATES);
        self.emit(Instruction::YieldDelegated { src, resume });
        resume
    }

    fn next_resume_index(&mut self) -> u32 {
        let resume = self.next_resume;
        self.next_resume += 1;
        self.flags = self.flags.with(CodeFlags::GENERATOR);
        resume
    }

    /// Number of resume indices handed out.
    #[inline]
    pub fn resume_count(&self) -> u32 {
        self.next_resume
    }

    /// Add an entry to the exception table.
    pub fn add_exception_entry(&mut self, entry: ExceptionEntry) {
        self.exception_entries.push(entry);
    }

    /// Mark the code as a generator even if no suspension was emitted yet.
    pub fn mark_generator(&mut self) {
        self.flags = self.flags.with(CodeFlags::GENERATOR);
    }

    /// Patch labels and produce the code object.
    pub fn finish(mut self) -> Result<CodeObject, CompileErrorKind> {
        for fwd in &self.forward_refs {
            let target = *self
                .labels
                .get(&fwd.label)
                .ok_or_else(|| CompileErrorKind::Internal(format!("unbound label {:?}", fwd.label)))?;
            if let Some(slot) = self.instructions[fwd.instruction_index].jump_target_mut() {
                *slot = target;
            }
        }

        Ok(CodeObject {
            name: self.name,
            filename: self.filename,
            arg_count: self.arg_count,
            register_count: self.max_registers,
            instructions: self.instructions.into_boxed_slice(),
            spans: self.spans.into_boxed_slice(),
            constants: self.constants.into_boxed_slice(),
            names: self.names.into_boxed_slice(),
            locals: self.locals.into_boxed_slice(),
            exception_table: self.exception_entries.into_boxed_slice(),
            flags: self.flags,
            resume_table: ResumeTable::new(),
            frame_layout: FrameLayout::default(),
        })
    }
}
