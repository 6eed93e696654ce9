use std::rc::Rc;

use super::code::{CodeObject, CodeRepr};
use super::instruction::{CodeFlags, Const, INSTRUCTION_STRIDE, Instruction, Op};
use crate::error::StructuralError;

/// Forward-referenceable jump target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

enum Pending {
    Ready(Op),
    /// Absolute-target jump, built once the label is bound.
    Jump(fn(u32) -> Op, Label),
    /// `JumpForward`, relative to the following instruction.
    Forward(Label),
}

/// Assembler for instruction streams with labels and named locals.
///
/// Declare the signature (`params`, `kwonly`, `varargs`, `varkw`) before
/// allocating other locals: slots are handed out in declaration order.
pub struct CodeBuilder {
    name: String,
    argcount: u32,
    kwonlyargcount: u32,
    flags: CodeFlags,
    varnames: Vec<String>,
    cellvars: Vec<String>,
    freevars: Vec<String>,
    pending: Vec<Pending>,
    labels: Vec<Option<usize>>,
}

impl CodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            argcount: 0,
            kwonlyargcount: 0,
            flags: CodeFlags::NONE,
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            pending: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn params(mut self, names: &[&str]) -> Self {
        self.argcount += names.len() as u32;
        self.varnames.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn kwonly(mut self, names: &[&str]) -> Self {
        self.kwonlyargcount += names.len() as u32;
        self.varnames.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn varargs(mut self, name: &str) -> Self {
        self.flags.insert(CodeFlags::VARARGS);
        self.varnames.push(name.to_string());
        self
    }

    pub fn varkw(mut self, name: &str) -> Self {
        self.flags.insert(CodeFlags::VARKEYWORDS);
        self.varnames.push(name.to_string());
        self
    }

    pub fn cellvar(mut self, name: &str) -> Self {
        self.cellvars.push(name.to_string());
        self
    }

    pub fn freevar(mut self, name: &str) -> Self {
        self.freevars.push(name.to_string());
        self
    }

    /// Slot of a local, allocating it on first use.
    pub fn local(&mut self, name: &str) -> u32 {
        match self.varnames.iter().position(|n| n == name) {
            Some(slot) => slot as u32,
            None => {
                self.varnames.push(name.to_string());
                (self.varnames.len() - 1) as u32
            }
        }
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the next emitted instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.pending.len());
        self
    }

    /// Offset the next emitted instruction will get.
    pub fn next_offset(&self) -> u32 {
        self.pending.len() as u32 * INSTRUCTION_STRIDE
    }

    pub fn emit(&mut self, op: Op) -> &mut Self {
        self.pending.push(Pending::Ready(op));
        self
    }

    pub fn emit_jump(&mut self, make: fn(u32) -> Op, target: Label) -> &mut Self {
        self.pending.push(Pending::Jump(make, target));
        self
    }

    pub fn jump_forward(&mut self, target: Label) -> &mut Self {
        self.pending.push(Pending::Forward(target));
        self
    }

    pub fn load_const(&mut self, value: impl Into<Const>) -> &mut Self {
        self.emit(Op::LoadConst(value.into()))
    }

    pub fn load_none(&mut self) -> &mut Self {
        self.emit(Op::LoadConst(Const::None))
    }

    pub fn load_code(&mut self, code: CodeObject) -> &mut Self {
        self.emit(Op::LoadConst(Const::Code(Rc::new(code))))
    }

    pub fn load_name(&mut self, name: &str) -> &mut Self {
        self.emit(Op::LoadName(name.to_string()))
    }

    pub fn store_name(&mut self, name: &str) -> &mut Self {
        self.emit(Op::StoreName(name.to_string()))
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        self.emit(Op::LoadGlobal(name.to_string()))
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let slot = self.local(name);
        self.emit(Op::LoadFast(slot))
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let slot = self.local(name);
        self.emit(Op::StoreFast(slot))
    }

    pub fn load_deref(&mut self, name: &str) -> &mut Self {
        self.emit(Op::LoadDeref(name.to_string()))
    }

    pub fn store_deref(&mut self, name: &str) -> &mut Self {
        self.emit(Op::StoreDeref(name.to_string()))
    }

    pub fn load_closure(&mut self, name: &str) -> &mut Self {
        self.emit(Op::LoadClosure(name.to_string()))
    }

    pub fn build(self) -> Result<CodeObject, StructuralError> {
        let mut instructions = Vec::with_capacity(self.pending.len());
        for (idx, pending) in self.pending.into_iter().enumerate() {
            let offset = idx as u32 * INSTRUCTION_STRIDE;
            let resolve = |label: Label| {
                self.labels[label.0]
                    .map(|at| at as u32 * INSTRUCTION_STRIDE)
                    .ok_or(StructuralError::UnknownJumpTarget {
                        at: offset,
                        target: u64::from(u32::MAX),
                    })
            };
            let op = match pending {
                Pending::Ready(op) => op,
                Pending::Jump(make, label) => make(resolve(label)?),
                Pending::Forward(label) => {
                    let target = resolve(label)?;
                    let next = offset + INSTRUCTION_STRIDE;
                    let delta = target.checked_sub(next).ok_or_else(|| StructuralError::BadOperand {
                        at: offset,
                        message: format!("forward jump to earlier offset {target}"),
                    })?;
                    Op::JumpForward(delta)
                }
            };
            instructions.push(Instruction::new(offset, op));
        }
        CodeObject::new(CodeRepr {
            name: self.name,
            argcount: self.argcount,
            kwonlyargcount: self.kwonlyargcount,
            flags: self.flags,
            varnames: self.varnames,
            cellvars: self.cellvars,
            freevars: self.freevars,
            instructions,
        })
    }
}
