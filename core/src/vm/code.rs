use serde::{Deserialize, Serialize};

use super::instruction::{CodeFlags, Const, Instruction, Op};
use crate::error::StructuralError;
use crate::util::fast_map::{FastHashMap, fast_hash_map_with_capacity};

/// Serialized shape of a code object, validated into [`CodeObject`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeRepr {
    pub name: String,
    pub argcount: u32,
    pub kwonlyargcount: u32,
    pub flags: CodeFlags,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub instructions: Vec<Instruction>,
}

/// A validated instruction stream plus its signature metadata.
///
/// Locals are addressed by slot: `varnames[..argcount]` are the positional
/// parameters, followed by `kwonlyargcount` keyword-only parameters, then the
/// `*args` and `**kwargs` slots when the corresponding flags are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CodeRepr")]
pub struct CodeObject {
    pub name: String,
    pub argcount: u32,
    pub kwonlyargcount: u32,
    pub flags: CodeFlags,
    pub varnames: Vec<String>,
    pub cellvars: Vec<String>,
    pub freevars: Vec<String>,
    pub instructions: Vec<Instruction>,
    #[serde(skip)]
    index: FastHashMap<u32, usize>,
}

impl PartialEq for CodeObject {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.argcount == other.argcount
            && self.kwonlyargcount == other.kwonlyargcount
            && self.flags == other.flags
            && self.varnames == other.varnames
            && self.cellvars == other.cellvars
            && self.freevars == other.freevars
            && self.instructions == other.instructions
    }
}

impl TryFrom<CodeRepr> for CodeObject {
    type Error = StructuralError;

    fn try_from(repr: CodeRepr) -> Result<Self, Self::Error> {
        CodeObject::new(repr)
    }
}

impl CodeObject {
    /// Validates offsets, jump targets, local slots and the signature.
    pub fn new(repr: CodeRepr) -> Result<Self, StructuralError> {
        let CodeRepr {
            name,
            argcount,
            kwonlyargcount,
            flags,
            varnames,
            cellvars,
            freevars,
            instructions,
        } = repr;

        let mut index = fast_hash_map_with_capacity(instructions.len());
        let mut previous: Option<u32> = None;
        for (idx, instr) in instructions.iter().enumerate() {
            if let Some(previous) = previous
                && instr.offset <= previous
            {
                return Err(StructuralError::NonIncreasingOffset {
                    previous,
                    offset: instr.offset,
                });
            }
            previous = Some(instr.offset);
            index.insert(instr.offset, idx);
        }

        let code = Self {
            name,
            argcount,
            kwonlyargcount,
            flags,
            varnames,
            cellvars,
            freevars,
            instructions,
            index,
        };
        code.validate()?;
        Ok(code)
    }

    fn validate(&self) -> Result<(), StructuralError> {
        let params = self.argcount as usize
            + self.kwonlyargcount as usize
            + usize::from(self.has_varargs())
            + usize::from(self.has_varkw());
        if params > self.varnames.len() {
            return Err(StructuralError::BadSignature {
                code: self.name.clone(),
                message: format!("{params} parameters but only {} local slots", self.varnames.len()),
            });
        }
        for instr in &self.instructions {
            if let Some(target) = instr.jump_target()
                && !u32::try_from(target).is_ok_and(|t| self.index.contains_key(&t))
            {
                return Err(StructuralError::UnknownJumpTarget {
                    at: instr.offset,
                    target,
                });
            }
            match &instr.op {
                Op::LoadFast(slot) | Op::StoreFast(slot) | Op::DeleteFast(slot)
                    if *slot as usize >= self.varnames.len() =>
                {
                    return Err(StructuralError::UnknownSlot {
                        at: instr.offset,
                        slot: *slot,
                    });
                }
                Op::LoadClosure(name) | Op::LoadDeref(name) | Op::StoreDeref(name) | Op::DeleteDeref(name)
                    if !self.is_cell_name(name) =>
                {
                    return Err(StructuralError::UnknownCell {
                        at: instr.offset,
                        name: name.clone(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn has_varargs(&self) -> bool {
        self.flags.contains(CodeFlags::VARARGS)
    }

    pub fn has_varkw(&self) -> bool {
        self.flags.contains(CodeFlags::VARKEYWORDS)
    }

    pub fn is_cell_name(&self, name: &str) -> bool {
        self.cellvars.iter().chain(self.freevars.iter()).any(|n| n == name)
    }

    /// Instruction index of `offset`.
    #[inline]
    pub fn index_of(&self, offset: u32) -> Option<usize> {
        self.index.get(&offset).copied()
    }

    /// Slot of a named local, if it has one.
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.varnames.iter().position(|n| n == name)
    }

    /// Nested code objects reachable through `LoadConst`.
    pub fn nested(&self) -> impl Iterator<Item = &CodeObject> {
        self.instructions.iter().filter_map(|instr| match &instr.op {
            Op::LoadConst(Const::Code(code)) => Some(code.as_ref()),
            _ => None,
        })
    }

    /// Human-readable listing, nested code objects included.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out);
        out
    }

    fn disassemble_into(&self, out: &mut String) {
        out.push_str(&format!(
            "code {} (args={}, kwonly={}, flags={:#x})\n",
            self.name,
            self.argcount,
            self.kwonlyargcount,
            self.flags.bits()
        ));
        if !self.varnames.is_empty() {
            out.push_str(&format!("  varnames: {}\n", self.varnames.join(", ")));
        }
        if !self.cellvars.is_empty() {
            out.push_str(&format!("  cellvars: {}\n", self.cellvars.join(", ")));
        }
        if !self.freevars.is_empty() {
            out.push_str(&format!("  freevars: {}\n", self.freevars.join(", ")));
        }
        for instr in &self.instructions {
            out.push_str(&format!("{}\n", instr.to_string().trim_end()));
        }
        for nested in self.nested() {
            out.push('\n');
            nested.disassemble_into(out);
        }
    }
}
