use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use super::cell::Cell;
use super::code::CodeObject;
use crate::error::StructuralError;
use crate::util::fast_map::{FastHashMap, fast_hash_map_new};
use crate::val::Val;

/// A name-keyed variable scope. Globals are shared by every frame of a run.
pub type Namespace = Rc<RefCell<FastHashMap<String, Val>>>;

pub fn new_namespace() -> Namespace {
    Rc::new(RefCell::new(fast_hash_map_new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BlockKind {
    Loop,
    ExceptGuard,
    FinallyGuard,
    /// Marks a running `except` body; its three stack slots hold the
    /// previously handled exception.
    ExceptHandler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Block {
    pub kind: BlockKind,
    /// Where a consumed signal resumes; for loops this is the region end.
    pub handler: u32,
    /// Operand stack depth when the region was entered.
    pub level: usize,
}

/// One activation record.
#[derive(Debug)]
pub struct Frame {
    pub(crate) code: Rc<CodeObject>,
    pub(crate) stack: Vec<Val>,
    /// Slot-addressed locals, indexed like `code.varnames`.
    pub(crate) fast: Vec<Option<Val>>,
    /// Name-addressed locals; the module frame aliases its globals here.
    pub(crate) locals: Namespace,
    pub(crate) globals: Namespace,
    pub(crate) cells: FastHashMap<String, Cell>,
    pub(crate) blocks: Vec<Block>,
    /// Index of the next instruction to execute.
    pub(crate) ip: usize,
    /// Offset of the instruction being executed.
    pub(crate) offset: u32,
}

impl Frame {
    /// Root frame: locals and globals are the same namespace.
    pub(crate) fn module(code: Rc<CodeObject>, globals: Namespace) -> Self {
        let cells = code.cellvars.iter().map(|name| (name.clone(), Cell::new())).collect();
        let fast = vec![None; code.varnames.len()];
        Self {
            code,
            stack: Vec::new(),
            fast,
            locals: globals.clone(),
            globals,
            cells,
            blocks: Vec::new(),
            ip: 0,
            offset: 0,
        }
    }

    /// Function frame over already-bound argument slots.
    ///
    /// Cell variables get fresh cells (seeded from a parameter of the same
    /// name); free variables reuse the closure's cells.
    pub(crate) fn function(
        code: Rc<CodeObject>,
        globals: Namespace,
        fast: Vec<Option<Val>>,
        closure: &[(String, Cell)],
    ) -> Self {
        let mut cells: FastHashMap<String, Cell> = fast_hash_map_new();
        for name in &code.cellvars {
            let cell = match code.slot_of(name).and_then(|slot| fast[slot].clone()) {
                Some(value) => Cell::with_value(value),
                None => Cell::new(),
            };
            cells.insert(name.clone(), cell);
        }
        for (name, cell) in closure {
            cells.insert(name.clone(), cell.clone());
        }
        Self {
            code,
            stack: Vec::new(),
            fast,
            locals: new_namespace(),
            globals,
            cells,
            blocks: Vec::new(),
            ip: 0,
            offset: 0,
        }
    }

    pub fn code(&self) -> &CodeObject {
        &self.code
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    #[inline]
    pub(crate) fn push(&mut self, value: Val) {
        self.stack.push(value);
    }

    fn underflow(&self, wanted: usize) -> StructuralError {
        StructuralError::StackUnderflow {
            at: self.offset,
            wanted,
            depth: self.stack.len(),
        }
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Result<Val, StructuralError> {
        self.stack.pop().ok_or_else(|| self.underflow(1))
    }

    /// Pops `n` values, returned bottom-first.
    pub(crate) fn pop_n(&mut self, n: usize) -> Result<Vec<Val>, StructuralError> {
        if n > self.stack.len() {
            return Err(self.underflow(n));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    /// Value `depth` slots below the top (0 = top).
    pub(crate) fn peek(&self, depth: usize) -> Result<&Val, StructuralError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .map(|idx| &self.stack[idx])
            .ok_or_else(|| self.underflow(depth + 1))
    }

    /// Moves the top value down to position `n` (1 = top), lifting the
    /// values above it.
    pub(crate) fn rotate(&mut self, n: usize) -> Result<(), StructuralError> {
        if n > self.stack.len() {
            return Err(self.underflow(n));
        }
        let at = self.stack.len() - n;
        self.stack[at..].rotate_right(1);
        Ok(())
    }

    pub(crate) fn truncate(&mut self, level: usize) {
        self.stack.truncate(level);
    }

    pub(crate) fn jump(&mut self, target: u32) -> Result<(), StructuralError> {
        self.ip = self.code.index_of(target).ok_or(StructuralError::UnknownJumpTarget {
            at: self.offset,
            target: target.into(),
        })?;
        Ok(())
    }

    pub(crate) fn push_block(&mut self, kind: BlockKind, handler: u32) {
        self.blocks.push(Block {
            kind,
            handler,
            level: self.stack.len(),
        });
    }

    pub(crate) fn pop_block(&mut self) -> Result<Block, StructuralError> {
        self.blocks
            .pop()
            .ok_or(StructuralError::BlockUnderflow { at: self.offset })
    }

    pub(crate) fn cell(&self, name: &str) -> Result<&Cell, StructuralError> {
        self.cells.get(name).ok_or_else(|| StructuralError::UnknownCell {
            at: self.offset,
            name: name.to_string(),
        })
    }

    /// Slot-addressed local looked up by name, used by name-based loads in
    /// function frames.
    pub(crate) fn fast_by_name(&self, name: &str) -> Option<Val> {
        self.code.slot_of(name).and_then(|slot| self.fast[slot].clone())
    }

    pub(crate) fn info(&self) -> FrameInfo {
        FrameInfo {
            name: self.code.name.clone(),
            offset: self.offset,
            stack_depth: self.stack.len(),
            blocks: self.blocks.clone(),
        }
    }
}

/// Snapshot of a live frame for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameInfo {
    pub name: String,
    pub offset: u32,
    pub stack_depth: usize,
    pub blocks: Vec<Block>,
}
