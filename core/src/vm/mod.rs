//! Stack-frame engine
//!
//! Instruction streams, code objects, frames with their block stacks,
//! closure cells and the dispatch loop that executes them.

mod builder;
mod call;
mod cell;
mod code;
mod collections;
mod config;
mod engine;
mod frame;
mod function;
mod instruction;
mod program;
mod unwind;

pub use builder::{CodeBuilder, Label};
pub use cell::Cell;
pub use code::{CodeObject, CodeRepr};
pub use config::{DEFAULT_MAX_FRAMES, EngineConfig, InterruptHandle};
pub use engine::{Engine, Progress};
pub use frame::{Block, BlockKind, Frame, FrameInfo, Namespace, new_namespace};
pub use function::FunctionValue;
pub use instruction::{CodeFlags, Const, FunctionFlags, INSTRUCTION_STRIDE, Instruction, Op};
pub use program::Program;
pub use unwind::Signal;

#[cfg(test)]
mod vm_test;
