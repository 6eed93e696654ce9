//! Block-stack unwinding.
//!
//! A pending signal walks the current frame's block stack from the top.
//! Each block either consumes it (and execution resumes at its handler) or is
//! discarded after restoring the operand stack to its entry depth. A signal
//! that survives the whole stack leaves the frame.

use std::rc::Rc;

use tracing::debug;

use super::frame::{BlockKind, Frame};
use crate::error::StructuralError;
use crate::val::{ExcRef, Val};

/// Control flow propagating through blocks and frames.
#[derive(Debug, Clone)]
pub enum Signal {
    Return(Val),
    Break,
    /// Restart the innermost loop at the given offset.
    Continue(u32),
    Raise(ExcRef),
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Return(_) => "return",
            Signal::Break => "break",
            Signal::Continue(_) => "continue",
            Signal::Raise(_) => "raise",
        }
    }
}

fn exception_triple(exc: Option<&ExcRef>) -> [Val; 3] {
    match exc {
        Some(exc) => [Val::None, Val::Exception(exc.clone()), Val::ExcType(exc.kind())],
        None => [Val::None, Val::None, Val::None],
    }
}

/// Pops an `ExceptHandler` block's saved triple and reinstates it as the
/// handled exception.
pub(crate) fn restore_handled(
    frame: &mut Frame,
    level: usize,
    handled: &mut Option<ExcRef>,
) -> Result<(), StructuralError> {
    frame.truncate(level + 3);
    let saved = frame.pop_n(3)?;
    *handled = match &saved[1] {
        Val::Exception(exc) => Some(exc.clone()),
        _ => None,
    };
    Ok(())
}

/// Drains `signal` through `frame`'s blocks.
///
/// Returns `None` once a block consumed it, or the signal itself when the
/// block stack ran out and it must leave the frame.
pub(crate) fn unwind(
    frame: &mut Frame,
    mut signal: Signal,
    handled: &mut Option<ExcRef>,
) -> Result<Option<Signal>, StructuralError> {
    while let Some(block) = frame.blocks.last().copied() {
        if let (BlockKind::Loop, Signal::Continue(target)) = (block.kind, &signal) {
            frame.jump(*target)?;
            return Ok(None);
        }
        frame.blocks.pop();
        if block.kind == BlockKind::ExceptHandler {
            restore_handled(frame, block.level, handled)?;
            continue;
        }
        frame.truncate(block.level);
        match (block.kind, signal) {
            (BlockKind::Loop, Signal::Break) => {
                frame.jump(block.handler)?;
                return Ok(None);
            }
            (BlockKind::ExceptGuard | BlockKind::FinallyGuard, Signal::Raise(exc)) => {
                debug!(
                    target: "framevm::vm::unwind",
                    frame = %frame.code.name,
                    kind = %exc.kind(),
                    handler = block.handler,
                    "exception caught by guard"
                );
                frame.push_block(BlockKind::ExceptHandler, block.handler);
                for value in exception_triple(handled.as_ref()) {
                    frame.push(value);
                }
                for value in exception_triple(Some(&exc)) {
                    frame.push(value);
                }
                *handled = Some(exc);
                frame.jump(block.handler)?;
                return Ok(None);
            }
            (BlockKind::FinallyGuard, other) => {
                debug!(
                    target: "framevm::vm::unwind",
                    frame = %frame.code.name,
                    signal = other.name(),
                    handler = block.handler,
                    "running finally region"
                );
                frame.push(Val::Signal(Rc::new(other)));
                frame.jump(block.handler)?;
                return Ok(None);
            }
            (kind, passing) => {
                debug!(
                    target: "framevm::vm::unwind",
                    frame = %frame.code.name,
                    block = ?kind,
                    signal = passing.name(),
                    depth = frame.stack.len(),
                    "block discarded"
                );
                signal = passing;
            }
        }
    }
    Ok(Some(signal))
}

/// `END_FINALLY`: resume whatever the finally region interrupted.
pub(crate) fn end_finally(frame: &mut Frame) -> Result<Option<Signal>, StructuralError> {
    match frame.pop()? {
        Val::None => Ok(None),
        Val::Signal(signal) => Ok(Some(Rc::unwrap_or_clone(signal))),
        Val::ExcType(_) => {
            let value = frame.pop()?;
            frame.pop()?;
            match value {
                Val::Exception(exc) => Ok(Some(Signal::Raise(exc))),
                other => Err(StructuralError::BadOperand {
                    at: frame.offset,
                    message: format!("exception slot holds {}", other.type_name()),
                }),
            }
        }
        other => Err(StructuralError::BadOperand {
            at: frame.offset,
            message: format!("END_FINALLY found {}", other.type_name()),
        }),
    }
}

/// `POP_EXCEPT`: leave an `except` body normally.
pub(crate) fn pop_except(frame: &mut Frame, handled: &mut Option<ExcRef>) -> Result<(), StructuralError> {
    let block = frame.pop_block()?;
    if block.kind != BlockKind::ExceptHandler {
        return Err(StructuralError::NotAnExceptHandler {
            at: frame.offset,
            found: block.kind,
        });
    }
    restore_handled(frame, block.level, handled)
}
