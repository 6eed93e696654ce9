use std::fmt;

use crate::val::{ExcKind, TraceEntry};
use crate::vm::BlockKind;

/// A malformed instruction stream.
///
/// Well-formed streams never produce these, so they are fatal to the run and
/// never routed through guest exception handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    NonIncreasingOffset { previous: u32, offset: u32 },
    UnknownJumpTarget { at: u32, target: u64 },
    BadSignature { code: String, message: String },
    UnknownSlot { at: u32, slot: u32 },
    UnknownCell { at: u32, name: String },
    StackUnderflow { at: u32, wanted: usize, depth: usize },
    BlockUnderflow { at: u32 },
    NotAnExceptHandler { at: u32, found: BlockKind },
    SignalOutsideLoop { at: u32, signal: &'static str },
    BadOperand { at: u32, message: String },
    EmptyFrameStack,
    EngineBusy,
}

impl fmt::Display for StructuralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralError::NonIncreasingOffset { previous, offset } => {
                write!(f, "instruction offset {offset} does not follow {previous}")
            }
            StructuralError::UnknownJumpTarget { at, target } => {
                write!(f, "jump at offset {at} targets missing offset {target}")
            }
            StructuralError::BadSignature { code, message } => write!(f, "bad signature for '{code}': {message}"),
            StructuralError::UnknownSlot { at, slot } => write!(f, "local slot {slot} at offset {at} does not exist"),
            StructuralError::UnknownCell { at, name } => write!(f, "no cell named '{name}' at offset {at}"),
            StructuralError::StackUnderflow { at, wanted, depth } => {
                write!(f, "operand stack underflow at offset {at}: wanted {wanted}, depth {depth}")
            }
            StructuralError::BlockUnderflow { at } => write!(f, "block stack underflow at offset {at}"),
            StructuralError::NotAnExceptHandler { at, found } => {
                write!(f, "popped a {found:?} block as an exception handler at offset {at}")
            }
            StructuralError::SignalOutsideLoop { at, signal } => write!(f, "'{signal}' outside loop at offset {at}"),
            StructuralError::BadOperand { at, message } => write!(f, "bad operand at offset {at}: {message}"),
            StructuralError::EmptyFrameStack => write!(f, "no current frame"),
            StructuralError::EngineBusy => write!(f, "engine is already running a program"),
        }
    }
}

impl std::error::Error for StructuralError {}

/// The exception that escaped every handler of every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncaughtException {
    kind: ExcKind,
    message: String,
    traceback: Vec<TraceEntry>,
}

impl UncaughtException {
    pub(crate) fn new(kind: ExcKind, message: String, traceback: Vec<TraceEntry>) -> Self {
        Self {
            kind,
            message,
            traceback,
        }
    }

    pub fn kind(&self) -> ExcKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Frames the exception left, innermost first.
    pub fn traceback(&self) -> &[TraceEntry] {
        &self.traceback
    }

    /// Traceback rendered most recent call last.
    pub fn render_traceback(&self) -> String {
        let mut out = String::from("Traceback (most recent call last):\n");
        for entry in self.traceback.iter().rev() {
            out.push_str(&format!("  in {} at offset {}\n", entry.name, entry.offset));
        }
        out.push_str(&self.to_string());
        out
    }
}

impl fmt::Display for UncaughtException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for UncaughtException {}

/// The dispatch loop was halted by the configured step budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLimitExceeded {
    pub limit: u64,
}

impl fmt::Display for StepLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step limit of {} instructions exceeded", self.limit)
    }
}

impl std::error::Error for StepLimitExceeded {}
