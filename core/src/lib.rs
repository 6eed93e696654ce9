pub mod error;
pub mod host;
pub mod module;
pub mod op;
pub mod util;
pub mod val;

// Stack-frame engine: instruction stream, frames, blocks, cells and dispatch
pub mod vm;

pub use error::{StepLimitExceeded, StructuralError, UncaughtException};
pub use host::{BufferHost, Host, StdHost};
pub use val::Val;
pub use vm::{CodeBuilder, CodeObject, Engine, EngineConfig};
