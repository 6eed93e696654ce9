pub(super) use crate::{
    error::{StepLimitExceeded, StructuralError, UncaughtException},
    host::BufferHost,
    module::{Module, ModuleRegistry},
    op::{BinOp, CmpOp, UnaryOp},
    val::{ExcKind, Val},
    vm::{
        BlockKind, CodeBuilder, CodeObject, Const, Engine, EngineConfig, FunctionFlags, Label, Op, Progress,
    },
};

pub(super) fn new_engine() -> Engine<BufferHost> {
    Engine::new(BufferHost::new())
}

pub(super) fn run(code: CodeObject) -> Val {
    new_engine().run(code).unwrap()
}

/// Runs `code` and returns its result together with everything printed.
pub(super) fn run_with_output(code: CodeObject) -> (Val, String) {
    let mut engine = new_engine();
    let value = engine.run(code).unwrap();
    (value, engine.host_mut().take_output())
}

pub(super) fn uncaught(code: CodeObject) -> UncaughtException {
    new_engine()
        .run(code)
        .unwrap_err()
        .downcast::<UncaughtException>()
        .expect("run ends with an uncaught guest exception")
}

pub(super) fn structural(code: CodeObject) -> StructuralError {
    new_engine()
        .run(code)
        .unwrap_err()
        .downcast::<StructuralError>()
        .expect("run ends with a structural error")
}

/// Steps `code` until the module-level instruction at `marker` has executed
/// and returns the root frame's operand-stack depth and block count.
pub(super) fn depth_after(code: CodeObject, marker: u32) -> (usize, usize) {
    let mut engine = new_engine();
    engine.load(code).unwrap();
    loop {
        match engine.step().unwrap() {
            Progress::Running => {
                let frames = engine.frames();
                if let [root] = frames.as_slice()
                    && root.offset == marker
                {
                    return (root.stack_depth, root.blocks.len());
                }
            }
            Progress::Finished(_) => panic!("offset {marker} never executed"),
        }
    }
}

/// `name = <function from code>` at module level.
pub(super) fn define(b: &mut CodeBuilder, name: &str, code: CodeObject) {
    b.load_code(code)
        .load_const(name)
        .emit(Op::MakeFunction(FunctionFlags::NONE))
        .store_name(name);
}

/// `print(<name>)` at module level.
pub(super) fn print_name(b: &mut CodeBuilder, name: &str) {
    b.load_name("print")
        .load_name(name)
        .emit(Op::CallFunction(1))
        .emit(Op::PopTop);
}

mod closures;
mod exceptions;
mod imports;
mod stack;
