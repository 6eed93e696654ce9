use super::*;

fn divide_by_zero(b: &mut CodeBuilder) {
    b.load_const(1i64).load_const(0i64).emit(Op::BinaryOp(BinOp::TrueDiv));
}

fn raise_new(b: &mut CodeBuilder, kind: &str, message: &str) {
    b.load_name(kind)
        .load_const(message)
        .emit(Op::CallFunction(1))
        .emit(Op::RaiseVarargs(1));
}

/// Handler prologue: jumps to `reraise` unless the exception matches `kind`.
fn match_or_jump(b: &mut CodeBuilder, kind: &str, reraise: Label) {
    b.emit(Op::DupTop)
        .load_name(kind)
        .emit(Op::CompareOp(CmpOp::ExceptionMatch))
        .emit_jump(Op::PopJumpIfFalse, reraise);
}

fn pop_triple(b: &mut CodeBuilder) {
    b.emit(Op::PopTop).emit(Op::PopTop).emit(Op::PopTop);
}

#[test]
fn test_except_catches_and_binds() {
    let mut b = CodeBuilder::new("<module>");
    let (handler, reraise, end) = (b.label(), b.label(), b.label());
    b.emit_jump(Op::SetupExcept, handler);
    divide_by_zero(&mut b);
    b.store_name("x").emit(Op::PopBlock).jump_forward(end);
    b.bind(handler);
    match_or_jump(&mut b, "ZeroDivisionError", reraise);
    b.emit(Op::PopTop).store_name("e").emit(Op::PopTop);
    b.load_const("caught").store_name("x").emit(Op::PopExcept).jump_forward(end);
    b.bind(reraise).emit(Op::EndFinally);
    b.bind(end).load_name("x").emit(Op::ReturnValue);

    let mut engine = new_engine();
    assert_eq!(engine.run(b.build().unwrap()).unwrap(), Val::str("caught"));
    let e = engine.global("e").unwrap();
    assert_eq!(e.type_name(), "ZeroDivisionError");
    assert_eq!(e.to_string(), "division by zero");
}

#[test]
fn test_non_matching_handler_reraises() {
    let mut b = CodeBuilder::new("<module>");
    let (handler, reraise, end) = (b.label(), b.label(), b.label());
    b.emit_jump(Op::SetupExcept, handler);
    divide_by_zero(&mut b);
    b.emit(Op::PopTop).emit(Op::PopBlock).jump_forward(end);
    b.bind(handler);
    match_or_jump(&mut b, "KeyError", reraise);
    pop_triple(&mut b);
    b.emit(Op::PopExcept).jump_forward(end);
    b.bind(reraise).emit(Op::EndFinally);
    b.bind(end).load_none().emit(Op::ReturnValue);

    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::ZeroDivisionError);
    assert_eq!(exc.message(), "division by zero");
    assert_eq!(exc.traceback().len(), 1);
    assert_eq!(exc.traceback()[0].name, "<module>");
}

#[test]
fn test_handler_matches_tuple_and_base_classes() {
    let mut b = CodeBuilder::new("<module>");
    let (handler, reraise, end) = (b.label(), b.label(), b.label());
    b.emit_jump(Op::SetupExcept, handler);
    raise_new(&mut b, "KeyError", "k");
    b.emit(Op::PopBlock).jump_forward(end);
    b.bind(handler)
        .emit(Op::DupTop)
        .load_name("ValueError")
        .load_name("LookupError")
        .emit(Op::BuildTuple(2))
        .emit(Op::CompareOp(CmpOp::ExceptionMatch))
        .emit_jump(Op::PopJumpIfFalse, reraise);
    pop_triple(&mut b);
    b.load_const("lookup").store_name("x").emit(Op::PopExcept).jump_forward(end);
    b.bind(reraise).emit(Op::EndFinally);
    b.bind(end).load_name("x").emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()), Val::str("lookup"));
}

#[test]
fn test_finally_runs_then_reraises() {
    let mut b = CodeBuilder::new("<module>");
    let fin = b.label();
    b.emit_jump(Op::SetupFinally, fin);
    raise_new(&mut b, "ValueError", "x");
    b.emit(Op::PopBlock).load_none();
    b.bind(fin);
    print_name(&mut b, "__name__");
    b.emit(Op::EndFinally).load_none().emit(Op::ReturnValue);

    let mut engine = new_engine();
    let err = engine.run(b.build().unwrap()).unwrap_err();
    let exc = err.downcast::<UncaughtException>().unwrap();
    assert_eq!(exc.kind(), ExcKind::ValueError);
    assert_eq!(exc.message(), "x");
    assert_eq!(engine.host().output(), "__main__\n");
}

#[test]
fn test_finally_return_overrides_pending_return() {
    // def f():
    //     try: return 1
    //     finally: return 2
    let mut f = CodeBuilder::new("f");
    let fin = f.label();
    f.emit_jump(Op::SetupFinally, fin)
        .load_const(1i64)
        .emit(Op::ReturnValue)
        .emit(Op::PopBlock)
        .load_none();
    f.bind(fin).load_const(2i64).emit(Op::ReturnValue).emit(Op::EndFinally);

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "f", f.build().unwrap());
    b.load_name("f").emit(Op::CallFunction(0)).emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()), Val::Int(2));
}

#[test]
fn test_finally_resumes_pending_return() {
    // def f():
    //     try: return 1
    //     finally: print("f")
    //     return 99
    let mut f = CodeBuilder::new("f");
    let fin = f.label();
    f.emit_jump(Op::SetupFinally, fin)
        .load_const(1i64)
        .emit(Op::ReturnValue)
        .emit(Op::PopBlock)
        .load_none();
    f.bind(fin)
        .load_global("print")
        .load_const("f")
        .emit(Op::CallFunction(1))
        .emit(Op::PopTop)
        .emit(Op::EndFinally)
        .load_const(99i64)
        .emit(Op::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "f", f.build().unwrap());
    b.load_name("f").emit(Op::CallFunction(0)).emit(Op::ReturnValue);
    let (value, output) = run_with_output(b.build().unwrap());
    assert_eq!(value, Val::Int(1));
    assert_eq!(output, "f\n");
}

#[test]
fn test_raise_in_finally_overrides_pending_return() {
    // def f():
    //     try: return 1
    //     finally: raise KeyError("k")
    let mut f = CodeBuilder::new("f");
    let fin = f.label();
    f.emit_jump(Op::SetupFinally, fin)
        .load_const(1i64)
        .emit(Op::ReturnValue)
        .emit(Op::PopBlock)
        .load_none();
    f.bind(fin);
    raise_new(&mut f, "KeyError", "k");
    f.emit(Op::EndFinally);

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "f", f.build().unwrap());
    b.load_name("f").emit(Op::CallFunction(0)).emit(Op::ReturnValue);
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::KeyError);
    let names: Vec<&str> = exc.traceback().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["f", "<module>"]);
}

/// try: [1, 2, 3][5]
/// except <first>: r = "first"
/// except <second>: r = "second"
fn subscript_handled_by(first: &str, second: &str) -> CodeObject {
    let mut b = CodeBuilder::new("<module>");
    let (handler, next, reraise, end) = (b.label(), b.label(), b.label(), b.label());
    b.emit_jump(Op::SetupExcept, handler);
    b.load_const(1i64).load_const(2i64).load_const(3i64).emit(Op::BuildList(3));
    b.load_const(5i64).emit(Op::BinarySubscr).emit(Op::PopTop).emit(Op::PopBlock).jump_forward(end);
    b.bind(handler);
    match_or_jump(&mut b, first, next);
    pop_triple(&mut b);
    b.load_const("first").store_name("r").emit(Op::PopExcept).jump_forward(end);
    b.bind(next);
    match_or_jump(&mut b, second, reraise);
    pop_triple(&mut b);
    b.load_const("second").store_name("r").emit(Op::PopExcept).jump_forward(end);
    b.bind(reraise).emit(Op::EndFinally);
    b.bind(end).load_name("r").emit(Op::ReturnValue);
    b.build().unwrap()
}

#[test]
fn test_index_error_skips_a_key_error_handler() {
    assert_eq!(run(subscript_handled_by("KeyError", "IndexError")), Val::str("second"));
    assert_eq!(run(subscript_handled_by("LookupError", "IndexError")), Val::str("first"));

    let exc = uncaught(subscript_handled_by("KeyError", "ValueError"));
    assert_eq!(exc.kind(), ExcKind::IndexError);
    assert_eq!(exc.message(), "list index out of range");
}

#[test]
fn test_handled_raise_restores_the_guard_entry_depth() {
    // def f(): <values left on the stack>; 1 / 0
    // "keep"; try: f() except: pass
    let mut f = CodeBuilder::new("f");
    f.load_const("junk").load_const("more");
    divide_by_zero(&mut f);
    f.emit(Op::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    let (handler, end) = (b.label(), b.label());
    define(&mut b, "f", f.build().unwrap());
    b.load_const("keep").emit_jump(Op::SetupExcept, handler);
    b.load_const(1i64).load_name("f").emit(Op::CallFunction(0));
    b.emit(Op::BinaryOp(BinOp::Add)).emit(Op::PopTop).emit(Op::PopBlock).jump_forward(end);
    b.bind(handler);
    pop_triple(&mut b);
    b.emit(Op::PopExcept);
    b.bind(end);
    let marker = b.next_offset();
    b.emit(Op::Nop).emit(Op::ReturnValue);
    let code = b.build().unwrap();

    assert_eq!(run(code.clone()), Val::str("keep"));
    assert_eq!(depth_after(code, marker), (1, 0));
}

#[test]
fn test_raise_from_records_the_cause() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.label();
    b.emit_jump(Op::SetupExcept, handler);
    b.load_name("ValueError").load_const("outer").emit(Op::CallFunction(1));
    b.load_name("KeyError").load_const("inner").emit(Op::CallFunction(1));
    b.emit(Op::RaiseVarargs(2));
    b.bind(handler).emit(Op::PopTop).store_name("e").emit(Op::PopTop).emit(Op::PopExcept);
    b.load_name("e").emit(Op::LoadAttr("__cause__".to_string())).emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "KeyError('inner')");
}

#[test]
fn test_bare_raise_reraises_the_handled_exception() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.label();
    b.emit_jump(Op::SetupExcept, handler);
    divide_by_zero(&mut b);
    b.bind(handler);
    pop_triple(&mut b);
    b.emit(Op::RaiseVarargs(0));
    assert_eq!(uncaught(b.build().unwrap()).kind(), ExcKind::ZeroDivisionError);
}

#[test]
fn test_bare_raise_without_active_exception() {
    let mut b = CodeBuilder::new("<module>");
    b.emit(Op::RaiseVarargs(0));
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::RuntimeError);
    assert_eq!(exc.message(), "No active exception to reraise");
}

#[test]
fn test_nested_handler_restores_the_outer_exception() {
    // try: 1 / 0
    // except:
    //     try: raise KeyError
    //     except: pass
    //     raise
    let mut b = CodeBuilder::new("<module>");
    let (outer, inner, after_inner, end) = (b.label(), b.label(), b.label(), b.label());
    b.emit_jump(Op::SetupExcept, outer);
    divide_by_zero(&mut b);
    b.emit(Op::PopTop).emit(Op::PopBlock).jump_forward(end);
    b.bind(outer);
    pop_triple(&mut b);
    b.emit_jump(Op::SetupExcept, inner)
        .load_name("KeyError")
        .emit(Op::RaiseVarargs(1))
        .emit(Op::PopBlock)
        .jump_forward(after_inner);
    b.bind(inner);
    pop_triple(&mut b);
    b.emit(Op::PopExcept);
    b.bind(after_inner).emit(Op::RaiseVarargs(0));
    b.bind(end).load_none().emit(Op::ReturnValue);
    assert_eq!(uncaught(b.build().unwrap()).kind(), ExcKind::ZeroDivisionError);
}

#[test]
fn test_named_handler_cleanup_deletes_the_name() {
    // try: 1 / 0
    // except ZeroDivisionError as e: saved = e
    let mut b = CodeBuilder::new("<module>");
    let (handler, cleanup, reraise, end) = (b.label(), b.label(), b.label(), b.label());
    b.emit_jump(Op::SetupExcept, handler);
    divide_by_zero(&mut b);
    b.emit(Op::PopTop).emit(Op::PopBlock).jump_forward(end);
    b.bind(handler);
    match_or_jump(&mut b, "ZeroDivisionError", reraise);
    b.emit(Op::PopTop).store_name("e").emit(Op::PopTop);
    b.emit_jump(Op::SetupFinally, cleanup);
    b.load_name("e").store_name("saved").emit(Op::PopBlock).load_none();
    b.bind(cleanup)
        .load_none()
        .store_name("e")
        .emit(Op::DeleteName("e".to_string()))
        .emit(Op::EndFinally);
    b.emit(Op::PopExcept).jump_forward(end);
    b.bind(reraise).emit(Op::EndFinally);
    b.bind(end).load_name("saved").emit(Op::ReturnValue);

    let mut engine = new_engine();
    let value = engine.run(b.build().unwrap()).unwrap();
    assert_eq!(value.repr(), "ZeroDivisionError('division by zero')");
    assert_eq!(engine.global("e"), None);
}

#[test]
fn test_exception_crosses_frames_with_traceback() {
    let mut inner = CodeBuilder::new("inner");
    divide_by_zero(&mut inner);
    inner.emit(Op::ReturnValue);

    let mut outer = CodeBuilder::new("outer");
    outer
        .load_global("inner")
        .emit(Op::CallFunction(0))
        .emit(Op::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "inner", inner.build().unwrap());
    define(&mut b, "outer", outer.build().unwrap());
    b.load_name("outer").emit(Op::CallFunction(0)).emit(Op::ReturnValue);

    let exc = uncaught(b.build().unwrap());
    let names: Vec<&str> = exc.traceback().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["inner", "outer", "<module>"]);
    assert_eq!(exc.traceback()[0].offset, 4);
    assert_eq!(exc.traceback()[1].offset, 2);
    assert_eq!(exc.traceback()[2].offset, 18);
    assert_eq!(
        exc.render_traceback(),
        "Traceback (most recent call last):\n  in <module> at offset 18\n  in outer at offset 2\n  in inner at offset 4\nZeroDivisionError: division by zero"
    );
}

#[test]
fn test_caller_handles_callee_exception() {
    let mut f = CodeBuilder::new("f");
    raise_new(&mut f, "ValueError", "boom");

    let mut b = CodeBuilder::new("<module>");
    let (handler, reraise, end) = (b.label(), b.label(), b.label());
    define(&mut b, "f", f.build().unwrap());
    b.emit_jump(Op::SetupExcept, handler);
    b.load_name("f").emit(Op::CallFunction(0)).store_name("x").emit(Op::PopBlock).jump_forward(end);
    b.bind(handler);
    match_or_jump(&mut b, "Exception", reraise);
    pop_triple(&mut b);
    b.load_const("handled").store_name("x").emit(Op::PopExcept).jump_forward(end);
    b.bind(reraise).emit(Op::EndFinally);
    b.bind(end).load_name("x").emit(Op::ReturnValue);

    let mut engine = new_engine();
    assert_eq!(engine.run(b.build().unwrap()).unwrap(), Val::str("handled"));
    assert!(engine.frames().is_empty());
}

#[test]
fn test_raising_a_non_exception_is_a_type_error() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(1i64).emit(Op::RaiseVarargs(1));
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::TypeError);
    assert_eq!(exc.message(), "exceptions must derive from BaseException");
}

#[test]
fn test_host_errors_surface_as_guest_exceptions() {
    let mut b = CodeBuilder::new("<module>");
    b.load_name("int").load_const("abc").emit(Op::CallFunction(1)).emit(Op::ReturnValue);
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::ValueError);
    assert_eq!(exc.message(), "invalid literal for int() with base 10: 'abc'");
}

#[test]
fn test_undefined_name_is_a_name_error() {
    let mut b = CodeBuilder::new("<module>");
    b.load_name("nope").emit(Op::ReturnValue);
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::NameError);
    assert_eq!(exc.to_string(), "NameError: name 'nope' is not defined");
}
