use super::*;

/// Pushes a closure over `cells` built from `code` with the given qualname.
fn make_closure(b: &mut CodeBuilder, cells: &[&str], code: CodeObject, qualname: &str) {
    for cell in cells {
        b.load_closure(cell);
    }
    b.emit(Op::BuildTuple(cells.len() as u32))
        .load_code(code)
        .load_const(qualname)
        .emit(Op::MakeFunction(FunctionFlags::CLOSURE));
}

/// def make():
///     count = 0
///     def inc():
///         nonlocal count
///         count += 1
///         return count
///     return inc
fn counter_factory() -> CodeObject {
    let mut inc = CodeBuilder::new("inc").freevar("count");
    inc.load_deref("count")
        .load_const(1i64)
        .emit(Op::InplaceOp(BinOp::Add))
        .store_deref("count")
        .load_deref("count")
        .emit(Op::ReturnValue);

    let mut make = CodeBuilder::new("make").cellvar("count");
    make.load_const(0i64).store_deref("count");
    make_closure(&mut make, &["count"], inc.build().unwrap(), "make.<locals>.inc");
    make.emit(Op::ReturnValue);
    make.build().unwrap()
}

fn call_name(b: &mut CodeBuilder, name: &str) {
    b.load_name(name).emit(Op::CallFunction(0));
}

#[test]
fn test_closure_mutates_captured_cell() {
    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "make", counter_factory());
    call_name(&mut b, "make");
    b.store_name("c");
    call_name(&mut b, "c");
    b.emit(Op::PopTop);
    call_name(&mut b, "c");
    b.emit(Op::PopTop);
    call_name(&mut b, "c");
    b.emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()), Val::Int(3));
}

#[test]
fn test_each_call_gets_fresh_cells() {
    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "make", counter_factory());
    call_name(&mut b, "make");
    b.store_name("first");
    call_name(&mut b, "make");
    b.store_name("second");
    call_name(&mut b, "first");
    b.emit(Op::PopTop);
    call_name(&mut b, "first");
    call_name(&mut b, "second");
    b.emit(Op::BuildTuple(2)).emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "(2, 1)");
}

#[test]
fn test_closure_name_is_the_qualname() {
    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "make", counter_factory());
    call_name(&mut b, "make");
    b.emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "<function make.<locals>.inc>");
}

#[test]
fn test_captured_parameter_seeds_its_cell() {
    // def adder(n): return lambda x: x + n
    let mut lambda = CodeBuilder::new("<lambda>").params(&["x"]).freevar("n");
    lambda
        .load_fast("x")
        .load_deref("n")
        .emit(Op::BinaryOp(BinOp::Add))
        .emit(Op::ReturnValue);
    let mut adder = CodeBuilder::new("adder").params(&["n"]).cellvar("n");
    make_closure(&mut adder, &["n"], lambda.build().unwrap(), "adder.<locals>.<lambda>");
    adder.emit(Op::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "adder", adder.build().unwrap());
    b.load_name("adder")
        .load_const(10i64)
        .emit(Op::CallFunction(1))
        .load_const(5i64)
        .emit(Op::CallFunction(1))
        .emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()), Val::Int(15));
}

#[test]
fn test_closure_sees_later_assignments() {
    // def make():
    //     def get(): return x
    //     x = 2
    //     return get
    let mut get = CodeBuilder::new("get").freevar("x");
    get.load_deref("x").emit(Op::ReturnValue);
    let mut make = CodeBuilder::new("make").cellvar("x");
    make_closure(&mut make, &["x"], get.build().unwrap(), "make.<locals>.get");
    make.store_fast("get").load_const(2i64).store_deref("x").load_fast("get").emit(Op::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "make", make.build().unwrap());
    call_name(&mut b, "make");
    b.emit(Op::CallFunction(0)).emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()), Val::Int(2));
}

#[test]
fn test_sibling_closures_share_the_defining_cell() {
    // def outer():
    //     x = 0
    //     def setter(): nonlocal x; x = 1
    //     def getter(): return x
    //     setter()
    //     return (getter(), x)
    let mut setter = CodeBuilder::new("setter").freevar("x");
    setter.load_const(1i64).store_deref("x").load_none().emit(Op::ReturnValue);
    let mut getter = CodeBuilder::new("getter").freevar("x");
    getter.load_deref("x").emit(Op::ReturnValue);

    let mut outer = CodeBuilder::new("outer").cellvar("x");
    outer.load_const(0i64).store_deref("x");
    make_closure(&mut outer, &["x"], setter.build().unwrap(), "outer.<locals>.setter");
    outer.store_fast("setter");
    make_closure(&mut outer, &["x"], getter.build().unwrap(), "outer.<locals>.getter");
    outer.store_fast("getter");
    outer.load_fast("setter").emit(Op::CallFunction(0)).emit(Op::PopTop);
    outer
        .load_fast("getter")
        .emit(Op::CallFunction(0))
        .load_deref("x")
        .emit(Op::BuildTuple(2))
        .emit(Op::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "outer", outer.build().unwrap());
    call_name(&mut b, "outer");
    b.emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "(1, 1)");
}

#[test]
fn test_reading_an_empty_free_variable() {
    // def make():
    //     def get(): return x
    //     get()
    //     x = 1
    let mut get = CodeBuilder::new("get").freevar("x");
    get.load_deref("x").emit(Op::ReturnValue);
    let mut make = CodeBuilder::new("make").cellvar("x");
    make_closure(&mut make, &["x"], get.build().unwrap(), "make.<locals>.get");
    make.emit(Op::CallFunction(0)).emit(Op::PopTop);
    make.load_const(1i64).store_deref("x").load_none().emit(Op::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "make", make.build().unwrap());
    call_name(&mut b, "make");
    b.emit(Op::ReturnValue);
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::NameError);
    assert_eq!(
        exc.message(),
        "free variable 'x' referenced before assignment in enclosing scope"
    );
}

#[test]
fn test_deleted_cell_is_unbound() {
    let mut f = CodeBuilder::new("f").cellvar("x");
    f.load_const(1i64)
        .store_deref("x")
        .emit(Op::DeleteDeref("x".to_string()))
        .load_deref("x")
        .emit(Op::ReturnValue);
    let mut b = CodeBuilder::new("<module>");
    define(&mut b, "f", f.build().unwrap());
    call_name(&mut b, "f");
    b.emit(Op::ReturnValue);
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::NameError);
    assert_eq!(exc.message(), "local variable 'x' referenced before assignment");
}

#[test]
fn test_closure_cell_count_must_match_free_variables() {
    let mut get = CodeBuilder::new("get").freevar("x");
    get.load_deref("x").emit(Op::ReturnValue);
    let mut b = CodeBuilder::new("<module>");
    b.emit(Op::BuildTuple(0))
        .load_code(get.build().unwrap())
        .load_const("get")
        .emit(Op::MakeFunction(FunctionFlags::CLOSURE));
    assert!(matches!(
        structural(b.build().unwrap()),
        StructuralError::BadOperand { at: 6, .. }
    ));
}

#[test]
fn test_unknown_cell_name_is_rejected_at_construction() {
    let mut f = CodeBuilder::new("f");
    f.load_deref("ghost");
    assert_eq!(
        f.build().unwrap_err(),
        StructuralError::UnknownCell {
            at: 0,
            name: "ghost".to_string()
        }
    );
}
