use super::*;

fn consts(b: &mut CodeBuilder, values: &[i64]) {
    for value in values {
        b.load_const(*value);
    }
}

#[test]
fn test_rotations_and_duplication() {
    let mut b = CodeBuilder::new("<module>");
    consts(&mut b, &[1, 2, 3]);
    b.emit(Op::RotThree).emit(Op::BuildTuple(3)).store_name("three");
    consts(&mut b, &[1, 2]);
    b.emit(Op::RotTwo).emit(Op::BuildTuple(2)).store_name("two");
    consts(&mut b, &[1, 2]);
    b.emit(Op::DupTopTwo).emit(Op::BuildList(4)).store_name("dup");
    b.load_const(7i64).emit(Op::DupTop).emit(Op::BinaryOp(BinOp::Mul)).emit(Op::ReturnValue);

    let mut engine = new_engine();
    assert_eq!(engine.run(b.build().unwrap()).unwrap(), Val::Int(49));
    assert_eq!(engine.global("three").unwrap().repr(), "(3, 1, 2)");
    assert_eq!(engine.global("two").unwrap().repr(), "(2, 1)");
    assert_eq!(engine.global("dup").unwrap().repr(), "[1, 2, 1, 2]");
}

#[test]
fn test_build_maps() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const("x").load_const(1i64).load_const("y").load_const(2i64);
    b.emit(Op::BuildMap(2)).store_name("plain");
    consts(&mut b, &[10, 20]);
    b.emit(Op::LoadConst(Const::Tuple(vec![Const::from("a"), Const::from("b")])))
        .emit(Op::BuildConstKeyMap(2))
        .store_name("keyed");
    b.load_none().emit(Op::ReturnValue);

    let mut engine = new_engine();
    engine.run(b.build().unwrap()).unwrap();
    assert_eq!(engine.global("plain").unwrap().repr(), "{'x': 1, 'y': 2}");
    assert_eq!(engine.global("keyed").unwrap().repr(), "{'a': 10, 'b': 20}");
}

#[test]
fn test_unpack_sequence_assigns_left_to_right() {
    let mut b = CodeBuilder::new("<module>");
    b.emit(Op::LoadConst(Const::Tuple(vec![Const::Int(1), Const::Int(2), Const::Int(3)])))
        .emit(Op::UnpackSequence(3))
        .store_name("a")
        .store_name("b")
        .store_name("c");
    b.load_name("a").load_name("b").load_name("c").emit(Op::BuildList(3)).emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "[1, 2, 3]");
}

#[test]
fn test_unpack_sequence_length_mismatch() {
    let mut b = CodeBuilder::new("<module>");
    b.emit(Op::LoadConst(Const::Tuple(vec![Const::Int(1), Const::Int(2), Const::Int(3)])))
        .emit(Op::UnpackSequence(2));
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::ValueError);
    assert_eq!(exc.message(), "too many values to unpack (expected 2)");

    let mut b = CodeBuilder::new("<module>");
    b.emit(Op::LoadConst(Const::Tuple(vec![Const::Int(1)])))
        .emit(Op::UnpackSequence(2));
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.message(), "not enough values to unpack (expected 2, got 1)");
}

#[test]
fn test_starred_unpack() {
    // a, *b, c = [1, 2, 3, 4]
    let mut b = CodeBuilder::new("<module>");
    consts(&mut b, &[1, 2, 3, 4]);
    b.emit(Op::BuildList(4))
        .emit(Op::UnpackEx(1 | (1 << 8)))
        .store_name("a")
        .store_name("b")
        .store_name("c");
    b.load_name("a").load_name("b").load_name("c").emit(Op::BuildTuple(3)).emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "(1, [2, 3], 4)");
}

#[test]
fn test_build_string_and_slice() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const("ab").load_const("cd").emit(Op::BuildString(2)).store_name("s");
    consts(&mut b, &[0, 1, 2, 3, 4]);
    b.emit(Op::BuildList(5))
        .load_const(1i64)
        .load_none()
        .emit(Op::BuildSlice(2))
        .emit(Op::BinarySubscr)
        .emit(Op::ReturnValue);

    let mut engine = new_engine();
    assert_eq!(engine.run(b.build().unwrap()).unwrap().repr(), "[1, 2, 3, 4]");
    assert_eq!(engine.global("s"), Some(Val::str("abcd")));
}

#[test]
fn test_list_comprehension_accumulator() {
    // [x * 2 for x in range(3)], inlined
    let mut b = CodeBuilder::new("<module>");
    let (top, done) = (b.label(), b.label());
    b.emit(Op::BuildList(0))
        .load_name("range")
        .load_const(3i64)
        .emit(Op::CallFunction(1))
        .emit(Op::GetIter);
    b.bind(top).emit_jump(Op::ForIter, done);
    b.store_name("x")
        .load_name("x")
        .load_const(2i64)
        .emit(Op::BinaryOp(BinOp::Mul))
        .emit(Op::ListAppend(2))
        .emit_jump(Op::JumpAbsolute, top);
    b.bind(done).emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "[0, 2, 4]");
}

#[test]
fn test_dict_comprehension_takes_key_from_top() {
    // {x: x * 10 for x in range(3)}; the value is pushed before the key
    let mut b = CodeBuilder::new("<module>");
    let (top, done) = (b.label(), b.label());
    b.emit(Op::BuildMap(0))
        .load_name("range")
        .load_const(3i64)
        .emit(Op::CallFunction(1))
        .emit(Op::GetIter);
    b.bind(top).emit_jump(Op::ForIter, done);
    b.store_name("x")
        .load_name("x")
        .load_const(10i64)
        .emit(Op::BinaryOp(BinOp::Mul))
        .load_name("x")
        .emit(Op::MapAdd(2))
        .emit_jump(Op::JumpAbsolute, top);
    b.bind(done).emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "{0: 0, 1: 10, 2: 20}");
}

#[test]
fn test_set_accumulator_deduplicates() {
    let mut b = CodeBuilder::new("<module>");
    let (top, done) = (b.label(), b.label());
    b.emit(Op::BuildSet(0));
    consts(&mut b, &[1, 2, 1, 3, 2]);
    b.emit(Op::BuildList(5)).emit(Op::GetIter);
    b.bind(top).emit_jump(Op::ForIter, done);
    b.emit(Op::SetAdd(2)).emit_jump(Op::JumpAbsolute, top);
    b.bind(done).emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "{1, 2, 3}");
}

#[test]
fn test_spread_builds() {
    let mut b = CodeBuilder::new("<module>");
    consts(&mut b, &[1, 2]);
    b.emit(Op::BuildList(2));
    b.load_name("range").load_const(3i64).emit(Op::CallFunction(1));
    b.emit(Op::BuildTupleUnpack(2)).store_name("t");
    consts(&mut b, &[1, 2]);
    b.emit(Op::BuildTuple(2));
    consts(&mut b, &[2, 3]);
    b.emit(Op::BuildList(2)).emit(Op::BuildSetUnpack(2)).store_name("s");
    b.load_none().emit(Op::ReturnValue);

    let mut engine = new_engine();
    engine.run(b.build().unwrap()).unwrap();
    assert_eq!(engine.global("t").unwrap().repr(), "(1, 2, 0, 1, 2)");
    assert_eq!(engine.global("s").unwrap().repr(), "{1, 2, 3}");
}

fn one_key_map(b: &mut CodeBuilder, key: &str, value: i64) {
    b.load_const(key).load_const(value).emit(Op::BuildMap(1));
}

#[test]
fn test_map_unpack_merges_later_wins() {
    let mut b = CodeBuilder::new("<module>");
    one_key_map(&mut b, "a", 1);
    one_key_map(&mut b, "a", 2);
    b.emit(Op::BuildMapUnpack(2)).emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "{'a': 2}");
}

#[test]
fn test_map_unpack_for_call_rejects_duplicate_keywords() {
    let mut b = CodeBuilder::new("<module>");
    one_key_map(&mut b, "a", 1);
    one_key_map(&mut b, "a", 2);
    b.emit(Op::BuildMapUnpackWithCall(2)).emit(Op::ReturnValue);
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::TypeError);
    assert_eq!(exc.message(), "got multiple values for keyword argument 'a'");
}

#[test]
fn test_map_unpack_requires_mappings() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(1i64).emit(Op::BuildMapUnpack(1));
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::TypeError);
    assert_eq!(exc.message(), "'int' object is not a mapping");
}

#[test]
fn test_unhashable_set_member() {
    let mut b = CodeBuilder::new("<module>");
    b.emit(Op::BuildList(0)).emit(Op::BuildSet(1));
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::TypeError);
    assert_eq!(exc.message(), "unhashable type: 'list'");
}

#[test]
fn test_subscript_store_and_delete() {
    let mut b = CodeBuilder::new("<module>");
    b.emit(Op::BuildMap(0)).store_name("d");
    // d['k'] = 5
    b.load_const(5i64).load_name("d").load_const("k").emit(Op::StoreSubscr);
    b.load_const(6i64).load_name("d").load_const("j").emit(Op::StoreSubscr);
    b.load_name("d").load_const("k").emit(Op::DeleteSubscr);
    b.load_name("d").emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "{'j': 6}");
}

#[test]
fn test_operators_dispatch_through_the_value_layer() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(7i64).load_const(2i64).emit(Op::BinaryOp(BinOp::FloorDiv));
    b.emit(Op::UnaryOp(UnaryOp::Negative));
    b.load_const(-3i64).emit(Op::CompareOp(CmpOp::Eq));
    b.emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()), Val::Bool(true));
}

#[test]
fn test_inplace_add_extends_the_same_list() {
    let mut b = CodeBuilder::new("<module>");
    b.emit(Op::BuildList(0)).store_name("a");
    b.load_name("a").store_name("alias");
    b.load_name("a").load_const(1i64).emit(Op::BuildList(1)).emit(Op::InplaceOp(BinOp::Add)).store_name("a");
    b.load_name("alias").emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "[1]");
}

#[test]
fn test_stack_underflow_is_structural() {
    let mut b = CodeBuilder::new("<module>");
    b.emit(Op::PopTop);
    assert_eq!(
        structural(b.build().unwrap()),
        StructuralError::StackUnderflow {
            at: 0,
            wanted: 1,
            depth: 0
        }
    );
}

#[test]
fn test_print_expr_echoes_repr() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const("hi").emit(Op::PrintExpr);
    b.load_none().emit(Op::PrintExpr);
    let (value, output) = run_with_output(b.build().unwrap());
    assert_eq!(value, Val::None);
    assert_eq!(output, "'hi'\n");
}

#[test]
fn test_annotations_collect_in_module_locals() {
    // x: 'int' = 1; y: 'str'
    let mut b = CodeBuilder::new("<module>");
    b.emit(Op::SetupAnnotations)
        .load_const(1i64)
        .store_name("x")
        .load_const("int")
        .emit(Op::StoreAnnotation("x".to_string()))
        .emit(Op::SetupAnnotations)
        .load_const("str")
        .emit(Op::StoreAnnotation("y".to_string()));
    b.load_name("__annotations__").load_name("x").emit(Op::BuildTuple(2)).emit(Op::ReturnValue);
    assert_eq!(run(b.build().unwrap()).repr(), "({'x': 'int', 'y': 'str'}, 1)");
}

#[test]
fn test_store_annotation_without_setup_is_a_name_error() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const("int").emit(Op::StoreAnnotation("x".to_string()));
    let exc = uncaught(b.build().unwrap());
    assert_eq!(exc.kind(), ExcKind::NameError);
    assert_eq!(exc.message(), "__annotations__ not found");
}

#[test]
fn test_annotation_ops_decode_from_json() {
    let json = r#"{"name": "<module>", "instructions": [
        {"offset": 0, "op": "SetupAnnotations"},
        {"offset": 2, "op": "LoadConst", "arg": {"Str": "int"}},
        {"offset": 4, "op": "StoreAnnotation", "arg": "x"},
        {"offset": 6, "op": "LoadName", "arg": "__annotations__"},
        {"offset": 8, "op": "ReturnValue"}
    ]}"#;
    let code: CodeObject = serde_json::from_str(json).unwrap();
    assert!(code.disassemble().contains("STORE_ANNOTATION"));
    assert_eq!(run(code).repr(), "{'x': 'int'}");
}
