use super::*;
use crate::host::Host;

#[derive(Debug)]
struct Greeting;

fn shout(_: &mut dyn Host, args: &[Val], _: &[(String, Val)]) -> anyhow::Result<Val> {
    let text = args.first().and_then(Val::as_str).unwrap_or_default();
    Ok(Val::from(format!("{}!", text.to_uppercase())))
}

impl Module for Greeting {
    fn name(&self) -> &str {
        "greeting"
    }

    fn exports(&self) -> Vec<(String, Val)> {
        vec![
            ("message".to_string(), Val::str("hello")),
            ("shout".to_string(), Val::native("shout", shout)),
            ("_private".to_string(), Val::Int(1)),
        ]
    }
}

fn engine_with_greeting() -> Engine<BufferHost> {
    let mut registry = ModuleRegistry::new();
    registry.register_module(Box::new(Greeting)).unwrap();
    Engine::new(BufferHost::with_registry(registry))
}

/// IMPORT_NAME with the level and fromlist operands it pops.
fn import(b: &mut CodeBuilder, module: &str, fromlist: &[&str]) {
    b.load_const(0i64);
    if fromlist.is_empty() {
        b.load_none();
    } else {
        b.emit(Op::LoadConst(Const::Tuple(fromlist.iter().map(|n| Const::from(*n)).collect())));
    }
    b.emit(Op::ImportName(module.to_string()));
}

#[test]
fn test_import_binds_the_module() {
    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "greeting", &[]);
    b.store_name("greeting");
    b.load_name("greeting").emit(Op::LoadAttr("message".to_string())).emit(Op::ReturnValue);
    let mut engine = engine_with_greeting();
    assert_eq!(engine.run(b.build().unwrap()).unwrap(), Val::str("hello"));
    assert_eq!(engine.global("greeting").unwrap().repr(), "<module 'greeting'>");
}

#[test]
fn test_from_import_pulls_attributes() {
    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "greeting", &["shout"]);
    b.emit(Op::ImportFrom("shout".to_string())).store_name("s").emit(Op::PopTop);
    b.load_name("s").load_const("hi").emit(Op::CallFunction(1)).emit(Op::ReturnValue);
    let mut engine = engine_with_greeting();
    assert_eq!(engine.run(b.build().unwrap()).unwrap(), Val::str("HI!"));
}

#[test]
fn test_import_star_skips_private_names() {
    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "greeting", &["*"]);
    b.emit(Op::ImportStar).load_none().emit(Op::ReturnValue);
    let mut engine = engine_with_greeting();
    engine.run(b.build().unwrap()).unwrap();
    assert_eq!(engine.global("message"), Some(Val::str("hello")));
    assert!(engine.global("shout").is_some());
    assert_eq!(engine.global("_private"), None);
}

#[test]
fn test_repeated_imports_share_one_module() {
    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "greeting", &[]);
    import(&mut b, "greeting", &[]);
    b.emit(Op::CompareOp(CmpOp::Is)).emit(Op::ReturnValue);
    let mut engine = engine_with_greeting();
    assert_eq!(engine.run(b.build().unwrap()).unwrap(), Val::Bool(true));
}

#[test]
fn test_missing_module() {
    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "nope", &[]);
    let err = engine_with_greeting().run(b.build().unwrap()).unwrap_err();
    let exc = err.downcast::<UncaughtException>().unwrap();
    assert_eq!(exc.kind(), ExcKind::ModuleNotFoundError);
    assert_eq!(exc.message(), "No module named 'nope'");
}

#[test]
fn test_missing_name_in_from_import() {
    let mut b = CodeBuilder::new("<module>");
    import(&mut b, "greeting", &["nope"]);
    b.emit(Op::ImportFrom("nope".to_string()));
    let err = engine_with_greeting().run(b.build().unwrap()).unwrap_err();
    let exc = err.downcast::<UncaughtException>().unwrap();
    assert_eq!(exc.kind(), ExcKind::ImportError);
    assert_eq!(exc.message(), "cannot import name 'nope' from 'greeting'");
}

#[test]
fn test_import_error_is_catchable_as_import_error() {
    let mut b = CodeBuilder::new("<module>");
    let (handler, reraise, end) = (b.label(), b.label(), b.label());
    b.emit_jump(Op::SetupExcept, handler);
    import(&mut b, "nope", &[]);
    b.store_name("nope").emit(Op::PopBlock).jump_forward(end);
    b.bind(handler)
        .emit(Op::DupTop)
        .load_name("ImportError")
        .emit(Op::CompareOp(CmpOp::ExceptionMatch))
        .emit_jump(Op::PopJumpIfFalse, reraise)
        .emit(Op::PopTop)
        .emit(Op::PopTop)
        .emit(Op::PopTop)
        .load_const("fallback")
        .store_name("nope")
        .emit(Op::PopExcept)
        .jump_forward(end);
    b.bind(reraise).emit(Op::EndFinally);
    b.bind(end).load_name("nope").emit(Op::ReturnValue);
    let mut engine = engine_with_greeting();
    assert_eq!(engine.run(b.build().unwrap()).unwrap(), Val::str("fallback"));
}
