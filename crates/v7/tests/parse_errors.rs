use v7::{Engine, ExecError};

fn syntax_error(src: &str) -> v7::SyntaxError {
    let mut engine = Engine::new();
    match engine.exec(src) {
        Err(ExecError::Syntax(e)) => e,
        other => panic!("expected a syntax error for {src:?}, got {other:?}"),
    }
}

/// Errors carry line, column, and a caret excerpt.
#[test]
fn error_positions() {
    let e = syntax_error("var x = 1;\nvar y = @;");
    assert_eq!(e.line, 2);
    assert_eq!(e.col, 9);
    assert!(e.excerpt.ends_with("        ^"));
}

/// Unterminated literals are lexer-level syntax errors.
#[test]
fn unterminated_literals() {
    syntax_error("'no end");
    syntax_error("/* no end");
    syntax_error("/regex");
}

/// Structural statement errors.
#[test]
fn malformed_statements() {
    syntax_error("if (x");
    syntax_error("var;");
    syntax_error("function () {}"); // declarations need a name
    syntax_error("do x++ while (1)"); // no terminator before 'while'
    syntax_error("{");
}

/// A try needs at least one of catch/finally.
#[test]
fn try_requires_handler() {
    syntax_error("try { 1 }");
}

/// break/continue outside a loop are compile-time errors.
#[test]
fn stray_jumps() {
    syntax_error("break;");
    syntax_error("continue;");
    syntax_error("return 1;");
}

/// with statements parse but the bytecode compiler rejects them.
#[test]
fn with_is_rejected() {
    let e = syntax_error("with (o) { x }");
    assert!(e.message.contains("with"));
}

/// Calls with more than 127 arguments cannot be encoded.
#[test]
fn too_many_call_arguments() {
    let mut src = String::from("f(");
    for i in 0..128 {
        if i > 0 {
            src.push(',');
        }
        src.push('1');
    }
    src.push(')');
    let e = syntax_error(&src);
    assert!(e.message.contains("arguments"));
}

/// Duplicate data properties are rejected only in strict mode.
#[test]
fn duplicate_properties_strict_only() {
    syntax_error("'use strict'; var o = { a: 1, a: 2 };");
    let mut engine = Engine::new();
    let v = engine.exec("var o = { a: 1, a: 2 }; o.a").unwrap();
    assert_eq!(v.as_number(), 2.0);
}

/// Assignment needs a real lvalue.
#[test]
fn invalid_assignment_targets() {
    syntax_error("1 = 2");
    syntax_error("a + b = c");
}

/// Overflowing the 16-bit skip width reports AstTooLarge at parse end.
#[test]
fn ast_too_large() {
    let mut src = String::new();
    for i in 0..8000 {
        src.push_str(&format!("var a{i} = {i};\n"));
    }
    let mut engine = Engine::new();
    assert!(matches!(engine.exec(&src), Err(ExecError::AstTooLarge)));
}

/// The parser frame limit turns pathological nesting into StackOverflow
/// instead of exhausting the machine stack.
#[test]
fn deep_nesting_is_bounded() {
    let opts = v7::EngineOpts {
        max_parser_frames: 64,
        ..v7::EngineOpts::default()
    };
    let mut engine = Engine::with_opts(opts);
    let src = format!("{}1{}", "(".repeat(5000), ")".repeat(5000));
    assert!(matches!(engine.exec(&src), Err(ExecError::StackOverflow)));
}

/// The VM call-depth limit surfaces as a catchable stack-overflow error.
#[test]
fn runaway_recursion() {
    let mut engine = Engine::new();
    let err = engine.exec("function f() { return f() } f()").unwrap_err();
    match err {
        ExecError::Exception(shown) => assert!(shown.contains("stack overflow")),
        other => panic!("expected an exception, got {other:?}"),
    }
}
