use pretty_assertions::assert_eq;
use v7::{CompileTarget, Engine, ExecError};

const SAMPLE: &str = "
    function gcd(a, b) { while (b) { var t = a % b; a = b; b = t } return a }
    var pairs = [[12, 18], [35, 14]];
    var out = '';
    for (var i = 0; i < pairs.length; i++) {
        out += gcd(pairs[i][0], pairs[i][1]) + ';';
    }
    out
";

/// Binary AST round trip: serialize, re-load, execute; same result as
/// executing the source directly.
#[test]
fn binary_ast_round_trip() {
    let mut engine = Engine::new();
    let direct = engine.exec(SAMPLE).unwrap();
    let direct = engine.to_display_string(direct).unwrap();

    let bin = engine.compile_to(SAMPLE, CompileTarget::AstBinary).unwrap();
    assert!(bin.starts_with(b"V\x07ASTV10\0"));

    let mut engine2 = Engine::new();
    let from_bin = engine2.exec_binary_ast(&bin).unwrap();
    let from_bin = engine2.to_display_string(from_bin).unwrap();
    assert_eq!(direct, from_bin);
    assert_eq!(from_bin, "6;7;");
}

/// Compiling from a binary AST yields the same opcode stream as compiling
/// the source directly (compared through the serialized form).
#[test]
fn binary_ast_compiles_identically() {
    let mut engine = Engine::new();
    let from_src = engine.compile_to(SAMPLE, CompileTarget::BcodeBinary).unwrap();
    let ast_bin = engine.compile_to(SAMPLE, CompileTarget::AstBinary).unwrap();
    let from_ast = engine.compile_binary_ast(&ast_bin).unwrap();
    assert_eq!(from_src, from_ast);
}

/// Binary bytecode round trip: serialize, re-load, execute.
#[test]
fn binary_bcode_round_trip() {
    let mut engine = Engine::new();
    let bin = engine
        .compile_to(SAMPLE, CompileTarget::BcodeBinary)
        .unwrap();
    assert!(bin.starts_with(b"V\x07BCODE:\0"));

    let mut engine2 = Engine::new();
    let v = engine2.exec_binary_bcode(&bin).unwrap();
    assert_eq!(engine2.to_display_string(v).unwrap(), "6;7;");
}

/// Nested function literals serialize recursively.
#[test]
fn bcode_nested_functions() {
    let src = "function outer() { function inner(x) { return x + 1 } return inner(41) } outer()";
    let mut engine = Engine::new();
    let bin = engine.compile_to(src, CompileTarget::BcodeBinary).unwrap();
    let mut engine2 = Engine::new();
    let v = engine2.exec_binary_bcode(&bin).unwrap();
    assert_eq!(v.as_number(), 42.0);
}

/// Number literals keep their exact bit pattern through the text encoding.
#[test]
fn bcode_number_precision() {
    let src = "0.1 + 0.2";
    let mut engine = Engine::new();
    let bin = engine.compile_to(src, CompileTarget::BcodeBinary).unwrap();
    let mut engine2 = Engine::new();
    let v = engine2.exec_binary_bcode(&bin).unwrap();
    assert_eq!(v.as_number(), 0.1 + 0.2);
}

/// Bad magic bytes are rejected up front.
#[test]
fn bad_magic_rejected() {
    let mut engine = Engine::new();
    assert!(matches!(
        engine.exec_binary_ast(b"not an ast"),
        Err(ExecError::InvalidArg(_))
    ));
    assert!(matches!(
        engine.exec_binary_bcode(b"not bytecode"),
        Err(ExecError::InvalidArg(_))
    ));
}

/// The text AST dump names nodes and inlined payloads.
#[test]
fn ast_text_dump() {
    let mut engine = Engine::new();
    let out = engine
        .compile_to("var x = 1;", CompileTarget::AstText)
        .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Script"));
    assert!(text.contains("VarDecl \"x\""));
    assert!(text.contains("Num \"1\""));
}

/// The disassembly names opcodes and literal operands.
#[test]
fn bcode_text_dump() {
    let mut engine = Engine::new();
    let out = engine
        .compile_to("1 + 2", CompileTarget::BcodeText)
        .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("PushOne"));
    assert!(text.contains("Add"));
    assert!(text.contains("SwapDrop"));
}
