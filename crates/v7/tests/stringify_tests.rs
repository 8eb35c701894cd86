use pretty_assertions::assert_eq;
use v7::{Engine, ExecError};

fn json(src: &str) -> String {
    let mut engine = Engine::new();
    let v = engine.exec(src).expect("script should run");
    engine.try_str(v).expect("stringify returns a string").into_owned()
}

/// The flagship JSON shape: object with nested array, insertion order.
#[test]
fn stringify_object_with_array() {
    assert_eq!(json("JSON.stringify({a:1,b:[2,3]})"), r#"{"a":1,"b":[2,3]}"#);
}

/// Scalars in JSON mode.
#[test]
fn stringify_scalars() {
    assert_eq!(json("JSON.stringify('x\\ny')"), "\"x\\ny\"");
    assert_eq!(json("JSON.stringify(1.5)"), "1.5");
    assert_eq!(json("JSON.stringify(true)"), "true");
    assert_eq!(json("JSON.stringify(null)"), "null");
    // Non-representable values render as null.
    assert_eq!(json("JSON.stringify(undefined)"), "null");
    assert_eq!(json("JSON.stringify(0 / 0)"), "null");
    assert_eq!(json("JSON.stringify(function(){})"), "null");
}

/// Array holes and nested structures.
#[test]
fn stringify_arrays() {
    assert_eq!(json("JSON.stringify([1, , 3])"), "[1,null,3]");
    assert_eq!(json("JSON.stringify([[]])"), "[[]]");
    assert_eq!(
        json("JSON.stringify([{k:'v'}, 'tail'])"),
        r#"[{"k":"v"},"tail"]"#
    );
}

/// Cyclic structures throw a TypeError in JSON mode.
#[test]
fn stringify_cycles_throw() {
    let mut engine = Engine::new();
    let err = engine
        .exec("var o = {}; o.self = o; JSON.stringify(o)")
        .unwrap_err();
    match err {
        ExecError::Exception(shown) => assert!(shown.contains("circular")),
        other => panic!("expected an exception, got {other:?}"),
    }
}

/// A toJSON method takes over the representation.
#[test]
fn to_json_hook() {
    assert_eq!(
        json("JSON.stringify({toJSON: function() { return 'custom' }})"),
        "\"custom\""
    );
}

/// JSON.parse inverts JSON.stringify for expressible values.
#[test]
fn json_round_trip() {
    let src = "
        var v = { s: 'text', n: 1.25, f: false, z: null, arr: [1, 2, 3] };
        JSON.stringify(JSON.parse(JSON.stringify(v))) === JSON.stringify(v)
    ";
    let mut engine = Engine::new();
    let v = engine.exec(src).unwrap();
    assert!(v.is_boolean() && v.as_boolean());
}

/// Default-mode rendering of the value kinds.
#[test]
fn display_mode() {
    let mut engine = Engine::new();
    let cases = [
        ("undefined", "undefined"),
        ("null", "null"),
        ("'plain'", "plain"),
        ("3 * 7", "21"),
        ("[1, 'two', [3]]", "1,two,3"),
        ("({})", "[object Object]"),
        ("({toString: function() { return 'custom!' }})", "custom!"),
        ("new TypeError('oops')", "TypeError: oops"),
        ("/ab/gi", "/ab/gi"),
    ];
    for (src, expected) in cases {
        let v = engine.exec(src).unwrap();
        assert_eq!(engine.to_display_string(v).unwrap(), expected, "case {src}");
    }
}

/// Debug mode keeps function and regexp forms readable.
#[test]
fn debug_mode() {
    let mut engine = Engine::new();
    let v = engine.exec("({f: function(){}, r: /x/m, n: 1})").unwrap();
    assert_eq!(
        engine.to_debug_string(v).unwrap(),
        r#"{"f":[function],"r":/x/m,"n":1}"#
    );
}

/// Number rendering: ten significant digits under 1e10, twenty-one above,
/// literals for the non-finite values.
#[test]
fn number_rendering() {
    let mut engine = Engine::new();
    let cases = [
        ("0", "0"),
        ("123456789.125", "123456789.1"),
        ("1e21", "1e+21"),
        ("1e-7", "1e-07"),
        ("1/0", "Infinity"),
        ("-1/0", "-Infinity"),
        ("0/0", "NaN"),
        ("100000000000", "100000000000"),
    ];
    for (src, expected) in cases {
        let v = engine.exec(src).unwrap();
        assert_eq!(engine.to_display_string(v).unwrap(), expected, "case {src}");
    }
}
