use v7::{Engine, ExecError};

/// Runs a script and returns the default stringification of its value.
fn eval(src: &str) -> String {
    let mut engine = Engine::new();
    let v = engine.exec(src).expect("script should run");
    engine.to_display_string(v).expect("result should print")
}

fn eval_in(engine: &mut Engine, src: &str) -> String {
    let v = engine.exec(src).expect("script should run");
    engine.to_display_string(v).expect("result should print")
}

/// A for loop accumulating into a hoisted var.
#[test]
fn counting_loop() {
    assert_eq!(eval("var x = 0; for (var i = 0; i < 5; i++) x += i; x"), "10");
}

/// A thrown string is bound by the catch clause.
#[test]
fn throw_and_catch() {
    assert_eq!(eval("try { throw 'e' } catch(e) { e + '!'} "), "e!");
}

/// A return inside finally wins over the return inside try.
#[test]
fn finally_overrides_return() {
    assert_eq!(eval("(function(){ try { return 1 } finally { return 2 } })()"), "2");
}

/// typeof never throws on unresolved identifiers.
#[test]
fn typeof_undeclared() {
    assert_eq!(eval("typeof undeclaredIdentifier"), "undefined");
}

/// Arithmetic, division edge cases, and modulo of non-finite operands.
#[test]
fn number_arithmetic() {
    assert_eq!(eval("1 + 2 * 3 - 4 / 2"), "5");
    assert_eq!(eval("1 / 0"), "Infinity");
    assert_eq!(eval("-1 / 0"), "-Infinity");
    assert_eq!(eval("0 / 0"), "NaN");
    assert_eq!(eval("5 % 0"), "NaN");
    assert_eq!(eval("7 % 3"), "1");
    assert_eq!(eval("0.1 + 0.2"), "0.3");
}

/// The ADD rule: anything outside undefined/number/boolean concatenates.
#[test]
fn add_coercions() {
    assert_eq!(eval("'a' + 1"), "a1");
    assert_eq!(eval("1 + null"), "1null");
    assert_eq!(eval("1 + undefined"), "NaN");
    assert_eq!(eval("true + 1"), "2");
    assert_eq!(eval("'' + 12"), "12");
}

/// Bitwise and shift operators convert through int32.
#[test]
fn bitwise_and_shifts() {
    assert_eq!(eval("(0xff & 0x0f) | (1 << 4)"), "31");
    assert_eq!(eval("-1 >>> 28"), "15");
    assert_eq!(eval("~0"), "-1");
    assert_eq!(eval("1 << 33"), "2"); // shift count masked with 0x1f
    assert_eq!(eval("3.9 ^ 0"), "3");
}

/// Strict vs loose equality.
#[test]
fn equality() {
    assert_eq!(eval("null == undefined"), "true");
    assert_eq!(eval("null === undefined"), "false");
    assert_eq!(eval("NaN == NaN"), "false");
    assert_eq!(eval("'1' == 1"), "true");
    assert_eq!(eval("'1' === 1"), "false");
    assert_eq!(eval("'abc' === 'ab' + 'c'"), "true");
    assert_eq!(eval("({}) == ({})"), "false");
}

/// Relational operators compare strings lexicographically.
#[test]
fn relational() {
    assert_eq!(eval("'abc' < 'abd'"), "true");
    assert_eq!(eval("2 < 10"), "true");
    assert_eq!(eval("'2' < '10'"), "false");
    assert_eq!(eval("1 <= NaN"), "false");
}

/// Logical operators short-circuit and keep the operand value.
#[test]
fn logical_operators() {
    assert_eq!(eval("0 || 'fallback'"), "fallback");
    assert_eq!(eval("1 && 2"), "2");
    assert_eq!(eval("false ? 'a' : 'b'"), "b");
    assert_eq!(eval("var n = 0; true || (n = 1); n"), "0");
}

/// Automatic semicolon insertion between statements.
#[test]
fn semicolon_insertion() {
    assert_eq!(eval("var a = 1\nvar b = 2\na + b"), "3");
}

/// Function declarations hoist above their textual position.
#[test]
fn function_hoisting() {
    assert_eq!(eval("var r = f(); function f() { return 'hoisted' } r"), "hoisted");
}

/// Closures capture their defining scope by reference.
#[test]
fn closures_capture_scope() {
    let src = "
        function mk() { var c = 0; return function() { c++; return c } }
        var f = mk();
        f(); f(); f()
    ";
    assert_eq!(eval(src), "3");
}

/// Recursion through the global binding.
#[test]
fn recursion() {
    let src = "function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2) } fib(10)";
    assert_eq!(eval(src), "55");
}

/// Constructor calls: `this` binding, implicit return, prototype methods.
#[test]
fn constructors_and_prototypes() {
    let mut engine = Engine::new();
    assert_eq!(
        eval_in(&mut engine, "function P(n) { this.n = n } var p = new P(5); p.n"),
        "5"
    );
    assert_eq!(
        eval_in(&mut engine, "P.prototype.get = function() { return this.n * 2 }; p.get()"),
        "10"
    );
    assert_eq!(eval_in(&mut engine, "p instanceof P"), "true");
    assert_eq!(eval_in(&mut engine, "({}) instanceof P"), "false");
}

/// A constructor returning an object overrides the fresh `this`.
#[test]
fn constructor_explicit_object_return() {
    assert_eq!(
        eval("function C() { return { marker: 7 } } new C().marker"),
        "7"
    );
}

/// Switch dispatch, fallthrough, break, and default.
#[test]
fn switch_semantics() {
    let src = "
        var r = '';
        switch (2) {
            case 1: r += 'a';
            case 2: r += 'b';
            case 3: r += 'c'; break;
            default: r += 'd';
        }
        r
    ";
    assert_eq!(eval(src), "bc");
    assert_eq!(
        eval("var r = ''; switch (9) { case 1: r = 'one'; break; default: r = 'dfl' } r"),
        "dfl"
    );
}

/// break and continue thread through the loop try-entries.
#[test]
fn break_and_continue() {
    let src = "
        var s = 0;
        for (var i = 0; i < 10; i++) {
            if (i % 2) continue;
            if (i > 6) break;
            s += i;
        }
        s
    ";
    assert_eq!(eval(src), "12");
}

/// while and do-while loops.
#[test]
fn while_loops() {
    assert_eq!(eval("var n = 0; while (n < 4) n++; n"), "4");
    assert_eq!(eval("var n = 9; do { n++ } while (false); n"), "10");
}

/// A finally block runs exactly once per exit, on every exit path.
#[test]
fn finally_runs_once_per_exit() {
    let src = "
        var log = '';
        for (var i = 0; i < 3; i++) {
            try {
                if (i == 1) continue;
                log += 'a';
            } finally {
                log += 'f';
            }
        }
        log
    ";
    assert_eq!(eval(src), "affaf");

    let src = "
        var log = '';
        function f() {
            try { throw 'boom' } finally { log += 'F' }
        }
        try { f() } catch (e) { log += e }
        log
    ";
    assert_eq!(eval(src), "Fboom");
}

/// Exceptions unwind across call frames to the nearest catch.
#[test]
fn throw_across_frames() {
    assert_eq!(
        eval("function f() { throw 'x' } try { f() } catch(e) { 'caught:' + e }"),
        "caught:x"
    );
}

/// An uncaught throw surfaces as an exec exception and stays readable.
#[test]
fn uncaught_throw() {
    let mut engine = Engine::new();
    let err = engine.exec("throw 'kaboom'").unwrap_err();
    assert!(matches!(err, ExecError::Exception(_)));
    let thrown = engine.thrown_value().expect("thrown value is stored");
    assert_eq!(engine.to_display_string(thrown).unwrap(), "kaboom");
    engine.thrown_clear();
    assert!(engine.thrown_value().is_none());
    // The engine is reusable after an exception.
    let v = engine.exec("1 + 1").unwrap();
    assert_eq!(v.as_number(), 2.0);
}

/// Error constructors produce catchable, printable error objects.
#[test]
fn error_constructors() {
    assert_eq!(
        eval("try { throw new TypeError('bad') } catch (e) { e.message }"),
        "bad"
    );
    assert_eq!(eval("new RangeError('r') instanceof RangeError"), "true");
    let mut engine = Engine::new();
    let err = engine.exec("undefinedVariable + 1").unwrap_err();
    match err {
        ExecError::Exception(shown) => assert!(shown.contains("ReferenceError")),
        other => panic!("expected an exception, got {other:?}"),
    }
}

/// for-in visits enumerable own properties in insertion order.
#[test]
fn for_in_enumeration() {
    assert_eq!(
        eval("var o = { a: 1, b: 2, c: 3 }; var r = ''; for (var k in o) r += k; r"),
        "abc"
    );
    assert_eq!(
        eval("var a = [10, 20, 30]; var s = 0; for (var i in a) s += a[i]; s"),
        "60"
    );
    // break inside for-in leaves a clean stack
    assert_eq!(
        eval("var o = {a:1, b:2}; var r = ''; for (var k in o) { r += k; break } r"),
        "a"
    );
}

/// Member lvalues in for-in park the enumerated name in the stash.
#[test]
fn for_in_member_lvalue() {
    assert_eq!(
        eval("var o = {x: 1}; var t = {}; for (t.k in o); t.k"),
        "x"
    );
}

/// Arrays: literals, holes, length assignment truncates indexed storage.
#[test]
fn array_behavior() {
    assert_eq!(eval("[1, 2, 3].length"), "3");
    assert_eq!(eval("[1, , 3].length"), "3");
    assert_eq!(eval("var a = [1, 2, 3]; a.length = 1; a.length"), "1");
    assert_eq!(eval("var a = [1, 2, 3]; a.length = 1; '' + a[1]"), "undefined");
    assert_eq!(eval("var a = []; a[2] = 9; a.length"), "3");
}

/// delete removes own properties and reports non-deletable ones.
#[test]
fn delete_operator() {
    assert_eq!(eval("var o = { x: 1 }; delete o.x; '' + o.x"), "undefined");
    assert_eq!(eval("var o = { x: 1 }; delete o.y"), "true");
    assert_eq!(eval("delete 42"), "true");
}

/// `in` checks the whole prototype chain.
#[test]
fn in_operator() {
    assert_eq!(eval("'a' in { a: 1 }"), "true");
    assert_eq!(eval("'b' in { a: 1 }"), "false");
    assert_eq!(eval("0 in [7]"), "true");
    assert_eq!(
        eval("function C() {} C.prototype.m = 1; 'm' in new C()"),
        "true"
    );
}

/// Pre/post increment keep numeric semantics on string operands.
#[test]
fn increment_decrement() {
    assert_eq!(eval("var x = '5'; x++; x"), "6");
    assert_eq!(eval("var x = 5; x++"), "5");
    assert_eq!(eval("var x = 5; ++x"), "6");
    assert_eq!(eval("var o = { n: 1 }; o.n++; o.n"), "2");
    assert_eq!(eval("var o = { n: 1 }; o.n++"), "1");
    assert_eq!(eval("var a = [5]; --a[0]; a[0]"), "4");
}

/// Compound assignment works on every lvalue form.
#[test]
fn compound_assignment() {
    assert_eq!(eval("var x = 4; x *= 3; x"), "12");
    assert_eq!(eval("var o = { n: 8 }; o.n >>= 2; o.n"), "2");
    assert_eq!(eval("var a = [1]; a[0] += 9; a[0]"), "10");
}

/// The comma operator evaluates left to right and keeps the last value.
#[test]
fn comma_operator() {
    assert_eq!(eval("var n = 0; (n = 1, n + 1, 'last')"), "last");
}

/// Nested eval shares the global scope and reports its own errors.
#[test]
fn nested_eval() {
    assert_eq!(eval("eval('1 + 2') + 1"), "4");
    assert_eq!(eval("eval('var zz = 7'); zz"), "7");
    assert_eq!(
        eval("try { eval('}bad{') } catch (e) { 'syntax' }"),
        "syntax"
    );
}

/// Global vars persist across exec calls on the same engine.
#[test]
fn state_persists_across_execs() {
    let mut engine = Engine::new();
    eval_in(&mut engine, "var counter = 40");
    assert_eq!(eval_in(&mut engine, "counter += 2; counter"), "42");
}

/// Strict mode rejects assignment to undeclared identifiers at runtime.
#[test]
fn strict_mode_assignment() {
    // sloppy mode creates the global silently
    assert_eq!(eval("zoo = 3; zoo"), "3");
    let mut engine = Engine::new();
    let err = engine.exec("'use strict'; boo = 3").unwrap_err();
    match err {
        ExecError::Exception(shown) => assert!(shown.contains("ReferenceError")),
        other => panic!("expected an exception, got {other:?}"),
    }
}

/// `this` at the top level and in plain calls is the global object.
#[test]
fn this_binding() {
    let mut engine = Engine::new();
    let global = engine.global();
    let v = engine.exec("this").unwrap();
    assert_eq!(v, global);
    assert_eq!(
        eval_in(&mut engine, "var who = 'global'; function f() { return this.who } f()"),
        "global"
    );
}

/// Labels parse and compile to their inner statement; labeled jumps do not.
#[test]
fn labels() {
    assert_eq!(eval("outer: 1 + 1"), "2");
    let mut engine = Engine::new();
    assert!(matches!(
        engine.exec("x: for (;;) { break x; }"),
        Err(ExecError::Syntax(_))
    ));
}

/// Regexp literals carry source and flags; typeof says object.
#[test]
fn regexp_literals() {
    assert_eq!(eval("typeof /ab+c/"), "object");
    assert_eq!(eval("/ab+c/gi.source"), "ab+c");
    assert_eq!(eval("/x/g.global"), "true");
    assert_eq!(eval("/x/.ignoreCase"), "false");
}

/// Returned value of a bare script is the last statement value.
#[test]
fn statement_value_threading() {
    assert_eq!(eval("1; 2; 3"), "3");
    assert_eq!(eval("if (true) 'yes'; else 'no';"), "yes");
    let mut engine = Engine::new();
    let v = engine.exec("var a = 1;").unwrap();
    assert!(v.is_undefined());
    let v = engine.exec("").unwrap();
    assert!(v.is_undefined());
}
