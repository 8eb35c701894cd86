use v7::{Engine, ExecError, JsError, Val, PROP_DONT_ENUM, PROP_GETTER, PROP_READ_ONLY};

/// Values created through the host API round-trip through properties.
#[test]
fn create_and_property_access() {
    let mut engine = Engine::new();
    let obj = engine.create_object();
    let s = engine.create_string("forty two");
    engine.set_property(obj, "label", s).unwrap();
    engine.set_property(obj, "n", Val::number(42.0)).unwrap();

    let label = engine.get_property(obj, "label").unwrap();
    assert_eq!(engine.try_str(label).unwrap(), "forty two");
    let n = engine.get_property(obj, "n").unwrap();
    assert_eq!(n.as_number(), 42.0);
    // Missing properties read as undefined through the prototype walk.
    let missing = engine.get_property(obj, "nope").unwrap();
    assert!(missing.is_undefined());
}

/// Array helpers: push, index access, length, deletion.
#[test]
fn array_helpers() {
    let mut engine = Engine::new();
    let arr = engine.create_array();
    assert!(engine.is_array(arr));
    engine.array_push_value(arr, Val::number(1.0)).unwrap();
    engine.array_push_value(arr, Val::number(2.0)).unwrap();
    assert_eq!(engine.array_length_value(arr), 2);
    let head = engine.array_get_value(arr, 0).unwrap();
    assert_eq!(head.as_number(), 1.0);
    assert!(engine.array_del_value(arr, 0));
    let hole = engine.array_get_value(arr, 0).unwrap();
    assert!(hole.is_undefined());
}

/// Host sets are authoritative: READ_ONLY only binds JS-level writes.
#[test]
fn attribute_flags() {
    let mut engine = Engine::new();
    let global = engine.global();
    engine.set_property_attrs(global, "locked", Val::number(1.0), PROP_READ_ONLY);
    // A JS write is silently ignored...
    engine.exec("locked = 99").unwrap();
    let v = engine.get_property(global, "locked").unwrap();
    assert_eq!(v.as_number(), 1.0);
    // ...while a host write with attrs replaces it.
    engine.set_property_attrs(global, "locked", Val::number(2.0), 0);
    let v = engine.get_property(global, "locked").unwrap();
    assert_eq!(v.as_number(), 2.0);
}

fn answer(_engine: &mut Engine, _this: Val, _args: &[Val]) -> Result<Val, Val> {
    Ok(Val::number(42.0))
}

fn fail(engine: &mut Engine, _this: Val, _args: &[Val]) -> Result<Val, Val> {
    Err(engine.throwf(JsError::Type, "host said no"))
}

fn add_all(engine: &mut Engine, _this: Val, args: &[Val]) -> Result<Val, Val> {
    let mut sum = 0.0;
    for &a in args {
        sum += engine.to_number(a)?;
    }
    Ok(Val::number(sum))
}

/// cfunctions are callable from JS and from `apply`.
#[test]
fn cfunctions() {
    let mut engine = Engine::new();
    let global = engine.global();
    let f = engine.create_cfunction(add_all);
    engine.set_property(global, "addAll", f).unwrap();
    let v = engine.exec("addAll(1, 2, 3, 4)").unwrap();
    assert_eq!(v.as_number(), 10.0);

    let direct = engine
        .apply(f, Val::UNDEFINED, &[Val::number(5.0), Val::number(6.0)])
        .unwrap();
    assert_eq!(direct.as_number(), 11.0);
}

/// A cfunction error unwinds like a JS throw and is catchable.
#[test]
fn cfunction_errors_are_catchable() {
    let mut engine = Engine::new();
    let global = engine.global();
    let f = engine.create_cfunction(fail);
    engine.set_property(global, "nope", f).unwrap();
    let v = engine
        .exec("try { nope() } catch (e) { e.message }")
        .unwrap();
    assert_eq!(engine.try_str(v).unwrap(), "host said no");

    let err = engine.exec("nope()").unwrap_err();
    assert!(matches!(err, ExecError::Exception(_)));
    assert!(engine.thrown_value().is_some());
}

/// Getter properties installed via attrs are invoked by reads.
#[test]
fn accessor_properties() {
    let mut engine = Engine::new();
    let obj = engine.create_object();
    let getter = engine.create_cfunction(answer);
    engine.set_property_attrs(obj, "dynamic", getter, PROP_GETTER);
    let v = engine.get_property(obj, "dynamic").unwrap();
    assert_eq!(v.as_number(), 42.0);

    let global = engine.global();
    engine.set_property(global, "host", obj).unwrap();
    let v = engine.exec("host.dynamic + 1").unwrap();
    assert_eq!(v.as_number(), 43.0);
}

/// apply() calls JS functions synchronously with an explicit `this`.
#[test]
fn apply_js_function() {
    let mut engine = Engine::new();
    engine
        .exec("function scale(x) { return this.factor * x }")
        .unwrap();
    let global = engine.global();
    let f = engine.get_property(global, "scale").unwrap();
    let this = engine.create_object();
    engine.set_property(this, "factor", Val::number(3.0)).unwrap();
    let v = engine.apply(f, this, &[Val::number(7.0)]).unwrap();
    assert_eq!(v.as_number(), 21.0);
}

/// Property enumeration yields (name, value) pairs in insertion order,
/// skipping hidden and non-enumerable entries.
#[test]
fn next_property_iteration() {
    let mut engine = Engine::new();
    let obj = engine.create_object();
    engine.set_property(obj, "a", Val::number(1.0)).unwrap();
    engine.set_property(obj, "b", Val::number(2.0)).unwrap();
    engine.set_property_attrs(obj, "secret", Val::number(3.0), PROP_DONT_ENUM);

    let mut names = Vec::new();
    let mut handle = Val::NULL;
    while let Some((next, name, value)) = engine.next_property(obj, handle).unwrap() {
        handle = next;
        let name = engine.try_str(name).unwrap().into_owned();
        names.push((name, value.as_number()));
    }
    assert_eq!(names, vec![("a".to_owned(), 1.0), ("b".to_owned(), 2.0)]);
}

/// parse_json builds real values; bad input reports SyntaxError.
#[test]
fn parse_json_host_entry() {
    let mut engine = Engine::new();
    let v = engine.parse_json(r#"{"k": [1, true, null, "s"]}"#).unwrap();
    let arr = engine.get_property(v, "k").unwrap();
    assert!(engine.is_array(arr));
    assert_eq!(engine.array_length_value(arr), 4);

    let err = engine.parse_json("{oops").unwrap_err();
    assert!(matches!(err, ExecError::Exception(_)));
}

/// The interrupt flag raises at the next opcode boundary.
#[test]
fn interrupt_raises() {
    let mut engine = Engine::new();
    let handle = engine.interrupt_handle();
    handle.interrupt();
    let err = engine.exec("1 + 1").unwrap_err();
    match err {
        ExecError::Exception(shown) => assert!(shown.contains("interrupted")),
        other => panic!("expected an exception, got {other:?}"),
    }
    // The flag is one-shot.
    let v = engine.exec("1 + 1").unwrap();
    assert_eq!(v.as_number(), 2.0);
}

/// foreign values round-trip opaquely, including high addresses.
#[test]
fn foreign_values() {
    let ptr = usize::MAX - 0xabc;
    let v = Val::foreign(ptr);
    assert!(v.is_foreign());
    assert_eq!(v.to_foreign(), ptr);
}
