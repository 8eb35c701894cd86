use v7::{Engine, EngineOpts, Val};

/// After a full collection every reachable value keeps its tag and, for
/// strings, its bytes.
#[test]
fn full_gc_preserves_reachable_values() {
    let mut engine = Engine::new();
    let s = engine.create_string("a string long enough to live in the owned heap");
    let pin = engine.own(s);
    let obj = engine.create_object();
    engine.set_property(obj, "tag", Val::number(5.0)).unwrap();
    let obj_pin = engine.own(obj);

    engine.gc(true);

    let s2 = engine.owned(&pin);
    assert!(s2.is_string());
    assert_eq!(
        engine.try_str(s2).unwrap(),
        "a string long enough to live in the owned heap"
    );
    let obj2 = engine.owned(&obj_pin);
    assert!(obj2.is_object());
    let tag = engine.get_property(obj2, "tag").unwrap();
    assert_eq!(tag.as_number(), 5.0);

    engine.disown(pin);
    engine.disown(obj_pin);
}

/// Unpinned garbage is reclaimed; pinned values survive.
#[test]
fn unreachable_objects_are_swept() {
    let mut engine = Engine::new();
    let baseline = engine.mem_stats().object_cells_live;
    for _ in 0..100 {
        let _garbage = engine.create_object();
    }
    assert!(engine.mem_stats().object_cells_live >= baseline + 100);
    engine.gc(true);
    assert_eq!(engine.mem_stats().object_cells_live, baseline);
}

/// Heavy string churn triggers compaction mid-script and nothing observable
/// changes: the loop result is exactly the concatenation.
#[test]
fn string_compaction_during_exec() {
    let opts = EngineOpts {
        string_heap_size: 256, // force frequent compactions
        ..EngineOpts::default()
    };
    let mut engine = Engine::with_opts(opts);
    let v = engine
        .exec("var s = ''; for (var i = 0; i < 50; i++) s += 'abcdefgh'; s")
        .unwrap();
    let s = engine.try_str(v).unwrap().into_owned();
    assert_eq!(s.len(), 400);
    assert!(s.bytes().all(|b| (b'a'..=b'h').contains(&b)));
    assert!(engine.mem_stats().gc_cycles > 0);
}

/// Values stored on the global object survive collections between execs.
#[test]
fn globals_survive_gc_between_execs() {
    let mut engine = Engine::new();
    engine
        .exec("var keep = 'precious data that must not be collected'")
        .unwrap();
    engine.gc(true);
    let v = engine.exec("keep").unwrap();
    assert_eq!(
        engine.try_str(v).unwrap(),
        "precious data that must not be collected"
    );
}

/// Closures keep their captured frames (and those frames' values) alive.
#[test]
fn closures_keep_scopes_alive() {
    let mut engine = Engine::new();
    engine
        .exec("function mk() { var hidden = 'captured string that lives in a frame'; return function() { return hidden } } var f = mk()")
        .unwrap();
    engine.gc(true);
    let v = engine.exec("f()").unwrap();
    assert_eq!(
        engine.try_str(v).unwrap(),
        "captured string that lives in a frame"
    );
}

/// The GC-inhibit counter delays collection until released.
#[test]
fn gc_inhibit_counter() {
    let mut engine = Engine::new();
    let baseline = engine.mem_stats().object_cells_live;
    for _ in 0..10 {
        let _ = engine.create_object();
    }
    engine.gc_inhibit();
    engine.gc(true);
    assert!(engine.mem_stats().object_cells_live >= baseline + 10);
    engine.gc_allow();
    engine.gc(true);
    assert_eq!(engine.mem_stats().object_cells_live, baseline);
}

/// Memory stats reflect arena and string heap usage.
#[test]
fn mem_stats_shape() {
    let mut engine = Engine::new();
    let stats = engine.mem_stats();
    // Bootstrap created the prototypes, the global, and the error table.
    assert!(stats.object_cells_live > 10);
    assert!(stats.property_cells_live > 10);
    assert_eq!(stats.gc_cycles, 0);
    engine.gc(false);
    assert_eq!(engine.mem_stats().gc_cycles, 1);
}
