//! Garbage collector behavior: cycle reclamation, generations, staged
//! collection of closure graphs, shutdown.
//!
//! The shapes here mirror the language's own collector regressions: an
//! array that contains itself, an object that members itself, closures
//! whose capture scope holds the cell their own function value lives in,
//! and the two-step reclamation of a closure graph pinned by an external
//! root.

use asteria::{
    Exception, Generation, GlobalContext, Options, Program, Script, SourceLocation, Statement,
    Value, build::*,
};
use pretty_assertions::assert_eq;

fn s(line: u32) -> SourceLocation {
    SourceLocation::new("gc", line)
}

fn run_in(global: &std::rc::Rc<GlobalContext>, statements: Vec<Statement>) -> Result<Value, Exception> {
    let script = Script::new(Program::new("gc", statements), &Options::default());
    script.execute(global).map(|r| r.read().unwrap_or(Value::Null))
}

// =============================================================================
// Cycle reclamation
// =============================================================================

/// `a = []; a[0] = a;` — once the frame holding `a` is gone, a collection
/// reclaims the cell.
#[test]
fn array_self_reference_is_reclaimed() {
    let global = GlobalContext::new_default();
    run_in(
        &global,
        vec![
            var(s(1), "a", Some(array(vec![]))),
            expr_stmt(s(2), assign(index(name("a"), lit(0)), name("a"))),
        ],
    )
    .unwrap();
    let before = global.gc().count_pooled_variables();
    let reclaimed = global.collect(None);
    assert!(reclaimed >= 1, "reclaimed {reclaimed}");
    assert_eq!(global.gc().count_pooled_variables(), before - reclaimed);
    // A second pass finds nothing new.
    assert_eq!(global.collect(None), 0);
}

/// `a.self = a;` — same, through an object member.
#[test]
fn object_self_reference_is_reclaimed() {
    let global = GlobalContext::new_default();
    run_in(
        &global,
        vec![
            var(s(1), "a", Some(object(vec![]))),
            expr_stmt(s(2), assign(member(name("a"), "self"), name("a"))),
        ],
    )
    .unwrap();
    let before = global.gc().count_pooled_variables();
    let reclaimed = global.collect(None);
    assert!(reclaimed >= 1);
    assert_eq!(global.gc().count_pooled_variables(), before - reclaimed);
}

/// `var f; f = func() { return f; };` — the closure captures the cell its
/// own value is stored in: a pure cycle, invisible to refcounting alone.
#[test]
fn closure_capture_cycle_is_reclaimed() {
    let global = GlobalContext::new_default();
    let lambda = fn_def("lambda", &[], false, vec![ret(s(2), name("f"))], s(2));
    run_in(
        &global,
        vec![
            var(s(1), "f", None),
            expr_stmt(s(2), assign(name("f"), closure(lambda))),
        ],
    )
    .unwrap();
    let reclaimed = global.collect(None);
    assert!(reclaimed >= 1, "cycle not reclaimed (got {reclaimed})");
    assert_eq!(global.collect(None), 0);
}

/// Live data reachable from the global scope survives any number of
/// collections.
#[test]
fn rooted_data_survives() {
    let global = GlobalContext::new_default();
    let cell = global.define_variable("keep", Value::from(vec![Value::Integer(1)]));
    global.collect(None);
    global.collect(None);
    assert_eq!(cell.clone_value().print_string(), "[ 1 ]");
    assert_eq!(
        global
            .global_scope()
            .lookup("keep")
            .unwrap()
            .unwrap()
            .read()
            .unwrap()
            .print_string(),
        "[ 1 ]"
    );
}

// =============================================================================
// Staged reclamation of a closure graph (the two-collect regression)
// =============================================================================

/// With an external root pinning the `[foo, bar]` array, the first collect
/// reclaims exactly the two function cells (nothing reaches them); once
/// the root is dropped, the second collect reclaims the three captured
/// cells.
#[test]
fn closure_graph_reclaims_in_two_stages() {
    let global = GlobalContext::new_default();
    let sink = global.define_variable("sink", Value::Null);

    // (func() {
    //   var x, y, z;
    //   func foo() { return [x, y, z]; }
    //   func bar() { return [z, y, x]; }
    //   x = [foo, bar];  y = x;  z = x;  sink = x;
    // }());
    let foo = fn_def(
        "foo",
        &[],
        false,
        vec![ret(s(3), array(vec![name("x"), name("y"), name("z")]))],
        s(3),
    );
    let bar = fn_def(
        "bar",
        &[],
        false,
        vec![ret(s(4), array(vec![name("z"), name("y"), name("x")]))],
        s(4),
    );
    let anon = fn_def(
        "anon",
        &[],
        false,
        vec![
            vars(s(2), vec![("x", None), ("y", None), ("z", None)]),
            func(s(3), "foo", foo),
            func(s(4), "bar", bar),
            expr_stmt(s(5), assign(name("x"), array(vec![name("foo"), name("bar")]))),
            expr_stmt(s(6), assign(name("y"), name("x"))),
            expr_stmt(s(7), assign(name("z"), name("x"))),
            expr_stmt(s(8), assign(name("sink"), name("x"))),
        ],
        s(1),
    );
    run_in(
        &global,
        vec![expr_stmt(s(9), call(s(9), closure(anon), vec![]))],
    )
    .unwrap();

    // First collect: the `foo`/`bar` cells died with the frame; the
    // captured x/y/z cells stay pinned through sink -> [foo, bar] ->
    // capture scopes.
    let first = global.collect(None);
    assert_eq!(first, 2, "expected exactly the two function cells");

    // The closures still work through the pinned array.
    let v = run_in(
        &global,
        vec![ret(
            s(10),
            call(s(10), index(name("sink"), lit(0)), vec![]),
        )],
    )
    .unwrap();
    assert!(v.print_string().starts_with("[ [ "), "foo still returns the captured graph");

    // Drop the root; the cycle among x/y/z and the capture scopes is now
    // garbage.
    sink.set_value(Value::Null).unwrap();
    let second = global.collect(None);
    assert!(second >= 3, "expected x, y and z (got {second})");
}

// =============================================================================
// Generations
// =============================================================================

/// Survivors are promoted one generation per collection; the oldest is
/// sticky.
#[test]
fn survivors_promote_towards_oldest() {
    let global = GlobalContext::new_default();
    let gc = global.gc();
    // The built-in tree already occupies the oldest generation.
    let oldest_base = gc.count_tracked_variables(Generation::Oldest);

    // A host-pinned cell in the newest generation.
    let pinned = gc.create_variable(Generation::Newest);
    pinned.initialize(Value::Integer(1));
    assert_eq!(gc.count_tracked_variables(Generation::Newest), 1);

    global.collect(Some(Generation::Newest));
    assert_eq!(gc.count_tracked_variables(Generation::Newest), 0);
    assert_eq!(gc.count_tracked_variables(Generation::Middle), 1);

    global.collect(Some(Generation::Middle));
    assert_eq!(gc.count_tracked_variables(Generation::Middle), 0);
    assert_eq!(gc.count_tracked_variables(Generation::Oldest), oldest_base + 1);

    global.collect(None);
    assert_eq!(
        gc.count_tracked_variables(Generation::Oldest),
        oldest_base + 1,
        "oldest is sticky"
    );
    drop(pinned);
    let reclaimed = global.collect(None);
    assert_eq!(reclaimed, 1);
}

/// Collecting a younger generation leaves older tracked sets alone, even
/// when their cells are garbage.
#[test]
fn generation_limit_is_respected() {
    let global = GlobalContext::new_default();
    let gc = global.gc();
    let old = gc.create_variable(Generation::Oldest);
    old.initialize(Value::Integer(7));
    let old_count = gc.count_tracked_variables(Generation::Oldest);
    drop(old);
    assert_eq!(global.collect(Some(Generation::Newest)), 0);
    assert_eq!(gc.count_tracked_variables(Generation::Oldest), old_count);
    assert_eq!(global.collect(None), 1);
}

/// Threshold crossings trigger collections from statement boundaries, so
/// a loop that churns garbage does not grow the pool.
#[test]
fn thresholds_bound_the_pool() {
    let global = GlobalContext::new_default();
    // for (var i = 0; i < 500; ++i) { var junk = [i]; }
    run_in(
        &global,
        vec![for_stmt(
            s(1),
            Some(var(s(1), "i", Some(lit(0)))),
            Some(binary(asteria::air::BinaryOp::CmpLt, name("i"), lit(500))),
            Some(unary(asteria::air::UnaryOp::PreInc, name("i"))),
            vec![var(s(2), "junk", Some(array(vec![name("i")])))],
        )],
    )
    .unwrap();
    // 500 dead cells were produced; automatic collections must have kept
    // the pool to the same order of magnitude as the live set.
    let pooled = global.gc().count_pooled_variables();
    assert!(pooled < 200, "pool grew to {pooled}");
}

/// Thresholds are readable and writable per generation.
#[test]
fn thresholds_are_configurable() {
    let global = GlobalContext::new_default();
    let gc = global.gc();
    assert_eq!(gc.get_threshold(Generation::Newest), 10);
    assert_eq!(gc.get_threshold(Generation::Middle), 70);
    assert_eq!(gc.get_threshold(Generation::Oldest), 500);
    gc.set_threshold(Generation::Newest, 3);
    assert_eq!(gc.get_threshold(Generation::Newest), 3);
}

// =============================================================================
// Shutdown
// =============================================================================

/// `finalize` sweeps everything, cycles included, and leaves the pool
/// empty.
#[test]
fn finalize_clears_everything() {
    let global = GlobalContext::new_default();
    let lambda = fn_def("lambda", &[], false, vec![ret(s(2), name("f"))], s(2));
    run_in(
        &global,
        vec![
            var(s(1), "f", None),
            expr_stmt(s(2), assign(name("f"), closure(lambda))),
        ],
    )
    .unwrap();
    let reclaimed = global.gc().finalize();
    assert!(reclaimed > 0);
    assert_eq!(global.gc().count_pooled_variables(), 0);
}
