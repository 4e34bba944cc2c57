//! Function calls: argument passing, `this`, the variadic pack, natives,
//! and the configured limits.

use asteria::{
    Exception, Function, GlobalContext, Options, Program, Reference, Script, SourceLocation,
    Statement, Value,
    air::{ArgSpec, BinaryOp, PtcHint, UnaryOp},
    build::*,
};
use pretty_assertions::assert_eq;

fn s(line: u32) -> SourceLocation {
    SourceLocation::new("calls", line)
}

fn run(statements: Vec<Statement>) -> Result<Value, Exception> {
    run_with_options(statements, Options::default())
}

fn run_with_options(statements: Vec<Statement>, options: Options) -> Result<Value, Exception> {
    let global = GlobalContext::new(options.clone());
    let script = Script::new(Program::new("calls", statements), &options);
    script.execute(&global).map(|r| r.read().unwrap_or(Value::Null))
}

// =============================================================================
// Argument passing
// =============================================================================

/// A by-value argument is a materialized copy: callee writes stay in the
/// callee.
#[test]
fn by_value_arguments_are_copies() {
    let poke = fn_def(
        "poke",
        &["x"],
        false,
        vec![expr_stmt(s(2), assign(name("x"), lit(99)))],
        s(1),
    );
    let v = run(vec![
        func(s(1), "poke", poke),
        var(s(3), "n", Some(lit(1))),
        expr_stmt(s(4), call(s(4), name("poke"), vec![name("n")])),
        ret(s(5), name("n")),
    ])
    .unwrap();
    assert_eq!(v.as_integer().unwrap(), 1);
}

/// A by-reference argument aliases the caller's variable.
#[test]
fn by_ref_arguments_alias() {
    let poke = fn_def(
        "poke",
        &["x"],
        false,
        vec![expr_stmt(s(2), assign(name("x"), lit(99)))],
        s(1),
    );
    let v = run(vec![
        func(s(1), "poke", poke),
        var(s(3), "n", Some(lit(1))),
        expr_stmt(
            s(4),
            call_spec(s(4), name("poke"), vec![(name("n"), ArgSpec::ByRef)], PtcHint::None),
        ),
        ret(s(5), name("n")),
    ])
    .unwrap();
    assert_eq!(v.as_integer().unwrap(), 99);
}

/// Passing a temporary by reference fails before the call happens.
#[test]
fn by_ref_requires_a_variable() {
    let poke = fn_def("poke", &["x"], false, vec![], s(1));
    let error = run(vec![
        func(s(1), "poke", poke),
        expr_stmt(
            s(2),
            call_spec(
                s(2),
                name("poke"),
                vec![(binary(BinaryOp::Add, lit(1), lit(2)), ArgSpec::ByRef)],
                PtcHint::None,
            ),
        ),
    ])
    .unwrap_err();
    assert!(error.message().unwrap().contains("not a valid reference"));
}

/// Missing parameters bind as writable nulls.
#[test]
fn missing_parameters_are_null() {
    let probe = fn_def(
        "probe",
        &["a", "b"],
        false,
        vec![ret(s(2), binary(BinaryOp::CmpEq, name("b"), null()))],
        s(1),
    );
    let v = run(vec![
        func(s(1), "probe", probe),
        ret(s(3), call(s(3), name("probe"), vec![lit(1)])),
    ])
    .unwrap();
    assert!(v.as_boolean().unwrap());
}

/// Extra arguments of a variadic callee arrive through `__varg`.
#[test]
fn variadic_pack() {
    let pack = fn_def(
        "pack",
        &["first"],
        true,
        vec![ret(
            s(2),
            array(vec![name("first"), unary(UnaryOp::CountOf, name("__varg")), index(name("__varg"), lit(1))]),
        )],
        s(1),
    );
    let v = run(vec![
        func(s(1), "pack", pack),
        ret(s(3), call(s(3), name("pack"), vec![lit(10), lit(20), lit(30)])),
    ])
    .unwrap();
    assert_eq!(v.print_string(), "[ 10, 2, 30 ]");
}

/// `__func`, `__file` and `__line` synthesize from the frame.
#[test]
fn lazy_frame_names() {
    let who = fn_def(
        "who",
        &[],
        false,
        vec![ret(s(7), array(vec![name("__func"), name("__file"), name("__line")]))],
        s(6),
    );
    let v = run(vec![func(s(6), "who", who), ret(s(8), call(s(8), name("who"), vec![]))]).unwrap();
    assert_eq!(v.print_string(), "[ \"who\", \"calls\", 6 ]");
}

// =============================================================================
// `this`
// =============================================================================

/// Calling through member access binds the parent object as `this`.
#[test]
fn member_call_binds_this() {
    let getter = fn_def(
        "getter",
        &[],
        false,
        vec![ret(s(2), member(name("__this"), "tag"))],
        s(1),
    );
    let v = run(vec![
        func(s(1), "getter", getter),
        var(
            s(3),
            "o",
            Some(object(vec![("tag", lit(42)), ("get", name("getter"))])),
        ),
        ret(s(4), call(s(4), member(name("o"), "get"), vec![])),
    ])
    .unwrap();
    assert_eq!(v.as_integer().unwrap(), 42);
}

/// In a plain call `__this` does not resolve.
#[test]
fn plain_call_has_no_this() {
    let orphan = fn_def("orphan", &[], false, vec![ret(s(2), name("__this"))], s(1));
    let error = run(vec![
        func(s(1), "orphan", orphan),
        ret(s(3), call(s(3), name("orphan"), vec![])),
    ])
    .unwrap_err();
    assert!(error.message().unwrap().contains("unresolvable identifier `__this`"));
}

// =============================================================================
// Natives and limits
// =============================================================================

/// Native bindings receive readable argument references and produce
/// references back.
#[test]
fn native_binding_round_trip() {
    let global = GlobalContext::new_default();
    global.define_function(
        "double",
        Function::native("double", |_global, _self_ref, args| {
            let n = args[0].read()?.as_integer()?;
            Ok(Reference::temporary(Value::Integer(n * 2)))
        }),
    );
    let script = Script::new(
        Program::new("calls", vec![ret(s(1), call(s(1), name("double"), vec![lit(21)]))]),
        &Options::default(),
    );
    let v = script.execute(&global).unwrap().read().unwrap();
    assert_eq!(v.as_integer().unwrap(), 42);
}

/// A failing native surfaces as a catchable runtime exception with a
/// native frame.
#[test]
fn native_errors_are_runtime_exceptions() {
    let global = GlobalContext::new_default();
    global.define_function(
        "boom",
        Function::native("boom", |_global, _self_ref, _args| {
            Err(Exception::runtime("host refused"))
        }),
    );
    let script = Script::new(
        Program::new("calls", vec![expr_stmt(s(3), call(s(3), name("boom"), vec![]))]),
        &Options::default(),
    );
    let error = script.execute(&global).unwrap_err();
    assert!(error.is_catchable());
    assert!(error.message().unwrap().contains("host refused"));
    assert!(error
        .frames()
        .iter()
        .any(|f| f.kind == asteria::FrameKind::Native && f.location.line() == 3));
}

/// Calling a non-function reports the value's type.
#[test]
fn calling_a_non_function_fails() {
    let error = run(vec![
        var(s(1), "x", Some(lit(5))),
        expr_stmt(s(2), call(s(2), name("x"), vec![])),
    ])
    .unwrap_err();
    assert!(error.message().unwrap().contains("attempt to call a non-function"));
    assert!(error.message().unwrap().contains("integer"));
}

/// Nested (non-tail) recursion hits the configured depth limit.
#[test]
fn recursion_depth_is_limited() {
    let deep = fn_def(
        "deep",
        &["n"],
        false,
        // Not a tail call: the result feeds an addition.
        vec![ret(
            s(2),
            binary(
                BinaryOp::Add,
                lit(0),
                call(s(2), name("deep"), vec![binary(BinaryOp::Add, name("n"), lit(1))]),
            ),
        )],
        s(1),
    );
    let error = run_with_options(
        vec![
            func(s(1), "deep", deep),
            expr_stmt(s(3), call(s(3), name("deep"), vec![lit(0)])),
        ],
        Options {
            max_recursion_depth: 40,
            ..Options::default()
        },
    )
    .unwrap_err();
    assert!(error.message().unwrap().contains("maximum recursion depth exceeded"));
}

/// Argument counts beyond the configured maximum fail before binding.
#[test]
fn argument_count_is_limited() {
    let any = fn_def("any", &[], true, vec![ret_void(s(2))], s(1));
    let error = run_with_options(
        vec![
            func(s(1), "any", any),
            expr_stmt(s(3), call(s(3), name("any"), (0..9).map(lit).collect())),
        ],
        Options {
            max_argument_count: 8,
            ..Options::default()
        },
    )
    .unwrap_err();
    assert!(error.message().unwrap().contains("too many arguments"));
}

/// A capture is shared, not copied: sibling closures see each other's
/// writes through the captured cell.
#[test]
fn captures_share_the_cell() {
    let bump = fn_def(
        "bump",
        &[],
        false,
        vec![expr_stmt(s(2), unary(UnaryOp::PreInc, name("shared")))],
        s(1),
    );
    let peek = fn_def("peek", &[], false, vec![ret(s(4), name("shared"))], s(3));
    let v = run(vec![
        var(s(1), "shared", Some(lit(0))),
        func(s(2), "bump", bump),
        func(s(3), "peek", peek),
        expr_stmt(s(5), call(s(5), name("bump"), vec![])),
        expr_stmt(s(6), call(s(6), name("bump"), vec![])),
        ret(s(7), call(s(7), name("peek"), vec![])),
    ])
    .unwrap();
    assert_eq!(v.as_integer().unwrap(), 2);
}

/// Host arguments arrive through the script's own variadic pack.
#[test]
fn script_arguments_via_varg() {
    let global = GlobalContext::new_default();
    let script = Script::new(
        Program::new("calls", vec![ret(s(1), index(name("__varg"), lit(1)))]),
        &Options::default(),
    );
    let v = script
        .execute_with_args(&global, vec![Value::Integer(5), Value::from("second")])
        .unwrap()
        .read()
        .unwrap();
    assert_eq!(&**v.as_string().unwrap(), "second");
}

/// Redeclaring a function name is fine; the cell is fresh per declaration.
#[test]
fn function_cells_are_read_only() {
    let one = fn_def("one", &[], false, vec![ret(s(2), lit(1))], s(1));
    let error = run(vec![
        func(s(1), "one", one),
        expr_stmt(s(3), assign(name("one"), lit(5))),
    ])
    .unwrap_err();
    assert!(error.message().unwrap().contains("read-only"));
}

/// Deep closure nesting resolves captures transitively.
#[test]
fn nested_closures_capture_transitively() {
    // func outer() { var x = 7; func inner() { return x; } return inner(); }
    let inner = fn_def("inner", &[], false, vec![ret(s(3), name("x"))], s(2));
    let outer = fn_def(
        "outer",
        &[],
        false,
        vec![
            var(s(2), "x", Some(lit(7))),
            func(s(2), "inner", inner),
            ret(s(4), call(s(4), name("inner"), vec![])),
        ],
        s(1),
    );
    let v = run(vec![
        func(s(1), "outer", outer),
        ret(s(5), call(s(5), name("outer"), vec![])),
    ])
    .unwrap();
    assert_eq!(v.as_integer().unwrap(), 7);
}
