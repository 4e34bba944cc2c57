//! Expression evaluation: operator semantics, short-circuiting, compound
//! assignment, subscripts.

use std::{cell::RefCell, rc::Rc};

use asteria::{
    Exception, Function, GlobalContext, Options, Program, Reference, Script, SourceLocation,
    Statement, Value,
    air::{BinaryOp, UnaryOp},
    build::*,
};
use pretty_assertions::assert_eq;

fn s(line: u32) -> SourceLocation {
    SourceLocation::new("evaluator", line)
}

fn run(statements: Vec<Statement>) -> Result<Value, Exception> {
    let global = GlobalContext::new_default();
    let script = Script::new(Program::new("evaluator", statements), &Options::default());
    script.execute(&global).map(|r| r.read().unwrap_or(Value::Null))
}

fn eval_value(statements: Vec<Statement>) -> Value {
    run(statements).expect("script must succeed")
}

/// Installs a `probe()` native that counts its invocations and returns 2.
fn global_with_probe() -> (Rc<GlobalContext>, Rc<RefCell<u32>>) {
    let global = GlobalContext::new_default();
    let calls = Rc::new(RefCell::new(0u32));
    let seen = calls.clone();
    global.define_function(
        "probe",
        Function::native("probe", move |_global, _self_ref, _args| {
            *seen.borrow_mut() += 1;
            Ok(Reference::temporary(Value::Integer(2)))
        }),
    );
    (global, calls)
}

// =============================================================================
// Arithmetic
// =============================================================================

/// Integer arithmetic truncates toward zero and checks overflow.
#[test]
fn integer_arithmetic() {
    assert_eq!(
        eval_value(vec![ret(s(1), binary(BinaryOp::Div, lit(7), lit(2)))])
            .as_integer()
            .unwrap(),
        3
    );
    assert_eq!(
        eval_value(vec![ret(s(1), binary(BinaryOp::Mod, lit(-7), lit(2)))])
            .as_integer()
            .unwrap(),
        -1
    );
    let overflow = run(vec![ret(s(1), binary(BinaryOp::Add, lit(i64::MAX), lit(1)))]).unwrap_err();
    assert!(overflow.message().unwrap().contains("overflow"));
    let div0 = run(vec![ret(s(1), binary(BinaryOp::Div, lit(1), lit(0)))]).unwrap_err();
    assert!(div0.message().unwrap().contains("division by zero"));
}

/// Mixed integer/real arithmetic widens to real.
#[test]
fn mixed_arithmetic_widens() {
    let v = eval_value(vec![ret(s(1), binary(BinaryOp::Add, lit(1), lit(0.5)))]);
    assert!((v.as_real().unwrap() - 1.5).abs() < f64::EPSILON);
}

/// String concatenation and duplication.
#[test]
fn string_operators() {
    assert_eq!(
        &**eval_value(vec![ret(s(1), binary(BinaryOp::Add, lit("foo"), lit("bar")))])
            .as_string()
            .unwrap(),
        "foobar"
    );
    assert_eq!(
        &**eval_value(vec![ret(s(1), binary(BinaryOp::Mul, lit("ab"), lit(3)))])
            .as_string()
            .unwrap(),
        "ababab"
    );
}

/// The boolean overloads: `+` is or, `-` is xor, `*` is and.
#[test]
fn boolean_overloads() {
    assert!(eval_value(vec![ret(s(1), binary(BinaryOp::Add, lit(false), lit(true)))])
        .as_boolean()
        .unwrap());
    assert!(eval_value(vec![ret(s(1), binary(BinaryOp::Sub, lit(true), lit(false)))])
        .as_boolean()
        .unwrap());
    assert!(!eval_value(vec![ret(s(1), binary(BinaryOp::Mul, lit(true), lit(false)))])
        .as_boolean()
        .unwrap());
}

/// Array `+` concatenates.
#[test]
fn array_concatenation() {
    let v = eval_value(vec![ret(
        s(1),
        binary(
            BinaryOp::Add,
            array(vec![lit(1), lit(2)]),
            array(vec![lit(3)]),
        ),
    )]);
    assert_eq!(v.print_string(), "[ 1, 2, 3 ]");
}

/// `<=>` yields the bracketed strings, including the NaN case.
#[test]
fn three_way_comparison() {
    assert_eq!(
        &**eval_value(vec![ret(s(1), binary(BinaryOp::CmpThreeWay, lit(1), lit(2)))])
            .as_string()
            .unwrap(),
        "[less]"
    );
    assert_eq!(
        &**eval_value(vec![ret(
            s(1),
            binary(BinaryOp::CmpThreeWay, lit(f64::NAN), lit(f64::NAN)),
        )])
        .as_string()
        .unwrap(),
        "[unordered]"
    );
}

/// Relational operators error on unordered operands instead of guessing.
#[test]
fn relational_unordered_is_an_error() {
    let error = run(vec![ret(s(1), binary(BinaryOp::CmpLt, lit(f64::NAN), lit(1)))]).unwrap_err();
    assert!(error.message().unwrap().contains("unordered"));
    // But equality just says "not equal".
    assert!(!eval_value(vec![ret(s(1), binary(BinaryOp::CmpEq, lit(f64::NAN), lit(f64::NAN)))])
        .as_boolean()
        .unwrap());
}

// =============================================================================
// Unary operators
// =============================================================================

/// `typeof`, `countof`, `!!`.
#[test]
fn inspection_operators() {
    assert_eq!(
        &**eval_value(vec![ret(s(1), unary(UnaryOp::TypeOf, lit(1.5)))])
            .as_string()
            .unwrap(),
        "real"
    );
    assert_eq!(
        eval_value(vec![ret(s(1), unary(UnaryOp::CountOf, lit("abcd")))])
            .as_integer()
            .unwrap(),
        4
    );
    assert_eq!(
        eval_value(vec![ret(s(1), unary(UnaryOp::CountOf, null()))])
            .as_integer()
            .unwrap(),
        0
    );
    assert!(eval_value(vec![ret(s(1), unary(UnaryOp::ToBoolean, lit("x")))])
        .as_boolean()
        .unwrap());
}

/// Bit counting on the unsigned view of the integer.
#[test]
fn bit_counts() {
    assert_eq!(
        eval_value(vec![ret(s(1), unary(UnaryOp::Lzcnt, lit(1)))])
            .as_integer()
            .unwrap(),
        63
    );
    assert_eq!(
        eval_value(vec![ret(s(1), unary(UnaryOp::Tzcnt, lit(0)))])
            .as_integer()
            .unwrap(),
        64
    );
    assert_eq!(
        eval_value(vec![ret(s(1), unary(UnaryOp::Popcnt, lit(-1)))])
            .as_integer()
            .unwrap(),
        64
    );
}

/// Pre-increment yields the updated l-value; post-increment the old value.
#[test]
fn increment_decrement() {
    let v = eval_value(vec![
        var(s(1), "x", Some(lit(5))),
        ret(s(2), unary(UnaryOp::PreInc, name("x"))),
    ]);
    assert_eq!(v.as_integer().unwrap(), 6);

    let v = eval_value(vec![
        var(s(1), "x", Some(lit(5))),
        expr_stmt(s(2), unary(UnaryOp::PostInc, name("x"))),
        ret(s(3), name("x")),
    ]);
    assert_eq!(v.as_integer().unwrap(), 6);

    let v = eval_value(vec![
        var(s(1), "x", Some(lit(5))),
        ret(s(2), unary(UnaryOp::PostDec, name("x"))),
    ]);
    assert_eq!(v.as_integer().unwrap(), 5);
}

// =============================================================================
// Short-circuiting
// =============================================================================

/// `&&` and `||` evaluate the right-hand side only when needed.
#[test]
fn and_or_short_circuit() {
    let (global, calls) = global_with_probe();
    let script = Script::new(
        Program::new(
            "evaluator",
            vec![
                expr_stmt(s(1), and(lit(false), call(s(1), name("probe"), vec![]))),
                expr_stmt(s(2), or(lit(true), call(s(2), name("probe"), vec![]))),
                ret(s(3), and(lit(true), call(s(3), name("probe"), vec![]))),
            ],
        ),
        &Options::default(),
    );
    let result = script.execute(&global).unwrap().read().unwrap();
    assert_eq!(result.as_integer().unwrap(), 2);
    assert_eq!(*calls.borrow(), 1, "only the reachable probe() ran");
}

/// `??` evaluates the right-hand side only for null.
#[test]
fn coalesce_tests_null_not_truthiness() {
    let v = eval_value(vec![ret(s(1), coalesce(lit(0), lit(9)))]);
    assert_eq!(v.as_integer().unwrap(), 0, "0 is not null");
    let v = eval_value(vec![ret(s(1), coalesce(null(), lit(9)))]);
    assert_eq!(v.as_integer().unwrap(), 9);
}

/// The ternary evaluates exactly one branch.
#[test]
fn select_evaluates_one_branch() {
    let (global, calls) = global_with_probe();
    let script = Script::new(
        Program::new(
            "evaluator",
            vec![ret(
                s(1),
                select(lit(true), lit(7), call(s(1), name("probe"), vec![])),
            )],
        ),
        &Options::default(),
    );
    let result = script.execute(&global).unwrap().read().unwrap();
    assert_eq!(result.as_integer().unwrap(), 7);
    assert_eq!(*calls.borrow(), 0);
}

/// `a &&= b` writes back only when `b` was evaluated; `a ??= b` likewise.
#[test]
fn compound_assign_short_circuit() {
    let (global, calls) = global_with_probe();
    let script = Script::new(
        Program::new(
            "evaluator",
            vec![
                // var a = 1; a &&= probe();  -> a == 2
                var(s(1), "a", Some(lit(1))),
                expr_stmt(s(2), and_assign(name("a"), call(s(2), name("probe"), vec![]))),
                assert_stmt(s(3), binary(BinaryOp::CmpEq, name("a"), lit(2)), None),
                // a = null; a ??= probe();  -> a == 2
                expr_stmt(s(4), assign(name("a"), null())),
                expr_stmt(s(5), coalesce_assign(name("a"), call(s(5), name("probe"), vec![]))),
                assert_stmt(s(6), binary(BinaryOp::CmpEq, name("a"), lit(2)), None),
                // a ||= probe() with a truthy: no evaluation, no write.
                expr_stmt(s(7), or_assign(name("a"), call(s(7), name("probe"), vec![]))),
                assert_stmt(s(8), binary(BinaryOp::CmpEq, name("a"), lit(2)), None),
                // a = 0; a &&= probe(): short-circuits, keeps 0.
                expr_stmt(s(9), assign(name("a"), lit(0))),
                expr_stmt(s(10), and_assign(name("a"), call(s(10), name("probe"), vec![]))),
                ret(s(11), name("a")),
            ],
        ),
        &Options::default(),
    );
    let result = script.execute(&global).unwrap().read().unwrap();
    assert_eq!(result.as_integer().unwrap(), 0);
    assert_eq!(*calls.borrow(), 2, "probe() ran only when the LHS did not settle it");
}

// =============================================================================
// Subscripts and containers
// =============================================================================

/// Integer subscripts select array slots; string subscripts and members
/// select object entries; chains compose.
#[test]
fn subscript_chains() {
    let v = eval_value(vec![
        var(
            s(1),
            "data",
            Some(object(vec![(
                "rows",
                array(vec![array(vec![lit(1), lit(2)]), array(vec![lit(3), lit(4)])]),
            )])),
        ),
        ret(
            s(2),
            index(index(member(name("data"), "rows"), lit(1)), lit(-1)),
        ),
    ]);
    assert_eq!(v.as_integer().unwrap(), 4);

    let v = eval_value(vec![
        var(s(1), "o", Some(object(vec![("k", lit(5))]))),
        ret(s(2), index(name("o"), lit("k"))),
    ]);
    assert_eq!(v.as_integer().unwrap(), 5);
}

/// Copies are cheap and isolated: writing through one binding does not
/// disturb a value copied out earlier.
#[test]
fn copy_on_write_isolation() {
    let v = eval_value(vec![
        var(s(1), "a", Some(array(vec![lit(1), lit(2)]))),
        var(s(2), "b", Some(name("a"))),
        expr_stmt(s(3), assign(index(name("b"), lit(0)), lit(99))),
        ret(s(4), array(vec![index(name("a"), lit(0)), index(name("b"), lit(0))])),
    ]);
    assert_eq!(v.print_string(), "[ 1, 99 ]");
}

/// Constant folding at optimization level 1 collapses literal operators
/// but leaves failing ones for runtime.
#[test]
fn optimizer_folds_but_keeps_errors() {
    // Folded or not, the observable result is identical; this pins the
    // error-preserving side.
    let error = run(vec![ret(s(1), binary(BinaryOp::Div, lit(5), lit(0)))]).unwrap_err();
    assert!(error.message().unwrap().contains("division by zero"));
}
