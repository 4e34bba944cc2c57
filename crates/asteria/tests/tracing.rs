//! Tracer hooks: statement dispatch, call/return pairing, tail-call frame
//! replacement, and collection events.

use asteria::{
    GlobalContext, Options, Program, Script, SourceLocation,
    air::BinaryOp,
    build::*,
    tracer::{RecordingTracer, TraceEvent},
};
use pretty_assertions::assert_eq;

fn s(line: u32) -> SourceLocation {
    SourceLocation::new("tracing", line)
}

/// Calls and returns pair up, and statements are observed in dispatch
/// order.
#[test]
fn calls_and_returns_pair() {
    let two = fn_def("two", &[], false, vec![ret(s(2), lit(2))], s(1));
    let program = Program::new(
        "tracing",
        vec![
            func(s(1), "two", two),
            ret(s(3), call(s(3), name("two"), vec![])),
        ],
    );
    let global = GlobalContext::new_default();
    let mut tracer = RecordingTracer::new();
    Script::new(program, &Options::default())
        .execute_traced(&global, vec![], &mut tracer)
        .unwrap();

    let calls: Vec<&TraceEvent> = tracer
        .events()
        .iter()
        .filter(|e| matches!(e, TraceEvent::Call { .. } | TraceEvent::Return { .. }))
        .collect();
    // The script body itself is a call, plus the `two()` invocation.
    assert_eq!(calls.len(), 4);
    let TraceEvent::Call { name: outer, depth: d1 } = calls[0] else {
        panic!("expected a call first, got {calls:?}");
    };
    assert_eq!(outer.as_str(), "<script>");
    let TraceEvent::Call { name: inner, depth: d2 } = calls[1] else {
        panic!("expected the nested call, got {calls:?}");
    };
    assert_eq!(inner.as_str(), "two");
    assert_eq!(*d2, d1 + 1);
    assert!(matches!(calls[2], TraceEvent::Return { .. }));
    assert!(matches!(calls[3], TraceEvent::Return { .. }));

    assert!(tracer.statement_count() >= 3, "every statement dispatch is observed");
}

/// Tail calls surface as frame replacements, not as call/return pairs.
#[test]
fn tail_calls_are_observed_as_replacements() {
    let down = fn_def(
        "down",
        &["n"],
        false,
        vec![ret(
            s(2),
            select(
                binary(BinaryOp::CmpEq, name("n"), lit(0)),
                lit(0),
                tail_call(s(2), name("down"), vec![binary(BinaryOp::Sub, name("n"), lit(1))]),
            ),
        )],
        s(1),
    );
    let program = Program::new(
        "tracing",
        vec![
            func(s(1), "down", down),
            ret(s(3), call(s(3), name("down"), vec![lit(5)])),
        ],
    );
    let global = GlobalContext::new_default();
    let mut tracer = RecordingTracer::new();
    Script::new(program, &Options::default())
        .execute_traced(&global, vec![], &mut tracer)
        .unwrap();

    let tail_calls = tracer
        .events()
        .iter()
        .filter(|e| matches!(e, TraceEvent::TailCall { .. }))
        .count();
    assert_eq!(tail_calls, 5);
    // One real frame for the script, one for the whole `down` chain.
    let calls = tracer
        .events()
        .iter()
        .filter(|e| matches!(e, TraceEvent::Call { .. }))
        .count();
    assert_eq!(calls, 2);
}

/// Threshold-triggered collections report through the tracer.
#[test]
fn collections_are_observed() {
    let program = Program::new(
        "tracing",
        vec![for_stmt(
            s(1),
            Some(var(s(1), "i", Some(lit(0)))),
            Some(binary(BinaryOp::CmpLt, name("i"), lit(64))),
            Some(unary(asteria::air::UnaryOp::PreInc, name("i"))),
            vec![var(s(2), "junk", Some(array(vec![name("i")])))],
        )],
    );
    let global = GlobalContext::new_default();
    let mut tracer = RecordingTracer::new();
    Script::new(program, &Options::default())
        .execute_traced(&global, vec![], &mut tracer)
        .unwrap();
    assert!(
        tracer
            .events()
            .iter()
            .any(|e| matches!(e, TraceEvent::Collect { .. })),
        "the allocation churn crossed the newest-generation threshold"
    );
}
