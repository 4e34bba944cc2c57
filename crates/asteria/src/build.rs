//! Program construction helpers.
//!
//! Parsing is external to this crate: a front-end lowers surface syntax
//! into [`Statement`]s over the AIR catalog, and these combinators are the
//! sanctioned way to do that. Expression combinators compose in source
//! order and take care of reverse-Polish node layout; statement helpers
//! are thin constructors around the [`Statement`] variants.
//!
//! ```
//! use asteria::SourceLocation;
//! use asteria::build::*;
//!
//! let site = SourceLocation::new("demo", 1);
//! // var x = 1 + 2;
//! let statement = var(site, "x", Some(binary(
//!     asteria::air::BinaryOp::Add,
//!     lit(1),
//!     lit(2),
//! )));
//! # let _ = statement;
//! ```

use std::rc::Rc;

use crate::{
    air::{AirNode, ArgSpec, BinaryOp, Expression, PtcHint, Subscript, UnaryOp},
    function::FunctionDef,
    source::SourceLocation,
    statement::{Statement, SwitchClause},
    value::Value,
};

fn nodes_of(expr: Expression) -> Vec<AirNode> {
    expr.nodes().to_vec()
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// A literal operand.
pub fn lit(value: impl Into<Value>) -> Expression {
    Expression::new(vec![AirNode::PushLiteral(value.into())])
}

/// The `null` literal.
pub fn null() -> Expression {
    Expression::new(vec![AirNode::PushLiteral(Value::Null)])
}

/// An identifier resolved through the scope chain.
pub fn name(name: &str) -> Expression {
    Expression::new(vec![AirNode::PushName {
        name: Rc::from(name),
        global: false,
    }])
}

/// `__global name` — resolved in the global context only.
pub fn global_name(name: &str) -> Expression {
    Expression::new(vec![AirNode::PushName {
        name: Rc::from(name),
        global: true,
    }])
}

/// A closure instantiation.
pub fn closure(def: Rc<FunctionDef>) -> Expression {
    Expression::new(vec![AirNode::PushClosure { def }])
}

/// `[ a, b, … ]`.
pub fn array(elements: Vec<Expression>) -> Expression {
    let count = elements.len();
    let mut nodes = Vec::new();
    for element in elements {
        nodes.extend(nodes_of(element));
    }
    nodes.push(AirNode::MakeArray { count });
    Expression::new(nodes)
}

/// `{ "k" = v, … }`.
pub fn object(pairs: Vec<(&str, Expression)>) -> Expression {
    let mut keys = Vec::with_capacity(pairs.len());
    let mut nodes = Vec::new();
    for (key, value) in pairs {
        keys.push(Rc::from(key));
        nodes.extend(nodes_of(value));
    }
    nodes.push(AirNode::MakeObject { keys });
    Expression::new(nodes)
}

/// A pure unary application.
pub fn unary(op: UnaryOp, operand: Expression) -> Expression {
    let mut nodes = nodes_of(operand);
    nodes.push(AirNode::Unary { op, assign: false });
    Expression::new(nodes)
}

/// `x = op x` — applies and writes back through the operand reference.
pub fn unary_assign(op: UnaryOp, operand: Expression) -> Expression {
    let mut nodes = nodes_of(operand);
    nodes.push(AirNode::Unary { op, assign: true });
    Expression::new(nodes)
}

/// A binary application.
pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Expression {
    let mut nodes = nodes_of(lhs);
    nodes.extend(nodes_of(rhs));
    nodes.push(AirNode::Binary { op, assign: false });
    Expression::new(nodes)
}

/// `a op= b`.
pub fn binary_assign(op: BinaryOp, lhs: Expression, rhs: Expression) -> Expression {
    let mut nodes = nodes_of(lhs);
    nodes.extend(nodes_of(rhs));
    nodes.push(AirNode::Binary { op, assign: true });
    Expression::new(nodes)
}

/// `a = b` — plain assignment; the result is the target reference.
pub fn assign(target: Expression, source: Expression) -> Expression {
    let mut nodes = nodes_of(target);
    nodes.extend(nodes_of(source));
    nodes.push(AirNode::Assign);
    Expression::new(nodes)
}

/// `a && b`.
pub fn and(lhs: Expression, rhs: Expression) -> Expression {
    let mut nodes = nodes_of(lhs);
    nodes.push(AirNode::And { rhs, assign: false });
    Expression::new(nodes)
}

/// `a &&= b`.
pub fn and_assign(lhs: Expression, rhs: Expression) -> Expression {
    let mut nodes = nodes_of(lhs);
    nodes.push(AirNode::And { rhs, assign: true });
    Expression::new(nodes)
}

/// `a || b`.
pub fn or(lhs: Expression, rhs: Expression) -> Expression {
    let mut nodes = nodes_of(lhs);
    nodes.push(AirNode::Or { rhs, assign: false });
    Expression::new(nodes)
}

/// `a ||= b`.
pub fn or_assign(lhs: Expression, rhs: Expression) -> Expression {
    let mut nodes = nodes_of(lhs);
    nodes.push(AirNode::Or { rhs, assign: true });
    Expression::new(nodes)
}

/// `a ?? b`.
pub fn coalesce(lhs: Expression, rhs: Expression) -> Expression {
    let mut nodes = nodes_of(lhs);
    nodes.push(AirNode::Coalesce { rhs, assign: false });
    Expression::new(nodes)
}

/// `a ??= b`.
pub fn coalesce_assign(lhs: Expression, rhs: Expression) -> Expression {
    let mut nodes = nodes_of(lhs);
    nodes.push(AirNode::Coalesce { rhs, assign: true });
    Expression::new(nodes)
}

/// `c ? t : f`.
pub fn select(cond: Expression, on_true: Expression, on_false: Expression) -> Expression {
    let mut nodes = nodes_of(cond);
    nodes.push(AirNode::Select { on_true, on_false });
    Expression::new(nodes)
}

/// `base[sub]`.
pub fn index(base: Expression, subscript: Expression) -> Expression {
    let mut nodes = nodes_of(base);
    nodes.extend(nodes_of(subscript));
    nodes.push(AirNode::Member {
        subscript: Subscript::Index,
    });
    Expression::new(nodes)
}

/// `base.key`.
pub fn member(base: Expression, key: &str) -> Expression {
    let mut nodes = nodes_of(base);
    nodes.push(AirNode::Member {
        subscript: Subscript::Key(Rc::from(key)),
    });
    Expression::new(nodes)
}

/// `base[^]`.
pub fn head(base: Expression) -> Expression {
    let mut nodes = nodes_of(base);
    nodes.push(AirNode::Member {
        subscript: Subscript::Head,
    });
    Expression::new(nodes)
}

/// `base[$]`.
pub fn tail(base: Expression) -> Expression {
    let mut nodes = nodes_of(base);
    nodes.push(AirNode::Member {
        subscript: Subscript::Tail,
    });
    Expression::new(nodes)
}

/// `base[?]`.
pub fn random(base: Expression) -> Expression {
    let mut nodes = nodes_of(base);
    nodes.push(AirNode::Member {
        subscript: Subscript::Random,
    });
    Expression::new(nodes)
}

/// A by-value call.
pub fn call(site: SourceLocation, callee: Expression, args: Vec<Expression>) -> Expression {
    call_spec(
        site,
        callee,
        args.into_iter().map(|a| (a, ArgSpec::ByValue)).collect(),
        PtcHint::None,
    )
}

/// A tail-positioned by-value call (`return f(…)`).
pub fn tail_call(site: SourceLocation, callee: Expression, args: Vec<Expression>) -> Expression {
    call_spec(
        site,
        callee,
        args.into_iter().map(|a| (a, ArgSpec::ByValue)).collect(),
        PtcHint::ByValue,
    )
}

/// A call with explicit argument passing and tail hint.
pub fn call_spec(
    site: SourceLocation,
    callee: Expression,
    args: Vec<(Expression, ArgSpec)>,
    ptc: PtcHint,
) -> Expression {
    let mut nodes = nodes_of(callee);
    let mut specs = Vec::with_capacity(args.len());
    for (arg, spec) in args {
        nodes.extend(nodes_of(arg));
        specs.push(spec);
    }
    nodes.push(AirNode::Call {
        args: specs,
        ptc,
        site,
    });
    Expression::new(nodes)
}

/// `import path, args…` through the host module loader.
pub fn import(site: SourceLocation, path: Expression, args: Vec<Expression>) -> Expression {
    let mut nodes = nodes_of(path);
    let arg_count = args.len();
    for arg in args {
        nodes.extend(nodes_of(arg));
    }
    nodes.push(AirNode::Import { arg_count, site });
    Expression::new(nodes)
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// An expression statement.
pub fn expr_stmt(site: SourceLocation, expr: Expression) -> Statement {
    Statement::Expression { expr, site }
}

/// `var name = init;` (or `var name;`).
pub fn var(site: SourceLocation, name: &str, init: Option<Expression>) -> Statement {
    Statement::Declare {
        decls: vec![(Rc::from(name), init)],
        immutable: false,
        site,
    }
}

/// `var a = …, b, c = …;`.
pub fn vars(site: SourceLocation, decls: Vec<(&str, Option<Expression>)>) -> Statement {
    Statement::Declare {
        decls: decls.into_iter().map(|(n, e)| (Rc::from(n), e)).collect(),
        immutable: false,
        site,
    }
}

/// `const name = init;`.
pub fn constant(site: SourceLocation, name: &str, init: Expression) -> Statement {
    Statement::Declare {
        decls: vec![(Rc::from(name), Some(init))],
        immutable: true,
        site,
    }
}

/// `ref name -> init;`.
pub fn decl_ref(site: SourceLocation, name: &str, init: Expression) -> Statement {
    Statement::DeclareRef {
        name: Rc::from(name),
        init,
        site,
    }
}

/// `func name(…) { … }`.
pub fn func(site: SourceLocation, name: &str, def: Rc<FunctionDef>) -> Statement {
    Statement::DeclareFunction {
        name: Rc::from(name),
        def,
        site,
    }
}

/// A function definition; `site` is the definition location the function
/// reports through `__file`/`__line`.
pub fn fn_def(
    name: &str,
    params: &[&str],
    variadic: bool,
    body: Vec<Statement>,
    site: SourceLocation,
) -> Rc<FunctionDef> {
    FunctionDef::new(
        name,
        params.iter().map(|p| Rc::from(*p)).collect(),
        variadic,
        body,
        site,
    )
}

/// `{ … }`.
pub fn block(body: Vec<Statement>) -> Statement {
    Statement::Block { body }
}

/// `if (cond) { … } else { … }`.
pub fn if_stmt(
    site: SourceLocation,
    cond: Expression,
    branch_true: Vec<Statement>,
    branch_false: Vec<Statement>,
) -> Statement {
    Statement::If {
        cond,
        branch_true,
        branch_false,
        site,
    }
}

/// `switch (subject) { clauses… }`.
pub fn switch(site: SourceLocation, subject: Expression, clauses: Vec<SwitchClause>) -> Statement {
    Statement::Switch {
        label: None,
        subject,
        clauses,
        site,
    }
}

/// `case label: body` with the names the body declares at its top level.
pub fn clause(label: Expression, body: Vec<Statement>, declared: &[&str]) -> SwitchClause {
    SwitchClause {
        label: Some(label),
        body,
        declared: declared.iter().map(|n| Rc::from(*n)).collect(),
    }
}

/// `default: body`.
pub fn default_clause(body: Vec<Statement>, declared: &[&str]) -> SwitchClause {
    SwitchClause {
        label: None,
        body,
        declared: declared.iter().map(|n| Rc::from(*n)).collect(),
    }
}

/// `while (cond) { … }`.
pub fn while_stmt(site: SourceLocation, cond: Expression, body: Vec<Statement>) -> Statement {
    Statement::While {
        label: None,
        cond,
        body,
        site,
    }
}

/// `do { … } while (cond);`.
pub fn do_while(site: SourceLocation, body: Vec<Statement>, cond: Expression) -> Statement {
    Statement::DoWhile {
        label: None,
        body,
        cond,
        site,
    }
}

/// `label: while (cond) { … }`.
pub fn while_labeled(
    site: SourceLocation,
    label: &str,
    cond: Expression,
    body: Vec<Statement>,
) -> Statement {
    Statement::While {
        label: Some(Rc::from(label)),
        cond,
        body,
        site,
    }
}

/// `for (init; cond; step) { … }`.
pub fn for_stmt(
    site: SourceLocation,
    init: Option<Statement>,
    cond: Option<Expression>,
    step: Option<Expression>,
    body: Vec<Statement>,
) -> Statement {
    Statement::For {
        label: None,
        init: init.map(Box::new),
        cond,
        step,
        body,
        site,
    }
}

/// `for (each k, v -> range) { … }`.
pub fn for_each(
    site: SourceLocation,
    key_name: &str,
    value_name: &str,
    range: Expression,
    body: Vec<Statement>,
) -> Statement {
    Statement::ForEach {
        label: None,
        key_name: Rc::from(key_name),
        value_name: Rc::from(value_name),
        range,
        body,
        site,
    }
}

/// `break;` / `break label;`.
pub fn break_stmt(site: SourceLocation, label: Option<&str>) -> Statement {
    Statement::Break {
        label: label.map(Rc::from),
        site,
    }
}

/// `continue;` / `continue label;`.
pub fn continue_stmt(site: SourceLocation, label: Option<&str>) -> Statement {
    Statement::Continue {
        label: label.map(Rc::from),
        site,
    }
}

/// `return expr;` — by value.
pub fn ret(site: SourceLocation, expr: Expression) -> Statement {
    Statement::Return {
        expr: Some(expr),
        by_ref: false,
        site,
    }
}

/// `return ref expr;` — keeps the reference.
pub fn ret_ref(site: SourceLocation, expr: Expression) -> Statement {
    Statement::Return {
        expr: Some(expr),
        by_ref: true,
        site,
    }
}

/// `return;`.
pub fn ret_void(site: SourceLocation) -> Statement {
    Statement::Return {
        expr: None,
        by_ref: false,
        site,
    }
}

/// `throw expr;`.
pub fn throw_stmt(site: SourceLocation, expr: Expression) -> Statement {
    Statement::Throw { expr, site }
}

/// `try { … } catch (name) { … }`.
pub fn try_catch(
    site: SourceLocation,
    body: Vec<Statement>,
    exc_name: &str,
    handler: Vec<Statement>,
) -> Statement {
    Statement::Try {
        body,
        exc_name: Rc::from(exc_name),
        handler,
        site,
    }
}

/// `defer expr;`.
pub fn defer_stmt(site: SourceLocation, expr: Expression) -> Statement {
    Statement::Defer { expr, site }
}

/// `assert expr;` / `assert expr : message;`.
pub fn assert_stmt(site: SourceLocation, expr: Expression, message: Option<&str>) -> Statement {
    Statement::Assert {
        expr,
        message: message.map(Rc::from),
        site,
    }
}
