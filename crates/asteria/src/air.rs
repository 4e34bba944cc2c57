//! The expression intermediate representation.
//!
//! An expression is a reverse-Polish sequence of [`AirNode`]s evaluated
//! over a stack of [`Reference`](crate::reference::Reference)s: operand
//! nodes push a reference, operator nodes pop their operands and push the
//! result. When a well-formed expression finishes, exactly one reference
//! remains — the expression result.
//!
//! Construction is the parser's job (or a test's, through
//! [`build`](crate::build)); this module only defines the catalog and the
//! constant-folding pass the driver applies at compile time.

use std::rc::Rc;

use crate::{function::FunctionDef, ops, source::SourceLocation, value::Value};

/// Unary operator selectors.
///
/// The increment/decrement forms read and write through the operand
/// reference; everything else consumes its operand as an rvalue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `+x` — numeric identity.
    Pos,
    /// `-x` — numeric negation, checked on integers.
    Neg,
    /// `!x` — logical not over truthiness.
    NotLogical,
    /// `~x` — bitwise not on integers, logical not on booleans.
    NotBitwise,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
    /// `typeof x` — the type name as a string.
    TypeOf,
    Sqrt,
    Abs,
    /// Arithmetic sign propagation: `-1` for negative values (including
    /// `-0.0`), else `0`.
    Sign,
    Round,
    Floor,
    Ceil,
    Trunc,
    /// Integer-result rounding siblings; fail when the result does not fit
    /// an i64.
    IRound,
    IFloor,
    ICeil,
    ITrunc,
    IsNan,
    IsInf,
    Lzcnt,
    Tzcnt,
    Popcnt,
    /// `countof x` — 0 for null, byte length of strings, element count of
    /// arrays and objects.
    CountOf,
    /// `!!x` — truthiness as a boolean.
    ToBoolean,
}

/// Binary operator selectors. Short-circuiting forms are branch nodes, not
/// operators, so the right-hand side can stay unevaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    CmpEq,
    CmpNe,
    CmpLt,
    CmpGt,
    CmpLte,
    CmpGte,
    /// `<=>` — yields `"[less]"`, `"[equal]"`, `"[greater]"` or
    /// `"[unordered]"`.
    CmpThreeWay,
    /// `+` — also boolean or, string concatenation, array concatenation.
    Add,
    /// `-` — also boolean xor.
    Sub,
    /// `*` — also boolean and, string repetition.
    Mul,
    Div,
    Mod,
    /// `<<<` — logical left shift; counts taken mod 64.
    Sll,
    /// `>>>` — logical right shift; counts taken mod 64.
    Srl,
    /// `<<` — arithmetic left shift; counts clamped to 63.
    Sla,
    /// `>>` — arithmetic right shift; counts clamped to 63.
    Sra,
    /// `&` — also boolean and.
    AndBitwise,
    /// `|` — also boolean or.
    OrBitwise,
    /// `^` — also boolean xor.
    XorBitwise,
}

/// One step of descent appended to the top-of-stack reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscript {
    /// `base[expr]` — pops the subscript, which selects by integer index
    /// into arrays or by string key into objects.
    Index,
    /// `base.name` — baked member key.
    Key(Rc<str>),
    /// `base[^]` — first element; opening inserts at the front.
    Head,
    /// `base[$]` — last element; opening appends.
    Tail,
    /// `base[?]` — pseudo-random element, probed with a seed drawn from the
    /// global context RNG when the node evaluates.
    Random,
}

/// How one argument position is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    /// Materialized copy; callee-side writes are invisible to the caller.
    ByValue,
    /// `->expr` — passed as-is; the reference must be variable-rooted.
    ByRef,
}

/// Whether a call node sits in tail position, and how the settled result is
/// to be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PtcHint {
    /// Not a tail call.
    #[default]
    None,
    /// `return f(…)` — the settled result is dereferenced into a temporary.
    ByValue,
    /// `return ref f(…)` — the settled result keeps its reference-ness.
    ByRef,
}

/// One unit of the expression IR.
#[derive(Debug, Clone)]
pub enum AirNode {
    /// Pushes a constant reference to the embedded value.
    PushLiteral(Value),
    /// Pushes the reference a name resolves to: through the scope chain, or
    /// straight to the global context for `__global name`.
    PushName { name: Rc<str>, global: bool },
    /// Instantiates a closure: resolves the definition's captured names in
    /// the current chain into a fresh capture context, and pushes the
    /// resulting function as a temporary.
    PushClosure { def: Rc<FunctionDef> },
    /// Pops `count` references and pushes an array of their values.
    MakeArray { count: usize },
    /// Pops one value per key (pushed in key order) and pushes an object.
    MakeObject { keys: Vec<Rc<str>> },
    Unary { op: UnaryOp, assign: bool },
    Binary { op: BinaryOp, assign: bool },
    /// Plain assignment: pops the source, writes its value through the
    /// (remaining) top-of-stack reference, which stays on the stack.
    Assign,
    /// `&&` / `&&=`: tests the top of stack; evaluates `rhs` only when
    /// true. With `assign`, writes back only when `rhs` was evaluated.
    And { rhs: Expression, assign: bool },
    /// `||` / `||=`: evaluates `rhs` only when the top of stack is false.
    Or { rhs: Expression, assign: bool },
    /// `??` / `??=`: evaluates `rhs` only when the top of stack reads null.
    Coalesce { rhs: Expression, assign: bool },
    /// `c ? t : f`: pops the condition and evaluates exactly one branch.
    Select { on_true: Expression, on_false: Expression },
    /// Appends one modifier step to the top-of-stack reference.
    Member { subscript: Subscript },
    /// Pops one reference per argument, then the callee beneath them.
    Call {
        args: Vec<ArgSpec>,
        ptc: PtcHint,
        site: SourceLocation,
    },
    /// Pops `arg_count` argument references and a path string beneath them,
    /// loads the named module through the host loader, and invokes it.
    Import {
        arg_count: usize,
        site: SourceLocation,
    },
}

/// A compiled expression: a shared, immutable node sequence.
#[derive(Debug, Clone)]
pub struct Expression {
    nodes: Rc<[AirNode]>,
}

impl Expression {
    pub fn new(nodes: Vec<AirNode>) -> Self {
        Self { nodes: nodes.into() }
    }

    pub fn nodes(&self) -> &[AirNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl From<Vec<AirNode>> for Expression {
    fn from(nodes: Vec<AirNode>) -> Self {
        Self::new(nodes)
    }
}

/// Collapses operator applications over literal operands.
///
/// Only pure operators fold; increments need a writable reference and the
/// branch forms guard evaluation order, so both are left alone apart from
/// folding inside their sub-expressions. An operator that would fail at
/// runtime (overflow, type mismatch) is also left alone so the error still
/// surfaces with its proper site.
pub(crate) fn fold_constants(expr: &Expression) -> Expression {
    let mut nodes: Vec<AirNode> = Vec::with_capacity(expr.nodes.len());
    for node in expr.nodes() {
        match node {
            AirNode::Unary { op, assign: false } if !is_mutating_unary(*op) => {
                let folded = match nodes.last() {
                    Some(AirNode::PushLiteral(operand)) => ops::unary(*op, operand).ok(),
                    _ => None,
                };
                match folded {
                    Some(value) => {
                        nodes.pop();
                        nodes.push(AirNode::PushLiteral(value));
                    }
                    None => nodes.push(node.clone()),
                }
            }
            AirNode::Binary { op, assign: false } => {
                let folded = if nodes.len() >= 2 {
                    match (&nodes[nodes.len() - 2], &nodes[nodes.len() - 1]) {
                        (AirNode::PushLiteral(lhs), AirNode::PushLiteral(rhs)) => {
                            ops::binary(*op, lhs, rhs).ok()
                        }
                        _ => None,
                    }
                } else {
                    None
                };
                match folded {
                    Some(value) => {
                        nodes.pop();
                        nodes.pop();
                        nodes.push(AirNode::PushLiteral(value));
                    }
                    None => nodes.push(node.clone()),
                }
            }
            AirNode::And { rhs, assign } => nodes.push(AirNode::And {
                rhs: fold_constants(rhs),
                assign: *assign,
            }),
            AirNode::Or { rhs, assign } => nodes.push(AirNode::Or {
                rhs: fold_constants(rhs),
                assign: *assign,
            }),
            AirNode::Coalesce { rhs, assign } => nodes.push(AirNode::Coalesce {
                rhs: fold_constants(rhs),
                assign: *assign,
            }),
            AirNode::Select { on_true, on_false } => nodes.push(AirNode::Select {
                on_true: fold_constants(on_true),
                on_false: fold_constants(on_false),
            }),
            other => nodes.push(other.clone()),
        }
    }
    Expression::new(nodes)
}

fn is_mutating_unary(op: UnaryOp) -> bool {
    matches!(
        op,
        UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_binary_over_literals() {
        let expr = Expression::new(vec![
            AirNode::PushLiteral(Value::Integer(2)),
            AirNode::PushLiteral(Value::Integer(3)),
            AirNode::Binary {
                op: BinaryOp::Mul,
                assign: false,
            },
        ]);
        let folded = fold_constants(&expr);
        assert_eq!(folded.nodes().len(), 1);
        let AirNode::PushLiteral(v) = &folded.nodes()[0] else {
            panic!("expected literal, got {folded:?}");
        };
        assert_eq!(v.as_integer().unwrap(), 6);
    }

    #[test]
    fn leaves_failing_folds_for_runtime() {
        let expr = Expression::new(vec![
            AirNode::PushLiteral(Value::Integer(i64::MAX)),
            AirNode::PushLiteral(Value::Integer(1)),
            AirNode::Binary {
                op: BinaryOp::Add,
                assign: false,
            },
        ]);
        assert_eq!(fold_constants(&expr).nodes().len(), 3);
    }
}
