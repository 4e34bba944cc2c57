//! The runtime value model.
//!
//! A [`Value`] is a tagged sum of exactly nine variants. Scalars are stored
//! inline; `string`, `array`, `object` and `function` share their payloads
//! behind `Rc`, so copying any value is O(1) and mutation applies the
//! unique-owner rule (clone-on-write when the payload is shared).
//!
//! Values never form cycles on their own: a cycle always goes through a
//! [`Variable`](crate::variable::Variable) cell captured by a function or
//! embedded in opaque state, which is why [`Value::collect_variables`] is
//! the collector's only traversal entry point.

use std::{fmt, rc::Rc};

use indexmap::IndexMap;
use strum::Display;

use crate::{
    exception::{ExecResult, Exception},
    function::Function,
    llds::PointerHashSet,
    opaque::Opaque,
    variable::VarHandle,
};

/// Insertion-ordered string → value map backing the `object` variant.
pub type ObjectMap = IndexMap<Rc<str>, Value, ahash::RandomState>;

/// One runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    Boolean(bool),
    /// 64-bit signed two's-complement integer.
    Integer(i64),
    /// IEEE-754 double, including NaN and signed infinities.
    Real(f64),
    /// Immutable shared text. UTF-8; comparison is byte-lexicographic.
    String(Rc<str>),
    /// Host-opaque shared state; participates in GC discovery.
    Opaque(Opaque),
    /// An invocable: a scripted closure or a native binding.
    Function(Function),
    /// Ordered sequence with a shared copy-on-write payload.
    Array(Rc<Vec<Value>>),
    /// Insertion-ordered string-keyed map with a shared payload.
    Object(Rc<ObjectMap>),
}

/// The type tag of a value, as `typeof` reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Type {
    #[strum(serialize = "null")]
    Null,
    #[strum(serialize = "boolean")]
    Boolean,
    #[strum(serialize = "integer")]
    Integer,
    #[strum(serialize = "real")]
    Real,
    #[strum(serialize = "string")]
    String,
    #[strum(serialize = "opaque")]
    Opaque,
    #[strum(serialize = "function")]
    Function,
    #[strum(serialize = "array")]
    Array,
    #[strum(serialize = "object")]
    Object,
}

/// Result of a three-way comparison. The `Display` strings are exactly what
/// the `<=>` operator yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Compare {
    #[strum(serialize = "[unordered]")]
    Unordered,
    #[strum(serialize = "[less]")]
    Less,
    #[strum(serialize = "[equal]")]
    Equal,
    #[strum(serialize = "[greater]")]
    Greater,
}

impl Compare {
    fn from_ord(ord: std::cmp::Ordering) -> Self {
        match ord {
            std::cmp::Ordering::Less => Self::Less,
            std::cmp::Ordering::Equal => Self::Equal,
            std::cmp::Ordering::Greater => Self::Greater,
        }
    }

    fn from_partial(ord: Option<std::cmp::Ordering>) -> Self {
        ord.map_or(Self::Unordered, Self::from_ord)
    }
}

impl Value {
    pub fn type_of(&self) -> Type {
        match self {
            Self::Null => Type::Null,
            Self::Boolean(_) => Type::Boolean,
            Self::Integer(_) => Type::Integer,
            Self::Real(_) => Type::Real,
            Self::String(_) => Type::String,
            Self::Opaque(_) => Type::Opaque,
            Self::Function(_) => Type::Function,
            Self::Array(_) => Type::Array,
            Self::Object(_) => Type::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Boolean(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer(_))
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Self::Real(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Opaque(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    fn type_error(&self, expected: Type) -> Exception {
        Exception::runtime(format!(
            "value type mismatch (expected `{expected}`, value had type `{}`)",
            self.type_of()
        ))
    }

    pub fn as_boolean(&self) -> ExecResult<bool> {
        match self {
            Self::Boolean(b) => Ok(*b),
            _ => Err(self.type_error(Type::Boolean)),
        }
    }

    pub fn as_integer(&self) -> ExecResult<i64> {
        match self {
            Self::Integer(n) => Ok(*n),
            _ => Err(self.type_error(Type::Integer)),
        }
    }

    pub fn as_real(&self) -> ExecResult<f64> {
        match self {
            Self::Real(r) => Ok(*r),
            _ => Err(self.type_error(Type::Real)),
        }
    }

    /// The value as a real, accepting integers (the one sanctioned implicit
    /// widening; comparison uses it too).
    pub fn as_number(&self) -> ExecResult<f64> {
        match self {
            Self::Integer(n) => Ok(*n as f64),
            Self::Real(r) => Ok(*r),
            _ => Err(self.type_error(Type::Real)),
        }
    }

    pub fn as_string(&self) -> ExecResult<&Rc<str>> {
        match self {
            Self::String(s) => Ok(s),
            _ => Err(self.type_error(Type::String)),
        }
    }

    pub fn as_opaque(&self) -> ExecResult<&Opaque> {
        match self {
            Self::Opaque(o) => Ok(o),
            _ => Err(self.type_error(Type::Opaque)),
        }
    }

    pub fn as_function(&self) -> ExecResult<&Function> {
        match self {
            Self::Function(f) => Ok(f),
            _ => Err(self.type_error(Type::Function)),
        }
    }

    pub fn as_array(&self) -> ExecResult<&Vec<Value>> {
        match self {
            Self::Array(a) => Ok(a),
            _ => Err(self.type_error(Type::Array)),
        }
    }

    pub fn as_object(&self) -> ExecResult<&ObjectMap> {
        match self {
            Self::Object(o) => Ok(o),
            _ => Err(self.type_error(Type::Object)),
        }
    }

    /// Mutable access to an array payload, cloning it first if shared.
    pub fn mut_array(&mut self) -> ExecResult<&mut Vec<Value>> {
        match self {
            Self::Array(a) => Ok(Rc::make_mut(a)),
            _ => Err(self.type_error(Type::Array)),
        }
    }

    /// Mutable access to an object payload, cloning it first if shared.
    pub fn mut_object(&mut self) -> ExecResult<&mut ObjectMap> {
        match self {
            Self::Object(o) => Ok(Rc::make_mut(o)),
            _ => Err(self.type_error(Type::Object)),
        }
    }

    /// The canonical truthiness rule: `null`, `false`, `0`, `0.0`, `""` and
    /// `[]` are false; everything else — empty objects and NaN included —
    /// is true.
    pub fn test(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Integer(n) => *n != 0,
            Self::Real(r) => *r != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Array(a) => !a.is_empty(),
            Self::Opaque(_) | Self::Function(_) | Self::Object(_) => true,
        }
    }

    /// Three-way comparison.
    ///
    /// `null` equals `null` and is unordered with everything else. Integers
    /// and reals compare by numeric value; NaN is unordered with everything
    /// including itself. Booleans order `false < true`. Strings compare
    /// byte-lexicographically. Arrays compare element-wise, then by length.
    /// Functions, opaques and objects are unordered with everything,
    /// themselves included.
    pub fn compare(&self, other: &Self) -> Compare {
        match (self, other) {
            (Self::Null, Self::Null) => Compare::Equal,
            (Self::Boolean(a), Self::Boolean(b)) => Compare::from_ord(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => Compare::from_ord(a.cmp(b)),
            (Self::Integer(a), Self::Real(b)) => Compare::from_partial((*a as f64).partial_cmp(b)),
            (Self::Real(a), Self::Integer(b)) => Compare::from_partial(a.partial_cmp(&(*b as f64))),
            (Self::Real(a), Self::Real(b)) => Compare::from_partial(a.partial_cmp(b)),
            (Self::String(a), Self::String(b)) => Compare::from_ord(a.as_bytes().cmp(b.as_bytes())),
            (Self::Array(a), Self::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y) {
                        Compare::Equal => {}
                        other => return other,
                    }
                }
                Compare::from_ord(a.len().cmp(&b.len()))
            }
            _ => Compare::Unordered,
        }
    }

    /// Surface-syntax emission. Strings are quoted and escaped iff
    /// `escape`; nested strings inside containers are always escaped.
    pub fn print(&self, f: &mut dyn fmt::Write, escape: bool) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Real(r) => write_real(f, *r),
            Self::String(s) => {
                if escape {
                    write_quoted(f, s)
                } else {
                    f.write_str(s)
                }
            }
            Self::Opaque(o) => write!(f, "(opaque) [[`{}`]]", o.describe()),
            Self::Function(func) => write!(f, "(function) [[`{}`]]", func.describe()),
            Self::Array(a) => {
                f.write_str("[ ")?;
                for (n, element) in a.iter().enumerate() {
                    if n != 0 {
                        f.write_str(", ")?;
                    }
                    element.print(f, true)?;
                }
                f.write_str(" ]")
            }
            Self::Object(o) => {
                f.write_str("{ ")?;
                for (n, (key, value)) in o.iter().enumerate() {
                    if n != 0 {
                        f.write_str(", ")?;
                    }
                    write_quoted(f, key)?;
                    f.write_str(" = ")?;
                    value.print(f, true)?;
                }
                f.write_str(" }")
            }
        }
    }

    /// `print` into a fresh string, unescaped at the top level.
    pub fn print_string(&self) -> String {
        let mut text = String::new();
        self.print(&mut text, false).expect("string formatting is infallible");
        text
    }

    /// Structured debug emission: every scalar is prefixed with its type,
    /// containers recurse over `indent`-wide levels starting `hanging`
    /// columns in.
    pub fn dump(&self, f: &mut dyn fmt::Write, indent: usize, hanging: usize) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "boolean {b}"),
            Self::Integer(n) => write!(f, "integer {n}"),
            Self::Real(r) => {
                f.write_str("real ")?;
                write_real(f, *r)
            }
            Self::String(s) => {
                write!(f, "string({}) ", s.len())?;
                write_quoted(f, s)
            }
            Self::Opaque(o) => write!(f, "opaque [[`{}`]]", o.describe()),
            Self::Function(func) => write!(f, "function [[`{}`]]", func.describe()),
            Self::Array(a) => {
                writeln!(f, "array({}) [", a.len())?;
                for (n, element) in a.iter().enumerate() {
                    write!(f, "{:width$}{n} = ", "", width = hanging + indent)?;
                    element.dump(f, indent, hanging + indent)?;
                    writeln!(f, ";")?;
                }
                write!(f, "{:width$}]", "", width = hanging)
            }
            Self::Object(o) => {
                writeln!(f, "object({}) {{", o.len())?;
                for (key, value) in o.iter() {
                    write!(f, "{:width$}", "", width = hanging + indent)?;
                    write_quoted(f, key)?;
                    f.write_str(" = ")?;
                    value.dump(f, indent, hanging + indent)?;
                    writeln!(f, ";")?;
                }
                write!(f, "{:width$}}}", "", width = hanging)
            }
        }
    }

    /// `dump` into a fresh string with two-space indentation.
    pub fn dump_string(&self) -> String {
        let mut text = String::new();
        self.dump(&mut text, 2, 0).expect("string formatting is infallible");
        text
    }

    /// Pushes every variable handle transitively reachable from this value
    /// into `out`.
    ///
    /// `staged` deduplicates shared payloads by address: a payload shared
    /// between several values is walked once, so each embedded handle slot
    /// contributes exactly one edge. The collector's tally and liveness
    /// propagation both depend on that.
    pub fn collect_variables(&self, staged: &mut PointerHashSet, out: &mut Vec<VarHandle>) {
        match self {
            Self::Null | Self::Boolean(_) | Self::Integer(_) | Self::Real(_) | Self::String(_) => {}
            Self::Opaque(o) => o.collect_variables(staged, out),
            Self::Function(func) => func.collect_variables(staged, out),
            Self::Array(a) => {
                if staged.insert(Rc::as_ptr(a).cast()) {
                    for element in a.iter() {
                        element.collect_variables(staged, out);
                    }
                }
            }
            Self::Object(o) => {
                if staged.insert(Rc::as_ptr(o).cast()) {
                    for value in o.values() {
                        value.collect_variables(staged, out);
                    }
                }
            }
        }
    }

    /// Builds an object value from key/value pairs, preserving order.
    pub fn object_from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<Rc<str>>,
        I: IntoIterator<Item = (K, Self)>,
    {
        let map: ObjectMap = pairs.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::Object(Rc::new(map))
    }
}

/// Formats a real preserving the sign of NaN (the regression scripts
/// observe `-nan`) and spelling infinities out; finite values use shortest
/// round-trip notation with a fractional marker so a real never reads back
/// as an integer.
fn write_real(f: &mut dyn fmt::Write, x: f64) -> fmt::Result {
    if x.is_nan() {
        return f.write_str(if x.is_sign_negative() { "-nan" } else { "nan" });
    }
    if x.is_infinite() {
        return f.write_str(if x < 0.0 { "-infinity" } else { "infinity" });
    }
    write!(f, "{x:?}")
}

pub(crate) fn write_quoted(f: &mut dyn fmt::Write, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04X}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(Rc::from(v))
    }
}

impl From<Rc<str>> for Value {
    fn from(v: Rc<str>) -> Self {
        Self::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(Rc::new(v))
    }
}

impl From<ObjectMap> for Value {
    fn from(v: ObjectMap) -> Self {
        Self::Object(Rc::new(v))
    }
}

impl From<Function> for Value {
    fn from(v: Function) -> Self {
        Self::Function(v)
    }
}

impl From<Opaque> for Value {
    fn from(v: Opaque) -> Self {
        Self::Opaque(v)
    }
}
