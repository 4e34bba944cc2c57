//! Exceptions and backtraces.
//!
//! Everything that can go wrong at runtime travels through a single
//! [`Exception`] type: values thrown by script `throw` statements,
//! interpreter-raised errors (type mismatches, overflow, bad subscripts, …),
//! assertion failures, and host interrupts. Script-visible errors carry a
//! string message as their value so handlers can match on substrings, which
//! is how the regression scripts inspect them.
//!
//! A backtrace is a list of [`Frame`]s pushed while the exception unwinds:
//! the throw site first, then one frame per function-call boundary crossed.
//! Frames elided by proper tail calls are replayed by the call trampoline so
//! that optimized and unoptimized traces are indistinguishable.

use std::fmt;

use strum::{Display, IntoStaticStr};

use crate::{source::SourceLocation, value::Value};

/// Result alias used throughout the evaluator.
pub type ExecResult<T> = Result<T, Exception>;

/// What a backtrace frame records about the point it was captured at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum FrameKind {
    /// The statement that threw, or the operation that failed.
    #[strum(serialize = "throw")]
    Throw,
    /// A function-call boundary the exception unwound through. Frames for
    /// calls elided by PTC use this same kind, on purpose.
    #[strum(serialize = "function")]
    Function,
    /// A native binding that failed or rethrew.
    #[strum(serialize = "native")]
    Native,
    /// A deferred expression that raised during scope exit.
    #[strum(serialize = "defer")]
    Defer,
    /// The `try` statement whose body the exception escaped from.
    #[strum(serialize = "try")]
    Try,
    /// An `assert` statement that failed.
    #[strum(serialize = "assert")]
    Assert,
}

/// One backtrace record: what kind of boundary, and where in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub location: SourceLocation,
}

impl Frame {
    pub fn new(kind: FrameKind, location: SourceLocation) -> Self {
        Self { kind, location }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] at '{}'", self.kind, self.location)
    }
}

/// Severity class of an exception.
///
/// Only `Runtime` exceptions can be caught by script `try`/`catch`;
/// assertion failures and interrupts propagate past every handler (user
/// `defer`s still run on the way out, with their own exceptions suppressed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ExceptionKind {
    #[strum(serialize = "runtime error")]
    Runtime,
    #[strum(serialize = "assertion failure")]
    Assertion,
    #[strum(serialize = "interrupt")]
    Interrupt,
}

/// A thrown value together with the backtrace accumulated while unwinding.
#[derive(Debug, Clone)]
pub struct Exception {
    kind: ExceptionKind,
    value: Value,
    frames: Vec<Frame>,
}

impl Exception {
    /// An exception for a value thrown by a script `throw` statement.
    pub fn throw_value(value: Value, location: SourceLocation) -> Self {
        Self {
            kind: ExceptionKind::Runtime,
            value,
            frames: vec![Frame::new(FrameKind::Throw, location)],
        }
    }

    /// An interpreter-raised runtime error carrying `message` as its value.
    ///
    /// No frame is attached here; the evaluator stamps the current site onto
    /// frameless exceptions as they surface (see [`Exception::at`]), so leaf
    /// operations do not have to know where they were invoked from.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ExceptionKind::Runtime,
            value: Value::from(message.into()),
            frames: Vec::new(),
        }
    }

    /// An assertion failure. Fatal: propagates past `try`/`catch`.
    pub fn assertion(message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            kind: ExceptionKind::Assertion,
            value: Value::from(message.into()),
            frames: vec![Frame::new(FrameKind::Assert, location)],
        }
    }

    /// The uncatchable exception raised when the host interrupt flag is set.
    pub fn interrupt(location: SourceLocation) -> Self {
        Self {
            kind: ExceptionKind::Interrupt,
            value: Value::from("interrupt requested by host".to_owned()),
            frames: vec![Frame::new(FrameKind::Throw, location)],
        }
    }

    pub fn kind(&self) -> ExceptionKind {
        self.kind
    }

    /// Whether a script `catch` clause may bind this exception.
    pub fn is_catchable(&self) -> bool {
        self.kind == ExceptionKind::Runtime
    }

    /// The thrown value, as a `catch` clause would observe it.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Stamps `location` as the origin if no frame has been recorded yet.
    ///
    /// Returns `self` so error paths can write `.map_err(|e| e.at(site))`.
    #[must_use]
    pub fn at(mut self, location: SourceLocation) -> Self {
        if self.frames.is_empty() {
            self.frames.push(Frame::new(FrameKind::Throw, location));
        }
        self
    }

    /// Records one unwinding boundary.
    pub fn push_frame(&mut self, kind: FrameKind, location: SourceLocation) {
        self.frames.push(Frame::new(kind, location));
    }

    /// The backtrace as script data: an array of `{frame, file, line}`
    /// objects, innermost first. This is what `__backtrace` binds to inside
    /// a `catch` handler.
    pub fn backtrace_value(&self) -> Value {
        let records = self
            .frames
            .iter()
            .map(|frame| {
                Value::object_from_pairs([
                    ("frame", Value::from(<&'static str>::from(frame.kind))),
                    ("file", Value::from(frame.location.file().to_string())),
                    ("line", Value::from(i64::from(frame.location.line()))),
                ])
            })
            .collect::<Vec<_>>();
        Value::from(records)
    }

    /// The message text, when the value is a plain string.
    pub fn message(&self) -> Option<&str> {
        self.value.as_string().ok().map(|s| &**s)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asteria {}: ", self.kind)?;
        self.value.print(f, false)?;
        for frame in &self.frames {
            write!(f, "\n  {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Exception {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frameless_runtime_error_gets_site_stamped_once() {
        let site = SourceLocation::new("t", 3);
        let exc = Exception::runtime("boom").at(site.clone());
        assert_eq!(exc.frames().len(), 1);
        assert_eq!(exc.frames()[0].location, site);

        // A second stamp must not displace the origin.
        let exc = exc.at(SourceLocation::new("t", 9));
        assert_eq!(exc.frames()[0].location.line(), 3);
    }

    #[test]
    fn assertion_and_interrupt_are_uncatchable() {
        let site = SourceLocation::unknown();
        assert!(!Exception::assertion("no", site.clone()).is_catchable());
        assert!(!Exception::interrupt(site.clone()).is_catchable());
        assert!(Exception::throw_value(Value::Null, site).is_catchable());
    }

    #[test]
    fn backtrace_value_lists_frames_innermost_first() {
        let mut exc = Exception::runtime("x").at(SourceLocation::new("a", 1));
        exc.push_frame(FrameKind::Function, SourceLocation::new("a", 8));
        let bt = exc.backtrace_value();
        let arr = bt.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        let first = arr[0].as_object().unwrap();
        assert_eq!(first.get("frame").unwrap().as_string().unwrap().as_ref(), "throw");
        let second = arr[1].as_object().unwrap();
        assert_eq!(second.get("line").unwrap().as_integer().unwrap(), 8);
    }
}
