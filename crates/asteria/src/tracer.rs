//! Execution tracing hooks.
//!
//! The interpreter is parameterized over a [`StepTracer`]; with the
//! [`NoopTracer`] every hook compiles away through monomorphization, so
//! production embeddings pay nothing. The driver selects [`StderrTracer`]
//! when single-step traps are enabled in the options; [`RecordingTracer`]
//! captures events for assertions and post-mortem inspection.

use crate::source::SourceLocation;

/// One recorded execution event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A statement was dispatched.
    Statement { location: SourceLocation },
    /// A function frame was entered.
    Call { name: String, depth: usize },
    /// A function frame returned.
    Return { depth: usize },
    /// A pending tail call replaced the current frame in place.
    TailCall { name: String },
    /// A garbage collection finished.
    Collect { generation_limit: usize, reclaimed: usize },
}

/// Hook points at key execution events.
pub trait StepTracer {
    fn on_statement(&mut self, location: &SourceLocation) {
        let _ = location;
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        let _ = (name, depth);
    }

    fn on_return(&mut self, depth: usize) {
        let _ = depth;
    }

    fn on_tail_call(&mut self, name: &str) {
        let _ = name;
    }

    fn on_collect(&mut self, generation_limit: usize, reclaimed: usize) {
        let _ = (generation_limit, reclaimed);
    }
}

/// Zero-cost default: every hook is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl StepTracer for NoopTracer {}

/// Human-readable single-step log on stderr.
#[derive(Debug, Default)]
pub struct StderrTracer {
    statements: u64,
}

impl StepTracer for StderrTracer {
    fn on_statement(&mut self, location: &SourceLocation) {
        self.statements += 1;
        eprintln!("*** [{}] step at '{location}'", self.statements);
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        eprintln!("*** call `{name}` (depth {depth})");
    }

    fn on_return(&mut self, depth: usize) {
        eprintln!("*** return (depth {depth})");
    }

    fn on_tail_call(&mut self, name: &str) {
        eprintln!("*** tail call `{name}`");
    }

    fn on_collect(&mut self, generation_limit: usize, reclaimed: usize) {
        eprintln!("*** collected {reclaimed} variable(s) up to generation {generation_limit}");
    }
}

/// Records every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn statement_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::Statement { .. }))
            .count()
    }
}

impl StepTracer for RecordingTracer {
    fn on_statement(&mut self, location: &SourceLocation) {
        self.events.push(TraceEvent::Statement {
            location: location.clone(),
        });
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        self.events.push(TraceEvent::Call {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.events.push(TraceEvent::Return { depth });
    }

    fn on_tail_call(&mut self, name: &str) {
        self.events.push(TraceEvent::TailCall { name: name.to_owned() });
    }

    fn on_collect(&mut self, generation_limit: usize, reclaimed: usize) {
        self.events.push(TraceEvent::Collect {
            generation_limit,
            reclaimed,
        });
    }
}
