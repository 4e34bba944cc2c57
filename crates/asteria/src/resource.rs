//! Execution limits and driver options.

use crate::exception::{ExecResult, Exception};

/// Default ceiling on nested function frames.
///
/// Tail calls replace their frame instead of nesting, so tail recursion is
/// not limited by this; only genuinely nested calls count.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1024;

/// Default ceiling on the argument count of a single call.
pub const DEFAULT_MAX_ARGUMENT_COUNT: usize = 256;

/// Compile/execution options handed to the driver.
#[derive(Debug, Clone)]
pub struct Options {
    /// 0 disables compile-time rewrites; 1–99 enable constant folding.
    pub optimization_level: u8,
    /// Trace every statement dispatch to stderr.
    pub verbose_single_step_traps: bool,
    /// Calls with more arguments than this fail before binding.
    pub max_argument_count: usize,
    /// Nested (non-tail) call frames beyond this raise a runtime error.
    pub max_recursion_depth: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            optimization_level: 1,
            verbose_single_step_traps: false,
            max_argument_count: DEFAULT_MAX_ARGUMENT_COUNT,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
        }
    }
}

impl Options {
    /// Clamps fields to their accepted ranges.
    #[must_use]
    pub fn validated(mut self) -> Self {
        self.optimization_level = self.optimization_level.min(99);
        self.max_argument_count = self.max_argument_count.max(1);
        self.max_recursion_depth = self.max_recursion_depth.max(1);
        self
    }
}

/// Fails when one more nested frame would exceed the configured depth.
pub(crate) fn check_recursion_depth(depth: usize, limit: usize) -> ExecResult<()> {
    if depth >= limit {
        return Err(Exception::runtime(format!(
            "maximum recursion depth exceeded (limit `{limit}`)"
        )));
    }
    Ok(())
}

/// Fails when a call supplies more arguments than the configured maximum.
pub(crate) fn check_argument_count(count: usize, limit: usize) -> ExecResult<()> {
    if count > limit {
        return Err(Exception::runtime(format!(
            "too many arguments (`{count}` supplied, limit `{limit}`)"
        )));
    }
    Ok(())
}
