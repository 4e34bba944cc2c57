//! Output plumbing for the `std.io` and `std.debug` bindings.

use std::{
    cell::RefCell,
    io::Write as _,
    rc::Rc,
};

/// Sink for text emitted by script output bindings.
///
/// Implement this to capture or redirect output from embedded scripts; the
/// default [`StdPrint`] writes to the process stdout.
pub trait PrintWriter {
    /// Writes one chunk of already-formatted text, no separators added.
    fn write_text(&mut self, text: &str);

    /// Terminates one emission, conventionally with a newline.
    fn finish_line(&mut self) {
        self.write_text("\n");
    }
}

/// Writes to the process stdout, flushing per line.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write_text(&mut self, text: &str) {
        print!("{text}");
    }

    fn finish_line(&mut self) {
        println!();
        let _ = std::io::stdout().flush();
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write_text(&mut self, _text: &str) {}

    fn finish_line(&mut self) {}
}

/// Captures output into a shared string buffer, for tests and embedders
/// that surface script output themselves.
///
/// The buffer handle stays valid after the writer has been moved into the
/// global context:
///
/// ```
/// use asteria::io::CollectStringPrint;
///
/// let writer = CollectStringPrint::new();
/// let buffer = writer.buffer();
/// // … install `writer`, run scripts …
/// assert_eq!(buffer.borrow().as_str(), "");
/// ```
#[derive(Debug, Default)]
pub struct CollectStringPrint {
    buffer: Rc<RefCell<String>>,
}

impl CollectStringPrint {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle onto the captured text.
    pub fn buffer(&self) -> Rc<RefCell<String>> {
        self.buffer.clone()
    }
}

impl PrintWriter for CollectStringPrint {
    fn write_text(&mut self, text: &str) {
        self.buffer.borrow_mut().push_str(text);
    }
}
