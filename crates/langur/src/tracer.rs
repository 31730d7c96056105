//! Host-pluggable VM observability.
//!
//! Rather than wiring a logging framework into the interpreter core, hosts
//! that want visibility into execution implement [`VmTracer`] and install it
//! on the context. The default [`NoopTracer`] compiles away to nothing at the
//! call sites that matter.

use crate::errors::ScriptError;

/// Hooks invoked by the VM at coarse execution boundaries.
pub trait VmTracer {
    /// A call frame was pushed for the named function.
    fn on_frame_push(&mut self, _function_name: &str) {}

    /// The current call frame returned.
    fn on_frame_pop(&mut self) {}

    /// An error was raised (it may still be caught by `recover`).
    fn on_error(&mut self, _error: &ScriptError) {}
}

/// Tracer that ignores every event.
#[derive(Debug, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that prints frame transitions and errors to stderr.
///
/// Intended for debugging embedded scripts without attaching a debugger.
#[derive(Debug, Default)]
pub struct StderrTracer {
    depth: usize,
}

impl VmTracer for StderrTracer {
    fn on_frame_push(&mut self, function_name: &str) {
        eprintln!("{:indent$}-> {function_name}", "", indent = self.depth * 2);
        self.depth += 1;
    }

    fn on_frame_pop(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        eprintln!("{:indent$}<-", "", indent = self.depth * 2);
    }

    fn on_error(&mut self, error: &ScriptError) {
        eprintln!("{:indent$}!! {error}", "", indent = self.depth * 2);
    }
}
