//! Error kinds, source positions, tracebacks, and the bounded error list.
//!
//! Two layers exist: [`RunError`] is the internal plumbing type threaded through
//! fallible operations with `?`, carrying only a kind and a message. The VM and
//! compiler stamp a source position onto it when appending it to the shared
//! [`Errors`] list, producing a public [`ScriptError`].

use std::{fmt, rc::Rc};

use strum::{Display, IntoStaticStr};

/// Maximum number of errors retained in a context's error list.
///
/// Additional errors are silently dropped so that error reporting never
/// allocates unboundedly.
pub(crate) const ERRORS_MAX_COUNT: usize = 16;

/// Maximum length of a retained error message; longer messages are truncated.
pub(crate) const ERROR_MESSAGE_MAX_LEN: usize = 255;

/// A source position: originating file (if any) plus 0-based line and column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    /// Path of the compiled file this position belongs to, shared between all
    /// positions of that file.
    pub file: Option<Rc<str>>,
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub(crate) fn new(file: Option<Rc<str>>, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{file}:{}:{}", self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

/// Classification of an error, from lexing through execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ErrorKind {
    None,
    Parsing,
    Compilation,
    Runtime,
    Timeout,
    Allocation,
    User,
}

/// One frame of a captured call stack.
#[derive(Debug, Clone, PartialEq)]
pub struct TracebackEntry {
    pub function_name: String,
    pub position: Position,
}

/// A call stack captured when an error is raised, innermost frame first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Traceback {
    entries: Vec<TracebackEntry>,
}

impl Traceback {
    pub(crate) fn append(&mut self, function_name: impl Into<String>, position: Position) {
        self.entries.push(TracebackEntry {
            function_name: function_name.into(),
            position,
        });
    }

    #[must_use]
    pub fn entries(&self) -> &[TracebackEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Traceback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            match &entry.position.file {
                Some(file) => writeln!(
                    f,
                    "{} in {file} on {}:{}",
                    entry.function_name, entry.position.line, entry.position.column
                )?,
                None => writeln!(f, "{}", entry.function_name)?,
            }
        }
        Ok(())
    }
}

/// A fully formed error: kind, position, message, and an optional traceback.
///
/// This is the type hosts see from `compile`/`execute` and via
/// [`crate::Context::errors`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub position: Position,
    pub message: String,
    pub traceback: Option<Traceback>,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at {}", self.kind, self.message, self.position)?;
        if let Some(traceback) = &self.traceback
            && !traceback.is_empty()
        {
            write!(f, "\nTraceback:\n{traceback}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

/// Internal error plumbing: a kind and a message, no position yet.
///
/// Positions are stamped by whichever layer knows the current instruction or
/// token when the error is moved into the [`Errors`] list. Native calls may
/// attach a partial traceback (their own name) before the VM appends the
/// frame walk.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    pub traceback: Option<Traceback>,
}

pub(crate) type RunResult<T> = Result<T, RunError>;

impl RunError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            traceback: None,
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn allocation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Allocation, message)
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User, message)
    }

    pub fn with_traceback(mut self, traceback: Traceback) -> Self {
        self.traceback = Some(traceback);
        self
    }
}

/// Fixed-capacity error list shared by the lexer, parser, compiler, and VM.
#[derive(Debug, Default)]
pub struct Errors {
    list: Vec<ScriptError>,
}

impl Errors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an error, truncating the message and dropping the error
    /// entirely once the list is full.
    pub(crate) fn add(&mut self, kind: ErrorKind, position: Position, message: impl Into<String>) {
        self.push_entry(kind, position, message.into(), None);
    }

    pub(crate) fn add_run_error(&mut self, err: RunError, position: Position) {
        self.push_entry(err.kind, position, err.message, err.traceback);
    }

    fn push_entry(&mut self, kind: ErrorKind, position: Position, mut message: String, traceback: Option<Traceback>) {
        if self.list.len() >= ERRORS_MAX_COUNT {
            return;
        }
        if message.len() > ERROR_MESSAGE_MAX_LEN {
            let mut end = ERROR_MESSAGE_MAX_LEN;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        self.list.push(ScriptError {
            kind,
            position,
            message,
            traceback,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&ScriptError> {
        self.list.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&ScriptError> {
        self.list.last()
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut ScriptError> {
        self.list.last_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScriptError> {
        self.list.iter()
    }

    pub fn clear(&mut self) {
        self.list.clear();
    }
}
