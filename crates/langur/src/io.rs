//! Host-pluggable output and file hooks.
//!
//! `print`/`println` and value stringification write through a [`ScriptOut`]
//! sink; `import`, `compile_file`, and the file builtins go through a
//! [`FileLoader`]. Both default to std implementations and can be replaced via
//! [`crate::Config`] to capture or redirect I/O from embedded scripts.

use std::io::{self, Write as _};

use ahash::AHashMap;

/// Sink for script output.
pub trait ScriptOut {
    /// Writes a chunk of already-formatted text, returning the number of
    /// bytes accepted.
    fn write(&mut self, text: &str) -> usize;

    /// Flushes any buffered output. The default does nothing.
    fn flush(&mut self) {}
}

/// Default [`ScriptOut`] that writes to the process stdout.
#[derive(Debug, Default)]
pub struct StdOut;

impl ScriptOut for StdOut {
    fn write(&mut self, text: &str) -> usize {
        let mut stdout = io::stdout();
        match stdout.write_all(text.as_bytes()) {
            Ok(()) => text.len(),
            Err(_) => 0,
        }
    }

    fn flush(&mut self) {
        let _ = io::stdout().flush();
    }
}

/// A [`ScriptOut`] that collects all output into a string.
///
/// Useful for testing or capturing print output programmatically.
#[derive(Debug, Default)]
pub struct CollectOut(String);

impl CollectOut {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the collected output as a string slice.
    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    /// Consumes the writer and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl ScriptOut for CollectOut {
    fn write(&mut self, text: &str) -> usize {
        self.0.push_str(text);
        text.len()
    }
}

/// A [`ScriptOut`] that ignores all output.
#[derive(Debug, Default)]
pub struct NullOut;

impl ScriptOut for NullOut {
    fn write(&mut self, text: &str) -> usize {
        text.len()
    }
}

/// File hooks backing `import`, `compile_file`, and the file builtins.
///
/// Returning `None` signals failure; the caller reports the error with the
/// path it attempted.
pub trait FileLoader {
    fn read_file(&mut self, path: &str) -> Option<String>;

    fn write_file(&mut self, path: &str, data: &str) -> Option<usize>;
}

/// Default [`FileLoader`] backed by `std::fs`.
#[derive(Debug, Default)]
pub struct OsFiles;

impl FileLoader for OsFiles {
    fn read_file(&mut self, path: &str) -> Option<String> {
        std::fs::read_to_string(path).ok()
    }

    fn write_file(&mut self, path: &str, data: &str) -> Option<usize> {
        std::fs::write(path, data).ok().map(|()| data.len())
    }
}

/// A [`FileLoader`] that refuses all file access.
#[derive(Debug, Default)]
pub struct NoFiles;

impl FileLoader for NoFiles {
    fn read_file(&mut self, _path: &str) -> Option<String> {
        None
    }

    fn write_file(&mut self, _path: &str, _data: &str) -> Option<usize> {
        None
    }
}

/// An in-memory [`FileLoader`] keyed by exact path. Used by tests and by
/// hosts that embed their module sources.
#[derive(Debug, Default)]
pub struct MemFiles {
    files: AHashMap<String, String>,
}

impl MemFiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, source: impl Into<String>) {
        self.files.insert(path.into(), source.into());
    }
}

impl FileLoader for MemFiles {
    fn read_file(&mut self, path: &str) -> Option<String> {
        self.files.get(path).cloned()
    }

    fn write_file(&mut self, path: &str, data: &str) -> Option<usize> {
        self.files.insert(path.to_owned(), data.to_owned());
        Some(data.len())
    }
}
