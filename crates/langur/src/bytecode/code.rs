//! Compilation results: flat bytecode plus a parallel source-position array.

use std::rc::Rc;

use crate::errors::Position;

/// The output of compiling one source: bytecode and, for every emitted byte,
/// the source position it came from. The two arrays always have equal length.
#[derive(Debug, Default)]
pub struct Code {
    bytecode: Vec<u8>,
    src_positions: Vec<Position>,
}

impl Code {
    pub(crate) fn new(bytecode: Vec<u8>, src_positions: Vec<Position>) -> Rc<Self> {
        debug_assert_eq!(bytecode.len(), src_positions.len());
        Rc::new(Self { bytecode, src_positions })
    }

    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    /// Source position for the byte at `ip`.
    #[must_use]
    pub fn position_at(&self, ip: usize) -> Position {
        self.src_positions.get(ip).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }

    #[must_use]
    pub fn src_positions(&self) -> &[Position] {
        &self.src_positions
    }
}
