//! An embeddable scripting language: lexer, Pratt parser, stack-based
//! bytecode compiler, and a virtual machine with a tracing mark–sweep
//! garbage collector over a tagged-value object model.
//!
//! The host-facing surface is [`Context`]: compile source (or files, through
//! a pluggable loader) into reusable [`Code`], execute it against persistent
//! globals, inject values, and register native functions. Script output and
//! file access flow through the hooks on [`Config`].
//!
//! ```
//! use langur::{CollectOut, Config, Context, NoFiles, Object};
//!
//! let mut ctx = Context::with_config(Config {
//!     stdio: Box::new(CollectOut::new()),
//!     files: Box::new(NoFiles),
//!     ..Config::default()
//! });
//! let result = ctx.execute_source("var x = 2; x * 21").unwrap();
//! assert_eq!(result, Object::Number(42.0));
//! ```

mod ast;
mod builtins;
mod bytecode;
mod errors;
mod heap;
mod io;
mod lexer;
mod map;
mod object;
mod parser;
mod run;
mod symbols;
mod tracer;
mod value;

pub use crate::{
    bytecode::Code,
    errors::{ErrorKind, Errors, Position, ScriptError, Traceback, TracebackEntry},
    heap::HeapStats,
    io::{CollectOut, FileLoader, MemFiles, NoFiles, NullOut, OsFiles, ScriptOut, StdOut},
    object::Object,
    run::{Config, Context, HostFunction},
    tracer::{NoopTracer, StderrTracer, VmTracer},
};
