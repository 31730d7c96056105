//! Shared harness: run a snippet with captured output and in-memory files.

use std::{cell::RefCell, rc::Rc};

use langur::{Config, Context, MemFiles, Object, ScriptError, ScriptOut};

/// Writer that shares its buffer so tests can read output after the context
/// consumed the writer.
#[derive(Clone, Default)]
pub struct SharedOut(pub Rc<RefCell<String>>);

impl ScriptOut for SharedOut {
    fn write(&mut self, text: &str) -> usize {
        self.0.borrow_mut().push_str(text);
        text.len()
    }
}

pub fn context_with_output(files: MemFiles) -> (Context, Rc<RefCell<String>>) {
    let buffer = Rc::new(RefCell::new(String::new()));
    let ctx = Context::with_config(Config {
        repl_mode: false,
        max_execution_time: None,
        stdio: Box::new(SharedOut(buffer.clone())),
        files: Box::new(files),
    });
    (ctx, buffer)
}

pub fn run(source: &str) -> (Result<Object, ScriptError>, String) {
    run_with_files(source, MemFiles::new())
}

pub fn run_with_files(source: &str, files: MemFiles) -> (Result<Object, ScriptError>, String) {
    let (mut ctx, buffer) = context_with_output(files);
    let result = ctx.execute_source(source);
    let output = buffer.borrow().clone();
    (result, output)
}

pub fn run_ok(source: &str) -> Object {
    let (result, _) = run(source);
    result.expect("execution failed")
}

pub fn output_of(source: &str) -> String {
    let (result, output) = run(source);
    result.expect("execution failed");
    output
}
