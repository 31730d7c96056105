//! Public interface for embedding the interpreter.
//!
//! A [`Context`] owns one heap, one global store, one error list, the
//! persistent compiler state (constant pool, module cache, accumulated
//! module-global indexing), and persistent VM globals. `execute` resets the
//! stacks and frames but preserves globals, so a host can compile and run
//! several snippets against the same state.

use std::{any::Any, fmt, rc::Rc, time::Duration};

use crate::{
    bytecode::{
        Code,
        compiler::{Compiler, CompilerEnv},
        vm::{Vm, VmState},
    },
    errors::{ErrorKind, Errors, Position, ScriptError},
    heap::{Heap, HeapStats, NativeCallback, NativeFunction},
    io::{FileLoader, OsFiles, ScriptOut, StdOut},
    map::Map,
    object::{Object, object_to_value, value_to_object},
    symbols::GlobalStore,
    tracer::{NoopTracer, VmTracer},
    value::Value,
};

/// A host-registered native function.
pub type HostFunction = Rc<dyn Fn(&[Object]) -> Result<Object, String>>;

/// Context configuration.
///
/// `stdio` receives `print`/`println` output; `files` backs `import`,
/// `compile_file`, and the file builtins.
pub struct Config {
    /// Top-level `{` parses as a map literal expression statement.
    pub repl_mode: bool,
    /// Enables the periodic wall-clock check; exceeding it raises a
    /// `TIMEOUT` error.
    pub max_execution_time: Option<Duration>,
    pub stdio: Box<dyn ScriptOut>,
    pub files: Box<dyn FileLoader>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repl_mode: false,
            max_execution_time: None,
            stdio: Box::new(StdOut),
            files: Box::new(OsFiles),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("repl_mode", &self.repl_mode)
            .field("max_execution_time", &self.max_execution_time)
            .finish_non_exhaustive()
    }
}

/// An isolated interpreter instance.
pub struct Context {
    config: Config,
    heap: Heap,
    global_store: GlobalStore,
    errors: Errors,
    compiler: Compiler,
    vm_state: VmState,
    tracer: Box<dyn VmTracer>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let mut heap = Heap::new();
        let mut global_store = GlobalStore::new();
        crate::builtins::register_builtins(&mut heap, &mut global_store)
            .expect("builtin registration cannot exhaust a fresh heap");
        let vm_state = VmState::new(&mut heap).expect("overload keys cannot exhaust a fresh heap");
        Self {
            config,
            heap,
            global_store,
            errors: Errors::new(),
            compiler: Compiler::new(),
            vm_state,
            tracer: Box::new(NoopTracer),
        }
    }

    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.tracer = tracer;
    }

    /// Accumulated errors from the most recent compile or execute call.
    #[must_use]
    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Compiles source text into a reusable compilation result.
    pub fn compile(&mut self, source: &str) -> Result<Rc<Code>, ScriptError> {
        self.errors.clear();
        let mut env = CompilerEnv {
            heap: &mut self.heap,
            global_store: &self.global_store,
            errors: &mut self.errors,
            files: self.config.files.as_mut(),
            repl_mode: self.config.repl_mode,
        };
        match self.compiler.compile_source(&mut env, source, None) {
            Some(code) => Ok(code),
            None => Err(self.first_error()),
        }
    }

    /// Reads `path` through the file hook and compiles it.
    pub fn compile_file(&mut self, path: &str) -> Result<Rc<Code>, ScriptError> {
        self.errors.clear();
        let mut env = CompilerEnv {
            heap: &mut self.heap,
            global_store: &self.global_store,
            errors: &mut self.errors,
            files: self.config.files.as_mut(),
            repl_mode: self.config.repl_mode,
        };
        match self.compiler.compile_file(&mut env, path) {
            Some(code) => Ok(code),
            None => Err(self.first_error()),
        }
    }

    /// Executes a compilation result, returning the value of the last
    /// top-level expression statement.
    pub fn execute(&mut self, code: &Rc<Code>) -> Result<Object, ScriptError> {
        self.errors.clear();
        self.vm_state.reset();
        let result = {
            let mut vm = Vm {
                state: &mut self.vm_state,
                heap: &mut self.heap,
                global_store: &self.global_store,
                constants: &self.compiler.constants,
                errors: &mut self.errors,
                out: self.config.stdio.as_mut(),
                files: self.config.files.as_mut(),
                tracer: self.tracer.as_mut(),
                max_execution_time: self.config.max_execution_time,
            };
            vm.run(code)
        };
        self.config.stdio.flush();
        if self.errors.is_empty() {
            Ok(value_to_object(&self.heap, &result))
        } else {
            Err(self.last_error())
        }
    }

    /// Compiles and executes in one step.
    pub fn execute_source(&mut self, source: &str) -> Result<Object, ScriptError> {
        let code = self.compile(source)?;
        self.execute(&code)
    }

    /// Injects or replaces a named global visible to scripts.
    pub fn set_global(&mut self, name: &str, value: Object) -> Result<(), ScriptError> {
        match object_to_value(&mut self.heap, &value) {
            Ok(value) => {
                self.global_store.set(name, value);
                Ok(())
            }
            Err(err) => Err(ScriptError {
                kind: err.kind,
                position: Position::default(),
                message: err.message,
                traceback: None,
            }),
        }
    }

    /// Attaches an opaque host value as a named global. Scripts can pass it
    /// around and test it with `is_external` but cannot inspect it; the data
    /// is dropped when the last handle goes away.
    pub fn set_external(&mut self, name: &str, data: Rc<dyn Any>) -> Result<(), ScriptError> {
        match self.heap.alloc_external(data) {
            Ok(value) => {
                self.global_store.set(name, value);
                Ok(())
            }
            Err(err) => Err(ScriptError {
                kind: err.kind,
                position: Position::default(),
                message: err.message,
                traceback: None,
            }),
        }
    }

    /// Reads back an external global attached with [`Context::set_external`].
    #[must_use]
    pub fn get_external(&self, name: &str) -> Option<Rc<dyn Any>> {
        match self.global_store.get_by_name(name) {
            Some(Value::External(id)) => Some(self.heap.external(id).data.clone()),
            _ => None,
        }
    }

    /// Reads a named global (host-injected or builtin).
    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Object> {
        self.global_store
            .get_by_name(name)
            .map(|value| value_to_object(&self.heap, &value))
    }

    /// Registers a host function callable from scripts by `name`.
    pub fn register_native(
        &mut self,
        name: &str,
        function: impl Fn(&[Object]) -> Result<Object, String> + 'static,
    ) -> Result<(), ScriptError> {
        let value = self
            .heap
            .alloc_native(NativeFunction {
                name: name.to_owned(),
                callback: NativeCallback::Host(Rc::new(function)),
            })
            .map_err(|err| ScriptError {
                kind: err.kind,
                position: Position::default(),
                message: err.message,
                traceback: None,
            })?;
        self.global_store.set(name, value);
        Ok(())
    }

    /// Registers a map global whose entries are host functions, callable as
    /// `name.entry(...)`.
    pub fn register_namespace(
        &mut self,
        name: &str,
        entries: Vec<(&str, HostFunction)>,
    ) -> Result<(), ScriptError> {
        let mut build = || -> Result<Value, crate::errors::RunError> {
            let mut map = Map::with_capacity(entries.len());
            for (entry_name, function) in &entries {
                let key = self.heap.alloc_str(entry_name)?;
                let value = self.heap.alloc_native(NativeFunction {
                    name: format!("{name}.{entry_name}"),
                    callback: NativeCallback::Host(function.clone()),
                })?;
                map.set(&self.heap, key, value)?;
            }
            self.heap.alloc_map(map)
        };
        match build() {
            Ok(value) => {
                self.global_store.set(name, value);
                Ok(())
            }
            Err(err) => Err(ScriptError {
                kind: err.kind,
                position: Position::default(),
                message: err.message,
                traceback: None,
            }),
        }
    }

    fn first_error(&self) -> ScriptError {
        self.errors.first().cloned().unwrap_or_else(|| ScriptError {
            kind: ErrorKind::Compilation,
            position: Position::default(),
            message: "compilation failed".to_owned(),
            traceback: None,
        })
    }

    fn last_error(&self) -> ScriptError {
        self.errors.last().cloned().unwrap_or_else(|| ScriptError {
            kind: ErrorKind::Runtime,
            position: Position::default(),
            message: "execution failed".to_owned(),
            traceback: None,
        })
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("errors", &self.errors.len())
            .field("heap", &self.heap.stats().live_objects)
            .finish_non_exhaustive()
    }
}
