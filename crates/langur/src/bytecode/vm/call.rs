//! Call protocol for script and native callees.
//!
//! The callee sits below its arguments on the stack. Script calls push a new
//! frame; native calls run synchronously, with errors stamped with the call
//! site and a traceback, and error *values* returned by natives annotated
//! the same way.

use super::Vm;
use crate::{
    builtins::BuiltinCtx,
    errors::{RunError, RunResult, Traceback},
    heap::NativeCallback,
    object::{object_to_value, value_to_object},
    value::Value,
};

impl Vm<'_> {
    pub(super) fn call_value(&mut self, argc: usize) -> RunResult<()> {
        let callee_ix = self
            .sp()
            .checked_sub(argc + 1)
            .ok_or_else(|| RunError::runtime("stack underflow"))?;
        let callee = self.stack_get(callee_ix)?;
        match callee {
            Value::Function(id) => {
                let function = self.heap.function(id);
                let expected = usize::from(function.num_args);
                if argc != expected {
                    let name = function.name.clone().unwrap_or_else(|| "anonymous".to_owned());
                    return Err(RunError::runtime(format!(
                        "invalid number of arguments to \"{name}\", expected {expected}, got {argc}"
                    )));
                }
                let base_pointer = self.sp() - argc;
                self.push_frame(callee, base_pointer)
            }
            Value::Native(id) => self.call_native(id, argc),
            other => Err(RunError::runtime(format!(
                "{} object is not callable",
                other.kind_name()
            ))),
        }
    }

    fn call_native(&mut self, id: crate::heap::HeapId, argc: usize) -> RunResult<()> {
        let args: Vec<Value> = (self.sp() - argc..self.sp())
            .map(|ix| self.stack_get(ix))
            .collect::<RunResult<_>>()?;
        let native = self.heap.native(id);
        let name = native.name.clone();
        let callback = native.callback.clone();

        let result = match callback {
            NativeCallback::Builtin(builtin) => {
                let mut ctx = BuiltinCtx {
                    heap: &mut *self.heap,
                    out: &mut *self.out,
                    files: &mut *self.files,
                };
                builtin.call(&mut ctx, &args)
            }
            NativeCallback::Host(callback) => {
                let objects: Vec<_> = args.iter().map(|arg| value_to_object(self.heap, arg)).collect();
                match callback(&objects) {
                    Ok(object) => object_to_value(self.heap, &object),
                    Err(message) => Err(RunError::user(message)),
                }
            }
        };

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                // crash() raises with the call site alone; other natives
                // lead the traceback with their own name
                if name == "crash" {
                    return Err(err);
                }
                let mut traceback = Traceback::default();
                traceback.append(name, crate::errors::Position::default());
                return Err(err.with_traceback(traceback));
            }
        };

        // an Error returned as data gets a traceback too; the error builtin
        // is skipped to preserve user intent
        if let Value::Error(error_id) = value {
            let mut traceback = Traceback::default();
            if name != "error" {
                traceback.append(name.clone(), crate::errors::Position::default());
            }
            self.append_frames(&mut traceback);
            let error = self.heap.error_value_mut(error_id);
            if error.traceback.is_none() {
                error.traceback = Some(traceback);
            }
        }

        self.set_sp(self.sp() - argc - 1);
        self.push(value)
    }
}
