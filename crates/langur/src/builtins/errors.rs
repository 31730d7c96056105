//! Error construction builtins.
//!
//! `error` builds an error *value* that flows through the stack as data;
//! `crash` raises immediately and unwinds to the nearest armed `recover`.

use super::{BuiltinCtx, bool_arg, check_argc};
use crate::{
    errors::{RunError, RunResult},
    value::Value,
};

pub(super) fn error(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    let message = match args.first() {
        Some(Value::Str(id)) => ctx.heap.str_value(*id).to_owned(),
        _ => String::new(),
    };
    ctx.heap.alloc_error(message, None)
}

pub(super) fn crash(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    let message = match args.first() {
        Some(Value::Str(id)) => ctx.heap.str_value(*id).to_owned(),
        _ => String::new(),
    };
    Err(RunError::runtime(message))
}

pub(super) fn assert(_ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("assert", args, 1)?;
    if bool_arg("assert", args, 0)? {
        Ok(Value::Bool(true))
    } else {
        Err(RunError::runtime("assertion failed"))
    }
}
