//! Output and file builtins, routed through the host hooks.

use super::{BuiltinCtx, check_argc, str_arg};
use crate::{
    errors::{RunError, RunResult},
    value::{Value, write_value},
};

fn render_args(ctx: &BuiltinCtx<'_>, args: &[Value]) -> String {
    let mut rendered = String::new();
    for arg in args {
        write_value(&mut rendered, ctx.heap, arg, false);
    }
    rendered
}

pub(super) fn print(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    let rendered = render_args(ctx, args);
    ctx.out.write(&rendered);
    Ok(Value::Null)
}

pub(super) fn println(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    let mut rendered = render_args(ctx, args);
    rendered.push('\n');
    ctx.out.write(&rendered);
    Ok(Value::Null)
}

pub(super) fn write_file(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("write_file", args, 2)?;
    let path = str_arg(ctx.heap, "write_file", args, 0)?.to_owned();
    let data = str_arg(ctx.heap, "write_file", args, 1)?.to_owned();
    match ctx.files.write_file(&path, &data) {
        Some(written) => Ok(Value::Number(written as f64)),
        None => Err(RunError::runtime(format!("writing file \"{path}\" failed"))),
    }
}

pub(super) fn read_file(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("read_file", args, 1)?;
    let path = str_arg(ctx.heap, "read_file", args, 0)?.to_owned();
    match ctx.files.read_file(&path) {
        Some(contents) => ctx.heap.alloc_str(&contents),
        None => Err(RunError::runtime(format!("reading file \"{path}\" failed"))),
    }
}
