//! String builtins.

use super::{BuiltinCtx, check_argc, number_arg, str_arg};
use crate::{
    errors::{RunError, RunResult},
    value::Value,
};

pub(super) fn trim(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("trim", args, 1)?;
    let trimmed = str_arg(ctx.heap, "trim", args, 0)?.trim().to_owned();
    ctx.heap.alloc_str(&trimmed)
}

pub(super) fn split(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("split", args, 2)?;
    let contents = str_arg(ctx.heap, "split", args, 0)?;
    let separator = str_arg(ctx.heap, "split", args, 1)?;
    let parts: Vec<String> = if separator.is_empty() {
        contents.chars().map(String::from).collect()
    } else {
        contents.split(separator).map(str::to_owned).collect()
    };
    let mut items = Vec::with_capacity(parts.len());
    for part in parts {
        items.push(ctx.heap.alloc_str(&part)?);
    }
    ctx.heap.alloc_array(items)
}

/// `substr(s, begin[, end])`; indices clamp to the string bounds.
pub(super) fn substr(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    if args.len() != 2 && args.len() != 3 {
        return Err(RunError::runtime(format!(
            "invalid number of arguments to substr, got {} instead of 2 or 3",
            args.len()
        )));
    }
    let contents = str_arg(ctx.heap, "substr", args, 0)?;
    let len = contents.chars().count() as i64;
    let begin = (number_arg("substr", args, 1)? as i64).clamp(0, len);
    let end = if args.len() == 3 {
        (number_arg("substr", args, 2)? as i64).clamp(begin, len)
    } else {
        len
    };
    let taken: String = contents
        .chars()
        .skip(begin as usize)
        .take((end - begin) as usize)
        .collect();
    ctx.heap.alloc_str(&taken)
}

pub(super) fn chr(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("chr", args, 1)?;
    let code = number_arg("chr", args, 0)? as u32;
    let ch = char::from_u32(code).unwrap_or('\u{fffd}');
    ctx.heap.alloc_str(&ch.to_string())
}

pub(super) fn ord(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("ord", args, 1)?;
    if args[0].is_null() {
        return Ok(Value::Number(0.0));
    }
    let contents = str_arg(ctx.heap, "ord", args, 0)?;
    let code = contents.chars().next().map_or(0.0, |c| f64::from(u32::from(c)));
    Ok(Value::Number(code))
}
