//! Type inspection and conversion builtins.

use super::{BuiltinCtx, BuiltinFn, check_argc};
use crate::{
    errors::{RunError, RunResult},
    value::{Value, value_to_string},
};

pub(super) fn tostring(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("tostring", args, 1)?;
    let rendered = value_to_string(ctx.heap, &args[0], false);
    ctx.heap.alloc_str(&rendered)
}

/// Converts to a number: numbers pass through, null is 0, booleans are 0/1,
/// and strings parse their longest numeric prefix (0 when none).
pub(super) fn to_num(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("to_num", args, 1)?;
    let result = match args[0] {
        Value::Number(n) => n,
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(b)),
        Value::Str(id) => {
            let contents = ctx.heap.str_value(id).trim();
            let mut parsed = 0.0;
            for end in (1..=contents.len()).rev() {
                if !contents.is_char_boundary(end) {
                    continue;
                }
                if let Ok(value) = contents[..end].parse::<f64>() {
                    if value.is_infinite() {
                        return Err(RunError::runtime(format!("cannot convert \"{contents}\" to number")));
                    }
                    parsed = value;
                    break;
                }
            }
            parsed
        }
        other => {
            return Err(RunError::runtime(format!(
                "invalid argument 0 passed to to_num, got {} instead of STRING|NUMBER|BOOL|NULL",
                other.kind_name()
            )));
        }
    };
    Ok(Value::Number(result))
}

pub(super) fn type_name(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("type", args, 1)?;
    ctx.heap.alloc_str(args[0].kind_name())
}

pub(super) fn type_check(builtin: BuiltinFn, _ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc(builtin.name(), args, 1)?;
    let matched = match builtin {
        BuiltinFn::IsString => matches!(args[0], Value::Str(_)),
        BuiltinFn::IsArray => matches!(args[0], Value::Array(_)),
        BuiltinFn::IsMap => matches!(args[0], Value::Map(_)),
        BuiltinFn::IsNumber => matches!(args[0], Value::Number(_)),
        BuiltinFn::IsBool => matches!(args[0], Value::Bool(_)),
        BuiltinFn::IsNull => matches!(args[0], Value::Null),
        BuiltinFn::IsFunction => matches!(args[0], Value::Function(_)),
        BuiltinFn::IsExternal => matches!(args[0], Value::External(_)),
        BuiltinFn::IsError => matches!(args[0], Value::Error(_)),
        BuiltinFn::IsNativeFunction => matches!(args[0], Value::Native(_)),
        other => return Err(RunError::runtime(format!("unknown type check {}", other.name()))),
    };
    Ok(Value::Bool(matched))
}
