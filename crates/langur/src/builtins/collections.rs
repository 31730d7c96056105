//! Array and map builtins.

use ahash::AHashMap;

use super::{BuiltinCtx, array_arg, check_argc, map_arg, number_arg};
use crate::{
    errors::{RunError, RunResult},
    map::Map,
    value::{Value, values_equal},
};

pub(super) fn len(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("len", args, 1)?;
    let length = match args[0] {
        Value::Str(id) => ctx.heap.str_value(id).len(),
        Value::Array(id) => ctx.heap.array(id).len(),
        Value::Map(id) => ctx.heap.map(id).len(),
        other => {
            return Err(RunError::runtime(format!("cannot get length of {}", other.kind_name())));
        }
    };
    Ok(Value::Number(length as f64))
}

pub(super) fn first(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("first", args, 1)?;
    let id = array_arg("first", args, 0)?;
    Ok(ctx.heap.array(id).first().copied().unwrap_or(Value::Null))
}

pub(super) fn last(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("last", args, 1)?;
    let id = array_arg("last", args, 0)?;
    Ok(ctx.heap.array(id).last().copied().unwrap_or(Value::Null))
}

pub(super) fn rest(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("rest", args, 1)?;
    let id = array_arg("rest", args, 0)?;
    let items = ctx.heap.array(id);
    if items.is_empty() {
        return Ok(Value::Null);
    }
    let tail: Vec<Value> = items[1..].to_vec();
    ctx.heap.alloc_array(tail)
}

/// Appends in place and returns the new length.
pub(super) fn append(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("append", args, 2)?;
    let id = array_arg("append", args, 0)?;
    let items = ctx.heap.array_mut(id);
    items.push(args[1]);
    Ok(Value::Number(items.len() as f64))
}

/// Removes the first element equal to the argument; returns whether one was
/// found.
pub(super) fn remove(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("remove", args, 2)?;
    let id = array_arg("remove", args, 0)?;
    let found = ctx
        .heap
        .array(id)
        .iter()
        .position(|item| values_equal(ctx.heap, item, &args[1]));
    match found {
        Some(ix) => {
            ctx.heap.array_mut(id).remove(ix);
            Ok(Value::Bool(true))
        }
        None => Ok(Value::Bool(false)),
    }
}

pub(super) fn remove_at(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("remove_at", args, 2)?;
    let id = array_arg("remove_at", args, 0)?;
    let ix = number_arg("remove_at", args, 1)? as i64;
    let items = ctx.heap.array_mut(id);
    if ix < 0 || ix as usize >= items.len() {
        return Ok(Value::Bool(false));
    }
    items.remove(ix as usize);
    Ok(Value::Bool(true))
}

pub(super) fn reverse(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("reverse", args, 1)?;
    match args[0] {
        Value::Array(id) => {
            let mut items: Vec<Value> = ctx.heap.array(id).to_vec();
            items.reverse();
            ctx.heap.alloc_array(items)
        }
        Value::Str(id) => {
            let reversed: String = ctx.heap.str_value(id).chars().rev().collect();
            ctx.heap.alloc_str(&reversed)
        }
        other => Err(RunError::runtime(format!(
            "invalid argument 0 passed to reverse, got {} instead of ARRAY|STRING",
            other.kind_name()
        ))),
    }
}

/// Shallow copy: containers get a fresh body with the same elements,
/// everything else is returned unchanged.
pub(super) fn copy(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("copy", args, 1)?;
    match args[0] {
        Value::Array(id) => {
            let items = ctx.heap.array(id).to_vec();
            ctx.heap.alloc_array(items)
        }
        Value::Map(id) => {
            let source = ctx.heap.map(id);
            let mut copy = Map::with_capacity(source.len());
            let entries: Vec<(Value, Value)> = (0..source.len()).filter_map(|i| source.get_at(i)).collect();
            for (key, value) in entries {
                copy.set(ctx.heap, key, value)?;
            }
            ctx.heap.alloc_map(copy)
        }
        Value::Str(id) => {
            let contents = ctx.heap.str_value(id).to_owned();
            ctx.heap.alloc_str(&contents)
        }
        other => Ok(other),
    }
}

pub(super) fn deep_copy(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("deep_copy", args, 1)?;
    let mut seen = AHashMap::new();
    deep_copy_value(ctx, &args[0], &mut seen)
}

/// Recursive copy with an identity map so cyclic containers terminate and
/// shared substructure stays shared in the copy.
fn deep_copy_value(
    ctx: &mut BuiltinCtx<'_>,
    value: &Value,
    seen: &mut AHashMap<usize, Value>,
) -> RunResult<Value> {
    match *value {
        Value::Array(id) => {
            if let Some(copied) = seen.get(&id.index()) {
                return Ok(*copied);
            }
            let fresh = ctx.heap.alloc_array_with_capacity(ctx.heap.array(id).len())?;
            seen.insert(id.index(), fresh);
            let items = ctx.heap.array(id).to_vec();
            for item in items {
                let copied = deep_copy_value(ctx, &item, seen)?;
                let Value::Array(fresh_id) = fresh else { unreachable!() };
                ctx.heap.array_mut(fresh_id).push(copied);
            }
            Ok(fresh)
        }
        Value::Map(id) => {
            if let Some(copied) = seen.get(&id.index()) {
                return Ok(*copied);
            }
            let fresh = ctx.heap.alloc_map_with_capacity(ctx.heap.map(id).len())?;
            seen.insert(id.index(), fresh);
            let source = ctx.heap.map(id);
            let entries: Vec<(Value, Value)> = (0..source.len()).filter_map(|i| source.get_at(i)).collect();
            for (key, entry_value) in entries {
                let key = deep_copy_value(ctx, &key, seen)?;
                let entry_value = deep_copy_value(ctx, &entry_value, seen)?;
                let Value::Map(fresh_id) = fresh else { unreachable!() };
                ctx.heap
                    .with_map_mut(fresh_id, |map, heap| map.set(heap, key, entry_value))?;
            }
            Ok(fresh)
        }
        Value::Str(id) => {
            let contents = ctx.heap.str_value(id).to_owned();
            ctx.heap.alloc_str(&contents)
        }
        Value::Error(id) => {
            let message = ctx.heap.error_value(id).message.clone();
            ctx.heap.alloc_error(message, None)
        }
        other => Ok(other),
    }
}

/// Array + array appends in place (matching `+`); string + string builds a
/// new string.
pub(super) fn concat(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("concat", args, 2)?;
    match (args[0], args[1]) {
        (Value::Array(left), Value::Array(right)) => {
            let items = ctx.heap.array(right).to_vec();
            let target = ctx.heap.array_mut(left);
            target.extend(items);
            Ok(Value::Number(target.len() as f64))
        }
        (Value::Array(_), other) => Err(RunError::runtime(format!(
            "invalid argument 1 passed to concat, got {}",
            other.kind_name()
        ))),
        (Value::Str(left), Value::Str(right)) => {
            let mut combined = ctx.heap.str_value(left).to_owned();
            combined.push_str(ctx.heap.str_value(right));
            ctx.heap.alloc_str(&combined)
        }
        (other, _) => Err(RunError::runtime(format!(
            "invalid argument 0 passed to concat, got {} instead of ARRAY|STRING",
            other.kind_name()
        ))),
    }
}

pub(super) fn range(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    let (start, end, step) = match args.len() {
        1 => (0.0, number_arg("range", args, 0)?, 1.0),
        2 => (number_arg("range", args, 0)?, number_arg("range", args, 1)?, 1.0),
        3 => (
            number_arg("range", args, 0)?,
            number_arg("range", args, 1)?,
            number_arg("range", args, 2)?,
        ),
        got => {
            return Err(RunError::runtime(format!(
                "invalid number of arguments to range, got {got} instead of 1, 2 or 3"
            )));
        }
    };
    let (start, end, step) = (start.trunc() as i64, end.trunc() as i64, step.trunc() as i64);
    if step == 0 {
        return Err(RunError::runtime("range step cannot be 0"));
    }
    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        items.push(Value::Number(i as f64));
        i += step;
    }
    ctx.heap.alloc_array(items)
}

pub(super) fn keys(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("keys", args, 1)?;
    let id = map_arg("keys", args, 0)?;
    let keys = ctx.heap.map(id).keys();
    ctx.heap.alloc_array(keys)
}

pub(super) fn values(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("values", args, 1)?;
    let id = map_arg("values", args, 0)?;
    let values = ctx.heap.map(id).values();
    ctx.heap.alloc_array(values)
}

/// `slice(x, i)` takes the suffix starting at `i`; negative indices count
/// from the end. A string index still below zero after adjustment yields an
/// empty string; array indices clamp to zero.
pub(super) fn slice(ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("slice", args, 2)?;
    let index = number_arg("slice", args, 1)? as i64;
    match args[0] {
        Value::Array(id) => {
            let items = ctx.heap.array(id);
            let len = items.len() as i64;
            let mut ix = if index < 0 { len + index } else { index };
            if ix < 0 {
                ix = 0;
            }
            let sliced: Vec<Value> = items.iter().skip(ix as usize).copied().collect();
            ctx.heap.alloc_array(sliced)
        }
        Value::Str(id) => {
            let contents = ctx.heap.str_value(id);
            let len = contents.len() as i64;
            let ix = if index < 0 { len + index } else { index };
            if ix < 0 {
                return ctx.heap.alloc_str("");
            }
            let sliced: String = contents.chars().skip(ix as usize).collect();
            ctx.heap.alloc_str(&sliced)
        }
        other => Err(RunError::runtime(format!(
            "invalid argument 0 passed to slice, got {} instead of ARRAY|STRING",
            other.kind_name()
        ))),
    }
}
