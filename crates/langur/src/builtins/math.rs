//! Math builtins. The random generator is a small xorshift seeded from the
//! host clock, replaceable via `random_seed`.

use std::cell::Cell;

use super::{BuiltinCtx, BuiltinFn, check_argc, number_arg};
use crate::{
    errors::{RunError, RunResult},
    value::Value,
};

thread_local! {
    static RNG_STATE: Cell<u64> = const { Cell::new(0) };
}

fn next_random() -> f64 {
    let mut state = RNG_STATE.with(Cell::get);
    if state == 0 {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(1);
        state = u64::from(nanos) | 1;
    }
    // xorshift64
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    RNG_STATE.with(|cell| cell.set(state));
    (state >> 11) as f64 / (1u64 << 53) as f64
}

pub(super) fn unary_or_binary(builtin: BuiltinFn, _ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    let name = builtin.name();
    let result = if builtin == BuiltinFn::Pow {
        check_argc(name, args, 2)?;
        number_arg(name, args, 0)?.powf(number_arg(name, args, 1)?)
    } else {
        check_argc(name, args, 1)?;
        let operand = number_arg(name, args, 0)?;
        match builtin {
            BuiltinFn::Sqrt => operand.sqrt(),
            BuiltinFn::Sin => operand.sin(),
            BuiltinFn::Cos => operand.cos(),
            BuiltinFn::Tan => operand.tan(),
            BuiltinFn::Log => operand.ln(),
            BuiltinFn::Ceil => operand.ceil(),
            BuiltinFn::Floor => operand.floor(),
            BuiltinFn::Abs => operand.abs(),
            other => return Err(RunError::runtime(format!("unknown math builtin {}", other.name()))),
        }
    };
    Ok(Value::Number(result))
}

/// `random()` yields [0, 1); `random(min, max)` scales into the range.
pub(super) fn random(_ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    let sample = next_random();
    match args.len() {
        0 => Ok(Value::Number(sample)),
        2 => {
            let min = number_arg("random", args, 0)?;
            let max = number_arg("random", args, 1)?;
            if min >= max {
                return Err(RunError::runtime("max is bigger than min"));
            }
            Ok(Value::Number(min + sample * (max - min)))
        }
        got => Err(RunError::runtime(format!(
            "invalid number of arguments to random, got {got} instead of 0 or 2"
        ))),
    }
}

pub(super) fn random_seed(_ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
    check_argc("random_seed", args, 1)?;
    let seed = number_arg("random_seed", args, 0)? as u64;
    RNG_STATE.with(|cell| cell.set(seed | 1));
    Ok(Value::Bool(true))
}
