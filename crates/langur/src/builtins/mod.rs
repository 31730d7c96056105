//! Interpreter-native builtin functions.
//!
//! Builtins are native-function heap objects bound into the global store when
//! a context is created; scripts reach them through the context-global
//! opcode. Dispatch goes through [`BuiltinFn`], grouped into per-area
//! submodules.

mod collections;
mod errors;
mod math;
mod printing;
mod strings;
mod types;

use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::{
    errors::{RunError, RunResult},
    heap::{Heap, NativeCallback, NativeFunction},
    io::{FileLoader, ScriptOut},
    symbols::GlobalStore,
    value::Value,
};

/// Everything a builtin may touch.
pub(crate) struct BuiltinCtx<'a> {
    pub heap: &'a mut Heap,
    pub out: &'a mut dyn ScriptOut,
    pub files: &'a mut dyn FileLoader,
}

/// Enumerates every interpreter-native builtin. The strum string form is the
/// name bound in the global store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum BuiltinFn {
    // collections
    Len,
    First,
    Last,
    Rest,
    Append,
    Remove,
    RemoveAt,
    Reverse,
    Copy,
    DeepCopy,
    Concat,
    Range,
    Keys,
    Values,
    Slice,

    // strings
    Trim,
    Split,
    Substr,
    Chr,
    Ord,

    // math
    Sqrt,
    Pow,
    Sin,
    Cos,
    Tan,
    Log,
    Ceil,
    Floor,
    Abs,
    Random,
    RandomSeed,

    // type inspection and conversion
    Tostring,
    ToNum,
    Type,
    IsString,
    IsArray,
    IsMap,
    IsNumber,
    IsBool,
    IsNull,
    IsFunction,
    IsExternal,
    IsError,
    IsNativeFunction,

    // errors
    Error,
    Crash,
    Assert,

    // output and files
    Print,
    Println,
    WriteFile,
    ReadFile,
}

impl BuiltinFn {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn call(self, ctx: &mut BuiltinCtx<'_>, args: &[Value]) -> RunResult<Value> {
        use BuiltinFn::*;
        match self {
            Len => collections::len(ctx, args),
            First => collections::first(ctx, args),
            Last => collections::last(ctx, args),
            Rest => collections::rest(ctx, args),
            Append => collections::append(ctx, args),
            Remove => collections::remove(ctx, args),
            RemoveAt => collections::remove_at(ctx, args),
            Reverse => collections::reverse(ctx, args),
            Copy => collections::copy(ctx, args),
            DeepCopy => collections::deep_copy(ctx, args),
            Concat => collections::concat(ctx, args),
            Range => collections::range(ctx, args),
            Keys => collections::keys(ctx, args),
            Values => collections::values(ctx, args),
            Slice => collections::slice(ctx, args),
            Trim => strings::trim(ctx, args),
            Split => strings::split(ctx, args),
            Substr => strings::substr(ctx, args),
            Chr => strings::chr(ctx, args),
            Ord => strings::ord(ctx, args),
            Sqrt | Pow | Sin | Cos | Tan | Log | Ceil | Floor | Abs => math::unary_or_binary(self, ctx, args),
            Random => math::random(ctx, args),
            RandomSeed => math::random_seed(ctx, args),
            Tostring => types::tostring(ctx, args),
            ToNum => types::to_num(ctx, args),
            Type => types::type_name(ctx, args),
            IsString | IsArray | IsMap | IsNumber | IsBool | IsNull | IsFunction | IsExternal | IsError
            | IsNativeFunction => types::type_check(self, ctx, args),
            Error => errors::error(ctx, args),
            Crash => errors::crash(ctx, args),
            Assert => errors::assert(ctx, args),
            Print => printing::print(ctx, args),
            Println => printing::println(ctx, args),
            WriteFile => printing::write_file(ctx, args),
            ReadFile => printing::read_file(ctx, args),
        }
    }
}

/// Binds every builtin into the global store as a native-function object.
pub(crate) fn register_builtins(heap: &mut Heap, global_store: &mut GlobalStore) -> RunResult<()> {
    for builtin in BuiltinFn::iter() {
        let value = heap.alloc_native(NativeFunction {
            name: builtin.name().to_owned(),
            callback: NativeCallback::Builtin(builtin),
        })?;
        global_store.set(builtin.name(), value);
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Argument helpers
// ----------------------------------------------------------------------

pub(crate) fn check_argc(name: &str, args: &[Value], expected: usize) -> RunResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(RunError::runtime(format!(
            "invalid number of arguments to {name}, got {} instead of {expected}",
            args.len()
        )))
    }
}

fn arg_type_error(name: &str, ix: usize, got: &Value, expected: &str) -> RunError {
    RunError::runtime(format!(
        "invalid argument {ix} passed to {name}, got {} instead of {expected}",
        got.kind_name()
    ))
}

pub(crate) fn number_arg(name: &str, args: &[Value], ix: usize) -> RunResult<f64> {
    match args.get(ix) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(arg_type_error(name, ix, other, "NUMBER")),
        None => Err(RunError::runtime(format!("missing argument {ix} to {name}"))),
    }
}

pub(crate) fn str_arg<'h>(heap: &'h Heap, name: &str, args: &[Value], ix: usize) -> RunResult<&'h str> {
    match args.get(ix) {
        Some(Value::Str(id)) => Ok(heap.str_value(*id)),
        Some(other) => Err(arg_type_error(name, ix, other, "STRING")),
        None => Err(RunError::runtime(format!("missing argument {ix} to {name}"))),
    }
}

pub(crate) fn array_arg(name: &str, args: &[Value], ix: usize) -> RunResult<crate::heap::HeapId> {
    match args.get(ix) {
        Some(Value::Array(id)) => Ok(*id),
        Some(other) => Err(arg_type_error(name, ix, other, "ARRAY")),
        None => Err(RunError::runtime(format!("missing argument {ix} to {name}"))),
    }
}

pub(crate) fn map_arg(name: &str, args: &[Value], ix: usize) -> RunResult<crate::heap::HeapId> {
    match args.get(ix) {
        Some(Value::Map(id)) => Ok(*id),
        Some(other) => Err(arg_type_error(name, ix, other, "MAP")),
        None => Err(RunError::runtime(format!("missing argument {ix} to {name}"))),
    }
}

pub(crate) fn bool_arg(name: &str, args: &[Value], ix: usize) -> RunResult<bool> {
    match args.get(ix) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(arg_type_error(name, ix, other, "BOOL")),
        None => Err(RunError::runtime(format!("missing argument {ix} to {name}"))),
    }
}
