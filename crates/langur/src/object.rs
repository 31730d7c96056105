//! Public value tree exchanged with hosts.
//!
//! Internal values stay handle-based inside the heap; at the API boundary
//! (execute results, globals, native function arguments) they are converted
//! to and from this owned tree.

use crate::{
    errors::{RunError, RunResult},
    heap::Heap,
    map::Map,
    value::Value,
};

/// Conversion depth cap; guards against cyclic containers built by scripts.
const MAX_CONVERT_DEPTH: usize = 64;

/// An owned, heap-independent script value.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Object>),
    /// Key/value pairs in insertion order.
    Map(Vec<(Object, Object)>),
    Error { message: String },
    Function { name: String },
    NativeFunction { name: String },
    External,
}

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl Object {
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Converts an internal value into the public tree. Containers convert
/// deeply; conversion stops at `MAX_CONVERT_DEPTH` to stay safe on cycles.
pub(crate) fn value_to_object(heap: &Heap, value: &Value) -> Object {
    value_to_object_at(heap, value, 0)
}

fn value_to_object_at(heap: &Heap, value: &Value, depth: usize) -> Object {
    if depth > MAX_CONVERT_DEPTH {
        return Object::Null;
    }
    match value {
        Value::Null | Value::Freed => Object::Null,
        Value::Bool(b) => Object::Bool(*b),
        Value::Number(n) => Object::Number(*n),
        Value::Str(id) => Object::String(heap.str_value(*id).to_owned()),
        Value::Array(id) => Object::Array(
            heap.array(*id)
                .iter()
                .map(|item| value_to_object_at(heap, item, depth + 1))
                .collect(),
        ),
        Value::Map(id) => {
            let map = heap.map(*id);
            let mut entries = Vec::with_capacity(map.len());
            for i in 0..map.len() {
                if let Some((key, value)) = map.get_at(i) {
                    entries.push((
                        value_to_object_at(heap, &key, depth + 1),
                        value_to_object_at(heap, &value, depth + 1),
                    ));
                }
            }
            Object::Map(entries)
        }
        Value::Function(id) => Object::Function {
            name: heap.function(*id).name.clone().unwrap_or_default(),
        },
        Value::Native(id) => Object::NativeFunction {
            name: heap.native(*id).name.clone(),
        },
        Value::Error(id) => Object::Error {
            message: heap.error_value(*id).message.clone(),
        },
        Value::External(_) => Object::External,
    }
}

/// Materializes a public object into the heap.
pub(crate) fn object_to_value(heap: &mut Heap, object: &Object) -> RunResult<Value> {
    match object {
        Object::Null => Ok(Value::Null),
        Object::Bool(b) => Ok(Value::Bool(*b)),
        Object::Number(n) => Ok(Value::Number(*n)),
        Object::String(s) => heap.alloc_str(s),
        Object::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(object_to_value(heap, item)?);
            }
            heap.alloc_array(values)
        }
        Object::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                let key = object_to_value(heap, key)?;
                let value = object_to_value(heap, value)?;
                map.set(heap, key, value)?;
            }
            heap.alloc_map(map)
        }
        Object::Error { message } => heap.alloc_error(message.clone(), None),
        Object::Function { .. } | Object::NativeFunction { .. } | Object::External => Err(RunError::runtime(
            "function and external objects cannot be injected by the host",
        )),
    }
}
