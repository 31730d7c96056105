//! The tagged runtime value and its structural rules.
//!
//! `Value` is `Copy` and pointer-sized-ish: reference kinds carry a [`HeapId`]
//! into the arena and never own memory directly. Equality and hashing are
//! structural for null/bool/number/string and identity for everything else.

use crate::{
    errors::{RunError, RunResult},
    heap::{Heap, HeapId},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(HeapId),
    Array(HeapId),
    Map(HeapId),
    Function(HeapId),
    Native(HeapId),
    Error(HeapId),
    External(HeapId),
    /// Handle whose object was reclaimed. Never observable while the GC root
    /// set is accurate; exists so freed slots have a printable kind.
    Freed,
}

impl Value {
    pub fn kind_name(self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOL",
            Self::Number(_) => "NUMBER",
            Self::Str(_) => "STRING",
            Self::Array(_) => "ARRAY",
            Self::Map(_) => "MAP",
            Self::Function(_) => "FUNCTION",
            Self::Native(_) => "NATIVE_FUNCTION",
            Self::Error(_) => "ERROR",
            Self::External(_) => "EXTERNAL",
            Self::Freed => "FREED",
        }
    }

    pub fn heap_id(self) -> Option<HeapId> {
        match self {
            Self::Str(id)
            | Self::Array(id)
            | Self::Map(id)
            | Self::Function(id)
            | Self::Native(id)
            | Self::Error(id)
            | Self::External(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_null(self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_callable(self) -> bool {
        matches!(self, Self::Function(_) | Self::Native(_))
    }

    pub fn is_truthy(self, heap: &Heap) -> bool {
        match self {
            Self::Null | Self::Freed => false,
            Self::Bool(b) => b,
            Self::Number(n) => n != 0.0,
            Self::Str(id) => !heap.str_value(id).is_empty(),
            _ => true,
        }
    }
}

/// djb2 over a byte slice.
pub(crate) fn djb2(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 5381;
    for &byte in bytes {
        hash = hash.wrapping_mul(33).wrapping_add(u64::from(byte));
    }
    hash
}

/// Hash of string contents as used for map keys and the string hash cache.
/// A computed 0 is remapped to 1 so 0 can mean "not yet computed".
pub(crate) fn str_key_hash(s: &str) -> u64 {
    let hash = djb2(s.as_bytes());
    if hash == 0 { 1 } else { hash }
}

/// Hash of a value usable as a map key, or `None` for unhashable kinds.
///
/// A tag byte keeps different kinds from colliding; strings use their cached
/// content hash so a literal and a computed string with equal bytes land in
/// the same bucket.
pub(crate) fn value_hash(heap: &Heap, value: &Value) -> Option<u64> {
    match value {
        Value::Null => Some(djb2(&[0])),
        Value::Bool(b) => Some(djb2(&[1, u8::from(*b)])),
        Value::Number(n) => {
            // -0.0 must hash like 0.0 since they compare equal
            let n = if *n == 0.0 { 0.0 } else { *n };
            let mut bytes = [2u8; 9];
            bytes[1..].copy_from_slice(&n.to_bits().to_be_bytes());
            Some(djb2(&bytes))
        }
        Value::Str(id) => Some(heap.str_hash(*id)),
        _ => None,
    }
}

/// Structural equality for null/bool/number/string; identity for the rest.
pub(crate) fn values_equal(heap: &Heap, left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b || heap.str_value(*a) == heap.str_value(*b),
        (Value::Array(a), Value::Array(b)) => a == b,
        (Value::Map(a), Value::Map(b)) => a == b,
        (Value::Function(a), Value::Function(b)) => a == b,
        (Value::Native(a), Value::Native(b)) => a == b,
        (Value::Error(a), Value::Error(b)) => a == b,
        (Value::External(a), Value::External(b)) => a == b,
        _ => false,
    }
}

/// Natural ordering used by the plain compare opcode: a number whose sign
/// encodes the result. Errors when the operands have no defined order.
pub(crate) fn compare_values(heap: &Heap, left: &Value, right: &Value) -> RunResult<f64> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(a - b),
        (Value::Str(a), Value::Str(b)) => {
            let (a, b) = (heap.str_value(*a), heap.str_value(*b));
            Ok(match a.as_bytes().cmp(b.as_bytes()) {
                std::cmp::Ordering::Less => -1.0,
                std::cmp::Ordering::Equal => 0.0,
                std::cmp::Ordering::Greater => 1.0,
            })
        }
        (Value::Bool(a), Value::Bool(b)) => Ok(f64::from(i8::from(*a) - i8::from(*b))),
        (Value::Null, Value::Null) => Ok(0.0),
        _ => Err(RunError::runtime(format!(
            "cannot compare {} and {}",
            left.kind_name(),
            right.kind_name()
        ))),
    }
}

/// Renders a number with 10 significant digits: trailing zeros stripped and
/// scientific notation outside the fixed range, matching C's `%1.10g`.
pub(crate) fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_owned() } else { "-inf".to_owned() };
    }
    if value == 0.0 {
        return "0".to_owned();
    }

    // Round to 10 significant digits first; the exponent may shift in the
    // process (e.g. 9.9999999995e9 -> 1e10).
    let scientific = format!("{value:.9e}");
    let (mantissa, exponent) = scientific
        .split_once('e')
        .expect("scientific float format always contains an exponent");
    let exponent: i32 = exponent.parse().expect("float exponent is a valid integer");
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let sign = if negative { "-" } else { "" };

    if !(-4..10).contains(&exponent) {
        let trimmed = digits.trim_end_matches('0');
        let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
        let mantissa = if trimmed.len() > 1 {
            format!("{}.{}", &trimmed[..1], &trimmed[1..])
        } else {
            trimmed.to_owned()
        };
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        return format!("{sign}{mantissa}e{exp_sign}{:02}", exponent.abs());
    }

    if exponent >= 0 {
        let split = (exponent + 1) as usize;
        let int_part = &digits[..split];
        let frac_part = digits[split..].trim_end_matches('0');
        if frac_part.is_empty() {
            format!("{sign}{int_part}")
        } else {
            format!("{sign}{int_part}.{frac_part}")
        }
    } else {
        let leading_zeros = "0".repeat((-exponent - 1) as usize);
        let frac = digits.trim_end_matches('0');
        format!("{sign}0.{leading_zeros}{frac}")
    }
}

/// Writes the display form of a value. `quote_strings` is enabled for values
/// nested inside containers.
pub(crate) fn write_value(out: &mut String, heap: &Heap, value: &Value, quote_strings: bool) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&format_number(*n)),
        Value::Str(id) => {
            if quote_strings {
                out.push('"');
                out.push_str(heap.str_value(*id));
                out.push('"');
            } else {
                out.push_str(heap.str_value(*id));
            }
        }
        Value::Array(id) => {
            out.push('[');
            let items = heap.array(*id);
            for (i, item) in items.iter().enumerate() {
                write_value(out, heap, item, true);
                if i + 1 < items.len() {
                    out.push_str(", ");
                }
            }
            out.push(']');
        }
        Value::Map(id) => {
            out.push('{');
            let map = heap.map(*id);
            for i in 0..map.len() {
                let Some((key, value)) = map.get_at(i) else { continue };
                write_value(out, heap, &key, true);
                out.push_str(": ");
                write_value(out, heap, &value, true);
                if i + 1 < map.len() {
                    out.push_str(", ");
                }
            }
            out.push('}');
        }
        Value::Function(id) => {
            let function = heap.function(*id);
            out.push_str("CompiledFunction: ");
            out.push_str(function.name.as_deref().unwrap_or("anonymous"));
            out.push('\n');
        }
        Value::Native(_) => out.push_str("NATIVE_FUNCTION"),
        Value::External(_) => out.push_str("EXTERNAL"),
        Value::Error(id) => {
            let error = heap.error_value(*id);
            out.push_str("ERROR: ");
            out.push_str(&error.message);
            out.push('\n');
            if let Some(traceback) = &error.traceback
                && !traceback.is_empty()
            {
                out.push_str("Traceback:\n");
                out.push_str(&traceback.to_string());
            }
        }
        Value::Freed => out.push_str("FREED"),
    }
}

/// Convenience wrapper around [`write_value`].
pub(crate) fn value_to_string(heap: &Heap, value: &Value, quote_strings: bool) -> String {
    let mut out = String::new();
    write_value(&mut out, heap, value, quote_strings);
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn number_formatting_matches_g10() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(16.0), "16");
        assert_eq!(format_number(-3.5), "-3.5");
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(1.0 / 3.0), "0.3333333333");
        assert_eq!(format_number(1e10), "1e+10");
        assert_eq!(format_number(1.5e-7), "1.5e-07");
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(1234567890.0), "1234567890");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }

    #[test]
    fn djb2_empty_is_seed() {
        assert_eq!(djb2(b""), 5381);
    }

    #[test]
    fn structural_equality_for_strings() {
        let mut heap = Heap::new();
        let a = heap.alloc_str("abc").unwrap();
        let b = heap.alloc_str("abc").unwrap();
        let c = heap.alloc_str("abd").unwrap();
        assert!(values_equal(&heap, &a, &b));
        assert!(!values_equal(&heap, &a, &c));
        assert_eq!(value_hash(&heap, &a), value_hash(&heap, &b));
    }

    #[test]
    fn negative_zero_hashes_like_zero() {
        let heap = Heap::new();
        assert_eq!(
            value_hash(&heap, &Value::Number(0.0)),
            value_hash(&heap, &Value::Number(-0.0))
        );
    }

    #[test]
    fn compare_orders_numbers_and_strings() {
        let mut heap = Heap::new();
        assert!(compare_values(&heap, &Value::Number(1.0), &Value::Number(2.0)).unwrap() < 0.0);
        let a = heap.alloc_str("a").unwrap();
        let b = heap.alloc_str("b").unwrap();
        assert!(compare_values(&heap, &a, &b).unwrap() < 0.0);
        assert!(compare_values(&heap, &b, &a).unwrap() > 0.0);
    }

    #[test]
    fn arrays_do_not_order() {
        let mut heap = Heap::new();
        let a = heap.alloc_array(vec![]).unwrap();
        let b = heap.alloc_array(vec![]).unwrap();
        assert!(compare_values(&heap, &a, &b).is_err());
    }
}
