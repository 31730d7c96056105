//! Binary and unary arithmetic, bitwise operations, and operator-overload
//! dispatch.

use super::Vm;
use crate::{
    bytecode::op::Opcode,
    errors::{RunError, RunResult},
    value::{Value, value_to_string},
};

/// Numeric view used by arithmetic: null coerces to 0, booleans to 0/1.
fn as_arith_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

/// Truncating integer cast used by bitwise, shift, and mod operations.
fn as_integer(value: &Value) -> Option<i64> {
    as_arith_number(value).map(|n| n.trunc() as i64)
}

impl Vm<'_> {
    pub(super) fn binary_op(&mut self, op: Opcode) -> RunResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;

        if op == Opcode::Add {
            // string + anything concatenates with stringify
            if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) {
                let mut combined = value_to_string(self.heap, &left, false);
                combined.push_str(&value_to_string(self.heap, &right, false));
                let value = self.heap.alloc_str(&combined)?;
                return self.push(value);
            }
            // array + anything appends in place
            if let Value::Array(id) = left {
                self.heap.array_mut(id).push(right);
                return self.push(left);
            }
        }

        match op {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                if let (Some(a), Some(b)) = (as_arith_number(&left), as_arith_number(&right)) {
                    let result = match op {
                        Opcode::Add => a + b,
                        Opcode::Sub => a - b,
                        Opcode::Mul => a * b,
                        // division by zero yields a non-finite IEEE value
                        Opcode::Div => a / b,
                        _ => unreachable!(),
                    };
                    return self.push(Value::Number(result));
                }
            }
            Opcode::Mod => {
                if let (Some(a), Some(b)) = (as_integer(&left), as_integer(&right)) {
                    if b == 0 {
                        return Err(RunError::runtime("modulo by zero"));
                    }
                    return self.push(Value::Number((a % b) as f64));
                }
            }
            Opcode::BitOr | Opcode::BitXor | Opcode::BitAnd | Opcode::LShift | Opcode::RShift => {
                if let (Some(a), Some(b)) = (as_integer(&left), as_integer(&right)) {
                    let result = match op {
                        Opcode::BitOr => a | b,
                        Opcode::BitXor => a ^ b,
                        Opcode::BitAnd => a & b,
                        Opcode::LShift => a.wrapping_shl(b as u32 & 63),
                        Opcode::RShift => a.wrapping_shr(b as u32 & 63),
                        _ => unreachable!(),
                    };
                    return self.push(Value::Number(result as f64));
                }
            }
            _ => {}
        }

        if self.try_overload(op, left, Some(right))? {
            return Ok(());
        }
        Err(RunError::runtime(format!(
            "invalid operand types for {}: {} and {}",
            operator_symbol(op),
            left.kind_name(),
            right.kind_name()
        )))
    }

    pub(super) fn unary_op(&mut self, op: Opcode) -> RunResult<()> {
        let operand = self.pop()?;
        match op {
            Opcode::Minus => {
                if let Some(n) = as_arith_number(&operand) {
                    return self.push(Value::Number(-n));
                }
                if self.try_overload(op, operand, None)? {
                    return Ok(());
                }
                Err(RunError::runtime(format!(
                    "invalid operand type for -: {}",
                    operand.kind_name()
                )))
            }
            Opcode::Not => {
                if self.try_overload(op, operand, None)? {
                    return Ok(());
                }
                let result = !operand.is_truthy(self.heap);
                self.push(Value::Bool(result))
            }
            _ => Err(RunError::runtime("invalid unary opcode")),
        }
    }

    /// If either operand is a map holding a callable at the opcode's overload
    /// key, pushes the callee and operands and performs a regular call.
    /// A missing key is "no overload", never an error, and overload lookup
    /// does not recurse.
    pub(super) fn try_overload(&mut self, op: Opcode, left: Value, right: Option<Value>) -> RunResult<bool> {
        let Some(key) = self.state.overload_keys[op as usize] else {
            return Ok(false);
        };
        let mut callee = self.lookup_overload(&left, &key)?;
        if callee.is_none()
            && let Some(right) = &right
        {
            callee = self.lookup_overload(right, &key)?;
        }
        let Some(callee) = callee else {
            return Ok(false);
        };

        let argc = if right.is_some() { 2 } else { 1 };
        self.push(callee)?;
        self.push(left)?;
        if let Some(right) = right {
            self.push(right)?;
        }
        self.call_value(argc)?;
        Ok(true)
    }

    fn lookup_overload(&self, operand: &Value, key: &Value) -> RunResult<Option<Value>> {
        let Value::Map(id) = operand else {
            return Ok(None);
        };
        let found = self.heap.map(*id).get(self.heap, key)?;
        Ok(found.filter(|value| value.is_callable()))
    }
}

fn operator_symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Mod => "%",
        Opcode::BitOr => "|",
        Opcode::BitXor => "^",
        Opcode::BitAnd => "&",
        Opcode::LShift => "<<",
        Opcode::RShift => ">>",
        Opcode::Minus => "-",
        Opcode::Not => "!",
        other => other.name(),
    }
}
