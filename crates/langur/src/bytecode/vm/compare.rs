//! The two-step comparison protocol.
//!
//! A compare opcode pushes a number whose sign encodes the result; a
//! following consumer opcode (`Equal`, `NotEqual`, `GreaterThan`,
//! `GreaterEqual`) turns it into a bool. When a map operand overloads
//! `__cmp__`, its return value feeds the consumer instead.

use super::Vm;
use crate::{
    bytecode::op::Opcode,
    errors::RunResult,
    value::{Value, compare_values, values_equal},
};

impl Vm<'_> {
    pub(super) fn compare_op(&mut self, op: Opcode) -> RunResult<()> {
        let right = self.pop()?;
        let left = self.pop()?;

        // both compare forms share the __cmp__ overload key
        if self.try_overload(Opcode::ComparePlain, left, Some(right))? {
            return Ok(());
        }

        let result = match op {
            Opcode::ComparePlain => compare_values(self.heap, &left, &right)?,
            Opcode::CompareEq => {
                if values_equal(self.heap, &left, &right) {
                    0.0
                } else {
                    1.0
                }
            }
            _ => unreachable!("compare_op only handles compare opcodes"),
        };
        self.push(Value::Number(result))
    }
}
