//! Operator semantics shared by the VM and the evaluator.
//!
//! Both engines funnel their prefix, infix, and index operations through
//! this module, which is what keeps their observable behaviour aligned.
//! Integer arithmetic wraps on 64-bit two's complement; division by zero is
//! a runtime error.

use std::rc::Rc;

use crate::error::{Error, Result};
use crate::value::{NULL, Value, bool_value};

/// Apply an infix operator to two evaluated operands.
pub fn apply_infix(operator: &str, left: &Value, right: &Value) -> Result<Value> {
    // Equality works across all kinds: by value for integers and booleans,
    // by reference identity for everything else.
    match operator {
        "==" => return Ok(bool_value(left.equals(right))),
        "!=" => return Ok(bool_value(!left.equals(right))),
        _ => {}
    }

    match (left, right) {
        (Value::Integer(left), Value::Integer(right)) => {
            apply_integer_infix(operator, *left, *right)
        }
        (Value::Str(left), Value::Str(right)) if operator == "+" => {
            Ok(Value::Str(Rc::new(format!("{left}{right}"))))
        }
        _ if left.type_name() != right.type_name() => Err(Error::TypeMismatch(format!(
            "{} {} {}",
            left.type_name(),
            operator,
            right.type_name()
        ))),
        _ => Err(Error::UnknownOperator(format!(
            "{} {} {}",
            left.type_name(),
            operator,
            right.type_name()
        ))),
    }
}

fn apply_integer_infix(operator: &str, left: i64, right: i64) -> Result<Value> {
    match operator {
        "+" => Ok(Value::Integer(left.wrapping_add(right))),
        "-" => Ok(Value::Integer(left.wrapping_sub(right))),
        "*" => Ok(Value::Integer(left.wrapping_mul(right))),
        "/" => {
            if right == 0 {
                return Err(Error::DivisionByZero);
            }
            Ok(Value::Integer(left.wrapping_div(right)))
        }
        "<" => Ok(bool_value(left < right)),
        ">" => Ok(bool_value(left > right)),
        _ => Err(Error::UnknownOperator(format!(
            "INTEGER {operator} INTEGER"
        ))),
    }
}

/// Apply a prefix operator to an evaluated operand.
pub fn apply_prefix(operator: &str, operand: &Value) -> Result<Value> {
    match operator {
        "!" => Ok(bool_value(!operand.is_truthy())),
        "-" => match operand {
            Value::Integer(value) => Ok(Value::Integer(value.wrapping_neg())),
            other => Err(Error::UnknownOperator(format!("-{}", other.type_name()))),
        },
        other => Err(Error::UnknownOperator(other.to_string())),
    }
}

/// Apply the index operator: array indexing or hash lookup.
///
/// Out-of-range array indices and missing hash keys yield `null`; indexing
/// anything else is an error, as is an unhashable key.
pub fn apply_index(left: &Value, index: &Value) -> Result<Value> {
    match (left, index) {
        (Value::Array(elements), Value::Integer(position)) => {
            let position = *position;
            if position < 0 || position as usize >= elements.len() {
                return Ok(NULL);
            }
            Ok(elements[position as usize].clone())
        }
        (Value::Hash(pairs), key) => {
            let hash_key = key
                .hash_key()
                .ok_or(Error::UnhashableKey(key.type_name()))?;
            Ok(pairs
                .get(&hash_key)
                .map(|pair| pair.value.clone())
                .unwrap_or(NULL))
        }
        _ => Err(Error::IndexNotSupported(left.type_name())),
    }
}
