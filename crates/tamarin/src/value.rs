//! Runtime object model shared by the VM and the evaluator.
//!
//! Aggregate payloads are `Rc`-wrapped: stack slots and environment entries
//! copy cheaply, and reference identity (`Rc::ptr_eq`) carries the language's
//! equality semantics for non-integer values.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::BlockStatement;
use crate::builtins::Builtin;
use crate::bytecode::Instructions;
use crate::eval::EnvId;

pub const TRUE: Value = Value::Boolean(true);
pub const FALSE: Value = Value::Boolean(false);
pub const NULL: Value = Value::Null;

pub(crate) fn bool_value(value: bool) -> Value {
    if value { TRUE } else { FALSE }
}

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    Null,
    Str(Rc<String>),
    Array(Rc<Vec<Value>>),
    Hash(Rc<BTreeMap<HashKey, HashPair>>),
    /// Only ever lives in the constants pool; the VM always wraps it in a
    /// [`Closure`] before it reaches the value stack.
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    /// The evaluator's function object: unlowered body plus defining
    /// environment. Never produced by the compiler or the VM.
    Function(Rc<Function>),
    Builtin(Builtin),
}

/// The kind discriminator of a [`HashKey`]. Doubles as the per-kind salt:
/// keys of different kinds can never collide because the kind is part of
/// the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashKind {
    Integer,
    Boolean,
    Str,
}

/// Hash-map key derived from a hashable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashKey {
    pub kind: HashKind,
    pub value: u64,
}

/// A hash entry: the original key (for display) plus its value.
#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Value,
    pub value: Value,
}

/// A function lowered to bytecode, together with the frame layout the VM
/// needs to call it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
}

/// A compiled function bundled with the captured values of its free
/// variables, in capture order.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Value>,
}

/// The evaluator's first-class function: parameters, unlowered body, and the
/// environment it closes over.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub parameters: Vec<String>,
    pub body: BlockStatement,
    pub env: EnvId,
}

impl Value {
    /// The uppercase type tag used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::Boolean(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::Str(_) => "STRING",
            Value::Array(_) => "ARRAY",
            Value::Hash(_) => "HASH",
            Value::CompiledFunction(_) => "COMPILED_FUNCTION",
            Value::Closure(_) => "CLOSURE",
            Value::Function(_) => "FUNCTION",
            Value::Builtin(_) => "BUILTIN",
        }
    }

    /// Everything is truthy except `null` and `false`. Zero is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Boolean(false))
    }

    /// The language's `==`: integers and booleans compare by value, null
    /// equals null, and every aggregate compares by reference identity.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(left), Value::Integer(right)) => left == right,
            (Value::Boolean(left), Value::Boolean(right)) => left == right,
            (Value::Null, Value::Null) => true,
            (Value::Str(left), Value::Str(right)) => Rc::ptr_eq(left, right),
            (Value::Array(left), Value::Array(right)) => Rc::ptr_eq(left, right),
            (Value::Hash(left), Value::Hash(right)) => Rc::ptr_eq(left, right),
            (Value::Closure(left), Value::Closure(right)) => Rc::ptr_eq(left, right),
            (Value::Function(left), Value::Function(right)) => Rc::ptr_eq(left, right),
            (Value::CompiledFunction(left), Value::CompiledFunction(right)) => {
                Rc::ptr_eq(left, right)
            }
            (Value::Builtin(left), Value::Builtin(right)) => left == right,
            _ => false,
        }
    }

    /// Derive the hash key for this value, or `None` for unhashable kinds.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Integer(value) => Some(HashKey {
                kind: HashKind::Integer,
                value: *value as u64,
            }),
            Value::Boolean(value) => Some(HashKey {
                kind: HashKind::Boolean,
                value: *value as u64,
            }),
            Value::Str(value) => Some(HashKey {
                kind: HashKind::Str,
                value: fnv1a_64(value.as_bytes()),
            }),
            _ => None,
        }
    }
}

/// 64-bit FNV-1a over the string contents. Deterministic across runs, which
/// keeps compiled hash literals reproducible.
fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET_BASIS, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(value) => write!(f, "{value}"),
            Value::Boolean(value) => write!(f, "{value}"),
            Value::Null => write!(f, "null"),
            Value::Str(value) => write!(f, "{value}"),
            Value::Array(elements) => {
                let elements: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", elements.join(", "))
            }
            Value::Hash(pairs) => {
                let pairs: Vec<String> = pairs
                    .values()
                    .map(|pair| format!("{}: {}", pair.key, pair.value))
                    .collect();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Value::CompiledFunction(func) => {
                write!(f, "CompiledFunction[{:p}]", Rc::as_ptr(func))
            }
            Value::Closure(closure) => write!(f, "Closure[{:p}]", Rc::as_ptr(closure)),
            Value::Function(func) => {
                write!(f, "fn({}) {{ {} }}", func.parameters.join(", "), func.body)
            }
            Value::Builtin(_) => write!(f, "builtin function"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn hash_keys_are_equal_for_equal_values_of_one_kind() {
        let one_a = Value::Integer(1).hash_key().unwrap();
        let one_b = Value::Integer(1).hash_key().unwrap();
        let two = Value::Integer(2).hash_key().unwrap();
        assert_eq!(one_a, one_b);
        assert_ne!(one_a, two);

        let hello_a = Value::Str(Rc::new("hello".to_string())).hash_key().unwrap();
        let hello_b = Value::Str(Rc::new("hello".to_string())).hash_key().unwrap();
        let world = Value::Str(Rc::new("world".to_string())).hash_key().unwrap();
        assert_eq!(hello_a, hello_b);
        assert_ne!(hello_a, world);
    }

    #[test]
    fn hash_keys_of_different_kinds_never_collide() {
        let int_one = Value::Integer(1).hash_key().unwrap();
        let bool_true = Value::Boolean(true).hash_key().unwrap();
        let str_one = Value::Str(Rc::new("1".to_string())).hash_key().unwrap();
        assert_ne!(int_one, bool_true);
        assert_ne!(int_one, str_one);
        assert_ne!(bool_true, str_one);
    }

    #[test]
    fn only_integers_booleans_and_strings_are_hashable() {
        assert!(Value::Integer(0).hash_key().is_some());
        assert!(TRUE.hash_key().is_some());
        assert!(Value::Str(Rc::new(String::new())).hash_key().is_some());
        assert!(NULL.hash_key().is_none());
        assert!(Value::Array(Rc::new(vec![])).hash_key().is_none());
        assert!(Value::Hash(Rc::new(BTreeMap::new())).hash_key().is_none());
    }

    #[test]
    fn truthiness() {
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::Integer(-1).is_truthy());
        assert!(Value::Str(Rc::new(String::new())).is_truthy());
        assert!(TRUE.is_truthy());
        assert!(!FALSE.is_truthy());
        assert!(!NULL.is_truthy());
    }

    #[test]
    fn equality_is_by_value_for_integers_and_identity_for_aggregates() {
        assert!(Value::Integer(5).equals(&Value::Integer(5)));
        assert!(!Value::Integer(5).equals(&Value::Integer(6)));
        assert!(TRUE.equals(&TRUE));
        assert!(NULL.equals(&NULL));
        assert!(!NULL.equals(&FALSE));

        let a = Value::Str(Rc::new("x".to_string()));
        let a_alias = a.clone();
        let b = Value::Str(Rc::new("x".to_string()));
        assert!(a.equals(&a_alias));
        assert!(!a.equals(&b));
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::Integer(-7).to_string(), "-7");
        assert_eq!(TRUE.to_string(), "true");
        assert_eq!(NULL.to_string(), "null");
        assert_eq!(Value::Str(Rc::new("hi".to_string())).to_string(), "hi");

        let array = Value::Array(Rc::new(vec![
            Value::Integer(1),
            Value::Str(Rc::new("two".to_string())),
        ]));
        assert_eq!(array.to_string(), "[1, two]");

        let mut pairs = BTreeMap::new();
        let key = Value::Str(Rc::new("one".to_string()));
        pairs.insert(
            key.hash_key().unwrap(),
            HashPair {
                key,
                value: Value::Integer(1),
            },
        );
        assert_eq!(Value::Hash(Rc::new(pairs)).to_string(), "{one: 1}");
    }
}
