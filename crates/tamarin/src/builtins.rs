//! Built-in functions shared by the compiler, the VM, and the evaluator.
//!
//! The registry is an ordered list: the index of a builtin here is the index
//! the compiler emits with `GetBuiltin` and the index the VM uses to fetch
//! it, so the order is part of the compiled-code contract.

use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::value::{NULL, Value};

pub type BuiltinFn = fn(&[Value]) -> Result<Value>;

/// A named host function callable from Tamarin code.
#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// The builtin registry, in registration order.
pub const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "len",
        func: builtin_len,
    },
    Builtin {
        name: "first",
        func: builtin_first,
    },
    Builtin {
        name: "last",
        func: builtin_last,
    },
    Builtin {
        name: "rest",
        func: builtin_rest,
    },
    Builtin {
        name: "push",
        func: builtin_push,
    },
    Builtin {
        name: "puts",
        func: builtin_puts,
    },
];

/// Find a builtin by name. The evaluator falls back to this after
/// environment lookup fails.
pub fn lookup(name: &str) -> Option<Builtin> {
    BUILTINS.iter().copied().find(|builtin| builtin.name == name)
}

fn check_arity(args: &[Value], want: usize) -> Result<()> {
    if args.len() != want {
        return Err(Error::BuiltinArity {
            got: args.len(),
            want,
        });
    }
    Ok(())
}

fn builtin_len(args: &[Value]) -> Result<Value> {
    check_arity(args, 1)?;
    match &args[0] {
        Value::Str(value) => Ok(Value::Integer(value.len() as i64)),
        Value::Array(elements) => Ok(Value::Integer(elements.len() as i64)),
        other => Err(Error::BuiltinUnsupportedArgument {
            name: "len",
            got: other.type_name(),
        }),
    }
}

fn builtin_first(args: &[Value]) -> Result<Value> {
    check_arity(args, 1)?;
    match &args[0] {
        Value::Array(elements) => Ok(elements.first().cloned().unwrap_or(NULL)),
        other => Err(Error::BuiltinWrongArgumentType {
            name: "first",
            want: "ARRAY",
            got: other.type_name(),
        }),
    }
}

fn builtin_last(args: &[Value]) -> Result<Value> {
    check_arity(args, 1)?;
    match &args[0] {
        Value::Array(elements) => Ok(elements.last().cloned().unwrap_or(NULL)),
        other => Err(Error::BuiltinWrongArgumentType {
            name: "last",
            want: "ARRAY",
            got: other.type_name(),
        }),
    }
}

fn builtin_rest(args: &[Value]) -> Result<Value> {
    check_arity(args, 1)?;
    match &args[0] {
        Value::Array(elements) => {
            if elements.is_empty() {
                return Ok(NULL);
            }
            Ok(Value::Array(Rc::new(elements[1..].to_vec())))
        }
        other => Err(Error::BuiltinWrongArgumentType {
            name: "rest",
            want: "ARRAY",
            got: other.type_name(),
        }),
    }
}

fn builtin_push(args: &[Value]) -> Result<Value> {
    check_arity(args, 2)?;
    match &args[0] {
        Value::Array(elements) => {
            // Non-mutating: the result is a fresh array.
            let mut elements = elements.as_ref().clone();
            elements.push(args[1].clone());
            Ok(Value::Array(Rc::new(elements)))
        }
        other => Err(Error::BuiltinWrongArgumentType {
            name: "push",
            want: "ARRAY",
            got: other.type_name(),
        }),
    }
}

fn builtin_puts(args: &[Value]) -> Result<Value> {
    for arg in args {
        println!("{arg}");
    }
    Ok(NULL)
}
