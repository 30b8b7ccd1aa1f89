use thiserror::Error;

/// All the ways a Tamarin program can fail, across both phases.
///
/// Parse and compile errors surface before any code runs; the rest are
/// runtime errors raised by the VM or the evaluator. The message strings are
/// part of the observable contract and are asserted by the test suite.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("undefined variable {0}")]
    UndefinedVariable(String),

    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("unusable as hash key: {0}")]
    UnhashableKey(&'static str),

    #[error("index operator not supported: {0}")]
    IndexNotSupported(&'static str),

    #[error("calling non-function and non-builtin")]
    NotCallable,

    #[error("not a function: {0}")]
    NotAFunction(&'static str),

    /// Arity mismatch on a user-defined function call.
    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongArgumentCount { want: usize, got: usize },

    /// Arity mismatch on a builtin call. The wording differs from
    /// [`Error::WrongArgumentCount`] on purpose; both formats are contractual.
    #[error("wrong number of arguments. got={got}, want={want}")]
    BuiltinArity { got: usize, want: usize },

    #[error("argument to '{name}' not supported, got {got}")]
    BuiltinUnsupportedArgument {
        name: &'static str,
        got: &'static str,
    },

    #[error("argument to '{name}' must be {want}, got {got}")]
    BuiltinWrongArgumentType {
        name: &'static str,
        want: &'static str,
        got: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("stack overflow")]
    StackOverflow,

    #[error("stack underflow")]
    StackUnderflow,

    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
