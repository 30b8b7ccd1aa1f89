//! Tamarin: a small expression-oriented language with first-class
//! functions, compiled to bytecode and run on a stack machine.
//!
//! The crate contains the whole toolchain:
//!
//! - a lexer and Pratt parser producing the AST,
//! - a single-pass **bytecode compiler** with scope-aware name resolution
//!   and free-variable capture,
//! - a stack-based **virtual machine** with call frames and closures,
//! - a tree-walking **evaluator** over the same AST and object model, used
//!   as the reference semantics the compiled pipeline is tested against.
//!
//! # Quick start
//!
//! ```
//! use tamarin::Session;
//!
//! let mut session = Session::new();
//! let value = session
//!     .run("let double = fn(x) { x * 2 }; double(21);")
//!     .unwrap();
//! assert_eq!(value.to_string(), "42");
//!
//! // Bindings persist across inputs on the same session.
//! assert_eq!(session.run("double(100)").unwrap().to_string(), "200");
//! ```
//!
//! # The language
//!
//! Integers, booleans, strings, arrays, and hashes; `let` bindings;
//! `if`/`else` as an expression; first-class, lexically scoped functions
//! with closures and recursion; indexing; and a handful of builtins
//! (`len`, `first`, `last`, `rest`, `push`, `puts`).
//!
//! ```
//! use tamarin::Session;
//!
//! let mut session = Session::new();
//! let value = session
//!     .run(r#"
//!         let people = [{"name": "Alice"}, {"name": "Bob"}];
//!         first(rest(people))["name"]
//!     "#)
//!     .unwrap();
//! assert_eq!(value.to_string(), "Bob");
//! ```

mod ast;
mod builtins;
mod bytecode;
mod compiler;
mod error;
mod eval;
mod lexer;
mod operators;
mod parser;
mod session;
mod symbols;
mod token;
mod value;
mod vm;

pub use ast::{BlockStatement, Expression, Program, Statement};
pub use builtins::{BUILTINS, Builtin};
pub use bytecode::{Bytecode, Instructions, Opcode, disassemble, make};
pub use compiler::Compiler;
pub use error::{Error, Result};
pub use eval::{EnvId, Evaluator};
pub use lexer::Lexer;
pub use parser::Parser;
pub use session::Session;
pub use symbols::{Symbol, SymbolScope, SymbolTable};
pub use token::Token;
pub use value::{Closure, CompiledFunction, Function, HashKey, HashKind, HashPair, Value};
pub use vm::{GLOBALS_SIZE, MAX_FRAMES, STACK_SIZE, Vm};
