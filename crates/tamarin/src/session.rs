//! Embedder facade: one object that threads persistent state through the
//! parse → compile → execute pipeline.
//!
//! A REPL (or any host) keeps a single [`Session`] alive: the compiler's
//! global symbol table and constants pool and the VM's globals vector all
//! survive between [`Session::run`] calls, so bindings from one input are
//! visible to the next.

use crate::compiler::Compiler;
use crate::error::Result;
use crate::parser::Parser;
use crate::value::Value;
use crate::vm::Vm;

pub struct Session {
    compiler: Compiler,
    vm: Vm,
}

impl Session {
    pub fn new() -> Self {
        Session {
            compiler: Compiler::new(),
            vm: Vm::new(),
        }
    }

    /// Parse, compile, and execute one input, returning the program's value.
    pub fn run(&mut self, source: &str) -> Result<Value> {
        let program = Parser::parse(source)?;
        let bytecode = self.compiler.compile(&program)?;
        self.vm.run(&bytecode)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
