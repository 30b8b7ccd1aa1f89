//! Bytecode compiler: lowers the AST to flat instructions plus constants.
//!
//! The compiler walks the AST exactly once and emits instructions into a
//! stack of compilation scopes, one per function literal being compiled.
//! Jump targets use a placeholder/patch approach: jumps are emitted with a
//! dummy operand, and once the real offset is known the instruction is
//! re-encoded in place. A [`Compiler`] is meant to be reused across inputs:
//! the global symbol table and the constants pool persist between
//! [`Compiler::compile`] calls, which is what gives a REPL its memory.

use std::mem;
use std::rc::Rc;

use crate::ast::{BlockStatement, Expression, Program, Statement};
use crate::builtins::BUILTINS;
use crate::bytecode::{self, Bytecode, Instructions, Opcode};
use crate::error::{Error, Result};
use crate::symbols::{Symbol, SymbolScope, SymbolTable};
use crate::value::{CompiledFunction, Value};

/// Placeholder operand for jumps that still need back-patching.
const PLACEHOLDER: usize = 0xFFFF;

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

/// One function body under compilation: its growing instruction buffer and
/// the last two instructions emitted into it.
#[derive(Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Value>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
    scope_index: usize,
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for (index, builtin) in BUILTINS.iter().enumerate() {
            symbol_table.define_builtin(index, builtin.name);
        }
        Compiler {
            constants: Vec::new(),
            symbol_table,
            scopes: vec![CompilationScope::default()],
            scope_index: 0,
        }
    }

    /// Compile one program. Top-level bindings and constants accumulate
    /// across calls; the instruction stream starts fresh each time.
    pub fn compile(&mut self, program: &Program) -> Result<Bytecode> {
        self.scopes.truncate(1);
        self.scope_index = 0;
        self.scopes[0] = CompilationScope::default();

        self.compile_program(program)?;

        Ok(Bytecode {
            instructions: self.scopes[0].instructions.clone(),
            constants: self.constants.clone(),
        })
    }

    fn compile_program(&mut self, program: &Program) -> Result<()> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn compile_statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                // Keep the stack balanced: a statement leaves nothing behind.
                self.emit(Opcode::Pop, &[]);
            }
            Statement::Let { name, value } => {
                self.compile_expression(value)?;
                let symbol = self.symbol_table.define(name);
                if symbol.scope == SymbolScope::Global {
                    self.emit(Opcode::SetGlobal, &[symbol.index]);
                } else {
                    self.emit(Opcode::SetLocal, &[symbol.index]);
                }
            }
            Statement::Return(value) => {
                self.compile_expression(value)?;
                self.emit(Opcode::ReturnValue, &[]);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &BlockStatement) -> Result<()> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn compile_expression(&mut self, expression: &Expression) -> Result<()> {
        match expression {
            Expression::IntegerLiteral(value) => {
                let index = self.add_constant(Value::Integer(*value));
                self.emit(Opcode::Constant, &[index]);
            }
            Expression::StringLiteral(value) => {
                let index = self.add_constant(Value::Str(Rc::new(value.clone())));
                self.emit(Opcode::Constant, &[index]);
            }
            Expression::BooleanLiteral(value) => {
                if *value {
                    self.emit(Opcode::True, &[]);
                } else {
                    self.emit(Opcode::False, &[]);
                }
            }
            Expression::Identifier(name) => {
                let symbol = self
                    .symbol_table
                    .resolve(name)
                    .ok_or_else(|| Error::UndefinedVariable(name.clone()))?;
                self.load_symbol(&symbol);
            }
            Expression::Prefix { operator, right } => {
                self.compile_expression(right)?;
                match operator.as_str() {
                    "!" => self.emit(Opcode::Bang, &[]),
                    "-" => self.emit(Opcode::Minus, &[]),
                    other => return Err(Error::UnknownOperator(other.to_string())),
                };
            }
            Expression::Infix {
                operator,
                left,
                right,
            } => self.compile_infix(operator, left, right)?,
            Expression::If {
                condition,
                consequence,
                alternative,
            } => self.compile_if(condition, consequence, alternative.as_ref())?,
            Expression::ArrayLiteral(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()]);
            }
            Expression::HashLiteral(entries) => {
                // Sort by the key's source form so compilation is
                // deterministic; hash iteration order is not observable, so
                // this has no semantic effect.
                let mut pairs: Vec<&(Expression, Expression)> = entries.iter().collect();
                pairs.sort_by_cached_key(|(key, _)| key.to_string());
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::Hash, &[entries.len() * 2]);
            }
            Expression::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[]);
            }
            Expression::FunctionLiteral {
                parameters,
                body,
                name,
            } => self.compile_function_literal(parameters, body, name.as_deref())?,
            Expression::Call {
                function,
                arguments,
            } => {
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::Call, &[arguments.len()]);
            }
        }
        Ok(())
    }

    fn compile_infix(
        &mut self,
        operator: &str,
        left: &Expression,
        right: &Expression,
    ) -> Result<()> {
        // There is no LessThan opcode: `a < b` compiles as `b > a`.
        if operator == "<" {
            self.compile_expression(right)?;
            self.compile_expression(left)?;
            self.emit(Opcode::GreaterThan, &[]);
            return Ok(());
        }

        self.compile_expression(left)?;
        self.compile_expression(right)?;
        match operator {
            "+" => self.emit(Opcode::Add, &[]),
            "-" => self.emit(Opcode::Sub, &[]),
            "*" => self.emit(Opcode::Mul, &[]),
            "/" => self.emit(Opcode::Div, &[]),
            ">" => self.emit(Opcode::GreaterThan, &[]),
            "==" => self.emit(Opcode::Equal, &[]),
            "!=" => self.emit(Opcode::NotEqual, &[]),
            other => return Err(Error::UnknownOperator(other.to_string())),
        };
        Ok(())
    }

    /// Compile an `if` expression so that exactly one value is left on the
    /// stack whichever branch runs; a missing `else` contributes `null`.
    fn compile_if(
        &mut self,
        condition: &Expression,
        consequence: &BlockStatement,
        alternative: Option<&BlockStatement>,
    ) -> Result<()> {
        self.compile_expression(condition)?;
        let jump_not_truthy = self.emit(Opcode::JumpNotTruthy, &[PLACEHOLDER]);

        self.compile_block(consequence)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_pop();
        }
        let jump = self.emit(Opcode::Jump, &[PLACEHOLDER]);

        let after_consequence = self.current_instructions().len();
        self.change_operand(jump_not_truthy, after_consequence);

        match alternative {
            Some(alternative) => {
                self.compile_block(alternative)?;
                if self.last_instruction_is(Opcode::Pop) {
                    self.remove_last_pop();
                }
            }
            None => {
                self.emit(Opcode::Null, &[]);
            }
        }

        let after_alternative = self.current_instructions().len();
        self.change_operand(jump, after_alternative);
        Ok(())
    }

    fn compile_function_literal(
        &mut self,
        parameters: &[String],
        body: &BlockStatement,
        name: Option<&str>,
    ) -> Result<()> {
        self.enter_scope();

        if let Some(name) = name {
            self.symbol_table.define_function_name(name);
        }
        for parameter in parameters {
            self.symbol_table.define(parameter);
        }

        // Leave the scope even when the body fails to compile, so the
        // enter/leave pairing survives error paths.
        let body_result = self.compile_block(body);
        if body_result.is_ok() {
            if self.last_instruction_is(Opcode::Pop) {
                self.replace_last_pop_with_return();
            }
            if !self.last_instruction_is(Opcode::ReturnValue) {
                self.emit(Opcode::Return, &[]);
            }
        }

        let free_symbols = self.symbol_table.free_symbols.clone();
        let num_locals = self.symbol_table.num_definitions;
        let instructions = self.leave_scope();
        body_result?;

        // Push the captured values in the outer scope; the Closure
        // instruction consumes them.
        for symbol in &free_symbols {
            self.load_symbol(symbol);
        }

        let function = CompiledFunction {
            instructions,
            num_locals,
            num_parameters: parameters.len(),
        };
        let index = self.add_constant(Value::CompiledFunction(Rc::new(function)));
        self.emit(Opcode::Closure, &[index, free_symbols.len()]);
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, &[]),
        };
    }

    // -----------------------------------------------------------------------
    // Emission helpers
    // -----------------------------------------------------------------------

    fn emit(&mut self, op: Opcode, operands: &[usize]) -> usize {
        let instruction = bytecode::make(op, operands);
        let position = self.current_instructions().len();
        self.scopes[self.scope_index]
            .instructions
            .extend_from_slice(&instruction);

        let scope = &mut self.scopes[self.scope_index];
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction {
            opcode: op,
            position,
        });
        position
    }

    fn current_instructions(&self) -> &Instructions {
        &self.scopes[self.scope_index].instructions
    }

    fn last_instruction_is(&self, op: Opcode) -> bool {
        self.scopes[self.scope_index]
            .last_instruction
            .map(|instruction| instruction.opcode)
            == Some(op)
    }

    fn remove_last_pop(&mut self) {
        let scope = &mut self.scopes[self.scope_index];
        let last = scope.last_instruction.expect("no instruction to remove");
        scope.instructions.truncate(last.position);
        scope.last_instruction = scope.previous_instruction;
    }

    fn replace_instruction(&mut self, position: usize, new_instruction: &[u8]) {
        let instructions = &mut self.scopes[self.scope_index].instructions;
        instructions[position..position + new_instruction.len()].copy_from_slice(new_instruction);
    }

    fn replace_last_pop_with_return(&mut self) {
        let position = self.scopes[self.scope_index]
            .last_instruction
            .expect("no instruction to replace")
            .position;
        self.replace_instruction(position, &bytecode::make(Opcode::ReturnValue, &[]));
        if let Some(last) = &mut self.scopes[self.scope_index].last_instruction {
            last.opcode = Opcode::ReturnValue;
        }
    }

    /// Re-encode the instruction at `position` with a new operand. The
    /// opcode (and therefore the operand width) stays the same.
    fn change_operand(&mut self, position: usize, operand: usize) {
        let op = Opcode::try_from(self.current_instructions()[position])
            .expect("change_operand on a malformed instruction");
        self.replace_instruction(position, &bytecode::make(op, &[operand]));
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.scope_index += 1;
        let outer = mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
    }

    fn leave_scope(&mut self) -> Instructions {
        let scope = self.scopes.pop().expect("scope stack is never empty");
        self.scope_index -= 1;
        let table = mem::take(&mut self.symbol_table);
        self.symbol_table = table.into_outer().expect("cannot leave the global scope");
        scope.instructions
    }

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bytecode::{disassemble, make, read_u16};
    use crate::parser::Parser;

    fn compile(input: &str) -> Bytecode {
        let program = Parser::parse(input).unwrap();
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap()
    }

    fn compile_err(input: &str) -> Error {
        let program = Parser::parse(input).unwrap();
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap_err()
    }

    fn assert_instructions(bytecode: &Bytecode, expected: &[Vec<u8>]) {
        let expected: Vec<u8> = expected.concat();
        assert_eq!(
            bytecode.instructions,
            expected,
            "\nwant:\n{}\ngot:\n{}",
            disassemble(&expected),
            disassemble(&bytecode.instructions),
        );
    }

    fn int(value: i64) -> Value {
        Value::Integer(value)
    }

    fn string(value: &str) -> Value {
        Value::Str(Rc::new(value.to_string()))
    }

    fn function(instructions: &[Vec<u8>], num_locals: usize, num_parameters: usize) -> Value {
        Value::CompiledFunction(Rc::new(CompiledFunction {
            instructions: instructions.concat(),
            num_locals,
            num_parameters,
        }))
    }

    #[test]
    fn integer_arithmetic() {
        let bytecode = compile("1 + 2");
        assert_eq!(bytecode.constants, vec![int(1), int(2)]);
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Add, &[]),
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("1; 2");
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Pop, &[]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("-1");
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Minus, &[]),
                make(Opcode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn boolean_expressions() {
        let bytecode = compile("true");
        assert_instructions(
            &bytecode,
            &[make(Opcode::True, &[]), make(Opcode::Pop, &[])],
        );

        let bytecode = compile("!false");
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::False, &[]),
                make(Opcode::Bang, &[]),
                make(Opcode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn comparison_operators_swap_less_than() {
        let bytecode = compile("1 > 2");
        assert_eq!(bytecode.constants, vec![int(1), int(2)]);
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::GreaterThan, &[]),
                make(Opcode::Pop, &[]),
            ],
        );

        // `1 < 2` compiles its operands swapped.
        let bytecode = compile("1 < 2");
        assert_eq!(bytecode.constants, vec![int(2), int(1)]);
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::GreaterThan, &[]),
                make(Opcode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn conditionals_backpatch_jump_targets() {
        let bytecode = compile("if (true) { 10 }; 3333;");
        assert_eq!(bytecode.constants, vec![int(10), int(3333)]);
        assert_instructions(
            &bytecode,
            &[
                // 0000
                make(Opcode::True, &[]),
                // 0001
                make(Opcode::JumpNotTruthy, &[10]),
                // 0004
                make(Opcode::Constant, &[0]),
                // 0007
                make(Opcode::Jump, &[11]),
                // 0010
                make(Opcode::Null, &[]),
                // 0011
                make(Opcode::Pop, &[]),
                // 0012
                make(Opcode::Constant, &[1]),
                // 0015
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("if (true) { 10 } else { 20 }; 3333;");
        assert_eq!(bytecode.constants, vec![int(10), int(20), int(3333)]);
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::True, &[]),
                make(Opcode::JumpNotTruthy, &[10]),
                make(Opcode::Constant, &[0]),
                make(Opcode::Jump, &[13]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Pop, &[]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn global_let_statements() {
        let bytecode = compile("let one = 1; let two = 2; one;");
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::SetGlobal, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::SetGlobal, &[1]),
                make(Opcode::GetGlobal, &[0]),
                make(Opcode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn string_expressions() {
        let bytecode = compile(r#""mon" + "key""#);
        assert_eq!(bytecode.constants, vec![string("mon"), string("key")]);
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Add, &[]),
                make(Opcode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn array_literals() {
        let bytecode = compile("[1, 2 + 3]");
        assert_eq!(bytecode.constants, vec![int(1), int(2), int(3)]);
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Add, &[]),
                make(Opcode::Array, &[2]),
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("[]");
        assert_instructions(
            &bytecode,
            &[make(Opcode::Array, &[0]), make(Opcode::Pop, &[])],
        );
    }

    #[test]
    fn hash_literals_sort_keys_by_source_form() {
        let bytecode = compile("{1: 2 + 3, 4: 5 * 6}");
        assert_eq!(
            bytecode.constants,
            vec![int(1), int(2), int(3), int(4), int(5), int(6)]
        );
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Add, &[]),
                make(Opcode::Constant, &[3]),
                make(Opcode::Constant, &[4]),
                make(Opcode::Constant, &[5]),
                make(Opcode::Mul, &[]),
                make(Opcode::Hash, &[4]),
                make(Opcode::Pop, &[]),
            ],
        );

        // Written out of order, keys still compile sorted.
        let bytecode = compile(r#"{"b": 2, "a": 1}"#);
        assert_eq!(
            bytecode.constants,
            vec![string("a"), int(1), string("b"), int(2)]
        );

        let bytecode = compile("{}");
        assert_instructions(
            &bytecode,
            &[make(Opcode::Hash, &[0]), make(Opcode::Pop, &[])],
        );
    }

    #[test]
    fn index_expressions() {
        let bytecode = compile("[1, 2][1 + 1]");
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Array, &[2]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Constant, &[3]),
                make(Opcode::Add, &[]),
                make(Opcode::Index, &[]),
                make(Opcode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn functions_return_their_last_expression() {
        let bytecode = compile("fn() { return 5 + 10 }");
        assert_eq!(
            bytecode.constants,
            vec![
                int(5),
                int(10),
                function(
                    &[
                        make(Opcode::Constant, &[0]),
                        make(Opcode::Constant, &[1]),
                        make(Opcode::Add, &[]),
                        make(Opcode::ReturnValue, &[]),
                    ],
                    0,
                    0,
                ),
            ]
        );
        assert_instructions(
            &bytecode,
            &[make(Opcode::Closure, &[2, 0]), make(Opcode::Pop, &[])],
        );

        // An implicit return compiles identically.
        let implicit = compile("fn() { 5 + 10 }");
        assert_eq!(implicit.constants, bytecode.constants);

        // An empty body returns null.
        let bytecode = compile("fn() { }");
        assert_eq!(
            bytecode.constants,
            vec![function(&[make(Opcode::Return, &[])], 0, 0)]
        );
    }

    #[test]
    fn let_statements_inside_functions_use_local_slots() {
        let bytecode = compile("let num = 55; fn() { num }");
        assert_eq!(
            bytecode.constants,
            vec![
                int(55),
                function(
                    &[
                        make(Opcode::GetGlobal, &[0]),
                        make(Opcode::ReturnValue, &[]),
                    ],
                    0,
                    0,
                ),
            ]
        );

        let bytecode = compile("fn() { let num = 55; num }");
        assert_eq!(
            bytecode.constants,
            vec![
                int(55),
                function(
                    &[
                        make(Opcode::Constant, &[0]),
                        make(Opcode::SetLocal, &[0]),
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::ReturnValue, &[]),
                    ],
                    1,
                    0,
                ),
            ]
        );

        let bytecode = compile("fn() { let a = 55; let b = 77; a + b }");
        assert_eq!(
            bytecode.constants,
            vec![
                int(55),
                int(77),
                function(
                    &[
                        make(Opcode::Constant, &[0]),
                        make(Opcode::SetLocal, &[0]),
                        make(Opcode::Constant, &[1]),
                        make(Opcode::SetLocal, &[1]),
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::GetLocal, &[1]),
                        make(Opcode::Add, &[]),
                        make(Opcode::ReturnValue, &[]),
                    ],
                    2,
                    0,
                ),
            ]
        );
    }

    #[test]
    fn function_calls() {
        let bytecode = compile("let oneArg = fn(a) { a }; oneArg(24);");
        assert_eq!(
            bytecode.constants,
            vec![
                function(
                    &[
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::ReturnValue, &[]),
                    ],
                    1,
                    1,
                ),
                int(24),
            ]
        );
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Closure, &[0, 0]),
                make(Opcode::SetGlobal, &[0]),
                make(Opcode::GetGlobal, &[0]),
                make(Opcode::Constant, &[1]),
                make(Opcode::Call, &[1]),
                make(Opcode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn builtins_compile_to_get_builtin() {
        let bytecode = compile("len([]); push([], 1);");
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::GetBuiltin, &[0]),
                make(Opcode::Array, &[0]),
                make(Opcode::Call, &[1]),
                make(Opcode::Pop, &[]),
                make(Opcode::GetBuiltin, &[4]),
                make(Opcode::Array, &[0]),
                make(Opcode::Constant, &[0]),
                make(Opcode::Call, &[2]),
                make(Opcode::Pop, &[]),
            ],
        );

        let bytecode = compile("fn() { len([]) }");
        assert_eq!(
            bytecode.constants,
            vec![function(
                &[
                    make(Opcode::GetBuiltin, &[0]),
                    make(Opcode::Array, &[0]),
                    make(Opcode::Call, &[1]),
                    make(Opcode::ReturnValue, &[]),
                ],
                0,
                0,
            )]
        );
    }

    #[test]
    fn closures_capture_free_variables() {
        let bytecode = compile("fn(a) { fn(b) { a + b } }");
        assert_eq!(
            bytecode.constants,
            vec![
                function(
                    &[
                        make(Opcode::GetFree, &[0]),
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::Add, &[]),
                        make(Opcode::ReturnValue, &[]),
                    ],
                    1,
                    1,
                ),
                function(
                    &[
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::Closure, &[0, 1]),
                        make(Opcode::ReturnValue, &[]),
                    ],
                    1,
                    1,
                ),
            ]
        );
        assert_instructions(
            &bytecode,
            &[make(Opcode::Closure, &[1, 0]), make(Opcode::Pop, &[])],
        );
    }

    #[test]
    fn deeply_nested_closures_capture_transitively() {
        let bytecode = compile("fn(a) { fn(b) { fn(c) { a + b + c } } }");
        assert_eq!(
            bytecode.constants,
            vec![
                function(
                    &[
                        make(Opcode::GetFree, &[0]),
                        make(Opcode::GetFree, &[1]),
                        make(Opcode::Add, &[]),
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::Add, &[]),
                        make(Opcode::ReturnValue, &[]),
                    ],
                    1,
                    1,
                ),
                function(
                    &[
                        make(Opcode::GetFree, &[0]),
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::Closure, &[0, 2]),
                        make(Opcode::ReturnValue, &[]),
                    ],
                    1,
                    1,
                ),
                function(
                    &[
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::Closure, &[1, 1]),
                        make(Opcode::ReturnValue, &[]),
                    ],
                    1,
                    1,
                ),
            ]
        );
    }

    #[test]
    fn recursive_functions_use_current_closure() {
        let bytecode = compile("let countDown = fn(x) { countDown(x - 1); }; countDown(1);");
        assert_eq!(
            bytecode.constants,
            vec![
                int(1),
                function(
                    &[
                        make(Opcode::CurrentClosure, &[]),
                        make(Opcode::GetLocal, &[0]),
                        make(Opcode::Constant, &[0]),
                        make(Opcode::Sub, &[]),
                        make(Opcode::Call, &[1]),
                        make(Opcode::ReturnValue, &[]),
                    ],
                    1,
                    1,
                ),
                int(1),
            ]
        );
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Closure, &[1, 0]),
                make(Opcode::SetGlobal, &[0]),
                make(Opcode::GetGlobal, &[0]),
                make(Opcode::Constant, &[2]),
                make(Opcode::Call, &[1]),
                make(Opcode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn compilation_is_deterministic() {
        let input = r#"let f = fn(x) { {"b": x, "a": 1}["a"] + len([1, 2]) }; f(3);"#;
        let first = compile(input);
        let second = compile(input);
        assert_eq!(first, second);
    }

    #[test]
    fn jump_targets_stay_within_the_instruction_stream() {
        let inputs = [
            "if (true) { 10 }",
            "if (1 > 2) { 10 } else { 20 }; 3333;",
            "fn() { if (true) { 1 } else { 2 } }",
            "let x = if (false) { 1 }; x;",
        ];
        for input in inputs {
            let bytecode = compile(input);
            let mut streams = vec![bytecode.instructions.clone()];
            for constant in &bytecode.constants {
                if let Value::CompiledFunction(func) = constant {
                    streams.push(func.instructions.clone());
                }
            }
            for ins in streams {
                let mut ip = 0;
                while ip < ins.len() {
                    let op = Opcode::try_from(ins[ip]).unwrap();
                    if matches!(op, Opcode::Jump | Opcode::JumpNotTruthy) {
                        let target = read_u16(&ins, ip + 1);
                        assert!(target < ins.len(), "jump to {target} in {input}");
                    }
                    let widths = bytecode::definition(op).operand_widths;
                    ip += 1 + widths.iter().sum::<usize>();
                }
            }
        }
    }

    #[test]
    fn undefined_variables_are_compile_errors() {
        assert_eq!(
            compile_err("foobar"),
            Error::UndefinedVariable("foobar".to_string())
        );
        assert_eq!(
            compile_err("fn() { undefinedInsideFunction }"),
            Error::UndefinedVariable("undefinedInsideFunction".to_string())
        );
    }

    #[test]
    fn scope_stack_recovers_after_errors_in_function_bodies() {
        let program = Parser::parse("fn() { nope }").unwrap();
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap_err();

        // The same compiler keeps working at the global scope.
        let program = Parser::parse("let a = 1; a;").unwrap();
        let bytecode = compiler.compile(&program).unwrap();
        assert_instructions(
            &bytecode,
            &[
                make(Opcode::Constant, &[0]),
                make(Opcode::SetGlobal, &[0]),
                make(Opcode::GetGlobal, &[0]),
                make(Opcode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn state_persists_across_compiles() {
        let mut compiler = Compiler::new();
        compiler
            .compile(&Parser::parse("let one = 1;").unwrap())
            .unwrap();
        let bytecode = compiler.compile(&Parser::parse("one;").unwrap()).unwrap();

        // `one` still resolves, and its constant is still pool entry 0.
        assert_instructions(
            &bytecode,
            &[make(Opcode::GetGlobal, &[0]), make(Opcode::Pop, &[])],
        );
        assert_eq!(bytecode.constants, vec![int(1)]);
    }
}
