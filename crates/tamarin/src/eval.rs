//! Tree-walking reference evaluator.
//!
//! Walks the AST directly, sharing the object model, the builtin registry,
//! and the operator semantics with the compiled pipeline. It exists as the
//! reference the compiler+VM pair is validated against, and doubles as a
//! second REPL backend.
//!
//! Environments live in an arena indexed by [`EnvId`]: closures keep their
//! defining environment alive by id, so there are no ownership cycles to
//! manage. Nothing is ever freed; the arena's lifetime is the evaluator's.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::ast::{BlockStatement, Expression, Program, Statement};
use crate::builtins;
use crate::error::{Error, Result};
use crate::operators;
use crate::parser::Parser;
use crate::value::{Function, HashPair, NULL, Value, bool_value};

/// Index of an environment in the evaluator's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvId(usize);

/// The global environment's id.
const GLOBAL_ENV: EnvId = EnvId(0);

#[derive(Debug, Default)]
struct Environment {
    store: HashMap<String, Value>,
    outer: Option<EnvId>,
}

/// How a statement's result travels: either an ordinary value, or a value
/// being returned, which unwinds through enclosing blocks until a function
/// body (or the program) strips it.
enum Flow {
    Value(Value),
    Return(Value),
}

/// Evaluate a sub-expression to a plain value, propagating an in-flight
/// `return` past the current expression.
macro_rules! eval_value {
    ($self:ident, $expr:expr, $env:expr) => {
        match $self.eval_expression($expr, $env)? {
            Flow::Value(value) => value,
            flow @ Flow::Return(_) => return Ok(flow),
        }
    };
}

pub struct Evaluator {
    environments: Vec<Environment>,
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator {
            environments: vec![Environment::default()],
        }
    }

    /// Parse and evaluate one input. Top-level bindings persist across
    /// calls, mirroring [`crate::Session::run`] for the compiled pipeline.
    pub fn run(&mut self, source: &str) -> Result<Value> {
        let program = Parser::parse(source)?;
        self.eval(&program)
    }

    /// Evaluate a parsed program against the persistent global environment.
    pub fn eval(&mut self, program: &Program) -> Result<Value> {
        let mut result = NULL;
        for statement in &program.statements {
            match self.eval_statement(statement, GLOBAL_ENV)? {
                Flow::Return(value) => return Ok(value),
                Flow::Value(value) => result = value,
            }
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Environment arena
    // -----------------------------------------------------------------------

    fn new_env(&mut self, outer: EnvId) -> EnvId {
        self.environments.push(Environment {
            store: HashMap::new(),
            outer: Some(outer),
        });
        EnvId(self.environments.len() - 1)
    }

    fn get(&self, env: EnvId, name: &str) -> Option<Value> {
        let mut current = Some(env);
        while let Some(id) = current {
            let node = &self.environments[id.0];
            if let Some(value) = node.store.get(name) {
                return Some(value.clone());
            }
            current = node.outer;
        }
        None
    }

    fn set(&mut self, env: EnvId, name: &str, value: Value) {
        self.environments[env.0].store.insert(name.to_string(), value);
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn eval_statement(&mut self, statement: &Statement, env: EnvId) -> Result<Flow> {
        match statement {
            Statement::Expression(expression) => self.eval_expression(expression, env),
            Statement::Let { name, value } => {
                let value = eval_value!(self, value, env);
                self.set(env, name, value.clone());
                // A `let` leaves its bound value behind, matching what the
                // VM's last-popped slot holds after a SetGlobal/SetLocal.
                Ok(Flow::Value(value))
            }
            Statement::Return(value) => {
                let value = eval_value!(self, value, env);
                Ok(Flow::Return(value))
            }
        }
    }

    fn eval_block(&mut self, block: &BlockStatement, env: EnvId) -> Result<Flow> {
        let mut result = NULL;
        for statement in &block.statements {
            match self.eval_statement(statement, env)? {
                flow @ Flow::Return(_) => return Ok(flow),
                Flow::Value(value) => result = value,
            }
        }
        Ok(Flow::Value(result))
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn eval_expression(&mut self, expression: &Expression, env: EnvId) -> Result<Flow> {
        let value = match expression {
            Expression::IntegerLiteral(value) => Value::Integer(*value),
            Expression::StringLiteral(value) => Value::Str(Rc::new(value.clone())),
            Expression::BooleanLiteral(value) => bool_value(*value),
            Expression::Identifier(name) => self
                .get(env, name)
                .or_else(|| builtins::lookup(name).map(Value::Builtin))
                .ok_or_else(|| Error::UndefinedVariable(name.clone()))?,
            Expression::Prefix { operator, right } => {
                let operand = eval_value!(self, right, env);
                operators::apply_prefix(operator, &operand)?
            }
            Expression::Infix {
                operator,
                left,
                right,
            } => {
                let left = eval_value!(self, left, env);
                let right = eval_value!(self, right, env);
                operators::apply_infix(operator, &left, &right)?
            }
            Expression::If {
                condition,
                consequence,
                alternative,
            } => {
                let condition = eval_value!(self, condition, env);
                return if condition.is_truthy() {
                    self.eval_block(consequence, env)
                } else if let Some(alternative) = alternative {
                    self.eval_block(alternative, env)
                } else {
                    Ok(Flow::Value(NULL))
                };
            }
            Expression::FunctionLiteral {
                parameters, body, ..
            } => Value::Function(Rc::new(Function {
                parameters: parameters.clone(),
                body: body.clone(),
                env,
            })),
            Expression::Call {
                function,
                arguments,
            } => {
                let callee = eval_value!(self, function, env);
                let mut args = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    args.push(eval_value!(self, argument, env));
                }
                self.apply_function(callee, args)?
            }
            Expression::ArrayLiteral(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(eval_value!(self, element, env));
                }
                Value::Array(Rc::new(values))
            }
            Expression::HashLiteral(entries) => {
                let mut pairs = BTreeMap::new();
                for (key_expr, value_expr) in entries {
                    let key = eval_value!(self, key_expr, env);
                    let value = eval_value!(self, value_expr, env);
                    let hash_key = key
                        .hash_key()
                        .ok_or(Error::UnhashableKey(key.type_name()))?;
                    pairs.insert(hash_key, HashPair { key, value });
                }
                Value::Hash(Rc::new(pairs))
            }
            Expression::Index { left, index } => {
                let left = eval_value!(self, left, env);
                let index = eval_value!(self, index, env);
                operators::apply_index(&left, &index)?
            }
        };
        Ok(Flow::Value(value))
    }

    fn apply_function(&mut self, callee: Value, args: Vec<Value>) -> Result<Value> {
        match callee {
            Value::Function(function) => {
                if args.len() != function.parameters.len() {
                    return Err(Error::WrongArgumentCount {
                        want: function.parameters.len(),
                        got: args.len(),
                    });
                }
                let call_env = self.new_env(function.env);
                for (parameter, arg) in function.parameters.iter().zip(args) {
                    self.set(call_env, parameter, arg);
                }
                match self.eval_block(&function.body, call_env)? {
                    Flow::Return(value) | Flow::Value(value) => Ok(value),
                }
            }
            Value::Builtin(builtin) => (builtin.func)(&args),
            _ => Err(Error::NotCallable),
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}
