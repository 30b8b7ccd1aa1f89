//! Stack-based virtual machine executing compiled bytecode.
//!
//! A fetch-decode-execute loop over the current frame's instruction stream.
//! All runtime state lives here: the value stack, the frame stack, and the
//! globals. The compiler is pure translation, and operator semantics are
//! delegated to [`crate::operators`] so the VM and the evaluator cannot
//! drift apart.
//!
//! A single `Vm` is meant to be reused across `run` calls: the globals
//! vector persists, which is how top-level bindings survive between REPL
//! inputs.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::builtins::{BUILTINS, Builtin};
use crate::bytecode::{self, Bytecode, Opcode};
use crate::error::{Error, Result};
use crate::operators;
use crate::value::{Closure, CompiledFunction, HashPair, NULL, Value};

/// Value stack depth. Pushing past this is the `stack overflow` error.
pub const STACK_SIZE: usize = 2048;
/// Number of global binding slots.
pub const GLOBALS_SIZE: usize = 65536;
/// Call depth. Pushing past this is also reported as `stack overflow`.
pub const MAX_FRAMES: usize = 1024;

/// One activation record: the closure being executed, its instruction
/// pointer, and where on the value stack its locals begin.
///
/// `ip` starts at −1 so the dispatch loop's pre-increment lands on byte 0.
/// Parameters occupy the first slots at `base_pointer`; the remaining local
/// slots up to `num_locals` are reserved at call time.
struct Frame {
    closure: Rc<Closure>,
    ip: isize,
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Frame {
            closure,
            ip: -1,
            base_pointer,
        }
    }

    fn instructions(&self) -> &[u8] {
        &self.closure.func.instructions
    }
}

pub struct Vm {
    constants: Vec<Value>,
    globals: Vec<Value>,
    stack: Vec<Value>,
    /// Points at the next free stack slot. Popping only decrements it, so
    /// `stack[sp]` still holds the most recently popped value; that slot is
    /// how the result of a finished program is recovered.
    sp: usize,
    frames: Vec<Frame>,
}

impl Vm {
    pub fn new() -> Self {
        Vm {
            constants: Vec::new(),
            globals: vec![NULL; GLOBALS_SIZE],
            stack: vec![NULL; STACK_SIZE],
            sp: 0,
            frames: Vec::with_capacity(MAX_FRAMES),
        }
    }

    /// Execute a compiled program and return its value: the last element
    /// popped off the stack. Globals persist into the next `run` call.
    pub fn run(&mut self, bytecode: &Bytecode) -> Result<Value> {
        self.constants = bytecode.constants.clone();
        self.stack.fill(NULL);
        self.sp = 0;
        self.frames.clear();

        let main_fn = Rc::new(CompiledFunction {
            instructions: bytecode.instructions.clone(),
            num_locals: 0,
            num_parameters: 0,
        });
        let main_closure = Rc::new(Closure {
            func: main_fn,
            free: Vec::new(),
        });
        self.frames.push(Frame::new(main_closure, 0));

        self.dispatch_loop()?;
        Ok(self.stack[self.sp].clone())
    }

    // -----------------------------------------------------------------------
    // Dispatch loop
    // -----------------------------------------------------------------------

    fn dispatch_loop(&mut self) -> Result<()> {
        loop {
            let op_byte = {
                let frame = self.current_frame_mut();
                if frame.ip >= frame.instructions().len() as isize - 1 {
                    break;
                }
                frame.ip += 1;
                frame.instructions()[frame.ip as usize]
            };
            let op = Opcode::try_from(op_byte).map_err(|_| Error::UnknownOpcode(op_byte))?;

            match op {
                Opcode::Constant => {
                    let index = self.read_u16_operand();
                    let constant = self.constants[index].clone();
                    self.push(constant)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Equal
                | Opcode::NotEqual
                | Opcode::GreaterThan => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    let result = operators::apply_infix(infix_text(op), &left, &right)?;
                    self.push(result)?;
                }
                Opcode::True => self.push(Value::Boolean(true))?,
                Opcode::False => self.push(Value::Boolean(false))?,
                Opcode::Null => self.push(NULL)?,
                Opcode::Minus => {
                    let operand = self.pop()?;
                    let result = operators::apply_prefix("-", &operand)?;
                    self.push(result)?;
                }
                Opcode::Bang => {
                    let operand = self.pop()?;
                    let result = operators::apply_prefix("!", &operand)?;
                    self.push(result)?;
                }
                Opcode::Jump => {
                    let target = self.read_u16_operand();
                    self.jump_to(target);
                }
                Opcode::JumpNotTruthy => {
                    let target = self.read_u16_operand();
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.jump_to(target);
                    }
                }
                Opcode::SetGlobal => {
                    let index = self.read_u16_operand();
                    self.globals[index] = self.pop()?;
                }
                Opcode::GetGlobal => {
                    let index = self.read_u16_operand();
                    let value = self.globals[index].clone();
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let index = self.read_u8_operand();
                    let base_pointer = self.current_frame().base_pointer;
                    self.stack[base_pointer + index] = self.pop()?;
                }
                Opcode::GetLocal => {
                    let index = self.read_u8_operand();
                    let base_pointer = self.current_frame().base_pointer;
                    let value = self.stack[base_pointer + index].clone();
                    self.push(value)?;
                }
                Opcode::GetBuiltin => {
                    let index = self.read_u8_operand();
                    self.push(Value::Builtin(BUILTINS[index]))?;
                }
                Opcode::GetFree => {
                    let index = self.read_u8_operand();
                    let value = self.current_frame().closure.free[index].clone();
                    self.push(value)?;
                }
                Opcode::CurrentClosure => {
                    let closure = self.current_frame().closure.clone();
                    self.push(Value::Closure(closure))?;
                }
                Opcode::Array => {
                    let count = self.read_u16_operand();
                    let elements = self.stack[self.sp - count..self.sp].to_vec();
                    self.sp -= count;
                    self.push(Value::Array(Rc::new(elements)))?;
                }
                Opcode::Hash => {
                    let count = self.read_u16_operand();
                    let hash = self.build_hash(count)?;
                    self.sp -= count;
                    self.push(hash)?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    let result = operators::apply_index(&left, &index)?;
                    self.push(result)?;
                }
                Opcode::Closure => {
                    let const_index = self.read_u16_operand();
                    let num_free = self.read_u8_operand();
                    self.push_closure(const_index, num_free)?;
                }
                Opcode::Call => {
                    let num_args = self.read_u8_operand();
                    self.call(num_args)?;
                }
                Opcode::ReturnValue => {
                    let return_value = self.pop()?;
                    let frame = self.frames.pop().expect("frame stack is never empty");
                    if self.frames.is_empty() {
                        // Top-level return: the program is done and the value
                        // already sits in the last-popped slot.
                        return Ok(());
                    }
                    self.sp = frame.base_pointer - 1;
                    self.push(return_value)?;
                }
                Opcode::Return => {
                    let frame = self.frames.pop().expect("frame stack is never empty");
                    if self.frames.is_empty() {
                        self.stack[self.sp] = NULL;
                        return Ok(());
                    }
                    self.sp = frame.base_pointer - 1;
                    self.push(NULL)?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Opcode helpers
    // -----------------------------------------------------------------------

    fn build_hash(&mut self, count: usize) -> Result<Value> {
        let mut pairs = BTreeMap::new();
        let start = self.sp - count;
        let mut i = start;
        while i < self.sp {
            let key = self.stack[i].clone();
            let value = self.stack[i + 1].clone();
            let hash_key = key
                .hash_key()
                .ok_or(Error::UnhashableKey(key.type_name()))?;
            pairs.insert(hash_key, HashPair { key, value });
            i += 2;
        }
        Ok(Value::Hash(Rc::new(pairs)))
    }

    fn push_closure(&mut self, const_index: usize, num_free: usize) -> Result<()> {
        let func = match &self.constants[const_index] {
            Value::CompiledFunction(func) => func.clone(),
            other => return Err(Error::NotAFunction(other.type_name())),
        };
        let free = self.stack[self.sp - num_free..self.sp].to_vec();
        self.sp -= num_free;
        self.push(Value::Closure(Rc::new(Closure { func, free })))
    }

    fn call(&mut self, num_args: usize) -> Result<()> {
        let callee = self.stack[self.sp - 1 - num_args].clone();
        match callee {
            Value::Closure(closure) => self.call_closure(closure, num_args),
            Value::Builtin(builtin) => self.call_builtin(builtin, num_args),
            _ => Err(Error::NotCallable),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, num_args: usize) -> Result<()> {
        if num_args != closure.func.num_parameters {
            return Err(Error::WrongArgumentCount {
                want: closure.func.num_parameters,
                got: num_args,
            });
        }

        let base_pointer = self.sp - num_args;
        let new_sp = base_pointer + closure.func.num_locals;
        if new_sp > STACK_SIZE {
            return Err(Error::StackOverflow);
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err(Error::StackOverflow);
        }

        self.frames.push(Frame::new(closure, base_pointer));
        self.sp = new_sp;
        Ok(())
    }

    fn call_builtin(&mut self, builtin: Builtin, num_args: usize) -> Result<()> {
        let result = (builtin.func)(&self.stack[self.sp - num_args..self.sp])?;
        // Drop the arguments and the callee, then push the result.
        self.sp -= num_args + 1;
        self.push(result)
    }

    // -----------------------------------------------------------------------
    // Stack and frame primitives
    // -----------------------------------------------------------------------

    fn push(&mut self, value: Value) -> Result<()> {
        if self.sp >= STACK_SIZE {
            return Err(Error::StackOverflow);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        if self.sp == 0 {
            return Err(Error::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("frame stack is never empty")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("frame stack is never empty")
    }

    /// Read a two-byte operand following the current opcode and step over it.
    fn read_u16_operand(&mut self) -> usize {
        let frame = self.current_frame_mut();
        let ip = frame.ip as usize;
        let operand = bytecode::read_u16(frame.instructions(), ip + 1);
        frame.ip += 2;
        operand
    }

    fn read_u8_operand(&mut self) -> usize {
        let frame = self.current_frame_mut();
        let ip = frame.ip as usize;
        let operand = bytecode::read_u8(frame.instructions(), ip + 1);
        frame.ip += 1;
        operand
    }

    /// Aim the instruction pointer so the next pre-increment lands on
    /// `target`.
    fn jump_to(&mut self, target: usize) {
        self.current_frame_mut().ip = target as isize - 1;
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn infix_text(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Equal => "==",
        Opcode::NotEqual => "!=",
        Opcode::GreaterThan => ">",
        other => unreachable!("no infix operator for {other:?}"),
    }
}
