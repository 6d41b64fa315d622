//! The stack virtual machine.
//!
//! Frames own their instruction pointer; the dispatch loop fetches one opcode
//! at a time from the top frame, reads operands by the opcode's width table,
//! and executes. Every failure is wrapped with the offending opcode's name.
//!
//! The instruction pointer indexes the next byte to fetch, so `OpJump t`
//! simply assigns `ip = t`.
//!
//! Captured variables live in shared cells: `OpCaptureLocal` promotes a
//! local slot to a cell in place, `OpClosure` adopts the handle, and local
//! reads and writes go through a promoted slot transparently, so closure
//! writes and the enclosing frame see one storage location.

use std::{cell::RefCell, rc::Rc};

use super::{
    code::{Bytecode, Instructions, read_u16},
    op::Opcode,
};
use crate::{
    ast::{InfixOp, PrefixOp},
    builtins::Builtin,
    io::PrintWriter,
    object::{self, Closure, CompiledFunction, MapData, MapPair, Object},
};

/// Operand stack depth.
pub const STACK_SIZE: usize = 2048;
/// Global slots addressable by a u16 index.
pub const GLOBALS_SIZE: usize = 65535;
/// Call-stack depth.
pub const MAX_FRAMES: usize = 1024;

/// A VM-stage failure, tagged with the opcode that raised it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    opcode: Option<Opcode>,
    message: String,
}

impl RunError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            opcode: None,
            message: message.into(),
        }
    }

    /// Attaches the opcode being executed, keeping an earlier tag if set.
    fn tag(mut self, opcode: Opcode) -> Self {
        self.opcode.get_or_insert(opcode);
        self
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode {
            Some(opcode) => write!(f, "runtime error in {opcode}: {}", self.message),
            None => write!(f, "runtime error: {}", self.message),
        }
    }
}

impl std::error::Error for RunError {}

type RunResult<T> = Result<T, RunError>;

/// A single function activation record.
#[derive(Debug)]
struct Frame {
    closure: Rc<Closure>,
    /// Offset of the next byte to fetch.
    ip: usize,
    /// The operand-stack index where this frame's locals begin.
    base_pointer: usize,
}

impl Frame {
    fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Self {
            closure,
            ip: 0,
            base_pointer,
        }
    }

    fn instructions(&self) -> &Instructions {
        &self.closure.func.instructions
    }
}

/// The stack machine.
pub struct Vm {
    constants: Vec<Object>,
    globals: Vec<Object>,
    stack: Vec<Object>,
    /// Points one past the top of stack.
    sp: usize,
    frames: Vec<Frame>,
}

impl Vm {
    /// A VM over freshly-allocated globals.
    #[must_use]
    pub fn new(bytecode: Bytecode) -> Self {
        Self::with_globals(bytecode, vec![Object::Null; GLOBALS_SIZE])
    }

    /// A VM reusing an existing global store (REPL sessions).
    ///
    /// The top-level instructions are wrapped in a synthetic zero-parameter
    /// function and pushed as frame 0 with a base pointer of 0.
    #[must_use]
    pub fn with_globals(bytecode: Bytecode, globals: Vec<Object>) -> Self {
        let main_func = Rc::new(CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_params: 0,
        });
        let main_closure = Rc::new(Closure {
            func: main_func,
            free: Vec::new(),
        });
        Self {
            constants: bytecode.constants,
            globals,
            stack: vec![Object::Null; STACK_SIZE],
            sp: 0,
            frames: vec![Frame::new(main_closure, 0)],
        }
    }

    /// Releases the global store for reuse.
    #[must_use]
    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    /// Runs to completion.
    pub fn run(&mut self, print: &mut dyn PrintWriter) -> RunResult<()> {
        while self.has_next_instruction() {
            self.step(print)?;
        }
        Ok(())
    }

    /// Whether the top frame has another instruction to execute.
    #[must_use]
    pub fn has_next_instruction(&self) -> bool {
        let frame = self.current_frame();
        frame.ip < frame.instructions().len()
    }

    /// Fetches and executes exactly one instruction.
    pub fn step(&mut self, print: &mut dyn PrintWriter) -> RunResult<()> {
        let byte = self.fetch_byte()?;
        let op = Opcode::lookup(byte).map_err(|err| RunError::new(err.to_string()))?;
        self.execute(op, print).map_err(|err| err.tag(op))
    }

    fn execute(&mut self, op: Opcode, print: &mut dyn PrintWriter) -> RunResult<()> {
        match op {
            Opcode::OpConstant => {
                let idx = self.read_u16_operand()?;
                let constant = self
                    .constants
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| RunError::new(format!("no constant at index {idx}")))?;
                self.push(constant)
            }
            Opcode::OpPop => self.pop().map(|_| ()),

            Opcode::OpAdd | Opcode::OpSub | Opcode::OpMult | Opcode::OpDiv | Opcode::OpMod
            | Opcode::OpEq | Opcode::OpNotEq | Opcode::OpGt | Opcode::OpGte => {
                let right = self.pop()?;
                let left = self.pop()?;
                let infix = match op {
                    Opcode::OpAdd => InfixOp::Add,
                    Opcode::OpSub => InfixOp::Sub,
                    Opcode::OpMult => InfixOp::Mul,
                    Opcode::OpDiv => InfixOp::Div,
                    Opcode::OpMod => InfixOp::Mod,
                    Opcode::OpEq => InfixOp::Eq,
                    Opcode::OpNotEq => InfixOp::NotEq,
                    Opcode::OpGt => InfixOp::Gt,
                    _ => InfixOp::Gte,
                };
                let result = object::binary(&left, infix, &right).map_err(RunError::new)?;
                self.push(result)
            }

            Opcode::OpTrue => self.push(Object::Boolean(true)),
            Opcode::OpFalse => self.push(Object::Boolean(false)),
            Opcode::OpNull => self.push(Object::Null),

            Opcode::OpMinus | Opcode::OpBang => {
                let right = self.pop()?;
                let prefix = if op == Opcode::OpMinus {
                    PrefixOp::Minus
                } else {
                    PrefixOp::Bang
                };
                let result = object::prefix(prefix, &right).map_err(RunError::new)?;
                self.push(result)
            }

            Opcode::OpJump => {
                let target = self.read_u16_operand()?;
                self.current_frame_mut().ip = target;
                Ok(())
            }
            Opcode::OpJumpNotTruthy => {
                let target = self.read_u16_operand()?;
                let condition = self.pop()?;
                if !condition.is_truthy() {
                    self.current_frame_mut().ip = target;
                }
                Ok(())
            }

            Opcode::OpSetGlobal => {
                let idx = self.read_u16_operand()?;
                let value = self.pop()?;
                self.globals[idx] = value;
                Ok(())
            }
            Opcode::OpGetGlobal => {
                let idx = self.read_u16_operand()?;
                let value = self.globals[idx].clone();
                self.push(value)
            }
            Opcode::OpSetLocal => {
                let idx = self.read_u8_operand()?;
                let value = self.pop()?;
                let base = self.current_frame().base_pointer;
                // a slot promoted by capture is written through its cell so
                // closures over the variable see the update
                let slot = &mut self.stack[base + idx];
                if let Object::Cell(cell) = slot {
                    *cell.borrow_mut() = value;
                } else {
                    *slot = value;
                }
                Ok(())
            }
            Opcode::OpGetLocal => {
                let idx = self.read_u8_operand()?;
                let base = self.current_frame().base_pointer;
                let value = match &self.stack[base + idx] {
                    Object::Cell(cell) => cell.borrow().clone(),
                    value => value.clone(),
                };
                self.push(value)
            }
            Opcode::OpGetFree => {
                let idx = self.read_u8_operand()?;
                let cell = self.free_cell(idx)?;
                let value = cell.borrow().clone();
                self.push(value)
            }
            Opcode::OpSetFree => {
                let idx = self.read_u8_operand()?;
                let value = self.pop()?;
                let cell = self.free_cell(idx)?;
                *cell.borrow_mut() = value;
                Ok(())
            }
            Opcode::OpCurrentClosure => {
                let closure = self.current_frame().closure.clone();
                self.push(Object::Closure(closure))
            }
            Opcode::OpCaptureLocal => {
                let idx = self.read_u8_operand()?;
                let base = self.current_frame().base_pointer;
                let slot = &mut self.stack[base + idx];
                let cell = if let Object::Cell(cell) = slot {
                    cell.clone()
                } else {
                    let cell = Rc::new(RefCell::new(slot.clone()));
                    *slot = Object::Cell(cell.clone());
                    cell
                };
                self.push(Object::Cell(cell))
            }
            Opcode::OpCaptureFree => {
                let idx = self.read_u8_operand()?;
                let cell = self.free_cell(idx)?;
                self.push(Object::Cell(cell))
            }

            Opcode::OpArray => {
                let count = self.read_u16_operand()?;
                let elements = self.stack[self.sp - count..self.sp].to_vec();
                self.sp -= count;
                self.push(Object::Array(Rc::new(elements)))
            }
            Opcode::OpMap => {
                let count = self.read_u16_operand()?;
                let mut data = MapData::with_capacity(count / 2);
                for pair in self.stack[self.sp - count..self.sp].chunks_exact(2) {
                    let key = pair[0].clone();
                    let hash_key = key
                        .hash_key()
                        .ok_or_else(|| RunError::new(format!("unusable as map key: {}", key.kind())))?;
                    data.insert(
                        hash_key,
                        MapPair {
                            key,
                            value: pair[1].clone(),
                        },
                    );
                }
                self.sp -= count;
                self.push(Object::Map(Rc::new(RefCell::new(data))))
            }
            Opcode::OpIndex => {
                let index = self.pop()?;
                let left = self.pop()?;
                let result = object::index_of(&left, &index).map_err(RunError::new)?;
                self.push(result)
            }

            Opcode::OpCall => {
                let argc = self.read_u8_operand()?;
                self.call(argc, print)
            }
            Opcode::OpReturn => {
                let value = self.pop()?;
                if self.frames.len() == 1 {
                    return Err(RunError::new("return outside function"));
                }
                let frame = self.frames.pop().expect("frame stack underflow");
                // discard the locals and the callee itself
                self.sp = frame.base_pointer - 1;
                self.push(value)
            }

            Opcode::OpGetBuiltin => {
                let idx = self.read_u8_operand()?;
                let builtin = Builtin::from_repr(idx as u8)
                    .ok_or_else(|| RunError::new(format!("no builtin at index {idx}")))?;
                self.push(Object::Builtin(builtin))
            }
            Opcode::OpClosure => {
                let const_idx = self.read_u16_operand()?;
                let n_free = self.read_u8_operand()?;
                let constant = self
                    .constants
                    .get(const_idx)
                    .cloned()
                    .ok_or_else(|| RunError::new(format!("no constant at index {const_idx}")))?;
                let Object::CompiledFunction(func) = constant else {
                    return Err(RunError::new(format!("not a function: {}", constant.kind())));
                };
                // capture instructions push cell handles, which are adopted
                // directly so the closure aliases the originating storage;
                // anything else (a self-reference) gets its own cell
                let free = self.stack[self.sp - n_free..self.sp]
                    .iter()
                    .map(|value| match value {
                        Object::Cell(cell) => cell.clone(),
                        value => Rc::new(RefCell::new(value.clone())),
                    })
                    .collect();
                self.sp -= n_free;
                self.push(Object::Closure(Rc::new(Closure { func, free })))
            }
        }
    }

    fn call(&mut self, argc: usize, print: &mut dyn PrintWriter) -> RunResult<()> {
        let callee = self.stack[self.sp - 1 - argc].clone();
        match callee {
            Object::Closure(closure) => {
                if argc != closure.func.num_params {
                    return Err(RunError::new(format!(
                        "wrong number of arguments: want={}, got={argc}",
                        closure.func.num_params
                    )));
                }
                if self.frames.len() >= MAX_FRAMES {
                    return Err(RunError::new("frame overflow"));
                }
                let base_pointer = self.sp - argc;
                if base_pointer + closure.func.num_locals > STACK_SIZE {
                    return Err(RunError::new("stack overflow"));
                }
                // arguments occupy locals 0..argc-1; the remaining local
                // slots are reset so a promoted cell left behind by an
                // earlier frame is never written through
                for slot in &mut self.stack[self.sp..base_pointer + closure.func.num_locals] {
                    *slot = Object::Null;
                }
                self.sp = base_pointer + closure.func.num_locals;
                self.frames.push(Frame::new(closure, base_pointer));
                Ok(())
            }
            Object::Builtin(builtin) => {
                let args = self.stack[self.sp - argc..self.sp].to_vec();
                let result = builtin.call(&args, print);
                self.sp = self.sp - argc - 1;
                self.push(result)
            }
            other => Err(RunError::new(format!("not callable: {}", other.kind()))),
        }
    }

    // ------------------------------------------------------------------
    // stack
    // ------------------------------------------------------------------

    fn push(&mut self, value: Object) -> RunResult<()> {
        if self.sp >= STACK_SIZE {
            return Err(RunError::new("stack overflow"));
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    /// Pops the top of stack, leaving the value in place so
    /// [`Vm::last_popped_stack_elem`] can observe it.
    fn pop(&mut self) -> RunResult<Object> {
        if self.sp == 0 {
            return Err(RunError::new("stack underflow"));
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    /// The current top of stack, if any.
    #[must_use]
    pub fn stack_top(&self) -> Option<&Object> {
        if self.sp == 0 {
            None
        } else {
            Some(&self.stack[self.sp - 1])
        }
    }

    /// The value most recently popped: what an expression statement left
    /// behind after its trailing `OpPop`.
    #[must_use]
    pub fn last_popped_stack_elem(&self) -> &Object {
        &self.stack[self.sp]
    }

    // ------------------------------------------------------------------
    // fetch
    // ------------------------------------------------------------------

    fn fetch_byte(&mut self) -> RunResult<u8> {
        let frame = self.current_frame_mut();
        let byte = frame
            .instructions()
            .bytes()
            .get(frame.ip)
            .copied()
            .ok_or_else(|| RunError::new("unexpected end of instructions"))?;
        frame.ip += 1;
        Ok(byte)
    }

    fn read_u16_operand(&mut self) -> RunResult<usize> {
        let frame = self.current_frame_mut();
        let bytes = frame
            .instructions()
            .bytes()
            .get(frame.ip..frame.ip + 2)
            .ok_or_else(|| RunError::new("unexpected end of instructions"))?;
        let value = read_u16(bytes);
        frame.ip += 2;
        Ok(usize::from(value))
    }

    fn read_u8_operand(&mut self) -> RunResult<usize> {
        self.fetch_byte().map(usize::from)
    }

    fn free_cell(&self, idx: usize) -> RunResult<Rc<RefCell<Object>>> {
        self.current_frame()
            .closure
            .free
            .get(idx)
            .cloned()
            .ok_or_else(|| RunError::new(format!("no free variable at index {idx}")))
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("VM has no frame")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("VM has no frame")
    }

    // ------------------------------------------------------------------
    // observability (REPL and debugger)
    // ------------------------------------------------------------------

    /// The live operand stack, bottom to top.
    #[must_use]
    pub fn stack_slice(&self) -> &[Object] {
        &self.stack[..self.sp]
    }

    /// Global slots holding a value, with their indices.
    pub fn defined_globals(&self) -> impl Iterator<Item = (usize, &Object)> {
        self.globals
            .iter()
            .enumerate()
            .filter(|(_, value)| !matches!(value, Object::Null))
    }

    /// The shared constant pool.
    #[must_use]
    pub fn constants(&self) -> &[Object] {
        &self.constants
    }

    /// The next byte offset the top frame will fetch.
    #[must_use]
    pub fn current_ip(&self) -> usize {
        self.current_frame().ip
    }

    /// The top frame's instruction buffer.
    #[must_use]
    pub fn current_instructions(&self) -> &Instructions {
        self.current_frame().instructions()
    }
}
