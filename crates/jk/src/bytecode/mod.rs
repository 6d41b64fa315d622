//! The compiled half of the toolchain.
//!
//! - `op` - the opcode table and operand widths
//! - `code` - instruction encoding, disassembly, and the `.jkb` container
//! - `symbol_table` - compile-time scope resolution and closure capture
//! - `compiler` - AST to bytecode
//! - `vm` - the stack machine
//! - `debug` - interactive instruction stepping

pub use code::{Bytecode, DecodeError, EncodeError, Instructions, make, read_operands, read_u16};
pub use compiler::{CompileError, Compiler};
pub use debug::Debugger;
pub use op::{Opcode, UnknownOpcode};
pub use symbol_table::{Symbol, SymbolScope, SymbolTable};
pub use vm::{GLOBALS_SIZE, MAX_FRAMES, RunError, STACK_SIZE, Vm};

mod code;
mod compiler;
mod debug;
mod op;
mod symbol_table;
mod vm;
