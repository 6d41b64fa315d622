//! Persistent REPL sessions.
//!
//! A [`ReplSession`] keeps the root symbol table, the constant pool, and the
//! global store alive across inputs, so a name defined on one line resolves
//! on the next. Each input runs through the compiler+VM pipeline.

use crate::{
    bytecode::{Compiler, GLOBALS_SIZE, SymbolTable, Vm},
    io::PrintWriter,
    object::Object,
    run::{ExecError, parse_program},
};

/// The interactive prompt.
pub const PROMPT: &str = ">> ";

/// Compiler and VM state carried across REPL inputs.
pub struct ReplSession {
    symbol_table: SymbolTable,
    constants: Vec<Object>,
    globals: Vec<Object>,
}

impl Default for ReplSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            symbol_table: SymbolTable::new(),
            constants: Vec::new(),
            globals: vec![Object::Null; GLOBALS_SIZE],
        }
    }

    /// Parses, compiles, and runs one input, returning its last-popped value.
    ///
    /// Definitions persist: globals stay in the session's store and the
    /// symbol table and constant pool carry over to the next call.
    pub fn execute(&mut self, line: &str, print: &mut dyn PrintWriter) -> Result<Object, ExecError> {
        let program = parse_program(line)?;

        let symbol_table = std::mem::take(&mut self.symbol_table);
        let constants = std::mem::take(&mut self.constants);
        let mut compiler = Compiler::with_state(symbol_table, constants);
        let compiled = compiler.compile(&program);
        let bytecode = compiler.bytecode();
        (self.symbol_table, self.constants) = compiler.into_state();
        compiled?;

        let mut vm = Vm::with_globals(bytecode, std::mem::take(&mut self.globals));
        let ran = vm.run(print);
        let result = vm.last_popped_stack_elem().clone();
        self.globals = vm.into_globals();
        ran?;
        Ok(result)
    }
}
