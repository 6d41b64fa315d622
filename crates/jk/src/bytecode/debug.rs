//! Interactive instruction-level stepping over a VM.
//!
//! The debugger blocks on an input line between instructions. Commands:
//! `n` next, `s` stack, `g` globals, `i` ip + listing, `c` constants,
//! `h` help. End of input ends the session.

use std::io::{BufRead, Write};

use super::vm::{RunError, Vm};
use crate::io::PrintWriter;

const HELP: &str = "\
n - execute the next instruction
s - show the live stack
g - show defined globals
i - show the instruction pointer and the current frame's listing
c - show the constant pool
h - this help
";

/// Drives a [`Vm`] one instruction at a time from a command stream.
pub struct Debugger<'vm> {
    vm: &'vm mut Vm,
}

impl<'vm> Debugger<'vm> {
    pub fn new(vm: &'vm mut Vm) -> Self {
        Self { vm }
    }

    /// Runs the debug session until the program completes or the command
    /// stream ends. Output write failures are ignored; VM failures abort.
    pub fn run(
        &mut self,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
        print: &mut dyn PrintWriter,
    ) -> Result<(), RunError> {
        let mut line = String::new();
        while self.vm.has_next_instruction() {
            let _ = write!(output, "jkdb> ");
            let _ = output.flush();
            line.clear();
            match input.read_line(&mut line) {
                Ok(0) | Err(_) => return Ok(()),
                Ok(_) => {}
            }
            match line.trim() {
                "n" => self.vm.step(print)?,
                "s" => {
                    for (i, value) in self.vm.stack_slice().iter().enumerate() {
                        let _ = writeln!(output, "{i:4}: {}", value.inspect());
                    }
                }
                "g" => {
                    for (i, value) in self.vm.defined_globals() {
                        let _ = writeln!(output, "{i:4}: {}", value.inspect());
                    }
                }
                "i" => {
                    let _ = writeln!(output, "ip = {:04}", self.vm.current_ip());
                    let _ = write!(output, "{}", self.vm.current_instructions());
                }
                "c" => {
                    for (i, constant) in self.vm.constants().iter().enumerate() {
                        let _ = writeln!(output, "{i:4}: {}", constant.inspect());
                    }
                }
                "h" => {
                    let _ = write!(output, "{HELP}");
                }
                _ => {
                    let _ = writeln!(output, "unknown command (h for help)");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::{
        bytecode::compiler::Compiler,
        io::NoPrint,
        lexer::Lexer,
        object::Object,
        parse::Parser,
    };

    fn make_vm(input: &str) -> Vm {
        let mut parser = Parser::new(Lexer::new(input));
        let program = parser.parse_program();
        assert!(parser.errors().is_empty());
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap();
        Vm::new(compiler.bytecode())
    }

    #[test]
    fn stepping_runs_to_completion() {
        let mut vm = make_vm("1 + 2;");
        let mut input = Cursor::new("n\nn\nn\nn\n");
        let mut output = Vec::new();
        let mut print = NoPrint;
        Debugger::new(&mut vm).run(&mut input, &mut output, &mut print).unwrap();
        assert_eq!(vm.last_popped_stack_elem(), &Object::Integer(3));
    }

    #[test]
    fn inspection_commands_write_output() {
        let mut vm = make_vm("let a = 5; a;");
        // step twice so the global is set, then inspect
        let mut input = Cursor::new("n\nn\ng\nc\ni\nh\nbogus\ns\n");
        let mut output = Vec::new();
        let mut print = NoPrint;
        Debugger::new(&mut vm).run(&mut input, &mut output, &mut print).unwrap();
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("jkdb>"));
        assert!(text.contains("   0: 5"), "output: {text}");
        assert!(text.contains("ip ="), "output: {text}");
        assert!(text.contains("OpConstant"), "output: {text}");
        assert!(text.contains("unknown command"), "output: {text}");
    }

    #[test]
    fn eof_ends_the_session() {
        let mut vm = make_vm("1;");
        let mut input = Cursor::new("");
        let mut output = Vec::new();
        let mut print = NoPrint;
        Debugger::new(&mut vm).run(&mut input, &mut output, &mut print).unwrap();
        // nothing executed
        assert!(vm.has_next_instruction());
    }
}
