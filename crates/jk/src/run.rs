//! Convenience pipeline: source text in, value out.
//!
//! [`ExecError`] separates failures by pipeline stage so callers can handle
//! user feedback and recovery without string matching.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::{
    ast::Program,
    bytecode::{Bytecode, CompileError, Compiler, RunError, Vm},
    environment::Environment,
    evaluator::Evaluator,
    io::PrintWriter,
    lexer::Lexer,
    object::Object,
    parse::{ParseError, Parser},
};

/// A failure from any stage of executing JK source.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecError {
    /// Parsing failed; every accumulated error is included.
    Parse(Vec<ParseError>),
    /// Compilation failed after a clean parse.
    Compile(CompileError),
    /// Execution failed, in either engine.
    Runtime(RunError),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(errors) => {
                for (i, error) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{error}")?;
                }
                Ok(())
            }
            Self::Compile(error) => error.fmt(f),
            Self::Runtime(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for ExecError {}

impl From<Vec<ParseError>> for ExecError {
    fn from(errors: Vec<ParseError>) -> Self {
        Self::Parse(errors)
    }
}

impl From<CompileError> for ExecError {
    fn from(error: CompileError) -> Self {
        Self::Compile(error)
    }
}

impl From<RunError> for ExecError {
    fn from(error: RunError) -> Self {
        Self::Runtime(error)
    }
}

/// Parses source into a [`Program`], or every parse error.
pub fn parse_program(source: &str) -> Result<Program, Vec<ParseError>> {
    let mut parser = Parser::new(Lexer::new(source));
    let program = parser.parse_program();
    if parser.errors().is_empty() {
        Ok(program)
    } else {
        Err(parser.into_errors())
    }
}

/// Parses and compiles source into [`Bytecode`].
pub fn compile_source(source: &str) -> Result<Bytecode, ExecError> {
    let program = parse_program(source)?;
    let mut compiler = Compiler::new();
    compiler.compile(&program)?;
    Ok(compiler.bytecode())
}

/// Compiles and runs source on the VM, returning the last-popped value.
pub fn run_source(source: &str, print: &mut dyn PrintWriter) -> Result<Object, ExecError> {
    run_bytecode(compile_source(source)?, print)
}

/// Runs pre-compiled bytecode on the VM, returning the last-popped value.
pub fn run_bytecode(bytecode: Bytecode, print: &mut dyn PrintWriter) -> Result<Object, ExecError> {
    let mut vm = Vm::new(bytecode);
    vm.run(print)?;
    Ok(vm.last_popped_stack_elem().clone())
}

/// Runs source through the tree-walking evaluator.
pub fn interpret_source(source: &str, print: &mut dyn PrintWriter) -> Result<Object, ExecError> {
    let program = parse_program(source)?;
    let env = Rc::new(RefCell::new(Environment::new()));
    let result = Evaluator::new(print).eval_program(&program, &env);
    match result {
        Object::Error(message) => Err(ExecError::Runtime(RunError::new(message))),
        value => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::NoPrint;

    #[test]
    fn run_source_returns_the_last_popped_value() {
        let mut print = NoPrint;
        assert_eq!(run_source("1 + 2 * 3;", &mut print), Ok(Object::Integer(7)));
    }

    #[test]
    fn interpret_source_matches() {
        let mut print = NoPrint;
        assert_eq!(interpret_source("1 + 2 * 3;", &mut print), Ok(Object::Integer(7)));
    }

    #[test]
    fn parse_failures_carry_every_error() {
        let mut print = NoPrint;
        let err = run_source("let = 1; let y 2;", &mut print).unwrap_err();
        let ExecError::Parse(errors) = err else {
            panic!("expected parse error, got {err:?}");
        };
        assert!(errors.len() >= 2);
    }

    #[test]
    fn compile_failures_surface() {
        let mut print = NoPrint;
        assert!(matches!(
            run_source("return 1;", &mut print),
            Err(ExecError::Compile(CompileError::TopLevelReturn { .. }))
        ));
    }

    #[test]
    fn runtime_failures_surface_from_both_engines() {
        let mut print = NoPrint;
        assert!(matches!(
            run_source("1 + true;", &mut print),
            Err(ExecError::Runtime(_))
        ));
        assert!(matches!(
            interpret_source("1 + true;", &mut print),
            Err(ExecError::Runtime(_))
        ));
    }
}
