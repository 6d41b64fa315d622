//! Single-pass AST → bytecode compiler.
//!
//! The compiler keeps a stack of compilation scopes, one per function being
//! compiled, each with its own instruction buffer, the last two emitted
//! instructions (so `if` branches can drop a trailing `OpPop` without
//! scanning the buffer), the active loop's start position for `continue`,
//! and the pending `break` jumps awaiting a back-patch.
//!
//! Every expression form nets exactly one stack slot, so the
//! expression-statement rule — emit the expression, then `OpPop` — keeps the
//! stack balanced everywhere: `if` branches lose their trailing pop or gain
//! an `OpNull`, and loops push `OpNull` at exit.

use std::{fmt, rc::Rc};

use super::{
    code::{Bytecode, Instructions, make},
    op::Opcode,
    symbol_table::{Symbol, SymbolScope, SymbolTable},
};
use crate::{
    ast::{BlockStatement, Expression, FunctionLiteral, InfixOp, PrefixOp, Program, Statement},
    builtins::Builtin,
    object::{CompiledFunction, Object},
};

/// A compile-stage failure. Compilation aborts on the first one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    UnresolvedIdentifier { name: String, line: usize },
    TopLevelReturn { line: usize },
    BreakOutsideLoop { line: usize },
    ContinueOutsideLoop { line: usize },
    NotAssignable { name: String, line: usize },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedIdentifier { name, line } => {
                write!(f, "compile error at line {line}: undefined identifier: {name}")
            }
            Self::TopLevelReturn { line } => {
                write!(f, "compile error at line {line}: return outside function")
            }
            Self::BreakOutsideLoop { line } => {
                write!(f, "compile error at line {line}: break outside loop")
            }
            Self::ContinueOutsideLoop { line } => {
                write!(f, "compile error at line {line}: continue outside loop")
            }
            Self::NotAssignable { name, line } => {
                write!(f, "compile error at line {line}: cannot assign to {name}")
            }
        }
    }
}

impl std::error::Error for CompileError {}

type CompileResult = Result<(), CompileError>;

/// The last or next-to-last instruction emitted in a scope.
#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

/// Per-function compilation state.
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
    /// Jump target for `continue` in the innermost active loop.
    loop_start: Option<usize>,
    /// Emitted `break` jumps awaiting the loop-end back-patch.
    break_positions: Vec<usize>,
}

/// Compiles a [`Program`] into [`Bytecode`].
///
/// State (the symbol table and constant pool) can be threaded across runs
/// with [`Compiler::with_state`]/[`Compiler::into_state`], which is how the
/// REPL keeps definitions visible line to line.
#[derive(Debug)]
pub struct Compiler {
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(SymbolTable::new(), Vec::new())
    }

    /// A compiler resuming from previous state.
    #[must_use]
    pub fn with_state(symbol_table: SymbolTable, constants: Vec<Object>) -> Self {
        Self {
            constants,
            symbol_table,
            scopes: vec![CompilationScope::default()],
        }
    }

    /// Releases the symbol table and constant pool for reuse.
    #[must_use]
    pub fn into_state(self) -> (SymbolTable, Vec<Object>) {
        (self.symbol_table, self.constants)
    }

    /// Compiles a program into the main scope.
    pub fn compile(&mut self, program: &Program) -> CompileResult {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    /// The compiled output. Constant indices are stable across a single
    /// compile run.
    #[must_use]
    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.scopes[0].instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn compile_statement(&mut self, statement: &Statement) -> CompileResult {
        match statement {
            Statement::Let { name, value, .. } | Statement::Define { name, value, .. } => {
                self.compile_expression(value)?;
                let symbol = self.symbol_table.define(&name.value);
                self.emit_set(&symbol);
                Ok(())
            }
            Statement::Reassign { token, name, value } => {
                let Some(symbol) = self.symbol_table.resolve(&name.value) else {
                    return Err(CompileError::UnresolvedIdentifier {
                        name: name.value.clone(),
                        line: token.line,
                    });
                };
                if symbol.scope == SymbolScope::Function {
                    return Err(CompileError::NotAssignable {
                        name: name.value.clone(),
                        line: token.line,
                    });
                }
                self.compile_expression(value)?;
                self.emit_set(&symbol);
                Ok(())
            }
            Statement::Func { name, func, .. } => {
                self.compile_function_literal(func)?;
                let symbol = self.symbol_table.define(&name.value);
                self.emit_set(&symbol);
                Ok(())
            }
            Statement::Return { token, value } => {
                if self.scopes.len() == 1 {
                    return Err(CompileError::TopLevelReturn { line: token.line });
                }
                self.compile_expression(value)?;
                self.emit(Opcode::OpReturn, &[]);
                Ok(())
            }
            Statement::Continue { token } => {
                let Some(start) = self.scope().loop_start else {
                    return Err(CompileError::ContinueOutsideLoop { line: token.line });
                };
                self.emit(Opcode::OpJump, &[start]);
                Ok(())
            }
            Statement::Break { token } => {
                if self.scope().loop_start.is_none() {
                    return Err(CompileError::BreakOutsideLoop { line: token.line });
                }
                let position = self.emit(Opcode::OpJump, &[0]);
                self.scope_mut().break_positions.push(position);
                Ok(())
            }
            Statement::Block(block) => self.compile_block(block),
            Statement::Expression { expression, .. } => {
                // comments compile to nothing
                if matches!(expression, Expression::Comment { .. }) {
                    return Ok(());
                }
                self.compile_expression(expression)?;
                self.emit(Opcode::OpPop, &[]);
                Ok(())
            }
        }
    }

    fn compile_block(&mut self, block: &BlockStatement) -> CompileResult {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    /// Compiles a block in value position: the branch of an `if`. The block
    /// must leave exactly one value, so a trailing `OpPop` is removed and a
    /// block that produced nothing gains an `OpNull`.
    fn compile_branch(&mut self, block: &BlockStatement) -> CompileResult {
        let before = self.current_position();
        self.compile_block(block)?;
        if self.last_instruction_is(Opcode::OpPop) {
            self.remove_last_instruction();
        } else if !self.ends_in_value(before) {
            self.emit(Opcode::OpNull, &[]);
        }
        Ok(())
    }

    /// Whether the code emitted since `before` ends by pushing a value that
    /// is still on the stack (a branch ending in `return`, `break`, or
    /// `continue` never falls through, so it needs no value either).
    fn ends_in_value(&self, before: usize) -> bool {
        if self.current_position() == before {
            return false;
        }
        matches!(
            self.scope().last,
            Some(EmittedInstruction {
                opcode: Opcode::OpReturn | Opcode::OpJump,
                ..
            })
        )
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn compile_expression(&mut self, expression: &Expression) -> CompileResult {
        match expression {
            Expression::Identifier(ident) => {
                if let Some(symbol) = self.symbol_table.resolve(&ident.value) {
                    self.load_symbol(&symbol);
                    return Ok(());
                }
                // fall back to the builtin table
                if let Some(builtin) = Builtin::lookup(&ident.value) {
                    self.emit(Opcode::OpGetBuiltin, &[usize::from(builtin.index())]);
                    return Ok(());
                }
                Err(CompileError::UnresolvedIdentifier {
                    name: ident.value.clone(),
                    line: ident.token.line,
                })
            }
            Expression::Integer { value, .. } => {
                let idx = self.add_constant(Object::Integer(*value));
                self.emit(Opcode::OpConstant, &[idx]);
                Ok(())
            }
            Expression::Float { value, .. } => {
                let idx = self.add_constant(Object::Float(*value));
                self.emit(Opcode::OpConstant, &[idx]);
                Ok(())
            }
            Expression::Str { value, .. } => {
                let idx = self.add_constant(Object::Str(value.as_str().into()));
                self.emit(Opcode::OpConstant, &[idx]);
                Ok(())
            }
            Expression::Boolean { value, .. } => {
                self.emit(if *value { Opcode::OpTrue } else { Opcode::OpFalse }, &[]);
                Ok(())
            }
            Expression::Comment { .. } => Ok(()),
            Expression::Prefix { op, right, .. } => {
                self.compile_expression(right)?;
                self.emit(
                    match op {
                        PrefixOp::Bang => Opcode::OpBang,
                        PrefixOp::Minus => Opcode::OpMinus,
                    },
                    &[],
                );
                Ok(())
            }
            Expression::Infix { op, left, right, .. } => self.compile_infix(*op, left, right),
            Expression::If {
                condition,
                consequence,
                alternative,
                ..
            } => self.compile_if(condition, consequence, alternative.as_ref()),
            Expression::While { condition, body, .. } => self.compile_while(condition, body),
            Expression::For {
                init,
                condition,
                post,
                body,
                ..
            } => self.compile_for(init, condition, post, body),
            Expression::Function(func) => self.compile_function_literal(func),
            Expression::Call {
                function, arguments, ..
            } => {
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::OpCall, &[arguments.len()]);
                Ok(())
            }
            Expression::Index { left, index, .. } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::OpIndex, &[]);
                Ok(())
            }
            Expression::Array { elements, .. } => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::OpArray, &[elements.len()]);
                Ok(())
            }
            Expression::Map { pairs, .. } => {
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::OpMap, &[pairs.len() * 2]);
                Ok(())
            }
        }
    }

    /// `<` and `<=` compile as the swapped `>` family: compile right first,
    /// then left, and emit `OpGT`/`OpGTE`. This halves the comparison opcode
    /// space.
    fn compile_infix(&mut self, op: InfixOp, left: &Expression, right: &Expression) -> CompileResult {
        if matches!(op, InfixOp::Lt | InfixOp::Lte) {
            self.compile_expression(right)?;
            self.compile_expression(left)?;
            self.emit(
                if op == InfixOp::Lt { Opcode::OpGt } else { Opcode::OpGte },
                &[],
            );
            return Ok(());
        }

        self.compile_expression(left)?;
        self.compile_expression(right)?;
        let opcode = match op {
            InfixOp::Add => Opcode::OpAdd,
            InfixOp::Sub => Opcode::OpSub,
            InfixOp::Mul => Opcode::OpMult,
            InfixOp::Div => Opcode::OpDiv,
            InfixOp::Mod => Opcode::OpMod,
            InfixOp::Eq => Opcode::OpEq,
            InfixOp::NotEq => Opcode::OpNotEq,
            InfixOp::Gt => Opcode::OpGt,
            InfixOp::Gte => Opcode::OpGte,
            InfixOp::Lt | InfixOp::Lte => unreachable!("handled by the swap above"),
        };
        self.emit(opcode, &[]);
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expression,
        consequence: &BlockStatement,
        alternative: Option<&BlockStatement>,
    ) -> CompileResult {
        self.compile_expression(condition)?;
        let jump_not_truthy = self.emit(Opcode::OpJumpNotTruthy, &[0]);

        self.compile_branch(consequence)?;
        let jump_over_else = self.emit(Opcode::OpJump, &[0]);

        self.patch_jump(jump_not_truthy);
        match alternative {
            Some(alternative) => self.compile_branch(alternative)?,
            None => {
                self.emit(Opcode::OpNull, &[]);
            }
        }
        self.patch_jump(jump_over_else);
        Ok(())
    }

    fn compile_while(&mut self, condition: &Expression, body: &BlockStatement) -> CompileResult {
        let start = self.current_position();
        let saved = self.enter_loop(start);

        self.compile_expression(condition)?;
        let jump_not_truthy = self.emit(Opcode::OpJumpNotTruthy, &[0]);
        self.compile_block(body)?;
        self.emit(Opcode::OpJump, &[start]);

        self.patch_jump(jump_not_truthy);
        self.leave_loop(saved);
        // the loop's value
        self.emit(Opcode::OpNull, &[]);
        Ok(())
    }

    /// Lowered as `init; jump COND; INC: post; COND: cond; JNT END; body;
    /// jump INC; END`. `continue` targets INC, so the post statement always
    /// runs between iterations.
    fn compile_for(
        &mut self,
        init: &Statement,
        condition: &Expression,
        post: &Statement,
        body: &BlockStatement,
    ) -> CompileResult {
        self.compile_statement(init)?;
        let jump_to_cond = self.emit(Opcode::OpJump, &[0]);
        let inc = self.current_position();
        self.compile_statement(post)?;
        self.patch_jump(jump_to_cond);

        let saved = self.enter_loop(inc);
        self.compile_expression(condition)?;
        let jump_not_truthy = self.emit(Opcode::OpJumpNotTruthy, &[0]);
        self.compile_block(body)?;
        self.emit(Opcode::OpJump, &[inc]);

        self.patch_jump(jump_not_truthy);
        self.leave_loop(saved);
        self.emit(Opcode::OpNull, &[]);
        Ok(())
    }

    fn compile_function_literal(&mut self, func: &FunctionLiteral) -> CompileResult {
        self.enter_scope();
        if let Some(name) = &func.name {
            self.symbol_table.define_function_name(name);
        }
        for parameter in &func.parameters {
            self.symbol_table.define(&parameter.value);
        }

        self.compile_block(&func.body)?;
        if !self.last_instruction_is(Opcode::OpReturn) {
            self.emit(Opcode::OpNull, &[]);
            self.emit(Opcode::OpReturn, &[]);
        }

        let free_symbols = std::mem::take(&mut self.symbol_table.free_symbols);
        let num_locals = self.symbol_table.num_definitions;
        let instructions = self.leave_scope();

        // push the captured cell handles, in promotion order, for OpClosure
        for symbol in &free_symbols {
            self.load_capture(symbol);
        }

        let idx = self.add_constant(Object::CompiledFunction(Rc::new(CompiledFunction {
            instructions,
            num_locals,
            num_params: func.parameters.len(),
        })));
        self.emit(Opcode::OpClosure, &[idx, free_symbols.len()]);
        Ok(())
    }

    // ------------------------------------------------------------------
    // emission
    // ------------------------------------------------------------------

    /// Appends an encoded instruction and returns its offset.
    fn emit(&mut self, op: Opcode, operands: &[usize]) -> usize {
        let position = self.scope_mut().instructions.push(&make(op, operands));
        let scope = self.scope_mut();
        scope.previous = scope.last;
        scope.last = Some(EmittedInstruction { opcode: op, position });
        position
    }

    fn emit_set(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::OpSetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::OpSetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::OpSetFree, &[symbol.index]),
            SymbolScope::Function => unreachable!("function names are rejected before emission"),
        };
    }

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::OpGetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::OpGetLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::OpGetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(Opcode::OpCurrentClosure, &[]),
        };
    }

    /// Pushes the capture handle for `symbol` ahead of an `OpClosure`.
    ///
    /// A captured local is promoted to a shared cell in place, so the
    /// enclosing frame's slot and the new closure alias the same storage and
    /// `OpSetFree` keeps the originating slot in sync with one write.
    fn load_capture(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Local => self.emit(Opcode::OpCaptureLocal, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::OpCaptureFree, &[symbol.index]),
            SymbolScope::Function => self.emit(Opcode::OpCurrentClosure, &[]),
            SymbolScope::Global => unreachable!("globals are never promoted to free variables"),
        };
    }

    /// Rewrites the u16 operand of the jump at `position` to point here.
    fn patch_jump(&mut self, position: usize) {
        let target = self.current_position();
        self.scope_mut().instructions.replace_operands(position, &[target]);
    }

    fn add_constant(&mut self, constant: Object) -> usize {
        self.constants.push(constant);
        let idx = self.constants.len() - 1;
        // the OpConstant operand is a u16
        let _ = u16::try_from(idx).expect("constant pool exceeds u16 range; too many constants");
        idx
    }

    fn last_instruction_is(&self, op: Opcode) -> bool {
        self.scope().last.is_some_and(|last| last.opcode == op)
    }

    fn remove_last_instruction(&mut self) {
        let scope = self.scope_mut();
        if let Some(last) = scope.last {
            scope.instructions = Instructions::from_bytes(scope.instructions.bytes()[..last.position].to_vec());
            scope.last = scope.previous;
            scope.previous = None;
        }
    }

    fn current_position(&self) -> usize {
        self.scope().instructions.len()
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::enclosed(Box::new(outer));
    }

    fn leave_scope(&mut self) -> Instructions {
        let scope = self.scopes.pop().expect("scope stack underflow");
        let outer = self
            .symbol_table
            .take_outer()
            .expect("leaving a scope with no enclosing symbol table");
        self.symbol_table = *outer;
        scope.instructions
    }

    /// Starts a loop at `start`, saving the enclosing loop's patch state.
    fn enter_loop(&mut self, start: usize) -> (Option<usize>, Vec<usize>) {
        let scope = self.scope_mut();
        let saved_start = scope.loop_start.replace(start);
        let saved_breaks = std::mem::take(&mut scope.break_positions);
        (saved_start, saved_breaks)
    }

    /// Ends a loop: patches every pending `break` to land here and restores
    /// the enclosing loop's state.
    fn leave_loop(&mut self, saved: (Option<usize>, Vec<usize>)) {
        let pending = std::mem::take(&mut self.scope_mut().break_positions);
        for position in pending {
            self.patch_jump(position);
        }
        let scope = self.scope_mut();
        scope.loop_start = saved.0;
        scope.break_positions = saved.1;
    }

    fn scope(&self) -> &CompilationScope {
        self.scopes.last().expect("compiler has no scope")
    }

    fn scope_mut(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("compiler has no scope")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{lexer::Lexer, parse::Parser};

    fn compile(input: &str) -> Bytecode {
        let mut parser = Parser::new(Lexer::new(input));
        let program = parser.parse_program();
        assert!(parser.errors().is_empty(), "parse errors: {:?}", parser.errors());
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap_or_else(|err| panic!("compile error for {input:?}: {err}"));
        compiler.bytecode()
    }

    fn compile_err(input: &str) -> CompileError {
        let mut parser = Parser::new(Lexer::new(input));
        let program = parser.parse_program();
        assert!(parser.errors().is_empty(), "parse errors: {:?}", parser.errors());
        let mut compiler = Compiler::new();
        compiler.compile(&program).expect_err("expected compile error")
    }

    /// Flattens expected instructions for comparison against the buffer.
    fn concat(instructions: &[Vec<u8>]) -> Instructions {
        let mut out = Instructions::new();
        for ins in instructions {
            out.push(ins);
        }
        out
    }

    fn assert_instructions(input: &str, expected: &[Vec<u8>]) {
        let bytecode = compile(input);
        assert_eq!(
            bytecode.instructions.to_string(),
            concat(expected).to_string(),
            "input: {input}"
        );
    }

    fn assert_constants(input: &str, expected: &[Object]) {
        let bytecode = compile(input);
        assert_eq!(bytecode.constants, expected, "input: {input}");
    }

    use Opcode::*;

    #[test]
    fn integer_arithmetic() {
        assert_instructions(
            "1 + 2;",
            &[
                make(OpConstant, &[0]),
                make(OpConstant, &[1]),
                make(OpAdd, &[]),
                make(OpPop, &[]),
            ],
        );
        assert_constants("1 + 2;", &[Object::Integer(1), Object::Integer(2)]);
        assert_instructions(
            "1; 2;",
            &[
                make(OpConstant, &[0]),
                make(OpPop, &[]),
                make(OpConstant, &[1]),
                make(OpPop, &[]),
            ],
        );
        assert_instructions(
            "1 - 2;",
            &[make(OpConstant, &[0]), make(OpConstant, &[1]), make(OpSub, &[]), make(OpPop, &[])],
        );
        assert_instructions(
            "1 * 2;",
            &[make(OpConstant, &[0]), make(OpConstant, &[1]), make(OpMult, &[]), make(OpPop, &[])],
        );
        assert_instructions(
            "2 / 1;",
            &[make(OpConstant, &[0]), make(OpConstant, &[1]), make(OpDiv, &[]), make(OpPop, &[])],
        );
        assert_instructions(
            "2 % 1;",
            &[make(OpConstant, &[0]), make(OpConstant, &[1]), make(OpMod, &[]), make(OpPop, &[])],
        );
        assert_instructions("-1;", &[make(OpConstant, &[0]), make(OpMinus, &[]), make(OpPop, &[])]);
    }

    #[test]
    fn float_constants() {
        assert_constants("1.5 + 2.5;", &[Object::Float(1.5), Object::Float(2.5)]);
    }

    #[test]
    fn boolean_expressions() {
        assert_instructions("true;", &[make(OpTrue, &[]), make(OpPop, &[])]);
        assert_instructions("false;", &[make(OpFalse, &[]), make(OpPop, &[])]);
        assert_instructions(
            "1 > 2;",
            &[make(OpConstant, &[0]), make(OpConstant, &[1]), make(OpGt, &[]), make(OpPop, &[])],
        );
        assert_instructions(
            "1 >= 2;",
            &[make(OpConstant, &[0]), make(OpConstant, &[1]), make(OpGte, &[]), make(OpPop, &[])],
        );
        assert_instructions(
            "1 == 2;",
            &[make(OpConstant, &[0]), make(OpConstant, &[1]), make(OpEq, &[]), make(OpPop, &[])],
        );
        assert_instructions(
            "1 != 2;",
            &[make(OpConstant, &[0]), make(OpConstant, &[1]), make(OpNotEq, &[]), make(OpPop, &[])],
        );
        assert_instructions("!true;", &[make(OpTrue, &[]), make(OpBang, &[]), make(OpPop, &[])]);
    }

    #[test]
    fn less_than_compiles_as_swapped_greater_than() {
        // `1 < 2` compiles right-then-left with OpGT
        let bytecode = compile("1 < 2;");
        assert_eq!(bytecode.constants, vec![Object::Integer(2), Object::Integer(1)]);
        assert_eq!(
            bytecode.instructions.to_string(),
            concat(&[
                make(OpConstant, &[0]),
                make(OpConstant, &[1]),
                make(OpGt, &[]),
                make(OpPop, &[]),
            ])
            .to_string()
        );
        let bytecode = compile("1 <= 2;");
        assert_eq!(bytecode.constants, vec![Object::Integer(2), Object::Integer(1)]);
        assert!(bytecode.instructions.to_string().contains("OpGTE"));
    }

    #[test]
    fn conditionals() {
        // 0000 OpTrue
        // 0001 OpJumpNotTruthy 10
        // 0004 OpConstant 0
        // 0007 OpJump 11
        // 0010 OpNull
        // 0011 OpPop
        // 0012 OpConstant 1
        // 0015 OpPop
        assert_instructions(
            "if true { 10 } 3333;",
            &[
                make(OpTrue, &[]),
                make(OpJumpNotTruthy, &[10]),
                make(OpConstant, &[0]),
                make(OpJump, &[11]),
                make(OpNull, &[]),
                make(OpPop, &[]),
                make(OpConstant, &[1]),
                make(OpPop, &[]),
            ],
        );
        // 0000 OpTrue
        // 0001 OpJumpNotTruthy 10
        // 0004 OpConstant 0
        // 0007 OpJump 13
        // 0010 OpConstant 1
        // 0013 OpPop
        // 0014 OpConstant 2
        // 0017 OpPop
        assert_instructions(
            "if true { 10 } else { 20 } 3333;",
            &[
                make(OpTrue, &[]),
                make(OpJumpNotTruthy, &[10]),
                make(OpConstant, &[0]),
                make(OpJump, &[13]),
                make(OpConstant, &[1]),
                make(OpPop, &[]),
                make(OpConstant, &[2]),
                make(OpPop, &[]),
            ],
        );
    }

    #[test]
    fn branch_ending_in_let_yields_null() {
        assert_instructions(
            "if true { let a = 1; };",
            &[
                make(OpTrue, &[]),
                make(OpJumpNotTruthy, &[14]),
                make(OpConstant, &[0]),
                make(OpSetGlobal, &[0]),
                make(OpNull, &[]),
                make(OpJump, &[15]),
                make(OpNull, &[]),
                make(OpPop, &[]),
            ],
        );
    }

    #[test]
    fn global_let_statements() {
        assert_instructions(
            "let one = 1; let two = 2;",
            &[
                make(OpConstant, &[0]),
                make(OpSetGlobal, &[0]),
                make(OpConstant, &[1]),
                make(OpSetGlobal, &[1]),
            ],
        );
        assert_instructions(
            "let one = 1; one;",
            &[
                make(OpConstant, &[0]),
                make(OpSetGlobal, &[0]),
                make(OpGetGlobal, &[0]),
                make(OpPop, &[]),
            ],
        );
        assert_instructions(
            "one := 1; let two = one; two;",
            &[
                make(OpConstant, &[0]),
                make(OpSetGlobal, &[0]),
                make(OpGetGlobal, &[0]),
                make(OpSetGlobal, &[1]),
                make(OpGetGlobal, &[1]),
                make(OpPop, &[]),
            ],
        );
    }

    #[test]
    fn global_reassignment() {
        assert_instructions(
            "let a = 1; a = 2;",
            &[
                make(OpConstant, &[0]),
                make(OpSetGlobal, &[0]),
                make(OpConstant, &[1]),
                make(OpSetGlobal, &[0]),
            ],
        );
    }

    #[test]
    fn string_expressions() {
        assert_constants(r#""banana";"#, &[Object::Str("banana".into())]);
        assert_instructions(
            r#""mon" + "key";"#,
            &[make(OpConstant, &[0]), make(OpConstant, &[1]), make(OpAdd, &[]), make(OpPop, &[])],
        );
    }

    #[test]
    fn array_literals() {
        assert_instructions("[];", &[make(OpArray, &[0]), make(OpPop, &[])]);
        assert_instructions(
            "[1, 2, 3];",
            &[
                make(OpConstant, &[0]),
                make(OpConstant, &[1]),
                make(OpConstant, &[2]),
                make(OpArray, &[3]),
                make(OpPop, &[]),
            ],
        );
    }

    #[test]
    fn map_literals() {
        assert_instructions("{};", &[make(OpMap, &[0]), make(OpPop, &[])]);
        assert_instructions(
            "{ 1: 2, 3: 4, 5: 6 };",
            &[
                make(OpConstant, &[0]),
                make(OpConstant, &[1]),
                make(OpConstant, &[2]),
                make(OpConstant, &[3]),
                make(OpConstant, &[4]),
                make(OpConstant, &[5]),
                make(OpMap, &[6]),
                make(OpPop, &[]),
            ],
        );
        // constants come out in source order
        assert_constants(
            "{ 1: 2, 3: 4 };",
            &[
                Object::Integer(1),
                Object::Integer(2),
                Object::Integer(3),
                Object::Integer(4),
            ],
        );
    }

    #[test]
    fn index_expressions() {
        assert_instructions(
            "[1, 2][1];",
            &[
                make(OpConstant, &[0]),
                make(OpConstant, &[1]),
                make(OpArray, &[2]),
                make(OpConstant, &[2]),
                make(OpIndex, &[]),
                make(OpPop, &[]),
            ],
        );
    }

    #[test]
    fn functions_and_calls() {
        let bytecode = compile("fn five() { return 5; } five();");
        // constant 0 is the integer, constant 1 the compiled function
        let Object::CompiledFunction(func) = &bytecode.constants[1] else {
            panic!("expected compiled function, got {:?}", bytecode.constants[1]);
        };
        assert_eq!(func.num_params, 0);
        assert_eq!(func.num_locals, 0);
        assert_eq!(
            func.instructions.to_string(),
            concat(&[make(OpConstant, &[0]), make(OpReturn, &[])]).to_string()
        );
        assert_eq!(
            bytecode.instructions.to_string(),
            concat(&[
                make(OpClosure, &[1, 0]),
                make(OpSetGlobal, &[0]),
                make(OpGetGlobal, &[0]),
                make(OpCall, &[0]),
                make(OpPop, &[]),
            ])
            .to_string()
        );
    }

    #[test]
    fn function_without_return_yields_null() {
        let bytecode = compile("fn f() { 5; } ");
        let Object::CompiledFunction(func) = &bytecode.constants[1] else {
            panic!("expected compiled function");
        };
        assert_eq!(
            func.instructions.to_string(),
            concat(&[
                make(OpConstant, &[0]),
                make(OpPop, &[]),
                make(OpNull, &[]),
                make(OpReturn, &[]),
            ])
            .to_string()
        );
    }

    #[test]
    fn function_parameters_become_locals() {
        let bytecode = compile("fn add(a, b) { return a + b; } add(1, 2);");
        let Object::CompiledFunction(func) = &bytecode.constants[0] else {
            panic!("expected compiled function");
        };
        assert_eq!(func.num_params, 2);
        assert_eq!(func.num_locals, 2);
        assert_eq!(
            func.instructions.to_string(),
            concat(&[
                make(OpGetLocal, &[0]),
                make(OpGetLocal, &[1]),
                make(OpAdd, &[]),
                make(OpReturn, &[]),
            ])
            .to_string()
        );
        assert_eq!(
            bytecode.instructions.to_string(),
            concat(&[
                make(OpClosure, &[0, 0]),
                make(OpSetGlobal, &[0]),
                make(OpGetGlobal, &[0]),
                make(OpConstant, &[1]),
                make(OpConstant, &[2]),
                make(OpCall, &[2]),
                make(OpPop, &[]),
            ])
            .to_string()
        );
    }

    #[test]
    fn let_inside_function_is_local() {
        let bytecode = compile("fn f() { let n = 55; return n; }");
        let Object::CompiledFunction(func) = &bytecode.constants[1] else {
            panic!("expected compiled function");
        };
        assert_eq!(func.num_locals, 1);
        assert_eq!(
            func.instructions.to_string(),
            concat(&[
                make(OpConstant, &[0]),
                make(OpSetLocal, &[0]),
                make(OpGetLocal, &[0]),
                make(OpReturn, &[]),
            ])
            .to_string()
        );
    }

    #[test]
    fn builtins_compile_to_get_builtin() {
        assert_instructions(
            "len([]);",
            &[
                make(OpGetBuiltin, &[3]),
                make(OpArray, &[0]),
                make(OpCall, &[1]),
                make(OpPop, &[]),
            ],
        );
        assert_instructions(
            "print(1);",
            &[
                make(OpGetBuiltin, &[5]),
                make(OpConstant, &[0]),
                make(OpCall, &[1]),
                make(OpPop, &[]),
            ],
        );
    }

    #[test]
    fn closures_capture_free_variables() {
        let bytecode = compile("fn outer(a) { return fn(b) { return a + b; }; }");
        // constant 0: the inner function, constant 1: the outer
        let Object::CompiledFunction(inner) = &bytecode.constants[0] else {
            panic!("expected compiled function");
        };
        assert_eq!(
            inner.instructions.to_string(),
            concat(&[
                make(OpGetFree, &[0]),
                make(OpGetLocal, &[0]),
                make(OpAdd, &[]),
                make(OpReturn, &[]),
            ])
            .to_string()
        );
        let Object::CompiledFunction(outer) = &bytecode.constants[1] else {
            panic!("expected compiled function");
        };
        // the outer function promotes its local to a cell before OpClosure
        assert_eq!(
            outer.instructions.to_string(),
            concat(&[make(OpCaptureLocal, &[0]), make(OpClosure, &[0, 1]), make(OpReturn, &[])]).to_string()
        );
    }

    #[test]
    fn nested_closures_chain_free_variables() {
        let bytecode = compile("fn f(a) { return fn(b) { return fn(c) { return a + b + c; }; }; }");
        let Object::CompiledFunction(innermost) = &bytecode.constants[0] else {
            panic!("expected compiled function");
        };
        assert_eq!(
            innermost.instructions.to_string(),
            concat(&[
                make(OpGetFree, &[0]),
                make(OpGetFree, &[1]),
                make(OpAdd, &[]),
                make(OpGetLocal, &[0]),
                make(OpAdd, &[]),
                make(OpReturn, &[]),
            ])
            .to_string()
        );
        let Object::CompiledFunction(middle) = &bytecode.constants[1] else {
            panic!("expected compiled function");
        };
        // the middle function forwards its own cell and promotes its local
        assert_eq!(
            middle.instructions.to_string(),
            concat(&[
                make(OpCaptureFree, &[0]),
                make(OpCaptureLocal, &[0]),
                make(OpClosure, &[0, 2]),
                make(OpReturn, &[]),
            ])
            .to_string()
        );
    }

    #[test]
    fn free_variable_reassignment_emits_set_free() {
        // one OpSetFree suffices: the write goes through the shared cell,
        // which is the same storage the enclosing frame's slot was promoted to
        let bytecode = compile("fn acc(a) { s := 0; return fn() { s = s + a; return s; }; }");
        let Object::CompiledFunction(inner) = &bytecode.constants[1] else {
            panic!("expected compiled function, got {:?}", bytecode.constants[1]);
        };
        assert_eq!(
            inner.instructions.to_string(),
            concat(&[
                make(OpGetFree, &[0]),
                make(OpGetFree, &[1]),
                make(OpAdd, &[]),
                make(OpSetFree, &[0]),
                make(OpGetFree, &[0]),
                make(OpReturn, &[]),
            ])
            .to_string()
        );
    }

    #[test]
    fn recursive_function_uses_current_closure() {
        let bytecode = compile("fn countdown(x) { return countdown(x - 1); } countdown(1);");
        let Object::CompiledFunction(func) = &bytecode.constants[1] else {
            panic!("expected compiled function");
        };
        assert_eq!(
            func.instructions.to_string(),
            concat(&[
                make(OpCurrentClosure, &[]),
                make(OpGetLocal, &[0]),
                make(OpConstant, &[0]),
                make(OpSub, &[]),
                make(OpCall, &[1]),
                make(OpReturn, &[]),
            ])
            .to_string()
        );
    }

    #[test]
    fn while_loop_layout() {
        // 0006 is the loop start (condition re-evaluation); 0029 the exit
        assert_instructions(
            "let a = 0; while a < 10 { a = a + 1; }",
            &[
                make(OpConstant, &[0]),
                make(OpSetGlobal, &[0]),
                // condition: 10 > a
                make(OpConstant, &[1]),
                make(OpGetGlobal, &[0]),
                make(OpGt, &[]),
                make(OpJumpNotTruthy, &[29]),
                // body
                make(OpGetGlobal, &[0]),
                make(OpConstant, &[2]),
                make(OpAdd, &[]),
                make(OpSetGlobal, &[0]),
                make(OpJump, &[6]),
                // loop exit value, then the statement pop
                make(OpNull, &[]),
                make(OpPop, &[]),
            ],
        );
    }

    #[test]
    fn break_patches_to_loop_end() {
        assert_instructions(
            "while true { break; }",
            &[
                make(OpTrue, &[]),
                make(OpJumpNotTruthy, &[10]),
                make(OpJump, &[10]),
                make(OpJump, &[0]),
                make(OpNull, &[]),
                make(OpPop, &[]),
            ],
        );
    }

    #[test]
    fn continue_jumps_to_loop_start() {
        assert_instructions(
            "while true { continue; }",
            &[
                make(OpTrue, &[]),
                make(OpJumpNotTruthy, &[10]),
                make(OpJump, &[0]),
                make(OpJump, &[0]),
                make(OpNull, &[]),
                make(OpPop, &[]),
            ],
        );
    }

    #[test]
    fn for_loop_layout() {
        // init; jump COND; INC: post; COND: cond; JNT END; body; jump INC; END: null
        assert_instructions(
            "for i := 0; i < 3; i = i + 1 { i; }",
            &[
                // init
                make(OpConstant, &[0]),
                make(OpSetGlobal, &[0]),
                // jump over the post statement to the condition
                make(OpJump, &[19]),
                // INC (offset 9): post
                make(OpGetGlobal, &[0]),
                make(OpConstant, &[1]),
                make(OpAdd, &[]),
                make(OpSetGlobal, &[0]),
                // COND (offset 19): 3 > i
                make(OpConstant, &[2]),
                make(OpGetGlobal, &[0]),
                make(OpGt, &[]),
                make(OpJumpNotTruthy, &[36]),
                // body
                make(OpGetGlobal, &[0]),
                make(OpPop, &[]),
                // back edge to INC
                make(OpJump, &[9]),
                // END
                make(OpNull, &[]),
                make(OpPop, &[]),
            ],
        );
    }

    #[test]
    fn comment_statements_compile_to_nothing() {
        assert_instructions("# nothing here\n1;", &[make(OpConstant, &[0]), make(OpPop, &[])]);
    }

    #[test]
    fn top_level_return_is_rejected() {
        assert_eq!(compile_err("return 1;"), CompileError::TopLevelReturn { line: 1 });
    }

    #[test]
    fn unresolved_identifier_is_rejected() {
        assert_eq!(
            compile_err("missing;"),
            CompileError::UnresolvedIdentifier {
                name: "missing".to_string(),
                line: 1
            }
        );
        assert_eq!(
            compile_err("x = 1;"),
            CompileError::UnresolvedIdentifier {
                name: "x".to_string(),
                line: 1
            }
        );
    }

    #[test]
    fn break_and_continue_outside_loops_are_rejected() {
        assert_eq!(compile_err("break;"), CompileError::BreakOutsideLoop { line: 1 });
        assert_eq!(compile_err("continue;"), CompileError::ContinueOutsideLoop { line: 1 });
        // a function body starts a fresh scope with no enclosing loop
        assert_eq!(
            compile_err("while true { fn f() { break; } }"),
            CompileError::BreakOutsideLoop { line: 1 }
        );
    }

    #[test]
    fn assigning_to_the_function_name_is_rejected() {
        assert_eq!(
            compile_err("fn f() { f = 1; }"),
            CompileError::NotAssignable {
                name: "f".to_string(),
                line: 1
            }
        );
    }

    #[test]
    fn compiler_state_survives_across_runs() {
        let mut parser = Parser::new(Lexer::new("let a = 1;"));
        let program = parser.parse_program();
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap();
        let (symbols, constants) = compiler.into_state();

        let mut parser = Parser::new(Lexer::new("a + 1;"));
        let program = parser.parse_program();
        let mut compiler = Compiler::with_state(symbols, constants);
        compiler.compile(&program).unwrap();
        let bytecode = compiler.bytecode();
        // `a` still resolves to global 0; the pool keeps earlier constants
        assert_eq!(
            bytecode.instructions.to_string(),
            concat(&[
                make(OpGetGlobal, &[0]),
                make(OpConstant, &[1]),
                make(OpAdd, &[]),
                make(OpPop, &[]),
            ])
            .to_string()
        );
    }
}
