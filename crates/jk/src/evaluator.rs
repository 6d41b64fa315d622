//! The tree-walking evaluator.
//!
//! Walks the AST directly against an [`Environment`] chain. Errors are
//! first-class `Error` values that short-circuit evaluation; `return`,
//! `break`, and `continue` travel as sentinel objects until a call or loop
//! consumes them. Semantics match the compiled pipeline observably — the
//! parity suite in `tests/` runs the same programs through both engines.

use std::{cell::RefCell, rc::Rc};

use crate::{
    ast::{BlockStatement, Expression, FunctionLiteral, Program, Statement},
    builtins::Builtin,
    environment::Environment,
    io::PrintWriter,
    object::{self, FunctionObject, MapData, MapPair, Object, Type},
};

/// Tree-walking executor threading a print sink to builtins.
pub struct Evaluator<'a> {
    print: &'a mut dyn PrintWriter,
}

impl<'a> Evaluator<'a> {
    pub fn new(print: &'a mut dyn PrintWriter) -> Self {
        Self { print }
    }

    /// Evaluates a whole program, returning the last statement's value.
    pub fn eval_program(&mut self, program: &Program, env: &Rc<RefCell<Environment>>) -> Object {
        let mut result = Object::Null;
        for statement in &program.statements {
            result = self.eval_statement(statement, env);
            match result {
                Object::Return(value) => return *value,
                Object::Error(_) => return result,
                Object::Break | Object::Continue => {
                    return Object::Error(format!("{} outside loop", result.inspect()));
                }
                _ => {}
            }
        }
        result
    }

    fn eval_statement(&mut self, statement: &Statement, env: &Rc<RefCell<Environment>>) -> Object {
        match statement {
            Statement::Let { name, value, .. } | Statement::Define { name, value, .. } => {
                let value = self.eval_expression(value, env);
                if value.kind() == Type::Error {
                    return value;
                }
                env.borrow_mut().define(name.value.clone(), value);
                Object::Null
            }
            Statement::Reassign { name, value, .. } => {
                let value = self.eval_expression(value, env);
                if value.kind() == Type::Error {
                    return value;
                }
                if env.borrow_mut().assign(&name.value, value) {
                    Object::Null
                } else {
                    Object::Error(format!("identifier not found: {}", name.value))
                }
            }
            Statement::Func { name, func, .. } => {
                let function = self.make_function(func, env);
                env.borrow_mut().define(name.value.clone(), function);
                Object::Null
            }
            Statement::Return { value, .. } => {
                let value = self.eval_expression(value, env);
                if value.kind() == Type::Error {
                    return value;
                }
                Object::Return(Box::new(value))
            }
            Statement::Continue { .. } => Object::Continue,
            Statement::Break { .. } => Object::Break,
            Statement::Block(block) => self.eval_block(block, env),
            Statement::Expression { expression, .. } => self.eval_expression(expression, env),
        }
    }

    /// Evaluates a block, propagating control-flow sentinels unconsumed.
    fn eval_block(&mut self, block: &BlockStatement, env: &Rc<RefCell<Environment>>) -> Object {
        let mut result = Object::Null;
        for statement in &block.statements {
            result = self.eval_statement(statement, env);
            if matches!(
                result,
                Object::Return(_) | Object::Break | Object::Continue | Object::Error(_)
            ) {
                return result;
            }
        }
        result
    }

    fn eval_expression(&mut self, expression: &Expression, env: &Rc<RefCell<Environment>>) -> Object {
        match expression {
            Expression::Identifier(ident) => match env.borrow().get(&ident.value) {
                Some(value) => value,
                None => Builtin::lookup(&ident.value).map_or_else(
                    || Object::Error(format!("identifier not found: {}", ident.value)),
                    Object::Builtin,
                ),
            },
            Expression::Integer { value, .. } => Object::Integer(*value),
            Expression::Float { value, .. } => Object::Float(*value),
            Expression::Str { value, .. } => Object::Str(value.as_str().into()),
            Expression::Boolean { value, .. } => Object::Boolean(*value),
            Expression::Comment { .. } => Object::Null,
            Expression::Prefix { op, right, .. } => {
                let right = self.eval_expression(right, env);
                if right.kind() == Type::Error {
                    return right;
                }
                object::prefix(*op, &right).unwrap_or_else(Object::Error)
            }
            Expression::Infix { op, left, right, .. } => {
                let left = self.eval_expression(left, env);
                if left.kind() == Type::Error {
                    return left;
                }
                let right = self.eval_expression(right, env);
                if right.kind() == Type::Error {
                    return right;
                }
                object::binary(&left, *op, &right).unwrap_or_else(Object::Error)
            }
            Expression::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                let condition = self.eval_expression(condition, env);
                if condition.kind() == Type::Error {
                    return condition;
                }
                if condition.is_truthy() {
                    self.eval_block(consequence, env)
                } else if let Some(alternative) = alternative {
                    self.eval_block(alternative, env)
                } else {
                    Object::Null
                }
            }
            Expression::While { condition, body, .. } => loop {
                let value = self.eval_expression(condition, env);
                if value.kind() == Type::Error {
                    return value;
                }
                if !value.is_truthy() {
                    return Object::Null;
                }
                match self.eval_block(body, env) {
                    Object::Break => return Object::Null,
                    result @ (Object::Return(_) | Object::Error(_)) => return result,
                    _ => {}
                }
            },
            Expression::For {
                init,
                condition,
                post,
                body,
                ..
            } => {
                let result = self.eval_statement(init, env);
                if result.kind() == Type::Error {
                    return result;
                }
                loop {
                    let value = self.eval_expression(condition, env);
                    if value.kind() == Type::Error {
                        return value;
                    }
                    if !value.is_truthy() {
                        return Object::Null;
                    }
                    match self.eval_block(body, env) {
                        Object::Break => return Object::Null,
                        result @ (Object::Return(_) | Object::Error(_)) => return result,
                        // Continue still runs the post statement below
                        _ => {}
                    }
                    let result = self.eval_statement(post, env);
                    if result.kind() == Type::Error {
                        return result;
                    }
                }
            }
            Expression::Function(func) => self.make_function(func, env),
            Expression::Call {
                function, arguments, ..
            } => {
                let function = self.eval_expression(function, env);
                if function.kind() == Type::Error {
                    return function;
                }
                let mut args = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    let value = self.eval_expression(argument, env);
                    if value.kind() == Type::Error {
                        return value;
                    }
                    args.push(value);
                }
                self.apply_function(&function, &args)
            }
            Expression::Index { left, index, .. } => {
                let left = self.eval_expression(left, env);
                if left.kind() == Type::Error {
                    return left;
                }
                let index = self.eval_expression(index, env);
                if index.kind() == Type::Error {
                    return index;
                }
                object::index_of(&left, &index).unwrap_or_else(Object::Error)
            }
            Expression::Array { elements, .. } => {
                let mut out = Vec::with_capacity(elements.len());
                for element in elements {
                    let value = self.eval_expression(element, env);
                    if value.kind() == Type::Error {
                        return value;
                    }
                    out.push(value);
                }
                Object::Array(Rc::new(out))
            }
            Expression::Map { pairs, .. } => {
                let mut data = MapData::default();
                for (key_expr, value_expr) in pairs {
                    let key = self.eval_expression(key_expr, env);
                    if key.kind() == Type::Error {
                        return key;
                    }
                    let Some(hash_key) = key.hash_key() else {
                        return Object::Error(format!("unusable as map key: {}", key.kind()));
                    };
                    let value = self.eval_expression(value_expr, env);
                    if value.kind() == Type::Error {
                        return value;
                    }
                    data.insert(hash_key, MapPair { key, value });
                }
                Object::Map(Rc::new(RefCell::new(data)))
            }
        }
    }

    fn make_function(&self, func: &FunctionLiteral, env: &Rc<RefCell<Environment>>) -> Object {
        Object::Function(Rc::new(FunctionObject {
            parameters: func.parameters.clone(),
            body: func.body.clone(),
            env: env.clone(),
        }))
    }

    fn apply_function(&mut self, function: &Object, args: &[Object]) -> Object {
        match function {
            Object::Function(func) => {
                if args.len() != func.parameters.len() {
                    return Object::Error(format!(
                        "wrong number of arguments: want={}, got={}",
                        func.parameters.len(),
                        args.len()
                    ));
                }
                let mut scope = Environment::enclosed(func.env.clone());
                for (param, arg) in func.parameters.iter().zip(args) {
                    scope.define(param.value.clone(), arg.clone());
                }
                let scope = Rc::new(RefCell::new(scope));
                match self.eval_block(&func.body, &scope) {
                    Object::Return(value) => *value,
                    err @ Object::Error(_) => err,
                    // no implicit return: a body that falls off the end yields null
                    _ => Object::Null,
                }
            }
            Object::Builtin(builtin) => builtin.call(args, self.print),
            other => Object::Error(format!("not callable: {}", other.kind())),
        }
    }
}
