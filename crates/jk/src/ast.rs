//! Abstract syntax tree: statements, expressions, and the root [`Program`].
//!
//! Every node keeps the token that introduced it so later stages can report
//! source lines. `Display` renders re-parseable source text: parsing the
//! rendered text yields a structurally equal tree.

use std::fmt;

use crate::token::Token;

/// The root node: an ordered sequence of statements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            writeln!(f, "{statement}")?;
        }
        Ok(())
    }
}

/// A statement node.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `let name = value;`
    Let {
        token: Token,
        name: Identifier,
        value: Expression,
    },
    /// `name := value;` — defines and initializes a new name.
    Define {
        token: Token,
        name: Identifier,
        value: Expression,
    },
    /// `name = value;` — requires `name` to already exist.
    Reassign {
        token: Token,
        name: Identifier,
        value: Expression,
    },
    /// `fn name(params) { body }`
    Func {
        token: Token,
        name: Identifier,
        func: FunctionLiteral,
    },
    /// `return value;`
    Return { token: Token, value: Expression },
    Continue { token: Token },
    Break { token: Token },
    /// A block of statements, the body form of `if`/`while`/`for`/functions.
    Block(BlockStatement),
    /// A bare expression in statement position.
    Expression { token: Token, expression: Expression },
}

impl Statement {
    /// Source line of the token that introduced this statement.
    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            Self::Let { token, .. }
            | Self::Define { token, .. }
            | Self::Reassign { token, .. }
            | Self::Func { token, .. }
            | Self::Return { token, .. }
            | Self::Continue { token }
            | Self::Break { token }
            | Self::Expression { token, .. } => token.line,
            Self::Block(block) => block.token.line,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Let { name, value, .. } => write!(f, "let {name} = {value};"),
            Self::Define { name, value, .. } => write!(f, "{name} := {value};"),
            Self::Reassign { name, value, .. } => write!(f, "{name} = {value};"),
            Self::Func { name, func, .. } => {
                write!(f, "fn {name}({}) {}", join(&func.parameters), func.body)
            }
            Self::Return { value, .. } => write!(f, "return {value};"),
            Self::Continue { .. } => write!(f, "continue;"),
            Self::Break { .. } => write!(f, "break;"),
            Self::Block(block) => block.fmt(f),
            Self::Expression { expression, .. } => expression.fmt(f),
        }
    }
}

/// A brace-delimited statement sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    pub token: Token,
    pub statements: Vec<Statement>,
}

impl fmt::Display for BlockStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ ")?;
        for statement in &self.statements {
            write!(f, "{statement} ")?;
        }
        f.write_str("}")
    }
}

/// A name in source.
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub token: Token,
    pub value: String,
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// A function literal, possibly carrying the name it is being bound to so the
/// compiler can resolve self-references in the body.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLiteral {
    pub token: Token,
    pub name: Option<String>,
    pub parameters: Vec<Identifier>,
    pub body: BlockStatement,
}

impl fmt::Display for FunctionLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn({}) {}", join(&self.parameters), self.body)
    }
}

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    /// `!` — boolean inversion.
    Bang,
    /// `-` — numeric negation.
    Minus,
}

impl fmt::Display for PrefixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bang => "!",
            Self::Minus => "-",
        })
    }
}

/// Infix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    NotEq,
}

impl fmt::Display for InfixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Lte => "<=",
            Self::Gte => ">=",
            Self::Eq => "==",
            Self::NotEq => "!=",
        })
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Identifier(Identifier),
    Integer {
        token: Token,
        value: i64,
    },
    Float {
        token: Token,
        value: f64,
    },
    Str {
        token: Token,
        value: String,
    },
    Boolean {
        token: Token,
        value: bool,
    },
    /// A `#` comment. Preserved in the AST; the compiler emits nothing for it.
    Comment {
        token: Token,
    },
    Prefix {
        token: Token,
        op: PrefixOp,
        right: Box<Expression>,
    },
    Infix {
        token: Token,
        op: InfixOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    If {
        token: Token,
        condition: Box<Expression>,
        consequence: BlockStatement,
        alternative: Option<BlockStatement>,
    },
    While {
        token: Token,
        condition: Box<Expression>,
        body: BlockStatement,
    },
    /// `for init; condition; post { body }`
    For {
        token: Token,
        init: Box<Statement>,
        condition: Box<Expression>,
        post: Box<Statement>,
        body: BlockStatement,
    },
    Function(FunctionLiteral),
    Call {
        token: Token,
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Index {
        token: Token,
        left: Box<Expression>,
        index: Box<Expression>,
    },
    Array {
        token: Token,
        elements: Vec<Expression>,
    },
    /// A map literal. Pairs keep source order so compilation and iteration
    /// are deterministic.
    Map {
        token: Token,
        pairs: Vec<(Expression, Expression)>,
    },
}

impl Expression {
    /// Source line of the token that introduced this expression.
    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            Self::Identifier(ident) => ident.token.line,
            Self::Function(func) => func.token.line,
            Self::Integer { token, .. }
            | Self::Float { token, .. }
            | Self::Str { token, .. }
            | Self::Boolean { token, .. }
            | Self::Comment { token }
            | Self::Prefix { token, .. }
            | Self::Infix { token, .. }
            | Self::If { token, .. }
            | Self::While { token, .. }
            | Self::For { token, .. }
            | Self::Call { token, .. }
            | Self::Index { token, .. }
            | Self::Array { token, .. }
            | Self::Map { token, .. } => token.line,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(ident) => ident.fmt(f),
            Self::Integer { value, .. } => value.fmt(f),
            Self::Float { value, .. } => f.write_str(ryu::Buffer::new().format(*value)),
            Self::Str { value, .. } => write!(f, "\"{value}\""),
            Self::Boolean { value, .. } => value.fmt(f),
            Self::Comment { token } => write!(f, "#{}", token.literal),
            Self::Prefix { op, right, .. } => write!(f, "({op}{right})"),
            Self::Infix { op, left, right, .. } => write!(f, "({left} {op} {right})"),
            Self::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                write!(f, "if {condition} {consequence}")?;
                if let Some(alternative) = alternative {
                    write!(f, " else {alternative}")?;
                }
                Ok(())
            }
            Self::While { condition, body, .. } => write!(f, "while {condition} {body}"),
            Self::For {
                init,
                condition,
                post,
                body,
                ..
            } => {
                // the post statement renders without its statement terminator
                let post = post.to_string();
                write!(
                    f,
                    "for {init} {condition}; {} {body}",
                    post.trim_end_matches(';')
                )
            }
            Self::Function(func) => func.fmt(f),
            Self::Call {
                function, arguments, ..
            } => write!(f, "{function}({})", join(arguments)),
            Self::Index { left, index, .. } => write!(f, "({left}[{index}])"),
            Self::Array { elements, .. } => write!(f, "[{}]", join(elements)),
            Self::Map { pairs, .. } => {
                f.write_str("{ ")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str(" }")
            }
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
