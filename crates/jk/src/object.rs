//! Runtime values shared by the evaluator and the VM.
//!
//! A single tagged enum represents every value. Cheap cloning is part of the
//! contract: scalars copy, everything heap-shaped sits behind an `Rc`. The
//! capability surface (arithmetic, comparison, hashing, indexing) lives here
//! as shared helpers so both engines agree on semantics; variants that do not
//! handle an operation fall through to an error result.

use std::{cell::RefCell, fmt::Write as _, rc::Rc};

use indexmap::IndexMap;

use crate::{
    ast::{BlockStatement, Identifier, InfixOp, PrefixOp},
    builtins::Builtin,
    bytecode::Instructions,
    environment::Environment,
    hash::fnv1a_64,
};

/// Runtime type tags. The discriminants are the wire tags of the bytecode
/// container, so their order is part of the serialized format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Type {
    Null = 0,
    Integer = 1,
    Float = 2,
    Bool = 3,
    String = 4,
    Function = 5,
    CompiledFunction = 6,
    Closure = 7,
    Builtin = 8,
    Array = 9,
    Map = 10,
    Return = 11,
    Continue = 12,
    Break = 13,
    Error = 14,
}

/// A map key: the value's type tag plus a 64-bit digest.
///
/// Two keys collide iff both fields match, so `1` and `1.0` are distinct keys
/// even though `1 == 1.0` as values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub kind: Type,
    pub value: u64,
}

/// The stored key/value pair of a map entry. The original key object is kept
/// so iteration and `inspect` can render it.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPair {
    pub key: Object,
    pub value: Object,
}

/// Insertion-ordered map storage.
pub type MapData = IndexMap<HashKey, MapPair>;

/// A unit of compiled bytecode living in the constant pool.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_params: usize,
}

/// A callable pairing of compiled code with its captured free variables.
///
/// Free variables are shared interior-mutable cells. Capturing a local
/// promotes the enclosing frame's slot to the same cell, so a write through
/// `OpSetFree` is visible to every holder: the closure itself across calls,
/// sibling closures over the same variable, and the enclosing frame's own
/// reads and writes of the original slot.
#[derive(Debug)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Rc<RefCell<Object>>>,
}

/// An interpreter function: parameters, body, and the captured environment.
#[derive(Debug)]
pub struct FunctionObject {
    pub parameters: Vec<Identifier>,
    pub body: BlockStatement,
    pub env: Rc<RefCell<Environment>>,
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Object {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Str(Rc<str>),
    Array(Rc<Vec<Object>>),
    Map(Rc<RefCell<MapData>>),
    /// Interpreter-only: a function value with its environment.
    Function(Rc<FunctionObject>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    /// Shared mutable storage backing a captured variable. The enclosing
    /// frame's local slot and every capturing closure hold the same cell.
    /// Cell handles surface on the operand stack only between the capture
    /// instructions and the `OpClosure` that consumes them.
    Cell(Rc<RefCell<Object>>),
    Builtin(Builtin),
    /// Control-flow sentinel produced by `return`, consumed by calls.
    Return(Box<Object>),
    /// Control-flow sentinel consumed by loops (interpreter only).
    Continue,
    /// Control-flow sentinel consumed by loops (interpreter only).
    Break,
    /// A first-class error value.
    Error(String),
}

impl Object {
    /// The type tag of this value.
    #[must_use]
    pub fn kind(&self) -> Type {
        match self {
            Self::Null => Type::Null,
            Self::Integer(_) => Type::Integer,
            Self::Float(_) => Type::Float,
            Self::Boolean(_) => Type::Bool,
            Self::Str(_) => Type::String,
            Self::Array(_) => Type::Array,
            Self::Map(_) => Type::Map,
            Self::Function(_) => Type::Function,
            Self::CompiledFunction(_) => Type::CompiledFunction,
            Self::Closure(_) => Type::Closure,
            Self::Cell(cell) => cell.borrow().kind(),
            Self::Builtin(_) => Type::Builtin,
            Self::Return(_) => Type::Return,
            Self::Continue => Type::Continue,
            Self::Break => Type::Break,
            Self::Error(_) => Type::Error,
        }
    }

    /// Renders the value for the REPL and `print`-style output.
    #[must_use]
    pub fn inspect(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Float(value) => ryu::Buffer::new().format(*value).to_string(),
            Self::Boolean(value) => value.to_string(),
            Self::Str(value) => format!("\"{value}\""),
            Self::Array(elements) => {
                let rendered: Vec<_> = elements.iter().map(Object::inspect).collect();
                format!("[{}]", rendered.join(", "))
            }
            Self::Map(pairs) => {
                let mut out = String::from("{");
                for (i, pair) in pairs.borrow().values().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{}: {}", pair.key.inspect(), pair.value.inspect());
                }
                out.push('}');
                out
            }
            Self::Function(func) => {
                let params: Vec<_> = func.parameters.iter().map(ToString::to_string).collect();
                format!("fn({}) {}", params.join(", "), func.body)
            }
            Self::CompiledFunction(func) => format!(
                "CompiledFunction[{} locals, {} params]",
                func.num_locals, func.num_params
            ),
            Self::Closure(closure) => format!("Closure[{} free]", closure.free.len()),
            Self::Cell(cell) => cell.borrow().inspect(),
            Self::Builtin(builtin) => format!("builtin function {builtin}"),
            Self::Return(value) => value.inspect(),
            Self::Continue => "continue".to_string(),
            Self::Break => "break".to_string(),
            Self::Error(message) => message.clone(),
        }
    }

    /// The Bool capability: Null is false, booleans are themselves, numbers
    /// are non-zero. Other types do not support it.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Null => Some(false),
            Self::Boolean(value) => Some(*value),
            Self::Integer(value) => Some(*value != 0),
            Self::Float(value) => Some(*value != 0.0),
            _ => None,
        }
    }

    /// The Hashable capability. Deterministic for equal inputs.
    #[must_use]
    pub fn hash_key(&self) -> Option<HashKey> {
        let value = match self {
            Self::Integer(value) => *value as u64,
            Self::Float(value) => value.to_bits(),
            Self::Boolean(value) => u64::from(*value),
            Self::Str(value) => fnv1a_64(value.as_bytes()),
            _ => return None,
        };
        Some(HashKey {
            kind: self.kind(),
            value,
        })
    }

    /// Truthiness at jump points: only `false` and `null` are falsy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Boolean(false) | Self::Null)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Continue, Self::Continue) | (Self::Break, Self::Break) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Self::CompiledFunction(a), Self::CompiledFunction(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Closure(a), Self::Closure(b)) => Rc::ptr_eq(a, b),
            (Self::Cell(a), Self::Cell(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Return(a), Self::Return(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Applies an infix operator to two evaluated operands.
///
/// Dispatch is on the operator and the left operand's type. Mixed
/// integer/float arithmetic promotes the integer side. Errors carry a
/// rendered message; callers decide whether that aborts the step (VM) or
/// becomes an `Error` value (evaluator).
pub fn binary(left: &Object, op: InfixOp, right: &Object) -> Result<Object, String> {
    use Object::{Boolean, Float, Integer, Str};

    let result = match (left, op, right) {
        // integer arithmetic, wrapping like the host integers
        (Integer(l), InfixOp::Add, Integer(r)) => Integer(l.wrapping_add(*r)),
        (Integer(l), InfixOp::Sub, Integer(r)) => Integer(l.wrapping_sub(*r)),
        (Integer(l), InfixOp::Mul, Integer(r)) => Integer(l.wrapping_mul(*r)),
        (Integer(l), InfixOp::Div, Integer(r)) => {
            if *r == 0 {
                return Err("division by zero".to_string());
            }
            Integer(l.wrapping_div(*r))
        }
        (Integer(l), InfixOp::Mod, Integer(r)) => {
            if *r == 0 {
                return Err("division by zero".to_string());
            }
            Integer(l.wrapping_rem(*r))
        }

        // mixed and float arithmetic promotes to float
        (Integer(l), _, Float(r)) => return binary(&Float(*l as f64), op, &Float(*r)),
        (Float(l), _, Integer(r)) => return binary(&Float(*l), op, &Float(*r as f64)),
        (Float(l), InfixOp::Add, Float(r)) => Float(l + r),
        (Float(l), InfixOp::Sub, Float(r)) => Float(l - r),
        (Float(l), InfixOp::Mul, Float(r)) => Float(l * r),
        (Float(l), InfixOp::Div, Float(r)) => Float(l / r),

        // comparisons return the canonical booleans
        (Integer(l), InfixOp::Eq, Integer(r)) => Boolean(l == r),
        (Integer(l), InfixOp::NotEq, Integer(r)) => Boolean(l != r),
        (Integer(l), InfixOp::Gt, Integer(r)) => Boolean(l > r),
        (Integer(l), InfixOp::Gte, Integer(r)) => Boolean(l >= r),
        (Integer(l), InfixOp::Lt, Integer(r)) => Boolean(l < r),
        (Integer(l), InfixOp::Lte, Integer(r)) => Boolean(l <= r),
        (Float(l), InfixOp::Eq, Float(r)) => Boolean(l == r),
        (Float(l), InfixOp::NotEq, Float(r)) => Boolean(l != r),
        (Float(l), InfixOp::Gt, Float(r)) => Boolean(l > r),
        (Float(l), InfixOp::Gte, Float(r)) => Boolean(l >= r),
        (Float(l), InfixOp::Lt, Float(r)) => Boolean(l < r),
        (Float(l), InfixOp::Lte, Float(r)) => Boolean(l <= r),
        (Boolean(l), InfixOp::Eq, Boolean(r)) => Boolean(l == r),
        (Boolean(l), InfixOp::NotEq, Boolean(r)) => Boolean(l != r),

        // string concatenation, repetition, and ordering
        (Str(l), InfixOp::Add, Str(r)) => {
            let mut out = String::with_capacity(l.len() + r.len());
            out.push_str(l);
            out.push_str(r);
            Str(out.into())
        }
        (Str(l), InfixOp::Mul, Integer(r)) => {
            let count = usize::try_from(*r).map_err(|_| "repeat count cannot be negative".to_string())?;
            Str(l.repeat(count).into())
        }
        (Str(l), InfixOp::Eq, Str(r)) => Boolean(l == r),
        (Str(l), InfixOp::NotEq, Str(r)) => Boolean(l != r),
        (Str(l), InfixOp::Gt, Str(r)) => Boolean(l > r),
        (Str(l), InfixOp::Gte, Str(r)) => Boolean(l >= r),
        (Str(l), InfixOp::Lt, Str(r)) => Boolean(l < r),
        (Str(l), InfixOp::Lte, Str(r)) => Boolean(l <= r),

        (l, op, r) => {
            return Err(format!(
                "unsupported types for '{op}': {} + {}",
                l.kind(),
                r.kind()
            ));
        }
    };
    Ok(result)
}

/// Applies a prefix operator to an evaluated operand.
pub fn prefix(op: PrefixOp, right: &Object) -> Result<Object, String> {
    match op {
        PrefixOp::Bang => right
            .as_bool()
            .map(|value| Object::Boolean(!value))
            .ok_or_else(|| format!("unsupported type for '!': {}", right.kind())),
        PrefixOp::Minus => match right {
            Object::Integer(value) => Ok(Object::Integer(value.wrapping_neg())),
            Object::Float(value) => Ok(Object::Float(-value)),
            other => Err(format!("unsupported type for '-': {}", other.kind())),
        },
    }
}

/// Indexes into an array, string, or map.
///
/// Out-of-range array/string indexes and missing map keys produce first-class
/// `Error` values (in the `Ok` arm); an operand pairing that does not support
/// indexing at all is an `Err`.
pub fn index_of(left: &Object, index: &Object) -> Result<Object, String> {
    match (left, index) {
        (Object::Array(elements), Object::Integer(i)) => {
            let item = usize::try_from(*i).ok().and_then(|i| elements.get(i));
            Ok(item.cloned().unwrap_or_else(|| {
                Object::Error(format!("index out of range [{i}] with length {}", elements.len()))
            }))
        }
        (Object::Str(value), Object::Integer(i)) => {
            let byte = usize::try_from(*i).ok().and_then(|i| value.as_bytes().get(i));
            Ok(byte.map_or_else(
                || Object::Error(format!("index out of range [{i}] with length {}", value.len())),
                |&b| Object::Str((b as char).to_string().into()),
            ))
        }
        (Object::Map(pairs), key) => {
            let hash_key = key
                .hash_key()
                .ok_or_else(|| format!("unusable as map key: {}", key.kind()))?;
            Ok(pairs
                .borrow()
                .get(&hash_key)
                .map_or_else(|| Object::Error("key not present".to_string()), |pair| pair.value.clone()))
        }
        (left, _) => Err(format!("index operator not supported: {}", left.kind())),
    }
}
