//! The builtin function registry and bodies.
//!
//! Builtins are identified by their `#[repr(u8)]` discriminant: the compiler
//! emits `OpGetBuiltin` with that index when an identifier misses the symbol
//! table, and the VM maps it back with `from_repr`. The enum order is
//! therefore part of the compiled-code contract.
//!
//! Misuse (wrong arity, wrong types) produces first-class `Error` values
//! rather than aborting execution.

use std::{env, rc::Rc};

use crate::{
    io::PrintWriter,
    object::{MapPair, Object, Type},
};

/// Builtin functions, addressable by name and by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::FromRepr)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Builtin {
    Int = 0,
    Float = 1,
    String = 2,
    Len = 3,
    Pop = 4,
    Print = 5,
    Append = 6,
    Set = 7,
    Slice = 8,
    Argv = 9,
}

impl Builtin {
    /// Looks a builtin up by source name.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// The `OpGetBuiltin` operand for this builtin.
    #[must_use]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Invokes the builtin. The returned object may be an `Error` value.
    pub fn call(self, args: &[Object], print: &mut dyn PrintWriter) -> Object {
        match self {
            Self::Int => builtin_int(args),
            Self::Float => builtin_float(args),
            Self::String => builtin_string(args),
            Self::Len => builtin_len(args),
            Self::Pop => builtin_pop(args),
            Self::Print => builtin_print(args, print),
            Self::Append => builtin_append(args),
            Self::Set => builtin_set(args),
            Self::Slice => builtin_slice(args),
            Self::Argv => builtin_argv(args),
        }
    }
}

fn new_error(message: impl Into<String>) -> Object {
    Object::Error(message.into())
}

/// Checks an exact argument count, returning an error object on mismatch.
fn n_args(n: usize, args: &[Object]) -> Option<Object> {
    if args.len() == n {
        None
    } else {
        Some(new_error(format!(
            "invalid number of args: got {} - want {n}",
            args.len()
        )))
    }
}

fn builtin_int(args: &[Object]) -> Object {
    if let Some(err) = n_args(1, args) {
        return err;
    }
    match &args[0] {
        Object::Integer(value) => Object::Integer(*value),
        Object::Float(value) => Object::Integer(*value as i64),
        Object::Str(value) => match value.parse::<i64>() {
            Ok(parsed) => Object::Integer(parsed),
            // fall back to parsing as a float, then truncate
            Err(_) => match value.parse::<f64>() {
                Ok(parsed) => Object::Integer(parsed as i64),
                Err(_) => new_error("invalid input"),
            },
        },
        other => new_error(format!("int() not supported on {}", other.kind())),
    }
}

fn builtin_float(args: &[Object]) -> Object {
    if let Some(err) = n_args(1, args) {
        return err;
    }
    match &args[0] {
        Object::Integer(value) => Object::Float(*value as f64),
        Object::Float(value) => Object::Float(*value),
        Object::Str(value) => match value.parse::<f64>() {
            Ok(parsed) => Object::Float(parsed),
            Err(_) => new_error("invalid input"),
        },
        other => new_error(format!("float() not supported on {}", other.kind())),
    }
}

fn builtin_string(args: &[Object]) -> Object {
    if let Some(err) = n_args(1, args) {
        return err;
    }
    match &args[0] {
        Object::Integer(value) => Object::Str(value.to_string().into()),
        Object::Float(value) => Object::Str(ryu::Buffer::new().format(*value).into()),
        Object::Str(value) => Object::Str(value.clone()),
        other => new_error(format!("string() not supported on {}", other.kind())),
    }
}

fn builtin_len(args: &[Object]) -> Object {
    if let Some(err) = n_args(1, args) {
        return err;
    }
    match &args[0] {
        Object::Str(value) => Object::Integer(value.len() as i64),
        Object::Array(elements) => Object::Integer(elements.len() as i64),
        other => new_error(format!("len() not supported on {}", other.kind())),
    }
}

fn builtin_pop(args: &[Object]) -> Object {
    if let Some(err) = n_args(2, args) {
        return err;
    }
    let Object::Map(pairs) = &args[0] else {
        return new_error(format!(
            "invalid type for pop. got {}, want {}",
            args[0].kind(),
            Type::Map
        ));
    };
    let Some(key) = args[1].hash_key() else {
        return new_error("invalid key type");
    };
    match pairs.borrow_mut().shift_remove(&key) {
        Some(pair) => pair.value,
        None => Object::Null,
    }
}

fn builtin_print(args: &[Object], print: &mut dyn PrintWriter) -> Object {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            print.stdout_push(' ');
        }
        // strings print raw; everything else prints its inspect form
        match arg {
            Object::Str(value) => print.stdout_write(value),
            other => print.stdout_write(&other.inspect()),
        }
    }
    print.stdout_push('\n');
    Object::Null
}

fn builtin_append(args: &[Object]) -> Object {
    if args.len() < 2 {
        return new_error(format!("invalid number of args, got {}, want 2+", args.len()));
    }
    let Object::Array(source) = &args[0] else {
        return new_error(format!("first argument of append must be an {}", Type::Array));
    };
    let mut elements = source.as_ref().clone();
    elements.extend_from_slice(&args[1..]);
    Object::Array(Rc::new(elements))
}

fn builtin_set(args: &[Object]) -> Object {
    if let Some(err) = n_args(3, args) {
        return err;
    }
    let Object::Map(pairs) = &args[0] else {
        return new_error(format!("invalid object: {} is not settable", args[0].kind()));
    };
    let Some(key) = args[1].hash_key() else {
        return new_error(format!("unusable as map key: {}", args[1].kind()));
    };
    pairs.borrow_mut().insert(
        key,
        MapPair {
            key: args[1].clone(),
            value: args[2].clone(),
        },
    );
    args[0].clone()
}

fn builtin_slice(args: &[Object]) -> Object {
    let zero = Object::Integer(0);
    let (source, start, end) = match args {
        [source, end] => (source, &zero, end),
        [source, start, end] => (source, start, end),
        _ => {
            return new_error(format!("invalid number of args, got {}, want 2+", args.len()));
        }
    };
    let (Object::Integer(start), Object::Integer(end)) = (start, end) else {
        return new_error(format!("cannot slice using type {}, must be {}", end.kind(), Type::Integer));
    };
    if *start < 0 {
        return new_error("starting point of slice cannot be negative");
    }
    let (start, end) = (*start as usize, *end as usize);

    match source {
        Object::Array(elements) => {
            if start <= end && end <= elements.len() {
                Object::Array(Rc::new(elements[start..end].to_vec()))
            } else {
                new_error(format!("index out of range [{end}] with length {}", elements.len()))
            }
        }
        Object::Str(value) => match value.get(start..end) {
            Some(sliced) => Object::Str(sliced.to_string().into()),
            None => new_error(format!("index out of range [{end}] with length {}", value.len())),
        },
        other => new_error(format!(
            "invalid source for slice, must be {} or {}, got {}",
            Type::Array,
            Type::String,
            other.kind()
        )),
    }
}

fn builtin_argv(args: &[Object]) -> Object {
    if let Some(err) = n_args(0, args) {
        return err;
    }
    let elements = env::args().map(|arg| Object::Str(arg.into())).collect();
    Object::Array(Rc::new(elements))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use crate::io::{CollectStringPrint, NoPrint};

    use super::*;

    fn s(value: &str) -> Object {
        Object::Str(value.into())
    }

    fn arr(values: &[i64]) -> Object {
        Object::Array(Rc::new(values.iter().copied().map(Object::Integer).collect()))
    }

    fn map_with(key: Object, value: Object) -> Object {
        let mut data = crate::object::MapData::default();
        data.insert(key.hash_key().unwrap(), MapPair { key, value });
        Object::Map(Rc::new(RefCell::new(data)))
    }

    #[test]
    fn lookup_by_name_and_index() {
        assert_eq!(Builtin::lookup("len"), Some(Builtin::Len));
        assert_eq!(Builtin::lookup("print"), Some(Builtin::Print));
        assert_eq!(Builtin::lookup("nope"), None);
        assert_eq!(Builtin::from_repr(Builtin::Argv.index()), Some(Builtin::Argv));
        assert_eq!(Builtin::Int.index(), 0);
        assert_eq!(Builtin::Argv.index(), 9);
    }

    #[test]
    fn int_conversions() {
        let mut print = NoPrint;
        assert_eq!(Builtin::Int.call(&[Object::Integer(3)], &mut print), Object::Integer(3));
        assert_eq!(Builtin::Int.call(&[Object::Float(3.9)], &mut print), Object::Integer(3));
        assert_eq!(Builtin::Int.call(&[s("12")], &mut print), Object::Integer(12));
        assert_eq!(Builtin::Int.call(&[s("3.7")], &mut print), Object::Integer(3));
        assert!(matches!(Builtin::Int.call(&[s("abc")], &mut print), Object::Error(_)));
    }

    #[test]
    fn float_and_string_conversions() {
        let mut print = NoPrint;
        assert_eq!(Builtin::Float.call(&[Object::Integer(2)], &mut print), Object::Float(2.0));
        assert_eq!(Builtin::Float.call(&[s("2.5")], &mut print), Object::Float(2.5));
        assert_eq!(Builtin::String.call(&[Object::Integer(12)], &mut print), s("12"));
        assert_eq!(Builtin::String.call(&[Object::Float(2.5)], &mut print), s("2.5"));
        assert_eq!(Builtin::String.call(&[s("x")], &mut print), s("x"));
    }

    #[test]
    fn len_of_strings_and_arrays() {
        let mut print = NoPrint;
        assert_eq!(Builtin::Len.call(&[s("")], &mut print), Object::Integer(0));
        assert_eq!(Builtin::Len.call(&[s("four")], &mut print), Object::Integer(4));
        assert_eq!(Builtin::Len.call(&[arr(&[1, 2, 3])], &mut print), Object::Integer(3));
        assert!(matches!(
            Builtin::Len.call(&[Object::Integer(1)], &mut print),
            Object::Error(_)
        ));
    }

    #[test]
    fn arity_errors() {
        let mut print = NoPrint;
        let err = Builtin::Len.call(&[], &mut print);
        assert_eq!(err, Object::Error("invalid number of args: got 0 - want 1".to_string()));
    }

    #[test]
    fn pop_removes_and_returns() {
        let mut print = NoPrint;
        let map = map_with(s("k"), Object::Integer(7));
        assert_eq!(Builtin::Pop.call(&[map.clone(), s("k")], &mut print), Object::Integer(7));
        // the entry is gone now
        assert_eq!(Builtin::Pop.call(&[map, s("k")], &mut print), Object::Null);
    }

    #[test]
    fn print_writes_through_the_writer() {
        let mut print = CollectStringPrint::new();
        Builtin::Print.call(&[s("hello"), Object::Integer(42)], &mut print);
        assert_eq!(print.output(), "hello 42\n");
    }

    #[test]
    fn append_returns_a_new_array() {
        let mut print = NoPrint;
        let source = arr(&[1, 2]);
        let result = Builtin::Append.call(&[source.clone(), Object::Integer(3)], &mut print);
        assert_eq!(result, arr(&[1, 2, 3]));
        // the source array is untouched
        assert_eq!(source, arr(&[1, 2]));
    }

    #[test]
    fn set_mutates_in_place() {
        let mut print = NoPrint;
        let map = map_with(s("a"), Object::Integer(1));
        Builtin::Set.call(&[map.clone(), s("b"), Object::Integer(2)], &mut print);
        let Object::Map(pairs) = &map else { unreachable!() };
        assert_eq!(pairs.borrow().len(), 2);
    }

    #[test]
    fn slice_arrays_and_strings() {
        let mut print = NoPrint;
        assert_eq!(
            Builtin::Slice.call(&[arr(&[1, 2, 3, 4]), Object::Integer(2)], &mut print),
            arr(&[1, 2])
        );
        assert_eq!(
            Builtin::Slice.call(&[arr(&[1, 2, 3, 4]), Object::Integer(1), Object::Integer(3)], &mut print),
            arr(&[2, 3])
        );
        assert_eq!(
            Builtin::Slice.call(&[s("hello"), Object::Integer(1), Object::Integer(3)], &mut print),
            s("el")
        );
        assert!(matches!(
            Builtin::Slice.call(&[arr(&[1]), Object::Integer(5)], &mut print),
            Object::Error(_)
        ));
        assert!(matches!(
            Builtin::Slice.call(&[s("hi"), Object::Integer(-1), Object::Integer(1)], &mut print),
            Object::Error(_)
        ));
    }
}
