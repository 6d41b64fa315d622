//! Instruction encoding, disassembly, and the serialized bytecode container.
//!
//! `make` encodes an opcode with its operands; `read_operands` reverses it
//! using the opcode's width table. A [`Bytecode`] pairs an instruction buffer
//! with its constant pool and round-trips through the `.jkb` wire format:
//! big-endian throughout, constants prefixed by their [`Type`] tag byte.

use std::{fmt, rc::Rc};

use smallvec::SmallVec;

use super::op::Opcode;
use crate::object::{CompiledFunction, Object, Type};

/// Decoded operands: at most two per instruction.
pub type Operands = SmallVec<[usize; 2]>;

/// A raw instruction buffer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends an encoded instruction, returning the offset it was written at.
    pub fn push(&mut self, encoded: &[u8]) -> usize {
        let position = self.0.len();
        self.0.extend_from_slice(encoded);
        position
    }

    /// Rewrites the operand bytes of the instruction at `position` in place.
    /// The new operands must match the instruction's width table.
    pub fn replace_operands(&mut self, position: usize, operands: &[usize]) {
        let op = Opcode::lookup(self.0[position]).expect("replacing operands of an unknown opcode");
        let encoded = make(op, operands);
        self.0[position..position + encoded.len()].copy_from_slice(&encoded);
    }

    /// The byte at `offset`.
    #[must_use]
    pub fn byte(&self, offset: usize) -> u8 {
        self.0[offset]
    }
}

impl fmt::Display for Instructions {
    /// Disassembles the buffer, one instruction per line, prefixed with the
    /// absolute offset: `0007 OpConstant 2`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut offset = 0;
        while offset < self.0.len() {
            let op = match Opcode::lookup(self.0[offset]) {
                Ok(op) => op,
                Err(err) => {
                    writeln!(f, "Error: {err}")?;
                    offset += 1;
                    continue;
                }
            };
            let (operands, read) = read_operands(op.operand_widths(), &self.0[offset + 1..]);
            write!(f, "{offset:04} {op}")?;
            for operand in &operands {
                write!(f, " {operand}")?;
            }
            writeln!(f)?;
            offset += 1 + read;
        }
        Ok(())
    }
}

/// Encodes an instruction: the opcode byte followed by each operand in its
/// table width, big-endian.
#[must_use]
pub fn make(op: Opcode, operands: &[usize]) -> Vec<u8> {
    let widths = op.operand_widths();
    debug_assert_eq!(operands.len(), widths.len(), "operand count mismatch for {op}");

    let mut out = Vec::with_capacity(1 + widths.iter().sum::<usize>());
    out.push(op as u8);
    for (operand, width) in operands.iter().zip(widths) {
        match width {
            2 => {
                let operand = u16::try_from(*operand).expect("operand exceeds u16");
                out.extend_from_slice(&operand.to_be_bytes());
            }
            1 => {
                let operand = u8::try_from(*operand).expect("operand exceeds u8");
                out.push(operand);
            }
            _ => unreachable!("unhandled operand width {width}"),
        }
    }
    out
}

/// Decodes the operands following an opcode byte. Returns the operands and
/// the number of bytes read.
#[must_use]
pub fn read_operands(widths: &[usize], ins: &[u8]) -> (Operands, usize) {
    let mut operands = Operands::new();
    let mut offset = 0;
    for width in widths {
        match width {
            2 => {
                operands.push(read_u16(&ins[offset..]) as usize);
            }
            1 => {
                operands.push(ins[offset] as usize);
            }
            _ => unreachable!("unhandled operand width {width}"),
        }
        offset += width;
    }
    (operands, offset)
}

/// Reads a big-endian u16 from the front of `ins`.
#[must_use]
pub fn read_u16(ins: &[u8]) -> u16 {
    u16::from_be_bytes([ins[0], ins[1]])
}

/// Compiled output: an instruction buffer plus the constants it references.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

/// A constant that has no wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeError {
    pub kind: Type,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot encode constant of type {}", self.kind)
    }
}

impl std::error::Error for EncodeError {}

/// A malformed `.jkb` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnknownTag(u8),
    UnexpectedEof,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTag(tag) => write!(f, "unknown constant tag: {tag}"),
            Self::UnexpectedEof => write!(f, "unexpected end of bytecode data"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl Bytecode {
    /// Serializes to the `.jkb` wire format:
    /// `u64 len(instructions) | instructions | u64 count(constants) |
    /// constants*`, each constant prefixed by its type tag byte.
    pub fn marshal(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.instructions.len() as u64).to_be_bytes());
        out.extend_from_slice(self.instructions.bytes());
        out.extend_from_slice(&(self.constants.len() as u64).to_be_bytes());
        for constant in &self.constants {
            marshal_constant(constant, &mut out)?;
        }
        Ok(out)
    }

    /// Deserializes a `.jkb` payload.
    pub fn unmarshal(data: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor { data, offset: 0 };
        let ins_len = cursor.read_u64()? as usize;
        let instructions = Instructions::from_bytes(cursor.read_bytes(ins_len)?.to_vec());
        let const_count = cursor.read_u64()? as usize;
        let mut constants = Vec::with_capacity(const_count.min(1024));
        for _ in 0..const_count {
            constants.push(unmarshal_constant(&mut cursor)?);
        }
        Ok(Self {
            instructions,
            constants,
        })
    }
}

impl fmt::Display for Bytecode {
    /// Renders the constant pool followed by the annotated instruction
    /// listing. Compiled functions include their own nested listing.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Constants:")?;
        for (i, constant) in self.constants.iter().enumerate() {
            writeln!(f, "{i:4}: {}", constant.inspect())?;
            if let Object::CompiledFunction(func) = constant {
                for line in func.instructions.to_string().lines() {
                    writeln!(f, "        {line}")?;
                }
            }
        }
        writeln!(f, "Instructions:")?;
        write!(f, "{}", self.instructions)
    }
}

fn marshal_constant(constant: &Object, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    out.push(constant.kind() as u8);
    match constant {
        Object::Integer(value) => {
            // signed wrapping into u64
            out.extend_from_slice(&(*value as u64).to_be_bytes());
        }
        Object::Float(value) => {
            out.extend_from_slice(&value.to_bits().to_be_bytes());
        }
        Object::Str(value) => {
            out.extend_from_slice(&(value.len() as u64).to_be_bytes());
            out.extend_from_slice(value.as_bytes());
        }
        Object::CompiledFunction(func) => {
            out.extend_from_slice(&(func.num_locals as u64).to_be_bytes());
            out.extend_from_slice(&(func.num_params as u64).to_be_bytes());
            out.extend_from_slice(&(func.instructions.len() as u64).to_be_bytes());
            out.extend_from_slice(func.instructions.bytes());
        }
        other => return Err(EncodeError { kind: other.kind() }),
    }
    Ok(())
}

fn unmarshal_constant(cursor: &mut Cursor<'_>) -> Result<Object, DecodeError> {
    let tag = cursor.read_byte()?;
    let kind = Type::from_repr(tag).ok_or(DecodeError::UnknownTag(tag))?;
    match kind {
        Type::Integer => Ok(Object::Integer(cursor.read_u64()? as i64)),
        Type::Float => Ok(Object::Float(f64::from_bits(cursor.read_u64()?))),
        Type::String => {
            let len = cursor.read_u64()? as usize;
            let bytes = cursor.read_bytes(len)?;
            Ok(Object::Str(String::from_utf8_lossy(bytes).into_owned().into()))
        }
        Type::CompiledFunction => {
            let num_locals = cursor.read_u64()? as usize;
            let num_params = cursor.read_u64()? as usize;
            let len = cursor.read_u64()? as usize;
            let instructions = Instructions::from_bytes(cursor.read_bytes(len)?.to_vec());
            Ok(Object::CompiledFunction(Rc::new(CompiledFunction {
                instructions,
                num_locals,
                num_params,
            })))
        }
        _ => Err(DecodeError::UnknownTag(tag)),
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Cursor<'_> {
    fn read_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.data.get(self.offset).ok_or(DecodeError::UnexpectedEof)?;
        self.offset += 1;
        Ok(byte)
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().expect("8-byte slice")))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&[u8], DecodeError> {
        let end = self.offset.checked_add(len).ok_or(DecodeError::UnexpectedEof)?;
        let bytes = self.data.get(self.offset..end).ok_or(DecodeError::UnexpectedEof)?;
        self.offset = end;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn make_encodes_big_endian() {
        let cases: &[(Opcode, &[usize], &[u8])] = &[
            (Opcode::OpConstant, &[65534], &[Opcode::OpConstant as u8, 255, 254]),
            (Opcode::OpAdd, &[], &[Opcode::OpAdd as u8]),
            (Opcode::OpGetLocal, &[255], &[Opcode::OpGetLocal as u8, 255]),
            (Opcode::OpClosure, &[65534, 255], &[Opcode::OpClosure as u8, 255, 254, 255]),
        ];
        for (op, operands, expected) in cases {
            assert_eq!(make(*op, operands), *expected, "op: {op}");
        }
    }

    #[test]
    fn read_operands_round_trip() {
        let cases: &[(Opcode, &[usize])] = &[
            (Opcode::OpConstant, &[65535]),
            (Opcode::OpJump, &[12]),
            (Opcode::OpGetLocal, &[255]),
            (Opcode::OpCall, &[3]),
            (Opcode::OpClosure, &[65535, 255]),
            (Opcode::OpAdd, &[]),
        ];
        for (op, operands) in cases {
            let encoded = make(*op, operands);
            let widths = op.operand_widths();
            let (decoded, read) = read_operands(widths, &encoded[1..]);
            assert_eq!(read, widths.iter().sum::<usize>(), "op: {op}");
            assert_eq!(decoded.as_slice(), *operands, "op: {op}");
        }
    }

    #[test]
    fn disassembly_format() {
        let mut ins = Instructions::new();
        ins.push(&make(Opcode::OpAdd, &[]));
        ins.push(&make(Opcode::OpGetLocal, &[1]));
        ins.push(&make(Opcode::OpConstant, &[2]));
        ins.push(&make(Opcode::OpConstant, &[65535]));
        ins.push(&make(Opcode::OpClosure, &[65535, 255]));
        let expected = "\
0000 OpAdd
0001 OpGetLocal 1
0003 OpConstant 2
0006 OpConstant 65535
0009 OpClosure 65535 255
";
        assert_eq!(ins.to_string(), expected);
    }

    #[test]
    fn replace_operands_rewrites_in_place() {
        let mut ins = Instructions::new();
        let pos = ins.push(&make(Opcode::OpJump, &[0]));
        ins.push(&make(Opcode::OpNull, &[]));
        ins.replace_operands(pos, &[42]);
        assert_eq!(ins.bytes(), &[Opcode::OpJump as u8, 0, 42, Opcode::OpNull as u8]);
    }

    fn compiled_fn(bytes: Vec<u8>, num_locals: usize, num_params: usize) -> Object {
        Object::CompiledFunction(Rc::new(CompiledFunction {
            instructions: Instructions::from_bytes(bytes),
            num_locals,
            num_params,
        }))
    }

    #[test]
    fn constant_encoded_sizes() {
        // tag byte + fixed payloads, as in the container format
        let cases: &[(Object, usize)] = &[
            (Object::Integer(0), 9),
            (Object::Integer(-12), 9),
            (Object::Integer(i64::MAX), 9),
            (Object::Float(0.0), 9),
            (Object::Float(-1.5), 9),
            (Object::Str("".into()), 9),
            (Object::Str("hello, world".into()), 21),
            (compiled_fn(vec![], 0, 0), 25),
            (compiled_fn(vec![0, 0, 0, 0, 0, 1, 7, 8, 0, 0, 2, 0, 0, 3, 12, 22, 0, 5, 18, 0, 0], 5, 3), 46),
        ];
        for (constant, expected) in cases {
            let mut out = Vec::new();
            marshal_constant(constant, &mut out).unwrap();
            assert_eq!(out.len(), *expected, "constant: {}", constant.inspect());
        }
    }

    #[test]
    fn bytecode_round_trip() {
        let mut instructions = Instructions::new();
        instructions.push(&make(Opcode::OpConstant, &[0]));
        instructions.push(&make(Opcode::OpConstant, &[1]));
        instructions.push(&make(Opcode::OpAdd, &[]));
        instructions.push(&make(Opcode::OpPop, &[]));
        let bytecode = Bytecode {
            instructions,
            constants: vec![
                Object::Integer(-42),
                Object::Float(3.25),
                Object::Str("joker".into()),
                compiled_fn(make(Opcode::OpReturn, &[]), 2, 1),
            ],
        };
        let data = bytecode.marshal().unwrap();
        let decoded = Bytecode::unmarshal(&data).unwrap();
        assert_eq!(decoded, bytecode);
    }

    #[test]
    fn empty_bytecode_round_trip() {
        let bytecode = Bytecode::default();
        let decoded = Bytecode::unmarshal(&bytecode.marshal().unwrap()).unwrap();
        assert_eq!(decoded, bytecode);
    }

    #[test]
    fn unencodable_constants_are_rejected() {
        let bytecode = Bytecode {
            instructions: Instructions::new(),
            constants: vec![Object::Null],
        };
        assert_eq!(bytecode.marshal(), Err(EncodeError { kind: Type::Null }));
    }

    #[test]
    fn unknown_tag_is_a_hard_error() {
        let bytecode = Bytecode::default();
        let mut data = bytecode.marshal().unwrap();
        // claim one constant, then provide a bogus tag
        data[8..16].copy_from_slice(&1_u64.to_be_bytes());
        data.push(99);
        assert_eq!(Bytecode::unmarshal(&data), Err(DecodeError::UnknownTag(99)));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytecode = Bytecode {
            instructions: Instructions::from_bytes(vec![0, 0, 0]),
            constants: vec![Object::Integer(7)],
        };
        let data = bytecode.marshal().unwrap();
        assert_eq!(
            Bytecode::unmarshal(&data[..data.len() - 1]),
            Err(DecodeError::UnexpectedEof)
        );
    }

    #[test]
    fn negative_integer_wraps_through_u64() {
        let bytecode = Bytecode {
            instructions: Instructions::new(),
            constants: vec![Object::Integer(i64::MIN), Object::Integer(-1)],
        };
        let decoded = Bytecode::unmarshal(&bytecode.marshal().unwrap()).unwrap();
        assert_eq!(decoded.constants, bytecode.constants);
    }
}
