use std::collections::BTreeSet;

use nom::{
    combinator::map,
    error::{Error, ErrorKind},
    multi::count,
    number::complete::{be_i16, be_i32, be_i8, be_u16, be_u8},
    Err as BaseErr, IResult,
};

use crate::attribute_info::CodeAttribute;
use crate::constant_info::{ConstantInfo, ConstantPool};
use crate::error::UnsupportedBytecode;

use super::types::*;

type Err<E> = BaseErr<Error<E>>;

/// Absolute target of a relative branch. Targets outside the u32 range map
/// to `u32::MAX`, which is never an instruction start.
fn branch_target(address: u32, offset: i64) -> u32 {
    u32::try_from(address as i64 + offset).unwrap_or(u32::MAX)
}

fn branch16(input: &[u8], address: u32) -> IResult<&[u8], u32> {
    map(be_i16, |off| branch_target(address, off as i64))(input)
}

fn branch32(input: &[u8], address: u32) -> IResult<&[u8], u32> {
    map(be_i32, |off| branch_target(address, off as i64))(input)
}

fn slot8(input: &[u8]) -> IResult<&[u8], u16> {
    map(be_u8, |s| s as u16)(input)
}

fn invalid(input: &[u8], kind: ErrorKind) -> Err<&[u8]> {
    Err::Failure(Error::new(input, kind))
}

const LOAD_STORE_TYPES: [OperandType; 5] = [
    OperandType::Int,
    OperandType::Long,
    OperandType::Float,
    OperandType::Double,
    OperandType::Reference,
];

const ARRAY_TYPES: [OperandType; 8] = [
    OperandType::Int,
    OperandType::Long,
    OperandType::Float,
    OperandType::Double,
    OperandType::Reference,
    OperandType::Byte,
    OperandType::Char,
    OperandType::Short,
];

const NUMERIC_TYPES: [OperandType; 4] = [
    OperandType::Int,
    OperandType::Long,
    OperandType::Float,
    OperandType::Double,
];

fn switch_padding(address: u32) -> usize {
    ((4 - (address + 1) % 4) % 4) as usize
}

fn tableswitch_parser(input: &[u8], address: u32) -> IResult<&[u8], InstructionKind> {
    let (input, _) = nom::bytes::complete::take(switch_padding(address))(input)?;
    let (input, default) = branch32(input, address)?;
    let (input, low) = be_i32(input)?;
    let (input, high) = be_i32(input)?;
    if high < low {
        return Err(invalid(input, ErrorKind::Verify));
    }
    let n = (high as i64 - low as i64 + 1) as usize;
    if n.saturating_mul(4) > input.len() {
        return Err(invalid(input, ErrorKind::Eof));
    }
    let (input, targets) = count(|i| branch32(i, address), n)(input)?;
    let cases = targets
        .into_iter()
        .enumerate()
        .map(|(i, target)| ((low as i64 + i as i64) as i32, target))
        .collect();
    Ok((input, InstructionKind::Switch { default, cases }))
}

fn lookupswitch_parser(input: &[u8], address: u32) -> IResult<&[u8], InstructionKind> {
    let (input, _) = nom::bytes::complete::take(switch_padding(address))(input)?;
    let (input, default) = branch32(input, address)?;
    let (input, npairs) = be_i32(input)?;
    if npairs < 0 {
        return Err(invalid(input, ErrorKind::Verify));
    }
    if (npairs as usize).saturating_mul(8) > input.len() {
        return Err(invalid(input, ErrorKind::Eof));
    }
    let (input, mut cases) = count(
        |i| {
            let (i, key) = be_i32(i)?;
            let (i, target) = branch32(i, address)?;
            Ok((i, (key, target)))
        },
        npairs as usize,
    )(input)?;
    cases.sort_by_key(|(key, _)| *key);
    Ok((input, InstructionKind::Switch { default, cases }))
}

fn wide_parser(input: &[u8]) -> IResult<&[u8], InstructionKind> {
    use InstructionKind::*;
    let (input, opcode) = be_u8(input)?;
    match opcode {
        0x15..=0x19 => map(be_u16, |slot| Load {
            ty: LOAD_STORE_TYPES[(opcode - 0x15) as usize],
            slot,
        })(input),
        0x36..=0x3a => map(be_u16, |slot| Store {
            ty: LOAD_STORE_TYPES[(opcode - 0x36) as usize],
            slot,
        })(input),
        0xa9 => map(be_u16, Ret)(input),
        0x84 => {
            let (input, slot) = be_u16(input)?;
            let (input, delta) = be_i16(input)?;
            Ok((input, Iinc { slot, delta }))
        }
        _ => Err(invalid(input, ErrorKind::Tag)),
    }
}

/// Decodes the instruction starting at `address`.
pub fn instruction_parser(input: &[u8], address: u32) -> IResult<&[u8], InstructionKind> {
    use InstructionKind::*;
    let (input, opcode) = be_u8(input)?;
    match opcode {
        0x00 => Ok((input, Nop)),
        0x01 => Ok((input, AconstNull)),
        0x02..=0x08 => Ok((
            input,
            Push {
                value: opcode as i32 - 3,
                form: PushForm::Iconst,
            },
        )),
        0x09 | 0x0a => Ok((input, LongConst((opcode - 0x09) as i64))),
        0x0b..=0x0d => Ok((input, FloatConst((opcode - 0x0b) as f32))),
        0x0e | 0x0f => Ok((input, DoubleConst((opcode - 0x0e) as f64))),
        0x10 => map(be_i8, |v| Push {
            value: v as i32,
            form: PushForm::Bipush,
        })(input),
        0x11 => map(be_i16, |v| Push {
            value: v as i32,
            form: PushForm::Sipush,
        })(input),
        0x12 => map(be_u8, |i| Ldc(i as u16))(input),
        0x13 | 0x14 => map(be_u16, Ldc)(input),
        0x15..=0x19 => map(slot8, |slot| Load {
            ty: LOAD_STORE_TYPES[(opcode - 0x15) as usize],
            slot,
        })(input),
        0x1a..=0x2d => {
            let n = opcode - 0x1a;
            Ok((
                input,
                Load {
                    ty: LOAD_STORE_TYPES[(n / 4) as usize],
                    slot: (n % 4) as u16,
                },
            ))
        }
        0x2e..=0x35 => Ok((input, ArrayLoad(ARRAY_TYPES[(opcode - 0x2e) as usize]))),
        0x36..=0x3a => map(slot8, |slot| Store {
            ty: LOAD_STORE_TYPES[(opcode - 0x36) as usize],
            slot,
        })(input),
        0x3b..=0x4e => {
            let n = opcode - 0x3b;
            Ok((
                input,
                Store {
                    ty: LOAD_STORE_TYPES[(n / 4) as usize],
                    slot: (n % 4) as u16,
                },
            ))
        }
        0x4f..=0x56 => Ok((input, ArrayStore(ARRAY_TYPES[(opcode - 0x4f) as usize]))),
        0x57 => Ok((input, Stack(StackOp::Pop))),
        0x58 => Ok((input, Stack(StackOp::Pop2))),
        0x59 => Ok((input, Stack(StackOp::Dup))),
        0x5a => Ok((input, Stack(StackOp::DupX1))),
        0x5b => Ok((input, Stack(StackOp::DupX2))),
        0x5c => Ok((input, Stack(StackOp::Dup2))),
        0x5d => Ok((input, Stack(StackOp::Dup2X1))),
        0x5e => Ok((input, Stack(StackOp::Dup2X2))),
        0x5f => Ok((input, Stack(StackOp::Swap))),
        0x60..=0x73 => {
            let n = opcode - 0x60;
            let op = [ArithOp::Add, ArithOp::Sub, ArithOp::Mul, ArithOp::Div, ArithOp::Rem]
                [(n / 4) as usize];
            Ok((
                input,
                Arith {
                    op,
                    ty: NUMERIC_TYPES[(n % 4) as usize],
                },
            ))
        }
        0x74..=0x77 => Ok((input, Neg(NUMERIC_TYPES[(opcode - 0x74) as usize]))),
        0x78..=0x83 => {
            let n = opcode - 0x78;
            let op = [
                ArithOp::Shl,
                ArithOp::Shr,
                ArithOp::Ushr,
                ArithOp::And,
                ArithOp::Or,
                ArithOp::Xor,
            ][(n / 2) as usize];
            let ty = if n % 2 == 0 {
                OperandType::Int
            } else {
                OperandType::Long
            };
            Ok((input, Arith { op, ty }))
        }
        0x84 => {
            let (input, slot) = slot8(input)?;
            let (input, delta) = be_i8(input)?;
            Ok((
                input,
                Iinc {
                    slot,
                    delta: delta as i16,
                },
            ))
        }
        0x85..=0x93 => {
            use OperandType::*;
            let (from, to) = [
                (Int, Long),
                (Int, Float),
                (Int, Double),
                (Long, Int),
                (Long, Float),
                (Long, Double),
                (Float, Int),
                (Float, Long),
                (Float, Double),
                (Double, Int),
                (Double, Long),
                (Double, Float),
                (Int, Byte),
                (Int, Char),
                (Int, Short),
            ][(opcode - 0x85) as usize];
            Ok((input, Convert { from, to }))
        }
        0x94 => Ok((input, CompareValues(ValueCompare::Long))),
        0x95 => Ok((input, CompareValues(ValueCompare::FloatL))),
        0x96 => Ok((input, CompareValues(ValueCompare::FloatG))),
        0x97 => Ok((input, CompareValues(ValueCompare::DoubleL))),
        0x98 => Ok((input, CompareValues(ValueCompare::DoubleG))),
        0x99..=0xa6 => {
            let (input, target) = branch16(input, address)?;
            let ops = [
                CompareOp::Eq,
                CompareOp::Ne,
                CompareOp::Lt,
                CompareOp::Ge,
                CompareOp::Gt,
                CompareOp::Le,
            ];
            let kind = match opcode {
                0x99..=0x9e => IfZero {
                    op: ops[(opcode - 0x99) as usize],
                    target,
                },
                0x9f..=0xa4 => IfCompare {
                    op: ops[(opcode - 0x9f) as usize],
                    reference: false,
                    target,
                },
                _ => IfCompare {
                    op: ops[(opcode - 0xa5) as usize],
                    reference: true,
                    target,
                },
            };
            Ok((input, kind))
        }
        0xa7 => map(|i| branch16(i, address), Goto)(input),
        0xa8 => map(|i| branch16(i, address), Jsr)(input),
        0xa9 => map(slot8, Ret)(input),
        0xaa => tableswitch_parser(input, address),
        0xab => lookupswitch_parser(input, address),
        0xac..=0xb0 => Ok((
            input,
            Return(Some(LOAD_STORE_TYPES[(opcode - 0xac) as usize])),
        )),
        0xb1 => Ok((input, Return(None))),
        0xb2..=0xb5 => {
            let op = [
                FieldOp::GetStatic,
                FieldOp::PutStatic,
                FieldOp::GetField,
                FieldOp::PutField,
            ][(opcode - 0xb2) as usize];
            map(be_u16, move |index| Field { op, index })(input)
        }
        0xb6..=0xb8 => {
            let kind = [InvokeKind::Virtual, InvokeKind::Special, InvokeKind::Static]
                [(opcode - 0xb6) as usize];
            map(be_u16, move |index| Invoke { kind, index })(input)
        }
        0xb9 => {
            let (input, index) = be_u16(input)?;
            let (input, _count) = be_u8(input)?;
            let (input, _zero) = be_u8(input)?;
            Ok((
                input,
                Invoke {
                    kind: InvokeKind::Interface,
                    index,
                },
            ))
        }
        0xba => {
            let (input, index) = be_u16(input)?;
            let (input, _zero) = be_u16(input)?;
            Ok((input, InvokeDynamic(index)))
        }
        0xbb => map(be_u16, New)(input),
        0xbc => {
            let (rest, atype) = be_u8(input)?;
            let ty = match atype {
                4 => OperandType::Boolean,
                5 => OperandType::Char,
                6 => OperandType::Float,
                7 => OperandType::Double,
                8 => OperandType::Byte,
                9 => OperandType::Short,
                10 => OperandType::Int,
                11 => OperandType::Long,
                _ => return Err(invalid(input, ErrorKind::Verify)),
            };
            Ok((rest, NewArray(ty)))
        }
        0xbd => map(be_u16, ANewArray)(input),
        0xbe => Ok((input, ArrayLength)),
        0xbf => Ok((input, Throw)),
        0xc0 => map(be_u16, CheckCast)(input),
        0xc1 => map(be_u16, InstanceOf)(input),
        0xc2 => Ok((input, MonitorEnter)),
        0xc3 => Ok((input, MonitorExit)),
        0xc4 => wide_parser(input),
        0xc5 => {
            let (input, index) = be_u16(input)?;
            let (input, dimensions) = be_u8(input)?;
            Ok((input, MultiANewArray { index, dimensions }))
        }
        0xc6 => map(|i| branch16(i, address), |target| IfNull { null: true, target })(input),
        0xc7 => map(|i| branch16(i, address), |target| IfNull { null: false, target })(input),
        0xc8 => map(|i| branch32(i, address), Goto)(input),
        0xc9 => map(|i| branch32(i, address), Jsr)(input),
        _ => Err(invalid(input, ErrorKind::Tag)),
    }
}

/// Decodes instructions until the input is exhausted or an instruction
/// fails to decode; the undecoded remainder is returned.
pub fn code_parser(code: &[u8]) -> IResult<&[u8], Vec<(u32, InstructionKind)>> {
    let mut instructions = Vec::new();
    let mut input = code;
    while !input.is_empty() {
        let address = (code.len() - input.len()) as u32;
        match instruction_parser(input, address) {
            Ok((rest, kind)) => {
                instructions.push((address, kind));
                input = rest;
            }
            Err(_) => break,
        }
    }
    Ok((input, instructions))
}

/// Decodes a method's code attribute: instructions with absolute branch
/// targets and line numbers, plus the exception table as catch blocks.
pub fn decode_method(
    code: &CodeAttribute,
    pool: &ConstantPool,
) -> Result<DecodedMethod, UnsupportedBytecode> {
    if let Some(name) = code.malformed_attribute() {
        return Err(UnsupportedBytecode::MalformedAttribute {
            name: name.to_string(),
        });
    }

    let mut lines: Vec<(u32, u16)> = code
        .line_number_table()
        .map(|t| {
            t.line_number_table
                .iter()
                .map(|e| (e.start_pc as u32, e.line_number))
                .collect()
        })
        .unwrap_or_default();
    lines.sort_by_key(|(pc, _)| *pc);

    let bytes = &code.code;
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let address = offset as u32;
        let (rest, kind) = instruction_parser(&bytes[offset..], address)
            .map_err(|e| decode_error(&e, bytes, address))?;
        let length = (bytes.len() - offset - rest.len()) as u32;
        let line_number = match lines.partition_point(|(pc, _)| *pc <= address) {
            0 => None,
            n => Some(lines[n - 1].1),
        };
        instructions.push(Instruction {
            offset: address,
            length,
            line_number,
            kind,
        });
        offset += length as usize;
    }

    let starts: BTreeSet<u32> = instructions.iter().map(|i| i.offset).collect();
    for instruction in &instructions {
        for target in instruction.kind.branch_targets() {
            if !starts.contains(&target) {
                return Err(UnsupportedBytecode::BadBranchTarget {
                    offset: instruction.offset,
                    target,
                });
            }
        }
        check_constant_operand(instruction, pool)?;
    }

    let code_length = bytes.len() as u32;
    let mut catch_blocks = Vec::with_capacity(code.exception_table.len());
    for entry in &code.exception_table {
        let (start, end, handler) = (
            entry.start_pc as u32,
            entry.end_pc as u32,
            entry.handler_pc as u32,
        );
        let valid = start < end
            && starts.contains(&start)
            && starts.contains(&handler)
            && (end == code_length || starts.contains(&end));
        if !valid {
            return Err(UnsupportedBytecode::BadExceptionRange {
                start_pc: entry.start_pc,
                end_pc: entry.end_pc,
                handler_pc: entry.handler_pc,
            });
        }
        let catch_type = match entry.catch_type {
            0 => None,
            index => Some(
                pool.class_name(index)
                    .ok_or(UnsupportedBytecode::BadConstantIndex {
                        offset: handler,
                        index,
                    })?
                    .to_string(),
            ),
        };
        catch_blocks.push(CatchBlock {
            start_pc: start,
            end_pc: end,
            handler_pc: handler,
            catch_type,
        });
    }

    Ok(DecodedMethod {
        instructions,
        catch_blocks,
        max_stack: code.max_stack,
        max_locals: code.max_locals,
        code_length,
    })
}

fn decode_error(error: &Err<&[u8]>, code: &[u8], address: u32) -> UnsupportedBytecode {
    let kind = match error {
        BaseErr::Error(e) | BaseErr::Failure(e) => e.code,
        BaseErr::Incomplete(_) => ErrorKind::Eof,
    };
    match kind {
        ErrorKind::Tag => UnsupportedBytecode::UnknownOpcode {
            offset: address,
            opcode: code[address as usize],
        },
        ErrorKind::Verify => UnsupportedBytecode::MalformedInstruction { offset: address },
        _ => UnsupportedBytecode::Truncated { offset: address },
    }
}

fn check_constant_operand(
    instruction: &Instruction,
    pool: &ConstantPool,
) -> Result<(), UnsupportedBytecode> {
    use InstructionKind::*;
    let (index, ok): (u16, fn(&ConstantInfo) -> bool) = match &instruction.kind {
        Ldc(index) => (*index, |c| {
            matches!(
                c,
                ConstantInfo::Integer(_)
                    | ConstantInfo::Float(_)
                    | ConstantInfo::Long(_)
                    | ConstantInfo::Double(_)
                    | ConstantInfo::String(_)
                    | ConstantInfo::Class(_)
                    | ConstantInfo::MethodType(_)
                    | ConstantInfo::MethodHandle(_)
                    | ConstantInfo::Dynamic(_)
            )
        }),
        Field { index, .. } => (*index, |c| matches!(c, ConstantInfo::FieldRef(_))),
        Invoke { index, .. } => (*index, |c| {
            matches!(c, ConstantInfo::MethodRef(_) | ConstantInfo::InterfaceMethodRef(_))
        }),
        InvokeDynamic(index) => (*index, |c| matches!(c, ConstantInfo::InvokeDynamic(_))),
        New(index) | ANewArray(index) | CheckCast(index) | InstanceOf(index) => {
            (*index, |c| matches!(c, ConstantInfo::Class(_)))
        }
        MultiANewArray { index, .. } => (*index, |c| matches!(c, ConstantInfo::Class(_))),
        _ => return Ok(()),
    };
    match pool.get(index) {
        Some(constant) if ok(constant) => Ok(()),
        _ => Err(UnsupportedBytecode::BadConstantIndex {
            offset: instruction.offset,
            index,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sipush() {
        assert_eq!(
            Ok((
                &[][..],
                InstructionKind::Push {
                    value: -2,
                    form: PushForm::Sipush
                }
            )),
            instruction_parser(&[0x11, 0xff, 0xfe], 0)
        );
    }

    #[test]
    fn test_wide_load() {
        assert_eq!(
            Ok((
                &[][..],
                InstructionKind::Load {
                    ty: OperandType::Int,
                    slot: 0xaabb
                }
            )),
            instruction_parser(&[0xc4, 0x15, 0xaa, 0xbb], 0)
        );
    }

    #[test]
    fn test_short_forms() {
        let (_, kind) = instruction_parser(&[0x2b], 0).unwrap();
        assert_eq!(
            kind,
            InstructionKind::Load {
                ty: OperandType::Reference,
                slot: 1
            }
        );
        let (_, kind) = instruction_parser(&[0x48], 0).unwrap();
        assert_eq!(
            kind,
            InstructionKind::Store {
                ty: OperandType::Double,
                slot: 1
            }
        );
        let (_, kind) = instruction_parser(&[0x6d], 0).unwrap();
        assert_eq!(
            kind,
            InstructionKind::Arith {
                op: ArithOp::Div,
                ty: OperandType::Long
            }
        );
    }

    #[test]
    fn test_branch_is_absolute() {
        // goto -3 at address 10
        let (_, kind) = instruction_parser(&[0xa7, 0xff, 0xfd], 10).unwrap();
        assert_eq!(kind, InstructionKind::Goto(7));
        let (_, kind) = instruction_parser(&[0xa2, 0x00, 0x08], 4).unwrap();
        assert_eq!(
            kind,
            InstructionKind::IfCompare {
                op: CompareOp::Ge,
                reference: false,
                target: 12
            }
        );
    }

    #[test]
    fn test_tableswitch_alignment() {
        let cases = vec![
            (
                3,
                vec![
                    0xaa, 0, 0, 0, 10, 0, 0, 0, 20, 0, 0, 0, 21, 0, 0, 0, 30, 0, 0, 0, 31,
                ],
            ),
            (
                0,
                vec![
                    0xaa, 0, 0, 0, 0, 0, 0, 10, 0, 0, 0, 20, 0, 0, 0, 21, 0, 0, 0, 30, 0, 0, 0, 31,
                ],
            ),
        ];
        for (address, bytes) in cases {
            let (rest, kind) = instruction_parser(&bytes, address).unwrap();
            assert!(rest.is_empty());
            assert_eq!(
                kind,
                InstructionKind::Switch {
                    default: address + 10,
                    cases: vec![(20, address + 30), (21, address + 31)],
                }
            );
        }
    }

    #[test]
    fn test_lookupswitch_sorted() {
        let bytes = vec![
            0xab, 0, 0, 0, // opcode + padding at address 0
            0, 0, 0, 40, // default
            0, 0, 0, 2, // npairs
            0, 0, 0, 9, 0, 0, 0, 50, // 9 -> 50
            0, 0, 0, 1, 0, 0, 0, 60, // 1 -> 60
        ];
        let (_, kind) = instruction_parser(&bytes, 0).unwrap();
        assert_eq!(
            kind,
            InstructionKind::Switch {
                default: 40,
                cases: vec![(1, 60), (9, 50)],
            }
        );
    }

    #[test]
    fn test_incomplete() {
        let code = &[0x59, 0x59, 0xc4, 0x15]; // dup, dup, <incomplete iload/wide>
        let expected = Ok((
            &[0xc4, 0x15][..],
            vec![
                (0, InstructionKind::Stack(StackOp::Dup)),
                (1, InstructionKind::Stack(StackOp::Dup)),
            ],
        ));
        assert_eq!(expected, code_parser(code));
    }

    fn code(bytes: Vec<u8>) -> CodeAttribute {
        CodeAttribute {
            max_stack: 2,
            max_locals: 2,
            code: bytes,
            exception_table: Vec::new(),
            attributes: Vec::new(),
        }
    }

    #[test]
    fn test_decode_unknown_opcode() {
        let pool = ConstantPool::new();
        let err = decode_method(&code(vec![0x00, 0xcb]), &pool).unwrap_err();
        assert_eq!(
            err,
            UnsupportedBytecode::UnknownOpcode {
                offset: 1,
                opcode: 0xcb
            }
        );
    }

    #[test]
    fn test_decode_branch_into_operand() {
        let pool = ConstantPool::new();
        // 0: sipush 1; 3: goto 1
        let err = decode_method(&code(vec![0x11, 0x00, 0x01, 0xa7, 0xff, 0xfe]), &pool).unwrap_err();
        assert_eq!(
            err,
            UnsupportedBytecode::BadBranchTarget {
                offset: 3,
                target: 1
            }
        );
    }

    #[test]
    fn test_decode_bad_constant() {
        let pool = ConstantPool::new();
        let err = decode_method(&code(vec![0xb2, 0x00, 0x07, 0xb1]), &pool).unwrap_err();
        assert_eq!(
            err,
            UnsupportedBytecode::BadConstantIndex {
                offset: 0,
                index: 7
            }
        );
    }
}
