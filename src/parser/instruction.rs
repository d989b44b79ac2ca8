//! Instruction decoding from binary format

use super::reader::Reader;
use super::DecodeError;
use crate::instruction::simd::{self, SimdSignature};
use crate::instruction::{BlockType, Instruction, MemArg};
use crate::limits::MAX_BR_TABLE_LABELS;

const BLOCK_TYPE_EMPTY: u8 = 0x40;

fn memarg(reader: &mut Reader) -> Result<MemArg, DecodeError> {
    let align = reader.read_vu32()?;
    let offset = reader.read_vu32()?;
    Ok(MemArg { align, offset })
}

fn block_type(reader: &mut Reader) -> Result<BlockType, DecodeError> {
    let b = reader.read_byte()?;
    if b == BLOCK_TYPE_EMPTY {
        return Ok(BlockType::Empty);
    }
    // single-byte negative numbers are value type tags
    if b & 0xc0 == 0x40 {
        return Ok(BlockType::Value(b));
    }
    let index = reader.read_vs33_from(b)?;
    if index < 0 {
        return Err(DecodeError::Malformed(format!("malformed block type {index}")));
    }
    Ok(BlockType::FuncType(index as u32))
}

fn reserved_zero(reader: &mut Reader, name: &str) -> Result<(), DecodeError> {
    let byte = reader.read_byte()?;
    if byte != 0x00 {
        return Err(DecodeError::Malformed(format!(
            "{name} reserved byte must be 0x00, got 0x{byte:02x}"
        )));
    }
    Ok(())
}

fn lane(reader: &mut Reader) -> Result<u8, DecodeError> {
    Ok(reader.read_byte()?)
}

/// Decode one instruction, immediates included.
pub fn decode(reader: &mut Reader) -> Result<Instruction, DecodeError> {
    let opcode = reader.read_byte()?;

    use Instruction::*;
    Ok(match opcode {
        // Control instructions (0x00-0x11)
        0x00 => Unreachable,
        0x01 => Nop,
        0x02 => Block {
            block_type: block_type(reader)?,
        },
        0x03 => Loop {
            block_type: block_type(reader)?,
        },
        0x04 => If {
            block_type: block_type(reader)?,
        },
        0x05 => Else,
        0x0B => End,
        0x0C => Br {
            label_idx: reader.read_vu32()?,
        },
        0x0D => BrIf {
            label_idx: reader.read_vu32()?,
        },
        0x0E => {
            let count = reader.read_count()?;
            if count > MAX_BR_TABLE_LABELS {
                return Err(DecodeError::Malformed(format!(
                    "br_table with {count} labels exceeds the implementation limit"
                )));
            }
            let mut labels = Vec::with_capacity(count as usize);
            for _ in 0..count {
                labels.push(reader.read_vu32()?);
            }
            let default = reader.read_vu32()?;
            BrTable { labels, default }
        }
        0x0F => Return,
        0x10 => Call {
            func_idx: reader.read_vu32()?,
        },
        0x11 => CallIndirect {
            type_idx: reader.read_vu32()?,
            table_idx: reader.read_vu32()?,
        },

        // Reference instructions (0xD0-0xD2)
        0xD0 => RefNull {
            ref_type: reader.read_byte()?,
        },
        0xD1 => RefIsNull,
        0xD2 => RefFunc {
            func_idx: reader.read_vu32()?,
        },

        // Parametric instructions (0x1A-0x1C)
        0x1A => Drop,
        0x1B => Select,
        0x1C => {
            let count = reader.read_count()?;
            SelectTyped {
                val_types: reader.read_bytes(count as usize)?.to_vec(),
            }
        }

        // Variable instructions (0x20-0x24)
        0x20 => LocalGet {
            local_idx: reader.read_vu32()?,
        },
        0x21 => LocalSet {
            local_idx: reader.read_vu32()?,
        },
        0x22 => LocalTee {
            local_idx: reader.read_vu32()?,
        },
        0x23 => GlobalGet {
            global_idx: reader.read_vu32()?,
        },
        0x24 => GlobalSet {
            global_idx: reader.read_vu32()?,
        },

        // Table instructions (0x25-0x26)
        0x25 => TableGet {
            table_idx: reader.read_vu32()?,
        },
        0x26 => TableSet {
            table_idx: reader.read_vu32()?,
        },

        // Memory instructions (0x28-0x40)
        0x28 => I32Load { memarg: memarg(reader)? },
        0x29 => I64Load { memarg: memarg(reader)? },
        0x2A => F32Load { memarg: memarg(reader)? },
        0x2B => F64Load { memarg: memarg(reader)? },
        0x2C => I32Load8S { memarg: memarg(reader)? },
        0x2D => I32Load8U { memarg: memarg(reader)? },
        0x2E => I32Load16S { memarg: memarg(reader)? },
        0x2F => I32Load16U { memarg: memarg(reader)? },
        0x30 => I64Load8S { memarg: memarg(reader)? },
        0x31 => I64Load8U { memarg: memarg(reader)? },
        0x32 => I64Load16S { memarg: memarg(reader)? },
        0x33 => I64Load16U { memarg: memarg(reader)? },
        0x34 => I64Load32S { memarg: memarg(reader)? },
        0x35 => I64Load32U { memarg: memarg(reader)? },
        0x36 => I32Store { memarg: memarg(reader)? },
        0x37 => I64Store { memarg: memarg(reader)? },
        0x38 => F32Store { memarg: memarg(reader)? },
        0x39 => F64Store { memarg: memarg(reader)? },
        0x3A => I32Store8 { memarg: memarg(reader)? },
        0x3B => I32Store16 { memarg: memarg(reader)? },
        0x3C => I64Store8 { memarg: memarg(reader)? },
        0x3D => I64Store16 { memarg: memarg(reader)? },
        0x3E => I64Store32 { memarg: memarg(reader)? },
        0x3F => {
            reserved_zero(reader, "memory.size")?;
            MemorySize
        }
        0x40 => {
            reserved_zero(reader, "memory.grow")?;
            MemoryGrow
        }

        // Numeric instructions (0x41-0xC4)
        0x41 => I32Const {
            value: reader.read_vs32()?,
        },
        0x42 => I64Const {
            value: reader.read_vs64()?,
        },
        0x43 => F32Const {
            value: reader.read_f32()?,
        },
        0x44 => F64Const {
            value: reader.read_f64()?,
        },

        // i32 operations
        0x45 => I32Eqz,
        0x46 => I32Eq,
        0x47 => I32Ne,
        0x48 => I32LtS,
        0x49 => I32LtU,
        0x4A => I32GtS,
        0x4B => I32GtU,
        0x4C => I32LeS,
        0x4D => I32LeU,
        0x4E => I32GeS,
        0x4F => I32GeU,

        // i64 operations
        0x50 => I64Eqz,
        0x51 => I64Eq,
        0x52 => I64Ne,
        0x53 => I64LtS,
        0x54 => I64LtU,
        0x55 => I64GtS,
        0x56 => I64GtU,
        0x57 => I64LeS,
        0x58 => I64LeU,
        0x59 => I64GeS,
        0x5A => I64GeU,

        // f32 operations
        0x5B => F32Eq,
        0x5C => F32Ne,
        0x5D => F32Lt,
        0x5E => F32Gt,
        0x5F => F32Le,
        0x60 => F32Ge,

        // f64 operations
        0x61 => F64Eq,
        0x62 => F64Ne,
        0x63 => F64Lt,
        0x64 => F64Gt,
        0x65 => F64Le,
        0x66 => F64Ge,

        // i32 arithmetic
        0x67 => I32Clz,
        0x68 => I32Ctz,
        0x69 => I32Popcnt,
        0x6A => I32Add,
        0x6B => I32Sub,
        0x6C => I32Mul,
        0x6D => I32DivS,
        0x6E => I32DivU,
        0x6F => I32RemS,
        0x70 => I32RemU,
        0x71 => I32And,
        0x72 => I32Or,
        0x73 => I32Xor,
        0x74 => I32Shl,
        0x75 => I32ShrS,
        0x76 => I32ShrU,
        0x77 => I32Rotl,
        0x78 => I32Rotr,

        // i64 arithmetic
        0x79 => I64Clz,
        0x7A => I64Ctz,
        0x7B => I64Popcnt,
        0x7C => I64Add,
        0x7D => I64Sub,
        0x7E => I64Mul,
        0x7F => I64DivS,
        0x80 => I64DivU,
        0x81 => I64RemS,
        0x82 => I64RemU,
        0x83 => I64And,
        0x84 => I64Or,
        0x85 => I64Xor,
        0x86 => I64Shl,
        0x87 => I64ShrS,
        0x88 => I64ShrU,
        0x89 => I64Rotl,
        0x8A => I64Rotr,

        // f32 arithmetic
        0x8B => F32Abs,
        0x8C => F32Neg,
        0x8D => F32Ceil,
        0x8E => F32Floor,
        0x8F => F32Trunc,
        0x90 => F32Nearest,
        0x91 => F32Sqrt,
        0x92 => F32Add,
        0x93 => F32Sub,
        0x94 => F32Mul,
        0x95 => F32Div,
        0x96 => F32Min,
        0x97 => F32Max,
        0x98 => F32Copysign,

        // f64 arithmetic
        0x99 => F64Abs,
        0x9A => F64Neg,
        0x9B => F64Ceil,
        0x9C => F64Floor,
        0x9D => F64Trunc,
        0x9E => F64Nearest,
        0x9F => F64Sqrt,
        0xA0 => F64Add,
        0xA1 => F64Sub,
        0xA2 => F64Mul,
        0xA3 => F64Div,
        0xA4 => F64Min,
        0xA5 => F64Max,
        0xA6 => F64Copysign,

        // Conversions
        0xA7 => I32WrapI64,
        0xA8 => I32TruncF32S,
        0xA9 => I32TruncF32U,
        0xAA => I32TruncF64S,
        0xAB => I32TruncF64U,
        0xAC => I64ExtendI32S,
        0xAD => I64ExtendI32U,
        0xAE => I64TruncF32S,
        0xAF => I64TruncF32U,
        0xB0 => I64TruncF64S,
        0xB1 => I64TruncF64U,
        0xB2 => F32ConvertI32S,
        0xB3 => F32ConvertI32U,
        0xB4 => F32ConvertI64S,
        0xB5 => F32ConvertI64U,
        0xB6 => F32DemoteF64,
        0xB7 => F64ConvertI32S,
        0xB8 => F64ConvertI32U,
        0xB9 => F64ConvertI64S,
        0xBA => F64ConvertI64U,
        0xBB => F64PromoteF32,
        0xBC => I32ReinterpretF32,
        0xBD => I64ReinterpretF64,
        0xBE => F32ReinterpretI32,
        0xBF => F64ReinterpretI64,

        // Sign extension
        0xC0 => I32Extend8S,
        0xC1 => I32Extend16S,
        0xC2 => I64Extend8S,
        0xC3 => I64Extend16S,
        0xC4 => I64Extend32S,

        0xFC => decode_0xfc(reader.read_vu32()?, reader)?,
        0xFD => decode_0xfd(reader.read_vu32()?, reader)?,

        _ => return Err(DecodeError::UnknownOpcode(opcode)),
    })
}

/// Decode 0xFC prefix instructions
fn decode_0xfc(subopcode: u32, reader: &mut Reader) -> Result<Instruction, DecodeError> {
    use Instruction::*;

    Ok(match subopcode {
        // Saturating truncation instructions
        0x00 => I32TruncSatF32S,
        0x01 => I32TruncSatF32U,
        0x02 => I32TruncSatF64S,
        0x03 => I32TruncSatF64U,
        0x04 => I64TruncSatF32S,
        0x05 => I64TruncSatF32U,
        0x06 => I64TruncSatF64S,
        0x07 => I64TruncSatF64U,

        // Memory instructions
        0x08 => {
            let data_idx = reader.read_vu32()?;
            reserved_zero(reader, "memory.init")?;
            MemoryInit { data_idx }
        }
        0x09 => DataDrop {
            data_idx: reader.read_vu32()?,
        },
        0x0A => {
            reserved_zero(reader, "memory.copy")?;
            reserved_zero(reader, "memory.copy")?;
            MemoryCopy
        }
        0x0B => {
            reserved_zero(reader, "memory.fill")?;
            MemoryFill
        }

        // Table instructions
        0x0C => TableInit {
            elem_idx: reader.read_vu32()?,
            table_idx: reader.read_vu32()?,
        },
        0x0D => ElemDrop {
            elem_idx: reader.read_vu32()?,
        },
        0x0E => TableCopy {
            dst_table: reader.read_vu32()?,
            src_table: reader.read_vu32()?,
        },
        0x0F => TableGrow {
            table_idx: reader.read_vu32()?,
        },
        0x10 => TableSize {
            table_idx: reader.read_vu32()?,
        },
        0x11 => TableFill {
            table_idx: reader.read_vu32()?,
        },

        _ => return Err(DecodeError::UnknownInstruction(0xFC, subopcode)),
    })
}

/// Decode 0xFD prefix instructions (SIMD). Immediates follow from the
/// sub-opcode's signature.
fn decode_0xfd(subopcode: u32, reader: &mut Reader) -> Result<Instruction, DecodeError> {
    use Instruction::*;

    match subopcode {
        simd::V128_CONST => {
            return Ok(V128Const {
                value: reader.read_v128()?,
            })
        }
        simd::I8X16_SHUFFLE => {
            return Ok(I8x16Shuffle {
                lanes: reader.read_v128()?,
            })
        }
        _ => {}
    }

    let signature = simd::signature(subopcode)
        .ok_or(DecodeError::UnknownInstruction(0xFD, subopcode))?;
    Ok(match signature {
        SimdSignature::Fixed { .. } => Simd { subopcode },
        SimdSignature::ExtractLane { .. } | SimdSignature::ReplaceLane { .. } => SimdLane {
            subopcode,
            lane: lane(reader)?,
        },
        SimdSignature::Load { .. } | SimdSignature::Store { .. } => SimdMemory {
            subopcode,
            memarg: memarg(reader)?,
        },
        SimdSignature::LoadLane { .. } | SimdSignature::StoreLane { .. } => {
            let memarg = memarg(reader)?;
            SimdMemoryLane {
                subopcode,
                memarg,
                lane: lane(reader)?,
            }
        }
    })
}
