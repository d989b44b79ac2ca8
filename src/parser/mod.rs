//! Binary format producer: decodes a `.wasm` module and drives a
//! [`ModuleVisitor`] with its sections, entry by entry.
//!
//! The parser only enforces what the binary format itself requires (magic,
//! version, section framing and order, LEB128 ranges, opcode immediates).
//! Everything else is left to the visitor, typically a
//! [`ModuleValidator`](crate::validate::ModuleValidator).

mod instruction;
pub mod reader;

use crate::error::ValidationError;
use crate::instruction::Instruction;
use crate::types::{FuncTypeDecl, GlobalDecl, Limits, TableDecl, TYPE_FUNCREF};
use crate::visitor::{
    DataMode, DataSegment, ElementInit, ElementMode, ElementSegment, Export, ExprVisitor, Import,
    ImportDesc, LocalDecl, ModuleVisitor,
};
use log::debug;
use reader::Reader;
use std::io;
use thiserror::Error;

pub use instruction::decode as decode_instruction;

const MAGIC: u32 = 0x6d736100; // '\0asm'
const VERSION: u32 = 1;
const FUNC_TYPE: u8 = 0x60;

const SECTION_CUSTOM: u8 = 0;
const SECTION_TYPE: u8 = 1;
const SECTION_IMPORT: u8 = 2;
const SECTION_FUNCTION: u8 = 3;
const SECTION_TABLE: u8 = 4;
const SECTION_MEMORY: u8 = 5;
const SECTION_GLOBAL: u8 = 6;
const SECTION_EXPORT: u8 = 7;
const SECTION_START: u8 = 8;
const SECTION_ELEMENT: u8 = 9;
const SECTION_CODE: u8 = 10;
const SECTION_DATA: u8 = 11;
const SECTION_DATA_COUNT: u8 = 12;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("magic header not detected")]
    BadMagic,

    #[error("unknown binary version {0}")]
    UnknownVersion(u32),

    #[error("malformed section id {0}")]
    UnknownSection(u8),

    #[error("unexpected content after last section: section {0} out of order")]
    SectionOrder(u8),

    #[error("section size mismatch: section {id} declared {declared} bytes, {unused} left over")]
    SectionSize { id: u8, declared: u32, unused: usize },

    #[error("illegal opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("unknown instruction: 0x{0:02x} 0x{1:02x}")]
    UnknownInstruction(u8, u32),

    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DecodeError {
    /// The validation failure, if that is what stopped decoding.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            DecodeError::Validation(e) => Some(e),
            _ => None,
        }
    }

    fn in_function(self, index: u32) -> DecodeError {
        match self {
            DecodeError::Validation(e) => DecodeError::Validation(e.context(format!("function {index}"))),
            other => other,
        }
    }
}

/// Position of a non-custom section in the required order; the data count
/// section sits between element and code.
fn section_rank(id: u8) -> Option<u8> {
    Some(match id {
        SECTION_TYPE..=SECTION_ELEMENT => id,
        SECTION_DATA_COUNT => 10,
        SECTION_CODE => 11,
        SECTION_DATA => 12,
        _ => return None,
    })
}

/// Decode `bytes` and deliver every section entry to `visitor`, ending with
/// `visit_end`. Stops at the first decoding or visitor error.
pub fn parse(bytes: &[u8], visitor: &mut dyn ModuleVisitor) -> Result<(), DecodeError> {
    let mut reader = Reader::new(bytes);
    let magic = reader.read_u32().map_err(|_| DecodeError::BadMagic)?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = reader.read_u32()?;
    if version != VERSION {
        return Err(DecodeError::UnknownVersion(version));
    }
    visitor.visit_header(version)?;

    let mut parser = Parser::default();
    let mut last_rank = 0;
    while !reader.is_empty() {
        let id = reader.read_byte()?;
        let len = reader.read_vu32()?;
        let mut section = reader.sub_reader(len as usize)?;
        debug!("section {id}, {len} bytes at offset {}", reader.pos());

        if id != SECTION_CUSTOM {
            let rank = section_rank(id).ok_or(DecodeError::UnknownSection(id))?;
            if rank <= last_rank {
                return Err(DecodeError::SectionOrder(id));
            }
            last_rank = rank;
        }
        parser.section(id, &mut section, visitor)?;
        if !section.is_empty() {
            return Err(DecodeError::SectionSize {
                id,
                declared: len,
                unused: section.remaining(),
            });
        }
    }

    visitor.visit_end()?;
    Ok(())
}

#[derive(Default)]
struct Parser {
    imported_functions: u32,
    bodies: u32,
}

impl Parser {
    fn section(
        &mut self,
        id: u8,
        reader: &mut Reader,
        visitor: &mut dyn ModuleVisitor,
    ) -> Result<(), DecodeError> {
        match id {
            SECTION_CUSTOM => {
                let name = reader.read_string()?;
                let payload = reader.read_bytes(reader.remaining())?;
                visitor.visit_custom(&name, payload)?;
            }
            SECTION_TYPE => {
                for _ in 0..reader.read_count()? {
                    visitor.visit_type(&read_func_type(reader)?)?;
                }
            }
            SECTION_IMPORT => {
                for _ in 0..reader.read_count()? {
                    let import = self.read_import(reader)?;
                    visitor.visit_import(&import)?;
                }
            }
            SECTION_FUNCTION => {
                for _ in 0..reader.read_count()? {
                    visitor.visit_function(reader.read_vu32()?)?;
                }
            }
            SECTION_TABLE => {
                for _ in 0..reader.read_count()? {
                    visitor.visit_table(&read_table(reader)?)?;
                }
            }
            SECTION_MEMORY => {
                for _ in 0..reader.read_count()? {
                    visitor.visit_memory(&read_limits(reader)?)?;
                }
            }
            SECTION_GLOBAL => {
                for _ in 0..reader.read_count()? {
                    let global = read_global_type(reader)?;
                    read_expression(reader, visitor.visit_global(&global)?)?;
                }
            }
            SECTION_EXPORT => {
                for _ in 0..reader.read_count()? {
                    let export = Export {
                        name: reader.read_string()?,
                        kind: reader.read_byte()?,
                        index: reader.read_vu32()?,
                    };
                    visitor.visit_export(&export)?;
                }
            }
            SECTION_START => visitor.visit_start(reader.read_vu32()?)?,
            SECTION_ELEMENT => {
                for _ in 0..reader.read_count()? {
                    read_element(reader, visitor)?;
                }
            }
            SECTION_DATA_COUNT => visitor.visit_data_count(reader.read_vu32()?)?,
            SECTION_CODE => {
                for _ in 0..reader.read_count()? {
                    let index = self.imported_functions + self.bodies;
                    self.bodies += 1;
                    read_body(reader, visitor).map_err(|e| e.in_function(index))?;
                }
            }
            SECTION_DATA => {
                for _ in 0..reader.read_count()? {
                    read_data(reader, visitor)?;
                }
            }
            _ => return Err(DecodeError::UnknownSection(id)),
        }
        Ok(())
    }

    fn read_import(&mut self, reader: &mut Reader) -> Result<Import, DecodeError> {
        let module = reader.read_string()?;
        let name = reader.read_string()?;
        let desc = match reader.read_byte()? {
            0x00 => {
                self.imported_functions += 1;
                ImportDesc::Function(reader.read_vu32()?)
            }
            0x01 => ImportDesc::Table(read_table(reader)?),
            0x02 => ImportDesc::Memory(read_limits(reader)?),
            0x03 => ImportDesc::Global(read_global_type(reader)?),
            kind => {
                return Err(DecodeError::Malformed(format!(
                    "malformed import kind 0x{kind:02x}"
                )))
            }
        };
        Ok(Import { module, name, desc })
    }
}

fn read_func_type(reader: &mut Reader) -> Result<FuncTypeDecl, DecodeError> {
    let form = reader.read_byte()?;
    if form != FUNC_TYPE {
        return Err(DecodeError::Malformed(format!(
            "expected 0x60 to lead function type, got 0x{form:02x}"
        )));
    }
    let count = reader.read_count()?;
    let parameters = reader.read_bytes(count as usize)?.to_vec();
    let count = reader.read_count()?;
    let return_types = reader.read_bytes(count as usize)?.to_vec();
    Ok(FuncTypeDecl {
        parameters,
        return_types,
    })
}

fn read_limits(reader: &mut Reader) -> Result<Limits, DecodeError> {
    match reader.read_byte()? {
        0x00 => Ok(Limits::new(reader.read_vu32()? as u64, None)),
        0x01 => {
            let min = reader.read_vu32()? as u64;
            let max = reader.read_vu32()? as u64;
            Ok(Limits::new(min, Some(max)))
        }
        flag => Err(DecodeError::Malformed(format!(
            "malformed limits flag 0x{flag:02x}"
        ))),
    }
}

fn read_table(reader: &mut Reader) -> Result<TableDecl, DecodeError> {
    let elem_type = reader.read_byte()?;
    let limits = read_limits(reader)?;
    Ok(TableDecl { elem_type, limits })
}

fn read_global_type(reader: &mut Reader) -> Result<GlobalDecl, DecodeError> {
    Ok(GlobalDecl {
        value_type: reader.read_byte()?,
        mutability: reader.read_byte()?,
    })
}

/// Decode instructions up to and including the `end` that closes the
/// expression, streaming each one to `visitor`.
fn read_expression(
    reader: &mut Reader,
    mut visitor: Option<Box<dyn ExprVisitor + '_>>,
) -> Result<(), DecodeError> {
    let mut depth = 0usize;
    loop {
        let instruction = instruction::decode(reader)?;
        let done = match instruction {
            Instruction::Block { .. } | Instruction::Loop { .. } | Instruction::If { .. } => {
                depth += 1;
                false
            }
            Instruction::End if depth == 0 => true,
            Instruction::End => {
                depth -= 1;
                false
            }
            _ => false,
        };
        if let Some(visitor) = visitor.as_mut() {
            visitor.visit_instruction(&instruction)?;
        }
        if done {
            break;
        }
    }
    if let Some(mut visitor) = visitor {
        visitor.visit_end()?;
    }
    Ok(())
}

/// Decode an expression that has to be delivered after a later field.
fn buffer_expression(reader: &mut Reader) -> Result<Vec<Instruction>, DecodeError> {
    let mut instructions = Vec::new();
    let collector = crate::visitor::InstructionCollector::new(&mut instructions);
    read_expression(reader, Some(Box::new(collector)))?;
    Ok(instructions)
}

fn read_function_indices(reader: &mut Reader) -> Result<Vec<u32>, DecodeError> {
    let count = reader.read_count()?;
    let mut indices = Vec::with_capacity(count as usize);
    for _ in 0..count {
        indices.push(reader.read_vu32()?);
    }
    Ok(indices)
}

fn read_elem_kind(reader: &mut Reader) -> Result<u8, DecodeError> {
    match reader.read_byte()? {
        0x00 => Ok(TYPE_FUNCREF),
        kind => Err(DecodeError::Malformed(format!(
            "malformed element kind 0x{kind:02x}"
        ))),
    }
}

fn read_element(reader: &mut Reader, visitor: &mut dyn ModuleVisitor) -> Result<(), DecodeError> {
    let flags = reader.read_vu32()?;
    if flags > 7 {
        return Err(DecodeError::Malformed(format!(
            "malformed elements segment kind {flags}"
        )));
    }
    let passive_or_declarative = flags & 0x01 != 0;
    let explicit_table = flags & 0x02 != 0;
    let expressions = flags & 0x04 != 0;

    let mut offset = Vec::new();
    let mode = if passive_or_declarative {
        if explicit_table {
            ElementMode::Declarative
        } else {
            ElementMode::Passive
        }
    } else {
        let table_index = if explicit_table { reader.read_vu32()? } else { 0 };
        offset = buffer_expression(reader)?;
        ElementMode::Active { table_index }
    };

    // flags 0 and 4 imply funcref and carry no type or kind byte
    let typed = passive_or_declarative || explicit_table;
    let ref_type = match (typed, expressions) {
        (false, _) => TYPE_FUNCREF,
        (true, false) => read_elem_kind(reader)?,
        (true, true) => reader.read_byte()?,
    };

    let init = if expressions {
        ElementInit::Expressions
    } else {
        ElementInit::Functions(read_function_indices(reader)?)
    };
    let segment = ElementSegment {
        ref_type,
        mode,
        init,
    };
    visitor.visit_element(&segment)?;
    if let ElementMode::Active { .. } = segment.mode {
        crate::visitor::feed(visitor.visit_element_offset()?, &offset)?;
    }
    if expressions {
        for _ in 0..reader.read_count()? {
            read_expression(reader, visitor.visit_element_item()?)?;
        }
    }
    Ok(())
}

fn read_body(reader: &mut Reader, visitor: &mut dyn ModuleVisitor) -> Result<(), DecodeError> {
    let size = reader.read_vu32()?;
    let mut body = reader.sub_reader(size as usize)?;

    let count = body.read_count()?;
    let mut locals = Vec::with_capacity(count as usize);
    let mut total: u64 = 0;
    for _ in 0..count {
        let local = LocalDecl {
            count: body.read_vu32()?,
            value_type: body.read_byte()?,
        };
        total += local.count as u64;
        if total > u32::MAX as u64 {
            return Err(DecodeError::Malformed("too many locals".to_string()));
        }
        locals.push(local);
    }

    read_expression(&mut body, visitor.visit_code(&locals)?)?;
    if !body.is_empty() {
        return Err(DecodeError::Malformed(format!(
            "section size mismatch: {} bytes after the end of a function body",
            body.remaining()
        )));
    }
    Ok(())
}

fn read_data(reader: &mut Reader, visitor: &mut dyn ModuleVisitor) -> Result<(), DecodeError> {
    let (mode, offset) = match reader.read_vu32()? {
        0x00 => (
            DataMode::Active { memory_index: 0 },
            buffer_expression(reader)?,
        ),
        0x01 => (DataMode::Passive, Vec::new()),
        0x02 => {
            let memory_index = reader.read_vu32()?;
            (DataMode::Active { memory_index }, buffer_expression(reader)?)
        }
        flags => {
            return Err(DecodeError::Malformed(format!(
                "malformed data segment kind {flags}"
            )))
        }
    };
    let segment = DataSegment {
        mode,
        init: reader.read_u8vec()?.to_vec(),
    };
    visitor.visit_data(&segment)?;
    if let DataMode::Active { .. } = segment.mode {
        crate::visitor::feed(visitor.visit_data_offset()?, &offset)?;
    }
    Ok(())
}
