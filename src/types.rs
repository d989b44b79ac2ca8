//! Value, function, table, memory and global types.
//!
//! Structural events carry raw type tags (`FuncTypeDecl`, `TableDecl`,
//! `GlobalDecl`) exactly as a producer read them; the validator turns them into
//! the checked forms (`FunctionType`, `TableType`, `GlobalType`) when it records
//! them in the index space.

use crate::error::{ErrorKind, ValidationError};
use crate::limits::{MAX_MEMORY_PAGES, MAX_TABLE_SIZE};
use std::fmt;

pub const TYPE_I32: u8 = 0x7f;
pub const TYPE_I64: u8 = 0x7e;
pub const TYPE_F32: u8 = 0x7d;
pub const TYPE_F64: u8 = 0x7c;
pub const TYPE_V128: u8 = 0x7b;
pub const TYPE_FUNCREF: u8 = 0x70;
pub const TYPE_EXTERNREF: u8 = 0x6f;

pub const MUT_CONST: u8 = 0x00;
pub const MUT_VAR: u8 = 0x01;

#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash)]
pub enum ValueType {
    // Number types
    I32,
    I64,
    F32,
    F64,
    // Vector types
    V128,
    // Reference types
    FuncRef,
    ExternRef,
}

impl ValueType {
    pub fn decode(byte: u8) -> Result<Self, ValidationError> {
        match byte {
            TYPE_I32 => Ok(ValueType::I32),
            TYPE_I64 => Ok(ValueType::I64),
            TYPE_F32 => Ok(ValueType::F32),
            TYPE_F64 => Ok(ValueType::F64),
            TYPE_V128 => Ok(ValueType::V128),
            TYPE_FUNCREF => Ok(ValueType::FuncRef),
            TYPE_EXTERNREF => Ok(ValueType::ExternRef),
            _ => Err(ValidationError::new(
                ErrorKind::InvalidValueType,
                format!("invalid value type 0x{byte:02x}"),
            )),
        }
    }

    /// Decode a tag that must name a reference type.
    pub fn decode_ref(byte: u8) -> Result<Self, ValidationError> {
        match byte {
            TYPE_FUNCREF => Ok(ValueType::FuncRef),
            TYPE_EXTERNREF => Ok(ValueType::ExternRef),
            _ => Err(ValidationError::new(
                ErrorKind::MalformedReferenceType,
                format!("0x{byte:02x} is not a reference type"),
            )),
        }
    }

    pub fn decode_all(bytes: &[u8]) -> Result<Vec<Self>, ValidationError> {
        bytes.iter().map(|b| ValueType::decode(*b)).collect()
    }

    pub fn tag(&self) -> u8 {
        match self {
            ValueType::I32 => TYPE_I32,
            ValueType::I64 => TYPE_I64,
            ValueType::F32 => TYPE_F32,
            ValueType::F64 => TYPE_F64,
            ValueType::V128 => TYPE_V128,
            ValueType::FuncRef => TYPE_FUNCREF,
            ValueType::ExternRef => TYPE_EXTERNREF,
        }
    }

    pub fn is_num(&self) -> bool {
        matches!(
            self,
            ValueType::I32 | ValueType::I64 | ValueType::F32 | ValueType::F64
        )
    }

    pub fn is_vec(&self) -> bool {
        *self == ValueType::V128
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, ValueType::FuncRef | ValueType::ExternRef)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ValueType::I32 => "i32",
                ValueType::I64 => "i64",
                ValueType::F32 => "f32",
                ValueType::F64 => "f64",
                ValueType::V128 => "v128",
                ValueType::FuncRef => "funcref",
                ValueType::ExternRef => "externref",
            }
        )
    }
}

/// Display a raw type tag by name when it is legal, in hex otherwise.
pub(crate) fn tag_name(byte: u8) -> String {
    match ValueType::decode(byte) {
        Ok(vt) => vt.to_string(),
        Err(_) => format!("0x{byte:02x}"),
    }
}

fn join<T: fmt::Display>(types: &[T]) -> String {
    types
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<String>>()
        .join(" ")
}

/// A function signature as declared in the type section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncTypeDecl {
    pub parameters: Vec<u8>,
    pub return_types: Vec<u8>,
}

impl FuncTypeDecl {
    pub fn new(parameters: &[ValueType], return_types: &[ValueType]) -> FuncTypeDecl {
        FuncTypeDecl {
            parameters: parameters.iter().map(ValueType::tag).collect(),
            return_types: return_types.iter().map(ValueType::tag).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionType {
    pub parameters: Vec<ValueType>,
    pub return_types: Vec<ValueType>,
}

impl FunctionType {
    pub fn decode(decl: &FuncTypeDecl) -> Result<FunctionType, ValidationError> {
        Ok(FunctionType {
            parameters: ValueType::decode_all(&decl.parameters)?,
            return_types: ValueType::decode_all(&decl.return_types)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.return_types.is_empty()
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{}] -> [{}]",
            join(&self.parameters),
            join(&self.return_types)
        )
    }
}

/// Table or memory size bounds. Kept wide so that out-of-range values from a
/// text producer reach the ceiling checks intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub min: u64,
    pub max: Option<u64>,
}

impl Limits {
    pub fn new(min: u64, max: Option<u64>) -> Limits {
        Limits { min, max }
    }

    /// Check against an absolute `ceiling`, reporting `too_large` when exceeded.
    pub fn check(&self, ceiling: u64, too_large: ErrorKind) -> Result<(), ValidationError> {
        if self.min > ceiling {
            return Err(ValidationError::new(
                too_large,
                format!("limit out of range: minimum {} exceeds {ceiling}", self.min),
            ));
        }
        if let Some(max) = self.max {
            if max > ceiling {
                return Err(ValidationError::new(
                    too_large,
                    format!("limit out of range: maximum {max} exceeds {ceiling}"),
                ));
            }
            if self.min > max {
                return Err(ValidationError::new(
                    ErrorKind::SizeMinimumExceedsMaximum,
                    format!(
                        "limit out of range: minimum {} exceeds maximum {max}",
                        self.min
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn check_memory(&self) -> Result<(), ValidationError> {
        self.check(MAX_MEMORY_PAGES, ErrorKind::MemorySizeTooLarge)
    }

    pub fn check_table(&self) -> Result<(), ValidationError> {
        self.check(MAX_TABLE_SIZE, ErrorKind::TableSizeTooLarge)
    }
}

impl fmt::Display for Limits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "min = {}, max = {max}", self.min),
            None => write!(f, "min = {}", self.min),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDecl {
    pub elem_type: u8,
    pub limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableType {
    pub ref_type: ValueType,
    pub limits: Limits,
}

impl TableType {
    pub fn decode(decl: &TableDecl) -> Result<TableType, ValidationError> {
        decl.limits.check_table()?;
        Ok(TableType {
            ref_type: ValueType::decode_ref(decl.elem_type)?,
            limits: decl.limits,
        })
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.ref_type, self.limits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalDecl {
    pub value_type: u8,
    pub mutability: u8,
}

impl GlobalDecl {
    pub fn new(value_type: ValueType, mutable: bool) -> GlobalDecl {
        GlobalDecl {
            value_type: value_type.tag(),
            mutability: if mutable { MUT_VAR } else { MUT_CONST },
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct GlobalType {
    pub value_type: ValueType,
    pub mutable: bool, // const or var
}

impl GlobalType {
    pub fn decode(decl: &GlobalDecl) -> Result<GlobalType, ValidationError> {
        let value_type = ValueType::decode(decl.value_type)?;
        let mutable = match decl.mutability {
            MUT_CONST => false,
            MUT_VAR => true,
            other => {
                return Err(ValidationError::new(
                    ErrorKind::MalformedMutability,
                    format!("mutability 0x{other:02x} is neither const nor var"),
                ))
            }
        };
        Ok(GlobalType {
            value_type,
            mutable,
        })
    }
}

impl fmt::Display for GlobalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}",
            if self.mutable { "var" } else { "const" },
            self.value_type
        )
    }
}
