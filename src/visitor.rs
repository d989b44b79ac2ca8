//! The structural and instruction event protocol.
//!
//! Producers (the binary [`parser`](crate::parser), a text parser, a replayed
//! [`ModuleTree`](crate::tree::ModuleTree)) drive a [`ModuleVisitor`] with one
//! call per section entry, in section order:
//!
//! ```text
//! header custom* type* import* function* table* memory* global* export*
//! start? element* data_count? code* data* end
//! ```
//!
//! Entries that carry an expression hand back an optional nested
//! [`ExprVisitor`], which then receives that expression's instructions
//! (ending with its terminating `end`) followed by [`ExprVisitor::visit_end`].
//! The nested visitor borrows its parent, so no structural event can be
//! delivered while an expression is open.
//!
//! Every method has a no-op default: a consumer only overrides the events it
//! cares about, and returning `Ok(None)` declines an expression.

use crate::error::ValidationError;
use crate::instruction::Instruction;
use crate::types::{FuncTypeDecl, GlobalDecl, Limits, TableDecl};

pub type VisitResult = Result<(), ValidationError>;

/// The consumer for one nested expression, if the visitor wants it.
pub type ExprResult<'a> = Result<Option<Box<dyn ExprVisitor + 'a>>, ValidationError>;

pub const EXPORT_FUNC: u8 = 0x00;
pub const EXPORT_TABLE: u8 = 0x01;
pub const EXPORT_MEMORY: u8 = 0x02;
pub const EXPORT_GLOBAL: u8 = 0x03;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDesc {
    Function(u32), // typeidx
    Table(TableDecl),
    Memory(Limits),
    Global(GlobalDecl),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    /// Raw export kind tag, see `EXPORT_*`
    pub kind: u8,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementMode {
    Passive,
    Declarative,
    Active { table_index: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementInit {
    /// Function indices, the `elemkind` form
    Functions(Vec<u32>),
    /// One expression per item, delivered through `visit_element_item`
    Expressions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSegment {
    /// Raw reference type tag
    pub ref_type: u8,
    pub mode: ElementMode,
    pub init: ElementInit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    Passive,
    Active { memory_index: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub mode: DataMode,
    pub init: Vec<u8>,
}

/// A run of `count` locals of one raw type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDecl {
    pub count: u32,
    pub value_type: u8,
}

pub trait ModuleVisitor {
    fn visit_header(&mut self, _version: u32) -> VisitResult {
        Ok(())
    }

    fn visit_custom(&mut self, _name: &str, _payload: &[u8]) -> VisitResult {
        Ok(())
    }

    fn visit_type(&mut self, _function_type: &FuncTypeDecl) -> VisitResult {
        Ok(())
    }

    fn visit_import(&mut self, _import: &Import) -> VisitResult {
        Ok(())
    }

    /// A module-defined function and its type index.
    fn visit_function(&mut self, _type_index: u32) -> VisitResult {
        Ok(())
    }

    fn visit_table(&mut self, _table: &TableDecl) -> VisitResult {
        Ok(())
    }

    fn visit_memory(&mut self, _limits: &Limits) -> VisitResult {
        Ok(())
    }

    /// A global; its initializer expression follows.
    fn visit_global<'a>(&'a mut self, _global: &GlobalDecl) -> ExprResult<'a> {
        Ok(None)
    }

    fn visit_export(&mut self, _export: &Export) -> VisitResult {
        Ok(())
    }

    fn visit_start(&mut self, _func_index: u32) -> VisitResult {
        Ok(())
    }

    fn visit_element(&mut self, _segment: &ElementSegment) -> VisitResult {
        Ok(())
    }

    /// Offset expression of the last active element segment.
    fn visit_element_offset<'a>(&'a mut self) -> ExprResult<'a> {
        Ok(None)
    }

    /// One item expression of the last element segment.
    fn visit_element_item<'a>(&'a mut self) -> ExprResult<'a> {
        Ok(None)
    }

    fn visit_data_count(&mut self, _count: u32) -> VisitResult {
        Ok(())
    }

    /// The next function body, in declaration order.
    fn visit_code<'a>(&'a mut self, _locals: &[LocalDecl]) -> ExprResult<'a> {
        Ok(None)
    }

    fn visit_data(&mut self, _segment: &DataSegment) -> VisitResult {
        Ok(())
    }

    /// Offset expression of the last active data segment.
    fn visit_data_offset<'a>(&'a mut self) -> ExprResult<'a> {
        Ok(None)
    }

    fn visit_end(&mut self) -> VisitResult {
        Ok(())
    }
}

pub trait ExprVisitor {
    fn visit_instruction(&mut self, instruction: &Instruction) -> VisitResult;

    /// The expression is complete.
    fn visit_end(&mut self) -> VisitResult {
        Ok(())
    }
}

/// Feed a whole instruction sequence to an optional expression consumer.
pub fn feed<'a>(
    visitor: Option<Box<dyn ExprVisitor + 'a>>,
    instructions: &[Instruction],
) -> VisitResult {
    if let Some(mut visitor) = visitor {
        for instruction in instructions {
            visitor.visit_instruction(instruction)?;
        }
        visitor.visit_end()?;
    }
    Ok(())
}

/// An expression consumer followed by the consumers chained behind it. Each
/// event reaches `head` first and is only forwarded once `head` accepts it.
pub struct ExprChain<'a> {
    head: Box<dyn ExprVisitor + 'a>,
    next: Vec<Box<dyn ExprVisitor + 'a>>,
}

impl<'a> ExprChain<'a> {
    pub fn new(head: Box<dyn ExprVisitor + 'a>, next: Vec<Box<dyn ExprVisitor + 'a>>) -> Self {
        ExprChain { head, next }
    }
}

impl ExprVisitor for ExprChain<'_> {
    fn visit_instruction(&mut self, instruction: &Instruction) -> VisitResult {
        self.head.visit_instruction(instruction)?;
        for visitor in self.next.iter_mut() {
            visitor.visit_instruction(instruction)?;
        }
        Ok(())
    }

    fn visit_end(&mut self) -> VisitResult {
        self.head.visit_end()?;
        for visitor in self.next.iter_mut() {
            visitor.visit_end()?;
        }
        Ok(())
    }
}

/// Collects the instructions of one expression.
pub struct InstructionCollector<'a> {
    instructions: &'a mut Vec<Instruction>,
}

impl<'a> InstructionCollector<'a> {
    pub fn new(instructions: &'a mut Vec<Instruction>) -> Self {
        InstructionCollector { instructions }
    }
}

impl ExprVisitor for InstructionCollector<'_> {
    fn visit_instruction(&mut self, instruction: &Instruction) -> VisitResult {
        self.instructions.push(instruction.clone());
        Ok(())
    }
}
