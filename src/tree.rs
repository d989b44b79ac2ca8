//! An in-memory module tree, built from the event stream and replayable as one.
//!
//! [`TreeBuilder`] is an ordinary [`ModuleVisitor`]. Chained behind a
//! [`ModuleValidator`](crate::validate::ModuleValidator) it only ever sees
//! events the validator accepted, so a finished tree is a validated module.
//! [`ModuleTree::accept`] drives any visitor with the same events again.

use crate::instruction::Instruction;
use crate::types::{tag_name, FuncTypeDecl, GlobalDecl, Limits, TableDecl, MUT_VAR};
use crate::visitor::{
    feed, DataMode, DataSegment, ElementMode, ElementSegment, Export, ExprResult, ExprVisitor,
    Import, ImportDesc, InstructionCollector, LocalDecl, ModuleVisitor, VisitResult, EXPORT_FUNC,
    EXPORT_GLOBAL, EXPORT_MEMORY, EXPORT_TABLE,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub decl: GlobalDecl,
    pub init: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub segment: ElementSegment,
    pub offset: Vec<Instruction>,
    pub items: Vec<Vec<Instruction>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub locals: Vec<LocalDecl>,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub segment: DataSegment,
    pub offset: Vec<Instruction>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleTree {
    pub version: u32,
    pub customs: Vec<(String, Vec<u8>)>,
    pub types: Vec<FuncTypeDecl>,
    pub imports: Vec<Import>,
    pub functions: Vec<u32>,
    pub tables: Vec<TableDecl>,
    pub memories: Vec<Limits>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<Element>,
    pub data_count: Option<u32>,
    pub code: Vec<Body>,
    pub data: Vec<Data>,
}

impl ModuleTree {
    /// Replay the tree as events, in section order.
    pub fn accept(&self, visitor: &mut dyn ModuleVisitor) -> VisitResult {
        visitor.visit_header(self.version)?;
        for (name, payload) in &self.customs {
            visitor.visit_custom(name, payload)?;
        }
        for function_type in &self.types {
            visitor.visit_type(function_type)?;
        }
        for import in &self.imports {
            visitor.visit_import(import)?;
        }
        for type_index in &self.functions {
            visitor.visit_function(*type_index)?;
        }
        for table in &self.tables {
            visitor.visit_table(table)?;
        }
        for memory in &self.memories {
            visitor.visit_memory(memory)?;
        }
        for global in &self.globals {
            feed(visitor.visit_global(&global.decl)?, &global.init)?;
        }
        for export in &self.exports {
            visitor.visit_export(export)?;
        }
        if let Some(start) = self.start {
            visitor.visit_start(start)?;
        }
        for element in &self.elements {
            visitor.visit_element(&element.segment)?;
            if let ElementMode::Active { .. } = element.segment.mode {
                feed(visitor.visit_element_offset()?, &element.offset)?;
            }
            for item in &element.items {
                feed(visitor.visit_element_item()?, item)?;
            }
        }
        if let Some(count) = self.data_count {
            visitor.visit_data_count(count)?;
        }
        for body in &self.code {
            feed(visitor.visit_code(&body.locals)?, &body.instructions)?;
        }
        for data in &self.data {
            visitor.visit_data(&data.segment)?;
            if let DataMode::Active { .. } = data.segment.mode {
                feed(visitor.visit_data_offset()?, &data.offset)?;
            }
        }
        visitor.visit_end()
    }

    pub fn summary(&self) -> TreeSummary {
        let imported_functions = self
            .imports
            .iter()
            .filter(|i| matches!(i.desc, ImportDesc::Function(_)))
            .count();
        TreeSummary {
            version: self.version,
            types: self.types.iter().map(signature).collect(),
            imports: self
                .imports
                .iter()
                .map(|i| format!("{}.{} {}", i.module, i.name, describe_import(&i.desc)))
                .collect(),
            functions: self
                .functions
                .iter()
                .enumerate()
                .map(|(i, type_index)| FunctionSummary {
                    index: (imported_functions + i) as u32,
                    type_index: *type_index,
                    instructions: self.code.get(i).map_or(0, |b| b.instructions.len()),
                })
                .collect(),
            tables: self
                .tables
                .iter()
                .map(|t| format!("{} {}", tag_name(t.elem_type), t.limits))
                .collect(),
            memories: self.memories.iter().map(ToString::to_string).collect(),
            globals: self.globals.iter().map(|g| describe_global(&g.decl)).collect(),
            exports: self
                .exports
                .iter()
                .map(|e| ExportSummary {
                    name: e.name.clone(),
                    kind: export_kind(e.kind),
                    index: e.index,
                })
                .collect(),
            start: self.start,
            elements: self.elements.len(),
            data: self.data.len(),
            customs: self.customs.iter().map(|(name, _)| name.clone()).collect(),
        }
    }
}

fn signature(decl: &FuncTypeDecl) -> String {
    let names = |tags: &[u8]| tags.iter().map(|t| tag_name(*t)).collect::<Vec<_>>().join(" ");
    format!("[{}] -> [{}]", names(&decl.parameters), names(&decl.return_types))
}

fn describe_global(decl: &GlobalDecl) -> String {
    let mutability = if decl.mutability == MUT_VAR { "var" } else { "const" };
    format!("{mutability} {}", tag_name(decl.value_type))
}

fn describe_import(desc: &ImportDesc) -> String {
    match desc {
        ImportDesc::Function(type_index) => format!("func (type {type_index})"),
        ImportDesc::Table(table) => format!("table {} {}", tag_name(table.elem_type), table.limits),
        ImportDesc::Memory(limits) => format!("memory {limits}"),
        ImportDesc::Global(global) => format!("global {}", describe_global(global)),
    }
}

fn export_kind(kind: u8) -> &'static str {
    match kind {
        EXPORT_FUNC => "func",
        EXPORT_TABLE => "table",
        EXPORT_MEMORY => "memory",
        EXPORT_GLOBAL => "global",
        _ => "unknown",
    }
}

/// A printable overview of a module tree.
#[derive(Debug, Serialize)]
pub struct TreeSummary {
    pub version: u32,
    pub types: Vec<String>,
    pub imports: Vec<String>,
    pub functions: Vec<FunctionSummary>,
    pub tables: Vec<String>,
    pub memories: Vec<String>,
    pub globals: Vec<String>,
    pub exports: Vec<ExportSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u32>,
    pub elements: usize,
    pub data: usize,
    pub customs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct FunctionSummary {
    pub index: u32,
    pub type_index: u32,
    pub instructions: usize,
}

#[derive(Debug, Serialize)]
pub struct ExportSummary {
    pub name: String,
    pub kind: &'static str,
    pub index: u32,
}

/// Builds a [`ModuleTree`] from the events it receives.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    tree: ModuleTree,
}

impl TreeBuilder {
    pub fn new() -> TreeBuilder {
        TreeBuilder::default()
    }

    pub fn tree(&self) -> &ModuleTree {
        &self.tree
    }

    pub fn into_tree(self) -> ModuleTree {
        self.tree
    }
}

fn collect<'a>(instructions: Option<&'a mut Vec<Instruction>>) -> ExprResult<'a> {
    Ok(instructions.map(|i| Box::new(InstructionCollector::new(i)) as Box<dyn ExprVisitor + 'a>))
}

impl ModuleVisitor for TreeBuilder {
    fn visit_header(&mut self, version: u32) -> VisitResult {
        self.tree.version = version;
        Ok(())
    }

    fn visit_custom(&mut self, name: &str, payload: &[u8]) -> VisitResult {
        self.tree.customs.push((name.to_string(), payload.to_vec()));
        Ok(())
    }

    fn visit_type(&mut self, function_type: &FuncTypeDecl) -> VisitResult {
        self.tree.types.push(function_type.clone());
        Ok(())
    }

    fn visit_import(&mut self, import: &Import) -> VisitResult {
        self.tree.imports.push(import.clone());
        Ok(())
    }

    fn visit_function(&mut self, type_index: u32) -> VisitResult {
        self.tree.functions.push(type_index);
        Ok(())
    }

    fn visit_table(&mut self, table: &TableDecl) -> VisitResult {
        self.tree.tables.push(*table);
        Ok(())
    }

    fn visit_memory(&mut self, limits: &Limits) -> VisitResult {
        self.tree.memories.push(*limits);
        Ok(())
    }

    fn visit_global<'a>(&'a mut self, global: &GlobalDecl) -> ExprResult<'a> {
        self.tree.globals.push(Global {
            decl: *global,
            init: Vec::new(),
        });
        collect(self.tree.globals.last_mut().map(|g| &mut g.init))
    }

    fn visit_export(&mut self, export: &Export) -> VisitResult {
        self.tree.exports.push(export.clone());
        Ok(())
    }

    fn visit_start(&mut self, func_index: u32) -> VisitResult {
        self.tree.start = Some(func_index);
        Ok(())
    }

    fn visit_element(&mut self, segment: &ElementSegment) -> VisitResult {
        self.tree.elements.push(Element {
            segment: segment.clone(),
            offset: Vec::new(),
            items: Vec::new(),
        });
        Ok(())
    }

    fn visit_element_offset<'a>(&'a mut self) -> ExprResult<'a> {
        collect(self.tree.elements.last_mut().map(|e| &mut e.offset))
    }

    fn visit_element_item<'a>(&'a mut self) -> ExprResult<'a> {
        collect(self.tree.elements.last_mut().and_then(|e| {
            e.items.push(Vec::new());
            e.items.last_mut()
        }))
    }

    fn visit_data_count(&mut self, count: u32) -> VisitResult {
        self.tree.data_count = Some(count);
        Ok(())
    }

    fn visit_code<'a>(&'a mut self, locals: &[LocalDecl]) -> ExprResult<'a> {
        self.tree.code.push(Body {
            locals: locals.to_vec(),
            instructions: Vec::new(),
        });
        collect(self.tree.code.last_mut().map(|b| &mut b.instructions))
    }

    fn visit_data(&mut self, segment: &DataSegment) -> VisitResult {
        self.tree.data.push(Data {
            segment: segment.clone(),
            offset: Vec::new(),
        });
        Ok(())
    }

    fn visit_data_offset<'a>(&'a mut self) -> ExprResult<'a> {
        collect(self.tree.data.last_mut().map(|d| &mut d.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction::*;
    use crate::types::ValueType;
    use crate::visitor::ElementInit;

    fn sample() -> ModuleTree {
        ModuleTree {
            version: 1,
            types: vec![FuncTypeDecl::new(&[ValueType::I32], &[ValueType::I32])],
            functions: vec![0],
            tables: vec![TableDecl {
                elem_type: 0x70,
                limits: Limits::new(1, None),
            }],
            memories: vec![Limits::new(1, Some(2))],
            globals: vec![Global {
                decl: GlobalDecl::new(ValueType::I32, true),
                init: vec![I32Const { value: 7 }, End],
            }],
            exports: vec![Export {
                name: "id".into(),
                kind: EXPORT_FUNC,
                index: 0,
            }],
            elements: vec![Element {
                segment: ElementSegment {
                    ref_type: 0x70,
                    mode: ElementMode::Active { table_index: 0 },
                    init: ElementInit::Expressions,
                },
                offset: vec![I32Const { value: 0 }, End],
                items: vec![vec![RefFunc { func_idx: 0 }, End]],
            }],
            code: vec![Body {
                locals: vec![],
                instructions: vec![LocalGet { local_idx: 0 }, End],
            }],
            data: vec![Data {
                segment: DataSegment {
                    mode: DataMode::Active { memory_index: 0 },
                    init: b"hi".to_vec(),
                },
                offset: vec![I32Const { value: 16 }, End],
            }],
            ..ModuleTree::default()
        }
    }

    #[test]
    fn replay_rebuilds_the_same_tree() {
        let tree = sample();
        let mut builder = TreeBuilder::new();
        tree.accept(&mut builder).unwrap();
        assert_eq!(builder.into_tree(), tree);
    }

    #[test]
    fn summary() {
        let summary = sample().summary();
        assert_eq!(summary.types, vec!["[i32] -> [i32]"]);
        assert_eq!(summary.globals, vec!["var i32"]);
        assert_eq!(summary.tables, vec!["funcref min = 1"]);
        assert_eq!(summary.functions[0].instructions, 2);
        assert_eq!(summary.exports[0].kind, "func");
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["memories"][0], "min = 1, max = 2");
        assert!(json.get("start").is_none());
    }
}
