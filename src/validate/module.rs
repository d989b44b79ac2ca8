use super::code::CodeValidator;
use super::constant::ConstantExpressionValidator;
use super::context::{IndexSpace, LocalScope, Locals};
use crate::error::{ErrorKind, ValidationError};
use crate::types::{FuncTypeDecl, FunctionType, GlobalDecl, GlobalType, Limits, TableDecl, TableType, ValueType};
use crate::visitor::{
    DataMode, DataSegment, ElementInit, ElementMode, ElementSegment, Export, ExprChain, ExprResult,
    ExprVisitor, Import, ImportDesc, LocalDecl, ModuleVisitor, VisitResult, EXPORT_FUNC,
    EXPORT_GLOBAL, EXPORT_MEMORY, EXPORT_TABLE,
};
use log::debug;
use std::collections::HashSet;

/// Position in the module's section order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    Header,
    Type,
    Import,
    Function,
    Table,
    Memory,
    Global,
    Export,
    Start,
    Element,
    DataCount,
    Code,
    Data,
    End,
}

/// The last element segment seen, for its offset and item expressions.
#[derive(Debug, Clone, Copy)]
struct OpenElement {
    ref_type: ValueType,
    offset_pending: bool,
    expressions: bool,
}

/// Validates module-level events as they stream, then forwards each one
/// unchanged to the chained consumers, in order.
///
/// Initializers, offsets and function bodies are checked by a nested
/// [`CodeValidator`] (behind a [`ConstantExpressionValidator`] where a
/// constant is required), and the chained consumers' expression visitors
/// receive the same instructions once the checker accepts them.
pub struct ModuleValidator<'v> {
    context: IndexSpace,
    refs: HashSet<u32>,
    delegates: Vec<&'v mut dyn ModuleVisitor>,
    section: Section,
    export_names: HashSet<String>,
    start_seen: bool,
    bodies_seen: u32,
    data_seen: u32,
    element: Option<OpenElement>,
    data_offset_pending: bool,
}

impl Default for ModuleValidator<'_> {
    fn default() -> Self {
        ModuleValidator::new()
    }
}

impl<'v> ModuleValidator<'v> {
    pub fn new() -> ModuleValidator<'v> {
        ModuleValidator {
            context: IndexSpace::new(),
            refs: HashSet::new(),
            delegates: Vec::new(),
            section: Section::Header,
            export_names: HashSet::new(),
            start_seen: false,
            bodies_seen: 0,
            data_seen: 0,
            element: None,
            data_offset_pending: false,
        }
    }

    /// Forward every event, after validation, to `delegate` as well.
    pub fn chain(mut self, delegate: &'v mut dyn ModuleVisitor) -> ModuleValidator<'v> {
        self.delegates.push(delegate);
        self
    }

    /// The index spaces accumulated so far.
    pub fn context(&self) -> &IndexSpace {
        &self.context
    }

    pub fn into_context(self) -> IndexSpace {
        self.context
    }

    pub fn is_ended(&self) -> bool {
        self.section == Section::End
    }

    fn advance(&mut self, section: Section) -> VisitResult {
        if self.section == Section::End {
            return Err(ValidationError::new(
                ErrorKind::UnexpectedEvent,
                format!("{section:?} event after the end of the module"),
            ));
        }
        if section < self.section {
            return Err(ValidationError::new(
                ErrorKind::UnexpectedEvent,
                format!("{section:?} event after {:?} event", self.section),
            ));
        }
        self.section = section;
        Ok(())
    }

    fn forward(&mut self, mut event: impl FnMut(&mut dyn ModuleVisitor) -> VisitResult) -> VisitResult {
        for delegate in self.delegates.iter_mut() {
            event(&mut **delegate)?;
        }
        Ok(())
    }

    fn add_memory(&mut self, limits: &Limits) -> VisitResult {
        limits.check_memory()?;
        if self.context.memory_count() > 0 {
            return Err(ValidationError::new(
                ErrorKind::MultipleMemories,
                "multiple memories are not supported",
            ));
        }
        self.context.add_memory(*limits);
        Ok(())
    }

    /// A constant expression checker for `result`, chained with the
    /// delegates' own visitors for the same expression.
    fn constant_expr<'a>(
        &'a mut self,
        result: ValueType,
        open: impl FnMut(&'a mut dyn ModuleVisitor) -> ExprResult<'a>,
    ) -> ExprResult<'a> {
        let head = ConstantExpressionValidator::new(&self.context, &mut self.refs, result);
        chain_exprs(Box::new(head), &mut self.delegates, open)
    }
}

fn chain_exprs<'a, 'v>(
    head: Box<dyn ExprVisitor + 'a>,
    delegates: &'a mut Vec<&'v mut dyn ModuleVisitor>,
    mut open: impl FnMut(&'a mut dyn ModuleVisitor) -> ExprResult<'a>,
) -> ExprResult<'a> {
    let mut next = Vec::new();
    for delegate in delegates.iter_mut() {
        if let Some(visitor) = open(&mut **delegate)? {
            next.push(visitor);
        }
    }
    Ok(Some(Box::new(ExprChain::new(head, next))))
}

impl ModuleVisitor for ModuleValidator<'_> {
    fn visit_header(&mut self, version: u32) -> VisitResult {
        self.advance(Section::Header)?;
        debug!("module version {version}");
        self.forward(|d| d.visit_header(version))
    }

    fn visit_custom(&mut self, name: &str, payload: &[u8]) -> VisitResult {
        if self.is_ended() {
            return self.advance(Section::End);
        }
        debug!("custom section {name:?}, {} bytes", payload.len());
        self.forward(|d| d.visit_custom(name, payload))
    }

    fn visit_type(&mut self, function_type: &FuncTypeDecl) -> VisitResult {
        self.advance(Section::Type)?;
        let checked = FunctionType::decode(function_type)?;
        let index = self.context.add_type(checked);
        debug!("type {index}: {}", self.context.get_type(index)?);
        self.forward(|d| d.visit_type(function_type))
    }

    fn visit_import(&mut self, import: &Import) -> VisitResult {
        self.advance(Section::Import)?;
        debug!("import {}.{}", import.module, import.name);
        match &import.desc {
            ImportDesc::Function(type_index) => {
                self.context.get_type(*type_index)?;
                self.context.import_function(*type_index);
            }
            ImportDesc::Table(table) => {
                let checked = TableType::decode(table)?;
                self.context.add_table(checked);
            }
            ImportDesc::Memory(limits) => self.add_memory(limits)?,
            ImportDesc::Global(global) => {
                let checked = GlobalType::decode(global)?;
                self.context.import_global(checked);
            }
        }
        self.forward(|d| d.visit_import(import))
    }

    fn visit_function(&mut self, type_index: u32) -> VisitResult {
        self.advance(Section::Function)?;
        self.context.get_type(type_index)?;
        self.context.add_function(type_index);
        self.forward(|d| d.visit_function(type_index))
    }

    fn visit_table(&mut self, table: &TableDecl) -> VisitResult {
        self.advance(Section::Table)?;
        let checked = TableType::decode(table)?;
        debug!("table {}: {checked}", self.context.table_count());
        self.context.add_table(checked);
        self.forward(|d| d.visit_table(table))
    }

    fn visit_memory(&mut self, limits: &Limits) -> VisitResult {
        self.advance(Section::Memory)?;
        self.add_memory(limits)?;
        debug!("memory: {limits}");
        self.forward(|d| d.visit_memory(limits))
    }

    fn visit_global<'a>(&'a mut self, global: &GlobalDecl) -> ExprResult<'a> {
        self.advance(Section::Global)?;
        let checked = GlobalType::decode(global)?;
        let index = self.context.add_global(checked);
        debug!("global {index}: {checked}");
        self.constant_expr(checked.value_type, |d| d.visit_global(global))
    }

    fn visit_export(&mut self, export: &Export) -> VisitResult {
        self.advance(Section::Export)?;
        if !self.export_names.insert(export.name.clone()) {
            return Err(ValidationError::new(
                ErrorKind::DuplicateExportName,
                format!("duplicate export name {:?}", export.name),
            ));
        }
        match export.kind {
            EXPORT_FUNC => {
                self.context.get_function(export.index)?;
                self.refs.insert(export.index);
            }
            EXPORT_TABLE => {
                self.context.get_table(export.index)?;
            }
            EXPORT_MEMORY => {
                self.context.get_memory(export.index)?;
            }
            EXPORT_GLOBAL => {
                self.context.get_global(export.index)?;
            }
            other => {
                return Err(ValidationError::new(
                    ErrorKind::MalformedExportKind,
                    format!("export {:?} has malformed kind 0x{other:02x}", export.name),
                ))
            }
        }
        self.forward(|d| d.visit_export(export))
    }

    fn visit_start(&mut self, func_index: u32) -> VisitResult {
        if self.start_seen {
            return Err(ValidationError::new(
                ErrorKind::MultipleStartSections,
                "multiple start sections",
            ));
        }
        self.advance(Section::Start)?;
        self.start_seen = true;
        let ftype = self.context.get_function(func_index)?;
        if !ftype.is_empty() {
            return Err(ValidationError::new(
                ErrorKind::StartFunction,
                format!("start function {func_index} does not have type [] -> [], found {ftype}"),
            ));
        }
        self.forward(|d| d.visit_start(func_index))
    }

    fn visit_element(&mut self, segment: &ElementSegment) -> VisitResult {
        self.advance(Section::Element)?;
        let ref_type = ValueType::decode_ref(segment.ref_type)?;
        if let ElementMode::Active { table_index } = segment.mode {
            let table = self.context.get_table(table_index)?;
            if table.ref_type != ref_type {
                return Err(ValidationError::type_mismatch(format!(
                    "element and table types don't match: {ref_type} and {}",
                    table.ref_type
                )));
            }
        }
        if let ElementInit::Functions(indices) = &segment.init {
            if ref_type != ValueType::FuncRef {
                return Err(ValidationError::type_mismatch(format!(
                    "function indices make funcref elements, not {ref_type}"
                )));
            }
            for index in indices {
                self.context.get_function(*index)?;
                self.refs.insert(*index);
            }
        }
        let index = self.context.add_element(ref_type);
        debug!("element segment {index}: {ref_type} {:?}", segment.mode);
        self.element = Some(OpenElement {
            ref_type,
            offset_pending: matches!(segment.mode, ElementMode::Active { .. }),
            expressions: segment.init == ElementInit::Expressions,
        });
        self.forward(|d| d.visit_element(segment))
    }

    fn visit_element_offset<'a>(&'a mut self) -> ExprResult<'a> {
        self.advance(Section::Element)?;
        match &mut self.element {
            Some(element) if element.offset_pending => element.offset_pending = false,
            _ => {
                return Err(ValidationError::new(
                    ErrorKind::UnexpectedEvent,
                    "element offset without an active element segment",
                ))
            }
        }
        self.constant_expr(ValueType::I32, |d| d.visit_element_offset())
    }

    fn visit_element_item<'a>(&'a mut self) -> ExprResult<'a> {
        self.advance(Section::Element)?;
        let ref_type = match self.element {
            Some(element) if element.expressions => element.ref_type,
            _ => {
                return Err(ValidationError::new(
                    ErrorKind::UnexpectedEvent,
                    "element item without an expression-initialized element segment",
                ))
            }
        };
        self.constant_expr(ref_type, |d| d.visit_element_item())
    }

    fn visit_data_count(&mut self, count: u32) -> VisitResult {
        if self.context.data_count().is_some() {
            return Err(ValidationError::new(
                ErrorKind::UnexpectedEvent,
                "multiple data count sections",
            ));
        }
        self.advance(Section::DataCount)?;
        self.context.set_data_count(count);
        self.forward(|d| d.visit_data_count(count))
    }

    fn visit_code<'a>(&'a mut self, locals: &[LocalDecl]) -> ExprResult<'a> {
        self.advance(Section::Code)?;
        let index = self.context.imported_function_count() + self.bodies_seen;
        if self.bodies_seen >= self.context.defined_function_count() {
            return Err(ValidationError::new(
                ErrorKind::FunctionCodeMismatch,
                format!(
                    "function body {} has no matching function declaration",
                    self.bodies_seen
                ),
            ));
        }
        self.bodies_seen += 1;

        let context = &self.context;
        let ftype = context.get_function(index)?;
        let mut all_locals: Locals = ftype.parameters.iter().copied().collect();
        for local in locals {
            all_locals.push(local.count, ValueType::decode(local.value_type)?)?;
        }
        debug!("function {index} {ftype}, {} locals", all_locals.len());

        let scope = LocalScope::function(context, ftype, all_locals, &self.refs);
        let head = CodeValidator::new(scope, ftype.return_types.clone());
        chain_exprs(Box::new(head), &mut self.delegates, |d| d.visit_code(locals))
    }

    fn visit_data(&mut self, segment: &DataSegment) -> VisitResult {
        self.advance(Section::Data)?;
        if let DataMode::Active { memory_index } = segment.mode {
            self.context.get_memory(memory_index)?;
        }
        debug!(
            "data segment {}: {} bytes {:?}",
            self.data_seen,
            segment.init.len(),
            segment.mode
        );
        self.data_seen += 1;
        self.data_offset_pending = matches!(segment.mode, DataMode::Active { .. });
        self.forward(|d| d.visit_data(segment))
    }

    fn visit_data_offset<'a>(&'a mut self) -> ExprResult<'a> {
        self.advance(Section::Data)?;
        if !self.data_offset_pending {
            return Err(ValidationError::new(
                ErrorKind::UnexpectedEvent,
                "data offset without an active data segment",
            ));
        }
        self.data_offset_pending = false;
        self.constant_expr(ValueType::I32, |d| d.visit_data_offset())
    }

    fn visit_end(&mut self) -> VisitResult {
        self.advance(Section::End)?;
        let functions = self.context.defined_function_count();
        if self.bodies_seen != functions {
            return Err(ValidationError::new(
                ErrorKind::FunctionCodeMismatch,
                format!(
                    "function count ({functions}) does not match code count ({})",
                    self.bodies_seen
                ),
            ));
        }
        if let Some(count) = self.context.data_count() {
            if count != self.data_seen {
                return Err(ValidationError::new(
                    ErrorKind::DataCountMismatch,
                    format!(
                        "data count mismatch: declared {count}, found {} data segments",
                        self.data_seen
                    ),
                ));
            }
        }
        debug!(
            "module valid: {} functions, {} globals",
            self.context.function_count(),
            self.context.global_count()
        );
        self.forward(|d| d.visit_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction::{self, *};
    use crate::types::{TYPE_EXTERNREF, TYPE_FUNCREF, TYPE_I32};
    use crate::visitor::feed;

    fn func_type(params: &[ValueType], results: &[ValueType]) -> FuncTypeDecl {
        FuncTypeDecl::new(params, results)
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        instructions: Vec<Instruction>,
    }

    impl ModuleVisitor for Recorder {
        fn visit_type(&mut self, _: &FuncTypeDecl) -> VisitResult {
            self.events.push("type".into());
            Ok(())
        }

        fn visit_function(&mut self, type_index: u32) -> VisitResult {
            self.events.push(format!("function {type_index}"));
            Ok(())
        }

        fn visit_code<'a>(&'a mut self, _: &[LocalDecl]) -> ExprResult<'a> {
            self.events.push("code".into());
            Ok(Some(Box::new(crate::visitor::InstructionCollector::new(
                &mut self.instructions,
            ))))
        }

        fn visit_end(&mut self) -> VisitResult {
            self.events.push("end".into());
            Ok(())
        }
    }

    #[test]
    fn forwards_after_validating() {
        let mut recorder = Recorder::default();
        {
            let mut v = ModuleValidator::new().chain(&mut recorder);
            v.visit_type(&func_type(&[], &[])).unwrap();
            v.visit_function(0).unwrap();
            assert!(v.visit_function(1).is_err());
            feed(v.visit_code(&[]).unwrap(), &[Nop, End]).unwrap();
            v.visit_end().unwrap();
        }
        assert_eq!(recorder.events, vec!["type", "function 0", "code", "end"]);
        assert_eq!(recorder.instructions, vec![Nop, End]);
    }

    #[test]
    fn rejected_instructions_are_not_forwarded() {
        let mut recorder = Recorder::default();
        {
            let mut v = ModuleValidator::new().chain(&mut recorder);
            v.visit_type(&func_type(&[], &[])).unwrap();
            v.visit_function(0).unwrap();
            let err = feed(v.visit_code(&[]).unwrap(), &[Nop, I32Add, End]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        }
        assert_eq!(recorder.instructions, vec![Nop]);
    }

    #[test]
    fn start_function() {
        let mut v = ModuleValidator::new();
        v.visit_type(&func_type(&[ValueType::I32], &[])).unwrap();
        v.visit_function(0).unwrap();
        assert_eq!(v.visit_start(0).unwrap_err().kind(), ErrorKind::StartFunction);
        assert_eq!(
            v.visit_start(0).unwrap_err().kind(),
            ErrorKind::MultipleStartSections
        );
    }

    #[test]
    fn exports() {
        let mut v = ModuleValidator::new();
        v.visit_memory(&Limits::new(1, None)).unwrap();
        let export = |name: &str, kind, index| Export {
            name: name.to_string(),
            kind,
            index,
        };
        v.visit_export(&export("mem", EXPORT_MEMORY, 0)).unwrap();
        assert_eq!(
            v.visit_export(&export("mem", EXPORT_MEMORY, 0)).unwrap_err().kind(),
            ErrorKind::DuplicateExportName
        );
        assert_eq!(
            v.visit_export(&export("f", EXPORT_FUNC, 0)).unwrap_err().kind(),
            ErrorKind::UnknownFunction
        );
        assert_eq!(
            v.visit_export(&export("x", 0x04, 0)).unwrap_err().kind(),
            ErrorKind::MalformedExportKind
        );
    }

    #[test]
    fn single_memory() {
        let mut v = ModuleValidator::new();
        v.visit_import(&Import {
            module: "env".into(),
            name: "memory".into(),
            desc: ImportDesc::Memory(Limits::new(1, None)),
        })
        .unwrap();
        assert_eq!(
            v.visit_memory(&Limits::new(1, None)).unwrap_err().kind(),
            ErrorKind::MultipleMemories
        );
    }

    #[test]
    fn limits_are_checked() {
        let mut v = ModuleValidator::new();
        let err = v
            .visit_table(&TableDecl {
                elem_type: TYPE_I32,
                limits: Limits::new(0, None),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedReferenceType);
        let err = v.visit_memory(&Limits::new(2, Some(1))).unwrap_err();
        assert!(err.message().starts_with("limit out of range"));
    }

    #[test]
    fn section_order() {
        let mut v = ModuleValidator::new();
        v.visit_memory(&Limits::new(1, None)).unwrap();
        let err = v.visit_type(&func_type(&[], &[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEvent);
        v.visit_end().unwrap();
        assert_eq!(v.visit_custom("name", &[]).unwrap_err().kind(), ErrorKind::UnexpectedEvent);
        assert_eq!(v.visit_end().unwrap_err().kind(), ErrorKind::UnexpectedEvent);
    }

    #[test]
    fn function_and_code_counts() {
        let mut v = ModuleValidator::new();
        v.visit_type(&func_type(&[], &[])).unwrap();
        v.visit_function(0).unwrap();
        let err = v.visit_end().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FunctionCodeMismatch);
        assert_eq!(err.message(), "function count (1) does not match code count (0)");

        let mut v = ModuleValidator::new();
        assert_eq!(
            v.visit_code(&[]).err().map(|e| e.kind()),
            Some(ErrorKind::FunctionCodeMismatch)
        );
    }

    #[test]
    fn data_count() {
        let mut v = ModuleValidator::new();
        v.visit_data_count(2).unwrap();
        v.visit_data(&DataSegment {
            mode: DataMode::Passive,
            init: vec![1, 2, 3],
        })
        .unwrap();
        assert_eq!(v.visit_end().unwrap_err().kind(), ErrorKind::DataCountMismatch);
    }

    #[test]
    fn data_count_only_once() {
        let mut v = ModuleValidator::new();
        v.visit_data_count(1).unwrap();
        let err = v.visit_data_count(2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEvent);
        assert_eq!(err.message(), "multiple data count sections");
        assert_eq!(v.context().data_count(), Some(1));
    }

    #[test]
    fn data_needs_memory() {
        let mut v = ModuleValidator::new();
        let err = v
            .visit_data(&DataSegment {
                mode: DataMode::Active { memory_index: 0 },
                init: vec![],
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownMemory);
        assert_eq!(
            v.visit_data_offset().err().map(|e| e.kind()),
            Some(ErrorKind::UnexpectedEvent)
        );
    }

    #[test]
    fn elements() {
        let mut v = ModuleValidator::new();
        v.visit_type(&func_type(&[], &[])).unwrap();
        v.visit_function(0).unwrap();
        v.visit_table(&TableDecl {
            elem_type: TYPE_EXTERNREF,
            limits: Limits::new(1, None),
        })
        .unwrap();
        let err = v
            .visit_element(&ElementSegment {
                ref_type: TYPE_FUNCREF,
                mode: ElementMode::Active { table_index: 0 },
                init: ElementInit::Functions(vec![0]),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);

        v.visit_element(&ElementSegment {
            ref_type: TYPE_FUNCREF,
            mode: ElementMode::Declarative,
            init: ElementInit::Expressions,
        })
        .unwrap();
        assert!(v.visit_element_offset().is_err());
        feed(v.visit_element_item().unwrap(), &[RefFunc { func_idx: 0 }, End]).unwrap();
        let err = feed(
            v.visit_element_item().unwrap(),
            &[RefNull { ref_type: TYPE_EXTERNREF }, End],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(v.context().element_count(), 1);
    }

    #[test]
    fn declared_function_references() {
        let body = [RefFunc { func_idx: 0 }, Drop, End];

        let mut v = ModuleValidator::new();
        v.visit_type(&func_type(&[], &[])).unwrap();
        v.visit_function(0).unwrap();
        let err = feed(v.visit_code(&[]).unwrap(), &body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndeclaredFunctionReference);

        let mut v = ModuleValidator::new();
        v.visit_type(&func_type(&[], &[])).unwrap();
        v.visit_function(0).unwrap();
        v.visit_export(&Export {
            name: "f".into(),
            kind: EXPORT_FUNC,
            index: 0,
        })
        .unwrap();
        feed(v.visit_code(&[]).unwrap(), &body).unwrap();
        v.visit_end().unwrap();
    }

    #[test]
    fn locals() {
        let mut v = ModuleValidator::new();
        v.visit_type(&func_type(&[ValueType::I32], &[ValueType::I64])).unwrap();
        v.visit_function(0).unwrap();
        v.visit_function(0).unwrap();
        let locals = [LocalDecl {
            count: 2,
            value_type: 0x7e,
        }];
        feed(
            v.visit_code(&locals).unwrap(),
            &[LocalGet { local_idx: 2 }, End],
        )
        .unwrap();
        let err = v
            .visit_code(&[LocalDecl {
                count: u32::MAX,
                value_type: 0x7e,
            }])
            .err()
            .map(|e| e.kind());
        assert_eq!(err, Some(ErrorKind::TooManyLocals));
    }

    #[test]
    fn large_local_counts() {
        let mut v = ModuleValidator::new();
        v.visit_type(&func_type(&[], &[ValueType::I32])).unwrap();
        v.visit_function(0).unwrap();
        v.visit_function(0).unwrap();
        let locals = [LocalDecl {
            count: 50_001,
            value_type: 0x7f,
        }];
        feed(
            v.visit_code(&locals).unwrap(),
            &[LocalGet { local_idx: 50_000 }, End],
        )
        .unwrap();

        // two runs whose sum passes the u32 index range
        let locals = [
            LocalDecl {
                count: u32::MAX / 2 + 1,
                value_type: 0x7f,
            },
            LocalDecl {
                count: u32::MAX / 2 + 1,
                value_type: 0x7e,
            },
        ];
        let err = v.visit_code(&locals).err().map(|e| e.kind());
        assert_eq!(err, Some(ErrorKind::TooManyLocals));
    }

    #[test]
    fn invalid_local_type() {
        let mut v = ModuleValidator::new();
        v.visit_type(&func_type(&[], &[])).unwrap();
        v.visit_function(0).unwrap();
        let err = v
            .visit_code(&[LocalDecl {
                count: 1,
                value_type: 0x40,
            }])
            .err()
            .map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("invalid value type 0x40"));
    }
}
