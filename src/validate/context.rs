use crate::error::{ErrorKind, ValidationError};
use crate::limits::MAX_FUNCTION_LOCALS;
use crate::types::{FunctionType, GlobalType, Limits, TableType, ValueType};
use std::collections::HashSet;

/// The module's index spaces, appended to as declarations stream past.
///
/// Imports always precede definitions of the same kind, so imported
/// functions and globals occupy the low indices.
#[derive(Debug, Default, Clone)]
pub struct IndexSpace {
    types: Vec<FunctionType>,
    functions: Vec<u32>, // type index of each function
    imported_functions: u32,
    tables: Vec<TableType>,
    memories: Vec<Limits>,
    globals: Vec<GlobalType>,
    imported_globals: u32,
    elements: Vec<ValueType>,
    data_count: Option<u32>,
}

impl IndexSpace {
    pub fn new() -> IndexSpace {
        IndexSpace::default()
    }

    // Insertion ---------------------------------------------------------------

    pub fn add_type(&mut self, function_type: FunctionType) -> u32 {
        self.types.push(function_type);
        (self.types.len() - 1) as u32
    }

    pub fn import_function(&mut self, type_index: u32) -> u32 {
        self.imported_functions += 1;
        self.add_function(type_index)
    }

    pub fn add_function(&mut self, type_index: u32) -> u32 {
        self.functions.push(type_index);
        (self.functions.len() - 1) as u32
    }

    pub fn add_table(&mut self, table: TableType) -> u32 {
        self.tables.push(table);
        (self.tables.len() - 1) as u32
    }

    pub fn add_memory(&mut self, limits: Limits) -> u32 {
        self.memories.push(limits);
        (self.memories.len() - 1) as u32
    }

    pub fn import_global(&mut self, global: GlobalType) -> u32 {
        self.imported_globals += 1;
        self.add_global(global)
    }

    pub fn add_global(&mut self, global: GlobalType) -> u32 {
        self.globals.push(global);
        (self.globals.len() - 1) as u32
    }

    pub fn add_element(&mut self, ref_type: ValueType) -> u32 {
        self.elements.push(ref_type);
        (self.elements.len() - 1) as u32
    }

    pub fn set_data_count(&mut self, count: u32) {
        self.data_count = Some(count);
    }

    // Lookup ------------------------------------------------------------------

    pub fn get_type(&self, index: u32) -> Result<&FunctionType, ValidationError> {
        self.types
            .get(index as usize)
            .ok_or_else(|| ValidationError::unknown(ErrorKind::UnknownType, "type", index))
    }

    /// Signature of a referencable function.
    pub fn get_function(&self, index: u32) -> Result<&FunctionType, ValidationError> {
        let type_index = self
            .functions
            .get(index as usize)
            .ok_or_else(|| ValidationError::unknown(ErrorKind::UnknownFunction, "function", index))?;
        self.get_type(*type_index)
    }

    pub fn get_table(&self, index: u32) -> Result<&TableType, ValidationError> {
        self.tables
            .get(index as usize)
            .ok_or_else(|| ValidationError::unknown(ErrorKind::UnknownTable, "table", index))
    }

    pub fn get_memory(&self, index: u32) -> Result<&Limits, ValidationError> {
        self.memories
            .get(index as usize)
            .ok_or_else(|| ValidationError::unknown(ErrorKind::UnknownMemory, "memory", index))
    }

    pub fn get_global(&self, index: u32) -> Result<&GlobalType, ValidationError> {
        self.globals
            .get(index as usize)
            .ok_or_else(|| ValidationError::unknown(ErrorKind::UnknownGlobal, "global", index))
    }

    /// Reference type of an element segment.
    pub fn get_element(&self, index: u32) -> Result<ValueType, ValidationError> {
        self.elements.get(index as usize).copied().ok_or_else(|| {
            ValidationError::unknown(ErrorKind::UnknownElemSegment, "elem segment", index)
        })
    }

    /// Data segments can only be referenced from code once their count is
    /// declared up front.
    pub fn check_data(&self, index: u32) -> Result<(), ValidationError> {
        match self.data_count {
            None => Err(ValidationError::new(
                ErrorKind::DataCountRequired,
                format!("data segment {index} referenced without a data count section"),
            )),
            Some(count) if index >= count => Err(ValidationError::unknown(
                ErrorKind::UnknownDataSegment,
                "data segment",
                index,
            )),
            Some(_) => Ok(()),
        }
    }

    // Counts ------------------------------------------------------------------

    pub fn type_count(&self) -> u32 {
        self.types.len() as u32
    }

    pub fn function_count(&self) -> u32 {
        self.functions.len() as u32
    }

    pub fn imported_function_count(&self) -> u32 {
        self.imported_functions
    }

    /// Functions with a body in this module.
    pub fn defined_function_count(&self) -> u32 {
        self.function_count() - self.imported_functions
    }

    pub fn table_count(&self) -> u32 {
        self.tables.len() as u32
    }

    pub fn memory_count(&self) -> u32 {
        self.memories.len() as u32
    }

    pub fn global_count(&self) -> u32 {
        self.globals.len() as u32
    }

    pub fn element_count(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn data_count(&self) -> Option<u32> {
        self.data_count
    }

    /// The globals visible to constant expressions: imports only.
    pub fn constant_globals(&self) -> &[GlobalType] {
        &self.globals[..self.imported_globals as usize]
    }
}

/// The locals of one function, parameters first, stored as runs of one type.
///
/// Each run records the index one past its last local, so a lookup is a
/// binary search over the runs rather than over every local.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locals {
    runs: Vec<(u32, ValueType)>,
}

impl Locals {
    pub fn new() -> Locals {
        Locals::default()
    }

    /// Append `count` locals of `value_type`.
    pub fn push(&mut self, count: u32, value_type: ValueType) -> Result<(), ValidationError> {
        let end = self.len() as u64 + count as u64;
        if end > MAX_FUNCTION_LOCALS {
            return Err(ValidationError::new(
                ErrorKind::TooManyLocals,
                format!("{end} locals exceed the limit of {MAX_FUNCTION_LOCALS}"),
            ));
        }
        if count == 0 {
            return Ok(());
        }
        match self.runs.last_mut() {
            Some((last_end, last_type)) if *last_type == value_type => *last_end = end as u32,
            _ => self.runs.push((end as u32, value_type)),
        }
        Ok(())
    }

    pub fn len(&self) -> u32 {
        self.runs.last().map_or(0, |(end, _)| *end)
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<ValueType> {
        let run = self.runs.partition_point(|(end, _)| *end <= index);
        self.runs.get(run).map(|(_, value_type)| *value_type)
    }
}

impl FromIterator<ValueType> for Locals {
    fn from_iter<I: IntoIterator<Item = ValueType>>(iter: I) -> Locals {
        let mut locals = Locals::new();
        for value_type in iter {
            match locals.runs.last_mut() {
                Some((end, last)) if *last == value_type => *end = end.saturating_add(1),
                _ => {
                    let end = locals.len().saturating_add(1);
                    locals.runs.push((end, value_type));
                }
            }
        }
        locals
    }
}

/// What one expression can see: the shared index space plus its own locals
/// and, for function bodies, the declared results.
#[derive(Debug, Clone)]
pub struct LocalScope<'a> {
    context: &'a IndexSpace,
    globals: &'a [GlobalType],
    locals: Locals,
    returns: Option<Vec<ValueType>>,
    declared_refs: Option<&'a HashSet<u32>>,
}

impl<'a> LocalScope<'a> {
    /// Scope of a function body. `locals` are the parameters followed by the
    /// declared locals.
    pub fn function(
        context: &'a IndexSpace,
        function_type: &FunctionType,
        locals: Locals,
        declared_refs: &'a HashSet<u32>,
    ) -> LocalScope<'a> {
        LocalScope {
            context,
            globals: &context.globals,
            locals,
            returns: Some(function_type.return_types.clone()),
            declared_refs: Some(declared_refs),
        }
    }

    /// Scope of an initializer or offset expression.
    pub fn constant(context: &'a IndexSpace) -> LocalScope<'a> {
        LocalScope {
            context,
            globals: context.constant_globals(),
            locals: Locals::new(),
            returns: None,
            declared_refs: None,
        }
    }

    pub fn context(&self) -> &'a IndexSpace {
        self.context
    }

    pub fn returns(&self) -> Option<&[ValueType]> {
        self.returns.as_deref()
    }

    pub fn local(&self, index: u32) -> Result<ValueType, ValidationError> {
        self.locals
            .get(index)
            .ok_or_else(|| ValidationError::unknown(ErrorKind::UnknownLocal, "local", index))
    }

    pub fn global(&self, index: u32) -> Result<GlobalType, ValidationError> {
        self.globals
            .get(index as usize)
            .copied()
            .ok_or_else(|| ValidationError::unknown(ErrorKind::UnknownGlobal, "global", index))
    }

    /// `ref.func` needs an existing function, and inside a body that function
    /// must also have been declared by an initializer, element or export.
    pub fn check_function_ref(&self, index: u32) -> Result<(), ValidationError> {
        self.context.get_function(index)?;
        match self.declared_refs {
            Some(refs) if !refs.contains(&index) => Err(ValidationError::new(
                ErrorKind::UndeclaredFunctionReference,
                format!("function reference {index} not declared"),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature(params: &[ValueType], results: &[ValueType]) -> FunctionType {
        FunctionType {
            parameters: params.to_vec(),
            return_types: results.to_vec(),
        }
    }

    fn global(value_type: ValueType, mutable: bool) -> GlobalType {
        GlobalType {
            value_type,
            mutable,
        }
    }

    #[test]
    fn indices_are_assigned_in_order() {
        let mut space = IndexSpace::new();
        assert_eq!(space.add_type(signature(&[], &[])), 0);
        assert_eq!(space.add_type(signature(&[ValueType::I32], &[])), 1);
        assert_eq!(space.import_function(1), 0);
        assert_eq!(space.add_function(0), 1);
        assert_eq!(space.imported_function_count(), 1);
        assert_eq!(space.defined_function_count(), 1);
        assert_eq!(space.get_function(0).unwrap().parameters, vec![ValueType::I32]);
    }

    #[test]
    fn out_of_range_lookups() {
        let space = IndexSpace::new();
        let err = space.get_memory(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownMemory);
        assert!(err.message().contains("memory 0 does not exist"));
        assert_eq!(space.get_type(3).unwrap_err().cause(), "unknown type");
        assert_eq!(space.get_element(0).unwrap_err().cause(), "unknown elem segment");
    }

    #[test]
    fn function_with_dangling_type() {
        let mut space = IndexSpace::new();
        space.add_function(7);
        assert_eq!(space.get_function(0).unwrap_err().kind(), ErrorKind::UnknownType);
    }

    #[test]
    fn data_segments_need_a_count() {
        let mut space = IndexSpace::new();
        assert_eq!(space.check_data(0).unwrap_err().kind(), ErrorKind::DataCountRequired);
        space.set_data_count(1);
        assert!(space.check_data(0).is_ok());
        assert_eq!(space.check_data(1).unwrap_err().kind(), ErrorKind::UnknownDataSegment);
    }

    #[test]
    fn constant_scope_sees_imported_globals_only() {
        let mut space = IndexSpace::new();
        space.import_global(global(ValueType::I32, false));
        space.add_global(global(ValueType::I64, false));
        let scope = LocalScope::constant(&space);
        assert_eq!(scope.global(0).unwrap().value_type, ValueType::I32);
        assert_eq!(scope.global(1).unwrap_err().kind(), ErrorKind::UnknownGlobal);
        assert!(scope.returns().is_none());
    }

    #[test]
    fn function_scope() {
        let mut space = IndexSpace::new();
        space.add_type(signature(&[ValueType::I32], &[ValueType::F64]));
        space.add_function(0);
        space.add_function(0);
        space.add_global(global(ValueType::I64, true));
        let mut refs = HashSet::new();
        refs.insert(1);
        let ftype = space.get_function(0).unwrap().clone();
        let scope = LocalScope::function(
            &space,
            &ftype,
            [ValueType::I32, ValueType::F32].into_iter().collect(),
            &refs,
        );
        assert_eq!(scope.local(1).unwrap(), ValueType::F32);
        assert_eq!(scope.local(2).unwrap_err().kind(), ErrorKind::UnknownLocal);
        assert_eq!(scope.global(0).unwrap().value_type, ValueType::I64);
        assert_eq!(scope.returns(), Some(&[ValueType::F64][..]));
        assert!(scope.check_function_ref(1).is_ok());
        assert_eq!(
            scope.check_function_ref(0).unwrap_err().kind(),
            ErrorKind::UndeclaredFunctionReference
        );
        assert_eq!(
            scope.check_function_ref(2).unwrap_err().kind(),
            ErrorKind::UnknownFunction
        );
    }

    #[test]
    fn locals_are_looked_up_by_run() {
        let mut locals: Locals = [ValueType::I32, ValueType::I32].into_iter().collect();
        locals.push(0, ValueType::F64).unwrap();
        locals.push(3, ValueType::I64).unwrap();
        locals.push(1, ValueType::I64).unwrap();
        locals.push(2, ValueType::V128).unwrap();
        assert_eq!(locals.len(), 8);
        assert_eq!(locals.get(1), Some(ValueType::I32));
        assert_eq!(locals.get(2), Some(ValueType::I64));
        assert_eq!(locals.get(5), Some(ValueType::I64));
        assert_eq!(locals.get(6), Some(ValueType::V128));
        assert_eq!(locals.get(8), None);
        assert!(Locals::new().is_empty());
    }

    #[test]
    fn locals_are_bounded_by_the_index_range() {
        let mut locals = Locals::new();
        locals.push(u32::MAX, ValueType::I32).unwrap();
        assert_eq!(locals.get(u32::MAX - 1), Some(ValueType::I32));
        let err = locals.push(1, ValueType::I32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooManyLocals);
        assert_eq!(locals.len(), u32::MAX);
    }
}
