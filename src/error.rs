//! Validation errors.
//!
//! Every rule violation produces a [`ValidationError`] carrying two things: a
//! descriptive message for the developer reading it, and an [`ErrorKind`] whose
//! `Display` is the normalized cause used by conformance test suites
//! (`"type mismatch"`, `"unknown global"`, ...).

use std::fmt;
use thiserror::Error;

/// Normalized cause of a validation failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // structural
    #[error("invalid value type")]
    InvalidValueType,

    #[error("malformed mutability")]
    MalformedMutability,

    #[error("malformed reference type")]
    MalformedReferenceType,

    #[error("malformed export kind")]
    MalformedExportKind,

    #[error("size minimum must not be greater than maximum")]
    SizeMinimumExceedsMaximum,

    #[error("memory size must be at most 65536 pages (4GiB)")]
    MemorySizeTooLarge,

    #[error("table size must be at most 2^32-1")]
    TableSizeTooLarge,

    #[error("unknown type")]
    UnknownType,

    #[error("unknown function")]
    UnknownFunction,

    #[error("unknown table")]
    UnknownTable,

    #[error("unknown memory")]
    UnknownMemory,

    #[error("unknown global")]
    UnknownGlobal,

    #[error("unknown elem segment")]
    UnknownElemSegment,

    #[error("unknown data segment")]
    UnknownDataSegment,

    #[error("start function")]
    StartFunction,

    #[error("multiple start sections")]
    MultipleStartSections,

    #[error("multiple memories")]
    MultipleMemories,

    #[error("duplicate export name")]
    DuplicateExportName,

    #[error("data count and data section have inconsistent lengths")]
    DataCountMismatch,

    #[error("function and code section have inconsistent lengths")]
    FunctionCodeMismatch,

    #[error("too many locals")]
    TooManyLocals,

    #[error("unexpected event")]
    UnexpectedEvent,

    // instruction typing
    #[error("type mismatch")]
    TypeMismatch,

    #[error("unknown local")]
    UnknownLocal,

    #[error("unknown label")]
    UnknownLabel,

    #[error("global is immutable")]
    ImmutableGlobal,

    #[error("alignment must not be larger than natural")]
    AlignmentTooLarge,

    #[error("invalid lane index")]
    InvalidLaneIndex,

    #[error("invalid result arity")]
    InvalidResultArity,

    #[error("undeclared function reference")]
    UndeclaredFunctionReference,

    #[error("data count section required")]
    DataCountRequired,

    #[error("else instruction not in if block")]
    ElseWithoutIf,

    #[error("return outside function")]
    ReturnOutsideFunction,

    #[error("unclosed block")]
    UnclosedBlock,

    #[error("unexpected instruction after end")]
    InstructionAfterEnd,

    #[error("illegal opcode")]
    IllegalOpcode,

    // constant contexts
    #[error("constant expression required")]
    ConstantExpressionRequired,
}

/// Coarse grouping of [`ErrorKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed declarations and out-of-range indices at module level.
    Structural,
    /// Ill-typed instruction sequences and control nesting.
    Type,
    /// A non-constant instruction in a constant context.
    Constant,
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        use ErrorKind::*;
        match self {
            ConstantExpressionRequired => ErrorCategory::Constant,
            TypeMismatch | UnknownLocal | UnknownLabel | ImmutableGlobal | AlignmentTooLarge
            | InvalidLaneIndex | InvalidResultArity | UndeclaredFunctionReference
            | DataCountRequired | ElseWithoutIf | ReturnOutsideFunction | UnclosedBlock
            | InstructionAfterEnd | IllegalOpcode => ErrorCategory::Type,
            _ => ErrorCategory::Structural,
        }
    }
}

/// A classified validation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    kind: ErrorKind,
    message: String,
}

impl ValidationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> ValidationError {
        ValidationError {
            kind,
            message: message.into(),
        }
    }

    /// An out-of-range index into the index space named `space`.
    pub fn unknown(kind: ErrorKind, space: &str, index: u32) -> ValidationError {
        ValidationError::new(
            kind,
            format!("unknown {space} {index}: {space} {index} does not exist"),
        )
    }

    pub fn type_mismatch(message: impl Into<String>) -> ValidationError {
        ValidationError::new(ErrorKind::TypeMismatch, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The normalized cause string, distinct from the descriptive message.
    pub fn cause(&self) -> String {
        self.kind.to_string()
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the message with where the error happened, keeping the kind.
    pub fn context(self, location: impl fmt::Display) -> ValidationError {
        ValidationError {
            kind: self.kind,
            message: format!("{location}: {}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cause_is_independent_of_message() {
        let err = ValidationError::unknown(ErrorKind::UnknownMemory, "memory", 0);
        assert_eq!(err.to_string(), "unknown memory 0: memory 0 does not exist");
        assert_eq!(err.cause(), "unknown memory");
        assert_eq!(err.category(), ErrorCategory::Structural);
    }

    #[test]
    fn context_keeps_kind() {
        let err = ValidationError::type_mismatch("stack underflow").context("func 3");
        assert_eq!(err.message(), "func 3: stack underflow");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(err.category(), ErrorCategory::Type);
    }

    #[test]
    fn constant_category() {
        assert_eq!(
            ErrorKind::ConstantExpressionRequired.category(),
            ErrorCategory::Constant
        );
    }
}
