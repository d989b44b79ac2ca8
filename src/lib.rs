//! A streaming structural validator and type checker for WebAssembly 2.0
//! modules.
//!
//! wasmcheck consumes a module as a sequence of events (one per section entry,
//! one per instruction) and rejects it at the first rule violation, with a
//! descriptive message and a normalized cause.
//!
//! # Modules
//!
//! - [`visitor`] -- The event protocol: [`visitor::ModuleVisitor`] and [`visitor::ExprVisitor`].
//! - [`validate`] -- Index spaces, the module validator, the constant-expression
//!   restrictor, and the expression type checker.
//! - [`parser`] -- Binary format producer: decodes `.wasm` bytes into events.
//! - [`tree`] -- A consumer that builds a replayable [`tree::ModuleTree`].
//! - [`error`] -- [`error::ValidationError`] and its [`error::ErrorKind`] causes.
//!
//! # Example
//!
//! Validate a function body directly against an index space:
//!
//! ```
//! use wasmcheck::instruction::Instruction::*;
//! use wasmcheck::types::{FuncTypeDecl, ValueType::I32};
//! use wasmcheck::validate::ModuleValidator;
//! use wasmcheck::visitor::{feed, ModuleVisitor};
//!
//! let mut validator = ModuleValidator::new();
//! validator.visit_type(&FuncTypeDecl::new(&[I32], &[I32])).unwrap();
//! validator.visit_function(0).unwrap();
//! let body = validator.visit_code(&[]).unwrap();
//! feed(body, &[LocalGet { local_idx: 0 }, I32Const { value: 1 }, I32Add, End]).unwrap();
//! validator.visit_end().unwrap();
//! ```
//!
//! # Specification
//!
//! Targets the [WebAssembly 2.0 specification](https://webassembly.github.io/spec/core/)
//! validation rules, including bulk memory operations, reference types, and the
//! fixed-width SIMD instruction set.

pub mod error;
pub mod instruction;
pub mod limits;
pub mod parser;
pub mod tree;
pub mod types;
pub mod validate;
pub mod visitor;

use parser::DecodeError;
use tree::{ModuleTree, TreeBuilder};
use validate::{IndexSpace, ModuleValidator};

/// Decode and validate a binary module, returning its index spaces.
pub fn validate(bytes: &[u8]) -> Result<IndexSpace, DecodeError> {
    let mut validator = ModuleValidator::new();
    parser::parse(bytes, &mut validator)?;
    Ok(validator.into_context())
}

/// Decode and validate a binary module, building its tree on the way.
pub fn validate_tree(bytes: &[u8]) -> Result<ModuleTree, DecodeError> {
    let mut builder = TreeBuilder::new();
    {
        let mut validator = ModuleValidator::new().chain(&mut builder);
        parser::parse(bytes, &mut validator)?;
    }
    Ok(builder.into_tree())
}
