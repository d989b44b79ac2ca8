//! Module and expression validation.
//!
//! [`ModuleValidator`] consumes structural events, records declarations in an
//! [`IndexSpace`], and opens a [`CodeValidator`] for every function body. In
//! constant contexts (global initializers, segment offsets, element items) the
//! code validator sits behind a [`ConstantExpressionValidator`].

pub mod code;
pub mod constant;
pub mod context;
pub mod module;

pub use code::{CodeValidator, FrameKind, MaybeValue};
pub use constant::ConstantExpressionValidator;
pub use context::{IndexSpace, LocalScope, Locals};
pub use module::ModuleValidator;
