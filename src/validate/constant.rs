use super::code::CodeValidator;
use super::context::{IndexSpace, LocalScope};
use crate::error::{ErrorKind, ValidationError};
use crate::instruction::Instruction;
use crate::types::ValueType;
use crate::visitor::{ExprVisitor, VisitResult};
use std::collections::HashSet;

/// Admits only constant instructions, then hands them to the type checker.
///
/// Function indices named by `ref.func` are recorded in `refs`: they count as
/// declared for `ref.func` inside function bodies.
pub struct ConstantExpressionValidator<'a> {
    code: CodeValidator<'a>,
    refs: &'a mut HashSet<u32>,
}

impl<'a> ConstantExpressionValidator<'a> {
    /// An expression evaluating to one value of `result`.
    pub fn new(
        context: &'a IndexSpace,
        refs: &'a mut HashSet<u32>,
        result: ValueType,
    ) -> ConstantExpressionValidator<'a> {
        ConstantExpressionValidator {
            code: CodeValidator::new(LocalScope::constant(context), vec![result]),
            refs,
        }
    }

    fn restrict(&mut self, inst: &Instruction) -> VisitResult {
        if !inst.is_constant() {
            return Err(ValidationError::new(
                ErrorKind::ConstantExpressionRequired,
                format!("{} is not allowed in a constant expression", inst.mnemonic()),
            ));
        }
        match inst {
            Instruction::RefFunc { func_idx } => {
                self.code.scope().context().get_function(*func_idx)?;
                self.refs.insert(*func_idx);
            }
            Instruction::GlobalGet { global_idx } => {
                if self.code.scope().global(*global_idx)?.mutable {
                    return Err(ValidationError::new(
                        ErrorKind::ConstantExpressionRequired,
                        format!("global {global_idx} must be const"),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl ExprVisitor for ConstantExpressionValidator<'_> {
    fn visit_instruction(&mut self, instruction: &Instruction) -> VisitResult {
        self.restrict(instruction)?;
        self.code.visit_instruction(instruction)
    }

    fn visit_end(&mut self) -> VisitResult {
        self.code.visit_end()
    }
}
