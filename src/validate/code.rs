use super::context::{IndexSpace, LocalScope};
use crate::error::{ErrorKind, ValidationError};
use crate::instruction::simd::{self, SimdSignature};
use crate::instruction::{BlockType, Instruction, MemArg};
use crate::limits::MAX_SHUFFLE_LANE;
use crate::types::ValueType::{self, *};
use crate::visitor::{ExprVisitor, VisitResult};
use log::trace;
use std::fmt;
use MaybeValue::{Known, Unknown};

/// An operand stack slot. Values produced in unreachable code have no
/// determined type and match anything.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum MaybeValue {
    Known(ValueType),
    Unknown,
}

impl MaybeValue {
    fn is_num(&self) -> bool {
        match self {
            Known(v) => v.is_num(),
            Unknown => true,
        }
    }

    fn is_vec(&self) -> bool {
        match self {
            Known(v) => v.is_vec(),
            Unknown => true,
        }
    }

    fn is_ref(&self) -> bool {
        match self {
            Known(v) => v.is_ref(),
            Unknown => true,
        }
    }
}

impl fmt::Display for MaybeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Known(v) => write!(f, "{v}"),
            Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Function,
    Block,
    Loop,
    If,
    Else,
}

#[derive(Debug, Clone)]
struct CtrlFrame {
    kind: FrameKind,
    start_types: Vec<ValueType>,
    end_types: Vec<ValueType>,
    height: usize,
    unreachable: bool,
}

/// Type checks one instruction sequence: a function body, or an initializer
/// or offset expression producing a single value.
pub struct CodeValidator<'a> {
    scope: LocalScope<'a>,
    vals: Vec<MaybeValue>,
    ctrls: Vec<CtrlFrame>,
    ended: bool,
}

impl<'a> CodeValidator<'a> {
    pub fn new(scope: LocalScope<'a>, results: Vec<ValueType>) -> CodeValidator<'a> {
        let mut v = CodeValidator {
            scope,
            vals: vec![],
            ctrls: vec![],
            ended: false,
        };

        // parameters live in locals, not on the stack
        v.push_ctrl(FrameKind::Function, vec![], results);
        v
    }

    /// The operand stack. Once the expression has ended it holds the results.
    pub fn stack(&self) -> &[MaybeValue] {
        &self.vals
    }

    pub fn scope(&self) -> &LocalScope<'a> {
        &self.scope
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn context(&self) -> &'a IndexSpace {
        self.scope.context()
    }

    // Stack primitives --------------------------------------------------------

    fn frame(&self) -> Result<&CtrlFrame, ValidationError> {
        self.ctrls.last().ok_or_else(no_frame)
    }

    fn push_val(&mut self, val_type: MaybeValue) {
        self.vals.push(val_type);
    }

    fn push_vals(&mut self, val_types: &[ValueType]) {
        self.vals.extend(val_types.iter().map(|v| Known(*v)));
    }

    fn pop_val(&mut self) -> Result<MaybeValue, ValidationError> {
        let frame = self.frame()?;
        if self.vals.len() == frame.height {
            return if frame.unreachable {
                Ok(Unknown)
            } else {
                Err(ValidationError::type_mismatch("stack underflow"))
            };
        }
        self.vals
            .pop()
            .ok_or_else(|| ValidationError::type_mismatch("stack underflow"))
    }

    /// Whether the innermost frame is dead code.
    fn dead(&self) -> bool {
        self.ctrls.last().map_or(false, |frame| frame.unreachable)
    }

    /// Dead code only has its stack shape checked, operand types always match.
    fn pop_expected(&mut self, expected: MaybeValue) -> Result<MaybeValue, ValidationError> {
        let actual = self.pop_val()?;
        match (actual, expected) {
            (Known(a), Known(e)) if a != e && !self.dead() => Err(ValidationError::type_mismatch(
                format!("type mismatch, expected {e} got {a}"),
            )),
            _ => Ok(actual),
        }
    }

    /// Pop `val_types` (the last one first), returning what was popped in
    /// stack order.
    fn pop_vals(&mut self, val_types: &[ValueType]) -> Result<Vec<MaybeValue>, ValidationError> {
        let mut popped = Vec::with_capacity(val_types.len());
        for val_type in val_types.iter().rev() {
            popped.push(self.pop_expected(Known(*val_type))?);
        }
        popped.reverse();
        Ok(popped)
    }

    fn push_ctrl(&mut self, kind: FrameKind, start_types: Vec<ValueType>, end_types: Vec<ValueType>) {
        let height = self.vals.len();
        self.push_vals(&start_types);
        self.ctrls.push(CtrlFrame {
            kind,
            start_types,
            end_types,
            height,
            unreachable: false,
        });
    }

    fn pop_ctrl(&mut self) -> Result<CtrlFrame, ValidationError> {
        let frame = self.frame()?.clone();
        self.pop_vals(&frame.end_types)?;
        if self.vals.len() != frame.height {
            return Err(ValidationError::type_mismatch(
                "stack height does not match frame height",
            ));
        }
        self.ctrls.pop();
        Ok(frame)
    }

    fn label_types(&self, label: u32) -> Result<Vec<ValueType>, ValidationError> {
        let depth = label as usize;
        if depth >= self.ctrls.len() {
            return Err(ValidationError::unknown(ErrorKind::UnknownLabel, "label", label));
        }
        let frame = &self.ctrls[self.ctrls.len() - 1 - depth];
        // branching to a loop re-enters it at the top
        Ok(if frame.kind == FrameKind::Loop {
            frame.start_types.clone()
        } else {
            frame.end_types.clone()
        })
    }

    fn mark_unreachable(&mut self) -> VisitResult {
        let frame = self.ctrls.last_mut().ok_or_else(no_frame)?;
        self.vals.truncate(frame.height);
        frame.unreachable = true;
        Ok(())
    }

    fn sig_unary(&mut self, in_type: ValueType, out_type: ValueType) -> VisitResult {
        self.pop_expected(Known(in_type))?;
        self.push_val(Known(out_type));
        Ok(())
    }

    fn sig_binary(&mut self, in_type: ValueType, out_type: ValueType) -> VisitResult {
        self.pop_expected(Known(in_type))?;
        self.pop_expected(Known(in_type))?;
        self.push_val(Known(out_type));
        Ok(())
    }

    fn sig_ternary(&mut self, in_type: ValueType) -> VisitResult {
        self.pop_vals(&[in_type, in_type, in_type])?;
        Ok(())
    }

    // Instruction helpers -----------------------------------------------------

    fn block_types(
        &self,
        block_type: &BlockType,
    ) -> Result<(Vec<ValueType>, Vec<ValueType>), ValidationError> {
        match block_type {
            BlockType::Empty => Ok((vec![], vec![])),
            // simple []->[type] version
            BlockType::Value(tag) => Ok((vec![], vec![ValueType::decode(*tag)?])),
            // complex [type*]->[type*] version
            BlockType::FuncType(ti) => {
                let ftype = self.context().get_type(*ti)?;
                Ok((ftype.parameters.clone(), ftype.return_types.clone()))
            }
        }
    }

    fn open_block(&mut self, kind: FrameKind, block_type: &BlockType) -> VisitResult {
        let (start_types, end_types) = self.block_types(block_type)?;
        if kind == FrameKind::If {
            self.pop_expected(Known(I32))?;
        }
        self.pop_vals(&start_types)?;
        self.push_ctrl(kind, start_types, end_types);
        Ok(())
    }

    fn memory(&self) -> VisitResult {
        self.context().get_memory(0)?;
        Ok(())
    }

    fn load(&mut self, memarg: &MemArg, natural: u32, result: ValueType) -> VisitResult {
        self.memory()?;
        check_alignment(memarg, natural)?;
        self.sig_unary(I32, result)
    }

    fn store(&mut self, memarg: &MemArg, natural: u32, operand: ValueType) -> VisitResult {
        self.memory()?;
        check_alignment(memarg, natural)?;
        self.pop_expected(Known(operand))?;
        self.pop_expected(Known(I32))?;
        Ok(())
    }

    fn table_type(&self, table_idx: u32) -> Result<ValueType, ValidationError> {
        Ok(self.context().get_table(table_idx)?.ref_type)
    }

    fn select(&mut self) -> VisitResult {
        self.pop_expected(Known(I32))?;
        let t1 = self.pop_val()?;
        let t2 = self.pop_val()?;
        if self.dead() {
            self.push_val(if t1 == Unknown { t2 } else { t1 });
            return Ok(());
        }
        if let (Known(a), Known(b)) = (t1, t2) {
            if a != b {
                return Err(ValidationError::type_mismatch(
                    "select argument types do not match",
                ));
            }
        }
        if !((t1.is_num() && t2.is_num()) || (t1.is_vec() && t2.is_vec())) {
            return Err(ValidationError::type_mismatch(format!(
                "select without a type annotation requires numeric or vector operands, got {t1}"
            )));
        }
        self.push_val(if t1 == Unknown { t2 } else { t1 });
        Ok(())
    }

    fn br_table(&mut self, labels: &[u32], default: u32) -> VisitResult {
        self.pop_expected(Known(I32))?;
        let default_types = self.label_types(default)?;
        let arity = default_types.len();
        for &label in labels {
            let label_types = self.label_types(label)?;
            if label_types.len() != arity {
                return Err(ValidationError::type_mismatch(format!(
                    "block type mismatch: label {label} has arity {}, default label {default} has arity {arity}",
                    label_types.len()
                )));
            }
            // check compatibility without disturbing the stack
            let popped = self.pop_vals(&label_types)?;
            self.vals.extend(popped);
        }
        self.pop_vals(&default_types)?;
        self.mark_unreachable()
    }

    fn simd(&mut self, inst: &Instruction) -> VisitResult {
        use SimdSignature::*;
        match inst {
            Instruction::V128Const { .. } => {
                self.push_val(Known(V128));
                Ok(())
            }

            Instruction::I8x16Shuffle { lanes } => {
                for lane in lanes {
                    check_lane(*lane, MAX_SHUFFLE_LANE)?;
                }
                self.sig_binary(V128, V128)
            }

            Instruction::SimdMemory { subopcode, memarg } => match simd::signature(*subopcode) {
                Some(Load { max_align }) => self.load(memarg, max_align, V128),
                Some(Store { max_align }) => self.store(memarg, max_align, V128),
                _ => Err(illegal_simd(*subopcode)),
            },

            Instruction::SimdMemoryLane {
                subopcode,
                memarg,
                lane,
            } => match simd::signature(*subopcode) {
                Some(LoadLane { max_align, lanes }) => {
                    self.memory()?;
                    check_alignment(memarg, max_align)?;
                    check_lane(*lane, lanes)?;
                    self.pop_vals(&[I32, V128])?;
                    self.push_val(Known(V128));
                    Ok(())
                }
                Some(StoreLane { max_align, lanes }) => {
                    self.memory()?;
                    check_alignment(memarg, max_align)?;
                    check_lane(*lane, lanes)?;
                    self.pop_vals(&[I32, V128])?;
                    Ok(())
                }
                _ => Err(illegal_simd(*subopcode)),
            },

            Instruction::SimdLane { subopcode, lane } => match simd::signature(*subopcode) {
                Some(ExtractLane { lanes, result }) => {
                    check_lane(*lane, lanes)?;
                    self.sig_unary(V128, result)
                }
                Some(ReplaceLane { lanes, operand }) => {
                    check_lane(*lane, lanes)?;
                    self.pop_vals(&[V128, operand])?;
                    self.push_val(Known(V128));
                    Ok(())
                }
                _ => Err(illegal_simd(*subopcode)),
            },

            // v128.const and i8x16.shuffle carry immediates of their own
            Instruction::Simd { subopcode }
                if *subopcode != simd::V128_CONST && *subopcode != simd::I8X16_SHUFFLE =>
            {
                match simd::signature(*subopcode) {
                    Some(Fixed { params, results }) => {
                        self.pop_vals(params)?;
                        self.push_vals(results);
                        Ok(())
                    }
                    _ => Err(illegal_simd(*subopcode)),
                }
            }

            Instruction::Simd { subopcode } => Err(illegal_simd(*subopcode)),

            _ => Err(ValidationError::new(
                ErrorKind::IllegalOpcode,
                format!("{} is not a vector instruction", inst.mnemonic()),
            )),
        }
    }

    fn validate(&mut self, inst: &Instruction) -> VisitResult {
        use Instruction::*;
        match inst {
            // Control ---------------------------------------------------------
            Unreachable => self.mark_unreachable(),

            Nop => Ok(()),

            Block { block_type } => self.open_block(FrameKind::Block, block_type),
            Loop { block_type } => self.open_block(FrameKind::Loop, block_type),
            If { block_type } => self.open_block(FrameKind::If, block_type),

            Else => {
                if self.frame()?.kind != FrameKind::If {
                    return Err(ValidationError::new(
                        ErrorKind::ElseWithoutIf,
                        "else instruction not in if block",
                    ));
                }
                let frame = self.pop_ctrl()?;
                self.push_ctrl(FrameKind::Else, frame.start_types, frame.end_types);
                Ok(())
            }

            End => {
                let mut frame = self.pop_ctrl()?;
                if frame.kind == FrameKind::If {
                    // no else: the empty else branch must turn the inputs into the outputs
                    self.push_ctrl(FrameKind::Else, frame.start_types, frame.end_types);
                    frame = self.pop_ctrl()?;
                }
                self.push_vals(&frame.end_types);
                if self.ctrls.is_empty() {
                    self.ended = true;
                }
                Ok(())
            }

            Br { label_idx } => {
                let label_types = self.label_types(*label_idx)?;
                self.pop_vals(&label_types)?;
                self.mark_unreachable()
            }

            BrIf { label_idx } => {
                self.pop_expected(Known(I32))?;
                let label_types = self.label_types(*label_idx)?;
                self.pop_vals(&label_types)?;
                self.push_vals(&label_types);
                Ok(())
            }

            BrTable { labels, default } => self.br_table(labels, *default),

            Return => {
                let returns = self
                    .scope
                    .returns()
                    .map(<[ValueType]>::to_vec)
                    .ok_or_else(|| {
                        ValidationError::new(
                            ErrorKind::ReturnOutsideFunction,
                            "expression does not have a return type",
                        )
                    })?;
                self.pop_vals(&returns)?;
                self.mark_unreachable()
            }

            Call { func_idx } => {
                let ftype = self.context().get_function(*func_idx)?;
                self.pop_vals(&ftype.parameters)?;
                self.push_vals(&ftype.return_types);
                Ok(())
            }

            CallIndirect {
                type_idx,
                table_idx,
            } => {
                let ref_type = self.table_type(*table_idx)?;
                if ref_type != FuncRef {
                    return Err(ValidationError::type_mismatch(format!(
                        "table type must be funcref, table {table_idx} holds {ref_type}"
                    )));
                }
                let ftype = self.context().get_type(*type_idx)?;
                // operand that directs us to the table entry
                self.pop_expected(Known(I32))?;
                self.pop_vals(&ftype.parameters)?;
                self.push_vals(&ftype.return_types);
                Ok(())
            }

            // Reference -------------------------------------------------------
            RefNull { ref_type } => {
                let ref_type = ValueType::decode_ref(*ref_type)?;
                self.push_val(Known(ref_type));
                Ok(())
            }

            RefIsNull => {
                let operand = self.pop_val()?;
                if !operand.is_ref() && !self.dead() {
                    return Err(ValidationError::type_mismatch(format!(
                        "type mismatch, expected a reference got {operand}"
                    )));
                }
                self.push_val(Known(I32));
                Ok(())
            }

            RefFunc { func_idx } => {
                self.scope.check_function_ref(*func_idx)?;
                self.push_val(Known(FuncRef));
                Ok(())
            }

            // Parametric ------------------------------------------------------
            Drop => {
                self.pop_val()?;
                Ok(())
            }

            Select => self.select(),

            SelectTyped { val_types } => {
                if val_types.len() != 1 {
                    return Err(ValidationError::new(
                        ErrorKind::InvalidResultArity,
                        format!("typed select must name exactly one type, got {}", val_types.len()),
                    ));
                }
                let t = ValueType::decode(val_types[0])?;
                self.pop_vals(&[t, t, I32])?;
                self.push_val(Known(t));
                Ok(())
            }

            // Variable --------------------------------------------------------
            LocalGet { local_idx } => {
                let local = self.scope.local(*local_idx)?;
                self.push_val(Known(local));
                Ok(())
            }

            LocalSet { local_idx } => {
                let local = self.scope.local(*local_idx)?;
                self.pop_expected(Known(local))?;
                Ok(())
            }

            LocalTee { local_idx } => {
                let local = self.scope.local(*local_idx)?;
                self.sig_unary(local, local)
            }

            GlobalGet { global_idx } => {
                let global = self.scope.global(*global_idx)?;
                self.push_val(Known(global.value_type));
                Ok(())
            }

            GlobalSet { global_idx } => {
                let global = self.scope.global(*global_idx)?;
                if !global.mutable {
                    return Err(ValidationError::new(
                        ErrorKind::ImmutableGlobal,
                        format!("global {global_idx} is immutable"),
                    ));
                }
                self.pop_expected(Known(global.value_type))?;
                Ok(())
            }

            // Table -----------------------------------------------------------
            TableGet { table_idx } => {
                let t = self.table_type(*table_idx)?;
                self.sig_unary(I32, t)
            }

            TableSet { table_idx } => {
                let t = self.table_type(*table_idx)?;
                self.pop_vals(&[I32, t])?;
                Ok(())
            }

            TableSize { table_idx } => {
                self.table_type(*table_idx)?;
                self.push_val(Known(I32));
                Ok(())
            }

            TableGrow { table_idx } => {
                let t = self.table_type(*table_idx)?;
                self.pop_vals(&[t, I32])?;
                self.push_val(Known(I32));
                Ok(())
            }

            TableFill { table_idx } => {
                let t = self.table_type(*table_idx)?;
                self.pop_vals(&[I32, t, I32])?;
                Ok(())
            }

            TableCopy {
                dst_table,
                src_table,
            } => {
                let dst = self.table_type(*dst_table)?;
                let src = self.table_type(*src_table)?;
                if dst != src {
                    return Err(ValidationError::type_mismatch(format!(
                        "table types don't match: {dst} and {src}"
                    )));
                }
                self.sig_ternary(I32)
            }

            TableInit {
                elem_idx,
                table_idx,
            } => {
                let table = self.table_type(*table_idx)?;
                let elem = self.context().get_element(*elem_idx)?;
                if table != elem {
                    return Err(ValidationError::type_mismatch(format!(
                        "element and table types don't match: {elem} and {table}"
                    )));
                }
                self.sig_ternary(I32)
            }

            ElemDrop { elem_idx } => {
                self.context().get_element(*elem_idx)?;
                Ok(())
            }

            // Memory ----------------------------------------------------------
            I32Load { memarg } => self.load(memarg, 2, I32),
            I32Load8S { memarg } | I32Load8U { memarg } => self.load(memarg, 0, I32),
            I32Load16S { memarg } | I32Load16U { memarg } => self.load(memarg, 1, I32),
            I64Load { memarg } => self.load(memarg, 3, I64),
            I64Load8S { memarg } | I64Load8U { memarg } => self.load(memarg, 0, I64),
            I64Load16S { memarg } | I64Load16U { memarg } => self.load(memarg, 1, I64),
            I64Load32S { memarg } | I64Load32U { memarg } => self.load(memarg, 2, I64),
            F32Load { memarg } => self.load(memarg, 2, F32),
            F64Load { memarg } => self.load(memarg, 3, F64),

            I32Store { memarg } => self.store(memarg, 2, I32),
            I32Store8 { memarg } => self.store(memarg, 0, I32),
            I32Store16 { memarg } => self.store(memarg, 1, I32),
            I64Store { memarg } => self.store(memarg, 3, I64),
            I64Store8 { memarg } => self.store(memarg, 0, I64),
            I64Store16 { memarg } => self.store(memarg, 1, I64),
            I64Store32 { memarg } => self.store(memarg, 2, I64),
            F32Store { memarg } => self.store(memarg, 2, F32),
            F64Store { memarg } => self.store(memarg, 3, F64),

            MemorySize => {
                self.memory()?;
                self.push_val(Known(I32));
                Ok(())
            }

            MemoryGrow => {
                self.memory()?;
                self.sig_unary(I32, I32)
            }

            MemoryFill | MemoryCopy => {
                self.memory()?;
                self.sig_ternary(I32)
            }

            MemoryInit { data_idx } => {
                self.memory()?;
                self.context().check_data(*data_idx)?;
                self.sig_ternary(I32)
            }

            DataDrop { data_idx } => self.context().check_data(*data_idx),

            // Numeric ---------------------------------------------------------
            I32Const { .. } => {
                self.push_val(Known(I32));
                Ok(())
            }

            // iunop (i32):i32
            I32Clz | I32Ctz | I32Popcnt => self.sig_unary(I32, I32),

            // ibinop (i32,i32):i32
            I32Add | I32Sub | I32Mul | I32DivS | I32DivU | I32RemS | I32RemU | I32And | I32Or
            | I32Xor | I32Shl | I32ShrS | I32ShrU | I32Rotr | I32Rotl => self.sig_binary(I32, I32),

            // itestop (i32):i32
            I32Eqz => self.sig_unary(I32, I32),

            // irelop (i32,i32):i32
            I32Eq | I32Ne | I32LtS | I32LtU | I32GtS | I32GtU | I32LeS | I32LeU | I32GeS
            | I32GeU => self.sig_binary(I32, I32),

            // cvtop (i32):i32
            I32Extend8S | I32Extend16S => self.sig_unary(I32, I32),

            // cvtop (i64):i32
            I32WrapI64 => self.sig_unary(I64, I32),

            // cvtop (f32):i32
            I32TruncF32S | I32TruncF32U | I32TruncSatF32S | I32TruncSatF32U | I32ReinterpretF32 => {
                self.sig_unary(F32, I32)
            }

            // cvtop (f64):i32
            I32TruncF64S | I32TruncF64U | I32TruncSatF64S | I32TruncSatF64U => {
                self.sig_unary(F64, I32)
            }

            I64Const { .. } => {
                self.push_val(Known(I64));
                Ok(())
            }

            // iunop (i64):i64
            I64Clz | I64Ctz | I64Popcnt => self.sig_unary(I64, I64),

            // ibinop (i64,i64):i64
            I64Add | I64Sub | I64Mul | I64DivS | I64DivU | I64RemS | I64RemU | I64And | I64Or
            | I64Xor | I64Shl | I64ShrS | I64ShrU | I64Rotr | I64Rotl => self.sig_binary(I64, I64),

            // itestop (i64):i32
            I64Eqz => self.sig_unary(I64, I32),

            // irelop (i64,i64):i32
            I64Eq | I64Ne | I64LtS | I64LtU | I64GtS | I64GtU | I64LeS | I64LeU | I64GeS
            | I64GeU => self.sig_binary(I64, I32),

            // cvtop (i64):i64
            I64Extend8S | I64Extend16S | I64Extend32S => self.sig_unary(I64, I64),

            // cvtop (i32):i64
            I64ExtendI32S | I64ExtendI32U => self.sig_unary(I32, I64),

            // cvtop (f32):i64
            I64TruncF32S | I64TruncF32U | I64TruncSatF32S | I64TruncSatF32U => {
                self.sig_unary(F32, I64)
            }

            // cvtop (f64):i64
            I64TruncF64S | I64TruncF64U | I64TruncSatF64S | I64TruncSatF64U | I64ReinterpretF64 => {
                self.sig_unary(F64, I64)
            }

            F32Const { .. } => {
                self.push_val(Known(F32));
                Ok(())
            }

            // funop (f32):f32
            F32Abs | F32Neg | F32Sqrt | F32Ceil | F32Floor | F32Trunc | F32Nearest => {
                self.sig_unary(F32, F32)
            }

            // fbinop (f32,f32):f32
            F32Add | F32Sub | F32Mul | F32Div | F32Min | F32Max | F32Copysign => {
                self.sig_binary(F32, F32)
            }

            // frelop (f32,f32):i32
            F32Eq | F32Ne | F32Lt | F32Gt | F32Le | F32Ge => self.sig_binary(F32, I32),

            // cvtop (f64):f32
            F32DemoteF64 => self.sig_unary(F64, F32),

            // cvtop (i32):f32
            F32ConvertI32S | F32ConvertI32U | F32ReinterpretI32 => self.sig_unary(I32, F32),

            // cvtop (i64):f32
            F32ConvertI64S | F32ConvertI64U => self.sig_unary(I64, F32),

            F64Const { .. } => {
                self.push_val(Known(F64));
                Ok(())
            }

            // funop (f64):f64
            F64Abs | F64Neg | F64Sqrt | F64Ceil | F64Floor | F64Trunc | F64Nearest => {
                self.sig_unary(F64, F64)
            }

            // fbinop (f64,f64):f64
            F64Add | F64Sub | F64Mul | F64Div | F64Min | F64Max | F64Copysign => {
                self.sig_binary(F64, F64)
            }

            // frelop (f64,f64):i32
            F64Eq | F64Ne | F64Lt | F64Gt | F64Le | F64Ge => self.sig_binary(F64, I32),

            // cvtop (f32):f64
            F64PromoteF32 => self.sig_unary(F32, F64),

            // cvtop (i32):f64
            F64ConvertI32S | F64ConvertI32U => self.sig_unary(I32, F64),

            // cvtop (i64):f64
            F64ConvertI64S | F64ConvertI64U | F64ReinterpretI64 => self.sig_unary(I64, F64),

            // Vector ----------------------------------------------------------
            V128Const { .. }
            | I8x16Shuffle { .. }
            | SimdMemory { .. }
            | SimdMemoryLane { .. }
            | SimdLane { .. }
            | Simd { .. } => self.simd(inst),
        }
    }
}

impl ExprVisitor for CodeValidator<'_> {
    fn visit_instruction(&mut self, instruction: &Instruction) -> VisitResult {
        trace!("validate: {instruction}");
        if self.ended {
            return Err(ValidationError::new(
                ErrorKind::InstructionAfterEnd,
                format!("unexpected instruction after end of expression: {instruction}"),
            ));
        }
        self.validate(instruction)
    }

    fn visit_end(&mut self) -> VisitResult {
        if self.ended {
            Ok(())
        } else {
            Err(ValidationError::new(
                ErrorKind::UnclosedBlock,
                format!("not all blocks have been ended ({} open)", self.ctrls.len()),
            ))
        }
    }
}

fn no_frame() -> ValidationError {
    ValidationError::new(
        ErrorKind::InstructionAfterEnd,
        "no open block, the expression has already ended",
    )
}

fn illegal_simd(subopcode: u32) -> ValidationError {
    ValidationError::new(
        ErrorKind::IllegalOpcode,
        format!("illegal vector opcode 0xfd 0x{subopcode:x} for its immediates"),
    )
}

fn check_lane(lane: u8, lanes: u8) -> VisitResult {
    if lane >= lanes {
        return Err(ValidationError::new(
            ErrorKind::InvalidLaneIndex,
            format!("lane index {lane} must be smaller than vector dimension {lanes}"),
        ));
    }
    Ok(())
}

/// `natural` is the log2 of the access width in bytes.
pub fn check_alignment(memarg: &MemArg, natural: u32) -> VisitResult {
    if memarg.align > natural {
        return Err(ValidationError::new(
            ErrorKind::AlignmentTooLarge,
            format!(
                "alignment (2^{}) exceeds natural alignment ({})",
                memarg.align,
                1u32 << natural
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FunctionType, GlobalType, Limits, TableType};
    use crate::validate::context::Locals;
    use std::collections::HashSet;
    use Instruction::*;

    fn signature(params: &[ValueType], results: &[ValueType]) -> FunctionType {
        FunctionType {
            parameters: params.to_vec(),
            return_types: results.to_vec(),
        }
    }

    fn space_with_memory() -> IndexSpace {
        let mut space = IndexSpace::new();
        space.add_memory(Limits::new(1, Some(2)));
        space
    }

    fn run(
        space: &IndexSpace,
        ftype: &FunctionType,
        body: &[Instruction],
    ) -> Result<Vec<MaybeValue>, ValidationError> {
        let refs = HashSet::new();
        let locals = ftype.parameters.iter().copied().collect();
        let scope = LocalScope::function(space, ftype, locals, &refs);
        let mut v = CodeValidator::new(scope, ftype.return_types.clone());
        for inst in body {
            v.visit_instruction(inst)?;
        }
        ExprVisitor::visit_end(&mut v)?;
        Ok(v.stack().to_vec())
    }

    fn check(results: &[ValueType], body: &[Instruction]) -> Result<Vec<MaybeValue>, ValidationError> {
        run(&space_with_memory(), &signature(&[], results), body)
    }

    #[test]
    fn add_leaves_one_result() {
        let stack = run(
            &IndexSpace::new(),
            &signature(&[I32], &[I32]),
            &[LocalGet { local_idx: 0 }, I32Const { value: 1 }, I32Add, End],
        )
        .unwrap();
        assert_eq!(stack, vec![Known(I32)]);
    }

    #[test]
    fn leftover_operand() {
        let err = check(&[I32], &[I32Const { value: 1 }, I32Const { value: 2 }, End]).unwrap_err();
        assert_eq!(err.message(), "stack height does not match frame height");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn underflow() {
        let err = check(&[], &[I32Add, End]).unwrap_err();
        assert_eq!(err.message(), "stack underflow");
    }

    #[test]
    fn mismatch_names_both_types() {
        let err = check(&[I32], &[F32Const { value: 1.0 }, I32Eqz, End]).unwrap_err();
        assert_eq!(err.message(), "type mismatch, expected i32 got f32");
    }

    #[test]
    fn unreachable_code_is_polymorphic() {
        assert!(check(&[I32], &[Unreachable, I64Const { value: 5 }, I32Add, End]).is_ok());
        assert!(check(&[I32], &[Unreachable, I32Add, End]).is_ok());
        assert!(check(&[I64, F32], &[Unreachable, End]).is_ok());
        // the frame still restores its declared results
        let err = check(
            &[],
            &[
                Block { block_type: BlockType::value(I32) },
                Unreachable,
                End,
                End,
            ],
        )
        .unwrap_err();
        assert_eq!(err.message(), "stack height does not match frame height");
    }

    #[test]
    fn code_after_a_dead_block_is_live() {
        let err = check(
            &[I64],
            &[
                Block { block_type: BlockType::value(I32) },
                Unreachable,
                End,
                End,
            ],
        )
        .unwrap_err();
        assert_eq!(err.message(), "type mismatch, expected i64 got i32");
        // blocks opened in dead code are checked normally
        let err = check(
            &[],
            &[
                Unreachable,
                Block { block_type: BlockType::Empty },
                F32Const { value: 1.0 },
                I32Eqz,
                End,
                End,
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn select_operands() {
        assert!(check(
            &[I32],
            &[I32Const { value: 1 }, I32Const { value: 2 }, I32Const { value: 0 }, Select, End]
        )
        .is_ok());
        let err = check(
            &[I32],
            &[I32Const { value: 1 }, F32Const { value: 2.0 }, I32Const { value: 0 }, Select, End],
        )
        .unwrap_err();
        assert_eq!(err.message(), "select argument types do not match");
        let err = check(
            &[FuncRef],
            &[
                RefNull { ref_type: 0x70 },
                RefNull { ref_type: 0x70 },
                I32Const { value: 0 },
                Select,
                End,
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(check(
            &[FuncRef],
            &[
                RefNull { ref_type: 0x70 },
                RefNull { ref_type: 0x70 },
                I32Const { value: 0 },
                SelectTyped { val_types: vec![0x70] },
                End,
            ],
        )
        .is_ok());
        let err = check(&[], &[SelectTyped { val_types: vec![] }, End]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidResultArity);
    }

    #[test]
    fn select_after_unreachable_takes_known_operand() {
        let stack = check(
            &[F64],
            &[Unreachable, F64Const { value: 1.0 }, I32Const { value: 0 }, Select, End],
        )
        .unwrap();
        assert_eq!(stack, vec![Known(F64)]);
    }

    #[test]
    fn if_without_else_must_preserve_types() {
        let err = check(
            &[I32],
            &[
                I32Const { value: 1 },
                If { block_type: BlockType::value(I32) },
                I32Const { value: 2 },
                End,
                End,
            ],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(check(
            &[I32],
            &[
                I32Const { value: 1 },
                If { block_type: BlockType::value(I32) },
                I32Const { value: 2 },
                Else,
                I32Const { value: 3 },
                End,
                End,
            ],
        )
        .is_ok());
    }

    #[test]
    fn else_after_unreachable_branch() {
        let stack = check(
            &[I32],
            &[
                I32Const { value: 1 },
                If { block_type: BlockType::value(I32) },
                Unreachable,
                Else,
                I32Const { value: 2 },
                End,
                End,
            ],
        )
        .unwrap();
        assert_eq!(stack, vec![Known(I32)]);
        // the else branch is live again and must produce the declared result
        let err = check(
            &[I32],
            &[
                I32Const { value: 1 },
                If { block_type: BlockType::value(I32) },
                Unreachable,
                Else,
                F32Const { value: 2.0 },
                End,
                End,
            ],
        )
        .unwrap_err();
        assert_eq!(err.message(), "type mismatch, expected i32 got f32");
    }

    #[test]
    fn br_if_keeps_label_values() {
        let stack = check(
            &[I32],
            &[
                Block { block_type: BlockType::value(I32) },
                I32Const { value: 1 },
                I32Const { value: 0 },
                BrIf { label_idx: 0 },
                End,
                End,
            ],
        )
        .unwrap();
        assert_eq!(stack, vec![Known(I32)]);

        let err = check(
            &[I32],
            &[
                Block { block_type: BlockType::value(I32) },
                I32Const { value: 0 },
                BrIf { label_idx: 0 },
                End,
                End,
            ],
        )
        .unwrap_err();
        assert_eq!(err.message(), "stack underflow");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn br_if_to_loop_uses_start_types() {
        // a loop producing i32 takes nothing when branched to
        assert!(check(
            &[I32],
            &[
                Loop { block_type: BlockType::value(I32) },
                I32Const { value: 0 },
                BrIf { label_idx: 0 },
                I32Const { value: 1 },
                End,
                End,
            ],
        )
        .is_ok());

        let mut space = IndexSpace::new();
        space.add_type(signature(&[I32], &[]));
        let body = |branch_value: Instruction| {
            vec![
                I32Const { value: 5 },
                Loop { block_type: BlockType::FuncType(0) },
                Drop,
                branch_value,
                I32Const { value: 1 },
                BrIf { label_idx: 0 },
                Drop,
                End,
                End,
            ]
        };
        assert!(run(&space, &signature(&[], &[]), &body(I32Const { value: 3 })).is_ok());
        let err = run(&space, &signature(&[], &[]), &body(I64Const { value: 3 })).unwrap_err();
        assert_eq!(err.message(), "type mismatch, expected i32 got i64");
    }

    #[test]
    fn dead_code_tolerates_wrong_result_type() {
        // operands left by dead code unify with the frame's results even when
        // their type is known and different
        let stack = check(&[I32], &[Unreachable, I64Const { value: 0 }, End]).unwrap();
        assert_eq!(stack, vec![Known(I32)]);
        let stack = check(
            &[F32],
            &[Unreachable, I32Const { value: 0 }, I64Const { value: 0 }, Drop, End],
        )
        .unwrap();
        assert_eq!(stack, vec![Known(F32)]);
    }

    #[test]
    fn else_outside_if() {
        let err = check(&[], &[Block { block_type: BlockType::Empty }, Else, End, End]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ElseWithoutIf);
        assert_eq!(err.message(), "else instruction not in if block");
    }

    #[test]
    fn loop_label_takes_parameters() {
        let mut space = space_with_memory();
        space.add_type(signature(&[I32], &[]));
        // br 0 inside a [i32] -> [] loop branches back with an i32
        let body = [
            I32Const { value: 1 },
            Loop { block_type: BlockType::FuncType(0) },
            Br { label_idx: 0 },
            End,
            End,
        ];
        assert!(run(&space, &signature(&[], &[]), &body).is_ok());
        // the same branch with nothing on the stack underflows
        let body = [
            I32Const { value: 1 },
            Loop { block_type: BlockType::FuncType(0) },
            Drop,
            Br { label_idx: 0 },
            End,
            End,
        ];
        assert!(run(&space, &signature(&[], &[]), &body).is_err());
    }

    #[test]
    fn br_table_arity() {
        let body = |inner: BlockType| {
            vec![
                Block { block_type: BlockType::value(I32) },
                Block { block_type: inner },
                I32Const { value: 7 },
                I32Const { value: 0 },
                BrTable { labels: vec![0], default: 1 },
                End,
                End,
                End,
            ]
        };
        let err = check(&[I32], &body(BlockType::Empty)).unwrap_err();
        assert!(err.message().starts_with("block type mismatch"));
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);

        // both labels expect one i32
        assert!(check(&[I32], &body(BlockType::value(I32))).is_ok());
        let zero = [
            Block { block_type: BlockType::Empty },
            I32Const { value: 0 },
            BrTable { labels: vec![0, 0], default: 1 },
            End,
            End,
        ];
        assert!(check(&[], &zero).is_ok());
    }

    #[test]
    fn unknown_label() {
        let err = check(&[], &[Br { label_idx: 1 }, End]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownLabel);
    }

    #[test]
    fn return_needs_function() {
        let space = IndexSpace::new();
        let mut v = CodeValidator::new(LocalScope::constant(&space), vec![I32]);
        let err = v.visit_instruction(&Return).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReturnOutsideFunction);
        assert!(check(&[I32], &[I32Const { value: 1 }, Return, End]).is_ok());
    }

    #[test]
    fn memory_must_exist() {
        let body = [I32Const { value: 1 }, MemoryGrow, End];
        let err = run(&IndexSpace::new(), &signature(&[], &[I32]), &body).unwrap_err();
        assert!(err.message().contains("memory 0 does not exist"));
        assert_eq!(err.kind(), ErrorKind::UnknownMemory);
        assert!(run(&space_with_memory(), &signature(&[], &[I32]), &body).is_ok());
    }

    #[test]
    fn alignment() {
        let load = |align| {
            check(
                &[I32],
                &[I32Const { value: 0 }, I32Load { memarg: MemArg::new(align, 0) }, End],
            )
        };
        assert!(load(2).is_ok());
        let err = load(3).unwrap_err();
        assert_eq!(err.cause(), "alignment must not be larger than natural");
    }

    #[test]
    fn data_count_required() {
        let err = check(&[], &[DataDrop { data_idx: 0 }, End]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataCountRequired);
    }

    #[test]
    fn tables() {
        let mut space = IndexSpace::new();
        space.add_table(TableType {
            ref_type: FuncRef,
            limits: Limits::new(0, None),
        });
        space.add_table(TableType {
            ref_type: ExternRef,
            limits: Limits::new(0, None),
        });
        space.add_element(FuncRef);
        let ft = signature(&[], &[]);

        let fill = [
            I32Const { value: 0 },
            RefNull { ref_type: 0x70 },
            I32Const { value: 1 },
            TableFill { table_idx: 0 },
            End,
        ];
        assert!(run(&space, &ft, &fill).unwrap().is_empty());

        let copy = [
            I32Const { value: 0 },
            I32Const { value: 0 },
            I32Const { value: 0 },
            TableCopy { dst_table: 0, src_table: 1 },
            End,
        ];
        assert_eq!(run(&space, &ft, &copy).unwrap_err().kind(), ErrorKind::TypeMismatch);

        let init = |table_idx| {
            [
                I32Const { value: 0 },
                I32Const { value: 0 },
                I32Const { value: 0 },
                TableInit { elem_idx: 0, table_idx },
                End,
            ]
        };
        assert!(run(&space, &ft, &init(0)).is_ok());
        assert!(run(&space, &ft, &init(1)).is_err());
        assert_eq!(
            run(&space, &ft, &[ElemDrop { elem_idx: 1 }, End]).unwrap_err().kind(),
            ErrorKind::UnknownElemSegment
        );

        let indirect = |table_idx| [I32Const { value: 0 }, CallIndirect { type_idx: 0, table_idx }, End];
        space.add_type(signature(&[], &[]));
        assert!(run(&space, &ft, &indirect(0)).is_ok());
        assert_eq!(run(&space, &ft, &indirect(1)).unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn immutable_global() {
        let mut space = IndexSpace::new();
        space.add_global(GlobalType {
            value_type: I32,
            mutable: false,
        });
        let err = run(
            &space,
            &signature(&[], &[]),
            &[I32Const { value: 0 }, GlobalSet { global_idx: 0 }, End],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImmutableGlobal);
    }

    #[test]
    fn simd_lanes() {
        let extract = |lane| {
            check(
                &[I32],
                &[
                    V128Const { value: [0; 16] },
                    SimdLane { subopcode: 0x1b, lane }, // i32x4.extract_lane
                    End,
                ],
            )
        };
        assert!(extract(3).is_ok());
        assert_eq!(extract(4).unwrap_err().kind(), ErrorKind::InvalidLaneIndex);

        let mut lanes = [0u8; 16];
        lanes[15] = 31;
        let shuffle = |lanes| {
            check(
                &[V128],
                &[
                    V128Const { value: [0; 16] },
                    V128Const { value: [0; 16] },
                    I8x16Shuffle { lanes },
                    End,
                ],
            )
        };
        assert!(shuffle(lanes).is_ok());
        lanes[0] = 32;
        assert_eq!(shuffle(lanes).unwrap_err().kind(), ErrorKind::InvalidLaneIndex);
    }

    #[test]
    fn simd_arithmetic_and_memory() {
        let add = Instruction::simd("i32x4.add").unwrap();
        assert!(check(
            &[V128],
            &[V128Const { value: [0; 16] }, V128Const { value: [0; 16] }, add, End]
        )
        .is_ok());
        let load = |align| {
            check(
                &[V128],
                &[
                    I32Const { value: 0 },
                    SimdMemory { subopcode: simd::V128_LOAD, memarg: MemArg::new(align, 0) },
                    End,
                ],
            )
        };
        assert!(load(4).is_ok());
        assert_eq!(load(5).unwrap_err().kind(), ErrorKind::AlignmentTooLarge);
        let err = check(&[], &[Simd { subopcode: simd::V128_LOAD }, End]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalOpcode);
    }

    #[test]
    fn end_of_expression() {
        let space = space_with_memory();
        let ft = signature(&[], &[]);
        let refs = HashSet::new();
        let mut v = CodeValidator::new(LocalScope::function(&space, &ft, Locals::new(), &refs), vec![]);
        v.visit_instruction(&Block { block_type: BlockType::Empty }).unwrap();
        v.visit_instruction(&End).unwrap();
        assert!(!v.is_ended());
        let err = ExprVisitor::visit_end(&mut v).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnclosedBlock);
        v.visit_instruction(&End).unwrap();
        assert!(v.is_ended());
        let err = v.visit_instruction(&Nop).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InstructionAfterEnd);
    }

    #[test]
    fn ref_func_must_be_declared_in_bodies() {
        let mut space = IndexSpace::new();
        space.add_type(signature(&[], &[]));
        space.add_function(0);
        let ft = signature(&[], &[FuncRef]);
        let err = run(&space, &ft, &[RefFunc { func_idx: 0 }, End]).unwrap_err();
        assert_eq!(err.cause(), "undeclared function reference");
    }
}
