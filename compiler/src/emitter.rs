//! Thin helpers over [`atomc_runtime::Chunk`] (C6): the conversion and
//! comparison-derivation helpers the parser's semantic actions lean on.
//! Nothing here touches the symbol table or token stream — it only knows
//! about [`Type`] and the instruction list it is appending to.

use atomc_runtime::{Chunk, Opcode};

use crate::types::{Type, TypeBase};

/// Append `CONV_I_F` right now if `src` is an int-family scalar and `dst` is
/// `double` (`src != dst`). Used for the common case where the value being
/// converted was the most recently emitted code (call arguments, assignment
/// right-hand sides): no retroactive insertion needed since nothing else has
/// been emitted since.
pub fn convert_if_needed(chunk: &mut Chunk, src: Type, dst: Type) {
    if matches!(src.base, TypeBase::Int | TypeBase::Char) && matches!(dst.base, TypeBase::Double) {
        chunk.emit(Opcode::ConvIF);
    }
}

/// `insertConvIfNeeded`: splice `CONV_I_F` right after `before` when `src` is
/// int-family and `dst` is `double`. Returns whether an instruction was
/// actually spliced in, so a caller tracking other addresses into the same
/// chunk (e.g. `Parser::pending_calls`) knows it must shift them past
/// `before` too.
///
/// Needed specifically for binary arithmetic/comparison: `a + b`'s left
/// operand `a` is fully compiled (ending at `before`) before `b`'s type is
/// even known, so if the *left* operand turns out to need widening once
/// `arith_type_to(a, b)` picks `double`, that conversion has to be spliced
/// into the middle of the already-emitted stream, before `b`'s own code —
/// appending at the tail would run it after `b` instead of after `a`.
#[must_use]
pub fn insert_conv_if_needed(chunk: &mut Chunk, before: usize, src: Type, dst: Type) -> bool {
    if matches!(src.base, TypeBase::Int | TypeBase::Char) && matches!(dst.base, TypeBase::Double) {
        chunk.insert_after(before, Opcode::ConvIF, atomc_runtime::Operand::None);
        true
    } else {
        false
    }
}

/// Truncate a double on top of the stack to int. Used where the language
/// requires an int value (array index, `&&`/`||`/`!` operands) but the
/// source expression's unified type was `double`.
pub fn truncate_if_double(chunk: &mut Chunk, src: Type) {
    if matches!(src.base, TypeBase::Double) {
        chunk.emit(Opcode::ConvFI);
    }
}

/// Negate the top-of-stack scalar, picking the int/double variant by `ty`.
pub fn emit_neg(chunk: &mut Chunk, ty: Type) {
    match ty.base {
        TypeBase::Double => chunk.emit(Opcode::NegF),
        _ => chunk.emit(Opcode::NegI),
    };
}

/// Logical-not the top-of-stack scalar: for `double`, compares against
/// `0.0` (there is no dedicated `NOT.f`); for int/char, `NOT.i` already does
/// the right thing directly.
pub fn emit_not(chunk: &mut Chunk, ty: Type) {
    match ty.base {
        TypeBase::Double => {
            chunk.emit_float(Opcode::PushF, 0.0);
            chunk.emit(Opcode::EqF);
        }
        _ => {
            chunk.emit(Opcode::NotI);
        }
    }
}

/// One of `+`, `-`, `*`, `/`, after both operands (of the same unified type)
/// are on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Emit one arithmetic instruction, picking the int/double variant by `unified`.
pub fn emit_arith(chunk: &mut Chunk, op: ArithOp, unified: Type) {
    let is_f = matches!(unified.base, TypeBase::Double);
    let opcode = match (op, is_f) {
        (ArithOp::Add, false) => Opcode::AddI,
        (ArithOp::Add, true) => Opcode::AddF,
        (ArithOp::Sub, false) => Opcode::SubI,
        (ArithOp::Sub, true) => Opcode::SubF,
        (ArithOp::Mul, false) => Opcode::MulI,
        (ArithOp::Mul, true) => Opcode::MulF,
        (ArithOp::Div, false) => Opcode::DivI,
        (ArithOp::Div, true) => Opcode::DivF,
    };
    chunk.emit(opcode);
}

/// One of `<`, `<=`, `>`, `>=`, `==`, `!=`, after both operands (of the same
/// unified type) are on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Emit one comparison. The instruction set only has `LESS`/`EQ` (per
/// direction of type); `>`, `>=`, `<=` and `!=` are derived from those with
/// `SWAP`/`NOT`, rather than doubling the opcode set with a mirrored
/// `GREATER`/`GREATEREQ`/`LESSEQ`/`NOTEQ` family.
pub fn emit_cmp(chunk: &mut Chunk, op: CmpOp, unified: Type) {
    let (less, eq) = if matches!(unified.base, TypeBase::Double) {
        (Opcode::LessF, Opcode::EqF)
    } else {
        (Opcode::LessI, Opcode::EqI)
    };
    match op {
        CmpOp::Lt => {
            chunk.emit(less);
        }
        CmpOp::Gt => {
            chunk.emit(Opcode::Swap);
            chunk.emit(less);
        }
        CmpOp::Le => {
            chunk.emit(Opcode::Swap);
            chunk.emit(less);
            chunk.emit(Opcode::NotI);
        }
        CmpOp::Ge => {
            chunk.emit(less);
            chunk.emit(Opcode::NotI);
        }
        CmpOp::Eq => {
            chunk.emit(eq);
        }
        CmpOp::Ne => {
            chunk.emit(eq);
            chunk.emit(Opcode::NotI);
        }
    }
}
