//! Constant folding over literal values.
//!
//! Non-wrapping integer kinds signal a [`FoldError`] on overflow, division
//! by zero and shift overflow; the world catches the error and interns the
//! primop unfolded. Wrapping kinds are defined modulo 2^N. Floats fold with
//! IEEE semantics and never signal.

use thiserror::Error;

use super::ops::{ArithOp, BitOp, CmpOp, LitValue};
use super::types::PrimTypeKind;

/// Signalled by the folder; never escapes the constructing world call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FoldError {
    #[error("integer overflow")]
    Overflow,
    #[error("division by zero")]
    DivByZero,
    #[error("shift overflow")]
    ShiftOverflow,
}

// =============================================================================
// Width Helpers
// =============================================================================

fn signed_bounds(bits: u32) -> (i128, i128) {
    let max = (1i128 << (bits - 1)) - 1;
    (-max - 1, max)
}

fn unsigned_max(bits: u32) -> i128 {
    (1i128 << bits) - 1
}

/// Truncate `v` to `bits` and reinterpret under `kind`'s signedness.
fn truncate(kind: PrimTypeKind, v: i128) -> i128 {
    let bits = kind.bit_width();
    let masked = (v as u128) & (u128::MAX >> (128 - bits));
    if kind.is_signed_int() {
        // Sign-extend from `bits`.
        let shift = 128 - bits;
        (((masked << shift) as i128) >> shift) as i128
    } else {
        masked as i128
    }
}

fn make_lit(kind: PrimTypeKind, v: i128) -> LitValue {
    match kind {
        PrimTypeKind::Bool => LitValue::Bool(v != 0),
        PrimTypeKind::Ps8 | PrimTypeKind::Qs8 => LitValue::I8(v as i8),
        PrimTypeKind::Ps16 | PrimTypeKind::Qs16 => LitValue::I16(v as i16),
        PrimTypeKind::Ps32 | PrimTypeKind::Qs32 => LitValue::I32(v as i32),
        PrimTypeKind::Ps64 | PrimTypeKind::Qs64 => LitValue::I64(v as i64),
        PrimTypeKind::Pu8 | PrimTypeKind::Qu8 => LitValue::U8(v as u8),
        PrimTypeKind::Pu16 | PrimTypeKind::Qu16 => LitValue::U16(v as u16),
        PrimTypeKind::Pu32 | PrimTypeKind::Qu32 => LitValue::U32(v as u32),
        PrimTypeKind::Pu64 | PrimTypeKind::Qu64 => LitValue::U64(v as u64),
        PrimTypeKind::Pf32 | PrimTypeKind::Qf32 => LitValue::from_f32(v as f32),
        PrimTypeKind::Pf64 | PrimTypeKind::Qf64 => LitValue::from_f64(v as f64),
    }
}

fn make_float(kind: PrimTypeKind, v: f64) -> LitValue {
    match kind {
        PrimTypeKind::Pf32 | PrimTypeKind::Qf32 => LitValue::from_f32(v as f32),
        _ => LitValue::from_f64(v),
    }
}

/// Range-check `v` against `kind`; non-wrapping kinds signal, wrapping kinds
/// truncate.
fn fit(kind: PrimTypeKind, v: i128) -> Result<LitValue, FoldError> {
    let bits = kind.bit_width();
    let in_range = if kind == PrimTypeKind::Bool {
        v == 0 || v == 1
    } else if kind.is_signed_int() {
        let (min, max) = signed_bounds(bits);
        v >= min && v <= max
    } else {
        v >= 0 && v <= unsigned_max(bits)
    };

    if in_range {
        Ok(make_lit(kind, v))
    } else if kind.is_wrapping() {
        Ok(make_lit(kind, truncate(kind, v)))
    } else {
        Err(FoldError::Overflow)
    }
}

// =============================================================================
// Folders
// =============================================================================

/// Fold an arithmetic operation over two literals of primitive kind `kind`.
pub fn fold_arith(
    op: ArithOp,
    kind: PrimTypeKind,
    a: LitValue,
    b: LitValue,
) -> Result<LitValue, FoldError> {
    if kind.is_float() {
        let (x, y) = (a.as_f64().unwrap(), b.as_f64().unwrap());
        let r = match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
            ArithOp::Rem => x % y,
        };
        return Ok(make_float(kind, r));
    }

    let (x, y) = (a.as_i128().unwrap(), b.as_i128().unwrap());
    match op {
        ArithOp::Add => fit(kind, x + y),
        ArithOp::Sub => fit(kind, x - y),
        ArithOp::Mul => fit(kind, x * y),
        ArithOp::Div => {
            if y == 0 {
                Err(FoldError::DivByZero)
            } else {
                fit(kind, x / y)
            }
        }
        ArithOp::Rem => {
            if y == 0 {
                Err(FoldError::DivByZero)
            } else {
                fit(kind, x % y)
            }
        }
    }
}

/// Fold a bitwise/shift operation. Shifts by at least the bit width signal;
/// a non-wrapping left shift that loses bits signals as well.
pub fn fold_bit(
    op: BitOp,
    kind: PrimTypeKind,
    a: LitValue,
    b: LitValue,
) -> Result<LitValue, FoldError> {
    debug_assert!(kind.is_int() || kind == PrimTypeKind::Bool);
    let bits = kind.bit_width();
    let (x, y) = (a.as_i128().unwrap(), b.as_i128().unwrap());

    match op {
        BitOp::And => Ok(make_lit(kind, truncate(kind, x & y))),
        BitOp::Or => Ok(make_lit(kind, truncate(kind, x | y))),
        BitOp::Xor => Ok(make_lit(kind, truncate(kind, x ^ y))),
        BitOp::Shl => {
            if y < 0 || y >= bits as i128 {
                return Err(FoldError::ShiftOverflow);
            }
            fit(kind, x << y).map_err(|_| FoldError::ShiftOverflow)
        }
        BitOp::Shr => {
            if y < 0 || y >= bits as i128 {
                return Err(FoldError::ShiftOverflow);
            }
            // Arithmetic shift for signed kinds, logical for unsigned; the
            // widened representation already encodes the distinction.
            let ux = if kind.is_signed_int() {
                x >> y
            } else {
                ((x as u128) >> y) as i128
            };
            Ok(make_lit(kind, truncate(kind, ux)))
        }
    }
}

/// Fold a comparison. Never signals.
pub fn fold_cmp(op: CmpOp, kind: PrimTypeKind, a: LitValue, b: LitValue) -> bool {
    if kind.is_float() {
        let (x, y) = (a.as_f64().unwrap(), b.as_f64().unwrap());
        return match op {
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
        };
    }

    let (x, y) = (a.as_i128().unwrap(), b.as_i128().unwrap());
    match op {
        CmpOp::Eq => x == y,
        CmpOp::Ne => x != y,
        CmpOp::Lt => x < y,
        CmpOp::Le => x <= y,
        CmpOp::Gt => x > y,
        CmpOp::Ge => x >= y,
    }
}

// =============================================================================
// Tests
// =============================================================================
