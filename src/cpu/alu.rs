//! Arithmetic/logic unit.
//!
//! Pure functions over two register values. Results wrap to 8 bits, the
//! way the hardware truncates them.

use crate::cpu::decode::AluOp;
use crate::cpu::registers::Flag;
use thiserror::Error;

/// What an ALU operation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOutput {
    /// New value for register A.
    Value(u8),
    /// New flag register contents (CMP).
    Flag(Flag),
}

/// Apply `op` to `a` and `b`.
pub fn alu(op: AluOp, a: u8, b: u8) -> Result<AluOutput, AluError> {
    let value = match op {
        AluOp::Add => a.wrapping_add(b),
        AluOp::Sub => a.wrapping_sub(b),
        AluOp::Mul => a.wrapping_mul(b),
        AluOp::Div => a.checked_div(b).ok_or(AluError::DivisionByZero)?,
        AluOp::Or => a | b,
        AluOp::Xor => a ^ b,
        AluOp::Shl => a << (b % 8),
        AluOp::Shr => a >> (b % 8),
        AluOp::Cmp => return Ok(AluOutput::Flag(Flag::compare(a, b))),
    };
    Ok(AluOutput::Value(value))
}

/// Errors raised by the ALU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AluError {
    #[error("division by zero")]
    DivisionByZero,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(op: AluOp, a: u8, b: u8) -> u8 {
        match alu(op, a, b).unwrap() {
            AluOutput::Value(v) => v,
            other => panic!("expected a value, got {:?}", other),
        }
    }

    #[test]
    fn test_add_wraps() {
        assert_eq!(value(AluOp::Add, 8, 9), 17);
        assert_eq!(value(AluOp::Add, 200, 100), 44);
    }

    #[test]
    fn test_sub_wraps() {
        assert_eq!(value(AluOp::Sub, 10, 3), 7);
        assert_eq!(value(AluOp::Sub, 3, 10), 249);
    }

    #[test]
    fn test_mul_truncates() {
        assert_eq!(value(AluOp::Mul, 12, 10), 120);
        assert_eq!(value(AluOp::Mul, 16, 16), 0);
    }

    #[test]
    fn test_div() {
        assert_eq!(value(AluOp::Div, 17, 5), 3);
        assert_eq!(alu(AluOp::Div, 17, 0), Err(AluError::DivisionByZero));
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(value(AluOp::Or, 0b1100, 0b1010), 0b1110);
        assert_eq!(value(AluOp::Xor, 0b1100, 0b1010), 0b0110);
    }

    #[test]
    fn test_shift_amount_mod_8() {
        assert_eq!(value(AluOp::Shl, 0b0000_0011, 2), 0b0000_1100);
        assert_eq!(value(AluOp::Shl, 1, 9), 2);
        assert_eq!(value(AluOp::Shr, 0b1000_0000, 7), 1);
        assert_eq!(value(AluOp::Shr, 0b1000_0000, 8), 0b1000_0000);
    }

    #[test]
    fn test_cmp_sets_flag() {
        assert_eq!(alu(AluOp::Cmp, 1, 2), Ok(AluOutput::Flag(Flag::Less)));
        assert_eq!(alu(AluOp::Cmp, 2, 2), Ok(AluOutput::Flag(Flag::Equal)));
        assert_eq!(alu(AluOp::Cmp, 3, 2), Ok(AluOutput::Flag(Flag::Greater)));
    }
}
