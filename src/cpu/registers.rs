//! LS-8 CPU registers.
//!
//! The LS-8 has:
//! - R0-R7: eight 8-bit general purpose registers (R7 doubles as the stack pointer)
//! - PC: program counter
//! - FL: flag register holding the outcome of the last CMP

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Number of general purpose registers.
pub const REGISTER_COUNT: usize = 8;

/// Index of the register used as the stack pointer.
pub const SP: u8 = 7;

/// Initial stack pointer: the stack starts just below the top of memory.
pub const STACK_START: u8 = 0xF4;

/// Outcome of a compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    /// A == B
    Equal,
    /// A < B
    Less,
    /// A > B
    Greater,
}

impl Flag {
    /// The `00000LGE` bit pattern the FL register holds on hardware.
    pub const fn bits(self) -> u8 {
        match self {
            Flag::Equal => 0b0000_0010,
            Flag::Less => 0b0000_0100,
            Flag::Greater => 0b0000_0001,
        }
    }

    /// Compare two register values.
    pub fn compare(a: u8, b: u8) -> Self {
        match a.cmp(&b) {
            std::cmp::Ordering::Equal => Flag::Equal,
            std::cmp::Ordering::Less => Flag::Less,
            std::cmp::Ordering::Greater => Flag::Greater,
        }
    }
}

/// The LS-8 register file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// R0-R7
    r: [u8; REGISTER_COUNT],

    /// Program counter. Wider than a byte so running off the end of
    /// memory is caught on the next fetch rather than wrapping.
    pub pc: usize,

    /// Result of the last CMP, `None` until one executes.
    pub fl: Option<Flag>,
}

impl Registers {
    /// Create a new register file: all zero except SP.
    pub fn new() -> Self {
        let mut r = [0; REGISTER_COUNT];
        r[SP as usize] = STACK_START;
        Self { r, pc: 0, fl: None }
    }

    /// Reset to the power-on state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Read a general purpose register.
    #[inline]
    pub fn get(&self, index: u8) -> Result<u8, RegisterError> {
        self.r
            .get(index as usize)
            .copied()
            .ok_or(RegisterError::InvalidRegister(index))
    }

    /// Write a general purpose register.
    #[inline]
    pub fn set(&mut self, index: u8, value: u8) -> Result<(), RegisterError> {
        let reg = self.r
            .get_mut(index as usize)
            .ok_or(RegisterError::InvalidRegister(index))?;
        *reg = value;
        Ok(())
    }

    /// Stack pointer (R7).
    #[inline]
    pub fn sp(&self) -> u8 {
        self.r[SP as usize]
    }

    #[inline]
    pub fn set_sp(&mut self, value: u8) {
        self.r[SP as usize] = value;
    }

    /// All general purpose registers, R0 first.
    pub fn all(&self) -> &[u8; REGISTER_COUNT] {
        &self.r
    }

    /// Advance the program counter by `n` bytes.
    pub fn advance_pc(&mut self, n: usize) {
        self.pc += n;
    }

    /// Set the program counter to an absolute address.
    pub fn jump(&mut self, addr: u8) {
        self.pc = addr as usize;
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors from register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("invalid register R{0} (valid: R0-R7)")]
    InvalidRegister(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_on_state() {
        let regs = Registers::new();

        assert_eq!(regs.all(), &[0, 0, 0, 0, 0, 0, 0, 0xF4]);
        assert_eq!(regs.sp(), 0xF4);
        assert_eq!(regs.pc, 0);
        assert_eq!(regs.fl, None);
    }

    #[test]
    fn test_get_set() {
        let mut regs = Registers::new();
        regs.set(3, 99).unwrap();

        assert_eq!(regs.get(3).unwrap(), 99);
        assert_eq!(regs.get(8), Err(RegisterError::InvalidRegister(8)));
        assert_eq!(regs.set(255, 1), Err(RegisterError::InvalidRegister(255)));
    }

    #[test]
    fn test_flag_compare() {
        assert_eq!(Flag::compare(1, 2), Flag::Less);
        assert_eq!(Flag::compare(2, 2), Flag::Equal);
        assert_eq!(Flag::compare(3, 2), Flag::Greater);
        assert_eq!(Flag::Equal.bits(), 0b010);
    }

    #[test]
    fn test_advance_and_jump() {
        let mut regs = Registers::new();
        regs.advance_pc(3);
        assert_eq!(regs.pc, 3);

        regs.jump(0x40);
        assert_eq!(regs.pc, 0x40);

        regs.fl = Some(Flag::Less);
        regs.set(0, 5).unwrap();
        regs.reset();
        assert_eq!(regs, Registers::new());
    }
}
