//! CPU emulation for the LS-8.
//!
//! This module implements the complete LS-8 architecture:
//! - 256 bytes of RAM
//! - 8 general purpose registers, R7 doubling as the stack pointer
//! - PC and a compare flag register (FL)
//! - Variable-length (1-3 byte) instructions with the operand count in the opcode

pub mod memory;
pub mod registers;
pub mod decode;
pub mod alu;
pub mod execute;

pub use memory::{Memory, MemoryError};
pub use registers::{Flag, Registers, RegisterError};
pub use decode::{AluOp, Instruction, Operation, DecodeError};
pub use alu::{AluError, AluOutput};
pub use execute::{Cpu, CpuError, CpuState};
