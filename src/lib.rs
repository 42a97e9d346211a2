//! # LS-8 Emulator
//!
//! An emulator of the LS-8, a small 8-bit teaching computer.
//!
//! The machine has 256 bytes of RAM, eight 8-bit registers (R7 is the
//! stack pointer), a program counter and a compare flag register. The
//! [`Cpu`] runs a fetch-decode-execute loop over a compact instruction set
//! with an ALU, a downward-growing stack, subroutine calls and
//! conditional jumps.

pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use cpu::{Cpu, CpuState, CpuError, Flag, Memory, Registers, Instruction};
pub use asm::{assemble, disassemble, AssemblerError, ProgramFile, ProgramError, load_program, save_program};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
