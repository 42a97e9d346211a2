//! Program loading, assembly and disassembly for the LS-8.
//!
//! This module provides:
//! - The `.ls8` program file format (one binary byte per line)
//! - A simple two-pass assembler (mnemonics → machine code)
//! - A disassembler (machine code → readable text)

pub mod assembler;
pub mod disasm;
pub mod program;

pub use assembler::{assemble, AssemblerError};
pub use disasm::disassemble;
pub use program::{ProgramFile, ProgramError, load_program, parse_program, save_program};
