//! LS-8 program file format.
//!
//! A simple text format:
//! - One byte per line, written as eight binary digits
//! - Anything after `#` is a comment
//! - Blank and comment-only lines are ignored

use crate::asm::disasm::disassemble_at;
use crate::cpu::memory::MEMORY_SIZE;
use std::path::Path;
use std::io::Write;
use thiserror::Error;

/// A loaded program file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramFile {
    /// The program bytes, to be placed at address 0.
    pub bytes: Vec<u8>,
    /// Original source lines (for debugging).
    pub source_lines: Vec<String>,
}

impl ProgramFile {
    /// Create a new empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a byte.
    pub fn push(&mut self, byte: u8, source: &str) {
        self.bytes.push(byte);
        self.source_lines.push(source.to_string());
    }

    /// Get the number of bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Parse program text.
pub fn parse_program(source: &str) -> Result<ProgramFile, ProgramError> {
    let mut program = ProgramFile::new();

    for (line_num, line) in source.lines().enumerate() {
        let code = line.split('#').next().unwrap_or("").trim();

        // Skip empty lines and comments
        if code.is_empty() {
            continue;
        }

        if code.len() != 8 || !code.chars().all(|c| c == '0' || c == '1') {
            return Err(ProgramError::ParseError {
                line: line_num + 1,
                message: format!("expected 8 binary digits, found {:?}", code),
            });
        }

        let byte = u8::from_str_radix(code, 2).map_err(|e| ProgramError::ParseError {
            line: line_num + 1,
            message: e.to_string(),
        })?;

        program.push(byte, line.trim());
    }

    if program.len() > MEMORY_SIZE {
        return Err(ProgramError::TooLarge { size: program.len() });
    }

    Ok(program)
}

/// Load a program file from disk.
pub fn load_program<P: AsRef<Path>>(path: P) -> Result<ProgramFile, ProgramError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .map_err(|e| ProgramError::IoError(format!("{}: {}", path.display(), e)))?;

    let program = parse_program(&source)?;
    tracing::debug!(path = %path.display(), bytes = program.len(), "program file parsed");
    Ok(program)
}

/// Render bytes in program file format, annotated with their disassembly.
pub fn format_program(bytes: &[u8]) -> String {
    let mut output = String::new();
    output.push_str("# LS-8 program\n");
    output.push_str(&format!("# {} bytes\n\n", bytes.len()));

    let mut addr = 0;
    while addr < bytes.len() {
        let (text, len) = disassemble_at(bytes, addr);
        for (i, byte) in bytes[addr..addr + len].iter().enumerate() {
            if i == 0 {
                output.push_str(&format!("{:08b} # {:02X}: {}\n", byte, addr, text));
            } else {
                output.push_str(&format!("{:08b}\n", byte));
            }
        }
        addr += len;
    }

    output
}

/// Save a program file to disk.
pub fn save_program<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<(), ProgramError> {
    let mut file = std::fs::File::create(path.as_ref())
        .map_err(|e| ProgramError::IoError(e.to_string()))?;

    file.write_all(format_program(bytes).as_bytes())
        .map_err(|e| ProgramError::IoError(e.to_string()))?;

    Ok(())
}

/// Errors that can occur while reading or writing program files.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgramError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("program is {size} bytes, memory holds {}", MEMORY_SIZE)]
    TooLarge { size: usize },
}
