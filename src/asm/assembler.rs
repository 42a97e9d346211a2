//! Simple assembler for LS-8 programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//! MAIN:               ; Define a label
//!     LDI R0, 8       ; Load immediate
//!     LDI R1, SUB     ; Labels resolve to byte addresses
//!     CALL R1
//!     HLT
//!
//!     ORG 0x20        ; Pad with zeros up to an address
//! SUB:
//!     PRN R0
//!     RET
//!     DB 0b1010       ; Raw data byte
//! ```

use crate::cpu::decode::{encode, AluOp, Instruction};
use crate::cpu::memory::MEMORY_SIZE;
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to machine code.
pub fn assemble(source: &str) -> Result<Vec<u8>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// The assembler state.
struct Assembler {
    /// Symbol table (label -> address).
    symbols: HashMap<String, usize>,
    /// Pending label references: (output_index, label, source_line).
    pending: Vec<(usize, String, usize)>,
    /// Output bytes. Its length is the current address.
    output: Vec<u8>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<u8>, AssemblerError> {
        // Pass 1: Collect labels and generate code
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: Resolve forward references
        self.resolve_references()?;

        if self.output.len() > MEMORY_SIZE {
            return Err(AssemblerError::ProgramTooLarge { size: self.output.len() });
        }

        Ok(std::mem::take(&mut self.output))
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        // Remove comments
        let line = line.split(|c: char| c == ';' || c == '#').next().unwrap_or("").trim();

        if line.is_empty() {
            return Ok(());
        }

        // Check for label definition
        if let Some(colon_idx) = line.find(':') {
            let label = line[..colon_idx].trim().to_uppercase();
            if label.is_empty() || label.contains(char::is_whitespace) {
                return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("invalid label {:?}", label),
                });
            }
            if self.symbols.insert(label.clone(), self.output.len()).is_some() {
                return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("label {} defined twice", label),
                });
            }

            // Process rest of line if any
            let rest = line[colon_idx + 1..].trim();
            if !rest.is_empty() {
                return self.process_instruction(rest, line_num);
            }
            return Ok(());
        }

        self.process_instruction(line, line_num)
    }

    fn process_instruction(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
            Some((m, r)) => (m.to_uppercase(), r.trim()),
            None => (line.to_uppercase(), ""),
        };
        let operands: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split(',').map(str::trim).collect()
        };

        match mnemonic.as_str() {
            // Directives
            "ORG" => {
                let [addr] = expect_operands::<_, 1>(&mnemonic, &operands, line_num)?;
                let addr = parse_number(addr, line_num)?
                    .ok_or_else(|| AssemblerError::SyntaxError {
                        line: line_num,
                        message: "ORG requires a numeric address".into(),
                    })?;
                if addr < 0 || addr as usize > MEMORY_SIZE {
                    return Err(AssemblerError::ValueOutOfRange { line: line_num, value: addr });
                }
                if (addr as usize) < self.output.len() {
                    return Err(AssemblerError::SyntaxError {
                        line: line_num,
                        message: format!("ORG {} is behind current address {}", addr, self.output.len()),
                    });
                }
                self.output.resize(addr as usize, 0);
            }

            "DB" => {
                let [value] = expect_operands::<_, 1>(&mnemonic, &operands, line_num)?;
                let byte = self.parse_immediate(value, line_num)?;
                self.output.push(byte);
            }

            // Instructions
            _ => {
                let instr = self.parse_instruction(&mnemonic, &operands, line_num)?;
                self.output.extend(encode(&instr));
            }
        }

        Ok(())
    }

    fn parse_instruction(&mut self, mnemonic: &str, operands: &[&str], line_num: usize)
        -> Result<Instruction, AssemblerError>
    {
        if let Some(op) = AluOp::ALL.iter().copied().find(|op| op.mnemonic() == mnemonic) {
            let [a, b] = expect_operands::<_, 2>(mnemonic, operands, line_num)?;
            let a = parse_register(a, line_num)?;
            let b = parse_register(b, line_num)?;
            return Ok(Instruction::Alu { op, a, b });
        }

        let instr = match mnemonic {
            "HLT" | "RET" => {
                expect_operands::<_, 0>(mnemonic, operands, line_num)?;
                if mnemonic == "HLT" { Instruction::Hlt } else { Instruction::Ret }
            }

            "LDI" => {
                let [reg, value] = expect_operands::<_, 2>(mnemonic, operands, line_num)?;
                let reg = parse_register(reg, line_num)?;
                // The immediate is the third byte of the instruction
                let value = self.parse_immediate_at(value, self.output.len() + 2, line_num)?;
                Instruction::Ldi { reg, value }
            }

            "PRN" | "PUSH" | "POP" | "CALL" | "JMP" | "JEQ" | "JNE" => {
                let [reg] = expect_operands::<_, 1>(mnemonic, operands, line_num)?;
                let reg = parse_register(reg, line_num)?;
                match mnemonic {
                    "PRN" => Instruction::Prn { reg },
                    "PUSH" => Instruction::Push { reg },
                    "POP" => Instruction::Pop { reg },
                    "CALL" => Instruction::Call { reg },
                    "JMP" => Instruction::Jmp { reg },
                    "JEQ" => Instruction::Jeq { reg },
                    _ => Instruction::Jne { reg },
                }
            }

            _ => return Err(AssemblerError::UnknownMnemonic {
                line: line_num,
                mnemonic: mnemonic.to_string(),
            }),
        };

        Ok(instr)
    }

    /// Parse an immediate that will be emitted as the next output byte.
    fn parse_immediate(&mut self, operand: &str, line_num: usize) -> Result<u8, AssemblerError> {
        self.parse_immediate_at(operand, self.output.len(), line_num)
    }

    /// Parse an immediate destined for output index `at`. Labels are
    /// recorded and patched in pass 2.
    fn parse_immediate_at(&mut self, operand: &str, at: usize, line_num: usize) -> Result<u8, AssemblerError> {
        if let Some(value) = parse_number(operand, line_num)? {
            return u8::try_from(value)
                .map_err(|_| AssemblerError::ValueOutOfRange { line: line_num, value });
        }

        // Must be a label reference - store for pass 2
        self.pending.push((at, operand.to_uppercase(), line_num));
        Ok(0) // Placeholder, will be resolved in pass 2
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for (out_idx, label, line_num) in &self.pending {
            let addr = *self.symbols.get(label)
                .ok_or_else(|| AssemblerError::UndefinedLabel {
                    line: *line_num,
                    label: label.clone(),
                })?;

            self.output[*out_idx] = u8::try_from(addr)
                .map_err(|_| AssemblerError::ValueOutOfRange { line: *line_num, value: addr as i64 })?;
        }
        Ok(())
    }
}

/// Destructure exactly `N` operands.
fn expect_operands<T: Copy, const N: usize>(mnemonic: &str, operands: &[T], line_num: usize)
    -> Result<[T; N], AssemblerError>
{
    <[T; N]>::try_from(operands).map_err(|_| AssemblerError::SyntaxError {
        line: line_num,
        message: format!("{} takes {} operand(s), found {}", mnemonic, N, operands.len()),
    })
}

/// Parse `R0`-`R7`.
fn parse_register(operand: &str, line_num: usize) -> Result<u8, AssemblerError> {
    operand
        .strip_prefix(|c: char| c == 'R' || c == 'r')
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|&n| n < 8)
        .ok_or_else(|| AssemblerError::InvalidRegister {
            line: line_num,
            operand: operand.to_string(),
        })
}

/// Parse a numeric literal. `Ok(None)` means the operand is not a number
/// (so it may be a label).
fn parse_number(operand: &str, line_num: usize) -> Result<Option<i64>, AssemblerError> {
    let (digits, radix) = if let Some(hex) = operand.strip_prefix("0x").or_else(|| operand.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(bin) = operand.strip_prefix("0b").or_else(|| operand.strip_prefix("0B")) {
        (bin, 2)
    } else if operand.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        (operand, 10)
    } else {
        return Ok(None);
    };

    i64::from_str_radix(digits, radix)
        .map(Some)
        .map_err(|_| AssemblerError::SyntaxError {
            line: line_num,
            message: format!("invalid number {:?}", operand),
        })
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },

    #[error("invalid register on line {line}: {operand}")]
    InvalidRegister { line: usize, operand: String },

    #[error("program is {size} bytes, memory holds {}", MEMORY_SIZE)]
    ProgramTooLarge { size: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_simple() {
        let source = r#"
            ; Simple test program
            LDI R0, 8
            LDI R1, 9
            ADD R0, R1
            PRN R0
            HLT
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result, vec![
            0x82, 0, 8,
            0x82, 1, 9,
            0xA0, 0, 1,
            0x47, 0,
            0x01,
        ]);
    }

    #[test]
    fn test_assemble_with_labels() {
        let source = r#"
        MAIN:
            LDI R1, SUB
            CALL R1
            HLT
        SUB: RET
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result, vec![0x82, 1, 6, 0x50, 1, 0x01, 0x11]);
    }

    #[test]
    fn test_assemble_data_and_org() {
        let source = r#"
            DB 42
            DB 0x10
            ORG 4
            DB 0b101
        "#;

        let result = assemble(source).unwrap();
        assert_eq!(result, vec![42, 0x10, 0, 0, 5]);
    }

    #[test]
    fn test_assemble_errors() {
        assert!(matches!(
            assemble("FOO R0"),
            Err(AssemblerError::UnknownMnemonic { line: 1, .. })
        ));
        assert!(matches!(
            assemble("\nPRN R8"),
            Err(AssemblerError::InvalidRegister { line: 2, .. })
        ));
        assert!(matches!(
            assemble("LDI R0, 256"),
            Err(AssemblerError::ValueOutOfRange { line: 1, value: 256 })
        ));
        assert!(matches!(
            assemble("LDI R0, NOWHERE"),
            Err(AssemblerError::UndefinedLabel { line: 1, .. })
        ));
        assert!(matches!(
            assemble("ADD R0"),
            Err(AssemblerError::SyntaxError { line: 1, .. })
        ));
    }
}
