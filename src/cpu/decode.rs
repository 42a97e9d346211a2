//! Instruction decoder for the LS-8.
//!
//! Opcode layout (`AABCDDDD`):
//! - `AA`: number of operand bytes that follow (0-2)
//! - `B`: set for ALU operations
//! - `C`: set for instructions that overwrite the PC
//! - `DDDD`: instruction identifier

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Number of operand bytes encoded in an opcode's two high bits.
#[inline]
pub const fn operand_count(opcode: u8) -> usize {
    (opcode >> 6) as usize
}

/// Whether the opcode's ALU bit is set.
#[inline]
pub const fn is_alu(opcode: u8) -> bool {
    opcode & 0b0010_0000 != 0
}

/// Opcode byte values.
pub mod opcode {
    pub const HLT: u8 = 0b0000_0001;
    pub const RET: u8 = 0b0001_0001;
    pub const PUSH: u8 = 0b0100_0101;
    pub const POP: u8 = 0b0100_0110;
    pub const PRN: u8 = 0b0100_0111;
    pub const CALL: u8 = 0b0101_0000;
    pub const JMP: u8 = 0b0101_0100;
    pub const JEQ: u8 = 0b0101_0101;
    pub const JNE: u8 = 0b0101_0110;
    pub const LDI: u8 = 0b1000_0010;

    pub const ADD: u8 = 0b1010_0000;
    pub const SUB: u8 = 0b1010_0001;
    pub const MUL: u8 = 0b1010_0010;
    pub const DIV: u8 = 0b1010_0011;
    pub const CMP: u8 = 0b1010_0111;
    pub const OR: u8 = 0b1010_1010;
    pub const XOR: u8 = 0b1010_1011;
    pub const SHL: u8 = 0b1010_1100;
    pub const SHR: u8 = 0b1010_1101;
}

/// ALU operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Cmp,
    Or,
    Xor,
    Shl,
    Shr,
}

impl AluOp {
    /// Every supported ALU operation.
    pub const ALL: [AluOp; 9] = [
        AluOp::Add,
        AluOp::Sub,
        AluOp::Mul,
        AluOp::Div,
        AluOp::Cmp,
        AluOp::Or,
        AluOp::Xor,
        AluOp::Shl,
        AluOp::Shr,
    ];

    /// Map an ALU opcode to its selector.
    pub fn from_opcode(byte: u8) -> Option<Self> {
        let op = match byte {
            opcode::ADD => AluOp::Add,
            opcode::SUB => AluOp::Sub,
            opcode::MUL => AluOp::Mul,
            opcode::DIV => AluOp::Div,
            opcode::CMP => AluOp::Cmp,
            opcode::OR => AluOp::Or,
            opcode::XOR => AluOp::Xor,
            opcode::SHL => AluOp::Shl,
            opcode::SHR => AluOp::Shr,
            _ => return None,
        };
        Some(op)
    }

    pub const fn opcode(self) -> u8 {
        match self {
            AluOp::Add => opcode::ADD,
            AluOp::Sub => opcode::SUB,
            AluOp::Mul => opcode::MUL,
            AluOp::Div => opcode::DIV,
            AluOp::Cmp => opcode::CMP,
            AluOp::Or => opcode::OR,
            AluOp::Xor => opcode::XOR,
            AluOp::Shl => opcode::SHL,
            AluOp::Shr => opcode::SHR,
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "ADD",
            AluOp::Sub => "SUB",
            AluOp::Mul => "MUL",
            AluOp::Div => "DIV",
            AluOp::Cmp => "CMP",
            AluOp::Or => "OR",
            AluOp::Xor => "XOR",
            AluOp::Shl => "SHL",
            AluOp::Shr => "SHR",
        }
    }
}

/// Operation identity decoded from an opcode byte, before operands are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Hlt,
    Ret,
    Prn,
    Push,
    Pop,
    Call,
    Jmp,
    Jeq,
    Jne,
    Ldi,
    Alu(AluOp),
}

impl Operation {
    /// Identify the operation an opcode byte selects.
    pub fn from_opcode(byte: u8) -> Result<Self, DecodeError> {
        if is_alu(byte) {
            return AluOp::from_opcode(byte)
                .map(Operation::Alu)
                .ok_or(DecodeError::UnsupportedAluOperation(byte));
        }

        let op = match byte {
            opcode::HLT => Operation::Hlt,
            opcode::RET => Operation::Ret,
            opcode::PRN => Operation::Prn,
            opcode::PUSH => Operation::Push,
            opcode::POP => Operation::Pop,
            opcode::CALL => Operation::Call,
            opcode::JMP => Operation::Jmp,
            opcode::JEQ => Operation::Jeq,
            opcode::JNE => Operation::Jne,
            opcode::LDI => Operation::Ldi,
            _ => return Err(DecodeError::UnsupportedInstruction(byte)),
        };
        Ok(op)
    }

    pub const fn opcode(self) -> u8 {
        match self {
            Operation::Hlt => opcode::HLT,
            Operation::Ret => opcode::RET,
            Operation::Prn => opcode::PRN,
            Operation::Push => opcode::PUSH,
            Operation::Pop => opcode::POP,
            Operation::Call => opcode::CALL,
            Operation::Jmp => opcode::JMP,
            Operation::Jeq => opcode::JEQ,
            Operation::Jne => opcode::JNE,
            Operation::Ldi => opcode::LDI,
            Operation::Alu(op) => op.opcode(),
        }
    }

    /// Operand bytes this operation consumes.
    pub const fn operand_count(self) -> usize {
        operand_count(self.opcode())
    }

    /// Build the full instruction from its operand bytes.
    ///
    /// `operands` must hold at least [`Operation::operand_count`] bytes.
    pub fn with_operands(self, operands: &[u8]) -> Result<Instruction, DecodeError> {
        let needed = self.operand_count();
        if operands.len() < needed {
            return Err(DecodeError::Truncated {
                opcode: self.opcode(),
                needed,
                available: operands.len(),
            });
        }

        let instr = match self {
            Operation::Hlt => Instruction::Hlt,
            Operation::Ret => Instruction::Ret,
            Operation::Prn => Instruction::Prn { reg: operands[0] },
            Operation::Push => Instruction::Push { reg: operands[0] },
            Operation::Pop => Instruction::Pop { reg: operands[0] },
            Operation::Call => Instruction::Call { reg: operands[0] },
            Operation::Jmp => Instruction::Jmp { reg: operands[0] },
            Operation::Jeq => Instruction::Jeq { reg: operands[0] },
            Operation::Jne => Instruction::Jne { reg: operands[0] },
            Operation::Ldi => Instruction::Ldi { reg: operands[0], value: operands[1] },
            Operation::Alu(op) => Instruction::Alu { op, a: operands[0], b: operands[1] },
        };
        Ok(instr)
    }
}

/// Decoded LS-8 instruction.
///
/// Register operands are raw bytes; the executor validates them so an
/// out-of-range index surfaces as `InvalidRegister` at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Machine ====================

    /// Halt the CPU.
    Hlt,

    /// Load immediate: R[reg] := value
    Ldi { reg: u8, value: u8 },

    /// Print R[reg] in decimal.
    Prn { reg: u8 },

    // ==================== Stack ====================

    /// SP -= 1; [SP] := R[reg]
    Push { reg: u8 },

    /// R[reg] := [SP]; SP += 1
    Pop { reg: u8 },

    /// Push the return address, then PC := R[reg]
    Call { reg: u8 },

    /// Pop the return address into PC.
    Ret,

    // ==================== Control Flow ====================

    /// PC := R[reg]
    Jmp { reg: u8 },

    /// if FL = E then PC := R[reg]
    Jeq { reg: u8 },

    /// if FL != E then PC := R[reg]
    Jne { reg: u8 },

    // ==================== ALU ====================

    /// R[a] := R[a] op R[b] (CMP sets FL instead)
    Alu { op: AluOp, a: u8, b: u8 },
}

impl Instruction {
    pub fn operation(&self) -> Operation {
        match self {
            Instruction::Hlt => Operation::Hlt,
            Instruction::Ldi { .. } => Operation::Ldi,
            Instruction::Prn { .. } => Operation::Prn,
            Instruction::Push { .. } => Operation::Push,
            Instruction::Pop { .. } => Operation::Pop,
            Instruction::Call { .. } => Operation::Call,
            Instruction::Ret => Operation::Ret,
            Instruction::Jmp { .. } => Operation::Jmp,
            Instruction::Jeq { .. } => Operation::Jeq,
            Instruction::Jne { .. } => Operation::Jne,
            Instruction::Alu { op, .. } => Operation::Alu(*op),
        }
    }

    /// Encoded length in bytes (opcode plus operands).
    pub fn size(&self) -> usize {
        1 + self.operation().operand_count()
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Hlt => "HLT",
            Instruction::Ldi { .. } => "LDI",
            Instruction::Prn { .. } => "PRN",
            Instruction::Push { .. } => "PUSH",
            Instruction::Pop { .. } => "POP",
            Instruction::Call { .. } => "CALL",
            Instruction::Ret => "RET",
            Instruction::Jmp { .. } => "JMP",
            Instruction::Jeq { .. } => "JEQ",
            Instruction::Jne { .. } => "JNE",
            Instruction::Alu { op, .. } => op.mnemonic(),
        }
    }
}

/// Decode one instruction from the start of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Instruction, DecodeError> {
    let (&opcode, operands) = bytes.split_first().ok_or(DecodeError::Empty)?;
    Operation::from_opcode(opcode)?.with_operands(operands)
}

/// Encode an instruction back to machine code.
pub fn encode(instr: &Instruction) -> Vec<u8> {
    let opcode = instr.operation().opcode();
    match *instr {
        Instruction::Hlt | Instruction::Ret => vec![opcode],
        Instruction::Prn { reg }
        | Instruction::Push { reg }
        | Instruction::Pop { reg }
        | Instruction::Call { reg }
        | Instruction::Jmp { reg }
        | Instruction::Jeq { reg }
        | Instruction::Jne { reg } => vec![opcode, reg],
        Instruction::Ldi { reg, value } => vec![opcode, reg, value],
        Instruction::Alu { a, b, .. } => vec![opcode, a, b],
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unsupported instruction: {0:#010b}")]
    UnsupportedInstruction(u8),

    #[error("unsupported ALU operation: {0:#010b}")]
    UnsupportedAluOperation(u8),

    #[error("instruction {opcode:#010b} needs {needed} operand bytes, {available} available")]
    Truncated { opcode: u8, needed: usize, available: usize },

    #[error("no bytes to decode")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_count_from_high_bits() {
        assert_eq!(operand_count(opcode::HLT), 0);
        assert_eq!(operand_count(opcode::RET), 0);
        assert_eq!(operand_count(opcode::PRN), 1);
        assert_eq!(operand_count(opcode::CALL), 1);
        assert_eq!(operand_count(opcode::LDI), 2);
        assert_eq!(operand_count(opcode::CMP), 2);
    }

    #[test]
    fn test_alu_bit() {
        for op in AluOp::ALL {
            assert!(is_alu(op.opcode()), "{:?}", op);
        }
        assert!(!is_alu(opcode::LDI));
        assert!(!is_alu(opcode::JNE));
    }

    #[test]
    fn test_decode_hlt() {
        assert_eq!(decode(&[0b0000_0001]).unwrap(), Instruction::Hlt);
    }

    #[test]
    fn test_decode_ldi() {
        let instr = decode(&[0b1000_0010, 0, 8]).unwrap();
        assert_eq!(instr, Instruction::Ldi { reg: 0, value: 8 });
        assert_eq!(instr.size(), 3);
    }

    #[test]
    fn test_decode_alu() {
        let instr = decode(&[0b1010_0111, 1, 2]).unwrap();
        assert_eq!(instr, Instruction::Alu { op: AluOp::Cmp, a: 1, b: 2 });
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(decode(&[0]), Err(DecodeError::UnsupportedInstruction(0)));
        assert_eq!(decode(&[0xFF, 0, 0]), Err(DecodeError::UnsupportedAluOperation(0xFF)));
        // AND is not part of this instruction set
        assert_eq!(
            decode(&[0b1010_1000, 0, 1]),
            Err(DecodeError::UnsupportedAluOperation(0b1010_1000))
        );
    }

    #[test]
    fn test_truncated() {
        assert_eq!(
            decode(&[opcode::LDI, 0]),
            Err(DecodeError::Truncated { opcode: opcode::LDI, needed: 2, available: 1 })
        );
        assert_eq!(decode(&[]), Err(DecodeError::Empty));
    }

    #[test]
    fn test_encode_matches_length() {
        let test_cases = [
            Instruction::Hlt,
            Instruction::Ret,
            Instruction::Prn { reg: 3 },
            Instruction::Call { reg: 1 },
            Instruction::Ldi { reg: 2, value: 200 },
            Instruction::Alu { op: AluOp::Shr, a: 0, b: 1 },
        ];

        for instr in test_cases {
            let bytes = encode(&instr);
            assert_eq!(bytes.len(), instr.size());
            assert_eq!(decode(&bytes).unwrap(), instr);
        }
    }
}
