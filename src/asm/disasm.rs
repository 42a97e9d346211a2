//! Disassembler for LS-8 programs.
//!
//! Converts machine code back to the assembler's syntax.

use crate::cpu::decode::{decode, Instruction};

/// Format a decoded instruction as assembly text.
pub fn disassemble_instruction(instr: &Instruction) -> String {
    match *instr {
        Instruction::Hlt | Instruction::Ret => instr.mnemonic().to_string(),
        Instruction::Prn { reg }
        | Instruction::Push { reg }
        | Instruction::Pop { reg }
        | Instruction::Call { reg }
        | Instruction::Jmp { reg }
        | Instruction::Jeq { reg }
        | Instruction::Jne { reg } => format!("{} R{}", instr.mnemonic(), reg),
        Instruction::Ldi { reg, value } => format!("LDI R{},{}", reg, value),
        Instruction::Alu { a, b, .. } => format!("{} R{},R{}", instr.mnemonic(), a, b),
    }
}

/// Disassemble the instruction starting at `addr`.
///
/// Returns the text and the number of bytes it covers. Bytes that do not
/// decode (unknown opcodes, or an instruction cut off by the end of the
/// slice) come back as a one-byte `DB`.
pub fn disassemble_at(bytes: &[u8], addr: usize) -> (String, usize) {
    let Some(rest) = bytes.get(addr..).filter(|r| !r.is_empty()) else {
        return (String::new(), 0);
    };

    match decode(rest) {
        Ok(instr) => (disassemble_instruction(&instr), instr.size()),
        Err(_) => (format!("DB 0x{:02X}", rest[0]), 1),
    }
}

/// Disassemble a whole program into a listing.
pub fn disassemble(bytes: &[u8]) -> String {
    let mut output = String::new();
    output.push_str("; LS-8 Disassembly\n");
    output.push_str("; -----------------\n\n");

    let mut addr = 0;
    while addr < bytes.len() {
        let (text, len) = disassemble_at(bytes, addr);
        let raw: Vec<String> = bytes[addr..addr + len]
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect();
        output.push_str(&format!("{:02X}: {:<12} ; {}\n", addr, text, raw.join(" ")));
        addr += len;
    }

    output
}
