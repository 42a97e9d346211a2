//! CPU execution engine for the LS-8.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.
//! Every handler either finishes completely or fails before touching any
//! machine state, so a faulted CPU can be inspected exactly as it was.

use crate::cpu::{Memory, Registers};
use crate::cpu::alu::{self, AluError, AluOutput};
use crate::cpu::decode::{DecodeError, Instruction, Operation};
use crate::cpu::memory::MemoryError;
use crate::cpu::registers::{Flag, RegisterError, SP};
use serde::{Serialize, Deserialize};
use std::io::Write;
use thiserror::Error;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed HLT instruction). Terminal, as is `Error`:
    /// a fault never ends in `Halted`, so check `!is_running()` for "stopped".
    Halted,
    /// CPU stopped on a fatal error. Only [`Cpu::reset`] leaves it.
    Error,
}

/// The LS-8 CPU.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count.
    pub cycles: u64,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a new CPU in the power-on state.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            state: CpuState::Running,
            cycles: 0,
            last_instr: None,
        }
    }

    /// Reset the CPU to its power-on state, clearing memory.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.last_instr = None;
        tracing::debug!("cpu reset");
    }

    /// Load a program into memory at address 0.
    pub fn load_program(&mut self, program: &[u8]) -> Result<(), MemoryError> {
        self.mem.load_program(0, program)?;
        tracing::debug!(bytes = program.len(), "program loaded");
        Ok(())
    }

    /// Execute a single instruction, writing any PRN output to `out`.
    ///
    /// Returns the instruction that was executed, or an error. An error
    /// leaves the CPU in [`CpuState::Error`] with registers, memory and PC
    /// untouched by the failed instruction.
    pub fn step<W: Write>(&mut self, out: &mut W) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        let pc = self.regs.pc;
        match self.fetch_decode_execute(out) {
            Ok(instr) => {
                tracing::trace!(pc, ?instr, "executed");
                self.cycles += 1;
                self.last_instr = Some(instr);
                if self.state == CpuState::Halted {
                    tracing::debug!(pc, cycles = self.cycles, "halted");
                }
                Ok(instr)
            }
            Err(e) => {
                tracing::warn!(pc, error = %e, "cpu fault");
                self.state = CpuState::Error;
                Err(e)
            }
        }
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed. A program that never
    /// halts never returns.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running {
            self.step(out)?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited<W: Write>(&mut self, out: &mut W, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles.saturating_add(max_cycles);

        while self.state == CpuState::Running && self.cycles < limit {
            self.step(out)?;
        }

        Ok(self.cycles - start_cycles)
    }

    fn fetch_decode_execute<W: Write>(&mut self, out: &mut W) -> Result<Instruction, CpuError> {
        // Fetch
        let pc = self.regs.pc;
        let ir = self.mem.read(pc)?;

        // Decode: the opcode tells us how many operand bytes to fetch
        let op = Operation::from_opcode(ir)?;
        let mut operands = [0u8; 2];
        for (i, slot) in operands.iter_mut().take(op.operand_count()).enumerate() {
            *slot = self.mem.read(pc + 1 + i)?;
        }
        let instr = op.with_operands(&operands)?;

        // Execute
        self.execute(instr, out)?;
        Ok(instr)
    }

    /// Execute a decoded instruction. Each arm is responsible for the PC.
    fn execute<W: Write>(&mut self, instr: Instruction, out: &mut W) -> Result<(), CpuError> {
        match instr {
            // ==================== Machine ====================

            Instruction::Hlt => {
                self.state = CpuState::Halted;
            }

            Instruction::Ldi { reg, value } => {
                self.regs.set(reg, value)?;
                self.regs.advance_pc(3);
            }

            Instruction::Prn { reg } => {
                let value = self.regs.get(reg)?;
                writeln!(out, "{}", value).map_err(|e| CpuError::Output(e.to_string()))?;
                self.regs.advance_pc(2);
            }

            // ==================== Stack ====================

            Instruction::Push { reg } => {
                let value = self.regs.get(reg)?;
                self.push(value)?;
                self.regs.advance_pc(2);
            }

            Instruction::Pop { reg } => {
                self.regs.get(reg)?;
                let value = self.pop()?;
                self.regs.set(reg, value)?;
                self.regs.advance_pc(2);
            }

            Instruction::Call { reg } => {
                let target = self.regs.get(reg)?;
                let return_addr = self.regs.pc + 2;
                let return_addr = u8::try_from(return_addr)
                    .map_err(|_| MemoryError::OutOfBounds(return_addr))?;
                self.push(return_addr)?;
                self.regs.jump(target);
            }

            Instruction::Ret => {
                let return_addr = self.pop()?;
                self.regs.jump(return_addr);
            }

            // ==================== Control Flow ====================

            Instruction::Jmp { reg } => {
                let target = self.regs.get(reg)?;
                self.regs.jump(target);
            }

            Instruction::Jeq { reg } => {
                let target = self.regs.get(reg)?;
                if self.regs.fl == Some(Flag::Equal) {
                    self.regs.jump(target);
                } else {
                    self.regs.advance_pc(2);
                }
            }

            Instruction::Jne { reg } => {
                let target = self.regs.get(reg)?;
                if self.regs.fl != Some(Flag::Equal) {
                    self.regs.jump(target);
                } else {
                    self.regs.advance_pc(2);
                }
            }

            // ==================== ALU ====================

            Instruction::Alu { op, a, b } => {
                let lhs = self.regs.get(a)?;
                let rhs = self.regs.get(b)?;
                match alu::alu(op, lhs, rhs)? {
                    AluOutput::Value(result) => self.regs.set(a, result)?,
                    AluOutput::Flag(flag) => self.regs.fl = Some(flag),
                }
                self.regs.advance_pc(3);
            }
        }

        Ok(())
    }

    /// Decrement SP and store `value` at the new top of stack.
    fn push(&mut self, value: u8) -> Result<(), CpuError> {
        let sp = self.regs.sp().checked_sub(1).ok_or(CpuError::StackOverflow)?;
        self.mem.write(sp as usize, value)?;
        self.regs.set_sp(sp);
        Ok(())
    }

    /// Read the top of stack and increment SP.
    fn pop(&mut self) -> Result<u8, CpuError> {
        let sp = self.regs.sp();
        let value = self.mem.read(sp as usize)?;
        let next = sp.checked_add(1).ok_or(CpuError::StackUnderflow)?;
        self.regs.set_sp(next);
        Ok(value)
    }

    /// One-line dump of PC, the next three bytes and all registers, in hex.
    pub fn trace(&self) -> String {
        let pc = self.regs.pc;
        let mut line = format!("TRACE: {:02X} |", pc);

        for addr in pc..pc + 3 {
            match self.mem.read(addr) {
                Ok(byte) => line.push_str(&format!(" {:02X}", byte)),
                Err(_) => line.push_str(" --"),
            }
        }
        line.push_str(" |");

        for value in self.regs.all() {
            line.push_str(&format!(" {:02X}", value));
        }

        line
    }

    /// Serialize the full machine state as JSON.
    pub fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }

    /// Check if the CPU stopped on an error.
    pub fn is_faulted(&self) -> bool {
        self.state == CpuState::Error
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("memory error: {0}")]
    MemoryError(#[from] MemoryError),

    #[error("register error: {0}")]
    RegisterError(#[from] RegisterError),

    #[error("decode error: {0}")]
    DecodeError(#[from] DecodeError),

    #[error("ALU error: {0}")]
    AluError(#[from] AluError),

    #[error("stack overflow: R{} would drop below address 0", SP)]
    StackOverflow,

    #[error("stack underflow: R{} would pass address 255", SP)]
    StackUnderflow,

    #[error("output error: {0}")]
    Output(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::{encode, AluOp};

    fn make_program(instructions: &[Instruction]) -> Vec<u8> {
        instructions.iter().flat_map(encode).collect()
    }

    fn run_program(program: &[u8]) -> (Cpu, Result<u64, CpuError>, String) {
        let mut cpu = Cpu::new();
        cpu.load_program(program).unwrap();
        let mut out = Vec::new();
        let result = cpu.run(&mut out);
        (cpu, result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_cpu_halt() {
        let (cpu, result, output) = run_program(&make_program(&[Instruction::Hlt]));

        assert_eq!(result.unwrap(), 1);
        assert!(cpu.is_halted());
        assert_eq!(cpu.regs.pc, 0);
        assert!(output.is_empty());
    }

    #[test]
    fn test_cpu_ldi_prn() {
        let program = make_program(&[
            Instruction::Ldi { reg: 0, value: 8 },
            Instruction::Prn { reg: 0 },
            Instruction::Hlt,
        ]);
        let (cpu, result, output) = run_program(&program);

        assert_eq!(result.unwrap(), 3);
        assert_eq!(output, "8\n");
        assert_eq!(cpu.regs.pc, 5);
    }

    #[test]
    fn test_cpu_arithmetic() {
        let program = make_program(&[
            Instruction::Ldi { reg: 0, value: 8 },
            Instruction::Ldi { reg: 1, value: 9 },
            Instruction::Alu { op: AluOp::Mul, a: 0, b: 1 },
            Instruction::Prn { reg: 0 },
            Instruction::Hlt,
        ]);
        let (cpu, _, output) = run_program(&program);

        assert_eq!(output, "72\n");
        assert_eq!(cpu.regs.get(1).unwrap(), 9);
    }

    #[test]
    fn test_cpu_push_pop() {
        let program = make_program(&[
            Instruction::Ldi { reg: 0, value: 42 },
            Instruction::Push { reg: 0 },
            Instruction::Ldi { reg: 0, value: 0 },
            Instruction::Pop { reg: 2 },
            Instruction::Hlt,
        ]);
        let mut cpu = Cpu::new();
        cpu.load_program(&program).unwrap();
        let mut out = Vec::new();

        cpu.step(&mut out).unwrap();
        cpu.step(&mut out).unwrap();
        assert_eq!(cpu.regs.sp(), 0xF3);
        assert_eq!(cpu.mem.read(0xF3).unwrap(), 42);

        cpu.run(&mut out).unwrap();
        assert_eq!(cpu.regs.get(2).unwrap(), 42);
        assert_eq!(cpu.regs.sp(), 0xF4);
    }

    #[test]
    fn test_cpu_call_ret() {
        // 0: LDI R1,8  3: CALL R1  5: PRN R0  7: HLT  8: LDI R0,42  11: RET
        let program = make_program(&[
            Instruction::Ldi { reg: 1, value: 8 },
            Instruction::Call { reg: 1 },
            Instruction::Prn { reg: 0 },
            Instruction::Hlt,
            Instruction::Ldi { reg: 0, value: 42 },
            Instruction::Ret,
        ]);
        let mut cpu = Cpu::new();
        cpu.load_program(&program).unwrap();
        let mut out = Vec::new();

        cpu.step(&mut out).unwrap();
        cpu.step(&mut out).unwrap();
        assert_eq!(cpu.regs.pc, 8);
        assert_eq!(cpu.regs.sp(), 0xF3);
        assert_eq!(cpu.mem.read(0xF3).unwrap(), 5);

        let executed = cpu.run(&mut out).unwrap();
        assert_eq!(executed, 4);
        assert_eq!(String::from_utf8(out).unwrap(), "42\n");
        assert_eq!(cpu.regs.sp(), 0xF4);
        assert!(cpu.is_halted());
    }

    #[test]
    fn test_cpu_conditional_jump() {
        // JEQ must fall through, JNE must skip the HLT at 16
        let program = make_program(&[
            Instruction::Ldi { reg: 0, value: 1 },
            Instruction::Ldi { reg: 1, value: 2 },
            Instruction::Ldi { reg: 2, value: 17 },
            Instruction::Alu { op: AluOp::Cmp, a: 0, b: 1 },
            Instruction::Jeq { reg: 2 },
            Instruction::Jne { reg: 2 },
            Instruction::Hlt,
            Instruction::Prn { reg: 0 },
            Instruction::Hlt,
        ]);
        let (cpu, _, output) = run_program(&program);

        assert_eq!(output, "1\n");
        assert_eq!(cpu.regs.fl, Some(Flag::Less));
        assert_eq!(cpu.regs.get(0).unwrap(), 1);
        assert_eq!(cpu.regs.get(1).unwrap(), 2);
    }

    #[test]
    fn test_jne_taken_when_flag_unset() {
        let program = make_program(&[
            Instruction::Ldi { reg: 0, value: 6 },
            Instruction::Jne { reg: 0 },
            Instruction::Hlt,
        ]);
        let mut cpu = Cpu::new();
        cpu.load_program(&program).unwrap();
        let mut out = Vec::new();

        cpu.step(&mut out).unwrap();
        cpu.step(&mut out).unwrap();
        assert_eq!(cpu.regs.pc, 6);
    }

    #[test]
    fn test_cpu_jmp() {
        let program = make_program(&[
            Instruction::Ldi { reg: 3, value: 6 },
            Instruction::Jmp { reg: 3 },
            Instruction::Hlt,
        ]);
        let mut cpu = Cpu::new();
        cpu.load_program(&program).unwrap();
        let mut out = Vec::new();

        cpu.step(&mut out).unwrap();
        cpu.step(&mut out).unwrap();
        assert_eq!(cpu.regs.pc, 6);
    }

    #[test]
    fn test_division_by_zero_mutates_nothing() {
        let program = make_program(&[
            Instruction::Ldi { reg: 0, value: 10 },
            Instruction::Alu { op: AluOp::Div, a: 0, b: 1 },
            Instruction::Hlt,
        ]);
        let (cpu, result, _) = run_program(&program);

        assert_eq!(result, Err(CpuError::AluError(AluError::DivisionByZero)));
        assert!(cpu.is_faulted());
        assert_eq!(cpu.regs.get(0).unwrap(), 10);
        assert_eq!(cpu.regs.get(1).unwrap(), 0);
        assert_eq!(cpu.regs.pc, 3);
    }

    #[test]
    fn test_unknown_opcode_faults() {
        let (cpu, result, _) = run_program(&[0b1111_0000]);

        assert_eq!(
            result,
            Err(CpuError::DecodeError(DecodeError::UnsupportedAluOperation(0b1111_0000)))
        );
        assert!(cpu.is_faulted());
        assert_eq!(cpu.regs, Registers::new());
        assert_eq!(cpu.cycles, 0);
    }

    #[test]
    fn test_invalid_register() {
        let (cpu, result, _) = run_program(&[0b1000_0010, 8, 1]);

        assert_eq!(result, Err(CpuError::RegisterError(RegisterError::InvalidRegister(8))));
        assert_eq!(cpu.regs.pc, 0);
    }

    #[test]
    fn test_run_off_end_of_memory() {
        let mut cpu = Cpu::new();
        cpu.mem.write(0, 0b0101_0100).unwrap(); // JMP R0
        cpu.mem.write(1, 0).unwrap();
        cpu.regs.set(0, 253).unwrap();
        // LDI R1,1 fills the last three bytes, leaving PC at 256
        cpu.mem.write(253, 0b1000_0010).unwrap();
        cpu.mem.write(254, 1).unwrap();
        cpu.mem.write(255, 1).unwrap();

        let result = cpu.run(&mut std::io::sink());
        assert_eq!(result, Err(CpuError::MemoryError(MemoryError::OutOfBounds(256))));
        assert_eq!(cpu.regs.get(1).unwrap(), 1);
    }

    #[test]
    fn test_stack_overflow() {
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[Instruction::Push { reg: 0 }])).unwrap();
        cpu.regs.set_sp(0);

        let result = cpu.step(&mut std::io::sink());
        assert_eq!(result, Err(CpuError::StackOverflow));
        assert_eq!(cpu.regs.sp(), 0);
    }

    #[test]
    fn test_stack_underflow_on_ret() {
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[Instruction::Ret])).unwrap();
        cpu.regs.set_sp(255);

        assert_eq!(cpu.step(&mut std::io::sink()), Err(CpuError::StackUnderflow));
        assert_eq!(cpu.regs.pc, 0);
    }

    #[test]
    fn test_push_pop_through_sp() {
        // PUSH R7 stores the pre-decrement SP
        let (cpu, result, _) = run_program(&make_program(&[
            Instruction::Push { reg: SP },
            Instruction::Pop { reg: SP },
            Instruction::Hlt,
        ]));
        result.unwrap();
        assert_eq!(cpu.mem.read(0xF3).unwrap(), 0xF4);
        assert_eq!(cpu.regs.sp(), 0xF4);

        // POP R7 ends with the popped value, not the incremented SP
        let (cpu, result, _) = run_program(&make_program(&[
            Instruction::Ldi { reg: 0, value: 0x42 },
            Instruction::Push { reg: 0 },
            Instruction::Pop { reg: SP },
            Instruction::Hlt,
        ]));
        result.unwrap();
        assert_eq!(cpu.regs.sp(), 0x42);
    }

    #[test]
    fn test_call_return_address_overflow() {
        let mut cpu = Cpu::new();
        cpu.mem.write(254, 0b0101_0000).unwrap(); // CALL R1
        cpu.mem.write(255, 1).unwrap();
        cpu.mem.write(0xF3, 0xAB).unwrap();
        cpu.regs.pc = 254;

        let result = cpu.step(&mut std::io::sink());
        assert_eq!(result, Err(CpuError::MemoryError(MemoryError::OutOfBounds(256))));
        assert!(cpu.is_faulted());
        assert_eq!(cpu.regs.sp(), 0xF4);
        assert_eq!(cpu.regs.pc, 254);
        assert_eq!(cpu.mem.read(0xF3).unwrap(), 0xAB);
    }

    #[test]
    fn test_step_after_halt() {
        let (mut cpu, _, _) = run_program(&make_program(&[Instruction::Hlt]));

        assert_eq!(
            cpu.step(&mut std::io::sink()),
            Err(CpuError::NotRunning(CpuState::Halted))
        );
    }

    #[test]
    fn test_run_limited() {
        // JMP R0 with R0 = 0 loops forever
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[Instruction::Jmp { reg: 0 }])).unwrap();

        let executed = cpu.run_limited(&mut std::io::sink(), 100).unwrap();
        assert_eq!(executed, 100);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_trace_format() {
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[Instruction::Ldi { reg: 0, value: 8 }])).unwrap();

        assert_eq!(
            cpu.trace(),
            "TRACE: 00 | 82 00 08 | 00 00 00 00 00 00 00 F4"
        );

        cpu.regs.pc = 254;
        assert!(cpu.trace().starts_with("TRACE: FE | 00 00 -- |"));
    }

    #[test]
    fn test_snapshot_json() {
        let (cpu, _, _) = run_program(&make_program(&[Instruction::Hlt]));
        let json = cpu.snapshot_json().unwrap();

        let restored: Cpu = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.state, CpuState::Halted);
        assert_eq!(restored.regs, cpu.regs);
    }

    #[test]
    fn test_snapshot_with_wrong_memory_size_rejected() {
        let cpu = Cpu::new();
        let mut value: serde_json::Value = serde_json::from_str(&cpu.snapshot_json().unwrap()).unwrap();

        value["mem"] = serde_json::json!(vec![0u8; 300]);
        assert!(serde_json::from_value::<Cpu>(value.clone()).is_err());

        value["mem"] = serde_json::json!([1, 2]);
        assert!(serde_json::from_value::<Cpu>(value).is_err());
    }
}
