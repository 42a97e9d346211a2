//! Debugger application state and logic.

use crate::Cpu;
use crate::asm::disasm::{disassemble_at, disassemble_instruction};
use crate::cpu::memory::MEMORY_SIZE;
use std::collections::{HashSet, VecDeque};

/// Bytes shown per memory row.
pub const ROW_BYTES: usize = 16;

/// PRN lines kept for the output panel; older lines are dropped.
pub const OUTPUT_LINES: usize = 256;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged.
    pub cpu: Cpu,
    /// Original program for reference.
    pub program: Vec<u8>,
    /// The most recent PRN lines, oldest first.
    pub output: VecDeque<String>,
    /// Bytes written by the current step, not yet split into lines.
    pending: Vec<u8>,
    /// Breakpoints (by address).
    pub breakpoints: HashSet<usize>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// Memory view scroll offset, in rows.
    pub mem_scroll: usize,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded program.
    pub fn new(program: Vec<u8>) -> Self {
        let mut cpu = Cpu::new();
        let status = match cpu.load_program(&program) {
            Ok(()) => "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into(),
            Err(e) => format!("Load failed: {}", e),
        };

        Self {
            cpu,
            program,
            output: VecDeque::new(),
            pending: Vec::new(),
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status,
            mem_scroll: 0,
        }
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU stopped: {:?}", self.cpu.state);
            self.running = false;
            return;
        }

        let pc = self.cpu.regs.pc;
        let result = self.cpu.step(&mut self.pending);
        self.collect_output();
        match result {
            Ok(instr) => {
                self.status = format!("PC={:02X}: {}", pc, disassemble_instruction(&instr));
            }
            Err(e) => {
                self.status = format!("Error: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until halt, breakpoint, or error.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("Stopped after {} cycles ({:?})", self.cpu.cycles, self.cpu.state);
            return;
        }

        // Check for breakpoint
        let pc = self.cpu.regs.pc;
        if self.breakpoints.contains(&pc) {
            self.running = false;
            self.status = format!("Breakpoint at PC={:02X}", pc);
            return;
        }

        self.step();
    }

    /// Toggle breakpoint at current PC.
    pub fn toggle_breakpoint(&mut self) {
        let pc = self.cpu.regs.pc;
        if self.breakpoints.remove(&pc) {
            self.status = format!("Removed breakpoint at PC={:02X}", pc);
        } else {
            self.breakpoints.insert(pc);
            self.status = format!("Set breakpoint at PC={:02X}", pc);
        }
    }

    /// Reset CPU to initial state.
    pub fn reset(&mut self) {
        self.cpu.reset();
        let _ = self.cpu.load_program(&self.program);
        self.output.clear();
        self.pending.clear();
        self.running = false;
        self.status = "Reset. Ready.".into();
    }

    /// Scroll the memory view, clamped to the last row.
    pub fn scroll_memory(&mut self, down: bool) {
        let max = MEMORY_SIZE / ROW_BYTES - 1;
        self.mem_scroll = if down {
            (self.mem_scroll + 1).min(max)
        } else {
            self.mem_scroll.saturating_sub(1)
        };
    }

    /// Move completed lines from `pending` into the bounded output log.
    fn collect_output(&mut self) {
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            self.output.push_back(String::from_utf8_lossy(&line[..end]).into_owned());
            if self.output.len() > OUTPUT_LINES {
                self.output.pop_front();
            }
        }
    }

    /// The last `count` output lines, oldest first.
    pub fn output_tail(&self, count: usize) -> impl Iterator<Item = &str> {
        let skip = self.output.len().saturating_sub(count);
        self.output.iter().skip(skip).map(String::as_str)
    }

    /// Printed output as text.
    pub fn output_text(&self) -> String {
        self.output.iter().map(|l| format!("{}\n", l)).collect()
    }

    /// Disassembly from the start of the program through a window around PC.
    ///
    /// Decoding runs from address 0 so instruction boundaries line up.
    /// Each entry is (address, text, is_current).
    pub fn get_disassembly(&self, lines: usize) -> Vec<(usize, String, bool)> {
        let pc = self.cpu.regs.pc;
        let mem = self.cpu.mem.as_slice();

        let mut all = Vec::new();
        let mut addr = 0;
        while addr < MEMORY_SIZE {
            let (text, len) = disassemble_at(mem, addr);
            all.push((addr, text, addr == pc));
            addr += len.max(1);
        }

        let current = all.iter().position(|(_, _, cur)| *cur).unwrap_or(0);
        let start = current.saturating_sub(lines / 2);
        all.into_iter().skip(start).take(lines).collect()
    }
}

/// Run the debugger with a program.
pub fn run_debugger(program: Vec<u8>) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create app
    let mut app = DebuggerApp::new(program);

    // Main loop
    loop {
        // Draw
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        // Handle input
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Up => app.scroll_memory(false),
                        KeyCode::Down => app.scroll_memory(true),
                        _ => {}
                    }
                }
            }
        }

        // Tick for continuous running
        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
