//! LS-8 Emulator - CLI Entry Point
//!
//! Commands:
//! - `ls8-emu run <program>` - Run an `.ls8` or `.asm` file
//! - `ls8-emu debug <program>` - Interactive debugger
//! - `ls8-emu asm <source>` - Assemble to `.ls8`
//! - `ls8-emu disasm <program>` - Disassemble an `.ls8` file

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ls8-emu")]
#[command(version)]
#[command(about = "An emulator of the LS-8, a small 8-bit teaching computer")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the .ls8 or .asm file to execute
        program: String,
        /// Stop after this many instructions (default: run until HLT)
        #[arg(short, long)]
        max_cycles: Option<u64>,
        /// Print a trace line to stderr before each instruction
        #[arg(short, long)]
        trace: bool,
        /// Print the final machine state as JSON to stderr
        #[arg(long)]
        dump_state: bool,
    },
    /// Interactive debugger
    Debug {
        /// Path to the .ls8 or .asm file to debug
        program: String,
    },
    /// Assemble source to .ls8
    Asm {
        /// Path to the source file
        source: String,
        /// Output .ls8 file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble an .ls8 file to readable text
    Disasm {
        /// Path to the .ls8 file
        program: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run { program, max_cycles, trace, dump_state } => {
            run_program(&program, max_cycles, trace, dump_state)
        }
        Commands::Debug { program } => debug_program(&program),
        Commands::Asm { source, output } => assemble_file(&source, output),
        Commands::Disasm { program } => disassemble_file(&program),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("ls8-emu: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Read a program as machine code, assembling `.asm` sources on the way.
fn read_program(path: &str) -> Result<Vec<u8>, String> {
    use ls8::{assemble, load_program};

    if path.ends_with(".asm") {
        let source = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path, e))?;
        let bytes = assemble(&source).map_err(|e| format!("assembly error: {}", e))?;
        tracing::debug!(path, bytes = bytes.len(), "assembled");
        Ok(bytes)
    } else {
        let program = load_program(path).map_err(|e| format!("failed to load {}: {}", path, e))?;
        Ok(program.bytes)
    }
}

fn run_program(path: &str, max_cycles: Option<u64>, trace: bool, dump_state: bool) -> Result<(), String> {
    use ls8::Cpu;
    use std::io::Write;

    let bytes = read_program(path)?;
    if bytes.is_empty() {
        return Err(format!("{}: no instructions to execute", path));
    }

    // Create CPU and load program
    let mut cpu = Cpu::new();
    cpu.load_program(&bytes)
        .map_err(|e| format!("failed to load program: {}", e))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let limit = max_cycles.unwrap_or(u64::MAX);

    let result = loop {
        if !cpu.is_running() || cpu.cycles >= limit {
            break Ok(());
        }
        if trace {
            eprintln!("{}", cpu.trace());
        }
        if let Err(e) = cpu.step(&mut out) {
            break Err(e);
        }
    };
    out.flush().map_err(|e| e.to_string())?;

    if dump_state {
        let json = cpu.snapshot_json().map_err(|e| e.to_string())?;
        eprintln!("{}", json);
    }

    match result {
        Ok(()) if cpu.is_halted() => Ok(()),
        Ok(()) => Err(format!("reached max cycles limit ({}) without HLT", limit)),
        Err(e) => Err(format!("CPU error at PC={:02X}: {}", cpu.regs.pc, e)),
    }
}

#[cfg(feature = "tui")]
fn debug_program(path: &str) -> Result<(), String> {
    let bytes = read_program(path)?;
    ls8::run_debugger(bytes).map_err(|e| format!("debugger error: {}", e))
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: &str) -> Result<(), String> {
    Err("debugger not available: built without the `tui` feature".into())
}

fn assemble_file(source_path: &str, output: Option<String>) -> Result<(), String> {
    use ls8::{assemble, save_program};

    let out_path = output.unwrap_or_else(|| {
        source_path.strip_suffix(".asm").unwrap_or(source_path).to_string() + ".ls8"
    });

    let source = std::fs::read_to_string(source_path)
        .map_err(|e| format!("failed to read {}: {}", source_path, e))?;
    let bytes = assemble(&source).map_err(|e| format!("assembly error: {}", e))?;

    save_program(&out_path, &bytes).map_err(|e| format!("failed to save {}: {}", out_path, e))?;

    println!("Assembled {} bytes: {} -> {}", bytes.len(), source_path, out_path);
    Ok(())
}

fn disassemble_file(path: &str) -> Result<(), String> {
    use ls8::disassemble;

    let bytes = read_program(path)?;
    print!("{}", disassemble(&bytes));
    Ok(())
}
