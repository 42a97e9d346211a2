//! TUI debugger for the LS-8 emulator.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register and flag visualization
//! - Hex memory view with PC and SP highlighted
//! - Step/run/breakpoint controls
//! - Disassembly view and captured PRN output

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
