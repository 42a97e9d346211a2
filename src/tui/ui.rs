//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem},
    style::{Color, Style, Modifier},
};
use crate::Flag;
use super::app::{DebuggerApp, ROW_BYTES};
use crate::cpu::memory::MEMORY_SIZE;

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(45),
            Constraint::Percentage(55),
        ])
        .split(frame.area());

    // Left side: code and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(7),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_status(frame, left_chunks[2], app);

    // Right side: memory, output and help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(8),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_memory(frame, right_chunks[0], app);
    draw_output(frame, right_chunks[1], app);
    draw_help(frame, right_chunks[2]);
}

/// Draw disassembly view.
fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|(addr, instr, is_current)| {
            let prefix = if *is_current { "▶ " } else { "  " };
            let bp = if app.breakpoints.contains(addr) { "●" } else { " " };
            let text = format!("{}{:02X}: {}", prefix, addr, instr);

            let style = if *is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if app.breakpoints.contains(addr) {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(format!("{} {}", bp, text)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

/// Draw register state.
fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let regs = app.cpu.regs.all();
    let reg_line = |range: std::ops::Range<usize>| {
        Line::from(
            range
                .flat_map(|i| {
                    vec![
                        Span::raw(format!("R{}: ", i)),
                        Span::styled(format!("{:02X}", regs[i]), Style::default().fg(Color::White)),
                        Span::raw(format!(" ({:>3})  ", regs[i])),
                    ]
                })
                .collect::<Vec<_>>(),
        )
    };

    let content = vec![
        reg_line(0..4),
        reg_line(4..8),
        Line::from(vec![
            Span::raw("PC: "),
            Span::styled(format!("{:02X}", app.cpu.regs.pc), Style::default().fg(Color::Yellow)),
            Span::raw("   SP: "),
            Span::styled(format!("{:02X}", app.cpu.regs.sp()), Style::default().fg(Color::Magenta)),
            Span::raw("   FL: "),
            Span::styled(flag_text(app.cpu.regs.fl), flag_style(app.cpu.regs.fl)),
        ]),
        Line::from(vec![
            Span::raw("Cycles: "),
            Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
            Span::raw("   State: "),
            Span::styled(format!("{:?}", app.cpu.state),
                if app.cpu.is_running() {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default().fg(Color::Red)
                }),
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Draw memory view as a hex dump, highlighting PC and SP.
fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let start_row = app.mem_scroll;
    let end_row = (start_row + visible_rows).min(MEMORY_SIZE / ROW_BYTES);
    let pc = app.cpu.regs.pc;
    let sp = app.cpu.regs.sp() as usize;

    let items: Vec<ListItem> = (start_row..end_row)
        .map(|row| {
            let base = row * ROW_BYTES;
            let mut spans = vec![Span::styled(format!("{:02X}:", base), Style::default().fg(Color::DarkGray))];

            for (addr, value) in app.cpu.mem.dump(base, ROW_BYTES) {
                let style = if addr == pc {
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
                } else if addr == sp {
                    Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD)
                } else if value != 0 {
                    Style::default().fg(Color::White)
                } else {
                    Style::default().fg(Color::DarkGray)
                };
                spans.push(Span::styled(format!(" {:02X}", value), style));
            }

            ListItem::new(Line::from(spans))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Memory ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

/// Draw the tail of the PRN output.
fn draw_output(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible = (area.height as usize).saturating_sub(2);
    let lines: Vec<Line> = app
        .output_tail(visible)
        .map(|l| Line::from(l.to_string()))
        .collect();

    let output = Paragraph::new(lines)
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Output ")
            .borders(Borders::ALL));

    frame.render_widget(output, area);
}

/// Draw status bar.
fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

/// Draw help panel.
fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint"),
        Line::from("x: Reset  ↑↓: Scroll memory  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}

fn flag_text(fl: Option<Flag>) -> String {
    match fl {
        Some(Flag::Equal) => "E".into(),
        Some(Flag::Less) => "L".into(),
        Some(Flag::Greater) => "G".into(),
        None => "-".into(),
    }
}

/// Get color style for the flag register.
fn flag_style(fl: Option<Flag>) -> Style {
    match fl {
        Some(Flag::Less) => Style::default().fg(Color::Red),
        Some(Flag::Equal) => Style::default().fg(Color::Gray),
        Some(Flag::Greater) => Style::default().fg(Color::Green),
        None => Style::default().fg(Color::DarkGray),
    }
}
