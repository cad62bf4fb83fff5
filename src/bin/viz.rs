/// gpusim-atomics live visualizer: attach to any running simulation at any time.
///
/// Run in a separate terminal:
///   cargo run --bin viz
///
/// Polls /tmp/gpusim_atomics_live.json every 200ms and renders a live TUI dashboard:
///
///     ┌ header: kernel / mode / arch / element kind / status ──────┐
///     │ SM heatmap (blocks per SM)    │ Atomics: reduction, pairs … │
///     │ q/esc: quit  …footer…                                      │
///
/// Press q or Esc to quit. The simulation keeps running unaffected.
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use gpusim_atomics::metrics::{read_metrics, LiveMetrics};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame, Terminal,
};
use std::{io, time::Duration};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let metrics = read_metrics();
        terminal.draw(|f| render(f, metrics.as_ref()))?;

        // Non-blocking: poll for 200ms, then redraw regardless
        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                if matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                    break;
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Top-level layout
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, metrics: Option<&LiveMetrics>) {
    let area = f.area();

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // heatmap + stats
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, rows[0], metrics);

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(rows[1]);

    render_heatmap(f, cols[0], metrics);
    render_stats(f, cols[1], metrics);
    render_footer(f, rows[2]);
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

fn render_header(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default()
        .title(Span::styled(
            " ⚡ gpusim-atomics live monitor ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let (name, mode, arch, kind, status) = metrics
        .map(|m| {
            (
                m.kernel_name.as_str(),
                m.mode.as_str(),
                m.arch.as_str(),
                m.element_kind.as_str(),
                m.status.as_str(),
            )
        })
        .unwrap_or(("-", "-", "-", "-", "idle"));

    let status_color = match status {
        "running" => Color::Green,
        "complete" => Color::Cyan,
        "failed" => Color::Red,
        _ => Color::DarkGray,
    };

    let spans = vec![
        Span::styled("  kernel: ", Style::default().fg(Color::DarkGray)),
        Span::styled(name, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::styled("   mode: ", Style::default().fg(Color::DarkGray)),
        Span::styled(mode, Style::default().fg(Color::Cyan)),
        Span::styled("   arch: ", Style::default().fg(Color::DarkGray)),
        Span::styled(arch, Style::default().fg(Color::Yellow)),
        Span::styled("   dtype: ", Style::default().fg(Color::DarkGray)),
        Span::styled(kind, Style::default().fg(Color::Magenta)),
        Span::styled("   status: ", Style::default().fg(Color::DarkGray)),
        Span::styled(
            status.to_uppercase(),
            Style::default().fg(status_color).add_modifier(Modifier::BOLD),
        ),
    ];

    f.render_widget(Paragraph::new(Line::from(spans)), inner);
}

// ---------------------------------------------------------------------------
// SM heatmap
// ---------------------------------------------------------------------------

fn render_heatmap(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default().title(" SM Utilization ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let sm_blocks: Vec<u32> = metrics
        .map(|m| m.sm_active_blocks.clone())
        .unwrap_or_else(|| vec![0u32; 132]);
    let busiest = sm_blocks.iter().copied().max().unwrap_or(0).max(1);

    // Fit as many SMs per row as the panel width allows (each SM = 2 chars + 1 space)
    let sms_per_row = ((inner.width as usize).saturating_sub(1) / 3).max(1);

    let legend = Line::from(vec![
        Span::styled("██", Style::default().fg(Color::Green)),
        Span::raw(" busiest   "),
        Span::styled("▓▓", Style::default().fg(Color::Yellow)),
        Span::raw(" some blocks   "),
        Span::styled("░░", Style::default().fg(Color::DarkGray)),
        Span::raw(" idle"),
    ]);

    let mut lines: Vec<Line> = vec![legend, Line::raw("")];

    for row in sm_blocks.chunks(sms_per_row) {
        let spans: Vec<Span> = row
            .iter()
            .flat_map(|&blocks| {
                let (symbol, color) = if blocks == 0 {
                    ("░░", Color::DarkGray)
                } else if blocks * 2 >= busiest {
                    ("██", Color::Green)
                } else {
                    ("▓▓", Color::Yellow)
                };
                vec![Span::styled(symbol, Style::default().fg(color)), Span::raw(" ")]
            })
            .collect();
        lines.push(Line::from(spans));
    }

    let active_count = sm_blocks.iter().filter(|&&b| b > 0).count();
    lines.push(Line::raw(""));
    lines.push(Line::from(vec![Span::styled(
        format!("  {}/{} SMs ran blocks", active_count, sm_blocks.len()),
        Style::default().fg(Color::DarkGray),
    )]));

    f.render_widget(Paragraph::new(lines), inner);
}

// ---------------------------------------------------------------------------
// Atomic traffic panel
// ---------------------------------------------------------------------------

fn render_stats(f: &mut Frame, area: Rect, metrics: Option<&LiveMetrics>) {
    let block = Block::default().title(" Atomics ").borders(Borders::ALL);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2), // blocks gauge
            Constraint::Length(1), // spacer
            Constraint::Length(2), // atomics saved gauge
            Constraint::Length(1), // spacer
            Constraint::Min(0),    // text stats
        ])
        .split(inner);

    let Some(m) = metrics else {
        let msg = Paragraph::new(vec![
            Line::raw(""),
            Line::from(Span::styled(
                "  No simulation running.",
                Style::default().fg(Color::DarkGray),
            )),
            Line::from(Span::styled(
                "  Start gpusim-atomics to see live data.",
                Style::default().fg(Color::DarkGray),
            )),
        ]);
        f.render_widget(msg, inner);
        return;
    };

    let blk_pct = if m.blocks_total > 0 {
        ((m.blocks_executed as f32 / m.blocks_total as f32) * 100.0) as u16
    } else {
        0
    };
    let blk_gauge = Gauge::default()
        .block(Block::default().title("Blocks"))
        .gauge_style(Style::default().fg(Color::Blue))
        .percent(blk_pct.min(100))
        .label(format!("{} / {}", m.blocks_executed, m.blocks_total));
    f.render_widget(blk_gauge, rows[0]);

    // Share of contributions that did not need an atomic of their own
    let issued = m.atomics.atomics_issued();
    let saved_pct = if m.contributions > 0 {
        (100.0 * (1.0 - issued as f64 / m.contributions as f64)).clamp(0.0, 100.0)
    } else {
        0.0
    };
    let saved_color = match saved_pct as u16 {
        0..=10 => Color::Red,
        11..=50 => Color::Yellow,
        _ => Color::Green,
    };
    let saved_gauge = Gauge::default()
        .block(Block::default().title("Atomics saved"))
        .gauge_style(Style::default().fg(saved_color))
        .percent(saved_pct as u16)
        .label(format!("{:.1}%  ({:.2}x reduction)", saved_pct, m.reduction_ratio()));
    f.render_widget(saved_gauge, rows[2]);

    let stat = |label: &'static str, value: String| {
        Line::from(vec![
            Span::styled(label, Style::default().fg(Color::DarkGray)),
            Span::raw(value),
        ])
    };

    let text = vec![
        stat("Contributions: ", m.contributions.to_string()),
        stat("Atomics:       ", issued.to_string()),
        stat("  paired:      ", m.atomics.pair_atomics.to_string()),
        stat("  plain:       ", m.atomics.plain_atomics.to_string()),
        stat("CAS retries:   ", m.atomics.cas_retries.to_string()),
        stat("Lanes folded:  ", m.atomics.lanes_folded.to_string()),
        stat("Coalesced:     ", m.atomics.coalesced_pairs.to_string()),
        Line::raw(""),
        Line::from(vec![
            Span::styled("Pair backend:  ", Style::default().fg(Color::DarkGray)),
            Span::styled(m.pair_backend.clone(), Style::default().fg(Color::Yellow)),
        ]),
        stat("Warp size:     ", m.warp_size.to_string()),
        stat("Numel:         ", m.numel.to_string()),
        stat("Grid:          ", format!("({},{},{})", m.grid[0], m.grid[1], m.grid[2])),
        stat("Block:         ", format!("({},{},{})", m.block[0], m.block[1], m.block[2])),
    ];
    f.render_widget(Paragraph::new(text), rows[4]);
}

// ---------------------------------------------------------------------------
// Footer
// ---------------------------------------------------------------------------

fn render_footer(f: &mut Frame, area: Rect) {
    let text = Paragraph::new(Span::styled(
        "  q / esc: quit    auto-refreshes every 200ms    reads /tmp/gpusim_atomics_live.json",
        Style::default().fg(Color::DarkGray),
    ));
    f.render_widget(text, area);
}
