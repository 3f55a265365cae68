use padseq::shared::DisplayState;
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Paragraph};

use super::grid::{draw_pad_grid, draw_step_row};
use super::mode::TuiState;

const HELP: &str = "space play/stop  bksp stop all  -/= tempo  n new  m next  del delete  D/H double/halve  ,/. shift  [/] swing  {/} humanize  0 clear  t write  p page  X unload  g seq  tab accent  esc quit";

pub fn render(frame: &mut Frame, area: Rect, state: &DisplayState, ts: &TuiState) {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4), // status screen
            Constraint::Length(3), // step row
            Constraint::Min(12),   // pads
            Constraint::Length(1), // help
        ])
        .split(area);

    draw_screen(frame, sections[0], state, ts);
    draw_step_row(frame, sections[1], &state.selected_steps, state.playing_step);
    draw_pad_grid(frame, sections[2], &state.pads_lit, &state.pads_loaded);
    frame.render_widget(Paragraph::new(HELP).style(Style::default().fg(Color::DarkGray)), sections[3]);
}

fn draw_screen(frame: &mut Frame, area: Rect, state: &DisplayState, ts: &TuiState) {
    let transport = if state.playing { "▶ playing" } else { "■ stopped" };
    let seq = if state.sequencing { "seq on" } else { "seq off" };
    let position = match state.pattern_index {
        Some((i, n)) => format!("{}/{}", i + 1, n),
        None => "-".into(),
    };
    let edit = if ts.write_mode { format!("  write p{}", ts.page + 1) } else { String::new() };
    let lines = vec![
        Line::from(format!(
            "{transport}  {:.1} bpm  {seq}  pattern {position} \"{}\" ({} steps)",
            state.bpm, state.pattern_name, state.step_count
        )),
        Line::from(format!(
            "note {}{edit}  swing {:.0}%  humanize {:.0}%  {}",
            state.selected_note.0, state.swing, state.humanize, state.status
        )),
    ];
    frame.render_widget(Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("padseq")), area);
}
