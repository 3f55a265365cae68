use padseq::shared::NUM_PADS;
use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

const COLS: usize = 4;
const ROWS: usize = 4;

const PAD_LABELS: [&str; NUM_PADS] = [
    "1", "2", "3", "4",
    "Q", "W", "E", "R",
    "A", "S", "D", "F",
    "Z", "X", "C", "V",
];

pub fn draw_pad_grid(frame: &mut Frame, area: Rect, lit: &[bool; NUM_PADS], loaded: &[bool; NUM_PADS]) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Ratio(1, ROWS as u32); ROWS])
        .split(area);

    for (row_idx, row_area) in rows.iter().enumerate() {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(1, COLS as u32); COLS])
            .split(*row_area);

        for (col_idx, cell_area) in cols.iter().enumerate() {
            let pad = row_idx * COLS + col_idx;
            let style = if lit[pad] {
                Style::default().fg(Color::Black).bg(Color::LightGreen)
            } else if loaded[pad] {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            let block = Block::default().borders(Borders::ALL).border_style(style);
            let label = Paragraph::new(PAD_LABELS[pad]).alignment(Alignment::Center).style(style).block(block);
            frame.render_widget(label, *cell_area);
        }
    }
}

// One cell per step of the selected note; the playing step is inverted.
pub fn draw_step_row(frame: &mut Frame, area: Rect, steps: &[bool], playing: Option<usize>) {
    let spans: Vec<Span> = steps
        .iter()
        .enumerate()
        .flat_map(|(i, &on)| {
            let mut style = if on { Style::default().fg(Color::Yellow) } else { Style::default().fg(Color::DarkGray) };
            if playing == Some(i) {
                style = style.add_modifier(Modifier::REVERSED);
            }
            let gap = if i > 0 && i % 4 == 0 { " " } else { "" };
            [Span::raw(gap), Span::styled(if on { "■" } else { "·" }, style)]
        })
        .collect();
    let row = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL).title("steps"));
    frame.render_widget(row, area);
}
