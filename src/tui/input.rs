use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use padseq::shared::{InputEvent, Note, PadEvent};

use super::mode::TuiState;

const TEMPO_STEP: f64 = 1.0;
const TEMPO_JUMP: f64 = 10.0;
const GROOVE_STEP: f32 = 5.0;

// Waits up to `timeout` for a key and resolves it into input events.
pub fn poll_input(timeout: Duration, ts: &mut TuiState) -> anyhow::Result<Vec<InputEvent>> {
    if !event::poll(timeout)? {
        return Ok(vec![]);
    }
    if let Event::Key(key) = event::read()? {
        // pads are one-shots, releases and repeats don't matter
        if key.kind != KeyEventKind::Press {
            return Ok(vec![]);
        }
        return Ok(handle_key(key.code, ts));
    }
    Ok(vec![])
}

pub fn handle_key(code: KeyCode, ts: &mut TuiState) -> Vec<InputEvent> {
    let event = match code {
        KeyCode::Esc => InputEvent::Quit,
        KeyCode::Char(' ') => InputEvent::PlayPress,
        KeyCode::Backspace => InputEvent::StopAll,
        KeyCode::Tab => {
            ts.accent = !ts.accent;
            return vec![];
        }
        KeyCode::Char(c) if ts.write_mode && char_to_pad(c).is_some() => {
            let Some(pad) = char_to_pad(c) else {
                return vec![];
            };
            InputEvent::ToggleStep { step: ts.step_for_pad(pad), velocity: ts.velocity() }
        }
        KeyCode::Char(c) if char_to_pad(c).is_some() => {
            let Some(note) = char_to_pad(c).and_then(Note::from_pad) else {
                return vec![];
            };
            InputEvent::Pad(PadEvent { note, velocity: ts.velocity(), pressed: true })
        }
        KeyCode::Char('t') => {
            ts.write_mode = !ts.write_mode;
            return vec![];
        }
        KeyCode::Char('p') => {
            ts.next_page();
            return vec![];
        }
        KeyCode::Char('X') => InputEvent::RemoveSample,
        KeyCode::Char('g') => InputEvent::ToggleSequencing,
        KeyCode::Char('-') => InputEvent::TempoNudge(-TEMPO_STEP),
        KeyCode::Char('=') => InputEvent::TempoNudge(TEMPO_STEP),
        KeyCode::Char('_') => InputEvent::TempoNudge(-TEMPO_JUMP),
        KeyCode::Char('+') => InputEvent::TempoNudge(TEMPO_JUMP),
        KeyCode::Char('n') => InputEvent::NewPattern,
        KeyCode::Char('m') => InputEvent::NextPattern,
        KeyCode::Delete => InputEvent::DeletePattern,
        KeyCode::Char('D') => InputEvent::DoublePattern,
        KeyCode::Char('H') => InputEvent::HalvePattern,
        KeyCode::Char(',') => InputEvent::ShiftPattern(-1),
        KeyCode::Char('.') => InputEvent::ShiftPattern(1),
        KeyCode::Char('[') => InputEvent::SwingNudge(-GROOVE_STEP),
        KeyCode::Char(']') => InputEvent::SwingNudge(GROOVE_STEP),
        KeyCode::Char('{') => InputEvent::HumanizeNudge(-GROOVE_STEP),
        KeyCode::Char('}') => InputEvent::HumanizeNudge(GROOVE_STEP),
        KeyCode::Char('0') => InputEvent::ClearNote,
        _ => return vec![],
    };
    vec![event]
}

// Same 4x4 layout as the hardware grid, see shared.rs.
fn char_to_pad(c: char) -> Option<usize> {
    let idx = match c {
        '1' => 0, '2' => 1, '3' => 2, '4' => 3,
        'q' => 4, 'w' => 5, 'e' => 6, 'r' => 7,
        'a' => 8, 's' => 9, 'd' => 10, 'f' => 11,
        'z' => 12, 'x' => 13, 'c' => 14, 'v' => 15,
        _ => return None,
    };
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_keys_are_pads() {
        let mut ts = TuiState::default();
        let events = handle_key(KeyCode::Char('z'), &mut ts);
        assert_eq!(
            events,
            vec![InputEvent::Pad(PadEvent { note: Note(36), velocity: 0.6, pressed: true })]
        );
    }

    #[test]
    fn tab_toggles_accent() {
        let mut ts = TuiState::default();
        assert!(handle_key(KeyCode::Tab, &mut ts).is_empty());
        let events = handle_key(KeyCode::Char('1'), &mut ts);
        assert_eq!(
            events,
            vec![InputEvent::Pad(PadEvent { note: Note(48), velocity: 1.0, pressed: true })]
        );
    }

    #[test]
    fn transport_keys() {
        let mut ts = TuiState::default();
        assert_eq!(handle_key(KeyCode::Char(' '), &mut ts), vec![InputEvent::PlayPress]);
        assert_eq!(handle_key(KeyCode::Esc, &mut ts), vec![InputEvent::Quit]);
        assert_eq!(handle_key(KeyCode::Char('+'), &mut ts), vec![InputEvent::TempoNudge(10.0)]);
        assert!(handle_key(KeyCode::Char('k'), &mut ts).is_empty());
    }

    #[test]
    fn write_mode_turns_grid_keys_into_step_edits() {
        let mut ts = TuiState::default();
        assert!(handle_key(KeyCode::Char('t'), &mut ts).is_empty());
        assert_eq!(
            handle_key(KeyCode::Char('2'), &mut ts),
            vec![InputEvent::ToggleStep { step: 1, velocity: 0.6 }]
        );

        // second page of steps
        handle_key(KeyCode::Char('p'), &mut ts);
        assert_eq!(
            handle_key(KeyCode::Char('2'), &mut ts),
            vec![InputEvent::ToggleStep { step: 17, velocity: 0.6 }]
        );

        handle_key(KeyCode::Char('t'), &mut ts);
        let events = handle_key(KeyCode::Char('2'), &mut ts);
        assert!(matches!(events.as_slice(), [InputEvent::Pad(_)]));
    }

    #[test]
    fn pages_wrap_after_the_longest_pattern() {
        let mut ts = TuiState::default();
        for _ in 0..4 {
            ts.next_page();
        }
        assert_eq!(ts.page, 0);
    }
}
