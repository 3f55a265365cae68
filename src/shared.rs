// Types shared between the core, the host loop and the terminal front end.
//
// Pad layout on the keyboard (same as the hardware grid):
//   1 2 3 4       //  pads 0-3   -> notes 48-51
//   q w e r       //  pads 4-7   -> notes 44-47
//   a s d f       //  pads 8-11  -> notes 40-43
//   z x c v       //  pads 12-15 -> notes 36-39
//
// Bottom-left pad is note 36 like most MPC-style controllers.

pub const NUM_PADS: usize = 16;
pub const FIRST_PAD_NOTE: u8 = 36;

pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 240.0;
pub const DEFAULT_BPM: f64 = 120.0;

pub const MIN_STEPS: usize = 4;
pub const MAX_STEPS: usize = 64;
pub const DEFAULT_STEPS: usize = 32;

/// A MIDI note number identifying one pad/sound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Note(pub u8);

impl Note {
    /// Pad index (0 = top-left) to note, following the grid above.
    pub fn from_pad(pad: usize) -> Option<Self> {
        if pad >= NUM_PADS {
            return None;
        }
        let row = pad / 4;
        let col = pad % 4;
        Some(Note(FIRST_PAD_NOTE + ((3 - row) * 4 + col) as u8))
    }

    pub fn pad(self) -> Option<usize> {
        let offset = self.0.checked_sub(FIRST_PAD_NOTE)? as usize;
        if offset >= NUM_PADS {
            return None;
        }
        let row = 3 - offset / 4;
        Some(row * 4 + offset % 4)
    }
}

/// One discrete press or release from a pad controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PadEvent {
    pub note: Note,
    pub velocity: f32, // 0.0..=1.0
    pub pressed: bool,
}

/// Colours the pad controller can show. Values are the note-on velocities
/// most grid controllers map to these colours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedColor {
    Off,
    Dim,
    Green,
    Amber,
    Red,
}

impl LedColor {
    pub fn velocity(self) -> u8 {
        match self {
            LedColor::Off => 0,
            LedColor::Dim => 1,
            LedColor::Green => 21,
            LedColor::Amber => 9,
            LedColor::Red => 5,
        }
    }
}

/// Visual feedback produced by the core. The front end decides how to draw it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VisualEvent {
    Pad { note: Note, active: bool },
    Step(usize),
}

/// Where visual feedback ends up (terminal, LEDs, both).
pub trait VisualSink {
    fn pad(&mut self, note: Note, active: bool);
    fn step(&mut self, step: usize);
}

/// Outbound LED updates to a pad controller, one note per call.
pub trait LedSink {
    fn set_led(&mut self, note: Note, color: LedColor);
}

/// Semantic input resolved by the front end.
#[derive(Clone, Debug, PartialEq)]
pub enum InputEvent {
    Pad(PadEvent),
    PlayPress,
    StopAll,
    ToggleSequencing,
    TempoNudge(f64),
    NewPattern,
    NextPattern,
    DeletePattern,
    DoublePattern,
    HalvePattern,
    ShiftPattern(i32),
    SwingNudge(f32),
    HumanizeNudge(f32),
    ClearNote,
    /// Flips one cell of the selected note's track.
    ToggleStep { step: usize, velocity: f32 },
    /// Takes the sound off the selected pad.
    RemoveSample,
    Quit,
}

/// Snapshot the terminal view renders each frame.
#[derive(Clone, Debug)]
pub struct DisplayState {
    pub pads_lit: [bool; NUM_PADS],
    pub pads_loaded: [bool; NUM_PADS],
    pub playing: bool,
    pub sequencing: bool,
    pub playing_step: Option<usize>,
    pub step_count: usize,
    pub selected_note: Note,
    pub selected_steps: Vec<bool>,
    pub bpm: f64,
    pub swing: f32,
    pub humanize: f32,
    pub pattern_name: String,
    pub pattern_index: Option<(usize, usize)>,
    pub status: String,
}
