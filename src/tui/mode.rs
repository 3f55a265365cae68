use padseq::shared::{MAX_STEPS, NUM_PADS};

// Keyboard-only state. A computer keyboard can't sense how hard a key was
// hit, so pads play at one of two fixed velocities; Tab flips between them.
// In write mode the grid keys edit steps of the selected note instead, one
// page of 16 steps at a time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TuiState {
    pub accent: bool,
    pub soft_velocity: f32,
    pub write_mode: bool,
    pub page: usize,
}

impl Default for TuiState {
    fn default() -> Self {
        Self { accent: false, soft_velocity: 0.6, write_mode: false, page: 0 }
    }
}

impl TuiState {
    pub fn velocity(&self) -> f32 {
        if self.accent { 1.0 } else { self.soft_velocity }
    }

    pub fn next_page(&mut self) {
        self.page = (self.page + 1) % (MAX_STEPS / NUM_PADS);
    }

    pub fn step_for_pad(&self, pad: usize) -> usize {
        self.page * NUM_PADS + pad
    }
}
