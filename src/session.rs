//! The running instrument.
//!
//! A `Session` owns exactly one of each core object (clock, pattern store,
//! dispatcher, trigger engine, sample bank) and routes typed events between
//! them. The host loop calls [`Session::tick`] whenever
//! [`Session::next_wake`] comes due and feeds input through
//! [`Session::handle_input`]; nothing in here sleeps or spawns.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::clock::{AudioClock, PrecisionClock, SchedulePass, StepEvent};
use crate::config::Config;
use crate::error::ClockError;
use crate::pipeline::persistence::{SampleRecord, SessionRecord};
use crate::pipeline::{Pattern, PatternStore, StepDispatcher};
use crate::samples::{SampleBank, SampleStore, SoundSlot, TrimRegion};
use crate::shared::{DisplayState, InputEvent, LedColor, LedSink, NUM_PADS, Note, PadEvent, VisualEvent, VisualSink};
use crate::trigger::{SoundTrigger, VoiceHandle, VoiceOutput};

pub struct Session<O: VoiceOutput> {
    audio: Arc<dyn AudioClock>,
    clock: PrecisionClock,
    store: PatternStore,
    dispatcher: StepDispatcher,
    trigger: SoundTrigger<O>,
    samples: SampleBank,
    leds: Option<Box<dyn LedSink>>,
    sinks: Vec<Box<dyn VisualSink>>,
    // filled by the clock's tick listener, drained in tick()
    ticks: Rc<RefCell<VecDeque<usize>>>,
    lit: BTreeSet<Note>,
    visual_step: Option<usize>,
    selected_note: Note,
    status: String,
    transport_down: bool,
}

impl<O: VoiceOutput> Session<O> {
    pub fn new(config: &Config, audio: Arc<dyn AudioClock>, output: O) -> Self {
        Self::with_dispatcher(config, audio, output, StepDispatcher::new(config.dispatch.clone()))
    }

    pub fn with_dispatcher(config: &Config, audio: Arc<dyn AudioClock>, output: O, dispatcher: StepDispatcher) -> Self {
        let mut clock = PrecisionClock::new(config.clock.clone(), Arc::clone(&audio));
        let ticks = Rc::new(RefCell::new(VecDeque::new()));
        let queue = Rc::clone(&ticks);
        clock.subscribe(move |event: StepEvent| queue.borrow_mut().push_back(event.step));

        Self {
            trigger: SoundTrigger::new(config.trigger.clone(), Arc::clone(&audio), output),
            store: PatternStore::new(&config.patterns),
            audio,
            clock,
            dispatcher,
            samples: SampleBank::new(),
            leds: None,
            sinks: Vec::new(),
            ticks,
            lit: BTreeSet::new(),
            visual_step: None,
            selected_note: Note(crate::shared::FIRST_PAD_NOTE),
            status: String::new(),
            transport_down: false,
        }
    }

    pub fn clock(&self) -> &PrecisionClock {
        &self.clock
    }

    pub fn store(&self) -> &PatternStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut PatternStore {
        &mut self.store
    }

    pub fn trigger(&self) -> &SoundTrigger<O> {
        &self.trigger
    }

    pub fn output(&self) -> &O {
        self.trigger.output()
    }

    pub fn samples(&self) -> &SampleBank {
        &self.samples
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_running()
    }

    pub fn selected_note(&self) -> Note {
        self.selected_note
    }

    pub fn set_led_sink(&mut self, leds: Box<dyn LedSink>) {
        self.leds = Some(leds);
        self.refresh_leds();
    }

    pub fn add_visual_sink(&mut self, sink: Box<dyn VisualSink>) {
        self.sinks.push(sink);
    }

    /// Puts a sound on `note`, returning the one it replaces so the caller
    /// can release its buffer.
    pub fn assign_sample(&mut self, note: Note, slot: SoundSlot) -> Option<SoundSlot> {
        self.trigger.stop(note);
        let previous = self.samples.assign(note, slot);
        self.update_led(note);
        previous
    }

    pub fn remove_sample(&mut self, note: Note) -> Option<SoundSlot> {
        self.trigger.stop(note);
        let previous = self.samples.remove(note);
        self.update_led(note);
        previous
    }

    pub fn set_trim(&mut self, note: Note, trim: TrimRegion) -> bool {
        self.samples.set_trim(note, trim)
    }

    /// Starts the sequencer from step 0. Makes a pattern first if there is none.
    pub fn play(&mut self) -> bool {
        if self.clock.is_running() {
            return true;
        }
        if self.store.is_empty() {
            self.store.create(None);
        }
        self.sync_step_count();
        match self.clock.start() {
            Ok(pass) => {
                self.transport_down = false;
                self.status = "playing".into();
                self.apply_pass(pass);
                true
            }
            Err(e) => {
                self.transport_failed(e);
                false
            }
        }
    }

    /// Stops the sequencer and every sounding voice.
    pub fn stop(&mut self) {
        self.clock.stop();
        self.trigger.stop_all();
        self.dispatcher.reset();
        self.ticks.borrow_mut().clear();
        self.visual_step = None;
        let lit: Vec<Note> = self.lit.iter().copied().collect();
        for note in lit {
            self.apply_visual(VisualEvent::Pad { note, active: false });
        }
        if !self.transport_down {
            self.status = "stopped".into();
        }
    }

    pub fn toggle_play(&mut self) {
        if self.clock.is_running() {
            self.stop();
        } else {
            self.play();
        }
    }

    /// Returns the tempo actually in effect after clamping.
    pub fn set_tempo(&mut self, bpm: f64) -> f64 {
        let pass = self.clock.set_tempo(bpm);
        self.apply_pass(pass);
        self.clock.tempo()
    }

    /// A pad struck live. Releases are ignored (sounds are one-shots).
    pub fn pad(&mut self, event: PadEvent) -> Option<VoiceHandle> {
        if !event.pressed {
            return None;
        }
        self.selected_note = event.note;
        let now = self.audio.now();
        let record_step = self.clock.is_running().then(|| self.clock.current_step());
        let (handle, visuals) = self.dispatcher.manual_trigger(
            event.note,
            event.velocity,
            now,
            record_step,
            &mut self.store,
            &self.samples,
            &mut self.trigger,
        );
        for v in visuals {
            self.apply_visual(v);
        }
        handle
    }

    pub fn handle_input(&mut self, event: InputEvent) {
        match event {
            InputEvent::Pad(pad) => {
                self.pad(pad);
            }
            InputEvent::PlayPress => self.toggle_play(),
            InputEvent::StopAll => self.stop(),
            InputEvent::ToggleSequencing => {
                let enabled = !self.dispatcher.is_enabled();
                self.dispatcher.set_enabled(enabled);
                self.status = if enabled { "sequencing on" } else { "sequencing off" }.into();
            }
            InputEvent::TempoNudge(delta) => {
                self.set_tempo(self.clock.tempo() + delta);
            }
            InputEvent::NewPattern => {
                self.store.create(None);
                self.sync_step_count();
            }
            InputEvent::NextPattern => {
                self.store.select_next();
                self.sync_step_count();
            }
            InputEvent::DeletePattern => {
                if let Some(id) = self.store.current_id() {
                    self.store.delete(id);
                    self.store.select_next();
                    self.sync_step_count();
                }
            }
            InputEvent::DoublePattern => self.edit_pattern(|p| {
                p.double();
            }),
            InputEvent::HalvePattern => self.edit_pattern(|p| {
                p.halve();
            }),
            InputEvent::ShiftPattern(amount) => self.edit_pattern(|p| p.shift(amount)),
            InputEvent::SwingNudge(delta) => self.edit_pattern(|p| p.set_swing(p.swing() + delta)),
            InputEvent::HumanizeNudge(delta) => self.edit_pattern(|p| p.set_humanize(p.humanize() + delta)),
            InputEvent::ClearNote => {
                let note = self.selected_note;
                self.edit_pattern(|p| {
                    p.clear_note(note);
                });
            }
            InputEvent::ToggleStep { step, velocity } => {
                let note = self.selected_note;
                self.edit_pattern(|p| {
                    p.toggle(note, step, velocity);
                });
            }
            InputEvent::RemoveSample => {
                self.remove_sample(self.selected_note);
            }
            InputEvent::Quit => {}
        }
    }

    /// Host timer entry point. Runs any due scheduling pass, collects voice
    /// completions and returns the visual changes that became due (they
    /// have already been pushed to the LED and visual sinks).
    pub fn tick(&mut self) -> Vec<VisualEvent> {
        match self.clock.poll() {
            Ok(pass) => self.apply_pass(pass),
            Err(e) => self.transport_failed(e),
        }

        let mut out = Vec::new();
        let last_tick = self.ticks.borrow_mut().drain(..).last();
        if let Some(step) = last_tick {
            out.push(VisualEvent::Step(step));
        }
        for completion in self.trigger.poll_completions() {
            out.extend(self.dispatcher.on_voice_completed(&completion));
        }
        out.extend(self.dispatcher.poll_visuals(self.audio.now(), &self.trigger));

        for v in &out {
            self.apply_visual(*v);
        }
        out
    }

    /// Audio-clock time of the next thing `tick` has to do.
    pub fn next_wake(&self) -> Option<f64> {
        match (self.clock.next_wake(), self.dispatcher.next_visual()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn now(&self) -> f64 {
        self.audio.now()
    }

    pub fn display_state(&self) -> DisplayState {
        let pattern = self.store.current();
        let step_count = pattern.map_or(self.clock.step_count(), Pattern::step_count);
        let selected_steps = match pattern {
            Some(p) => (0..step_count).map(|s| p.is_active(self.selected_note, s)).collect(),
            None => vec![false; step_count],
        };

        let mut pads_lit = [false; NUM_PADS];
        for pad in self.lit.iter().filter_map(|n| n.pad()) {
            pads_lit[pad] = true;
        }
        let pads_loaded = std::array::from_fn(|pad| Note::from_pad(pad).is_some_and(|n| self.samples.is_loaded(n)));

        DisplayState {
            pads_lit,
            pads_loaded,
            playing: self.clock.is_running(),
            sequencing: self.dispatcher.is_enabled(),
            playing_step: self.visual_step.filter(|_| self.clock.is_running()),
            step_count,
            selected_note: self.selected_note,
            selected_steps,
            bpm: self.clock.tempo(),
            swing: pattern.map_or(0.0, Pattern::swing),
            humanize: pattern.map_or(0.0, Pattern::humanize),
            pattern_name: pattern.map(|p| p.name.clone()).unwrap_or_default(),
            pattern_index: self.store.current_position(),
            status: self.status.clone(),
        }
    }

    pub fn to_record(&self) -> SessionRecord {
        let mut samples: Vec<SampleRecord> = self
            .samples
            .notes()
            .filter_map(|note| {
                let slot = self.samples.slot(note)?;
                Some(SampleRecord { note: note.0, path: slot.path.clone()?, trim: slot.trim })
            })
            .collect();
        samples.sort_by_key(|s| s.note);

        SessionRecord {
            patterns: self.store.records(),
            current: self.store.current_id().map(|id| id.to_string()),
            bpm: self.clock.tempo(),
            samples,
        }
    }

    /// Loads patterns and tempo from a saved session. The sample entries are
    /// handed back because decoding and registering them is the host's job.
    pub fn restore(&mut self, record: SessionRecord) -> Vec<SampleRecord> {
        self.stop();
        self.store.load_records(record.patterns, record.current.as_deref());
        self.clock.set_tempo(record.bpm);
        self.sync_step_count();
        info!(patterns = self.store.len(), bpm = self.clock.tempo(), "session restored");
        record.samples
    }

    fn apply_pass(&mut self, pass: SchedulePass) {
        if let Some(after) = pass.revoked_after {
            self.dispatcher.revoke_after(after, &mut self.trigger);
            // the audio clock went backwards: nothing from the old timeline plays
            if pass.drift.is_some_and(|d| d.expected > after) {
                let cancelled = self.trigger.cancel_from(after);
                self.dispatcher.drop_visuals_after(after);
                warn!(cancelled, "audio clock jumped back, old voices dropped");
                let idle: Vec<Note> = self.lit.iter().copied().filter(|n| !self.trigger.is_active(*n)).collect();
                for note in idle {
                    self.apply_visual(VisualEvent::Pad { note, active: false });
                }
            }
        }
        if let Some(drift) = pass.drift {
            self.status = format!("resynced after {:.0} ms drift", drift.deviation * 1000.0);
        }
        for event in pass.steps {
            self.dispatcher.on_step(event, &self.store, &self.samples, &mut self.trigger);
        }
    }

    // Reported once per outage; the clock and trigger engine stay inert
    // until a later play() succeeds.
    fn transport_failed(&mut self, e: ClockError) {
        if self.transport_down {
            warn!(error = %e, "transport still unavailable");
        } else {
            error!(error = %e, "transport unavailable");
        }
        self.transport_down = true;
        self.stop();
        self.status = format!("audio unavailable: {e}");
    }

    fn edit_pattern(&mut self, edit: impl FnOnce(&mut Pattern)) {
        if let Some(pattern) = self.store.current_mut() {
            edit(pattern);
        }
        self.sync_step_count();
    }

    fn sync_step_count(&mut self) {
        if let Some(pattern) = self.store.current() {
            self.clock.set_step_count(pattern.step_count());
        }
    }

    fn apply_visual(&mut self, event: VisualEvent) {
        match event {
            VisualEvent::Pad { note, active } => {
                if active {
                    self.lit.insert(note);
                } else {
                    self.lit.remove(&note);
                }
                self.update_led(note);
                for sink in &mut self.sinks {
                    sink.pad(note, active);
                }
            }
            VisualEvent::Step(step) => {
                self.visual_step = Some(step);
                for sink in &mut self.sinks {
                    sink.step(step);
                }
            }
        }
    }

    fn led_color(&self, note: Note) -> LedColor {
        if self.lit.contains(&note) {
            LedColor::Green
        } else if self.samples.is_loaded(note) {
            LedColor::Dim
        } else {
            LedColor::Off
        }
    }

    fn update_led(&mut self, note: Note) {
        let color = self.led_color(note);
        if let Some(leds) = self.leds.as_mut() {
            leds.set_led(note, color);
        }
    }

    fn refresh_leds(&mut self) {
        for note in (0..NUM_PADS).filter_map(Note::from_pad) {
            self.update_led(note);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleId;
    use crate::clock::ManualClock;
    use crate::testing::RecordingOutput;

    fn session() -> (Arc<ManualClock>, Session<RecordingOutput>) {
        let audio = Arc::new(ManualClock::new(0.0));
        let mut s = Session::new(&Config::default(), audio.clone(), RecordingOutput::default());
        s.assign_sample(
            Note(36),
            SoundSlot {
                sample_id: SampleId(1),
                frames: 48_000,
                sample_rate: 48_000,
                trim: TrimRegion::default(),
                path: Some("kick.wav".into()),
            },
        );
        s.store_mut().create(Some("beat"));
        (audio, s)
    }

    #[derive(Clone, Default)]
    struct Leds(Rc<RefCell<Vec<(Note, LedColor)>>>);

    impl LedSink for Leds {
        fn set_led(&mut self, note: Note, color: LedColor) {
            self.0.borrow_mut().push((note, color));
        }
    }

    #[test]
    fn unavailable_clock_is_reported_not_fatal() {
        let (audio, mut s) = session();
        audio.set_available(false);
        assert!(!s.play());
        assert!(!s.is_playing());
        assert!(s.status().starts_with("audio unavailable"));
    }

    #[test]
    fn sequenced_step_plays_with_latency_compensation() {
        let (_audio, mut s) = session();
        s.store_mut().record_note(Note(36), 0, 1.0);
        assert!(s.play());
        let started = &s.output().started;
        assert_eq!(started.len(), 1);
        assert!((started[0].start - 0.005).abs() < 1e-9);
    }

    #[test]
    fn live_hit_is_recorded_and_not_doubled_by_the_sequencer() {
        let (audio, mut s) = session();
        assert!(s.play());
        let step = s.clock().current_step();
        s.pad(PadEvent { note: Note(36), velocity: 0.7, pressed: true });
        assert!(s.store().current().unwrap().is_active(Note(36), step));

        audio.set(0.09);
        s.tick();
        assert_eq!(s.output().started.len(), 1);
    }

    #[test]
    fn tempo_jump_cancels_stale_voices() {
        let (audio, mut s) = session();
        for step in 0..4 {
            s.store_mut().record_note(Note(36), step, 1.0);
        }
        s.play();
        audio.set(0.09);
        s.tick();
        let stale = s.output().started.last().unwrap().voice;

        s.set_tempo(200.0);
        assert_eq!(s.output().cancelled, vec![stale]);
        let fresh = s.output().started.iter().find(|v| v.voice > stale).unwrap();
        assert!((fresh.start - 0.095).abs() < 1e-9);
    }

    #[test]
    fn audio_clock_jumping_back_keeps_the_beat_going() {
        let (audio, mut s) = session();
        let steps = s.store().current().unwrap().step_count();
        for step in 0..steps {
            s.store_mut().record_note(Note(36), step, 1.0);
        }
        audio.set(10.0);
        assert!(s.play());
        while audio.now() < 16.0 {
            audio.advance(0.005);
            s.tick();
        }
        let before = s.output().started.len();

        // device reset
        audio.set(0.5);
        while audio.now() < 1.5 {
            audio.advance(0.005);
            s.tick();
        }

        assert!(s.is_playing());
        assert!(s.status().starts_with("resynced"));
        assert!(!s.output().cancelled.is_empty());
        let fresh = &s.output().started[before..];
        assert!(fresh.len() >= 7);
        assert!(fresh.iter().all(|v| v.start > 0.5 && v.start < 1.7));
        // only the new timeline's voices are left on record
        assert_eq!(s.trigger().active_voice_count(), fresh.len());
    }

    #[test]
    fn step_edits_and_unloading_act_on_the_selected_pad() {
        let (_audio, mut s) = session();
        s.pad(PadEvent { note: Note(36), velocity: 1.0, pressed: true });
        s.handle_input(InputEvent::ToggleStep { step: 5, velocity: 0.8 });
        assert!(s.store().current().unwrap().is_active(Note(36), 5));
        s.handle_input(InputEvent::ToggleStep { step: 5, velocity: 0.8 });
        assert!(!s.store().current().unwrap().is_active(Note(36), 5));

        s.handle_input(InputEvent::RemoveSample);
        assert!(!s.samples().is_loaded(Note(36)));
        // the voice from the hit was faded out
        assert!(!s.output().stopped.is_empty());
    }

    #[test]
    fn stop_silences_and_clears_pads() {
        let (_audio, mut s) = session();
        s.play();
        s.pad(PadEvent { note: Note(36), velocity: 1.0, pressed: true });
        assert!(s.display_state().pads_lit.iter().any(|&lit| lit));

        s.stop();
        let state = s.display_state();
        assert!(!state.playing);
        assert!(state.pads_lit.iter().all(|&lit| !lit));
        assert!(!s.output().stopped.is_empty());
    }

    #[test]
    fn leds_follow_hits() {
        let (_audio, mut s) = session();
        let leds = Leds::default();
        s.set_led_sink(Box::new(leds.clone()));
        assert!(leds.0.borrow().contains(&(Note(36), LedColor::Dim)));

        leds.0.borrow_mut().clear();
        s.pad(PadEvent { note: Note(36), velocity: 1.0, pressed: true });
        assert_eq!(*leds.0.borrow(), vec![(Note(36), LedColor::Green)]);
    }

    #[test]
    fn record_restores_into_a_fresh_session() {
        let (_audio, mut s) = session();
        s.store_mut().record_note(Note(36), 3, 0.5);
        s.set_tempo(90.0);
        let record = s.to_record();
        assert_eq!(record.samples.len(), 1);

        let (_audio2, mut other) = session();
        let samples = other.restore(record.clone());
        assert_eq!(samples, record.samples);
        assert_eq!(other.clock().tempo(), 90.0);
        assert_eq!(other.store().current().unwrap().step(Note(36), 3).unwrap().velocity, 0.5);
        assert_eq!(other.to_record().patterns, record.patterns);
    }

    #[test]
    fn pattern_edits_follow_into_the_clock() {
        let (_audio, mut s) = session();
        s.handle_input(InputEvent::HalvePattern);
        assert_eq!(s.clock().step_count(), 16);
        s.handle_input(InputEvent::DoublePattern);
        assert_eq!(s.clock().step_count(), 32);
    }
}
