use std::collections::{HashSet, VecDeque};

use tracing::debug;

use super::pattern::Pattern;
use super::store::PatternStore;
use crate::audio_api::VoiceId;
use crate::clock::StepEvent;
use crate::config::DispatchConfig;
use crate::samples::SampleStore;
use crate::shared::{Note, VisualEvent};
use crate::trigger::{NoteTrigger, SoundTrigger, VoiceCompletion, VoiceHandle, VoiceOutput};

// Batches older than this can no longer be revoked.
const BATCH_MEMORY: f64 = 1.0;

/// Everything one step event turned into.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchedBatch {
    pub step: usize,
    pub time: f64,
    pub triggers: Vec<NoteTrigger>,
    pub voices: Vec<VoiceHandle>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Highlight {
    On,
    RevertCheck,
}

#[derive(Clone, Copy, Debug)]
struct PendingVisual {
    at: f64,
    note: Note,
    voice: Option<VoiceId>,
    kind: Highlight,
}

#[derive(Clone, Debug)]
struct ScheduledStep {
    time: f64,
    voices: Vec<VoiceId>,
}

/// Turns clock steps into note batches and pad highlights.
pub struct StepDispatcher {
    config: DispatchConfig,
    enabled: bool,
    manual: HashSet<Note>,
    manual_step: Option<usize>,
    rng: fastrand::Rng,
    visuals: VecDeque<PendingVisual>,
    scheduled: VecDeque<ScheduledStep>,
}

impl StepDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_rng(config, fastrand::Rng::new())
    }

    /// Seeded variant so humanize is reproducible.
    pub fn with_rng(config: DispatchConfig, rng: fastrand::Rng) -> Self {
        Self {
            config,
            enabled: true,
            manual: HashSet::new(),
            manual_step: None,
            rng,
            visuals: VecDeque::new(),
            scheduled: VecDeque::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn on_step<O: VoiceOutput>(
        &mut self,
        event: StepEvent,
        store: &PatternStore,
        samples: &dyn SampleStore,
        trigger: &mut SoundTrigger<O>,
    ) -> Option<DispatchedBatch> {
        if !self.enabled {
            return None;
        }
        let pattern = store.current()?;

        // marks only apply to the one pass of the step they were made for
        let played_live = if self.manual_step == Some(event.step) {
            std::mem::take(&mut self.manual)
        } else {
            self.manual.clear();
            HashSet::new()
        };
        self.manual_step = Some(event.step);

        let time = event.time + self.config.latency_compensation + self.groove_offset(event, pattern);
        let triggers: Vec<NoteTrigger> = pattern
            .active_notes(event.step)
            .into_iter()
            .filter(|(note, _)| !played_live.contains(note) && samples.is_loaded(*note))
            .map(|(note, velocity)| NoteTrigger { note, velocity, time })
            .collect();
        if triggers.is_empty() {
            return None;
        }

        let voices = trigger.trigger_batch(&triggers, samples);
        for v in &voices {
            self.queue_visual(PendingVisual {
                at: time - self.config.visual_preroll,
                note: v.note,
                voice: Some(v.voice),
                kind: Highlight::On,
            });
            self.queue_visual(PendingVisual {
                at: time + self.config.highlight_hold,
                note: v.note,
                voice: Some(v.voice),
                kind: Highlight::RevertCheck,
            });
        }
        self.scheduled.push_back(ScheduledStep {
            time: event.time,
            voices: voices.iter().map(|v| v.voice).collect(),
        });
        debug!(step = event.step, time, notes = triggers.len(), "step dispatched");

        Some(DispatchedBatch { step: event.step, time, triggers, voices })
    }

    /// A pad struck live. Plays at `now`; when `record_step` is given (the
    /// sequencer is running) the hit is also written into the current
    /// pattern there, and the sequenced pass for that step skips the note.
    #[allow(clippy::too_many_arguments)]
    pub fn manual_trigger<O: VoiceOutput>(
        &mut self,
        note: Note,
        velocity: f32,
        now: f64,
        record_step: Option<usize>,
        store: &mut PatternStore,
        samples: &dyn SampleStore,
        trigger: &mut SoundTrigger<O>,
    ) -> (Option<VoiceHandle>, Vec<VisualEvent>) {
        let handle = trigger.trigger(note, velocity, now, samples);

        if let Some(step) = record_step.filter(|_| self.enabled) {
            if self.manual_step != Some(step) {
                self.manual.clear();
                self.manual_step = Some(step);
            }
            self.manual.insert(note);
            if store.record_note(note, step, velocity) {
                debug!(note = note.0, step, "live hit recorded");
            }
        }

        let mut visuals = Vec::new();
        if let Some(h) = handle {
            visuals.push(VisualEvent::Pad { note, active: true });
            self.queue_visual(PendingVisual {
                at: now + self.config.highlight_hold,
                note,
                voice: Some(h.voice),
                kind: Highlight::RevertCheck,
            });
        }
        (handle, visuals)
    }

    /// Highlight changes that are due at `now`.
    pub fn poll_visuals<O: VoiceOutput>(&mut self, now: f64, trigger: &SoundTrigger<O>) -> Vec<VisualEvent> {
        let mut out = Vec::new();
        while let Some(front) = self.visuals.front() {
            if front.at > now {
                break;
            }
            let Some(v) = self.visuals.pop_front() else { break };
            match v.kind {
                Highlight::On => out.push(VisualEvent::Pad { note: v.note, active: true }),
                Highlight::RevertCheck if !trigger.is_active(v.note) => {
                    out.push(VisualEvent::Pad { note: v.note, active: false })
                }
                Highlight::RevertCheck => {}
            }
        }

        while self.scheduled.front().is_some_and(|s| s.time < now - BATCH_MEMORY) {
            self.scheduled.pop_front();
        }
        out
    }

    pub fn next_visual(&self) -> Option<f64> {
        self.visuals.front().map(|v| v.at)
    }

    /// Turns a pad off once its last voice is done, unless a highlight for
    /// it is still being held.
    pub fn on_voice_completed(&self, completion: &VoiceCompletion) -> Option<VisualEvent> {
        if !completion.note_idle {
            return None;
        }
        let held = self.visuals.iter().any(|v| v.note == completion.note);
        (!held).then_some(VisualEvent::Pad { note: completion.note, active: false })
    }

    /// Cancels what was dispatched for steps after `after`. Used when the
    /// clock voids pre-scheduled steps.
    pub fn revoke_after<O: VoiceOutput>(&mut self, after: f64, trigger: &mut SoundTrigger<O>) -> usize {
        let mut voided = Vec::new();
        self.scheduled.retain(|s| {
            if s.time > after {
                voided.extend_from_slice(&s.voices);
                false
            } else {
                true
            }
        });
        if voided.is_empty() {
            return 0;
        }
        self.visuals.retain(|v| !v.voice.is_some_and(|id| voided.contains(&id)));
        let cancelled = trigger.cancel(&voided);
        debug!(after, cancelled, "revoked scheduled voices");
        cancelled
    }

    /// Drops highlights queued for after `time`. Used when the audio clock
    /// went backwards and the queue tail belongs to the old timeline.
    pub fn drop_visuals_after(&mut self, time: f64) {
        let keep = self.visuals.partition_point(|v| v.at <= time);
        self.visuals.truncate(keep);
    }

    /// Forget marks, pending highlights and batch history (transport stop).
    pub fn reset(&mut self) {
        self.manual.clear();
        self.manual_step = None;
        self.visuals.clear();
        self.scheduled.clear();
    }

    fn groove_offset(&mut self, event: StepEvent, pattern: &Pattern) -> f64 {
        let mut offset = 0.0;
        if event.step % 2 == 1 {
            offset += pattern.swing() as f64 / 100.0 * event.duration * 0.5;
        }
        if pattern.humanize() > 0.0 {
            let jitter = self.rng.f64() * 2.0 - 1.0;
            offset += jitter * pattern.humanize() as f64 / 100.0 * self.config.max_humanize;
        }
        offset
    }

    fn queue_visual(&mut self, visual: PendingVisual) {
        let index = self.visuals.partition_point(|v| v.at <= visual.at);
        self.visuals.insert(index, visual);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audio::SampleId;
    use crate::clock::ManualClock;
    use crate::config::{PatternConfig, TriggerConfig};
    use crate::samples::{SampleBank, SoundSlot, TrimRegion};
    use crate::testing::RecordingOutput;

    struct Rig {
        audio: Arc<ManualClock>,
        store: PatternStore,
        bank: SampleBank,
        trigger: SoundTrigger<RecordingOutput>,
        dispatcher: StepDispatcher,
    }

    fn rig() -> Rig {
        let audio = Arc::new(ManualClock::new(0.0));
        let mut store = PatternStore::new(&PatternConfig::default());
        store.create(Some("test"));
        let mut bank = SampleBank::new();
        for note in [36u8, 38, 42] {
            bank.assign(
                Note(note),
                SoundSlot {
                    sample_id: SampleId(note as u64),
                    frames: 4_800,
                    sample_rate: 48_000,
                    trim: TrimRegion::default(),
                    path: None,
                },
            );
        }
        let trigger = SoundTrigger::new(TriggerConfig::default(), audio.clone(), RecordingOutput::default());
        let dispatcher = StepDispatcher::with_rng(DispatchConfig::default(), fastrand::Rng::with_seed(7));
        Rig { audio, store, bank, trigger, dispatcher }
    }

    fn step(step: usize, time: f64) -> StepEvent {
        StepEvent { step, time, duration: 0.125 }
    }

    impl Rig {
        fn dispatch(&mut self, event: StepEvent) -> Option<DispatchedBatch> {
            self.dispatcher.on_step(event, &self.store, &self.bank, &mut self.trigger)
        }
    }

    #[test]
    fn notes_on_one_step_go_out_as_one_batch() {
        let mut r = rig();
        r.store.record_note(Note(36), 4, 1.0);
        r.store.record_note(Note(38), 4, 0.5);

        let batch = r.dispatch(step(4, 1.0)).unwrap();
        assert_eq!(batch.triggers.len(), 2);
        assert!(batch.triggers.iter().all(|t| t.time == batch.time));
        assert!((batch.time - 1.005).abs() < 1e-9);

        let started = &r.trigger.output().started;
        assert_eq!(started.len(), 2);
        assert_eq!(started[0].start, started[1].start);
    }

    #[test]
    fn manual_hit_overrides_sequenced_note_for_that_step() {
        let mut r = rig();
        r.store.record_note(Note(38), 4, 1.0);

        let (handle, visuals) = r.dispatcher.manual_trigger(
            Note(36),
            0.9,
            0.9,
            Some(4),
            &mut r.store,
            &r.bank,
            &mut r.trigger,
        );
        assert!(handle.is_some());
        assert_eq!(visuals, vec![VisualEvent::Pad { note: Note(36), active: true }]);
        // recorded at the clock's step
        assert!(r.store.current().unwrap().is_active(Note(36), 4));

        let batch = r.dispatch(step(4, 1.0)).unwrap();
        let notes: Vec<_> = batch.triggers.iter().map(|t| t.note).collect();
        assert_eq!(notes, vec![Note(38)]);

        // next time round the recorded note plays normally
        let batch = r.dispatch(step(4, 5.0)).unwrap();
        assert_eq!(batch.triggers.len(), 2);
    }

    #[test]
    fn marks_clear_when_the_step_moves_on() {
        let mut r = rig();
        r.dispatcher
            .manual_trigger(Note(36), 1.0, 0.0, Some(4), &mut r.store, &r.bank, &mut r.trigger);
        r.dispatch(step(4, 0.5));
        r.store.record_note(Note(36), 5, 1.0);
        let batch = r.dispatch(step(5, 0.625)).unwrap();
        assert_eq!(batch.triggers[0].note, Note(36));
    }

    #[test]
    fn manual_hit_without_sequencer_does_not_record() {
        let mut r = rig();
        r.dispatcher
            .manual_trigger(Note(36), 1.0, 0.0, None, &mut r.store, &r.bank, &mut r.trigger);
        assert!(r.store.current().unwrap().track(Note(36)).is_none());
        assert_eq!(r.trigger.output().started.len(), 1);
    }

    #[test]
    fn disabled_or_empty_store_dispatches_nothing() {
        let mut r = rig();
        r.store.record_note(Note(36), 0, 1.0);
        r.dispatcher.set_enabled(false);
        assert!(r.dispatch(step(0, 0.0)).is_none());

        r.dispatcher.set_enabled(true);
        let id = r.store.current_id().unwrap();
        r.store.delete(id);
        assert!(r.dispatch(step(0, 0.0)).is_none());
        assert!(r.trigger.output().started.is_empty());
    }

    #[test]
    fn unloaded_notes_are_skipped() {
        let mut r = rig();
        r.store.record_note(Note(60), 2, 1.0);
        r.store.record_note(Note(42), 2, 1.0);
        let batch = r.dispatch(step(2, 0.25)).unwrap();
        assert_eq!(batch.triggers.len(), 1);
        assert_eq!(batch.triggers[0].note, Note(42));
    }

    #[test]
    fn swing_delays_odd_steps_only() {
        let mut r = rig();
        r.store.current_mut().unwrap().set_swing(50.0);
        r.store.record_note(Note(36), 0, 1.0);
        r.store.record_note(Note(36), 1, 1.0);
        let even = r.dispatch(step(0, 0.0)).unwrap();
        let odd = r.dispatch(step(1, 0.125)).unwrap();
        assert!((even.time - 0.005).abs() < 1e-9);
        // 50% of half a step
        assert!((odd.time - (0.125 + 0.005 + 0.03125)).abs() < 1e-9);
    }

    #[test]
    fn humanize_moves_the_whole_batch_together() {
        let mut r = rig();
        r.store.current_mut().unwrap().set_humanize(100.0);
        r.store.record_note(Note(36), 0, 1.0);
        r.store.record_note(Note(38), 0, 1.0);
        let batch = r.dispatch(step(0, 1.0)).unwrap();
        assert_eq!(batch.triggers[0].time, batch.triggers[1].time);
        assert!((batch.time - 1.005).abs() <= 0.01 + 1e-9);
    }

    #[test]
    fn highlights_lead_the_audio_and_revert_when_idle() {
        let mut r = rig();
        r.store.record_note(Note(36), 0, 1.0);
        let batch = r.dispatch(step(0, 1.0)).unwrap();
        let t = batch.time;

        assert!(r.dispatcher.poll_visuals(t - 0.02, &r.trigger).is_empty());
        assert_eq!(
            r.dispatcher.poll_visuals(t - 0.015, &r.trigger),
            vec![VisualEvent::Pad { note: Note(36), active: true }]
        );
        // still sounding at the hold check: stays lit
        assert!(r.dispatcher.poll_visuals(t + 0.1, &r.trigger).is_empty());

        let voice = batch.voices[0].voice;
        r.trigger.output_mut().ended.push(voice);
        let done = r.trigger.poll_completions();
        assert_eq!(
            r.dispatcher.on_voice_completed(&done[0]),
            Some(VisualEvent::Pad { note: Note(36), active: false })
        );
    }

    #[test]
    fn revert_check_turns_off_finished_pads() {
        let mut r = rig();
        r.store.record_note(Note(36), 0, 1.0);
        let batch = r.dispatch(step(0, 1.0)).unwrap();
        r.trigger.output_mut().ended.push(batch.voices[0].voice);
        let done = r.trigger.poll_completions();
        // hold not over yet, so completion leaves the pad to the pending check
        assert_eq!(r.dispatcher.on_voice_completed(&done[0]), None);
        let visuals = r.dispatcher.poll_visuals(batch.time + 0.2, &r.trigger);
        assert_eq!(visuals.last(), Some(&VisualEvent::Pad { note: Note(36), active: false }));
    }

    #[test]
    fn revoke_cancels_future_batches() {
        let mut r = rig();
        r.store.record_note(Note(36), 0, 1.0);
        r.store.record_note(Note(38), 1, 1.0);
        let early = r.dispatch(step(0, 0.0)).unwrap();
        let late = r.dispatch(step(1, 0.125)).unwrap();
        r.audio.set(0.09);

        assert_eq!(r.dispatcher.revoke_after(0.09, &mut r.trigger), 1);
        assert_eq!(r.trigger.output().cancelled, vec![late.voices[0].voice]);
        assert!(r.trigger.is_active(early.voices[0].note));
        assert!(!r.trigger.is_active(Note(38)));
        // the cancelled highlight never shows
        let visuals = r.dispatcher.poll_visuals(0.2, &r.trigger);
        assert!(!visuals.contains(&VisualEvent::Pad { note: Note(38), active: true }));
    }

    #[test]
    fn revoke_drops_the_pending_release_check_too() {
        let mut r = rig();
        r.store.record_note(Note(38), 1, 1.0);
        let late = r.dispatch(step(1, 0.125)).unwrap();
        r.dispatcher.revoke_after(0.09, &mut r.trigger);
        assert_eq!(r.trigger.output().cancelled, vec![late.voices[0].voice]);
        assert_eq!(r.dispatcher.next_visual(), None);
    }

    #[test]
    fn highlights_past_a_cutoff_can_be_dropped() {
        let mut r = rig();
        r.store.record_note(Note(36), 0, 1.0);
        r.dispatch(step(0, 0.0)).unwrap();
        let (hit, _) = r.dispatcher.manual_trigger(Note(38), 1.0, 16.0, None, &mut r.store, &r.bank, &mut r.trigger);
        assert!(hit.is_some());

        r.dispatcher.drop_visuals_after(0.6);
        // the step's highlights stay queued, the late hit's release check is gone
        assert!(r.dispatcher.next_visual().is_some_and(|at| at < 0.6));
        let visuals = r.dispatcher.poll_visuals(20.0, &r.trigger);
        assert!(!visuals.iter().any(|v| matches!(v, VisualEvent::Pad { note: Note(38), .. })));
    }
}
